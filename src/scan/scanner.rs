//! Extraction entry points

use std::path::Path;
use std::sync::Arc;

use chrono::{Local, NaiveDate};
use crossbeam_channel::Sender;
use serde::Serialize;
use tracing::{info, warn};

use crate::analysis::{resolve, DocumentType};
use crate::capture::CaptureSession;
use crate::config::AppConfig;
use crate::error::{CaptureError, ScanError};
use crate::scan::{CancelToken, RecognitionOrchestrator};
use crate::shared::ScanProgress;
use crate::vision::{generate_variants, ImageNormalizer, RasterImage, TextRecognizer};

/// Final answer of one scan
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    /// `None` iff no sample produced a plausible date
    pub birth_date: Option<NaiveDate>,
    pub document_number: Option<String>,
    /// 0..=1
    pub confidence: f32,
    pub document_type: DocumentType,
    /// Dated samples that took part in the vote
    pub sample_count: usize,
    /// Base64 PNG of the normalized image
    pub processed_preview: Option<String>,
}

impl ExtractionResult {
    /// Result returned when no variant produced a plausible date
    pub fn no_consensus(processed_preview: Option<String>) -> Self {
        Self {
            birth_date: None,
            document_number: None,
            confidence: 0.0,
            document_type: DocumentType::Unknown,
            sample_count: 0,
            processed_preview,
        }
    }

    pub fn has_consensus(&self) -> bool {
        self.birth_date.is_some()
    }
}

/// Runs the normalize -> variants -> recognition -> consensus pipeline
pub struct Scanner {
    config: AppConfig,
    normalizer: ImageNormalizer,
    orchestrator: RecognitionOrchestrator,
    reference_date: Option<NaiveDate>,
    progress: Option<Sender<ScanProgress>>,
    cancel: CancelToken,
}

impl Scanner {
    pub fn new(config: AppConfig, recognizer: Arc<dyn TextRecognizer>) -> Self {
        let normalizer = ImageNormalizer::new(config.normalizer.clone());
        let orchestrator =
            RecognitionOrchestrator::new(recognizer, &config.recognition, config.consensus.clone());
        Self {
            config,
            normalizer,
            orchestrator,
            reference_date: None,
            progress: None,
            cancel: CancelToken::new(),
        }
    }

    /// Send progress events to `sender`
    pub fn with_progress(mut self, sender: Sender<ScanProgress>) -> Self {
        self.progress = Some(sender);
        self
    }

    /// Compute ages against `date` instead of today
    pub fn with_reference_date(mut self, date: NaiveDate) -> Self {
        self.reference_date = Some(date);
        self
    }

    /// Token that stops pending recognition jobs of this scanner
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Scan an uploaded image
    pub fn scan_from_file(&self, bytes: &[u8]) -> Result<ExtractionResult, ScanError> {
        let image = self.normalizer.normalize_bytes(bytes)?;
        self.scan_image(&image)
    }

    pub fn scan_from_path(&self, path: &Path) -> Result<ExtractionResult, ScanError> {
        info!("Scanning {}", path.display());
        let bytes = std::fs::read(path)?;
        self.scan_from_file(&bytes)
    }

    /// Wait for the session's auto-captured still, close the session, then scan it
    pub fn scan_from_live_capture(
        &self,
        mut session: CaptureSession,
    ) -> Result<ExtractionResult, ScanError> {
        let still = session.wait_for_still();
        session.close();

        let raster = still?
            .into_raster()
            .ok_or_else(|| CaptureError::StillFailed("incomplete frame".to_string()))?;
        let image = self.normalizer.normalize_still(raster);
        self.scan_image(&image)
    }

    fn today(&self) -> NaiveDate {
        self.reference_date
            .unwrap_or_else(|| Local::now().date_naive())
    }

    fn emit(&self, event: ScanProgress) {
        if let Some(tx) = &self.progress {
            let _ = tx.send(event);
        }
    }

    fn scan_image(&self, image: &RasterImage) -> Result<ExtractionResult, ScanError> {
        if self.cancel.is_cancelled() {
            return Err(ScanError::Cancelled);
        }

        let variants = generate_variants(image, &self.config.recognition.cutoff_factors);
        self.emit(ScanProgress::Started {
            variants: variants.len(),
            workers: self.orchestrator.workers().min(variants.len()),
        });

        let samples = self
            .orchestrator
            .run(variants, self.today(), &self.cancel, self.progress.as_ref());
        if self.cancel.is_cancelled() {
            info!("Scan cancelled, discarding {} samples", samples.len());
            return Err(ScanError::Cancelled);
        }

        let preview = self.normalizer.preview(image);
        let Some(consensus) = resolve(&samples) else {
            warn!("No consensus: no variant produced a plausible birth date");
            self.emit(ScanProgress::NoConsensus);
            return Ok(ExtractionResult::no_consensus(preview));
        };

        info!(
            "Consensus {} ({}/{} votes, confidence {:.2})",
            consensus.birth_date, consensus.votes, consensus.sample_count, consensus.confidence
        );
        self.emit(ScanProgress::ConsensusReached {
            birth_date: consensus.birth_date,
            votes: consensus.votes,
            samples: consensus.sample_count,
        });

        Ok(ExtractionResult {
            birth_date: Some(consensus.birth_date),
            document_number: consensus.document_number,
            confidence: consensus.confidence,
            document_type: consensus.document_type,
            sample_count: consensus.sample_count,
            processed_preview: preview,
        })
    }
}
