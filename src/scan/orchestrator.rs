//! Parallel recognition of the variant matrix
//!
//! Variants are queued on a channel and pulled by a bounded set of scoped
//! worker threads. Jobs share nothing but the queue and the result channel;
//! every worker is joined before samples are handed to consensus, so no job
//! outlives the call.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use crossbeam_channel::{unbounded, Sender};
use tracing::{debug, warn};

use crate::analysis::OcrSample;
use crate::config::{ConsensusSettings, RecognitionSettings};
use crate::scan::{CancelToken, DispatchPolicy};
use crate::shared::{JobStatus, ScanProgress};
use crate::vision::{OcrVariant, TextRecognizer};

/// Workers to run: hardware concurrency capped by `max_workers`, at least one
pub fn worker_count(max_workers: usize) -> usize {
    let available = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    available.min(max_workers).max(1)
}

/// Dispatches variants to the recognizer and collects dated samples
pub struct RecognitionOrchestrator {
    recognizer: Arc<dyn TextRecognizer>,
    workers: usize,
    policy: DispatchPolicy,
    bounds: ConsensusSettings,
}

impl RecognitionOrchestrator {
    pub fn new(
        recognizer: Arc<dyn TextRecognizer>,
        settings: &RecognitionSettings,
        bounds: ConsensusSettings,
    ) -> Self {
        Self {
            recognizer,
            workers: worker_count(settings.max_workers),
            policy: settings.dispatch,
            bounds,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn policy(&self) -> DispatchPolicy {
        self.policy
    }

    /// Recognize `variants` and return the samples that carry a plausible date,
    /// ordered by variant index
    pub fn run(
        &self,
        variants: Vec<OcrVariant>,
        today: NaiveDate,
        cancel: &CancelToken,
        progress: Option<&Sender<ScanProgress>>,
    ) -> Vec<OcrSample> {
        let total = variants.len();
        let workers = self.workers.min(total).max(1);

        let (job_tx, job_rx) = unbounded::<OcrVariant>();
        for variant in variants {
            let _ = job_tx.send(variant);
        }
        drop(job_tx);

        let (result_tx, result_rx) = unbounded::<OcrSample>();
        let stop = AtomicBool::new(false);
        let completed = AtomicUsize::new(0);
        let failed = AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for worker in 0..workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                let (stop, completed, failed) = (&stop, &completed, &failed);

                scope.spawn(move || {
                    for variant in job_rx.iter() {
                        if cancel.is_cancelled() || stop.load(Ordering::SeqCst) {
                            break;
                        }
                        let status = match self.recognize(&variant, today) {
                            Ok(sample) => {
                                let status = match sample.date() {
                                    Some(date) => JobStatus::Sample { date },
                                    None => JobStatus::NoDate,
                                };
                                if sample.date().is_some() && !cancel.is_cancelled() {
                                    if self.policy == DispatchPolicy::FirstSuccess {
                                        stop.store(true, Ordering::SeqCst);
                                    }
                                    let _ = result_tx.send(sample);
                                }
                                status
                            }
                            Err(message) => {
                                debug!("Worker {}: variant {} dropped: {}", worker, variant.label(), message);
                                failed.fetch_add(1, Ordering::SeqCst);
                                JobStatus::Failed { message }
                            }
                        };

                        let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                        if let Some(tx) = progress {
                            let _ = tx.send(ScanProgress::VariantCompleted {
                                index: variant.index,
                                label: variant.label(),
                                completed: done,
                                total,
                                status,
                            });
                        }
                    }
                });
            }
        });
        drop(result_tx);

        let mut samples: Vec<OcrSample> = result_rx.iter().collect();
        samples.sort_by_key(|s| s.source_variant());

        let failed = failed.load(Ordering::SeqCst);
        if failed > 0 && failed == completed.load(Ordering::SeqCst) {
            warn!("All {} recognition jobs failed", failed);
        }
        debug!(
            "Recognition finished: {} dated samples from {} of {} variants",
            samples.len(),
            completed.load(Ordering::SeqCst),
            total
        );
        samples
    }

    /// One job: recognize and extract, with engine errors and panics as `Err`
    fn recognize(&self, variant: &OcrVariant, today: NaiveDate) -> Result<OcrSample, String> {
        let recognizer = &self.recognizer;
        let output = catch_unwind(AssertUnwindSafe(|| recognizer.recognize(&variant.image)))
            .map_err(|_| format!("{} panicked", recognizer.name()))?
            .map_err(|e| e.to_string())?;

        let confidence = output.confidence();
        Ok(OcrSample::from_text(
            output.into_text(),
            confidence,
            variant.index,
            today,
            &self.bounds,
        ))
    }
}
