//! One-way event types flowing from the pipeline to the caller

use chrono::NaiveDate;
use serde::Serialize;
use uuid::Uuid;

use crate::capture::auto_capture::CaptureState;
use crate::error::CaptureError;
use crate::vision::FrameVerdict;

/// How one recognition job ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum JobStatus {
    /// Recognized text contained a plausible birth date
    Sample { date: NaiveDate },
    /// Text came back but held no plausible date
    NoDate,
    /// The engine failed, timed out, or panicked
    Failed { message: String },
}

/// Progress of one scan, sent as the pipeline advances
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum ScanProgress {
    Started { variants: usize, workers: usize },
    VariantCompleted {
        index: usize,
        label: String,
        completed: usize,
        total: usize,
        status: JobStatus,
    },
    ConsensusReached { birth_date: NaiveDate, votes: usize, samples: usize },
    NoConsensus,
}

impl ScanProgress {
    /// Human-readable status token
    pub fn token(&self) -> String {
        match self {
            ScanProgress::Started { variants, workers } => {
                format!("Initializing recognition: {} variants on {} workers", variants, workers)
            }
            ScanProgress::VariantCompleted {
                label,
                completed,
                total,
                status,
                ..
            } => {
                let outcome = match status {
                    JobStatus::Sample { date } => format!("found {}", date),
                    JobStatus::NoDate => "no date".to_string(),
                    JobStatus::Failed { .. } => "failed".to_string(),
                };
                format!("Variant {}/{} ({}): {}", completed, total, label, outcome)
            }
            ScanProgress::ConsensusReached {
                birth_date,
                votes,
                samples,
            } => format!("Consensus reached: {} ({}/{} samples)", birth_date, votes, samples),
            ScanProgress::NoConsensus => "No consensus, retry with a clearer photo".to_string(),
        }
    }
}

/// Event emitted by a live capture session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    /// Session that produced the event; events from a closed session are stale
    pub session_id: Uuid,
    pub kind: SessionEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEventKind {
    /// Verdict of one analysis tick, for on-screen guidance
    Guidance(FrameVerdict),
    /// Auto-capture moved to another state
    StateChanged(CaptureState),
    /// The still was taken
    StillCaptured { width: u32, height: u32 },
    /// Taking the still failed; scanning resumes
    CaptureFailed(CaptureError),
    Closed,
}
