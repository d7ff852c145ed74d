//! Extraction pipeline
//!
//! Normalized image -> 12 variants -> parallel recognition -> consensus.
//! `Scanner` is the entry point for both uploaded files and live stills.

pub mod orchestrator;
pub mod scanner;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use orchestrator::{worker_count, RecognitionOrchestrator};
pub use scanner::{ExtractionResult, Scanner};

/// How many variants are recognized before consensus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchPolicy {
    /// Recognize every variant and vote over all samples
    #[default]
    Exhaustive,
    /// Stop dispatching once one variant yields a plausible date
    FirstSuccess,
}

/// Cooperative cancellation flag shared by a scan and its caller
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
