//! Runtime state of a live capture session, shared with its analysis thread

use crate::capture::auto_capture::CaptureState;
use crate::vision::FrameVerdict;

/// Snapshot of a capture session, updated once per analysis tick
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    /// Whether the analysis loop is still running
    pub active: bool,
    /// Analysis ticks completed so far
    pub ticks: u64,
    /// Current auto-capture state
    pub capture_state: CaptureState,
    /// Latest verdict, if any tick ran
    pub last_verdict: Option<FrameVerdict>,
    /// Whether the still has been taken
    pub still_captured: bool,
}
