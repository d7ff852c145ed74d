//! Shared state and messaging between the pipeline and its caller
//!
//! Everything here flows one way: sessions and scans publish, callers observe.

pub mod messages;
pub mod state;

pub use messages::{JobStatus, ScanProgress, SessionEvent, SessionEventKind};
pub use state::SessionState;
