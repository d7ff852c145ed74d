//! Error types
//!
//! Guidance verdicts and dropped recognition jobs are not errors; only the
//! conditions that end a scan attempt or a camera session surface here.

use std::time::Duration;
use thiserror::Error;

/// Failure of a whole scan attempt
#[derive(Debug, Error)]
pub enum ScanError {
    /// The input contained no bytes
    #[error("input image is empty")]
    EmptyInput,
    /// The input bytes could not be decoded as an image
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    /// Reading the input file failed
    #[error("failed to read image file: {0}")]
    Io(#[from] std::io::Error),
    /// The live capture path failed before a still was produced
    #[error(transparent)]
    Capture(#[from] CaptureError),
    /// The caller cancelled the scan
    #[error("scan cancelled")]
    Cancelled,
}

/// Failure of the live camera session
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    /// No camera could be opened
    #[error("camera unavailable: {0}")]
    CameraUnavailable(String),
    /// The user or platform refused camera access
    #[error("camera permission denied")]
    PermissionDenied,
    /// Taking the still image failed
    #[error("still capture failed: {0}")]
    StillFailed(String),
    /// The session was closed before a still was captured
    #[error("capture session closed")]
    SessionClosed,
}

/// Failure of a single recognition call
#[derive(Debug, Error)]
pub enum RecognitionError {
    /// The engine is missing or refused to start
    #[error("recognition engine unavailable: {0}")]
    Unavailable(String),
    /// The engine did not answer in time
    #[error("recognition timed out after {0:?}")]
    Timeout(Duration),
    /// The engine answered with something we do not accept
    #[error("invalid recognition reply: {0}")]
    InvalidReply(String),
    /// The engine reported its own failure
    #[error("recognition failed: {0}")]
    Engine(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
