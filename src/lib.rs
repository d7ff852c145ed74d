//! idscan - identity document capture guidance and field extraction
//!
//! Guides live framing of an ID document, normalizes whatever image arrives,
//! recognizes a matrix of rotated/binarized variants in parallel and votes the
//! birth date and document number out of the noisy results.

pub mod analysis;
pub mod capture;
pub mod config;
pub mod error;
pub mod scan;
pub mod shared;
pub mod vision;

pub use analysis::DocumentType;
pub use capture::{CameraSource, CaptureSession};
pub use config::AppConfig;
pub use error::{CaptureError, RecognitionError, ScanError};
pub use scan::{CancelToken, DispatchPolicy, ExtractionResult, Scanner};
pub use shared::ScanProgress;
pub use vision::TextRecognizer;
