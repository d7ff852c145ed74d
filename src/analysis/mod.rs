//! Field extraction and consensus
//!
//! Turns raw recognized text into birth dates and document numbers, then
//! reduces many noisy samples to one answer.

pub mod consensus;
pub mod dates;
pub mod document;

pub use consensus::{resolve, Consensus, OcrSample};
pub use dates::{age_on, extract_date, is_plausible};
pub use document::{classify, extract_document_number, DocumentType};
