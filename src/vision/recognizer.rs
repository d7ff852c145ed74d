//! Text recognition boundary
//!
//! The OCR engine is an external collaborator: it turns a raster image into
//! text plus a 0-100 confidence, and may be slow or fail. Engine output is
//! validated here so nothing downstream ever sees an out-of-range confidence
//! or an unknown reply shape.

use serde::Deserialize;

use crate::error::RecognitionError;
use crate::vision::RasterImage;

/// Every OCR backend implements this.
///
/// Implementations must be pure with respect to their input image; the
/// orchestrator calls them from several worker threads at once.
pub trait TextRecognizer: Send + Sync {
    fn name(&self) -> &str;
    fn recognize(&self, image: &RasterImage) -> Result<RecognitionOutput, RecognitionError>;
}

/// Validated recognition result
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionOutput {
    text: String,
    confidence: f32,
}

impl RecognitionOutput {
    /// Build an output, rejecting confidences outside 0..=100
    pub fn new(text: impl Into<String>, confidence: f32) -> Result<Self, RecognitionError> {
        if !confidence.is_finite() || !(0.0..=100.0).contains(&confidence) {
            return Err(RecognitionError::InvalidReply(format!(
                "confidence {} outside 0..=100",
                confidence
            )));
        }
        Ok(Self {
            text: text.into(),
            confidence,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

/// Reply document produced by an external recognition program
///
/// ```json
/// {"status": "ok", "text": "...", "confidence": 87.5}
/// {"status": "error", "message": "engine not ready"}
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case", deny_unknown_fields)]
pub enum RecognitionReply {
    Ok { text: String, confidence: f32 },
    Error { message: String },
}

impl RecognitionReply {
    /// Parse a JSON reply, rejecting anything that is not one of the known shapes
    pub fn from_json(json: &str) -> Result<Self, RecognitionError> {
        serde_json::from_str(json).map_err(|e| RecognitionError::InvalidReply(e.to_string()))
    }

    pub fn into_output(self) -> Result<RecognitionOutput, RecognitionError> {
        match self {
            RecognitionReply::Ok { text, confidence } => RecognitionOutput::new(text, confidence),
            RecognitionReply::Error { message } => Err(RecognitionError::Engine(message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_rejects_out_of_range_confidence() {
        assert!(RecognitionOutput::new("x", 101.0).is_err());
        assert!(RecognitionOutput::new("x", -1.0).is_err());
        assert!(RecognitionOutput::new("x", f32::NAN).is_err());
        assert!(RecognitionOutput::new("x", 100.0).is_ok());
    }

    #[test]
    fn test_reply_ok() {
        let reply = RecognitionReply::from_json(r#"{"status":"ok","text":"NOME","confidence":71.5}"#).unwrap();
        let output = reply.into_output().unwrap();
        assert_eq!(output.text(), "NOME");
        assert!((output.confidence() - 71.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_reply_error_becomes_engine_error() {
        let reply = RecognitionReply::from_json(r#"{"status":"error","message":"busy"}"#).unwrap();
        assert!(matches!(reply.into_output(), Err(RecognitionError::Engine(m)) if m == "busy"));
    }

    #[test]
    fn test_unknown_shapes_are_rejected() {
        // Bare string
        assert!(RecognitionReply::from_json(r#""15/02/1990""#).is_err());
        // Missing status
        assert!(RecognitionReply::from_json(r#"{"text":"a","confidence":50}"#).is_err());
        // Unknown status
        assert!(RecognitionReply::from_json(r#"{"status":"partial","text":"a"}"#).is_err());
        // Extra field
        assert!(RecognitionReply::from_json(
            r#"{"status":"ok","text":"a","confidence":50,"bio":{}}"#
        )
        .is_err());
    }
}
