//! Vision Layer
//!
//! Pixel-level work on document images:
//! - orientation/size normalization of uploads and stills
//! - live frame quality analysis for capture guidance
//! - rotation × binarization variants for recognition
//! - the text recognition boundary and its Tesseract backend

pub mod frame_quality;
pub mod normalize;
pub mod recognizer;
pub mod tesseract;
pub mod variants;

use image::{DynamicImage, GrayImage, Luma, RgbaImage};

pub use frame_quality::{
    BoundingBox, DetectionResult, FrameAnalyzer, FrameVerdict, ValidationReason, ValidationState,
};
pub use normalize::{normalize_bytes, normalize_image, read_orientation, ImageNormalizer, Orientation};
pub use recognizer::{RecognitionOutput, RecognitionReply, TextRecognizer};
pub use tesseract::{CommandRecognizer, TesseractRecognizer};
pub use variants::{generate_variants, FilterPass, OcrVariant, Rotation};

/// Any image flowing through the pipeline: RGBA from the normalizer, luma for variants
pub type RasterImage = DynamicImage;

/// Luma of one RGB pixel using standard luminance weights
#[inline]
pub fn luma(r: u8, g: u8, b: u8) -> f32 {
    0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32
}

/// Convert RGBA to an 8-bit luma image
pub fn rgba_to_gray(image: &RgbaImage) -> GrayImage {
    let (width, height) = image.dimensions();
    let mut gray = GrayImage::new(width, height);

    for (x, y, pixel) in image.enumerate_pixels() {
        let value = luma(pixel[0], pixel[1], pixel[2]).round().clamp(0.0, 255.0) as u8;
        gray.put_pixel(x, y, Luma([value]));
    }

    gray
}
