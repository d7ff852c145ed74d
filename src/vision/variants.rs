//! Recognition variants
//!
//! The true orientation and lighting of an ID photo are unknown, so instead of
//! guessing one correction the pipeline recognizes a fixed matrix of
//! candidates: 4 rotations × 3 binarization passes.

use image::imageops;
use image::{DynamicImage, GrayImage};
use imageproc::contrast::{threshold, ThresholdType};
use serde::Serialize;
use tracing::debug;

use crate::vision::{rgba_to_gray, RasterImage};

/// Rotation applied to the normalized image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Rotation {
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub const ALL: [Rotation; 4] = [Rotation::Deg0, Rotation::Deg90, Rotation::Deg180, Rotation::Deg270];

    pub fn degrees(&self) -> u16 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    fn apply(&self, image: &GrayImage) -> GrayImage {
        match self {
            Rotation::Deg0 => image.clone(),
            Rotation::Deg90 => imageops::rotate90(image),
            Rotation::Deg180 => imageops::rotate180(image),
            Rotation::Deg270 => imageops::rotate270(image),
        }
    }
}

/// Binarization pass, 0 = gentlest cutoff, 2 = most aggressive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct FilterPass(pub u8);

/// One candidate image handed to the recognizer
#[derive(Debug, Clone)]
pub struct OcrVariant {
    /// Position in the variant matrix, 0..12
    pub index: usize,
    pub angle: Rotation,
    pub filter_pass: FilterPass,
    /// Binarized, rotated luma image
    pub image: RasterImage,
}

impl OcrVariant {
    /// Short label for logs and progress
    pub fn label(&self) -> String {
        format!("{}deg/pass{}", self.angle.degrees(), self.filter_pass.0)
    }
}

/// Mean luma of an image
fn mean_luma(gray: &GrayImage) -> f32 {
    let pixels = gray.as_raw();
    if pixels.is_empty() {
        return 128.0;
    }
    let sum: u64 = pixels.iter().map(|&p| p as u64).sum();
    sum as f32 / pixels.len() as f32
}

/// Map luma to pure black/white around `cutoff`; pixels above it become white
fn binarize(gray: &GrayImage, cutoff: u8) -> GrayImage {
    threshold(gray, cutoff, ThresholdType::Binary)
}

/// Cutoff for each pass, relative to the image's mean luma
pub fn pass_cutoffs(gray: &GrayImage, factors: &[f32; 3]) -> [u8; 3] {
    let mean = mean_luma(gray);
    factors.map(|f| (mean * f).round().clamp(1.0, 254.0) as u8)
}

/// Build the 12 variants, ordered by rotation then filter pass
pub fn generate_variants(image: &RasterImage, cutoff_factors: &[f32; 3]) -> Vec<OcrVariant> {
    let gray = rgba_to_gray(&image.to_rgba8());
    let cutoffs = pass_cutoffs(&gray, cutoff_factors);
    debug!(
        "Generating variants for {}x{} image, cutoffs {:?}",
        gray.width(),
        gray.height(),
        cutoffs
    );

    let passes: Vec<GrayImage> = cutoffs.iter().map(|&c| binarize(&gray, c)).collect();

    let mut variants = Vec::with_capacity(Rotation::ALL.len() * passes.len());
    for angle in Rotation::ALL {
        for (pass, filtered) in passes.iter().enumerate() {
            variants.push(OcrVariant {
                index: variants.len(),
                angle,
                filter_pass: FilterPass(pass as u8),
                image: DynamicImage::ImageLuma8(angle.apply(filtered)),
            });
        }
    }
    variants
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn gradient_image() -> RasterImage {
        DynamicImage::ImageRgba8(RgbaImage::from_fn(20, 30, |x, _| {
            let v = (x * 12) as u8;
            Rgba([v, v, v, 255])
        }))
    }

    #[test]
    fn test_variant_matrix_shape() {
        let variants = generate_variants(&gradient_image(), &[0.85, 1.0, 1.15]);
        assert_eq!(variants.len(), 12);

        for (i, v) in variants.iter().enumerate() {
            assert_eq!(v.index, i);
            assert_eq!(v.angle, Rotation::ALL[i / 3]);
            assert_eq!(v.filter_pass, FilterPass((i % 3) as u8));
        }
    }

    #[test]
    fn test_rotated_variants_swap_dimensions() {
        let variants = generate_variants(&gradient_image(), &[0.85, 1.0, 1.15]);
        for v in &variants {
            let dims = (v.image.width(), v.image.height());
            match v.angle {
                Rotation::Deg0 | Rotation::Deg180 => assert_eq!(dims, (20, 30)),
                Rotation::Deg90 | Rotation::Deg270 => assert_eq!(dims, (30, 20)),
            }
        }
    }

    #[test]
    fn test_variants_are_binary() {
        let variants = generate_variants(&gradient_image(), &[0.85, 1.0, 1.15]);
        for v in &variants {
            let luma = v.image.to_luma8();
            assert!(luma.pixels().all(|p| p[0] == 0 || p[0] == 255), "{}", v.label());
        }
    }

    #[test]
    fn test_later_passes_are_more_aggressive() {
        let gray = rgba_to_gray(&gradient_image().to_rgba8());
        let cutoffs = pass_cutoffs(&gray, &[0.85, 1.0, 1.15]);
        assert!(cutoffs[0] < cutoffs[1] && cutoffs[1] < cutoffs[2], "{:?}", cutoffs);

        let white = |c: u8| binarize(&gray, c).pixels().filter(|p| p[0] == 255).count();
        assert!(white(cutoffs[0]) > white(cutoffs[2]));
    }

    #[test]
    fn test_binarize_threshold() {
        let gray = GrayImage::from_raw(3, 1, vec![100, 128, 200]).unwrap();
        let out = binarize(&gray, 128);
        assert_eq!(out.as_raw(), &vec![0, 0, 255]);
    }
}
