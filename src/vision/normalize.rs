//! Image normalization
//!
//! Every image entering the extraction pipeline (upload or live still) is
//! brought upright using its EXIF orientation tag, capped in size and forced to
//! portrait. Orientation metadata is read with a small manual scan of the
//! JPEG APP1 segment (or a bare TIFF header); any parse failure just means
//! "no correction".

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, RgbaImage};
use std::io::Cursor;
use tracing::{debug, warn};

use crate::config::NormalizerSettings;
use crate::error::ScanError;
use crate::vision::RasterImage;

const TAG_ORIENTATION: u16 = 0x0112;

/// EXIF orientation values (TIFF tag 0x0112)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Normal = 1,
    FlipHorizontal = 2,
    Rotate180 = 3,
    FlipVertical = 4,
    Transpose = 5,
    Rotate90 = 6,
    Transverse = 7,
    Rotate270 = 8,
}

impl Orientation {
    pub fn from_tag(value: u16) -> Option<Self> {
        match value {
            1 => Some(Orientation::Normal),
            2 => Some(Orientation::FlipHorizontal),
            3 => Some(Orientation::Rotate180),
            4 => Some(Orientation::FlipVertical),
            5 => Some(Orientation::Transpose),
            6 => Some(Orientation::Rotate90),
            7 => Some(Orientation::Transverse),
            8 => Some(Orientation::Rotate270),
            _ => None,
        }
    }

    pub const ALL: [Orientation; 8] = [
        Orientation::Normal,
        Orientation::FlipHorizontal,
        Orientation::Rotate180,
        Orientation::FlipVertical,
        Orientation::Transpose,
        Orientation::Rotate90,
        Orientation::Transverse,
        Orientation::Rotate270,
    ];
}

/// Read the EXIF orientation of encoded image bytes, if present and valid
pub fn read_orientation(bytes: &[u8]) -> Option<Orientation> {
    if bytes.starts_with(b"II*\0") || bytes.starts_with(b"MM\0*") {
        return orientation_from_tiff(bytes);
    }
    if !bytes.starts_with(&[0xFF, 0xD8]) {
        return None;
    }

    // Walk JPEG marker segments until the start of scan
    let mut pos = 2;
    while pos + 4 <= bytes.len() {
        if bytes[pos] != 0xFF {
            return None;
        }
        let marker = bytes[pos + 1];
        if marker == 0xFF {
            // Fill byte
            pos += 1;
            continue;
        }
        if marker == 0xDA || marker == 0xD9 {
            return None;
        }
        let len = u16::from_be_bytes([bytes[pos + 2], bytes[pos + 3]]) as usize;
        if len < 2 {
            return None;
        }
        let body_start = pos + 4;
        let body_end = (pos + 2 + len).min(bytes.len());
        if marker == 0xE1 && body_end > body_start {
            let body = &bytes[body_start..body_end];
            if let Some(tiff) = body.strip_prefix(b"Exif\0\0") {
                if let Some(orientation) = orientation_from_tiff(tiff) {
                    return Some(orientation);
                }
            }
        }
        pos += 2 + len;
    }
    None
}

/// Find tag 0x0112 in IFD0 of a TIFF structure
fn orientation_from_tiff(tiff: &[u8]) -> Option<Orientation> {
    let little_endian = match tiff.get(0..2)? {
        b"II" => true,
        b"MM" => false,
        _ => return None,
    };
    let read_u16 = |offset: usize| -> Option<u16> {
        let b = tiff.get(offset..offset + 2)?;
        Some(if little_endian {
            u16::from_le_bytes([b[0], b[1]])
        } else {
            u16::from_be_bytes([b[0], b[1]])
        })
    };
    let read_u32 = |offset: usize| -> Option<u32> {
        let b = tiff.get(offset..offset + 4)?;
        Some(if little_endian {
            u32::from_le_bytes([b[0], b[1], b[2], b[3]])
        } else {
            u32::from_be_bytes([b[0], b[1], b[2], b[3]])
        })
    };

    if read_u16(2)? != 42 {
        return None;
    }
    let ifd = read_u32(4)? as usize;
    let entries = read_u16(ifd)? as usize;

    for i in 0..entries {
        let entry = ifd + 2 + i * 12;
        if read_u16(entry)? == TAG_ORIENTATION {
            // SHORT value stored left-justified in the value field
            return Orientation::from_tag(read_u16(entry + 8)?);
        }
    }
    None
}

/// Apply the transform that makes an image stored with `orientation` upright
pub fn apply_orientation(image: RgbaImage, orientation: Orientation) -> RgbaImage {
    match orientation {
        Orientation::Normal => image,
        Orientation::FlipHorizontal => imageops::flip_horizontal(&image),
        Orientation::Rotate180 => imageops::rotate180(&image),
        Orientation::FlipVertical => imageops::flip_vertical(&image),
        Orientation::Transpose => imageops::flip_horizontal(&imageops::rotate90(&image)),
        Orientation::Rotate90 => imageops::rotate90(&image),
        Orientation::Transverse => imageops::flip_horizontal(&imageops::rotate270(&image)),
        Orientation::Rotate270 => imageops::rotate270(&image),
    }
}

/// Downscale so the long edge is at most `max_long_edge`
fn cap_long_edge(image: RgbaImage, max_long_edge: u32) -> RgbaImage {
    let (w, h) = image.dimensions();
    let long_edge = w.max(h);
    if max_long_edge == 0 || long_edge <= max_long_edge {
        return image;
    }
    let scale = max_long_edge as f64 / long_edge as f64;
    let new_w = ((w as f64 * scale).round() as u32).max(1);
    let new_h = ((h as f64 * scale).round() as u32).max(1);
    debug!("Downscaling {}x{} to {}x{}", w, h, new_w, new_h);
    imageops::resize(&image, new_w, new_h, FilterType::Lanczos3)
}

/// Orient, cap and force portrait
pub fn normalize_image(
    image: RgbaImage,
    orientation: Option<Orientation>,
    settings: &NormalizerSettings,
) -> RasterImage {
    let oriented = match orientation {
        Some(o) => apply_orientation(image, o),
        None => image,
    };
    let capped = cap_long_edge(oriented, settings.max_long_edge);
    let (w, h) = capped.dimensions();
    let portrait = if w > h {
        debug!("Rotating landscape {}x{} to portrait", w, h);
        imageops::rotate90(&capped)
    } else {
        capped
    };
    DynamicImage::ImageRgba8(portrait)
}

/// Decode and normalize encoded image bytes
pub fn normalize_bytes(bytes: &[u8], settings: &NormalizerSettings) -> Result<RasterImage, ScanError> {
    if bytes.is_empty() {
        return Err(ScanError::EmptyInput);
    }
    let decoded = image::load_from_memory(bytes)?.to_rgba8();
    let orientation = read_orientation(bytes);
    if orientation.is_none() {
        debug!("No usable orientation tag, keeping stored orientation");
    }
    Ok(normalize_image(decoded, orientation, settings))
}

/// Normalizer bound to its settings
#[derive(Debug, Clone, Default)]
pub struct ImageNormalizer {
    settings: NormalizerSettings,
}

impl ImageNormalizer {
    pub fn new(settings: NormalizerSettings) -> Self {
        Self { settings }
    }

    pub fn normalize_bytes(&self, bytes: &[u8]) -> Result<RasterImage, ScanError> {
        normalize_bytes(bytes, &self.settings)
    }

    /// Normalize an already decoded still (live capture carries no metadata)
    pub fn normalize_still(&self, still: RasterImage) -> RasterImage {
        normalize_image(still.to_rgba8(), None, &self.settings)
    }

    /// Base64 PNG preview of a normalized image, `None` when disabled or encoding fails
    pub fn preview(&self, image: &RasterImage) -> Option<String> {
        use base64::Engine as _;

        let max_edge = self.settings.preview_max_edge;
        if max_edge == 0 {
            return None;
        }
        let thumb = if image.width().max(image.height()) > max_edge {
            image.resize(max_edge, max_edge, FilterType::Triangle)
        } else {
            image.clone()
        };

        let mut png = Vec::new();
        if let Err(e) = thumb.write_to(&mut Cursor::new(&mut png), ImageFormat::Png) {
            warn!("Failed to encode preview: {}", e);
            return None;
        }
        Some(base64::engine::general_purpose::STANDARD.encode(png))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::jpeg::JpegEncoder;
    use image::Rgba;

    const RED: Rgba<u8> = Rgba([230, 20, 20, 255]);
    const GREEN: Rgba<u8> = Rgba([20, 200, 20, 255]);
    const BLUE: Rgba<u8> = Rgba([20, 20, 230, 255]);
    const WHITE: Rgba<u8> = Rgba([240, 240, 240, 255]);

    /// Upright 32x48 test card: one solid color per quadrant, red at top-left
    fn upright_card() -> RgbaImage {
        RgbaImage::from_fn(32, 48, |x, y| match (x < 16, y < 24) {
            (true, true) => RED,
            (false, true) => GREEN,
            (true, false) => BLUE,
            (false, false) => WHITE,
        })
    }

    /// How a camera would store the upright card under each orientation tag
    fn stored_as(upright: &RgbaImage, orientation: Orientation) -> RgbaImage {
        match orientation {
            Orientation::Normal => upright.clone(),
            Orientation::FlipHorizontal => imageops::flip_horizontal(upright),
            Orientation::Rotate180 => imageops::rotate180(upright),
            Orientation::FlipVertical => imageops::flip_vertical(upright),
            Orientation::Transpose => imageops::rotate270(&imageops::flip_horizontal(upright)),
            Orientation::Rotate90 => imageops::rotate270(upright),
            Orientation::Transverse => imageops::rotate90(&imageops::flip_horizontal(upright)),
            Orientation::Rotate270 => imageops::rotate90(upright),
        }
    }

    /// APP1 segment holding a little-endian TIFF with a single orientation entry
    fn exif_segment(orientation: u16) -> Vec<u8> {
        let mut tiff = Vec::new();
        tiff.extend_from_slice(b"II");
        tiff.extend_from_slice(&42u16.to_le_bytes());
        tiff.extend_from_slice(&8u32.to_le_bytes());
        tiff.extend_from_slice(&1u16.to_le_bytes());
        tiff.extend_from_slice(&TAG_ORIENTATION.to_le_bytes());
        tiff.extend_from_slice(&3u16.to_le_bytes()); // SHORT
        tiff.extend_from_slice(&1u32.to_le_bytes());
        tiff.extend_from_slice(&orientation.to_le_bytes());
        tiff.extend_from_slice(&[0, 0]);
        tiff.extend_from_slice(&0u32.to_le_bytes());

        let mut body = b"Exif\0\0".to_vec();
        body.extend_from_slice(&tiff);

        let mut segment = vec![0xFF, 0xE1];
        segment.extend_from_slice(&((body.len() + 2) as u16).to_be_bytes());
        segment.extend_from_slice(&body);
        segment
    }

    fn jpeg_with_orientation(image: &RgbaImage, orientation: Option<u16>) -> Vec<u8> {
        let rgb = DynamicImage::ImageRgba8(image.clone()).to_rgb8();
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, 100).encode_image(&rgb).unwrap();

        match orientation {
            Some(tag) => {
                let mut out = jpeg[..2].to_vec();
                out.extend_from_slice(&exif_segment(tag));
                out.extend_from_slice(&jpeg[2..]);
                out
            }
            None => jpeg,
        }
    }

    fn assert_close(actual: Rgba<u8>, expected: Rgba<u8>, context: &str) {
        for c in 0..3 {
            let diff = (actual[c] as i32 - expected[c] as i32).abs();
            assert!(diff < 40, "{}: got {:?}, expected {:?}", context, actual, expected);
        }
    }

    #[test]
    fn test_orientation_round_trip_for_all_tags() {
        let upright = upright_card();
        let settings = NormalizerSettings::default();

        for orientation in Orientation::ALL {
            let stored = stored_as(&upright, orientation);
            let bytes = jpeg_with_orientation(&stored, Some(orientation as u16));

            assert_eq!(read_orientation(&bytes), Some(orientation));

            let normalized = normalize_bytes(&bytes, &settings).unwrap().to_rgba8();
            assert_eq!(normalized.dimensions(), (32, 48), "{:?}", orientation);
            assert_close(*normalized.get_pixel(2, 2), RED, &format!("{:?}", orientation));
            assert_close(*normalized.get_pixel(29, 45), WHITE, &format!("{:?}", orientation));
        }
    }

    #[test]
    fn test_apply_orientation_is_exact_on_raw_pixels() {
        let upright = upright_card();
        for orientation in Orientation::ALL {
            let restored = apply_orientation(stored_as(&upright, orientation), orientation);
            assert_eq!(restored, upright, "{:?}", orientation);
        }
    }

    #[test]
    fn test_big_endian_tiff_header() {
        let mut tiff = Vec::new();
        tiff.extend_from_slice(b"MM");
        tiff.extend_from_slice(&42u16.to_be_bytes());
        tiff.extend_from_slice(&8u32.to_be_bytes());
        tiff.extend_from_slice(&1u16.to_be_bytes());
        tiff.extend_from_slice(&TAG_ORIENTATION.to_be_bytes());
        tiff.extend_from_slice(&3u16.to_be_bytes());
        tiff.extend_from_slice(&1u32.to_be_bytes());
        tiff.extend_from_slice(&6u16.to_be_bytes());
        tiff.extend_from_slice(&[0, 0]);

        assert_eq!(read_orientation(&tiff), Some(Orientation::Rotate90));
    }

    #[test]
    fn test_missing_or_corrupt_metadata_is_not_fatal() {
        let upright = upright_card();
        let plain = jpeg_with_orientation(&upright, None);
        assert_eq!(read_orientation(&plain), None);

        // Orientation value out of range
        let bogus = jpeg_with_orientation(&upright, Some(42));
        assert_eq!(read_orientation(&bogus), None);
        let normalized = normalize_bytes(&bogus, &NormalizerSettings::default()).unwrap();
        assert_eq!((normalized.width(), normalized.height()), (32, 48));

        // Truncated header
        assert_eq!(read_orientation(&[0xFF, 0xD8, 0xFF, 0xE1, 0x00]), None);
    }

    #[test]
    fn test_landscape_is_forced_to_portrait_and_capped() {
        let landscape = RgbaImage::from_pixel(2000, 1000, WHITE);
        let settings = NormalizerSettings::default();

        let normalized = normalize_image(landscape, None, &settings);
        assert_eq!((normalized.width(), normalized.height()), (800, 1600));
    }

    #[test]
    fn test_small_portrait_is_untouched() {
        let card = upright_card();
        let normalized = normalize_image(card.clone(), None, &NormalizerSettings::default());
        assert_eq!(normalized.to_rgba8(), card);
    }

    #[test]
    fn test_empty_and_garbage_input() {
        let settings = NormalizerSettings::default();
        assert!(matches!(normalize_bytes(&[], &settings), Err(ScanError::EmptyInput)));
        assert!(matches!(normalize_bytes(b"not an image", &settings), Err(ScanError::Decode(_))));
    }

    #[test]
    fn test_preview_is_base64_png() {
        use base64::Engine as _;

        let normalizer = ImageNormalizer::default();
        let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(600, 900, WHITE));

        let preview = normalizer.preview(&image).unwrap();
        let png = base64::engine::general_purpose::STANDARD.decode(preview).unwrap();
        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (320, 480));
    }
}
