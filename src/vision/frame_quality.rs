//! Live frame quality analysis
//!
//! Scores one camera frame, cropped to the on-screen guide, against the
//! framing criteria that make a still usable for recognition. Checks run in a
//! fixed order and the first failure wins, so the user always gets the most
//! fundamental correction first (find the document, then size, orientation,
//! tilt, centering, focus).

use image::imageops::{self, FilterType};
use image::{GrayImage, RgbaImage};
use serde::Serialize;
use tracing::trace;

use crate::capture::frame::CapturedFrame;
use crate::capture::guide::{GuideRegion, ScreenLayout};
use crate::config::AnalyzerSettings;
use crate::vision::rgba_to_gray;

/// Why a frame is (not) ready, in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationReason {
    NoEdges,
    TooSmall,
    TooLarge,
    Landscape,
    Tilt,
    OffCenter,
    OutOfFocus,
    Ready,
}

impl ValidationReason {
    /// Translation key of the on-screen guidance text
    pub fn guidance_key(&self) -> &'static str {
        match self {
            ValidationReason::NoEdges => "capture.guidance.no_edges",
            ValidationReason::TooSmall => "capture.guidance.move_closer",
            ValidationReason::TooLarge => "capture.guidance.move_away",
            ValidationReason::Landscape => "capture.guidance.rotate_portrait",
            ValidationReason::Tilt => "capture.guidance.straighten",
            ValidationReason::OffCenter => "capture.guidance.center",
            ValidationReason::OutOfFocus => "capture.guidance.hold_still",
            ValidationReason::Ready => "capture.guidance.ready",
        }
    }
}

/// Verdict shown to the user for one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ValidationState {
    pub valid: bool,
    pub reason: ValidationReason,
    pub guidance_key: &'static str,
}

impl ValidationState {
    pub fn from_reason(reason: ValidationReason) -> Self {
        Self {
            valid: reason == ValidationReason::Ready,
            reason,
            guidance_key: reason.guidance_key(),
        }
    }
}

/// Axis-aligned box in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Where the document was found in a ready frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DetectionResult {
    /// Edge bounding box in source-frame pixels
    pub bbox: BoundingBox,
    /// Deviation of the principal axis from vertical, in degrees
    pub tilt_degrees: f64,
    /// Guide region the analysis ran on
    pub roi: GuideRegion,
    /// Bounding box area over analysis area
    pub coverage: f64,
    /// Laplacian variance of the analysis image
    pub focus_score: f64,
}

/// Result of analyzing one frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FrameVerdict {
    pub state: ValidationState,
    /// Present only when the frame is ready
    pub detection: Option<DetectionResult>,
}

impl FrameVerdict {
    fn rejected(reason: ValidationReason) -> Self {
        Self {
            state: ValidationState::from_reason(reason),
            detection: None,
        }
    }

    pub fn reason(&self) -> ValidationReason {
        self.state.reason
    }

    pub fn is_ready(&self) -> bool {
        self.state.valid
    }
}

/// Frame quality analyzer
#[derive(Debug, Clone, Default)]
pub struct FrameAnalyzer {
    settings: AnalyzerSettings,
}

impl FrameAnalyzer {
    pub fn new(settings: AnalyzerSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &AnalyzerSettings {
        &self.settings
    }

    /// Analyze the current frame (if any) against the current screen layout
    pub fn analyze(&self, frame: Option<&CapturedFrame>, layout: &ScreenLayout) -> FrameVerdict {
        let Some(frame) = frame else {
            return FrameVerdict::rejected(ValidationReason::NoEdges);
        };
        let Some(roi) = layout.map_to_source(frame.width, frame.height) else {
            return FrameVerdict::rejected(ValidationReason::NoEdges);
        };
        let Some(image) = frame.to_rgba_image() else {
            return FrameVerdict::rejected(ValidationReason::NoEdges);
        };

        self.analyze_region(&image, roi)
    }

    /// Analyze a region of interest of a decoded frame
    pub fn analyze_region(&self, image: &RgbaImage, roi: GuideRegion) -> FrameVerdict {
        let s = &self.settings;
        let (img_w, img_h) = image.dimensions();
        if roi.width == 0 || roi.height == 0 || roi.x >= img_w || roi.y >= img_h {
            return FrameVerdict::rejected(ValidationReason::NoEdges);
        }
        let roi = GuideRegion {
            width: roi.width.min(img_w - roi.x),
            height: roi.height.min(img_h - roi.y),
            ..roi
        };
        if roi.width < 3 || roi.height < 3 {
            return FrameVerdict::rejected(ValidationReason::NoEdges);
        }

        let cropped = imageops::crop_imm(image, roi.x, roi.y, roi.width, roi.height).to_image();
        let scaled = scale_to_width(cropped, s.analysis_width);
        let gray = rgba_to_gray(&scaled);
        let (w, h) = gray.dimensions();
        if w < 3 || h < 3 {
            return FrameVerdict::rejected(ValidationReason::NoEdges);
        }

        let edges = edge_pixels(&gray, s.edge_floor);
        let area = w as f64 * h as f64;
        let min_edges = ((s.min_edge_density as f64 * area).ceil() as usize).max(1);
        if edges.len() < min_edges {
            trace!("{} edge pixels below floor {}", edges.len(), min_edges);
            return FrameVerdict::rejected(ValidationReason::NoEdges);
        }

        let bbox = bounding_box(&edges);
        let coverage = bbox.width as f64 * bbox.height as f64 / area;
        if coverage < s.min_coverage {
            return FrameVerdict::rejected(ValidationReason::TooSmall);
        }
        if coverage > s.max_coverage {
            return FrameVerdict::rejected(ValidationReason::TooLarge);
        }

        if (bbox.height as f64 / bbox.width as f64) < 1.0 {
            return FrameVerdict::rejected(ValidationReason::Landscape);
        }

        let tilt = estimate_tilt(&edges, s.max_tilt_samples);
        if tilt > s.max_tilt_degrees {
            return FrameVerdict::rejected(ValidationReason::Tilt);
        }

        let (dx, dy) = center_offset(&bbox, w, h);
        if dx > s.max_center_offset || dy > s.max_center_offset {
            return FrameVerdict::rejected(ValidationReason::OffCenter);
        }

        let focus = laplacian_variance(&gray);
        if focus < s.min_focus {
            return FrameVerdict::rejected(ValidationReason::OutOfFocus);
        }

        trace!(
            "frame ready: coverage={:.3} tilt={:.1} offset=({:.3},{:.3}) focus={:.1}",
            coverage, tilt, dx, dy, focus
        );

        FrameVerdict {
            state: ValidationState::from_reason(ValidationReason::Ready),
            detection: Some(DetectionResult {
                bbox: map_bbox_to_source(&bbox, &roi, (w, h)),
                tilt_degrees: tilt,
                roi,
                coverage,
                focus_score: focus,
            }),
        }
    }
}

/// Tallest analysis image, in multiples of the analysis width
const MAX_ANALYSIS_ASPECT: u32 = 4;

/// Scale to `target_width` preserving aspect, never taller than
/// `MAX_ANALYSIS_ASPECT` widths
fn scale_to_width(image: RgbaImage, target_width: u32) -> RgbaImage {
    let (w, h) = image.dimensions();
    if target_width == 0 || w == 0 || h == 0 {
        return image;
    }
    let max_height = target_width.saturating_mul(MAX_ANALYSIS_ASPECT);
    let scale = (target_width as f64 / w as f64).min(max_height as f64 / h as f64);
    let scaled_w = ((w as f64 * scale).round() as u32).max(1);
    let scaled_h = ((h as f64 * scale).round() as u32).max(1);
    if (scaled_w, scaled_h) == (w, h) {
        return image;
    }
    imageops::resize(&image, scaled_w, scaled_h, FilterType::Triangle)
}

/// Interior pixels whose Sobel magnitude exceeds `max(floor, 2 × mean)`
fn edge_pixels(gray: &GrayImage, floor: f32) -> Vec<(u32, u32)> {
    let gradients = imageproc::gradients::sobel_gradients(gray);
    let (w, h) = gradients.dimensions();

    let mut sum = 0.0f64;
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            sum += gradients.get_pixel(x, y)[0] as f64;
        }
    }
    let interior = ((w - 2) as f64) * ((h - 2) as f64);
    let mean = sum / interior;
    let threshold = (floor as f64).max(2.0 * mean);

    let mut edges = Vec::new();
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            if gradients.get_pixel(x, y)[0] as f64 > threshold {
                edges.push((x, y));
            }
        }
    }
    edges
}

/// Inclusive bounding box of a non-empty point set
fn bounding_box(points: &[(u32, u32)]) -> BoundingBox {
    let mut min_x = u32::MAX;
    let mut min_y = u32::MAX;
    let mut max_x = 0;
    let mut max_y = 0;
    for &(x, y) in points {
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    }
    BoundingBox {
        x: min_x,
        y: min_y,
        width: max_x - min_x + 1,
        height: max_y - min_y + 1,
    }
}

/// Deviation of the edge cloud's principal axis from vertical, in degrees
///
/// Uses every `ceil(n / max_samples)`-th edge pixel. A near-isotropic cloud has
/// no principal axis and reports 0.
fn estimate_tilt(points: &[(u32, u32)], max_samples: usize) -> f64 {
    let stride = points.len().div_ceil(max_samples.max(1)).max(1);
    let mut n = 0.0f64;
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    for &(x, y) in points.iter().step_by(stride) {
        sum_x += x as f64;
        sum_y += y as f64;
        n += 1.0;
    }
    if n < 2.0 {
        return 0.0;
    }
    let mean_x = sum_x / n;
    let mean_y = sum_y / n;

    let (mut cxx, mut cyy, mut cxy) = (0.0f64, 0.0f64, 0.0f64);
    for &(x, y) in points.iter().step_by(stride) {
        let dx = x as f64 - mean_x;
        let dy = y as f64 - mean_y;
        cxx += dx * dx;
        cyy += dy * dy;
        cxy += dx * dy;
    }
    cxx /= n;
    cyy /= n;
    cxy /= n;

    let anisotropy = ((cxx - cyy).powi(2) + 4.0 * cxy * cxy).sqrt();
    if anisotropy <= 1e-9 * (cxx + cyy).max(f64::EPSILON) {
        return 0.0;
    }

    let angle = 0.5 * (2.0 * cxy).atan2(cxx - cyy).to_degrees();
    (90.0 - angle.abs()).abs()
}

/// Offset of the box center from the image center, normalized by the half extent
fn center_offset(bbox: &BoundingBox, w: u32, h: u32) -> (f64, f64) {
    let cx = bbox.x as f64 + bbox.width as f64 / 2.0;
    let cy = bbox.y as f64 + bbox.height as f64 / 2.0;
    let half_w = w as f64 / 2.0;
    let half_h = h as f64 / 2.0;
    ((cx - half_w).abs() / half_w, (cy - half_h).abs() / half_h)
}

/// Variance of the 4-neighbour Laplacian over interior pixels
fn laplacian_variance(gray: &GrayImage) -> f64 {
    let (w, h) = gray.dimensions();
    let laplacian = imageproc::filter::laplacian_filter(gray);

    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    let mut count = 0.0f64;
    for y in 1..h.saturating_sub(1) {
        for x in 1..w.saturating_sub(1) {
            let lap = laplacian.get_pixel(x, y)[0] as f64;
            sum += lap;
            sum_sq += lap * lap;
            count += 1.0;
        }
    }

    if count == 0.0 {
        return 0.0;
    }
    let mean = sum / count;
    (sum_sq / count - mean * mean).max(0.0)
}

/// Map a box from analysis pixels back to source-frame pixels
fn map_bbox_to_source(bbox: &BoundingBox, roi: &GuideRegion, analysis: (u32, u32)) -> BoundingBox {
    let scale_x = roi.width as f64 / analysis.0 as f64;
    let scale_y = roi.height as f64 / analysis.1 as f64;
    BoundingBox {
        x: roi.x + (bbox.x as f64 * scale_x).floor() as u32,
        y: roi.y + (bbox.y as f64 * scale_y).floor() as u32,
        width: (bbox.width as f64 * scale_x).round() as u32,
        height: (bbox.height as f64 * scale_y).round() as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    const BG: u8 = 30;
    const FG: u8 = 220;

    /// Sharp bright rectangle `(x, y, w, h)` on a dark background
    fn document_frame(size: (u32, u32), rect: (u32, u32, u32, u32)) -> RgbaImage {
        let (rx, ry, rw, rh) = rect;
        RgbaImage::from_fn(size.0, size.1, |x, y| {
            let inside = x >= rx && x < rx + rw && y >= ry && y < ry + rh;
            let v = if inside { FG } else { BG };
            Rgba([v, v, v, 255])
        })
    }

    fn full_roi(image: &RgbaImage) -> GuideRegion {
        GuideRegion { x: 0, y: 0, width: image.width(), height: image.height() }
    }

    fn analyze(image: &RgbaImage) -> FrameVerdict {
        FrameAnalyzer::default().analyze_region(image, full_roi(image))
    }

    #[test]
    fn test_centered_portrait_document_is_ready() {
        let image = document_frame((320, 320), (51, 33, 218, 254));
        let verdict = analyze(&image);

        assert_eq!(verdict.reason(), ValidationReason::Ready);
        assert!(verdict.state.valid);
        let detection = verdict.detection.unwrap();
        assert!(detection.tilt_degrees < 1.0, "tilt = {}", detection.tilt_degrees);
        assert!(detection.focus_score > 60.0);
    }

    #[test]
    fn test_coverage_boundary_at_55_percent() {
        // Edges sit one pixel either side of the step, so the bbox is 220x256:
        // 56320 / 102400 = 0.55
        let image = document_frame((320, 320), (51, 33, 218, 254));
        let verdict = analyze(&image);

        let detection = verdict.detection.expect("55% coverage must pass");
        assert_eq!(detection.bbox.width, 220);
        assert_eq!(detection.bbox.height, 256);
        assert!((detection.coverage - 0.55).abs() < 1e-12);
    }

    #[test]
    fn test_coverage_boundary_at_54_percent() {
        // bbox 216x256: 55296 / 102400 = 0.54
        let image = document_frame((320, 320), (53, 33, 214, 254));
        assert_eq!(analyze(&image).reason(), ValidationReason::TooSmall);
    }

    #[test]
    fn test_document_filling_frame_is_too_large() {
        let image = document_frame((320, 320), (4, 2, 312, 316));
        assert_eq!(analyze(&image).reason(), ValidationReason::TooLarge);
    }

    #[test]
    fn test_blank_frame_has_no_edges() {
        let image = RgbaImage::from_pixel(320, 320, Rgba([BG, BG, BG, 255]));
        let verdict = analyze(&image);

        assert_eq!(verdict.reason(), ValidationReason::NoEdges);
        assert!(verdict.detection.is_none());
        assert_eq!(verdict.state.guidance_key, "capture.guidance.no_edges");
    }

    #[test]
    fn test_landscape_reported_before_off_center() {
        // Wide document pushed to the top: landscape and off-center at once
        let image = document_frame((320, 320), (11, 2, 298, 198));
        assert_eq!(analyze(&image).reason(), ValidationReason::Landscape);
    }

    #[test]
    fn test_off_center_portrait_document() {
        let image = document_frame((320, 320), (91, 33, 218, 254));
        assert_eq!(analyze(&image).reason(), ValidationReason::OffCenter);
    }

    #[test]
    fn test_tilted_document() {
        let (cx, cy) = (160.0f64, 160.0f64);
        let (half_w, half_h) = (109.0f64, 127.0f64);
        let theta = 15.0f64.to_radians();
        let image = RgbaImage::from_fn(320, 320, |x, y| {
            let dx = x as f64 - cx;
            let dy = y as f64 - cy;
            // Rotate the point back into the document's own frame
            let u = dx * theta.cos() + dy * theta.sin();
            let v = -dx * theta.sin() + dy * theta.cos();
            let value = if u.abs() <= half_w && v.abs() <= half_h { FG } else { BG };
            Rgba([value, value, value, 255])
        });

        assert_eq!(analyze(&image).reason(), ValidationReason::Tilt);
    }

    #[test]
    fn test_blurry_document_is_out_of_focus() {
        // Edge intensity ramps linearly over 12 px instead of stepping
        let (rx, ry, rw, rh) = (45i64, 30i64, 230i64, 260i64);
        let image = RgbaImage::from_fn(320, 320, |x, y| {
            let (x, y) = (x as i64, y as i64);
            let d = (x - rx).min(rx + rw - 1 - x).min(y - ry).min(ry + rh - 1 - y);
            let t = (d as f64 / 12.0).clamp(0.0, 1.0);
            let value = (BG as f64 + (FG - BG) as f64 * t).round() as u8;
            Rgba([value, value, value, 255])
        });

        assert_eq!(analyze(&image).reason(), ValidationReason::OutOfFocus);
    }

    #[test]
    fn test_missing_frame_reports_no_edges() {
        let layout = ScreenLayout::identity(
            320,
            320,
            crate::capture::guide::ScreenRect::new(0.0, 0.0, 320.0, 320.0),
        );
        let verdict = FrameAnalyzer::default().analyze(None, &layout);
        assert_eq!(verdict.reason(), ValidationReason::NoEdges);
    }

    #[test]
    fn test_analyze_crops_to_guide() {
        // Document centered inside a guide that sits in the right half of a wider frame
        let mut image = RgbaImage::from_pixel(640, 320, Rgba([BG, BG, BG, 255]));
        let doc = document_frame((320, 320), (51, 33, 218, 254));
        imageops::replace(&mut image, &doc, 320, 0);
        let frame = CapturedFrame::from_image(image);
        let layout = ScreenLayout::identity(
            640,
            320,
            crate::capture::guide::ScreenRect::new(320.0, 0.0, 320.0, 320.0),
        );

        let verdict = FrameAnalyzer::default().analyze(Some(&frame), &layout);
        let detection = verdict.detection.expect("document inside guide");
        assert_eq!(detection.roi.x, 320);
        assert_eq!(detection.bbox.x, 370);
    }

    #[test]
    fn test_sliver_guide_is_rejected_before_scaling() {
        let image = document_frame((40, 4000), (0, 0, 20, 4000));
        let sliver = GuideRegion { x: 10, y: 0, width: 2, height: 4000 };
        let verdict = FrameAnalyzer::default().analyze_region(&image, sliver);
        assert_eq!(verdict.reason(), ValidationReason::NoEdges);
    }

    #[test]
    fn test_tall_crop_scaling_is_capped() {
        let scaled = scale_to_width(RgbaImage::new(4, 4000), 320);
        assert!(scaled.height() <= 320 * MAX_ANALYSIS_ASPECT, "{:?}", scaled.dimensions());
        assert!(scaled.width() >= 1);

        let normal = scale_to_width(RgbaImage::new(640, 960), 320);
        assert_eq!(normal.dimensions(), (320, 480));
    }

    #[test]
    fn test_laplacian_variance() {
        let flat = GrayImage::from_pixel(16, 16, image::Luma([128]));
        assert_eq!(laplacian_variance(&flat), 0.0);

        let checker = GrayImage::from_fn(16, 16, |x, y| image::Luma([if (x + y) % 2 == 0 { 0 } else { 255 }]));
        assert!(laplacian_variance(&checker) > 1000.0);
    }

    #[test]
    fn test_bbox_mapped_back_to_source_scale() {
        let bbox = BoundingBox { x: 10, y: 20, width: 100, height: 150 };
        let roi = GuideRegion { x: 100, y: 50, width: 640, height: 960 };

        let mapped = map_bbox_to_source(&bbox, &roi, (320, 480));
        assert_eq!(mapped, BoundingBox { x: 120, y: 90, width: 200, height: 300 });
    }

    #[test]
    fn test_isotropic_cloud_has_no_tilt() {
        let square: Vec<(u32, u32)> = (0..100)
            .flat_map(|i| [(i, 0), (i, 99), (0, i), (99, i)])
            .collect();
        assert_eq!(estimate_tilt(&square, 2000), 0.0);
    }

    #[test]
    fn test_reason_serializes_kebab_case() {
        let json = serde_json::to_string(&ValidationReason::OffCenter).unwrap();
        assert_eq!(json, "\"off-center\"");
    }
}
