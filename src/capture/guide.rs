//! On-screen guide geometry
//!
//! The capture guide is drawn in viewport coordinates while the video element
//! renders the camera frame scaled (aspect-fill or letterboxed). Analysis needs
//! the guide in source pixels, so the mapping is redone on every tick.

use serde::{Deserialize, Serialize};

/// Rectangle in viewport (CSS/screen) coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl ScreenRect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }
}

/// How the video element fits the source frame into the viewport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitMode {
    /// Aspect-fill: the frame covers the viewport and is cropped
    #[default]
    Cover,
    /// Letterbox: the whole frame is visible with bars
    Contain,
}

/// Current on-screen layout of the capture view
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenLayout {
    pub viewport_width: f32,
    pub viewport_height: f32,
    pub fit: FitMode,
    /// Guide rectangle in viewport coordinates
    pub guide: ScreenRect,
}

/// Guide rectangle in source-frame pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuideRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl GuideRegion {
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl ScreenLayout {
    /// Layout whose viewport is the source frame itself, so the guide is already in source pixels
    pub fn identity(source_width: u32, source_height: u32, guide: ScreenRect) -> Self {
        Self {
            viewport_width: source_width as f32,
            viewport_height: source_height as f32,
            fit: FitMode::Contain,
            guide,
        }
    }

    /// Map the guide into source pixels, clamped to the frame
    ///
    /// Returns `None` when the mapped region is degenerate.
    pub fn map_to_source(&self, source_width: u32, source_height: u32) -> Option<GuideRegion> {
        if source_width == 0
            || source_height == 0
            || self.viewport_width <= 0.0
            || self.viewport_height <= 0.0
        {
            return None;
        }

        let sw = source_width as f32;
        let sh = source_height as f32;
        let scale_x = self.viewport_width / sw;
        let scale_y = self.viewport_height / sh;
        let scale = match self.fit {
            FitMode::Cover => scale_x.max(scale_y),
            FitMode::Contain => scale_x.min(scale_y),
        };

        // Negative offsets mean the frame overflows the viewport (cropped by aspect-fill)
        let offset_x = (self.viewport_width - sw * scale) / 2.0;
        let offset_y = (self.viewport_height - sh * scale) / 2.0;

        let to_src_x = |vx: f32| ((vx - offset_x) / scale).clamp(0.0, sw).round() as u32;
        let to_src_y = |vy: f32| ((vy - offset_y) / scale).clamp(0.0, sh).round() as u32;

        let x0 = to_src_x(self.guide.x);
        let x1 = to_src_x(self.guide.x + self.guide.width);
        let y0 = to_src_y(self.guide.y);
        let y1 = to_src_y(self.guide.y + self.guide.height);

        if x1 <= x0 || y1 <= y0 {
            return None;
        }

        Some(GuideRegion {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
        })
    }
}
