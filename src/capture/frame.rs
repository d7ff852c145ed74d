//! Frame data structures for live camera content

use image::{DynamicImage, RgbaImage};
use std::time::Instant;

use crate::vision::RasterImage;

/// A frame delivered by the camera
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// Raw RGBA pixel data
    pub data: Vec<u8>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Timestamp when frame was captured
    pub timestamp: Instant,
}

impl CapturedFrame {
    /// Create a new captured frame
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
            timestamp: Instant::now(),
        }
    }

    /// Wrap an already decoded image
    pub fn from_image(image: RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self::new(image.into_raw(), width, height)
    }

    /// Get frame dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// True when the buffer holds a full RGBA frame
    pub fn is_complete(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.data.len() >= (self.width as usize) * (self.height as usize) * 4
    }

    /// Borrow the pixels as an image buffer, or `None` for a truncated frame
    pub fn to_rgba_image(&self) -> Option<RgbaImage> {
        if !self.is_complete() {
            return None;
        }
        let len = (self.width as usize) * (self.height as usize) * 4;
        RgbaImage::from_raw(self.width, self.height, self.data[..len].to_vec())
    }

    /// Convert into a raster image for the extraction pipeline
    pub fn into_raster(self) -> Option<RasterImage> {
        if !self.is_complete() {
            return None;
        }
        let len = (self.width as usize) * (self.height as usize) * 4;
        let mut data = self.data;
        data.truncate(len);
        RgbaImage::from_raw(self.width, self.height, data).map(DynamicImage::ImageRgba8)
    }
}
