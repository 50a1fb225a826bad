//! Fixed-size offscreen drawing surface
//!
//! Every sampled preview frame is scaled onto the canvas so the software
//! encoder always sees the same, reduced resolution.

use crate::capture::traits::{Resolution, VideoFrame};
use crate::utils::error::{RecordingError, RecordingResult};
use image::imageops::{self, FilterType};
use image::RgbaImage;

pub struct FrameCanvas {
    image: RgbaImage,
}

impl FrameCanvas {
    pub fn new(resolution: Resolution) -> Self {
        Self {
            image: RgbaImage::new(resolution.width, resolution.height),
        }
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.image.width(), self.image.height())
    }

    /// Draw `frame` stretched over the whole canvas
    pub fn draw(&mut self, frame: &VideoFrame) -> RecordingResult<()> {
        let expected = frame.resolution().rgba_frame_len();
        if frame.data.len() != expected {
            return Err(RecordingError::Encoding(format!(
                "frame {} has {} bytes, expected {}",
                frame.resolution(),
                frame.data.len(),
                expected
            )));
        }

        if frame.resolution() == self.resolution() {
            self.image.copy_from_slice(&frame.data);
            return Ok(());
        }

        let source = RgbaImage::from_raw(frame.width, frame.height, frame.data.clone())
            .ok_or_else(|| RecordingError::Encoding("frame buffer too small".to_string()))?;
        self.image = imageops::resize(
            &source,
            self.image.width(),
            self.image.height(),
            FilterType::Triangle,
        );
        Ok(())
    }

    /// Canvas contents as packed RGBA
    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, rgba: [u8; 4]) -> VideoFrame {
        VideoFrame {
            width,
            height,
            data: rgba.repeat((width * height) as usize),
        }
    }

    #[test]
    fn test_downscales_to_canvas_size() {
        let mut canvas = FrameCanvas::new(Resolution::new(16, 9));
        canvas.draw(&solid(64, 36, [10, 20, 30, 255])).unwrap();

        assert_eq!(canvas.pixels().len(), 16 * 9 * 4);
        assert_eq!(&canvas.pixels()[..4], &[10, 20, 30, 255]);
    }

    #[test]
    fn test_same_size_frame_is_copied() {
        let mut canvas = FrameCanvas::new(Resolution::new(4, 2));
        let frame = solid(4, 2, [1, 2, 3, 4]);
        canvas.draw(&frame).unwrap();
        assert_eq!(canvas.pixels(), frame.data.as_slice());
    }

    #[test]
    fn test_rejects_short_buffer() {
        let mut canvas = FrameCanvas::new(Resolution::new(4, 2));
        let frame = VideoFrame {
            width: 8,
            height: 8,
            data: vec![0; 10],
        };
        assert!(canvas.draw(&frame).is_err());
    }
}
