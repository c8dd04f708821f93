//! Still-image projection
//!
//! Replays a fixed image as the mirrored display. Used by the CLI to run the
//! full capture path on a screenshot file, optionally with synthetic row
//! padding to exercise the stride correction the way a real surface would.

use anyhow::{Context, Result};
use image::RgbaImage;
use std::path::Path;
use tracing::debug;

use super::{
    AcquisitionError, CaptureToken, DisplayMetrics, FrameSink, MirrorSurface, PixelBuffer, ProjectionBackend,
    BYTES_PER_PIXEL,
};

/// Density reported for replayed images
const DEFAULT_DENSITY_DPI: u32 = 160;

pub struct StillImageBackend {
    image: RgbaImage,
    row_padding: usize,
}

impl StillImageBackend {
    pub fn new(image: RgbaImage) -> Self {
        Self {
            image,
            row_padding: 0,
        }
    }

    /// Load the image to replay from disk
    pub fn open(path: &Path) -> Result<Self> {
        let image = image::open(path)
            .with_context(|| format!("Failed to load screen image: {:?}", path))?
            .to_rgba8();
        Ok(Self::new(image))
    }

    /// Pad every delivered row by `bytes` extra bytes
    pub fn with_row_padding(mut self, bytes: usize) -> Self {
        self.row_padding = bytes;
        self
    }
}

impl ProjectionBackend for StillImageBackend {
    fn display_metrics(&self) -> Result<DisplayMetrics, AcquisitionError> {
        let (width, height) = self.image.dimensions();
        Ok(DisplayMetrics {
            width,
            height,
            density_dpi: DEFAULT_DENSITY_DPI,
        })
    }

    fn create_surface(
        &mut self,
        _token: &CaptureToken,
        metrics: DisplayMetrics,
        sink: FrameSink,
    ) -> Result<Box<dyn MirrorSurface>, AcquisitionError> {
        let frame = padded_frame(&self.image, self.row_padding)?;
        debug!(
            "Still surface {}x{} with {} bytes of row padding",
            metrics.width, metrics.height, self.row_padding
        );
        Ok(Box::new(StillSurface {
            frame,
            sink: Some(sink),
        }))
    }
}

struct StillSurface {
    frame: PixelBuffer,
    sink: Option<FrameSink>,
}

impl MirrorSurface for StillSurface {
    fn request_frame(&mut self) {
        if let Some(sink) = &self.sink {
            sink.push(self.frame.clone());
        }
    }

    fn release(&mut self) {
        self.sink = None;
    }
}

/// Lay `image` out with `padding` bytes after every row
fn padded_frame(image: &RgbaImage, padding: usize) -> Result<PixelBuffer, AcquisitionError> {
    let (width, height) = image.dimensions();
    let row_bytes = width as usize * BYTES_PER_PIXEL;
    let stride = row_bytes + padding;

    let mut data = Vec::with_capacity(stride * height as usize);
    for row in image.as_raw().chunks_exact(row_bytes.max(1)) {
        data.extend_from_slice(row);
        data.resize(data.len() + padding, 0);
    }

    Ok(PixelBuffer::new(data, width, height, stride)?)
}
