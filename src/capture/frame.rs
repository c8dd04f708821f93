//! Frame data structures for captured screen content
//!
//! Rendering surfaces hand back RGBA rows padded out to their own row stride.
//! Everything past acquisition works on dense images, so the padding has to be
//! stripped before a buffer is reinterpreted: getting the per-row width wrong
//! shifts every row after the first.

use image::{imageops, RgbaImage};
use std::time::Instant;
use thiserror::Error;

/// Bytes per pixel of the RGBA_8888 layout every surface delivers
pub const BYTES_PER_PIXEL: usize = 4;

/// Layout problems in a delivered frame
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame has zero area ({width}x{height})")]
    Empty { width: u32, height: u32 },
    #[error("row stride of {row_stride} bytes is shorter than {width} pixels")]
    StrideTooSmall { width: u32, row_stride: usize },
    #[error("row padding of {padding} bytes is not a whole number of pixels")]
    MisalignedPadding { padding: usize },
    #[error("frame holds {actual} bytes but {expected} are needed")]
    Truncated { expected: usize, actual: usize },
}

/// A captured frame, possibly carrying row padding
#[derive(Debug, Clone)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    /// Bytes per row as delivered by the rendering surface
    row_stride: usize,
    data: Vec<u8>,
    /// When the frame was captured
    timestamp: Instant,
}

impl PixelBuffer {
    /// Wrap raw RGBA rows of `row_stride` bytes each.
    ///
    /// The last row may stop right after its visible pixels; surfaces are not
    /// required to pad the tail of the buffer.
    pub fn new(data: Vec<u8>, width: u32, height: u32, row_stride: usize) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::Empty { width, height });
        }

        let row_bytes = width as usize * BYTES_PER_PIXEL;
        if row_stride < row_bytes {
            return Err(FrameError::StrideTooSmall { width, row_stride });
        }

        let padding = row_stride - row_bytes;
        if padding % BYTES_PER_PIXEL != 0 {
            return Err(FrameError::MisalignedPadding { padding });
        }

        let expected = row_stride * (height as usize - 1) + row_bytes;
        if data.len() < expected {
            return Err(FrameError::Truncated {
                expected,
                actual: data.len(),
            });
        }

        Ok(Self {
            width,
            height,
            row_stride,
            data,
            timestamp: Instant::now(),
        })
    }

    /// Wrap an already dense image
    pub fn from_image(image: RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            row_stride: width as usize * BYTES_PER_PIXEL,
            data: image.into_raw(),
            timestamp: Instant::now(),
        }
    }

    /// Logical width in pixels
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Get frame dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn row_stride(&self) -> usize {
        self.row_stride
    }

    /// Raw bytes, including any row padding
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    /// Padding bytes at the end of every row
    pub fn row_padding(&self) -> usize {
        self.row_stride - self.width as usize * BYTES_PER_PIXEL
    }

    pub fn is_dense(&self) -> bool {
        self.row_padding() == 0
    }

    /// Width of the image the raw rows describe when padding is read as pixels
    pub fn padded_width(&self) -> u32 {
        self.width + (self.row_padding() / BYTES_PER_PIXEL) as u32
    }

    /// Reinterpret the raw rows as a `padded_width x height` image.
    ///
    /// The padding columns end up on the right-hand side and hold whatever the
    /// surface left there.
    pub fn reinterpret(&self) -> Result<RgbaImage, FrameError> {
        let expected = self.row_stride * self.height as usize;
        let mut bytes = self.data[..expected.min(self.data.len())].to_vec();
        // An unpadded last row is legal; fill its missing tail
        bytes.resize(expected, 0);

        RgbaImage::from_raw(self.padded_width(), self.height, bytes).ok_or(FrameError::Truncated {
            expected,
            actual: self.data.len(),
        })
    }

    /// Dense copy of the visible pixels
    pub fn to_rgba_image(&self) -> Result<RgbaImage, FrameError> {
        if self.is_dense() {
            let len = self.row_stride * self.height as usize;
            return RgbaImage::from_raw(self.width, self.height, self.data[..len].to_vec()).ok_or(
                FrameError::Truncated {
                    expected: len,
                    actual: self.data.len(),
                },
            );
        }

        let padded = self.reinterpret()?;
        Ok(imageops::crop_imm(&padded, 0, 0, self.width, self.height).to_image())
    }

    /// Consume the buffer into a dense image, reusing the allocation when no
    /// padding is present
    pub fn into_rgba_image(self) -> Result<RgbaImage, FrameError> {
        if !self.is_dense() {
            return self.to_rgba_image();
        }

        let len = self.row_stride * self.height as usize;
        let actual = self.data.len();
        let mut data = self.data;
        data.truncate(len);
        RgbaImage::from_raw(self.width, self.height, data).ok_or(FrameError::Truncated {
            expected: len,
            actual,
        })
    }

    /// Strip row padding, producing a buffer whose stride equals `width * 4`
    pub fn into_dense(self) -> Result<PixelBuffer, FrameError> {
        if self.is_dense() {
            return Ok(self);
        }

        let timestamp = self.timestamp;
        let image = self.to_rgba_image()?;
        let mut dense = PixelBuffer::from_image(image);
        dense.timestamp = timestamp;
        Ok(dense)
    }
}
