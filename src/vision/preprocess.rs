//! Image preprocessing for OCR models
//!
//! Handles resizing, desaturation and tensor conversion for the PaddleOCR
//! stages. Every stage consumes a `(1, 3, h, w)` planar tensor with values in
//! `[0, 1]`.

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use ndarray::{Array4, ArrayView4};

/// Luminance weights of a zero-saturation colour matrix
const DESATURATE_WEIGHTS: [f32; 3] = [0.213, 0.715, 0.072];

/// Planar NCHW float tensor with batch size 1
#[derive(Debug, Clone)]
pub struct Tensor {
    data: Array4<f32>,
}

impl Tensor {
    pub fn from_array(data: Array4<f32>) -> Self {
        Self { data }
    }

    /// Shape as `[batch, channels, height, width]`
    pub fn shape(&self) -> [usize; 4] {
        let (n, c, h, w) = self.data.dim();
        [n, c, h, w]
    }

    pub fn width(&self) -> usize {
        self.data.dim().3
    }

    pub fn height(&self) -> usize {
        self.data.dim().2
    }

    pub fn view(&self) -> ArrayView4<'_, f32> {
        self.data.view()
    }

    /// Shape and row-major values, for handing to an inference runtime
    pub fn into_raw(self) -> ([usize; 4], Vec<f32>) {
        let shape = self.shape();
        let values = self.data.iter().copied().collect();
        (shape, values)
    }
}

/// Input resolution policy of a model stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputLayout {
    /// Every input is scaled to exactly this size
    Fixed { width: u32, height: u32 },
    /// Fixed height; width follows the source aspect ratio within bounds
    FixedHeight { height: u32, min_width: u32, max_width: u32 },
}

impl InputLayout {
    /// Target `(width, height)` for a source image of the given size
    pub fn target_size(&self, source_width: u32, source_height: u32) -> (u32, u32) {
        match *self {
            InputLayout::Fixed { width, height } => (width, height),
            InputLayout::FixedHeight {
                height,
                min_width,
                max_width,
            } => (
                recognition_width(source_width, source_height, height, min_width, max_width),
                height,
            ),
        }
    }

    /// Whether a tensor of this size fits the layout
    pub fn accepts(&self, width: usize, height: usize) -> bool {
        match *self {
            InputLayout::Fixed { width: w, height: h } => width == w as usize && height == h as usize,
            InputLayout::FixedHeight {
                height: h,
                min_width,
                max_width,
            } => height == h as usize && (min_width as usize..=max_width as usize).contains(&width),
        }
    }
}

/// Aspect-preserving recognition width, clamped to `[min_width, max_width]`.
/// Inverted bounds are swapped.
pub fn recognition_width(
    source_width: u32,
    source_height: u32,
    target_height: u32,
    min_width: u32,
    max_width: u32,
) -> u32 {
    let (low, high) = (min_width.min(max_width), min_width.max(max_width));
    if source_height == 0 {
        return low;
    }

    let width = (target_height as f64 * source_width as f64 / source_height as f64).round();
    width.clamp(low as f64, high as f64) as u32
}

/// Scale to exactly `target_width x target_height` (aspect ratio is not kept)
/// and split RGBA into three planar channels divided by 255
pub fn normalize(image: &RgbaImage, target_width: u32, target_height: u32) -> Tensor {
    let resized = imageops::resize(image, target_width, target_height, FilterType::Nearest);

    let mut tensor = Array4::<f32>::zeros((1, 3, target_height as usize, target_width as usize));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
        }
    }

    Tensor::from_array(tensor)
}

/// Remove colour, keeping the RGBA layout and alpha
pub fn desaturate(image: &RgbaImage) -> RgbaImage {
    let mut gray = image.clone();
    for pixel in gray.pixels_mut() {
        let [r, g, b, a] = pixel.0;
        let luma = DESATURATE_WEIGHTS[0] * r as f32
            + DESATURATE_WEIGHTS[1] * g as f32
            + DESATURATE_WEIGHTS[2] * b as f32;
        let luma = luma.round().clamp(0.0, 255.0) as u8;
        *pixel = Rgba([luma, luma, luma, a]);
    }
    gray
}

pub fn rotate_180(image: &RgbaImage) -> RgbaImage {
    imageops::rotate180(image)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_is_planar_and_scaled() {
        // 2x1 RGBA image: red then blue
        let image = RgbaImage::from_raw(2, 1, vec![255, 0, 0, 255, 0, 0, 255, 255]).unwrap();
        let tensor = normalize(&image, 2, 1);

        assert_eq!(tensor.shape(), [1, 3, 1, 2]);
        let view = tensor.view();
        assert!((view[[0, 0, 0, 0]] - 1.0).abs() < 1e-6); // R of red
        assert!(view[[0, 2, 0, 0]].abs() < 1e-6); // B of red
        assert!((view[[0, 2, 0, 1]] - 1.0).abs() < 1e-6); // B of blue

        let (shape, values) = tensor.into_raw();
        assert_eq!(shape, [1, 3, 1, 2]);
        // Channel-major: R plane, G plane, B plane
        assert_eq!(values, vec![1.0, 0.0, 0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_normalize_ignores_aspect_ratio() {
        let image = RgbaImage::from_pixel(300, 20, Rgba([51, 102, 153, 255]));
        let tensor = normalize(&image, 192, 48);

        assert_eq!(tensor.shape(), [1, 3, 48, 192]);
        assert!(tensor.view().iter().all(|v| (0.0..=1.0).contains(v)));
        assert!((tensor.view()[[0, 1, 47, 191]] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_recognition_width_bounds_and_ratio() {
        for w in (1..2000).step_by(37) {
            for h in (1..400).step_by(13) {
                let width = recognition_width(w, h, 32, 32, 320);
                assert!((32..=320).contains(&width));

                let ideal = 32.0 * w as f64 / h as f64;
                if (32.0..=320.0).contains(&ideal) {
                    assert!((width as f64 - ideal).abs() <= 0.5, "{}x{} -> {}", w, h, width);
                }
            }
        }
    }

    #[test]
    fn test_recognition_width_clamps() {
        assert_eq!(recognition_width(10, 100, 32, 32, 320), 32);
        assert_eq!(recognition_width(5000, 10, 32, 32, 320), 320);
        assert_eq!(recognition_width(100, 32, 32, 32, 320), 100);
        assert_eq!(recognition_width(100, 0, 32, 32, 320), 32);
    }

    #[test]
    fn test_recognition_width_with_inverted_bounds() {
        assert_eq!(recognition_width(100, 32, 32, 320, 32), 100);
        assert_eq!(recognition_width(10, 100, 32, 320, 32), 32);

        let layout = InputLayout::FixedHeight {
            height: 32,
            min_width: 320,
            max_width: 32,
        };
        assert_eq!(layout.target_size(5000, 10), (320, 32));
    }

    #[test]
    fn test_layout_target_and_accepts() {
        let fixed = InputLayout::Fixed { width: 192, height: 48 };
        assert_eq!(fixed.target_size(1000, 10), (192, 48));
        assert!(fixed.accepts(192, 48));
        assert!(!fixed.accepts(48, 192));

        let line = InputLayout::FixedHeight {
            height: 32,
            min_width: 32,
            max_width: 320,
        };
        assert_eq!(line.target_size(200, 40), (160, 32));
        assert!(line.accepts(160, 32));
        assert!(!line.accepts(321, 32));
        assert!(!line.accepts(160, 48));
    }

    #[test]
    fn test_desaturate() {
        let image = RgbaImage::from_raw(2, 1, vec![255, 0, 0, 200, 255, 255, 255, 255]).unwrap();
        let gray = desaturate(&image);

        // 0.213 * 255 = 54.3
        assert_eq!(gray.get_pixel(0, 0).0, [54, 54, 54, 200]);
        assert_eq!(gray.get_pixel(1, 0).0, [255, 255, 255, 255]);
    }

    #[test]
    fn test_rotate_180() {
        let image = RgbaImage::from_fn(3, 2, |x, y| Rgba([x as u8, y as u8, 0, 255]));
        let rotated = rotate_180(&image);
        assert_eq!(rotated.get_pixel(0, 0).0, [2, 1, 0, 255]);
        assert_eq!(rotated.get_pixel(2, 1).0, [0, 0, 0, 255]);
    }
}
