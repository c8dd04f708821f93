//! Image enhancement filters for OCR
//!
//! Optional adjustments applied to a captured frame before desaturation.
//! Helps with low-contrast or light-on-dark text. Disabled by default.

use image::imageops::{self, FilterType};
use image::RgbaImage;
use tracing::{debug, warn};

use crate::config::{EnhancementSettings, MAX_UPSCALE};

/// Apply the enabled filters in order: upscale, contrast, brightness,
/// sharpen, invert. Returns the input unchanged when enhancement is off.
pub fn enhance(image: RgbaImage, settings: &EnhancementSettings) -> RgbaImage {
    if !settings.enabled {
        return image;
    }

    debug!(
        "Enhancing frame: contrast={}, brightness={}, sharpen={}, invert={}, scale={}",
        settings.contrast, settings.brightness, settings.sharpen, settings.invert, settings.scale
    );

    // Upscale first so the other filters work at the final resolution
    let mut image = if settings.scale > 1 {
        let scale = settings.scale.min(MAX_UPSCALE);
        let (width, height) = image.dimensions();
        match (width.checked_mul(scale), height.checked_mul(scale)) {
            (Some(scaled_width), Some(scaled_height)) => {
                imageops::resize(&image, scaled_width, scaled_height, FilterType::Triangle)
            }
            _ => {
                warn!("Skipping {}x upscale of {}x{} frame", scale, width, height);
                image
            }
        }
    } else {
        image
    };

    if (settings.contrast - 1.0).abs() > 0.01 || settings.brightness.abs() > 0.01 {
        adjust_levels(&mut image, settings.contrast, settings.brightness);
    }

    if settings.sharpen > 0.01 {
        image = sharpen(&image, settings.sharpen);
    }

    if settings.invert {
        invert(&mut image);
    }

    image
}

/// Contrast around the midpoint, then a brightness offset
fn adjust_levels(image: &mut RgbaImage, contrast: f32, brightness: f32) {
    for pixel in image.pixels_mut() {
        for channel in pixel.0.iter_mut().take(3) {
            let adjusted = (*channel as f32 - 128.0) * contrast + 128.0 + brightness;
            *channel = adjusted.round().clamp(0.0, 255.0) as u8;
        }
    }
}

fn invert(image: &mut RgbaImage) {
    for pixel in image.pixels_mut() {
        for channel in pixel.0.iter_mut().take(3) {
            *channel = 255 - *channel;
        }
    }
}

/// 3x3 cross sharpening kernel; border pixels are left as-is.
/// Strength 0.0 = none, 1.0 = strong.
fn sharpen(image: &RgbaImage, strength: f32) -> RgbaImage {
    let (width, height) = image.dimensions();
    let mut result = image.clone();
    if width < 3 || height < 3 {
        return result;
    }

    let center_weight = 1.0 + 4.0 * strength;

    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let center = image.get_pixel(x, y);
            let neighbours = [
                image.get_pixel(x, y - 1),
                image.get_pixel(x, y + 1),
                image.get_pixel(x - 1, y),
                image.get_pixel(x + 1, y),
            ];

            let out = result.get_pixel_mut(x, y);
            for c in 0..3 {
                let around: f32 = neighbours.iter().map(|p| p[c] as f32).sum();
                let value = center[c] as f32 * center_weight - around * strength;
                out[c] = value.clamp(0.0, 255.0) as u8;
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn enabled() -> EnhancementSettings {
        EnhancementSettings {
            enabled: true,
            contrast: 1.0,
            brightness: 0.0,
            sharpen: 0.0,
            invert: false,
            scale: 1,
        }
    }

    #[test]
    fn test_disabled_is_identity() {
        let image = RgbaImage::from_fn(4, 4, |x, y| Rgba([x as u8 * 40, y as u8 * 40, 7, 255]));
        let settings = EnhancementSettings {
            enabled: false,
            contrast: 3.0,
            invert: true,
            ..enabled()
        };
        assert_eq!(enhance(image.clone(), &settings), image);
    }

    #[test]
    fn test_contrast_and_brightness() {
        let image = RgbaImage::from_raw(2, 1, vec![100, 128, 200, 9, 0, 255, 128, 255]).unwrap();
        let settings = EnhancementSettings {
            contrast: 1.2,
            brightness: 5.0,
            ..enabled()
        };

        let out = enhance(image, &settings);
        // (100 - 128) * 1.2 + 133 = 99.4
        assert_eq!(out.get_pixel(0, 0).0, [99, 133, 219, 9]);
        assert_eq!(out.get_pixel(1, 0).0, [0, 255, 133, 255]);
    }

    #[test]
    fn test_invert_keeps_alpha() {
        let image = RgbaImage::from_pixel(1, 1, Rgba([10, 20, 30, 40]));
        let settings = EnhancementSettings {
            invert: true,
            ..enabled()
        };
        assert_eq!(enhance(image, &settings).get_pixel(0, 0).0, [245, 235, 225, 40]);
    }

    #[test]
    fn test_upscale() {
        let image = RgbaImage::from_pixel(5, 3, Rgba([80, 80, 80, 255]));
        let settings = EnhancementSettings { scale: 2, ..enabled() };
        let out = enhance(image, &settings);
        assert_eq!(out.dimensions(), (10, 6));
        assert_eq!(out.get_pixel(9, 5).0, [80, 80, 80, 255]);
    }

    #[test]
    fn test_upscale_factor_is_capped() {
        let image = RgbaImage::from_pixel(5, 3, Rgba([80, 80, 80, 255]));
        let settings = EnhancementSettings {
            scale: u32::MAX,
            ..enabled()
        };
        let out = enhance(image, &settings);
        assert_eq!(out.dimensions(), (5 * MAX_UPSCALE, 3 * MAX_UPSCALE));
    }

    #[test]
    fn test_sharpen_boosts_edges() {
        // Bright centre on a dark field
        let mut image = RgbaImage::from_pixel(3, 3, Rgba([50, 50, 50, 255]));
        image.put_pixel(1, 1, Rgba([100, 100, 100, 255]));

        let out = sharpen(&image, 0.5);
        // 100 * 3 - 200 * 0.5 = 200
        assert_eq!(out.get_pixel(1, 1).0, [200, 200, 200, 255]);
        assert_eq!(out.get_pixel(0, 0).0, [50, 50, 50, 255]);

        let flat = RgbaImage::from_pixel(3, 3, Rgba([60, 60, 60, 255]));
        assert_eq!(sharpen(&flat, 1.0), flat);
    }
}
