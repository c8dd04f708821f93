//! Text region extraction
//!
//! Turns the detector's probability map into axis-aligned boxes in source
//! image coordinates: binarize, label connected components, score each
//! component by its mean probability, expand the shrunk kernel back out and
//! scale to the source frame.

use image::{GrayImage, Luma, RgbaImage};
use imageproc::region_labelling::{connected_components, Connectivity};
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Post-processing parameters for the detection map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionParams {
    /// Pixel probability above which a map pixel counts as text
    pub threshold: f32,
    /// Minimum mean probability of a kept region
    pub box_threshold: f32,
    /// Minimum component size in map pixels
    pub min_region_area: u32,
    /// Expansion of the shrunk text kernel, relative to area / perimeter
    pub unclip_ratio: f32,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            threshold: 0.3,
            box_threshold: 0.6,
            min_region_area: 9,
            unclip_ratio: 1.5,
        }
    }
}

/// A detected text region in source image coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Mean probability over the component
    pub score: f32,
}

impl TextRegion {
    /// Cut this region out of `image`
    pub fn crop(&self, image: &RgbaImage) -> RgbaImage {
        image::imageops::crop_imm(image, self.x, self.y, self.width, self.height).to_image()
    }
}

#[derive(Debug)]
struct Component {
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
    pixels: u32,
    score_sum: f32,
}

impl Component {
    fn new(x: u32, y: u32) -> Self {
        Self {
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
            pixels: 0,
            score_sum: 0.0,
        }
    }

    fn add(&mut self, x: u32, y: u32, score: f32) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
        self.pixels += 1;
        self.score_sum += score;
    }
}

/// Extract text regions from a `height x width` probability map computed for
/// a `source_width x source_height` image. Regions are ordered top to bottom,
/// then left to right.
pub fn extract_regions(
    map: ArrayView2<'_, f32>,
    source_width: u32,
    source_height: u32,
    params: &DetectionParams,
) -> Vec<TextRegion> {
    let (map_height, map_width) = map.dim();
    if map_width == 0 || map_height == 0 || source_width == 0 || source_height == 0 {
        return Vec::new();
    }

    let mask = GrayImage::from_fn(map_width as u32, map_height as u32, |x, y| {
        if map[[y as usize, x as usize]] > params.threshold {
            Luma([255])
        } else {
            Luma([0])
        }
    });

    let labels = connected_components(&mask, Connectivity::Four, Luma([0u8]));

    let mut components: BTreeMap<u32, Component> = BTreeMap::new();
    for (x, y, label) in labels.enumerate_pixels() {
        let label = label[0];
        if label == 0 {
            continue;
        }
        components
            .entry(label)
            .or_insert_with(|| Component::new(x, y))
            .add(x, y, map[[y as usize, x as usize]]);
    }

    let scale_x = source_width as f32 / map_width as f32;
    let scale_y = source_height as f32 / map_height as f32;

    let mut regions: Vec<TextRegion> = components
        .values()
        .filter(|c| c.pixels >= params.min_region_area)
        .filter_map(|c| {
            let score = c.score_sum / c.pixels as f32;
            if score < params.box_threshold {
                return None;
            }

            let (x0, y0, x1, y1) = unclip(c, params.unclip_ratio, map_width as f32, map_height as f32);

            let left = ((x0 * scale_x).floor() as u32).min(source_width - 1);
            let top = ((y0 * scale_y).floor() as u32).min(source_height - 1);
            let right = ((x1 * scale_x).ceil() as u32).clamp(left + 1, source_width);
            let bottom = ((y1 * scale_y).ceil() as u32).clamp(top + 1, source_height);

            Some(TextRegion {
                x: left,
                y: top,
                width: right - left,
                height: bottom - top,
                score,
            })
        })
        .collect();

    regions.sort_by_key(|r| (r.y, r.x));
    debug!("{} text region(s) from {} component(s)", regions.len(), components.len());
    regions
}

/// Grow a component's box by `area * ratio / perimeter` on every side,
/// clamped to the map. Returns `(x0, y0, x1, y1)` with exclusive ends.
fn unclip(component: &Component, ratio: f32, map_width: f32, map_height: f32) -> (f32, f32, f32, f32) {
    let width = (component.max_x - component.min_x + 1) as f32;
    let height = (component.max_y - component.min_y + 1) as f32;
    let offset = width * height * ratio / (2.0 * (width + height));

    (
        (component.min_x as f32 - offset).max(0.0),
        (component.min_y as f32 - offset).max(0.0),
        (component.max_x as f32 + 1.0 + offset).min(map_width),
        (component.max_y as f32 + 1.0 + offset).min(map_height),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use ndarray::Array2;

    fn no_unclip() -> DetectionParams {
        DetectionParams {
            min_region_area: 1,
            unclip_ratio: 0.0,
            ..Default::default()
        }
    }

    fn fill(map: &mut Array2<f32>, x: usize, y: usize, w: usize, h: usize, value: f32) {
        for row in y..y + h {
            for col in x..x + w {
                map[[row, col]] = value;
            }
        }
    }

    #[test]
    fn test_regions_are_scaled_and_ordered() {
        let mut map = Array2::<f32>::zeros((10, 10));
        fill(&mut map, 1, 6, 3, 2, 0.9); // lower line
        fill(&mut map, 5, 1, 4, 2, 0.8); // upper line

        let regions = extract_regions(map.view(), 100, 50, &no_unclip());
        assert_eq!(regions.len(), 2);

        assert_eq!((regions[0].x, regions[0].y, regions[0].width, regions[0].height), (50, 5, 40, 10));
        assert!((regions[0].score - 0.8).abs() < 1e-6);
        assert_eq!((regions[1].x, regions[1].y, regions[1].width, regions[1].height), (10, 30, 30, 10));
    }

    #[test]
    fn test_low_score_and_small_regions_are_dropped() {
        let mut map = Array2::<f32>::zeros((8, 8));
        fill(&mut map, 0, 0, 3, 3, 0.4); // above threshold, below box threshold
        fill(&mut map, 5, 5, 1, 1, 0.95); // confident but tiny

        let params = DetectionParams {
            min_region_area: 2,
            ..no_unclip()
        };
        assert!(extract_regions(map.view(), 8, 8, &params).is_empty());
    }

    #[test]
    fn test_diagonal_pixels_are_separate_components() {
        let mut map = Array2::<f32>::zeros((4, 4));
        map[[0, 0]] = 1.0;
        map[[1, 1]] = 1.0;

        assert_eq!(extract_regions(map.view(), 4, 4, &no_unclip()).len(), 2);
    }

    #[test]
    fn test_unclip_expands_within_bounds() {
        let mut map = Array2::<f32>::zeros((20, 20));
        fill(&mut map, 8, 9, 4, 2, 0.9);

        let params = DetectionParams {
            unclip_ratio: 1.5,
            ..no_unclip()
        };
        let regions = extract_regions(map.view(), 20, 20, &params);
        // offset = 8 * 1.5 / 12 = 1
        assert_eq!((regions[0].x, regions[0].y, regions[0].width, regions[0].height), (7, 8, 6, 4));

        let mut corner = Array2::<f32>::zeros((4, 4));
        fill(&mut corner, 0, 0, 4, 4, 0.9);
        let regions = extract_regions(corner.view(), 4, 4, &params);
        assert_eq!((regions[0].x, regions[0].y, regions[0].width, regions[0].height), (0, 0, 4, 4));
    }

    #[test]
    fn test_empty_map() {
        let map = Array2::<f32>::zeros((0, 0));
        assert!(extract_regions(map.view(), 10, 10, &DetectionParams::default()).is_empty());
    }

    #[test]
    fn test_crop() {
        let image = RgbaImage::from_fn(6, 4, |x, y| Rgba([x as u8, y as u8, 0, 255]));
        let region = TextRegion {
            x: 2,
            y: 1,
            width: 3,
            height: 2,
            score: 1.0,
        };
        let cropped = region.crop(&image);
        assert_eq!(cropped.dimensions(), (3, 2));
        assert_eq!(cropped.get_pixel(0, 0).0, [2, 1, 0, 255]);
    }
}
