//! Application Configuration
//!
//! User settings stored in TOML format. Every section falls back to its
//! defaults, so a partial file is valid.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::vision::detection::DetectionParams;
use crate::vision::preprocess::InputLayout;

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Bundled model assets
    pub assets: AssetSettings,
    /// Capture settings
    pub capture: CaptureSettings,
    /// OCR cascade settings
    pub pipeline: PipelineSettings,
    /// Optional image enhancement before recognition
    pub enhancement: EnhancementSettings,
}

/// Where the model assets come from and where they are cached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetSettings {
    /// Read-only bundle holding the assets
    pub bundle_dir: PathBuf,
    /// Writable cache; defaults to the platform cache directory
    pub cache_dir: Option<PathBuf>,
    /// Logical path of the detection graph
    pub detector: String,
    /// Logical path of the orientation classifier graph
    pub classifier: String,
    /// Logical path of the recognition graph
    pub recognizer: String,
    /// Logical path of the character dictionary
    pub labels: String,
}

impl Default for AssetSettings {
    fn default() -> Self {
        Self {
            bundle_dir: PathBuf::from("assets"),
            cache_dir: None,
            detector: "models/det/det.onnx".to_string(),
            classifier: "models/cls/cls.onnx".to_string(),
            recognizer: "models/rec/rec.onnx".to_string(),
            labels: "models/ppocr_keys_v1.txt".to_string(),
        }
    }
}

/// Capture-related settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Longest wait for the mirrored surface to produce a frame
    pub frame_timeout_ms: u64,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self { frame_timeout_ms: 500 }
    }
}

/// Model input sizes and cascade wiring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Run the detector and recognize each region separately
    pub use_detection: bool,
    /// Square detector input size
    pub detector_size: u32,
    pub classifier_width: u32,
    pub classifier_height: u32,
    pub recognizer_height: u32,
    pub recognizer_min_width: u32,
    pub recognizer_max_width: u32,
    /// Threads per inference session
    pub intra_threads: usize,
    /// Detection map post-processing
    pub detection: DetectionParams,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            use_detection: false,
            detector_size: 640,
            classifier_width: 192,
            classifier_height: 48,
            recognizer_height: 32,
            recognizer_min_width: 32,
            recognizer_max_width: 320,
            intra_threads: 4,
            detection: DetectionParams::default(),
        }
    }
}

impl PipelineSettings {
    pub fn detector_layout(&self) -> InputLayout {
        InputLayout::Fixed {
            width: self.detector_size,
            height: self.detector_size,
        }
    }

    pub fn classifier_layout(&self) -> InputLayout {
        InputLayout::Fixed {
            width: self.classifier_width,
            height: self.classifier_height,
        }
    }

    pub fn recognizer_layout(&self) -> InputLayout {
        InputLayout::FixedHeight {
            height: self.recognizer_height,
            min_width: self.recognizer_min_width,
            max_width: self.recognizer_max_width,
        }
    }
}

/// Enhancement filters applied before desaturation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhancementSettings {
    /// Enable enhancement
    pub enabled: bool,
    /// Contrast factor (1.0 = unchanged)
    pub contrast: f32,
    /// Brightness offset in 0-255 units
    pub brightness: f32,
    /// Sharpen strength (0.0 - 1.0)
    pub sharpen: f32,
    /// Invert colours for light text on dark backgrounds
    pub invert: bool,
    /// Integer upscale factor (1 = none)
    pub scale: u32,
}

impl Default for EnhancementSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            contrast: 1.2,
            brightness: 5.0,
            sharpen: 0.0,
            invert: false,
            scale: 1,
        }
    }
}

/// Largest accepted enhancement upscale factor
pub const MAX_UPSCALE: u32 = 8;

impl AppConfig {
    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        let pipeline = &self.pipeline;
        if pipeline.detector_size == 0
            || pipeline.classifier_width == 0
            || pipeline.classifier_height == 0
            || pipeline.recognizer_height == 0
            || pipeline.recognizer_min_width == 0
        {
            anyhow::bail!("pipeline input sizes must be non-zero");
        }
        if pipeline.recognizer_min_width > pipeline.recognizer_max_width {
            anyhow::bail!(
                "recognizer_min_width ({}) exceeds recognizer_max_width ({})",
                pipeline.recognizer_min_width,
                pipeline.recognizer_max_width
            );
        }
        if self.enhancement.scale == 0 || self.enhancement.scale > MAX_UPSCALE {
            anyhow::bail!(
                "enhancement scale must be between 1 and {}, got {}",
                MAX_UPSCALE,
                self.enhancement.scale
            );
        }
        Ok(())
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Load configuration, using defaults when the file does not exist
pub fn load_or_default(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        info!("No config at {:?}, using defaults", path);
        return Ok(AppConfig::default());
    }
    load_config(path).with_context(|| format!("Failed to read config {:?}", path))
}
