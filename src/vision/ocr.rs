//! OCR (Optical Character Recognition) pipeline
//!
//! Runs the PaddleOCR cascade on a captured frame: optional enhancement,
//! desaturation, orientation classification with a conditional 180 degree
//! turn, recognition and greedy decoding. Detection can be wired in front to
//! recognize each text region separately.

use image::RgbaImage;
use std::borrow::Cow;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::decoder::{decode, DecodedText};
use super::detection::{extract_regions, DetectionParams, TextRegion};
use super::labels::LabelTable;
use super::models::{AssetKind, AssetStore};
use super::ocr_preprocess::enhance;
use super::preprocess::{desaturate, normalize, rotate_180, InputLayout};
use super::stage::{ModelStage, StageError, StageKind};
use crate::capture::{FrameError, PixelBuffer};
use crate::config::{EnhancementSettings, PipelineSettings};

/// Pipeline failures
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Stage(#[from] StageError),
    #[error("character dictionary unavailable: {0}")]
    LabelsUnavailable(String),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

impl PipelineError {
    /// Whether a model or the dictionary failed to load
    pub fn is_model_load_failure(&self) -> bool {
        matches!(
            self,
            PipelineError::Stage(StageError::NotLoaded { .. }) | PipelineError::LabelsUnavailable(_)
        )
    }
}

/// Text orientation reported by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Upright,
    /// Upside down; needs a 180 degree turn
    Flipped,
}

impl Orientation {
    /// Turn only when the rotate score strictly beats the keep score
    pub fn from_scores(keep: f32, rotate: f32) -> Self {
        if rotate > keep {
            Orientation::Flipped
        } else {
            Orientation::Upright
        }
    }
}

/// Behaviour switches of the pipeline
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    /// Recognize detected regions instead of the whole frame
    pub use_detection: bool,
    pub detection: DetectionParams,
    pub enhancement: EnhancementSettings,
}

impl PipelineOptions {
    pub fn from_settings(pipeline: &PipelineSettings, enhancement: &EnhancementSettings) -> Self {
        Self {
            use_detection: pipeline.use_detection,
            detection: pipeline.detection.clone(),
            enhancement: enhancement.clone(),
        }
    }
}

/// The three-stage OCR cascade
pub struct OcrPipeline {
    detector: ModelStage,
    classifier: ModelStage,
    recognizer: ModelStage,
    labels: Result<LabelTable, String>,
    options: PipelineOptions,
}

impl OcrPipeline {
    /// Cache every asset and load the stages.
    ///
    /// Load failures do not abort: the failing stage reports
    /// [`StageError::NotLoaded`] whenever it is run.
    pub fn load(store: &AssetStore, pipeline: &PipelineSettings, enhancement: &EnhancementSettings) -> Self {
        let start = Instant::now();

        let load_stage = |kind: StageKind, asset: AssetKind, layout: InputLayout| match store.ensure_cached(asset) {
            Ok(path) => ModelStage::load_onnx(kind, layout, &path, pipeline.intra_threads),
            Err(e) => {
                error!("Failed to prepare {} model: {:#}", kind, e);
                ModelStage::failed(kind, layout, format!("{:#}", e))
            }
        };

        let detector = load_stage(StageKind::Detector, AssetKind::Detector, pipeline.detector_layout());
        let classifier = load_stage(StageKind::Classifier, AssetKind::Classifier, pipeline.classifier_layout());
        let recognizer = load_stage(StageKind::Recognizer, AssetKind::Recognizer, pipeline.recognizer_layout());

        let labels = store
            .ensure_cached(AssetKind::Labels)
            .and_then(|path| LabelTable::load(&path))
            .map_err(|e| {
                error!("Failed to load character dictionary: {:#}", e);
                format!("{:#}", e)
            });

        info!("OCR pipeline prepared in {:?}", start.elapsed());

        Self {
            detector,
            classifier,
            recognizer,
            labels,
            options: PipelineOptions::from_settings(pipeline, enhancement),
        }
    }

    /// Assemble a pipeline from already loaded parts
    pub fn from_parts(
        detector: ModelStage,
        classifier: ModelStage,
        recognizer: ModelStage,
        labels: LabelTable,
        options: PipelineOptions,
    ) -> Self {
        Self {
            detector,
            classifier,
            recognizer,
            labels: Ok(labels),
            options,
        }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn set_use_detection(&mut self, enabled: bool) {
        self.options.use_detection = enabled;
    }

    /// Whether every stage and the dictionary loaded
    pub fn is_ready(&self) -> bool {
        self.detector.is_loaded() && self.classifier.is_loaded() && self.recognizer.is_loaded() && self.labels.is_ok()
    }

    /// Recognize the text in one frame
    pub fn recognize(&mut self, frame: PixelBuffer) -> Result<DecodedText, PipelineError> {
        let start = Instant::now();
        let labels = self
            .labels
            .as_ref()
            .map_err(|reason| PipelineError::LabelsUnavailable(reason.clone()))?;

        let image = frame.into_rgba_image()?;
        let image = enhance(image, &self.options.enhancement);
        let image = desaturate(&image);

        let result = if self.options.use_detection {
            let regions = Self::detect_regions(&mut self.detector, &self.options.detection, &image)?;
            if regions.is_empty() {
                debug!("No text regions detected, recognizing the whole frame");
                Self::recognize_line(&mut self.classifier, &mut self.recognizer, labels, &image)?
            } else {
                let mut lines = Vec::with_capacity(regions.len());
                for region in &regions {
                    let line =
                        Self::recognize_line(&mut self.classifier, &mut self.recognizer, labels, &region.crop(&image))?;
                    if !line.is_empty() {
                        lines.push(line.text);
                    }
                }
                DecodedText::new(lines.join("\n"))
            }
        } else {
            Self::recognize_line(&mut self.classifier, &mut self.recognizer, labels, &image)?
        };

        info!(
            "Recognized {} character(s) in {:?}",
            result.text.chars().count(),
            start.elapsed()
        );
        Ok(result)
    }

    /// Locate text regions in an image
    pub fn detect(&mut self, image: &RgbaImage) -> Result<Vec<TextRegion>, PipelineError> {
        Self::detect_regions(&mut self.detector, &self.options.detection, image)
    }

    fn detect_regions(
        detector: &mut ModelStage,
        params: &DetectionParams,
        image: &RgbaImage,
    ) -> Result<Vec<TextRegion>, PipelineError> {
        let (width, height) = image.dimensions();
        let (target_width, target_height) = detector.layout().target_size(width, height);

        let output = detector.run(normalize(image, target_width, target_height))?;
        let map = output.as_matrix().ok_or_else(|| StageError::OutputShape {
            stage: StageKind::Detector,
            shape: output.shape().to_vec(),
        })?;

        Ok(extract_regions(map, width, height, params))
    }

    /// Classify orientation, turn if needed, recognize and decode one line
    fn recognize_line(
        classifier: &mut ModelStage,
        recognizer: &mut ModelStage,
        labels: &LabelTable,
        image: &RgbaImage,
    ) -> Result<DecodedText, PipelineError> {
        let (width, height) = image.dimensions();

        let (cls_width, cls_height) = classifier.layout().target_size(width, height);
        let scores = classifier.run(normalize(image, cls_width, cls_height))?;
        let [keep, rotate, ..] = scores.data() else {
            return Err(StageError::OutputShape {
                stage: StageKind::Classifier,
                shape: scores.shape().to_vec(),
            }
            .into());
        };

        let upright = match Orientation::from_scores(*keep, *rotate) {
            Orientation::Flipped => {
                debug!("Text is upside down ({} > {}), rotating", rotate, keep);
                Cow::Owned(rotate_180(image))
            }
            Orientation::Upright => Cow::Borrowed(image),
        };

        let (rec_width, rec_height) = recognizer.layout().target_size(width, height);
        let output = recognizer.run(normalize(&upright, rec_width, rec_height))?;
        let Some(matrix) = output.as_matrix() else {
            warn!("Recognizer output has shape {:?}", output.shape());
            return Err(StageError::OutputShape {
                stage: StageKind::Recognizer,
                shape: output.shape().to_vec(),
            }
            .into());
        };

        Ok(decode(matrix, labels))
    }
}
