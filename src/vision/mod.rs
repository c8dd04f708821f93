//! Vision/OCR Layer
//!
//! PaddleOCR cascade via ONNX Runtime:
//! - detection (DB) producing text regions
//! - orientation classification (0 / 180 degrees)
//! - recognition (CRNN) with greedy decoding against a character dictionary

pub mod decoder;
pub mod detection;
pub mod labels;
pub mod models;
pub mod ocr;
pub mod ocr_preprocess;
pub mod preprocess;
pub mod stage;

pub use decoder::{decode, DecodedText};
pub use detection::{DetectionParams, TextRegion};
pub use labels::LabelTable;
pub use models::{AssetKind, AssetStore, OnnxSession};
pub use ocr::{OcrPipeline, Orientation, PipelineError, PipelineOptions};
pub use preprocess::{InputLayout, Tensor};
pub use stage::{InferenceGraph, ModelStage, StageError, StageKind, StageOutput};
