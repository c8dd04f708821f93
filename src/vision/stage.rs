//! Model stages
//!
//! A stage owns one loaded inference graph and the input layout it expects.
//! `run` takes `&mut self`: a stage is never entered by two requests at once.

use anyhow::Result;
use ndarray::ArrayView2;
use std::fmt;
use std::path::Path;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info};

use super::models::OnnxSession;
use super::preprocess::{InputLayout, Tensor};

/// The three stages of the cascade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    /// Text-region detection (DB)
    Detector,
    /// 0/180 degree orientation classifier
    Classifier,
    /// Sequence recognizer (CRNN)
    Recognizer,
}

impl StageKind {
    pub fn display_name(&self) -> &'static str {
        match self {
            StageKind::Detector => "Text Detection",
            StageKind::Classifier => "Orientation Classifier",
            StageKind::Recognizer => "Text Recognition",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Stage failures
#[derive(Debug, Error)]
pub enum StageError {
    #[error("{stage} model is not loaded: {reason}")]
    NotLoaded { stage: StageKind, reason: String },
    #[error("{stage} cannot take a {width}x{height} input ({expected:?})")]
    InputMismatch {
        stage: StageKind,
        expected: InputLayout,
        width: usize,
        height: usize,
    },
    #[error("{stage} inference failed: {cause:#}")]
    Inference { stage: StageKind, cause: anyhow::Error },
    #[error("{stage} produced an unusable output of shape {shape:?}")]
    OutputShape { stage: StageKind, shape: Vec<usize> },
}

/// Raw stage output
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutput {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl StageOutput {
    /// Returns `None` when `data` does not fill `shape`
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Option<Self> {
        if shape.iter().product::<usize>() != data.len() {
            return None;
        }
        Some(Self { shape, data })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// View the last two axes as a matrix; all leading axes must be 1
    pub fn as_matrix(&self) -> Option<ArrayView2<'_, f32>> {
        let [leading @ .., rows, cols] = self.shape.as_slice() else {
            return None;
        };
        if leading.iter().any(|&d| d != 1) {
            return None;
        }
        ArrayView2::from_shape((*rows, *cols), &self.data).ok()
    }
}

/// A loaded inference graph
pub trait InferenceGraph: Send {
    fn infer(&mut self, input: Tensor) -> Result<StageOutput>;
}

/// One stage of the cascade
pub struct ModelStage {
    kind: StageKind,
    layout: InputLayout,
    /// Load failures are kept so every run reports them
    graph: Result<Box<dyn InferenceGraph>, String>,
}

impl ModelStage {
    pub fn new(kind: StageKind, layout: InputLayout, graph: Box<dyn InferenceGraph>) -> Self {
        Self {
            kind,
            layout,
            graph: Ok(graph),
        }
    }

    /// A stage whose model could not be loaded
    pub fn failed(kind: StageKind, layout: InputLayout, reason: impl Into<String>) -> Self {
        Self {
            kind,
            layout,
            graph: Err(reason.into()),
        }
    }

    /// Load an ONNX graph; failures are logged and kept on the stage
    pub fn load_onnx(kind: StageKind, layout: InputLayout, model_path: &Path, intra_threads: usize) -> Self {
        match OnnxSession::new(model_path, intra_threads) {
            Ok(session) => {
                info!("{} stage ready", kind);
                Self::new(kind, layout, Box::new(session))
            }
            Err(e) => {
                error!("Failed to load {} model from {:?}: {:#}", kind, model_path, e);
                Self::failed(kind, layout, format!("{:#}", e))
            }
        }
    }

    pub fn kind(&self) -> StageKind {
        self.kind
    }

    pub fn layout(&self) -> InputLayout {
        self.layout
    }

    pub fn is_loaded(&self) -> bool {
        self.graph.is_ok()
    }

    /// Run the graph on one tensor
    pub fn run(&mut self, input: Tensor) -> Result<StageOutput, StageError> {
        let stage = self.kind;
        let graph = match &mut self.graph {
            Ok(graph) => graph,
            Err(reason) => {
                return Err(StageError::NotLoaded {
                    stage,
                    reason: reason.clone(),
                })
            }
        };

        if !self.layout.accepts(input.width(), input.height()) {
            return Err(StageError::InputMismatch {
                stage,
                expected: self.layout,
                width: input.width(),
                height: input.height(),
            });
        }

        let start = Instant::now();
        let output = graph
            .infer(input)
            .map_err(|cause| StageError::Inference { stage, cause })?;

        debug!("{} produced {:?} in {:?}", stage, output.shape(), start.elapsed());
        Ok(output)
    }
}

impl fmt::Debug for ModelStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelStage")
            .field("kind", &self.kind)
            .field("layout", &self.layout)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}
