//! SnapText - on-device screen text capture
//!
//! One trigger mirrors the display, grabs a single frame and reads its text
//! with the PaddleOCR cascade running locally through ONNX Runtime.

pub mod app;
pub mod capture;
pub mod config;
pub mod storage;
pub mod vision;

#[cfg(test)]
pub(crate) mod test_support;

pub use app::{CaptureCoordinator, CaptureError, ResultPresenter};
