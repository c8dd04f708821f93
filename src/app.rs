//! Capture Coordinator
//!
//! Top-level driver behind the trigger: obtains authorization, captures one
//! frame, runs the OCR pipeline and hands the outcome to the presentation
//! layer.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::capture::{
    AcquisitionError, AuthorizationPrompt, FrameAcquisition, GrantNotifier, HandshakeError, HandshakeState,
    PermissionHandshake,
};
use crate::vision::{DecodedText, OcrPipeline, PipelineError};

/// Shows results to the user (toast, notification, console)
pub trait ResultPresenter: Send + Sync {
    fn present_text(&self, text: &DecodedText);
    fn present_failure(&self, error: &CaptureError);
}

/// Why a capture request produced no text
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("screen capture permission denied")]
    PermissionDenied,
    #[error("an authorization request is already pending")]
    AuthorizationPending,
    #[error("authorization request was cancelled")]
    AuthorizationCancelled,
    #[error("failed to show authorization prompt: {0}")]
    AuthorizationPrompt(String),
    #[error("screen capture is disabled")]
    CapabilityDisabled,
    #[error("no frame was available")]
    NoFrameAvailable,
    #[error("frame acquisition failed: {0}")]
    Acquisition(AcquisitionError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("capture worker failed: {0}")]
    Worker(String),
}

impl CaptureError {
    /// Short text for the user
    pub fn user_message(&self) -> &'static str {
        match self {
            CaptureError::PermissionDenied => "Permission denied, cannot capture the screen",
            CaptureError::AuthorizationPending => "Waiting for screen capture permission",
            CaptureError::AuthorizationCancelled => "Screen capture was cancelled",
            CaptureError::AuthorizationPrompt(_) => "Could not ask for screen capture permission",
            CaptureError::CapabilityDisabled => "Screen capture is turned off",
            CaptureError::NoFrameAvailable => "Screenshot failed, please try again",
            CaptureError::Acquisition(_) => "Could not capture the screen",
            CaptureError::Pipeline(e) if e.is_model_load_failure() => "Text recognition is unavailable",
            CaptureError::Pipeline(_) => "Text recognition failed",
            CaptureError::Worker(_) => "Something went wrong, please try again",
        }
    }
}

impl From<HandshakeError> for CaptureError {
    fn from(error: HandshakeError) -> Self {
        match error {
            HandshakeError::Denied => CaptureError::PermissionDenied,
            HandshakeError::AlreadyPending => CaptureError::AuthorizationPending,
            HandshakeError::Cancelled => CaptureError::AuthorizationCancelled,
            HandshakeError::Prompt(reason) => CaptureError::AuthorizationPrompt(reason),
        }
    }
}

impl From<AcquisitionError> for CaptureError {
    fn from(error: AcquisitionError) -> Self {
        match error {
            AcquisitionError::NoImage(_) => CaptureError::NoFrameAvailable,
            other => CaptureError::Acquisition(other),
        }
    }
}

/// Sequences handshake, acquisition, recognition and presentation
pub struct CaptureCoordinator {
    handshake: PermissionHandshake,
    acquisition: Arc<Mutex<FrameAcquisition>>,
    pipeline: Arc<Mutex<OcrPipeline>>,
    presenter: Arc<dyn ResultPresenter>,
    /// Serializes whole requests in arrival order
    gate: tokio::sync::Mutex<()>,
    enabled: AtomicBool,
    /// Set when disabling found a capture in flight
    release_requested: Arc<AtomicBool>,
}

impl CaptureCoordinator {
    /// Create a coordinator. Capture starts disabled; see
    /// [`toggle_capability`](Self::toggle_capability).
    pub fn new(
        prompt: Arc<dyn AuthorizationPrompt>,
        acquisition: FrameAcquisition,
        pipeline: OcrPipeline,
        presenter: Arc<dyn ResultPresenter>,
    ) -> Self {
        Self {
            handshake: PermissionHandshake::new(prompt),
            acquisition: Arc::new(Mutex::new(acquisition)),
            pipeline: Arc::new(Mutex::new(pipeline)),
            presenter,
            gate: tokio::sync::Mutex::new(()),
            enabled: AtomicBool::new(false),
            release_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Channel the platform uses to report the user's answer
    pub fn notifier(&self) -> GrantNotifier {
        self.handshake.notifier()
    }

    pub fn handshake_state(&self) -> HandshakeState {
        self.handshake.state()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Enable or disable capture. Returns whether anything changed.
    ///
    /// Disabling cancels a pending authorization, revokes the grant and
    /// releases the rendering surface. When a capture is in flight the
    /// release happens as soon as it returns.
    pub fn toggle_capability(&self, enabled: bool) -> bool {
        if self.enabled.swap(enabled, Ordering::SeqCst) == enabled {
            return false;
        }

        if enabled {
            info!("Screen capture enabled");
        } else {
            self.handshake.cancel();
            match self.acquisition.try_lock() {
                Some(mut acquisition) => acquisition.release(),
                None => {
                    debug!("Capture in flight, surface release deferred");
                    self.release_requested.store(true, Ordering::SeqCst);
                }
            }
            info!("Screen capture disabled");
        }
        true
    }

    /// Capture the screen and recognize its text.
    ///
    /// The outcome is also handed to the presenter.
    pub async fn start_capture(&self) -> Result<DecodedText, CaptureError> {
        let result = self.run_capture().await;

        match &result {
            Ok(text) => self.presenter.present_text(text),
            Err(e) => {
                warn!("Capture failed: {}", e);
                self.presenter.present_failure(e);
            }
        }

        result
    }

    async fn run_capture(&self) -> Result<DecodedText, CaptureError> {
        if !self.is_enabled() {
            return Err(CaptureError::CapabilityDisabled);
        }

        let token = self.handshake.request()?.await?;

        let _turn = self.gate.lock().await;
        if !self.is_enabled() || !token.is_valid() {
            return Err(CaptureError::CapabilityDisabled);
        }

        let start = Instant::now();
        let acquisition = Arc::clone(&self.acquisition);
        let pipeline = Arc::clone(&self.pipeline);
        let release_requested = Arc::clone(&self.release_requested);

        let text = tokio::task::spawn_blocking(move || -> Result<DecodedText, CaptureError> {
            let frame = {
                let mut acquisition = acquisition.lock();
                let frame = acquisition.capture(&token);
                if release_requested.swap(false, Ordering::SeqCst) {
                    acquisition.release();
                }
                frame?
            };
            debug!(
                "Frame {}x{} handed to OCR, {:?} after capture",
                frame.width(),
                frame.height(),
                frame.timestamp().elapsed()
            );
            Ok(pipeline.lock().recognize(frame)?)
        })
        .await
        .map_err(|e| CaptureError::Worker(e.to_string()))??;

        info!("Capture request finished in {:?}", start.elapsed());
        Ok(text)
    }
}

impl Drop for CaptureCoordinator {
    fn drop(&mut self) {
        self.handshake.cancel();
    }
}
