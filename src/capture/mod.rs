//! Screen Capture Layer
//!
//! Mirrors the display into an off-screen rendering surface and reads back one
//! frame per capture request. The platform projection sits behind
//! [`ProjectionBackend`]; this module owns the surface lifetime, the wait for
//! the first frame and the stride correction.

#[cfg(feature = "desktop-capture")]
pub mod desktop;
pub mod frame;
pub mod permission;
pub mod still;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use frame::{FrameError, PixelBuffer, BYTES_PER_PIXEL};
pub use permission::{
    AuthorizationPrompt, CaptureToken, GrantData, GrantNotification, GrantNotifier, HandshakeError,
    HandshakeState, PendingGrant, PermissionHandshake, RequestId,
};
pub use still::StillImageBackend;

use crate::config::CaptureSettings;

/// Display properties used to size the rendering surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayMetrics {
    /// Logical width in pixels
    pub width: u32,
    /// Logical height in pixels
    pub height: u32,
    /// Pixel density in dots per inch
    pub density_dpi: u32,
}

/// Frame acquisition failures
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("no frame was produced within {0:?}")]
    NoImage(Duration),
    #[error("capture token is no longer valid")]
    InvalidToken,
    #[error("rendering surface unavailable: {0}")]
    Surface(String),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Platform screen projection
pub trait ProjectionBackend: Send {
    /// Current metrics of the display to mirror
    fn display_metrics(&self) -> Result<DisplayMetrics, AcquisitionError>;

    /// Create a surface mirroring the display.
    ///
    /// The surface pushes frames into `sink` from its own callback context.
    fn create_surface(
        &mut self,
        token: &CaptureToken,
        metrics: DisplayMetrics,
        sink: FrameSink,
    ) -> Result<Box<dyn MirrorSurface>, AcquisitionError>;
}

/// An off-screen surface mirroring the display
pub trait MirrorSurface: Send {
    /// Ask for a fresh frame. Surfaces that render continuously can ignore it.
    fn request_frame(&mut self) {}

    /// Stop mirroring and free the surface and its reader
    fn release(&mut self);
}

/// Latest-frame slot shared between a surface and the acquisition.
///
/// Holds at most one frame; a newer frame replaces an unread older one so the
/// surface never blocks on a slow reader.
#[derive(Clone)]
pub struct FrameSink {
    sender: Sender<PixelBuffer>,
    receiver: Receiver<PixelBuffer>,
}

impl FrameSink {
    fn new() -> (Self, Receiver<PixelBuffer>) {
        let (sender, receiver) = bounded(1);
        let frames = receiver.clone();
        (Self { sender, receiver }, frames)
    }

    /// Publish a frame, replacing an unread one
    pub fn push(&self, frame: PixelBuffer) {
        match self.sender.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(frame)) => {
                let _ = self.receiver.try_recv();
                let _ = self.sender.try_send(frame);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

/// Screen capture configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Upper bound on the wait for the surface's first frame
    pub frame_timeout: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            frame_timeout: Duration::from_millis(500),
        }
    }
}

impl From<&CaptureSettings> for CaptureConfig {
    fn from(settings: &CaptureSettings) -> Self {
        Self {
            frame_timeout: Duration::from_millis(settings.frame_timeout_ms),
        }
    }
}

/// A live surface plus the receiving end of its frame slot
struct ActiveSurface {
    surface: Box<dyn MirrorSurface>,
    frames: Receiver<PixelBuffer>,
    token_id: Uuid,
    metrics: DisplayMetrics,
}

impl Drop for ActiveSurface {
    fn drop(&mut self) {
        self.surface.release();
        debug!("Rendering surface released");
    }
}

/// Produces one stride-corrected frame per request from a reusable surface
pub struct FrameAcquisition {
    backend: Box<dyn ProjectionBackend>,
    config: CaptureConfig,
    active: Option<ActiveSurface>,
}

impl FrameAcquisition {
    pub fn new(backend: Box<dyn ProjectionBackend>, config: CaptureConfig) -> Self {
        Self {
            backend,
            config,
            active: None,
        }
    }

    /// Whether a rendering surface is currently held
    pub fn has_surface(&self) -> bool {
        self.active.is_some()
    }

    /// Capture one frame with the given authorization.
    ///
    /// Waits for the surface's frame-available event up to the configured
    /// timeout. A missing frame is reported as [`AcquisitionError::NoImage`]
    /// and not retried.
    pub fn capture(&mut self, token: &CaptureToken) -> Result<PixelBuffer, AcquisitionError> {
        if !token.is_valid() {
            self.release();
            return Err(AcquisitionError::InvalidToken);
        }

        let timeout = self.config.frame_timeout;
        let active = self.ensure_surface(token)?;

        // A frame that arrived after an earlier timeout belongs to that request
        let mut stale = 0;
        while active.frames.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            debug!("Discarded {} stale frame(s)", stale);
        }

        active.surface.request_frame();

        let frame = match active.frames.recv_timeout(timeout) {
            Ok(frame) => frame,
            Err(RecvTimeoutError::Timeout) => {
                warn!("No frame from rendering surface after {:?}", timeout);
                return Err(AcquisitionError::NoImage(timeout));
            }
            Err(RecvTimeoutError::Disconnected) => {
                warn!("Rendering surface stopped delivering frames");
                self.release();
                return Err(AcquisitionError::NoImage(timeout));
            }
        };

        debug!(
            "Frame {}x{} acquired (stride {} bytes, padding {} bytes)",
            frame.width(),
            frame.height(),
            frame.row_stride(),
            frame.row_padding()
        );

        // The padded frame is dropped here so the surface can recycle it
        Ok(frame.into_dense()?)
    }

    /// Release the surface and its reader
    pub fn release(&mut self) {
        if self.active.take().is_some() {
            info!("Capture surface torn down");
        }
    }

    fn ensure_surface(&mut self, token: &CaptureToken) -> Result<&mut ActiveSurface, AcquisitionError> {
        let metrics = self.backend.display_metrics()?;

        let reusable = self
            .active
            .as_ref()
            .is_some_and(|a| a.token_id == token.id() && a.metrics == metrics);

        if !reusable {
            self.release();

            let (sink, frames) = FrameSink::new();
            let surface = self.backend.create_surface(token, metrics, sink)?;
            info!(
                "Capture surface created: {}x{} @ {} dpi",
                metrics.width, metrics.height, metrics.density_dpi
            );

            self.active = Some(ActiveSurface {
                surface,
                frames,
                token_id: token.id(),
                metrics,
            });
        }

        self.active
            .as_mut()
            .ok_or_else(|| AcquisitionError::Surface("surface missing after creation".to_string()))
    }
}
