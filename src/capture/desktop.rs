//! Desktop monitor projection via xcap
//!
//! The surface runs on its own thread and grabs the first monitor whenever a
//! frame is requested, mirroring how a platform surface renders on a callback
//! context separate from the caller.

use crossbeam_channel::{unbounded, Sender};
use std::thread::JoinHandle;
use tracing::{debug, error, info};
use xcap::Monitor;

use super::{
    AcquisitionError, CaptureToken, DisplayMetrics, FrameSink, MirrorSurface, PixelBuffer, ProjectionBackend,
};

/// Density assumed for desktop monitors
const DESKTOP_DENSITY_DPI: u32 = 96;

pub struct DesktopBackend {
    metrics: DisplayMetrics,
}

impl DesktopBackend {
    /// Probe the first monitor for its size
    pub fn primary() -> Result<Self, AcquisitionError> {
        let image = first_monitor()?
            .capture_image()
            .map_err(|e| AcquisitionError::Surface(format!("Failed to probe monitor: {}", e)))?;

        let metrics = DisplayMetrics {
            width: image.width(),
            height: image.height(),
            density_dpi: DESKTOP_DENSITY_DPI,
        };
        info!("Desktop capture on {}x{} monitor", metrics.width, metrics.height);

        Ok(Self { metrics })
    }
}

impl ProjectionBackend for DesktopBackend {
    fn display_metrics(&self) -> Result<DisplayMetrics, AcquisitionError> {
        Ok(self.metrics)
    }

    fn create_surface(
        &mut self,
        _token: &CaptureToken,
        _metrics: DisplayMetrics,
        sink: FrameSink,
    ) -> Result<Box<dyn MirrorSurface>, AcquisitionError> {
        let (requests, request_rx) = unbounded::<()>();

        let worker = std::thread::Builder::new()
            .name("snaptext-mirror".to_string())
            .spawn(move || {
                debug!("Mirror thread starting...");
                // Ends when the surface drops its request sender
                while request_rx.recv().is_ok() {
                    match first_monitor().and_then(|m| {
                        m.capture_image()
                            .map_err(|e| AcquisitionError::Surface(e.to_string()))
                    }) {
                        Ok(image) => sink.push(PixelBuffer::from_image(image)),
                        Err(e) => error!("Monitor capture failed: {}", e),
                    }
                }
                debug!("Mirror thread exiting...");
            })
            .map_err(|e| AcquisitionError::Surface(format!("Failed to start mirror thread: {}", e)))?;

        Ok(Box::new(DesktopSurface {
            requests: Some(requests),
            worker: Some(worker),
        }))
    }
}

struct DesktopSurface {
    requests: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl MirrorSurface for DesktopSurface {
    fn request_frame(&mut self) {
        if let Some(requests) = &self.requests {
            let _ = requests.send(());
        }
    }

    fn release(&mut self) {
        self.requests = None;
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

fn first_monitor() -> Result<Monitor, AcquisitionError> {
    Monitor::all()
        .map_err(|e| AcquisitionError::Surface(format!("Failed to list monitors: {}", e)))?
        .into_iter()
        .next()
        .ok_or_else(|| AcquisitionError::Surface("No monitors found".to_string()))
}
