//! Fakes shared by the unit tests

use image::{Rgba, RgbaImage};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::app::{CaptureError, ResultPresenter};
use crate::capture::{
    AcquisitionError, AuthorizationPrompt, CaptureToken, DisplayMetrics, FrameSink, GrantData, GrantNotification,
    GrantNotifier, MirrorSurface, PixelBuffer, ProjectionBackend, RequestId, BYTES_PER_PIXEL,
};
use crate::vision::{DecodedText, InferenceGraph, StageOutput, Tensor};

/// Records every prompt; optionally answers it on the spot
#[derive(Default)]
pub struct RecordingPrompt {
    shown: Mutex<Vec<(RequestId, GrantNotifier)>>,
    fail: bool,
    answer: Option<bool>,
}

impl RecordingPrompt {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    /// Answers each prompt immediately with `granted`
    pub fn answering(granted: bool) -> Self {
        Self {
            answer: Some(granted),
            ..Default::default()
        }
    }

    pub fn last(&self) -> Option<(RequestId, GrantNotifier)> {
        self.shown.lock().last().cloned()
    }

    pub fn count(&self) -> usize {
        self.shown.lock().len()
    }
}

impl AuthorizationPrompt for RecordingPrompt {
    fn show(&self, request_id: RequestId, reply: GrantNotifier) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("prompt unavailable");
        }
        self.shown.lock().push((request_id, reply.clone()));

        if let Some(granted) = self.answer {
            reply.deliver(GrantNotification {
                request_id,
                granted,
                grant_data: GrantData::new(b"grant".to_vec()),
            });
        }
        Ok(())
    }
}

/// Counts surface creations and releases
#[derive(Clone, Default)]
pub struct SurfaceProbe {
    created: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

impl SurfaceProbe {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

/// What a fake surface does when asked for a frame
#[derive(Clone)]
enum FrameSource {
    Fixed(PixelBuffer),
    Silent,
    /// Frame `n` is a 2x2 image filled with value `n`, delivered after the delay
    Numbered(Duration),
}

/// Backend whose surfaces replay one frame, never produce any, or render
/// numbered frames late
pub struct FakeBackend {
    source: FrameSource,
    metrics: DisplayMetrics,
    probe: SurfaceProbe,
}

impl FakeBackend {
    /// Serve `image` with `padding` extra bytes at the end of every row
    pub fn serving(image: RgbaImage, padding: usize) -> Self {
        let (width, height) = image.dimensions();
        let row_bytes = width as usize * BYTES_PER_PIXEL;

        let mut data = Vec::new();
        for row in image.as_raw().chunks_exact(row_bytes) {
            data.extend_from_slice(row);
            data.extend(std::iter::repeat(0xAB).take(padding));
        }
        let frame = PixelBuffer::new(data, width, height, row_bytes + padding).unwrap();

        Self::with_source(FrameSource::Fixed(frame), width, height)
    }

    /// Surfaces that never deliver a frame
    pub fn silent() -> Self {
        Self::with_source(FrameSource::Silent, 4, 4)
    }

    /// Surfaces that render the frame for request `n` (counted from 0) as a
    /// 2x2 image of value `n`, `delay` after the request
    pub fn numbered(delay: Duration) -> Self {
        Self::with_source(FrameSource::Numbered(delay), 2, 2)
    }

    fn with_source(source: FrameSource, width: u32, height: u32) -> Self {
        Self {
            source,
            metrics: DisplayMetrics {
                width,
                height,
                density_dpi: 160,
            },
            probe: SurfaceProbe::default(),
        }
    }

    pub fn with_probe(mut self, probe: SurfaceProbe) -> Self {
        self.probe = probe;
        self
    }
}

impl ProjectionBackend for FakeBackend {
    fn display_metrics(&self) -> Result<DisplayMetrics, AcquisitionError> {
        Ok(self.metrics)
    }

    fn create_surface(
        &mut self,
        _token: &CaptureToken,
        _metrics: DisplayMetrics,
        sink: FrameSink,
    ) -> Result<Box<dyn MirrorSurface>, AcquisitionError> {
        self.probe.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSurface {
            source: self.source.clone(),
            requests: 0,
            sink,
            probe: self.probe.clone(),
        }))
    }
}

struct FakeSurface {
    source: FrameSource,
    requests: u8,
    sink: FrameSink,
    probe: SurfaceProbe,
}

impl MirrorSurface for FakeSurface {
    fn request_frame(&mut self) {
        let request = self.requests;
        self.requests = self.requests.wrapping_add(1);

        match &self.source {
            FrameSource::Fixed(frame) => self.sink.push(frame.clone()),
            FrameSource::Silent => {}
            FrameSource::Numbered(delay) => {
                let delay = *delay;
                let sink = self.sink.clone();
                std::thread::spawn(move || {
                    std::thread::sleep(delay);
                    let image = RgbaImage::from_pixel(2, 2, Rgba([request, request, request, 255]));
                    sink.push(PixelBuffer::from_image(image));
                });
            }
        }
    }

    fn release(&mut self) {
        self.probe.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Input shapes seen by a [`FakeGraph`]
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<[usize; 4]>>>);

impl CallLog {
    pub fn count(&self) -> usize {
        self.0.lock().len()
    }

    pub fn shapes(&self) -> Vec<[usize; 4]> {
        self.0.lock().clone()
    }
}

type Respond = Box<dyn FnMut(&Tensor) -> anyhow::Result<StageOutput> + Send>;

/// Scripted inference graph
pub struct FakeGraph {
    respond: Respond,
    calls: CallLog,
}

impl FakeGraph {
    pub fn from_fn(respond: impl FnMut(&Tensor) -> anyhow::Result<StageOutput> + Send + 'static) -> Self {
        Self {
            respond: Box::new(respond),
            calls: CallLog::default(),
        }
    }

    /// Always returns the same output
    pub fn constant(shape: Vec<usize>, data: Vec<f32>) -> Self {
        let output = StageOutput::new(shape, data).unwrap();
        Self::from_fn(move |_| Ok(output.clone()))
    }

    pub fn failing() -> Self {
        Self::from_fn(|_| anyhow::bail!("graph execution failed"))
    }

    pub fn calls(&self) -> CallLog {
        self.calls.clone()
    }
}

impl InferenceGraph for FakeGraph {
    fn infer(&mut self, input: Tensor) -> anyhow::Result<StageOutput> {
        self.calls.0.lock().push(input.shape());
        (self.respond)(&input)
    }
}

/// Keeps everything shown to the user
#[derive(Default)]
pub struct RecordingPresenter {
    texts: Mutex<Vec<DecodedText>>,
    failures: Mutex<Vec<String>>,
}

impl RecordingPresenter {
    pub fn texts(&self) -> Vec<DecodedText> {
        self.texts.lock().clone()
    }

    pub fn failures(&self) -> Vec<String> {
        self.failures.lock().clone()
    }
}

impl ResultPresenter for RecordingPresenter {
    fn present_text(&self, text: &DecodedText) {
        self.texts.lock().push(text.clone());
    }

    fn present_failure(&self, error: &CaptureError) {
        self.failures.lock().push(error.user_message().to_string());
    }
}
