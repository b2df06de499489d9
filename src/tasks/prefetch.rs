//! Background preparation of the next slide.
//!
//! A single worker asks the catalog for a request, composites it and offers the
//! result over a zero-capacity channel. The send only completes when the
//! display loop takes the slide, so at most one finished slide ever waits and
//! the catalog is never asked for more than one request ahead.
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{self as xchan, Receiver, RecvTimeoutError, Sender, TryRecvError};
use tracing::{debug, info, warn};

use crate::error::CompositeFailure;
use crate::events::{PictureRequest, PreparedSlide};
use crate::processing::matting::MatTolerance;
use crate::processing::{self, CompositedFrame, CompositorSettings, TargetSize};

/// How long the worker waits before asking an empty catalog again.
pub const IDLE_RETRY: Duration = Duration::from_millis(500);

/// Supplies the next slide to show.
pub trait PictureSource: Send {
    fn next_request(&mut self) -> Option<PictureRequest>;
}

impl<F> PictureSource for F
where
    F: FnMut() -> Option<PictureRequest> + Send,
{
    fn next_request(&mut self) -> Option<PictureRequest> {
        self()
    }
}

/// Non-blocking access to the most recently prepared slide.
pub trait SlideFeed {
    fn try_take(&mut self) -> Option<PreparedSlide>;
}

pub struct PrefetchPipeline {
    slot: Receiver<PreparedSlide>,
    shutdown: Option<Sender<()>>,
    settings: Arc<RwLock<CompositorSettings>>,
    worker: Option<JoinHandle<()>>,
}

impl PrefetchPipeline {
    /// Starts the worker with the standard compositor.
    pub fn spawn<S>(source: S, settings: CompositorSettings) -> Result<Self>
    where
        S: PictureSource + 'static,
    {
        Self::spawn_with(source, settings, processing::compose)
    }

    /// Starts the worker with a custom preparation step.
    pub fn spawn_with<S, F>(source: S, settings: CompositorSettings, prepare: F) -> Result<Self>
    where
        S: PictureSource + 'static,
        F: FnMut(&PictureRequest, &CompositorSettings) -> Result<CompositedFrame, CompositeFailure>
            + Send
            + 'static,
    {
        let (slot_tx, slot_rx) = xchan::bounded(0);
        let (shutdown_tx, shutdown_rx) = xchan::bounded(0);
        let settings = Arc::new(RwLock::new(settings));
        let worker = thread::Builder::new()
            .name("prefetch".into())
            .spawn({
                let settings = Arc::clone(&settings);
                move || run_worker(source, prepare, settings, slot_tx, shutdown_rx)
            })
            .context("failed to spawn prefetch worker")?;

        Ok(Self {
            slot: slot_rx,
            shutdown: Some(shutdown_tx),
            settings,
            worker: Some(worker),
        })
    }

    /// Takes the prepared slide if the worker has one waiting.
    pub fn try_take(&self) -> Option<PreparedSlide> {
        self.slot.try_recv().ok()
    }

    /// Updates the surface size used for subsequent composites.
    pub fn set_target(&self, target: TargetSize) {
        self.settings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .target = target;
    }

    pub fn set_matting_tolerance(&self, value: f32) {
        let tolerance = MatTolerance::from_value(value);
        info!(?tolerance, "matting tolerance changed");
        self.settings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .tolerance = tolerance;
    }

    pub fn matting_tolerance(&self) -> f32 {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .tolerance
            .value()
    }

    /// Stops the worker and waits for it to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        // Dropping the sender wakes the worker from any wait.
        self.shutdown.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("prefetch worker panicked");
            }
        }
    }
}

impl SlideFeed for PrefetchPipeline {
    fn try_take(&mut self) -> Option<PreparedSlide> {
        PrefetchPipeline::try_take(self)
    }
}

impl Drop for PrefetchPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker<S, F>(
    mut source: S,
    mut prepare: F,
    settings: Arc<RwLock<CompositorSettings>>,
    slot: Sender<PreparedSlide>,
    shutdown: Receiver<()>,
) where
    S: PictureSource,
    F: FnMut(&PictureRequest, &CompositorSettings) -> Result<CompositedFrame, CompositeFailure>,
{
    info!("prefetch worker started");
    loop {
        match shutdown.try_recv() {
            Err(TryRecvError::Empty) => {}
            _ => break,
        }

        let Some(request) = source.next_request() else {
            match shutdown.recv_timeout(IDLE_RETRY) {
                Err(RecvTimeoutError::Timeout) => continue,
                _ => break,
            }
        };

        let snapshot = settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let frame = match prepare(&request, &snapshot) {
            Ok(frame) => frame,
            Err(failure) => {
                warn!(
                    path = %request.first.path.display(),
                    kind = %failure.kind,
                    error = %failure.message,
                    "discarding picture that failed to composite"
                );
                continue;
            }
        };
        debug!(
            path = %request.first.path.display(),
            width = frame.width(),
            height = frame.height(),
            "slide prepared; waiting for hand-off"
        );

        let slide = PreparedSlide { request, frame };
        xchan::select! {
            send(slot, slide) -> sent => {
                if sent.is_err() {
                    break;
                }
            }
            recv(shutdown) -> _ => break,
        }
    }
    info!("prefetch worker stopped");
}
