//! Capture session running analysis on a dedicated thread

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::backend::{AudioBackend, BlockSink, CaptureEvent, StreamInfo, StreamRequest};
use super::bands::SpectralFrame;
use super::beat::BeatState;
use super::fft::SpectrumTransform;
use super::pipeline::{AnalysisPipeline, FeatureSnapshot};
use super::presets::AudioPreset;
use super::AudioConfig;
use crate::bus::FeatureBus;
use crate::error::{Error, Result};
use crate::state::{CaptureStatus, SessionState};

/// State shared with the capture thread
#[derive(Default)]
struct SessionShared {
    status: Mutex<CaptureStatus>,
    /// Cleared first thing in `stop()`; a block already in flight sees it
    /// and is dropped instead of published.
    accepting: AtomicBool,
}

struct Worker {
    event_tx: mpsc::Sender<CaptureEvent>,
    handle: JoinHandle<()>,
}

/// One live audio input feeding the analysis pipeline.
///
/// The platform stream is owned by a thread named `audio-capture`; blocks
/// arrive over a channel and are analysed in order, one at a time, and the
/// resulting snapshots are published on the [`FeatureBus`].
pub struct CaptureSession {
    backend: Arc<dyn AudioBackend>,
    config: AudioConfig,
    bus: FeatureBus,
    pipeline: Arc<Mutex<AnalysisPipeline>>,
    shared: Arc<SessionShared>,
    worker: Option<Worker>,
}

impl CaptureSession {
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        config: AudioConfig,
        bus: FeatureBus,
    ) -> Result<Self> {
        config.validate()?;
        let pipeline = Arc::new(Mutex::new(AnalysisPipeline::new(&config)));
        Ok(Self {
            backend,
            config,
            bus,
            pipeline,
            shared: Arc::new(SessionShared::default()),
            worker: None,
        })
    }

    /// Open `device_id` (platform default when `None`) and start analysing.
    ///
    /// Any previous capture is stopped first. On error the session is left
    /// Idle with nothing held open.
    pub async fn start(&mut self, device_id: Option<&str>) -> Result<()> {
        self.stop();
        self.set_state(SessionState::Starting);

        let (event_tx, event_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        let ctx = WorkerContext {
            backend: Arc::clone(&self.backend),
            device_id: device_id.map(str::to_string),
            request: StreamRequest {
                sample_rate: self.config.sample_rate,
                buffer_size: self.config.buffer_size,
                processing: self.config.processing,
            },
            fft_size: self.config.fft_size,
            min_decibels: self.config.min_decibels,
            max_decibels: self.config.max_decibels,
            sink_tx: event_tx.clone(),
            events: event_rx,
            pipeline: Arc::clone(&self.pipeline),
            shared: Arc::clone(&self.shared),
            bus: self.bus.clone(),
        };

        let handle = match thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || run_capture_thread(ctx, ready_tx))
        {
            Ok(handle) => handle,
            Err(e) => {
                self.stop();
                return Err(Error::InitializationError(format!(
                    "failed to spawn capture thread: {e}"
                )));
            }
        };
        self.worker = Some(Worker { event_tx, handle });

        let timeout = Duration::from_millis(self.config.start_timeout_ms);
        let outcome = match tokio::time::timeout(timeout, ready_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::InitializationError(
                "capture thread exited during startup".into(),
            )),
            Err(_) => {
                // The thread is stuck in the platform open call. Joining would
                // block until it returns; once it does it finds nobody waiting
                // and closes the stream itself.
                if let Some(worker) = self.worker.take() {
                    log::warn!("Abandoning audio-capture thread stuck opening the input");
                    drop(worker);
                }
                Err(Error::InitializationError(format!(
                    "audio input did not open within {} ms",
                    self.config.start_timeout_ms
                )))
            }
        };

        match outcome {
            Ok(info) => {
                {
                    let mut status = self.shared.status.lock();
                    // A fatal fault may already have failed the session
                    if status.state == SessionState::Starting {
                        *status = CaptureStatus {
                            state: SessionState::Running,
                            device_id: Some(info.device_id.clone()),
                            sample_rate: info.sample_rate,
                            error: None,
                            error_kind: None,
                        };
                    }
                }
                log::info!(
                    "Audio capture started: {} ({} Hz, {} channels)",
                    info.device_id,
                    info.sample_rate,
                    info.channels
                );
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to start audio capture: {}", e);
                self.stop();
                Err(e)
            }
        }
    }

    /// Stop capturing and zero all analysis state. Safe to call any time,
    /// any number of times.
    pub fn stop(&mut self) {
        self.shared.accepting.store(false, Ordering::SeqCst);

        if let Some(worker) = self.worker.take() {
            self.set_state(SessionState::Stopping);
            let _ = worker.event_tx.send(CaptureEvent::Shutdown);
            if worker.handle.join().is_err() {
                log::error!("Audio capture thread panicked");
            }
            log::info!("Audio capture stopped");
        }

        self.pipeline.lock().reset();
        self.bus.clear_latest();
        *self.shared.status.lock() = CaptureStatus::default();
    }

    /// Stop, give the platform a moment to release the old device, start again
    pub async fn switch_device(&mut self, device_id: Option<&str>) -> Result<()> {
        self.stop();
        tokio::time::sleep(Duration::from_millis(self.config.settle_delay_ms)).await;
        self.start(device_id).await
    }

    pub fn status(&self) -> CaptureStatus {
        self.shared.status.lock().clone()
    }

    /// Most recently published snapshot (all zeros while stopped)
    pub fn latest(&self) -> FeatureSnapshot {
        self.bus.latest()
    }

    pub fn beat_state(&self) -> BeatState {
        self.pipeline.lock().beat_state().clone()
    }

    pub fn bus(&self) -> &FeatureBus {
        &self.bus
    }

    pub fn config(&self) -> &AudioConfig {
        &self.config
    }

    /// Retune the running analysis without resetting it
    pub fn apply_preset(&self, preset: &AudioPreset) {
        log::info!("Applying audio preset '{}'", preset.name);
        self.pipeline.lock().apply_preset(preset);
    }

    pub fn set_sensitivity(&self, sensitivity: f32) {
        self.pipeline.lock().set_sensitivity(sensitivity);
    }

    pub fn set_bass_boost(&self, boost: f32) {
        self.pipeline.lock().set_bass_boost(boost);
    }

    fn set_state(&self, state: SessionState) {
        self.shared.status.lock().state = state;
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Everything the capture thread needs, moved in at spawn
struct WorkerContext {
    backend: Arc<dyn AudioBackend>,
    device_id: Option<String>,
    request: StreamRequest,
    fft_size: usize,
    min_decibels: f32,
    max_decibels: f32,
    sink_tx: mpsc::Sender<CaptureEvent>,
    events: mpsc::Receiver<CaptureEvent>,
    pipeline: Arc<Mutex<AnalysisPipeline>>,
    shared: Arc<SessionShared>,
    bus: FeatureBus,
}

fn run_capture_thread(ctx: WorkerContext, ready: oneshot::Sender<Result<StreamInfo>>) {
    let WorkerContext {
        backend,
        device_id,
        request,
        fft_size,
        min_decibels,
        max_decibels,
        sink_tx,
        events,
        pipeline,
        shared,
        bus,
    } = ctx;

    let sink = BlockSink::new(sink_tx, request.buffer_size);
    let stream = match backend.open_input(device_id.as_deref(), &request, sink) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let sample_rate = stream.info().sample_rate;

    if ready.send(Ok(stream.info().clone())).is_err() {
        // start() gave up waiting or was dropped; the session state is no
        // longer ours to touch
        log::warn!("Audio input opened after start was abandoned, closing it");
        if let Err(e) = stream.close() {
            log::warn!("Error while closing audio input: {}", e);
        }
        return;
    }

    shared.accepting.store(true, Ordering::SeqCst);
    let mut analysis = Analysis::new(fft_size, sample_rate, min_decibels, max_decibels);
    let failure = analysis_loop(&events, &mut analysis, &pipeline, &shared, &bus);

    shared.accepting.store(false, Ordering::SeqCst);
    if let Err(e) = stream.close() {
        log::warn!("Error while closing audio input: {}", e);
    }

    if let Some(err) = failure {
        log::error!("Audio capture failed: {}", err);
        pipeline.lock().reset();
        bus.clear_latest();
        *shared.status.lock() = CaptureStatus::failed(&err);
    }
}

/// Per-thread analysis state: the sliding FFT window and the sample clock
struct Analysis {
    window: VecDeque<f32>,
    transform: SpectrumTransform,
    fft_size: usize,
    sample_rate: u32,
    samples_seen: u64,
}

impl Analysis {
    fn new(fft_size: usize, sample_rate: u32, min_decibels: f32, max_decibels: f32) -> Self {
        Self {
            window: VecDeque::from(vec![0.0; fft_size]),
            transform: SpectrumTransform::new(fft_size, min_decibels, max_decibels),
            fft_size,
            sample_rate,
            samples_seen: 0,
        }
    }

    fn frame(&mut self, block: Vec<f32>) -> (SpectralFrame, f64) {
        self.window.extend(block.iter().copied());
        let excess = self.window.len().saturating_sub(self.fft_size);
        self.window.drain(..excess);
        self.samples_seen += block.len() as u64;

        let frame = SpectralFrame {
            magnitudes: self.transform.magnitudes(self.window.make_contiguous()),
            time_samples: block,
            sample_rate: self.sample_rate,
        };

        // Sample clock, so tempo does not depend on thread scheduling
        let now_ms = if self.sample_rate > 0 {
            self.samples_seen as f64 * 1000.0 / self.sample_rate as f64
        } else {
            0.0
        };
        (frame, now_ms)
    }
}

/// Returns the reason the session has to give up, or `None` on shutdown
fn analysis_loop(
    events: &mpsc::Receiver<CaptureEvent>,
    analysis: &mut Analysis,
    pipeline: &Mutex<AnalysisPipeline>,
    shared: &SessionShared,
    bus: &FeatureBus,
) -> Option<Error> {
    loop {
        match events.recv() {
            Ok(CaptureEvent::Block(block)) => {
                if !shared.accepting.load(Ordering::SeqCst) {
                    continue;
                }

                let (frame, now_ms) = analysis.frame(block);
                let (snapshot, faults) = {
                    let mut pipeline = pipeline.lock();
                    let snapshot = pipeline.process(&frame, now_ms);
                    let faults = pipeline
                        .fault_limit_exceeded()
                        .then(|| pipeline.consecutive_faults());
                    (snapshot, faults)
                };

                if let Some(count) = faults {
                    return Some(Error::InitializationError(format!(
                        "{count} consecutive analysis faults"
                    )));
                }

                // stop() may have raced this frame
                if shared.accepting.load(Ordering::SeqCst) {
                    bus.publish(&snapshot);
                }
            }
            Ok(CaptureEvent::StreamFault { fatal: true, message }) => {
                return Some(Error::DeviceNotFound(format!("audio input lost: {message}")));
            }
            Ok(CaptureEvent::StreamFault { fatal: false, message }) => {
                log::warn!("Audio stream error, continuing: {}", message);
            }
            Ok(CaptureEvent::Shutdown) => {
                log::info!("Audio capture stopping");
                return None;
            }
            Err(mpsc::RecvError) => {
                log::info!("Audio capture channel disconnected");
                return None;
            }
        }
    }
}
