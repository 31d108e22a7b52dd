//! Platform seam: what the capture session needs from an audio host

use std::sync::mpsc;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// An input endpoint as the platform reports it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawInput {
    pub id: String,
    /// `None` when the platform redacts labels
    pub label: Option<String>,
}

/// Platform-side processing stages. All off by default so band energies
/// reflect the true input signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamRequest {
    /// Preferred sample rate; the device may pick another
    pub sample_rate: u32,
    /// Mono samples per delivered block
    pub buffer_size: usize,
    pub processing: ProcessingConstraints,
}

/// What was actually opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub device_id: String,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Messages into the capture thread
#[derive(Debug)]
pub enum CaptureEvent {
    /// Exactly `buffer_size` mono samples
    Block(Vec<f32>),
    /// `fatal` when the device is gone and the stream will not recover
    StreamFault { fatal: bool, message: String },
    Shutdown,
}

/// Audio host abstraction.
///
/// Streams are opened, driven and closed on the capture thread, so
/// [`InputStream`] itself need not be `Send`.
pub trait AudioBackend: Send + Sync {
    /// Short-lived open-and-release used to unlock device labels
    fn probe_access(&self) -> Result<()>;

    fn enumerate_inputs(&self) -> Result<Vec<RawInput>>;

    /// Open an input (`None` = platform default) and start delivering
    /// blocks into `sink`.
    fn open_input(
        &self,
        device_id: Option<&str>,
        request: &StreamRequest,
        sink: BlockSink,
    ) -> Result<Box<dyn InputStream>>;
}

/// A live input stream
pub trait InputStream {
    fn info(&self) -> &StreamInfo;

    /// Stop delivery and release the native handle. The handle is
    /// released even when this returns an error.
    fn close(self: Box<Self>) -> Result<()>;
}

/// Receives interleaved audio from a platform callback, downmixes it to
/// mono and forwards fixed-size blocks to the capture thread.
pub struct BlockSink {
    tx: mpsc::Sender<CaptureEvent>,
    block_size: usize,
    pending: Vec<f32>,
}

impl BlockSink {
    pub(crate) fn new(tx: mpsc::Sender<CaptureEvent>, block_size: usize) -> Self {
        let block_size = block_size.max(1);
        Self {
            tx,
            block_size,
            pending: Vec::with_capacity(block_size),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Downmix `channels`-interleaved frames to mono and queue them.
    /// Returns false once the capture thread has gone away.
    pub fn push_interleaved(&mut self, data: &[f32], channels: usize) -> bool {
        let channels = channels.max(1);
        if channels == 1 {
            return self.push_mono(data);
        }

        let mut alive = true;
        for frame in data.chunks(channels) {
            let sum: f32 = frame.iter().sum();
            alive &= self.push_sample(sum / frame.len() as f32);
        }
        alive
    }

    pub fn push_mono(&mut self, samples: &[f32]) -> bool {
        let mut alive = true;
        for &sample in samples {
            alive &= self.push_sample(sample);
        }
        alive
    }

    fn push_sample(&mut self, sample: f32) -> bool {
        self.pending.push(sample);
        if self.pending.len() < self.block_size {
            return true;
        }
        let block = std::mem::replace(&mut self.pending, Vec::with_capacity(self.block_size));
        self.tx.send(CaptureEvent::Block(block)).is_ok()
    }

    /// Handle for the platform's error callback
    pub fn fault_reporter(&self) -> FaultReporter {
        FaultReporter {
            tx: self.tx.clone(),
        }
    }
}

/// Reports stream errors to the capture thread
#[derive(Clone)]
pub struct FaultReporter {
    tx: mpsc::Sender<CaptureEvent>,
}

impl FaultReporter {
    pub fn report(&self, fatal: bool, message: impl Into<String>) {
        let _ = self.tx.send(CaptureEvent::StreamFault {
            fatal,
            message: message.into(),
        });
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory backend for session and catalog tests

    use super::*;
    use crate::error::Error;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    pub(crate) const FAKE_SAMPLE_RATE: u32 = 44100;

    #[derive(Default)]
    pub(crate) struct FakeBackend {
        pub inputs: Mutex<Vec<RawInput>>,
        pub probe_error: Mutex<Option<Error>>,
        pub enumerate_error: Mutex<Option<Error>>,
        pub open_error: Mutex<Option<Error>>,
        /// Simulates a platform open call that hangs
        pub open_delay: Mutex<Option<Duration>>,
        pub open_streams: Arc<AtomicUsize>,
        pub total_opens: AtomicUsize,
        sink: Mutex<Option<BlockSink>>,
        reporter: Mutex<Option<FaultReporter>>,
    }

    impl FakeBackend {
        pub fn with_inputs(inputs: &[(&str, Option<&str>)]) -> Self {
            let backend = Self::default();
            *backend.inputs.lock() = inputs
                .iter()
                .map(|(id, label)| RawInput {
                    id: id.to_string(),
                    label: label.map(str::to_string),
                })
                .collect();
            backend
        }

        pub fn open_streams(&self) -> usize {
            self.open_streams.load(Ordering::SeqCst)
        }

        pub fn total_opens(&self) -> usize {
            self.total_opens.load(Ordering::SeqCst)
        }

        /// Deliver mono samples as if the device produced them
        pub fn push(&self, samples: &[f32]) -> bool {
            match self.sink.lock().as_mut() {
                Some(sink) => sink.push_mono(samples),
                None => false,
            }
        }

        pub fn report_fault(&self, fatal: bool, message: &str) {
            if let Some(reporter) = self.reporter.lock().as_ref() {
                reporter.report(fatal, message);
            }
        }
    }

    impl AudioBackend for FakeBackend {
        fn probe_access(&self) -> Result<()> {
            match self.probe_error.lock().clone() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }

        fn enumerate_inputs(&self) -> Result<Vec<RawInput>> {
            if let Some(err) = self.enumerate_error.lock().clone() {
                return Err(err);
            }
            Ok(self.inputs.lock().clone())
        }

        fn open_input(
            &self,
            device_id: Option<&str>,
            _request: &StreamRequest,
            sink: BlockSink,
        ) -> Result<Box<dyn InputStream>> {
            let delay = *self.open_delay.lock();
            if let Some(delay) = delay {
                std::thread::sleep(delay);
            }
            if let Some(err) = self.open_error.lock().clone() {
                return Err(err);
            }

            let device_id = match device_id {
                Some(id) => {
                    let inputs = self.inputs.lock();
                    if !inputs.is_empty() && !inputs.iter().any(|i| i.id == id) {
                        return Err(Error::DeviceNotFound(id.to_string()));
                    }
                    id.to_string()
                }
                None => "fake:default".to_string(),
            };

            *self.reporter.lock() = Some(sink.fault_reporter());
            *self.sink.lock() = Some(sink);
            self.open_streams.fetch_add(1, Ordering::SeqCst);
            self.total_opens.fetch_add(1, Ordering::SeqCst);

            Ok(Box::new(FakeStream {
                info: StreamInfo {
                    device_id,
                    sample_rate: FAKE_SAMPLE_RATE,
                    channels: 1,
                },
                open_streams: Arc::clone(&self.open_streams),
            }))
        }
    }

    struct FakeStream {
        info: StreamInfo,
        open_streams: Arc<AtomicUsize>,
    }

    impl InputStream for FakeStream {
        fn info(&self) -> &StreamInfo {
            &self.info
        }

        fn close(self: Box<Self>) -> Result<()> {
            Ok(())
        }
    }

    impl Drop for FakeStream {
        fn drop(&mut self) {
            self.open_streams.fetch_sub(1, Ordering::SeqCst);
        }
    }
}
