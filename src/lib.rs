//! DJ audio feature extraction
//!
//! Captures a live audio input, splits each block into band energies,
//! smooths them, tracks tempo from low-band onsets and publishes one
//! [`FeatureSnapshot`] per block to any number of renderers.
//!
//! ```no_run
//! use std::sync::Arc;
//! use dj_audio_features::{AudioConfig, CaptureSession, CpalBackend, DeviceCatalog, FeatureBus};
//!
//! # async fn run() -> dj_audio_features::Result<()> {
//! let backend = Arc::new(CpalBackend::new());
//! let devices = DeviceCatalog::new(backend.clone()).list_inputs()?;
//!
//! let bus = FeatureBus::new();
//! let _sub = bus.subscribe(|snapshot| println!("bass {:.2} bpm {}", snapshot.bands.bass, snapshot.bpm));
//!
//! let mut session = CaptureSession::new(backend, AudioConfig::default(), bus)?;
//! session.start(devices.first().map(|d| d.id.as_str())).await?;
//! # Ok(())
//! # }
//! ```

pub mod audio;
pub mod bus;
pub mod error;
pub mod state;

pub use audio::{
    AudioBackend, AudioConfig, AudioPreset, BandEnergySet, BeatState, CaptureSession,
    CpalBackend, DeviceCatalog, FeatureSnapshot, InputDevice,
};
pub use bus::{FeatureBus, Subscription};
pub use error::{Error, ErrorKind, Result};
pub use state::{CaptureStatus, SessionState};

/// Install the `env_logger` backend, `info` unless `RUST_LOG` says otherwise.
///
/// Calling it again (or after another logger was installed) is harmless.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}
