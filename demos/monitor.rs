//! Console renderer: prints a level meter and tempo for the preferred input.
//!
//! `cargo run --example monitor -- [seconds] [preset]`

use std::sync::Arc;
use std::time::Duration;

use dj_audio_features::audio::get_preset;
use dj_audio_features::{
    init_logging, AudioConfig, CaptureSession, CpalBackend, DeviceCatalog, FeatureBus,
};

fn meter(value: f32) -> String {
    let filled = (value.clamp(0.0, 1.0) * 20.0).round() as usize;
    format!("{:<20}", "#".repeat(filled))
}

#[tokio::main]
async fn main() -> dj_audio_features::Result<()> {
    init_logging();

    let mut args = std::env::args().skip(1);
    let seconds: u64 = args.next().and_then(|s| s.parse().ok()).unwrap_or(30);
    let preset = args.next().and_then(|name| get_preset(&name));

    let backend = Arc::new(CpalBackend::new());
    let catalog = DeviceCatalog::new(backend.clone());
    let devices = catalog.list_inputs()?;
    for device in &devices {
        let marker = if device.is_preferred { "*" } else { " " };
        println!("{marker} {}  [{}]", device.display_name, device.id);
    }

    let chosen = catalog.find_preferred(&devices).map(|d| d.id.clone());
    match &chosen {
        Some(id) => println!("Using preferred input {id}"),
        None => println!("No preferred input found, using the platform default"),
    }

    let bus = FeatureBus::new();
    let _meter = bus.subscribe(|s| {
        if s.is_beat {
            println!(
                "sub {} bass {} mid {} high {} | rms {:.3} | {:>3} bpm",
                meter(s.bands.sub_bass),
                meter(s.bands.bass),
                meter(s.bands.mid),
                meter(s.bands.high),
                s.rms,
                s.bpm
            );
        }
    });

    let mut session = CaptureSession::new(backend, AudioConfig::default(), bus)?;
    if let Some(preset) = &preset {
        session.apply_preset(preset);
    }

    if let Err(e) = session.start(chosen.as_deref()).await {
        eprintln!("{e}\n{}", e.remediation_hint());
        return Err(e);
    }

    tokio::time::sleep(Duration::from_secs(seconds)).await;

    match serde_json::to_string_pretty(&session.status()) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("could not serialize status: {e}"),
    }
    session.stop();
    Ok(())
}
