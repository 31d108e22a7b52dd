//! Audio host backend built on cpal

use std::collections::HashMap;
use std::sync::mpsc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    BufferSize, BuildStreamError, Device, FromSample, Host, HostId, PlayStreamError,
    SampleFormat, SampleRate, StreamConfig, StreamError, SupportedBufferSize,
    SupportedStreamConfig,
};

use super::backend::{AudioBackend, BlockSink, InputStream, RawInput, StreamInfo, StreamRequest};
use crate::error::{Error, Result};

const ID_PREFIX: &str = "input:";

/// [`AudioBackend`] over a cpal host (the platform default unless chosen)
#[derive(Debug, Clone, Copy)]
pub struct CpalBackend {
    host_id: HostId,
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self {
            host_id: cpal::default_host().id(),
        }
    }
}

impl CpalBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(host_id: HostId) -> Self {
        Self { host_id }
    }

    fn host(&self) -> Result<Host> {
        cpal::host_from_id(self.host_id).map_err(|e| Error::InitializationError(e.to_string()))
    }

    /// Input devices paired with their ids, in platform order
    fn devices(&self, host: &Host) -> Result<Vec<(String, Option<String>, Device)>> {
        let devices: Vec<Device> = host
            .input_devices()
            .map_err(|e| Error::from_backend_message(e.to_string()))?
            .collect();

        let names: Vec<Option<String>> = devices.iter().map(|d| d.name().ok()).collect();
        let ids = device_ids(&names);

        Ok(ids
            .into_iter()
            .zip(names)
            .zip(devices)
            .map(|((id, name), device)| (id, name, device))
            .collect())
    }

    fn resolve(&self, host: &Host, device_id: Option<&str>) -> Result<(String, Device)> {
        match device_id {
            Some(wanted) => self
                .devices(host)?
                .into_iter()
                .find(|(id, _, _)| id == wanted)
                .map(|(id, _, device)| (id, device))
                .ok_or_else(|| Error::DeviceNotFound(wanted.to_string())),
            None => {
                let device = host
                    .default_input_device()
                    .ok_or_else(|| Error::DeviceNotFound("no default input device".into()))?;
                let id = match device.name() {
                    Ok(name) => format!("{ID_PREFIX}{name}"),
                    Err(_) => format!("{ID_PREFIX}default"),
                };
                Ok((id, device))
            }
        }
    }
}

impl AudioBackend for CpalBackend {
    fn probe_access(&self) -> Result<()> {
        let (tx, _rx) = mpsc::channel();
        let request = StreamRequest {
            sample_rate: 44100,
            buffer_size: 512,
            processing: Default::default(),
        };
        let stream = self.open_input(None, &request, BlockSink::new(tx, 512))?;
        stream.close()
    }

    fn enumerate_inputs(&self) -> Result<Vec<RawInput>> {
        let host = self.host()?;
        let inputs: Vec<RawInput> = self
            .devices(&host)?
            .into_iter()
            .map(|(id, label, _)| RawInput { id, label })
            .collect();

        log::info!("Found {} audio input(s) on {:?}", inputs.len(), self.host_id);
        Ok(inputs)
    }

    fn open_input(
        &self,
        device_id: Option<&str>,
        request: &StreamRequest,
        sink: BlockSink,
    ) -> Result<Box<dyn InputStream>> {
        let host = self.host()?;
        let (id, device) = self.resolve(&host, device_id)?;

        let processing = request.processing;
        let wants_processing = processing.echo_cancellation
            || processing.noise_suppression
            || processing.auto_gain_control;
        if wants_processing {
            log::warn!("Input processing was requested but cpal only delivers unprocessed input");
        }

        let supported = choose_config(&device, request.sample_rate)?;
        let sample_format = supported.sample_format();
        let channels = supported.channels();
        let buffer_size = fixed_buffer_size(supported.buffer_size(), request.buffer_size);

        let mut config: StreamConfig = supported.config();
        config.buffer_size = buffer_size;

        log::info!(
            "Audio capture: {} ({} Hz, {} channels, {:?}, buffer {:?})",
            id,
            config.sample_rate.0,
            channels,
            sample_format,
            config.buffer_size
        );

        let stream = match sample_format {
            SampleFormat::F32 => build_stream::<f32>(&device, &config, sink),
            SampleFormat::I16 => build_stream::<i16>(&device, &config, sink),
            SampleFormat::U16 => build_stream::<u16>(&device, &config, sink),
            other => {
                return Err(Error::ConstraintsUnsatisfiable(format!(
                    "unsupported sample format {other:?}"
                )))
            }
        }
        .map_err(map_build_error)?;

        stream.play().map_err(map_play_error)?;

        Ok(Box::new(CpalInputStream {
            info: StreamInfo {
                device_id: id,
                sample_rate: config.sample_rate.0,
                channels,
            },
            stream,
        }))
    }
}

struct CpalInputStream {
    info: StreamInfo,
    stream: cpal::Stream,
}

impl InputStream for CpalInputStream {
    fn info(&self) -> &StreamInfo {
        &self.info
    }

    fn close(self: Box<Self>) -> Result<()> {
        let Self { info, stream } = *self;
        let paused = stream
            .pause()
            .map_err(|e| Error::from_backend_message(e.to_string()));
        // Dropping the stream releases the device whether or not pause worked
        drop(stream);
        log::info!("Audio capture closed: {}", info.device_id);
        paused
    }
}

/// Ids are `input:<name>`; later devices sharing a name get `#2`, `#3`...
/// Unnamed devices fall back to their position.
fn device_ids(names: &[Option<String>]) -> Vec<String> {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    names
        .iter()
        .enumerate()
        .map(|(index, name)| match name {
            Some(name) => {
                let count = seen.entry(name.as_str()).or_insert(0);
                *count += 1;
                if *count == 1 {
                    format!("{ID_PREFIX}{name}")
                } else {
                    format!("{ID_PREFIX}{name}#{count}")
                }
            }
            None => format!("{ID_PREFIX}#{index}"),
        })
        .collect()
}

/// Prefer a config that supports `sample_rate`, f32 over integer formats;
/// otherwise take the device default.
fn choose_config(device: &Device, sample_rate: u32) -> Result<SupportedStreamConfig> {
    let wanted = SampleRate(sample_rate);

    let ranges = device.supported_input_configs().map_err(|e| match e {
        cpal::SupportedStreamConfigsError::DeviceNotAvailable => {
            Error::DeviceNotFound(e.to_string())
        }
        cpal::SupportedStreamConfigsError::InvalidArgument => {
            Error::ConstraintsUnsatisfiable(e.to_string())
        }
        other => Error::from_backend_message(other.to_string()),
    })?;

    let best = ranges
        .filter(|r| r.min_sample_rate() <= wanted && wanted <= r.max_sample_rate())
        .filter_map(|r| format_rank(r.sample_format()).map(|rank| (rank, r)))
        .min_by_key(|(rank, r)| (*rank, r.channels()));

    if let Some((_, range)) = best {
        return Ok(range.with_sample_rate(wanted));
    }

    log::debug!("No input config supports {} Hz, using device default", sample_rate);
    device.default_input_config().map_err(|e| match e {
        cpal::DefaultStreamConfigError::DeviceNotAvailable => Error::DeviceNotFound(e.to_string()),
        cpal::DefaultStreamConfigError::StreamTypeNotSupported => {
            Error::ConstraintsUnsatisfiable(e.to_string())
        }
        other => Error::from_backend_message(other.to_string()),
    })
}

fn format_rank(format: SampleFormat) -> Option<u8> {
    match format {
        SampleFormat::F32 => Some(0),
        SampleFormat::I16 => Some(1),
        SampleFormat::U16 => Some(2),
        _ => None,
    }
}

fn fixed_buffer_size(supported: &SupportedBufferSize, wanted: usize) -> BufferSize {
    match *supported {
        SupportedBufferSize::Range { min, max }
            if (min as usize..=max as usize).contains(&wanted) =>
        {
            BufferSize::Fixed(wanted as u32)
        }
        _ => BufferSize::Default,
    }
}

fn map_build_error(err: BuildStreamError) -> Error {
    match err {
        BuildStreamError::DeviceNotAvailable => Error::DeviceNotFound(err.to_string()),
        BuildStreamError::StreamConfigNotSupported | BuildStreamError::InvalidArgument => {
            Error::ConstraintsUnsatisfiable(err.to_string())
        }
        other => Error::from_backend_message(other.to_string()),
    }
}

fn map_play_error(err: PlayStreamError) -> Error {
    match err {
        PlayStreamError::DeviceNotAvailable => Error::DeviceNotFound(err.to_string()),
        other => Error::from_backend_message(other.to_string()),
    }
}

/// Convert one callback's worth of device samples to f32, reusing `out`
fn samples_to_f32<T: Copy>(data: &[T], out: &mut Vec<f32>)
where
    f32: FromSample<T>,
{
    out.clear();
    out.extend(data.iter().map(|&s| <f32 as FromSample<T>>::from_sample_(s)));
}

/// Build audio stream for given sample type
fn build_stream<T: cpal::Sample + cpal::SizedSample>(
    device: &Device,
    config: &StreamConfig,
    mut sink: BlockSink,
) -> std::result::Result<cpal::Stream, BuildStreamError>
where
    f32: FromSample<T>,
{
    let channels = config.channels as usize;
    let reporter = sink.fault_reporter();
    let mut scratch: Vec<f32> = Vec::new();

    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            samples_to_f32(data, &mut scratch);
            sink.push_interleaved(&scratch, channels);
        },
        move |err| {
            log::error!("Audio stream error: {}", err);
            let fatal = matches!(err, StreamError::DeviceNotAvailable);
            reporter.report(fatal, err.to_string());
        },
        None,
    )
}
