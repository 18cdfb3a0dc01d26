//! Hardware audio and MIDI devices (cpal + midir).
//!
//! cpal streams are not `Send` everywhere, so each stream lives on its own
//! small thread and talks to the processing thread through an rtrb ring of
//! interleaved samples. Channel counts are adapted by wrapping: device
//! channel `c` maps to block channel `c % block_channels` and back.

use crate::channel::NoteSender;
use crate::config::AudioSettings;
use crate::devices::{AudioInput, AudioOutput, MidiInput};
use crate::error::{Error, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample, StreamConfig, SupportedStreamConfigRange};
use crossbeam_channel::bounded;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Ring capacity in blocks.
const RING_BLOCKS: usize = 4;

/// Names of the available devices.
#[derive(Debug, Clone, Default)]
pub struct DeviceList {
    pub audio_inputs: Vec<String>,
    pub audio_outputs: Vec<String>,
    pub midi_inputs: Vec<String>,
}

pub fn list_devices() -> Result<DeviceList> {
    let host = cpal::default_host();
    let names = |devices: Vec<cpal::Device>| -> Vec<String> {
        devices.iter().filter_map(device_name).collect()
    };
    let audio_inputs = host
        .input_devices()
        .map(|d| names(d.collect()))
        .map_err(|e| Error::Device(e.to_string()))?;
    let audio_outputs = host
        .output_devices()
        .map(|d| names(d.collect()))
        .map_err(|e| Error::Device(e.to_string()))?;

    let midi_in = midir::MidiInput::new("ps88-list").map_err(|e| Error::Device(e.to_string()))?;
    let midi_inputs = midi_in
        .ports()
        .iter()
        .filter_map(|port| midi_in.port_name(port).ok())
        .collect();

    Ok(DeviceList {
        audio_inputs,
        audio_outputs,
        midi_inputs,
    })
}

fn device_name(device: &cpal::Device) -> Option<String> {
    device.description().ok().map(|d| d.name().to_owned())
}

/// Case-insensitive substring match on the device name; `None` picks the
/// host default.
fn find_device(
    wanted: Option<&str>,
    devices: impl Iterator<Item = cpal::Device>,
    default: Option<cpal::Device>,
) -> Result<cpal::Device> {
    match wanted {
        None => default.ok_or_else(|| Error::Device("no default device".to_string())),
        Some(pattern) => {
            let pattern = pattern.to_lowercase();
            devices
                .into_iter()
                .find(|d| {
                    device_name(d)
                        .map(|name| name.to_lowercase().contains(&pattern))
                        .unwrap_or(false)
                })
                .ok_or_else(|| Error::Device(format!("no audio device matching '{}'", pattern)))
        }
    }
}

/// Use the configured rate if the device supports it, otherwise its default.
fn pick_sample_rate(
    mut ranges: impl Iterator<Item = SupportedStreamConfigRange>,
    wanted: u32,
    fallback: u32,
) -> u32 {
    if ranges.any(|r| r.min_sample_rate() <= wanted && wanted <= r.max_sample_rate()) {
        wanted
    } else {
        log::warn!(
            "[DEVICE] {} Hz not supported, using device rate {} Hz",
            wanted,
            fallback
        );
        fallback
    }
}

/// Owns a cpal stream on a dedicated thread.
struct StreamThread {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl StreamThread {
    fn spawn<F>(name: &str, build: F) -> Result<Self>
    where
        F: FnOnce() -> Result<cpal::Stream> + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = bounded(1);
        let thread_stop = stop.clone();
        let handle = thread::Builder::new().name(name.to_string()).spawn(move || {
            let stream = match build().and_then(|s| {
                s.play().map_err(|e| Error::Device(e.to_string()))?;
                Ok(s)
            }) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            while !thread_stop.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(10));
            }
            drop(stream);
        })?;

        let ready = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(Error::Device("stream thread exited".to_string())));
        let thread = Self {
            stop,
            handle: Some(handle),
        };
        ready.map(|_| thread)
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

// === Output ===

pub struct CpalOutput {
    producer: rtrb::Producer<f32>,
    device_channels: usize,
    sample_rate: u32,
    _stream: StreamThread,
}

impl CpalOutput {
    pub fn open(device: Option<&str>, settings: &AudioSettings) -> Result<Self> {
        let host = cpal::default_host();
        let outputs = host.output_devices().map_err(|e| Error::Device(e.to_string()))?;
        let device = find_device(device, outputs, host.default_output_device())?;
        let name = device_name(&device).unwrap_or_else(|| "Unknown".to_string());

        let default = device
            .default_output_config()
            .map_err(|e| Error::Device(e.to_string()))?;
        let sample_rate = match device.supported_output_configs() {
            Ok(ranges) => pick_sample_rate(ranges, settings.sample_rate, default.sample_rate()),
            Err(_) => default.sample_rate(),
        };
        let config = StreamConfig {
            channels: default.channels(),
            sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };
        let device_channels = config.channels as usize;
        let format = default.sample_format();

        let (producer, consumer) =
            rtrb::RingBuffer::new(settings.block_size * RING_BLOCKS * device_channels);

        log::info!(
            "[DEVICE] output '{}': {} ch, {} Hz, {:?}",
            name,
            device_channels,
            sample_rate,
            format
        );

        let stream = StreamThread::spawn("ps88-audio-out", move || match format {
            SampleFormat::F32 => output_stream::<f32>(&device, &config, consumer),
            SampleFormat::I16 => output_stream::<i16>(&device, &config, consumer),
            SampleFormat::U16 => output_stream::<u16>(&device, &config, consumer),
            SampleFormat::I32 => output_stream::<i32>(&device, &config, consumer),
            other => Err(Error::Device(format!("unsupported sample format {:?}", other))),
        })?;

        Ok(Self {
            producer,
            device_channels,
            sample_rate,
            _stream: stream,
        })
    }
}

fn output_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut consumer: rtrb::Consumer<f32>,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let err_fn = |err| log::error!("[DEVICE] output stream error: {}", err);
    device
        .build_output_stream(
            config,
            move |output: &mut [T], _info: &cpal::OutputCallbackInfo| {
                for sample in output.iter_mut() {
                    *sample = T::from_sample(consumer.pop().unwrap_or(0.0));
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| Error::Device(format!("failed to build output stream: {}", e)))
}

impl AudioOutput for CpalOutput {
    fn write_block(&mut self, block: &[Vec<f32>]) -> Result<()> {
        if block.is_empty() {
            return Ok(());
        }
        let frames = block[0].len();
        for frame in 0..frames {
            for ch in 0..self.device_channels {
                let sample = block[ch % block.len()].get(frame).copied().unwrap_or(0.0);
                if self.producer.push(sample).is_err() {
                    // Device is behind; the rest of this block is lost.
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    fn free_frames(&self) -> Option<usize> {
        Some(self.producer.slots() / self.device_channels.max(1))
    }

    fn sample_rate(&self) -> Option<u32> {
        Some(self.sample_rate)
    }
}

// === Input ===

pub struct CpalInput {
    consumer: rtrb::Consumer<f32>,
    device_channels: usize,
    sample_rate: u32,
    frame: Vec<f32>,
    _stream: StreamThread,
}

impl CpalInput {
    pub fn open(device: Option<&str>, settings: &AudioSettings) -> Result<Self> {
        let host = cpal::default_host();
        let inputs = host.input_devices().map_err(|e| Error::Device(e.to_string()))?;
        let device = find_device(device, inputs, host.default_input_device())?;
        let name = device_name(&device).unwrap_or_else(|| "Unknown".to_string());

        let default = device
            .default_input_config()
            .map_err(|e| Error::Device(e.to_string()))?;
        let sample_rate = match device.supported_input_configs() {
            Ok(ranges) => pick_sample_rate(ranges, settings.sample_rate, default.sample_rate()),
            Err(_) => default.sample_rate(),
        };
        let config = StreamConfig {
            channels: default.channels(),
            sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };
        let device_channels = config.channels as usize;
        let format = default.sample_format();

        let (producer, consumer) =
            rtrb::RingBuffer::new(settings.block_size * RING_BLOCKS * device_channels);

        log::info!(
            "[DEVICE] input '{}': {} ch, {} Hz, {:?}",
            name,
            device_channels,
            sample_rate,
            format
        );

        let stream = StreamThread::spawn("ps88-audio-in", move || match format {
            SampleFormat::F32 => input_stream::<f32>(&device, &config, producer),
            SampleFormat::I16 => input_stream::<i16>(&device, &config, producer),
            SampleFormat::U16 => input_stream::<u16>(&device, &config, producer),
            SampleFormat::I32 => input_stream::<i32>(&device, &config, producer),
            other => Err(Error::Device(format!("unsupported sample format {:?}", other))),
        })?;

        Ok(Self {
            consumer,
            device_channels,
            sample_rate,
            frame: vec![0.0; device_channels],
            _stream: stream,
        })
    }
}

fn input_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut producer: rtrb::Producer<f32>,
) -> Result<cpal::Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let err_fn = |err| log::error!("[DEVICE] input stream error: {}", err);
    device
        .build_input_stream(
            config,
            move |data: &[T], _info: &cpal::InputCallbackInfo| {
                for &sample in data {
                    if producer.push(f32::from_sample(sample)).is_err() {
                        break;
                    }
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| Error::Device(format!("failed to build input stream: {}", e)))
}

impl AudioInput for CpalInput {
    fn sample_rate(&self) -> Option<u32> {
        Some(self.sample_rate)
    }

    fn read_block(&mut self, block: &mut [Vec<f32>]) -> bool {
        let frames = block.first().map(Vec::len).unwrap_or(0);
        let available = self.consumer.slots() / self.device_channels.max(1);
        let mut any = false;
        for frame in 0..frames {
            if frame < available {
                for slot in self.frame.iter_mut() {
                    *slot = self.consumer.pop().unwrap_or(0.0);
                }
                any = true;
            } else {
                self.frame.fill(0.0);
            }
            for (ch, channel) in block.iter_mut().enumerate() {
                channel[frame] = self.frame[ch % self.device_channels];
            }
        }
        any
    }
}

// === MIDI ===

pub struct MidirInput {
    name: String,
    _connection: midir::MidiInputConnection<()>,
}

impl MidirInput {
    /// Connect to the first port whose name contains `pattern`
    /// (case-insensitive), or the first port when `pattern` is `None`.
    pub fn connect(pattern: Option<&str>, notes: NoteSender) -> Result<Self> {
        let midi_in = midir::MidiInput::new("ps88-midi-in").map_err(|e| Error::Device(e.to_string()))?;
        let ports = midi_in.ports();
        let lowered = pattern.map(str::to_lowercase);
        let port = ports
            .iter()
            .find(|port| match &lowered {
                None => true,
                Some(p) => midi_in
                    .port_name(port)
                    .map(|name| name.to_lowercase().contains(p))
                    .unwrap_or(false),
            })
            .ok_or_else(|| Error::Device(format!("no MIDI input matching '{}'", pattern.unwrap_or("*"))))?;
        let name = midi_in
            .port_name(port)
            .map_err(|e| Error::Device(e.to_string()))?;

        log::info!("[DEVICE] MIDI input '{}'", name);
        let connection = midi_in
            .connect(
                port,
                "ps88-midi-input",
                move |_timestamp, message, _| {
                    if let Err(e) = notes.send_bytes(message, 0) {
                        log::debug!("[DEVICE] dropping MIDI message: {}", e);
                    }
                },
                (),
            )
            .map_err(|e| Error::Device(e.to_string()))?;

        Ok(Self {
            name,
            _connection: connection,
        })
    }
}

impl MidiInput for MidirInput {
    fn name(&self) -> &str {
        &self.name
    }
}
