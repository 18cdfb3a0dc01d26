//! Audio and MIDI collaborators wired up by the orchestrator.
//!
//! Blocks are planar: one `Vec<f32>` per channel, all the same length.
//! Hardware implementations live in [`crate::native`] behind the `native`
//! feature; this module provides the file-backed and null ones.

use crate::error::{Error, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// A live audio source feeding the host.
pub trait AudioInput: Send {
    /// Fill `block`. Returns `false` when no data was available, in which
    /// case the block is left as silence.
    fn read_block(&mut self, block: &mut [Vec<f32>]) -> bool;

    /// Rate the source actually delivers, when it has one of its own.
    fn sample_rate(&self) -> Option<u32> {
        None
    }
}

/// The destination for rendered blocks.
pub trait AudioOutput: Send {
    fn write_block(&mut self, block: &[Vec<f32>]) -> Result<()>;

    /// Frames the device can accept right now. Outputs that pull at their
    /// own rate report this so the runtime follows the device clock;
    /// `None` means the runtime paces blocks itself.
    fn free_frames(&self) -> Option<usize> {
        None
    }

    /// Rate the device was opened at. It can differ from the configured
    /// rate when the device does not support that one.
    fn sample_rate(&self) -> Option<u32> {
        None
    }

    /// Flush and close. Called once at teardown.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// An open MIDI input. Dropping it closes the connection.
pub trait MidiInput: Send {
    fn name(&self) -> &str;
}

/// Input that always produces silence.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentInput;

impl AudioInput for SilentInput {
    fn read_block(&mut self, block: &mut [Vec<f32>]) -> bool {
        for channel in block.iter_mut() {
            channel.fill(0.0);
        }
        false
    }
}

/// Output that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullOutput;

impl AudioOutput for NullOutput {
    fn write_block(&mut self, _block: &[Vec<f32>]) -> Result<()> {
        Ok(())
    }
}

/// Plays a WAV file once, then silence.
#[derive(Debug)]
pub struct WavInput {
    channels: usize,
    sample_rate: u32,
    /// Interleaved frames.
    samples: Vec<f32>,
    position: usize,
}

impl WavInput {
    pub fn open(path: &Path) -> Result<Self> {
        let reader = WavReader::open(path)?;
        let spec = reader.spec();
        let samples = match spec.sample_format {
            SampleFormat::Float => reader.into_samples::<f32>().collect::<std::result::Result<Vec<_>, _>>()?,
            SampleFormat::Int => {
                let scale = (1_i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<std::result::Result<Vec<_>, _>>()?
            }
        };
        if spec.channels == 0 {
            return Err(Error::Device(format!("{} has no channels", path.display())));
        }
        log::info!(
            "[DEVICE] opened {} ({} ch, {} Hz, {} frames)",
            path.display(),
            spec.channels,
            spec.sample_rate,
            samples.len() / spec.channels as usize
        );
        Ok(Self {
            channels: spec.channels as usize,
            sample_rate: spec.sample_rate,
            samples,
            position: 0,
        })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_finished(&self) -> bool {
        self.position * self.channels >= self.samples.len()
    }
}

impl AudioInput for WavInput {
    fn sample_rate(&self) -> Option<u32> {
        Some(self.sample_rate)
    }

    fn read_block(&mut self, block: &mut [Vec<f32>]) -> bool {
        let frames = block.first().map(Vec::len).unwrap_or(0);
        let mut any = false;
        for frame in 0..frames {
            let base = (self.position + frame) * self.channels;
            let present = base < self.samples.len();
            any |= present;
            for (ch, channel) in block.iter_mut().enumerate() {
                channel[frame] = if present && ch < self.channels {
                    self.samples.get(base + ch).copied().unwrap_or(0.0)
                } else {
                    0.0
                };
            }
        }
        self.position += frames;
        any
    }
}

/// Writes blocks to a 32-bit float WAV file.
pub struct WavOutput {
    writer: Option<WavWriter<BufWriter<File>>>,
    channels: usize,
    sample_rate: u32,
    frames: u64,
}

impl WavOutput {
    pub fn create(path: &Path, channels: usize, sample_rate: u32) -> Result<Self> {
        let spec = WavSpec {
            channels: u16::try_from(channels)
                .map_err(|_| Error::Device(format!("too many channels: {}", channels)))?,
            sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let writer = WavWriter::create(path, spec)?;
        Ok(Self {
            writer: Some(writer),
            channels,
            sample_rate,
            frames: 0,
        })
    }

    pub fn frames_written(&self) -> u64 {
        self.frames
    }
}

impl AudioOutput for WavOutput {
    fn sample_rate(&self) -> Option<u32> {
        Some(self.sample_rate)
    }

    fn write_block(&mut self, block: &[Vec<f32>]) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(Error::Device("WAV output already finished".to_string()));
        };
        let frames = block.first().map(Vec::len).unwrap_or(0);
        for frame in 0..frames {
            for ch in 0..self.channels {
                let sample = block.get(ch).and_then(|c| c.get(frame)).copied().unwrap_or(0.0);
                writer.write_sample(sample)?;
            }
        }
        self.frames += frames as u64;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.finalize()?;
            log::info!("[DEVICE] wrote {} frames", self.frames);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silent_input() {
        let mut block = vec![vec![1.0; 4]; 2];
        assert!(!SilentInput.read_block(&mut block));
        assert!(block.iter().flatten().all(|&s| s == 0.0));
    }

    #[test]
    fn test_wav_output_then_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");

        let mut output = WavOutput::create(&path, 2, 8000).unwrap();
        output.write_block(&[vec![0.5, 0.25], vec![-0.5, -0.25]]).unwrap();
        output.write_block(&[vec![1.0], vec![-1.0]]).unwrap();
        output.finish().unwrap();
        assert_eq!(output.frames_written(), 3);
        assert!(output.write_block(&[vec![0.0]]).is_err());

        let mut input = WavInput::open(&path).unwrap();
        assert_eq!(input.channels(), 2);
        assert_eq!(input.sample_rate(), 8000);

        // Mono block: only the first channel is read.
        let mut block = vec![vec![0.0; 2]];
        assert!(input.read_block(&mut block));
        assert_eq!(block[0], vec![0.5, 0.25]);

        let mut block = vec![vec![9.0; 2], vec![9.0; 2], vec![9.0; 2]];
        assert!(input.read_block(&mut block));
        assert_eq!(block[0], vec![1.0, 0.0]);
        assert_eq!(block[1], vec![-1.0, 0.0]);
        assert_eq!(block[2], vec![0.0, 0.0]);
        assert!(input.is_finished());
        assert!(!input.read_block(&mut block));
    }

    #[test]
    fn test_int_wav_is_normalized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("int.wav");
        let spec = WavSpec {
            channels: 1,
            sample_rate: 44_100,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        writer.write_sample(16_384_i16).unwrap();
        writer.finalize().unwrap();

        let mut input = WavInput::open(&path).unwrap();
        let mut block = vec![vec![0.0; 1]];
        input.read_block(&mut block);
        assert_eq!(block[0][0], 0.5);
    }
}
