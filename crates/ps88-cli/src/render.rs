//! Offline rendering: run a script faster than real time into a WAV file.
//!
//! The orchestrator and host share the calling thread. Notes given on the
//! command line are delivered at their exact sample offsets, and a single
//! draw is taken at the end so the shapes can be inspected too.

use crate::{load_config, read_script};
use anyhow::{Context, Result};
use clap::Args;
use ps88_core::api::Transport;
use ps88_core::{
    AudioInput, AudioOutput, BuildOutcome, Config, MemoryStorage, NoteEvent, Orchestrator, Shape,
    SilentInput, WavInput, WavOutput,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Args, Debug)]
pub struct RenderArgs {
    /// Path to the script
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Output WAV file
    #[arg(short, long, value_name = "WAV")]
    pub out: PathBuf,

    /// Length of the render
    #[arg(long, default_value_t = 4.0)]
    pub seconds: f64,

    /// Note to play, as NOTE@START:DURATION in seconds (repeatable)
    #[arg(long = "note", value_name = "N@START:DUR")]
    pub notes: Vec<NoteSpec>,

    /// Feed a WAV file as audio input
    #[arg(long, value_name = "WAV")]
    pub input: Option<PathBuf>,

    /// Write the final frame's shapes as JSON
    #[arg(long, value_name = "JSON")]
    pub shapes: Option<PathBuf>,

    /// Config file (defaults to the platform config location)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

/// A note played during an offline render.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteSpec {
    pub note: u8,
    pub start: f64,
    pub duration: f64,
}

impl FromStr for NoteSpec {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let err = || format!("expected NOTE@START:DURATION, got '{}'", s);
        let (note, timing) = s.split_once('@').ok_or_else(err)?;
        let (start, duration) = timing.split_once(':').ok_or_else(err)?;

        let note: u8 = note.trim().parse().map_err(|_| err())?;
        if note > 127 {
            return Err(format!("note {} out of range 0-127", note));
        }
        let start: f64 = start.trim().parse().map_err(|_| err())?;
        let duration: f64 = duration.trim().parse().map_err(|_| err())?;
        if !(start.is_finite() && start >= 0.0 && duration.is_finite() && duration >= 0.0) {
            return Err(format!("start and duration must be non-negative in '{}'", s));
        }
        Ok(Self {
            note,
            start,
            duration,
        })
    }
}

/// Summary of a finished render.
#[derive(Debug)]
pub struct RenderReport {
    pub outcome: BuildOutcome,
    pub frames: u64,
    pub shapes: Vec<Shape>,
    pub fault: Option<String>,
}

pub fn render(args: RenderArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let code = read_script(&args.file)?;

    log::info!("ps88 Render");
    log::info!("===========");
    log::info!("Script: {}", args.file.display());
    log::info!("Output: {}", args.out.display());

    let input: Box<dyn AudioInput> = match &args.input {
        Some(path) => Box::new(
            WavInput::open(path).with_context(|| format!("Failed to open input: {}", path.display()))?,
        ),
        None => Box::new(SilentInput),
    };

    let report = render_to_file(&code, &config, &args.out, args.seconds, &args.notes, input)?;

    log::info!("Build: {}", report.outcome);
    if let Some(fault) = &report.fault {
        log::warn!("Script fault during render: {}", fault);
    }
    log::info!(
        "Render complete: {} frames ({:.2}s)",
        report.frames,
        report.frames as f64 / config.audio.sample_rate as f64
    );

    if let Some(path) = &args.shapes {
        let json = serde_json::to_string_pretty(&report.shapes)?;
        fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        log::info!("Wrote {} shapes to {}", report.shapes.len(), path.display());
    }
    Ok(())
}

/// Note events sorted by absolute sample position.
fn schedule(notes: &[NoteSpec], sample_rate: u32) -> Vec<(u64, NoteEvent)> {
    let to_samples = |seconds: f64| (seconds * sample_rate as f64).round() as u64;
    let mut events: Vec<(u64, NoteEvent)> = notes
        .iter()
        .flat_map(|spec| {
            let on = to_samples(spec.start);
            let off = to_samples(spec.start + spec.duration);
            [
                (on, NoteEvent::note_on(0, spec.note, 1.0)),
                (off, NoteEvent::note_off(0, spec.note, 0.0)),
            ]
        })
        .collect();
    events.sort_by_key(|(at, _)| *at);
    events
}

pub fn render_to_file(
    code: &str,
    config: &Config,
    out: &Path,
    seconds: f64,
    notes: &[NoteSpec],
    mut input: Box<dyn AudioInput>,
) -> Result<RenderReport> {
    let audio = &config.audio;
    let total_frames = (seconds.max(0.0) * audio.sample_rate as f64).round() as u64;

    let (mut orchestrator, mut host) =
        Orchestrator::session(config.clone(), Box::new(MemoryStorage::new()));
    let outcome = orchestrator.build(code)?;

    let mut output = WavOutput::create(out, audio.channels, audio.sample_rate)
        .with_context(|| format!("Failed to create {}", out.display()))?;
    let mut transport = Transport::new(audio.sample_rate as f64, audio.bpm);
    let events = schedule(notes, audio.sample_rate);
    let mut next_event = 0;

    let mut input_block = vec![vec![0.0; audio.block_size]; audio.channels];
    let mut output_block = input_block.clone();
    let mut rendered = 0u64;

    while rendered < total_frames {
        let frames = (total_frames - rendered).min(audio.block_size as u64) as usize;
        if frames != audio.block_size {
            for channel in input_block.iter_mut().chain(output_block.iter_mut()) {
                channel.resize(frames, 0.0);
            }
        }

        let block_end = rendered + frames as u64;
        while let Some((at, event)) = events.get(next_event) {
            if *at >= block_end {
                break;
            }
            let offset = at.saturating_sub(rendered) as u32;
            orchestrator.note(event.with_timing(offset))?;
            next_event += 1;
        }

        input.read_block(&mut input_block);
        host.process(&input_block, &mut output_block, transport);
        transport.advance(frames);
        output.write_block(&output_block)?;
        rendered = block_end;
    }
    output.finish()?;

    let session = &config.session;
    orchestrator.draw(session.draw_width, session.draw_height)?;
    host.poll();
    orchestrator.pump()?;

    Ok(RenderReport {
        outcome,
        frames: rendered,
        shapes: orchestrator.shapes().to_vec(),
        fault: host.last_fault().map(|f| f.to_string()),
    })
}
