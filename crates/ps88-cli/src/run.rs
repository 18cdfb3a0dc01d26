//! `ps88 run`: live session with the processing runtime.

use crate::{load_config, read_script};
use anyhow::{Context, Result};
use clap::Args;
use ps88_core::{Config, FileStorage, HostRuntime, Orchestrator, SourceWatcher, WavInput};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How often the control loop wakes up.
const CONTROL_TICK: Duration = Duration::from_millis(10);

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the script
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Reload the script when the file changes
    #[arg(short, long)]
    pub watch: bool,

    /// Config file (defaults to the platform config location)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Feed a WAV file as audio input
    #[arg(long, value_name = "WAV")]
    pub input: Option<PathBuf>,

    /// Audio output device (substring match, needs `native`)
    #[arg(long, value_name = "NAME")]
    pub output_device: Option<String>,

    /// Audio input device (substring match, needs `native`)
    #[arg(long, value_name = "NAME", conflicts_with = "input")]
    pub input_device: Option<String>,

    /// MIDI input port (substring match, needs `native`)
    #[arg(long, value_name = "NAME")]
    pub midi: Option<String>,

    /// Do not open an audio output
    #[arg(long)]
    pub no_audio: bool,
}

pub fn run(args: RunArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let code = read_script(&args.file)?;

    let storage_dir = config.storage_dir()?;
    log::info!("[SESSION] storage: {}", storage_dir.display());
    let (mut orchestrator, host) =
        Orchestrator::session(config.clone(), Box::new(FileStorage::new(storage_dir)));

    let runtime = HostRuntime::start(host, config.audio.clone()).context("Failed to start runtime")?;
    orchestrator.attach_runtime(runtime.handle().clone());

    if let Some(path) = &args.input {
        let input = WavInput::open(path)
            .with_context(|| format!("Failed to open input: {}", path.display()))?;
        orchestrator.set_input(Some(Box::new(input)))?;
    }
    open_devices(&mut orchestrator, &args, &config)?;

    let outcome = orchestrator.build(&code)?;
    log::info!("[SESSION] {}: {}", args.file.display(), outcome);

    let stop = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&stop))?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&stop))?;

    if args.watch {
        log::info!("Watch mode enabled - monitoring {} (Ctrl+C to exit)", args.file.display());
    } else {
        log::info!("Script running... (Ctrl+C to exit)");
    }

    let mut watcher = SourceWatcher::new(&args.file);
    let session = &config.session;
    let frame_interval = session.frame_interval();
    let mut next_frame = Instant::now();
    let mut last_shape_count = None;

    while !stop.load(Ordering::Relaxed) {
        let now = Instant::now();

        if args.watch {
            match watcher.poll() {
                Ok(Some(code)) => {
                    log::info!("[RELOAD] file changed, rebuilding after edits settle");
                    orchestrator.edit(code, now);
                }
                Ok(None) => {}
                Err(e) => log::error!("[RELOAD] failed to read file: {}", e),
            }
        }

        if let Some(outcome) = orchestrator.tick(now)? {
            log::info!("[RELOAD] {}", outcome);
        }

        if now >= next_frame {
            orchestrator.draw(session.draw_width, session.draw_height)?;
            next_frame = now + frame_interval;

            let count = orchestrator.shapes().len();
            if last_shape_count != Some(count) {
                log::debug!("[GUI] {} shapes", count);
                last_shape_count = Some(count);
            }
        }

        std::thread::sleep(CONTROL_TICK);
    }

    log::info!("Interrupted, shutting down...");
    if let Some(host) = orchestrator.shutdown(Some(runtime))? {
        log::info!("[SESSION] stopped at generation {}", host.generation());
    }
    Ok(())
}

#[cfg(feature = "native")]
fn open_devices(orchestrator: &mut Orchestrator, args: &RunArgs, config: &Config) -> Result<()> {
    use ps88_core::{CpalInput, CpalOutput, MidirInput};

    if !args.no_audio {
        let output = CpalOutput::open(args.output_device.as_deref(), &config.audio)?;
        orchestrator.set_output(Some(Box::new(output)))?;
    }
    if let Some(name) = &args.input_device {
        let input = CpalInput::open(Some(name), &config.audio)?;
        orchestrator.set_input(Some(Box::new(input)))?;
    }
    if let Some(pattern) = &args.midi {
        let midi = MidirInput::connect(Some(pattern), orchestrator.note_sender())?;
        orchestrator.set_midi(Some(Box::new(midi)))?;
    }
    Ok(())
}

#[cfg(not(feature = "native"))]
fn open_devices(_orchestrator: &mut Orchestrator, args: &RunArgs, _config: &Config) -> Result<()> {
    if args.output_device.is_some() || args.input_device.is_some() || args.midi.is_some() {
        anyhow::bail!("device options need ps88 built with the `native` feature");
    }
    if !args.no_audio {
        log::warn!("Built without the `native` feature: audio is rendered but not played");
    }
    Ok(())
}
