//! Processing thread for the script host.
//!
//! The thread owns the [`ScriptHost`] and the audio devices. It:
//! - renders one block per block period (or whenever the output has room)
//! - keeps draining host messages between blocks so draws stay responsive
//! - swaps input/output devices on request

use crate::api::Transport;
use crate::config::AudioSettings;
use crate::devices::{AudioInput, AudioOutput, NullOutput, SilentInput};
use crate::error::{Error, Result};
use crate::host::ScriptHost;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How far behind the clock the thread may fall before it stops catching up.
const MAX_LAG_BLOCKS: u32 = 8;

/// Device changes for the processing thread.
pub enum DeviceCommand {
    SetInput(Option<Box<dyn AudioInput>>),
    SetOutput(Option<Box<dyn AudioOutput>>),
}

/// Handle to the running processing thread.
#[derive(Clone)]
pub struct RuntimeHandle {
    device_tx: Sender<DeviceCommand>,
    shutdown: Arc<AtomicBool>,
    blocks: Arc<AtomicU64>,
}

impl RuntimeHandle {
    pub fn send(&self, cmd: DeviceCommand) -> Result<()> {
        self.device_tx.send(cmd).map_err(|_| Error::ChannelClosed)
    }

    pub fn set_input(&self, input: Option<Box<dyn AudioInput>>) -> Result<()> {
        self.send(DeviceCommand::SetInput(input))
    }

    pub fn set_output(&self, output: Option<Box<dyn AudioOutput>>) -> Result<()> {
        self.send(DeviceCommand::SetOutput(output))
    }

    /// Signal the runtime to shut down.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Blocks rendered since start.
    pub fn blocks_rendered(&self) -> u64 {
        self.blocks.load(Ordering::Relaxed)
    }
}

/// The running processing thread.
pub struct HostRuntime {
    handle: RuntimeHandle,
    thread_handle: Option<JoinHandle<ScriptHost>>,
}

impl HostRuntime {
    /// Move `host` onto a new processing thread.
    pub fn start(host: ScriptHost, settings: AudioSettings) -> Result<Self> {
        let (device_tx, device_rx) = unbounded();
        let shutdown = Arc::new(AtomicBool::new(false));
        let blocks = Arc::new(AtomicU64::new(0));

        let handle = RuntimeHandle {
            device_tx,
            shutdown: shutdown.clone(),
            blocks: blocks.clone(),
        };

        log::info!(
            "[RUNTIME] starting: {} ch, {} samples @ {} Hz",
            settings.channels,
            settings.block_size,
            settings.sample_rate
        );
        let thread_handle = thread::Builder::new()
            .name("ps88-host".to_string())
            .spawn(move || {
                let mut rt = ProcessingThread::new(host, settings, device_rx, blocks);
                rt.run(shutdown);
                rt.finish();
                rt.host
            })?;

        Ok(Self {
            handle,
            thread_handle: Some(thread_handle),
        })
    }

    pub fn handle(&self) -> &RuntimeHandle {
        &self.handle
    }

    /// Stop the thread and get the host back.
    pub fn shutdown(mut self) -> Option<ScriptHost> {
        self.stop()
    }

    fn stop(&mut self) -> Option<ScriptHost> {
        self.handle.shutdown();
        let thread_handle = self.thread_handle.take()?;
        match thread_handle.join() {
            Ok(host) => Some(host),
            Err(_) => {
                log::error!("[RUNTIME] processing thread panicked");
                None
            }
        }
    }
}

impl Drop for HostRuntime {
    fn drop(&mut self) {
        self.stop();
    }
}

struct ProcessingThread {
    host: ScriptHost,
    settings: AudioSettings,
    device_rx: Receiver<DeviceCommand>,
    input: Box<dyn AudioInput>,
    output: Box<dyn AudioOutput>,
    input_block: Vec<Vec<f32>>,
    output_block: Vec<Vec<f32>>,
    transport: Transport,
    blocks: Arc<AtomicU64>,
    output_failed: bool,
}

impl ProcessingThread {
    fn new(host: ScriptHost, settings: AudioSettings, device_rx: Receiver<DeviceCommand>, blocks: Arc<AtomicU64>) -> Self {
        let block = vec![vec![0.0; settings.block_size]; settings.channels];
        Self {
            host,
            device_rx,
            input: Box::new(SilentInput),
            output: Box::new(NullOutput),
            input_block: block.clone(),
            output_block: block,
            transport: Transport::new(settings.sample_rate as f64, settings.bpm),
            settings,
            blocks,
            output_failed: false,
        }
    }

    fn run(&mut self, shutdown: Arc<AtomicBool>) {
        let period = self.settings.block_period();
        let idle = Duration::from_millis(1);
        let mut next_block = Instant::now();

        while !shutdown.load(Ordering::Relaxed) {
            self.drain_device_commands();

            let now = Instant::now();
            let due = match self.output.free_frames() {
                Some(free) => free >= self.settings.block_size,
                None => now >= next_block,
            };

            if due {
                self.render_block();
                next_block += period;
                if now.saturating_duration_since(next_block) > period * MAX_LAG_BLOCKS {
                    log::warn!("[RUNTIME] fell behind the block clock, resyncing");
                    next_block = now + period;
                }
            } else {
                self.host.poll();
                let wait = next_block.saturating_duration_since(now).min(idle);
                thread::sleep(if wait.is_zero() { idle } else { wait });
            }
        }
    }

    fn drain_device_commands(&mut self) {
        while let Ok(cmd) = self.device_rx.try_recv() {
            match cmd {
                DeviceCommand::SetInput(input) => {
                    log::info!("[RUNTIME] input {}", if input.is_some() { "attached" } else { "detached" });
                    self.input = input.unwrap_or_else(|| Box::new(SilentInput));
                    if let Some(rate) = self.input.sample_rate() {
                        if rate as f64 != self.transport.sample_rate {
                            log::warn!(
                                "[RUNTIME] input runs at {} Hz, blocks are rendered at {} Hz",
                                rate,
                                self.transport.sample_rate
                            );
                        }
                    }
                }
                DeviceCommand::SetOutput(output) => {
                    log::info!("[RUNTIME] output {}", if output.is_some() { "attached" } else { "detached" });
                    let mut old = std::mem::replace(
                        &mut self.output,
                        output.unwrap_or_else(|| Box::new(NullOutput)),
                    );
                    if let Err(e) = old.finish() {
                        log::warn!("[RUNTIME] closing previous output: {}", e);
                    }
                    self.output_failed = false;
                    self.follow_output_rate();
                }
            }
        }
    }

    /// Scripts see the rate the output really plays at.
    fn follow_output_rate(&mut self) {
        let rate = self
            .output
            .sample_rate()
            .unwrap_or(self.settings.sample_rate) as f64;
        if rate != self.transport.sample_rate {
            log::warn!(
                "[RUNTIME] transport rate {} Hz -> {} Hz to match the output",
                self.transport.sample_rate,
                rate
            );
            self.transport.sample_rate = rate;
        }
    }

    fn render_block(&mut self) {
        self.input.read_block(&mut self.input_block);
        self.host
            .process(&self.input_block, &mut self.output_block, self.transport);
        self.transport.advance(self.settings.block_size);

        if let Err(e) = self.output.write_block(&self.output_block) {
            if !self.output_failed {
                log::error!("[RUNTIME] output write failed: {}", e);
                self.output_failed = true;
            }
        }
        self.blocks.fetch_add(1, Ordering::Relaxed);
    }

    fn finish(&mut self) {
        if let Err(e) = self.output.finish() {
            log::warn!("[RUNTIME] closing output: {}", e);
        }
        log::info!(
            "[RUNTIME] stopped after {} blocks",
            self.blocks.load(Ordering::Relaxed)
        );
    }
}
