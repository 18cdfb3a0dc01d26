//! Control-side session object.
//!
//! The orchestrator is the only thing the control surface talks to. It
//! evaluates builds, forwards note and draw traffic to the host, keeps the
//! latest shape list and a mirror of the host's save blob, persists both
//! the source text and save data, and owns the device wiring.
//!
//! For a threaded session hand the [`ScriptHost`] from [`Orchestrator::session`]
//! to a [`HostRuntime`](crate::runtime::HostRuntime) and attach its handle.
//! Tests and offline rendering drive the host directly on the same thread.

use crate::api::{Pointer, PointerEvent};
use crate::build::{BuildOutcome, ScriptBuilder};
use crate::channel::{channel, ControlEndpoint, HostEvent, HostMessage, NoteSender};
use crate::config::Config;
use crate::devices::{AudioInput, AudioOutput, MidiInput};
use crate::error::{Error, Result};
use crate::host::ScriptHost;
use crate::keyboard::{RawMidi, VirtualKeyboard};
use crate::midi::NoteEvent;
use crate::reload::ReloadDebouncer;
use crate::runtime::{HostRuntime, RuntimeHandle};
use crate::save::SaveBlob;
use crate::shape::Shape;
use crate::storage::{Storage, CODE_KEY, SAVE_KEY};
use std::time::Instant;

pub struct Orchestrator {
    config: Config,
    builder: ScriptBuilder,
    control: ControlEndpoint,
    storage: Box<dyn Storage>,
    save_mirror: SaveBlob,
    shapes: Vec<Shape>,
    draws_received: u64,
    pointer: Pointer,
    keyboard: VirtualKeyboard,
    code: Option<String>,
    debouncer: ReloadDebouncer,
    runtime: Option<RuntimeHandle>,
    midi: Option<Box<dyn MidiInput>>,
}

impl Orchestrator {
    pub fn new(config: Config, control: ControlEndpoint, storage: Box<dyn Storage>) -> Self {
        Self {
            builder: ScriptBuilder::new(&config.engine),
            debouncer: ReloadDebouncer::new(config.session.reload_debounce()),
            config,
            control,
            storage,
            save_mirror: SaveBlob::Empty,
            shapes: Vec::new(),
            draws_received: 0,
            pointer: Pointer::default(),
            keyboard: VirtualKeyboard::new(),
            code: None,
            runtime: None,
            midi: None,
        }
    }

    /// Create a connected orchestrator and host, seeding both with the
    /// save blob found in `storage`.
    pub fn session(config: Config, storage: Box<dyn Storage>) -> (Self, ScriptHost) {
        let (control, endpoint) = channel();
        let mut orchestrator = Self::new(config, control, storage);
        orchestrator.save_mirror = orchestrator.stored_blob();
        let host = ScriptHost::with_blob(
            endpoint,
            &orchestrator.config.engine,
            orchestrator.save_mirror.clone(),
        );
        (orchestrator, host)
    }

    fn stored_blob(&self) -> SaveBlob {
        match self.storage.load(SAVE_KEY) {
            Ok(Some(json)) => SaveBlob::from_json(&json).unwrap_or_else(|e| {
                log::warn!("[SESSION] ignoring unreadable save data: {}", e);
                SaveBlob::Empty
            }),
            Ok(None) => SaveBlob::Empty,
            Err(e) => {
                log::warn!("[SESSION] could not read save data: {}", e);
                SaveBlob::Empty
            }
        }
    }

    /// Reload the save mirror from storage and return the source text from
    /// the previous session, if any.
    pub fn restore(&mut self) -> Result<Option<String>> {
        self.save_mirror = self.stored_blob();
        self.storage.load(CODE_KEY)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // === Builds ===

    /// Evaluate `code` and hand the result to the host.
    ///
    /// Script errors are reported in the outcome, not as `Err`.
    pub fn build(&mut self, code: &str) -> Result<BuildOutcome> {
        self.pump()?;

        let generation = self.builder.build(code, self.save_mirror.clone());
        let outcome = generation.outcome.clone();
        if let Some(saved) = generation.api.build_save() {
            self.save_mirror = saved;
        }

        self.control.send(HostMessage::Build {
            code: code.to_string(),
            generation: Box::new(generation),
        })?;

        self.code = Some(code.to_string());
        if let Err(e) = self.storage.store(CODE_KEY, code) {
            log::warn!("[SESSION] could not persist source: {}", e);
        }
        Ok(outcome)
    }

    /// Rebuild the current source, if there is one.
    pub fn rebuild(&mut self) -> Result<Option<BuildOutcome>> {
        match self.code.clone() {
            Some(code) => self.build(&code).map(Some),
            None => Ok(None),
        }
    }

    /// Record an edit; it is built once edits stop for the debounce period.
    pub fn edit(&mut self, code: String, now: Instant) {
        self.debouncer.submit(code, now);
    }

    /// Periodic work: drain host events and fire a due debounced build.
    pub fn tick(&mut self, now: Instant) -> Result<Option<BuildOutcome>> {
        self.pump()?;
        match self.debouncer.poll(now) {
            Some(code) => self.build(&code).map(Some),
            None => Ok(None),
        }
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    // === Host events ===

    /// Drain host events. Returns how many were handled.
    pub fn pump(&mut self) -> Result<usize> {
        let mut handled = 0;
        while let Some(event) = self.control.try_recv()? {
            match event {
                HostEvent::Draw { shapes } => {
                    self.shapes = shapes;
                    self.draws_received += 1;
                }
                HostEvent::Save { data } => self.persist(data),
            }
            handled += 1;
        }
        Ok(handled)
    }

    fn persist(&mut self, data: SaveBlob) {
        match data.to_json() {
            Ok(json) => {
                if let Err(e) = self.storage.store(SAVE_KEY, &json) {
                    log::warn!("[SESSION] could not persist save data: {}", e);
                }
            }
            Err(e) => log::warn!("[SESSION] could not encode save data: {}", e),
        }
        self.save_mirror = data;
    }

    /// Latest shapes received from the host.
    pub fn shapes(&self) -> &[Shape] {
        &self.shapes
    }

    pub fn draws_received(&self) -> u64 {
        self.draws_received
    }

    pub fn save_blob(&self) -> &SaveBlob {
        &self.save_mirror
    }

    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    // === Drawing and pointer ===

    /// Ask the host for a frame at the given size.
    pub fn draw(&self, width: u32, height: u32) -> Result<()> {
        self.control.draw(width, height, self.pointer)
    }

    pub fn pointer(&mut self, event: PointerEvent, x: f32, y: f32) {
        self.pointer.apply(event, x, y);
    }

    pub fn pointer_state(&self) -> Pointer {
        self.pointer
    }

    // === MIDI ===

    pub fn note(&self, event: NoteEvent) -> Result<()> {
        self.control.send(HostMessage::Midi(event))
    }

    /// Forward a raw 3-byte message. Non-note messages are ignored.
    pub fn midi_bytes(&self, bytes: &[u8]) -> Result<bool> {
        self.note_sender().send_bytes(bytes, 0)
    }

    /// Forward a 7-byte timing-prefixed packet.
    pub fn midi_packet(&self, packet: &[u8]) -> Result<bool> {
        match NoteEvent::from_packet(packet) {
            Some(event) => self.note(event).map(|_| true),
            None => Ok(false),
        }
    }

    pub fn note_sender(&self) -> NoteSender {
        self.control.note_sender()
    }

    pub fn keyboard(&self) -> &VirtualKeyboard {
        &self.keyboard
    }

    pub fn key_down(&mut self, index: usize) -> Result<()> {
        let msg = self.keyboard.key_down(index);
        self.send_raw(msg.into_iter())
    }

    pub fn key_up(&mut self, index: usize) -> Result<()> {
        let msg = self.keyboard.key_up(index);
        self.send_raw(msg.into_iter())
    }

    pub fn octave_up(&mut self) -> Result<()> {
        let released = self.keyboard.octave_up();
        self.send_raw(released.into_iter())
    }

    pub fn octave_down(&mut self) -> Result<()> {
        let released = self.keyboard.octave_down();
        self.send_raw(released.into_iter())
    }

    fn send_raw(&self, messages: impl Iterator<Item = RawMidi>) -> Result<()> {
        for msg in messages {
            self.midi_bytes(&msg)?;
        }
        Ok(())
    }

    // === Devices ===

    pub fn attach_runtime(&mut self, runtime: RuntimeHandle) {
        self.runtime = Some(runtime);
    }

    fn runtime(&self) -> Result<&RuntimeHandle> {
        self.runtime
            .as_ref()
            .ok_or_else(|| Error::Device("no processing runtime attached".to_string()))
    }

    /// Swap the audio input, then rebuild the current script.
    pub fn set_input(&mut self, input: Option<Box<dyn AudioInput>>) -> Result<()> {
        self.runtime()?.set_input(input)?;
        self.rebuild().map(|_| ())
    }

    /// Swap the audio output, then rebuild the current script.
    pub fn set_output(&mut self, output: Option<Box<dyn AudioOutput>>) -> Result<()> {
        self.runtime()?.set_output(output)?;
        self.rebuild().map(|_| ())
    }

    /// Swap the MIDI input, then rebuild the current script.
    pub fn set_midi(&mut self, midi: Option<Box<dyn MidiInput>>) -> Result<()> {
        if let Some(old) = self.midi.take() {
            log::info!("[SESSION] closing MIDI input '{}'", old.name());
        }
        if let Some(new) = &midi {
            log::info!("[SESSION] MIDI input '{}'", new.name());
        }
        self.midi = midi;
        self.rebuild().map(|_| ())
    }

    pub fn midi_input_name(&self) -> Option<&str> {
        self.midi.as_deref().map(|m| m.name())
    }

    /// Tear the session down: release held keys, close devices, stop and
    /// join the runtime, then persist the save events it left behind.
    ///
    /// Returns the host once the processing thread has exited.
    pub fn shutdown(mut self, runtime: Option<HostRuntime>) -> Result<Option<ScriptHost>> {
        let released = self.keyboard.release_all();
        if let Err(e) = self.send_raw(released.into_iter()) {
            log::debug!("[SESSION] host already gone: {}", e);
        }
        self.midi = None;
        if let Some(handle) = self.runtime.take() {
            handle.shutdown();
        }
        let host = runtime.and_then(HostRuntime::shutdown);
        match self.pump() {
            Ok(_) | Err(Error::ChannelClosed) => Ok(host),
            Err(e) => Err(e),
        }
    }
}
