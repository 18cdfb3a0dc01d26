//! ps88 Core - a hot-reloaded script host for audio, MIDI and drawing.
//!
//! A Rhai script registers up to two callbacks through the `ps88` global:
//! an audio callback that fills one block of planar samples, and a gui
//! callback that emits shapes for a 2-D surface. The source can be replaced
//! at any time; the host keeps running across broken builds and failing
//! callbacks.
//!
//! - **API** - the Rhai surface (`ps88`, audio and draw contexts)
//! - **Build** - evaluating source into a committable generation
//! - **Host** - the processing side: blocks, draws and MIDI
//! - **Channel** - the message protocol between control and host
//! - **Orchestrator** - the control side: builds, persistence, devices
//! - **Runtime** - the processing thread
//!
//! # Architecture
//!
//! Builds are evaluated on the control side by [`ScriptBuilder`] and the
//! resulting [`Generation`] is moved to the [`ScriptHost`], which swaps it
//! in atomically between blocks. All traffic between the two sides flows
//! through [`HostMessage`] and [`HostEvent`].
//!
//! # Feature Flags
//!
//! - `native` - cpal audio devices and midir MIDI input

pub mod api;
pub mod build;
pub mod channel;
pub mod config;
pub mod devices;
pub mod error;
pub mod host;
pub mod keyboard;
pub mod midi;
pub mod orchestrator;
pub mod reload;
pub mod runtime;
pub mod save;
pub mod shape;
pub mod storage;

#[cfg(feature = "native")]
pub mod native;

pub use build::{BuildOutcome, Generation, ScriptBuilder};
pub use channel::{channel, ControlEndpoint, HostEndpoint, HostEvent, HostMessage, NoteSender};
pub use config::{AudioSettings, Config, EngineSettings, SessionSettings};
pub use devices::{AudioInput, AudioOutput, MidiInput, NullOutput, SilentInput, WavInput, WavOutput};
pub use error::{CallbackKind, Error, Result, ScriptDiagnostic, ScriptFault, ShapeError};
pub use host::{HostState, ScriptHost};
pub use keyboard::VirtualKeyboard;
pub use midi::{NoteEvent, NoteKind};
pub use orchestrator::Orchestrator;
pub use reload::{ReloadDebouncer, SourceWatcher};
pub use runtime::{DeviceCommand, HostRuntime, RuntimeHandle};
pub use save::SaveBlob;
pub use shape::{Color, Shape};
pub use storage::{FileStorage, MemoryStorage, Storage};

#[cfg(feature = "native")]
pub use native::{list_devices, CpalInput, CpalOutput, DeviceList, MidirInput};
