//! The `ps88` object injected into every script.
//!
//! It has exactly four operations:
//!
//! ```rhai
//! ps88.audio(|ctx| { ... });   // per-block audio callback
//! ps88.gui(|ctx| { ... });     // per-draw callback
//! ps88.save(data);             // blob, string or ()
//! let data = ps88.load();
//! ```
//!
//! A fresh instance is created for every build. While the build evaluates,
//! saves are recorded locally; once the host commits the build the instance
//! is bound to the host's event channel and later saves are reported as
//! they happen.

use crate::channel::HostEvent;
use crate::save::SaveBlob;
use crossbeam_channel::Sender;
use rhai::{Dynamic, Engine, EvalAltResult, FnPtr, Position};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Callbacks captured from a script.
#[derive(Debug, Clone, Default)]
pub struct Callbacks {
    pub audio: Option<FnPtr>,
    pub gui: Option<FnPtr>,
}

impl Callbacks {
    pub fn is_empty(&self) -> bool {
        self.audio.is_none() && self.gui.is_none()
    }
}

#[derive(Debug, Default)]
struct CapabilityState {
    callbacks: Callbacks,
    blob: SaveBlob,
    /// A save happened before the instance was bound to a host.
    saved_unbound: bool,
    /// Callbacks changed after binding; the host picks them up between blocks.
    rebound: bool,
    events: Option<Sender<HostEvent>>,
}

/// Script handle for the capability API.
#[derive(Debug, Clone)]
pub struct Ps88 {
    state: Arc<Mutex<CapabilityState>>,
}

impl Ps88 {
    /// Create an unbound instance seeded with the current save blob.
    pub fn new(blob: SaveBlob) -> Self {
        Self {
            state: Arc::new(Mutex::new(CapabilityState {
                blob,
                ..CapabilityState::default()
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CapabilityState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // === Script-facing operations ===

    /// `ps88.audio(callback)`
    pub fn register_audio(&mut self, callback: Dynamic) -> Result<(), Box<EvalAltResult>> {
        let callback = callable(callback);
        let mut state = self.lock();
        state.callbacks.audio = callback.as_ref().ok().cloned();
        state.rebound = state.events.is_some();
        callback.map(|_| ())
    }

    /// `ps88.gui(callback)`
    pub fn register_gui(&mut self, callback: Dynamic) -> Result<(), Box<EvalAltResult>> {
        let callback = callable(callback);
        let mut state = self.lock();
        state.callbacks.gui = callback.as_ref().ok().cloned();
        state.rebound = state.events.is_some();
        callback.map(|_| ())
    }

    /// `ps88.save(data)`
    pub fn save(&mut self, data: Dynamic) -> Result<(), Box<EvalAltResult>> {
        let blob = SaveBlob::from_dynamic(data)?;
        let mut state = self.lock();
        state.blob = blob;
        match &state.events {
            Some(events) => {
                let event = HostEvent::Save {
                    data: state.blob.clone(),
                };
                if events.send(event).is_err() {
                    log::warn!("[HOST] save dropped, control side is gone");
                }
            }
            None => state.saved_unbound = true,
        }
        Ok(())
    }

    /// `ps88.load()`
    pub fn load(&mut self) -> Dynamic {
        self.lock().blob.to_dynamic()
    }

    // === Host-facing operations ===

    pub fn callbacks(&self) -> Callbacks {
        self.lock().callbacks.clone()
    }

    pub fn blob(&self) -> SaveBlob {
        self.lock().blob.clone()
    }

    /// The blob saved during build evaluation, if any.
    pub fn build_save(&self) -> Option<SaveBlob> {
        let state = self.lock();
        state.saved_unbound.then(|| state.blob.clone())
    }

    /// Attach to the host. `blob` replaces the current value unless the
    /// build saved its own.
    pub fn bind(&self, blob: SaveBlob, events: Sender<HostEvent>) {
        let mut state = self.lock();
        if !state.saved_unbound {
            state.blob = blob;
        }
        state.saved_unbound = false;
        state.rebound = false;
        state.events = Some(events);
    }

    /// Callbacks registered since binding or the last call.
    pub fn take_rebound(&self) -> Option<Callbacks> {
        let mut state = self.lock();
        if !state.rebound {
            return None;
        }
        state.rebound = false;
        Some(state.callbacks.clone())
    }

    pub fn clear_callbacks(&self) {
        let mut state = self.lock();
        state.callbacks = Callbacks::default();
        state.rebound = false;
    }
}

fn callable(value: Dynamic) -> Result<FnPtr, Box<EvalAltResult>> {
    let actual = value.type_name().to_string();
    value.try_cast::<FnPtr>().ok_or_else(|| {
        Box::new(EvalAltResult::ErrorMismatchDataType(
            "Fn".to_string(),
            actual,
            Position::NONE,
        ))
    })
}

pub(crate) fn register(engine: &mut Engine) {
    engine.register_type_with_name::<Ps88>("Ps88");
    engine.register_fn("audio", Ps88::register_audio);
    engine.register_fn("gui", Ps88::register_gui);
    engine.register_fn("save", Ps88::save);
    engine.register_fn("load", Ps88::load);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rhai::Scope;

    fn run(script: &str, api: &Ps88) -> Result<(), Box<EvalAltResult>> {
        let mut engine = Engine::new();
        register(&mut engine);
        let mut scope = Scope::new();
        scope.push("ps88", api.clone());
        engine.run_with_scope(&mut scope, script)
    }

    #[test]
    fn test_registers_callbacks() {
        let api = Ps88::new(SaveBlob::Empty);
        run("ps88.audio(|ctx| {}); ps88.gui(|ctx| {});", &api).unwrap();
        let callbacks = api.callbacks();
        assert!(callbacks.audio.is_some());
        assert!(callbacks.gui.is_some());
    }

    #[test]
    fn test_non_callable_discards_previous_registration() {
        let api = Ps88::new(SaveBlob::Empty);
        let err = run("ps88.audio(|ctx| {}); ps88.audio(42);", &api).unwrap_err();
        assert!(matches!(*err, EvalAltResult::ErrorMismatchDataType(..)));
        assert!(api.callbacks().audio.is_none());
    }

    #[test]
    fn test_later_registration_wins() {
        let api = Ps88::new(SaveBlob::Empty);
        run(
            "fn first(ctx) {} fn second(ctx) {} ps88.gui(Fn(\"first\")); ps88.gui(Fn(\"second\"));",
            &api,
        )
        .unwrap();
        assert_eq!(api.callbacks().gui.unwrap().fn_name(), "second");
    }

    #[test]
    fn test_save_before_bind_is_recorded() {
        let api = Ps88::new(SaveBlob::Text("old".into()));
        run("ps88.save(\"new\");", &api).unwrap();
        assert_eq!(api.build_save(), Some(SaveBlob::Text("new".into())));

        let (tx, rx) = crossbeam_channel::unbounded();
        api.bind(SaveBlob::Text("host".into()), tx);
        assert_eq!(api.blob(), SaveBlob::Text("new".into()));
        assert!(api.build_save().is_none());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_save_after_bind_emits_event() {
        let api = Ps88::new(SaveBlob::Empty);
        let (tx, rx) = crossbeam_channel::unbounded();
        api.bind(SaveBlob::Text("host".into()), tx);
        assert_eq!(api.blob(), SaveBlob::Text("host".into()));

        run("ps88.save(());", &api).unwrap();
        match rx.try_recv().unwrap() {
            HostEvent::Save { data } => assert!(data.is_empty()),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_save_rejects_wrong_type_and_keeps_blob() {
        let api = Ps88::new(SaveBlob::Text("keep".into()));
        assert!(run("ps88.save(3.5);", &api).is_err());
        assert_eq!(api.blob(), SaveBlob::Text("keep".into()));
    }

    #[test]
    fn test_load_returns_current_blob() {
        let api = Ps88::new(SaveBlob::Bytes(vec![1, 2, 3]));
        run(
            "let b = ps88.load(); if b.len() != 3 || b[2] != 3 { throw \"bad\"; }",
            &api,
        )
        .unwrap();
    }

    #[test]
    fn test_registration_after_bind_is_reported() {
        let api = Ps88::new(SaveBlob::Empty);
        let (tx, _rx) = crossbeam_channel::unbounded();
        api.bind(SaveBlob::Empty, tx);
        assert!(api.take_rebound().is_none());

        run("ps88.audio(|ctx| {});", &api).unwrap();
        let callbacks = api.take_rebound().unwrap();
        assert!(callbacks.audio.is_some());
        assert!(api.take_rebound().is_none());
    }
}
