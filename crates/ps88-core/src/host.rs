//! The script host: the single-threaded owner of the live registration.
//!
//! The host lives on the processing side. Each call to
//! [`ScriptHost::process`] first drains the inbox (builds, draw requests,
//! note events) and then renders one block. Every callback invocation is
//! wrapped so that an error or panic in user code disables the script and
//! leaves the block as a plain input-to-output copy.

use crate::api::{AudioContextBuilder, Callbacks, DrawContext, DrawRequest, Ps88, Transport};
use crate::build::{BuildOutcome, Generation};
use crate::channel::{HostEndpoint, HostEvent, HostMessage};
use crate::config::EngineSettings;
use crate::error::{CallbackKind, ScriptDiagnostic, ScriptFault};
use crate::midi::NoteEvent;
use crate::save::SaveBlob;
use crate::shape::Shape;
use rhai::{Dynamic, Engine, FnPtr, FuncArgs, AST};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Coarse host state. Building happens on the control side and faults
/// resolve immediately to `Empty`, so only these two are observable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    Empty,
    Ready,
}

pub struct ScriptHost {
    endpoint: HostEndpoint,
    engine: Arc<Engine>,
    ast: Arc<AST>,
    callbacks: Callbacks,
    api: Ps88,
    generation: u64,
    pending_midi: Vec<NoteEvent>,
    block_midi: Vec<NoteEvent>,
    max_pending_midi: usize,
    audio_ctx: AudioContextBuilder,
    last_fault: Option<ScriptFault>,
    control_gone: bool,
}

impl ScriptHost {
    pub fn new(endpoint: HostEndpoint, settings: &EngineSettings) -> Self {
        Self::with_blob(endpoint, settings, SaveBlob::Empty)
    }

    /// Start with a previously persisted save blob.
    pub fn with_blob(endpoint: HostEndpoint, settings: &EngineSettings, blob: SaveBlob) -> Self {
        let api = Ps88::new(SaveBlob::Empty);
        api.bind(blob, endpoint.event_sender());
        Self {
            endpoint,
            engine: Arc::new(Engine::new_raw()),
            ast: Arc::new(AST::empty()),
            callbacks: Callbacks::default(),
            api,
            generation: 0,
            pending_midi: Vec::with_capacity(settings.max_pending_midi),
            block_midi: Vec::with_capacity(settings.max_pending_midi),
            max_pending_midi: settings.max_pending_midi,
            audio_ctx: AudioContextBuilder::new(),
            last_fault: None,
            control_gone: false,
        }
    }

    pub fn state(&self) -> HostState {
        if self.callbacks.is_empty() {
            HostState::Empty
        } else {
            HostState::Ready
        }
    }

    pub fn callbacks(&self) -> &Callbacks {
        &self.callbacks
    }

    /// Id of the last committed generation (0 before the first build).
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn save_blob(&self) -> SaveBlob {
        self.api.blob()
    }

    pub fn pending_midi(&self) -> usize {
        self.pending_midi.len()
    }

    pub fn last_fault(&self) -> Option<&ScriptFault> {
        self.last_fault.as_ref()
    }

    /// Process every queued message without rendering audio.
    ///
    /// Returns the number of messages handled.
    pub fn poll(&mut self) -> usize {
        let mut handled = 0;
        while let Some(msg) = self.endpoint.try_recv() {
            self.handle(msg);
            handled += 1;
        }
        handled
    }

    fn handle(&mut self, msg: HostMessage) {
        match msg {
            HostMessage::Build { code, generation } => self.commit(&code, *generation),
            HostMessage::Draw(request) => {
                let shapes = self.draw(&request);
                self.emit(HostEvent::Draw { shapes });
            }
            HostMessage::Midi(event) => {
                if self.pending_midi.len() < self.max_pending_midi {
                    self.pending_midi.push(event);
                } else {
                    log::warn!(
                        "[HOST] pending MIDI queue full ({}), dropping {:?}",
                        self.max_pending_midi,
                        event
                    );
                }
            }
        }
    }

    fn commit(&mut self, code: &str, generation: Generation) {
        let Generation {
            id,
            engine,
            ast,
            callbacks,
            api,
            outcome,
        } = generation;

        let build_save = api.build_save();
        api.bind(self.api.blob(), self.endpoint.event_sender());

        self.engine = engine;
        self.ast = ast;
        self.callbacks = callbacks;
        self.api = api;
        self.generation = id;

        match outcome {
            BuildOutcome::Ready { .. } => {
                log::info!(
                    "[HOST] committed generation {} ({} bytes of source)",
                    id,
                    code.len()
                );
            }
            BuildOutcome::Failed(diag) => {
                log::warn!("[HOST] generation {} has no callbacks, passing audio through", id);
                self.last_fault = Some(ScriptFault::BuildFailure(diag));
            }
        }

        if let Some(data) = build_save {
            self.emit(HostEvent::Save { data });
        }
    }

    /// Run the gui callback for one frame.
    pub fn draw(&mut self, request: &DrawRequest) -> Vec<Shape> {
        let Some(callback) = self.callbacks.gui.clone() else {
            return Vec::new();
        };

        let ctx = DrawContext::new(request);
        match self.invoke(CallbackKind::Gui, &callback, (ctx.clone(),)) {
            Ok(()) => {
                self.pick_up_rebound();
                ctx.take_shapes()
            }
            Err(fault) => {
                self.fault(fault);
                Vec::new()
            }
        }
    }

    /// Render one block.
    ///
    /// `output` channels are first filled from the same-index `input`
    /// channels (or silence). If an audio callback is registered it then
    /// sees and may overwrite those samples.
    pub fn process(&mut self, input: &[Vec<f32>], output: &mut [Vec<f32>], transport: Transport) {
        self.poll();

        for (ch, out) in output.iter_mut().enumerate() {
            match input.get(ch) {
                Some(src) => {
                    let n = src.len().min(out.len());
                    out[..n].copy_from_slice(&src[..n]);
                    out[n..].fill(0.0);
                }
                None => out.fill(0.0),
            }
        }

        self.block_midi.clear();
        std::mem::swap(&mut self.pending_midi, &mut self.block_midi);

        let Some(callback) = self.callbacks.audio.clone() else {
            return;
        };

        let ctx = self.audio_ctx.prepare(output, &self.block_midi, transport);
        match self.invoke(CallbackKind::Audio, &callback, (ctx,)) {
            Ok(()) => {
                self.audio_ctx.write_back(output);
                self.pick_up_rebound();
            }
            Err(fault) => self.fault(fault),
        }
    }

    fn invoke(&self, kind: CallbackKind, callback: &FnPtr, args: impl FuncArgs) -> Result<(), ScriptFault> {
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            callback.call::<Dynamic>(&self.engine, &self.ast, args)
        }));
        match result {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => Err(ScriptFault::CallbackFault {
                kind,
                diagnostic: ScriptDiagnostic::from_rhai_runtime(&err),
            }),
            Err(payload) => Err(ScriptFault::CallbackFault {
                kind,
                diagnostic: ScriptDiagnostic::from_panic(payload.as_ref()),
            }),
        }
    }

    fn fault(&mut self, fault: ScriptFault) {
        log::error!("[HOST] {}; script disabled until the next build", fault);
        self.callbacks = Callbacks::default();
        self.api.clear_callbacks();
        self.last_fault = Some(fault);
    }

    fn pick_up_rebound(&mut self) {
        if let Some(callbacks) = self.api.take_rebound() {
            log::info!(
                "[HOST] callbacks re-registered at runtime (audio: {}, gui: {})",
                callbacks.audio.is_some(),
                callbacks.gui.is_some()
            );
            self.callbacks = callbacks;
        }
    }

    fn emit(&mut self, event: HostEvent) {
        if !self.endpoint.emit(event) && !self.control_gone {
            log::warn!("[HOST] control side disconnected, dropping events");
            self.control_gone = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::ScriptBuilder;
    use crate::channel::{channel, ControlEndpoint};
    use crate::midi::NoteEvent;

    struct Rig {
        control: ControlEndpoint,
        host: ScriptHost,
        builder: ScriptBuilder,
    }

    impl Rig {
        fn new() -> Self {
            let (control, endpoint) = channel();
            let settings = EngineSettings::default();
            Self {
                control,
                host: ScriptHost::new(endpoint, &settings),
                builder: ScriptBuilder::new(&settings),
            }
        }

        fn build(&mut self, code: &str) {
            let generation = self.builder.build(code, self.host.save_blob());
            self.control
                .send(HostMessage::Build {
                    code: code.to_string(),
                    generation: Box::new(generation),
                })
                .unwrap();
        }

        fn block(&mut self, input: &[Vec<f32>], channels: usize, len: usize) -> Vec<Vec<f32>> {
            let mut output = vec![vec![9.0; len]; channels];
            self.host.process(input, &mut output, Transport::default());
            output
        }

        fn events(&self) -> Vec<HostEvent> {
            let mut events = Vec::new();
            while let Some(event) = self.control.try_recv().unwrap() {
                events.push(event);
            }
            events
        }
    }

    #[test]
    fn test_empty_host_passes_input_through() {
        let mut rig = Rig::new();
        let input = vec![vec![0.1, 0.2, 0.3], vec![0.4]];
        let output = rig.block(&input, 3, 3);
        assert_eq!(output[0], vec![0.1, 0.2, 0.3]);
        assert_eq!(output[1], vec![0.4, 0.0, 0.0]);
        assert_eq!(output[2], vec![0.0, 0.0, 0.0]);
        assert_eq!(rig.host.state(), HostState::Empty);
    }

    #[test]
    fn test_constant_audio_on_both_channels() {
        let mut rig = Rig::new();
        rig.build(
            "ps88.audio(|ctx| {
                 let n = ctx.audio[0].len();
                 for i in 0..n { ctx.audio[0][i] = 0.5; }
                 for i in 0..n { ctx.audio[1][i] = ctx.audio[0][i]; }
             });",
        );
        let silence = vec![vec![0.0; 128]; 2];
        let mut output = vec![vec![0.0; 128]; 2];
        rig.host.process(&silence, &mut output, Transport::new(48_000.0, 120.0));
        assert_eq!(rig.host.state(), HostState::Ready);
        assert!(output.iter().all(|ch| ch.len() == 128 && ch.iter().all(|&s| s == 0.5)));
    }

    #[test]
    fn test_gui_only_registration_is_passthrough() {
        let mut rig = Rig::new();
        rig.build("ps88.gui(|ctx| { ctx.add_text(\"hi\", 0, 0); });");
        let input = vec![vec![0.25; 16], vec![-0.25; 16]];
        let output = rig.block(&input, 2, 16);
        assert_eq!(output, input);

        let silent = rig.block(&[], 2, 16);
        assert!(silent.iter().flatten().all(|&s| s == 0.0));
    }

    #[test]
    fn test_audio_fault_unregisters_and_passes_through() {
        let mut rig = Rig::new();
        rig.build(
            "ps88.gui(|ctx| {});
             ps88.audio(|ctx| { ctx.audio[0][0] = 1.0; throw \"boom\"; });",
        );
        let input = vec![vec![0.3; 8]];
        let faulted = rig.block(&input, 1, 8);
        assert_eq!(faulted, input);
        assert_eq!(rig.host.state(), HostState::Empty);
        assert!(matches!(
            rig.host.last_fault(),
            Some(ScriptFault::CallbackFault {
                kind: CallbackKind::Audio,
                ..
            })
        ));

        let next = rig.block(&input, 1, 8);
        assert_eq!(next, input);
    }

    #[test]
    fn test_callback_fault_keeps_location() {
        let mut rig = Rig::new();
        rig.build("ps88.audio(|ctx| {\n    throw \"boom\";\n});");
        rig.block(&[], 1, 4);
        match rig.host.last_fault() {
            Some(ScriptFault::CallbackFault { diagnostic, .. }) => {
                assert_eq!(diagnostic.line, Some(2));
                assert!(diagnostic.column.is_some());
            }
            other => panic!("unexpected fault {:?}", other),
        }
    }

    #[test]
    fn test_gui_fault_clears_both_callbacks() {
        let mut rig = Rig::new();
        rig.build("ps88.audio(|ctx| {}); ps88.gui(|ctx| { undefined_fn(); });");
        rig.host.poll();
        let request = DrawRequest {
            width: 10,
            height: 10,
            pointer: Default::default(),
        };
        assert!(rig.host.draw(&request).is_empty());
        assert_eq!(rig.host.state(), HostState::Empty);
    }

    #[test]
    fn test_failed_build_clears_previous_registration() {
        let mut rig = Rig::new();
        rig.build("ps88.audio(|ctx| { ctx.audio[0].fill(1.0); });");
        rig.host.poll();
        assert_eq!(rig.host.state(), HostState::Ready);

        rig.build("ps88.audio(|ctx| {}); throw \"no\";");
        let input = vec![vec![0.5; 4]];
        assert_eq!(rig.block(&input, 1, 4), input);
        assert!(matches!(rig.host.last_fault(), Some(ScriptFault::BuildFailure(_))));
    }

    #[test]
    fn test_midi_is_drained_exactly_once() {
        let mut rig = Rig::new();
        rig.build(
            "ps88.audio(|ctx| {
                 let count = ctx.midi.len();
                 ctx.audio[0][0] = count;
                 if count > 0 { ctx.audio[0][1] = ctx.midi[0].note; }
             });",
        );
        let notes = rig.control.note_sender();
        notes.send(NoteEvent::note_on(0, 60, 1.0)).unwrap();
        notes.send(NoteEvent::note_off(0, 60, 0.0)).unwrap();
        notes.send(NoteEvent::note_on(0, 64, 0.5)).unwrap();

        let first = rig.block(&[], 1, 4);
        assert_eq!(first[0][0], 3.0);
        assert_eq!(first[0][1], 60.0);
        assert_eq!(rig.host.pending_midi(), 0);

        let second = rig.block(&[], 1, 4);
        assert_eq!(second[0][0], 0.0);
    }

    #[test]
    fn test_midi_without_audio_callback_is_discarded() {
        let mut rig = Rig::new();
        rig.control.note_sender().send(NoteEvent::note_on(0, 1, 1.0)).unwrap();
        rig.block(&[], 1, 4);
        rig.build("ps88.audio(|ctx| { ctx.audio[0][0] = ctx.midi.len(); });");
        assert_eq!(rig.block(&[], 1, 4)[0][0], 0.0);
    }

    #[test]
    fn test_pending_midi_is_bounded() {
        let (control, endpoint) = channel();
        let settings = EngineSettings {
            max_pending_midi: 2,
            ..EngineSettings::default()
        };
        let mut host = ScriptHost::new(endpoint, &settings);
        let notes = control.note_sender();
        for note in 0..5 {
            notes.send(NoteEvent::note_on(0, note, 1.0)).unwrap();
        }
        host.poll();
        assert_eq!(host.pending_midi(), 2);
    }

    #[test]
    fn test_draw_replies_with_shapes() {
        let mut rig = Rig::new();
        rig.build(
            "ps88.gui(|ctx| {
                 ctx.add_polygon([[0, 0], [ctx.width, 0], [ctx.width, ctx.height], [0, ctx.height]],
                                 #{ fill: 0xFFFFFFFF });
             });",
        );
        rig.control.draw(640, 480, Default::default()).unwrap();
        rig.host.poll();
        match rig.events().as_slice() {
            [HostEvent::Draw { shapes }] => {
                assert_eq!(shapes.len(), 1);
                assert!(matches!(&shapes[0], Shape::Polygon { points, .. } if points[2] == [640.0, 480.0]));
            }
            other => panic!("unexpected events {:?}", other),
        }
    }

    #[test]
    fn test_draw_without_gui_is_empty() {
        let mut rig = Rig::new();
        rig.control.draw(1, 1, Default::default()).unwrap();
        rig.host.poll();
        assert_eq!(rig.events(), vec![HostEvent::Draw { shapes: vec![] }]);
    }

    #[test]
    fn test_build_save_is_committed_and_reported() {
        let mut rig = Rig::new();
        rig.build("ps88.save(\"v1\");");
        rig.host.poll();
        assert_eq!(rig.host.save_blob(), SaveBlob::Text("v1".into()));
        assert_eq!(
            rig.events(),
            vec![HostEvent::Save {
                data: SaveBlob::Text("v1".into())
            }]
        );

        // A build that does not save keeps the host's blob.
        rig.build("let x = ps88.load(); if x != \"v1\" { throw \"lost\"; }");
        rig.host.poll();
        assert!(rig.host.last_fault().is_none());
        assert_eq!(rig.host.save_blob(), SaveBlob::Text("v1".into()));
        assert!(rig.events().is_empty());
    }

    #[test]
    fn test_callback_save_emits_immediately() {
        let mut rig = Rig::new();
        rig.build("let n = 0; ps88.audio(|ctx| { n += 1; ps88.save(`${n}`); });");
        rig.block(&[], 1, 1);
        rig.block(&[], 1, 1);
        assert_eq!(
            rig.events(),
            vec![
                HostEvent::Save {
                    data: SaveBlob::Text("1".into())
                },
                HostEvent::Save {
                    data: SaveBlob::Text("2".into())
                },
            ]
        );
    }

    #[test]
    fn test_named_function_receives_capability() {
        let mut rig = Rig::new();
        rig.build(
            "fn process(ctx, api) { api.save(\"named\"); ctx.audio[0][0] = 0.5; }
             ps88.audio(|ctx| process(ctx, ps88));",
        );
        let output = rig.block(&[], 1, 2);
        assert_eq!(output[0], vec![0.5, 0.0]);
        assert_eq!(
            rig.events(),
            vec![HostEvent::Save {
                data: SaveBlob::Text("named".into())
            }]
        );
    }

    #[test]
    fn test_callback_can_replace_itself() {
        let mut rig = Rig::new();
        rig.build(
            "ps88.audio(|ctx| {
                 ctx.audio[0][0] = 1.0;
                 ps88.audio(|ctx| { ctx.audio[0][0] = 2.0; });
             });",
        );
        assert_eq!(rig.block(&[], 1, 1)[0][0], 1.0);
        assert_eq!(rig.block(&[], 1, 1)[0][0], 2.0);
    }
}
