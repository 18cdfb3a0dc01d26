//! Audio block context handed to `audio` callbacks.
//!
//! ```rhai
//! ps88.audio(|ctx| {
//!     for i in 0..ctx.audio[0].len() {
//!         ctx.audio[0][i] = 0.5;
//!     }
//!     for ev in ctx.midi {
//!         if ev.is_note_on { print(`note ${ev.note}`); }
//!     }
//! });
//! ```
//!
//! Channel buffers are shared between the builder and the script. Samples
//! live in atomics so the host can read them back after the callback
//! without any locking.

use crate::midi::NoteEvent;
use rhai::{Array, Dynamic, Engine, EvalAltResult, Position, FLOAT, INT};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Transport values reported to scripts for one block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transport {
    pub sample_rate: f64,
    pub position_samples: u64,
    pub bpm: f64,
}

impl Transport {
    pub fn new(sample_rate: f64, bpm: f64) -> Self {
        Self {
            sample_rate,
            position_samples: 0,
            bpm,
        }
    }

    /// Move the playhead forward by one block.
    pub fn advance(&mut self, samples: usize) {
        self.position_samples = self.position_samples.saturating_add(samples as u64);
    }
}

impl Default for Transport {
    fn default() -> Self {
        Self::new(48_000.0, 120.0)
    }
}

/// One channel of samples, shared with scripts.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    samples: Arc<[AtomicU32]>,
}

impl SampleBuffer {
    pub fn new(len: usize) -> Self {
        Self {
            samples: (0..len).map(|_| AtomicU32::new(0.0_f32.to_bits())).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<f32> {
        self.samples
            .get(index)
            .map(|s| f32::from_bits(s.load(Ordering::Relaxed)))
    }

    pub fn set(&self, index: usize, value: f32) -> bool {
        match self.samples.get(index) {
            Some(slot) => {
                slot.store(value.to_bits(), Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Copy `source` in, zero-filling past its end.
    pub fn load_from(&self, source: &[f32]) {
        for (i, slot) in self.samples.iter().enumerate() {
            let value = source.get(i).copied().unwrap_or(0.0);
            slot.store(value.to_bits(), Ordering::Relaxed);
        }
    }

    pub fn store_into(&self, target: &mut [f32]) {
        for (slot, out) in self.samples.iter().zip(target.iter_mut()) {
            *out = f32::from_bits(slot.load(Ordering::Relaxed));
        }
    }

    fn slot(&self, index: INT) -> Result<&AtomicU32, Box<EvalAltResult>> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.samples.get(i))
            .ok_or_else(|| {
                Box::new(EvalAltResult::ErrorArrayBounds(
                    self.samples.len(),
                    index,
                    Position::NONE,
                ))
            })
    }

    fn script_get(&mut self, index: INT) -> Result<FLOAT, Box<EvalAltResult>> {
        let slot = self.slot(index)?;
        Ok(f32::from_bits(slot.load(Ordering::Relaxed)) as FLOAT)
    }

    fn script_set(&mut self, index: INT, value: FLOAT) -> Result<(), Box<EvalAltResult>> {
        self.slot(index)?
            .store((value as f32).to_bits(), Ordering::Relaxed);
        Ok(())
    }

    fn script_set_int(&mut self, index: INT, value: INT) -> Result<(), Box<EvalAltResult>> {
        self.script_set(index, value as FLOAT)
    }

    fn script_len(&mut self) -> INT {
        self.samples.len() as INT
    }

    fn script_fill(&mut self, value: FLOAT) {
        let bits = (value as f32).to_bits();
        for slot in self.samples.iter() {
            slot.store(bits, Ordering::Relaxed);
        }
    }

    fn script_to_array(&mut self) -> Array {
        self.samples
            .iter()
            .map(|s| Dynamic::from_float(f32::from_bits(s.load(Ordering::Relaxed)) as FLOAT))
            .collect()
    }
}

/// The `ctx` value passed to an audio callback.
#[derive(Debug, Clone)]
pub struct AudioContext {
    audio: Array,
    midi: Array,
    transport: Transport,
}

impl AudioContext {
    fn get_audio(&mut self) -> Array {
        self.audio.clone()
    }

    // The buffers themselves are shared; reassigning the list only changes
    // this context value.
    fn set_audio(&mut self, audio: Array) {
        self.audio = audio;
    }

    fn get_midi(&mut self) -> Array {
        self.midi.clone()
    }

    fn get_sample_rate(&mut self) -> FLOAT {
        self.transport.sample_rate
    }

    fn get_pos_samples(&mut self) -> INT {
        self.transport.position_samples as INT
    }

    fn get_bpm(&mut self) -> FLOAT {
        self.transport.bpm
    }
}

/// Builds [`AudioContext`]s, reusing channel buffers between blocks.
#[derive(Debug, Default)]
pub struct AudioContextBuilder {
    buffers: Vec<SampleBuffer>,
    audio: Array,
}

impl AudioContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `output` (already holding passthrough samples) into the
    /// shared buffers and wrap them with the block's events and transport.
    pub fn prepare(&mut self, output: &[Vec<f32>], events: &[NoteEvent], transport: Transport) -> AudioContext {
        let block_len = output.first().map(Vec::len).unwrap_or(0);
        let reshape = self.buffers.len() != output.len()
            || self.buffers.iter().any(|b| b.len() != block_len);
        if reshape {
            log::debug!(
                "[HOST] allocating {} channel buffers of {} samples",
                output.len(),
                block_len
            );
            self.buffers = (0..output.len()).map(|_| SampleBuffer::new(block_len)).collect();
            self.audio = self.buffers.iter().cloned().map(Dynamic::from).collect();
        }

        for (buffer, channel) in self.buffers.iter().zip(output) {
            buffer.load_from(channel);
        }

        AudioContext {
            audio: self.audio.clone(),
            midi: events.iter().copied().map(Dynamic::from).collect(),
            transport,
        }
    }

    /// Copy the script's samples back out.
    pub fn write_back(&self, output: &mut [Vec<f32>]) {
        for (buffer, channel) in self.buffers.iter().zip(output.iter_mut()) {
            buffer.store_into(channel);
        }
    }
}

pub(crate) fn register(engine: &mut Engine) {
    engine.register_type_with_name::<SampleBuffer>("SampleBuffer");
    engine.register_indexer_get(SampleBuffer::script_get);
    engine.register_indexer_set(SampleBuffer::script_set);
    engine.register_indexer_set(SampleBuffer::script_set_int);
    engine.register_fn("len", SampleBuffer::script_len);
    engine.register_get("len", SampleBuffer::script_len);
    engine.register_fn("fill", SampleBuffer::script_fill);
    engine.register_fn("fill", |buf: &mut SampleBuffer, value: INT| buf.script_fill(value as FLOAT));
    engine.register_fn("to_array", SampleBuffer::script_to_array);

    engine.register_type_with_name::<AudioContext>("AudioContext");
    engine.register_get_set("audio", AudioContext::get_audio, AudioContext::set_audio);
    engine.register_get("midi", AudioContext::get_midi);
    engine.register_get("sample_rate", AudioContext::get_sample_rate);
    engine.register_get("pos_samples", AudioContext::get_pos_samples);
    engine.register_get("bpm", AudioContext::get_bpm);

    engine.register_type_with_name::<NoteEvent>("NoteEvent");
    engine.register_get("kind", |ev: &mut NoteEvent| ev.kind.as_str().to_string());
    engine.register_get("is_note_on", |ev: &mut NoteEvent| ev.is_note_on());
    engine.register_get("timing", |ev: &mut NoteEvent| ev.timing as INT);
    engine.register_get("channel", |ev: &mut NoteEvent| ev.channel as INT);
    engine.register_get("note", |ev: &mut NoteEvent| ev.note as INT);
    engine.register_get("velocity", |ev: &mut NoteEvent| ev.velocity as FLOAT);
    engine.register_fn("to_string", |ev: &mut NoteEvent| {
        format!(
            "{}(ch={}, note={}, vel={:.3}, t={})",
            ev.kind.as_str(),
            ev.channel,
            ev.note,
            ev.velocity,
            ev.timing
        )
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::NoteKind;

    fn engine() -> Engine {
        let mut engine = Engine::new();
        register(&mut engine);
        engine
    }

    fn call(script: &str, ctx: AudioContext) {
        let engine = engine();
        let ast = engine.compile(script).unwrap();
        let mut scope = rhai::Scope::new();
        scope.push("ctx", ctx);
        engine.run_ast_with_scope(&mut scope, &ast).unwrap();
    }

    #[test]
    fn test_sample_buffer_load_and_store() {
        let buffer = SampleBuffer::new(4);
        buffer.load_from(&[1.0, 2.0]);
        assert_eq!(buffer.get(1), Some(2.0));
        assert_eq!(buffer.get(3), Some(0.0));
        assert!(buffer.set(3, 0.25));
        assert!(!buffer.set(4, 0.25));

        let mut out = vec![9.0; 4];
        buffer.store_into(&mut out);
        assert_eq!(out, vec![1.0, 2.0, 0.0, 0.25]);
    }

    #[test]
    fn test_script_writes_reach_output() {
        let mut builder = AudioContextBuilder::new();
        let mut output = vec![vec![0.0; 8], vec![0.0; 8]];
        let ctx = builder.prepare(&output, &[], Transport::default());

        call(
            "for i in 0..ctx.audio[0].len() { ctx.audio[0][i] = 0.5; }
             let right = ctx.audio[1];
             right.fill(1);",
            ctx,
        );

        builder.write_back(&mut output);
        assert!(output[0].iter().all(|&s| s == 0.5));
        assert!(output[1].iter().all(|&s| s == 1.0));
    }

    #[test]
    fn test_buffers_reused_for_same_shape() {
        let mut builder = AudioContextBuilder::new();
        let output = vec![vec![0.0; 16]];
        builder.prepare(&output, &[], Transport::default());
        let first = builder.buffers[0].samples.as_ptr();
        builder.prepare(&output, &[], Transport::default());
        assert_eq!(builder.buffers[0].samples.as_ptr(), first);

        builder.prepare(&[vec![0.0; 32]], &[], Transport::default());
        assert_eq!(builder.buffers[0].len(), 32);
    }

    #[test]
    fn test_out_of_bounds_index_is_an_error() {
        let engine = engine();
        let mut scope = rhai::Scope::new();
        let mut builder = AudioContextBuilder::new();
        scope.push("ctx", builder.prepare(&[vec![0.0; 2]], &[], Transport::default()));
        let result = engine.run_with_scope(&mut scope, "ctx.audio[0][2] = 1.0;");
        assert!(result.is_err());
    }

    #[test]
    fn test_transport_and_midi_are_visible() {
        let mut builder = AudioContextBuilder::new();
        let events = [
            NoteEvent::note_on(2, 60, 1.0).with_timing(5),
            NoteEvent::note_off(2, 60, 0.0),
        ];
        let mut transport = Transport::new(44_100.0, 90.0);
        transport.advance(256);
        let ctx = builder.prepare(&[vec![0.0; 4]], &events, transport);
        assert_eq!(events[1].kind, NoteKind::NoteOff);

        call(
            r#"
            if ctx.sample_rate != 44100.0 { throw "rate"; }
            if ctx.pos_samples != 256 { throw "pos"; }
            if ctx.bpm != 90.0 { throw "bpm"; }
            if ctx.midi.len() != 2 { throw "count"; }
            let ev = ctx.midi[0];
            if ev.kind != "NoteOn" || !ev.is_note_on { throw "kind"; }
            if ev.channel != 2 || ev.note != 60 || ev.timing != 5 { throw "fields"; }
            if ev.velocity != 1.0 { throw "velocity"; }
            if ctx.midi[1].is_note_on { throw "off"; }
            "#,
            ctx,
        );
    }
}
