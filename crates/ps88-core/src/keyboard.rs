//! On-screen keyboard model.
//!
//! Two octaves plus a top C (25 keys). Key indices are relative to the
//! current octave; pressing a key yields the raw MIDI message to forward.
//! Drawing the keys is left to the control surface.

use std::collections::BTreeSet;

/// Number of keys on the keyboard.
pub const KEY_COUNT: usize = 25;

pub const MIN_OCTAVE: i8 = -1;
pub const MAX_OCTAVE: i8 = 8;
pub const DEFAULT_OCTAVE: i8 = 3;

/// Velocity used for key presses (1-127)
pub const DEFAULT_VELOCITY: u8 = 127;

/// Raw 3-byte MIDI message.
pub type RawMidi = [u8; 3];

#[derive(Debug, Clone)]
pub struct VirtualKeyboard {
    octave: i8,
    velocity: u8,
    channel: u8,
    pressed_notes: BTreeSet<u8>,
}

impl Default for VirtualKeyboard {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualKeyboard {
    pub fn new() -> Self {
        Self {
            octave: DEFAULT_OCTAVE,
            velocity: DEFAULT_VELOCITY,
            channel: 0,
            pressed_notes: BTreeSet::new(),
        }
    }

    pub fn octave(&self) -> i8 {
        self.octave
    }

    /// Lowest note on the keyboard.
    pub fn base_note(&self) -> i16 {
        (self.octave as i16 + 1) * 12
    }

    /// MIDI note for a key index, if it is on the keyboard and in range.
    pub fn note_for_key(&self, index: usize) -> Option<u8> {
        if index >= KEY_COUNT {
            return None;
        }
        u8::try_from(self.base_note() + index as i16)
            .ok()
            .filter(|&note| note <= 127)
    }

    /// Press a key. Returns the note-on message, or `None` if the key is
    /// out of range or already held.
    pub fn key_down(&mut self, index: usize) -> Option<RawMidi> {
        let note = self.note_for_key(index)?;
        if !self.pressed_notes.insert(note) {
            return None;
        }
        Some([0x90 | self.channel, note, self.velocity])
    }

    /// Release a key. Returns the note-off message if it was held.
    pub fn key_up(&mut self, index: usize) -> Option<RawMidi> {
        let note = self.note_for_key(index)?;
        self.release(note)
    }

    fn release(&mut self, note: u8) -> Option<RawMidi> {
        self.pressed_notes
            .remove(&note)
            .then_some([0x80 | self.channel, note, self.velocity])
    }

    /// Release everything. Returns the note-off messages to send.
    pub fn release_all(&mut self) -> Vec<RawMidi> {
        let notes: Vec<u8> = self.pressed_notes.iter().copied().collect();
        notes.into_iter().filter_map(|note| self.release(note)).collect()
    }

    /// Shift octave up, releasing held notes first.
    pub fn octave_up(&mut self) -> Vec<RawMidi> {
        self.set_octave(self.octave + 1)
    }

    /// Shift octave down, releasing held notes first.
    pub fn octave_down(&mut self) -> Vec<RawMidi> {
        self.set_octave(self.octave - 1)
    }

    pub fn set_octave(&mut self, octave: i8) -> Vec<RawMidi> {
        let released = self.release_all();
        self.octave = octave.clamp(MIN_OCTAVE, MAX_OCTAVE);
        released
    }

    pub fn is_pressed(&self, note: u8) -> bool {
        self.pressed_notes.contains(&note)
    }

    pub fn velocity(&self) -> u8 {
        self.velocity
    }

    pub fn set_velocity(&mut self, velocity: u8) {
        self.velocity = velocity.clamp(1, 127);
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn set_channel(&mut self, channel: u8) {
        self.channel = channel.min(15);
    }
}

/// Convert a MIDI note number to a note name
pub fn note_name(note: u8) -> String {
    let names = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];
    let octave = (note / 12) as i8 - 1;
    let name = names[(note % 12) as usize];
    format!("{}{}", name, octave)
}

pub fn is_black_key(note: u8) -> bool {
    matches!(note % 12, 1 | 3 | 6 | 8 | 10)
}
