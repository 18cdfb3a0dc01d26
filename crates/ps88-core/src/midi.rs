//! Note events delivered to audio callbacks.
//!
//! MIDI reaches the host as raw channel messages, either bare 3-byte
//! messages from a device callback or 7-byte packets from a control
//! surface that prefix the message with a 32-bit timing field. Only note
//! on/off messages are kept; everything else is ignored.

use serde::{Deserialize, Serialize};

/// Note on/off discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoteKind {
    NoteOn,
    NoteOff,
}

impl NoteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoteKind::NoteOn => "NoteOn",
            NoteKind::NoteOff => "NoteOff",
        }
    }
}

/// A single note event as seen by scripts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoteEvent {
    pub kind: NoteKind,
    /// Offset hint in samples; passed through unchanged.
    pub timing: u32,
    /// MIDI channel (0-15).
    pub channel: u8,
    /// MIDI note number (0-127).
    pub note: u8,
    /// Normalized velocity (0.0-1.0).
    pub velocity: f32,
}

/// Length of a timing-prefixed packet.
pub const PACKET_LEN: usize = 7;

impl NoteEvent {
    pub fn note_on(channel: u8, note: u8, velocity: f32) -> Self {
        Self {
            kind: NoteKind::NoteOn,
            timing: 0,
            channel: channel & 0x0F,
            note: note & 0x7F,
            velocity: velocity.clamp(0.0, 1.0),
        }
    }

    pub fn note_off(channel: u8, note: u8, velocity: f32) -> Self {
        Self {
            kind: NoteKind::NoteOff,
            ..Self::note_on(channel, note, velocity)
        }
    }

    pub fn with_timing(mut self, timing: u32) -> Self {
        self.timing = timing;
        self
    }

    /// Parse a raw 3-byte MIDI channel message.
    ///
    /// Note-on with velocity 0 becomes a note-off.
    pub fn from_bytes(bytes: &[u8], timing: u32) -> Option<Self> {
        if bytes.len() < 3 {
            return None;
        }

        let msg_type = bytes[0] & 0xF0;
        let channel = bytes[0] & 0x0F;
        let note = bytes[1] & 0x7F;
        let raw_velocity = bytes[2] & 0x7F;
        let velocity = raw_velocity as f32 / 127.0;

        let kind = match msg_type {
            0x90 if raw_velocity == 0 => NoteKind::NoteOff,
            0x90 => NoteKind::NoteOn,
            0x80 => NoteKind::NoteOff,
            _ => return None,
        };

        Some(Self {
            kind,
            timing,
            channel,
            note,
            velocity,
        })
    }

    /// Parse a 7-byte packet: big-endian `u32` timing, then the message.
    pub fn from_packet(packet: &[u8]) -> Option<Self> {
        if packet.len() < PACKET_LEN {
            return None;
        }
        let timing = u32::from_be_bytes([packet[0], packet[1], packet[2], packet[3]]);
        Self::from_bytes(&packet[4..PACKET_LEN], timing)
    }

    /// Encode back into the 7-byte packet form.
    pub fn to_packet(&self) -> [u8; PACKET_LEN] {
        let status = match self.kind {
            NoteKind::NoteOn => 0x90,
            NoteKind::NoteOff => 0x80,
        } | (self.channel & 0x0F);
        let timing = self.timing.to_be_bytes();
        [
            timing[0],
            timing[1],
            timing[2],
            timing[3],
            status,
            self.note & 0x7F,
            (self.velocity.clamp(0.0, 1.0) * 127.0).round() as u8,
        ]
    }

    pub fn is_note_on(&self) -> bool {
        self.kind == NoteKind::NoteOn
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_on_from_bytes() {
        let event = NoteEvent::from_bytes(&[0x93, 60, 127], 0).unwrap();
        assert_eq!(event.kind, NoteKind::NoteOn);
        assert_eq!(event.channel, 3);
        assert_eq!(event.note, 60);
        assert_eq!(event.velocity, 1.0);
    }

    #[test]
    fn test_zero_velocity_note_on_is_note_off() {
        let event = NoteEvent::from_bytes(&[0x90, 64, 0], 12).unwrap();
        assert_eq!(event.kind, NoteKind::NoteOff);
        assert_eq!(event.timing, 12);
        assert_eq!(event.velocity, 0.0);
    }

    #[test]
    fn test_note_off_keeps_release_velocity() {
        let event = NoteEvent::from_bytes(&[0x8F, 10, 127], 0).unwrap();
        assert_eq!(event.kind, NoteKind::NoteOff);
        assert_eq!(event.channel, 15);
        assert_eq!(event.velocity, 1.0);
    }

    #[test]
    fn test_non_note_messages_are_ignored() {
        assert!(NoteEvent::from_bytes(&[0xB0, 7, 100], 0).is_none());
        assert!(NoteEvent::from_bytes(&[0xF8], 0).is_none());
        assert!(NoteEvent::from_bytes(&[0x90, 60], 0).is_none());
    }

    #[test]
    fn test_packet_with_timing_prefix() {
        let event = NoteEvent::from_packet(&[0, 0, 1, 2, 0x91, 72, 64]).unwrap();
        assert_eq!(event.timing, 258);
        assert_eq!(event.channel, 1);
        assert_eq!(event.note, 72);
        assert!((event.velocity - 64.0 / 127.0).abs() < 1e-6);
        assert_eq!(event.to_packet(), [0, 0, 1, 2, 0x91, 72, 64]);
    }

    #[test]
    fn test_short_packet_is_rejected() {
        assert!(NoteEvent::from_packet(&[0x90, 60, 100]).is_none());
    }
}
