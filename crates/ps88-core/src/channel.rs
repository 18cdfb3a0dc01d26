//! Message protocol between the control side and the script host.
//!
//! Both directions are unbounded crossbeam channels, so neither side ever
//! blocks on the other and per-direction order is preserved.

use crate::api::gui::{DrawRequest, Pointer};
use crate::build::Generation;
use crate::error::{Error, Result};
use crate::midi::NoteEvent;
use crate::save::SaveBlob;
use crate::shape::Shape;
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use serde::{Deserialize, Serialize};

/// Control → host.
#[derive(Debug)]
pub enum HostMessage {
    /// Commit a build that was evaluated on the control side.
    Build {
        code: String,
        generation: Box<Generation>,
    },
    /// Run the gui callback and reply with [`HostEvent::Draw`].
    Draw(DrawRequest),
    /// Queue a note event for the next audio block.
    Midi(NoteEvent),
}

/// Host → control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HostEvent {
    Draw { shapes: Vec<Shape> },
    Save { data: SaveBlob },
}

/// Create a connected pair of endpoints.
pub fn channel() -> (ControlEndpoint, HostEndpoint) {
    let (message_tx, message_rx) = unbounded();
    let (event_tx, event_rx) = unbounded();
    (
        ControlEndpoint {
            message_tx,
            event_rx,
        },
        HostEndpoint {
            message_rx,
            event_tx,
        },
    )
}

/// The control side: sends messages, receives events.
#[derive(Debug)]
pub struct ControlEndpoint {
    message_tx: Sender<HostMessage>,
    event_rx: Receiver<HostEvent>,
}

impl ControlEndpoint {
    pub fn send(&self, msg: HostMessage) -> Result<()> {
        self.message_tx.send(msg).map_err(|_| Error::ChannelClosed)
    }

    pub fn draw(&self, width: u32, height: u32, pointer: Pointer) -> Result<()> {
        self.send(HostMessage::Draw(DrawRequest {
            width,
            height,
            pointer,
        }))
    }

    /// Next pending event, if any.
    pub fn try_recv(&self) -> Result<Option<HostEvent>> {
        match self.event_rx.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(Error::ChannelClosed),
        }
    }

    pub fn note_sender(&self) -> NoteSender {
        NoteSender {
            message_tx: self.message_tx.clone(),
        }
    }
}

/// The host side: receives messages, sends events.
#[derive(Debug)]
pub struct HostEndpoint {
    message_rx: Receiver<HostMessage>,
    event_tx: Sender<HostEvent>,
}

impl HostEndpoint {
    pub fn try_recv(&self) -> Option<HostMessage> {
        self.message_rx.try_recv().ok()
    }

    pub fn emit(&self, event: HostEvent) -> bool {
        self.event_tx.send(event).is_ok()
    }

    pub fn event_sender(&self) -> Sender<HostEvent> {
        self.event_tx.clone()
    }
}

/// Cloneable handle for pushing note events from device callbacks.
#[derive(Debug, Clone)]
pub struct NoteSender {
    message_tx: Sender<HostMessage>,
}

impl NoteSender {
    pub fn send(&self, event: NoteEvent) -> Result<()> {
        self.message_tx
            .send(HostMessage::Midi(event))
            .map_err(|_| Error::ChannelClosed)
    }

    /// Decode raw MIDI bytes and forward note messages. Returns whether
    /// anything was sent.
    pub fn send_bytes(&self, bytes: &[u8], timing: u32) -> Result<bool> {
        match NoteEvent::from_bytes(bytes, timing) {
            Some(event) => self.send(event).map(|_| true),
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_arrive_in_order() {
        let (control, host) = channel();
        let notes = control.note_sender();
        notes.send(NoteEvent::note_on(0, 60, 1.0)).unwrap();
        control.draw(10, 20, Pointer::default()).unwrap();
        assert!(notes.send_bytes(&[0x80, 60, 0], 3).unwrap());
        assert!(!notes.send_bytes(&[0xB0, 1, 2], 0).unwrap());

        assert!(matches!(host.try_recv(), Some(HostMessage::Midi(ev)) if ev.is_note_on()));
        assert!(matches!(host.try_recv(), Some(HostMessage::Draw(req)) if req.width == 10));
        assert!(matches!(host.try_recv(), Some(HostMessage::Midi(ev)) if ev.timing == 3));
        assert!(host.try_recv().is_none());
    }

    #[test]
    fn test_events_reach_control() {
        let (control, host) = channel();
        assert!(control.try_recv().unwrap().is_none());
        assert!(host.emit(HostEvent::Save {
            data: SaveBlob::Text("x".into())
        }));
        assert_eq!(
            control.try_recv().unwrap(),
            Some(HostEvent::Save {
                data: SaveBlob::Text("x".into())
            })
        );
    }

    #[test]
    fn test_closed_channel_is_reported() {
        let (control, host) = channel();
        drop(host);
        assert!(matches!(control.draw(1, 1, Pointer::default()), Err(Error::ChannelClosed)));
        assert!(matches!(control.try_recv(), Err(Error::ChannelClosed)));
    }

    #[test]
    fn test_event_json() {
        let json = serde_json::to_string(&HostEvent::Draw { shapes: vec![] }).unwrap();
        assert_eq!(json, r#"{"type":"draw","shapes":[]}"#);
    }
}
