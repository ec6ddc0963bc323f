//! Frame decoding.
//!
//! [`FrameDecoder`] is a pure function of the catalog and the frame: the
//! import runs it twice over the same log and relies on both passes
//! producing identical output.

mod frame_log;

pub use frame_log::{FrameLog, Frames, REQUIRED_COLUMNS};

use std::collections::BTreeMap;

use crate::catalog::{SchemaCatalog, PAYLOAD_LEN};

/// One logged bus message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Epoch milliseconds.
    pub timestamp: i64,
    /// Frame id, already masked to 29 bits.
    pub id: u32,
    pub payload: [u8; PAYLOAD_LEN],
}

/// One named value decoded from a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSignal {
    pub timestamp: i64,
    pub sender: String,
    pub message: String,
    pub name: String,
    pub value: f64,
    pub unit: String,
}

/// All signals decoded from one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMessage {
    pub timestamp: i64,
    pub id: u32,
    pub name: String,
    pub sender: String,
    pub signals: Vec<DecodedSignal>,
}

#[derive(Debug, Clone, Copy)]
pub struct FrameDecoder<'a> {
    catalog: &'a SchemaCatalog,
}

impl<'a> FrameDecoder<'a> {
    pub fn new(catalog: &'a SchemaCatalog) -> Self {
        Self { catalog }
    }

    /// Decode every defined signal of the frame's message. Returns `None` when
    /// the frame id is not in the catalog.
    pub fn decode_message(&self, frame: &RawFrame) -> Option<DecodedMessage> {
        let Some(def) = self.catalog.get(frame.id) else {
            log::trace!("frame id {:#x} missing from catalog", frame.id);
            return None;
        };
        let sender = def.sender().to_string();
        let signals = def
            .active_signals(&frame.payload)
            .map(|signal| DecodedSignal {
                timestamp: frame.timestamp,
                sender: sender.clone(),
                message: def.name.clone(),
                name: signal.name.clone(),
                value: signal.decode(&frame.payload),
                unit: signal.unit.clone(),
            })
            .collect();
        Some(DecodedMessage {
            timestamp: frame.timestamp,
            id: def.id,
            name: def.name.clone(),
            sender,
            signals,
        })
    }

    /// Signals of one frame; empty for unknown frame ids.
    pub fn decode(&self, frame: &RawFrame) -> Vec<DecodedSignal> {
        self.decode_message(frame)
            .map(|message| message.signals)
            .unwrap_or_default()
    }

    /// Adapt a frame stream into decoded messages. Unknown frames are counted
    /// in `unknown` and skipped.
    pub fn messages<I>(&self, frames: I) -> Messages<'a, I::IntoIter>
    where
        I: IntoIterator<Item = RawFrame>,
    {
        Messages {
            decoder: *self,
            frames: frames.into_iter(),
            unknown: BTreeMap::new(),
        }
    }
}

pub struct Messages<'a, I> {
    decoder: FrameDecoder<'a>,
    frames: I,
    unknown: BTreeMap<u32, u64>,
}

impl<I> Messages<'_, I> {
    /// Frames skipped so far, keyed by frame id.
    pub fn unknown_ids(&self) -> &BTreeMap<u32, u64> {
        &self.unknown
    }
}

impl<I: Iterator<Item = RawFrame>> Iterator for Messages<'_, I> {
    type Item = DecodedMessage;

    fn next(&mut self) -> Option<Self::Item> {
        for frame in self.frames.by_ref() {
            match self.decoder.decode_message(&frame) {
                Some(message) => return Some(message),
                None => *self.unknown.entry(frame.id).or_insert(0) += 1,
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ByteOrder, MessageDef, SignalDef};

    fn catalog() -> SchemaCatalog {
        SchemaCatalog::from_messages([MessageDef::new(0x100, "Engine")
            .with_sender("ECU")
            .with_signal(
                SignalDef::new("rpm", 0, 16, ByteOrder::LittleEndian)
                    .with_scale(0.5, 0.0)
                    .with_unit("rpm"),
            )
            .with_signal(SignalDef::new("flags", 16, 8, ByteOrder::LittleEndian))])
        .expect("catalog")
    }

    fn frame(timestamp: i64, id: u32) -> RawFrame {
        RawFrame {
            timestamp,
            id,
            payload: [0x10, 0x00, 0x00, 0, 0, 0, 0, 0],
        }
    }

    #[test]
    fn decodes_every_signal_even_zero() {
        let catalog = catalog();
        let decoder = FrameDecoder::new(&catalog);
        let signals = decoder.decode(&frame(5, 0x100));
        assert_eq!(signals.len(), 2);
        assert_eq!(signals[0].name, "rpm");
        assert_eq!(signals[0].value, 8.0);
        assert_eq!(signals[0].sender, "ECU");
        assert_eq!(signals[0].message, "Engine");
        assert_eq!(signals[1].value, 0.0);
    }

    #[test]
    fn unknown_frame_is_skipped_and_counted() {
        let catalog = catalog();
        let decoder = FrameDecoder::new(&catalog);
        assert!(decoder.decode(&frame(1, 0x7FF)).is_empty());

        let mut messages = decoder.messages(vec![frame(1, 0x7FF), frame(2, 0x100), frame(3, 0x7FF)]);
        let decoded: Vec<_> = messages.by_ref().collect();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].timestamp, 2);
        assert_eq!(messages.unknown_ids().get(&0x7FF), Some(&2));
    }

    #[test]
    fn decoding_is_deterministic() {
        let catalog = catalog();
        let decoder = FrameDecoder::new(&catalog);
        let frames = vec![frame(1, 0x100), frame(2, 0x100)];
        let first: Vec<_> = decoder.messages(frames.clone()).collect();
        let second: Vec<_> = decoder.messages(frames).collect();
        assert_eq!(first, second);
    }
}
