//! Level summaries and the envelope that carries them through the relay.
//!
//! Socket frames are `[tag][sender: u64 LE][body]`. A levels body is three
//! little-endian `f32` values in the order instant, rms, peak hold.

use std::fmt;
use thiserror::Error;

use crate::decibel::MIN_DB;

/// Size of the frame header: tag byte plus sender id.
pub const FRAME_HEADER_LEN: usize = 9;

const TAG_WELCOME: u8 = 0;
const TAG_LEVELS: u8 = 1;
const TAG_SILENCE: u8 = 2;
const TAG_UNSUBSCRIBE: u8 = 3;

#[derive(Debug, Error, PartialEq)]
pub enum WireError {
    #[error("unknown frame tag {0:#04x}")]
    UnknownTag(u8),
    #[error("truncated frame body: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
}

/// One emission of the analyser: `(instant, rms, peak hold)` in dB.
///
/// Fields are private so a summary cannot be altered once produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelSummary {
    instant: f32,
    rms: f32,
    peak_hold: f32,
}

impl LevelSummary {
    /// The canonical triple drawn when nothing is coming in.
    pub const SILENCE: Self = Self {
        instant: MIN_DB,
        rms: MIN_DB,
        peak_hold: MIN_DB,
    };

    pub const ENCODED_LEN: usize = 12;

    pub fn new(instant: f32, rms: f32, peak_hold: f32) -> Self {
        Self {
            instant,
            rms,
            peak_hold,
        }
    }

    pub fn instant(&self) -> f32 {
        self.instant
    }

    pub fn rms(&self) -> f32 {
        self.rms
    }

    pub fn peak_hold(&self) -> f32 {
        self.peak_hold
    }

    pub fn to_le_bytes(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[0..4].copy_from_slice(&self.instant.to_le_bytes());
        out[4..8].copy_from_slice(&self.rms.to_le_bytes());
        out[8..12].copy_from_slice(&self.peak_hold.to_le_bytes());
        out
    }

    pub fn from_le_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() < Self::ENCODED_LEN {
            return Err(WireError::Truncated {
                expected: Self::ENCODED_LEN,
                actual: bytes.len(),
            });
        }
        let read = |i: usize| f32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        Ok(Self::new(read(0), read(4), read(8)))
    }
}

impl Default for LevelSummary {
    fn default() -> Self {
        Self::SILENCE
    }
}

impl fmt::Display for LevelSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.1}/{:.1}/{:.1} dB",
            self.instant, self.rms, self.peak_hold
        )
    }
}

/// What a broadcast carries. Silence is a control value, not a low reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Payload {
    Levels(LevelSummary),
    Silence,
}

impl Payload {
    /// Decode into the triple a viewer should display.
    pub fn levels(&self) -> LevelSummary {
        match self {
            Payload::Levels(levels) => *levels,
            Payload::Silence => LevelSummary::SILENCE,
        }
    }
}

/// Opaque identifier of an attachment, assigned by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SenderId(pub u64);

impl fmt::Display for SenderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    pub sender: SenderId,
    pub payload: Payload,
}

/// A decoded socket frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Frame {
    /// First frame a socket client receives; carries its assigned id.
    Welcome(SenderId),
    Message(Envelope),
    /// Sent by a client that keeps publishing but no longer reads fan-out.
    Unsubscribe(SenderId),
}

impl Frame {
    pub fn to_bytes(&self) -> Vec<u8> {
        let (tag, sender, body) = match self {
            Frame::Welcome(id) => (TAG_WELCOME, *id, None),
            Frame::Unsubscribe(id) => (TAG_UNSUBSCRIBE, *id, None),
            Frame::Message(Envelope {
                sender,
                payload: Payload::Levels(levels),
            }) => (TAG_LEVELS, *sender, Some(levels.to_le_bytes())),
            Frame::Message(Envelope {
                sender,
                payload: Payload::Silence,
            }) => (TAG_SILENCE, *sender, None),
        };

        let mut out = Vec::with_capacity(FRAME_HEADER_LEN + LevelSummary::ENCODED_LEN);
        out.push(tag);
        out.extend_from_slice(&sender.0.to_le_bytes());
        if let Some(body) = body {
            out.extend_from_slice(&body);
        }
        out
    }

    /// Number of body bytes that follow a header with this tag.
    pub fn body_len(tag: u8) -> Result<usize, WireError> {
        match tag {
            TAG_WELCOME | TAG_SILENCE | TAG_UNSUBSCRIBE => Ok(0),
            TAG_LEVELS => Ok(LevelSummary::ENCODED_LEN),
            other => Err(WireError::UnknownTag(other)),
        }
    }

    pub fn decode(header: &[u8; FRAME_HEADER_LEN], body: &[u8]) -> Result<Self, WireError> {
        let tag = header[0];
        let mut id = [0u8; 8];
        id.copy_from_slice(&header[1..]);
        let sender = SenderId(u64::from_le_bytes(id));

        match tag {
            TAG_WELCOME => Ok(Frame::Welcome(sender)),
            TAG_UNSUBSCRIBE => Ok(Frame::Unsubscribe(sender)),
            TAG_LEVELS => Ok(Frame::Message(Envelope {
                sender,
                payload: Payload::Levels(LevelSummary::from_le_bytes(body)?),
            })),
            TAG_SILENCE => Ok(Frame::Message(Envelope {
                sender,
                payload: Payload::Silence,
            })),
            other => Err(WireError::UnknownTag(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(bytes: &[u8]) -> ([u8; FRAME_HEADER_LEN], &[u8]) {
        let mut header = [0u8; FRAME_HEADER_LEN];
        header.copy_from_slice(&bytes[..FRAME_HEADER_LEN]);
        (header, &bytes[FRAME_HEADER_LEN..])
    }

    #[test]
    fn summary_survives_the_broadcast_schema() {
        let levels = LevelSummary::new(-6.0, -9.0, -3.0);
        let envelope = Envelope {
            sender: SenderId(7),
            payload: Payload::Levels(levels),
        };
        let bytes = Frame::Message(envelope).to_bytes();
        assert_eq!(bytes.len(), FRAME_HEADER_LEN + 12);

        let (header, body) = split(&bytes);
        assert_eq!(Frame::body_len(header[0]), Ok(12));
        let Frame::Message(decoded) = Frame::decode(&header, body).unwrap() else {
            panic!("expected a message frame");
        };
        assert_eq!(decoded.sender, SenderId(7));
        assert_eq!(decoded.payload.levels(), levels);
    }

    #[test]
    fn levels_body_is_three_little_endian_floats() {
        let bytes = LevelSummary::new(1.0, -2.0, 0.5).to_le_bytes();
        assert_eq!(&bytes[0..4], &1.0f32.to_le_bytes());
        assert_eq!(&bytes[4..8], &(-2.0f32).to_le_bytes());
        assert_eq!(&bytes[8..12], &0.5f32.to_le_bytes());
    }

    #[test]
    fn silence_decodes_to_the_floor_triple() {
        let bytes = Frame::Message(Envelope {
            sender: SenderId(1),
            payload: Payload::Silence,
        })
        .to_bytes();
        assert_eq!(bytes.len(), FRAME_HEADER_LEN);

        let (header, body) = split(&bytes);
        let Frame::Message(decoded) = Frame::decode(&header, body).unwrap() else {
            panic!("expected a message frame");
        };
        assert_eq!(decoded.payload, Payload::Silence);
        assert_eq!(decoded.payload.levels(), LevelSummary::SILENCE);
    }

    #[test]
    fn welcome_carries_the_assigned_id() {
        let bytes = Frame::Welcome(SenderId(42)).to_bytes();
        let (header, body) = split(&bytes);
        assert_eq!(Frame::decode(&header, body), Ok(Frame::Welcome(SenderId(42))));
    }

    #[test]
    fn unsubscribe_is_a_bare_header() {
        let bytes = Frame::Unsubscribe(SenderId(5)).to_bytes();
        assert_eq!(bytes.len(), FRAME_HEADER_LEN);
        let (header, body) = split(&bytes);
        assert_eq!(Frame::body_len(header[0]), Ok(0));
        assert_eq!(Frame::decode(&header, body), Ok(Frame::Unsubscribe(SenderId(5))));
    }

    #[test]
    fn malformed_frames_are_rejected() {
        assert_eq!(Frame::body_len(9), Err(WireError::UnknownTag(9)));
        assert_eq!(
            LevelSummary::from_le_bytes(&[0u8; 5]),
            Err(WireError::Truncated {
                expected: 12,
                actual: 5
            })
        );
    }
}
