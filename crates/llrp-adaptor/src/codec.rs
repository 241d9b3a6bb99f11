// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! LLRP message framing.
//!
//! The core never interprets message bodies. It only needs the frame header
//! to split the TCP stream, the message type to route handlers, and the
//! optional `LLRPStatus` code carried by responses.
//!
//! # Wire Format
//!
//! ```text
//! +-----+---------+--------------+------------------+--------------+-----------+
//! | Rsv | Version | Message Type | Length (u32 BE)  | ID (u32 BE)  | Body      |
//! | 3b  | 3b      | 10b          | incl. header     |              |           |
//! +-----+---------+--------------+------------------+--------------+-----------+
//! ```

use std::io::{self, Read};
use thiserror::Error;

/// LLRP message header size (type/version, length, id).
pub const HEADER_SIZE: usize = 10;

/// Default maximum accepted frame size (4 MB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Protocol version emitted by [`LlrpCodec`] (LLRP 1.0.1).
pub const LLRP_VERSION: u8 = 1;

const PARAM_LLRP_STATUS: u16 = 287;
const PARAM_KEEPALIVE_SPEC: u16 = 220;
const KEEPALIVE_TRIGGER_PERIODIC: u8 = 1;

/// Codec errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("truncated message: need {need} bytes, got {got}")]
    Truncated { need: usize, got: usize },

    #[error("length field {declared} does not match {actual} bytes")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("message of {0} bytes exceeds limit")]
    TooLarge(usize),

    #[error("message type {0} out of range")]
    InvalidKind(u16),
}

/// LLRP message type number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageKind(pub u16);

impl MessageKind {
    pub const GET_READER_CAPABILITIES: Self = Self(1);
    pub const SET_READER_CONFIG: Self = Self(3);
    pub const SET_READER_CONFIG_RESPONSE: Self = Self(13);
    pub const ADD_ROSPEC: Self = Self(20);
    pub const RO_ACCESS_REPORT: Self = Self(61);
    pub const KEEPALIVE: Self = Self(62);
    pub const READER_EVENT_NOTIFICATION: Self = Self(63);
    pub const KEEPALIVE_ACK: Self = Self(72);
    pub const ERROR_MESSAGE: Self = Self(100);

    pub fn name(self) -> &'static str {
        match self {
            Self::GET_READER_CAPABILITIES => "GET_READER_CAPABILITIES",
            Self::SET_READER_CONFIG => "SET_READER_CONFIG",
            Self::SET_READER_CONFIG_RESPONSE => "SET_READER_CONFIG_RESPONSE",
            Self::ADD_ROSPEC => "ADD_ROSPEC",
            Self::RO_ACCESS_REPORT => "RO_ACCESS_REPORT",
            Self::KEEPALIVE => "KEEPALIVE",
            Self::READER_EVENT_NOTIFICATION => "READER_EVENT_NOTIFICATION",
            Self::KEEPALIVE_ACK => "KEEPALIVE_ACK",
            Self::ERROR_MESSAGE => "ERROR_MESSAGE",
            _ => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name(), self.0)
    }
}

/// A decoded protocol message: header fields plus opaque body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    kind: MessageKind,
    version: u8,
    id: u32,
    body: Vec<u8>,
}

impl Message {
    pub fn new(kind: MessageKind, id: u32, body: Vec<u8>) -> Self {
        Self {
            kind,
            version: LLRP_VERSION,
            id,
            body,
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Status code of a leading `LLRPStatus` parameter, if the body starts with one.
    pub fn status_code(&self) -> Option<u16> {
        if self.body.len() < 6 {
            return None;
        }
        let param_type = u16::from_be_bytes([self.body[0], self.body[1]]) & 0x03FF;
        if param_type != PARAM_LLRP_STATUS {
            return None;
        }
        Some(u16::from_be_bytes([self.body[4], self.body[5]]))
    }
}

/// Protocol codec contract consumed by readers and workers.
pub trait MessageCodec: Send + Sync {
    /// Decode one complete frame.
    fn decode(&self, bytes: &[u8]) -> Result<Message, CodecError>;

    /// Encode a message into one frame.
    fn encode(&self, message: &Message) -> Result<Vec<u8>, CodecError>;

    /// Build the "set keepalive period" request sent after a client-initiated connect.
    fn keepalive_spec(&self, period_ms: u32, id: u32) -> Message;

    fn is_keepalive(&self, message: &Message) -> bool {
        message.kind() == MessageKind::KEEPALIVE
    }
}

/// Header-only LLRP codec.
#[derive(Clone, Debug)]
pub struct LlrpCodec {
    max_size: usize,
}

impl LlrpCodec {
    pub fn new(max_size: usize) -> Self {
        Self { max_size }
    }
}

impl Default for LlrpCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_SIZE)
    }
}

impl MessageCodec for LlrpCodec {
    fn decode(&self, bytes: &[u8]) -> Result<Message, CodecError> {
        if bytes.len() < HEADER_SIZE {
            return Err(CodecError::Truncated {
                need: HEADER_SIZE,
                got: bytes.len(),
            });
        }
        if bytes.len() > self.max_size {
            return Err(CodecError::TooLarge(bytes.len()));
        }

        let type_field = u16::from_be_bytes([bytes[0], bytes[1]]);
        let declared = u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]) as usize;
        if declared != bytes.len() {
            return Err(CodecError::LengthMismatch {
                declared,
                actual: bytes.len(),
            });
        }

        Ok(Message {
            kind: MessageKind(type_field & 0x03FF),
            version: ((type_field >> 10) & 0x07) as u8,
            id: u32::from_be_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]),
            body: bytes[HEADER_SIZE..].to_vec(),
        })
    }

    fn encode(&self, message: &Message) -> Result<Vec<u8>, CodecError> {
        if message.kind.0 > 0x03FF {
            return Err(CodecError::InvalidKind(message.kind.0));
        }
        let total = HEADER_SIZE + message.body.len();
        if total > self.max_size {
            return Err(CodecError::TooLarge(total));
        }

        let type_field = (u16::from(message.version & 0x07) << 10) | message.kind.0;
        let mut frame = Vec::with_capacity(total);
        frame.extend_from_slice(&type_field.to_be_bytes());
        frame.extend_from_slice(&(total as u32).to_be_bytes());
        frame.extend_from_slice(&message.id.to_be_bytes());
        frame.extend_from_slice(&message.body);
        Ok(frame)
    }

    fn keepalive_spec(&self, period_ms: u32, id: u32) -> Message {
        // ResetToFactoryDefault=0, then KeepaliveSpec TLV (type, length=9, trigger, period)
        let mut body = Vec::with_capacity(10);
        body.push(0);
        body.extend_from_slice(&PARAM_KEEPALIVE_SPEC.to_be_bytes());
        body.extend_from_slice(&9u16.to_be_bytes());
        body.push(KEEPALIVE_TRIGGER_PERIODIC);
        body.extend_from_slice(&period_ms.to_be_bytes());
        Message::new(MessageKind::SET_READER_CONFIG, id, body)
    }
}

/// Read one complete LLRP frame (header included) from a blocking stream.
///
/// Returns `UnexpectedEof` when the peer closes at a frame boundary.
pub fn read_frame<R: Read + ?Sized>(reader: &mut R, max_size: usize) -> io::Result<Vec<u8>> {
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header)?;

    let len = u32::from_be_bytes([header[2], header[3], header[4], header[5]]) as usize;
    if len < HEADER_SIZE || len > max_size {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid LLRP frame length: {}", len),
        ));
    }

    let mut frame = vec![0u8; len];
    frame[..HEADER_SIZE].copy_from_slice(&header);
    reader.read_exact(&mut frame[HEADER_SIZE..])?;
    Ok(frame)
}
