// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Remote adaptor wire protocol.
//!
//! Length-prefixed JSON, one request and one response per connection,
//! except `subscribe` which turns the connection into a notification
//! stream.
//!
//! Wire format:
//! ```text
//! +----------------+-------------------+
//! | Length (4B BE) | JSON payload      |
//! +----------------+-------------------+
//! ```

use crate::config::ReaderConfig;
use crate::error::{Error, ErrorKind, ExceptionEvent};
use crate::reader::ReaderMetaData;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};

/// Largest accepted JSON payload.
pub const MAX_RPC_FRAME: usize = 4 * 1024 * 1024;

/// Call from a `RemoteAdaptor` to an `AdaptorServer`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    /// Look up an adaptor; the server answers with its canonical name.
    #[serde(rename = "resolve")]
    Resolve { adaptor: String },

    #[serde(rename = "define_reader")]
    DefineReader {
        adaptor: String,
        config: ReaderConfig,
    },

    #[serde(rename = "undefine_reader")]
    UndefineReader { adaptor: String, reader: String },

    #[serde(rename = "undefine_all_readers")]
    UndefineAllReaders { adaptor: String },

    #[serde(rename = "send")]
    Send {
        adaptor: String,
        reader: String,
        bytes: Vec<u8>,
    },

    #[serde(rename = "send_to_all")]
    SendToAll { adaptor: String, bytes: Vec<u8> },

    #[serde(rename = "connect_reader")]
    ConnectReader { adaptor: String, reader: String },

    #[serde(rename = "disconnect_reader")]
    DisconnectReader { adaptor: String, reader: String },

    #[serde(rename = "reconnect_reader")]
    ReconnectReader { adaptor: String, reader: String },

    #[serde(rename = "update_reader")]
    UpdateReader {
        adaptor: String,
        config: ReaderConfig,
    },

    #[serde(rename = "reader_names")]
    ReaderNames { adaptor: String },

    #[serde(rename = "reader_meta")]
    ReaderMeta { adaptor: String, reader: String },

    /// Stream notifications of `adaptor` on this connection until it closes.
    #[serde(rename = "subscribe")]
    Subscribe { adaptor: String },
}

/// Answer to a [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    #[serde(rename = "ok")]
    Ok,

    #[serde(rename = "name")]
    Name { name: String },

    #[serde(rename = "names")]
    Names { names: Vec<String> },

    #[serde(rename = "meta")]
    Meta { meta: ReaderMetaData },

    #[serde(rename = "error")]
    Error { kind: ErrorKind, message: String },
}

impl Response {
    pub fn from_error(error: &Error) -> Self {
        Response::Error {
            kind: error.kind(),
            message: error.detail().to_string(),
        }
    }
}

/// Pushed on a subscription connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Notification {
    /// Inbound LLRP frame, encoded.
    #[serde(rename = "message")]
    Message {
        adaptor: String,
        reader: String,
        bytes: Vec<u8>,
    },

    #[serde(rename = "error")]
    Error { event: ExceptionEvent },
}

/// Serialize `value` and write it as one frame.
pub fn write_json<W: Write + ?Sized, T: Serialize>(writer: &mut W, value: &T) -> io::Result<()> {
    let payload = serde_json::to_vec(value).map_err(io::Error::other)?;
    if payload.len() > MAX_RPC_FRAME {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("RPC frame of {} bytes exceeds limit", payload.len()),
        ));
    }
    writer.write_all(&(payload.len() as u32).to_be_bytes())?;
    writer.write_all(&payload)?;
    writer.flush()
}

/// Read one frame and deserialize it.
pub fn read_json<R: Read + ?Sized, T: DeserializeOwned>(reader: &mut R) -> io::Result<T> {
    let mut len = [0u8; 4];
    reader.read_exact(&mut len)?;
    let len = u32::from_be_bytes(len) as usize;
    if len > MAX_RPC_FRAME {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("RPC frame of {} bytes exceeds limit", len),
        ));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    serde_json::from_slice(&payload).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_request_tagging() {
        let req = Request::Send {
            adaptor: "warehouse".into(),
            reader: "r1".into(),
            bytes: vec![0x04, 0x3E],
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"type\":\"send\""));
        assert_eq!(serde_json::from_str::<Request>(&json).unwrap(), req);
    }

    #[test]
    fn test_error_response_keeps_kind() {
        let resp = Response::from_error(&Error::ReaderNotExist("r9".into()));
        let mut buf = Vec::new();
        write_json(&mut buf, &resp).unwrap();
        assert_eq!(&buf[..4], &((buf.len() - 4) as u32).to_be_bytes());

        let parsed: Response = read_json(&mut Cursor::new(buf)).unwrap();
        match parsed {
            Response::Error { kind, message } => {
                assert_eq!(kind, ErrorKind::ReaderNotExist);
                assert_eq!(message, "r9");
            }
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut buf = ((MAX_RPC_FRAME + 1) as u32).to_be_bytes().to_vec();
        buf.extend_from_slice(b"{}");
        let err = read_json::<_, Response>(&mut Cursor::new(buf)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
