//! MessagePack-RPC wire framing
//!
//! The wire format is a continuous stream of MessagePack arrays:
//!
//! - Request      `[0, msgid, method, params]`
//! - Response     `[1, msgid, error, result]` with `error` either nil or
//!   `[code, message]`
//! - Notification `[2, method, params]`
//!
//! Values are carried as `serde_json::Value` trees; the router's traffic is
//! JSON-shaped, so MessagePack extension and binary payloads are rejected as
//! protocol errors.

use std::io::Cursor;

use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// The router already knows this method; registering again is not an error.
pub const ROUTE_ALREADY_EXISTS_ERR: u8 = 0x05;
/// The request could not be mapped onto the handler's parameters.
pub const MALFORMED_CALL_ERR: u8 = 0xFD;
/// No handler is registered under the requested name.
pub const FUNCTION_NOT_FOUND_ERR: u8 = 0xFE;
/// Any other handler failure.
pub const GENERIC_ERR: u8 = 0xFF;

const REQUEST_TYPE: u8 = 0;
const RESPONSE_TYPE: u8 = 1;
const NOTIFICATION_TYPE: u8 = 2;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("corrupt MessagePack stream: {0}")]
    Corrupt(String),

    #[error("invalid frame: {0}")]
    Invalid(String),

    #[error("encoding failed: {0}")]
    Encode(String),
}

/// Error payload of a response frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    pub code: u8,
    pub message: String,
}

/// A decoded MessagePack-RPC frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Request {
        msgid: u32,
        method: String,
        params: Vec<Value>,
    },
    Response {
        msgid: u32,
        error: Option<RemoteError>,
        result: Value,
    },
    Notification {
        method: String,
        params: Vec<Value>,
    },
}

// ============================================
// ENCODING
// ============================================

/// Normalizes arbitrary serializable params into the positional array the
/// wire format requires: a tuple or sequence maps to its elements, `()`
/// maps to no arguments, and a single bare value becomes a one-element list.
pub fn params_to_array<P: Serialize>(params: P) -> Result<Vec<Value>, FrameError> {
    let value = serde_json::to_value(params).map_err(|e| FrameError::Encode(e.to_string()))?;
    Ok(match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items,
        other => vec![other],
    })
}

pub fn encode_request(msgid: u32, method: &str, params: &[Value]) -> Result<Vec<u8>, FrameError> {
    rmp_serde::to_vec(&(REQUEST_TYPE, msgid, method, params))
        .map_err(|e| FrameError::Encode(e.to_string()))
}

pub fn encode_response(
    msgid: u32,
    error: Option<&RemoteError>,
    result: &Value,
) -> Result<Vec<u8>, FrameError> {
    let error = error.map(|e| (e.code, e.message.as_str()));
    rmp_serde::to_vec(&(RESPONSE_TYPE, msgid, error, result))
        .map_err(|e| FrameError::Encode(e.to_string()))
}

pub fn encode_notification(method: &str, params: &[Value]) -> Result<Vec<u8>, FrameError> {
    rmp_serde::to_vec(&(NOTIFICATION_TYPE, method, params))
        .map_err(|e| FrameError::Encode(e.to_string()))
}

// ============================================
// DECODING
// ============================================

/// Streaming decoder: raw reads are fed in, complete frames come out. A
/// partial frame stays buffered until the rest of its bytes arrive.
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Splits the next complete MessagePack value off the buffer.
    ///
    /// Returns `Ok(None)` when the buffered bytes end mid-value; any other
    /// decode failure is unrecoverable because the stream cannot be
    /// resynchronized.
    pub fn next_value(&mut self) -> Result<Option<Value>, FrameError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        let mut cursor = Cursor::new(&self.buffer[..]);
        let mut deserializer = rmp_serde::Deserializer::new(&mut cursor);
        match Value::deserialize(&mut deserializer) {
            Ok(value) => {
                drop(deserializer);
                let consumed = cursor.position() as usize;
                self.buffer.advance(consumed);
                Ok(Some(value))
            }
            Err(e) if is_incomplete(&e) => Ok(None),
            Err(e) => Err(FrameError::Corrupt(e.to_string())),
        }
    }
}

fn is_incomplete(error: &rmp_serde::decode::Error) -> bool {
    use rmp_serde::decode::Error;
    match error {
        Error::InvalidMarkerRead(io) | Error::InvalidDataRead(io) => {
            io.kind() == std::io::ErrorKind::UnexpectedEof
        }
        _ => false,
    }
}

/// Interprets one decoded MessagePack value as an RPC frame.
pub fn parse_frame(value: Value) -> Result<Frame, FrameError> {
    let Value::Array(items) = value else {
        return Err(FrameError::Invalid(
            "message must be a non-empty array".to_string(),
        ));
    };
    let Some(frame_type) = items.first().and_then(Value::as_u64) else {
        return Err(FrameError::Invalid(
            "message must start with an integer type tag".to_string(),
        ));
    };

    match frame_type as u8 {
        REQUEST_TYPE => {
            if items.len() != 4 {
                return Err(FrameError::Invalid(format!(
                    "request must have length 4, got {}",
                    items.len()
                )));
            }
            let msgid = parse_msgid(&items[1])?;
            let method = parse_method(&items[2])?;
            let params = parse_params(&items[3])?;
            Ok(Frame::Request {
                msgid,
                method,
                params,
            })
        }
        RESPONSE_TYPE => {
            if items.len() != 4 {
                return Err(FrameError::Invalid(format!(
                    "response must have length 4, got {}",
                    items.len()
                )));
            }
            let msgid = parse_msgid(&items[1])?;
            let error = parse_error(&items[2])?;
            let result = items[3].clone();
            Ok(Frame::Response {
                msgid,
                error,
                result,
            })
        }
        NOTIFICATION_TYPE => {
            if items.len() != 3 {
                return Err(FrameError::Invalid(format!(
                    "notification must have length 3, got {}",
                    items.len()
                )));
            }
            let method = parse_method(&items[1])?;
            let params = parse_params(&items[2])?;
            Ok(Frame::Notification { method, params })
        }
        other => Err(FrameError::Invalid(format!(
            "unknown message type {other}"
        ))),
    }
}

fn parse_msgid(value: &Value) -> Result<u32, FrameError> {
    value
        .as_u64()
        .and_then(|id| u32::try_from(id).ok())
        .ok_or_else(|| FrameError::Invalid("msgid must be a uint32".to_string()))
}

fn parse_method(value: &Value) -> Result<String, FrameError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| FrameError::Invalid("method name must be a string".to_string()))
}

fn parse_params(value: &Value) -> Result<Vec<Value>, FrameError> {
    match value {
        Value::Array(items) => Ok(items.clone()),
        _ => Err(FrameError::Invalid("params must be an array".to_string())),
    }
}

fn parse_error(value: &Value) -> Result<Option<RemoteError>, FrameError> {
    match value {
        Value::Null => Ok(None),
        Value::Array(parts) if parts.len() >= 2 => {
            let code = parts[0]
                .as_u64()
                .and_then(|c| u8::try_from(c).ok())
                .ok_or_else(|| {
                    FrameError::Invalid("error code must be a uint8".to_string())
                })?;
            let message = match parts[1].as_str() {
                Some(message) => message.to_string(),
                None => parts[1].to_string(),
            };
            Ok(Some(RemoteError { code, message }))
        }
        _ => Err(FrameError::Invalid(
            "error must be nil or [code, message]".to_string(),
        )),
    }
}
