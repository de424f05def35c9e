//! Wire message types and msgpack codec glue.
//!
//! Every message is a positional msgpack array whose first element is an
//! integer tag:
//!
//! ```text
//! [0, id:u32, method:str, params:array]    Request
//! [1, id:u32, error:any|nil, result:any|nil]  Response
//! [2, method:str, params:array]            Notify
//! ```
//!
//! Exactly one of `error`/`result` carries meaning in a Response; the other
//! side encodes as msgpack nil. Values are carried as [`serde_json::Value`]
//! and serialized with `rmp-serde`.
//!
//! Socket substrates additionally frame each message with a 4-byte
//! big-endian length prefix ([`read_frame`]/[`write_frame`]); queue
//! substrates carry whole payloads and need no framing.

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::types::{Error, Result};

/// Wire tag: request from a caller, expects exactly one response.
pub const REQUEST: u64 = 0;
/// Wire tag: response correlated to a request by id.
pub const RESPONSE: u64 = 1;
/// Wire tag: notification, no reply ever.
pub const NOTIFY: u64 = 2;

/// A decoded wire message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request {
        id: u32,
        method: String,
        params: Vec<Value>,
    },
    Response {
        id: u32,
        error: Option<Value>,
        result: Option<Value>,
    },
    Notify {
        method: String,
        params: Vec<Value>,
    },
}

impl Message {
    /// Encode to msgpack bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let tuple = match self {
            Message::Request { id, method, params } => json!([REQUEST, id, method, params]),
            Message::Response { id, error, result } => json!([RESPONSE, id, error, result]),
            Message::Notify { method, params } => json!([NOTIFY, method, params]),
        };
        Ok(rmp_serde::to_vec(&tuple)?)
    }

    /// Decode from msgpack bytes.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let value: Value = rmp_serde::from_slice(data)?;
        let items = value
            .as_array()
            .ok_or_else(|| Error::codec("message is not an array"))?;
        let tag = items
            .first()
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::codec("message has no integer tag"))?;

        match tag {
            REQUEST => {
                check_arity(items, 4, "request")?;
                Ok(Message::Request {
                    id: decode_id(&items[1])?,
                    method: decode_method(&items[2])?,
                    params: decode_params(&items[3])?,
                })
            }
            RESPONSE => {
                check_arity(items, 4, "response")?;
                Ok(Message::Response {
                    id: decode_id(&items[1])?,
                    error: decode_optional(&items[2]),
                    result: decode_optional(&items[3]),
                })
            }
            NOTIFY => {
                check_arity(items, 3, "notify")?;
                Ok(Message::Notify {
                    method: decode_method(&items[1])?,
                    params: decode_params(&items[2])?,
                })
            }
            other => Err(Error::codec(format!("unknown message tag: {}", other))),
        }
    }
}

fn check_arity(items: &[Value], expected: usize, kind: &str) -> Result<()> {
    if items.len() != expected {
        return Err(Error::codec(format!(
            "{} must have {} elements, got {}",
            kind,
            expected,
            items.len()
        )));
    }
    Ok(())
}

fn decode_id(value: &Value) -> Result<u32> {
    value
        .as_u64()
        .and_then(|id| u32::try_from(id).ok())
        .ok_or_else(|| Error::codec("message id is not a u32"))
}

fn decode_method(value: &Value) -> Result<String> {
    value
        .as_str()
        .map(str::to_owned)
        .ok_or_else(|| Error::codec("method name is not a string"))
}

fn decode_params(value: &Value) -> Result<Vec<Value>> {
    value
        .as_array()
        .cloned()
        .ok_or_else(|| Error::codec("params is not an array"))
}

/// Nil on the wire means "absent"; everything else is the payload.
fn decode_optional(value: &Value) -> Option<Value> {
    if value.is_null() {
        None
    } else {
        Some(value.clone())
    }
}

/// Read one length-prefixed frame from the stream.
///
/// Returns the payload bytes, or `None` on clean EOF. `max_frame_bytes`
/// caps the maximum accepted payload size.
pub async fn read_frame<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    max_frame_bytes: u32,
) -> std::io::Result<Option<Vec<u8>>> {
    // Read 4-byte length prefix
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let frame_len = u32::from_be_bytes(len_buf);
    if frame_len > max_frame_bytes {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Frame too large: {} bytes", frame_len),
        ));
    }
    if frame_len == 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "Frame too short: empty payload",
        ));
    }

    let mut payload = vec![0u8; frame_len as usize];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

/// Write one length-prefixed frame to the stream.
///
/// Rejects payloads [`read_frame`] could never accept: empty, or too
/// large for the 4-byte length prefix.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    payload: &[u8],
) -> std::io::Result<()> {
    if payload.is_empty() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "Frame too short: empty payload",
        ));
    }
    let frame_len = u32::try_from(payload.len()).map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Frame too large: {} bytes", payload.len()),
        )
    })?;
    writer.write_all(&frame_len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}
