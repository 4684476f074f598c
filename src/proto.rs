//! Wire protocol frames and codec.
//!
//! Protocol: newline-delimited JSON (ndjson) over a persistent TCP stream.
//!
//! Request format: `{"command": "simulator/run", "arguments": {...}}\n`
//! Reply format: `{"result": ...}\n` or `{"error": "..."}\n`
//!
//! The protocol is strictly half-duplex: every request line is answered by
//! exactly one reply line, in order. There are no request identifiers.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Outbound command frame.
#[derive(Debug, Clone, Serialize)]
pub struct CommandFrame<'a> {
    pub command: &'a str,
    pub arguments: &'a Value,
}

/// Decoded reply frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// `{"result": ...}` — success; `null` is a valid result.
    Result(Value),
    /// `{"error": "..."}` — the peer rejected the command.
    Error(String),
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("reply carries neither result nor error: {0}")]
    MalformedReply(String),
}

/// Encode a command as one ndjson line, trailing newline included.
pub fn encode_command(command: &str, arguments: &Value) -> Result<Vec<u8>, FrameError> {
    let mut line = serde_json::to_string(&CommandFrame { command, arguments })?;
    line.push('\n');
    Ok(line.into_bytes())
}

/// Decode one reply line.
pub fn decode_reply(line: &str) -> Result<Reply, FrameError> {
    let value: Value = serde_json::from_str(line)?;
    let Value::Object(mut map) = value else {
        return Err(FrameError::MalformedReply(excerpt(line)));
    };
    if let Some(result) = map.remove("result") {
        return Ok(Reply::Result(result));
    }
    match map.remove("error") {
        Some(Value::String(message)) => Ok(Reply::Error(message)),
        _ => Err(FrameError::MalformedReply(excerpt(line))),
    }
}

fn excerpt(line: &str) -> String {
    const MAX: usize = 128;
    if line.len() <= MAX {
        line.to_string()
    } else {
        let mut cut = MAX;
        while !line.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}...", &line[..cut])
    }
}
