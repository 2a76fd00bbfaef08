use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::frame::{Command, Frame};
use crate::heartbeat;

/// Errors produced while unmarshalling a wire message into a [`Frame`].
///
/// These are diagnostic, per-message failures: the dispatch loop logs and
/// discards the offending message and keeps running.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The message contained no bytes at all.
    #[error("empty message")]
    Empty,
    /// The command token is not part of the STOMP vocabulary.
    #[error("unrecognized command '{0}'")]
    UnknownCommand(String),
    /// A header line contained no `:` separator.
    #[error("malformed header line '{0}'")]
    MalformedHeader(String),
    /// Command or header bytes were not valid UTF-8.
    #[error("invalid utf8 in {0}")]
    InvalidUtf8(&'static str),
}

/// Items travelling over the wire.
///
/// A `StompItem` is either a protocol [`Frame`] or a `Heartbeat` marker
/// representing a single LF received or sent on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StompItem {
    /// A decoded STOMP frame (command + headers + body)
    Frame(Frame),
    /// A single heartbeat pulse (LF)
    Heartbeat,
}

/// Marshal a frame into its wire representation.
///
/// Emits the command, one `key:value` line per header in insertion order,
/// a blank line, the body, and a single terminating NUL. No escaping or
/// validation is performed; keeping literal colons and newlines out of
/// header values is the caller's responsibility. An absent body still gets
/// the NUL terminator.
pub fn marshal(frame: &Frame) -> Bytes {
    let mut buf = BytesMut::with_capacity(frame.body.len() + 64);
    buf.extend_from_slice(frame.command.as_str().as_bytes());
    buf.put_u8(b'\n');
    for (k, v) in &frame.headers {
        buf.extend_from_slice(k.as_bytes());
        buf.put_u8(b':');
        buf.extend_from_slice(v.as_bytes());
        buf.put_u8(b'\n');
    }
    buf.put_u8(b'\n');
    buf.extend_from_slice(&frame.body);
    buf.put_u8(0);
    buf.freeze()
}

/// Unmarshal one complete wire message into a [`StompItem`].
///
/// A message consisting of exactly one LF is a heartbeat, recognized before
/// any generic parsing. Otherwise the first line is the command token,
/// subsequent lines up to the first blank line are headers split on the
/// first `:` (a later duplicate key overwrites an earlier one, so
/// broker-supplied duplicates resolve last-wins), and the remainder is the
/// body, minus one trailing NUL if present. Trailing CRs are stripped from
/// the command and header lines.
pub fn unmarshal(message: &[u8]) -> Result<StompItem, ProtocolError> {
    if heartbeat::is_heartbeat(message) {
        return Ok(StompItem::Heartbeat);
    }
    if message.is_empty() {
        return Err(ProtocolError::Empty);
    }

    let mut pos = 0usize;
    let command_line = read_line(message, &mut pos);
    let token =
        std::str::from_utf8(command_line).map_err(|_| ProtocolError::InvalidUtf8("command"))?;
    let command = Command::parse(token)
        .ok_or_else(|| ProtocolError::UnknownCommand(token.to_string()))?;

    let mut headers: Vec<(String, String)> = Vec::new();
    while pos < message.len() {
        let line = read_line(message, &mut pos);
        if line.is_empty() {
            break;
        }
        let colon = line
            .iter()
            .position(|&b| b == b':')
            .ok_or_else(|| ProtocolError::MalformedHeader(lossy(line)))?;
        let key = std::str::from_utf8(&line[..colon])
            .map_err(|_| ProtocolError::InvalidUtf8("header key"))?;
        let value = std::str::from_utf8(&line[colon + 1..])
            .map_err(|_| ProtocolError::InvalidUtf8("header value"))?;
        match headers.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value.to_string(),
            None => headers.push((key.to_string(), value.to_string())),
        }
    }

    let mut body = &message[pos.min(message.len())..];
    if body.last() == Some(&0) {
        body = &body[..body.len() - 1];
    }

    Ok(StompItem::Frame(Frame {
        command,
        headers,
        body: body.to_vec(),
    }))
}

/// Read one LF-terminated line starting at `*pos`, advancing past the LF.
/// A trailing CR is stripped. Without an LF the rest of the input is the
/// line.
fn read_line<'a>(input: &'a [u8], pos: &mut usize) -> &'a [u8] {
    let start = *pos;
    let end = match input[start..].iter().position(|&b| b == b'\n') {
        Some(rel) => {
            *pos = start + rel + 1;
            start + rel
        }
        None => {
            *pos = input.len();
            input.len()
        }
    };
    let mut line = &input[start..end];
    if line.last() == Some(&b'\r') {
        line = &line[..line.len() - 1];
    }
    line
}

fn lossy(line: &[u8]) -> String {
    String::from_utf8_lossy(line).into_owned()
}
