//! Messages received from the master side and the responses derived from them.

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt::Write;
use tokio::time::Instant;

/// How a response is derived from a received message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EchoMode {
    /// Write back exactly the received bytes.
    Raw,
    /// Write back the received bytes behind a fixed tag.
    Prefixed(Bytes),
}

/// How received bytes are rendered in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Space separated lowercase hex pairs: `41 42`.
    Hex,
    /// Lossy UTF-8 with control characters escaped.
    Text,
}

/// Bytes returned by a single read on the master endpoint.
#[derive(Debug, Clone)]
pub struct Message {
    data: Bytes,
    received_at: Instant,
}

impl Message {
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            received_at: Instant::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// When the read that produced this message completed.
    pub fn received_at(&self) -> Instant {
        self.received_at
    }

    /// Build the response for this message.
    pub fn respond(&self, mode: &EchoMode) -> Bytes {
        match mode {
            // Bytes clones are refcounted, no copy
            EchoMode::Raw => self.data.clone(),
            EchoMode::Prefixed(tag) => {
                let mut out = BytesMut::with_capacity(tag.len() + self.data.len());
                out.put_slice(tag);
                out.put_slice(&self.data);
                out.freeze()
            }
        }
    }

    /// Render the payload for logging.
    pub fn render(&self, format: LogFormat) -> String {
        render(&self.data, format)
    }
}

/// Render arbitrary bytes for logging. Never fails on invalid UTF-8.
pub fn render(data: &[u8], format: LogFormat) -> String {
    match format {
        LogFormat::Hex => hex_dump(data),
        LogFormat::Text => escape_text(data),
    }
}

fn hex_dump(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 3);
    for (i, b) in data.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{b:02x}");
    }
    out
}

fn escape_text(data: &[u8]) -> String {
    let decoded = String::from_utf8_lossy(data);
    let mut out = String::with_capacity(decoded.len());
    for c in decoded.chars() {
        if c.is_control() {
            out.extend(c.escape_default());
        } else {
            out.push(c);
        }
    }
    out
}
