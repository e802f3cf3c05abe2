//! Echo responder.
//!
//! A single background task that owns the master side of the pty:
//! - Reads whatever bytes a single read returns (no framing)
//! - Logs them as a hex dump or as escaped text
//! - Waits the configured delay
//! - Writes back a response derived from the bytes
//!
//! ## Response Format
//!
//! ```text
//! Raw:      41 42        ->  41 42
//! Prefixed: "hi"         ->  "Echo: hi"
//! ```
//!
//! The loop ends on shutdown, on end of stream, or on the first read or
//! write error. It never reopens the endpoint.

pub mod handler;
pub mod payload;

pub use handler::{run, Outcome, Settings};
pub use payload::{EchoMode, LogFormat};
