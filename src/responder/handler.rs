//! The echo loop.

use bytes::BytesMut;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use super::payload::{render, EchoMode, LogFormat, Message};
use crate::config::Config;
use crate::shutdown::Shutdown;

/// Responder behaviour, resolved from [`Config`].
#[derive(Debug, Clone)]
pub struct Settings {
    pub mode: EchoMode,
    pub log_format: LogFormat,
    pub delay: Duration,
    pub buffer_size: usize,
}

impl From<&Config> for Settings {
    fn from(config: &Config) -> Self {
        Self {
            mode: config.mode.clone(),
            log_format: config.log_format,
            delay: config.delay,
            buffer_size: config.buffer_size,
        }
    }
}

/// Why the loop stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Shutdown was triggered.
    Cancelled,
    /// A read returned zero bytes.
    PeerClosed,
}

/// Endpoint I/O failures. Both are fatal to the responder.
#[derive(Debug, Error)]
pub enum ResponderError {
    #[error("read from endpoint failed: {0}")]
    Read(#[source] io::Error),
    #[error("write to endpoint failed: {0}")]
    Write(#[source] io::Error),
}

/// Run the echo loop over `port` until shutdown, end of stream, or an I/O error.
///
/// Each non-empty read produces exactly one response, written no earlier
/// than `settings.delay` after the read completed. Responses go out in the
/// order their messages arrived.
pub async fn run<S>(
    mut port: S,
    settings: &Settings,
    shutdown: Shutdown,
) -> Result<Outcome, ResponderError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buffer = BytesMut::zeroed(settings.buffer_size);
    let mut messages: u64 = 0;
    let mut echoed: u64 = 0;

    let outcome = loop {
        let n = tokio::select! {
            biased;
            _ = shutdown.wait() => break Outcome::Cancelled,
            res = port.read(&mut buffer[..]) => res.map_err(ResponderError::Read)?,
        };

        if n == 0 {
            info!("Peer closed the endpoint");
            break Outcome::PeerClosed;
        }

        let message = Message::new(buffer.split_to(n).freeze());
        buffer.resize(settings.buffer_size, 0);

        info!(len = message.len(), "received: {}", message.render(settings.log_format));

        let due = message.received_at() + settings.delay;
        tokio::select! {
            biased;
            _ = shutdown.wait() => {
                debug!(len = message.len(), "Dropping pending response on shutdown");
                break Outcome::Cancelled;
            }
            _ = tokio::time::sleep_until(due) => {}
        }

        let response = message.respond(&settings.mode);

        // A client that stops reading fills the slave's input queue and the
        // write stays pending; shutdown must still get through.
        let written = async {
            port.write_all(&response).await?;
            port.flush().await
        };
        tokio::select! {
            biased;
            _ = shutdown.wait() => {
                debug!(len = response.len(), "Abandoning blocked response on shutdown");
                break Outcome::Cancelled;
            }
            res = written => res.map_err(ResponderError::Write)?,
        }

        messages += 1;
        echoed += response.len() as u64;
        debug!(len = response.len(), "sent: {}", render(&response, settings.log_format));
    };

    debug!(messages, bytes = echoed, outcome = ?outcome, "Responder stopped");
    Ok(outcome)
}
