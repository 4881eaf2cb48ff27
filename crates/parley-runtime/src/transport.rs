//! Client-side socket transport
//!
//! One connection per call: connect, write the encoded request, half-close,
//! read the one response, done. The socket is closed on every exit path —
//! success, timeout, or write failure — because both halves are dropped when
//! the round-trip returns.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use parley_core::errors::{ParleyError, Result, TransportError};

// ----------------------------------------------------------------------------
// Connector
// ----------------------------------------------------------------------------

/// Opens one timeout-bound connection per call
#[derive(Debug, Clone)]
pub struct Connector {
    host: String,
    port: u16,
}

impl Connector {
    pub fn new<H: Into<String>>(host: H, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Send one encoded request and read the one response.
    ///
    /// `read_timeout` bounds both the connect and the read; exceeding it is
    /// a [`TransportError::Timeout`], a peer that closes without responding
    /// is [`TransportError::ConnectionClosed`].
    pub async fn round_trip(&self, payload: &str, read_timeout: Duration) -> Result<String> {
        let duration_ms = read_timeout.as_millis() as u64;

        let stream = timeout(
            read_timeout,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await
        .map_err(|_| ParleyError::Transport(TransportError::Timeout { duration_ms }))?
        .map_err(|source| {
            ParleyError::Transport(TransportError::Connect {
                host: self.host.clone(),
                port: self.port,
                source,
            })
        })?;

        let (mut reader, mut writer) = stream.into_split();

        writer
            .write_all(payload.as_bytes())
            .await
            .map_err(TransportError::Io)?;
        // Half-close tells the server the request is complete.
        writer.shutdown().await.map_err(TransportError::Io)?;

        let mut response = String::new();
        timeout(read_timeout, reader.read_to_string(&mut response))
            .await
            .map_err(|_| ParleyError::Transport(TransportError::Timeout { duration_ms }))?
            .map_err(TransportError::Io)?;

        if response.is_empty() {
            return Err(ParleyError::Transport(TransportError::ConnectionClosed));
        }
        Ok(response)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
