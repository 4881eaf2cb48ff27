//! Socket server
//!
//! Accept loop feeding a bounded worker pool. Each connection carries one
//! request: read to EOF, hand the frame to the [`ServerEngine`], write the
//! one response, close. Shutdown is cooperative with a grace period, after
//! which stragglers are aborted.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use parley_core::errors::{ParleyError, Result, TransportError};

use crate::dispatch::ServerEngine;

// ----------------------------------------------------------------------------
// Server Configuration
// ----------------------------------------------------------------------------

/// Listener and worker-pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the listener binds to
    pub bind_addr: String,
    /// Worker pool size; connections beyond it wait for a free worker
    pub max_workers: usize,
    /// Seconds to wait for in-flight calls on shutdown before aborting
    pub shutdown_grace_secs: u64,
    /// Per-connection read/write deadline in milliseconds
    pub connection_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:7464".to_string(),
            max_workers: 32,
            shutdown_grace_secs: 60,
            connection_timeout_ms: 30_000,
        }
    }
}

// ----------------------------------------------------------------------------
// Server
// ----------------------------------------------------------------------------

/// A running socket server
pub struct RpcServer;

impl RpcServer {
    /// Bind and start serving. Returns once the listener is live.
    pub async fn spawn(config: ServerConfig, engine: Arc<ServerEngine>) -> Result<ServerHandle> {
        let listener = TcpListener::bind(&config.bind_addr)
            .await
            .map_err(TransportError::Io)?;
        let local_addr = listener.local_addr().map_err(TransportError::Io)?;
        info!(%local_addr, max_workers = config.max_workers, "server listening");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let workers = Arc::new(Semaphore::new(config.max_workers.max(1)));
        let task = tokio::spawn(accept_loop(
            listener,
            config,
            engine,
            Arc::clone(&workers),
            shutdown_rx,
        ));

        Ok(ServerHandle {
            local_addr,
            shutdown: shutdown_tx,
            workers,
            task,
        })
    }
}

/// Handle to a running server: its address, a shutdown trigger, and the
/// ability to grow the worker pool at runtime
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    workers: Arc<Semaphore>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Grow the worker pool by `count` permits. Shrinking is not supported;
    /// in-flight workers cannot be reclaimed safely.
    pub fn add_workers(&self, count: usize) {
        self.workers.add_permits(count);
    }

    /// Stop accepting, wait for in-flight calls, then return.
    pub async fn shutdown(self) {
        // Receiver dropped means the loop already exited; nothing to signal.
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            error!(error = %err, "server task ended abnormally");
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    config: ServerConfig,
    engine: Arc<ServerEngine>,
    workers: Arc<Semaphore>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut in_flight = JoinSet::new();

    loop {
        // A free worker is required before accepting; the backlog queues in
        // the listener instead of in unbounded tasks.
        let permit = tokio::select! {
            _ = shutdown.changed() => break,
            permit = Arc::clone(&workers).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let accepted = tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                debug!(%peer, "connection accepted");
                let engine = Arc::clone(&engine);
                let deadline = Duration::from_millis(config.connection_timeout_ms);
                in_flight.spawn(async move {
                    if let Err(err) = handle_connection(stream, &engine, deadline).await {
                        warn!(%peer, error = %err, "connection failed");
                    }
                    drop(permit);
                });
            }
            Err(err) => {
                warn!(error = %err, "accept failed");
                drop(permit);
            }
        }
    }

    drop(listener);
    drain(in_flight, Duration::from_secs(config.shutdown_grace_secs)).await;
    info!("server stopped");
}

/// Wait for in-flight calls up to the grace period, then abort the rest
async fn drain(mut in_flight: JoinSet<()>, grace: Duration) {
    let waited = tokio::time::timeout(grace, async {
        while in_flight.join_next().await.is_some() {}
    })
    .await;
    if waited.is_err() {
        warn!(
            remaining = in_flight.len(),
            "grace period expired, aborting in-flight calls"
        );
        in_flight.abort_all();
        while in_flight.join_next().await.is_some() {}
    }
}

/// One request, one response, close
async fn handle_connection(
    mut stream: TcpStream,
    engine: &ServerEngine,
    deadline: Duration,
) -> Result<()> {
    let mut request = String::new();
    tokio::time::timeout(deadline, stream.read_to_string(&mut request))
        .await
        .map_err(|_| {
            ParleyError::Transport(TransportError::Timeout {
                duration_ms: deadline.as_millis() as u64,
            })
        })?
        .map_err(TransportError::Io)?;

    if request.is_empty() {
        return Err(ParleyError::Transport(TransportError::ConnectionClosed));
    }

    let response = engine.handle(&request);

    tokio::time::timeout(deadline, async {
        stream.write_all(response.as_bytes()).await?;
        stream.shutdown().await
    })
    .await
    .map_err(|_| {
        ParleyError::Transport(TransportError::Timeout {
            duration_ms: deadline.as_millis() as u64,
        })
    })?
    .map_err(TransportError::Io)?;
    Ok(())
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Connector;
    use parley_core::envelope::props;
    use parley_core::{codec, CommandId, Envelope, KeyPair, ProtocolConfig};

    async fn running_server() -> ServerHandle {
        let engine = Arc::new(ServerEngine::new(ProtocolConfig::testing().into_shared()).unwrap());
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            max_workers: 4,
            shutdown_grace_secs: 5,
            connection_timeout_ms: 2_000,
        };
        RpcServer::spawn(config, engine).await.unwrap()
    }

    fn create_session_request(session_id: &str) -> String {
        let mut request = Envelope::request(CommandId::CreateSession, "app", "1.0");
        request.session_id = session_id.to_string();
        request.set_property(props::CLIENT_PUBLIC_KEY, KeyPair::generate().public_hex());
        codec::encode(&request, None).unwrap()
    }

    #[tokio::test]
    async fn test_serves_one_call_per_connection() {
        let handle = running_server().await;
        let connector = Connector::new("127.0.0.1", handle.local_addr().port());

        let raw = connector
            .round_trip(&create_session_request("s1"), Duration::from_secs(2))
            .await
            .unwrap();
        let response = codec::decode(&raw, None).unwrap();
        assert!(!response.is_error());
        assert!(response.property(props::SERVER_PUBLIC_KEY).is_some());

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_concurrent_calls_share_one_store() {
        let handle = running_server().await;
        let port = handle.local_addr().port();

        let mut tasks = JoinSet::new();
        for i in 0..8 {
            tasks.spawn(async move {
                let connector = Connector::new("127.0.0.1", port);
                connector
                    .round_trip(&create_session_request(&format!("s{i}")), Duration::from_secs(2))
                    .await
            });
        }
        while let Some(result) = tasks.join_next().await {
            let raw = result.unwrap().unwrap();
            assert!(!codec::decode(&raw, None).unwrap().is_error());
        }

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_racing_creation_of_one_session_id_has_single_winner() {
        let engine = Arc::new(ServerEngine::new(ProtocolConfig::testing().into_shared()).unwrap());
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            max_workers: 8,
            shutdown_grace_secs: 5,
            connection_timeout_ms: 2_000,
        };
        let handle = RpcServer::spawn(config, Arc::clone(&engine)).await.unwrap();
        let port = handle.local_addr().port();

        let mut tasks = JoinSet::new();
        for _ in 0..8 {
            tasks.spawn(async move {
                let connector = Connector::new("127.0.0.1", port);
                let raw = connector
                    .round_trip(&create_session_request("s1"), Duration::from_secs(2))
                    .await
                    .unwrap();
                codec::decode(&raw, None).unwrap()
            });
        }

        let mut successes = 0;
        let mut duplicates = 0;
        while let Some(result) = tasks.join_next().await {
            match result.unwrap().error_code() {
                None => successes += 1,
                Some("SessionAlreadyExistsError") => duplicates += 1,
                Some(other) => panic!("unexpected error code {other}"),
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(duplicates, 7);
        assert_eq!(engine.sessions().len(), 1);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_resolves_promptly_when_idle() {
        let handle = running_server().await;
        tokio::time::timeout(Duration::from_secs(2), handle.shutdown())
            .await
            .expect("idle shutdown should not wait out the grace period");
    }
}
