//! Full client/server round-trips over real sockets

use std::sync::Arc;
use std::time::Duration;

use parley_core::{ProtocolConfig, SharedProtocolConfig};
use parley_runtime::{
    CallPhase, Client, ConfigValueCommand, CreateSessionCommand, DefaultTextCatalog,
    HandshakeCommand, RpcServer, ServerConfig, ServerEngine, ServerHandle, ServerStatusCommand,
    StaticConfigCatalog, TextCatalog,
};

fn test_config() -> SharedProtocolConfig {
    ProtocolConfig::testing().into_shared()
}

async fn start_server(config: SharedProtocolConfig) -> (ServerHandle, Arc<ServerEngine>) {
    let engine = Arc::new(
        ServerEngine::new(config)
            .unwrap()
            .with_config_values(Arc::new(
                StaticConfigCatalog::new().with_value("library.name", "Main Library"),
            )),
    );
    let server_config = ServerConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        max_workers: 4,
        shutdown_grace_secs: 5,
        connection_timeout_ms: 2_000,
    };
    let handle = RpcServer::spawn(server_config, Arc::clone(&engine))
        .await
        .unwrap();
    (handle, engine)
}

fn client_for(handle: &ServerHandle, config: SharedProtocolConfig) -> Client {
    Client::new(config, "127.0.0.1", handle.local_addr().port()).unwrap()
}

#[tokio::test]
async fn test_create_session_then_duplicate() {
    let mut config = ProtocolConfig::testing();
    config.sessions.max_sessions = 2;
    let config = config.into_shared();

    let (handle, engine) = start_server(Arc::clone(&config)).await;
    let client = client_for(&handle, Arc::clone(&config));

    let mut create = CreateSessionCommand::with_session_id("s1");
    let outcome = client.call(&mut create).await;
    assert_eq!(outcome.phase, CallPhase::Applied);
    assert!(!outcome.is_error());
    assert!(create.server_public_key.is_some());
    assert_eq!(engine.sessions().len(), 1);
    assert_eq!(client.state().last_session_id().as_deref(), Some("s1"));

    // Same id again, from a different client: rejected, store unchanged.
    let other = client_for(&handle, Arc::clone(&config));
    let mut duplicate = CreateSessionCommand::with_session_id("s1");
    let outcome = other.call(&mut duplicate).await;
    assert_eq!(outcome.error_code(), Some("SessionAlreadyExistsError"));
    assert_eq!(engine.sessions().len(), 1);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_handshake_requires_live_session() {
    let (handle, _engine) = start_server(test_config()).await;
    let client = client_for(&handle, test_config());

    let mut handshake = HandshakeCommand::for_session("never-created");
    let outcome = client.call(&mut handshake).await;
    assert_eq!(outcome.error_code(), Some("UnknownSessionError"));
    assert!(handshake.server_public_key.is_none());

    handle.shutdown().await;
}

#[tokio::test]
async fn test_handshake_after_create_stores_server_key() {
    let (handle, _engine) = start_server(test_config()).await;
    let client = client_for(&handle, test_config());

    let mut create = CreateSessionCommand::new();
    assert!(!client.call(&mut create).await.is_error());

    let mut handshake = HandshakeCommand::new();
    let outcome = client.call(&mut handshake).await;
    assert_eq!(outcome.phase, CallPhase::Applied);
    assert_eq!(
        client.state().server_public_key(),
        handshake.server_public_key
    );

    handle.shutdown().await;
}

#[tokio::test]
async fn test_status_and_config_lookup() {
    let (handle, _engine) = start_server(test_config()).await;
    let client = client_for(&handle, test_config());
    client.call(&mut CreateSessionCommand::new()).await;

    let mut status = ServerStatusCommand::new();
    let outcome = client.call(&mut status).await;
    assert!(!outcome.is_error());
    let status = status.status.unwrap();
    assert_eq!(status.session_count, Some(1));
    assert_eq!(status.encrypted, Some(false));

    let mut lookup = ConfigValueCommand::new("library.name");
    assert!(!client.call(&mut lookup).await.is_error());
    assert_eq!(lookup.value.as_deref(), Some("Main Library"));

    let mut missing = ConfigValueCommand::new("no.such.key");
    let outcome = client.call(&mut missing).await;
    assert_eq!(outcome.error_code(), Some("ServerExecutionError"));
    assert!(missing.value.is_none());

    handle.shutdown().await;
}

#[tokio::test]
async fn test_silent_server_yields_timeout_error_envelope() {
    // A listener that accepts and never answers.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (_stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    let mut config = ProtocolConfig::testing();
    config.timeouts.default_ms = 200;
    let client = Client::new(config.into_shared(), "127.0.0.1", addr.port()).unwrap();

    let mut create = CreateSessionCommand::new();
    let outcome = client.call(&mut create).await;
    assert_eq!(outcome.phase, CallPhase::Failed);
    assert_eq!(outcome.error_code(), Some("SocketTimeoutError"));
    let error = outcome.response.error().unwrap();
    // The displayed message is the catalog body for transport failures,
    // not the raw io error.
    assert_eq!(
        error.messages,
        vec![DefaultTextCatalog.text("error.transport.body")]
    );
    // The synthesized envelope carries the diagnostic dump.
    assert!(!error.detail.is_empty());
}

#[tokio::test]
async fn test_encrypted_calls_after_key_exchange() {
    let mut config = ProtocolConfig::testing();
    config.encrypt = true;
    let config = config.into_shared();

    let (handle, _engine) = start_server(Arc::clone(&config)).await;
    let client = client_for(&handle, Arc::clone(&config));

    // First call travels in cleartext; the server key is not known yet.
    let mut create = CreateSessionCommand::new();
    assert!(!client.call(&mut create).await.is_error());
    assert!(client.state().server_public_key().is_some());

    // Subsequent calls are sealed both ways.
    let mut status = ServerStatusCommand::new();
    let outcome = client.call(&mut status).await;
    assert!(!outcome.is_error());
    assert_eq!(status.status.unwrap().encrypted, Some(true));

    handle.shutdown().await;
}
