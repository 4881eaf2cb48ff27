//! Server-side command dispatch
//!
//! [`ServerEngine::handle`] turns one raw request frame into one encoded
//! response frame, always. Decode failures, unknown commands, missing
//! sessions, and handler errors all come back as error envelopes; nothing
//! escapes as a panic or a silent drop. Each call runs through the same
//! phase sequence (received, validated, executed, responded) under its own
//! forked diagnostic context.

use std::sync::Arc;

use parley_core::codec;
use parley_core::crypto::{self, PublicKey};
use parley_core::envelope::props;
use parley_core::errors::{EngineError, ErrorCode, ParleyError, Result};
use parley_core::wire::WireFormat;
use parley_core::{
    CallContext, CommandId, DeliveryMode, Envelope, ErrorInfo, KeyPair, SharedProtocolConfig,
    SystemTimeSource, TimeSource, TracingSink,
};

use crate::catalog::{headline_key, ConfigCatalog, DefaultTextCatalog, StaticConfigCatalog, TextCatalog};
use crate::convert;
use crate::session_store::SessionStore;

// ----------------------------------------------------------------------------
// Phases
// ----------------------------------------------------------------------------

/// Lifecycle of one server-side call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerPhase {
    Received,
    Validated,
    Executed,
    Responded,
}

impl core::fmt::Display for ServerPhase {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            ServerPhase::Received => "received",
            ServerPhase::Validated => "validated",
            ServerPhase::Executed => "executed",
            ServerPhase::Responded => "responded",
        };
        f.write_str(name)
    }
}

// ----------------------------------------------------------------------------
// Server Command Trait
// ----------------------------------------------------------------------------

/// One server-side command implementation.
///
/// `validate` checks the request before any state is touched, `execute`
/// produces the response properties, `evaluate` asserts the response is
/// complete before it leaves the server.
pub trait ServerCommand: Send + Sync {
    fn id(&self) -> CommandId;

    fn validate(&self, request: &Envelope, ctx: &mut CallContext) -> Result<()>;

    fn execute(
        &self,
        request: &Envelope,
        response: &mut Envelope,
        engine: &ServerEngine,
        ctx: &mut CallContext,
    ) -> Result<()>;

    fn evaluate(&self, response: &Envelope, ctx: &mut CallContext) -> Result<()>;
}

/// The handler for a command identifier
pub fn handler_for(command: CommandId) -> &'static dyn ServerCommand {
    match command {
        CommandId::Handshake => &HandshakeOp,
        CommandId::CreateSession => &CreateSessionOp,
        CommandId::ServerStatus => &ServerStatusOp,
        CommandId::ConfigValue => &ConfigValueOp,
    }
}

// ----------------------------------------------------------------------------
// Server Engine
// ----------------------------------------------------------------------------

/// Decodes requests, dispatches commands, encodes responses
pub struct ServerEngine {
    config: SharedProtocolConfig,
    keys: KeyPair,
    sessions: Arc<SessionStore>,
    config_values: Arc<dyn ConfigCatalog>,
    texts: Arc<dyn TextCatalog>,
    time_source: Arc<dyn TimeSource>,
    root: CallContext,
}

impl ServerEngine {
    /// Build an engine from configuration.
    ///
    /// A configured private key is used as-is; without one a fresh key pair
    /// is generated, which is fine for a server whose clients learn the
    /// public key through the handshake.
    pub fn new(config: SharedProtocolConfig) -> Result<Self> {
        let keys = match &config.identity.private_key {
            Some(secret_hex) => KeyPair::from_secret_hex(secret_hex)?,
            None => KeyPair::generate(),
        };
        let time_source: Arc<dyn TimeSource> = Arc::new(SystemTimeSource);
        let sessions = Arc::new(SessionStore::new(
            config.sessions.max_sessions,
            config.sessions.evict_percent,
            Arc::clone(&time_source),
        ));
        let root = CallContext::new(
            DeliveryMode::BufferUntilError,
            Arc::new(TracingSink),
            config.diagnostics.max_buffered_messages,
        );
        Ok(Self {
            config,
            keys,
            sessions,
            config_values: Arc::new(StaticConfigCatalog::new()),
            texts: Arc::new(DefaultTextCatalog),
            time_source,
            root,
        })
    }

    /// Replace the configuration value catalog
    pub fn with_config_values(mut self, catalog: Arc<dyn ConfigCatalog>) -> Self {
        self.config_values = catalog;
        self
    }

    /// Replace the text catalog
    pub fn with_texts(mut self, texts: Arc<dyn TextCatalog>) -> Self {
        self.texts = texts;
        self
    }

    /// Replace the clock. Rebuilds the session store so recency ordering
    /// follows the new source.
    pub fn with_time_source(mut self, time_source: Arc<dyn TimeSource>) -> Self {
        self.sessions = Arc::new(SessionStore::new(
            self.config.sessions.max_sessions,
            self.config.sessions.evict_percent,
            Arc::clone(&time_source),
        ));
        self.time_source = time_source;
        self
    }

    /// Replace the root diagnostic context calls are forked from
    pub fn with_diagnostics(mut self, root: CallContext) -> Self {
        self.root = root;
        self
    }

    /// Hex encoding of the server's public key
    pub fn public_key_hex(&self) -> String {
        self.keys.public_hex()
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Process one raw request frame into one encoded response frame.
    ///
    /// The response is sealed only when the request arrived sealed and the
    /// client's public key is known, from the request itself or from the
    /// session record.
    pub fn handle(&self, raw: &str) -> String {
        let mut ctx = self.root.fork(self.root.mode());
        let sealed = codec::is_sealed(raw.trim_start());

        let request = match codec::decode(raw, Some(&self.keys)) {
            Ok(request) => request,
            Err(err) => {
                // No identity fields to mirror; answer with what we know.
                ctx.log(format!("request frame rejected: {err}"));
                let response = self.fail_response(Envelope::bare("Unknown"), &err, &mut ctx);
                return WireFormat::encode(&response);
            }
        };

        let recipient = if sealed {
            self.client_key_for(&request)
        } else {
            None
        };

        let response = self.dispatch(&request, &mut ctx);
        self.encode_response(&response, recipient.as_ref())
    }

    fn dispatch(&self, request: &Envelope, ctx: &mut CallContext) -> Envelope {
        let mut response = Envelope::response_to(request);
        ctx.log(format!(
            "{}: {} for session {:?}",
            ServerPhase::Received,
            request.command,
            request.session_id
        ));

        let command = match CommandId::parse(&request.command) {
            Some(command) => command,
            None => {
                let err = ParleyError::Engine(EngineError::UnknownCommand {
                    command: request.command.clone(),
                });
                return self.fail_response(response, &err, ctx);
            }
        };

        let handler = handler_for(command);
        if let Err(err) = self.run_phases(handler, request, &mut response, ctx) {
            return self.fail_response(response, &err, ctx);
        }
        ctx.log(ServerPhase::Responded.to_string());
        response
    }

    fn run_phases(
        &self,
        handler: &dyn ServerCommand,
        request: &Envelope,
        response: &mut Envelope,
        ctx: &mut CallContext,
    ) -> Result<()> {
        handler.validate(request, ctx)?;
        ctx.log(ServerPhase::Validated.to_string());

        // Every command except session creation requires a live session;
        // the existence check doubles as the recency touch.
        if !handler.id().creates_session() && !self.sessions.check_exists(&request.session_id) {
            return Err(ParleyError::unknown_session(request.session_id.trim()));
        }

        handler.execute(request, response, self, ctx)?;
        ctx.log(ServerPhase::Executed.to_string());

        if !ctx.background_checks_suspended() {
            self.sessions.verify_integrity()?;
        }

        handler.evaluate(response, ctx)
    }

    /// Turn a failure into an error response carrying the context dump
    fn fail_response(
        &self,
        mut response: Envelope,
        err: &ParleyError,
        ctx: &mut CallContext,
    ) -> Envelope {
        let code = err.error_code();
        ctx.set_first_error(code, err.to_string(), None);
        let headline = self.texts.text(headline_key(code));
        response.fail(
            ErrorInfo::new(code, headline)
                .with_messages(vec![err.to_string()])
                .with_detail(ctx.dump()),
        );
        response
    }

    fn encode_response(&self, response: &Envelope, recipient: Option<&PublicKey>) -> String {
        match codec::encode(response, recipient) {
            Ok(raw) => raw,
            Err(err) => {
                // Sealing failed; the cleartext error form always encodes.
                tracing::error!(error = %err, "response could not be sealed");
                let mut fallback = Envelope::response_to(response);
                fallback.fail(
                    ErrorInfo::new(ErrorCode::Encoding, self.texts.text("error.server.headline"))
                        .with_messages(vec![err.to_string()]),
                );
                WireFormat::encode(&fallback)
            }
        }
    }

    /// The client public key to seal a response with, when one is known
    fn client_key_for(&self, request: &Envelope) -> Option<PublicKey> {
        let key_hex = request
            .property(props::CLIENT_PUBLIC_KEY)
            .map(str::to_string)
            .or_else(|| {
                self.sessions
                    .get(&request.session_id)
                    .map(|record| record.client_public_key)
            })?;
        crypto::parse_public_key(&key_hex).ok()
    }
}

impl core::fmt::Debug for ServerEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ServerEngine")
            .field("public_key", &self.keys.public_hex())
            .field("sessions", &self.sessions)
            .finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// Handshake
// ----------------------------------------------------------------------------

/// Public key exchange against an existing session
struct HandshakeOp;

impl ServerCommand for HandshakeOp {
    fn id(&self) -> CommandId {
        CommandId::Handshake
    }

    fn validate(&self, request: &Envelope, ctx: &mut CallContext) -> Result<()> {
        let client_key = request.require_property(props::CLIENT_PUBLIC_KEY)?;
        crypto::parse_public_key(client_key)?;
        ctx.log("client public key accepted");
        Ok(())
    }

    fn execute(
        &self,
        _request: &Envelope,
        response: &mut Envelope,
        engine: &ServerEngine,
        _ctx: &mut CallContext,
    ) -> Result<()> {
        response.set_property(props::SERVER_PUBLIC_KEY, engine.public_key_hex());
        Ok(())
    }

    fn evaluate(&self, response: &Envelope, _ctx: &mut CallContext) -> Result<()> {
        response.require_property(props::SERVER_PUBLIC_KEY)?;
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Create Session
// ----------------------------------------------------------------------------

/// Key exchange plus registration of a new session id
struct CreateSessionOp;

impl ServerCommand for CreateSessionOp {
    fn id(&self) -> CommandId {
        CommandId::CreateSession
    }

    fn validate(&self, request: &Envelope, ctx: &mut CallContext) -> Result<()> {
        if request.session_id.trim().is_empty() {
            return Err(ParleyError::missing_field("session id"));
        }
        let client_key = request.require_property(props::CLIENT_PUBLIC_KEY)?;
        crypto::parse_public_key(client_key)?;
        ctx.log(format!("session {:?} requested", request.session_id.trim()));
        Ok(())
    }

    fn execute(
        &self,
        request: &Envelope,
        response: &mut Envelope,
        engine: &ServerEngine,
        ctx: &mut CallContext,
    ) -> Result<()> {
        let session_id = request.session_id.trim();
        let client_key = request.require_property(props::CLIENT_PUBLIC_KEY)?;
        if !engine.sessions.add(session_id, client_key) {
            return Err(ParleyError::session_exists(session_id));
        }
        ctx.log(format!("session {session_id:?} registered"));
        response.set_property(props::SERVER_PUBLIC_KEY, engine.public_key_hex());
        Ok(())
    }

    fn evaluate(&self, response: &Envelope, _ctx: &mut CallContext) -> Result<()> {
        response.require_property(props::SERVER_PUBLIC_KEY)?;
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Server Status
// ----------------------------------------------------------------------------

/// Server time, live session count, and encryption expectation
struct ServerStatusOp;

impl ServerCommand for ServerStatusOp {
    fn id(&self) -> CommandId {
        CommandId::ServerStatus
    }

    fn validate(&self, _request: &Envelope, _ctx: &mut CallContext) -> Result<()> {
        Ok(())
    }

    fn execute(
        &self,
        _request: &Envelope,
        response: &mut Envelope,
        engine: &ServerEngine,
        _ctx: &mut CallContext,
    ) -> Result<()> {
        let now = engine.time_source.now();
        response.set_property(props::SERVER_TIME, convert::format_compact_timestamp(now)?);
        response.set_property(props::SESSION_COUNT, engine.sessions.len().to_string());
        response.set_property(props::ENCRYPTED, engine.config.encrypt.to_string());
        Ok(())
    }

    fn evaluate(&self, response: &Envelope, _ctx: &mut CallContext) -> Result<()> {
        response.require_property(props::SERVER_TIME)?;
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Config Value
// ----------------------------------------------------------------------------

/// Configuration value lookup by key
struct ConfigValueOp;

impl ServerCommand for ConfigValueOp {
    fn id(&self) -> CommandId {
        CommandId::ConfigValue
    }

    fn validate(&self, request: &Envelope, _ctx: &mut CallContext) -> Result<()> {
        request.require_property(props::CONFIG_KEY)?;
        Ok(())
    }

    fn execute(
        &self,
        request: &Envelope,
        response: &mut Envelope,
        engine: &ServerEngine,
        ctx: &mut CallContext,
    ) -> Result<()> {
        let key = request.require_property(props::CONFIG_KEY)?;
        match engine.config_values.lookup(key) {
            Some(value) => {
                ctx.log(format!("config key {key:?} resolved"));
                response.set_property(props::CONFIG_VALUE, value);
                Ok(())
            }
            None => Err(ParleyError::execution(format!(
                "no configuration value for key {key:?}"
            ))),
        }
    }

    fn evaluate(&self, response: &Envelope, _ctx: &mut CallContext) -> Result<()> {
        response.require_property(props::CONFIG_VALUE)?;
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::ProtocolConfig;

    fn engine() -> ServerEngine {
        ServerEngine::new(ProtocolConfig::testing().into_shared())
            .unwrap()
            .with_config_values(Arc::new(
                StaticConfigCatalog::new().with_value("storage.root", "/srv/media"),
            ))
    }

    fn client_keys() -> KeyPair {
        KeyPair::generate()
    }

    fn create_session(engine: &ServerEngine, client: &KeyPair, session_id: &str) -> Envelope {
        let mut request = Envelope::request(CommandId::CreateSession, "app", "1.0");
        request.session_id = session_id.to_string();
        request.set_property(props::CLIENT_PUBLIC_KEY, client.public_hex());
        roundtrip(engine, &request)
    }

    fn roundtrip(engine: &ServerEngine, request: &Envelope) -> Envelope {
        let raw = codec::encode(request, None).unwrap();
        codec::decode(&engine.handle(&raw), None).unwrap()
    }

    #[test]
    fn test_create_session_returns_server_key() {
        let engine = engine();
        let response = create_session(&engine, &client_keys(), "s1");
        assert!(!response.is_error());
        assert_eq!(
            response.property(props::SERVER_PUBLIC_KEY),
            Some(engine.public_key_hex().as_str())
        );
        assert_eq!(engine.sessions().len(), 1);
    }

    #[test]
    fn test_duplicate_session_rejected_store_unchanged() {
        let engine = engine();
        let client = client_keys();
        assert!(!create_session(&engine, &client, "s1").is_error());

        let response = create_session(&engine, &client, "s1");
        assert_eq!(response.error_code(), Some("SessionAlreadyExistsError"));
        assert_eq!(engine.sessions().len(), 1);
    }

    #[test]
    fn test_handshake_against_unknown_session_fails() {
        let engine = engine();
        let mut request = Envelope::request(CommandId::Handshake, "app", "1.0");
        request.session_id = "nope".to_string();
        request.set_property(props::CLIENT_PUBLIC_KEY, client_keys().public_hex());

        let response = roundtrip(&engine, &request);
        assert_eq!(response.error_code(), Some("UnknownSessionError"));
    }

    #[test]
    fn test_structural_validation_precedes_session_check() {
        let engine = engine();
        // Handshake with no client key against an unknown session: the
        // malformed request is reported, not the missing session.
        let mut request = Envelope::request(CommandId::Handshake, "app", "1.0");
        request.session_id = "nope".to_string();
        let response = roundtrip(&engine, &request);
        assert_eq!(response.error_code(), Some("ProtocolValidationError"));
    }

    #[test]
    fn test_handshake_against_live_session() {
        let engine = engine();
        let client = client_keys();
        create_session(&engine, &client, "s1");

        let mut request = Envelope::request(CommandId::Handshake, "app", "1.0");
        request.session_id = "s1".to_string();
        request.set_property(props::CLIENT_PUBLIC_KEY, client.public_hex());

        let response = roundtrip(&engine, &request);
        assert!(!response.is_error());
        assert!(response.property(props::SERVER_PUBLIC_KEY).is_some());
    }

    #[test]
    fn test_server_status_reports_count_and_time() {
        let engine = engine();
        create_session(&engine, &client_keys(), "s1");

        let mut request = Envelope::request(CommandId::ServerStatus, "app", "1.0");
        request.session_id = "s1".to_string();
        let response = roundtrip(&engine, &request);

        assert!(!response.is_error());
        assert_eq!(response.property(props::SESSION_COUNT), Some("1"));
        assert_eq!(response.property(props::ENCRYPTED), Some("false"));
        let time = response.property(props::SERVER_TIME).unwrap();
        assert_eq!(time.len(), 14);
        assert!(convert::parse_compact_timestamp(time).is_ok());
    }

    #[test]
    fn test_config_value_lookup() {
        let engine = engine();
        create_session(&engine, &client_keys(), "s1");

        let mut request = Envelope::request(CommandId::ConfigValue, "app", "1.0");
        request.session_id = "s1".to_string();
        request.set_property(props::CONFIG_KEY, "storage.root");
        let response = roundtrip(&engine, &request);
        assert_eq!(response.property(props::CONFIG_VALUE), Some("/srv/media"));
    }

    #[test]
    fn test_missing_config_key_is_server_execution_error() {
        let engine = engine();
        create_session(&engine, &client_keys(), "s1");

        let mut request = Envelope::request(CommandId::ConfigValue, "app", "1.0");
        request.session_id = "s1".to_string();
        request.set_property(props::CONFIG_KEY, "no.such.key");
        let response = roundtrip(&engine, &request);
        assert_eq!(response.error_code(), Some("ServerExecutionError"));
        assert!(!response.error().unwrap().detail.is_empty());
    }

    #[test]
    fn test_unknown_command_rejected() {
        let engine = engine();
        let mut request = Envelope::request(CommandId::ServerStatus, "app", "1.0");
        request.command = "DropTables".to_string();
        let response = roundtrip(&engine, &request);
        assert_eq!(response.error_code(), Some("UnknownCommandError"));
    }

    #[test]
    fn test_garbage_frame_gets_decoding_error_response() {
        let engine = engine();
        let response = codec::decode(&engine.handle("not a frame"), None).unwrap();
        assert_eq!(response.error_code(), Some("DecodingError"));
    }

    #[test]
    fn test_sealed_request_gets_sealed_response() {
        let engine = engine();
        let client = client_keys();
        let server_public = crypto::parse_public_key(&engine.public_key_hex()).unwrap();

        let mut request = Envelope::request(CommandId::CreateSession, "app", "1.0");
        request.session_id = "s1".to_string();
        request.set_property(props::CLIENT_PUBLIC_KEY, client.public_hex());

        let raw = codec::encode(&request, Some(&server_public)).unwrap();
        let reply = engine.handle(&raw);
        assert!(codec::is_sealed(&reply));

        let response = codec::decode(&reply, Some(&client)).unwrap();
        assert!(!response.is_error());
    }

    #[test]
    fn test_cleartext_request_gets_cleartext_response() {
        let engine = engine();
        let response = create_session(&engine, &client_keys(), "s1");
        assert!(!response.is_error());
    }

    #[test]
    fn test_validation_failure_carries_context_dump() {
        let engine = engine();
        // CreateSession without a client public key.
        let mut request = Envelope::request(CommandId::CreateSession, "app", "1.0");
        request.session_id = "s1".to_string();
        let response = roundtrip(&engine, &request);
        assert_eq!(response.error_code(), Some("ProtocolValidationError"));
        assert!(response
            .error()
            .unwrap()
            .detail
            .contains("ProtocolValidationError"));
    }
}
