//! Client call engine
//!
//! One call is one pass through a fixed phase sequence: prepare the request,
//! send it over a fresh connection, evaluate the response, apply its results
//! locally. Every exit produces an envelope: the server's own response, the
//! server's error, or an error envelope synthesized from the local failure.

use std::sync::Arc;

use parley_core::codec;
use parley_core::crypto::{self, PublicKey};
use parley_core::errors::{ParleyError, Result};
use parley_core::{
    CallContext, CommandId, DeliveryMode, Envelope, ErrorInfo, KeyPair, SharedProtocolConfig,
    TracingSink,
};

use crate::catalog::{body_key, headline_key, DefaultTextCatalog, TextCatalog};
use crate::state_store::{keys, ClientStateStore, MemoryStateStore};
use crate::transport::Connector;

// ----------------------------------------------------------------------------
// Phases
// ----------------------------------------------------------------------------

/// Lifecycle of one client-side call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    Prepared,
    Sent,
    Evaluated,
    Applied,
    Failed,
}

impl core::fmt::Display for CallPhase {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            CallPhase::Prepared => "prepared",
            CallPhase::Sent => "sent",
            CallPhase::Evaluated => "evaluated",
            CallPhase::Applied => "applied",
            CallPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

// ----------------------------------------------------------------------------
// Client Command Trait
// ----------------------------------------------------------------------------

/// One client-side command implementation.
///
/// `prepare` fills the outgoing request, `evaluate` checks and parses the
/// response, `apply` commits the results to local state. A server error
/// response skips `evaluate` and `apply`; the call still completes.
pub trait ClientCommand {
    fn id(&self) -> CommandId;

    fn prepare(
        &mut self,
        client: &Client,
        request: &mut Envelope,
        ctx: &mut CallContext,
    ) -> Result<()>;

    fn evaluate(&mut self, response: &Envelope, ctx: &mut CallContext) -> Result<()>;

    fn apply(
        &mut self,
        client: &Client,
        response: &Envelope,
        ctx: &mut CallContext,
    ) -> Result<()>;
}

// ----------------------------------------------------------------------------
// Call Outcome
// ----------------------------------------------------------------------------

/// What a call ended as: the final phase and the response envelope
#[derive(Debug)]
pub struct CallOutcome {
    pub phase: CallPhase,
    pub response: Envelope,
}

impl CallOutcome {
    pub fn is_error(&self) -> bool {
        self.response.is_error()
    }

    pub fn error_code(&self) -> Option<&str> {
        self.response.error_code()
    }
}

// ----------------------------------------------------------------------------
// Client
// ----------------------------------------------------------------------------

/// Drives commands against one server
pub struct Client {
    config: SharedProtocolConfig,
    keys: KeyPair,
    connector: Connector,
    state: Arc<dyn ClientStateStore>,
    texts: Arc<dyn TextCatalog>,
    root: CallContext,
}

impl Client {
    /// Build a client for one server address.
    ///
    /// A configured private key is used as-is; otherwise a fresh pair is
    /// generated for the lifetime of this client.
    pub fn new<H: Into<String>>(
        config: SharedProtocolConfig,
        host: H,
        port: u16,
    ) -> Result<Self> {
        let keys = match &config.identity.private_key {
            Some(secret_hex) => KeyPair::from_secret_hex(secret_hex)?,
            None => KeyPair::generate(),
        };
        let root = CallContext::new(
            DeliveryMode::BufferUntilError,
            Arc::new(TracingSink),
            config.diagnostics.max_buffered_messages,
        );
        Ok(Self {
            config,
            keys,
            connector: Connector::new(host, port),
            state: Arc::new(MemoryStateStore::new()),
            texts: Arc::new(DefaultTextCatalog),
            root,
        })
    }

    /// Replace the connection state store
    pub fn with_state(mut self, state: Arc<dyn ClientStateStore>) -> Self {
        self.state = state;
        self
    }

    /// Replace the text catalog
    pub fn with_texts(mut self, texts: Arc<dyn TextCatalog>) -> Self {
        self.texts = texts;
        self
    }

    /// Replace the root diagnostic context calls are forked from
    pub fn with_diagnostics(mut self, root: CallContext) -> Self {
        self.root = root;
        self
    }

    pub fn state(&self) -> &Arc<dyn ClientStateStore> {
        &self.state
    }

    /// Hex encoding of this client's public key
    pub fn public_key_hex(&self) -> String {
        self.keys.public_hex()
    }

    /// Run one command to completion.
    ///
    /// Always yields an outcome with an envelope: the server's response, or
    /// an error envelope synthesized from whatever phase failed.
    pub async fn call<C: ClientCommand>(&self, command: &mut C) -> CallOutcome {
        let mut ctx = self.root.fork(self.root.mode());
        let outcome = self.run(command, &mut ctx).await;
        if outcome.phase == CallPhase::Failed {
            ctx.flush();
        }
        outcome
    }

    async fn run<C: ClientCommand>(&self, command: &mut C, ctx: &mut CallContext) -> CallOutcome {
        let mut request = Envelope::request(
            command.id(),
            self.config.identity.app_id.clone(),
            self.config.identity.app_version.clone(),
        );

        if let Err(err) = command.prepare(self, &mut request, ctx) {
            return self.failed(command.id(), &request.session_id, &err, ctx);
        }
        ctx.log(format!("{}: {}", CallPhase::Prepared, request.command));

        let raw_response = match self.round_trip(&request, ctx).await {
            Ok(raw) => raw,
            Err(err) => return self.failed(command.id(), &request.session_id, &err, ctx),
        };
        ctx.log(CallPhase::Sent.to_string());

        let response = match codec::decode(&raw_response, Some(&self.keys)) {
            Ok(response) => response,
            Err(err) => return self.failed(command.id(), &request.session_id, &err, ctx),
        };

        // A server error is a completed call; the envelope already carries
        // everything the caller needs.
        if response.is_error() {
            ctx.log(format!(
                "server reported {}",
                response.error_code().unwrap_or("unknown error")
            ));
            return CallOutcome {
                phase: CallPhase::Applied,
                response,
            };
        }

        if let Err(err) = command.evaluate(&response, ctx) {
            return self.failed(command.id(), &request.session_id, &err, ctx);
        }
        ctx.log(CallPhase::Evaluated.to_string());

        if let Err(err) = command.apply(self, &response, ctx) {
            return self.failed(command.id(), &request.session_id, &err, ctx);
        }
        ctx.log(CallPhase::Applied.to_string());
        self.remember_endpoint(ctx);

        CallOutcome {
            phase: CallPhase::Applied,
            response,
        }
    }

    async fn round_trip(&self, request: &Envelope, ctx: &mut CallContext) -> Result<String> {
        let recipient = self.seal_recipient();
        if recipient.is_some() {
            ctx.log("sealing request to the server's public key");
        }
        let raw = codec::encode(request, recipient.as_ref())?;
        let timeout = self.config.timeouts.for_command(&request.command);
        self.connector.round_trip(&raw, timeout).await
    }

    /// Record the endpoint a call just succeeded against
    fn remember_endpoint(&self, ctx: &mut CallContext) {
        let stored = self
            .state
            .set(keys::LAST_HOST, self.connector.host())
            .and_then(|_| {
                self.state
                    .set(keys::LAST_PORT, &self.connector.port().to_string())
            });
        if let Err(err) = stored {
            // State persistence is best-effort; the call itself succeeded.
            ctx.log(format!("could not persist endpoint: {err}"));
        }
    }

    /// The server key to seal with, when encryption is on and the key is
    /// known from an earlier handshake
    fn seal_recipient(&self) -> Option<PublicKey> {
        if !self.config.encrypt {
            return None;
        }
        let key_hex = self.state.server_public_key()?;
        crypto::parse_public_key(&key_hex).ok()
    }

    /// Synthesize the error envelope for a locally failed call
    fn failed(
        &self,
        command: CommandId,
        session_id: &str,
        err: &ParleyError,
        ctx: &mut CallContext,
    ) -> CallOutcome {
        let code = err.error_code();
        ctx.set_first_error(code, err.to_string(), None);

        // The message shown to a person comes from the catalog where one is
        // defined; the raw error stays in the technical detail via the dump.
        let message = match body_key(code) {
            Some(key) => self.texts.text(key),
            None => err.to_string(),
        };

        let mut response = Envelope::bare(command.as_str());
        response.session_id = session_id.to_string();
        response.app_id = self.config.identity.app_id.clone();
        response.app_version = self.config.identity.app_version.clone();
        response.fail(
            ErrorInfo::new(code, self.texts.text(headline_key(code)))
                .with_messages(vec![message])
                .with_detail(ctx.dump()),
        );
        CallOutcome {
            phase: CallPhase::Failed,
            response,
        }
    }
}

impl core::fmt::Debug for Client {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Client")
            .field("connector", &self.connector)
            .field("public_key", &self.keys.public_hex())
            .finish_non_exhaustive()
    }
}
