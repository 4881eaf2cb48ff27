//! Client command implementations
//!
//! Each command owns its request parameters and its parsed results. The
//! engine drives the phases; the commands decide what goes on the wire and
//! what comes back off it.

use chrono::NaiveDateTime;
use uuid::Uuid;

use parley_core::crypto;
use parley_core::envelope::props;
use parley_core::errors::{ParleyError, Result};
use parley_core::{CallContext, CommandId, Envelope};

use crate::convert;

use super::engine::{Client, ClientCommand};

/// The remembered session id, fabricating and persisting a fresh one when
/// none is known yet. A fabricated id has not been registered server-side;
/// the server will answer `UnknownSessionError` until a session is created.
fn attached_session_id(client: &Client) -> Result<String> {
    match client.state().last_session_id() {
        Some(session_id) => Ok(session_id),
        None => {
            let session_id = Uuid::new_v4().to_string();
            client.state().set_last_session_id(&session_id)?;
            Ok(session_id)
        }
    }
}

// ----------------------------------------------------------------------------
// Handshake
// ----------------------------------------------------------------------------

/// Exchange public keys against an existing session
#[derive(Debug, Default)]
pub struct HandshakeCommand {
    session_id: Option<String>,
    /// Server public key learned by this handshake, hex encoded
    pub server_public_key: Option<String>,
}

impl HandshakeCommand {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handshake against a specific session instead of the remembered one
    pub fn for_session<S: Into<String>>(session_id: S) -> Self {
        Self {
            session_id: Some(session_id.into()),
            server_public_key: None,
        }
    }
}

impl ClientCommand for HandshakeCommand {
    fn id(&self) -> CommandId {
        CommandId::Handshake
    }

    fn prepare(
        &mut self,
        client: &Client,
        request: &mut Envelope,
        _ctx: &mut CallContext,
    ) -> Result<()> {
        request.session_id = match &self.session_id {
            Some(session_id) => session_id.clone(),
            None => attached_session_id(client)?,
        };
        request.set_property(props::CLIENT_PUBLIC_KEY, client.public_key_hex());
        Ok(())
    }

    fn evaluate(&mut self, response: &Envelope, _ctx: &mut CallContext) -> Result<()> {
        let key_hex = response.require_property(props::SERVER_PUBLIC_KEY)?;
        crypto::parse_public_key(key_hex)?;
        self.server_public_key = Some(key_hex.to_string());
        Ok(())
    }

    fn apply(
        &mut self,
        client: &Client,
        _response: &Envelope,
        ctx: &mut CallContext,
    ) -> Result<()> {
        if let Some(key_hex) = &self.server_public_key {
            client.state().set_server_public_key(key_hex)?;
            ctx.log("server public key stored");
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Create Session
// ----------------------------------------------------------------------------

/// Register a new session, fabricating an id unless one is given
#[derive(Debug, Default)]
pub struct CreateSessionCommand {
    requested_id: Option<String>,
    /// The session id actually registered
    pub session_id: String,
    /// Server public key returned alongside the registration, hex encoded
    pub server_public_key: Option<String>,
}

impl CreateSessionCommand {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session_id<S: Into<String>>(session_id: S) -> Self {
        Self {
            requested_id: Some(session_id.into()),
            ..Self::default()
        }
    }
}

impl ClientCommand for CreateSessionCommand {
    fn id(&self) -> CommandId {
        CommandId::CreateSession
    }

    fn prepare(
        &mut self,
        client: &Client,
        request: &mut Envelope,
        ctx: &mut CallContext,
    ) -> Result<()> {
        self.session_id = match &self.requested_id {
            Some(session_id) if !session_id.trim().is_empty() => {
                session_id.trim().to_string()
            }
            Some(_) => return Err(ParleyError::preparation("session id cannot be blank")),
            None => Uuid::new_v4().to_string(),
        };
        ctx.log(format!("creating session {:?}", self.session_id));
        request.session_id = self.session_id.clone();
        request.set_property(props::CLIENT_PUBLIC_KEY, client.public_key_hex());
        Ok(())
    }

    fn evaluate(&mut self, response: &Envelope, _ctx: &mut CallContext) -> Result<()> {
        let key_hex = response.require_property(props::SERVER_PUBLIC_KEY)?;
        crypto::parse_public_key(key_hex)?;
        self.server_public_key = Some(key_hex.to_string());
        Ok(())
    }

    fn apply(
        &mut self,
        client: &Client,
        _response: &Envelope,
        ctx: &mut CallContext,
    ) -> Result<()> {
        client.state().set_last_session_id(&self.session_id)?;
        if let Some(key_hex) = &self.server_public_key {
            client.state().set_server_public_key(key_hex)?;
        }
        ctx.log(format!("session {:?} remembered", self.session_id));
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Server Status
// ----------------------------------------------------------------------------

/// Parsed server status response
#[derive(Debug, Clone, PartialEq)]
pub struct ServerStatus {
    /// Server wall-clock time
    pub server_time: NaiveDateTime,
    /// Live session count; absent or malformed counts stay unset
    pub session_count: Option<i64>,
    /// Whether the server expects sealed payloads
    pub encrypted: Option<bool>,
}

/// Query server time, session count, and encryption status
#[derive(Debug, Default)]
pub struct ServerStatusCommand {
    pub status: Option<ServerStatus>,
}

impl ServerStatusCommand {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ClientCommand for ServerStatusCommand {
    fn id(&self) -> CommandId {
        CommandId::ServerStatus
    }

    fn prepare(
        &mut self,
        client: &Client,
        request: &mut Envelope,
        _ctx: &mut CallContext,
    ) -> Result<()> {
        request.session_id = attached_session_id(client)?;
        Ok(())
    }

    fn evaluate(&mut self, response: &Envelope, ctx: &mut CallContext) -> Result<()> {
        let server_time =
            convert::parse_compact_timestamp(response.require_property(props::SERVER_TIME)?)?;

        // Count and encryption flag are informational; malformed values are
        // reported as unset rather than failing the call.
        let session_count = response
            .property(props::SESSION_COUNT)
            .and_then(convert::parse_int_or_unset);
        let encrypted = response
            .property(props::ENCRYPTED)
            .and_then(convert::parse_bool_ci);
        if session_count.is_none() {
            ctx.log("session count missing or malformed, left unset");
        }

        self.status = Some(ServerStatus {
            server_time,
            session_count,
            encrypted,
        });
        Ok(())
    }

    fn apply(
        &mut self,
        _client: &Client,
        _response: &Envelope,
        _ctx: &mut CallContext,
    ) -> Result<()> {
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Config Value
// ----------------------------------------------------------------------------

/// Look up one server-side configuration value
#[derive(Debug)]
pub struct ConfigValueCommand {
    key: String,
    pub value: Option<String>,
}

impl ConfigValueCommand {
    pub fn new<K: Into<String>>(key: K) -> Self {
        Self {
            key: key.into(),
            value: None,
        }
    }
}

impl ClientCommand for ConfigValueCommand {
    fn id(&self) -> CommandId {
        CommandId::ConfigValue
    }

    fn prepare(
        &mut self,
        client: &Client,
        request: &mut Envelope,
        _ctx: &mut CallContext,
    ) -> Result<()> {
        if self.key.trim().is_empty() {
            return Err(ParleyError::preparation("configuration key cannot be blank"));
        }
        request.session_id = attached_session_id(client)?;
        request.set_property(props::CONFIG_KEY, self.key.trim());
        Ok(())
    }

    fn evaluate(&mut self, response: &Envelope, _ctx: &mut CallContext) -> Result<()> {
        self.value = Some(response.require_property(props::CONFIG_VALUE)?.to_string());
        Ok(())
    }

    fn apply(
        &mut self,
        _client: &Client,
        _response: &Envelope,
        _ctx: &mut CallContext,
    ) -> Result<()> {
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_session_fabricates_uuid() {
        let command = CreateSessionCommand::new();
        assert!(command.requested_id.is_none());

        let explicit = CreateSessionCommand::with_session_id("s1");
        assert_eq!(explicit.requested_id.as_deref(), Some("s1"));
    }

    #[test]
    fn test_status_evaluate_tolerates_malformed_count() {
        let mut command = ServerStatusCommand::new();
        let mut response = Envelope::bare(CommandId::ServerStatus.as_str());
        response.set_property(props::SERVER_TIME, "20260824120000");
        response.set_property(props::SESSION_COUNT, "many");

        let sink = parley_core::MemorySink::new();
        let mut ctx = CallContext::new(
            parley_core::DeliveryMode::BufferUntilFlush,
            sink,
            10,
        );
        command.evaluate(&response, &mut ctx).unwrap();

        let status = command.status.unwrap();
        assert_eq!(status.session_count, None);
        assert_eq!(status.encrypted, None);
        assert_eq!(
            status.server_time.format("%Y%m%d%H%M%S").to_string(),
            "20260824120000"
        );
    }

    #[test]
    fn test_status_evaluate_requires_server_time() {
        let mut command = ServerStatusCommand::new();
        let response = Envelope::bare(CommandId::ServerStatus.as_str());
        let sink = parley_core::MemorySink::new();
        let mut ctx = CallContext::new(
            parley_core::DeliveryMode::BufferUntilFlush,
            sink,
            10,
        );
        assert!(command.evaluate(&response, &mut ctx).is_err());
    }
}
