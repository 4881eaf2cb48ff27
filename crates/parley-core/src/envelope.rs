//! Request/response envelope
//!
//! One envelope travels in each direction of a socket round-trip: a command
//! identifier, a session identifier, the calling application's identity, a
//! bag of string properties, and (responses only) a structured error block.
//! An envelope that carries an error is terminal: success-path properties
//! are no longer accepted and the engines short-circuit around it.

use std::collections::BTreeMap;

use crate::errors::{ErrorCode, ParleyError, Result};
use crate::types::CommandId;

// ----------------------------------------------------------------------------
// Property Keys
// ----------------------------------------------------------------------------

/// Property keys shared between client and server command implementations
pub mod props {
    /// Client's X25519 public key, hex encoded (handshake commands)
    pub const CLIENT_PUBLIC_KEY: &str = "ClientPublicKey";
    /// Server's X25519 public key, hex encoded (handshake responses)
    pub const SERVER_PUBLIC_KEY: &str = "ServerPublicKey";
    /// Configuration key to look up (`ConfigValue` requests)
    pub const CONFIG_KEY: &str = "Key";
    /// Looked-up configuration value (`ConfigValue` responses)
    pub const CONFIG_VALUE: &str = "Value";
    /// Server wall-clock time as a compact 14-digit string
    pub const SERVER_TIME: &str = "ServerTime";
    /// Number of live sessions on the server
    pub const SESSION_COUNT: &str = "SessionCount";
    /// Whether the server expects encrypted payloads ("true"/"false")
    pub const ENCRYPTED: &str = "Encrypted";
}

// ----------------------------------------------------------------------------
// Error Block
// ----------------------------------------------------------------------------

/// Maximum number of human-readable message parts in an error block
pub const MAX_ERROR_MESSAGES: usize = 3;

/// Structured error block carried by failed responses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    /// Stable error code string, see [`ErrorCode`]
    pub code: String,
    /// One-line headline for display
    pub headline: String,
    /// Up to three human-readable message parts
    pub messages: Vec<String>,
    /// Technical detail, typically the failing call context's dump
    pub detail: String,
}

impl ErrorInfo {
    pub fn new<H: Into<String>>(code: ErrorCode, headline: H) -> Self {
        Self {
            code: code.as_str().to_string(),
            headline: headline.into(),
            messages: Vec::new(),
            detail: String::new(),
        }
    }

    /// Attach message parts, truncated to [`MAX_ERROR_MESSAGES`]
    pub fn with_messages(mut self, mut messages: Vec<String>) -> Self {
        messages.truncate(MAX_ERROR_MESSAGES);
        self.messages = messages;
        self
    }

    /// Attach the technical-detail blob
    pub fn with_detail<D: Into<String>>(mut self, detail: D) -> Self {
        self.detail = detail.into();
        self
    }

    /// The parsed error code, if this build knows it
    pub fn error_code(&self) -> Option<ErrorCode> {
        ErrorCode::parse(&self.code)
    }
}

// ----------------------------------------------------------------------------
// Envelope
// ----------------------------------------------------------------------------

/// The message exchanged in one socket round-trip, either direction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Command identifier string, see [`CommandId`]
    pub command: String,
    /// Client-chosen session identifier; empty only during bootstrap
    pub session_id: String,
    /// Identifier of the calling application
    pub app_id: String,
    /// Version of the calling application
    pub app_version: String,
    properties: BTreeMap<String, String>,
    error: Option<ErrorInfo>,
}

impl Envelope {
    /// Create a request envelope for a command
    pub fn request<A: Into<String>, V: Into<String>>(
        command: CommandId,
        app_id: A,
        app_version: V,
    ) -> Self {
        Self {
            command: command.as_str().to_string(),
            session_id: String::new(),
            app_id: app_id.into(),
            app_version: app_version.into(),
            properties: BTreeMap::new(),
            error: None,
        }
    }

    /// Create an envelope with only a command identifier set.
    ///
    /// Used for best-effort error responses when the request itself could
    /// not be decoded and no identity fields are available to mirror.
    pub fn bare<C: Into<String>>(command: C) -> Self {
        Self {
            command: command.into(),
            session_id: String::new(),
            app_id: String::new(),
            app_version: String::new(),
            properties: BTreeMap::new(),
            error: None,
        }
    }

    /// Create a response envelope mirroring a request's identity fields
    pub fn response_to(request: &Envelope) -> Self {
        Self {
            command: request.command.clone(),
            session_id: request.session_id.clone(),
            app_id: request.app_id.clone(),
            app_version: request.app_version.clone(),
            properties: BTreeMap::new(),
            error: None,
        }
    }

    /// Reassemble an envelope from decoded wire fields
    pub(crate) fn from_parts(
        command: String,
        session_id: String,
        app_id: String,
        app_version: String,
        properties: BTreeMap<String, String>,
        error: Option<ErrorInfo>,
    ) -> Self {
        Self {
            command,
            session_id,
            app_id,
            app_version,
            properties,
            error,
        }
    }

    /// Set a property. Writes after an error has been recorded are dropped:
    /// an error envelope is terminal.
    pub fn set_property<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        if self.error.is_some() {
            return;
        }
        self.properties.insert(key.into(), value.into());
    }

    /// Look up a property value
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Look up a property the protocol requires to be present
    pub fn require_property(&self, key: &str) -> Result<&str> {
        self.property(key)
            .ok_or_else(|| ParleyError::missing_field(key))
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    /// Record a failure. The first error wins; later calls are no-ops.
    pub fn fail(&mut self, error: ErrorInfo) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    pub fn error(&self) -> Option<&ErrorInfo> {
        self.error.as_ref()
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// The wire error code string, if this envelope failed
    pub fn error_code(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.code.as_str())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
