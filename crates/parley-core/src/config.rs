//! Centralized protocol configuration
//!
//! Serde-backed configuration structs with defaults and validation. The
//! core reads these values; loading and layering them from files or the
//! environment is the binary's job.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crypto::KeyPair;
use crate::errors::{ParleyError, Result};

// ----------------------------------------------------------------------------
// Identity Configuration
// ----------------------------------------------------------------------------

/// Local identity: application naming and the X25519 key pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Identifier this side reports in every envelope
    pub app_id: String,
    /// Version this side reports in every envelope
    pub app_version: String,
    /// Hex-encoded X25519 secret key; the public key is derived from it
    pub private_key: Option<String>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            app_id: "parley".to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            private_key: None,
        }
    }
}

impl IdentityConfig {
    /// Build the configured key pair; a missing key is a configuration error
    pub fn key_pair(&self) -> Result<KeyPair> {
        match &self.private_key {
            Some(secret_hex) => KeyPair::from_secret_hex(secret_hex),
            None => Err(ParleyError::config_error(
                "identity.private_key is not configured",
            )),
        }
    }
}

// ----------------------------------------------------------------------------
// Session Limits
// ----------------------------------------------------------------------------

/// Capacity and eviction policy for the server session store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionLimits {
    /// Maximum live sessions before eviction runs
    pub max_sessions: usize,
    /// Percentage of sessions removed per eviction pass
    pub evict_percent: u8,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_sessions: 1000,
            evict_percent: 10,
        }
    }
}

// ----------------------------------------------------------------------------
// Timeouts
// ----------------------------------------------------------------------------

/// Socket read timeouts, overridable per command kind
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Fallback timeout in milliseconds
    pub default_ms: u64,
    /// Per-command overrides, keyed by command identifier string
    pub per_command_ms: BTreeMap<String, u64>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default_ms: 30_000,
            per_command_ms: BTreeMap::new(),
        }
    }
}

impl TimeoutConfig {
    /// The read timeout for one command kind
    pub fn for_command(&self, command: &str) -> Duration {
        let ms = self
            .per_command_ms
            .get(command)
            .copied()
            .unwrap_or(self.default_ms);
        Duration::from_millis(ms)
    }
}

// ----------------------------------------------------------------------------
// Diagnostics
// ----------------------------------------------------------------------------

/// Call context buffering limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsConfig {
    /// Cap on buffered messages per call context
    pub max_buffered_messages: usize,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            max_buffered_messages: 500,
        }
    }
}

// ----------------------------------------------------------------------------
// Master Configuration
// ----------------------------------------------------------------------------

/// Complete protocol configuration consumed by both ends
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub identity: IdentityConfig,
    pub sessions: SessionLimits,
    pub timeouts: TimeoutConfig,
    pub diagnostics: DiagnosticsConfig,
    /// Seal payloads when the peer's public key is known
    pub encrypt: bool,
}

impl ProtocolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration suited to tests: tiny store, short timeouts
    pub fn testing() -> Self {
        Self {
            identity: IdentityConfig {
                app_id: "parley-test".to_string(),
                app_version: "0.0.0".to_string(),
                private_key: Some(KeyPair::generate().secret_hex()),
            },
            sessions: SessionLimits {
                max_sessions: 10,
                evict_percent: 10,
            },
            timeouts: TimeoutConfig {
                default_ms: 2_000,
                per_command_ms: BTreeMap::new(),
            },
            diagnostics: DiagnosticsConfig {
                max_buffered_messages: 50,
            },
            encrypt: false,
        }
    }

    /// Validate the configuration for consistency and feasibility
    pub fn validate(&self) -> core::result::Result<(), String> {
        if self.identity.app_id.is_empty() {
            return Err("identity.app_id cannot be empty".into());
        }
        if self.sessions.max_sessions == 0 {
            return Err("sessions.max_sessions cannot be zero".into());
        }
        if self.sessions.evict_percent == 0 {
            return Err("sessions.evict_percent cannot be zero".into());
        }
        if self.timeouts.default_ms == 0 {
            return Err("timeouts.default_ms cannot be zero".into());
        }
        if self.diagnostics.max_buffered_messages == 0 {
            return Err("diagnostics.max_buffered_messages cannot be zero".into());
        }
        Ok(())
    }

    /// Convert to Arc-wrapped config for sharing across workers
    pub fn into_shared(self) -> SharedProtocolConfig {
        Arc::new(self)
    }
}

/// Arc-wrapped [`ProtocolConfig`] shared across tasks
pub type SharedProtocolConfig = Arc<ProtocolConfig>;

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
