//! Shared protocol types
//!
//! Command identifiers, millisecond timestamps, and the time source
//! abstraction used by everything that records recency.

use core::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

// ----------------------------------------------------------------------------
// Command Identifiers
// ----------------------------------------------------------------------------

/// The closed set of commands client and server agree on.
///
/// Envelopes carry the identifier as a string; engines parse it back with
/// [`CommandId::parse`] and reject anything unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandId {
    /// Exchange public keys against an existing session
    Handshake,
    /// Exchange public keys and register a new session
    CreateSession,
    /// Query server time, session count, and encryption status
    ServerStatus,
    /// Look up a server-side configuration value by key
    ConfigValue,
}

impl CommandId {
    /// Wire representation of the identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandId::Handshake => "Handshake",
            CommandId::CreateSession => "CreateSession",
            CommandId::ServerStatus => "ServerStatus",
            CommandId::ConfigValue => "ConfigValue",
        }
    }

    /// Parse a wire identifier; `None` for commands this build does not know
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "Handshake" => Some(CommandId::Handshake),
            "CreateSession" => Some(CommandId::CreateSession),
            "ServerStatus" => Some(CommandId::ServerStatus),
            "ConfigValue" => Some(CommandId::ConfigValue),
            _ => None,
        }
    }

    /// Whether this command may be issued without a registered session
    pub fn creates_session(&self) -> bool {
        matches!(self, CommandId::CreateSession)
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ----------------------------------------------------------------------------
// Timestamps
// ----------------------------------------------------------------------------

/// Milliseconds since the Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(u64);

impl Timestamp {
    pub fn from_millis(millis: u64) -> Self {
        Timestamp(millis)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Milliseconds elapsed since `earlier`, saturating at zero
    pub fn since(&self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

// ----------------------------------------------------------------------------
// Time Source
// ----------------------------------------------------------------------------

/// Source of the current time.
///
/// The session store orders records by recency; routing every read of "now"
/// through this trait lets tests drive the clock by hand.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall-clock implementation of [`TimeSource`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Timestamp::from_millis(millis)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_id_round_trip() {
        for id in [
            CommandId::Handshake,
            CommandId::CreateSession,
            CommandId::ServerStatus,
            CommandId::ConfigValue,
        ] {
            assert_eq!(CommandId::parse(id.as_str()), Some(id));
        }
        assert_eq!(CommandId::parse("DropTables"), None);
    }

    #[test]
    fn test_only_create_session_creates() {
        assert!(CommandId::CreateSession.creates_session());
        assert!(!CommandId::Handshake.creates_session());
        assert!(!CommandId::ServerStatus.creates_session());
    }

    #[test]
    fn test_timestamp_since_saturates() {
        let a = Timestamp::from_millis(100);
        let b = Timestamp::from_millis(250);
        assert_eq!(b.since(a), 150);
        assert_eq!(a.since(b), 0);
    }
}
