//! Client-side connection state persistence
//!
//! The client remembers the last session id, host, port, and server public
//! key between calls. Values live under fixed keys behind a narrow trait;
//! the file-backed implementation persists them as a flat TOML table.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use parley_core::errors::{ParleyError, Result};

// ----------------------------------------------------------------------------
// Keys
// ----------------------------------------------------------------------------

/// Fixed keys the client persists connection state under
pub mod keys {
    pub const LAST_SESSION_ID: &str = "last_session_id";
    pub const LAST_HOST: &str = "last_host";
    pub const LAST_PORT: &str = "last_port";
    pub const SERVER_PUBLIC_KEY: &str = "server_public_key";
}

// ----------------------------------------------------------------------------
// Trait
// ----------------------------------------------------------------------------

/// Key/value persistence for client connection state
pub trait ClientStateStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<()>;

    fn last_session_id(&self) -> Option<String> {
        self.get(keys::LAST_SESSION_ID)
    }

    fn set_last_session_id(&self, session_id: &str) -> Result<()> {
        self.set(keys::LAST_SESSION_ID, session_id)
    }

    fn server_public_key(&self) -> Option<String> {
        self.get(keys::SERVER_PUBLIC_KEY)
    }

    fn set_server_public_key(&self, public_key: &str) -> Result<()> {
        self.set(keys::SERVER_PUBLIC_KEY, public_key)
    }
}

// ----------------------------------------------------------------------------
// In-Memory Store
// ----------------------------------------------------------------------------

/// Volatile store for tests and one-shot clients
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ClientStateStore for MemoryStateStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// File-Backed Store
// ----------------------------------------------------------------------------

/// TOML-file-backed store; every write is persisted immediately
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl FileStateStore {
    /// Open a store at `path`, loading any existing state. A missing file
    /// is an empty store; a corrupt one is a configuration error.
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        let values = match std::fs::read_to_string(&path) {
            Ok(raw) => toml::from_str(&raw).map_err(|err| {
                ParleyError::config_error(format!(
                    "client state file {} is not valid TOML: {}",
                    path.display(),
                    err
                ))
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                return Err(ParleyError::config_error(format!(
                    "cannot read client state file {}: {}",
                    path.display(),
                    err
                )))
            }
        };
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    fn persist(&self, values: &BTreeMap<String, String>) -> Result<()> {
        let rendered = toml::to_string(values).map_err(|err| {
            ParleyError::config_error(format!("cannot render client state: {}", err))
        })?;
        std::fs::write(&self.path, rendered).map_err(|err| {
            ParleyError::config_error(format!(
                "cannot write client state file {}: {}",
                self.path.display(),
                err
            ))
        })
    }
}

impl ClientStateStore for FileStateStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self
            .values
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        values.insert(key.to_string(), value.to_string());
        self.persist(&values)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
