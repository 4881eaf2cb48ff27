//! External collaborator interfaces
//!
//! The resource/label catalog and the server-side configuration lookup are
//! owned by other subsystems; the core consumes them through these narrow
//! traits. The built-in implementations keep the crate usable standalone.

use std::collections::BTreeMap;

use parley_core::ErrorCode;

// ----------------------------------------------------------------------------
// Text Catalog
// ----------------------------------------------------------------------------

/// Supplies human-readable text by key
pub trait TextCatalog: Send + Sync {
    fn text(&self, key: &str) -> String;
}

/// Built-in English texts; unknown keys fall back to the key itself
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTextCatalog;

impl TextCatalog for DefaultTextCatalog {
    fn text(&self, key: &str) -> String {
        match key {
            "error.transport.headline" => "The server could not be reached".to_string(),
            "error.transport.body" => {
                "The call did not complete; check the connection settings and try again"
                    .to_string()
            }
            "error.server.headline" => "The server reported an error".to_string(),
            "error.client.headline" => "The call could not be completed".to_string(),
            "error.decoding.headline" => "The request could not be understood".to_string(),
            other => other.to_string(),
        }
    }
}

/// The headline text key for a wire error code
pub fn headline_key(code: ErrorCode) -> &'static str {
    match code {
        ErrorCode::Connect | ErrorCode::SocketTimeout => "error.transport.headline",
        ErrorCode::Decoding | ErrorCode::Encoding => "error.decoding.headline",
        ErrorCode::Preparation | ErrorCode::Evaluation | ErrorCode::PostProcessing => {
            "error.client.headline"
        }
        _ => "error.server.headline",
    }
}

/// The body text key for a wire error code, where one exists.
///
/// Transport failures get a catalog body because the raw io error is not
/// something to show a person; other codes describe themselves.
pub fn body_key(code: ErrorCode) -> Option<&'static str> {
    match code {
        ErrorCode::Connect | ErrorCode::SocketTimeout => Some("error.transport.body"),
        _ => None,
    }
}

// ----------------------------------------------------------------------------
// Configuration Catalog
// ----------------------------------------------------------------------------

/// Server-side configuration value lookup by key
pub trait ConfigCatalog: Send + Sync {
    fn lookup(&self, key: &str) -> Option<String>;
}

/// Fixed in-memory catalog, handy for servers and tests alike
#[derive(Debug, Clone, Default)]
pub struct StaticConfigCatalog {
    values: BTreeMap<String, String>,
}

impl StaticConfigCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

impl ConfigCatalog for StaticConfigCatalog {
    fn lookup(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog_falls_back_to_key() {
        let catalog = DefaultTextCatalog;
        assert_eq!(catalog.text("no.such.key"), "no.such.key");
        assert_ne!(catalog.text("error.transport.headline"), "error.transport.headline");
    }

    #[test]
    fn test_body_key_only_for_transport_codes() {
        assert_eq!(body_key(ErrorCode::Connect), Some("error.transport.body"));
        assert_eq!(body_key(ErrorCode::SocketTimeout), Some("error.transport.body"));
        assert_eq!(body_key(ErrorCode::Preparation), None);
        assert_eq!(body_key(ErrorCode::ServerExecution), None);
    }

    #[test]
    fn test_static_config_catalog() {
        let catalog = StaticConfigCatalog::new().with_value("storage.root", "/srv/media");
        assert_eq!(catalog.lookup("storage.root").as_deref(), Some("/srv/media"));
        assert_eq!(catalog.lookup("missing"), None);
    }
}
