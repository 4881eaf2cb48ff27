//! Parley Core Protocol Implementation
//!
//! This crate provides the envelope format, wire and crypto codecs, the
//! per-call diagnostic context, and the shared error taxonomy for the
//! Parley client/server RPC substrate. Everything stateful (session store,
//! transports, command engines) lives in `parley-runtime`.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod codec;
pub mod config;
pub mod context;
pub mod crypto;
pub mod envelope;
pub mod errors;
pub mod types;
pub mod wire;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use config::{ProtocolConfig, SharedProtocolConfig};
pub use context::{CallContext, DeliveryMode, DiagnosticSink, MemorySink, TracingSink};
pub use crypto::KeyPair;
pub use envelope::{props, Envelope, ErrorInfo};
pub use errors::{ErrorCode, ParleyError, Result};
pub use types::{CommandId, SystemTimeSource, TimeSource, Timestamp};
