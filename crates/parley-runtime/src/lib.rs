//! Parley Runtime
//!
//! The stateful half of the Parley RPC substrate: the server session store,
//! the one-shot socket transport, client and server command engines, and the
//! socket server that ties them together. Wire format, crypto, and the error
//! taxonomy live in `parley-core`.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod catalog;
pub mod client;
pub mod convert;
pub mod dispatch;
pub mod server;
pub mod session_store;
pub mod state_store;
pub mod transport;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use catalog::{ConfigCatalog, DefaultTextCatalog, StaticConfigCatalog, TextCatalog};
pub use client::{
    CallOutcome, CallPhase, Client, ClientCommand, ConfigValueCommand, CreateSessionCommand,
    HandshakeCommand, ServerStatus, ServerStatusCommand,
};
pub use dispatch::{ServerCommand, ServerEngine, ServerPhase};
pub use server::{RpcServer, ServerConfig, ServerHandle};
pub use session_store::{SessionRecord, SessionStore};
pub use state_store::{ClientStateStore, FileStateStore, MemoryStateStore};
pub use transport::Connector;
