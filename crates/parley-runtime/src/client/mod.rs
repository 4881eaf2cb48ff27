//! Client-side call engine and command implementations

mod commands;
mod engine;

pub use commands::{
    ConfigValueCommand, CreateSessionCommand, HandshakeCommand, ServerStatus, ServerStatusCommand,
};
pub use engine::{CallOutcome, CallPhase, Client, ClientCommand};
