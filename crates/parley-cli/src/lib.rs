//! Parley CLI library: argument parsing, configuration, and dispatch

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
