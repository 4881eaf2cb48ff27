//! Command dispatch: wiring CLI subcommands to the client and server

use std::sync::Arc;

use tracing::info;

use parley_core::KeyPair;
use parley_runtime::{
    Client, ConfigValueCommand, CreateSessionCommand, FileStateStore, HandshakeCommand,
    RpcServer, ServerEngine, ServerStatusCommand, StaticConfigCatalog,
};

use crate::cli::{Cli, Commands};
use crate::config::AppConfig;
use crate::error::{CliError, Result};

/// Executes one parsed CLI invocation
pub struct CommandDispatcher;

impl CommandDispatcher {
    pub async fn execute(cli: Cli, mut config: AppConfig) -> Result<()> {
        if let Some(host) = &cli.host {
            config.client.host = host.clone();
        }
        if let Some(port) = cli.port {
            config.client.port = port;
        }
        if let Some(state_file) = &cli.state_file {
            config.client.state_file = Some(state_file.into());
        }

        match cli.command {
            Commands::Serve { bind, workers } => {
                if let Some(bind) = bind {
                    config.server.bind_addr = bind;
                }
                if let Some(workers) = workers {
                    config.server.max_workers = workers;
                }
                serve(config).await
            }
            Commands::Keygen => keygen(),
            Commands::CreateSession { session_id } => {
                let mut command = match session_id {
                    Some(session_id) => CreateSessionCommand::with_session_id(session_id),
                    None => CreateSessionCommand::new(),
                };
                let client = client(&config)?;
                run_call(&client, &mut command).await?;
                println!("session created: {}", command.session_id);
                if let Some(key) = &command.server_public_key {
                    println!("server public key: {}", key);
                }
                Ok(())
            }
            Commands::Handshake { session_id } => {
                let mut command = match session_id {
                    Some(session_id) => HandshakeCommand::for_session(session_id),
                    None => HandshakeCommand::new(),
                };
                let client = client(&config)?;
                run_call(&client, &mut command).await?;
                if let Some(key) = &command.server_public_key {
                    println!("server public key: {}", key);
                }
                Ok(())
            }
            Commands::Status => {
                let mut command = ServerStatusCommand::new();
                let client = client(&config)?;
                run_call(&client, &mut command).await?;
                if let Some(status) = &command.status {
                    println!("server time:   {}", status.server_time);
                    match status.session_count {
                        Some(count) => println!("live sessions: {}", count),
                        None => println!("live sessions: unknown"),
                    }
                    match status.encrypted {
                        Some(true) => println!("encryption:    on"),
                        Some(false) => println!("encryption:    off"),
                        None => println!("encryption:    unknown"),
                    }
                }
                Ok(())
            }
            Commands::ConfigGet { key } => {
                let mut command = ConfigValueCommand::new(key.clone());
                let client = client(&config)?;
                run_call(&client, &mut command).await?;
                if let Some(value) = &command.value {
                    println!("{} = {}", key, value);
                }
                Ok(())
            }
        }
    }
}

/// Run the server until interrupted
async fn serve(config: AppConfig) -> Result<()> {
    let mut catalog = StaticConfigCatalog::new();
    for (key, value) in &config.config_values {
        catalog = catalog.with_value(key.clone(), value.clone());
    }

    let engine = Arc::new(
        ServerEngine::new(Arc::new(config.protocol))?.with_config_values(Arc::new(catalog)),
    );
    println!("server public key: {}", engine.public_key_hex());

    let handle = RpcServer::spawn(config.server, engine).await?;
    println!("listening on {}", handle.local_addr());

    tokio::signal::ctrl_c().await?;
    info!("interrupt received, shutting down");
    handle.shutdown().await;
    Ok(())
}

/// Generate and print a fresh key pair
fn keygen() -> Result<()> {
    let pair = KeyPair::generate();
    println!("private key: {}", pair.secret_hex());
    println!("public key:  {}", pair.public_hex());
    println!();
    println!("put the private key under [protocol.identity] as private_key");
    Ok(())
}

/// Build a client wired to the configured server and state file
fn client(config: &AppConfig) -> Result<Client> {
    let state = FileStateStore::open(config.state_file()?)?;
    Ok(
        Client::new(
            Arc::new(config.protocol.clone()),
            config.client.host.clone(),
            config.client.port,
        )?
        .with_state(Arc::new(state)),
    )
}

/// Drive one call and turn an error envelope into a CLI failure
async fn run_call<C: parley_runtime::ClientCommand>(client: &Client, command: &mut C) -> Result<()> {
    let outcome = client.call(command).await;
    match outcome.response.error() {
        None => Ok(()),
        Some(error) => {
            eprintln!("{}", error.headline);
            for message in &error.messages {
                eprintln!("  {}", message);
            }
            Err(CliError::CallFailed(format!(
                "{} ({})",
                error.headline, error.code
            )))
        }
    }
}
