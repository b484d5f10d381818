mod config;
mod context;
mod frame;
mod game;
mod server;
mod session;

use std::sync::Arc;

use clap::Command;
use config::Config;
use context::ApplicationContext;
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::server::run_server;

fn cli() -> Command {
    Command::new("cove-server")
        .about("Authoritative server for the Cove treasure hunt.")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(Command::new("run").about("Run the game server"))
}

async fn run() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let context = match ApplicationContext::try_new(config).await {
        Ok(context) => Arc::new(context),
        Err(e) => {
            error!("Failed to start: {}", e);
            std::process::exit(1);
        }
    };

    let rooms = context.rooms.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            rooms.shutdown().await;
            std::process::exit(0);
        }
    });

    if let Err(e) = run_server(context).await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let matches = cli().get_matches();
    match matches.subcommand() {
        Some(("run", _)) => run().await,
        _ => unreachable!(),
    }
}
