//! pvbridge - process variable server for computational models
//!
//! CLI entry point: validate declarations, list models, or serve one.

use std::path::PathBuf;

use clap::Parser;
use eyre::{Context, Result};
use tracing::{error, info};

use pvbridge::cli::{Cli, Command};
use pvbridge::config::Config;
use pvbridge::lifecycle::Server;
use pvbridge::registry::ModelRegistry;
use pvbridge::routing::{Protocol, Routing};
use pvbridge::wire::LoopbackWire;

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose)?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Serve {
            model,
            declarations,
            protocols,
            prefix,
        } => cmd_serve(&config, &model, declarations.as_ref(), &protocols, &prefix).await,
        Command::Check {
            model,
            declarations,
            protocols,
        } => cmd_check(&model, &declarations, &protocols),
        Command::Models => cmd_models(),
    }
}

fn parse_protocols(raw: &[String]) -> Result<Vec<Protocol>> {
    raw.iter().map(|s| s.parse()).collect()
}

async fn cmd_serve(
    config: &Config,
    model_id: &str,
    declarations: Option<&PathBuf>,
    protocols: &[String],
    prefix: &str,
) -> Result<()> {
    let protocols = parse_protocols(protocols)?;
    let model = ModelRegistry::builtin().create(model_id)?;

    let routing = match declarations {
        Some(path) => Routing::load(path)?,
        None => Routing::default_for_model(model.as_ref(), prefix),
    };

    let mut server = Server::new(model, routing, config.clone());
    for protocol in &protocols {
        // real protocol server libraries plug in at the WireBackend seam;
        // the in-memory backend stands in for them
        server = server.with_backend(*protocol, Box::new(LoopbackWire::new()));
    }

    let mut handle = server.start()?;
    info!(model = %model_id, "Serving");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Stopping servers"),
        reason = handle.wait_fatal() => {
            if let Some(reason) = reason {
                error!("Fatal error: {reason}");
            }
        }
    }

    handle.shutdown();
    handle.join().await
}

fn cmd_check(model_id: &str, declarations: &PathBuf, protocols: &[String]) -> Result<()> {
    let protocols = parse_protocols(protocols)?;
    let model = ModelRegistry::builtin().create(model_id)?;

    let routing = Routing::load(declarations)?;
    routing.validate(model.as_ref(), &protocols)?;

    println!("declarations OK: {} variables", routing.variables.len());
    Ok(())
}

fn cmd_models() -> Result<()> {
    for name in ModelRegistry::builtin().names() {
        println!("{name}");
    }
    Ok(())
}
