//! `proxy-daemon` — the process entry point (§4.8, §4.9): parses CLI
//! arguments, resolves and validates configuration, wires a backend client
//! and translator rule tables into `proxy_session::Server`, and runs the
//! accept loop until a shutdown signal arrives.

mod config;

use crate::config::{Cli, ServerConfig};
use clap::Parser;
use proxy_session::backend::{BackendClient, MockBackendClient};
use proxy_session::{Server, SessionConfig};
use proxy_translate::{MetaCommandTable, QueryRewriteTable, Translator};
use std::process::ExitCode;
use std::sync::Arc;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = match ServerConfig::from_cli(cli) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "startup failure");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: ServerConfig) -> std::io::Result<()> {
    let translator = Arc::new(
        build_translator(&config).map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?,
    );
    let backend = build_backend(&config);
    let session_config = SessionConfig {
        authenticate: config.authenticate,
        expected_password: config.password.clone(),
        force_binary: config.force_binary,
        server_version: env!("CARGO_PKG_VERSION").to_string(),
    };

    tracing::info!(
        port = config.server_port,
        project = %config.project,
        instance = %config.instance,
        database = %config.database,
        bigquery_mode = config.bigquery_mode,
        "starting proxy-daemon"
    );

    let server = Server::bind(("0.0.0.0", config.server_port), backend, translator, session_config).await?;
    let shutdown = server.shutdown_handle();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            shutdown.notify_waiters();
        }
    });

    server.run().await
}

fn build_translator(config: &ServerConfig) -> Result<Translator, proxy_translate::TranslateError> {
    let meta_commands = match (&config.command_metadata_file, config.psql_mode) {
        (Some(path), true) => MetaCommandTable::load(path)?,
        _ => MetaCommandTable::empty(),
    };
    let rewrites = match &config.query_rewrites_file {
        Some(path) => QueryRewriteTable::load(path)?,
        None => QueryRewriteTable::empty(),
    };
    Ok(Translator::new(meta_commands, rewrites))
}

/// Builds the backend SQL client. `--mock-backend` (the default) wires the
/// in-memory double so the wire layer can be smoke-tested without a live
/// Spanner/BigQuery driver, which is out of scope for this crate (§4.7).
fn build_backend(config: &ServerConfig) -> Arc<dyn BackendClient> {
    if !config.mock_backend {
        tracing::warn!("no live Spanner/BigQuery backend is wired into this build; falling back to the mock backend");
    }
    Arc::new(MockBackendClient::new())
}
