//! Configuration surface (§4.8): CLI flags (with env fallbacks) resolved once,
//! before the accept loop starts, into a single immutable [`ServerConfig`].

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use thiserror::Error;

/// Client-facing vs backend-native spellings for things like type names in
/// meta-command output. Only `Postgresql` is exercised by the mock backend
/// today; `Spanner` is the extension point a real backend would use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TextFormat {
    Postgresql,
    Spanner,
}

#[derive(Parser, Debug)]
#[command(name = "proxy-daemon")]
#[command(about = "PostgreSQL wire-protocol proxy to Spanner/BigQuery", long_about = None)]
pub struct Cli {
    /// TCP port to listen on
    #[arg(long, env = "PROXY_SERVER_PORT", default_value_t = 5432)]
    pub server_port: u16,

    /// Backend project identifier
    #[arg(long, env = "PROXY_PROJECT", default_value = "")]
    pub project: String,

    /// Backend instance identifier
    #[arg(long, env = "PROXY_INSTANCE", default_value = "")]
    pub instance: String,

    /// Backend database identifier
    #[arg(long, env = "PROXY_DATABASE", default_value = "")]
    pub database: String,

    /// Path to backend credentials; ambient default used when absent
    #[arg(long, env = "PROXY_CREDENTIALS_FILE")]
    pub credentials_file: Option<PathBuf>,

    /// Client-facing vs backend-native spellings
    #[arg(long, env = "PROXY_TEXT_FORMAT", value_enum, default_value_t = TextFormat::Postgresql)]
    pub text_format: TextFormat,

    /// Default extended-query result format to binary instead of text
    #[arg(long, env = "PROXY_FORCE_BINARY", default_value_t = false)]
    pub force_binary: bool,

    /// Require cleartext-password authentication
    #[arg(long, env = "PROXY_AUTHENTICATE", default_value_t = false)]
    pub authenticate: bool,

    /// Expected password when `authenticate` is set
    #[arg(long, env = "PROXY_PASSWORD")]
    pub password: Option<String>,

    /// Enable psql-style meta-command matching
    #[arg(long, env = "PROXY_PSQL_MODE", default_value_t = false)]
    pub psql_mode: bool,

    /// Path to meta-command matcher manifest (requires psql_mode)
    #[arg(long, env = "PROXY_COMMAND_METADATA_FILE")]
    pub command_metadata_file: Option<PathBuf>,

    /// Path to query-rewrite manifest
    #[arg(long, env = "PROXY_QUERY_REWRITES_FILE")]
    pub query_rewrites_file: Option<PathBuf>,

    /// Target BigQuery instead of Spanner
    #[arg(long, env = "PROXY_BIGQUERY_MODE", default_value_t = false)]
    pub bigquery_mode: bool,

    /// Use the in-memory mock backend instead of a live one (smoke testing)
    #[arg(long, env = "PROXY_MOCK_BACKEND", default_value_t = true)]
    pub mock_backend: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("server_port must be between 1 and 65535, got {0}")]
    InvalidPort(u32),

    #[error("command_metadata_file was set but psql_mode is off")]
    MetadataWithoutPsqlMode,

    #[error("credentials_file {0:?} does not exist")]
    CredentialsNotFound(PathBuf),
}

/// Resolved, validated configuration for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_port: u16,
    pub project: String,
    pub instance: String,
    pub database: String,
    pub credentials_file: Option<PathBuf>,
    pub text_format: TextFormat,
    pub force_binary: bool,
    pub authenticate: bool,
    pub password: Option<String>,
    pub psql_mode: bool,
    pub command_metadata_file: Option<PathBuf>,
    pub query_rewrites_file: Option<PathBuf>,
    pub bigquery_mode: bool,
    pub mock_backend: bool,
}

impl ServerConfig {
    /// Validates the resolved CLI arguments. Any failure here is a startup
    /// failure (§6 exit codes), never a per-connection one.
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        if cli.server_port == 0 {
            return Err(ConfigError::InvalidPort(cli.server_port as u32));
        }
        if cli.command_metadata_file.is_some() && !cli.psql_mode {
            return Err(ConfigError::MetadataWithoutPsqlMode);
        }
        if let Some(path) = &cli.credentials_file {
            if !path.exists() {
                return Err(ConfigError::CredentialsNotFound(path.clone()));
            }
        }
        Ok(Self {
            server_port: cli.server_port,
            project: cli.project,
            instance: cli.instance,
            database: cli.database,
            credentials_file: cli.credentials_file,
            text_format: cli.text_format,
            force_binary: cli.force_binary,
            authenticate: cli.authenticate,
            password: cli.password,
            psql_mode: cli.psql_mode,
            command_metadata_file: cli.command_metadata_file,
            query_rewrites_file: cli.query_rewrites_file,
            bigquery_mode: cli.bigquery_mode,
            mock_backend: cli.mock_backend,
        })
    }
}
