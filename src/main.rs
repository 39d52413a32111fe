//! Resilient API client CLI.
//!
//! # Architecture Overview
//!
//! ```text
//!   caller ──▶ request::envelope ──▶ dispatch::pipeline ──▶ transport ──▶ backend
//!                                         │    ▲
//!                         401 ────────────┤    │ new credential
//!                                         ▼    │
//!                                   auth::refresh (single flight) ──▶ POST /auth/refresh
//!                                         │
//!                         429 ────────────┤
//!                                         ▼
//!                                resilience::backoff (Retry-After / default)
//!
//!   cross-cutting: credentials (store + persistence), observability, config
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use reqwest::Method;

use resilient_client::auth::RefreshError;
use resilient_client::config::{load_config, load_from_env, ClientConfig};
use resilient_client::observability::{logging, metrics};
use resilient_client::{ApiClient, CredentialPair, RequestSpec};

const DEFAULT_CREDENTIALS_FILE: &str = ".resilient-client-credentials.json";

#[derive(Parser)]
#[command(name = "resilient-client")]
#[command(about = "Authenticated API client with single-flight refresh and backoff", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Credential file (overrides auth.credentials_path).
    #[arg(long)]
    credentials: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store an access/refresh credential pair
    Login {
        #[arg(long)]
        access_token: String,
        #[arg(long)]
        refresh_token: String,
    },
    /// Forget stored credentials
    Logout,
    /// Show whether credentials are present
    Status,
    /// Check the backend health endpoint
    Health,
    /// Send a request and print the JSON response
    Request {
        /// HTTP method (GET, POST, PUT, PATCH, DELETE)
        method: String,
        /// Path relative to api.base_url
        path: String,
        /// JSON request body
        #[arg(long)]
        body: Option<String>,
        /// Query parameter as key=value (repeatable)
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
        /// Send without a credential
        #[arg(long)]
        anonymous: bool,
    },
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    logging::init_logging(&config.observability.log_level);

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    match run(cli.command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn load(cli: &Cli) -> Result<ClientConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => load_from_env()?,
    };
    if let Some(path) = &cli.credentials {
        config.auth.credentials_path = Some(path.to_string_lossy().into_owned());
    }
    // Separate invocations share credentials only through a file.
    if config.auth.credentials_path.is_none() {
        config.auth.credentials_path = Some(DEFAULT_CREDENTIALS_FILE.to_string());
    }
    Ok(config)
}

async fn run(command: Commands, config: ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    let hook = |reason: &RefreshError| {
        eprintln!("Session expired ({}). Run `resilient-client login` again.", reason);
    };
    let client = ApiClient::builder(config).reauth_hook(Arc::new(hook)).build()?;

    match command {
        Commands::Login {
            access_token,
            refresh_token,
        } => {
            client.login(CredentialPair::new(access_token, refresh_token));
            println!("Credentials stored");
        }
        Commands::Logout => {
            client.logout();
            println!("Credentials cleared");
        }
        Commands::Status => {
            let state = client.credentials();
            match &state.pair {
                Some(pair) if pair.is_expired() => println!("Logged in (access credential expired)"),
                Some(_) => println!("Logged in"),
                None => println!("Not logged in"),
            }
        }
        Commands::Health => {
            let health = client.health().await?;
            println!("{}", serde_json::to_string_pretty(&health)?);
        }
        Commands::Request {
            method,
            path,
            body,
            params,
            anonymous,
        } => {
            let method = Method::from_bytes(method.to_uppercase().as_bytes())?;
            let mut spec = RequestSpec::new(method, path);
            if let Some(body) = body {
                let value: serde_json::Value = serde_json::from_str(&body)?;
                spec = spec.json_value(value);
            }
            for (k, v) in params {
                spec = spec.param(k, v);
            }
            if anonymous {
                spec = spec.anonymous();
            }

            let response = client.send(spec).await?;
            tracing::debug!(
                correlation_id = %response.correlation_id,
                attempts = response.attempts,
                status = %response.status,
                "Request completed"
            );
            match response.json::<serde_json::Value>() {
                Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
                Err(_) => println!("{}", response.text()),
            }
        }
    }

    Ok(())
}
