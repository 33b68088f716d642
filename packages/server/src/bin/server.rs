//! Real-time event delivery server.
//!
//! Accepts WebSocket connections on `/ws`, authenticates them with HS256 JWTs
//! signed with `JWT_SECRET`, and pushes events published through the
//! internal HTTP endpoints.
//!
//! Run with:
//! ```not_rust
//! JWT_SECRET=... cargo run --bin hibiki-server
//! JWT_SECRET=... cargo run --bin hibiki-server -- --host 0.0.0.0 --port 3000
//! cargo run --bin hibiki-server -- --dev
//! cargo run --bin hibiki-server -- --dev --print-token-for alice
//! ```

use std::{sync::Arc, time::Duration};

use clap::Parser;
use hibiki_server::{
    config::{SECRET_ENV, ServerConfig, resolve_secret},
    domain::UserId,
    infrastructure::credential::JwtCredentialValidator,
    ui::{AppState, Server},
};
use hibiki_shared::{logger::setup_logger, time::SystemClock};

#[derive(Parser, Debug)]
#[command(name = "hibiki-server")]
#[command(about = "Real-time event delivery server", long_about = None)]
struct Args {
    /// Host address to bind the server to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port number to bind the server to
    #[arg(short = 'p', long, default_value = "8080")]
    port: u16,

    /// How long events and delivery records are kept (seconds)
    #[arg(long, default_value = "86400")]
    retention_secs: u64,

    /// Interval of the retention sweep (seconds)
    #[arg(long, default_value = "60")]
    sweep_interval_secs: u64,

    /// Time allowed between connecting and authenticating (seconds)
    #[arg(long, default_value = "10")]
    auth_timeout_secs: u64,

    /// Authenticated connections allowed per user within the rate window
    #[arg(long, default_value = "20")]
    connect_rate_limit: u32,

    /// Length of the connection rate window (seconds)
    #[arg(long, default_value = "60")]
    connect_rate_window_secs: u64,

    /// Fall back to the built-in development secret when JWT_SECRET is unset
    #[arg(long)]
    dev: bool,

    /// Print a signed token for this user and exit
    #[arg(long, value_name = "USER_ID")]
    print_token_for: Option<String>,

    /// Lifetime of tokens printed with --print-token-for (seconds)
    #[arg(long, default_value = "3600")]
    token_ttl_secs: u64,
}

impl Args {
    fn config(&self) -> ServerConfig {
        ServerConfig {
            host: self.host.clone(),
            port: self.port,
            retention: Duration::from_secs(self.retention_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs.max(1)),
            auth_timeout: Duration::from_secs(self.auth_timeout_secs),
            connect_rate_limit: self.connect_rate_limit,
            connect_rate_window: Duration::from_secs(self.connect_rate_window_secs),
        }
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    setup_logger(env!("CARGO_BIN_NAME"), "debug");

    let args = Args::parse();
    let config = args.config();

    let secret = match resolve_secret(std::env::var(SECRET_ENV).ok(), args.dev) {
        Ok(secret) => secret,
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    };

    let validator = match JwtCredentialValidator::new(secret.as_bytes()) {
        Ok(validator) => validator,
        Err(e) => {
            tracing::error!("Failed to create credential validator: {}", e);
            std::process::exit(1);
        }
    };

    if let Some(user_id) = args.print_token_for {
        let token = UserId::new(user_id)
            .map_err(|e| e.to_string())
            .and_then(|user_id| {
                validator
                    .issue(&user_id, Duration::from_secs(args.token_ttl_secs))
                    .map_err(|e| e.to_string())
            });
        match token {
            Ok(token) => println!("{}", token),
            Err(e) => {
                tracing::error!("Failed to issue token: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    let state = AppState::in_memory(&config, Arc::new(validator), Arc::new(SystemClock));
    let server = Server::new(state, config.sweep_interval);
    if let Err(e) = server.run(config.host.clone(), config.port).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
