//! Hibiki CLI client with automatic reconnection.
//!
//! Connects to the event delivery server, authenticates, joins the channels given
//! on the command line and prints every event it receives. Events are acknowledged
//! once printed. Lost connections are re-established with backoff, channels are
//! rejoined and missed events are caught up.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin hibiki-client -- --token "$(cargo run -q --bin hibiki-server -- --dev --print-token-for alice)" -c user:alice
//! cargo run --bin hibiki-client -- --token-file ./alice.jwt -c user:alice -c conversation:7
//! ```

use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use hibiki_client::{
    ClientConfig, ClientRunner, CredentialProvider, EventSubscriptions, FileCredentialProvider,
    Notice, ReconnectPolicy, StaticCredentialProvider,
    formatter::MessageFormatter,
    ui::{HELP, PROMPT, UserCommand, parse_command, redisplay_prompt},
};
use hibiki_server::domain::EventKind;
use hibiki_shared::{logger::setup_logger, time::SystemClock};
use rustyline::{DefaultEditor, error::ReadlineError};
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(name = "hibiki-client")]
#[command(about = "Real-time event client with automatic reconnection", long_about = None)]
struct Args {
    /// WebSocket server URL
    #[arg(short = 'u', long, default_value = "ws://127.0.0.1:8080/ws")]
    url: String,

    /// Credential (JWT) to authenticate with
    #[arg(short = 't', long, conflicts_with = "token_file")]
    token: Option<String>,

    /// File holding the credential; re-read when the server reports it expired
    #[arg(long)]
    token_file: Option<PathBuf>,

    /// Channel to join after connecting (repeatable)
    #[arg(short = 'c', long = "channel")]
    channels: Vec<String>,

    /// Backoff after the first failure (milliseconds)
    #[arg(long, default_value = "1000")]
    initial_backoff_ms: u64,

    /// Upper bound of the backoff (milliseconds)
    #[arg(long, default_value = "30000")]
    max_backoff_ms: u64,

    /// Consecutive failures before the extended cooldown
    #[arg(long, default_value = "5")]
    max_attempts: u32,

    /// Length of the extended cooldown (seconds)
    #[arg(long, default_value = "60")]
    cooldown_secs: u64,

    /// Interval between heartbeats (seconds)
    #[arg(long, default_value = "30")]
    ping_interval_secs: u64,
}

impl Args {
    fn config(&self) -> ClientConfig {
        let mut config = ClientConfig::new(self.url.clone());
        config.channels = self.channels.clone();
        config.ping_interval = Duration::from_secs(self.ping_interval_secs.max(1));
        config.policy = ReconnectPolicy {
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            max_attempts: self.max_attempts,
            extended_cooldown: Duration::from_secs(self.cooldown_secs),
            ..ReconnectPolicy::default()
        };
        config
    }

    fn credentials(&self) -> Option<Arc<dyn CredentialProvider>> {
        match (&self.token, &self.token_file) {
            (_, Some(path)) => Some(Arc::new(FileCredentialProvider::new(path))),
            (Some(token), None) => Some(Arc::new(StaticCredentialProvider::new(token.clone()))),
            (None, None) => None,
        }
    }
}

/// Spawn a blocking thread for rustyline (synchronous readline)
fn spawn_readline(input_tx: mpsc::UnboundedSender<String>) {
    std::thread::spawn(move || {
        let mut rl = match DefaultEditor::new() {
            Ok(rl) => rl,
            Err(e) => {
                eprintln!("Failed to initialize readline: {}", e);
                return;
            }
        };

        loop {
            match rl.readline(PROMPT) {
                Ok(line) => {
                    let line = line.trim();
                    if !line.is_empty() {
                        rl.add_history_entry(line).ok();
                        if input_tx.send(line.to_string()).is_err() {
                            break;
                        }
                    }
                }
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                    let _ = input_tx.send("/quit".to_string());
                    break;
                }
                Err(err) => {
                    tracing::error!("Readline error: {}", err);
                    break;
                }
            }
        }
    });
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    setup_logger(env!("CARGO_BIN_NAME"), "info");

    let args = Args::parse();
    let Some(credentials) = args.credentials() else {
        tracing::error!("Either --token or --token-file is required");
        std::process::exit(1);
    };

    let mut subscriptions = EventSubscriptions::new();
    for kind in EventKind::ALL {
        subscriptions.subscribe(kind, |event| {
            print!("{}", MessageFormatter::format_event(event));
            redisplay_prompt();
        });
    }

    let (runner, handle, mut notices) = ClientRunner::new(
        args.config(),
        credentials,
        subscriptions,
        Arc::new(SystemClock),
    );
    let mut run_task = tokio::spawn(runner.run());

    let (input_tx, mut input_rx) = mpsc::unbounded_channel::<String>();
    spawn_readline(input_tx);

    let result = loop {
        tokio::select! {
            result = &mut run_task => break result,
            Some(notice) = notices.recv() => {
                let text = match notice {
                    Notice::Status(status) => MessageFormatter::format_status(&status),
                    Notice::Joined(channel) => MessageFormatter::format_joined(&channel),
                    Notice::Left(channel) => MessageFormatter::format_left(&channel),
                    Notice::JoinRejected { channel_name, reason } => {
                        MessageFormatter::format_join_rejected(&channel_name, reason)
                    }
                    // printed by the subscriptions
                    Notice::Event(_) => continue,
                };
                print!("{}", text);
                redisplay_prompt();
            }
            Some(line) = input_rx.recv() => match parse_command(&line) {
                Some(UserCommand::Join(channel)) => handle.join(channel),
                Some(UserCommand::Leave(channel)) => handle.leave(channel),
                Some(UserCommand::Quit) => handle.disconnect(),
                Some(UserCommand::Help) => {
                    println!("{}", HELP);
                    redisplay_prompt();
                }
                None => {}
            },
        }
    };

    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::error!("Client error: {}", e);
            std::process::exit(1);
        }
        Err(e) => {
            tracing::error!("Client task failed: {}", e);
            std::process::exit(1);
        }
    }
}
