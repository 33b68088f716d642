//! Reconnecting client for the Hibiki event delivery server.
//!
//! - `reconnect`: retry/backoff state machine (no I/O)
//! - `runner`: drives the state machine over a WebSocket
//! - `inbox`: de-duplication of events seen live and through catch-up
//! - `subscription`: per event kind handler table
//! - `credential`: credential provider used for authentication and refresh

pub mod credential;
pub mod error;
pub mod formatter;
pub mod inbox;
pub mod reconnect;
pub mod runner;
pub mod subscription;
pub mod ui;

pub use credential::{CredentialProvider, FileCredentialProvider, StaticCredentialProvider};
pub use error::ClientError;
pub use reconnect::{ReconnectController, ReconnectPolicy};
pub use runner::{ClientConfig, ClientHandle, ClientRunner, ConnectionStatus, Notice};
pub use subscription::{EventSubscriptions, SubscriptionId};
