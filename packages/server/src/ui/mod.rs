//! UI 層: WebSocket / HTTP サーバー

mod handler;
mod server;
mod signal;
pub mod state;

pub use server::Server;
pub use state::AppState;
