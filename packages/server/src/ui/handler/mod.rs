//! リクエストハンドラー

mod http;
mod websocket;

pub use http::{debug_connections, get_unread, health_check, publish_event, update_participants};
pub use websocket::websocket_handler;
