//! Data Transfer Objects
//!
//! - `websocket`: WebSocket フレーム
//! - `http`: HTTP API のリクエスト・レスポンス
//! - `conversion`: DTO とドメインモデルの相互変換

pub mod conversion;
pub mod http;
pub mod websocket;
