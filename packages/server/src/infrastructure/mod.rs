//! Infrastructure 層
//!
//! ドメイン層で定義された trait の具体的な実装と、ワイヤ形式の DTO を提供します。

pub mod authorizer;
pub mod credential;
pub mod dto;
pub mod message_pusher;
pub mod rate_limiter;
pub mod repository;
