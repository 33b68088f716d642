//! UseCase 層のエラー定義

use thiserror::Error;

use crate::domain::{AuthErrorKind, JoinRejection};

/// 接続登録のエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegisterError {
    #[error("Connection '{0}' is already registered")]
    DuplicateConnection(String),
}

/// 認証のエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthenticateError {
    #[error("Authentication failed: {0}")]
    Auth(AuthErrorKind),

    #[error("Connect rate limit exceeded, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Connection '{0}' not found")]
    ConnectionNotFound(String),

    #[error("Connection '{0}' closed during authentication")]
    Cancelled(String),

    #[error("Connection '{0}' is not awaiting authentication")]
    InvalidState(String),
}

/// チャンネル参加のエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JoinError {
    #[error("Invalid channel name: '{0}'")]
    InvalidChannel(String),

    #[error("Connection '{0}' not found")]
    ConnectionNotFound(String),

    #[error("Connection '{0}' is not authenticated")]
    NotAuthenticated(String),

    #[error("Not allowed to join channel '{0}'")]
    Forbidden(String),
}

impl JoinError {
    /// クライアントへ返す拒否理由
    pub fn rejection(&self) -> JoinRejection {
        match self {
            Self::InvalidChannel(_) => JoinRejection::InvalidChannel,
            Self::ConnectionNotFound(_) | Self::NotAuthenticated(_) => {
                JoinRejection::NotAuthenticated
            }
            Self::Forbidden(_) => JoinRejection::Forbidden,
        }
    }
}

/// イベント発行のエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    #[error("Failed to register event: {0}")]
    Repository(String),
}

/// 取りこぼしイベント再送のエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplayError {
    #[error("Connection '{0}' not found")]
    ConnectionNotFound(String),

    #[error("Connection '{0}' is not authenticated")]
    NotAuthenticated(String),

    #[error("Failed to push catch-up frame: {0}")]
    PushFailed(String),
}
