//! ドメイン層のエラー定義

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::entity::ConnectionState;

/// 値オブジェクトのバリデーションエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueObjectError {
    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("{kind} is too long: {actual} > {max}")]
    TooLong {
        kind: &'static str,
        max: usize,
        actual: usize,
    },

    #[error("{0} contains an invalid character")]
    InvalidCharacter(&'static str),

    #[error("invalid channel name: '{0}'")]
    InvalidChannel(String),
}

/// 認証エラーの種別
///
/// 外部に見せるのはこの 3 種類のみ。「ユーザーが存在しない」と「署名が不正」は
/// どちらも `Invalid` として扱い、区別を漏らしません。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Error)]
#[serde(rename_all = "lowercase")]
pub enum AuthErrorKind {
    #[error("credential has expired")]
    Expired,

    #[error("credential is malformed")]
    Malformed,

    #[error("credential is invalid")]
    Invalid,
}

impl AuthErrorKind {
    /// 同じクレデンシャルを再送しても結果が変わらない種別か
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Expired)
    }
}

/// MessagePusher のエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessagePushError {
    #[error("Connection '{0}' not found")]
    ClientNotFound(String),

    #[error("Failed to push message: {0}")]
    PushFailed(String),

    #[error("Failed to encode frame: {0}")]
    Encode(String),
}

/// Repository のエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    #[error("Connection '{0}' not found")]
    ConnectionNotFound(String),

    #[error("Connection '{0}' is already registered")]
    DuplicateConnection(String),

    #[error("Connection '{id}' cannot {action} while {from:?}")]
    InvalidTransition {
        id: String,
        from: ConnectionState,
        action: &'static str,
    },

    #[error("Event '{0}' is already registered")]
    DuplicateEvent(String),

    #[error("Event '{0}' not found")]
    EventNotFound(String),
}
