//! 外部協調者の trait
//!
//! クレデンシャル検証、チャンネル認可、接続レート制限はこのサブシステムの外にある
//! データ層・認証基盤の責務です。ここではインターフェースだけを定義します。

use async_trait::async_trait;
use thiserror::Error;

use super::{AuthErrorKind, ChannelName, ConversationId, Credential, UserId};

/// クレデンシャル検証
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialValidator: Send + Sync {
    /// クレデンシャルを検証し、対応するユーザー ID を返す
    async fn verify(&self, credential: &Credential) -> Result<UserId, AuthErrorKind>;
}

/// チャンネル認可
#[async_trait]
pub trait ChannelAuthorizer: Send + Sync {
    /// ユーザーが会話の参加者か
    async fn is_participant(&self, user_id: &UserId, conversation_id: &ConversationId) -> bool;

    /// 会話の参加者一覧（配信できなかった宛先の報告に使う）
    async fn participants(&self, conversation_id: &ConversationId) -> Vec<UserId>;

    /// ユーザーがチャンネル所有者本人か
    fn is_self(&self, user_id: &UserId, channel_user_id: &UserId) -> bool {
        user_id == channel_user_id
    }
}

/// ユーザーがチャンネルに参加できるか判定
///
/// `user:<id>` は本人のみ、`conversation:<id>` は参加者のみ。
pub async fn authorize_channel(
    authorizer: &dyn ChannelAuthorizer,
    user_id: &UserId,
    channel: &ChannelName,
) -> bool {
    match channel {
        ChannelName::User(owner) => authorizer.is_self(user_id, owner),
        ChannelName::Conversation(conversation_id) => {
            authorizer.is_participant(user_id, conversation_id).await
        }
    }
}

/// 接続レート制限を超えた
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("connect rate limit exceeded, retry after {retry_after_ms}ms")]
pub struct RateLimitExceeded {
    pub retry_after_ms: u64,
}

/// ユーザー単位の接続レート制限
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConnectRateLimiter: Send + Sync {
    /// 接続を 1 回消費する。上限を超えていれば再試行までの待ち時間を返す
    async fn check(&self, user_id: &UserId) -> Result<(), RateLimitExceeded>;
}
