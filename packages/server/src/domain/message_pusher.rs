//! メッセージ送信の抽象化
//!
//! UseCase はこの trait を通じて接続へフレームを送ります。
//! ワイヤ形式への変換は Infrastructure 層の実装が担当します。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::{AuthErrorKind, ChannelName, ConnectionId, Event, MessagePushError, UserId};

/// 接続ごとの送信キュー
pub type PusherChannel = mpsc::UnboundedSender<String>;

/// チャンネル参加を拒否した理由
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JoinRejection {
    Forbidden,
    InvalidChannel,
    NotAuthenticated,
}

/// サーバーから接続へ送る内容
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Authenticated {
        user_id: UserId,
        connection_id: ConnectionId,
    },
    AuthRejected(AuthErrorKind),
    RateLimited {
        retry_after_ms: u64,
    },
    Joined(ChannelName),
    Left(ChannelName),
    JoinRejected {
        channel_name: String,
        reason: JoinRejection,
    },
    Pong {
        timestamp: i64,
    },
    Event(Event),
    CatchUp(Vec<Event>),
}

/// MessagePusher trait
///
/// 接続 ID ごとに送信キューを管理し、フレームを送ります。
/// 送信はキューへの投入のみで、ブロックしません。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessagePusher: Send + Sync {
    /// 接続の送信キューを登録
    async fn register_client(&self, connection_id: ConnectionId, sender: PusherChannel);

    /// 接続の送信キューを登録解除（キューが閉じ、送信タスクが終了する）
    async fn unregister_client(&self, connection_id: &ConnectionId);

    /// 特定の接続へ送信
    async fn push_to(
        &self,
        connection_id: &ConnectionId,
        message: &Outbound,
    ) -> Result<(), MessagePushError>;
}
