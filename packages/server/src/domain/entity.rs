//! エンティティ定義
//!
//! - `Connection`: 1 本のトランスポートセッション（揮発性）
//! - `Event`: チャンネルに配信される不変のイベント
//! - `DeliveryRecord`: (イベント, ユーザー) ごとの配信・既読状態

use std::{collections::BTreeSet, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use super::{
    error::RepositoryError,
    value_object::{ChannelName, ConnectionId, ConversationId, EventId, Sequence, Timestamp, UserId},
};

/// 接続の状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionState {
    Connecting,
    Authenticating,
    Open,
    Closed,
}

/// 接続エンティティ
///
/// `user_id` は認証が完了するまで `None`。
/// `channels` は `Open` 状態の間だけ空でなくなり得ます。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub id: ConnectionId,
    pub user_id: Option<UserId>,
    pub state: ConnectionState,
    pub channels: BTreeSet<ChannelName>,
    pub connected_at: Timestamp,
    pub last_activity_at: Timestamp,
}

impl Connection {
    /// `Connecting` 状態の新しい接続を作成
    pub fn new(id: ConnectionId, now: Timestamp) -> Self {
        Self {
            id,
            user_id: None,
            state: ConnectionState::Connecting,
            channels: BTreeSet::new(),
            connected_at: now,
            last_activity_at: now,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// 認証済みかつ `Open` のときのみユーザー ID を返す
    pub fn authenticated_user(&self) -> Option<&UserId> {
        if self.is_open() {
            self.user_id.as_ref()
        } else {
            None
        }
    }

    /// `Connecting` → `Authenticating`
    pub fn begin_authentication(&mut self) -> Result<(), RepositoryError> {
        self.transition(
            ConnectionState::Connecting,
            ConnectionState::Authenticating,
            "begin authentication",
        )
    }

    /// `Authenticating` → `Open`、ユーザーを紐付ける
    pub fn open(&mut self, user_id: UserId, now: Timestamp) -> Result<(), RepositoryError> {
        self.transition(ConnectionState::Authenticating, ConnectionState::Open, "open")?;
        self.user_id = Some(user_id);
        self.last_activity_at = now;
        Ok(())
    }

    /// 任意の状態から `Closed` へ。メンバーシップも全て外れる
    pub fn close(&mut self) {
        self.state = ConnectionState::Closed;
        self.channels.clear();
    }

    pub fn touch(&mut self, now: Timestamp) {
        self.last_activity_at = now;
    }

    fn transition(
        &mut self,
        from: ConnectionState,
        to: ConnectionState,
        action: &'static str,
    ) -> Result<(), RepositoryError> {
        if self.state != from {
            return Err(RepositoryError::InvalidTransition {
                id: self.id.to_string(),
                from: self.state,
                action,
            });
        }
        self.state = to;
        Ok(())
    }
}

/// 通知の種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    LikePost,
    CommentPost,
    LikeReel,
    CommentReel,
    Follow,
    Mention,
    StoryReply,
}

/// イベントの型付きペイロード
///
/// ワイヤ上は `type` タグ（kebab-case）とフィールド（camelCase）で表現されます。
/// 各イベントの名前は 1 つだけで、別名は受け付けません。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum EventPayload {
    NewNotification {
        notification_type: NotificationType,
        sender: UserId,
        content: String,
    },
    NewMessage {
        conversation_id: ConversationId,
        /// メッセージ本体（内容はこのサブシステムでは解釈しない）
        message: serde_json::Value,
    },
    MessageRead {
        conversation_id: ConversationId,
        message_id: String,
        reader_id: UserId,
    },
    ReelLiked {
        reel_id: String,
        liker_id: UserId,
        likes_count: u64,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::NewNotification { .. } => EventKind::NewNotification,
            Self::NewMessage { .. } => EventKind::NewMessage,
            Self::MessageRead { .. } => EventKind::MessageRead,
            Self::ReelLiked { .. } => EventKind::ReelLiked,
        }
    }
}

/// イベントのタグ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    NewNotification,
    NewMessage,
    MessageRead,
    ReelLiked,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        Self::NewNotification,
        Self::NewMessage,
        Self::MessageRead,
        Self::ReelLiked,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewNotification => "new-notification",
            Self::NewMessage => "new-message",
            Self::MessageRead => "message-read",
            Self::ReelLiked => "reel-liked",
        }
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown event kind: '{}'", s))
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 配信前のイベント（ID とペイロードのみ）
#[derive(Debug, Clone, PartialEq)]
pub struct EventDraft {
    pub id: EventId,
    pub payload: EventPayload,
}

impl EventDraft {
    /// ID を採番してドラフトを作成
    pub fn new(payload: EventPayload) -> Self {
        Self {
            id: EventId::generate(),
            payload,
        }
    }

    /// プロデューサー指定の ID でドラフトを作成
    pub fn with_id(id: EventId, payload: EventPayload) -> Self {
        Self { id, payload }
    }
}

/// 配信対象のイベント（作成後は不変）
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub id: EventId,
    pub channel: ChannelName,
    pub sequence: Sequence,
    pub created_at: Timestamp,
    pub payload: EventPayload,
}

/// 配信状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Delivered,
    Acknowledged,
}

impl DeliveryStatus {
    /// 現在の状態に要求された状態を適用した結果
    ///
    /// 状態は `Delivered` → `Acknowledged` の一方向にしか進みません。
    /// 変化がない場合は `None`。
    pub fn apply(current: Option<Self>, requested: Self) -> Option<Self> {
        match (current, requested) {
            (None, requested) => Some(requested),
            (Some(Self::Delivered), Self::Acknowledged) => Some(Self::Acknowledged),
            _ => None,
        }
    }
}

/// (イベント, ユーザー) の配信記録
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRecord {
    pub event_id: EventId,
    pub user_id: UserId,
    pub status: DeliveryStatus,
    pub recorded_at: Timestamp,
}
