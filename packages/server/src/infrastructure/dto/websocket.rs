//! WebSocket メッセージの DTO
//!
//! 全てのフレームは JSON テキストで、`type` タグは kebab-case、フィールドは camelCase。

use serde::{Deserialize, Serialize};

use crate::domain::{AuthErrorKind, EventPayload, JoinRejection};

/// クライアント → サーバー
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    Authenticate {
        credential: String,
    },
    JoinChannel {
        channel_name: String,
    },
    LeaveChannel {
        channel_name: String,
    },
    Ack {
        event_id: String,
    },
    Ping,
    CatchUp {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        since_event_id: Option<String>,
    },
}

/// サーバー → クライアントの制御フレーム
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ControlMessage {
    Authenticated {
        user_id: String,
        connection_id: String,
    },
    AuthError {
        kind: AuthErrorKind,
    },
    RateLimited {
        retry_after_ms: u64,
    },
    Joined {
        channel_name: String,
    },
    Left {
        channel_name: String,
    },
    JoinError {
        channel_name: String,
        reason: JoinRejection,
    },
    Pong {
        timestamp: i64,
    },
    CatchUp {
        events: Vec<EventFrame>,
    },
}

/// イベントフレーム
///
/// 共通フィールドにペイロード（`type` タグ付き）をフラットに展開した形。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFrame {
    pub event_id: String,
    pub channel: String,
    pub sequence: u64,
    pub created_at: i64,
    #[serde(flatten)]
    pub payload: EventPayload,
}

/// サーバー → クライアントの全フレーム
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerFrame {
    Control(ControlMessage),
    Event(EventFrame),
}
