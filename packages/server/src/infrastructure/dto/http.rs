//! HTTP API の DTO

use serde::{Deserialize, Serialize};

use crate::domain::{ConnectionState, EventPayload};

/// `POST /internal/channels/{channel}/events` のリクエスト
///
/// `eventId` を省略した場合はサーバーで採番します。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishEventRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

/// 配信結果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReportDto {
    pub event_id: String,
    pub channel: String,
    pub sequence: Option<u64>,
    pub duplicate: bool,
    pub delivered_users: Vec<String>,
    pub delivered_connections: usize,
    pub undelivered_users: Vec<String>,
}

/// `PUT /internal/conversations/{id}/participants` のリクエスト
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateParticipantsRequest {
    pub participants: Vec<String>,
}

/// 接続一覧の要素
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSummaryDto {
    pub connection_id: String,
    pub user_id: Option<String>,
    pub state: ConnectionState,
    pub channels: Vec<String>,
    pub connected_at: String,
    pub last_activity_at: String,
}

/// 未読数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCountDto {
    pub user_id: String,
    pub unread: usize,
}

/// エラーレスポンス
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponseDto {
    pub error: String,
}
