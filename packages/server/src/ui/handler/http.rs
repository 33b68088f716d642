//! HTTP API のハンドラー
//!
//! - `/api/*`: ヘルスチェックと未読数
//! - `/debug/*`: 接続一覧（テスト・調査用）
//! - `/internal/*`: プロデューサーとデータ層から呼ばれるエンドポイント

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

use crate::{
    domain::{ChannelName, ConversationId, EventDraft, EventId, UserId},
    infrastructure::dto::http::{
        ConnectionSummaryDto, DeliveryReportDto, ErrorResponseDto, PublishEventRequest,
        UnreadCountDto, UpdateParticipantsRequest,
    },
    ui::state::AppState,
};

type HttpError = (StatusCode, Json<ErrorResponseDto>);

fn bad_request(message: impl ToString) -> HttpError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponseDto {
            error: message.to_string(),
        }),
    )
}

/// ヘルスチェック
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// 登録中の全接続を返す（デバッグ用）
pub async fn debug_connections(
    State(state): State<Arc<AppState>>,
) -> Json<Vec<ConnectionSummaryDto>> {
    let connections = state.registry.list().await;
    Json(connections.iter().map(ConnectionSummaryDto::from).collect())
}

/// プロデューサーの入口: チャンネルにイベントを発行する
///
/// チャンネル名やイベント ID が不正なら 400、登録に失敗したら 500 を返します。
pub async fn publish_event(
    State(state): State<Arc<AppState>>,
    Path(channel): Path<String>,
    Json(request): Json<PublishEventRequest>,
) -> Result<Json<DeliveryReportDto>, HttpError> {
    let channel = ChannelName::parse(&channel).map_err(bad_request)?;
    let draft = match request.event_id {
        Some(event_id) => {
            EventDraft::with_id(EventId::new(event_id).map_err(bad_request)?, request.payload)
        }
        None => EventDraft::new(request.payload),
    };

    match state.dispatcher.publish(channel, draft).await {
        Ok(report) => Ok(Json(DeliveryReportDto::from(report))),
        Err(e) => {
            tracing::error!("Failed to publish event: {}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponseDto {
                    error: e.to_string(),
                }),
            ))
        }
    }
}

/// 会話の参加者一覧を置き換える
pub async fn update_participants(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<String>,
    Json(request): Json<UpdateParticipantsRequest>,
) -> Result<StatusCode, HttpError> {
    let conversation_id = ConversationId::new(conversation_id).map_err(bad_request)?;
    let participants = request
        .participants
        .into_iter()
        .map(UserId::new)
        .collect::<Result<Vec<_>, _>>()
        .map_err(bad_request)?;

    state
        .authorizer
        .set_participants(conversation_id, participants)
        .await;
    Ok(StatusCode::NO_CONTENT)
}

/// ユーザーの未読数（配信済みで未 ack のイベント数）
pub async fn get_unread(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<UnreadCountDto>, HttpError> {
    let user_id = UserId::new(user_id).map_err(bad_request)?;
    let unread = state.tracker.unread_count(&user_id).await;
    Ok(Json(UnreadCountDto {
        user_id: user_id.into_string(),
        unread,
    }))
}
