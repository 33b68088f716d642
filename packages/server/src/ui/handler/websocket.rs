//! WebSocket 接続のハンドラー
//!
//! 1 接続につき 2 つの処理が並行して動きます。
//!
//! - 受信処理: 認証フェーズ → メッセージループ
//! - 送信処理（`pusher_loop`）: MessagePusher のキューから WebSocket へ書き出す
//!
//! 接続が終わると必ず `deregister` され、送信キューが閉じて送信処理も終了します。

use std::{sync::Arc, time::Duration};

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{
    sink::SinkExt,
    stream::{SplitSink, SplitStream, StreamExt},
};
use tokio::sync::mpsc;

use crate::{
    domain::{ChannelName, ConnectionId, EventId, Outbound, UserId},
    infrastructure::dto::websocket::ClientMessage,
    ui::state::AppState,
    usecase::AuthenticateError,
};

/// 切断後に送信キューを書き出し切るまでの猶予
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// 送信キューから受け取ったフレームを WebSocket へ書き出す
///
/// キューが閉じたら（接続が登録解除されたら）Close フレームを送って終了します。
fn pusher_loop(
    mut rx: mpsc::UnboundedReceiver<String>,
    mut sender: SplitSink<WebSocket, Message>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sender.send(Message::Text(text.into())).await.is_err() {
                return;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
        let _ = sender.close().await;
    })
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let connection_id = ConnectionId::generate();
    let (tx, rx) = mpsc::unbounded_channel();
    if let Err(e) = state.registry.register(connection_id, tx).await {
        tracing::error!("Failed to register connection: {}", e);
        return;
    }

    let (sender, mut receiver) = socket.split();
    let mut send_task = pusher_loop(rx, sender);

    let send_finished = tokio::select! {
        _ = run_session(&state, connection_id, &mut receiver) => false,
        _ = &mut send_task => true,
    };

    state.registry.deregister(&connection_id).await;

    if !send_finished && tokio::time::timeout(FLUSH_TIMEOUT, &mut send_task).await.is_err() {
        tracing::debug!("Send task of '{}' did not finish in time", connection_id);
        send_task.abort();
    }
    tracing::info!("Connection '{}' finished", connection_id);
}

enum Incoming {
    Text(String),
    Skip,
    Closed,
}

fn classify(message: Option<Result<Message, axum::Error>>) -> Incoming {
    match message {
        None => Incoming::Closed,
        Some(Err(e)) => {
            tracing::warn!("WebSocket error: {}", e);
            Incoming::Closed
        }
        Some(Ok(Message::Text(text))) => Incoming::Text(text.to_string()),
        Some(Ok(Message::Close(_))) => Incoming::Closed,
        // Ping/pong is handled automatically by the WebSocket protocol
        Some(Ok(_)) => Incoming::Skip,
    }
}

async fn reply(state: &AppState, connection_id: &ConnectionId, message: Outbound) {
    if let Err(e) = state.message_pusher.push_to(connection_id, &message).await {
        tracing::debug!("Reply to '{}' dropped: {}", connection_id, e);
    }
}

async fn run_session(
    state: &AppState,
    connection_id: ConnectionId,
    receiver: &mut SplitStream<WebSocket>,
) {
    let Some(user_id) = authentication_phase(state, connection_id, receiver).await else {
        return;
    };
    message_loop(state, connection_id, &user_id, receiver).await;
}

/// 認証が完了するまでのフェーズ
///
/// 認証タイムアウト、または検証中にトランスポートが閉じた場合は `None`。
async fn authentication_phase(
    state: &AppState,
    connection_id: ConnectionId,
    receiver: &mut SplitStream<WebSocket>,
) -> Option<UserId> {
    let deadline = tokio::time::sleep(state.auth_timeout);
    tokio::pin!(deadline);

    loop {
        let text = tokio::select! {
            _ = &mut deadline => {
                tracing::warn!("Connection '{}' did not authenticate in time", connection_id);
                return None;
            }
            message = receiver.next() => match classify(message) {
                Incoming::Text(text) => text,
                Incoming::Skip => continue,
                Incoming::Closed => return None,
            },
        };

        let credential = match serde_json::from_str::<ClientMessage>(&text) {
            Ok(ClientMessage::Authenticate { credential }) => credential,
            Ok(ClientMessage::Ping) => {
                reply(
                    state,
                    &connection_id,
                    Outbound::Pong {
                        timestamp: state.clock.now_millis(),
                    },
                )
                .await;
                continue;
            }
            Ok(ClientMessage::JoinChannel { channel_name }) => {
                reply(
                    state,
                    &connection_id,
                    Outbound::JoinRejected {
                        channel_name,
                        reason: crate::domain::JoinRejection::NotAuthenticated,
                    },
                )
                .await;
                continue;
            }
            Ok(other) => {
                tracing::debug!(
                    "Ignoring {:?} from unauthenticated connection '{}'",
                    other,
                    connection_id
                );
                continue;
            }
            Err(e) => {
                tracing::warn!("Malformed frame from '{}': {}", connection_id, e);
                continue;
            }
        };

        // 検証中にトランスポートが閉じたら検証ごと破棄する
        let authenticate = state.registry.authenticate(&connection_id, &credential);
        tokio::pin!(authenticate);
        let result = loop {
            tokio::select! {
                result = &mut authenticate => break result,
                _ = &mut deadline => {
                    tracing::warn!("Authentication of '{}' timed out", connection_id);
                    return None;
                }
                message = receiver.next() => match classify(message) {
                    Incoming::Closed => return None,
                    _ => tracing::debug!(
                        "Ignoring frame received during authentication of '{}'",
                        connection_id
                    ),
                },
            }
        };

        return match result {
            Ok(user_id) => {
                reply(
                    state,
                    &connection_id,
                    Outbound::Authenticated {
                        user_id: user_id.clone(),
                        connection_id,
                    },
                )
                .await;
                Some(user_id)
            }
            Err(AuthenticateError::Auth(kind)) => {
                reply(state, &connection_id, Outbound::AuthRejected(kind)).await;
                None
            }
            Err(AuthenticateError::RateLimited { retry_after_ms }) => {
                reply(state, &connection_id, Outbound::RateLimited { retry_after_ms }).await;
                None
            }
            Err(e) => {
                tracing::info!("Authentication of '{}' ended: {}", connection_id, e);
                None
            }
        };
    }
}

/// 認証済み接続のメッセージループ
async fn message_loop(
    state: &AppState,
    connection_id: ConnectionId,
    user_id: &UserId,
    receiver: &mut SplitStream<WebSocket>,
) {
    loop {
        let text = match classify(receiver.next().await) {
            Incoming::Text(text) => text,
            Incoming::Skip => continue,
            Incoming::Closed => {
                tracing::info!("User '{}' closed connection '{}'", user_id, connection_id);
                return;
            }
        };

        let message = match serde_json::from_str::<ClientMessage>(&text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Malformed frame from '{}': {}", connection_id, e);
                continue;
            }
        };

        match message {
            ClientMessage::Authenticate { .. } => {
                tracing::debug!("Connection '{}' is already authenticated", connection_id);
            }
            ClientMessage::JoinChannel { channel_name } => {
                let response = match state.router.join(&connection_id, &channel_name).await {
                    Ok(channel) => Outbound::Joined(channel),
                    Err(e) => Outbound::JoinRejected {
                        channel_name,
                        reason: e.rejection(),
                    },
                };
                reply(state, &connection_id, response).await;
            }
            ClientMessage::LeaveChannel { channel_name } => {
                state.router.leave(&connection_id, &channel_name).await;
                if let Ok(channel) = ChannelName::parse(&channel_name) {
                    reply(state, &connection_id, Outbound::Left(channel)).await;
                }
            }
            ClientMessage::Ack { event_id } => {
                state.dispatcher.acknowledge(&connection_id, &event_id).await;
            }
            ClientMessage::Ping => {
                state.registry.touch(&connection_id).await;
                reply(
                    state,
                    &connection_id,
                    Outbound::Pong {
                        timestamp: state.clock.now_millis(),
                    },
                )
                .await;
            }
            ClientMessage::CatchUp { since_event_id } => {
                let since = since_event_id.and_then(|id| EventId::new(id).ok());
                if let Err(e) = state.dispatcher.replay(&connection_id, since.as_ref()).await {
                    tracing::warn!("Catch-up for '{}' failed: {}", connection_id, e);
                }
            }
        }
    }
}
