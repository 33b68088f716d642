//! Client execution logic with reconnection support.
//!
//! 1 つのタスクが次のものを `select!` で待ちます。
//!
//! - 再接続タイマー
//! - WebSocket の受信
//! - ping の送信間隔
//! - アプリケーションからの要求（参加・退出・切断）
//!
//! 接続・認証・再接続の判断は全て `ReconnectController` が行い、
//! このモジュールはその `Command` を実行するだけです。

use std::{collections::VecDeque, sync::Arc, time::Duration};

use futures_util::{SinkExt, StreamExt};
use hibiki_server::{
    domain::{AuthErrorKind, Event, JoinRejection},
    infrastructure::dto::websocket::{ClientMessage, ControlMessage, EventFrame, ServerFrame},
};
use hibiki_shared::time::Clock;
use tokio::{
    net::TcpStream,
    sync::{mpsc, watch},
    time::Instant,
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message,
};

use crate::{
    credential::CredentialProvider,
    error::ClientError,
    inbox::{DEFAULT_INBOX_CAPACITY, EventInbox},
    reconnect::{Command, Input, ReconnectController, ReconnectPolicy, ReconnectState},
    subscription::EventSubscriptions,
};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// クライアント設定
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket エンドポイント（例: `ws://127.0.0.1:8080/ws`）
    pub url: String,
    pub policy: ReconnectPolicy,
    pub ping_interval: Duration,
    /// ハンドシェイクの待ち時間の上限
    pub connect_timeout: Duration,
    /// 最初に参加するチャンネル
    pub channels: Vec<String>,
    pub inbox_capacity: usize,
    /// 受け取ったイベントを自動で既読にするか
    pub auto_ack: bool,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            policy: ReconnectPolicy::default(),
            ping_interval: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            channels: Vec::new(),
            inbox_capacity: DEFAULT_INBOX_CAPACITY,
            auto_ack: true,
        }
    }
}

/// アプリケーションから見た接続状態
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Idle,
    Connecting,
    Connected { user_id: String },
    /// `retry_at`（ミリ秒）に再接続する
    Reconnecting { retry_at: i64, attempts: u32 },
    CoolingDown { retry_at: i64 },
    RefreshingCredential,
    Halted(AuthErrorKind),
    Disconnected,
}

/// Runner からアプリケーションへの通知
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Status(ConnectionStatus),
    Event(Event),
    Joined(String),
    JoinRejected {
        channel_name: String,
        reason: JoinRejection,
    },
    Left(String),
}

enum ClientRequest {
    Join(String),
    Leave(String),
    Disconnect,
}

/// 実行中のクライアントへの操作ハンドル
#[derive(Clone)]
pub struct ClientHandle {
    requests: mpsc::UnboundedSender<ClientRequest>,
    status: watch::Receiver<ConnectionStatus>,
}

impl ClientHandle {
    pub fn join(&self, channel: impl Into<String>) {
        let _ = self.requests.send(ClientRequest::Join(channel.into()));
    }

    pub fn leave(&self, channel: impl Into<String>) {
        let _ = self.requests.send(ClientRequest::Leave(channel.into()));
    }

    pub fn disconnect(&self) {
        let _ = self.requests.send(ClientRequest::Disconnect);
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    /// 状態が `predicate` を満たすまで待つ
    pub async fn wait_for<F>(&mut self, predicate: F) -> Option<ConnectionStatus>
    where
        F: FnMut(&ConnectionStatus) -> bool,
    {
        self.status
            .wait_for(predicate)
            .await
            .ok()
            .map(|status| status.clone())
    }
}

/// 再接続付きクライアント
pub struct ClientRunner {
    config: ClientConfig,
    credentials: Arc<dyn CredentialProvider>,
    controller: ReconnectController,
    inbox: EventInbox,
    subscriptions: EventSubscriptions,
    socket: Option<Socket>,
    wake_at: Option<Instant>,
    user_id: Option<String>,
    clock: Arc<dyn Clock>,
    requests: mpsc::UnboundedReceiver<ClientRequest>,
    status: watch::Sender<ConnectionStatus>,
    notices: mpsc::UnboundedSender<Notice>,
}

impl ClientRunner {
    /// クライアントを組み立てる（まだ接続しない）
    ///
    /// # Returns
    ///
    /// * `ClientRunner` - `run` で接続を開始する
    /// * `ClientHandle` - 参加・退出・切断の操作
    /// * `UnboundedReceiver<Notice>` - 状態変化と受信イベントの通知
    pub fn new(
        config: ClientConfig,
        credentials: Arc<dyn CredentialProvider>,
        subscriptions: EventSubscriptions,
        clock: Arc<dyn Clock>,
    ) -> (Self, ClientHandle, mpsc::UnboundedReceiver<Notice>) {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Idle);
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();

        let mut controller = ReconnectController::new(config.policy.clone(), clock.clone());
        for channel in &config.channels {
            controller.remember_channel(channel.clone());
        }

        let runner = Self {
            inbox: EventInbox::new(config.inbox_capacity),
            config,
            credentials,
            controller,
            subscriptions,
            socket: None,
            wake_at: None,
            user_id: None,
            clock,
            requests: request_rx,
            status: status_tx,
            notices: notice_tx,
        };
        let handle = ClientHandle {
            requests: request_tx,
            status: status_rx,
        };
        (runner, handle, notice_rx)
    }

    /// 明示的に切断されるか、クレデンシャルが拒否されるまで動き続ける
    ///
    /// # Errors
    ///
    /// `malformed` / `invalid`、または更新できなかった `expired` の場合は
    /// `ClientError::AuthFailed` を返します。
    pub async fn run(mut self) -> Result<(), ClientError> {
        let mut ping = tokio::time::interval(self.config.ping_interval);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        self.input(Input::Start).await;

        loop {
            if let ReconnectState::Halted { kind } = self.controller.state() {
                return Err(ClientError::AuthFailed(kind));
            }

            let wake_at = self.wake_at;
            let connected = self.controller.state() == ReconnectState::Connected;

            tokio::select! {
                _ = sleep_until(wake_at), if wake_at.is_some() => {
                    self.wake_at = None;
                    self.input(Input::Wake).await;
                }
                message = next_message(&mut self.socket), if self.socket.is_some() => {
                    self.on_message(message).await;
                }
                _ = ping.tick(), if connected => {
                    self.send(&ClientMessage::Ping).await;
                }
                request = self.requests.recv() => match request {
                    Some(ClientRequest::Join(channel)) => {
                        self.controller.remember_channel(channel.clone());
                        if connected {
                            self.send(&ClientMessage::JoinChannel { channel_name: channel }).await;
                        }
                    }
                    Some(ClientRequest::Leave(channel)) => {
                        self.controller.forget_channel(&channel);
                        if connected {
                            self.send(&ClientMessage::LeaveChannel { channel_name: channel }).await;
                        }
                    }
                    Some(ClientRequest::Disconnect) | None => {
                        self.input(Input::Disconnect).await;
                        self.publish_status(ConnectionStatus::Disconnected);
                        tracing::info!("Client disconnected");
                        return Ok(());
                    }
                },
            }
        }
    }

    /// 入力を状態機械に渡し、返ってきた副作用を全て実行する
    async fn input(&mut self, input: Input) {
        let mut pending: VecDeque<Command> = self.controller.handle(input).into();
        while let Some(command) = pending.pop_front() {
            let follow_up = self.execute(command).await;
            pending.extend(follow_up);
        }
        self.sync_status();
    }

    async fn execute(&mut self, command: Command) -> Vec<Command> {
        match command {
            Command::OpenTransport => self.open_transport().await,
            Command::SendAuthenticate => match self.credentials.current().await {
                Ok(credential) => {
                    if self.send(&ClientMessage::Authenticate { credential }).await {
                        Vec::new()
                    } else {
                        self.controller.handle(Input::TransportClosed)
                    }
                }
                Err(e) => {
                    tracing::warn!("No credential available: {}", e);
                    self.close_transport().await;
                    self.controller.handle(Input::TransportClosed)
                }
            },
            Command::RejoinChannels(channels) => {
                for channel_name in channels {
                    self.send(&ClientMessage::JoinChannel { channel_name }).await;
                }
                Vec::new()
            }
            Command::RequestCatchUp { since } => {
                self.send(&ClientMessage::CatchUp {
                    since_event_id: since,
                })
                .await;
                Vec::new()
            }
            Command::ScheduleWake { at } => {
                let delay = at.saturating_sub(self.clock.now_millis()).max(0);
                self.wake_at =
                    Some(Instant::now() + Duration::from_millis(u64::try_from(delay).unwrap_or(0)));
                Vec::new()
            }
            Command::CancelWake => {
                self.wake_at = None;
                Vec::new()
            }
            Command::RefreshCredential => {
                self.close_transport().await;
                match self.credentials.refresh().await {
                    Ok(_) => {
                        tracing::info!("Credential refreshed");
                        self.controller.handle(Input::CredentialRefreshed)
                    }
                    Err(e) => {
                        tracing::error!("Failed to refresh credential: {}", e);
                        self.controller.handle(Input::CredentialRefreshFailed)
                    }
                }
            }
            Command::SurfaceAuthError(kind) => {
                tracing::error!("Credential rejected by the server: {:?}", kind);
                Vec::new()
            }
            Command::CloseTransport => {
                self.close_transport().await;
                Vec::new()
            }
        }
    }

    async fn open_transport(&mut self) -> Vec<Command> {
        tracing::info!(
            "Connecting to {} (attempt {})",
            self.config.url,
            self.controller.attempts() + 1
        );
        let connect = tokio::time::timeout(
            self.config.connect_timeout,
            connect_async(self.config.url.as_str()),
        );
        match connect.await {
            Ok(Ok((socket, _response))) => {
                self.socket = Some(socket);
                self.controller.handle(Input::TransportOpened)
            }
            Ok(Err(e)) => {
                tracing::warn!("Failed to connect: {}", e);
                self.controller.handle(Input::TransportClosed)
            }
            Err(_) => {
                tracing::warn!("Connection attempt timed out");
                self.controller.handle(Input::TransportClosed)
            }
        }
    }

    async fn close_transport(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            let _ = socket.close(None).await;
        }
    }

    /// フレームを送る。送れなかった場合は `false`
    async fn send(&mut self, message: &ClientMessage) -> bool {
        let Some(socket) = self.socket.as_mut() else {
            return false;
        };
        let json = match serde_json::to_string(message) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!("{}", ClientError::from(e));
                return false;
            }
        };
        if let Err(e) = socket.send(Message::Text(json.into())).await {
            tracing::warn!("Failed to send frame: {}", e);
            return false;
        }
        true
    }

    async fn on_message(
        &mut self,
        message: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>,
    ) {
        let text = match message {
            Some(Ok(Message::Text(text))) => text.to_string(),
            Some(Ok(Message::Close(_))) | None => {
                tracing::info!("Server closed the connection");
                self.socket = None;
                self.input(Input::TransportClosed).await;
                return;
            }
            Some(Err(e)) => {
                tracing::warn!("WebSocket read error: {}", e);
                self.socket = None;
                self.input(Input::TransportClosed).await;
                return;
            }
            Some(Ok(_)) => return,
        };

        let frame = match serde_json::from_str::<ServerFrame>(&text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Unrecognized frame ({}): {}", e, text);
                return;
            }
        };

        match frame {
            ServerFrame::Event(frame) => self.deliver(frame).await,
            ServerFrame::Control(control) => self.on_control(control).await,
        }
    }

    async fn on_control(&mut self, control: ControlMessage) {
        match control {
            ControlMessage::Authenticated {
                user_id,
                connection_id,
            } => {
                tracing::info!("Authenticated as '{}' ({})", user_id, connection_id);
                self.user_id = Some(user_id);
                self.input(Input::Authenticated).await;
            }
            ControlMessage::AuthError { kind } => {
                tracing::warn!("Authentication failed: {:?}", kind);
                self.input(Input::AuthFailed(kind)).await;
            }
            ControlMessage::RateLimited { retry_after_ms } => {
                tracing::warn!("Rate limited, retry after {} ms", retry_after_ms);
                self.input(Input::RateLimited { retry_after_ms }).await;
            }
            ControlMessage::Joined { channel_name } => {
                self.notify(Notice::Joined(channel_name));
            }
            ControlMessage::JoinError {
                channel_name,
                reason,
            } => {
                // 拒否されたチャンネルには再接続後も参加し直さない
                if reason != JoinRejection::NotAuthenticated {
                    self.controller.forget_channel(&channel_name);
                }
                self.notify(Notice::JoinRejected {
                    channel_name,
                    reason,
                });
            }
            ControlMessage::Left { channel_name } => {
                self.notify(Notice::Left(channel_name));
            }
            ControlMessage::Pong { timestamp } => {
                tracing::trace!("pong {}", timestamp);
            }
            ControlMessage::CatchUp { events } => {
                tracing::info!("Catch-up returned {} event(s)", events.len());
                for frame in events {
                    self.deliver(frame).await;
                }
                self.controller.catch_up_completed();
            }
        }
    }

    /// イベントをアプリケーションへ渡す（同じイベントは 1 回だけ）
    async fn deliver(&mut self, frame: EventFrame) {
        let event = match Event::try_from(frame) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("Invalid event frame: {}", e);
                return;
            }
        };
        let event_id = event.id.to_string();
        let sequence = event.sequence.value();

        self.controller.observe_event(sequence, event_id.clone());

        if self.inbox.accept(&event_id) {
            self.subscriptions.dispatch(&event);
            self.notify(Notice::Event(event));
        } else {
            tracing::debug!("Skipping duplicate event '{}'", event_id);
        }

        if self.config.auto_ack {
            self.send(&ClientMessage::Ack { event_id }).await;
        }
    }

    fn notify(&self, notice: Notice) {
        let _ = self.notices.send(notice);
    }

    fn publish_status(&self, status: ConnectionStatus) {
        let changed = self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status.clone();
                true
            }
        });
        if changed {
            self.notify(Notice::Status(status));
        }
    }

    fn sync_status(&self) {
        let status = match self.controller.state() {
            ReconnectState::Idle => ConnectionStatus::Idle,
            ReconnectState::Connecting | ReconnectState::Authenticating => {
                ConnectionStatus::Connecting
            }
            ReconnectState::Connected => ConnectionStatus::Connected {
                user_id: self.user_id.clone().unwrap_or_default(),
            },
            ReconnectState::Backoff { retry_at } => ConnectionStatus::Reconnecting {
                retry_at,
                attempts: self.controller.attempts(),
            },
            ReconnectState::Cooldown { retry_at } => ConnectionStatus::CoolingDown { retry_at },
            ReconnectState::RefreshingCredential => ConnectionStatus::RefreshingCredential,
            ReconnectState::Halted { kind } => ConnectionStatus::Halted(kind),
        };
        self.publish_status(status);
    }
}

async fn sleep_until(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn next_message(
    socket: &mut Option<Socket>,
) -> Option<Result<Message, tokio_tungstenite::tungstenite::Error>> {
    match socket {
        Some(socket) => socket.next().await,
        None => std::future::pending().await,
    }
}
