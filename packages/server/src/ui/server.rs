//! サーバーの起動と停止

use std::{future::Future, sync::Arc, time::Duration};

use axum::{
    Router,
    routing::{get, post, put},
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use super::{
    handler::{
        debug_connections, get_unread, health_check, publish_event, update_participants,
        websocket_handler,
    },
    signal::shutdown_signal,
    state::AppState,
};

/// リアルタイムイベント配信サーバー
///
/// # Example
///
/// ```ignore
/// let state = AppState::in_memory(&config, validator, clock);
/// let server = Server::new(state, config.sweep_interval);
/// server.run(config.host.clone(), config.port).await?;
/// ```
pub struct Server {
    state: Arc<AppState>,
    /// 保持期間切れの掃除間隔
    sweep_interval: Duration,
}

impl Server {
    pub fn new(state: Arc<AppState>, sweep_interval: Duration) -> Self {
        Self {
            state,
            sweep_interval,
        }
    }

    /// 全エンドポイントのルーターを組み立てる
    pub fn router(&self) -> Router {
        Router::new()
            // WebSocket エンドポイント
            .route("/ws", get(websocket_handler))
            // HTTP エンドポイント
            .route("/api/health", get(health_check))
            .route("/api/users/{user_id}/unread", get(get_unread))
            .route("/debug/connections", get(debug_connections))
            // プロデューサー向けエンドポイント
            .route("/internal/channels/{channel}/events", post(publish_event))
            .route(
                "/internal/conversations/{conversation_id}/participants",
                put(update_participants),
            )
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Ctrl+C または SIGTERM を受け取るまでサーバーを動かす
    ///
    /// # Arguments
    ///
    /// * `host` - バインドするホスト（例: "127.0.0.1"）
    /// * `port` - バインドするポート（例: 8080）
    ///
    /// # Errors
    ///
    /// アドレスへのバインドやサーバーの実行に失敗した場合
    pub async fn run(self, host: String, port: u16) -> Result<(), Box<dyn std::error::Error>> {
        let bind_addr = format!("{}:{}", host, port);
        let listener = TcpListener::bind(&bind_addr).await?;

        tracing::info!("Event delivery server listening on {}", listener.local_addr()?);
        tracing::info!("Connect to: ws://{}/ws", bind_addr);
        tracing::info!("Press Ctrl+C to shutdown gracefully");

        self.serve(listener, shutdown_signal()).await?;

        tracing::info!("Server shutdown complete");
        Ok(())
    }

    /// バインド済みの listener で `shutdown` が完了するまで動かす
    ///
    /// 保持期間切れの掃除タスクもこの間だけ動きます。
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.router();
        let sweeper = spawn_retention_sweeper(self.state.clone(), self.sweep_interval);

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await;

        sweeper.abort();
        result
    }
}

fn spawn_retention_sweeper(
    state: Arc<AppState>,
    sweep_interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        // 初回の tick は即座に完了する
        ticker.tick().await;
        loop {
            ticker.tick().await;
            state.tracker.purge_expired().await;
        }
    })
}
