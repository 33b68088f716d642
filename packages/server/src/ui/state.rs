//! アプリケーション状態と依存関係の組み立て

use std::{sync::Arc, time::Duration};

use hibiki_shared::time::Clock;

use crate::{
    config::ServerConfig,
    domain::{CredentialValidator, MessagePusher},
    infrastructure::{
        authorizer::InMemoryChannelAuthorizer,
        message_pusher::WebSocketMessagePusher,
        rate_limiter::InMemoryConnectRateLimiter,
        repository::{InMemoryConnectionRepository, InMemoryDeliveryRepository},
    },
    usecase::{ChannelRouter, ConnectionRegistry, DeliveryTracker, EventDispatcher},
};

/// ハンドラー間で共有するアプリケーション状態
pub struct AppState {
    /// ConnectionRegistry（接続の登録・認証・破棄）
    pub registry: Arc<ConnectionRegistry>,
    /// ChannelRouter（チャンネル参加・退出）
    pub router: Arc<ChannelRouter>,
    /// EventDispatcher（イベント発行・再送）
    pub dispatcher: Arc<EventDispatcher>,
    /// DeliveryTracker（配信・既読の記録）
    pub tracker: Arc<DeliveryTracker>,
    /// 会話参加者（データ層の代替）
    pub authorizer: Arc<InMemoryChannelAuthorizer>,
    /// MessagePusher（接続への返信）
    pub message_pusher: Arc<dyn MessagePusher>,
    pub clock: Arc<dyn Clock>,
    pub auth_timeout: Duration,
}

impl AppState {
    /// インメモリ実装で全ての依存関係を組み立てる
    ///
    /// 組み立て順:
    /// 1. Repository
    /// 2. MessagePusher
    /// 3. 外部協調者（認可・レート制限）
    /// 4. UseCase
    pub fn in_memory(
        config: &ServerConfig,
        validator: Arc<dyn CredentialValidator>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        // 1. Repository
        let connections = Arc::new(InMemoryConnectionRepository::new());
        let deliveries = Arc::new(InMemoryDeliveryRepository::new());

        // 2. MessagePusher
        let message_pusher: Arc<dyn MessagePusher> = Arc::new(WebSocketMessagePusher::new());

        // 3. 外部協調者
        let authorizer = Arc::new(InMemoryChannelAuthorizer::new());
        let rate_limiter = Arc::new(InMemoryConnectRateLimiter::new(
            config.connect_rate_limit,
            config.connect_rate_window,
            clock.clone(),
        ));

        // 4. UseCase
        let registry = Arc::new(ConnectionRegistry::new(
            connections.clone(),
            message_pusher.clone(),
            validator,
            rate_limiter,
            clock.clone(),
        ));
        let router = Arc::new(ChannelRouter::new(connections, authorizer.clone()));
        let tracker = Arc::new(DeliveryTracker::new(
            deliveries,
            authorizer.clone(),
            clock.clone(),
            config.retention,
        ));
        let dispatcher = Arc::new(EventDispatcher::new(
            registry.clone(),
            router.clone(),
            tracker.clone(),
            message_pusher.clone(),
            authorizer.clone(),
        ));

        Arc::new(Self {
            registry,
            router,
            dispatcher,
            tracker,
            authorizer,
            message_pusher,
            clock,
            auth_timeout: config.auth_timeout,
        })
    }
}
