//! UseCase: 接続レジストリ
//!
//! ## テスト実装の作業記録
//!
//! ### 何をテストしているか
//! - ConnectionRegistry::register / authenticate / deregister
//! - 認証ハンドシェイクの状態遷移（connecting → authenticating → open / closed）
//!
//! ### なぜこのテストが必要か
//! - 認証に失敗した接続がユーザー索引に載らないことを保証
//! - 検証中に切断された接続が後から索引に載らないことを保証
//! - 失敗理由が expired / malformed / invalid の 3 種類にしか分かれないことを確認
//!
//! ### どのような状況を想定しているか
//! - 正常系：有効なクレデンシャルでの認証、複数タブでの同時接続
//! - 異常系：形式不正・期限切れ・不正なクレデンシャル、レート制限超過
//! - エッジケース：検証中の切断、二重の deregister

use std::sync::Arc;

use hibiki_shared::time::Clock;

use crate::domain::{
    AuthErrorKind, Connection, ConnectionId, ConnectionRepository, ConnectRateLimiter, Credential,
    CredentialValidator, MessagePusher, PusherChannel, RepositoryError, Timestamp, UserId,
};

use super::error::{AuthenticateError, RegisterError};

/// 接続レジストリ
///
/// ユーザー → 接続（0 個以上）の対応と、接続ごとの状態を管理します。
pub struct ConnectionRegistry {
    repository: Arc<dyn ConnectionRepository>,
    message_pusher: Arc<dyn MessagePusher>,
    validator: Arc<dyn CredentialValidator>,
    rate_limiter: Arc<dyn ConnectRateLimiter>,
    clock: Arc<dyn Clock>,
}

impl ConnectionRegistry {
    pub fn new(
        repository: Arc<dyn ConnectionRepository>,
        message_pusher: Arc<dyn MessagePusher>,
        validator: Arc<dyn CredentialValidator>,
        rate_limiter: Arc<dyn ConnectRateLimiter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repository,
            message_pusher,
            validator,
            rate_limiter,
            clock,
        }
    }

    fn now(&self) -> Timestamp {
        Timestamp::new(self.clock.now_millis())
    }

    /// 新しい接続を `Connecting` 状態で登録
    ///
    /// # Arguments
    ///
    /// * `connection_id` - サーバーが採番した接続 ID
    /// * `sender` - 接続への送信キュー（MessagePusher に登録される）
    pub async fn register(
        &self,
        connection_id: ConnectionId,
        sender: PusherChannel,
    ) -> Result<Connection, RegisterError> {
        let connection = Connection::new(connection_id, self.now());
        self.repository
            .insert(connection.clone())
            .await
            .map_err(|_| RegisterError::DuplicateConnection(connection_id.to_string()))?;
        self.message_pusher
            .register_client(connection_id, sender)
            .await;

        tracing::info!("Connection '{}' registered (connecting)", connection_id);
        Ok(connection)
    }

    /// 接続を認証する
    ///
    /// 検証は外部の `CredentialValidator` に委譲し、その間はレジストリの状態を保持しません。
    /// 検証中に接続が破棄された場合は `Cancelled` を返し、ユーザー索引には何も載りません。
    ///
    /// # Returns
    ///
    /// * `Ok(UserId)` - 認証成功（接続は `Open`）
    /// * `Err(AuthenticateError)` - 認証失敗（`Auth` / `RateLimited` の場合、接続は `Closed`）
    pub async fn authenticate(
        &self,
        connection_id: &ConnectionId,
        raw_credential: &str,
    ) -> Result<UserId, AuthenticateError> {
        // 1. 形式チェック
        let credential = match Credential::parse(raw_credential) {
            Ok(credential) => credential,
            Err(kind) => {
                self.reject(connection_id, kind).await;
                return Err(AuthenticateError::Auth(kind));
            }
        };

        // 2. authenticating へ遷移
        self.repository
            .begin_authentication(connection_id)
            .await
            .map_err(|e| match e {
                RepositoryError::ConnectionNotFound(id) => AuthenticateError::ConnectionNotFound(id),
                _ => AuthenticateError::InvalidState(connection_id.to_string()),
            })?;
        tracing::debug!("Connection '{}' authenticating", connection_id);

        // 3. 外部検証（ロックは保持しない）
        let verified = self.validator.verify(&credential).await;

        // 4. 検証中に切断されていないか
        if self.repository.get(connection_id).await.is_none() {
            tracing::info!(
                "Connection '{}' went away during authentication",
                connection_id
            );
            return Err(AuthenticateError::Cancelled(connection_id.to_string()));
        }

        let user_id = match verified {
            Ok(user_id) => user_id,
            Err(kind) => {
                self.reject(connection_id, kind).await;
                return Err(AuthenticateError::Auth(kind));
            }
        };

        // 5. 接続レート制限
        if let Err(limited) = self.rate_limiter.check(&user_id).await {
            self.close(connection_id, "rate_limited").await;
            return Err(AuthenticateError::RateLimited {
                retry_after_ms: limited.retry_after_ms,
            });
        }

        // 6. open へ遷移し、ユーザー索引に追加
        self.repository
            .bind_user(connection_id, user_id.clone(), self.now())
            .await
            .map_err(|_| AuthenticateError::Cancelled(connection_id.to_string()))?;

        tracing::info!(
            "Connection '{}' authenticated as user '{}'",
            connection_id,
            user_id
        );
        Ok(user_id)
    }

    async fn reject(&self, connection_id: &ConnectionId, kind: AuthErrorKind) {
        tracing::warn!(
            "Connection '{}' failed authentication: {}",
            connection_id,
            kind
        );
        self.close(connection_id, "auth_failed").await;
    }

    async fn close(&self, connection_id: &ConnectionId, reason: &str) {
        match self.repository.close(connection_id).await {
            Ok(()) => tracing::info!("Connection '{}' closed ({})", connection_id, reason),
            Err(e) => tracing::debug!("Close of '{}' skipped: {}", connection_id, e),
        }
    }

    /// ユーザーの生きている接続一覧（無ければ空）
    pub async fn connections_for(&self, user_id: &UserId) -> Vec<Connection> {
        self.repository.connections_for(user_id).await
    }

    /// 接続を取得
    pub async fn get(&self, connection_id: &ConnectionId) -> Option<Connection> {
        self.repository.get(connection_id).await
    }

    /// 全ての接続（デバッグ用）
    pub async fn list(&self) -> Vec<Connection> {
        self.repository.all().await
    }

    /// 最終アクティビティ時刻を更新
    pub async fn touch(&self, connection_id: &ConnectionId) {
        if let Err(e) = self.repository.touch(connection_id, self.now()).await {
            tracing::debug!("Touch of '{}' skipped: {}", connection_id, e);
        }
    }

    /// 接続を全ての索引・チャンネルから取り除く（冪等）
    pub async fn deregister(&self, connection_id: &ConnectionId) -> Option<Connection> {
        let removed = self.repository.remove(connection_id).await;
        self.message_pusher.unregister_client(connection_id).await;

        if let Some(connection) = &removed {
            tracing::info!(
                "Connection '{}' deregistered (user: {}, channels: {})",
                connection_id,
                connection
                    .user_id
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "-".to_string()),
                connection.channels.len()
            );
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::{
            ConnectionState, RateLimitExceeded, collaborator::MockConnectRateLimiter,
            collaborator::MockCredentialValidator,
        },
        infrastructure::{
            message_pusher::WebSocketMessagePusher, rate_limiter::InMemoryConnectRateLimiter,
            repository::InMemoryConnectionRepository,
        },
    };
    use hibiki_shared::time::ManualClock;
    use std::time::Duration;
    use tokio::sync::{Notify, mpsc};

    const VALID_TOKEN: &str = "header.payload.signature";

    fn alice() -> UserId {
        UserId::new("alice".to_string()).unwrap()
    }

    fn validator_returning(result: Result<UserId, AuthErrorKind>) -> MockCredentialValidator {
        let mut validator = MockCredentialValidator::new();
        validator
            .expect_verify()
            .returning(move |_| result.clone());
        validator
    }

    fn create_registry_with(
        validator: Arc<dyn CredentialValidator>,
        rate_limiter: Arc<dyn ConnectRateLimiter>,
    ) -> (ConnectionRegistry, Arc<InMemoryConnectionRepository>) {
        let repository = Arc::new(InMemoryConnectionRepository::new());
        let registry = ConnectionRegistry::new(
            repository.clone(),
            Arc::new(WebSocketMessagePusher::new()),
            validator,
            rate_limiter,
            Arc::new(ManualClock::new(1_000)),
        );
        (registry, repository)
    }

    fn create_registry(
        result: Result<UserId, AuthErrorKind>,
    ) -> (ConnectionRegistry, Arc<InMemoryConnectionRepository>) {
        create_registry_with(
            Arc::new(validator_returning(result)),
            Arc::new(InMemoryConnectRateLimiter::new(
                100,
                Duration::from_secs(60),
                Arc::new(ManualClock::new(0)),
            )),
        )
    }

    async fn register(registry: &ConnectionRegistry) -> ConnectionId {
        let connection_id = ConnectionId::generate();
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.register(connection_id, tx).await.unwrap();
        connection_id
    }

    #[tokio::test]
    async fn test_register_starts_in_connecting_state() {
        // テスト項目: 登録直後の接続は Connecting 状態でユーザーを持たない
        // given (前提条件):
        let (registry, _) = create_registry(Ok(alice()));

        // when (操作):
        let connection_id = register(&registry).await;

        // then (期待する結果):
        let connection = registry.get(&connection_id).await.unwrap();
        assert_eq!(connection.state, ConnectionState::Connecting);
        assert_eq!(connection.user_id, None);
        assert_eq!(connection.connected_at, Timestamp::new(1_000));
    }

    #[tokio::test]
    async fn test_register_duplicate_id_is_rejected() {
        // テスト項目: 同じ接続 ID の二重登録はエラーになる
        // given (前提条件):
        let (registry, _) = create_registry(Ok(alice()));
        let connection_id = register(&registry).await;
        let (tx, _rx) = mpsc::unbounded_channel();

        // when (操作):
        let result = registry.register(connection_id, tx).await;

        // then (期待する結果):
        assert_eq!(
            result,
            Err(RegisterError::DuplicateConnection(connection_id.to_string()))
        );
    }

    #[tokio::test]
    async fn test_authenticate_success_opens_and_indexes() {
        // テスト項目: 認証に成功すると Open になりユーザー索引から引ける
        // given (前提条件):
        let (registry, _) = create_registry(Ok(alice()));
        let connection_id = register(&registry).await;

        // when (操作):
        let result = registry.authenticate(&connection_id, VALID_TOKEN).await;

        // then (期待する結果):
        assert_eq!(result, Ok(alice()));
        let connections = registry.connections_for(&alice()).await;
        assert_eq!(connections.len(), 1);
        assert_eq!(connections[0].id, connection_id);
        assert_eq!(connections[0].state, ConnectionState::Open);
    }

    #[tokio::test]
    async fn test_authenticate_malformed_credential_never_calls_validator() {
        // テスト項目: 形式不正のクレデンシャルは検証器を呼ばずに Malformed で閉じられる
        // given (前提条件):
        let mut validator = MockCredentialValidator::new();
        validator.expect_verify().never();
        let (registry, _) = create_registry_with(
            Arc::new(validator),
            Arc::new(MockConnectRateLimiter::new()),
        );
        let connection_id = register(&registry).await;

        // when (操作):
        let result = registry.authenticate(&connection_id, "not-a-token").await;

        // then (期待する結果):
        assert_eq!(result, Err(AuthenticateError::Auth(AuthErrorKind::Malformed)));
        let connection = registry.get(&connection_id).await.unwrap();
        assert_eq!(connection.state, ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_authenticate_expired_and_invalid_close_connection() {
        // テスト項目: Expired / Invalid の場合は接続が閉じられ、ユーザー索引に載らない
        for kind in [AuthErrorKind::Expired, AuthErrorKind::Invalid] {
            // given (前提条件):
            let (registry, _) = create_registry(Err(kind));
            let connection_id = register(&registry).await;

            // when (操作):
            let result = registry.authenticate(&connection_id, VALID_TOKEN).await;

            // then (期待する結果):
            assert_eq!(result, Err(AuthenticateError::Auth(kind)));
            let connection = registry.get(&connection_id).await.unwrap();
            assert_eq!(connection.state, ConnectionState::Closed);
            assert!(registry.connections_for(&alice()).await.is_empty());
        }
    }

    #[tokio::test]
    async fn test_authenticate_rate_limited() {
        // テスト項目: レート制限を超えた場合は RateLimited で閉じられる
        // given (前提条件):
        let mut rate_limiter = MockConnectRateLimiter::new();
        rate_limiter.expect_check().returning(|_| {
            Err(RateLimitExceeded {
                retry_after_ms: 5_000,
            })
        });
        let (registry, _) = create_registry_with(
            Arc::new(validator_returning(Ok(alice()))),
            Arc::new(rate_limiter),
        );
        let connection_id = register(&registry).await;

        // when (操作):
        let result = registry.authenticate(&connection_id, VALID_TOKEN).await;

        // then (期待する結果):
        assert_eq!(
            result,
            Err(AuthenticateError::RateLimited {
                retry_after_ms: 5_000
            })
        );
        assert!(registry.connections_for(&alice()).await.is_empty());
    }

    #[tokio::test]
    async fn test_authenticate_twice_is_invalid_state() {
        // テスト項目: 認証済みの接続を再度認証しようとすると InvalidState になる
        // given (前提条件):
        let (registry, _) = create_registry(Ok(alice()));
        let connection_id = register(&registry).await;
        registry
            .authenticate(&connection_id, VALID_TOKEN)
            .await
            .unwrap();

        // when (操作):
        let result = registry.authenticate(&connection_id, VALID_TOKEN).await;

        // then (期待する結果):
        assert_eq!(
            result,
            Err(AuthenticateError::InvalidState(connection_id.to_string()))
        );
    }

    /// 検証の途中で止まり、合図があるまで結果を返さない検証器
    struct BlockingValidator {
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait::async_trait]
    impl CredentialValidator for BlockingValidator {
        async fn verify(&self, _credential: &Credential) -> Result<UserId, AuthErrorKind> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(alice())
        }
    }

    #[tokio::test]
    async fn test_deregister_during_validation_cancels_authentication() {
        // テスト項目: 検証中に deregister された接続は Cancelled になり索引に載らない
        // given (前提条件):
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let (registry, _) = create_registry_with(
            Arc::new(BlockingValidator {
                entered: entered.clone(),
                release: release.clone(),
            }),
            Arc::new(MockConnectRateLimiter::new()),
        );
        let registry = Arc::new(registry);
        let connection_id = register(&registry).await;

        // when (操作):
        let task = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.authenticate(&connection_id, VALID_TOKEN).await })
        };
        entered.notified().await;
        registry.deregister(&connection_id).await;
        release.notify_one();
        let result = task.await.unwrap();

        // then (期待する結果):
        assert_eq!(
            result,
            Err(AuthenticateError::Cancelled(connection_id.to_string()))
        );
        assert!(registry.connections_for(&alice()).await.is_empty());
        assert!(registry.get(&connection_id).await.is_none());
    }

    #[tokio::test]
    async fn test_multiple_connections_per_user() {
        // テスト項目: 同じユーザーの複数接続（複数タブ）がそれぞれ索引される
        // given (前提条件):
        let (registry, _) = create_registry(Ok(alice()));
        let first = register(&registry).await;
        let second = register(&registry).await;

        // when (操作):
        registry.authenticate(&first, VALID_TOKEN).await.unwrap();
        registry.authenticate(&second, VALID_TOKEN).await.unwrap();

        // then (期待する結果):
        assert_eq!(registry.connections_for(&alice()).await.len(), 2);
    }

    #[tokio::test]
    async fn test_deregister_is_idempotent() {
        // テスト項目: deregister は冪等で、2 回目は None を返す
        // given (前提条件):
        let (registry, _) = create_registry(Ok(alice()));
        let connection_id = register(&registry).await;
        registry
            .authenticate(&connection_id, VALID_TOKEN)
            .await
            .unwrap();

        // when (操作):
        let first = registry.deregister(&connection_id).await;
        let second = registry.deregister(&connection_id).await;

        // then (期待する結果):
        assert!(first.is_some());
        assert!(second.is_none());
        assert!(registry.connections_for(&alice()).await.is_empty());
    }

    #[tokio::test]
    async fn test_connections_for_unknown_user_is_empty() {
        // テスト項目: 接続のないユーザーの接続一覧は空
        // given (前提条件):
        let (registry, _) = create_registry(Ok(alice()));

        // when (操作):
        let connections = registry
            .connections_for(&UserId::new("nobody".to_string()).unwrap())
            .await;

        // then (期待する結果):
        assert!(connections.is_empty());
    }
}
