//! UseCase: チャンネルルーター
//!
//! 接続を論理チャンネル（`user:<id>` / `conversation:<id>`）に参加・退出させます。
//! 認可は呼び出しのたびに評価し、結果をキャッシュしません。

use std::sync::Arc;

use crate::domain::{
    ChannelAuthorizer, ChannelName, Connection, ConnectionId, ConnectionRepository,
    RepositoryError, authorize_channel,
};

use super::error::JoinError;

pub struct ChannelRouter {
    repository: Arc<dyn ConnectionRepository>,
    authorizer: Arc<dyn ChannelAuthorizer>,
}

impl ChannelRouter {
    pub fn new(
        repository: Arc<dyn ConnectionRepository>,
        authorizer: Arc<dyn ChannelAuthorizer>,
    ) -> Self {
        Self {
            repository,
            authorizer,
        }
    }

    /// 接続をチャンネルに参加させる
    ///
    /// 認証済みで `Open` の接続だけが参加できます。`Forbidden` の場合は状態を一切変更しません。
    /// 既に参加済みのチャンネルへの参加は成功扱いです。
    pub async fn join(
        &self,
        connection_id: &ConnectionId,
        channel_name: &str,
    ) -> Result<ChannelName, JoinError> {
        let channel = ChannelName::parse(channel_name)
            .map_err(|_| JoinError::InvalidChannel(channel_name.to_string()))?;

        let connection = self
            .repository
            .get(connection_id)
            .await
            .ok_or_else(|| JoinError::ConnectionNotFound(connection_id.to_string()))?;
        let user_id = connection
            .authenticated_user()
            .ok_or_else(|| JoinError::NotAuthenticated(connection_id.to_string()))?;

        if !authorize_channel(self.authorizer.as_ref(), user_id, &channel).await {
            tracing::warn!(
                "User '{}' is not allowed to join '{}' (connection '{}')",
                user_id,
                channel,
                connection_id
            );
            return Err(JoinError::Forbidden(channel.to_string()));
        }

        let added = self
            .repository
            .add_membership(connection_id, channel.clone())
            .await
            .map_err(|e| match e {
                RepositoryError::ConnectionNotFound(id) => JoinError::ConnectionNotFound(id),
                _ => JoinError::NotAuthenticated(connection_id.to_string()),
            })?;

        if added {
            tracing::info!("Connection '{}' joined '{}'", connection_id, channel);
        }
        Ok(channel)
    }

    /// 接続をチャンネルから退出させる（メンバーでなければ何もしない）
    ///
    /// # Returns
    ///
    /// 実際に退出した場合はそのチャンネル
    pub async fn leave(
        &self,
        connection_id: &ConnectionId,
        channel_name: &str,
    ) -> Option<ChannelName> {
        let channel = ChannelName::parse(channel_name).ok()?;
        if self
            .repository
            .remove_membership(connection_id, &channel)
            .await
        {
            tracing::info!("Connection '{}' left '{}'", connection_id, channel);
            Some(channel)
        } else {
            None
        }
    }

    /// チャンネルのメンバー接続一覧
    pub async fn members_of(&self, channel: &ChannelName) -> Vec<Connection> {
        self.repository.members_of(channel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::{ConversationId, Timestamp, UserId},
        infrastructure::{
            authorizer::InMemoryChannelAuthorizer, repository::InMemoryConnectionRepository,
        },
    };

    fn user(id: &str) -> UserId {
        UserId::new(id.to_string()).unwrap()
    }

    fn channel(name: &str) -> ChannelName {
        ChannelName::parse(name).unwrap()
    }

    struct Fixture {
        router: ChannelRouter,
        repository: Arc<InMemoryConnectionRepository>,
        authorizer: Arc<InMemoryChannelAuthorizer>,
    }

    fn create_router() -> Fixture {
        let repository = Arc::new(InMemoryConnectionRepository::new());
        let authorizer = Arc::new(InMemoryChannelAuthorizer::new());
        Fixture {
            router: ChannelRouter::new(repository.clone(), authorizer.clone()),
            repository,
            authorizer,
        }
    }

    async fn open_connection(repository: &InMemoryConnectionRepository, user_id: &str) -> ConnectionId {
        let id = ConnectionId::generate();
        repository
            .insert(Connection::new(id, Timestamp::new(0)))
            .await
            .unwrap();
        repository.begin_authentication(&id).await.unwrap();
        repository
            .bind_user(&id, user(user_id), Timestamp::new(0))
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn test_join_own_user_channel() {
        // テスト項目: 自分の user チャンネルには参加できる
        // given (前提条件):
        let fixture = create_router();
        let id = open_connection(&fixture.repository, "alice").await;

        // when (操作):
        let result = fixture.router.join(&id, "user:alice").await;

        // then (期待する結果):
        assert_eq!(result, Ok(channel("user:alice")));
        let members = fixture.router.members_of(&channel("user:alice")).await;
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].id, id);
    }

    #[tokio::test]
    async fn test_join_other_user_channel_is_forbidden_and_does_not_mutate() {
        // テスト項目: 他人の user チャンネルへの参加は Forbidden で、メンバーシップは変化しない
        // given (前提条件):
        let fixture = create_router();
        let id = open_connection(&fixture.repository, "alice").await;

        // when (操作):
        let result = fixture.router.join(&id, "user:bob").await;

        // then (期待する結果):
        assert_eq!(result, Err(JoinError::Forbidden("user:bob".to_string())));
        assert!(fixture.router.members_of(&channel("user:bob")).await.is_empty());
        let connection = fixture.repository.get(&id).await.unwrap();
        assert!(connection.channels.is_empty());
    }

    #[tokio::test]
    async fn test_join_conversation_requires_participation() {
        // テスト項目: 会話チャンネルは参加者のみ参加できる
        // given (前提条件):
        let fixture = create_router();
        fixture
            .authorizer
            .set_participants(
                ConversationId::new("c1".to_string()).unwrap(),
                [user("alice")],
            )
            .await;
        let alice = open_connection(&fixture.repository, "alice").await;
        let mallory = open_connection(&fixture.repository, "mallory").await;

        // when (操作):
        let allowed = fixture.router.join(&alice, "conversation:c1").await;
        let denied = fixture.router.join(&mallory, "conversation:c1").await;

        // then (期待する結果):
        assert!(allowed.is_ok());
        assert_eq!(
            denied,
            Err(JoinError::Forbidden("conversation:c1".to_string()))
        );
        assert_eq!(
            fixture
                .router
                .members_of(&channel("conversation:c1"))
                .await
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_join_reevaluates_authorization_every_time() {
        // テスト項目: 参加者から外れた後の参加要求は拒否される（認可をキャッシュしない）
        // given (前提条件):
        let fixture = create_router();
        let conversation = ConversationId::new("c1".to_string()).unwrap();
        fixture
            .authorizer
            .set_participants(conversation.clone(), [user("alice")])
            .await;
        let id = open_connection(&fixture.repository, "alice").await;
        fixture.router.join(&id, "conversation:c1").await.unwrap();
        fixture.router.leave(&id, "conversation:c1").await;

        // when (操作):
        fixture
            .authorizer
            .set_participants(conversation, Vec::<UserId>::new())
            .await;
        let result = fixture.router.join(&id, "conversation:c1").await;

        // then (期待する結果):
        assert_eq!(
            result,
            Err(JoinError::Forbidden("conversation:c1".to_string()))
        );
    }

    #[tokio::test]
    async fn test_join_invalid_channel_name() {
        // テスト項目: 形式不正のチャンネル名は InvalidChannel
        // given (前提条件):
        let fixture = create_router();
        let id = open_connection(&fixture.repository, "alice").await;

        // when (操作):
        let result = fixture.router.join(&id, "room:1").await;

        // then (期待する結果):
        assert_eq!(result, Err(JoinError::InvalidChannel("room:1".to_string())));
    }

    #[tokio::test]
    async fn test_join_before_authentication() {
        // テスト項目: 認証前の接続は参加できない
        // given (前提条件):
        let fixture = create_router();
        let id = ConnectionId::generate();
        fixture
            .repository
            .insert(Connection::new(id, Timestamp::new(0)))
            .await
            .unwrap();

        // when (操作):
        let result = fixture.router.join(&id, "user:alice").await;

        // then (期待する結果):
        assert_eq!(result, Err(JoinError::NotAuthenticated(id.to_string())));
    }

    #[tokio::test]
    async fn test_join_twice_is_idempotent() {
        // テスト項目: 同じチャンネルへの二重参加はメンバーを増やさない
        // given (前提条件):
        let fixture = create_router();
        let id = open_connection(&fixture.repository, "alice").await;
        fixture.router.join(&id, "user:alice").await.unwrap();

        // when (操作):
        let result = fixture.router.join(&id, "user:alice").await;

        // then (期待する結果):
        assert!(result.is_ok());
        assert_eq!(fixture.router.members_of(&channel("user:alice")).await.len(), 1);
    }

    #[tokio::test]
    async fn test_leave_non_member_is_noop() {
        // テスト項目: メンバーでないチャンネルからの退出は何もしない
        // given (前提条件):
        let fixture = create_router();
        let id = open_connection(&fixture.repository, "alice").await;

        // when (操作):
        let left = fixture.router.leave(&id, "user:alice").await;
        let invalid = fixture.router.leave(&id, "bogus").await;

        // then (期待する結果):
        assert_eq!(left, None);
        assert_eq!(invalid, None);
    }
}
