//! インメモリのチャンネル認可
//!
//! 会話の参加者はデータ層が管理するものですが、このサブシステム単体で動かすため
//! 参加者一覧を保持する実装を用意しています。参加者は HTTP API から登録されます。

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::{ChannelAuthorizer, ConversationId, UserId};

#[derive(Default)]
pub struct InMemoryChannelAuthorizer {
    conversations: RwLock<HashMap<ConversationId, HashSet<UserId>>>,
}

impl InMemoryChannelAuthorizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 会話の参加者一覧を置き換える
    pub async fn set_participants(
        &self,
        conversation_id: ConversationId,
        participants: impl IntoIterator<Item = UserId>,
    ) {
        let participants: HashSet<UserId> = participants.into_iter().collect();
        tracing::info!(
            "Conversation '{}' now has {} participant(s)",
            conversation_id,
            participants.len()
        );
        let mut conversations = self.conversations.write().await;
        if participants.is_empty() {
            conversations.remove(&conversation_id);
        } else {
            conversations.insert(conversation_id, participants);
        }
    }
}

#[async_trait]
impl ChannelAuthorizer for InMemoryChannelAuthorizer {
    async fn is_participant(&self, user_id: &UserId, conversation_id: &ConversationId) -> bool {
        self.conversations
            .read()
            .await
            .get(conversation_id)
            .is_some_and(|users| users.contains(user_id))
    }

    async fn participants(&self, conversation_id: &ConversationId) -> Vec<UserId> {
        let conversations = self.conversations.read().await;
        let mut participants: Vec<UserId> = conversations
            .get(conversation_id)
            .map(|users| users.iter().cloned().collect())
            .unwrap_or_default();
        participants.sort();
        participants
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChannelName, authorize_channel};

    fn user(id: &str) -> UserId {
        UserId::new(id.to_string()).unwrap()
    }

    fn conversation(id: &str) -> ConversationId {
        ConversationId::new(id.to_string()).unwrap()
    }

    #[tokio::test]
    async fn test_set_participants_replaces_list() {
        // テスト項目: 参加者一覧は置き換えられ、外れたユーザーは参加者でなくなる
        // given (前提条件):
        let authorizer = InMemoryChannelAuthorizer::new();
        authorizer
            .set_participants(conversation("c1"), [user("alice"), user("bob")])
            .await;

        // when (操作):
        authorizer
            .set_participants(conversation("c1"), [user("alice")])
            .await;

        // then (期待する結果):
        assert!(authorizer.is_participant(&user("alice"), &conversation("c1")).await);
        assert!(!authorizer.is_participant(&user("bob"), &conversation("c1")).await);
        assert_eq!(authorizer.participants(&conversation("c1")).await, vec![user("alice")]);
    }

    #[tokio::test]
    async fn test_authorize_channel_rules() {
        // テスト項目: user チャンネルは本人のみ、conversation チャンネルは参加者のみ許可される
        // given (前提条件):
        let authorizer = InMemoryChannelAuthorizer::new();
        authorizer
            .set_participants(conversation("c1"), [user("alice")])
            .await;
        let own = ChannelName::parse("user:alice").unwrap();
        let other = ChannelName::parse("user:bob").unwrap();
        let joined = ChannelName::parse("conversation:c1").unwrap();
        let foreign = ChannelName::parse("conversation:c2").unwrap();

        // when (操作) / then (期待する結果):
        assert!(authorize_channel(&authorizer, &user("alice"), &own).await);
        assert!(!authorize_channel(&authorizer, &user("alice"), &other).await);
        assert!(authorize_channel(&authorizer, &user("alice"), &joined).await);
        assert!(!authorize_channel(&authorizer, &user("alice"), &foreign).await);
    }
}
