//! UseCase: イベントディスパッチャー
//!
//! チャンネルに発行されたイベントを、そのチャンネルの全メンバー接続へ配信します。
//!
//! - ディスパッチャー全体の発行ロックで「シーケンス採番 → 各接続の送信キューへの投入」を直列化する。
//!   シーケンスはプロセス全体で単調増加なので、チャンネルをまたいでも各接続の送信キューは
//!   シーケンス順に並ぶ（クライアントは最後に見たイベントを取りこぼし再送の起点にする）
//! - conversation チャンネルでは、接続が 1 つも届かなかった参加者を未配信として報告する
//! - 1 つの接続への送信失敗は他の接続への配信を妨げない
//! - 失敗した接続への再送は行わない（再接続後の取りこぼし再送で回収される）

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use tokio::sync::Mutex;

use crate::domain::{
    ChannelAuthorizer, ChannelName, ConnectionId, EventDraft, EventId, MessagePusher, Outbound,
    Sequence, UserId,
};

use super::{
    channel_router::ChannelRouter,
    connection_registry::ConnectionRegistry,
    delivery_tracker::{DeliveryTracker, RegisterOutcome},
    error::{PublishError, ReplayError},
};

/// 配信結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub event_id: EventId,
    pub channel: ChannelName,
    /// 割り当てられたシーケンス番号（重複の場合は `None`）
    pub sequence: Option<Sequence>,
    /// 同じ ID のイベントが既に発行済みで、何も配信しなかった
    pub duplicate: bool,
    /// 少なくとも 1 接続に届いたユーザー
    pub delivered_users: Vec<UserId>,
    /// 届いた接続数
    pub delivered_connections: usize,
    /// 届かなかったユーザー（全接続への送信が失敗、user チャンネルの所有者が未接続、
    /// または conversation の参加者が未接続）
    pub undelivered_users: Vec<UserId>,
}

impl DeliveryReport {
    fn duplicate(event_id: EventId, channel: ChannelName) -> Self {
        Self {
            event_id,
            channel,
            sequence: None,
            duplicate: true,
            delivered_users: Vec::new(),
            delivered_connections: 0,
            undelivered_users: Vec::new(),
        }
    }
}

pub struct EventDispatcher {
    registry: Arc<ConnectionRegistry>,
    router: Arc<ChannelRouter>,
    tracker: Arc<DeliveryTracker>,
    message_pusher: Arc<dyn MessagePusher>,
    authorizer: Arc<dyn ChannelAuthorizer>,
    publish_lock: Mutex<()>,
}

impl EventDispatcher {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        router: Arc<ChannelRouter>,
        tracker: Arc<DeliveryTracker>,
        message_pusher: Arc<dyn MessagePusher>,
        authorizer: Arc<dyn ChannelAuthorizer>,
    ) -> Self {
        Self {
            registry,
            router,
            tracker,
            message_pusher,
            authorizer,
            publish_lock: Mutex::new(()),
        }
    }

    /// チャンネルにイベントを発行する
    ///
    /// # Arguments
    ///
    /// * `channel` - 配信先チャンネル
    /// * `draft` - イベント ID とペイロード
    ///
    /// # Returns
    ///
    /// * `Ok(DeliveryReport)` - 配信結果（重複 ID の場合は `duplicate = true`）
    /// * `Err(PublishError)` - イベントを登録できなかった
    pub async fn publish(
        &self,
        channel: ChannelName,
        draft: EventDraft,
    ) -> Result<DeliveryReport, PublishError> {
        // シーケンス採番から全接続の送信キューへの投入までを直列化する
        let _guard = self.publish_lock.lock().await;
        self.publish_locked(channel, draft).await
    }

    async fn publish_locked(
        &self,
        channel: ChannelName,
        draft: EventDraft,
    ) -> Result<DeliveryReport, PublishError> {
        // 1. イベント登録（重複は吸収）
        let event = match self
            .tracker
            .register_event(channel.clone(), draft)
            .await
            .map_err(|e| PublishError::Repository(e.to_string()))?
        {
            RegisterOutcome::Registered(event) => event,
            RegisterOutcome::Duplicate(event_id) => {
                return Ok(DeliveryReport::duplicate(event_id, channel));
            }
        };

        // 2. メンバー解決（ユーザーごとにまとめる）
        let mut by_user: BTreeMap<UserId, Vec<ConnectionId>> = BTreeMap::new();
        for member in self.router.members_of(&channel).await {
            if let Some(user_id) = member.user_id {
                by_user.entry(user_id).or_default().push(member.id);
            }
        }

        // 3. 各接続へ送信
        let message = Outbound::Event(event.clone());
        let mut delivered_users = Vec::new();
        let mut undelivered_users = Vec::new();
        let mut delivered_connections = 0;
        for (user_id, connection_ids) in by_user {
            let mut reached = false;
            for connection_id in &connection_ids {
                match self.message_pusher.push_to(connection_id, &message).await {
                    Ok(()) => {
                        reached = true;
                        delivered_connections += 1;
                    }
                    Err(e) => tracing::warn!(
                        "Failed to deliver event '{}' to connection '{}': {}",
                        event.id,
                        connection_id,
                        e
                    ),
                }
            }

            if reached {
                self.tracker.record_delivered(&event.id, &user_id).await;
                delivered_users.push(user_id);
            } else {
                undelivered_users.push(user_id);
            }
        }

        // 4. 接続していない宛先ユーザー
        for user_id in self.recipients(&channel).await {
            if !delivered_users.contains(&user_id) && !undelivered_users.contains(&user_id) {
                undelivered_users.push(user_id);
            }
        }

        tracing::info!(
            "Published event '{}' (seq {}) to '{}': {} user(s) / {} connection(s) reached, {} undelivered",
            event.id,
            event.sequence.value(),
            channel,
            delivered_users.len(),
            delivered_connections,
            undelivered_users.len()
        );

        Ok(DeliveryReport {
            event_id: event.id,
            channel,
            sequence: Some(event.sequence),
            duplicate: false,
            delivered_users,
            delivered_connections,
            undelivered_users,
        })
    }

    /// チャンネルの宛先となるユーザー（user チャンネルは所有者、conversation は参加者）
    async fn recipients(&self, channel: &ChannelName) -> BTreeSet<UserId> {
        match channel {
            ChannelName::User(owner) => BTreeSet::from([owner.clone()]),
            ChannelName::Conversation(conversation_id) => self
                .authorizer
                .participants(conversation_id)
                .await
                .into_iter()
                .collect(),
        }
    }

    /// 取りこぼしたイベントを `catch-up` フレームにまとめて接続へ送る
    ///
    /// 明示的な要求に対する再送のため、配信記録があるイベントも再度送ります。
    ///
    /// # Returns
    ///
    /// 送ったイベント数
    pub async fn replay(
        &self,
        connection_id: &ConnectionId,
        since: Option<&EventId>,
    ) -> Result<usize, ReplayError> {
        let connection = self
            .registry
            .get(connection_id)
            .await
            .ok_or_else(|| ReplayError::ConnectionNotFound(connection_id.to_string()))?;
        let user_id = connection
            .authenticated_user()
            .ok_or_else(|| ReplayError::NotAuthenticated(connection_id.to_string()))?;

        let events = self.tracker.unacknowledged_since(user_id, since).await;
        let count = events.len();
        self.message_pusher
            .push_to(connection_id, &Outbound::CatchUp(events.clone()))
            .await
            .map_err(|e| ReplayError::PushFailed(e.to_string()))?;

        for event in &events {
            self.tracker.record_delivered(&event.id, user_id).await;
        }
        tracing::info!(
            "Replayed {} event(s) to connection '{}' (user '{}')",
            count,
            connection_id,
            user_id
        );
        Ok(count)
    }

    /// 接続のユーザーとしてイベントを既読にする
    pub async fn acknowledge(&self, connection_id: &ConnectionId, event_id: &str) -> bool {
        let Ok(event_id) = EventId::new(event_id.to_string()) else {
            return false;
        };
        let Some(connection) = self.registry.get(connection_id).await else {
            return false;
        };
        match connection.authenticated_user() {
            Some(user_id) => self.tracker.record_acknowledged(&event_id, user_id).await,
            None => false,
        }
    }
}
