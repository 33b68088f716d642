//! UseCase: 配信トラッカー
//!
//! イベントの同一性（ID による重複排除）、(イベント, ユーザー) ごとの配信・既読記録、
//! 再接続時の取りこぼし再送、保持期間による削除を担当します。

use std::{collections::HashMap, sync::Arc, time::Duration};

use hibiki_shared::time::Clock;

use crate::domain::{
    ChannelAuthorizer, ChannelName, DeliveryRepository, DeliveryStatus, Event, EventDraft,
    EventId, RepositoryError, Timestamp, UserId, authorize_channel,
};

/// イベントの保持期間（既定値）
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// イベント登録の結果
#[derive(Debug, Clone, PartialEq)]
pub enum RegisterOutcome {
    /// 新規に登録された
    Registered(Event),
    /// 同じ ID のイベントが既に存在する
    Duplicate(EventId),
}

pub struct DeliveryTracker {
    repository: Arc<dyn DeliveryRepository>,
    authorizer: Arc<dyn ChannelAuthorizer>,
    clock: Arc<dyn Clock>,
    retention: Duration,
}

impl DeliveryTracker {
    pub fn new(
        repository: Arc<dyn DeliveryRepository>,
        authorizer: Arc<dyn ChannelAuthorizer>,
        clock: Arc<dyn Clock>,
        retention: Duration,
    ) -> Self {
        Self {
            repository,
            authorizer,
            clock,
            retention,
        }
    }

    fn now(&self) -> Timestamp {
        Timestamp::new(self.clock.now_millis())
    }

    /// イベントを登録し、シーケンス番号を割り当てる
    pub async fn register_event(
        &self,
        channel: ChannelName,
        draft: EventDraft,
    ) -> Result<RegisterOutcome, RepositoryError> {
        let event_id = draft.id.clone();
        match self.repository.append(channel, draft, self.now()).await {
            Ok(event) => Ok(RegisterOutcome::Registered(event)),
            Err(RepositoryError::DuplicateEvent(_)) => {
                tracing::info!("Event '{}' already registered, skipping", event_id);
                Ok(RegisterOutcome::Duplicate(event_id))
            }
            Err(e) => Err(e),
        }
    }

    /// 配信済みとして記録。新たに記録された場合は `true`
    pub async fn record_delivered(&self, event_id: &EventId, user_id: &UserId) -> bool {
        self.record(event_id, user_id, DeliveryStatus::Delivered)
            .await
    }

    /// 既読（ack）として記録。状態が変化した場合は `true`
    ///
    /// 配信記録がない場合（別経路で受け取った等）も既読として記録します。
    pub async fn record_acknowledged(&self, event_id: &EventId, user_id: &UserId) -> bool {
        self.record(event_id, user_id, DeliveryStatus::Acknowledged)
            .await
    }

    async fn record(&self, event_id: &EventId, user_id: &UserId, status: DeliveryStatus) -> bool {
        match self
            .repository
            .record(event_id, user_id, status, self.now())
            .await
        {
            Ok(changed) => changed,
            Err(e) => {
                tracing::debug!(
                    "Delivery record for '{}' / '{}' skipped: {}",
                    event_id,
                    user_id,
                    e
                );
                false
            }
        }
    }

    /// 配信済み（既読を含む）か
    pub async fn is_delivered(&self, event_id: &EventId, user_id: &UserId) -> bool {
        self.repository.status(event_id, user_id).await.is_some()
    }

    /// 既読か
    pub async fn is_acknowledged(&self, event_id: &EventId, user_id: &UserId) -> bool {
        self.repository.status(event_id, user_id).await == Some(DeliveryStatus::Acknowledged)
    }

    /// 取りこぼしたイベント一覧
    ///
    /// `since` より後（`since` が無い、または既に削除済みなら保持中の全て）のイベントのうち、
    /// ユーザーが現時点で参加を認可されているチャンネルのもので、まだ既読になっていないものを
    /// シーケンス順に返します。読み取り専用で、何度呼んでも同じ結果になります。
    pub async fn unacknowledged_since(
        &self,
        user_id: &UserId,
        since: Option<&EventId>,
    ) -> Vec<Event> {
        let after = match since {
            Some(event_id) => self
                .repository
                .get_event(event_id)
                .await
                .map(|event| event.sequence),
            None => None,
        };

        let mut authorized: HashMap<ChannelName, bool> = HashMap::new();
        let mut missed = Vec::new();
        for event in self.repository.events_after(after).await {
            let allowed = match authorized.get(&event.channel) {
                Some(allowed) => *allowed,
                None => {
                    let allowed =
                        authorize_channel(self.authorizer.as_ref(), user_id, &event.channel).await;
                    authorized.insert(event.channel.clone(), allowed);
                    allowed
                }
            };
            if !allowed {
                continue;
            }
            if self.is_acknowledged(&event.id, user_id).await {
                continue;
            }
            missed.push(event);
        }
        missed
    }

    /// 配信済みだが未読のイベント数
    pub async fn unread_count(&self, user_id: &UserId) -> usize {
        self.repository
            .records_for(user_id)
            .await
            .iter()
            .filter(|record| record.status == DeliveryStatus::Delivered)
            .count()
    }

    /// 保持期間を過ぎたイベントと配信記録を削除
    pub async fn purge_expired(&self) -> usize {
        let retention = i64::try_from(self.retention.as_millis()).unwrap_or(i64::MAX);
        let cutoff = self.now().saturating_sub_millis(retention);
        let purged = self.repository.purge_before(cutoff).await;
        if purged > 0 {
            tracing::info!("Purged {} expired event(s)", purged);
        }
        purged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::{ConversationId, EventPayload},
        infrastructure::{
            authorizer::InMemoryChannelAuthorizer, repository::InMemoryDeliveryRepository,
        },
    };
    use hibiki_shared::time::ManualClock;

    // ========================================
    // テスト作業記録
    // ========================================
    // 【何をテストするか】
    // - 重複イベントの吸収
    // - 配信・既読記録の単調性
    // - unacknowledged_since の範囲・認可・既読フィルタ
    // - 保持期間による削除
    //
    // 【なぜこのテストが必要か】
    // - 再接続時の取りこぼし再送が「切断中に発行されたイベント」をちょうど返すことが
    //   at-least-once 配信の前提になっている
    // ========================================

    fn user(id: &str) -> UserId {
        UserId::new(id.to_string()).unwrap()
    }

    fn channel(name: &str) -> ChannelName {
        ChannelName::parse(name).unwrap()
    }

    fn draft(id: &str) -> EventDraft {
        EventDraft::with_id(
            EventId::new(id.to_string()).unwrap(),
            EventPayload::ReelLiked {
                reel_id: "r1".to_string(),
                liker_id: user("bob"),
                likes_count: 1,
            },
        )
    }

    struct Fixture {
        tracker: DeliveryTracker,
        authorizer: Arc<InMemoryChannelAuthorizer>,
        clock: Arc<ManualClock>,
    }

    fn create_tracker() -> Fixture {
        let authorizer = Arc::new(InMemoryChannelAuthorizer::new());
        let clock = Arc::new(ManualClock::new(1_000_000));
        Fixture {
            tracker: DeliveryTracker::new(
                Arc::new(InMemoryDeliveryRepository::new()),
                authorizer.clone(),
                clock.clone(),
                DEFAULT_RETENTION,
            ),
            authorizer,
            clock,
        }
    }

    async fn register(tracker: &DeliveryTracker, channel_name: &str, id: &str) -> Event {
        match tracker
            .register_event(channel(channel_name), draft(id))
            .await
            .unwrap()
        {
            RegisterOutcome::Registered(event) => event,
            RegisterOutcome::Duplicate(id) => panic!("unexpected duplicate {}", id),
        }
    }

    fn ids(events: &[Event]) -> Vec<&str> {
        events.iter().map(|event| event.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_register_event_absorbs_duplicates() {
        // テスト項目: 同じ ID のイベントは Duplicate として吸収される
        // given (前提条件):
        let fixture = create_tracker();
        register(&fixture.tracker, "user:alice", "e1").await;

        // when (操作):
        let outcome = fixture
            .tracker
            .register_event(channel("user:alice"), draft("e1"))
            .await
            .unwrap();

        // then (期待する結果):
        assert_eq!(
            outcome,
            RegisterOutcome::Duplicate(EventId::new("e1".to_string()).unwrap())
        );
    }

    #[tokio::test]
    async fn test_delivery_then_acknowledgement() {
        // テスト項目: 配信記録は一度だけ作られ、既読に進む
        // given (前提条件):
        let fixture = create_tracker();
        let event = register(&fixture.tracker, "user:alice", "e1").await;
        let alice = user("alice");

        // when (操作):
        let first = fixture.tracker.record_delivered(&event.id, &alice).await;
        let second = fixture.tracker.record_delivered(&event.id, &alice).await;
        let delivered = fixture.tracker.is_delivered(&event.id, &alice).await;
        let acked_before = fixture.tracker.is_acknowledged(&event.id, &alice).await;
        let ack = fixture.tracker.record_acknowledged(&event.id, &alice).await;

        // then (期待する結果):
        assert!(first);
        assert!(!second);
        assert!(delivered);
        assert!(!acked_before);
        assert!(ack);
        assert!(fixture.tracker.is_acknowledged(&event.id, &alice).await);
        assert!(fixture.tracker.is_delivered(&event.id, &alice).await);
    }

    #[tokio::test]
    async fn test_record_for_unknown_event_is_ignored() {
        // テスト項目: 未登録イベントへの ack は何も記録しない
        // given (前提条件):
        let fixture = create_tracker();
        let unknown = EventId::new("ghost".to_string()).unwrap();

        // when (操作):
        let result = fixture
            .tracker
            .record_acknowledged(&unknown, &user("alice"))
            .await;

        // then (期待する結果):
        assert!(!result);
        assert!(!fixture.tracker.is_delivered(&unknown, &user("alice")).await);
    }

    #[tokio::test]
    async fn test_unacknowledged_since_returns_events_after_marker() {
        // テスト項目: 指定イベントより後の未読イベントだけがシーケンス順に返る
        // given (前提条件):
        let fixture = create_tracker();
        let e1 = register(&fixture.tracker, "user:alice", "e1").await;
        register(&fixture.tracker, "user:alice", "e2").await;
        register(&fixture.tracker, "user:alice", "e3").await;

        // when (操作):
        let missed = fixture
            .tracker
            .unacknowledged_since(&user("alice"), Some(&e1.id))
            .await;

        // then (期待する結果):
        assert_eq!(ids(&missed), vec!["e2", "e3"]);
    }

    #[tokio::test]
    async fn test_unacknowledged_since_filters_by_authorization() {
        // テスト項目: 現在認可されていないチャンネルのイベントは返らない
        // given (前提条件):
        let fixture = create_tracker();
        let conversation = ConversationId::new("c1".to_string()).unwrap();
        fixture
            .authorizer
            .set_participants(conversation.clone(), [user("alice")])
            .await;
        register(&fixture.tracker, "user:alice", "own").await;
        register(&fixture.tracker, "user:bob", "other").await;
        register(&fixture.tracker, "conversation:c1", "chat").await;

        // when (操作):
        let before = fixture
            .tracker
            .unacknowledged_since(&user("alice"), None)
            .await;
        fixture
            .authorizer
            .set_participants(conversation, [user("bob")])
            .await;
        let after = fixture
            .tracker
            .unacknowledged_since(&user("alice"), None)
            .await;

        // then (期待する結果):
        assert_eq!(ids(&before), vec!["own", "chat"]);
        assert_eq!(ids(&after), vec!["own"]);
    }

    #[tokio::test]
    async fn test_unacknowledged_since_excludes_acknowledged_and_is_idempotent() {
        // テスト項目: 既読イベントは除外され、呼び出しを繰り返しても結果は同じ
        // given (前提条件):
        let fixture = create_tracker();
        let alice = user("alice");
        let e1 = register(&fixture.tracker, "user:alice", "e1").await;
        let e2 = register(&fixture.tracker, "user:alice", "e2").await;
        fixture.tracker.record_delivered(&e1.id, &alice).await;
        fixture.tracker.record_delivered(&e2.id, &alice).await;
        fixture.tracker.record_acknowledged(&e1.id, &alice).await;

        // when (操作):
        let first = fixture.tracker.unacknowledged_since(&alice, None).await;
        let second = fixture.tracker.unacknowledged_since(&alice, None).await;

        // then (期待する結果):
        assert_eq!(ids(&first), vec!["e2"]);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_unacknowledged_since_unknown_marker_returns_all_retained() {
        // テスト項目: 削除済み（未知）のマーカーを指定した場合は保持中の全イベントが返る
        // given (前提条件):
        let fixture = create_tracker();
        register(&fixture.tracker, "user:alice", "e1").await;
        register(&fixture.tracker, "user:alice", "e2").await;
        let purged = EventId::new("purged".to_string()).unwrap();

        // when (操作):
        let missed = fixture
            .tracker
            .unacknowledged_since(&user("alice"), Some(&purged))
            .await;

        // then (期待する結果):
        assert_eq!(ids(&missed), vec!["e1", "e2"]);
    }

    #[tokio::test]
    async fn test_unread_count_counts_delivered_only() {
        // テスト項目: 未読数は配信済みかつ未読の件数
        // given (前提条件):
        let fixture = create_tracker();
        let alice = user("alice");
        for id in ["e1", "e2", "e3"] {
            let event = register(&fixture.tracker, "user:alice", id).await;
            fixture.tracker.record_delivered(&event.id, &alice).await;
        }
        fixture
            .tracker
            .record_acknowledged(&EventId::new("e2".to_string()).unwrap(), &alice)
            .await;

        // when (操作):
        let unread = fixture.tracker.unread_count(&alice).await;

        // then (期待する結果):
        assert_eq!(unread, 2);
    }

    #[tokio::test]
    async fn test_purge_expired_removes_old_events() {
        // テスト項目: 保持期間を過ぎたイベントだけが削除される
        // given (前提条件):
        let fixture = create_tracker();
        let old = register(&fixture.tracker, "user:alice", "old").await;
        fixture.clock.advance(23 * 60 * 60 * 1_000);
        register(&fixture.tracker, "user:alice", "fresh").await;
        fixture.clock.advance(2 * 60 * 60 * 1_000);

        // when (操作):
        let purged = fixture.tracker.purge_expired().await;

        // then (期待する結果):
        assert_eq!(purged, 1);
        let remaining = fixture
            .tracker
            .unacknowledged_since(&user("alice"), None)
            .await;
        assert_eq!(ids(&remaining), vec!["fresh"]);
        assert!(!fixture.tracker.is_delivered(&old.id, &user("alice")).await);
    }
}
