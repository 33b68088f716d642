//! DeliveryRepository のインメモリ実装

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{
    ChannelName, DeliveryRecord, DeliveryRepository, DeliveryStatus, Event, EventDraft, EventId,
    RepositoryError, Sequence, Timestamp, UserId,
};

struct DeliveryStore {
    next_sequence: Sequence,
    events: BTreeMap<Sequence, Event>,
    sequences: HashMap<EventId, Sequence>,
    records: HashMap<(EventId, UserId), DeliveryRecord>,
}

impl Default for DeliveryStore {
    fn default() -> Self {
        Self {
            next_sequence: Sequence::new(1),
            events: BTreeMap::new(),
            sequences: HashMap::new(),
            records: HashMap::new(),
        }
    }
}

/// インメモリの DeliveryRepository 実装
///
/// シーケンス番号はプロセス全体で 1 から単調増加します。
#[derive(Default)]
pub struct InMemoryDeliveryRepository {
    store: Mutex<DeliveryStore>,
}

impl InMemoryDeliveryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeliveryRepository for InMemoryDeliveryRepository {
    async fn append(
        &self,
        channel: ChannelName,
        draft: EventDraft,
        created_at: Timestamp,
    ) -> Result<Event, RepositoryError> {
        let mut store = self.store.lock().await;
        if store.sequences.contains_key(&draft.id) {
            return Err(RepositoryError::DuplicateEvent(draft.id.to_string()));
        }

        let sequence = store.next_sequence;
        store.next_sequence = sequence.next();

        let event = Event {
            id: draft.id,
            channel,
            sequence,
            created_at,
            payload: draft.payload,
        };
        store.sequences.insert(event.id.clone(), sequence);
        store.events.insert(sequence, event.clone());
        Ok(event)
    }

    async fn get_event(&self, id: &EventId) -> Option<Event> {
        let store = self.store.lock().await;
        let sequence = store.sequences.get(id)?;
        store.events.get(sequence).cloned()
    }

    async fn record(
        &self,
        event_id: &EventId,
        user_id: &UserId,
        status: DeliveryStatus,
        now: Timestamp,
    ) -> Result<bool, RepositoryError> {
        let mut store = self.store.lock().await;
        if !store.sequences.contains_key(event_id) {
            return Err(RepositoryError::EventNotFound(event_id.to_string()));
        }

        let key = (event_id.clone(), user_id.clone());
        let current = store.records.get(&key).map(|record| record.status);
        let Some(next) = DeliveryStatus::apply(current, status) else {
            return Ok(false);
        };

        store.records.insert(
            key,
            DeliveryRecord {
                event_id: event_id.clone(),
                user_id: user_id.clone(),
                status: next,
                recorded_at: now,
            },
        );
        Ok(true)
    }

    async fn status(&self, event_id: &EventId, user_id: &UserId) -> Option<DeliveryStatus> {
        let store = self.store.lock().await;
        store
            .records
            .get(&(event_id.clone(), user_id.clone()))
            .map(|record| record.status)
    }

    async fn events_after(&self, after: Option<Sequence>) -> Vec<Event> {
        let store = self.store.lock().await;
        match after {
            Some(after) => store
                .events
                .range(after.next()..)
                .map(|(_, event)| event.clone())
                .collect(),
            None => store.events.values().cloned().collect(),
        }
    }

    async fn records_for(&self, user_id: &UserId) -> Vec<DeliveryRecord> {
        let store = self.store.lock().await;
        store
            .records
            .values()
            .filter(|record| &record.user_id == user_id)
            .cloned()
            .collect()
    }

    async fn purge_before(&self, cutoff: Timestamp) -> usize {
        let mut store = self.store.lock().await;
        let expired: Vec<(Sequence, EventId)> = store
            .events
            .iter()
            .filter(|(_, event)| event.created_at < cutoff)
            .map(|(sequence, event)| (*sequence, event.id.clone()))
            .collect();

        for (sequence, event_id) in &expired {
            store.events.remove(sequence);
            store.sequences.remove(event_id);
        }
        let DeliveryStore {
            sequences, records, ..
        } = &mut *store;
        records.retain(|(event_id, _), _| sequences.contains_key(event_id));

        expired.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EventPayload;

    fn user(id: &str) -> UserId {
        UserId::new(id.to_string()).unwrap()
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

    fn channel() -> ChannelName {
        ChannelName::parse("user:alice").unwrap()
    }

    #[tokio::test]
    async fn test_append_assigns_increasing_sequences() {
        // テスト項目: イベントには 1 から単調増加するシーケンス番号が割り当てられる
        // given (前提条件):
        let repository = InMemoryDeliveryRepository::new();

        // when (操作):
        let first = repository
            .append(channel(), draft("e1"), Timestamp::new(10))
            .await
            .unwrap();
        let second = repository
            .append(channel(), draft("e2"), Timestamp::new(20))
            .await
            .unwrap();

        // then (期待する結果):
        assert_eq!(first.sequence, Sequence::new(1));
        assert_eq!(second.sequence, Sequence::new(2));
    }

    #[tokio::test]
    async fn test_append_rejects_duplicate_event_id() {
        // テスト項目: 同じイベント ID の二重登録は拒否され、シーケンスを消費しない
        // given (前提条件):
        let repository = InMemoryDeliveryRepository::new();
        repository
            .append(channel(), draft("e1"), Timestamp::new(10))
            .await
            .unwrap();

        // when (操作):
        let duplicate = repository
            .append(channel(), draft("e1"), Timestamp::new(11))
            .await;
        let next = repository
            .append(channel(), draft("e2"), Timestamp::new(12))
            .await
            .unwrap();

        // then (期待する結果):
        assert_eq!(
            duplicate,
            Err(RepositoryError::DuplicateEvent("e1".to_string()))
        );
        assert_eq!(next.sequence, Sequence::new(2));
    }

    #[tokio::test]
    async fn test_record_requires_known_event_and_moves_forward() {
        // テスト項目: 未知のイベントへの記録は失敗し、既知のイベントは一方向にのみ状態が進む
        // given (前提条件):
        let repository = InMemoryDeliveryRepository::new();
        let event = repository
            .append(channel(), draft("e1"), Timestamp::new(10))
            .await
            .unwrap();
        let alice = user("alice");
        let unknown = EventId::new("missing".to_string()).unwrap();

        // when (操作):
        let missing = repository
            .record(&unknown, &alice, DeliveryStatus::Delivered, Timestamp::new(11))
            .await;
        let delivered = repository
            .record(&event.id, &alice, DeliveryStatus::Delivered, Timestamp::new(11))
            .await;
        let acknowledged = repository
            .record(&event.id, &alice, DeliveryStatus::Acknowledged, Timestamp::new(12))
            .await;
        let redelivered = repository
            .record(&event.id, &alice, DeliveryStatus::Delivered, Timestamp::new(13))
            .await;

        // then (期待する結果):
        assert_eq!(
            missing,
            Err(RepositoryError::EventNotFound("missing".to_string()))
        );
        assert_eq!(delivered, Ok(true));
        assert_eq!(acknowledged, Ok(true));
        assert_eq!(redelivered, Ok(false));
        assert_eq!(
            repository.status(&event.id, &alice).await,
            Some(DeliveryStatus::Acknowledged)
        );
    }

    #[tokio::test]
    async fn test_events_after_returns_later_events_in_order() {
        // テスト項目: 指定シーケンスより後のイベントだけがシーケンス順に返る
        // given (前提条件):
        let repository = InMemoryDeliveryRepository::new();
        for id in ["e1", "e2", "e3"] {
            repository
                .append(channel(), draft(id), Timestamp::new(10))
                .await
                .unwrap();
        }

        // when (操作):
        let after_first = repository.events_after(Some(Sequence::new(1))).await;
        let all = repository.events_after(None).await;

        // then (期待する結果):
        let ids: Vec<&str> = after_first.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["e2", "e3"]);
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_purge_before_removes_events_and_records() {
        // テスト項目: 期限切れのイベントと配信記録が一緒に削除される
        // given (前提条件):
        let repository = InMemoryDeliveryRepository::new();
        let old = repository
            .append(channel(), draft("old"), Timestamp::new(100))
            .await
            .unwrap();
        let fresh = repository
            .append(channel(), draft("fresh"), Timestamp::new(500))
            .await
            .unwrap();
        let alice = user("alice");
        for event in [&old, &fresh] {
            repository
                .record(&event.id, &alice, DeliveryStatus::Delivered, Timestamp::new(600))
                .await
                .unwrap();
        }

        // when (操作):
        let purged = repository.purge_before(Timestamp::new(300)).await;

        // then (期待する結果):
        assert_eq!(purged, 1);
        assert!(repository.get_event(&old.id).await.is_none());
        assert!(repository.get_event(&fresh.id).await.is_some());
        let records = repository.records_for(&alice).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event_id, fresh.id);
    }
}
