//! 受信済みイベントの重複排除

use std::collections::{HashSet, VecDeque};

/// 既定で覚えておくイベント ID の数
pub const DEFAULT_INBOX_CAPACITY: usize = 1024;

/// 最近受け取ったイベント ID の集合（上限付き、古いものから忘れる）
///
/// ライブ配信と catch-up の再送で同じイベントが届いても、
/// アプリケーションには 1 回だけ渡すために使います。
#[derive(Debug)]
pub struct EventInbox {
    capacity: usize,
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl Default for EventInbox {
    fn default() -> Self {
        Self::new(DEFAULT_INBOX_CAPACITY)
    }
}

impl EventInbox {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
        }
    }

    /// 初めて見るイベントなら記録して `true`
    pub fn accept(&mut self, event_id: &str) -> bool {
        if self.seen.contains(event_id) {
            return false;
        }
        if self.order.len() == self.capacity
            && let Some(oldest) = self.order.pop_front()
        {
            self.seen.remove(&oldest);
        }
        self.order.push_back(event_id.to_string());
        self.seen.insert(event_id.to_string());
        true
    }

    pub fn contains(&self, event_id: &str) -> bool {
        self.seen.contains(event_id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
