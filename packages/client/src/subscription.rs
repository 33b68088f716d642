//! イベント種別ごとのハンドラ登録

use std::collections::HashMap;

use hibiki_server::domain::{Event, EventKind};

/// `subscribe` が返すハンドル。`unsubscribe` に渡して登録を解除する
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId {
    kind: EventKind,
    id: u64,
}

impl SubscriptionId {
    pub fn kind(&self) -> EventKind {
        self.kind
    }
}

type Handler = Box<dyn Fn(&Event) + Send + Sync>;

/// イベント種別 → ハンドラ列（登録順に呼ぶ）
#[derive(Default)]
pub struct EventSubscriptions {
    next_id: u64,
    handlers: HashMap<EventKind, Vec<(u64, Handler)>>,
}

impl EventSubscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&mut self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.next_id += 1;
        let id = self.next_id;
        self.handlers
            .entry(kind)
            .or_default()
            .push((id, Box::new(handler)));
        SubscriptionId { kind, id }
    }

    /// 登録を解除する。既に解除済みなら `false`
    pub fn unsubscribe(&mut self, subscription: SubscriptionId) -> bool {
        let Some(handlers) = self.handlers.get_mut(&subscription.kind) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(id, _)| *id != subscription.id);
        let removed = handlers.len() != before;
        if handlers.is_empty() {
            self.handlers.remove(&subscription.kind);
        }
        removed
    }

    /// イベントの種別に登録されたハンドラを順に呼ぶ
    ///
    /// # Returns
    ///
    /// 呼び出したハンドラの数
    pub fn dispatch(&self, event: &Event) -> usize {
        let Some(handlers) = self.handlers.get(&event.payload.kind()) else {
            return 0;
        };
        for (_, handler) in handlers {
            handler(event);
        }
        handlers.len()
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.get(&kind).map_or(0, Vec::len)
    }
}
