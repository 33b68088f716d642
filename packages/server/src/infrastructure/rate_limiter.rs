//! ユーザー単位の接続レート制限（固定ウィンドウ）

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use hibiki_shared::time::Clock;
use tokio::sync::RwLock;

use crate::domain::{ConnectRateLimiter, RateLimitExceeded, UserId};

#[derive(Debug, Clone, Copy)]
struct WindowState {
    count: u32,
    window_start: i64,
}

/// インメモリの固定ウィンドウ接続レート制限
///
/// ウィンドウ内で `max_connects` 回を超えた認証済み接続を拒否します。
pub struct InMemoryConnectRateLimiter {
    max_connects: u32,
    window_millis: i64,
    clock: Arc<dyn Clock>,
    windows: RwLock<HashMap<UserId, WindowState>>,
}

impl InMemoryConnectRateLimiter {
    pub fn new(max_connects: u32, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            max_connects,
            window_millis: i64::try_from(window.as_millis()).unwrap_or(i64::MAX).max(1),
            clock,
            windows: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl ConnectRateLimiter for InMemoryConnectRateLimiter {
    async fn check(&self, user_id: &UserId) -> Result<(), RateLimitExceeded> {
        let now = self.clock.now_millis();
        let mut windows = self.windows.write().await;

        // 期限切れのウィンドウは掃除しておく
        windows.retain(|_, state| now < state.window_start.saturating_add(self.window_millis));

        let state = windows.entry(user_id.clone()).or_insert(WindowState {
            count: 0,
            window_start: now,
        });

        if state.count >= self.max_connects {
            let window_end = state.window_start.saturating_add(self.window_millis);
            let retry_after_ms = u64::try_from(window_end.saturating_sub(now))
                .unwrap_or(0)
                .max(1);
            tracing::warn!(
                "Connect rate limit exceeded for user '{}' (retry after {}ms)",
                user_id,
                retry_after_ms
            );
            return Err(RateLimitExceeded { retry_after_ms });
        }

        state.count += 1;
        Ok(())
    }
}
