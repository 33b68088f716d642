//! 再接続制御（クライアント側の状態機械）
//!
//! I/O を持たない純粋な状態機械です。Runner がトランスポートやタイマーの出来事を
//! `Input` として渡し、返ってきた `Command` を実行します。
//!
//! 状態遷移:
//!
//! ```text
//! Idle → Connecting → Authenticating → Connected
//!          ↑               │  │            │
//!          │     expired   │  │ close      │ close
//!          │   ┌───────────┘  ↓            ↓
//!          │   ↓          Backoff / Cooldown
//!          │ RefreshingCredential      │ wake
//!          └───────────────────────────┘
//! malformed / invalid → Halted
//! ```

use std::{collections::BTreeSet, sync::Arc, time::Duration};

use hibiki_server::domain::AuthErrorKind;
use hibiki_shared::time::Clock;

/// 再接続ポリシー
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// 1 回目の失敗後の待ち時間
    pub initial_backoff: Duration,
    /// 失敗ごとの待ち時間の倍率
    pub multiplier: u32,
    /// 待ち時間の上限
    pub max_backoff: Duration,
    /// 接続試行どうしの最小間隔（原因によらず適用）
    pub min_interval: Duration,
    /// 連続失敗の上限（超えると長い休止に入る）
    pub max_attempts: u32,
    /// 連続失敗が上限を超えたときの休止時間
    pub extended_cooldown: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            multiplier: 2,
            max_backoff: Duration::from_secs(30),
            min_interval: Duration::from_secs(1),
            max_attempts: 5,
            extended_cooldown: Duration::from_secs(60),
        }
    }
}

impl ReconnectPolicy {
    /// `attempt` 回目（1 始まり）の失敗後の待ち時間
    ///
    /// `min(initial * multiplier^(attempt-1), max)`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = self.multiplier.max(1).saturating_pow(exponent);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// 再接続制御の状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectState {
    Idle,
    Connecting,
    Authenticating,
    Connected,
    /// `retry_at`（ミリ秒）に再試行する
    Backoff { retry_at: i64 },
    /// 連続失敗の上限を超えた後の長い休止
    Cooldown { retry_at: i64 },
    /// 外部のクレデンシャル更新を待っている
    RefreshingCredential,
    /// 同じクレデンシャルでは再試行しない
    Halted { kind: AuthErrorKind },
}

/// 状態機械への入力
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// アプリケーションからの接続要求
    Start,
    TransportOpened,
    Authenticated,
    AuthFailed(AuthErrorKind),
    RateLimited { retry_after_ms: u64 },
    /// トランスポートが閉じた、または開けなかった
    TransportClosed,
    /// 予約したタイマーが発火した
    Wake,
    CredentialRefreshed,
    CredentialRefreshFailed,
    /// アプリケーションからの明示的な切断
    Disconnect,
}

/// Runner が実行する副作用
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    OpenTransport,
    SendAuthenticate,
    RejoinChannels(Vec<String>),
    RequestCatchUp { since: Option<String> },
    /// 時刻 `at`（ミリ秒）に `Input::Wake` を入れる
    ScheduleWake { at: i64 },
    CancelWake,
    RefreshCredential,
    SurfaceAuthError(AuthErrorKind),
    CloseTransport,
}

/// 再接続制御
pub struct ReconnectController {
    policy: ReconnectPolicy,
    clock: Arc<dyn Clock>,
    state: ReconnectState,
    /// 連続失敗回数
    attempts: u32,
    last_attempt_at: Option<i64>,
    /// サーバーから指示された再試行可能時刻
    rate_limited_until: Option<i64>,
    /// 再接続時に参加し直すチャンネル
    channels: BTreeSet<String>,
    /// catch-up の起点（受け取ったイベントのうちシーケンス最大のもの）
    cursor: Option<(u64, String)>,
    /// catch-up の応答待ちの間に受け取ったイベント。応答が届くまで起点を進めない
    pending_cursor: Option<(u64, String)>,
    catching_up: bool,
}

impl ReconnectController {
    pub fn new(policy: ReconnectPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy,
            clock,
            state: ReconnectState::Idle,
            attempts: 0,
            last_attempt_at: None,
            rate_limited_until: None,
            channels: BTreeSet::new(),
            cursor: None,
            pending_cursor: None,
            catching_up: false,
        }
    }

    pub fn state(&self) -> ReconnectState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.channels.iter().map(String::as_str)
    }

    pub fn last_event_id(&self) -> Option<&str> {
        self.cursor.as_ref().map(|(_, event_id)| event_id.as_str())
    }

    /// 参加中のチャンネルとして覚える（再接続時に参加し直す）
    pub fn remember_channel(&mut self, channel: impl Into<String>) {
        self.channels.insert(channel.into());
    }

    pub fn forget_channel(&mut self, channel: &str) {
        self.channels.remove(channel);
    }

    /// 受け取ったイベントを記録する（catch-up の起点になる）
    ///
    /// catch-up の応答待ちの間は、ライブ配信のイベントが再送分より先に届くことがあるため、
    /// 応答が届く（`catch_up_completed`）まで起点を進めません。
    pub fn observe_event(&mut self, sequence: u64, event_id: impl Into<String>) {
        let slot = if self.catching_up {
            &mut self.pending_cursor
        } else {
            &mut self.cursor
        };
        if slot.as_ref().is_none_or(|(last, _)| sequence > *last) {
            *slot = Some((sequence, event_id.into()));
        }
    }

    /// catch-up の応答を受け取り終えた
    pub fn catch_up_completed(&mut self) {
        self.catching_up = false;
        if let Some((sequence, event_id)) = self.pending_cursor.take() {
            self.observe_event(sequence, event_id);
        }
    }

    /// 入力を処理して実行すべき副作用を返す
    pub fn handle(&mut self, input: Input) -> Vec<Command> {
        let now = self.clock.now_millis();
        let before = self.state;
        let commands = self.transition(input.clone(), now);
        if before != self.state {
            tracing::debug!(
                "Reconnect state {:?} -> {:?} on {:?} (attempts: {})",
                before,
                self.state,
                input,
                self.attempts
            );
        }
        commands
    }

    fn transition(&mut self, input: Input, now: i64) -> Vec<Command> {
        use ReconnectState as S;

        match (self.state, input) {
            (_, Input::Disconnect) => {
                self.state = S::Idle;
                vec![Command::CancelWake, Command::CloseTransport]
            }

            (S::Idle, Input::Start) => self.attempt(now),
            (S::Halted { .. }, Input::Start) => {
                self.attempts = 0;
                self.attempt(now)
            }

            (S::Connecting, Input::TransportOpened) => {
                self.state = S::Authenticating;
                vec![Command::SendAuthenticate]
            }

            (S::Authenticating, Input::Authenticated) => {
                self.state = S::Connected;
                self.attempts = 0;
                self.catching_up = true;
                self.pending_cursor = None;
                vec![
                    Command::RejoinChannels(self.channels.iter().cloned().collect()),
                    Command::RequestCatchUp {
                        since: self.last_event_id().map(str::to_string),
                    },
                ]
            }

            (S::Authenticating, Input::AuthFailed(kind)) if !kind.is_terminal() => {
                self.state = S::RefreshingCredential;
                vec![Command::RefreshCredential]
            }
            (S::Authenticating, Input::AuthFailed(kind)) => {
                self.state = S::Halted { kind };
                vec![Command::SurfaceAuthError(kind), Command::CloseTransport]
            }

            (S::Idle | S::Halted { .. }, Input::RateLimited { .. }) => Vec::new(),
            (_, Input::RateLimited { retry_after_ms }) => {
                let until = now.saturating_add(i64::try_from(retry_after_ms).unwrap_or(i64::MAX));
                self.rate_limited_until = Some(self.rate_limited_until.map_or(until, |u| u.max(until)));
                self.extend_pending_wake()
            }

            (S::Connecting | S::Authenticating | S::Connected, Input::TransportClosed) => {
                self.fail(now)
            }

            (S::Backoff { retry_at }, Input::Wake) => {
                if now < retry_at {
                    vec![Command::ScheduleWake { at: retry_at }]
                } else {
                    self.attempt(now)
                }
            }
            (S::Cooldown { retry_at }, Input::Wake) => {
                if now < retry_at {
                    vec![Command::ScheduleWake { at: retry_at }]
                } else {
                    self.attempts = 0;
                    self.attempt(now)
                }
            }

            (S::RefreshingCredential, Input::CredentialRefreshed) => self.attempt(now),
            (S::RefreshingCredential, Input::CredentialRefreshFailed) => {
                let kind = AuthErrorKind::Expired;
                self.state = S::Halted { kind };
                vec![Command::SurfaceAuthError(kind), Command::CloseTransport]
            }

            (state, input) => {
                tracing::trace!("Ignoring {:?} in state {:?}", input, state);
                Vec::new()
            }
        }
    }

    /// 接続を試みる。最小間隔やレート制限に掛かる場合はその時刻まで待つ
    fn attempt(&mut self, now: i64) -> Vec<Command> {
        let earliest = self.earliest_attempt_at();
        if now < earliest {
            self.state = ReconnectState::Backoff { retry_at: earliest };
            return vec![Command::ScheduleWake { at: earliest }];
        }

        self.state = ReconnectState::Connecting;
        self.last_attempt_at = Some(now);
        vec![Command::OpenTransport]
    }

    /// 接続が失敗した、または切れた
    fn fail(&mut self, now: i64) -> Vec<Command> {
        self.attempts = self.attempts.saturating_add(1);

        if self.attempts > self.policy.max_attempts {
            let retry_at = now
                .saturating_add(millis(self.policy.extended_cooldown))
                .max(self.earliest_attempt_at());
            tracing::warn!(
                "{} consecutive connection failures, cooling down until {}",
                self.attempts,
                retry_at
            );
            self.state = ReconnectState::Cooldown { retry_at };
            return vec![Command::ScheduleWake { at: retry_at }];
        }

        let retry_at = now
            .saturating_add(millis(self.policy.backoff(self.attempts)))
            .max(self.earliest_attempt_at());
        self.state = ReconnectState::Backoff { retry_at };
        vec![Command::ScheduleWake { at: retry_at }]
    }

    fn earliest_attempt_at(&self) -> i64 {
        let by_interval = self
            .last_attempt_at
            .map_or(i64::MIN, |at| at.saturating_add(millis(self.policy.min_interval)));
        by_interval.max(self.rate_limited_until.unwrap_or(i64::MIN))
    }

    /// 待機中ならレート制限の期限まで延ばす（短くはしない）
    fn extend_pending_wake(&mut self) -> Vec<Command> {
        let Some(until) = self.rate_limited_until else {
            return Vec::new();
        };
        match &mut self.state {
            ReconnectState::Backoff { retry_at } | ReconnectState::Cooldown { retry_at }
                if *retry_at < until =>
            {
                *retry_at = until;
                vec![Command::ScheduleWake { at: until }]
            }
            _ => Vec::new(),
        }
    }
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
