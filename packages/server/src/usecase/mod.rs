//! UseCase 層
//!
//! - `ConnectionRegistry`: 接続の登録・認証・破棄
//! - `ChannelRouter`: チャンネルへの参加・退出
//! - `EventDispatcher`: イベントの発行と取りこぼし再送
//! - `DeliveryTracker`: 配信・既読の記録と保持期間管理

pub mod channel_router;
pub mod connection_registry;
pub mod delivery_tracker;
pub mod error;
pub mod event_dispatcher;

pub use channel_router::ChannelRouter;
pub use connection_registry::ConnectionRegistry;
pub use delivery_tracker::{DEFAULT_RETENTION, DeliveryTracker, RegisterOutcome};
pub use error::{AuthenticateError, JoinError, PublishError, RegisterError, ReplayError};
pub use event_dispatcher::{DeliveryReport, EventDispatcher};
