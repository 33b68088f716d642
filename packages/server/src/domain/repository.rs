//! Repository trait 定義
//!
//! ドメイン層が必要とするデータアクセスのインターフェースを定義します。
//! 具体的な実装は Infrastructure 層が提供します（依存性の逆転）。

use async_trait::async_trait;

use super::{
    ChannelName, Connection, ConnectionId, DeliveryRecord, DeliveryStatus, Event, EventDraft,
    EventId, RepositoryError, Sequence, Timestamp, UserId,
};

/// 接続 Repository
///
/// 接続 ID → 接続、ユーザー → 接続、チャンネル → 接続 の 3 つの索引を持ち、
/// 全ての更新は 1 つの排他区間の中で行われます。
#[async_trait]
pub trait ConnectionRepository: Send + Sync {
    /// 新しい接続を登録
    async fn insert(&self, connection: Connection) -> Result<(), RepositoryError>;

    /// 接続を取得
    async fn get(&self, id: &ConnectionId) -> Option<Connection>;

    /// `Authenticating` へ遷移
    async fn begin_authentication(&self, id: &ConnectionId) -> Result<Connection, RepositoryError>;

    /// `Open` へ遷移し、ユーザー索引に追加
    async fn bind_user(
        &self,
        id: &ConnectionId,
        user_id: UserId,
        now: Timestamp,
    ) -> Result<Connection, RepositoryError>;

    /// `Closed` へ遷移し、全てのチャンネルから外す（索引からは消さない）
    async fn close(&self, id: &ConnectionId) -> Result<(), RepositoryError>;

    /// 最終アクティビティ時刻を更新
    async fn touch(&self, id: &ConnectionId, now: Timestamp) -> Result<(), RepositoryError>;

    /// 全ての索引から取り除く
    async fn remove(&self, id: &ConnectionId) -> Option<Connection>;

    /// ユーザーの接続一覧
    async fn connections_for(&self, user_id: &UserId) -> Vec<Connection>;

    /// チャンネルに参加させる。新たに参加した場合は `true`
    async fn add_membership(
        &self,
        id: &ConnectionId,
        channel: ChannelName,
    ) -> Result<bool, RepositoryError>;

    /// チャンネルから外す。メンバーでなかった場合は `false`
    async fn remove_membership(&self, id: &ConnectionId, channel: &ChannelName) -> bool;

    /// チャンネルのメンバー接続一覧
    async fn members_of(&self, channel: &ChannelName) -> Vec<Connection>;

    /// 全ての接続
    async fn all(&self) -> Vec<Connection>;
}

/// 配信記録 Repository
///
/// イベント本体と (イベント, ユーザー) ごとの配信記録を保持します。
/// シーケンス番号はこの Repository が採番します。
#[async_trait]
pub trait DeliveryRepository: Send + Sync {
    /// イベントを保存し、次のシーケンス番号を割り当てる
    ///
    /// 同じ ID が既に存在する場合は `RepositoryError::DuplicateEvent`。
    async fn append(
        &self,
        channel: ChannelName,
        draft: EventDraft,
        created_at: Timestamp,
    ) -> Result<Event, RepositoryError>;

    /// イベントを取得
    async fn get_event(&self, id: &EventId) -> Option<Event>;

    /// 配信状態を更新。状態が変化した場合は `true`
    async fn record(
        &self,
        event_id: &EventId,
        user_id: &UserId,
        status: DeliveryStatus,
        now: Timestamp,
    ) -> Result<bool, RepositoryError>;

    /// 配信状態を取得
    async fn status(&self, event_id: &EventId, user_id: &UserId) -> Option<DeliveryStatus>;

    /// `after` より後のイベントをシーケンス順に取得（`None` なら全件）
    async fn events_after(&self, after: Option<Sequence>) -> Vec<Event>;

    /// ユーザーの配信記録一覧
    async fn records_for(&self, user_id: &UserId) -> Vec<DeliveryRecord>;

    /// `cutoff` より前に作成されたイベントと配信記録を削除し、削除したイベント数を返す
    async fn purge_before(&self, cutoff: Timestamp) -> usize;
}
