//! ドメイン層
//!
//! 値オブジェクト、エンティティ、および UseCase が依存する trait を定義します。
//! Infrastructure 層はここで定義された trait を実装します。

pub mod collaborator;
pub mod entity;
pub mod error;
pub mod message_pusher;
pub mod repository;
pub mod value_object;

pub use collaborator::{
    ChannelAuthorizer, ConnectRateLimiter, CredentialValidator, RateLimitExceeded,
    authorize_channel,
};
pub use entity::{
    Connection, ConnectionState, DeliveryRecord, DeliveryStatus, Event, EventDraft, EventKind,
    EventPayload, NotificationType,
};
pub use error::{AuthErrorKind, MessagePushError, RepositoryError, ValueObjectError};
pub use message_pusher::{JoinRejection, MessagePusher, Outbound, PusherChannel};
pub use repository::{ConnectionRepository, DeliveryRepository};
pub use value_object::{
    ChannelName, ConnectionId, ConversationId, Credential, EventId, Sequence, Timestamp, UserId,
};
