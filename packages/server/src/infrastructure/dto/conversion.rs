//! Conversion logic between DTOs and domain entities.

use hibiki_shared::time::timestamp_to_jst_rfc3339;

use crate::domain::{
    ChannelName, Connection, Event, EventId, Outbound, Sequence, Timestamp, ValueObjectError,
};
use crate::infrastructure::dto::{
    http::ConnectionSummaryDto,
    websocket::{ControlMessage, EventFrame, ServerFrame},
};
use crate::usecase::DeliveryReport;

use super::http::DeliveryReportDto;

// ========================================
// DTO → Domain Entity
// ========================================

impl TryFrom<EventFrame> for Event {
    type Error = ValueObjectError;

    fn try_from(frame: EventFrame) -> Result<Self, Self::Error> {
        Ok(Self {
            id: EventId::new(frame.event_id)?,
            channel: ChannelName::parse(&frame.channel)?,
            sequence: Sequence::new(frame.sequence),
            created_at: Timestamp::new(frame.created_at),
            payload: frame.payload,
        })
    }
}

// ========================================
// Domain Entity → DTO
// ========================================

impl From<&Event> for EventFrame {
    fn from(event: &Event) -> Self {
        Self {
            event_id: event.id.to_string(),
            channel: event.channel.to_string(),
            sequence: event.sequence.value(),
            created_at: event.created_at.value(),
            payload: event.payload.clone(),
        }
    }
}

impl From<&Outbound> for ServerFrame {
    fn from(message: &Outbound) -> Self {
        let control = match message {
            Outbound::Event(event) => return Self::Event(EventFrame::from(event)),
            Outbound::Authenticated {
                user_id,
                connection_id,
            } => ControlMessage::Authenticated {
                user_id: user_id.to_string(),
                connection_id: connection_id.to_string(),
            },
            Outbound::AuthRejected(kind) => ControlMessage::AuthError { kind: *kind },
            Outbound::RateLimited { retry_after_ms } => ControlMessage::RateLimited {
                retry_after_ms: *retry_after_ms,
            },
            Outbound::Joined(channel) => ControlMessage::Joined {
                channel_name: channel.to_string(),
            },
            Outbound::Left(channel) => ControlMessage::Left {
                channel_name: channel.to_string(),
            },
            Outbound::JoinRejected {
                channel_name,
                reason,
            } => ControlMessage::JoinError {
                channel_name: channel_name.clone(),
                reason: *reason,
            },
            Outbound::Pong { timestamp } => ControlMessage::Pong {
                timestamp: *timestamp,
            },
            Outbound::CatchUp(events) => ControlMessage::CatchUp {
                events: events.iter().map(EventFrame::from).collect(),
            },
        };
        Self::Control(control)
    }
}

impl From<&Connection> for ConnectionSummaryDto {
    fn from(connection: &Connection) -> Self {
        Self {
            connection_id: connection.id.to_string(),
            user_id: connection.user_id.as_ref().map(ToString::to_string),
            state: connection.state,
            channels: connection.channels.iter().map(ToString::to_string).collect(),
            connected_at: timestamp_to_jst_rfc3339(connection.connected_at.value()),
            last_activity_at: timestamp_to_jst_rfc3339(connection.last_activity_at.value()),
        }
    }
}

impl From<DeliveryReport> for DeliveryReportDto {
    fn from(report: DeliveryReport) -> Self {
        Self {
            event_id: report.event_id.into_string(),
            channel: report.channel.to_string(),
            sequence: report.sequence.map(|sequence| sequence.value()),
            duplicate: report.duplicate,
            delivered_users: report
                .delivered_users
                .into_iter()
                .map(|user| user.into_string())
                .collect(),
            delivered_connections: report.delivered_connections,
            undelivered_users: report
                .undelivered_users
                .into_iter()
                .map(|user| user.into_string())
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AuthErrorKind, ConnectionId, EventPayload, UserId};

    fn sample_event() -> Event {
        Event {
            id: EventId::new("e1".to_string()).unwrap(),
            channel: ChannelName::parse("user:alice").unwrap(),
            sequence: Sequence::new(3),
            created_at: Timestamp::new(1_000),
            payload: EventPayload::ReelLiked {
                reel_id: "r1".to_string(),
                liker_id: UserId::new("bob".to_string()).unwrap(),
                likes_count: 10,
            },
        }
    }

    #[test]
    fn test_event_to_frame_flattens_payload() {
        // テスト項目: イベントフレームに共通フィールドとペイロードが同じ階層で並ぶ
        // given (前提条件):
        let event = sample_event();

        // when (操作):
        let frame = ServerFrame::from(&Outbound::Event(event));
        let json = serde_json::to_value(&frame).unwrap();

        // then (期待する結果):
        assert_eq!(
            json,
            serde_json::json!({
                "eventId": "e1",
                "channel": "user:alice",
                "sequence": 3,
                "createdAt": 1000,
                "type": "reel-liked",
                "reelId": "r1",
                "likerId": "bob",
                "likesCount": 10
            })
        );
    }

    #[test]
    fn test_frame_to_event_validates_channel() {
        // テスト項目: 不正なチャンネル名を持つフレームはドメインイベントに変換できない
        // given (前提条件):
        let mut frame = EventFrame::from(&sample_event());
        frame.channel = "room:1".to_string();

        // when (操作):
        let result = Event::try_from(frame);

        // then (期待する結果):
        assert_eq!(
            result,
            Err(ValueObjectError::InvalidChannel("room:1".to_string()))
        );
    }

    #[test]
    fn test_frame_to_event_roundtrip() {
        // テスト項目: フレームから復元したイベントが元のイベントと一致する
        // given (前提条件):
        let event = sample_event();

        // when (操作):
        let restored = Event::try_from(EventFrame::from(&event)).unwrap();

        // then (期待する結果):
        assert_eq!(restored, event);
    }

    #[test]
    fn test_outbound_control_messages() {
        // テスト項目: 制御系の Outbound が対応する ControlMessage に変換される
        // given (前提条件):
        let connection_id = ConnectionId::generate();
        let authenticated = Outbound::Authenticated {
            user_id: UserId::new("alice".to_string()).unwrap(),
            connection_id,
        };
        let rejected = Outbound::AuthRejected(AuthErrorKind::Invalid);

        // when (操作):
        let authenticated = ServerFrame::from(&authenticated);
        let rejected = ServerFrame::from(&rejected);

        // then (期待する結果):
        assert_eq!(
            authenticated,
            ServerFrame::Control(ControlMessage::Authenticated {
                user_id: "alice".to_string(),
                connection_id: connection_id.to_string(),
            })
        );
        assert_eq!(
            rejected,
            ServerFrame::Control(ControlMessage::AuthError {
                kind: AuthErrorKind::Invalid
            })
        );
    }
}
