//! Message formatting utilities for client display.

use hibiki_server::domain::{Event, EventPayload, JoinRejection};
use hibiki_shared::time::timestamp_to_jst_rfc3339;

use crate::runner::ConnectionStatus;

/// Message formatter for client display
pub struct MessageFormatter;

impl MessageFormatter {
    /// Format a received event
    ///
    /// # Arguments
    ///
    /// * `event` - The event to display
    ///
    /// # Returns
    ///
    /// A formatted block with the channel, body and creation time
    pub fn format_event(event: &Event) -> String {
        let body = match &event.payload {
            EventPayload::NewNotification {
                notification_type,
                sender,
                content,
            } => format!("[{:?}] @{}: {}", notification_type, sender, content),
            EventPayload::NewMessage {
                conversation_id,
                message,
            } => format!("new message in {}: {}", conversation_id, message),
            EventPayload::MessageRead {
                conversation_id,
                message_id,
                reader_id,
            } => format!(
                "@{} read message {} in {}",
                reader_id, message_id, conversation_id
            ),
            EventPayload::ReelLiked {
                reel_id,
                liker_id,
                likes_count,
            } => format!(
                "@{} liked reel {} ({} likes)",
                liker_id, reel_id, likes_count
            ),
        };
        format!(
            "\n\n------------------------------------------------------------\n\
             #{} {} ({})\n\
             {}\n\
             created at {}\n\
             ------------------------------------------------------------\n",
            event.sequence.value(),
            event.channel,
            event.payload.kind(),
            body,
            timestamp_to_jst_rfc3339(event.created_at.value())
        )
    }

    /// Format a connection status change
    pub fn format_status(status: &ConnectionStatus) -> String {
        match status {
            ConnectionStatus::Idle => "\n* idle\n".to_string(),
            ConnectionStatus::Connecting => "\n* connecting...\n".to_string(),
            ConnectionStatus::Connected { user_id } => {
                format!("\n* connected as '{}'\n", user_id)
            }
            ConnectionStatus::Reconnecting { retry_at, attempts } => format!(
                "\n* connection lost, retrying at {} (failure {})\n",
                timestamp_to_jst_rfc3339(*retry_at),
                attempts
            ),
            ConnectionStatus::CoolingDown { retry_at } => format!(
                "\n* too many failures, cooling down until {}\n",
                timestamp_to_jst_rfc3339(*retry_at)
            ),
            ConnectionStatus::RefreshingCredential => {
                "\n* credential expired, refreshing...\n".to_string()
            }
            ConnectionStatus::Halted(kind) => {
                format!("\n* credential rejected ({}), not retrying\n", kind)
            }
            ConnectionStatus::Disconnected => "\n* disconnected\n".to_string(),
        }
    }

    pub fn format_joined(channel_name: &str) -> String {
        format!("\n+ joined {}\n", channel_name)
    }

    pub fn format_left(channel_name: &str) -> String {
        format!("\n- left {}\n", channel_name)
    }

    pub fn format_join_rejected(channel_name: &str, reason: JoinRejection) -> String {
        let reason = match reason {
            JoinRejection::Forbidden => "forbidden",
            JoinRejection::InvalidChannel => "invalid channel name",
            JoinRejection::NotAuthenticated => "not authenticated yet",
        };
        format!("\n! cannot join {}: {}\n", channel_name, reason)
    }
}

#[cfg(test)]
mod tests {
    use hibiki_server::domain::{
        AuthErrorKind, ChannelName, EventId, NotificationType, Sequence, Timestamp, UserId,
    };

    use super::*;

    fn create_test_event(payload: EventPayload) -> Event {
        Event {
            id: EventId::new("e-1".to_string()).unwrap(),
            channel: ChannelName::user(UserId::new("alice".to_string()).unwrap()),
            sequence: Sequence::new(7),
            created_at: Timestamp::new(1_672_498_800_000),
            payload,
        }
    }

    #[test]
    fn test_format_notification_event() {
        // テスト項目: 通知イベントが送信者・本文・チャンネル・作成時刻付きで表示される
        // given (前提条件):
        let event = create_test_event(EventPayload::NewNotification {
            notification_type: NotificationType::LikePost,
            sender: UserId::new("bob".to_string()).unwrap(),
            content: "liked your post".to_string(),
        });

        // when (操作):
        let result = MessageFormatter::format_event(&event);

        // then (期待する結果):
        assert!(result.contains("#7 user:alice (new-notification)"));
        assert!(result.contains("@bob: liked your post"));
        assert!(result.contains("created at"));
        assert!(result.contains("2023-01-01"));
    }

    #[test]
    fn test_format_reel_liked_event() {
        // テスト項目: リールのいいねがいいね数付きで表示される
        // given (前提条件):
        let event = create_test_event(EventPayload::ReelLiked {
            reel_id: "r1".to_string(),
            liker_id: UserId::new("bob".to_string()).unwrap(),
            likes_count: 12,
        });

        // when (操作):
        let result = MessageFormatter::format_event(&event);

        // then (期待する結果):
        assert!(result.contains("@bob liked reel r1 (12 likes)"));
    }

    #[test]
    fn test_format_status() {
        // テスト項目: 接続状態が読める形で表示される
        // given (前提条件):
        let connected = ConnectionStatus::Connected {
            user_id: "alice".to_string(),
        };
        let halted = ConnectionStatus::Halted(AuthErrorKind::Invalid);

        // when (操作):
        let connected = MessageFormatter::format_status(&connected);
        let halted = MessageFormatter::format_status(&halted);

        // then (期待する結果):
        assert!(connected.contains("connected as 'alice'"));
        assert!(halted.contains("not retrying"));
    }

    #[test]
    fn test_format_join_rejected() {
        // テスト項目: 参加拒否の理由が表示される
        // given (前提条件):
        let channel_name = "conversation:7";

        // when (操作):
        let result = MessageFormatter::format_join_rejected(channel_name, JoinRejection::Forbidden);

        // then (期待する結果):
        assert!(result.contains("cannot join conversation:7: forbidden"));
    }
}
