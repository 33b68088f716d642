//! 値オブジェクト定義
//!
//! 接続・ユーザー・チャンネル・イベントを識別する値を型として表現します。
//! 生の文字列はこのモジュールの境界で検証され、以降は検証済みの値として扱われます。

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{AuthErrorKind, ValueObjectError};

/// 識別子の最大長
const MAX_ID_LENGTH: usize = 128;

/// 識別子文字列の共通バリデーション
fn validate_id(kind: &'static str, value: &str) -> Result<(), ValueObjectError> {
    if value.is_empty() {
        return Err(ValueObjectError::Empty(kind));
    }
    if value.len() > MAX_ID_LENGTH {
        return Err(ValueObjectError::TooLong {
            kind,
            max: MAX_ID_LENGTH,
            actual: value.len(),
        });
    }
    if value.chars().any(char::is_whitespace) {
        return Err(ValueObjectError::InvalidCharacter(kind));
    }
    Ok(())
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn new(value: String) -> Result<Self, ValueObjectError> {
                validate_id($kind, &value)?;
                Ok(Self(value))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_string(self) -> String {
                self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValueObjectError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// ユーザー ID（認証済みアイデンティティ）
    UserId,
    "user id"
);

string_id!(
    /// 会話 ID
    ConversationId,
    "conversation id"
);

string_id!(
    /// イベント ID（グローバルに一意）
    ///
    /// プロデューサーが指定した場合はその値を使い、指定がなければ UUID v4 を採番します。
    EventId,
    "event id"
);

impl EventId {
    /// UUID v4 で新しいイベント ID を生成
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// 接続 ID（サーバー側で採番される不透明な値）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(value: &str) -> Result<Self, ValueObjectError> {
        Uuid::parse_str(value)
            .map(Self)
            .map_err(|_| ValueObjectError::InvalidCharacter("connection id"))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// チャンネル名
///
/// `user:<userId>` または `conversation:<conversationId>` のどちらか。
/// それ以外の形式は構築時に拒否されます。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ChannelName {
    User(UserId),
    Conversation(ConversationId),
}

impl ChannelName {
    const USER_PREFIX: &'static str = "user";
    const CONVERSATION_PREFIX: &'static str = "conversation";

    pub fn user(user_id: UserId) -> Self {
        Self::User(user_id)
    }

    pub fn conversation(conversation_id: ConversationId) -> Self {
        Self::Conversation(conversation_id)
    }

    /// 文字列からチャンネル名をパース
    pub fn parse(value: &str) -> Result<Self, ValueObjectError> {
        let invalid = || ValueObjectError::InvalidChannel(value.to_string());
        let (prefix, id) = value.split_once(':').ok_or_else(invalid)?;
        match prefix {
            Self::USER_PREFIX => UserId::new(id.to_string())
                .map(Self::User)
                .map_err(|_| invalid()),
            Self::CONVERSATION_PREFIX => ConversationId::new(id.to_string())
                .map(Self::Conversation)
                .map_err(|_| invalid()),
            _ => Err(invalid()),
        }
    }
}

impl TryFrom<String> for ChannelName {
    type Error = ValueObjectError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ChannelName> for String {
    fn from(value: ChannelName) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "{}:{}", Self::USER_PREFIX, id),
            Self::Conversation(id) => write!(f, "{}:{}", Self::CONVERSATION_PREFIX, id),
        }
    }
}

/// チャンネル内の配信順序を表すシーケンス番号
///
/// プロセス全体で単調増加するため、チャンネル単位でも単調増加になります。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Sequence(u64);

impl Sequence {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

/// Unix タイムスタンプ（ミリ秒）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(i64);

impl Timestamp {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> i64 {
        self.0
    }

    /// `millis` だけ過去のタイムスタンプ
    pub fn saturating_sub_millis(&self, millis: i64) -> Self {
        Self(self.0.saturating_sub(millis))
    }
}

/// 認証クレデンシャル（JWT 形式のトークン）
///
/// 内容はログに出さないよう `Debug` では伏せ字になります。
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// クレデンシャルの形式を検証
    ///
    /// ドット区切りの空でない 3 セグメントでなければ `AuthErrorKind::Malformed`。
    pub fn parse(raw: &str) -> Result<Self, AuthErrorKind> {
        let raw = raw.trim();
        let segments: Vec<&str> = raw.split('.').collect();
        if segments.len() != 3 || segments.iter().any(|segment| segment.is_empty()) {
            return Err(AuthErrorKind::Malformed);
        }
        Ok(Self(raw.to_string()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}
