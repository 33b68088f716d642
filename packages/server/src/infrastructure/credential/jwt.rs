//! HS256 JWT によるクレデンシャル検証

use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{AuthErrorKind, Credential, CredentialValidator, UserId};

/// トークンのクレーム
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// ユーザー ID
    pub sub: String,
    /// 有効期限（Unix 秒）
    pub exp: i64,
    /// 発行時刻（Unix 秒）
    pub iat: i64,
}

/// トークン発行のエラー
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("failed to sign token: {0}")]
    Sign(#[from] jsonwebtoken::errors::Error),

    #[error("signing secret must not be empty")]
    EmptySecret,
}

/// 共有シークレットで署名された JWT を検証する CredentialValidator
pub struct JwtCredentialValidator {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtCredentialValidator {
    pub fn new(secret: &[u8]) -> Result<Self, CredentialError> {
        if secret.is_empty() {
            return Err(CredentialError::EmptySecret);
        }
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);
        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        })
    }

    /// `ttl` の間有効なトークンを発行
    pub fn issue(&self, user_id: &UserId, ttl: Duration) -> Result<String, CredentialError> {
        let now = chrono::Utc::now().timestamp();
        let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        self.issue_with_expiry(user_id, now, now.saturating_add(ttl))
    }

    /// 発行時刻と有効期限を指定してトークンを発行
    pub fn issue_with_expiry(
        &self,
        user_id: &UserId,
        issued_at: i64,
        expires_at: i64,
    ) -> Result<String, CredentialError> {
        let claims = Claims {
            sub: user_id.to_string(),
            exp: expires_at,
            iat: issued_at,
        };
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?)
    }
}

#[async_trait]
impl CredentialValidator for JwtCredentialValidator {
    async fn verify(&self, credential: &Credential) -> Result<UserId, AuthErrorKind> {
        let token = decode::<Claims>(credential.expose(), &self.decoding_key, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthErrorKind::Expired,
                kind => {
                    tracing::debug!("JWT rejected: {:?}", kind);
                    AuthErrorKind::Invalid
                }
            })?;
        UserId::new(token.claims.sub).map_err(|_| AuthErrorKind::Invalid)
    }
}
