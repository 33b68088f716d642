//! サーバー設定

use std::time::Duration;

use thiserror::Error;

use crate::usecase::DEFAULT_RETENTION;

/// JWT 署名鍵を読む環境変数
pub const SECRET_ENV: &str = "JWT_SECRET";

/// 開発モードでのみ使う署名鍵
pub const DEV_SECRET: &str = "hibiki-dev-secret";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("JWT_SECRET is not set (pass --dev to use the development secret)")]
    MissingSecret,
}

/// サーバー設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// バインドするホスト
    pub host: String,
    /// バインドするポート
    pub port: u16,
    /// イベントと配信記録の保持期間
    pub retention: Duration,
    /// 保持期間切れの掃除間隔
    pub sweep_interval: Duration,
    /// 接続してから認証を完了するまでの猶予
    pub auth_timeout: Duration,
    /// ウィンドウあたりの認証済み接続数の上限（ユーザーごと）
    pub connect_rate_limit: u32,
    /// 接続レート制限のウィンドウ
    pub connect_rate_window: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            retention: DEFAULT_RETENTION,
            sweep_interval: Duration::from_secs(60),
            auth_timeout: Duration::from_secs(10),
            connect_rate_limit: 20,
            connect_rate_window: Duration::from_secs(60),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// 署名鍵を決める
///
/// `JWT_SECRET` が空でなければそれを使う。未設定のときは `dev` が指定された場合だけ
/// 開発用の鍵にフォールバックする。
pub fn resolve_secret(env_value: Option<String>, dev: bool) -> Result<String, ConfigError> {
    match env_value {
        Some(secret) if !secret.is_empty() => Ok(secret),
        _ if dev => {
            tracing::warn!("{} is not set, using the development secret", SECRET_ENV);
            Ok(DEV_SECRET.to_string())
        }
        _ => Err(ConfigError::MissingSecret),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_secret_prefers_environment() {
        // テスト項目: 環境変数の鍵があれば dev 指定の有無に関係なくそれを使う
        // given (前提条件):
        let env_value = Some("production-secret".to_string());

        // when (操作):
        let secret = resolve_secret(env_value.clone(), false);
        let dev_secret = resolve_secret(env_value, true);

        // then (期待する結果):
        assert_eq!(secret, Ok("production-secret".to_string()));
        assert_eq!(dev_secret, Ok("production-secret".to_string()));
    }

    #[test]
    fn test_resolve_secret_without_environment_requires_dev() {
        // テスト項目: 鍵が未設定（または空）なら dev 指定なしではエラー、dev 指定ありなら開発用の鍵
        // given (前提条件):
        let missing = [None, Some(String::new())];

        for env_value in missing {
            // when (操作):
            let strict = resolve_secret(env_value.clone(), false);
            let dev = resolve_secret(env_value, true);

            // then (期待する結果):
            assert_eq!(strict, Err(ConfigError::MissingSecret));
            assert_eq!(dev, Ok(DEV_SECRET.to_string()));
        }
    }
}
