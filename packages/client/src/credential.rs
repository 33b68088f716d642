//! クレデンシャルの取得と更新

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::ClientError;

/// クレデンシャルの供給元（外部の認証サブシステム）
///
/// `expired` を受け取ったときに `refresh` が呼ばれ、成功すれば次の接続試行で
/// `current` が新しいクレデンシャルを返すことが期待されます。
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// 現在のクレデンシャル
    async fn current(&self) -> Result<String, ClientError>;

    /// クレデンシャルを更新して新しい値を返す
    async fn refresh(&self) -> Result<String, ClientError>;
}

/// 固定のクレデンシャル（更新できない）
pub struct StaticCredentialProvider {
    credential: String,
}

impl StaticCredentialProvider {
    pub fn new(credential: impl Into<String>) -> Self {
        Self {
            credential: credential.into(),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn current(&self) -> Result<String, ClientError> {
        Ok(self.credential.clone())
    }

    async fn refresh(&self) -> Result<String, ClientError> {
        Err(ClientError::CredentialUnavailable(
            "a static credential cannot be refreshed".to_string(),
        ))
    }
}

/// ファイルから読むクレデンシャル
///
/// 外部のプロセスがファイルを書き換えることで更新されます。
/// `refresh` は読み直した値が直前に使った値と同じなら失敗します。
pub struct FileCredentialProvider {
    path: PathBuf,
    last: tokio::sync::Mutex<Option<String>>,
}

impl FileCredentialProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last: tokio::sync::Mutex::new(None),
        }
    }

    async fn read(&self) -> Result<String, ClientError> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            ClientError::CredentialUnavailable(format!("{}: {}", self.path.display(), e))
        })?;
        let credential = content.trim();
        if credential.is_empty() {
            return Err(ClientError::CredentialUnavailable(format!(
                "{} is empty",
                self.path.display()
            )));
        }
        Ok(credential.to_string())
    }
}

#[async_trait]
impl CredentialProvider for FileCredentialProvider {
    async fn current(&self) -> Result<String, ClientError> {
        let credential = self.read().await?;
        *self.last.lock().await = Some(credential.clone());
        Ok(credential)
    }

    async fn refresh(&self) -> Result<String, ClientError> {
        let credential = self.read().await?;
        let mut last = self.last.lock().await;
        if last.as_deref() == Some(credential.as_str()) {
            return Err(ClientError::CredentialUnavailable(format!(
                "{} still holds the rejected credential",
                self.path.display()
            )));
        }
        *last = Some(credential.clone());
        Ok(credential)
    }
}
