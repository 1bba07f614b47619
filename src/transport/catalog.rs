use std::time::Duration;
use async_trait::async_trait;
use reqwest::Client;
use crate::config::TransportConfig;
use crate::error::{Result, UploadError};
use crate::queue::{FileSource, UploadOptions};
use super::CatalogSink;

/// 目录服务的 HTTP 实现：上传完成后创建媒体记录
#[derive(Debug, Clone)]
pub struct HttpCatalog {
    client: Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpCatalog {
    pub fn new(config: &TransportConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.catalog_endpoint.clone(),
            token: config.token.clone(),
        })
    }
}

#[async_trait]
impl CatalogSink for HttpCatalog {
    async fn register(
        &self,
        source: &FileSource,
        session_url: &str,
        options: &UploadOptions,
    ) -> Result<String> {
        let payload = serde_json::json!({
            "fileName": source.name,
            "fileSize": source.size,
            "mimeType": source.mime,
            "uploadUrl": session_url,
            "options": options,
        });

        let mut request = self.client.post(&self.endpoint).json(&payload);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(UploadError::server_error(
                response.status().as_u16(),
                "Failed to register upload in catalog",
            ));
        }

        let result: serde_json::Value = response.json().await?;
        let media_id = result["id"]
            .as_str()
            .ok_or_else(|| UploadError::internal_error("No 'id' in catalog response"))?;

        Ok(media_id.to_string())
    }
}
