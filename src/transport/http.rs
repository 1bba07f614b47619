use std::io::SeekFrom;
use std::time::Duration;
use async_trait::async_trait;
use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, Client, StatusCode};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use url::Url;
use crate::config::{QueueConfig, TransportConfig};
use crate::error::{Result, UploadError};
use crate::queue::FileSource;
use crate::utils::retry::{retry_with, RetryPolicy};
use super::stream::ProgressStream;
use super::{ProgressFn, StorageTransport};

pub(crate) const MIN_CHUNK_SIZE: usize = 256 * 1024;
pub(crate) const MAX_CHUNK_SIZE: usize = 32 * 1024 * 1024;

/// 整文件流式 or 分块
///
/// 分块模式一次中止最多损失一个分块，且天然支持断点续传；
/// 流式模式单个请求吞吐更好，但中止后能否续传取决于服务端。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    Chunked,
    Streaming,
}

/// 存储端点的 HTTP 传输实现
///
/// 协议：POST 创建会话（Upload-Length + Upload-Metadata，响应 Location），
/// HEAD 查询已确认偏移（Upload-Offset），PATCH 按偏移推送字节。
#[derive(Debug, Clone)]
pub struct HttpStorageClient {
    client: Client,
    endpoint: String,
    chunk_size: usize,
    mode: TransferMode,
    token: Option<String>,
    retry: RetryPolicy,
}

impl HttpStorageClient {
    pub fn new(transport: &TransportConfig, queue: &QueueConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(transport.timeout))
            .tcp_nodelay(transport.tcp_nodelay)
            .build()?;

        Ok(Self {
            client,
            endpoint: transport.endpoint.clone(),
            chunk_size: clamp_chunk_size(queue.chunk_size),
            mode: TransferMode::Chunked,
            token: transport.token.clone(),
            retry: RetryPolicy::new(queue.chunk_retries.max(1), queue.retry_delay),
        })
    }

    pub fn with_mode(mut self, mode: TransferMode) -> Self {
        self.mode = mode;
        self
    }

    fn base_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &self.token {
            headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {token}"))?);
        }
        Ok(headers)
    }

    async fn read_chunk(&self, file: &mut File, offset: u64, file_size: u64) -> Result<Bytes> {
        let len = std::cmp::min(self.chunk_size as u64, file_size - offset) as usize;
        let mut buffer = vec![0u8; len];
        file.seek(SeekFrom::Start(offset)).await?;
        file.read_exact(&mut buffer).await?;
        Ok(Bytes::from(buffer))
    }

    /// 推送单个分块，返回服务端确认后的新偏移
    async fn send_chunk(&self, session_url: &str, offset: u64, chunk: Bytes) -> Result<u64> {
        let mut headers = self.base_headers()?;
        headers.insert("Upload-Offset", HeaderValue::from_str(&offset.to_string())?);
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/offset+octet-stream"),
        );

        let response = self
            .client
            .patch(session_url)
            .headers(headers)
            .body(chunk)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::NO_CONTENT {
            return Err(UploadError::server_error(status.as_u16(), "Failed to upload chunk"));
        }

        parse_offset_header(status.as_u16(), response.headers())
    }

    async fn transfer_chunked(
        &self,
        session_url: &str,
        source: &FileSource,
        mut offset: u64,
        progress: ProgressFn,
    ) -> Result<()> {
        let mut file = File::open(&source.path).await?;
        let mut attempts = 0u32;

        while offset < source.size {
            let chunk = self.read_chunk(&mut file, offset, source.size).await?;

            match self.send_chunk(session_url, offset, chunk).await {
                Ok(next_offset) => {
                    offset = next_offset;
                    attempts = 0;
                    (progress)(offset);
                }
                Err(err) if err.is_retryable() && attempts < self.retry.max_attempts => {
                    attempts += 1;
                    tracing::warn!(
                        session = session_url,
                        attempt = attempts,
                        "chunk upload failed, retrying: {err}"
                    );
                    tokio::time::sleep(self.retry.strategy.get_delay(attempts - 1)).await;
                    // 响应可能在服务端收到分块后丢失，重试前重新对齐偏移
                    offset = self.offset(session_url).await?;
                }
                Err(err) => return Err(err),
            }
        }

        Ok(())
    }

    async fn transfer_streaming(
        &self,
        session_url: &str,
        source: &FileSource,
        offset: u64,
        progress: ProgressFn,
    ) -> Result<()> {
        let mut file = File::open(&source.path).await?;
        file.seek(SeekFrom::Start(offset)).await?;

        let reader = ReaderStream::with_capacity(file, 64 * 1024);
        let body = Body::wrap_stream(ProgressStream::new(reader, progress, offset));

        let remaining = source.size - offset;
        let mut headers = self.base_headers()?;
        headers.insert("Upload-Offset", HeaderValue::from_str(&offset.to_string())?);
        headers.insert(CONTENT_LENGTH, HeaderValue::from_str(&remaining.to_string())?);
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/offset+octet-stream"),
        );

        let response = self
            .client
            .patch(session_url)
            .headers(headers)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::NO_CONTENT {
            return Err(UploadError::server_error(
                status.as_u16(),
                format!("Upload failed with status {status}"),
            ));
        }

        // 校验最终偏移
        let final_offset = parse_offset_header(status.as_u16(), response.headers())?;
        if final_offset != source.size {
            return Err(UploadError::UploadIncomplete {
                expected: source.size,
                actual: final_offset,
            });
        }

        Ok(())
    }
}

#[async_trait]
impl StorageTransport for HttpStorageClient {
    async fn create_session(&self, source: &FileSource) -> Result<String> {
        let location = retry_with(&self.retry, || async {
            let mut headers = self.base_headers()?;
            headers.insert("Upload-Length", HeaderValue::from_str(&source.size.to_string())?);
            headers.insert("Upload-Metadata", HeaderValue::from_str(&encode_metadata(source))?);

            let response = self
                .client
                .post(&self.endpoint)
                .headers(headers)
                .send()
                .await?;

            if response.status() != StatusCode::CREATED {
                return Err(UploadError::server_error(
                    response.status().as_u16(),
                    "Failed to create upload session",
                ));
            }

            match response.headers().get("location") {
                Some(loc) => Ok(loc
                    .to_str()
                    .map_err(|_| UploadError::server_error(201, "Invalid 'location' header"))?
                    .to_string()),
                None => Err(UploadError::server_error(201, "No 'location' header in response")),
            }
        })
        .await?;

        let session_url = resolve_location(&self.endpoint, &location)?;
        tracing::debug!(file = %source.name, session = %session_url, "upload session created");
        Ok(session_url)
    }

    async fn offset(&self, session_url: &str) -> Result<u64> {
        retry_with(&self.retry, || async {
            let headers = self.base_headers()?;
            let response = self.client.head(session_url).headers(headers).send().await?;

            let status = response.status();
            if status != StatusCode::OK && status != StatusCode::NO_CONTENT {
                return Err(UploadError::server_error(
                    status.as_u16(),
                    "Failed to get upload offset",
                ));
            }

            parse_offset_header(status.as_u16(), response.headers())
        })
        .await
    }

    async fn transfer(
        &self,
        session_url: &str,
        source: &FileSource,
        offset: u64,
        progress: ProgressFn,
    ) -> Result<()> {
        match self.mode {
            TransferMode::Chunked => {
                self.transfer_chunked(session_url, source, offset, progress).await
            }
            TransferMode::Streaming => {
                self.transfer_streaming(session_url, source, offset, progress).await
            }
        }
    }
}

/// Upload-Metadata: 逗号分隔的 "key base64(value)" 对
fn encode_metadata(source: &FileSource) -> String {
    let mut pairs = vec![format!("filename {}", BASE64_STANDARD.encode(&source.name))];
    if let Some(mime) = &source.mime {
        pairs.push(format!("filetype {}", BASE64_STANDARD.encode(mime)));
    }
    pairs.join(",")
}

pub(crate) fn parse_offset_header(status: u16, headers: &HeaderMap) -> Result<u64> {
    match headers.get("Upload-Offset") {
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| UploadError::server_error(status, "Invalid 'Upload-Offset' header")),
        None => Err(UploadError::server_error(status, "No 'Upload-Offset' header in response")),
    }
}

/// Location 可能是绝对 URL 也可能是相对路径
fn resolve_location(endpoint: &str, location: &str) -> Result<String> {
    if location.starts_with("http") {
        return Ok(location.to_string());
    }

    let base = Url::parse(endpoint)
        .map_err(|_| UploadError::internal_error(format!("Invalid endpoint url: {endpoint}")))?;
    let resolved = base
        .join(location)
        .map_err(|_| UploadError::internal_error(format!("Invalid location: {location}")))?;
    Ok(resolved.to_string())
}

fn clamp_chunk_size(size: usize) -> usize {
    size.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_header_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert("Upload-Offset", HeaderValue::from_static("1048576"));
        assert_eq!(parse_offset_header(204, &headers).unwrap(), 1048576);

        let empty = HeaderMap::new();
        assert!(parse_offset_header(204, &empty).is_err());

        let mut bad = HeaderMap::new();
        bad.insert("Upload-Offset", HeaderValue::from_static("not-a-number"));
        assert!(parse_offset_header(204, &bad).is_err());
    }

    #[test]
    fn location_resolution() {
        assert_eq!(
            resolve_location("https://s.example.com/files", "https://cdn.example.com/u/1").unwrap(),
            "https://cdn.example.com/u/1"
        );
        assert_eq!(
            resolve_location("https://s.example.com/files", "/u/1").unwrap(),
            "https://s.example.com/u/1"
        );
    }

    #[test]
    fn chunk_size_clamped() {
        assert_eq!(clamp_chunk_size(1), MIN_CHUNK_SIZE);
        assert_eq!(clamp_chunk_size(5 * 1024 * 1024), 5 * 1024 * 1024);
        assert_eq!(clamp_chunk_size(usize::MAX), MAX_CHUNK_SIZE);
    }

    #[test]
    fn metadata_encoding() {
        let source = FileSource::from_path("hero.mp4".into(), 10);
        let encoded = encode_metadata(&source);
        assert!(encoded.starts_with("filename "));
        // base64("hero.mp4")
        assert!(encoded.contains(&BASE64_STANDARD.encode("hero.mp4")));
        assert!(encoded.contains("filetype "));
    }
}
