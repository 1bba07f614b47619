use std::path::Path;
use std::time::Duration;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

/// 恢复上传时的起点策略
///
/// 分块传输总是可以续传；整文件传输取决于服务端是否保留已收字节。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResumeMode {
    /// 先向服务端查询已确认的偏移量，从偏移量继续
    Ranged,
    /// 从零重新上传
    Restart,
}

/// 队列行为配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// 最大并发上传数
    pub concurrency: usize,

    /// 分块大小（字节）
    pub chunk_size: usize,

    /// 单文件大小上限，超过直接判定失败（不重试）
    pub max_file_size: Option<u64>,

    /// 允许的扩展名（小写，不带点）；None 表示不限制
    pub accept: Option<Vec<String>>,

    /// 单个分块失败后的自动重试次数
    pub chunk_retries: u32,

    /// 分块重试的初始退避间隔
    #[serde(with = "duration_secs")]
    pub retry_delay: Duration,

    pub resume: ResumeMode,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            chunk_size: 5 * 1024 * 1024, // 5MB
            max_file_size: None,
            accept: None,
            chunk_retries: 3,
            retry_delay: Duration::from_secs(1),
            resume: ResumeMode::Ranged,
        }
    }
}

/// 存储与目录服务端点配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// 存储端点（创建上传会话）
    pub endpoint: String,

    /// 目录登记端点（上传完成后创建媒体记录）
    pub catalog_endpoint: String,

    /// Bearer token
    pub token: Option<String>,

    /// 请求超时（秒）
    pub timeout: u64,

    pub tcp_nodelay: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            catalog_endpoint: String::new(),
            token: None,
            timeout: 30,
            tcp_nodelay: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UplinkConfig {
    pub queue: QueueConfig,
    pub transport: TransportConfig,
}

impl UplinkConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }
}

mod duration_secs {
    use std::time::Duration;
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(de)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.chunk_size, 5 * 1024 * 1024);
        assert_eq!(config.resume, ResumeMode::Ranged);
    }

    #[test]
    fn load_from_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            [queue]
            concurrency = 5
            chunk_size = 1048576
            max_file_size = 10737418240
            accept = ["jpg", "mp4"]
            resume = "restart"

            [transport]
            endpoint = "https://storage.example.com/files"
            catalog_endpoint = "https://api.example.com/media"
            timeout = 60
            "#
        )
        .unwrap();

        let config = UplinkConfig::from_file(file.path()).unwrap();
        assert_eq!(config.queue.concurrency, 5);
        assert_eq!(config.queue.resume, ResumeMode::Restart);
        assert_eq!(config.queue.accept.as_deref(), Some(&["jpg".to_string(), "mp4".to_string()][..]));
        assert_eq!(config.transport.timeout, 60);
        // 未出现的字段使用默认值
        assert_eq!(config.queue.chunk_retries, 3);
    }
}
