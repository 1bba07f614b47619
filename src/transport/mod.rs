mod http;
mod stream;
mod catalog;

use std::sync::Arc;
use async_trait::async_trait;
use crate::error::Result;
use crate::queue::{FileSource, UploadOptions};

pub use http::{HttpStorageClient, TransferMode};
pub use stream::ProgressStream;
pub use catalog::HttpCatalog;

/// 绝对已传字节数回调
pub type ProgressFn = Arc<dyn Fn(u64) + Send + Sync>;

/// 存储端传输适配器
///
/// 实现者只负责搬运字节，不碰任务表；取消由调度器丢弃
/// 传输 future 实现，丢失的工作量最多一个分块。
#[async_trait]
pub trait StorageTransport: Send + Sync {
    /// 为一个文件创建远端传输会话，返回会话 URL
    async fn create_session(&self, source: &FileSource) -> Result<String>;

    /// 服务端已确认的字节偏移量
    async fn offset(&self, session_url: &str) -> Result<u64>;

    /// 从 `offset` 开始传输到文件末尾，通过 `progress` 上报绝对偏移
    async fn transfer(
        &self,
        session_url: &str,
        source: &FileSource,
        offset: u64,
        progress: ProgressFn,
    ) -> Result<()>;
}

/// 目录登记：传输成功后把上传物登记成媒体记录
#[async_trait]
pub trait CatalogSink: Send + Sync {
    /// 返回媒体记录 id
    async fn register(
        &self,
        source: &FileSource,
        session_url: &str,
        options: &UploadOptions,
    ) -> Result<String>;
}
