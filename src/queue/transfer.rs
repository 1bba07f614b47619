use std::sync::Arc;
use tokio::sync::mpsc;
use crate::config::ResumeMode;
use crate::error::{Result, UploadError};
use crate::transport::{CatalogSink, ProgressFn, StorageTransport};
use super::task::UploadTask;
use super::types::{CompletedUpload, TransferMsg};

/// 单个任务的传输执行体
///
/// 只通过内部消息通道跟调度器说话，从不直接碰任务表。
/// 取消由调度器在 spawn 处用 select + CancellationToken 实现，
/// future 被丢弃时在途请求一并中止。
pub(crate) struct TransferWorker {
    pub(crate) transport: Arc<dyn StorageTransport>,
    pub(crate) catalog: Arc<dyn CatalogSink>,
    pub(crate) events: mpsc::UnboundedSender<TransferMsg>,
    pub(crate) resume: ResumeMode,
}

impl TransferWorker {
    pub(crate) async fn run(self, task: UploadTask) -> Result<CompletedUpload> {
        let id = task.id;

        // 复用已有会话（暂停/重试），否则新建
        let session_url = match &task.session_url {
            Some(url) => url.clone(),
            None => {
                let url = self.transport.create_session(&task.source).await?;
                let _ = self.events.send(TransferMsg::SessionOpened { id, url: url.clone() });
                url
            }
        };

        let offset = match self.resume {
            ResumeMode::Ranged => self.transport.offset(&session_url).await?,
            ResumeMode::Restart => 0,
        };

        if offset < task.total_bytes {
            let events = self.events.clone();
            let progress: ProgressFn = Arc::new(move |uploaded| {
                let _ = events.send(TransferMsg::Progress { id, uploaded });
            });

            // 续传起点先上报一次
            if offset > 0 {
                (progress)(offset);
            }

            self.transport
                .transfer(&session_url, &task.source, offset, progress)
                .await?;
        }

        // 字节都到齐了，再去目录登记
        let options = task
            .options
            .as_ref()
            .ok_or_else(|| UploadError::internal_error("task admitted without upload options"))?;
        let media_id = self.catalog.register(&task.source, &session_url, options).await?;

        Ok(CompletedUpload { session_url, media_id })
    }
}
