use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use crate::config::{QueueConfig, UplinkConfig};
use crate::error::{Result, UploadError};
use crate::transport::{CatalogSink, HttpCatalog, HttpStorageClient, StorageTransport};
use super::scheduler::QueueScheduler;
use super::task::UploadTask;
use super::types::{QueueCommand, QueueSnapshot, QueueStats, TaskId, UploadOptions};

/// 上传队列门面，外部代码只接触这一层
///
/// 可克隆；所有变更操作都走命令通道由调度器 actor 串行执行，
/// 读取走 watch 通道，同步拿到最近一次广播的快照。
#[derive(Clone)]
pub struct UploadQueue {
    command_tx: mpsc::Sender<QueueCommand>,
    event_tx: broadcast::Sender<QueueSnapshot>,
    snapshot_rx: watch::Receiver<QueueSnapshot>,
}

/// 队列句柄 - 包含门面和调度器任务
pub struct UploadQueueHandle {
    pub queue: UploadQueue,
    pub worker_handle: JoinHandle<()>,
}

impl UploadQueueHandle {
    /// 放下门面、取消在途传输并等调度器退出
    pub async fn shutdown(self) -> Result<()> {
        drop(self.queue);
        self.worker_handle
            .await
            .map_err(|err| UploadError::internal_error(format!("Scheduler panic: {err}")))
    }
}

impl UploadQueue {
    pub fn new(
        config: QueueConfig,
        transport: Arc<dyn StorageTransport>,
        catalog: Arc<dyn CatalogSink>,
    ) -> UploadQueueHandle {
        let (command_tx, command_rx) = mpsc::channel(100);
        // 最大缓存 256 个快照
        let (event_tx, _) = broadcast::channel(256);
        let (snapshot_tx, snapshot_rx) = watch::channel(QueueSnapshot::default());

        let worker_handle = tokio::spawn(QueueScheduler::run(
            config,
            transport,
            catalog,
            command_rx,
            event_tx.clone(),
            snapshot_tx,
        ));

        let queue = Self {
            command_tx,
            event_tx,
            snapshot_rx,
        };

        UploadQueueHandle {
            queue,
            worker_handle,
        }
    }

    /// 用 HTTP 存储端点和目录服务组装队列
    pub fn with_http(config: UplinkConfig) -> Result<UploadQueueHandle> {
        let transport = Arc::new(HttpStorageClient::new(&config.transport, &config.queue)?);
        let catalog = Arc::new(HttpCatalog::new(&config.transport)?);
        Ok(Self::new(config.queue, transport, catalog))
    }

    /// 入队若干文件，不开始传输
    pub async fn add_files(&self, paths: Vec<PathBuf>) -> Result<Vec<TaskId>> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.command_tx
            .send(QueueCommand::AddFiles { paths, reply: reply_tx })
            .await
            .map_err(|_| UploadError::QueueClosed)?;

        reply_rx.await.map_err(|_| UploadError::QueueClosed)?
    }

    pub async fn add_file(&self, path: impl Into<PathBuf>) -> Result<TaskId> {
        let ids = self.add_files(vec![path.into()]).await?;
        ids.into_iter()
            .next()
            .ok_or_else(|| UploadError::internal_error("empty task id list"))
    }

    /// 把上传配置盖到所有未配置的待传任务上并触发调度
    ///
    /// 任务之间彼此独立，单个失败不会中断其它任务；
    /// 所有任务进入终态后才返回，成败要看 `stats().failed`。
    pub async fn start_upload(&self, options: UploadOptions) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();

        self.command_tx
            .send(QueueCommand::StartUpload { options, done: done_tx })
            .await
            .map_err(|_| UploadError::QueueClosed)?;

        done_rx.await.map_err(|_| UploadError::QueueClosed)
    }

    /// Pause upload task
    pub async fn pause_upload(&self, id: TaskId) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.command_tx
            .send(QueueCommand::Pause { id, reply: reply_tx })
            .await
            .map_err(|_| UploadError::QueueClosed)?;

        reply_rx.await.map_err(|_| UploadError::QueueClosed)?
    }

    /// 暂停所有非终态任务
    pub async fn pause_all(&self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.command_tx
            .send(QueueCommand::PauseAll { reply: reply_tx })
            .await
            .map_err(|_| UploadError::QueueClosed)?;

        reply_rx.await.map_err(|_| UploadError::QueueClosed)
    }

    /// Resume upload task
    pub async fn resume_upload(&self, id: TaskId) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.command_tx
            .send(QueueCommand::Resume { id, reply: reply_tx })
            .await
            .map_err(|_| UploadError::QueueClosed)?;

        reply_rx.await.map_err(|_| UploadError::QueueClosed)?
    }

    /// 按入队顺序恢复所有已暂停任务
    pub async fn resume_all(&self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.command_tx
            .send(QueueCommand::ResumeAll { reply: reply_tx })
            .await
            .map_err(|_| UploadError::QueueClosed)?;

        reply_rx.await.map_err(|_| UploadError::QueueClosed)
    }

    /// Cancel upload task（幂等）
    pub async fn cancel_upload(&self, id: TaskId) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.command_tx
            .send(QueueCommand::Cancel { id, reply: reply_tx })
            .await
            .map_err(|_| UploadError::QueueClosed)?;

        reply_rx.await.map_err(|_| UploadError::QueueClosed)?
    }

    /// 重试失败任务
    pub async fn retry_upload(&self, id: TaskId) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.command_tx
            .send(QueueCommand::Retry { id, reply: reply_tx })
            .await
            .map_err(|_| UploadError::QueueClosed)?;

        reply_rx.await.map_err(|_| UploadError::QueueClosed)?
    }

    /// 移除单个任务，在途传输会被中止
    pub async fn remove_task(&self, id: TaskId) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.command_tx
            .send(QueueCommand::Remove { id, reply: reply_tx })
            .await
            .map_err(|_| UploadError::QueueClosed)?;

        reply_rx.await.map_err(|_| UploadError::QueueClosed)?
    }

    /// 移除所有已完成任务，返回移除数量
    pub async fn clear_completed(&self) -> Result<usize> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.command_tx
            .send(QueueCommand::ClearCompleted { reply: reply_tx })
            .await
            .map_err(|_| UploadError::QueueClosed)?;

        reply_rx.await.map_err(|_| UploadError::QueueClosed)
    }

    /// 中止并移除所有任务，返回移除数量
    pub async fn clear_all(&self) -> Result<usize> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.command_tx
            .send(QueueCommand::ClearAll { reply: reply_tx })
            .await
            .map_err(|_| UploadError::QueueClosed)?;

        reply_rx.await.map_err(|_| UploadError::QueueClosed)
    }

    /// 当前快照（同步，取最近一次广播的状态）
    ///
    /// 新订阅者先读快照再消费广播，就不会错过注册前的状态。
    pub fn snapshot(&self) -> QueueSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    pub fn tasks(&self) -> Vec<UploadTask> {
        self.snapshot_rx.borrow().tasks.clone()
    }

    pub fn stats(&self) -> QueueStats {
        self.snapshot_rx.borrow().stats.clone()
    }

    pub fn is_uploading(&self) -> bool {
        self.snapshot_rx.borrow().stats.uploading > 0
    }

    /// 订阅合并广播
    ///
    /// 注意：
    /// - 每次广播都携带完整任务列表和统计
    /// - 接收跟不上时会丢失中间快照（lagged error），丢弃后继续收即可
    /// - 丢掉 Receiver 即取消订阅
    pub fn subscribe(&self) -> broadcast::Receiver<QueueSnapshot> {
        self.event_tx.subscribe()
    }
}
