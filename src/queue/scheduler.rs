use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use crate::config::QueueConfig;
use crate::error::{Result, UploadError};
use crate::transport::{CatalogSink, StorageTransport};
use crate::utils::{format_bytes, format_duration, format_speed};
use super::stats::{compute_stats, SpeedEstimator};
use super::store::TaskStore;
use super::task::UploadTask;
use super::transfer::TransferWorker;
use super::types::{
    CompletedUpload, FileSource, QueueCommand, QueueSnapshot, TaskId, TaskStatus, TransferMsg,
    UploadOptions,
};

/// 队列调度器 actor
///
/// 独占任务表。一轮循环处理一批消息后做一次准入、一次广播，
/// 突发的进度更新因此被合并成单次通知。
pub(crate) struct QueueScheduler {
    config: QueueConfig,
    store: TaskStore,
    /// 在途传输的取消令牌；槽位在传输 future 真正结束时才释放
    active: HashMap<TaskId, CancellationToken>,
    transport: Arc<dyn StorageTransport>,
    catalog: Arc<dyn CatalogSink>,
    event_tx: broadcast::Sender<QueueSnapshot>,
    snapshot_tx: watch::Sender<QueueSnapshot>,
    transfer_tx: mpsc::UnboundedSender<TransferMsg>,
    /// `start_upload` 的等待者，全部任务进入终态时应答
    drain_waiters: Vec<oneshot::Sender<()>>,
    speed: SpeedEstimator,
    dirty: bool,
}

impl QueueScheduler {
    pub(crate) async fn run(
        config: QueueConfig,
        transport: Arc<dyn StorageTransport>,
        catalog: Arc<dyn CatalogSink>,
        mut command_rx: mpsc::Receiver<QueueCommand>,
        event_tx: broadcast::Sender<QueueSnapshot>,
        snapshot_tx: watch::Sender<QueueSnapshot>,
    ) {
        let (transfer_tx, mut transfer_rx) = mpsc::unbounded_channel();
        let mut scheduler = Self {
            config,
            store: TaskStore::new(),
            active: HashMap::new(),
            transport,
            catalog,
            event_tx,
            snapshot_tx,
            transfer_tx,
            drain_waiters: Vec::new(),
            speed: SpeedEstimator::new(),
            dirty: false,
        };

        // 主事件循环
        loop {
            tokio::select! {
                command = command_rx.recv() => match command {
                    Some(command) => scheduler.handle_command(command).await,
                    // 门面全部释放，停止调度
                    None => break,
                },
                Some(msg) = transfer_rx.recv() => scheduler.handle_transfer_msg(msg),
            }

            // 把本轮已就绪的消息一次收完，进度风暴合并成一次广播
            while let Ok(msg) = transfer_rx.try_recv() {
                scheduler.handle_transfer_msg(msg);
            }

            scheduler.admit_pending();
            scheduler.notify_drained();

            if scheduler.dirty {
                scheduler.publish();
            }
        }

        scheduler.shutdown();
    }

    async fn handle_command(&mut self, command: QueueCommand) {
        match command {
            QueueCommand::AddFiles { paths, reply } => {
                let result = self.add_files(paths).await;
                let _ = reply.send(result);
            }
            QueueCommand::StartUpload { options, done } => {
                self.start_upload(options, done);
            }
            QueueCommand::Pause { id, reply } => {
                let _ = reply.send(self.pause(id));
            }
            QueueCommand::PauseAll { reply } => {
                self.pause_all();
                let _ = reply.send(());
            }
            QueueCommand::Resume { id, reply } => {
                let _ = reply.send(self.resume(id));
            }
            QueueCommand::ResumeAll { reply } => {
                self.resume_all();
                let _ = reply.send(());
            }
            QueueCommand::Cancel { id, reply } => {
                let _ = reply.send(self.cancel(id));
            }
            QueueCommand::Retry { id, reply } => {
                let _ = reply.send(self.retry(id));
            }
            QueueCommand::Remove { id, reply } => {
                let _ = reply.send(self.remove(id));
            }
            QueueCommand::ClearCompleted { reply } => {
                let _ = reply.send(self.clear_completed());
            }
            QueueCommand::ClearAll { reply } => {
                let _ = reply.send(self.clear_all());
            }
        }
    }

    async fn add_files(&mut self, paths: Vec<PathBuf>) -> Result<Vec<TaskId>> {
        // 先整批校验，避免部分入队
        let mut sources = Vec::with_capacity(paths.len());
        for path in paths {
            let metadata = tokio::fs::metadata(&path).await?;
            if !metadata.is_file() {
                return Err(UploadError::validation(format!(
                    "not a regular file: {}",
                    path.display()
                )));
            }
            sources.push(FileSource::from_path(path, metadata.len()));
        }

        let ids: Vec<_> = sources
            .into_iter()
            .map(|source| self.store.create(source))
            .collect();

        tracing::debug!(count = ids.len(), "files enqueued");
        self.dirty = true;
        Ok(ids)
    }

    fn start_upload(&mut self, options: UploadOptions, done: oneshot::Sender<()>) {
        let unarmed = self
            .store
            .ids_in_order(|t| t.status == TaskStatus::Pending && t.options.is_none());
        for id in unarmed {
            self.store.update(id, |t| t.options = Some(options.clone()));
            self.dirty = true;
        }

        // 实际准入发生在本轮循环尾部
        self.drain_waiters.push(done);
    }

    fn pause(&mut self, id: TaskId) -> Result<()> {
        let status = self
            .store
            .get(id)
            .map(|t| t.status)
            .ok_or(UploadError::TaskNotFound(id))?;

        match status {
            // 未调度的任务直接挂起，退出准入队列
            TaskStatus::Pending => {
                self.store.update(id, |t| t.status = TaskStatus::Paused);
                self.dirty = true;
                Ok(())
            }
            TaskStatus::Uploading => {
                if let Some(token) = self.active.get(&id) {
                    token.cancel();
                }
                // 已传字节保留，恢复时从断点继续
                self.store.update(id, |t| t.status = TaskStatus::Paused);
                tracing::debug!(%id, "upload paused");
                self.dirty = true;
                Ok(())
            }
            TaskStatus::Paused => Ok(()),
            state => Err(UploadError::InvalidState { action: "pause", state }),
        }
    }

    fn resume(&mut self, id: TaskId) -> Result<()> {
        let status = self
            .store
            .get(id)
            .map(|t| t.status)
            .ok_or(UploadError::TaskNotFound(id))?;

        match status {
            TaskStatus::Paused => {
                // 回到准入队列（保留原入队序号），有空槽时本轮尾部立即上行
                self.store.update(id, |t| t.status = TaskStatus::Pending);
                self.dirty = true;
                Ok(())
            }
            TaskStatus::Pending | TaskStatus::Uploading => Ok(()),
            state => Err(UploadError::InvalidState { action: "resume", state }),
        }
    }

    fn cancel(&mut self, id: TaskId) -> Result<()> {
        let task = self.store.get(id).ok_or(UploadError::TaskNotFound(id))?;

        // 终态任务上的取消是幂等空操作
        if task.is_terminal() {
            return Ok(());
        }

        if let Some(token) = self.active.get(&id) {
            token.cancel();
        }
        self.store.update(id, |t| t.mark_cancelled());
        tracing::debug!(%id, "upload cancelled");
        self.dirty = true;
        Ok(())
    }

    fn retry(&mut self, id: TaskId) -> Result<()> {
        let task = self.store.get(id).ok_or(UploadError::TaskNotFound(id))?;

        if task.status != TaskStatus::Failed {
            return Err(UploadError::InvalidState { action: "retry", state: task.status });
        }
        if !task.retryable {
            return Err(UploadError::validation(format!(
                "task {id} failed permanently and cannot be retried"
            )));
        }

        self.store.update(id, |t| {
            t.status = TaskStatus::Pending;
            t.error = None;
            t.finished_at = None;
            t.attempt += 1;
        });
        tracing::debug!(%id, "retry requested");
        self.dirty = true;
        Ok(())
    }

    fn remove(&mut self, id: TaskId) -> Result<()> {
        if let Some(token) = self.active.get(&id) {
            token.cancel();
        }

        match self.store.remove(id) {
            Some(task) => {
                tracing::debug!(%id, file = %task.source.name, "task removed");
                self.dirty = true;
                Ok(())
            }
            None => Err(UploadError::TaskNotFound(id)),
        }
    }

    fn pause_all(&mut self) {
        let ids = self
            .store
            .ids_in_order(|t| matches!(t.status, TaskStatus::Pending | TaskStatus::Uploading));
        for id in ids {
            let _ = self.pause(id);
        }
    }

    fn resume_all(&mut self) {
        // 按入队顺序恢复，先入队者先被重新准入
        let ids = self.store.ids_in_order(|t| t.status == TaskStatus::Paused);
        for id in ids {
            let _ = self.resume(id);
        }
    }

    fn clear_completed(&mut self) -> usize {
        let removed = self.store.remove_where(|t| t.status == TaskStatus::Completed);
        if removed > 0 {
            self.dirty = true;
        }
        removed
    }

    fn clear_all(&mut self) -> usize {
        for token in self.active.values() {
            token.cancel();
        }
        let removed = self.store.remove_where(|_| true);
        if removed > 0 {
            self.dirty = true;
        }
        removed
    }

    fn handle_transfer_msg(&mut self, msg: TransferMsg) {
        match msg {
            TransferMsg::SessionOpened { id, url } => {
                if self.store.update(id, |t| t.session_url = Some(url)) {
                    self.dirty = true;
                }
            }
            TransferMsg::Progress { id, uploaded } => {
                let Some(task) = self.store.get(id) else { return };
                // 迟到或乱序的进度直接丢弃，uploaded_bytes 单调不减
                if task.status != TaskStatus::Uploading || uploaded <= task.uploaded_bytes {
                    return;
                }

                let delta = uploaded.min(task.total_bytes) - task.uploaded_bytes;
                self.store.update(id, |t| t.set_uploaded(uploaded));
                self.speed.record(delta);
                self.dirty = true;
            }
            TransferMsg::Finished { id, result } => {
                self.on_transfer_finished(id, result);
            }
        }
    }

    fn on_transfer_finished(&mut self, id: TaskId, result: Result<CompletedUpload>) {
        // 槽位在这里释放，无论任务结局如何
        self.active.remove(&id);

        let Some(task) = self.store.get(id) else {
            // 任务已被移除
            return;
        };

        // 暂停/取消发生在传输收尾之前，迟到的结果作废
        if task.status != TaskStatus::Uploading {
            return;
        }

        let total_bytes = task.total_bytes;
        let uploaded_bytes = task.uploaded_bytes;

        match result {
            Ok(done) => {
                // 补记末尾未经进度回调确认的字节
                self.speed.record(total_bytes - uploaded_bytes);
                self.store
                    .update(id, |t| t.mark_completed(done.session_url, done.media_id));

                let elapsed = self
                    .store
                    .get(id)
                    .and_then(|t| t.started_at.zip(t.finished_at))
                    .map(|(started, finished)| (finished - started).to_std().unwrap_or_default())
                    .unwrap_or_default();
                let average = if elapsed.as_secs_f64() > 0.0 {
                    total_bytes as f64 / elapsed.as_secs_f64()
                } else {
                    0.0
                };
                tracing::info!(
                    %id,
                    size = %format_bytes(total_bytes),
                    took = %format_duration(elapsed),
                    speed = %format_speed(average),
                    "upload completed"
                );
            }
            Err(UploadError::Cancelled) => {
                // 关停路径：令牌被取消但状态仍停在 Uploading
                self.store.update(id, |t| t.mark_cancelled());
            }
            Err(err) => {
                let retryable = err.is_retryable();
                tracing::warn!(%id, retryable, "upload failed: {err}");
                self.store.update(id, |t| t.mark_failed(err.to_string(), retryable));
            }
        }

        self.dirty = true;
    }

    /// 在并发上限内按 FIFO 填满传输槽位
    fn admit_pending(&mut self) {
        while self.active.len() < self.config.concurrency {
            let Some(id) = self
                .store
                .next_eligible(|id| self.active.contains_key(&id))
            else {
                break;
            };
            self.admit(id);
        }
    }

    fn admit(&mut self, id: TaskId) {
        let Some(task) = self.store.get(id).cloned() else { return };

        // 传输开始前的本地校验，不占用并发槽位
        if let Err(err) = self.validate(&task) {
            tracing::warn!(%id, file = %task.source.name, "rejected before transfer: {err}");
            self.store.update(id, |t| t.mark_failed(err.to_string(), false));
            self.dirty = true;
            return;
        }

        let cancel = CancellationToken::new();
        self.active.insert(id, cancel.clone());
        self.store.update(id, |t| {
            t.status = TaskStatus::Uploading;
            if t.attempt == 0 {
                t.attempt = 1;
            }
            if t.started_at.is_none() {
                t.started_at = Some(chrono::Utc::now());
            }
            t.error = None;
        });
        self.dirty = true;
        tracing::debug!(%id, file = %task.source.name, attempt = task.attempt.max(1), "admitted");

        let worker = TransferWorker {
            transport: self.transport.clone(),
            catalog: self.catalog.clone(),
            events: self.transfer_tx.clone(),
            resume: self.config.resume,
        };
        let events = self.transfer_tx.clone();

        tokio::spawn(async move {
            let result = tokio::select! {
                result = worker.run(task) => result,
                _ = cancel.cancelled() => Err(UploadError::Cancelled),
            };
            let _ = events.send(TransferMsg::Finished { id, result });
        });
    }

    fn validate(&self, task: &UploadTask) -> Result<()> {
        if let Some(limit) = self.config.max_file_size {
            if task.total_bytes > limit {
                return Err(UploadError::validation(format!(
                    "file {} is {}, over the {} limit",
                    task.source.name,
                    format_bytes(task.total_bytes),
                    format_bytes(limit),
                )));
            }
        }

        if let Some(accept) = &self.config.accept {
            let ext = task.source.extension().unwrap_or_default();
            if !accept.iter().any(|a| a.eq_ignore_ascii_case(&ext)) {
                return Err(UploadError::validation(format!(
                    "file type '{ext}' is not accepted"
                )));
            }
        }

        Ok(())
    }

    fn notify_drained(&mut self) {
        if self.drain_waiters.is_empty() || !self.store.all_settled() {
            return;
        }
        for waiter in self.drain_waiters.drain(..) {
            let _ = waiter.send(());
        }
    }

    /// 一轮一次的合并广播：完整任务列表 + 重算的统计
    fn publish(&mut self) {
        let snapshot = QueueSnapshot {
            tasks: self.store.all(),
            stats: compute_stats(&self.store, self.speed.current()),
        };

        let _ = self.snapshot_tx.send(snapshot.clone());
        // 没有订阅者时发送失败是正常情况
        let _ = self.event_tx.send(snapshot);
        self.dirty = false;
    }

    fn shutdown(&mut self) {
        for token in self.active.values() {
            token.cancel();
        }
        tracing::debug!("upload queue scheduler stopped");
    }
}
