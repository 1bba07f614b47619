use serde::Serialize;
use super::types::{FileSource, TaskId, TaskStatus, UploadOptions};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTask {
    pub id: TaskId,
    pub source: FileSource,
    pub status: TaskStatus,
    /// 0-100，上传中单调不减，其余状态下冻结
    pub progress: u8,
    pub uploaded_bytes: u64,
    pub total_bytes: u64,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
    /// 仅在 Failed 状态下存在
    pub error: Option<String>,
    /// false 表示校验失败或服务端永久拒绝，重试会被拒绝
    pub retryable: bool,
    pub options: Option<UploadOptions>,
    /// 第几次进入上传，重试时递增
    pub attempt: u32,
    /// 远端传输会话，暂停/恢复/重试之间复用
    pub session_url: Option<String>,
    /// 目录登记生成的媒体记录 id
    pub media_id: Option<String>,
    /// 入队序号，调度的 FIFO 依据
    #[serde(skip)]
    pub(crate) seq: u64,
}

impl UploadTask {
    pub(crate) fn new(source: FileSource, seq: u64) -> Self {
        let total_bytes = source.size;
        Self {
            id: TaskId::new(),
            source,
            status: TaskStatus::Pending,
            progress: 0,
            uploaded_bytes: 0,
            total_bytes,
            created_at: chrono::Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
            retryable: true,
            options: None,
            attempt: 0,
            session_url: None,
            media_id: None,
            seq,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// 进度百分比，四舍五入
    pub(crate) fn progress_for(uploaded: u64, total: u64) -> u8 {
        if total == 0 {
            return 0;
        }
        let pct = (uploaded as f64 / total as f64 * 100.0).round();
        pct.min(100.0) as u8
    }

    pub(crate) fn set_uploaded(&mut self, uploaded: u64) {
        self.uploaded_bytes = uploaded.min(self.total_bytes);
        self.progress = Self::progress_for(self.uploaded_bytes, self.total_bytes);
    }

    pub(crate) fn mark_completed(&mut self, session_url: String, media_id: String) {
        self.uploaded_bytes = self.total_bytes;
        self.progress = 100;
        self.status = TaskStatus::Completed;
        self.session_url = Some(session_url);
        self.media_id = Some(media_id);
        self.error = None;
        self.finished_at = Some(chrono::Utc::now());
    }

    pub(crate) fn mark_failed(&mut self, error: String, retryable: bool) {
        self.status = TaskStatus::Failed;
        self.error = Some(error);
        self.retryable = retryable;
        self.finished_at = Some(chrono::Utc::now());
    }

    pub(crate) fn mark_cancelled(&mut self) {
        self.status = TaskStatus::Cancelled;
        // 用户主动操作不算错误
        self.error = None;
        self.finished_at = Some(chrono::Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn task(size: u64) -> UploadTask {
        let source = FileSource::from_path(PathBuf::from("clip.mp4"), size);
        UploadTask::new(source, 0)
    }

    #[test]
    fn progress_rounding() {
        assert_eq!(UploadTask::progress_for(0, 100), 0);
        assert_eq!(UploadTask::progress_for(1, 3), 33);
        assert_eq!(UploadTask::progress_for(2, 3), 67);
        assert_eq!(UploadTask::progress_for(100, 100), 100);
        // 空文件在终态前视为 0%
        assert_eq!(UploadTask::progress_for(0, 0), 0);
    }

    #[test]
    fn uploaded_bytes_clamped_to_total() {
        let mut t = task(10);
        t.set_uploaded(15);
        assert_eq!(t.uploaded_bytes, 10);
        assert_eq!(t.progress, 100);
    }

    #[test]
    fn cancel_clears_error() {
        let mut t = task(10);
        t.mark_failed("boom".into(), true);
        t.mark_cancelled();
        assert_eq!(t.status, TaskStatus::Cancelled);
        assert!(t.error.is_none());
        assert!(t.finished_at.is_some());
    }

    #[test]
    fn mime_guess_from_extension() {
        let source = FileSource::from_path(PathBuf::from("photos/IMG_0042.JPG"), 1);
        assert_eq!(source.mime.as_deref(), Some("image/jpeg"));
        let source = FileSource::from_path(PathBuf::from("notes.xyz"), 1);
        assert!(source.mime.is_none());
    }
}
