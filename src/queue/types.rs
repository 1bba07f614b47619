use std::path::PathBuf;
use serde::Serialize;
use tokio::sync::oneshot;
use uuid::Uuid;
use crate::error::Result;
use super::task::UploadTask;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// 等待中（尚未被调度）
    Pending,
    /// 上传中
    Uploading,
    /// 已暂停
    Paused,
    /// 已完成
    Completed,
    /// 失败
    Failed,
    /// 已取消
    Cancelled,
}

impl TaskStatus {
    /// 终态：不会再自动发生任何状态迁移
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// 待上传文件的来源描述
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSource {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
    pub mime: Option<String>,
}

impl FileSource {
    pub fn from_path(path: PathBuf, size: u64) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mime = path
            .extension()
            .and_then(|ext| guess_mime(&ext.to_string_lossy().to_lowercase()))
            .map(str::to_string);

        Self { path, name, size, mime }
    }

    pub fn extension(&self) -> Option<String> {
        self.path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
    }
}

/// 媒体库常见类型的扩展名映射
fn guess_mime(ext: &str) -> Option<&'static str> {
    let mime = match ext {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "psd" => "image/vnd.adobe.photoshop",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        _ => return None,
    };
    Some(mime)
}

/// 上传配置，`start_upload` 时盖到所有待上传任务上
///
/// 调度器不解释这些字段，上传完成后原样转发给目录登记接口。
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadOptions {
    pub editor_id: String,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
    pub organize_by_date: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_buyer_id: Option<String>,
    pub remove_metadata: bool,
    pub add_metadata: bool,
}

impl UploadOptions {
    pub fn new(editor_id: impl Into<String>) -> Self {
        Self {
            editor_id: editor_id.into(),
            tags: Vec::new(),
            description: None,
            folder_id: None,
            organize_by_date: false,
            assigned_buyer_id: None,
            remove_metadata: false,
            add_metadata: false,
        }
    }
}

/// 队列整体统计，广播时随快照一起重算
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub total: usize,
    pub pending: usize,
    pub uploading: usize,
    pub paused: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub total_bytes: u64,
    pub uploaded_bytes: u64,
    /// 近窗口平均速度（字节/秒），反映当前网络状况
    pub average_speed: f64,
}

/// 每次合并广播的载荷：完整任务列表（按入队顺序）+ 统计
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueSnapshot {
    pub tasks: Vec<UploadTask>,
    pub stats: QueueStats,
}

/// 上传完成的结果（传输 + 目录登记都成功）
#[derive(Debug, Clone)]
pub struct CompletedUpload {
    pub session_url: String,
    pub media_id: String,
}

/// 队列调度器命令
pub(crate) enum QueueCommand {
    /// 入队，不开始传输
    AddFiles {
        paths: Vec<PathBuf>,
        reply: oneshot::Sender<Result<Vec<TaskId>>>,
    },

    /// 盖上传配置并触发调度；所有任务进入终态后应答
    StartUpload {
        options: UploadOptions,
        done: oneshot::Sender<()>,
    },

    /// 暂停
    Pause {
        id: TaskId,
        reply: oneshot::Sender<Result<()>>,
    },

    /// 暂停所有非终态任务
    PauseAll {
        reply: oneshot::Sender<()>,
    },

    /// 恢复
    Resume {
        id: TaskId,
        reply: oneshot::Sender<Result<()>>,
    },

    /// 按入队顺序恢复所有已暂停任务
    ResumeAll {
        reply: oneshot::Sender<()>,
    },

    /// 取消（幂等）
    Cancel {
        id: TaskId,
        reply: oneshot::Sender<Result<()>>,
    },

    /// 重试失败任务
    Retry {
        id: TaskId,
        reply: oneshot::Sender<Result<()>>,
    },

    /// 移除单个任务
    Remove {
        id: TaskId,
        reply: oneshot::Sender<Result<()>>,
    },

    /// 移除所有 Completed 任务
    ClearCompleted {
        reply: oneshot::Sender<usize>,
    },

    /// 中止并移除所有任务
    ClearAll {
        reply: oneshot::Sender<usize>,
    },
}

/// 传输工作者发回调度器的内部消息
#[derive(Debug)]
pub(crate) enum TransferMsg {
    /// 远端会话已建立，记录到任务上供续传复用
    SessionOpened {
        id: TaskId,
        url: String,
    },

    /// 绝对已传字节数
    Progress {
        id: TaskId,
        uploaded: u64,
    },

    /// 传输结束（成功、失败或被取消）
    Finished {
        id: TaskId,
        result: Result<CompletedUpload>,
    },
}
