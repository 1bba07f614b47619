use thiserror::Error;

use crate::queue::types::{TaskId, TaskStatus};

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("HTTP Request error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Server error: status code {status_code}, message: {message}")]
    ServerError {
        status_code: u16,
        message: String,
        /// 永久性拒绝（例如配额超限），不可重试
        permanent: bool,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Upload incomplete expected: {expected}, actual: {actual}")]
    UploadIncomplete {
        expected: u64,
        actual: u64,
    },

    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] reqwest::header::InvalidHeaderValue),

    #[error("Upload was cancelled")]
    Cancelled,

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Cannot {action} task in state {state:?}")]
    InvalidState {
        action: &'static str,
        state: TaskStatus,
    },

    #[error("Upload queue shut down")]
    QueueClosed,

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl UploadError {
    pub fn server_error(status_code: u16, message: impl Into<String>) -> Self {
        Self::ServerError {
            status_code,
            message: message.into(),
            permanent: is_permanent_status(status_code),
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// 判断错误是否值得重试
    ///
    /// 网络/IO 错误视为瞬时错误；服务端错误取决于状态码；
    /// 校验失败与用户取消永远不重试。
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::HttpError(_) | Self::IoError(_) | Self::UploadIncomplete { .. } => true,
            Self::ServerError { permanent, .. } => !permanent,
            _ => false,
        }
    }
}

/// 4xx 除了 408/429 都视为永久性拒绝，5xx 视为瞬时错误
pub(crate) fn is_permanent_status(status_code: u16) -> bool {
    match status_code {
        408 | 429 => false,
        400..=499 => true,
        _ => false,
    }
}

/// Error alias
pub type Result<T, E = UploadError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanent_status_classification() {
        assert!(is_permanent_status(403));
        assert!(is_permanent_status(413));
        assert!(!is_permanent_status(408));
        assert!(!is_permanent_status(429));
        assert!(!is_permanent_status(500));
        assert!(!is_permanent_status(503));
    }

    #[test]
    fn retryable_matrix() {
        assert!(UploadError::server_error(500, "oops").is_retryable());
        assert!(!UploadError::server_error(413, "too large").is_retryable());
        assert!(!UploadError::validation("bad type").is_retryable());
        assert!(!UploadError::Cancelled.is_retryable());
        assert!(UploadError::UploadIncomplete { expected: 10, actual: 4 }.is_retryable());
    }
}
