use thiserror::Error;
use super::types::{UploadId, UploadStatus};

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Duplicate upload: content {content_hash} is already being uploaded by task {existing}")]
    Duplicate {
        content_hash: String,
        existing: UploadId,
    },

    #[error("Task not found: {0}")]
    TaskNotFound(UploadId),

    #[error("Invalid transition for task {upload_id}: {from:?} -> {to:?}")]
    InvalidTransition {
        upload_id: UploadId,
        from: UploadStatus,
        to: UploadStatus,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Manager shut down")]
    ManagerShutdown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl UploadError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

/// 入队前的文件校验错误，出错时不会创建任务
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{name}: file is empty")]
    Empty { name: String },

    #[error("{name}: file size {size} exceeds the limit of {max} bytes")]
    TooLarge {
        name: String,
        size: u64,
        max: u64,
    },

    #[error("{name}: file type {mime_type} is not allowed")]
    UnsupportedType {
        name: String,
        mime_type: String,
    },
}

/// Error alias
pub type Result<T, E = UploadError> = std::result::Result<T, E>;
