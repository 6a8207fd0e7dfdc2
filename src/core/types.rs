use std::collections::HashMap;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;
use super::errors::Result;
use super::task::{FileRef, TaskError, UploadTask};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct UploadId(Uuid);

impl UploadId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UploadId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UploadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    /// 等待中（已入队，未占用并发槽位）
    Pending,
    /// 上传中
    Uploading,
    /// 已完成
    Success,
    /// 失败
    Failed,
    /// 已取消
    Cancelled,
}

impl UploadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Cancelled)
    }

    /// `Failed -> Pending` 不在这里：重试会创建新的任务
    pub fn can_transition_to(self, next: UploadStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Uploading)
                | (Self::Pending, Self::Cancelled)
                | (Self::Uploading, Self::Success)
                | (Self::Uploading, Self::Failed)
                | (Self::Uploading, Self::Cancelled)
        )
    }
}

/// 发布给观察者的单个任务进度快照
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileUploadProgress {
    pub upload_id: UploadId,
    pub file_name: String,
    pub status: UploadStatus,
    pub uploaded_bytes: u64,
    pub total_bytes: u64,
    pub progress_ratio: f64,
    pub speed: f64,
    pub speed_text: String,
    pub eta_text: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub enum UploadEvent {
    /// 新任务入队
    TaskAdded {
        upload_id: UploadId,
        content_hash: String,
    },

    /// 任务状态变更
    StateChanged {
        upload_id: UploadId,
        old_status: UploadStatus,
        new_status: UploadStatus,
    },

    /// 进度更新
    Progress(FileUploadProgress),

    /// 任务失败
    Failed {
        upload_id: UploadId,
        error: TaskError,
    },

    /// 任务完成
    Completed {
        upload_id: UploadId,
        remote: Option<String>,
    },

    /// 失败任务以新任务重试
    Retried {
        previous: UploadId,
        upload_id: UploadId,
        attempt: u32,
    },
}

impl UploadEvent {
    pub fn upload_id(&self) -> UploadId {
        match self {
            Self::TaskAdded { upload_id, .. }
            | Self::StateChanged { upload_id, .. }
            | Self::Failed { upload_id, .. }
            | Self::Completed { upload_id, .. }
            | Self::Retried { upload_id, .. } => *upload_id,
            Self::Progress(progress) => progress.upload_id,
        }
    }
}

/// 上传管理器命令
pub enum ManagerCommand {
    /// 添加上传任务（内容哈希已由调用方计算）
    Enqueue {
        file: FileRef,
        content_hash: String,
        metadata: HashMap<String, String>,
        reply: oneshot::Sender<Result<UploadId>>,
    },

    /// 排队等待并发槽位
    Start {
        upload_id: UploadId,
        reply: oneshot::Sender<Result<()>>,
    },

    /// 取消
    Cancel {
        upload_id: UploadId,
        reply: oneshot::Sender<Result<()>>,
    },

    /// 取消所有未结束的任务
    CancelAll {
        reply: oneshot::Sender<usize>,
    },

    /// 重试失败的任务
    Retry {
        upload_id: UploadId,
        reply: oneshot::Sender<Result<UploadId>>,
    },

    /// 获取任务信息
    GetTask {
        upload_id: UploadId,
        reply: oneshot::Sender<Option<UploadTask>>,
    },

    /// 获取所有任务
    GetAllTasks {
        reply: oneshot::Sender<Vec<UploadTask>>,
    },

    /// 清除所有已结束的任务
    Clean {
        reply: oneshot::Sender<usize>,
    },

    /// 停止工作循环
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// 最大并发数
    pub concurrent: usize,

    /// 无进度超时，超过后任务失败
    pub inactivity_timeout: Duration,

    /// 入队后自动排队上传
    pub auto_start: bool,

    /// 单文件大小上限
    pub max_file_size: Option<u64>,

    /// 允许的 MIME 类型，支持 `image/*`，为空时不限制
    pub allowed_mime_types: Vec<String>,

    /// 每个任务保留的进度采样数
    pub sample_window: usize,

    /// 事件通道容量
    pub event_capacity: usize,
}

impl UploadConfig {
    /// 超时检查的间隔
    pub fn inactivity_check_interval(&self) -> Duration {
        (self.inactivity_timeout / 4).max(Duration::from_millis(100))
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            concurrent: 3,
            inactivity_timeout: Duration::from_secs(60),
            auto_start: true,
            max_file_size: Some(2 * 1024 * 1024 * 1024), // 2GB
            allowed_mime_types: Vec::new(),
            sample_window: crate::utils::progress::DEFAULT_WINDOW,
            event_capacity: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(!UploadStatus::Pending.is_terminal());
        assert!(!UploadStatus::Uploading.is_terminal());
        assert!(UploadStatus::Success.is_terminal());
        assert!(UploadStatus::Failed.is_terminal());
        assert!(UploadStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_transitions() {
        use UploadStatus::*;

        assert!(Pending.can_transition_to(Uploading));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Uploading.can_transition_to(Failed));
        assert!(!Uploading.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(Pending));
        assert!(!Success.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Uploading));
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&UploadStatus::Uploading).unwrap();
        assert_eq!(json, "\"uploading\"");
    }
}
