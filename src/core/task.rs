use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use crate::utils::classifier::{classify_transfer_failure, user_message, TIMEOUT_CODE};
use crate::utils::progress::{self, ProgressSample, ProgressSnapshot, SampleWindow};
use super::errors::{Result, UploadError};
use super::traits::TransferFailure;
use super::types::{FileUploadProgress, UploadId, UploadStatus};
use super::validation::guess_mime_type;

/// 上传内容的来源
#[derive(Debug, Clone)]
pub enum FileSource {
    Path(PathBuf),
    Memory(Bytes),
}

/// 待上传文件，创建后名称、大小、类型不再变化
#[derive(Debug, Clone, Serialize)]
pub struct FileRef {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    #[serde(skip)]
    pub source: FileSource,
}

impl FileRef {
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(UploadError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("Not a file: {}", path.display()),
            )));
        }

        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Ok(Self {
            mime_type: guess_mime_type(&name),
            name,
            size: metadata.len(),
            source: FileSource::Path(path.to_path_buf()),
        })
    }

    pub fn from_bytes(name: impl Into<String>, mime_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            name: name.into(),
            size: data.len() as u64,
            mime_type: mime_type.into(),
            source: FileSource::Memory(data),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskErrorKind {
    Transfer,
    Timeout,
}

/// 失败任务附带的错误，`code` 由错误分类得到
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("{message}")]
pub struct TaskError {
    pub kind: TaskErrorKind,
    pub code: Option<String>,
    pub message: String,
}

impl TaskError {
    pub fn from_failure(failure: &TransferFailure) -> Self {
        let code = classify_transfer_failure(failure);
        Self {
            kind: TaskErrorKind::Transfer,
            message: user_message(code.as_deref(), &failure.to_string()),
            code,
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self {
            kind: TaskErrorKind::Timeout,
            code: Some(TIMEOUT_CODE.to_string()),
            message: format!("No upload progress for {}s", after.as_secs()),
        }
    }
}

/// 任务持有的取消句柄，只暴露 `cancel` / `is_cancelled`
#[derive(Debug, Clone, Default)]
pub struct CancellationHandle {
    token: CancellationToken,
}

impl CancellationHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// 可重复调用
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// 传给传输层的中止信号
    pub(crate) fn signal(&self) -> CancellationToken {
        self.token.clone()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadTask {
    pub id: UploadId,
    pub attempt: u32,
    pub file: FileRef,
    pub content_hash: String,
    pub status: UploadStatus,
    pub uploaded_bytes: u64,
    pub progress_ratio: f64,
    pub progress: ProgressSnapshot,
    pub error: Option<TaskError>,
    pub metadata: HashMap<String, String>,
    pub remote: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub last_progress_at: Option<Instant>,
    #[serde(skip)]
    samples: SampleWindow,
    #[serde(skip)]
    cancellation: CancellationHandle,
}

impl UploadTask {
    pub fn new(file: FileRef, content_hash: String, metadata: HashMap<String, String>, sample_window: usize) -> Self {
        Self {
            id: UploadId::new(),
            attempt: 1,
            file,
            content_hash,
            status: UploadStatus::Pending,
            uploaded_bytes: 0,
            progress_ratio: 0.0,
            progress: ProgressSnapshot::default(),
            error: None,
            metadata,
            remote: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            last_progress_at: None,
            samples: SampleWindow::new(sample_window),
            cancellation: CancellationHandle::new(),
        }
    }

    /// 失败任务的新一次尝试：新 id，相同内容哈希，进度归零
    pub fn next_attempt(&self) -> Self {
        let mut task = Self::new(
            self.file.clone(),
            self.content_hash.clone(),
            self.metadata.clone(),
            self.samples.capacity(),
        );
        task.attempt = self.attempt + 1;
        task
    }

    pub fn cancellation(&self) -> &CancellationHandle {
        &self.cancellation
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn transition(&mut self, next: UploadStatus) -> Result<UploadStatus> {
        let old = self.status;
        if !old.can_transition_to(next) {
            return Err(UploadError::InvalidTransition {
                upload_id: self.id,
                from: old,
                to: next,
            });
        }

        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        Ok(old)
    }

    /// Pending -> Uploading
    pub fn begin(&mut self, now: Instant) -> Result<UploadStatus> {
        let old = self.transition(UploadStatus::Uploading)?;
        self.started_at = Some(Utc::now());
        self.last_progress_at = Some(now);
        Ok(old)
    }

    /// 记录一次进度采样，任务不在上传中时忽略并返回 `false`
    pub fn record_progress(&mut self, bytes: u64, at: Instant) -> bool {
        if self.status != UploadStatus::Uploading {
            return false;
        }

        let bytes = bytes.min(self.file.size).max(self.uploaded_bytes);
        self.samples.push(ProgressSample::new(at, bytes));
        self.uploaded_bytes = bytes;
        self.progress_ratio = ratio(bytes, self.file.size);
        self.progress = progress::snapshot(self.samples.samples(), self.file.size);
        self.last_progress_at = Some(at);
        true
    }

    pub fn succeed(&mut self, remote: Option<String>) -> Result<UploadStatus> {
        let old = self.transition(UploadStatus::Success)?;
        self.uploaded_bytes = self.file.size;
        self.progress_ratio = 1.0;
        self.progress = progress::snapshot(self.samples.samples(), self.file.size);
        self.remote = remote;
        Ok(old)
    }

    pub fn fail(&mut self, error: TaskError) -> Result<UploadStatus> {
        let old = self.transition(UploadStatus::Failed)?;
        self.error = Some(error);
        self.cancellation.cancel();
        Ok(old)
    }

    /// 取消：总是触发取消句柄；已结束的任务保持不变并返回 `None`
    pub fn cancel(&mut self) -> Option<UploadStatus> {
        self.cancellation.cancel();
        self.transition(UploadStatus::Cancelled).ok()
    }

    pub fn snapshot(&self) -> FileUploadProgress {
        FileUploadProgress {
            upload_id: self.id,
            file_name: self.file.name.clone(),
            status: self.status,
            uploaded_bytes: self.uploaded_bytes,
            total_bytes: self.file.size,
            progress_ratio: self.progress_ratio,
            speed: self.progress.speed,
            speed_text: self.progress.speed_text.clone(),
            eta_text: self.progress.eta_text.clone(),
            error: self.error.as_ref().map(|err| err.message.clone()),
        }
    }
}

fn ratio(uploaded: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (uploaded as f64 / total as f64).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = 1024 * 1024;

    fn task(size: usize) -> UploadTask {
        let file = FileRef::from_bytes("photo.jpg", "image/jpeg", vec![0u8; size]);
        UploadTask::new(file, "hash".to_string(), HashMap::new(), 20)
    }

    #[test]
    fn test_ten_megabyte_scenario() {
        let mut task = task((10 * MB) as usize);
        let base = Instant::now();
        task.begin(base).unwrap();

        assert!(task.record_progress(MB, base + Duration::from_secs(1)));
        assert!((task.progress_ratio - 0.1).abs() < 1e-9);
        assert_eq!(task.progress.eta_text, progress::CALCULATING);

        assert!(task.record_progress(3 * MB, base + Duration::from_secs(2)));
        assert!((task.progress_ratio - 0.3).abs() < 1e-9);
        assert!(task.progress.eta.is_some());

        assert!(task.record_progress(6 * MB, base + Duration::from_secs(3)));
        assert!((task.progress_ratio - 0.6).abs() < 1e-9);
        let eta = task.progress.eta.unwrap();
        assert!(eta > Duration::ZERO && eta < Duration::from_secs(2));
    }

    #[test]
    fn test_progress_ignored_unless_uploading() {
        let mut task = task(100);
        let now = Instant::now();
        assert!(!task.record_progress(10, now));
        assert_eq!(task.uploaded_bytes, 0);

        task.begin(now).unwrap();
        task.cancel();
        assert!(!task.record_progress(50, now));
        assert_eq!(task.uploaded_bytes, 0);
    }

    #[test]
    fn test_uploaded_bytes_never_decrease() {
        let mut task = task(100);
        let now = Instant::now();
        task.begin(now).unwrap();

        task.record_progress(60, now + Duration::from_secs(1));
        task.record_progress(40, now + Duration::from_secs(2));
        assert_eq!(task.uploaded_bytes, 60);

        task.record_progress(500, now + Duration::from_secs(3));
        assert_eq!(task.uploaded_bytes, 100);
        assert_eq!(task.progress_ratio, 1.0);
    }

    #[test]
    fn test_terminal_task_is_immutable() {
        let mut task = task(100);
        task.begin(Instant::now()).unwrap();
        task.succeed(Some("/api/v4/documents/7/".to_string())).unwrap();

        assert!(task.cancel().is_none());
        assert_eq!(task.status, UploadStatus::Success);
        assert!(task.fail(TaskError::timeout(Duration::from_secs(1))).is_err());
        assert!(task.error.is_none());
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let mut task = task(100);
        assert_eq!(task.cancel(), Some(UploadStatus::Pending));
        assert!(task.cancellation().is_cancelled());
        assert_eq!(task.cancel(), None);
        assert_eq!(task.status, UploadStatus::Cancelled);
        assert!(task.error.is_none());
    }

    #[test]
    fn test_next_attempt_keeps_content_identity() {
        let mut first = task(100);
        let now = Instant::now();
        first.begin(now).unwrap();
        first.record_progress(50, now);
        first.fail(TaskError::timeout(Duration::from_secs(60))).unwrap();

        let second = first.next_attempt();
        assert_ne!(second.id, first.id);
        assert_eq!(second.content_hash, first.content_hash);
        assert_eq!(second.attempt, 2);
        assert_eq!(second.status, UploadStatus::Pending);
        assert_eq!(second.uploaded_bytes, 0);
        assert!(!second.cancellation().is_cancelled());
    }

    #[test]
    fn test_status_without_body_is_not_retryable() {
        for status in [401, 403, 413] {
            let error = TaskError::from_failure(&TransferFailure::response(status, None));
            assert_eq!(error.code, Some(status.to_string()));
            assert!(!crate::utils::is_retryable(error.code.as_deref()), "status {status}");
            assert_ne!(error.message, format!("Upload failed with status {}", status));
        }
    }
}
