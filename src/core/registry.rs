use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use super::errors::{Result, UploadError};
use super::task::{FileRef, TaskError, UploadTask};
use super::traits::{TransferFailure, TransferReceipt, TransferRequest};
use super::types::{UploadEvent, UploadId, UploadStatus};

/// 刚获得并发槽位、需要启动传输的任务
pub(crate) struct Admitted {
    pub request: TransferRequest,
    pub cancellation: CancellationToken,
}

/// 任务集合与状态机
///
/// 所有状态变化都在这里完成，并发槽位的计数也只在这里修改；
/// 产生的事件暂存在 outbox 中，由工作循环统一广播。
pub struct TaskRegistry {
    tasks: HashMap<UploadId, UploadTask>,
    order: Vec<UploadId>,
    admission_queue: VecDeque<UploadId>,
    active_uploads: usize,
    max_concurrent: usize,
    auto_start: bool,
    sample_window: usize,
    outbox: Vec<UploadEvent>,
}

impl TaskRegistry {
    pub fn new(max_concurrent: usize, auto_start: bool, sample_window: usize) -> Self {
        Self {
            tasks: HashMap::new(),
            order: Vec::new(),
            admission_queue: VecDeque::new(),
            active_uploads: 0,
            max_concurrent: max_concurrent.max(1),
            auto_start,
            sample_window,
            outbox: Vec::new(),
        }
    }

    pub fn get(&self, upload_id: &UploadId) -> Option<&UploadTask> {
        self.tasks.get(upload_id)
    }

    /// 按入队顺序返回所有任务的副本
    pub fn snapshot_all(&self) -> Vec<UploadTask> {
        self.order
            .iter()
            .filter_map(|id| self.tasks.get(id))
            .cloned()
            .collect()
    }

    pub fn active_uploads(&self) -> usize {
        self.active_uploads
    }

    pub fn take_events(&mut self) -> Vec<UploadEvent> {
        std::mem::take(&mut self.outbox)
    }

    fn find_in_flight(&self, content_hash: &str) -> Option<UploadId> {
        self.tasks
            .values()
            .find(|task| task.content_hash == content_hash && !task.is_terminal())
            .map(|task| task.id)
    }

    fn insert(&mut self, task: UploadTask) -> UploadId {
        let upload_id = task.id;
        self.outbox.push(UploadEvent::TaskAdded {
            upload_id,
            content_hash: task.content_hash.clone(),
        });
        self.order.push(upload_id);
        self.tasks.insert(upload_id, task);

        if self.auto_start {
            self.admission_queue.push_back(upload_id);
        }
        upload_id
    }

    /// 创建 Pending 任务；相同内容仍在进行中时拒绝
    pub fn enqueue(&mut self, file: FileRef, content_hash: String, metadata: HashMap<String, String>) -> Result<UploadId> {
        if let Some(existing) = self.find_in_flight(&content_hash) {
            return Err(UploadError::Duplicate { content_hash, existing });
        }

        let task = UploadTask::new(file, content_hash, metadata, self.sample_window);
        info!(upload_id = %task.id, file = %task.file.name, size = task.file.size, "upload enqueued");
        Ok(self.insert(task))
    }

    /// 把 Pending 任务放入等待队列，重复调用无副作用
    pub fn start(&mut self, upload_id: UploadId) -> Result<()> {
        let task = self.tasks.get(&upload_id).ok_or(UploadError::TaskNotFound(upload_id))?;
        if task.status != UploadStatus::Pending {
            return Err(UploadError::InvalidTransition {
                upload_id,
                from: task.status,
                to: UploadStatus::Uploading,
            });
        }

        if !self.admission_queue.contains(&upload_id) {
            self.admission_queue.push_back(upload_id);
        }
        Ok(())
    }

    /// 在并发上限内取出下一个等待的任务并置为 Uploading
    pub(crate) fn admit_next(&mut self, now: Instant) -> Option<Admitted> {
        while self.active_uploads < self.max_concurrent {
            let upload_id = self.admission_queue.pop_front()?;
            let Some(task) = self.tasks.get_mut(&upload_id) else {
                continue;
            };
            let Ok(old_status) = task.begin(now) else {
                continue;
            };

            self.active_uploads += 1;
            debug!(%upload_id, active = self.active_uploads, "upload admitted");

            let admitted = Admitted {
                request: TransferRequest {
                    upload_id,
                    file: task.file.clone(),
                    content_hash: task.content_hash.clone(),
                    metadata: task.metadata.clone(),
                },
                cancellation: task.cancellation().signal(),
            };
            self.emit_state_change(upload_id, old_status, UploadStatus::Uploading);
            return Some(admitted);
        }

        None
    }

    /// 取消任务，已结束的任务直接返回成功
    pub fn cancel(&mut self, upload_id: UploadId) -> Result<()> {
        let task = self.tasks.get_mut(&upload_id).ok_or(UploadError::TaskNotFound(upload_id))?;

        let Some(old_status) = task.cancel() else {
            return Ok(());
        };

        self.admission_queue.retain(|id| *id != upload_id);
        if old_status == UploadStatus::Uploading {
            self.release_slot();
        }

        info!(%upload_id, "upload cancelled");
        self.emit_state_change(upload_id, old_status, UploadStatus::Cancelled);
        self.emit_progress(upload_id);
        Ok(())
    }

    pub fn cancel_all(&mut self) -> usize {
        let in_flight: Vec<_> = self
            .order
            .iter()
            .filter(|id| self.tasks.get(*id).is_some_and(|task| !task.is_terminal()))
            .copied()
            .collect();

        for upload_id in &in_flight {
            let _ = self.cancel(*upload_id);
        }
        in_flight.len()
    }

    /// 应用一次进度回报；任务已结束或不在上传中时忽略
    pub fn on_progress(&mut self, upload_id: UploadId, bytes: u64, at: Instant) -> bool {
        let Some(task) = self.tasks.get_mut(&upload_id) else {
            return false;
        };

        if !task.record_progress(bytes, at) {
            debug!(%upload_id, status = ?task.status, "stale progress ignored");
            return false;
        }

        self.emit_progress(upload_id);
        true
    }

    /// 应用传输结果；取消或超时之后到达的结果会被丢弃
    pub fn on_complete(&mut self, upload_id: UploadId, outcome: std::result::Result<TransferReceipt, TransferFailure>) -> bool {
        let Some(task) = self.tasks.get_mut(&upload_id) else {
            return false;
        };

        if task.status != UploadStatus::Uploading {
            debug!(%upload_id, status = ?task.status, "stale completion ignored");
            return false;
        }

        match outcome {
            Ok(receipt) => {
                let Ok(old_status) = task.succeed(receipt.remote.clone()) else {
                    return false;
                };
                self.release_slot();
                info!(%upload_id, remote = ?receipt.remote, "upload completed");
                self.emit_state_change(upload_id, old_status, UploadStatus::Success);
                self.emit_progress(upload_id);
                self.outbox.push(UploadEvent::Completed {
                    upload_id,
                    remote: receipt.remote,
                });
            }
            Err(TransferFailure::Cancelled) => {
                // 传输层自行中止，按取消处理
                return self.cancel(upload_id).is_ok();
            }
            Err(failure) => {
                let error = TaskError::from_failure(&failure);
                self.fail(upload_id, error);
            }
        }

        true
    }

    fn fail(&mut self, upload_id: UploadId, error: TaskError) {
        let Some(task) = self.tasks.get_mut(&upload_id) else {
            return;
        };
        let Ok(old_status) = task.fail(error.clone()) else {
            return;
        };

        if old_status == UploadStatus::Uploading {
            self.release_slot();
        }

        warn!(%upload_id, code = ?error.code, error = %error, "upload failed");
        self.emit_state_change(upload_id, old_status, UploadStatus::Failed);
        self.emit_progress(upload_id);
        self.outbox.push(UploadEvent::Failed { upload_id, error });
    }

    /// 超过 `timeout` 没有进度的上传任务判定为超时失败
    pub fn expire_inactive(&mut self, now: Instant, timeout: Duration) -> Vec<UploadId> {
        let expired: Vec<_> = self
            .tasks
            .values()
            .filter(|task| task.status == UploadStatus::Uploading)
            .filter(|task| {
                task.last_progress_at
                    .is_some_and(|last| now.saturating_duration_since(last) >= timeout)
            })
            .map(|task| task.id)
            .collect();

        for upload_id in &expired {
            self.fail(*upload_id, TaskError::timeout(timeout));
        }
        expired
    }

    /// 以新任务重试失败的任务，共用原内容哈希
    pub fn retry(&mut self, upload_id: UploadId) -> Result<UploadId> {
        let task = self.tasks.get(&upload_id).ok_or(UploadError::TaskNotFound(upload_id))?;
        if task.status != UploadStatus::Failed {
            return Err(UploadError::InvalidTransition {
                upload_id,
                from: task.status,
                to: UploadStatus::Pending,
            });
        }

        if let Some(existing) = self.find_in_flight(&task.content_hash) {
            return Err(UploadError::Duplicate {
                content_hash: task.content_hash.clone(),
                existing,
            });
        }

        let next = task.next_attempt();
        let attempt = next.attempt;
        info!(previous = %upload_id, upload_id = %next.id, attempt, "upload retried");

        let new_id = self.insert(next);
        self.outbox.push(UploadEvent::Retried {
            previous: upload_id,
            upload_id: new_id,
            attempt,
        });
        Ok(new_id)
    }

    /// 移除已结束的任务
    pub fn clean(&mut self) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|_, task| !task.is_terminal());
        let tasks = &self.tasks;
        self.order.retain(|id| tasks.contains_key(id));
        before - self.tasks.len()
    }

    fn release_slot(&mut self) {
        self.active_uploads = self.active_uploads.saturating_sub(1);
    }

    fn emit_state_change(&mut self, upload_id: UploadId, old_status: UploadStatus, new_status: UploadStatus) {
        self.outbox.push(UploadEvent::StateChanged {
            upload_id,
            old_status,
            new_status,
        });
    }

    fn emit_progress(&mut self, upload_id: UploadId) {
        if let Some(task) = self.tasks.get(&upload_id) {
            self.outbox.push(UploadEvent::Progress(task.snapshot()));
        }
    }
}
