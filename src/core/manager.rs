use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use super::errors::{Result, UploadError};
use super::hashing::hash_file;
use super::manager_worker::UploadManagerWorker;
use super::task::{FileRef, UploadTask};
use super::traits::Transport;
use super::types::{FileUploadProgress, ManagerCommand, UploadConfig, UploadEvent, UploadId};
use super::validation::validate_file;

#[derive(Clone)]
pub struct UploadManager {
    command_tx: mpsc::Sender<ManagerCommand>,
    event_tx: broadcast::Sender<UploadEvent>,
    config: Arc<UploadConfig>,
}

/// 上传管理器句柄 - 包含管理器和工作线程
pub struct UploadManagerHandle {
    pub manager: UploadManager,
    pub worker_handle: JoinHandle<()>,
}

impl UploadManagerHandle {
    /// 取消未完成的任务并等待工作循环退出
    pub async fn shutdown(self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        // 工作循环已退出时发送会失败，直接等待 join
        if self.manager.command_tx.send(ManagerCommand::Shutdown { reply: reply_tx }).await.is_ok() {
            let _ = reply_rx.await;
        }

        drop(self.manager);
        self.worker_handle
            .await
            .map_err(|err| UploadError::internal(format!("Worker panic: {}", err)))
    }
}

impl UploadManager {
    pub fn new(transport: Arc<dyn Transport>, config: UploadConfig) -> UploadManagerHandle {
        let (command_tx, command_rx) = mpsc::channel(100);
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));

        let worker_handle = tokio::spawn(UploadManagerWorker::run(
            transport,
            config.clone(),
            command_rx,
            event_tx.clone(),
        ));

        let manager = Self {
            command_tx,
            event_tx,
            config: Arc::new(config),
        };

        UploadManagerHandle {
            manager,
            worker_handle,
        }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> ManagerCommand) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.command_tx
            .send(command(reply_tx))
            .await
            .map_err(|_| UploadError::ManagerShutdown)?;

        reply_rx.await.map_err(|_| UploadError::ManagerShutdown)
    }

    /// 校验并计算内容哈希后入队
    ///
    /// 校验失败时不会创建任务；相同内容正在上传时返回 [`UploadError::Duplicate`]。
    pub async fn enqueue(&self, file: FileRef, metadata: HashMap<String, String>) -> Result<UploadId> {
        validate_file(&file, &self.config)?;
        let content_hash = hash_file(&file).await?;

        self.request(|reply| ManagerCommand::Enqueue {
            file,
            content_hash,
            metadata,
            reply,
        })
        .await?
    }

    pub async fn enqueue_path(&self, path: impl AsRef<Path>, metadata: HashMap<String, String>) -> Result<UploadId> {
        let file = FileRef::from_path(path).await?;
        self.enqueue(file, metadata).await
    }

    /// 手动开始（`auto_start` 关闭时使用）
    pub async fn start(&self, upload_id: UploadId) -> Result<()> {
        self.request(|reply| ManagerCommand::Start { upload_id, reply }).await?
    }

    /// Cancel upload, no-op for finished tasks
    pub async fn cancel(&self, upload_id: UploadId) -> Result<()> {
        self.request(|reply| ManagerCommand::Cancel { upload_id, reply }).await?
    }

    pub async fn cancel_all(&self) -> Result<usize> {
        self.request(|reply| ManagerCommand::CancelAll { reply }).await
    }

    /// 重试失败的任务，返回新任务的 id
    pub async fn retry(&self, upload_id: UploadId) -> Result<UploadId> {
        self.request(|reply| ManagerCommand::Retry { upload_id, reply }).await?
    }

    /// Get task
    pub async fn get_task(&self, upload_id: UploadId) -> Result<Option<UploadTask>> {
        self.request(|reply| ManagerCommand::GetTask { upload_id, reply }).await
    }

    /// Get all task
    pub async fn get_all_tasks(&self) -> Result<Vec<UploadTask>> {
        self.request(|reply| ManagerCommand::GetAllTasks { reply }).await
    }

    pub async fn get_progress(&self) -> Result<Vec<FileUploadProgress>> {
        let tasks = self.get_all_tasks().await?;
        Ok(tasks.iter().map(UploadTask::snapshot).collect())
    }

    /// 清除已结束的任务
    pub async fn clean(&self) -> Result<usize> {
        self.request(|reply| ManagerCommand::Clean { reply }).await
    }

    /// 订阅事件
    ///
    /// 注意：
    /// - 如果接收速度跟不上发送速度，可能会丢失事件（lagged error）
    /// - 每个订阅者都会收到完整的事件副本
    /// - drop 接收器即取消订阅
    pub fn subscribe_events(&self) -> broadcast::Receiver<UploadEvent> {
        self.event_tx.subscribe()
    }

    pub fn subscribe_filtered<F>(&self, filter: F) -> FilteredEventReceiver<F>
    where
        F: Fn(&UploadEvent) -> bool,
    {
        FilteredEventReceiver {
            receiver: self.event_tx.subscribe(),
            filter,
        }
    }

    /// 只订阅某个任务的事件
    pub fn subscribe_task(&self, upload_id: UploadId) -> FilteredEventReceiver<impl Fn(&UploadEvent) -> bool + use<>> {
        self.subscribe_filtered(move |event: &UploadEvent| event.upload_id() == upload_id)
    }
}

/// 过滤的事件接收器
pub struct FilteredEventReceiver<F> {
    receiver: broadcast::Receiver<UploadEvent>,
    filter: F,
}

impl<F> FilteredEventReceiver<F>
where
    F: Fn(&UploadEvent) -> bool,
{
    pub async fn recv(&mut self) -> std::result::Result<UploadEvent, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if (self.filter)(&event) {
                return Ok(event);
            }
        }
    }
}
