use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use crate::core::*;

fn memory_file(name: &str, fill: u8, size: usize) -> FileRef {
    FileRef::from_bytes(name, "application/octet-stream", vec![fill; size])
}

async fn wait_for<F>(events: &mut broadcast::Receiver<UploadEvent>, mut matches: F) -> UploadEvent
where
    F: FnMut(&UploadEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(err) => panic!("event channel closed: {}", err),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

fn is_status(upload_id: UploadId, status: UploadStatus) -> impl FnMut(&UploadEvent) -> bool {
    move |event: &UploadEvent| {
        matches!(event, UploadEvent::StateChanged { upload_id: id, new_status, .. }
            if *id == upload_id && *new_status == status)
    }
}

/// 立即成功，中途回报一半进度
struct InstantTransport;

#[async_trait]
impl Transport for InstantTransport {
    async fn upload(
        &self,
        request: TransferRequest,
        progress: ProgressReporter,
        _cancel: CancellationToken,
    ) -> std::result::Result<TransferReceipt, TransferFailure> {
        progress.report(request.file.size / 2);
        progress.report(request.file.size);
        Ok(TransferReceipt {
            remote: Some(format!("https://dam.example.com/api/v4/documents/{}/", request.upload_id)),
            body: None,
        })
    }
}

/// 等到闸门打开才完成，记录同时进行的传输数
struct GatedTransport {
    open: watch::Receiver<bool>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

#[async_trait]
impl Transport for GatedTransport {
    async fn upload(
        &self,
        _request: TransferRequest,
        _progress: ProgressReporter,
        _cancel: CancellationToken,
    ) -> std::result::Result<TransferReceipt, TransferFailure> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        let mut open = self.open.clone();
        let _ = open.wait_for(|open| *open).await;

        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(TransferReceipt::default())
    }
}

/// 从不回报进度，直到被取消
#[derive(Default)]
struct StallingTransport {
    signal: Mutex<Option<CancellationToken>>,
}

impl StallingTransport {
    fn was_cancelled(&self) -> bool {
        self.signal
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }
}

#[async_trait]
impl Transport for StallingTransport {
    async fn upload(
        &self,
        _request: TransferRequest,
        _progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> std::result::Result<TransferReceipt, TransferFailure> {
        *self.signal.lock().unwrap() = Some(cancel.clone());
        cancel.cancelled().await;
        Err(TransferFailure::Cancelled)
    }
}

/// 前 `failures` 次返回 503
struct FlakyTransport {
    failures: usize,
    attempts: AtomicUsize,
}

#[async_trait]
impl Transport for FlakyTransport {
    async fn upload(
        &self,
        request: TransferRequest,
        progress: ProgressReporter,
        _cancel: CancellationToken,
    ) -> std::result::Result<TransferReceipt, TransferFailure> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        progress.report(request.file.size / 4);

        if attempt < self.failures {
            return Err(TransferFailure::response(
                503,
                Some(json!({ "error": { "code": "server_busy" } })),
            ));
        }
        Ok(TransferReceipt::default())
    }
}

#[tokio::test]
async fn test_upload_completes_with_progress() {
    let handle = UploadManager::new(Arc::new(InstantTransport), UploadConfig::default());
    let manager = handle.manager.clone();
    let mut events = manager.subscribe_events();

    let upload_id = manager
        .enqueue(memory_file("a.bin", 1, 4096), HashMap::new())
        .await
        .unwrap();

    let progress = wait_for(&mut events, |event| {
        matches!(event, UploadEvent::Progress(progress) if progress.upload_id == upload_id && progress.uploaded_bytes == 2048)
    })
    .await;
    if let UploadEvent::Progress(progress) = progress {
        assert_eq!(progress.progress_ratio, 0.5);
        assert_eq!(progress.status, UploadStatus::Uploading);
    }

    let completed = wait_for(&mut events, |event| matches!(event, UploadEvent::Completed { .. })).await;
    assert_eq!(completed.upload_id(), upload_id);

    let task = manager.get_task(upload_id).await.unwrap().unwrap();
    assert_eq!(task.status, UploadStatus::Success);
    assert_eq!(task.uploaded_bytes, 4096);
    assert_eq!(task.progress_ratio, 1.0);
    assert!(task.remote.is_some());
    assert!(task.completed_at.is_some());

    drop(manager);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_concurrency_ceiling_is_never_exceeded() {
    let (open_tx, open_rx) = watch::channel(false);
    let transport = Arc::new(GatedTransport {
        open: open_rx,
        active: AtomicUsize::new(0),
        max_active: AtomicUsize::new(0),
    });
    let config = UploadConfig {
        concurrent: 2,
        ..Default::default()
    };
    let handle = UploadManager::new(transport.clone(), config);
    let manager = handle.manager.clone();
    let mut events = manager.subscribe_events();

    for i in 0..5u8 {
        manager
            .enqueue(memory_file(&format!("f{}.bin", i), i, 1024), HashMap::new())
            .await
            .unwrap();
    }

    let mut uploading = 0;
    while uploading < 2 {
        wait_for(&mut events, |event| {
            matches!(event, UploadEvent::StateChanged { new_status: UploadStatus::Uploading, .. })
        })
        .await;
        uploading += 1;
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    let tasks = manager.get_all_tasks().await.unwrap();
    let in_flight = tasks.iter().filter(|task| task.status == UploadStatus::Uploading).count();
    let pending = tasks.iter().filter(|task| task.status == UploadStatus::Pending).count();
    assert_eq!(in_flight, 2);
    assert_eq!(pending, 3);

    open_tx.send(true).unwrap();

    let mut completed = 0;
    while completed < 5 {
        wait_for(&mut events, |event| matches!(event, UploadEvent::Completed { .. })).await;
        completed += 1;
    }
    assert_eq!(transport.max_active.load(Ordering::SeqCst), 2);

    drop(manager);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_cancel_mid_transfer() {
    let transport = Arc::new(StallingTransport::default());
    let handle = UploadManager::new(transport.clone(), UploadConfig::default());
    let manager = handle.manager.clone();
    let mut events = manager.subscribe_events();

    let upload_id = manager.enqueue(memory_file("a.bin", 1, 10), HashMap::new()).await.unwrap();
    wait_for(&mut events, is_status(upload_id, UploadStatus::Uploading)).await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    manager.cancel(upload_id).await.unwrap();
    wait_for(&mut events, is_status(upload_id, UploadStatus::Cancelled)).await;

    // 再次取消无副作用
    manager.cancel(upload_id).await.unwrap();

    let task = manager.get_task(upload_id).await.unwrap().unwrap();
    assert_eq!(task.status, UploadStatus::Cancelled);
    assert!(task.error.is_none());
    assert!(task.cancellation().is_cancelled());

    assert!(transport.was_cancelled());

    drop(manager);
    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_inactive_upload_times_out() {
    let transport = Arc::new(StallingTransport::default());
    let config = UploadConfig {
        inactivity_timeout: Duration::from_secs(1),
        ..Default::default()
    };
    let handle = UploadManager::new(transport.clone(), config);
    let manager = handle.manager.clone();
    let mut events = manager.subscribe_events();

    let upload_id = manager.enqueue(memory_file("a.bin", 1, 10), HashMap::new()).await.unwrap();

    let failed = wait_for(&mut events, |event| matches!(event, UploadEvent::Failed { .. })).await;
    let UploadEvent::Failed { upload_id: failed_id, error } = failed else {
        unreachable!();
    };
    assert_eq!(failed_id, upload_id);
    assert_eq!(error.kind, TaskErrorKind::Timeout);
    assert_eq!(error.code.as_deref(), Some("ETIMEDOUT"));

    assert!(transport.was_cancelled());

    drop(manager);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_retry_creates_new_attempt() {
    let transport = Arc::new(FlakyTransport {
        failures: 1,
        attempts: AtomicUsize::new(0),
    });
    let handle = UploadManager::new(transport, UploadConfig::default());
    let manager = handle.manager.clone();
    let mut events = manager.subscribe_events();

    let first = manager.enqueue(memory_file("a.bin", 1, 100), HashMap::new()).await.unwrap();
    let failed = wait_for(&mut events, |event| matches!(event, UploadEvent::Failed { .. })).await;
    if let UploadEvent::Failed { error, .. } = failed {
        assert_eq!(error.code.as_deref(), Some("server_busy"));
        assert_eq!(error.kind, TaskErrorKind::Transfer);
    }

    let second = manager.retry(first).await.unwrap();
    assert_ne!(first, second);

    let completed = wait_for(&mut events, |event| matches!(event, UploadEvent::Completed { .. })).await;
    assert_eq!(completed.upload_id(), second);

    let old = manager.get_task(first).await.unwrap().unwrap();
    let new = manager.get_task(second).await.unwrap().unwrap();
    assert_eq!(old.status, UploadStatus::Failed);
    assert_eq!(new.status, UploadStatus::Success);
    assert_eq!(new.attempt, 2);
    assert_eq!(new.content_hash, old.content_hash);

    // 只有失败的任务可以重试
    assert!(matches!(
        manager.retry(second).await,
        Err(UploadError::InvalidTransition { .. })
    ));

    drop(manager);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_rejected_until_terminal() {
    let handle = UploadManager::new(Arc::new(StallingTransport::default()), UploadConfig::default());
    let manager = handle.manager.clone();

    let first = manager.enqueue(memory_file("a.bin", 7, 64), HashMap::new()).await.unwrap();
    let duplicate = manager.enqueue(memory_file("copy.bin", 7, 64), HashMap::new()).await;
    assert!(matches!(duplicate, Err(UploadError::Duplicate { existing, .. }) if existing == first));

    manager.cancel(first).await.unwrap();
    assert!(manager.enqueue(memory_file("copy.bin", 7, 64), HashMap::new()).await.is_ok());

    drop(manager);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_validation_rejects_before_enqueue() {
    let config = UploadConfig {
        max_file_size: Some(10),
        allowed_mime_types: vec!["image/*".to_string()],
        ..Default::default()
    };
    let handle = UploadManager::new(Arc::new(InstantTransport), config);
    let manager = handle.manager.clone();

    let too_large = FileRef::from_bytes("big.png", "image/png", vec![0u8; 11]);
    assert!(matches!(
        manager.enqueue(too_large, HashMap::new()).await,
        Err(UploadError::Validation(ValidationError::TooLarge { .. }))
    ));

    let wrong_type = FileRef::from_bytes("a.pdf", "application/pdf", vec![0u8; 5]);
    assert!(matches!(
        manager.enqueue(wrong_type, HashMap::new()).await,
        Err(UploadError::Validation(ValidationError::UnsupportedType { .. }))
    ));

    assert!(manager.get_all_tasks().await.unwrap().is_empty());

    drop(manager);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_manual_start() {
    let config = UploadConfig {
        auto_start: false,
        ..Default::default()
    };
    let handle = UploadManager::new(Arc::new(InstantTransport), config);
    let manager = handle.manager.clone();
    let mut events = manager.subscribe_events();

    let upload_id = manager.enqueue(memory_file("a.bin", 1, 10), HashMap::new()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(
        manager.get_task(upload_id).await.unwrap().unwrap().status,
        UploadStatus::Pending
    );

    manager.start(upload_id).await.unwrap();
    wait_for(&mut events, is_status(upload_id, UploadStatus::Success)).await;

    assert!(matches!(
        manager.start(upload_id).await,
        Err(UploadError::InvalidTransition { .. })
    ));

    assert_eq!(manager.clean().await.unwrap(), 1);
    assert!(manager.get_task(upload_id).await.unwrap().is_none());

    drop(manager);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_subscribe_task_filters_other_tasks() {
    let config = UploadConfig {
        auto_start: false,
        ..Default::default()
    };
    let handle = UploadManager::new(Arc::new(InstantTransport), config);
    let manager = handle.manager.clone();

    let first = manager.enqueue(memory_file("a.bin", 1, 10), HashMap::new()).await.unwrap();
    let second = manager.enqueue(memory_file("b.bin", 2, 10), HashMap::new()).await.unwrap();
    let mut receiver = manager.subscribe_task(first);
    manager.start(second).await.unwrap();
    manager.start(first).await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = receiver.recv().await.unwrap();
            assert_eq!(event.upload_id(), first);
            if matches!(event, UploadEvent::Completed { .. }) {
                return event;
            }
        }
    })
    .await;
    assert!(received.is_ok());

    drop(manager);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_cancels_in_flight() {
    let transport = Arc::new(StallingTransport::default());
    let handle = UploadManager::new(transport.clone(), UploadConfig::default());
    let manager = handle.manager.clone();
    let mut events = manager.subscribe_events();

    let upload_id = manager.enqueue(memory_file("a.bin", 1, 10), HashMap::new()).await.unwrap();
    wait_for(&mut events, is_status(upload_id, UploadStatus::Uploading)).await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    handle.shutdown().await.unwrap();
    wait_for(&mut events, is_status(upload_id, UploadStatus::Cancelled)).await;

    assert!(matches!(manager.get_task(upload_id).await, Err(UploadError::ManagerShutdown)));
    assert!(transport.was_cancelled());
}
