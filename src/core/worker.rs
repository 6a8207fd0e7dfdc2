use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use super::traits::{ProgressReporter, TransferFailure, TransferReport, TransferRequest, Transport};

/// 执行单个文件的传输，并把结果回报给管理器
pub(crate) struct UploadWorker {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) cancellation_token: CancellationToken,
    pub(crate) report_tx: mpsc::UnboundedSender<TransferReport>,
}

impl UploadWorker {
    pub async fn run(self, request: TransferRequest) {
        let upload_id = request.upload_id;
        let reporter = ProgressReporter::new(upload_id, self.report_tx.clone());

        let future = self
            .transport
            .upload(request, reporter, self.cancellation_token.clone());

        // 执行
        let outcome = tokio::select! {
            result = future => result,
            _ = self.cancellation_token.cancelled() => Err(TransferFailure::Cancelled),
        };

        let _ = self.report_tx.send(TransferReport::Finished { upload_id, outcome });
    }
}
