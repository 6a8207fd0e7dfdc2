use std::collections::HashMap;
use std::time::Instant;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use super::task::FileRef;
use super::types::UploadId;

/// 一次上传请求：文件内容加表单字段
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub upload_id: UploadId,
    pub file: FileRef,
    pub content_hash: String,
    pub metadata: HashMap<String, String>,
}

/// 上传成功后服务端返回的信息
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransferReceipt {
    /// Location 头或响应中的资源标识
    pub remote: Option<String>,
    pub body: Option<Value>,
}

/// 传输层失败
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransferFailure {
    #[error("Transfer was cancelled")]
    Cancelled,

    #[error("{message}")]
    Failed {
        status: Option<u16>,
        /// 网络层错误码（如 `ERR_NETWORK`）
        code: Option<String>,
        /// 服务端返回的错误体（即 `response.data`）
        body: Option<Value>,
        message: String,
    },
}

impl TransferFailure {
    pub fn network(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            status: None,
            code: Some(code.into()),
            body: None,
            message: message.into(),
        }
    }

    pub fn response(status: u16, body: Option<Value>) -> Self {
        Self::Failed {
            status: Some(status),
            code: None,
            body,
            message: format!("Upload failed with status {}", status),
        }
    }
}

pub(crate) enum TransferReport {
    Progress {
        upload_id: UploadId,
        bytes: u64,
        at: Instant,
    },
    Finished {
        upload_id: UploadId,
        outcome: Result<TransferReceipt, TransferFailure>,
    },
}

/// 传输层回报字节进度的通道
#[derive(Clone)]
pub struct ProgressReporter {
    upload_id: UploadId,
    report_tx: mpsc::UnboundedSender<TransferReport>,
}

impl ProgressReporter {
    pub(crate) fn new(upload_id: UploadId, report_tx: mpsc::UnboundedSender<TransferReport>) -> Self {
        Self { upload_id, report_tx }
    }

    pub fn upload_id(&self) -> UploadId {
        self.upload_id
    }

    /// 报告累计已上传字节数
    pub fn report(&self, bytes_uploaded: u64) {
        self.report_at(bytes_uploaded, tokio::time::Instant::now().into_std());
    }

    pub fn report_at(&self, bytes_uploaded: u64, at: Instant) {
        let _ = self.report_tx.send(TransferReport::Progress {
            upload_id: self.upload_id,
            bytes: bytes_uploaded,
            at,
        });
    }
}

/// 单个文件的传输实现
///
/// `cancel` 被触发后应尽快返回 [`TransferFailure::Cancelled`]；即使没有返回，
/// 管理器也会丢弃取消之后到达的进度和结果。
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn upload(
        &self,
        request: TransferRequest,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> Result<TransferReceipt, TransferFailure>;
}
