use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, Stream};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, LOCATION};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use serde_json::Value;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use crate::core::{
    FileRef, FileSource, ProgressReporter, Result, TransferFailure, TransferReceipt, TransferRequest, Transport,
    UploadError,
};
use crate::utils::classifier::{classify_reqwest_error, FILE_READ_CODE};
use super::progress_stream::ProgressStream;

/// HTTP 上传配置
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// 读取文件的块大小
    pub chunk_size: usize,
    pub connect_timeout: Duration,
    /// 文件字段名
    pub file_field: String,
    /// 认证 token，按 `Token <token>` 发送
    pub token: Option<String>,
    pub headers: HashMap<String, String>,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            chunk_size: 256 * 1024,
            connect_timeout: Duration::from_secs(30),
            file_field: "file_new".to_string(),
            token: None,
            headers: HashMap::new(),
        }
    }
}

/// 单请求 multipart 上传：文件 + 元数据字段
pub struct HttpTransport {
    client: Client,
    endpoint: String,
    headers: HeaderMap,
    config: HttpTransportConfig,
}

impl HttpTransport {
    pub fn new(endpoint: &str, config: HttpTransportConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;

        let mut headers = HeaderMap::new();
        if let Some(token) = &config.token {
            let value = HeaderValue::from_str(&format!("Token {}", token))
                .map_err(|err| UploadError::internal(format!("Invalid token: {}", err)))?;
            headers.insert(AUTHORIZATION, value);
        }
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|err| UploadError::internal(format!("Invalid header name {}: {}", name, err)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|err| UploadError::internal(format!("Invalid header value: {}", err)))?;
            headers.insert(name, value);
        }

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            headers,
            config,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn build_form(&self, request: &TransferRequest, body: Body) -> std::result::Result<Form, TransferFailure> {
        let part = Part::stream_with_length(body, request.file.size)
            .file_name(request.file.name.clone())
            .mime_str(&request.file.mime_type)
            .map_err(|err| TransferFailure::network(classify_reqwest_error(&err), err.to_string()))?;

        let mut form = Form::new()
            .part(self.config.file_field.clone(), part)
            .text("label", request.file.name.clone())
            .text("content_hash", request.content_hash.clone());

        for (key, value) in &request.metadata {
            form = form.text(key.clone(), value.clone());
        }

        Ok(form)
    }
}

pub type FileStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send + Sync>>;

/// 打开文件内容流
pub async fn open_stream(file: &FileRef, chunk_size: usize) -> std::io::Result<FileStream> {
    let chunk_size = chunk_size.max(1);

    match &file.source {
        FileSource::Path(path) => {
            let reader = File::open(path).await?;
            Ok(Box::pin(ReaderStream::with_capacity(reader, chunk_size)))
        }
        FileSource::Memory(data) => {
            let data = data.clone();
            let chunks: Vec<_> = (0..data.len())
                .step_by(chunk_size)
                .map(|start| Ok(data.slice(start..(start + chunk_size).min(data.len()))))
                .collect();
            Ok(Box::pin(stream::iter(chunks)))
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn upload(
        &self,
        request: TransferRequest,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> std::result::Result<TransferReceipt, TransferFailure> {
        let file_stream = open_stream(&request.file, self.config.chunk_size)
            .await
            .map_err(|err| TransferFailure::network(FILE_READ_CODE, err.to_string()))?;
        let body = Body::wrap_stream(ProgressStream::new(file_stream, progress));
        let form = self.build_form(&request, body)?;

        debug!(upload_id = %request.upload_id, endpoint = %self.endpoint, "sending upload request");
        let send = self
            .client
            .post(&self.endpoint)
            .headers(self.headers.clone())
            .multipart(form)
            .send();

        let response = tokio::select! {
            result = send => result.map_err(|err| TransferFailure::network(classify_reqwest_error(&err), err.to_string()))?,
            _ = cancel.cancelled() => return Err(TransferFailure::Cancelled),
        };

        let status = response.status();
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(String::from);

        let body = tokio::select! {
            result = response.bytes() => result.ok(),
            _ = cancel.cancelled() => return Err(TransferFailure::Cancelled),
        };
        let body: Option<Value> = body.and_then(|bytes| serde_json::from_slice(&bytes).ok());

        if !status.is_success() {
            return Err(TransferFailure::response(status.as_u16(), body));
        }

        let remote = location.or_else(|| body.as_ref().and_then(remote_identifier));
        Ok(TransferReceipt { remote, body })
    }
}

/// 响应体中的资源地址或 id
fn remote_identifier(body: &Value) -> Option<String> {
    if let Some(url) = body.get("url").and_then(Value::as_str) {
        return Some(url.to_string());
    }

    match body.get("id") {
        Some(Value::Number(id)) => Some(id.to_string()),
        Some(Value::String(id)) => Some(id.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use crate::core::{TransferReport, UploadId};

    #[tokio::test]
    async fn test_memory_stream_chunks_cover_content() {
        let file = FileRef::from_bytes("a.bin", "application/octet-stream", (0u8..10).collect::<Vec<_>>());
        let chunks: Vec<_> = open_stream(&file, 4).await.unwrap().collect().await;

        let sizes: Vec<_> = chunks.iter().map(|c| c.as_ref().unwrap().len()).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[test]
    fn test_remote_identifier() {
        assert_eq!(remote_identifier(&json!({ "id": 7 })).as_deref(), Some("7"));
        assert_eq!(
            remote_identifier(&json!({ "id": 7, "url": "https://dam.example.com/api/v4/documents/7/" })).as_deref(),
            Some("https://dam.example.com/api/v4/documents/7/")
        );
        assert_eq!(remote_identifier(&json!({})), None);
    }

    #[test]
    fn test_invalid_header_rejected() {
        let config = HttpTransportConfig {
            headers: HashMap::from([("bad header".to_string(), "x".to_string())]),
            ..Default::default()
        };
        assert!(HttpTransport::new("https://dam.example.com/upload/", config).is_err());
    }

    #[tokio::test]
    async fn test_cancel_aborts_pending_request() {
        // 服务端接受连接但从不响应
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}/upload/", listener.local_addr().unwrap());
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });

        let transport = HttpTransport::new(&endpoint, HttpTransportConfig::default()).unwrap();
        let upload_id = UploadId::new();
        let (report_tx, _report_rx) = mpsc::unbounded_channel::<TransferReport>();
        let request = TransferRequest {
            upload_id,
            file: FileRef::from_bytes("a.txt", "text/plain", b"never answered".to_vec()),
            content_hash: "hash".to_string(),
            metadata: HashMap::new(),
        };

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            transport.upload(request, ProgressReporter::new(upload_id, report_tx), cancel),
        )
        .await
        .expect("upload did not observe cancellation");

        assert_eq!(result, Err(TransferFailure::Cancelled));
        server.abort();
    }
}
