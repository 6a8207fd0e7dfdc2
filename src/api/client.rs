use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;
use crate::adapter::{
    adapt_document, adapt_document_update, adapt_frontend_comment_to_mayan, adapt_mayan_comment_to_frontend,
    adapt_metadata_update, adapt_paginated_response, adapt_paginated_response_with, adapt_tag_attach, fetch_next,
    AdapterConfig, Asset, AssetUpdate, Comment, PageLink, PageSource, PaginatedResponse,
};
use crate::utils::classifier::{extract_from_response_data, user_message};
use super::errors::{ApiError, Result};

pub struct ApiClient {
    client: Client,
    base_url: Url,
    adapter: Arc<AdapterConfig>,
}

impl ApiClient {
    /// `base_url` 例如 `https://dam.example.com/api/v4/`
    pub fn new(base_url: &str, adapter: Arc<AdapterConfig>, token: Option<&str>) -> Result<Self> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(token) = token {
            if let Ok(value) = HeaderValue::from_str(&format!("Token {}", token)) {
                headers.insert(AUTHORIZATION, value);
            } else {
                warn!("ignoring API token with invalid characters");
            }
        }

        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url,
            adapter,
        })
    }

    pub fn adapter_config(&self) -> &AdapterConfig {
        &self.adapter
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub(crate) fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    pub(crate) fn documents_url(&self, page: Option<u32>, page_size: Option<u32>) -> Result<Url> {
        let mut url = self.endpoint("documents/")?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(page) = page {
                query.append_pair("page", &page.to_string());
            }
            if let Some(page_size) = page_size {
                query.append_pair("page_size", &page_size.to_string());
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Value> {
        let response = request.send().await?;
        read_json(response).await
    }

    async fn get_json(&self, url: Url) -> Result<Value> {
        debug!(%url, "GET");
        self.send(self.client.get(url)).await
    }

    async fn send_json<B: Serialize + ?Sized>(&self, method: Method, url: Url, body: &B) -> Result<Value> {
        debug!(%method, %url, "sending");
        self.send(self.client.request(method, url).json(body)).await
    }

    fn log_skipped<T>(page: &PaginatedResponse<T>) {
        for record in &page.skipped {
            warn!(index = record.index, reason = %record.reason, "skipped record in page");
        }
    }

    /// 文档列表，`page` 从 1 开始
    pub async fn list_documents(&self, page: Option<u32>, page_size: Option<u32>) -> Result<PaginatedResponse<Asset>> {
        let body = self.get_json(self.documents_url(page, page_size)?).await?;
        let page = adapt_paginated_response(&self.adapter, &body)?;
        Self::log_skipped(&page);
        Ok(page)
    }

    pub async fn next_documents(&self, page: &PaginatedResponse<Asset>) -> Result<Option<PaginatedResponse<Asset>>> {
        fetch_next(self, page).await
    }

    pub async fn get_document(&self, document_id: &str) -> Result<Asset> {
        let body = self.get_json(self.endpoint(&format!("documents/{}/", document_id))?).await?;
        Ok(adapt_document(&self.adapter, &body)?)
    }

    pub async fn list_comments(&self, document_id: &str) -> Result<PaginatedResponse<Comment>> {
        let body = self
            .get_json(self.endpoint(&format!("documents/{}/comments/", document_id))?)
            .await?;
        let page = adapt_paginated_response_with(&self.adapter, &body, |record| {
            adapt_mayan_comment_to_frontend(&self.adapter, record)
        })?;
        Self::log_skipped(&page);
        Ok(page)
    }

    pub async fn add_comment(&self, document_id: &str, text: &str) -> Result<Comment> {
        let url = self.endpoint(&format!("documents/{}/comments/", document_id))?;
        let body = self
            .send_json(Method::POST, url, &adapt_frontend_comment_to_mayan(text))
            .await?;
        Ok(adapt_mayan_comment_to_frontend(&self.adapter, &body)?)
    }

    pub async fn attach_tag(&self, document_id: &str, tag_id: &str) -> Result<()> {
        let url = self.endpoint(&format!("documents/{}/tags/attach/", document_id))?;
        self.send_json(Method::POST, url, &adapt_tag_attach(tag_id)).await?;
        Ok(())
    }

    pub async fn update_metadata(&self, document_id: &str, metadata_type_id: &str, value: &str) -> Result<()> {
        let url = self.endpoint(&format!("documents/{}/metadata/", document_id))?;
        self.send_json(Method::POST, url, &adapt_metadata_update(metadata_type_id, value))
            .await?;
        Ok(())
    }

    /// 只发送设置了的字段；没有可发送的字段时直接重新读取文档
    pub async fn update_document(&self, document_id: &str, update: &AssetUpdate) -> Result<Asset> {
        let payload = adapt_document_update(update);
        if payload.is_empty() {
            return self.get_document(document_id).await;
        }

        let url = self.endpoint(&format!("documents/{}/", document_id))?;
        let body = self.send_json(Method::PATCH, url, &payload).await?;
        Ok(adapt_document(&self.adapter, &body)?)
    }
}

#[async_trait]
impl PageSource for ApiClient {
    type Item = Asset;
    type Error = ApiError;

    async fn fetch_page(&self, link: &PageLink) -> Result<PaginatedResponse<Asset>> {
        let body = self.get_json(Url::parse(&link.url)?).await?;
        let page = adapt_paginated_response(&self.adapter, &body)?;
        Self::log_skipped(&page);
        Ok(page)
    }
}

/// 非 2xx 响应转换为带错误码的 [`ApiError::Status`]
async fn read_json(response: Response) -> Result<Value> {
    let status = response.status();
    let bytes = response.bytes().await?;
    let body: Value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };

    if status.is_success() {
        return Ok(body);
    }

    let code = extract_from_response_data(&body);
    let detail = body
        .get("detail")
        .and_then(Value::as_str)
        .map(String::from)
        .unwrap_or_else(|| format!("Request failed with status {}", status.as_u16()));
    let code_for_message = code.clone().unwrap_or_else(|| status.as_u16().to_string());

    Err(ApiError::Status {
        status: status.as_u16(),
        message: user_message(Some(code_for_message.as_str()), &detail),
        code,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> ApiClient {
        ApiClient::new(base, Arc::new(AdapterConfig::new("https://dam.example.com")), Some("secret")).unwrap()
    }

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let client = client("https://dam.example.com/api/v4");
        assert_eq!(client.base_url().as_str(), "https://dam.example.com/api/v4/");
        assert_eq!(
            client.endpoint("/documents/7/").unwrap().as_str(),
            "https://dam.example.com/api/v4/documents/7/"
        );
    }

    #[test]
    fn test_documents_url_query() {
        let client = client("https://dam.example.com/api/v4/");
        assert_eq!(
            client.documents_url(Some(2), Some(50)).unwrap().as_str(),
            "https://dam.example.com/api/v4/documents/?page=2&page_size=50"
        );
        assert_eq!(
            client.documents_url(None, None).unwrap().as_str(),
            "https://dam.example.com/api/v4/documents/"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        let result = ApiClient::new("not a url", Arc::new(AdapterConfig::default()), None);
        assert!(matches!(result, Err(ApiError::InvalidUrl(_))));
    }

    #[test]
    fn test_status_error_retryability() {
        let server_error = ApiError::Status {
            status: 503,
            code: None,
            message: "unavailable".to_string(),
        };
        assert!(server_error.is_retryable());
        assert_eq!(server_error.code().as_deref(), Some("503"));

        let denied = ApiError::Status {
            status: 403,
            code: Some("permission_denied".to_string()),
            message: "denied".to_string(),
        };
        assert!(!denied.is_retryable());
    }
}
