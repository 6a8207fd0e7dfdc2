use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use url::Url;
use super::config::AdapterConfig;
use super::document::{adapt_document, Asset};
use super::errors::AdapterError;
use super::urls::absolutize_url;

/// 上一页或下一页
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageLink {
    /// 绝对地址
    pub url: String,
    pub page: Option<u32>,
}

impl PageLink {
    fn parse(config: &AdapterConfig, value: Option<&Value>) -> Option<Self> {
        let raw = value?.as_str()?.trim();
        if raw.is_empty() {
            return None;
        }

        let url = absolutize_url(config, raw);
        let page = Url::parse(&url).ok().and_then(|parsed| {
            parsed
                .query_pairs()
                .find(|(key, _)| key == "page")
                .and_then(|(_, value)| value.parse().ok())
        });

        Some(Self { url, page })
    }
}

/// 适配失败被跳过的记录
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedRecord {
    /// 在 `results` 中的位置
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaginatedResponse<T> {
    /// 与后端顺序一致
    pub items: Vec<T>,
    pub total_count: u64,
    pub next: Option<PageLink>,
    pub previous: Option<PageLink>,
    pub skipped: Vec<SkippedRecord>,
}

impl<T> PaginatedResponse<T> {
    pub fn has_next(&self) -> bool {
        self.next.is_some()
    }
}

/// 用给定的单条适配函数适配分页响应
///
/// 也接受不分页的数组。单条记录失败只会记入 `skipped`。
pub fn adapt_paginated_response_with<T, F>(
    config: &AdapterConfig,
    value: &Value,
    adapt: F,
) -> Result<PaginatedResponse<T>, AdapterError>
where
    F: Fn(&Value) -> Result<T, AdapterError>,
{
    let (records, count, next, previous) = match value {
        Value::Array(records) => (records, None, None, None),
        Value::Object(fields) => {
            let records = fields
                .get("results")
                .and_then(Value::as_array)
                .ok_or(AdapterError::MissingField("results"))?;
            (
                records,
                fields.get("count").and_then(Value::as_u64),
                PageLink::parse(config, fields.get("next")),
                PageLink::parse(config, fields.get("previous")),
            )
        }
        other => {
            return Err(AdapterError::Malformed(format!("expected paginated object, got {}", other)));
        }
    };

    let mut items = Vec::with_capacity(records.len());
    let mut skipped = Vec::new();
    for (index, record) in records.iter().enumerate() {
        match adapt(record) {
            Ok(item) => items.push(item),
            Err(err) => skipped.push(SkippedRecord {
                index,
                reason: err.to_string(),
            }),
        }
    }

    Ok(PaginatedResponse {
        items,
        total_count: count.unwrap_or(records.len() as u64),
        next,
        previous,
        skipped,
    })
}

pub fn adapt_paginated_response(config: &AdapterConfig, value: &Value) -> Result<PaginatedResponse<Asset>, AdapterError> {
    adapt_paginated_response_with(config, value, |record| adapt_document(config, record))
}

/// 批量适配文档，失败的记录跳过
pub fn adapt_documents(config: &AdapterConfig, records: &[Value]) -> (Vec<Asset>, Vec<SkippedRecord>) {
    let mut assets = Vec::with_capacity(records.len());
    let mut skipped = Vec::new();

    for (index, record) in records.iter().enumerate() {
        match adapt_document(config, record) {
            Ok(asset) => assets.push(asset),
            Err(err) => skipped.push(SkippedRecord {
                index,
                reason: err.to_string(),
            }),
        }
    }

    (assets, skipped)
}

/// 按页链接拉取数据
#[async_trait]
pub trait PageSource: Send + Sync {
    type Item: Send;
    type Error: Send;

    async fn fetch_page(&self, link: &PageLink) -> Result<PaginatedResponse<Self::Item>, Self::Error>;
}

/// 拉取下一页，已是最后一页时返回 `None`
pub async fn fetch_next<S>(
    source: &S,
    page: &PaginatedResponse<S::Item>,
) -> Result<Option<PaginatedResponse<S::Item>>, S::Error>
where
    S: PageSource + ?Sized,
{
    match &page.next {
        Some(link) => source.fetch_page(link).await.map(Some),
        None => Ok(None),
    }
}
