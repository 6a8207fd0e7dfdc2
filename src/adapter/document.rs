use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use super::ai::{adapt_ai_analysis, AiAnalysis};
use super::config::AdapterConfig;
use super::errors::AdapterError;
use super::lenient::{lenient, lenient_text, lenient_u64, lenient_vec};
use super::urls::{absolutize_url, resolve_asset_image_url, ImageCandidates};

/// 后端文档记录（只声明用到的字段）
///
/// 除了 `id` 以外的字段都是宽松解析的，`null` 或类型不对时退化为空值。
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ExternalDocument {
    #[serde(deserialize_with = "lenient_text")]
    pub uuid: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub label: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub description: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub datetime_created: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub document_type: Option<ExternalDocumentType>,
    #[serde(deserialize_with = "lenient")]
    pub file_latest: Option<ExternalFile>,
    #[serde(deserialize_with = "lenient_text")]
    pub thumbnail_url: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub preview_url: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub download_url: Option<String>,
    #[serde(deserialize_with = "lenient_vec")]
    pub tags: Vec<ExternalTag>,
    #[serde(deserialize_with = "lenient_vec")]
    pub metadata: Vec<ExternalMetadata>,
    pub ai_analysis: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ExternalDocumentType {
    pub id: Option<Value>,
    #[serde(deserialize_with = "lenient_text")]
    pub label: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ExternalFile {
    pub id: Option<Value>,
    #[serde(deserialize_with = "lenient_text")]
    pub filename: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub mimetype: Option<String>,
    #[serde(deserialize_with = "lenient_u64")]
    pub size: Option<u64>,
    #[serde(deserialize_with = "lenient_text")]
    pub timestamp: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub download_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ExternalTag {
    pub id: Option<Value>,
    #[serde(deserialize_with = "lenient_text")]
    pub label: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub color: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ExternalMetadataType {
    pub id: Option<Value>,
    #[serde(deserialize_with = "lenient_text")]
    pub name: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub label: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ExternalMetadata {
    pub id: Option<Value>,
    #[serde(deserialize_with = "lenient")]
    pub metadata_type: Option<ExternalMetadataType>,
    pub value: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tag {
    pub id: Option<String>,
    pub label: String,
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetadataEntry {
    pub id: Option<String>,
    pub type_id: Option<String>,
    pub name: String,
    pub label: Option<String>,
    pub value: Option<String>,
}

/// 前端使用的资源模型
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Asset {
    pub id: String,
    pub uuid: Option<String>,
    pub label: String,
    pub description: Option<String>,
    pub filename: Option<String>,
    pub mime_type: Option<String>,
    pub size: Option<u64>,
    pub document_type: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    /// 最新文件版本的时间
    pub updated_at: Option<DateTime<Utc>>,
    /// 总是绝对地址，没有图片时是占位图
    pub thumbnail_url: String,
    pub preview_url: Option<String>,
    pub download_url: Option<String>,
    pub tags: Vec<Tag>,
    pub metadata: Vec<MetadataEntry>,
    pub ai_analysis: Option<AiAnalysis>,
}

/// 解析 id，数字和字符串都接受
pub(crate) fn parse_id(value: Option<&Value>) -> Result<String, AdapterError> {
    match value {
        None | Some(Value::Null) => Err(AdapterError::MissingField("id")),
        Some(Value::Number(id)) => Ok(id.to_string()),
        Some(Value::String(id)) if !id.trim().is_empty() => Ok(id.trim().to_string()),
        Some(other) => Err(AdapterError::InvalidField {
            field: "id",
            reason: format!("expected number or string, got {}", other),
        }),
    }
}

pub(crate) fn optional_id(value: Option<&Value>) -> Option<String> {
    parse_id(value).ok()
}

/// RFC 3339，或者不带时区的时间（按 UTC 处理）
pub(crate) fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|text| text.trim().to_string()).filter(|text| !text.is_empty())
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        other => Some(other.to_string()),
    }
}

fn adapt_tag(tag: ExternalTag) -> Option<Tag> {
    let label = non_empty(tag.label)?;
    Some(Tag {
        id: optional_id(tag.id.as_ref()),
        label,
        color: non_empty(tag.color),
    })
}

fn adapt_metadata(entry: ExternalMetadata) -> Option<MetadataEntry> {
    let metadata_type = entry.metadata_type.unwrap_or_default();
    let name = non_empty(metadata_type.name).or_else(|| non_empty(metadata_type.label.clone()))?;

    Some(MetadataEntry {
        id: optional_id(entry.id.as_ref()),
        type_id: optional_id(metadata_type.id.as_ref()),
        name,
        label: non_empty(metadata_type.label),
        value: entry.value.as_ref().and_then(scalar_text),
    })
}

/// 适配单个文档
///
/// 只有缺少 `id` 会失败，其余字段缺失时退化为 `None` 或默认值。
pub fn adapt_document(config: &AdapterConfig, value: &Value) -> Result<Asset, AdapterError> {
    let Value::Object(fields) = value else {
        return Err(AdapterError::Malformed(format!("expected document object, got {}", value)));
    };
    let id = parse_id(fields.get("id"))?;
    let document = ExternalDocument::deserialize(value)?;

    let file = document.file_latest.unwrap_or_default();
    let filename = non_empty(file.filename);
    let label = non_empty(document.label)
        .or_else(|| filename.clone())
        .unwrap_or_else(|| format!("Document {}", id));

    let thumbnail_url = resolve_asset_image_url(
        config,
        &ImageCandidates {
            document_id: Some(&id),
            thumbnail_url: document.thumbnail_url.as_deref(),
            preview_url: document.preview_url.as_deref(),
            download_url: document.download_url.as_deref(),
        },
    );
    let preview_url = non_empty(document.preview_url).map(|url| absolutize_url(config, &url));
    let download_url = non_empty(document.download_url)
        .or_else(|| non_empty(file.download_url))
        .map(|url| absolutize_url(config, &url));

    let ai_analysis = if config.ai_analysis_enabled() {
        document
            .ai_analysis
            .as_ref()
            .filter(|value| !value.is_null())
            .map(adapt_ai_analysis)
    } else {
        None
    };

    Ok(Asset {
        id,
        uuid: non_empty(document.uuid),
        label,
        description: non_empty(document.description),
        filename,
        mime_type: non_empty(file.mimetype),
        size: file.size,
        document_type: document.document_type.and_then(|kind| non_empty(kind.label)),
        created_at: document.datetime_created.as_deref().and_then(parse_timestamp),
        updated_at: file.timestamp.as_deref().and_then(parse_timestamp),
        thumbnail_url,
        preview_url,
        download_url,
        tags: document.tags.into_iter().filter_map(adapt_tag).collect(),
        metadata: document.metadata.into_iter().filter_map(adapt_metadata).collect(),
        ai_analysis,
    })
}
