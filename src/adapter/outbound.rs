//! 写操作的请求体

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 纯数字的 id 以数字发送
fn id_value(id: &str) -> Value {
    let id = id.trim();
    match id.parse::<u64>() {
        Ok(number) => Value::from(number),
        Err(_) => Value::from(id),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagAttachPayload {
    pub tag: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetadataUpdatePayload {
    pub metadata_type_id: Value,
    pub value: String,
}

/// 前端对资源的修改，未设置的字段不会发送
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct AssetUpdate {
    pub label: Option<String>,
    pub description: Option<String>,
    pub language: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DocumentUpdatePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl DocumentUpdatePayload {
    pub fn is_empty(&self) -> bool {
        self.label.is_none() && self.description.is_none() && self.language.is_none()
    }
}

pub fn adapt_tag_attach(tag_id: &str) -> TagAttachPayload {
    TagAttachPayload { tag: id_value(tag_id) }
}

pub fn adapt_metadata_update(metadata_type_id: &str, value: &str) -> MetadataUpdatePayload {
    MetadataUpdatePayload {
        metadata_type_id: id_value(metadata_type_id),
        value: value.to_string(),
    }
}

/// 标题去掉首尾空白，空标题不发送；描述可以被清空
pub fn adapt_document_update(update: &AssetUpdate) -> DocumentUpdatePayload {
    DocumentUpdatePayload {
        label: update
            .label
            .as_deref()
            .map(str::trim)
            .filter(|label| !label.is_empty())
            .map(String::from),
        description: update.description.clone(),
        language: update.language.clone(),
    }
}
