use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::form_urlencoded;
use super::config::AdapterConfig;
use super::document::{optional_id, parse_id, parse_timestamp};
use super::errors::AdapterError;
use super::lenient::{lenient, lenient_text};

pub const UNKNOWN_USER: &str = "Unknown user";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommentAuthor {
    pub id: Option<String>,
    pub username: Option<String>,
    pub display_name: String,
    pub avatar_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comment {
    pub id: String,
    pub author: CommentAuthor,
    pub text: String,
    pub created_at: Option<DateTime<Utc>>,
    /// 后端没有编辑记录，始终为 false
    pub edited: bool,
}

/// 发给后端的评论
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MayanCommentPayload {
    pub text: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ExternalUser {
    id: Option<Value>,
    #[serde(deserialize_with = "lenient_text")]
    username: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    first_name: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    last_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ExternalComment {
    #[serde(deserialize_with = "lenient_text")]
    text: Option<String>,
    #[serde(alias = "datetime_created", deserialize_with = "lenient_text")]
    submit_date: Option<String>,
    #[serde(deserialize_with = "lenient")]
    user: Option<ExternalUser>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|text| !text.is_empty())
}

/// "名 姓"，其次名、姓、用户名
pub fn display_name(first_name: Option<&str>, last_name: Option<&str>, username: Option<&str>) -> String {
    match (first_name, last_name) {
        (Some(first), Some(last)) => format!("{} {}", first, last),
        (Some(first), None) => first.to_string(),
        (None, Some(last)) => last.to_string(),
        (None, None) => username.unwrap_or(UNKNOWN_USER).to_string(),
    }
}

/// 根据名字生成头像地址，同名总是得到同一个地址
pub fn avatar_url(config: &AdapterConfig, name: &str) -> String {
    let query = form_urlencoded::Serializer::new(String::new())
        .append_pair("name", name)
        .append_pair("size", "64")
        .append_pair("background", "random")
        .finish();
    format!("{}?{}", config.avatar_service_url(), query)
}

pub fn adapt_mayan_comment_to_frontend(config: &AdapterConfig, value: &Value) -> Result<Comment, AdapterError> {
    let Value::Object(fields) = value else {
        return Err(AdapterError::Malformed(format!("expected comment object, got {}", value)));
    };
    let id = parse_id(fields.get("id"))?;
    let comment = ExternalComment::deserialize(value)?;
    let user = comment.user.unwrap_or_default();

    let username = non_empty(&user.username);
    let display_name = display_name(non_empty(&user.first_name), non_empty(&user.last_name), username);

    Ok(Comment {
        id,
        author: CommentAuthor {
            id: optional_id(user.id.as_ref()),
            username: username.map(String::from),
            avatar_url: avatar_url(config, &display_name),
            display_name,
        },
        text: comment.text.unwrap_or_default(),
        created_at: comment.submit_date.as_deref().and_then(parse_timestamp),
        edited: false,
    })
}

pub fn adapt_frontend_comment_to_mayan(text: &str) -> MayanCommentPayload {
    MayanCommentPayload {
        text: text.trim().to_string(),
    }
}
