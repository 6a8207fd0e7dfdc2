use thiserror::Error;

/// 单条记录的适配失败，不影响同一批次的其他记录
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdapterError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid field {field}: {reason}")]
    InvalidField {
        field: &'static str,
        reason: String,
    },

    #[error("Malformed record: {0}")]
    Malformed(String),
}

impl From<serde_json::Error> for AdapterError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}
