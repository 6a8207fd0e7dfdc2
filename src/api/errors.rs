use thiserror::Error;
use crate::adapter::AdapterError;
use crate::utils::classifier::{classify_reqwest_error, is_retryable};

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{message} (status {status})")]
    Status {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl ApiError {
    /// 机器可读的错误码
    pub fn code(&self) -> Option<String> {
        match self {
            Self::Http(err) => Some(classify_reqwest_error(err).to_string()),
            Self::Status { status, code, .. } => code.clone().or_else(|| Some(status.to_string())),
            Self::Adapter(_) | Self::InvalidUrl(_) => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Adapter(_) | Self::InvalidUrl(_) => false,
            _ => is_retryable(self.code().as_deref()),
        }
    }
}

pub type Result<T, E = ApiError> = std::result::Result<T, E>;
