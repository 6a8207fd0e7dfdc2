//! 错误码提取与分类
//!
//! 上传和接口失败都经过这里得到一个机器可读的错误码，
//! 再由错误码决定提示文案以及是否允许重试。

use serde_json::Value;
use crate::core::TransferFailure;

/// 无进度超时
pub const TIMEOUT_CODE: &str = "ETIMEDOUT";
/// 请求超时被中止
pub const ABORTED_CODE: &str = "ECONNABORTED";
/// 连接失败
pub const NETWORK_CODE: &str = "ERR_NETWORK";
/// 4xx 响应
pub const BAD_REQUEST_CODE: &str = "ERR_BAD_REQUEST";
/// 5xx 或无法解析的响应
pub const BAD_RESPONSE_CODE: &str = "ERR_BAD_RESPONSE";
/// 读取本地文件失败
pub const FILE_READ_CODE: &str = "ERR_FILE_READ";
pub const UNKNOWN_CODE: &str = "ERR_UNKNOWN";

/// 从任意形状的错误中提取错误码
///
/// 依次尝试：
/// 1. `code`
/// 2. `response.data.error.code`，然后 `response.data.errors.code`
/// 3. `response.data.code`
///
/// 任何输入都不会 panic，找不到时返回 `None`。
pub fn extract_error_code(error: &Value) -> Option<String> {
    if let Some(code) = error.get("code").and_then(code_value) {
        return Some(code);
    }

    error
        .get("response")
        .and_then(|response| response.get("data"))
        .and_then(extract_from_response_data)
}

/// 对 `response.data` 执行第 2、3 步
pub fn extract_from_response_data(data: &Value) -> Option<String> {
    let nested = data
        .get("error")
        .and_then(|error| error.get("code"))
        .and_then(code_value)
        .or_else(|| data.get("errors").and_then(errors_code));

    nested.or_else(|| data.get("code").and_then(code_value))
}

/// 传输失败的错误码：网络层错误码优先，其次是响应体，最后是 HTTP 状态码
pub fn classify_transfer_failure(failure: &TransferFailure) -> Option<String> {
    match failure {
        TransferFailure::Cancelled => None,
        TransferFailure::Failed { code, body, status, .. } => code
            .clone()
            .or_else(|| body.as_ref().and_then(extract_from_response_data))
            .or_else(|| status.map(|status| status.to_string())),
    }
}

/// reqwest 错误对应的网络层错误码
pub fn classify_reqwest_error(error: &reqwest::Error) -> &'static str {
    if error.is_timeout() {
        ABORTED_CODE
    } else if error.is_connect() || error.is_request() || error.is_body() {
        NETWORK_CODE
    } else if let Some(status) = error.status() {
        if status.is_client_error() {
            BAD_REQUEST_CODE
        } else {
            BAD_RESPONSE_CODE
        }
    } else if error.is_decode() {
        BAD_RESPONSE_CODE
    } else {
        UNKNOWN_CODE
    }
}

/// 面向用户的错误提示，未知错误码时使用 `fallback`
pub fn user_message(code: Option<&str>, fallback: &str) -> String {
    let message = match code {
        Some(TIMEOUT_CODE) | Some(ABORTED_CODE) => "The upload timed out. Check your connection and try again.",
        Some(NETWORK_CODE) => "Network error. Check your connection and try again.",
        Some(FILE_READ_CODE) => "The file could not be read.",
        Some("file_too_large") | Some("413") => "The file is too large for the server.",
        Some("not_authenticated") | Some("authentication_failed") | Some("401") => {
            "Your session has expired. Sign in again."
        }
        Some("permission_denied") | Some("403") => "You do not have permission to upload here.",
        Some("duplicate") => "This file has already been uploaded.",
        _ => return fallback.to_string(),
    };

    message.to_string()
}

/// 是否可以提供重试
pub fn is_retryable(code: Option<&str>) -> bool {
    let Some(code) = code else {
        return true;
    };

    if let Ok(status) = code.parse::<u16>() {
        return status >= 500 || status == 408 || status == 429;
    }

    !matches!(
        code,
        BAD_REQUEST_CODE
            | FILE_READ_CODE
            | "validation_error"
            | "invalid"
            | "file_too_large"
            | "not_authenticated"
            | "authentication_failed"
            | "permission_denied"
            | "duplicate"
    )
}

fn code_value(value: &Value) -> Option<String> {
    match value {
        Value::String(code) if !code.is_empty() => Some(code.clone()),
        Value::Number(code) => Some(code.to_string()),
        _ => None,
    }
}

/// `errors` 可能是对象，也可能是错误列表
fn errors_code(errors: &Value) -> Option<String> {
    match errors {
        Value::Array(items) => items.iter().find_map(|item| item.get("code").and_then(code_value)),
        other => other.get("code").and_then(code_value),
    }
}
