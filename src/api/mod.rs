//! 文档管理后端的接口客户端，所有响应都经过适配层

mod client;
mod errors;

pub use client::ApiClient;
pub use errors::{ApiError, Result};
