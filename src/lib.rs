pub mod adapter;
pub mod api;
pub mod config;
pub mod core;
pub mod logging;
pub mod uploaders;
pub mod utils;

// 重新导出常用类型
pub use crate::core::{
    FileRef,
    FileUploadProgress,
    Result,
    TaskError,
    Transport,
    UploadConfig,
    UploadError,
    UploadEvent,
    UploadId,
    UploadManager,
    UploadManagerHandle,
    UploadStatus,
    UploadTask,
};

pub use adapter::{AdapterConfig, Asset, Comment, PaginatedResponse};
pub use api::ApiClient;
pub use config::Config;
pub use uploaders::HttpTransport;

#[cfg(test)]
mod tests;
