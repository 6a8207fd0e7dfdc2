//! 后端响应适配
//!
//! 把文档管理后端的嵌套结构转换为稳定的内部模型，以及反向生成写操作的请求体。
//! 这里的函数都是纯函数，不做网络请求也不打日志。

mod ai;
mod comment;
mod config;
mod document;
mod errors;
mod lenient;
mod outbound;
mod pagination;
mod urls;

pub use ai::{adapt_ai_analysis, AiAnalysis, AiStatus, DetectedObject};
pub use comment::{
    adapt_frontend_comment_to_mayan, adapt_mayan_comment_to_frontend, avatar_url, display_name, Comment,
    CommentAuthor, MayanCommentPayload, UNKNOWN_USER,
};
pub use config::{AdapterConfig, DEFAULT_AVATAR_SERVICE, DEFAULT_PLACEHOLDER_IMAGE};
pub use document::{adapt_document, Asset, MetadataEntry, Tag};
pub use errors::AdapterError;
pub use outbound::{
    adapt_document_update, adapt_metadata_update, adapt_tag_attach, AssetUpdate, DocumentUpdatePayload,
    MetadataUpdatePayload, TagAttachPayload,
};
pub use pagination::{
    adapt_documents, adapt_paginated_response, adapt_paginated_response_with, fetch_next, PageLink, PageSource,
    PaginatedResponse, SkippedRecord,
};
pub use urls::{absolutize_url, first_page_image_path, resolve_asset_image_url, ImageCandidates};
