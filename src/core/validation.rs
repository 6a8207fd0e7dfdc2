//! Validation performed before a task is created.

use super::errors::ValidationError;
use super::task::FileRef;
use super::types::UploadConfig;

pub fn validate_file(file: &FileRef, config: &UploadConfig) -> Result<(), ValidationError> {
    if file.size == 0 {
        return Err(ValidationError::Empty { name: file.name.clone() });
    }

    if let Some(max) = config.max_file_size {
        if file.size > max {
            return Err(ValidationError::TooLarge {
                name: file.name.clone(),
                size: file.size,
                max,
            });
        }
    }

    if !config.allowed_mime_types.is_empty()
        && !config.allowed_mime_types.iter().any(|pattern| mime_matches(pattern, &file.mime_type))
    {
        return Err(ValidationError::UnsupportedType {
            name: file.name.clone(),
            mime_type: file.mime_type.clone(),
        });
    }

    Ok(())
}

/// `image/*` 匹配所有图片类型，`*/*` 匹配全部
fn mime_matches(pattern: &str, mime_type: &str) -> bool {
    let pattern = pattern.trim().to_ascii_lowercase();
    let mime_type = mime_type.to_ascii_lowercase();

    match pattern.strip_suffix("/*") {
        Some("*") => true,
        Some(prefix) => mime_type
            .split_once('/')
            .is_some_and(|(kind, _)| kind == prefix),
        None => pattern == mime_type,
    }
}

/// 按扩展名推断 MIME 类型，未知时为 `application/octet-stream`
pub fn guess_mime_type(file_name: &str) -> String {
    mime_guess::from_path(file_name).first_or_octet_stream().essence_str().to_string()
}
