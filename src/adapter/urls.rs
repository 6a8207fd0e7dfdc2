use url::Url;
use super::config::AdapterConfig;

/// 后端返回的图片地址候选
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageCandidates<'a> {
    pub document_id: Option<&'a str>,
    pub thumbnail_url: Option<&'a str>,
    pub preview_url: Option<&'a str>,
    pub download_url: Option<&'a str>,
}

/// 把相对地址补全为绝对地址
///
/// 带协议的地址原样返回；源无法解析时返回原始地址，不会报错。
pub fn absolutize_url(config: &AdapterConfig, url: &str) -> String {
    if url.is_empty() || Url::parse(url).is_ok() {
        return url.to_string();
    }

    let Ok(api) = Url::parse(config.api_origin()) else {
        return url.to_string();
    };
    let origin = api.origin();
    if !origin.is_tuple() {
        return url.to_string();
    }

    Url::parse(&origin.ascii_serialization())
        .and_then(|base| base.join(url))
        .map(String::from)
        .unwrap_or_else(|_| url.to_string())
}

/// 第一页的渲染图
pub fn first_page_image_path(document_id: &str) -> String {
    format!("/api/v4/documents/{}/pages/1/image/", document_id)
}

/// 依次尝试缩略图、预览图、下载地址、第一页渲染图，都没有时返回占位图
pub fn resolve_asset_image_url(config: &AdapterConfig, candidates: &ImageCandidates<'_>) -> String {
    fn present(value: Option<&str>) -> Option<&str> {
        value.map(str::trim).filter(|value| !value.is_empty())
    }

    if let Some(url) = present(candidates.thumbnail_url)
        .or_else(|| present(candidates.preview_url))
        .or_else(|| present(candidates.download_url))
    {
        return absolutize_url(config, url);
    }

    match present(candidates.document_id) {
        Some(id) => absolutize_url(config, &first_page_image_path(id)),
        None => absolutize_url(config, config.placeholder_image_url()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AdapterConfig {
        AdapterConfig::new("https://dam.example.com/api/v4/")
    }

    #[test]
    fn test_absolute_urls_pass_through() {
        let url = "https://cdn.example.com/a.jpg";
        assert_eq!(absolutize_url(&config(), url), url);
        assert_eq!(absolutize_url(&config(), "data:image/png;base64,AAAA"), "data:image/png;base64,AAAA");
    }

    #[test]
    fn test_relative_urls_use_origin() {
        assert_eq!(absolutize_url(&config(), "/p.jpg"), "https://dam.example.com/p.jpg");
        assert_eq!(absolutize_url(&config(), "p.jpg"), "https://dam.example.com/p.jpg");
        assert_eq!(absolutize_url(&config(), "//cdn.example.com/p.jpg"), "https://cdn.example.com/p.jpg");
    }

    #[test]
    fn test_malformed_origin_keeps_relative_url() {
        let config = AdapterConfig::new("not a url");
        assert_eq!(absolutize_url(&config, "/p.jpg"), "/p.jpg");

        let config = AdapterConfig::new("mailto:someone@example.com");
        assert_eq!(absolutize_url(&config, "/p.jpg"), "/p.jpg");
    }

    #[test]
    fn test_thumbnail_fallback_chain() {
        let candidates = ImageCandidates {
            document_id: Some("7"),
            thumbnail_url: None,
            preview_url: Some("/p.jpg"),
            download_url: Some("/d.jpg"),
        };
        assert_eq!(resolve_asset_image_url(&config(), &candidates), "https://dam.example.com/p.jpg");

        let candidates = ImageCandidates {
            document_id: Some("7"),
            thumbnail_url: Some(""),
            ..Default::default()
        };
        assert_eq!(
            resolve_asset_image_url(&config(), &candidates),
            "https://dam.example.com/api/v4/documents/7/pages/1/image/"
        );
    }

    #[test]
    fn test_placeholder_when_nothing_resolves() {
        let url = resolve_asset_image_url(&config(), &ImageCandidates::default());
        assert_eq!(url, "https://dam.example.com/static/images/placeholder.png");
    }
}
