pub const DEFAULT_PLACEHOLDER_IMAGE: &str = "/static/images/placeholder.png";
pub const DEFAULT_AVATAR_SERVICE: &str = "https://ui-avatars.com/api/";

/// 适配器配置
///
/// 不可变；修改任何字段都会得到版本号加一的新配置，通常以 `Arc` 共享。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterConfig {
    version: u64,
    api_origin: String,
    placeholder_image_url: String,
    ai_analysis_enabled: bool,
    avatar_service_url: String,
}

impl AdapterConfig {
    pub fn new(api_origin: impl Into<String>) -> Self {
        Self {
            api_origin: api_origin.into(),
            ..Default::default()
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// 用于补全相对地址的源，例如 `https://dam.example.com`
    pub fn api_origin(&self) -> &str {
        &self.api_origin
    }

    pub fn placeholder_image_url(&self) -> &str {
        &self.placeholder_image_url
    }

    pub fn ai_analysis_enabled(&self) -> bool {
        self.ai_analysis_enabled
    }

    pub fn avatar_service_url(&self) -> &str {
        &self.avatar_service_url
    }

    fn next(&self) -> Self {
        Self {
            version: self.version + 1,
            ..self.clone()
        }
    }

    pub fn with_api_origin(&self, api_origin: impl Into<String>) -> Self {
        Self {
            api_origin: api_origin.into(),
            ..self.next()
        }
    }

    pub fn with_placeholder_image_url(&self, url: impl Into<String>) -> Self {
        Self {
            placeholder_image_url: url.into(),
            ..self.next()
        }
    }

    pub fn with_ai_analysis(&self, enabled: bool) -> Self {
        Self {
            ai_analysis_enabled: enabled,
            ..self.next()
        }
    }

    pub fn with_avatar_service_url(&self, url: impl Into<String>) -> Self {
        Self {
            avatar_service_url: url.into(),
            ..self.next()
        }
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            version: 1,
            api_origin: String::new(),
            placeholder_image_url: DEFAULT_PLACEHOLDER_IMAGE.to_string(),
            ai_analysis_enabled: true,
            avatar_service_url: DEFAULT_AVATAR_SERVICE.to_string(),
        }
    }
}
