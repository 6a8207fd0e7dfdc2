//! 配置：TOML 文件加 `DAM_*` 环境变量覆盖

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::Deserialize;
use thiserror::Error;
use url::Url;
use crate::adapter::AdapterConfig;
use crate::core::UploadConfig;
use crate::uploaders::HttpTransportConfig;

pub const ENV_API_URL: &str = "DAM_API_URL";
pub const ENV_WS_URL: &str = "DAM_WS_URL";
pub const ENV_UPLOAD_CONCURRENCY: &str = "DAM_UPLOAD_CONCURRENCY";
pub const ENV_LOG_LEVEL: &str = "DAM_LOG_LEVEL";
pub const ENV_API_TOKEN: &str = "DAM_API_TOKEN";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid URL in {name}: {source}")]
    InvalidUrl {
        name: &'static str,
        source: url::ParseError,
    },

    #[error("Invalid value for {name}: {value}")]
    InvalidValue {
        name: &'static str,
        value: String,
    },
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct UploadSettings {
    pub concurrent: usize,
    pub inactivity_timeout_secs: u64,
    pub auto_start: bool,
    pub max_file_size: Option<u64>,
    pub allowed_mime_types: Vec<String>,
    pub chunk_size: usize,
    /// multipart 中文件的字段名
    pub file_field: String,
}

impl Default for UploadSettings {
    fn default() -> Self {
        let upload = UploadConfig::default();
        let transport = HttpTransportConfig::default();
        Self {
            concurrent: upload.concurrent,
            inactivity_timeout_secs: upload.inactivity_timeout.as_secs(),
            auto_start: upload.auto_start,
            max_file_size: upload.max_file_size,
            allowed_mime_types: upload.allowed_mime_types,
            chunk_size: transport.chunk_size,
            file_field: transport.file_field,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AdapterSettings {
    /// 不设置时使用 `api_url` 的源
    pub api_origin: Option<String>,
    pub placeholder_image_url: Option<String>,
    pub ai_analysis_enabled: bool,
    pub avatar_service_url: Option<String>,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            api_origin: None,
            placeholder_image_url: None,
            ai_analysis_enabled: true,
            avatar_service_url: None,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// 例如 `https://dam.example.com/api/v4/`，也可以是相对于页面的路径
    pub api_url: String,
    /// 显式的 WebSocket 地址
    pub ws_url: Option<String>,
    /// 不设置时为 `{api_url}documents/upload/`
    pub upload_endpoint: Option<String>,
    pub token: Option<String>,
    pub log_level: String,
    pub upload: UploadSettings,
    pub adapter: AdapterSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8000/api/v4/".to_string(),
            ws_url: None,
            upload_endpoint: None,
            token: None,
            log_level: "info".to_string(),
            upload: UploadSettings::default(),
            adapter: AdapterSettings::default(),
        }
    }
}

/// 解析后的服务地址
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub api_url: Url,
    pub ws_url: Url,
}

fn invalid_url(name: &'static str) -> impl FnOnce(url::ParseError) -> ConfigError {
    move |source| ConfigError::InvalidUrl { name, source }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// 用 `lookup` 读取环境变量覆盖配置，空值视为未设置
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(api_url) = non_empty(lookup(ENV_API_URL)) {
            self.api_url = api_url;
        }
        if let Some(ws_url) = non_empty(lookup(ENV_WS_URL)) {
            self.ws_url = Some(ws_url);
        }
        if let Some(token) = non_empty(lookup(ENV_API_TOKEN)) {
            self.token = Some(token);
        }
        if let Some(level) = non_empty(lookup(ENV_LOG_LEVEL)) {
            self.log_level = level;
        }
        if let Some(concurrent) = non_empty(lookup(ENV_UPLOAD_CONCURRENCY)) {
            self.upload.concurrent = match concurrent.parse::<usize>() {
                Ok(value) if value > 0 => value,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        name: ENV_UPLOAD_CONCURRENCY,
                        value: concurrent,
                    });
                }
            };
        }
        Ok(self)
    }

    /// 读取配置文件（可选）并应用进程环境变量
    pub fn from_env_and_file(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.with_env_overrides(|name| std::env::var(name).ok())
    }

    pub fn upload_config(&self) -> UploadConfig {
        UploadConfig {
            concurrent: self.upload.concurrent.max(1),
            inactivity_timeout: Duration::from_secs(self.upload.inactivity_timeout_secs.max(1)),
            auto_start: self.upload.auto_start,
            max_file_size: self.upload.max_file_size,
            allowed_mime_types: self.upload.allowed_mime_types.clone(),
            ..Default::default()
        }
    }

    pub fn transport_config(&self) -> HttpTransportConfig {
        HttpTransportConfig {
            chunk_size: self.upload.chunk_size,
            file_field: self.upload.file_field.clone(),
            token: self.token.clone(),
            ..Default::default()
        }
    }

    /// 上传地址，相对地址按 `api_url` 解析
    pub fn upload_endpoint(&self, page: Option<&Url>) -> Result<Url, ConfigError> {
        let endpoints = self.resolve_endpoints(page)?;
        let path = self.upload_endpoint.as_deref().unwrap_or("documents/upload/");
        endpoints.api_url.join(path).map_err(invalid_url("upload_endpoint"))
    }

    pub fn adapter_config(&self, page: Option<&Url>) -> Result<AdapterConfig, ConfigError> {
        let origin = match &self.adapter.api_origin {
            Some(origin) => origin.clone(),
            None => self.resolve_endpoints(page)?.api_url.origin().ascii_serialization(),
        };

        let mut config = AdapterConfig::new(origin).with_ai_analysis(self.adapter.ai_analysis_enabled);
        if let Some(url) = &self.adapter.placeholder_image_url {
            config = config.with_placeholder_image_url(url.clone());
        }
        if let Some(url) = &self.adapter.avatar_service_url {
            config = config.with_avatar_service_url(url.clone());
        }
        Ok(config)
    }

    /// 解析 API 和 WebSocket 地址
    ///
    /// - 显式配置的 `ws_url` 优先
    /// - 否则使用 API 的主机，协议随页面（没有页面时随 API）选择 `ws` 或 `wss`
    /// - API 地址是相对路径时，主机来自页面
    pub fn resolve_endpoints(&self, page: Option<&Url>) -> Result<Endpoints, ConfigError> {
        let api_url = match (Url::parse(&self.api_url), page) {
            (Ok(url), _) => url,
            (Err(url::ParseError::RelativeUrlWithoutBase), Some(page)) => {
                page.join(&self.api_url).map_err(invalid_url("api_url"))?
            }
            (Err(err), _) => return Err(invalid_url("api_url")(err)),
        };

        if let Some(ws_url) = &self.ws_url {
            let ws_url = match page {
                Some(page) => page.join(ws_url),
                None => Url::parse(ws_url),
            }
            .map_err(invalid_url("ws_url"))?;
            return Ok(Endpoints { api_url, ws_url });
        }

        let secure = page.unwrap_or(&api_url).scheme() == "https";
        let mut ws_url = api_url.clone();
        if ws_url.set_scheme(if secure { "wss" } else { "ws" }).is_err() || !ws_url.has_host() {
            return Err(ConfigError::InvalidValue {
                name: "api_url",
                value: self.api_url.clone(),
            });
        }
        ws_url.set_path("/ws");
        ws_url.set_query(None);
        ws_url.set_fragment(None);

        Ok(Endpoints { api_url, ws_url })
    }
}
