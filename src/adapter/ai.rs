//! AI 分析结果
//!
//! 分析服务写回的字段名并不统一（`ai_tags` / `tags`、`objects` / `detected_objects` 等），
//! 这里统一成一个结构。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use super::document::parse_timestamp;
use super::lenient::{lenient, lenient_f64, lenient_text, lenient_vec};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AiStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectedObject {
    pub label: String,
    /// 0..=1
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AiAnalysis {
    pub status: AiStatus,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub categories: Vec<String>,
    pub dominant_colors: Vec<String>,
    pub objects: Vec<DetectedObject>,
    pub provider: Option<String>,
    pub analyzed_at: Option<DateTime<Utc>>,
}

impl AiAnalysis {
    pub fn is_empty(&self) -> bool {
        self.description.is_none()
            && self.tags.is_empty()
            && self.categories.is_empty()
            && self.objects.is_empty()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawLabel {
    Text(String),
    Scored {
        #[serde(alias = "name", alias = "tag")]
        label: String,
        #[serde(default, alias = "score", deserialize_with = "lenient_f64")]
        confidence: Option<f64>,
    },
}

impl RawLabel {
    fn into_object(self) -> DetectedObject {
        match self {
            Self::Text(label) => DetectedObject { label, confidence: None },
            Self::Scored { label, confidence } => DetectedObject {
                label,
                confidence: confidence.and_then(normalize_confidence),
            },
        }
    }

    fn into_label(self) -> String {
        self.into_object().label
    }
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawAiAnalysis {
    #[serde(alias = "analysis_status", deserialize_with = "lenient")]
    status: AiStatus,
    #[serde(alias = "ai_description", alias = "caption", deserialize_with = "lenient_text")]
    description: Option<String>,
    #[serde(alias = "ai_tags", deserialize_with = "lenient_vec")]
    tags: Vec<RawLabel>,
    #[serde(alias = "ai_categories", deserialize_with = "lenient_vec")]
    categories: Vec<RawLabel>,
    #[serde(alias = "colors", deserialize_with = "lenient_vec")]
    dominant_colors: Vec<String>,
    #[serde(alias = "detected_objects", deserialize_with = "lenient_vec")]
    objects: Vec<RawLabel>,
    #[serde(alias = "ai_provider", deserialize_with = "lenient_text")]
    provider: Option<String>,
    #[serde(alias = "analysis_completed_at", deserialize_with = "lenient_text")]
    analyzed_at: Option<String>,
}

/// 置信度统一到 0..=1，百分数会被换算
fn normalize_confidence(value: f64) -> Option<f64> {
    if !value.is_finite() {
        return None;
    }
    let value = if value > 1.0 { value / 100.0 } else { value };
    Some(value.clamp(0.0, 1.0))
}

fn labels(raw: Vec<RawLabel>) -> Vec<String> {
    raw.into_iter()
        .map(RawLabel::into_label)
        .map(|label| label.trim().to_string())
        .filter(|label| !label.is_empty())
        .collect()
}

/// 适配 AI 分析数据
///
/// 结果也可能以 JSON 字符串的形式存放在元数据里。无法识别的输入得到
/// 状态为 [`AiStatus::Unknown`] 的空结果。
pub fn adapt_ai_analysis(value: &Value) -> AiAnalysis {
    if let Value::String(encoded) = value {
        return match serde_json::from_str::<Value>(encoded) {
            Ok(decoded @ Value::Object(_)) => adapt_ai_analysis(&decoded),
            _ => AiAnalysis::default(),
        };
    }

    let Ok(raw) = RawAiAnalysis::deserialize(value) else {
        return AiAnalysis::default();
    };

    AiAnalysis {
        status: raw.status,
        description: raw.description.map(|text| text.trim().to_string()).filter(|text| !text.is_empty()),
        tags: labels(raw.tags),
        categories: labels(raw.categories),
        dominant_colors: raw.dominant_colors,
        objects: raw.objects.into_iter().map(RawLabel::into_object).collect(),
        provider: raw.provider,
        analyzed_at: raw.analyzed_at.as_deref().and_then(parse_timestamp),
    }
}
