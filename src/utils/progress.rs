use std::time::{Duration, Instant};
use serde::Serialize;

/// 少于两个采样点时的速度/剩余时间文本
pub const CALCULATING: &str = "calculating...";

/// 速度为 0 或已无剩余字节时的剩余时间文本
pub const UNKNOWN: &str = "unknown";

/// 两个采样点之间的最小时间差，避免除以接近 0 的时间
pub const MIN_ELAPSED: Duration = Duration::from_millis(50);

/// 默认保留的采样点数量
pub const DEFAULT_WINDOW: usize = 20;

/// 一次进度采样
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSample {
    pub at: Instant,
    pub bytes: u64,
}

impl ProgressSample {
    pub fn new(at: Instant, bytes: u64) -> Self {
        Self { at, bytes }
    }
}

/// 根据采样计算出的速度与剩余时间
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    /// bytes/sec，少于两个采样点时为 0
    pub speed: f64,
    pub eta: Option<Duration>,
    pub speed_text: String,
    pub eta_text: String,
}

impl Default for ProgressSnapshot {
    fn default() -> Self {
        Self {
            speed: 0.0,
            eta: None,
            speed_text: CALCULATING.to_string(),
            eta_text: CALCULATING.to_string(),
        }
    }
}

/// 有界的采样窗口，超出容量时丢弃最老的样本
#[derive(Debug, Clone)]
pub struct SampleWindow {
    samples: Vec<ProgressSample>,
    capacity: usize,
}

impl SampleWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            samples: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, sample: ProgressSample) {
        self.samples.push(sample);
        if self.samples.len() > self.capacity {
            let excess = self.samples.len() - self.capacity;
            self.samples.drain(..excess);
        }
    }

    pub fn samples(&self) -> &[ProgressSample] {
        &self.samples
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for SampleWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

/// 瞬时速度 - 基于最近两个采样点
///
/// 少于两个采样点时返回 `None`。字节数回退时视为速度 0。
pub fn calculate_speed(samples: &[ProgressSample]) -> Option<f64> {
    let [.., previous, latest] = samples else {
        return None;
    };

    let delta = latest.bytes.saturating_sub(previous.bytes);
    let elapsed = latest
        .at
        .saturating_duration_since(previous.at)
        .max(MIN_ELAPSED)
        .as_secs_f64();

    Some(delta as f64 / elapsed)
}

/// 预计剩余时间
pub fn calculate_eta(remaining_bytes: u64, speed: f64) -> Option<Duration> {
    if remaining_bytes == 0 || speed <= 0.0 || !speed.is_finite() {
        return None;
    }

    Some(Duration::from_secs_f64(remaining_bytes as f64 / speed))
}

/// 根据采样历史生成速度和剩余时间
pub fn snapshot(samples: &[ProgressSample], total_bytes: u64) -> ProgressSnapshot {
    let Some(speed) = calculate_speed(samples) else {
        return ProgressSnapshot::default();
    };

    let uploaded = samples.last().map(|s| s.bytes).unwrap_or(0);
    let remaining = total_bytes.saturating_sub(uploaded);
    let eta = calculate_eta(remaining, speed);

    ProgressSnapshot {
        speed,
        eta,
        speed_text: format_speed(speed),
        eta_text: eta.map(format_duration).unwrap_or_else(|| UNKNOWN.to_string()),
    }
}

/// 格式化字节数
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const UNIT_SIZE: f64 = 1024.0;

    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= UNIT_SIZE && unit_index < UNITS.len() - 1 {
        size /= UNIT_SIZE;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// 格式化速度
pub fn format_speed(bytes_per_second: f64) -> String {
    let bytes = if bytes_per_second.is_finite() && bytes_per_second > 0.0 {
        bytes_per_second as u64
    } else {
        0
    };

    format!("{}/s", format_file_size(bytes))
}

/// 格式化持续时间，不足一秒向上取整
pub fn format_duration(duration: Duration) -> String {
    let mut secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs += 1;
    }

    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
