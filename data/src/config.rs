use crate::chart::{ChartSettings, Selection};
use crate::history::{DEFAULT_CHUNK_LIMIT, Span};
use crate::reconnect::ReconnectPolicy;
use crate::visualizer::{DEFAULT_CHANNEL_WIDTH, DEFAULT_TOLERANCE, VisualizerSettings};

use chrono::{Duration as ChronoDuration, NaiveDateTime};
use exchange::Timeframe;
use exchange::adapter::historical::TIME_FORMAT;
use serde::{Deserialize, Deserializer, Serialize};

use std::path::Path;
use std::time::Duration;
use std::{fs, io};

pub const CONFIG_FILE: &str = "config.json";

/// بخش نامعتبر تنظیمات به جای خطا، مقدار پیش‌فرض همان بخش را می‌گیرد
pub fn ok_or_default<'a, T, D>(deserializer: D) -> Result<T, D::Error>
where
    T: Deserialize<'a> + Default,
    D: Deserializer<'a>,
{
    let v: serde_json::Value = Deserialize::deserialize(deserializer)?;
    Ok(T::deserialize(v).unwrap_or_default())
}

/// تنظیمات کلی برنامه
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    #[serde(deserialize_with = "ok_or_default")]
    pub backend: BackendConfig, // آدرس سرور
    #[serde(deserialize_with = "ok_or_default")]
    pub selection: Selection, // نماد و بازه اولیه
    #[serde(deserialize_with = "ok_or_default")]
    pub history: HistoryConfig, // بازه بارگذاری تاریخی
    #[serde(deserialize_with = "ok_or_default")]
    pub live: LiveConfig, // حالت زنده و سیاست اتصال مجدد
    #[serde(deserialize_with = "ok_or_default")]
    pub session: SessionConfig,
    #[serde(deserialize_with = "ok_or_default")]
    pub regression: RegressionSettings, // پارامترهای تحلیل رگرسیون
    #[serde(deserialize_with = "ok_or_default")]
    pub visualizer: VisualizerConfig, // نمایش خطوط رگرسیون
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub start_time: Option<String>, // به قالب `%Y-%m-%d %H:%M:%S`
    pub end_time: Option<String>,
    pub window_minutes: u32, // اگر زمان‌ها داده نشوند: این تعداد دقیقه تا اکنون
    pub chunk_limit: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            start_time: None,
            end_time: None,
            window_minutes: 24 * 60,
            chunk_limit: DEFAULT_CHUNK_LIMIT,
        }
    }
}

impl HistoryConfig {
    /// بازه بارگذاری؛ `now` ساعت دیواری منطقه زمانی نمودار است
    pub fn span(&self, now: NaiveDateTime) -> Span {
        let parse = |s: &Option<String>| {
            s.as_deref().and_then(|s| {
                NaiveDateTime::parse_from_str(s, TIME_FORMAT)
                    .inspect_err(|e| log::warn!("Ignoring history time {s:?}: {e}"))
                    .ok()
            })
        };
        let window = ChronoDuration::minutes(i64::from(self.window_minutes.max(1)));

        match (parse(&self.start_time), parse(&self.end_time)) {
            (Some(start), Some(end)) => Span { start, end },
            (Some(start), None) => Span {
                start,
                end: start + window,
            },
            (None, Some(end)) => Span {
                start: end - window,
                end,
            },
            (None, None) => Span {
                start: now - window,
                end: now,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LiveConfig {
    pub enabled: bool,
    pub reconnect_base_delay_ms: u64,
    pub max_reconnect_attempts: u32,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            reconnect_base_delay_ms: 1_000,
            max_reconnect_attempts: 5,
        }
    }
}

impl LiveConfig {
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(self.reconnect_base_delay_ms.max(1)),
            max_attempts: self.max_reconnect_attempts,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    pub heartbeat_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { heartbeat_secs: 60 }
    }
}

/// پارامترهای تحلیل رگرسیون
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RegressionSettings {
    pub regression_length: u32,
    pub lookback_periods: Vec<u32>,
    pub timeframes: Vec<Timeframe>,
    pub live_updates: bool, // اشتراک زنده پس از تحلیل
    pub heartbeat_secs: u64,
}

impl Default for RegressionSettings {
    fn default() -> Self {
        Self {
            regression_length: 20,
            lookback_periods: vec![0, 1, 2, 3, 5],
            timeframes: vec![Timeframe::M1],
            live_updates: true,
            heartbeat_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct VisualizerConfig {
    pub enabled: bool,
    pub tolerance_secs: f64,
    pub channels: bool,
    pub channel_width: f64,
    pub range_debounce_ms: u64,
    pub live_redraw_ms: Option<u64>,
}

impl Default for VisualizerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tolerance_secs: DEFAULT_TOLERANCE,
            channels: true,
            channel_width: DEFAULT_CHANNEL_WIDTH,
            range_debounce_ms: 250,
            live_redraw_ms: None,
        }
    }
}

impl From<VisualizerConfig> for VisualizerSettings {
    fn from(cfg: VisualizerConfig) -> Self {
        Self {
            tolerance: if cfg.tolerance_secs.is_finite() && cfg.tolerance_secs > 0.0 {
                cfg.tolerance_secs
            } else {
                DEFAULT_TOLERANCE
            },
            channels: cfg.channels,
            channel_width: cfg.channel_width,
            range_debounce: Duration::from_millis(cfg.range_debounce_ms),
            live_redraw: cfg
                .live_redraw_ms
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis),
        }
    }
}

impl Config {
    /// خواندن تنظیمات از فایل؛ نبود یا خرابی فایل یعنی تنظیمات پیش‌فرض
    pub fn load(path: &Path) -> Config {
        match fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                log::error!(
                    "Failed to parse config {}: {e}. Using defaults.",
                    path.display()
                );
                Config::default()
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::info!("No config at {}, using defaults", path.display());
                Config::default()
            }
            Err(e) => {
                log::error!(
                    "Failed to read config {}: {e}. Using defaults.",
                    path.display()
                );
                Config::default()
            }
        }
    }

    pub fn from_json(contents: &str) -> Result<Config, serde_json::Error> {
        serde_json::from_str(contents)
    }

    pub fn chart_settings(&self) -> ChartSettings {
        ChartSettings {
            heartbeat_interval: Duration::from_secs(self.session.heartbeat_secs.max(1)),
            chunk_limit: self.history.chunk_limit,
            reconnect: self.live.policy(),
            regression_heartbeat: Duration::from_secs(self.regression.heartbeat_secs.max(1)),
            visualizer: self.visualizer.into(),
            show_regression: self.visualizer.enabled,
        }
    }
}
