pub mod adapter;
pub mod connect;
mod limiter;

pub use adapter::{AdapterError, Backend, CloseReason, ConnectionId, StreamEvent};

use serde::{Deserialize, Deserializer, Serialize};

use std::collections::BTreeMap;
use std::{fmt, str::FromStr};

/// بازه‌های زمانی مختلف (Timeframes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Timeframe {
    M1,  // ۱ دقیقه
    M3,  // ۳ دقیقه
    M5,  // ۵ دقیقه
    M10, // ۱۰ دقیقه
    M15, // ۱۵ دقیقه
    M30, // ۳۰ دقیقه
    H1,  // ۱ ساعت
    H2,  // ۲ ساعت
    H4,  // ۴ ساعت
    H12, // ۱۲ ساعت
    D1,  // ۱ روز
    W1,  // ۱ هفته
}

impl Timeframe {
    pub const ALL: [Timeframe; 12] = [
        Timeframe::M1,
        Timeframe::M3,
        Timeframe::M5,
        Timeframe::M10,
        Timeframe::M15,
        Timeframe::M30,
        Timeframe::H1,
        Timeframe::H2,
        Timeframe::H4,
        Timeframe::H12,
        Timeframe::D1,
        Timeframe::W1,
    ];

    pub fn to_minutes(self) -> u32 {
        match self {
            Timeframe::M1 => 1,
            Timeframe::M3 => 3,
            Timeframe::M5 => 5,
            Timeframe::M10 => 10,
            Timeframe::M15 => 15,
            Timeframe::M30 => 30,
            Timeframe::H1 => 60,
            Timeframe::H2 => 120,
            Timeframe::H4 => 240,
            Timeframe::H12 => 720,
            Timeframe::D1 => 1440,
            Timeframe::W1 => 10_080,
        }
    }

    pub fn to_seconds(self) -> i64 {
        i64::from(self.to_minutes()) * 60
    }

    fn as_str(self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M3 => "3m",
            Timeframe::M5 => "5m",
            Timeframe::M10 => "10m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H2 => "2h",
            Timeframe::H4 => "4h",
            Timeframe::H12 => "12h",
            Timeframe::D1 => "1d",
            Timeframe::W1 => "1w",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTimeframe(pub String);

impl fmt::Display for InvalidTimeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid timeframe: {:?}", self.0)
    }
}

impl std::error::Error for InvalidTimeframe {}

impl FromStr for Timeframe {
    type Err = InvalidTimeframe;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim();
        Timeframe::ALL
            .iter()
            .copied()
            .find(|tf| tf.as_str().eq_ignore_ascii_case(normalized))
            .ok_or_else(|| InvalidTimeframe(s.to_string()))
    }
}

impl Serialize for Timeframe {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Timeframe {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// نوع کندل‌ها؛ هر نوع مسیر جداگانه‌ای در سرور دارد ولی شکل داده یکسان است
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CandleType {
    #[default]
    Regular, // کندل معمولی
    HeikinAshi, // هیکن‌آشی
    Tick,       // تیک
}

impl CandleType {
    /// مسیر REST مربوط به دریافت داده‌های تاریخی
    pub fn rest_path(self) -> &'static str {
        match self {
            CandleType::Regular => "historical",
            CandleType::HeikinAshi => "heikin-ashi",
            CandleType::Tick => "tick",
        }
    }

    /// پیشوند مسیر وب‌سوکت زنده
    pub fn ws_prefix(self) -> &'static str {
        match self {
            CandleType::HeikinAshi => "ws-ha",
            CandleType::Regular | CandleType::Tick => "ws",
        }
    }
}

impl fmt::Display for CandleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CandleType::Regular => write!(f, "Regular"),
            CandleType::HeikinAshi => write!(f, "Heikin-Ashi"),
            CandleType::Tick => write!(f, "Tick"),
        }
    }
}

/// اطلاعات یک کندل (Bar)
///
/// `time` بر حسب ثانیه یونیکس است و کلید یکتای هر سری محسوب می‌شود.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    #[serde(alias = "unix_timestamp", deserialize_with = "de_unix_seconds")]
    pub time: i64, // زمان شروع کندل
    pub open: f64,  // قیمت باز شدن
    pub high: f64,  // بالاترین قیمت
    pub low: f64,   // پایین‌ترین قیمت
    pub close: f64, // قیمت بسته شدن
    #[serde(default, deserialize_with = "de_volume")]
    pub volume: f64, // حجم
}

impl Bar {
    pub fn new(time: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            time,
            open,
            high,
            low,
            close,
            volume: volume.max(0.0),
        }
    }
}

/// شناسه یکتای یک سری داده: (نماد، بازه، منطقه زمانی، نوع کندل)
///
/// تغییر هر کدام از این ابعاد یعنی یک سری جدید و یک اتصال زنده جدید.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeriesKey {
    pub symbol: String,
    pub interval: Timeframe,
    pub timezone: String,
    pub candle_type: CandleType,
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{} [{}, {}]",
            self.symbol, self.interval, self.candle_type, self.timezone
        )
    }
}

/// یک خانه از نتایج رگرسیون برای (بازه زمانی، دوره بازگشت)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionCell {
    pub slope: f64,
    pub intercept: f64,
    pub r_value: f64,
    #[serde(default)]
    pub std_dev: f64,
    /// زمان اولین کندل پنجره رگرسیون
    pub start_timestamp: f64,
    #[serde(default)]
    pub data_count: u64,
    #[serde(default)]
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestParams {
    pub regression_length: u32,
    pub lookback_periods: Vec<u32>,
    pub timeframes: Vec<Timeframe>,
}

/// نتایج یک بازه زمانی؛ کلید نقشه دوره بازگشت (lookback) است
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeframeResults {
    pub timeframe: Timeframe,
    pub results: BTreeMap<u32, RegressionCell>,
    #[serde(default)]
    pub is_partial: bool,
    #[serde(default)]
    pub data_count: u64,
}

/// مجموعه کامل نتایج یک درخواست تحلیل رگرسیون
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionResultSet {
    pub request_params: RequestParams,
    pub regression_results: Vec<TimeframeResults>,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub is_partial: bool,
}

impl RegressionResultSet {
    pub fn timeframe(&self, timeframe: Timeframe) -> Option<&TimeframeResults> {
        self.regression_results
            .iter()
            .find(|row| row.timeframe == timeframe)
    }

    pub fn timeframe_mut(&mut self, timeframe: Timeframe) -> Option<&mut TimeframeResults> {
        self.regression_results
            .iter_mut()
            .find(|row| row.timeframe == timeframe)
    }
}

/// پارامترهای درخواست تحلیل رگرسیون (`POST /regression`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionRequest {
    pub symbol: String,
    pub exchange: String,
    pub regression_length: u32,
    pub lookback_periods: Vec<u32>,
    pub timeframes: Vec<Timeframe>,
}

impl RegressionRequest {
    pub fn live_params(&self, timezone: &str) -> LiveRegressionParams {
        LiveRegressionParams {
            symbol: self.symbol.clone(),
            exchange: self.exchange.clone(),
            timeframes: self.timeframes.clone(),
            regression_length: self.regression_length,
            lookback_periods: self.lookback_periods.clone(),
            timezone: timezone.to_string(),
        }
    }
}

/// پارامترهای اشتراک زنده رگرسیون؛ دقیقاً همان پارامترهای آخرین تحلیل
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LiveRegressionParams {
    pub symbol: String,
    pub exchange: String,
    pub timeframes: Vec<Timeframe>,
    pub regression_length: u32,
    pub lookback_periods: Vec<u32>,
    pub timezone: String,
}

/// Unix seconds may arrive as integers or as floats with a sub-second part
fn de_unix_seconds<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum DeUnix {
        Int(i64),
        Float(f64),
    }

    match DeUnix::deserialize(deserializer)? {
        DeUnix::Int(v) => Ok(v),
        DeUnix::Float(v) if v.is_finite() => Ok(v.round() as i64),
        DeUnix::Float(v) => Err(serde::de::Error::custom(format!(
            "invalid unix timestamp: {v}"
        ))),
    }
}

fn de_volume<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    f64::deserialize(deserializer).map(|v| v.max(0.0))
}

pub fn join_csv<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeframe_round_trips_through_wire_names() {
        for tf in Timeframe::ALL {
            let parsed: Timeframe = tf.to_string().parse().unwrap();
            assert_eq!(parsed, tf);
        }
        assert!("7m".parse::<Timeframe>().is_err());
        assert_eq!(Timeframe::H1.to_seconds(), 3600);
    }

    #[test]
    fn bar_accepts_historical_and_live_shapes() {
        let rest: Bar = serde_json::from_str(
            r#"{"unix_timestamp":1700000000,"open":1,"high":2,"low":0.5,"close":1.5,"volume":10}"#,
        )
        .unwrap();
        let live: Bar = serde_json::from_str(
            r#"{"time":1700000000.2,"open":1,"high":2,"low":0.5,"close":1.5}"#,
        )
        .unwrap();

        assert_eq!(rest.time, 1_700_000_000);
        assert_eq!(live.time, 1_700_000_000);
        assert_eq!(live.volume, 0.0);
    }

    #[test]
    fn negative_wire_volume_is_clamped() {
        let bar: Bar = serde_json::from_str(
            r#"{"time":1700000000,"open":1,"high":2,"low":0.5,"close":1.5,"volume":-3.5}"#,
        )
        .unwrap();
        assert_eq!(bar.volume, 0.0);
    }

    #[test]
    fn result_set_parses_string_lookback_keys() {
        let body = r#"{
            "request_params": {"regression_length": 20, "lookback_periods": [0, 1], "timeframes": ["1m"]},
            "regression_results": [{
                "timeframe": "1m",
                "results": {
                    "0": {"slope": 0.1, "intercept": 100.0, "r_value": 0.9, "std_dev": 0.4,
                          "start_timestamp": 1700000000, "data_count": 20, "timestamp": "2024-01-01T10:00:00"},
                    "1": {"slope": -0.1, "intercept": 101.0, "r_value": -0.8,
                          "start_timestamp": 1699999940}
                },
                "is_partial": false,
                "data_count": 21
            }],
            "timestamp": "2024-01-01T10:00:00",
            "is_partial": false
        }"#;

        let set: RegressionResultSet = serde_json::from_str(body).unwrap();
        let row = set.timeframe(Timeframe::M1).unwrap();

        assert_eq!(row.results.len(), 2);
        assert_eq!(row.results[&1].std_dev, 0.0);
        assert!(set.timeframe(Timeframe::M5).is_none());
    }
}
