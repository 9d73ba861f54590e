use super::{AdapterError, Backend};
use crate::{Bar, CandleType, SeriesKey};

use chrono::NaiveDateTime;
use reqwest::Url;
use serde::Deserialize;

pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// پارامترهای درخواست داده‌های تاریخی
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryQuery {
    pub session_token: String,
    pub exchange: String,
    pub key: SeriesKey,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
}

/// درخواست صفحه قدیمی‌تر با استفاده از مکان‌نمای سرور
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkQuery {
    pub candle_type: CandleType,
    pub request_id: String,
    pub limit: usize,
}

/// یک صفحه از داده‌های تاریخی
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryPage {
    pub bars: Vec<Bar>,
    pub request_id: Option<String>, // مکان‌نمای صفحه‌بندی
    pub is_partial: bool,           // آیا داده‌های قدیمی‌تری باقی مانده است؟
    pub message: Option<String>,
}

#[derive(Deserialize)]
struct DeHistory {
    candles: Option<Vec<Bar>>,
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    is_partial: bool,
    #[serde(default)]
    message: Option<String>,
}

impl TryFrom<DeHistory> for HistoryPage {
    type Error = AdapterError;

    fn try_from(de: DeHistory) -> Result<Self, Self::Error> {
        let Some(bars) = de.candles else {
            return Err(AdapterError::ParseError(format!(
                "candles missing from response: {}",
                de.message.unwrap_or_default()
            )));
        };

        Ok(HistoryPage {
            bars,
            request_id: de.request_id.filter(|id| !id.is_empty()),
            is_partial: de.is_partial,
            message: de.message,
        })
    }
}

pub fn history_url(backend: &Backend, query: &HistoryQuery) -> Url {
    let mut url = backend.http(&[query.key.candle_type.rest_path(), ""]);
    url.query_pairs_mut()
        .append_pair("session_token", &query.session_token)
        .append_pair("exchange", &query.exchange)
        .append_pair("token", &query.key.symbol)
        .append_pair("interval", &query.key.interval.to_string())
        .append_pair(
            "start_time",
            &query.start_time.format(TIME_FORMAT).to_string(),
        )
        .append_pair("end_time", &query.end_time.format(TIME_FORMAT).to_string())
        .append_pair("timezone", &query.key.timezone);
    url
}

pub fn chunk_url(backend: &Backend, query: &ChunkQuery) -> Url {
    let mut url = backend.http(&[query.candle_type.rest_path(), "chunk"]);
    url.query_pairs_mut()
        .append_pair("request_id", &query.request_id)
        .append_pair("limit", &query.limit.to_string());
    url
}

/// دریافت کندل‌های یک بازه زمانی (`GET /historical|heikin-ashi|tick/`)
pub async fn fetch_history(
    backend: &Backend,
    query: &HistoryQuery,
) -> Result<HistoryPage, AdapterError> {
    if query.start_time >= query.end_time {
        return Err(AdapterError::InvalidRequest(format!(
            "start_time {} is not before end_time {}",
            query.start_time, query.end_time
        )));
    }

    let url = history_url(backend, query);
    let de: DeHistory = super::get_json(&url).await?;
    let page = HistoryPage::try_from(de)?;

    log::debug!(
        "Fetched {} bars for {} (partial: {})",
        page.bars.len(),
        query.key,
        page.is_partial
    );
    Ok(page)
}

/// دریافت صفحه قدیمی‌تر (`GET /.../chunk`)
pub async fn fetch_chunk(
    backend: &Backend,
    query: &ChunkQuery,
) -> Result<HistoryPage, AdapterError> {
    let url = chunk_url(backend, query);
    let de: DeHistory = super::get_json(&url).await?;
    HistoryPage::try_from(de)
}
