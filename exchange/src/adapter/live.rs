use super::{AdapterError, Backend};
use crate::{Bar, SeriesKey};

use reqwest::Url;
use serde::Deserialize;
use smallvec::SmallVec;

/// پیام‌های جریان زنده کندل‌ها
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    /// دسته‌ای از کندل‌ها برای پر کردن فاصله پس از اتصال (Backfill)
    Backfill(Vec<Bar>),
    /// کندل تکمیل‌شده و/یا کندل در حال شکل‌گیری
    Update {
        completed_bar: Option<Bar>,
        current_bar: Option<Bar>,
    },
}

impl FeedMessage {
    /// کندل‌های یک بروزرسانی به ترتیب اعمال: ابتدا کندل تکمیل‌شده، سپس کندل جاری
    pub fn update_bars(&self) -> SmallVec<[Bar; 2]> {
        match self {
            FeedMessage::Backfill(_) => SmallVec::new(),
            FeedMessage::Update {
                completed_bar,
                current_bar,
            } => completed_bar.iter().chain(current_bar.iter()).copied().collect(),
        }
    }
}

#[derive(Deserialize)]
struct DeUpdate {
    #[serde(default)]
    completed_bar: Option<Bar>,
    #[serde(default)]
    current_bar: Option<Bar>,
}

/// `GET /ws[-ha]/live/{symbol}/{interval}/{timezone}`
pub fn feed_url(backend: &Backend, key: &SeriesKey) -> Url {
    backend.ws(&[
        key.candle_type.ws_prefix(),
        "live",
        &key.symbol,
        &key.interval.to_string(),
        &key.timezone,
    ])
}

/// تجزیه یک فریم متنی جریان زنده؛ آرایه یعنی Backfill و شیء یعنی بروزرسانی
pub fn parse_feed_message(payload: &[u8]) -> Result<FeedMessage, AdapterError> {
    let first = payload
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .ok_or_else(|| AdapterError::ParseError("empty feed message".to_string()))?;

    match first {
        b'[' => {
            let bars: Vec<Bar> = sonic_rs::from_slice(payload)
                .map_err(|e| AdapterError::ParseError(format!("backfill: {e}")))?;
            Ok(FeedMessage::Backfill(bars))
        }
        b'{' => {
            let update: DeUpdate = sonic_rs::from_slice(payload)
                .map_err(|e| AdapterError::ParseError(format!("update: {e}")))?;

            if update.completed_bar.is_none() && update.current_bar.is_none() {
                return Err(AdapterError::ParseError(
                    "update carries neither completed_bar nor current_bar".to_string(),
                ));
            }

            Ok(FeedMessage::Update {
                completed_bar: update.completed_bar,
                current_bar: update.current_bar,
            })
        }
        other => Err(AdapterError::ParseError(format!(
            "unexpected feed message starting with {:?}",
            *other as char
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CandleType, Timeframe};

    #[test]
    fn feed_url_uses_candle_prefix() {
        let backend = Backend::new("http://localhost:8000").unwrap();
        let key = SeriesKey {
            symbol: "SPY".into(),
            interval: Timeframe::M5,
            timezone: "UTC".into(),
            candle_type: CandleType::HeikinAshi,
        };

        assert_eq!(
            feed_url(&backend, &key).as_str(),
            "ws://localhost:8000/ws-ha/live/SPY/5m/UTC"
        );
    }

    #[test]
    fn parses_backfill_array() {
        let msg = parse_feed_message(
            br#" [{"time":60,"open":1,"high":2,"low":0,"close":1,"volume":3},
                  {"time":120,"open":1,"high":2,"low":0,"close":1,"volume":4}]"#,
        )
        .unwrap();

        match msg {
            FeedMessage::Backfill(bars) => assert_eq!(bars.len(), 2),
            other => panic!("expected backfill, got {other:?}"),
        }
    }

    #[test]
    fn parses_incremental_update_in_order() {
        let msg = parse_feed_message(
            br#"{"completed_bar":{"time":60,"open":1,"high":2,"low":0,"close":1,"volume":3},
                 "current_bar":{"time":120,"open":1,"high":1,"low":1,"close":1,"volume":0}}"#,
        )
        .unwrap();

        let times: Vec<i64> = msg.update_bars().iter().map(|b| b.time).collect();
        assert_eq!(times, vec![60, 120]);
    }

    #[test]
    fn rejects_malformed_frames() {
        assert!(parse_feed_message(b"").is_err());
        assert!(parse_feed_message(b"{}").is_err());
        assert!(parse_feed_message(b"pong").is_err());
        assert!(parse_feed_message(br#"[{"time":"x"}]"#).is_err());
    }
}
