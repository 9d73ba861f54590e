use super::{AdapterError, Backend};
use crate::{
    LiveRegressionParams, RegressionCell, RegressionRequest, RegressionResultSet, Timeframe,
    join_csv,
};

use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;

use std::collections::BTreeMap;

pub const HEARTBEAT_FRAME: &str = r#"{"type":"heartbeat"}"#;

/// بروزرسانی جزئی چند خانه از یک بازه زمانی
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RegressionPatch {
    pub timeframe: Timeframe,
    pub results: BTreeMap<u32, RegressionCell>,
}

/// پیام‌های جریان زنده رگرسیون
#[derive(Debug, Clone, PartialEq)]
pub enum RegressionMessage {
    SubscriptionConfirmed(Value), // تایید اشتراک
    Update(RegressionPatch),      // بروزرسانی زنده
    Error(String),                // خطای گزارش‌شده توسط سرور
    Heartbeat,                    // پاسخ ضربان
}

/// اجرای تحلیل کامل رگرسیون (`POST /regression`)
pub async fn run_analysis(
    backend: &Backend,
    request: &RegressionRequest,
) -> Result<RegressionResultSet, AdapterError> {
    if request.lookback_periods.is_empty() || request.timeframes.is_empty() {
        return Err(AdapterError::InvalidRequest(
            "regression needs at least one lookback period and one timeframe".to_string(),
        ));
    }

    let url = backend.http(&["regression"]);
    let body = serde_json::to_value(request)
        .map_err(|e| AdapterError::InvalidRequest(e.to_string()))?;

    super::post_json(&url, &body).await
}

/// `GET /ws/live-regression/{symbol}/{exchange}?timeframes&timezone&regression_length&lookback_periods`
pub fn stream_url(backend: &Backend, params: &LiveRegressionParams) -> Url {
    let mut url = backend.ws(&["ws", "live-regression", &params.symbol, &params.exchange]);
    url.query_pairs_mut()
        .append_pair("timeframes", &join_csv(&params.timeframes))
        .append_pair("timezone", &params.timezone)
        .append_pair("regression_length", &params.regression_length.to_string())
        .append_pair("lookback_periods", &join_csv(&params.lookback_periods));
    url
}

pub fn parse_regression_message(text: &str) -> Result<RegressionMessage, AdapterError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| AdapterError::ParseError(e.to_string()))?;

    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| AdapterError::ParseError("message without type".to_string()))?;

    match kind {
        "subscription_confirmed" => Ok(RegressionMessage::SubscriptionConfirmed(value)),
        "heartbeat" => Ok(RegressionMessage::Heartbeat),
        "error" => {
            let message = value
                .get("message")
                .or_else(|| value.get("error"))
                .and_then(Value::as_str)
                .unwrap_or("unspecified server error");
            Ok(RegressionMessage::Error(message.to_string()))
        }
        "live_regression_update" => {
            // fields are either top-level or nested under "data"
            let body = value.get("data").unwrap_or(&value);
            let patch = RegressionPatch::deserialize(body)
                .map_err(|e| AdapterError::ParseError(format!("live update: {e}")))?;
            Ok(RegressionMessage::Update(patch))
        }
        other => Err(AdapterError::ParseError(format!(
            "unknown message type {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_url_joins_lists() {
        let backend = Backend::new("https://charts.example.com").unwrap();
        let params = LiveRegressionParams {
            symbol: "SPY".into(),
            exchange: "NYSE".into(),
            timeframes: vec![Timeframe::M1, Timeframe::M5],
            regression_length: 20,
            lookback_periods: vec![0, 1, 2],
            timezone: "UTC".into(),
        };

        let url = stream_url(&backend, &params);
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.path(), "/ws/live-regression/SPY/NYSE");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs[0], ("timeframes".into(), "1m,5m".into()));
        assert_eq!(pairs[3], ("lookback_periods".into(), "0,1,2".into()));
    }

    #[test]
    fn parses_nested_and_flat_updates() {
        let cell = r#"{"slope":0.5,"intercept":10,"r_value":0.7,"std_dev":1,"start_timestamp":100,
                       "data_count":20,"timestamp":"2024-01-01T10:00:00"}"#;
        let nested = format!(
            r#"{{"type":"live_regression_update","data":{{"timeframe":"1m","results":{{"1":{cell}}}}}}}"#
        );
        let flat = format!(
            r#"{{"type":"live_regression_update","timeframe":"1m","results":{{"3":{cell}}}}}"#
        );

        match parse_regression_message(&nested).unwrap() {
            RegressionMessage::Update(patch) => {
                assert_eq!(patch.timeframe, Timeframe::M1);
                assert!(patch.results.contains_key(&1));
            }
            other => panic!("unexpected {other:?}"),
        }
        match parse_regression_message(&flat).unwrap() {
            RegressionMessage::Update(patch) => assert!(patch.results.contains_key(&3)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn classifies_control_messages() {
        assert_eq!(
            parse_regression_message(r#"{"type":"heartbeat"}"#).unwrap(),
            RegressionMessage::Heartbeat
        );
        assert_eq!(
            parse_regression_message(r#"{"type":"error","message":"bad symbol"}"#).unwrap(),
            RegressionMessage::Error("bad symbol".into())
        );
        assert!(parse_regression_message(r#"{"type":"surprise"}"#).is_err());
        assert!(parse_regression_message(r#"{"kind":"heartbeat"}"#).is_err());
        assert!(parse_regression_message("not json").is_err());
    }
}
