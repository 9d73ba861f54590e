pub mod historical;
pub mod live;
pub mod regression;
pub mod session;
pub mod stream;

use crate::limiter;

use reqwest::{Method, StatusCode, Url};

use std::fmt;

/// انواع خطاهای لایه ارتباط با سرور
#[derive(thiserror::Error, Debug)]
pub enum AdapterError {
    #[error("{0}")]
    FetchError(#[from] reqwest::Error), // خطای شبکه
    #[error("Parsing: {0}")]
    ParseError(String), // پاسخ نامعتبر
    #[error("Stream: {0}")]
    WebsocketError(String), // خطای وب‌سوکت
    #[error("Invalid request: {0}")]
    InvalidRequest(String), // درخواست نامعتبر
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: StatusCode, body: String }, // پاسخ غیر 2xx
    #[error("Session rejected: {0}")]
    SessionRejected(String), // نشست منقضی یا نامعتبر
}

impl AdapterError {
    /// آیا سرور نشست فعلی را رد کرده است؟
    pub fn is_session_rejection(&self) -> bool {
        match self {
            AdapterError::SessionRejected(_) => true,
            AdapterError::HttpStatus { status, .. } => matches!(
                *status,
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND
            ),
            _ => false,
        }
    }
}

/// آدرس پایه سرور؛ مسیرهای HTTP و وب‌سوکت از روی آن ساخته می‌شوند
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    base: Url,
}

impl Backend {
    pub fn new(base_url: &str) -> Result<Self, AdapterError> {
        let mut base = Url::parse(base_url)
            .map_err(|e| AdapterError::InvalidRequest(format!("{base_url}: {e}")))?;

        match base.scheme() {
            "http" | "https" => {}
            other => {
                return Err(AdapterError::InvalidRequest(format!(
                    "unsupported scheme {other:?} in {base_url}"
                )));
            }
        }

        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self { base })
    }

    /// `segments` are appended one by one and percent-encoded, so a timezone
    /// such as `America/New_York` stays a single path segment
    pub fn http(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    pub fn ws(&self, segments: &[&str]) -> Url {
        let mut url = self.http(segments);
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        // http(s) -> ws(s) is always accepted by Url::set_scheme
        let _ = url.set_scheme(scheme);
        url
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base)
    }
}

/// شناسه هر اتصال وب‌سوکت؛ رویدادهای اتصال‌های قدیمی با آن تشخیص داده می‌شوند
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// دلیل بسته شدن اتصال
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: Option<u16>, // کد بستن؛ `None` یعنی قطع ناگهانی بدون فریم Close
    pub reason: String,
}

impl CloseReason {
    pub const NORMAL_CLOSURE: u16 = 1000;

    pub fn normal(reason: impl Into<String>) -> Self {
        Self {
            code: Some(Self::NORMAL_CLOSURE),
            reason: reason.into(),
        }
    }

    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self {
            code: None,
            reason: reason.into(),
        }
    }

    pub fn is_normal(&self) -> bool {
        self.code == Some(Self::NORMAL_CLOSURE)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "code {code}: {}", self.reason),
            None => write!(f, "abnormal: {}", self.reason),
        }
    }
}

/// رویدادهای دریافتی از یک اتصال وب‌سوکت
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Opened(ConnectionId),              // اتصال برقرار شد
    Text(ConnectionId, String),        // پیام متنی
    Closed(ConnectionId, CloseReason), // اتصال بسته شد (آخرین رویداد هر اتصال)
}

impl StreamEvent {
    pub fn connection(&self) -> ConnectionId {
        match self {
            StreamEvent::Opened(id) | StreamEvent::Text(id, _) | StreamEvent::Closed(id, _) => *id,
        }
    }
}

pub(crate) async fn get_json<V>(url: &Url) -> Result<V, AdapterError>
where
    V: serde::de::DeserializeOwned,
{
    limiter::request_json(Method::GET, url, None).await
}

pub(crate) async fn post_json<V>(url: &Url, body: &serde_json::Value) -> Result<V, AdapterError>
where
    V: serde::de::DeserializeOwned,
{
    limiter::request_json(Method::POST, url, Some(body)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_builds_encoded_paths() {
        let backend = Backend::new("http://localhost:8000").unwrap();

        let url = backend.ws(&["ws", "live", "SPY", "1m", "America/New_York"]);
        assert_eq!(
            url.as_str(),
            "ws://localhost:8000/ws/live/SPY/1m/America%2FNew_York"
        );

        let secure = Backend::new("https://charts.example.com/api/").unwrap();
        assert_eq!(
            secure.http(&["historical", ""]).as_str(),
            "https://charts.example.com/api/historical/"
        );
        assert_eq!(secure.ws(&["ws"]).scheme(), "wss");
    }

    #[test]
    fn backend_rejects_non_http_base() {
        assert!(Backend::new("ftp://example.com").is_err());
        assert!(Backend::new("not a url").is_err());
    }

    #[test]
    fn session_rejection_classification() {
        let rejected = AdapterError::HttpStatus {
            status: StatusCode::UNAUTHORIZED,
            body: String::new(),
        };
        let server_error = AdapterError::HttpStatus {
            status: StatusCode::BAD_GATEWAY,
            body: String::new(),
        };

        assert!(rejected.is_session_rejection());
        assert!(!server_error.is_session_rejection());
        assert!(!AdapterError::ParseError("x".into()).is_session_rejection());
    }
}
