use crate::adapter::AdapterError;

use reqwest::{Client, Method, StatusCode, Url};
use serde_json::Value;
use tokio::sync::Mutex;

use std::sync::LazyLock;
use std::time::{Duration, Instant};

const REQUESTS_PER_WINDOW: usize = 300;
const WINDOW: Duration = Duration::from_secs(60);
const PREVIEW_CHARS: usize = 200;

static HTTP_CLIENT: LazyLock<Client> = LazyLock::new(Client::new);

static BACKEND_LIMITER: LazyLock<Mutex<FixedWindow>> =
    LazyLock::new(|| Mutex::new(FixedWindow::new(REQUESTS_PER_WINDOW, WINDOW, Instant::now())));

/// محدودکننده نرخ با پنجره زمانی ثابت؛ پاسخ 429 باقی‌مانده پنجره را مصرف می‌کند
#[derive(Debug)]
pub struct FixedWindow {
    capacity: usize,
    available: usize,
    window_start: Instant,
    window: Duration,
}

impl FixedWindow {
    pub fn new(capacity: usize, window: Duration, now: Instant) -> Self {
        Self {
            capacity,
            available: capacity,
            window_start: now,
            window,
        }
    }

    fn roll(&mut self, now: Instant) {
        if now.duration_since(self.window_start) >= self.window {
            self.available = self.capacity;
            self.window_start = now;
        }
    }

    /// برداشتن یک سهم؛ اگر پنجره پر باشد مدت انتظار تا پنجره بعد برگردانده می‌شود
    pub fn acquire(&mut self, now: Instant) -> Option<Duration> {
        self.roll(now);

        if self.available > 0 {
            self.available -= 1;
            return None;
        }
        Some(
            self.window
                .saturating_sub(now.duration_since(self.window_start)),
        )
    }

    pub fn on_status(&mut self, status: StatusCode, now: Instant) {
        if status == StatusCode::TOO_MANY_REQUESTS {
            self.roll(now);
            self.available = 0;
        }
    }
}

/// ارسال یک درخواست به سرور با رعایت محدودیت نرخ و تجزیه پاسخ JSON
pub async fn request_json<V>(
    method: Method,
    url: &Url,
    body: Option<&Value>,
) -> Result<V, AdapterError>
where
    V: serde::de::DeserializeOwned,
{
    let wait = BACKEND_LIMITER.lock().await.acquire(Instant::now());
    if let Some(wait) = wait {
        log::warn!("Request budget spent, waiting {wait:?} before {url}");
        tokio::time::sleep(wait).await;
    }

    let mut request = HTTP_CLIENT.request(method, url.clone());
    if let Some(body) = body {
        request = request.json(body);
    }

    let response = request.send().await.map_err(AdapterError::FetchError)?;
    let status = response.status();
    BACKEND_LIMITER.lock().await.on_status(status, Instant::now());

    let text = response.text().await.map_err(AdapterError::FetchError)?;

    if !status.is_success() {
        log::warn!("HTTP {status} from {url}");
        return Err(AdapterError::HttpStatus {
            status,
            body: preview(&text),
        });
    }

    parse_body(url, &text)
}

pub(crate) fn parse_body<V>(url: &Url, body: &str) -> Result<V, AdapterError>
where
    V: serde::de::DeserializeOwned,
{
    let trimmed = body.trim();

    let msg = if trimmed.is_empty() {
        format!("Empty response body | url={url}")
    } else if trimmed.starts_with('<') {
        format!("Non-JSON response | url={url} | preview={:?}", preview(body))
    } else {
        match serde_json::from_str(trimmed) {
            Ok(value) => return Ok(value),
            Err(e) => format!("JSON parse failed: {e} | url={url} | preview={:?}", preview(body)),
        }
    };

    log::error!("{msg}");
    Err(AdapterError::ParseError(msg))
}

fn preview(body: &str) -> String {
    let trimmed = body.trim();
    let mut preview = trimmed.chars().take(PREVIEW_CHARS).collect::<String>();
    if trimmed.chars().count() > PREVIEW_CHARS {
        preview.push('…');
    }
    preview
}
