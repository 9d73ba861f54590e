use super::{AdapterError, Backend};

use serde::Deserialize;
use serde_json::json;

#[derive(Deserialize)]
struct DeSession {
    session_token: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize, Default)]
struct DeHeartbeat {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    valid: Option<bool>,
    #[serde(default)]
    message: Option<String>,
}

/// دریافت توکن نشست جدید (`GET /utils/session/initiate`)
pub async fn initiate(backend: &Backend) -> Result<String, AdapterError> {
    let url = backend.http(&["utils", "session", "initiate"]);
    let session: DeSession = super::get_json(&url).await?;

    match session.session_token {
        Some(token) if !token.is_empty() => {
            log::info!("Session initiated");
            Ok(token)
        }
        _ => Err(AdapterError::ParseError(format!(
            "session_token missing from initiate response: {}",
            session.message.unwrap_or_default()
        ))),
    }
}

/// تمدید نشست (`POST /utils/session/heartbeat`)
pub async fn heartbeat(backend: &Backend, session_token: &str) -> Result<(), AdapterError> {
    let url = backend.http(&["utils", "session", "heartbeat"]);
    let body = json!({ "session_token": session_token });

    let response: serde_json::Value = super::post_json(&url, &body).await?;
    check_heartbeat(response)
}

fn check_heartbeat(response: serde_json::Value) -> Result<(), AdapterError> {
    let heartbeat: DeHeartbeat = serde_json::from_value(response).unwrap_or_default();

    let rejected_status = heartbeat
        .status
        .as_deref()
        .is_some_and(|s| matches!(s, "expired" | "invalid" | "error"));

    if heartbeat.valid == Some(false) || rejected_status {
        return Err(AdapterError::SessionRejected(
            heartbeat
                .message
                .unwrap_or_else(|| "session no longer valid".to_string()),
        ));
    }
    Ok(())
}
