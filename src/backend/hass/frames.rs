use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::{ApiError, ApiResult};

pub type HassSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum HassWsIncoming {
    #[serde(rename = "auth_required")]
    AuthRequired,
    #[serde(rename = "auth_ok")]
    AuthOk,
    #[serde(rename = "auth_invalid")]
    AuthInvalid {
        #[serde(default)]
        message: Option<String>,
    },
    #[serde(rename = "result")]
    Result(HassResult),
    #[serde(rename = "event")]
    Event {
        #[serde(default)]
        id: Option<u64>,
        #[serde(default)]
        event: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub struct HassResult {
    pub id: u64,
    pub success: bool,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub error: Option<HassErrorBody>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HassErrorBody {
    #[serde(default)]
    pub code: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
}

impl HassErrorBody {
    /// Best-effort human string: message, then code, then `fallback`.
    #[must_use]
    pub fn describe(&self, fallback: &str) -> String {
        if let Some(msg) = self.message.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
            return msg.to_string();
        }
        match &self.code {
            Some(Value::String(code)) if !code.trim().is_empty() => code.trim().to_string(),
            Some(Value::Number(code)) => code.to_string(),
            _ => fallback.to_string(),
        }
    }

    fn code_string(&self) -> Option<String> {
        match &self.code {
            Some(Value::String(code)) => Some(code.clone()),
            Some(Value::Number(code)) => Some(code.to_string()),
            _ => None,
        }
    }
}

impl HassResult {
    /// Turn a failure envelope into [`ApiError::Remote`], passing successes
    /// through.
    pub fn into_result(self, fallback: &str) -> ApiResult<Value> {
        if self.success {
            return Ok(self.result);
        }
        let error = self.error.unwrap_or_default();
        Err(ApiError::Remote {
            code: error.code_string(),
            message: error.describe(fallback),
        })
    }
}

/// Parse a text frame. Unknown shapes come back as `None`, not as errors:
/// the hub is free to send things we do not care about.
pub fn parse_incoming(text: &str) -> Option<HassWsIncoming> {
    match serde_json::from_str::<HassWsIncoming>(text) {
        Ok(msg) => Some(msg),
        Err(err) => {
            log::trace!("Ignoring unparseable frame ({err}): {text}");
            None
        }
    }
}

pub fn text_frame(value: &Value) -> Message {
    Message::Text(value.to_string().into())
}

/// Next text frame, skipping transport-level ping/pong. `None` on close.
async fn next_text(socket: &mut HassSocket) -> ApiResult<Option<String>> {
    while let Some(msg) = socket.next().await {
        match msg? {
            Message::Text(text) => return Ok(Some(text.as_str().to_owned())),
            Message::Close(_) => return Ok(None),
            _ => {}
        }
    }
    Ok(None)
}

fn frame_type(text: &str) -> String {
    serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|v| v.get("type").and_then(Value::as_str).map(ToString::to_string))
        .unwrap_or_else(|| "<unparseable>".to_string())
}

/// Run the fixed three-frame handshake: `auth_required` from the hub, our
/// `auth`, then `auth_ok` or `auth_invalid`. Any deviation is terminal for
/// this socket.
pub async fn authenticate(socket: &mut HassSocket, token: &str) -> ApiResult<()> {
    let Some(first) = next_text(socket).await? else {
        return Err(ApiError::Handshake(
            "connection closed before auth challenge".to_string(),
        ));
    };
    if !matches!(parse_incoming(&first), Some(HassWsIncoming::AuthRequired)) {
        return Err(ApiError::Handshake(format!(
            "expected auth_required, got {}",
            frame_type(&first)
        )));
    }

    let auth = json!({
        "type": "auth",
        "access_token": token,
    });
    socket.send(text_frame(&auth)).await?;

    let Some(reply) = next_text(socket).await? else {
        return Err(ApiError::Handshake(
            "connection closed during authentication".to_string(),
        ));
    };
    match parse_incoming(&reply) {
        Some(HassWsIncoming::AuthOk) => Ok(()),
        Some(HassWsIncoming::AuthInvalid { message }) => Err(ApiError::Handshake(format!(
            "authentication rejected: {}",
            message.unwrap_or_else(|| "invalid access token".to_string())
        ))),
        _ => Err(ApiError::Handshake(format!(
            "expected auth_ok, got {}",
            frame_type(&reply)
        ))),
    }
}
