use thiserror::Error;
use tokio_tungstenite::tungstenite;

#[derive(Error, Debug)]
pub enum ApiError {
    /* mapped errors */
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    #[error(transparent)]
    TungsteniteError(#[from] tungstenite::Error),

    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    #[error(transparent)]
    ConfigError(#[from] config::ConfigError),

    #[error(transparent)]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),

    #[error(transparent)]
    SetLoggerError(#[from] log::SetLoggerError),

    /* hub errors */
    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Connection lost")]
    ConnectionLost,

    #[error("Not connected")]
    NotConnected,

    #[error("Timeout")]
    Timeout,

    #[error("Cancelled")]
    Cancelled,

    #[error("{message}")]
    Remote {
        code: Option<String>,
        message: String,
    },

    /* state errors */
    #[error("Unknown entity {0}")]
    UnknownEntity(String),

    #[error("Entity {entity_id} does not support {capability}")]
    UnsupportedCapability {
        entity_id: String,
        capability: &'static str,
    },

    #[error("Service error: {0}")]
    ServiceError(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    #[must_use]
    pub fn service_error(msg: impl Into<String>) -> Self {
        Self::ServiceError(msg.into())
    }

    #[must_use]
    pub fn unsupported(entity_id: &str, capability: &'static str) -> Self {
        Self::UnsupportedCapability {
            entity_id: entity_id.to_string(),
            capability,
        }
    }

    /// True for transport failures, which leave the connection unusable.
    ///
    /// Timeouts, cancellations and remote rejections happen on a healthy
    /// socket and must not force a reconnect.
    #[must_use]
    pub const fn invalidates_connection(&self) -> bool {
        matches!(
            self,
            Self::ConnectionLost | Self::TungsteniteError(_) | Self::IOError(_)
        )
    }
}
