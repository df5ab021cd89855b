use std::any::Any;

use bayeux_error::{EngineError, ErrorExt, StatusCode};
use thiserror::Error;

pub type ServerResult<T> = Result<T, ServerError>;

/// Операционные ошибки сервера.
///
/// Протокольные ошибки сюда не попадают: они записываются в поле `error`
/// ответа (см. [`bayeux_error::ProtocolError`]).
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid message batch: {0}")]
    InvalidBatch(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Logging setup failed: {0}")]
    Logging(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ErrorExt for ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Json(_) | Self::InvalidBatch(_) => StatusCode::BadRequest,
            Self::Engine(err) => err.status_code(),
            _ => StatusCode::ServerError,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет маппинг операционных ошибок на коды протокола.
    #[test]
    fn test_status_codes() {
        let bad = ServerError::InvalidBatch("expected object".into());
        assert_eq!(bad.status_code(), StatusCode::BadRequest);

        let engine: ServerError = EngineError::UnknownClient("c".into()).into();
        assert_eq!(engine.status_code(), StatusCode::ClientUnknown);

        let io: ServerError = std::io::Error::other("disk").into();
        assert_eq!(io.status_code(), StatusCode::ServerError);
        assert_eq!(io.client_message(), "Internal server error");
    }

    /// Тест проверяет конвертацию из serde_json.
    #[test]
    fn test_from_json_error() {
        let err: ServerError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, ServerError::Json(_)));
        assert!(err.to_string().starts_with("JSON error"));
    }
}
