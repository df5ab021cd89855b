use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибки реализации Engine (хранилища клиентов и подписок).
///
/// Engine может работать через сеть, поэтому любая его операция может
/// завершиться отказом; диспетчер сообщений превращает такие отказы в
/// ответ `500` и не пробрасывает их дальше.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("engine backend unavailable: {0}")]
    Unavailable(String),

    #[error("client {0} is not registered")]
    UnknownClient(String),

    #[error("engine event stream closed")]
    Closed,

    #[error("internal engine error: {0}")]
    Internal(String),
}

impl ErrorExt for EngineError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::UnknownClient(_) => StatusCode::ClientUnknown,
            _ => StatusCode::ServerError,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
