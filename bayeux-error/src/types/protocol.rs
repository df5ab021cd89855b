use std::{any::Any, fmt, str::FromStr};

use crate::{EngineError, ErrorExt, StatusCode};

/// Протокольная ошибка Bayeux.
///
/// Не является управляющим исключением: её строковое представление
/// записывается в поле `error` ответа, а поле `successful` выводится из
/// наличия этого поля.
///
/// Формат строки: `"<code>:<param1,param2,...>:<message>"`, например
/// `"402:clientId:Missing required parameter"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolError {
    code: StatusCode,
    params: Vec<String>,
}

/// Ошибка разбора строки протокольной ошибки.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed protocol error string: {0}")]
pub struct MalformedError(pub String);

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl ProtocolError {
    pub fn new<I, S>(
        code: StatusCode,
        params: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            code,
            params: params.into_iter().map(Into::into).collect(),
        }
    }

    pub fn code(&self) -> StatusCode {
        self.code
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Отсутствует обязательное поле сообщения.
    pub fn parameter_missing(field: &str) -> Self {
        Self::new(StatusCode::ParameterMissing, [field])
    }

    /// Ни один из транспортов клиента не поддерживается сервером.
    pub fn connection_type_mismatch<S: AsRef<str>>(types: &[S]) -> Self {
        Self::new(
            StatusCode::ConnectionTypeMismatch,
            types.iter().map(|t| t.as_ref().to_string()),
        )
    }

    /// Engine не знает такого клиента.
    pub fn client_unknown(client_id: &str) -> Self {
        Self::new(StatusCode::ClientUnknown, [client_id])
    }

    /// Канал нельзя подписать с удалённой стороны.
    pub fn channel_forbidden(channel: &str) -> Self {
        Self::new(StatusCode::ChannelForbidden, [channel])
    }

    /// Имя канала не соответствует грамматике.
    pub fn channel_invalid(channel: &str) -> Self {
        Self::new(StatusCode::ChannelInvalid, [channel])
    }

    /// Неизвестный мета-канал (метод протокола, которого нет).
    pub fn channel_unknown(channel: &str) -> Self {
        Self::new(StatusCode::ChannelUnknown, [channel])
    }

    /// Версия протокола не указана или не поддерживается.
    pub fn version_mismatch(version: &str) -> Self {
        Self::new(StatusCode::VersionMismatch, [version])
    }

    /// Сбой на стороне сервера (Engine, расширение и т.п.).
    pub fn server_error(reason: &str) -> Self {
        Self::new(StatusCode::ServerError, [reason])
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для ProtocolError
////////////////////////////////////////////////////////////////////////////////

impl fmt::Display for ProtocolError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.code.code(),
            self.params.join(","),
            self.code.message()
        )
    }
}

impl std::error::Error for ProtocolError {}

impl ErrorExt for ProtocolError {
    fn status_code(&self) -> StatusCode {
        self.code
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Отказ Engine в виде протокольной ошибки: неизвестный клиент остаётся
/// `401`, всё остальное становится `500` без подробностей.
impl From<EngineError> for ProtocolError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::UnknownClient(id) => Self::client_unknown(&id),
            _ => Self::server_error("engine"),
        }
    }
}

impl From<ProtocolError> for String {
    fn from(err: ProtocolError) -> Self {
        err.to_string()
    }
}

/// Разбор строки из поля `error` обратно в структуру.
///
/// Сообщение (третья часть) игнорируется: оно однозначно задаётся кодом.
impl FromStr for ProtocolError {
    type Err = MalformedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let (Some(code), Some(params), Some(_message)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(MalformedError(s.to_string()));
        };

        let code = code
            .parse::<u32>()
            .ok()
            .and_then(StatusCode::from_u32)
            .ok_or_else(|| MalformedError(s.to_string()))?;

        let params = if params.is_empty() {
            Vec::new()
        } else {
            params.split(',').map(str::to_string).collect()
        };

        Ok(Self { code, params })
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
