use std::fmt;

use num_enum::TryFromPrimitive;
#[cfg(feature = "serde_repr")]
use serde_repr::{Deserialize_repr, Serialize_repr};
#[cfg(feature = "strum")]
use strum_macros::{AsRefStr, EnumIter};

/// Коды ошибок протокола Bayeux.
///
/// # Диапазоны:
/// - 3xx: Несогласованность параметров рукопожатия (версия, транспорт,
///   расширения)
/// - 4xx: Ошибки запроса клиента
/// - 5xx: Ошибки сервера
///
/// # Реализация:
/// - `num_enum::TryFromPrimitive` даёт нативную реализацию `TryFrom<u32>`
///   (полезно при разборе строки ошибки `"401::Unknown client"`).
/// - опционально: `strum` для `AsRefStr`/`EnumIter` (feature = "strum").
/// - опционально: `serde_repr` для сериализации в виде числового значения
///   (feature = "serde_repr").
#[cfg_attr(feature = "strum", derive(AsRefStr, EnumIter))]
#[cfg_attr(feature = "serde_repr", derive(Serialize_repr, Deserialize_repr))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum StatusCode {
    // === 3xx: Согласование ===
    VersionMismatch = 300,
    ConnectionTypeMismatch = 301,
    ExtensionMismatch = 302,

    // === 4xx: Ошибки клиента ===
    BadRequest = 400,
    ClientUnknown = 401,
    ParameterMissing = 402,
    ChannelForbidden = 403,
    ChannelUnknown = 404,
    ChannelInvalid = 405,
    ExtensionUnknown = 406,
    PublishFailed = 407,

    // === 5xx: Ошибки сервера ===
    ServerError = 500,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl StatusCode {
    /// Числовое представление кода статуса.
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Пытается получить вариант `StatusCode` из `u32`.
    ///
    /// Использует `TryFrom<u32>` из `num_enum`; возвращает `None`, если
    /// значение не соответствует ни одному варианту.
    pub fn from_u32(v: u32) -> Option<Self> {
        Self::try_from(v).ok()
    }

    /// Человекочитаемое описание кода, которое попадает в третью часть
    /// строки ошибки.
    pub const fn message(self) -> &'static str {
        match self {
            Self::VersionMismatch => "Version mismatch",
            Self::ConnectionTypeMismatch => "Connection types not supported",
            Self::ExtensionMismatch => "Extension mismatch",
            Self::BadRequest => "Bad request",
            Self::ClientUnknown => "Unknown client",
            Self::ParameterMissing => "Missing required parameter",
            Self::ChannelForbidden => "Forbidden channel",
            Self::ChannelUnknown => "Unknown channel",
            Self::ChannelInvalid => "Invalid channel",
            Self::ExtensionUnknown => "Unknown extension",
            Self::PublishFailed => "Failed to publish",
            Self::ServerError => "Internal server error",
        }
    }

    /// Рекомендуемый уровень логирования для данного кода.
    pub fn log_level(&self) -> LogLevel {
        match self {
            Self::ClientUnknown | Self::ParameterMissing => LogLevel::Debug,
            Self::ChannelForbidden | Self::ChannelInvalid | Self::ChannelUnknown => LogLevel::Info,
            Self::ServerError | Self::PublishFailed => LogLevel::Error,
            _ => LogLevel::Warn,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для StatusCode
////////////////////////////////////////////////////////////////////////////////

impl From<StatusCode> for u32 {
    fn from(c: StatusCode) -> Self {
        c.code()
    }
}

impl fmt::Display for StatusCode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        #[cfg(feature = "strum")]
        {
            write!(f, "{} ({})", self.as_ref(), self.code())
        }
        #[cfg(not(feature = "strum"))]
        {
            write!(f, "{:?} ({})", self, self.code())
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
