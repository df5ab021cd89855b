use std::{any::Any, error::Error};

use crate::StatusCode;

/// Расширение для ошибок библиотеки (object-safe).
///
/// Предоставляет вспомогательные методы для работы с ошибками:
/// - извлечение протокольного кода,
/// - безопасное сообщение для клиента,
/// - детализированное сообщение для логов.
pub trait ErrorExt: Error + Send + Sync + 'static {
    /// Протокольный код ошибки.
    ///
    /// По умолчанию возвращает [`StatusCode::ServerError`].
    fn status_code(&self) -> StatusCode {
        StatusCode::ServerError
    }

    /// Возвращает ошибку как [`Any`](std::any::Any),
    /// чтобы можно было выполнить downcast к конкретному типу.
    fn as_any(&self) -> &dyn Any;

    /// Безопасное сообщение для клиента.
    ///
    /// Для серверных ошибок не раскрывает деталей и возвращает
    /// `"Internal server error"`.
    fn client_message(&self) -> String {
        match self.status_code() {
            StatusCode::ServerError => StatusCode::ServerError.message().to_string(),
            _ => self.to_string(),
        }
    }

    /// Детализированное сообщение для логов.
    fn log_message(&self) -> String {
        format!("{self:?}")
    }
}

#[cfg(test)]
mod tests {
    use std::{any::Any, error::Error, fmt};

    use super::*;

    // Ошибка без переопределения status_code (по умолчанию ServerError).
    #[derive(Debug)]
    struct DefaultError(pub &'static str);

    impl fmt::Display for DefaultError {
        fn fmt(
            &self,
            f: &mut fmt::Formatter<'_>,
        ) -> fmt::Result {
            write!(f, "DefaultError: {}", self.0)
        }
    }

    impl Error for DefaultError {}

    impl ErrorExt for DefaultError {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[derive(Debug)]
    struct UnknownClient(pub &'static str);

    impl fmt::Display for UnknownClient {
        fn fmt(
            &self,
            f: &mut fmt::Formatter<'_>,
        ) -> fmt::Result {
            write!(f, "401:{}:Unknown client", self.0)
        }
    }

    impl Error for UnknownClient {}

    impl ErrorExt for UnknownClient {
        fn status_code(&self) -> StatusCode {
            StatusCode::ClientUnknown
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    /// Тест проверяет, что по умолчанию код ошибки: `ServerError`, а
    /// сообщение клиенту не раскрывает деталей.
    #[test]
    fn test_default_status_code_hides_details() {
        let e = DefaultError("sensitive");
        assert_eq!(e.status_code(), StatusCode::ServerError);
        assert_eq!(e.client_message(), "Internal server error");
    }

    /// Тест проверяет, что для клиентских кодов `client_message` совпадает с
    /// `Display`.
    #[test]
    fn test_client_message_non_internal() {
        let e = UnknownClient("abc");
        assert_eq!(e.client_message(), "401:abc:Unknown client");
    }

    /// Тест проверяет downcast через `as_any`.
    #[test]
    fn test_as_any_downcast() {
        let e = UnknownClient("x");
        assert!(e.as_any().downcast_ref::<UnknownClient>().is_some());
        assert!(e.as_any().downcast_ref::<DefaultError>().is_none());
    }
}
