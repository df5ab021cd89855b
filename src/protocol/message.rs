use bayeux_error::ProtocolError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ServerError;

pub const CHANNEL: &str = "channel";
pub const CLIENT_ID: &str = "clientId";
pub const ID: &str = "id";
pub const DATA: &str = "data";
pub const SUBSCRIPTION: &str = "subscription";
pub const CONNECTION_TYPE: &str = "connectionType";
pub const VERSION: &str = "version";
pub const SUPPORTED_CONNECTION_TYPES: &str = "supportedConnectionTypes";
pub const ADVICE: &str = "advice";
pub const ERROR: &str = "error";
pub const SUCCESSFUL: &str = "successful";

/// Сообщение протокола Bayeux.
///
/// Открытое отображение имён полей на JSON-значения: сервер читает
/// известные поля, а остальные (например `ext`) переносит без изменений.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message(Map<String, Value>);

/// Пакет входящих сообщений.
///
/// Пустые (`null`) элементы допустимы: каждый занимает слот пакета, но не
/// порождает ответа.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch(pub Vec<Option<Message>>);

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    /// Создаёт сообщение с единственным полем `channel`.
    pub fn with_channel(channel: impl Into<String>) -> Self {
        let mut message = Self::new();
        message.insert(CHANNEL, Value::String(channel.into()));
        message
    }

    /// Builder-вариант [`Message::insert`].
    pub fn with(
        mut self,
        field: &str,
        value: impl Into<Value>,
    ) -> Self {
        self.insert(field, value);
        self
    }

    pub fn get(
        &self,
        field: &str,
    ) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn insert(
        &mut self,
        field: &str,
        value: impl Into<Value>,
    ) -> Option<Value> {
        self.0.insert(field.to_string(), value.into())
    }

    pub fn remove(
        &mut self,
        field: &str,
    ) -> Option<Value> {
        self.0.remove(field)
    }

    /// Поле присутствует и не равно `null`.
    pub fn has(
        &self,
        field: &str,
    ) -> bool {
        self.0.get(field).is_some_and(|v| !v.is_null())
    }

    /// Поле присутствует и не равно `null`/`false`.
    pub fn is_set(
        &self,
        field: &str,
    ) -> bool {
        self.0.get(field).is_some_and(is_truthy)
    }

    pub fn channel(&self) -> Option<&str> {
        self.str_field(CHANNEL)
    }

    pub fn client_id(&self) -> Option<&str> {
        self.str_field(CLIENT_ID)
    }

    pub fn connection_type(&self) -> Option<&str> {
        self.str_field(CONNECTION_TYPE)
    }

    /// Текст ошибки; `null` считается отсутствием ошибки.
    pub fn error(&self) -> Option<&str> {
        self.str_field(ERROR)
    }

    pub fn successful(&self) -> Option<bool> {
        self.0.get(SUCCESSFUL).and_then(Value::as_bool)
    }

    /// Записывает протокольную ошибку в поле `error`.
    pub fn set_error(
        &mut self,
        error: ProtocolError,
    ) {
        self.insert(ERROR, error.to_string());
    }

    /// Выставляет `successful` по наличию `error` (`null`/`false` не
    /// считаются ошибкой).
    pub fn update_successful(&mut self) -> bool {
        let successful = !self.is_set(ERROR);
        self.insert(SUCCESSFUL, successful);
        successful
    }

    /// Поле `supportedConnectionTypes` как список строк.
    pub fn supported_connection_types(&self) -> Option<Vec<String>> {
        let value = self.0.get(SUPPORTED_CONNECTION_TYPES)?;
        if value.is_null() {
            return None;
        }
        let mut types = Vec::new();
        flatten_into(value, &mut types);
        Some(types)
    }

    /// Поле `subscription`, приведённое к списку без `null`.
    ///
    /// Одиночная строка превращается в список из одного элемента,
    /// вложенные массивы разворачиваются.
    pub fn subscription(&self) -> Vec<String> {
        let mut channels = Vec::new();
        if let Some(value) = self.0.get(SUBSCRIPTION) {
            flatten_into(value, &mut channels);
        }
        channels
    }

    /// Объект `advice`; создаётся, если отсутствует или не является
    /// объектом.
    pub fn advice_mut(&mut self) -> &mut Map<String, Value> {
        let slot = self
            .0
            .entry(ADVICE)
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        match slot {
            Value::Object(map) => map,
            _ => unreachable!("advice was normalized to an object above"),
        }
    }

    pub fn advice(&self) -> Option<&Map<String, Value>> {
        self.0.get(ADVICE).and_then(Value::as_object)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    fn str_field(
        &self,
        field: &str,
    ) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }
}

/// Строит ответ на сообщение.
///
/// Копирует `id`, `clientId`, `channel` и `error` (если заданы) и выставляет
/// `successful` по отсутствию `error`.
pub fn make_response(message: &Message) -> Message {
    let mut response = Message::new();
    for field in [ID, CLIENT_ID, CHANNEL, ERROR] {
        if let Some(value) = message.get(field).filter(|v| is_truthy(v)) {
            response.insert(field, value.clone());
        }
    }
    response.update_successful();
    response
}

impl Batch {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Разбирает тело запроса: один объект или массив объектов.
    pub fn from_json(body: &str) -> Result<Self, ServerError> {
        let value: Value = serde_json::from_str(body)?;
        Self::try_from(value)
    }
}

fn is_truthy(value: &Value) -> bool {
    !matches!(value, Value::Null | Value::Bool(false))
}

fn flatten_into(
    value: &Value,
    out: &mut Vec<String>,
) {
    match value {
        Value::Null => {}
        Value::String(s) => out.push(s.clone()),
        Value::Array(items) => items.iter().for_each(|item| flatten_into(item, out)),
        other => out.push(other.to_string()),
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для Message, Batch
////////////////////////////////////////////////////////////////////////////////

impl From<Map<String, Value>> for Message {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for Message {
    type Error = ServerError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(ServerError::InvalidBatch(format!(
                "expected a message object, got {other}"
            ))),
        }
    }
}

impl From<Message> for Value {
    fn from(message: Message) -> Self {
        message.into_value()
    }
}

impl From<Message> for Batch {
    fn from(message: Message) -> Self {
        Self(vec![Some(message)])
    }
}

impl From<Vec<Message>> for Batch {
    fn from(messages: Vec<Message>) -> Self {
        Self(messages.into_iter().map(Some).collect())
    }
}

impl From<Vec<Option<Message>>> for Batch {
    fn from(messages: Vec<Option<Message>>) -> Self {
        Self(messages)
    }
}

impl TryFrom<Value> for Batch {
    type Error = ServerError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::Null => Ok(None),
                    other => Message::try_from(other).map(Some),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Self),
            Value::Null => Ok(Self(vec![None])),
            other => Message::try_from(other).map(Self::from),
        }
    }
}

impl IntoIterator for Batch {
    type Item = Option<Message>;
    type IntoIter = std::vec::IntoIter<Option<Message>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    fn message(value: Value) -> Message {
        Message::try_from(value).unwrap()
    }

    /// Тест проверяет, что ответ копирует только заданные поля и выводит
    /// `successful` из `error`.
    #[test]
    fn test_make_response_copies_known_fields() {
        let request = message(json!({
            "channel": "/foo",
            "clientId": "c1",
            "id": 7,
            "data": {"x": 1},
            "ext": {"token": "t"}
        }));
        let response = make_response(&request);
        assert_eq!(
            response.into_value(),
            json!({"channel": "/foo", "clientId": "c1", "id": 7, "successful": true})
        );
    }

    /// Тест проверяет, что `error` из запроса делает ответ неуспешным, а
    /// `null`: нет.
    #[test]
    fn test_make_response_error_handling() {
        let failed = make_response(&message(json!({"channel": "/x", "error": "403::Forbidden"})));
        assert_eq!(failed.error(), Some("403::Forbidden"));
        assert_eq!(failed.successful(), Some(false));

        let ok = make_response(&message(json!({"channel": "/x", "error": null})));
        assert!(ok.get(ERROR).is_none());
        assert_eq!(ok.successful(), Some(true));
    }

    /// Тест проверяет нормализацию поля `subscription`.
    #[test]
    fn test_subscription_normalization() {
        assert_eq!(
            message(json!({"subscription": "/foo"})).subscription(),
            vec!["/foo"]
        );
        assert_eq!(
            message(json!({"subscription": ["/a", null, ["/b"]]})).subscription(),
            vec!["/a", "/b"]
        );
        assert!(message(json!({"subscription": []})).subscription().is_empty());
        assert!(message(json!({})).subscription().is_empty());
    }

    /// Тест проверяет, что `advice_mut` создаёт объект и заменяет значения
    /// другого типа.
    #[test]
    fn test_advice_mut() {
        let mut m = Message::with_channel("/meta/connect");
        m.advice_mut().insert("reconnect".into(), json!("retry"));
        assert_eq!(m.advice().unwrap()["reconnect"], json!("retry"));

        let mut broken = message(json!({"advice": "nope"}));
        assert!(broken.advice_mut().is_empty());
    }

    /// Тест проверяет разбор пакета: объект, массив с `null` и ошибочные
    /// формы.
    #[test]
    fn test_batch_from_json() {
        let single = Batch::from_json(r#"{"channel": "/meta/handshake"}"#).unwrap();
        assert_eq!(single.len(), 1);

        let many = Batch::from_json(r#"[{"channel": "/a"}, null, {"channel": "/b"}]"#).unwrap();
        assert_eq!(many.len(), 3);
        assert!(many.0[1].is_none());

        assert!(Batch::from_json("[1, 2]").is_err());
        assert!(Batch::from_json("{not json").is_err());
    }

    /// Тест проверяет чтение `supportedConnectionTypes`.
    #[test]
    fn test_supported_connection_types() {
        let m = message(json!({"supportedConnectionTypes": ["long-polling", "websocket"]}));
        assert_eq!(
            m.supported_connection_types(),
            Some(vec!["long-polling".to_string(), "websocket".to_string()])
        );
        assert_eq!(
            message(json!({"supportedConnectionTypes": null})).supported_connection_types(),
            None
        );
    }

    fn arb_field() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            Just(Value::Bool(false)),
            Just(Value::Bool(true)),
            any::<i64>().prop_map(Value::from),
            "[a-z0-9:/]{0,12}".prop_map(Value::from),
        ]
    }

    proptest! {
        /// `successful` ответа всегда согласовано с наличием `error`.
        #[test]
        fn prop_successful_matches_error(
            error in prop::option::of(arb_field()),
            id in prop::option::of(arb_field()),
        ) {
            let mut request = Message::with_channel("/foo");
            if let Some(error) = error { request.insert(ERROR, error); }
            if let Some(id) = id { request.insert(ID, id); }

            let response = make_response(&request);
            prop_assert_eq!(response.successful(), Some(!response.is_set(ERROR)));
            prop_assert_eq!(response.get(ERROR).is_some(), response.is_set(ERROR));
        }
    }
}
