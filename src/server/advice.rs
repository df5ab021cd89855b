//! Рекомендации по переподключению.

use serde_json::{Map, Value};

use crate::{network::Connection, protocol::Message};

pub const RECONNECT: &str = "reconnect";
pub const INTERVAL: &str = "interval";
pub const TIMEOUT: &str = "timeout";

pub const RETRY: &str = "retry";
pub const HANDSHAKE: &str = "handshake";

/// Дополняет `advice` ответа, не трогая уже заданные поля.
///
/// С живым соединением клиент получает `retry` и параметры соединения в
/// миллисекундах, без него должен начать заново с рукопожатия.
pub fn advize(
    response: &mut Message,
    connection: Option<&Connection>,
) {
    let advice = response.advice_mut();
    match connection {
        Some(connection) => {
            set_default(advice, RECONNECT, RETRY);
            set_default(advice, INTERVAL, secs_to_millis(connection.interval()));
            set_default(advice, TIMEOUT, secs_to_millis(connection.timeout()));
        }
        None => set_default(advice, RECONNECT, HANDSHAKE),
    }
}

fn set_default(
    advice: &mut Map<String, Value>,
    field: &str,
    value: impl Into<Value>,
) {
    let slot = advice.entry(field).or_insert(Value::Null);
    if slot.is_null() {
        *slot = value.into();
    }
}

fn secs_to_millis(secs: f64) -> u64 {
    // `as` насыщает: NaN и отрицательные дают 0.
    (secs * 1000.0).floor() as u64
}
