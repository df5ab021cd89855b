use std::fmt;

use super::channel;

/// Мета-операции протокола.
///
/// Набор закрыт: любой другой метод на `/meta/*` это ошибка
/// «неизвестный канал», а не вызов обработчика.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaMethod {
    Handshake,
    Connect,
    Disconnect,
    Subscribe,
    Unsubscribe,
}

impl MetaMethod {
    /// Определяет операцию по имени мета-канала.
    pub fn from_channel(name: &str) -> Option<Self> {
        match channel::parse_meta_method(name)? {
            "handshake" => Some(Self::Handshake),
            "connect" => Some(Self::Connect),
            "disconnect" => Some(Self::Disconnect),
            "subscribe" => Some(Self::Subscribe),
            "unsubscribe" => Some(Self::Unsubscribe),
            _ => None,
        }
    }

    pub const fn channel(self) -> &'static str {
        match self {
            Self::Handshake => channel::HANDSHAKE,
            Self::Connect => channel::CONNECT,
            Self::Disconnect => channel::DISCONNECT,
            Self::Subscribe => channel::SUBSCRIBE,
            Self::Unsubscribe => channel::UNSUBSCRIBE,
        }
    }
}

impl fmt::Display for MetaMethod {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.channel())
    }
}
