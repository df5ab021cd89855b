//! Протокольный слой Bayeux.
//!
//! - `channel`: грамматика и классификация имён каналов, развёртка канала
//!   в шаблоны для маршрутизации публикаций.
//! - `message`: открытое JSON-сообщение протокола, пакет сообщений и
//!   построение ответа.
//! - `meta`: закрытое перечисление мета-операций.

pub mod channel;
pub mod message;
pub mod meta;

pub use channel::*;
pub use message::*;
pub use meta::MetaMethod;

/// Версия протокола, которую сервер сообщает при рукопожатии.
pub const BAYEUX_VERSION: &str = "1.0";

/// Транспорты, которые сервер поддерживает по умолчанию.
pub const DEFAULT_CONNECTION_TYPES: &[&str] = &[
    "long-polling",
    "cross-origin-long-polling",
    "callback-polling",
    "websocket",
    "eventsource",
    "in-process",
];
