//! Соединения клиентов.
//!
//! - `connection`: почтовый ящик клиента с удержанием long-poll запроса.
//! - `connection_registry`: реестр соединений по идентификатору клиента.

pub mod connection;
pub mod connection_registry;

pub use connection::{ConnectOptions, Connection, ConnectionConfig, SocketId};
pub use connection_registry::ConnectionRegistry;
