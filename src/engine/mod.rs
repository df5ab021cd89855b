//! Pub/Sub Engine: владелец идентичности клиентов и подписок.
//!
//! Все операции асинхронные: реализация может ходить по сети. Сервер
//! никогда не меняет состояние подписок напрямую, только через [`Engine`].

pub mod memory;

use async_trait::async_trait;
use bayeux_error::EngineResult;
use tokio::sync::broadcast;

pub use memory::InMemoryEngine;

use crate::protocol::Message;

/// Событие Engine для реестра соединений.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Сообщение для доставки клиенту.
    Message { client_id: String, message: Message },
    /// Клиент уничтожен, его соединение нужно закрыть.
    Disconnect { client_id: String },
}

#[async_trait]
pub trait Engine: Send + Sync {
    /// Выдаёт новый идентификатор клиента.
    async fn create_client(&self) -> EngineResult<String>;

    /// Известен ли клиент. Единственный авторитетный источник.
    async fn client_exists(
        &self,
        client_id: &str,
    ) -> EngineResult<bool>;

    /// Продлевает жизнь клиента.
    async fn ping(
        &self,
        client_id: &str,
    ) -> EngineResult<()>;

    /// Удаляет клиента вместе с подписками и сообщает `Disconnect`.
    async fn destroy_client(
        &self,
        client_id: &str,
    ) -> EngineResult<()>;

    async fn subscribe(
        &self,
        client_id: &str,
        channel: &str,
    ) -> EngineResult<()>;

    async fn unsubscribe(
        &self,
        client_id: &str,
        channel: &str,
    ) -> EngineResult<()>;

    /// Рассылает сообщение подписчикам его канала и подходящих шаблонов.
    async fn publish(
        &self,
        message: Message,
    ) -> EngineResult<()>;

    /// Новый приёмник событий Engine.
    fn events(&self) -> broadcast::Receiver<EngineEvent>;
}
