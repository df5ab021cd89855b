//! Диспетчер сообщений Bayeux.
//!
//! [`Server::process`] превращает пакет входящих сообщений в пакет ответов:
//! каждое сообщение проходит входящие расширения, маршрутизацию
//! (мета-обработчик или подтверждение публикации) и исходящие расширения.
//!
//! Порядок ответов внутри одного входящего сообщения сохраняется. Между
//! разными сообщениями пакета ответы идут в порядке завершения, а не в
//! порядке поступления: `connect` с удержанием завершится последним.

pub mod advice;
mod meta;

use std::sync::Arc;

use bayeux_error::{EngineError, ErrorExt, LogLevel, ProtocolError};
use futures::{
    future::join_all,
    stream::{FuturesUnordered, StreamExt},
};
use serde_json::{Map, Value};
use tokio::{
    sync::broadcast::{error::RecvError, Receiver},
    task::JoinHandle,
};
use tracing::{debug, error, info, trace, warn};

use crate::{
    config::Settings,
    engine::{Engine, EngineEvent, InMemoryEngine},
    error::ServerResult,
    extension::{Extension, ExtensionChain, Phase},
    network::{ConnectOptions, ConnectionConfig, ConnectionRegistry, SocketId},
    protocol::{channel, make_response, message::ERROR, Batch, Message, MetaMethod},
};

/// Источник сообщений.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Сообщение изнутри сервера: подписка на любой канал разрешена,
    /// рукопожатие не согласует транспорт.
    Local,
    /// Сообщение от транспорта, возможно привязанное к сокету.
    Remote { socket: Option<SocketId> },
}

pub struct Server {
    engine: Arc<dyn Engine>,
    connections: ConnectionRegistry,
    extensions: ExtensionChain,
    supported_connection_types: Vec<String>,
    event_pump: JoinHandle<()>,
    reaper: Option<JoinHandle<()>>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Origin {
    pub const fn remote() -> Self {
        Self::Remote { socket: None }
    }

    pub const fn is_local(&self) -> bool {
        matches!(self, Self::Local)
    }

    pub const fn socket(&self) -> Option<SocketId> {
        match self {
            Self::Local => None,
            Self::Remote { socket } => *socket,
        }
    }
}

impl Server {
    /// Создаёт сервер поверх заданного Engine.
    ///
    /// Должен вызываться внутри рантайма tokio: запускает задачу, которая
    /// переносит события Engine в реестр соединений.
    pub fn new(
        engine: Arc<dyn Engine>,
        settings: &Settings,
    ) -> Self {
        let connections = ConnectionRegistry::new(ConnectionConfig::from(&settings.connection));
        let event_pump = spawn_event_pump(engine.events(), connections.clone());
        Self {
            engine,
            connections,
            extensions: ExtensionChain::new(),
            supported_connection_types: settings.supported_connection_types.clone(),
            event_pump,
            reaper: None,
        }
    }

    /// Сервер со встроенным in-memory Engine и фоновой очисткой клиентов.
    pub fn from_settings(settings: &Settings) -> Self {
        let engine = Arc::new(InMemoryEngine::from_settings(&settings.engine));
        let reaper = engine.spawn_reaper(settings.engine.reap_interval());
        let mut server = Self::new(engine, settings);
        server.reaper = Some(reaper);
        server
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    /// Количество активных соединений.
    pub fn connection_count(&self) -> usize {
        self.connections.active_count()
    }

    pub fn supported_connection_types(&self) -> &[String] {
        &self.supported_connection_types
    }

    pub fn add_extension(
        &self,
        extension: Arc<dyn Extension>,
    ) {
        self.extensions.add_extension(extension);
    }

    pub fn remove_extension(
        &self,
        extension: &Arc<dyn Extension>,
    ) -> bool {
        self.extensions.remove_extension(extension)
    }

    /// Обрабатывает пакет сообщений и возвращает все ответы.
    ///
    /// Завершается, когда каждое входящее сообщение полностью обработано,
    /// включая удерживаемые `connect`.
    pub async fn process(
        &self,
        messages: impl Into<Batch>,
        origin: Origin,
    ) -> Vec<Message> {
        let batch = messages.into();
        let size = batch.len();

        let mut pending: FuturesUnordered<_> = batch
            .into_iter()
            .map(|message| self.process_one(message, origin))
            .collect();

        let mut responses = Vec::new();
        while let Some(replies) = pending.next().await {
            responses.extend(replies);
        }
        trace!(inputs = size, responses = responses.len(), "Batch processed");
        responses
    }

    /// Разбирает JSON-тело, обрабатывает его и сериализует ответы.
    pub async fn process_json(
        &self,
        body: &str,
        origin: Origin,
    ) -> ServerResult<String> {
        let batch = Batch::from_json(body)?;
        let responses = self.process(batch, origin).await;
        Ok(serde_json::to_string(&responses)?)
    }

    /// Отпускает удерживаемые запросы клиентов, названных в пакете.
    pub fn flush_connection(
        &self,
        messages: &Batch,
    ) {
        self.connections
            .flush_connection(messages.0.iter().flatten());
    }

    async fn process_one(
        &self,
        message: Option<Message>,
        origin: Origin,
    ) -> Vec<Message> {
        let message = match message {
            Some(message) => self.extensions.pipe_through(Phase::Incoming, message).await,
            None => None,
        };

        let replies = self.handle(message, origin).await;

        join_all(
            replies
                .into_iter()
                .map(|reply| self.extensions.pipe_through(Phase::Outgoing, reply)),
        )
        .await
        .into_iter()
        .flatten()
        .collect()
    }

    /// Маршрутизирует одно сообщение.
    ///
    /// Сообщение без ошибки уходит в Engine на публикацию независимо от
    /// ответа; ответ не ждёт её завершения.
    pub async fn handle(
        &self,
        message: Option<Message>,
        origin: Origin,
    ) -> Vec<Message> {
        let Some(message) = message else {
            return Vec::new();
        };

        if !message.is_set(ERROR) {
            self.publish(message.clone());
        }

        let is_meta = message.channel().is_some_and(channel::is_meta);
        if is_meta {
            self.handle_meta(message, origin).await
        } else if message.client_id().is_none() {
            Vec::new()
        } else {
            vec![make_response(&message)]
        }
    }

    async fn handle_meta(
        &self,
        message: Message,
        origin: Origin,
    ) -> Vec<Message> {
        let local = origin.is_local();
        let channel_name = message.channel().unwrap_or_default();
        let method = MetaMethod::from_channel(channel_name);

        let mut response = match method {
            Some(MetaMethod::Handshake) => self.handshake(&message, local).await,
            Some(MetaMethod::Connect) => self.connect(&message).await,
            Some(MetaMethod::Disconnect) => self.disconnect(&message).await,
            Some(MetaMethod::Subscribe) => self.subscribe(&message, local).await,
            Some(MetaMethod::Unsubscribe) => self.unsubscribe(&message, local).await,
            None => {
                debug!(channel = channel_name, "Unknown meta channel");
                let mut response = make_response(&message);
                response.set_error(ProtocolError::channel_unknown(channel_name));
                response.update_successful();
                response
            }
        };

        // `/meta/connect/<suffix>` тоже разбирается как connect, но
        // удерживается только сам `/meta/connect`.
        let accepted = method == Some(MetaMethod::Connect)
            && response.channel() == Some(channel::CONNECT)
            && response.successful() == Some(true);
        if accepted {
            // Соединение должно существовать до advize, чтобы клиент
            // получил `retry` и параметры удержания.
            if let Some(client_id) = response.client_id() {
                self.connections.connection(client_id);
            }
        }

        self.advize(&mut response);

        if accepted {
            self.accept_connection(message.advice(), response, origin.socket())
                .await
        } else {
            vec![response]
        }
    }

    /// Дополняет `advice` ответа по состоянию соединения клиента.
    pub fn advize(
        &self,
        response: &mut Message,
    ) {
        let connection = response
            .client_id()
            .and_then(|id| self.connections.get(id));
        advice::advize(response, connection.as_deref());
    }

    /// Привязывает успешный `connect` к соединению клиента и ждёт событий.
    ///
    /// Результат: ответ на `connect`, за которым идут накопленные сообщения.
    async fn accept_connection(
        &self,
        advice: Option<&Map<String, Value>>,
        response: Message,
        socket: Option<SocketId>,
    ) -> Vec<Message> {
        let Some(client_id) = response.client_id() else {
            return vec![response];
        };
        let connection = self.connections.connection(client_id);
        let events = connection
            .connect(ConnectOptions::from_advice(advice, socket))
            .await;

        let mut replies = Vec::with_capacity(events.len() + 1);
        replies.push(response);
        replies.extend(events);
        replies
    }

    fn publish(
        &self,
        message: Message,
    ) {
        let engine = Arc::clone(&self.engine);
        tokio::spawn(async move {
            if let Err(err) = engine.publish(message).await {
                log_engine_failure(&err, "publish");
            }
        });
    }
}

/// Пишет отказ Engine в лог с уровнем, который задаёт его код.
fn log_engine_failure(
    err: &EngineError,
    operation: &'static str,
) {
    let detail = err.log_message();
    match err.status_code().log_level() {
        LogLevel::Trace => trace!(operation, error = %err, detail = %detail, "Engine operation failed"),
        LogLevel::Debug => debug!(operation, error = %err, detail = %detail, "Engine operation failed"),
        LogLevel::Info => info!(operation, error = %err, detail = %detail, "Engine operation failed"),
        LogLevel::Warn => warn!(operation, error = %err, detail = %detail, "Engine operation failed"),
        LogLevel::Error => error!(operation, error = %err, detail = %detail, "Engine operation failed"),
    }
}

/// Отказ Engine в виде протокольной ошибки ответа, с записью в лог.
fn engine_failure(
    err: EngineError,
    operation: &'static str,
) -> ProtocolError {
    log_engine_failure(&err, operation);
    err.into()
}

fn spawn_event_pump(
    mut events: Receiver<EngineEvent>,
    connections: ConnectionRegistry,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(EngineEvent::Message { client_id, message }) => {
                    connections.connection(&client_id).deliver(message);
                }
                Ok(EngineEvent::Disconnect { client_id }) => {
                    connections.destroy(&client_id);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Engine event stream lagged");
                }
                Err(RecvError::Closed) => {
                    debug!("Engine event stream closed");
                    break;
                }
            }
        }
    })
}

impl Drop for Server {
    fn drop(&mut self) {
        self.event_pump.abort();
        if let Some(reaper) = self.reaper.take() {
            reaper.abort();
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("connections", &self.connection_count())
            .field("extensions", &self.extensions.len())
            .field("supported_connection_types", &self.supported_connection_types)
            .finish()
    }
}
