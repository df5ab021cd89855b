use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};

use parking_lot::RwLock;
use tracing::debug;

use crate::{
    network::connection::{Connection, ConnectionConfig},
    protocol::Message,
};

type ConnectionMap = RwLock<HashMap<String, Arc<Connection>>>;

/// Реестр long-poll соединений.
///
/// Единственный владелец всех [`Connection`]: создаёт их при первом
/// обращении, уничтожает по событию Engine или по сигналу устаревания.
/// Наличие соединения в реестре не доказывает, что клиент существует:
/// это решает только Engine.
#[derive(Debug, Clone)]
pub struct ConnectionRegistry {
    /// Хранилище соединений: client_id -> Connection
    connections: Arc<ConnectionMap>,
    config: ConnectionConfig,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl ConnectionRegistry {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// Возвращает соединение клиента, создавая его при необходимости.
    ///
    /// Идемпотентно: повторный вызов с тем же `id` отдаёт тот же экземпляр.
    pub fn connection(
        &self,
        id: &str,
    ) -> Arc<Connection> {
        if let Some(existing) = self.connections.read().get(id) {
            return existing.clone();
        }

        let mut connections = self.connections.write();
        // Между read и write соединение мог создать другой поток.
        if let Some(existing) = connections.get(id) {
            return existing.clone();
        }

        let connection = Connection::new(id, self.config.clone());
        let registry: Weak<ConnectionMap> = Arc::downgrade(&self.connections);
        connection.on_stale(move |stale| {
            if let Some(connections) = registry.upgrade() {
                remove_if_current(&connections, stale);
            }
        });
        connections.insert(id.to_string(), connection.clone());
        debug!(client_id = id, "Connection created");
        connection
    }

    /// Соединение клиента без создания нового.
    pub fn get(
        &self,
        id: &str,
    ) -> Option<Arc<Connection>> {
        self.connections.read().get(id).cloned()
    }

    /// Закрывает соединение: отпускает удерживаемый запрос, снимает
    /// слушателей и удаляет из реестра. `None`: no-op.
    pub fn destroy_connection(
        &self,
        connection: Option<&Arc<Connection>>,
    ) {
        if let Some(connection) = connection {
            remove_if_current(&self.connections, connection);
        }
    }

    /// Закрывает соединение клиента по идентификатору, если оно есть.
    pub fn destroy(
        &self,
        id: &str,
    ) {
        let connection = self.get(id);
        self.destroy_connection(connection.as_ref());
    }

    /// Отпускает удерживаемые запросы всех клиентов, названных в сообщениях.
    pub fn flush_connection<'a, I>(
        &self,
        messages: I,
    ) where
        I: IntoIterator<Item = &'a Message>,
    {
        for message in messages {
            if let Some(connection) = message.client_id().and_then(|id| self.get(id)) {
                connection.flush();
            }
        }
    }

    /// Количество активных соединений.
    pub fn active_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Идентификаторы клиентов с активными соединениями.
    pub fn ids(&self) -> Vec<String> {
        self.connections.read().keys().cloned().collect()
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }
}

/// Удаляет соединение, только если в реестре лежит именно этот экземпляр:
/// устаревший сигнал старого соединения не должен закрыть новое.
fn remove_if_current(
    connections: &ConnectionMap,
    connection: &Connection,
) {
    connection.flush();
    connection.remove_listeners();

    let mut map = connections.write();
    let is_current = map
        .get(connection.id())
        .is_some_and(|current| std::ptr::eq(Arc::as_ptr(current), connection));
    if is_current {
        map.remove(connection.id());
        debug!(client_id = connection.id(), "Connection destroyed");
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(ConnectionConfig::default())
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
