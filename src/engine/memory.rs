use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Weak,
    },
    time::Duration,
};

use async_trait::async_trait;
use bayeux_error::{EngineError, EngineResult};
use dashmap::DashMap;
use tokio::{sync::broadcast, task::JoinHandle, time::Instant};
use tracing::{debug, info, trace};
use uuid::Uuid;

use super::{Engine, EngineEvent};
use crate::{
    config::EngineSettings,
    protocol::{channel, message::CLIENT_ID, Message},
};

/// Состояние одного клиента.
#[derive(Debug)]
struct ClientRecord {
    channels: HashSet<String>,
    last_seen: Instant,
}

/// Engine в памяти процесса.
///
/// Поддерживает:
/// - Точные подписки и шаблоны `/*`, `/**`
/// - Доставку каждому клиенту не более одного экземпляра публикации
/// - Удаление клиентов, не делавших `ping` дольше `client_timeout`
pub struct InMemoryEngine {
    /// Клиенты → подписки и время последней активности
    clients: DashMap<String, ClientRecord>,
    /// Канал или шаблон → подписанные клиенты
    channels: DashMap<String, HashSet<String>>,
    events: broadcast::Sender<EngineEvent>,
    client_timeout: Duration,
    /// Общее количество вызовов `publish`
    pub publish_count: AtomicUsize,
    /// Количество отправленных событий `Message`
    pub delivery_count: AtomicUsize,
}

impl InMemoryEngine {
    pub fn new(
        client_timeout: Duration,
        event_capacity: usize,
    ) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            clients: DashMap::new(),
            channels: DashMap::new(),
            events,
            client_timeout,
            publish_count: AtomicUsize::new(0),
            delivery_count: AtomicUsize::new(0),
        }
    }

    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self::new(settings.client_timeout(), settings.event_capacity)
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Подписчики канала или шаблона (точное совпадение ключа).
    pub fn subscribers(
        &self,
        channel: &str,
    ) -> Vec<String> {
        self.channels
            .get(channel)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Удаляет клиентов без активности дольше `client_timeout`.
    ///
    /// Возвращает количество удалённых.
    pub fn reap_idle(&self) -> usize {
        let now = Instant::now();
        let idle: Vec<String> = self
            .clients
            .iter()
            .filter(|entry| now.duration_since(entry.value().last_seen) >= self.client_timeout)
            .map(|entry| entry.key().clone())
            .collect();

        let reaped = idle.iter().filter(|id| self.remove_client(id)).count();
        if reaped > 0 {
            info!(reaped, "Idle clients removed");
        }
        reaped
    }

    /// Запускает фоновую очистку с периодом `period`.
    ///
    /// Задача завершается сама, когда Engine уничтожен.
    pub fn spawn_reaper(
        self: &Arc<Self>,
        period: Duration,
    ) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = period.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(engine) => {
                        engine.reap_idle();
                    }
                    None => break,
                }
            }
        })
    }

    fn remove_client(
        &self,
        client_id: &str,
    ) -> bool {
        let Some((_, record)) = self.clients.remove(client_id) else {
            return false;
        };
        for channel in &record.channels {
            self.remove_subscriber(channel, client_id);
        }
        debug!(client_id, channels = record.channels.len(), "Client destroyed");
        // Ошибка send означает лишь отсутствие слушателей.
        let _ = self.events.send(EngineEvent::Disconnect {
            client_id: client_id.to_string(),
        });
        true
    }

    fn remove_subscriber(
        &self,
        channel: &str,
        client_id: &str,
    ) {
        let now_empty = match self.channels.get_mut(channel) {
            Some(mut set) => {
                set.remove(client_id);
                set.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.channels.remove_if(channel, |_, set| set.is_empty());
        }
    }
}

impl Default for InMemoryEngine {
    fn default() -> Self {
        Self::from_settings(&EngineSettings::default())
    }
}

#[async_trait]
impl Engine for InMemoryEngine {
    async fn create_client(&self) -> EngineResult<String> {
        let client_id = Uuid::new_v4().simple().to_string();
        self.clients.insert(
            client_id.clone(),
            ClientRecord {
                channels: HashSet::new(),
                last_seen: Instant::now(),
            },
        );
        debug!(client_id = %client_id, "Client created");
        Ok(client_id)
    }

    async fn client_exists(
        &self,
        client_id: &str,
    ) -> EngineResult<bool> {
        Ok(self.clients.contains_key(client_id))
    }

    async fn ping(
        &self,
        client_id: &str,
    ) -> EngineResult<()> {
        if let Some(mut record) = self.clients.get_mut(client_id) {
            record.last_seen = Instant::now();
            trace!(client_id, "Client ping");
        }
        Ok(())
    }

    async fn destroy_client(
        &self,
        client_id: &str,
    ) -> EngineResult<()> {
        self.remove_client(client_id);
        Ok(())
    }

    async fn subscribe(
        &self,
        client_id: &str,
        channel: &str,
    ) -> EngineResult<()> {
        {
            let mut record = self
                .clients
                .get_mut(client_id)
                .ok_or_else(|| EngineError::UnknownClient(client_id.to_string()))?;
            if !record.channels.insert(channel.to_string()) {
                return Ok(());
            }
        }
        self.channels
            .entry(channel.to_string())
            .or_default()
            .insert(client_id.to_string());
        debug!(client_id, channel, "Subscribed");
        Ok(())
    }

    async fn unsubscribe(
        &self,
        client_id: &str,
        channel: &str,
    ) -> EngineResult<()> {
        {
            let mut record = self
                .clients
                .get_mut(client_id)
                .ok_or_else(|| EngineError::UnknownClient(client_id.to_string()))?;
            if !record.channels.remove(channel) {
                return Ok(());
            }
        }
        self.remove_subscriber(channel, client_id);
        debug!(client_id, channel, "Unsubscribed");
        Ok(())
    }

    async fn publish(
        &self,
        message: Message,
    ) -> EngineResult<()> {
        self.publish_count.fetch_add(1, Ordering::Relaxed);

        let Some(name) = message.channel() else {
            return Ok(());
        };

        let mut recipients = HashSet::new();
        for pattern in channel::expand(name) {
            if let Some(set) = self.channels.get(&pattern) {
                recipients.extend(set.iter().cloned());
            }
        }
        if recipients.is_empty() {
            return Ok(());
        }

        trace!(channel = name, recipients = recipients.len(), "Publish fan-out");

        // Идентификатор отправителя подписчикам не передаётся.
        let mut outgoing = message;
        outgoing.remove(CLIENT_ID);

        for client_id in recipients {
            self.delivery_count.fetch_add(1, Ordering::Relaxed);
            let _ = self.events.send(EngineEvent::Message {
                client_id,
                message: outgoing.clone(),
            });
        }
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}
