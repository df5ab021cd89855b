//! Long-poll соединение клиента.
//!
//! `Connection`: почтовый ящик одного клиента. Сообщения копятся через
//! [`Connection::deliver`], а удерживаемый запрос [`Connection::connect`]
//! забирает их, когда:
//! - прошло окно накопления `max_delivery_delay` после первого сообщения
//! - вызван [`Connection::flush`]
//! - истёк таймаут удержания
//! - пришёл новый `connect` (старый получает пустой список)
//!
//! После каждого отпускания запускается таймер устаревания: если клиент не
//! переподключился за `stale_after`, слушатели получают сигнал
//! «соединение устарело».

use std::{
    fmt,
    sync::{Arc, Weak},
    time::Duration,
};

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::{sync::Notify, task::JoinHandle, time::Instant};
use tracing::{debug, info, trace};

use crate::{config::ConnectionSettings, protocol::Message};

/// Идентификатор сокета транспорта, к которому привязан запрос.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketId(pub u64);

/// Параметры соединения.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Пауза перед переподключением, секунды.
    pub interval: f64,
    /// Таймаут удержания запроса, секунды.
    pub timeout: f64,
    pub max_delivery_delay: Duration,
    pub stale_after: Duration,
}

/// Параметры одного `connect`.
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Переопределение таймаута удержания.
    pub timeout: Option<Duration>,
    pub socket: Option<SocketId>,
}

type StaleListener = Arc<dyn Fn(&Connection) + Send + Sync>;

#[derive(Debug, Default)]
struct ConnectionState {
    inbox: Vec<Message>,
    /// Номер текущего `connect`; новый запрос вытесняет старый.
    generation: u64,
    connected: bool,
    flush_requested: bool,
    delivery_due: Option<Instant>,
    socket: Option<SocketId>,
    deletion: Option<JoinHandle<()>>,
}

pub struct Connection {
    id: String,
    config: ConnectionConfig,
    state: Mutex<ConnectionState>,
    signal: Notify,
    listeners: Mutex<Vec<StaleListener>>,
    weak_self: Weak<Connection>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl ConnectionConfig {
    fn hold_timeout(&self) -> Duration {
        crate::config::settings::secs(self.timeout)
    }
}

/// Момент через `delay` от текущего; переполнение даёт «далёкое будущее».
fn instant_after(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay).unwrap_or_else(|| now + FAR_FUTURE)
}

/// Около 30 лет, как у `tokio::time`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

impl ConnectOptions {
    /// Опции из объекта `advice` запроса (`timeout` в миллисекундах).
    ///
    /// `timeout: 0` означает «ответить сразу»; отрицательные значения
    /// игнорируются.
    pub fn from_advice(
        advice: Option<&Map<String, Value>>,
        socket: Option<SocketId>,
    ) -> Self {
        let timeout = advice
            .and_then(|a| a.get("timeout"))
            .and_then(Value::as_f64)
            .filter(|ms| *ms >= 0.0)
            .map(|ms| crate::config::settings::secs(ms / 1000.0));
        Self { timeout, socket }
    }
}

impl Connection {
    /// Создаёт соединение и сразу запускает таймер устаревания.
    pub fn new(
        id: impl Into<String>,
        config: ConnectionConfig,
    ) -> Arc<Self> {
        let connection = Arc::new_cyclic(|weak_self| Self {
            id: id.into(),
            config,
            state: Mutex::new(ConnectionState::default()),
            signal: Notify::new(),
            listeners: Mutex::new(Vec::new()),
            weak_self: weak_self.clone(),
        });
        {
            let mut state = connection.state.lock();
            connection.schedule_deletion(&mut state);
        }
        connection
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Пауза перед переподключением, секунды.
    pub fn interval(&self) -> f64 {
        self.config.interval
    }

    /// Таймаут удержания, секунды.
    pub fn timeout(&self) -> f64 {
        self.config.timeout
    }

    pub fn socket(&self) -> Option<SocketId> {
        self.state.lock().socket
    }

    /// Есть ли удерживаемый запрос.
    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    /// Количество сообщений в очереди.
    pub fn queued(&self) -> usize {
        self.state.lock().inbox.len()
    }

    /// Ставит сообщение в очередь. Повторная доставка того же сообщения
    /// игнорируется.
    pub fn deliver(
        &self,
        message: Message,
    ) {
        {
            let mut state = self.state.lock();
            if state.inbox.contains(&message) {
                return;
            }
            state.inbox.push(message);
            if state.connected && state.delivery_due.is_none() {
                state.delivery_due = Some(instant_after(self.config.max_delivery_delay));
            }
        }
        self.signal.notify_waiters();
    }

    /// Удерживает запрос до появления сообщений или истечения таймаута.
    ///
    /// Таймаут из опций не может превышать таймаут удержания сервера.
    /// Возвращает накопленные сообщения в порядке поступления.
    pub async fn connect(
        &self,
        options: ConnectOptions,
    ) -> Vec<Message> {
        let limit = self.config.hold_timeout();
        let hold = options.timeout.map_or(limit, |t| t.min(limit));
        let deadline = instant_after(hold);

        let generation = {
            let mut state = self.state.lock();
            state.generation += 1;
            state.connected = true;
            state.flush_requested = false;
            if options.socket.is_some() {
                state.socket = options.socket;
            }
            if let Some(deletion) = state.deletion.take() {
                deletion.abort();
            }
            if !state.inbox.is_empty() && state.delivery_due.is_none() {
                state.delivery_due = Some(instant_after(self.config.max_delivery_delay));
            }
            state.generation
        };
        // Будим вытесненный запрос, если он был.
        self.signal.notify_waiters();
        trace!(client_id = %self.id, generation, ?hold, "Connection bound");

        loop {
            let notified = self.signal.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wake_at = {
                let mut state = self.state.lock();
                if state.generation != generation {
                    trace!(client_id = %self.id, generation, "Connection superseded");
                    return Vec::new();
                }
                let now = Instant::now();
                let due = state.delivery_due.is_some_and(|at| at <= now);
                if state.flush_requested || due || now >= deadline {
                    return self.release(&mut state);
                }
                state
                    .delivery_due
                    .map_or(deadline, |at| at.min(deadline))
            };

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    /// Немедленно отпускает удерживаемый запрос.
    ///
    /// Без удерживаемого запроса ничего не делает: очередь ждёт следующего
    /// `connect`.
    pub fn flush(&self) {
        {
            let mut state = self.state.lock();
            if !state.connected {
                return;
            }
            state.flush_requested = true;
        }
        self.signal.notify_waiters();
    }

    /// Подписка на сигнал устаревания.
    pub fn on_stale<F>(
        &self,
        listener: F,
    ) where
        F: Fn(&Connection) + Send + Sync + 'static,
    {
        self.listeners.lock().push(Arc::new(listener));
    }

    /// Снимает всех слушателей и таймер устаревания.
    pub fn remove_listeners(&self) {
        self.listeners.lock().clear();
        if let Some(deletion) = self.state.lock().deletion.take() {
            deletion.abort();
        }
    }

    fn release(
        &self,
        state: &mut ConnectionState,
    ) -> Vec<Message> {
        state.connected = false;
        state.flush_requested = false;
        state.delivery_due = None;
        let events = std::mem::take(&mut state.inbox);
        self.schedule_deletion(state);
        debug!(client_id = %self.id, events = events.len(), "Connection released");
        events
    }

    fn schedule_deletion(
        &self,
        state: &mut ConnectionState,
    ) {
        if let Some(previous) = state.deletion.take() {
            previous.abort();
        }
        // Вне рантайма (например, в синхронном коде) таймер не ставится.
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let weak = self.weak_self.clone();
        let stale_after = self.config.stale_after;
        state.deletion = Some(runtime.spawn(async move {
            tokio::time::sleep(stale_after).await;
            if let Some(connection) = weak.upgrade() {
                connection.emit_stale();
            }
        }));
    }

    fn emit_stale(&self) {
        info!(client_id = %self.id, "Connection went stale");
        let listeners: Vec<_> = self.listeners.lock().clone();
        for listener in listeners {
            listener(self);
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl From<&ConnectionSettings> for ConnectionConfig {
    fn from(settings: &ConnectionSettings) -> Self {
        Self {
            interval: settings.interval_secs.max(0.0),
            timeout: settings.timeout_secs.max(0.0),
            max_delivery_delay: settings.max_delivery_delay(),
            stale_after: settings.stale_after(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::from(&ConnectionSettings::default())
    }
}

impl fmt::Debug for Connection {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("connected", &state.connected)
            .field("queued", &state.inbox.len())
            .finish()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(deletion) = self.state.get_mut().deletion.take() {
            deletion.abort();
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
