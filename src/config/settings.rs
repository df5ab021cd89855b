use std::{path::Path, time::Duration};

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::{logging::LoggingConfig, protocol::DEFAULT_CONNECTION_TYPES};

/// Настройки сервера.
///
/// Порядок источников: значения по умолчанию, затем файл (`bayeux.toml`
/// или явно указанный), затем переменные окружения `BAYEUX_*`
/// (вложенные ключи через `__`, например `BAYEUX_CONNECTION__TIMEOUT_SECS`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Транспорты, которые сервер объявляет при рукопожатии.
    #[serde(default = "default_connection_types")]
    pub supported_connection_types: Vec<String>,
    #[serde(default)]
    pub connection: ConnectionSettings,
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Параметры long-poll соединений.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// Сколько держать long-poll запрос, секунды.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: f64,
    /// Пауза, которую клиент выдерживает перед переподключением, секунды.
    #[serde(default)]
    pub interval_secs: f64,
    /// Окно накопления сообщений перед отпусканием удерживаемого запроса.
    #[serde(default = "default_max_delivery_delay_ms")]
    pub max_delivery_delay_ms: u64,
    /// Простой после окончания long-poll, после которого соединение
    /// считается устаревшим.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: f64,
}

/// Параметры встроенного in-memory Engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Клиенты без `ping` дольше этого срока удаляются.
    #[serde(default = "default_client_timeout_secs")]
    pub client_timeout_secs: f64,
    /// Период фоновой очистки.
    #[serde(default = "default_reap_interval_secs")]
    pub reap_interval_secs: f64,
    /// Ёмкость broadcast-канала событий Engine.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Settings {
    /// Загружает настройки из `bayeux.toml` (если есть) и окружения.
    pub fn load() -> Result<Self, ConfigError> {
        Self::build(File::with_name("bayeux").required(false))
    }

    /// Загружает настройки из указанного файла и окружения.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        Self::build(File::from(path))
    }

    fn build<S>(file: S) -> Result<Self, ConfigError>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let cfg = Config::builder()
            // Значения по умолчанию
            .set_default("supported_connection_types", default_connection_types())?
            .set_default("connection.timeout_secs", default_timeout_secs())?
            .set_default("connection.stale_after_secs", default_stale_after_secs())?
            .add_source(file)
            // Переменные окружения с префиксом BAYEUX_
            .add_source(
                Environment::with_prefix("BAYEUX")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("supported_connection_types"),
            )
            .build()?;

        cfg.try_deserialize()
    }
}

impl ConnectionSettings {
    pub fn timeout(&self) -> Duration {
        secs(self.timeout_secs)
    }

    pub fn interval(&self) -> Duration {
        secs(self.interval_secs)
    }

    pub fn max_delivery_delay(&self) -> Duration {
        Duration::from_millis(self.max_delivery_delay_ms)
    }

    pub fn stale_after(&self) -> Duration {
        secs(self.stale_after_secs)
    }
}

impl EngineSettings {
    pub fn client_timeout(&self) -> Duration {
        secs(self.client_timeout_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        secs(self.reap_interval_secs)
    }
}

/// Секунды из конфигурации в `Duration`; отрицательные и NaN дают ноль.
pub(crate) fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::MAX)
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            supported_connection_types: default_connection_types(),
            connection: ConnectionSettings::default(),
            engine: EngineSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            interval_secs: 0.0,
            max_delivery_delay_ms: default_max_delivery_delay_ms(),
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            client_timeout_secs: default_client_timeout_secs(),
            reap_interval_secs: default_reap_interval_secs(),
            event_capacity: default_event_capacity(),
        }
    }
}

fn default_connection_types() -> Vec<String> {
    DEFAULT_CONNECTION_TYPES
        .iter()
        .map(|t| t.to_string())
        .collect()
}

fn default_timeout_secs() -> f64 {
    60.0
}

fn default_max_delivery_delay_ms() -> u64 {
    100
}

fn default_stale_after_secs() -> f64 {
    60.0
}

fn default_client_timeout_secs() -> f64 {
    90.0
}

fn default_reap_interval_secs() -> f64 {
    10.0
}

fn default_event_capacity() -> usize {
    1024
}
