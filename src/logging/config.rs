use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ServerError;

/// Формат вывода событий.
#[derive(Debug, Default, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

/// Конфигурация логирования.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Базовый уровень для крейта (`trace` .. `error`)
    pub level: String,
    /// Дополнительные директивы EnvFilter, например `"bayeux::network=debug"`
    pub directives: Vec<String>,
    /// Формат консольного вывода
    pub format: LogFormat,
    /// Цветной вывод в консоль
    pub with_ansi: bool,
    pub with_target: bool,
    pub with_thread_ids: bool,
    pub with_line_numbers: bool,
    /// Каталог для файлового лога; `None`: только консоль
    pub log_dir: Option<PathBuf>,
    /// Имя файла (ротация по дням)
    pub file_name: String,
}

impl LoggingConfig {
    /// Собирает директиву EnvFilter из уровня и дополнительных директив.
    pub fn build_filter_directive(&self) -> String {
        let mut parts = vec![format!("bayeux={}", self.level)];
        parts.extend(self.directives.iter().cloned());
        parts.join(",")
    }

    pub fn validate(&self) -> Result<(), ServerError> {
        match self.level.to_ascii_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" | "off" => {}
            other => {
                return Err(ServerError::Logging(format!(
                    "unknown log level '{other}'"
                )))
            }
        }
        if self.log_dir.is_some() && self.file_name.trim().is_empty() {
            return Err(ServerError::Logging("file_name must not be empty".into()));
        }
        Ok(())
    }

    /// Создаёт каталог для файлового лога, если он задан.
    pub fn ensure_log_dir(&self) -> Result<(), ServerError> {
        if let Some(dir) = &self.log_dir {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directives: Vec::new(),
            format: LogFormat::Pretty,
            with_ansi: true,
            with_target: true,
            with_thread_ids: false,
            with_line_numbers: false,
            log_dir: None,
            file_name: "bayeux.log".to_string(),
        }
    }
}
