use tracing_appender::non_blocking::WorkerGuard;

/// Handle для управления жизненным циклом логирования.
///
/// Держит guard файлового писателя: пока handle жив, фоновый поток
/// tracing-appender сбрасывает буфер в файл.
#[must_use = "dropping the handle stops file logging"]
pub struct LoggingHandle {
    file_guard: Option<WorkerGuard>,
}

impl LoggingHandle {
    pub fn new(file_guard: Option<WorkerGuard>) -> Self {
        Self { file_guard }
    }

    /// Включён ли вывод в файл.
    pub fn has_file_sink(&self) -> bool {
        self.file_guard.is_some()
    }

    /// Явное завершение: сбрасывает буфер файлового писателя.
    pub fn shutdown(mut self) {
        tracing::debug!("Logging shutdown");
        drop(self.file_guard.take());
    }
}
