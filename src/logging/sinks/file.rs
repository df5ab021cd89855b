use std::path::Path;

use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling::daily};
use tracing_subscriber::{layer::Layer as LayerTrait, registry::LookupSpan};

use crate::logging::{config::LoggingConfig, formatter};

/// Файловый слой с ежедневной ротацией и неблокирующей записью.
///
/// Guard нужно держать живым, пока нужен вывод в файл.
pub fn layer_with_config<S>(
    config: &LoggingConfig,
    dir: &Path,
) -> (Box<dyn LayerTrait<S> + Send + Sync>, WorkerGuard)
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    let file_appender = daily(dir, &config.file_name);
    let (writer, guard) = non_blocking(file_appender);

    // В файл никогда не пишем ANSI-коды.
    let layer = formatter::build_formatter_from_config(config, config.format, false, writer);
    (layer, guard)
}
