//! Цепочка расширений.
//!
//! Расширение видит каждое входящее сообщение до обработки и каждый ответ
//! после неё. Возврат `None` отбрасывает сообщение: входящее не
//! обрабатывается, исходящий ответ не отправляется.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::trace;

use crate::protocol::Message;

/// Направление прохода через цепочку.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Incoming,
    Outgoing,
}

/// Перехватчик сообщений.
///
/// Обе стадии по умолчанию пропускают сообщение без изменений, так что
/// реализация переопределяет только нужную.
#[async_trait]
pub trait Extension: Send + Sync {
    async fn incoming(
        &self,
        message: Message,
    ) -> Option<Message> {
        Some(message)
    }

    async fn outgoing(
        &self,
        message: Message,
    ) -> Option<Message> {
        Some(message)
    }
}

/// Упорядоченный набор расширений.
#[derive(Default)]
pub struct ExtensionChain {
    extensions: RwLock<Vec<Arc<dyn Extension>>>,
}

impl ExtensionChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_extension(
        &self,
        extension: Arc<dyn Extension>,
    ) {
        self.extensions.write().push(extension);
    }

    /// Удаляет ранее добавленное расширение (сравнение по указателю).
    pub fn remove_extension(
        &self,
        extension: &Arc<dyn Extension>,
    ) -> bool {
        let mut extensions = self.extensions.write();
        let before = extensions.len();
        extensions.retain(|e| !Arc::ptr_eq(e, extension));
        extensions.len() != before
    }

    pub fn len(&self) -> usize {
        self.extensions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.read().is_empty()
    }

    /// Пропускает сообщение через все расширения по порядку.
    ///
    /// Останавливается на первом расширении, вернувшем `None`.
    pub async fn pipe_through(
        &self,
        phase: Phase,
        message: Message,
    ) -> Option<Message> {
        // Снимок, чтобы не держать блокировку через await.
        let extensions: Vec<_> = self.extensions.read().clone();

        let mut current = message;
        for (index, extension) in extensions.iter().enumerate() {
            let next = match phase {
                Phase::Incoming => extension.incoming(current).await,
                Phase::Outgoing => extension.outgoing(current).await,
            };
            match next {
                Some(message) => current = message,
                None => {
                    trace!(?phase, index, "Message dropped by extension");
                    return None;
                }
            }
        }
        Some(current)
    }
}

impl std::fmt::Debug for ExtensionChain {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ExtensionChain")
            .field("len", &self.len())
            .finish()
    }
}
