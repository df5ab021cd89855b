pub mod engine;
pub mod protocol;

// Публичный экспорт всех типов ошибок и функций из вложенных
// модулей, чтобы упростить доступ к ним из внешнего кода.
pub use engine::*;
pub use protocol::*;
