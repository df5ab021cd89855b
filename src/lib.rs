/// Server configuration loading (file and `BAYEUX_*` environment).
pub mod config;
/// Pub/Sub engine abstraction and the in-memory implementation.
pub mod engine;
/// Operational error types.
pub mod error;
/// Message extensions: incoming/outgoing hooks.
pub mod extension;
/// Flexible logging (formatting, filters, sinks).
pub mod logging;
/// Long-poll connections and their registry.
pub mod network;
/// Bayeux protocol: channels, messages, meta operations.
pub mod protocol;
/// Message dispatch pipeline and meta-channel handlers.
pub mod server;

// -----------------------------------------------------------------------------
//  Frequently used public types
// -----------------------------------------------------------------------------

/// Protocol status codes and error descriptors.
pub use bayeux_error::{EngineError, EngineResult, ErrorExt, ProtocolError, StatusCode};
/// config
pub use self::config::{ConnectionSettings, EngineSettings, Settings};
/// Engine contract, events and the built-in engine.
pub use engine::{Engine, EngineEvent, InMemoryEngine};
/// Operation errors and result types.
pub use error::{ServerError, ServerResult};
/// Extension API.
pub use extension::{Extension, ExtensionChain, Phase};
/// Logging setup.
pub use logging::{init_logging, LoggingConfig, LoggingHandle};
/// Connections.
pub use network::{ConnectOptions, Connection, ConnectionConfig, ConnectionRegistry, SocketId};
/// Messages and protocol constants.
pub use protocol::{make_response, Batch, Message, MetaMethod, BAYEUX_VERSION};
/// Dispatcher.
pub use server::{Origin, Server};
