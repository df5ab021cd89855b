pub mod settings;

pub use settings::{ConnectionSettings, EngineSettings, Settings};
