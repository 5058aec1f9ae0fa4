//! Framed-TCP delay proxy: holds length-prefixed, CRC-protected messages for
//! a configurable duration before forwarding them to downstream clients.

pub mod config;
pub mod orchestrator;

pub use config::{ConfigBuilder, ConfigError, ProxyConfig};
pub use orchestrator::{OrchestratorError, ProxyOrchestrator};
