//! Configuration Module
//!
//! Handles proxy configuration loading and validation.

pub mod loader;
pub mod settings;

pub use loader::ConfigLoader;
pub use settings::{
    AgentsConfig, GeminiConfig, MonitoringConfig, ProbeCommand, ProbeCommands, ProxyConfig,
    ServerConfig, TokenRotationConfig,
};
