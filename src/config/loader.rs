//! Configuration Loader
//!
//! Layers the built-in defaults with configuration files found on disk.

use crate::config::settings::ProxyConfig;
use crate::error::{ProxyError, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Configuration loader with support for multiple sources
pub struct ConfigLoader {
    /// Merged JSON document, defaults first
    raw: Value,

    /// Files merged so far, in order
    sources: Vec<PathBuf>,

    config: ProxyConfig,
}

impl ConfigLoader {
    /// Create a new config loader and load from default locations
    pub fn new() -> Result<Self> {
        let mut loader = Self::empty();

        // Load built-in defaults first
        loader.load_builtin_defaults()?;

        // Then load from file system (can override built-ins)
        loader.load_from_default_paths()?;

        Ok(loader)
    }

    /// Create a loader with a specific config file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let mut loader = Self::empty();

        loader.load_builtin_defaults()?;
        loader.load_from_file(path)?;

        Ok(loader)
    }

    fn empty() -> Self {
        Self {
            raw: Value::Object(serde_json::Map::new()),
            sources: Vec::new(),
            config: ProxyConfig::default(),
        }
    }

    /// Load built-in defaults
    fn load_builtin_defaults(&mut self) -> Result<()> {
        let defaults = include_str!("../../defaults.json");
        let value: Value = serde_json::from_str(defaults).map_err(|e| {
            ProxyError::Config(format!("Failed to parse built-in defaults.json: {}", e))
        })?;

        self.merge_value(value)
    }

    /// Load configuration from default paths
    fn load_from_default_paths(&mut self) -> Result<()> {
        for path in Self::get_config_paths() {
            if path.exists() {
                self.load_from_file(&path)?;
            }
        }

        Ok(())
    }

    /// Get list of config paths to check
    fn get_config_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        // 1. Environment variable
        if let Ok(custom_path) = std::env::var("GEMINI_PROXY_CONFIG") {
            paths.push(PathBuf::from(custom_path));
        }

        // 2. Current directory
        paths.push(PathBuf::from("gemini-proxy.json"));

        // 3. User config directory
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("gemini-proxy").join("config.json"));
        }

        // 4. Home directory
        if let Some(home_dir) = dirs::home_dir() {
            paths.push(home_dir.join(".gemini-proxy").join("config.json"));
        }

        paths
    }

    /// Load configuration from a specific file
    fn load_from_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let value: Value = serde_json::from_str(&content).map_err(|e| {
            ProxyError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;

        self.merge_value(value)?;
        self.sources.push(path.to_path_buf());
        tracing::debug!(path = %path.display(), "merged configuration file");
        Ok(())
    }

    /// Deep-merge another document into this one (later values override earlier)
    fn merge_value(&mut self, other: Value) -> Result<()> {
        merge_json(&mut self.raw, other);
        self.config = serde_json::from_value(self.raw.clone())
            .map_err(|e| ProxyError::Config(format!("Invalid configuration: {}", e)))?;
        Ok(())
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Files that contributed to the configuration
    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    /// Take ownership of the configuration
    pub fn into_config(self) -> ProxyConfig {
        self.config
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "falling back to built-in configuration");
            Self::empty()
        })
    }
}

fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}
