//! Registry of configured MCP servers
//!
//! Keeps server configs in insertion order. Every config is validated before
//! it is accepted; problems come back as a [`ValidationResult`] rather than
//! an error so callers can report all of them at once.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::namespace::{validate_server_name, DEFAULT_SEPARATOR};
use crate::transport::parse_endpoint;
use crate::types::{ConfigFieldError, ServerConfig, TransportType, ValidationResult};

const REGISTRY_EVENT_CAPACITY: usize = 64;

/// Lifecycle of a registry entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryState {
    /// Accepted, validated on insertion
    Added,
    /// Re-validated since insertion
    Validated,
    /// Returned by `remove_server`
    Removed,
}

#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub config: Arc<ServerConfig>,
    pub state: RegistryState,
    pub validation: ValidationResult,
    pub added_at: DateTime<Utc>,
}

/// Registry change notification
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    Added { name: String },
    Updated { name: String },
    Removed { name: String },
    Rejected { name: String, errors: Vec<String> },
}

pub struct ServerRegistry {
    separator: String,
    validate_commands: bool,
    entries: RwLock<IndexMap<String, RegistryEntry>>,
    events: broadcast::Sender<RegistryEvent>,
}

impl Default for ServerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self::with_separator(DEFAULT_SEPARATOR)
    }

    /// Registry whose server names must not contain `separator`
    pub fn with_separator(separator: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(REGISTRY_EVENT_CAPACITY);
        Self {
            separator: separator.into(),
            validate_commands: true,
            entries: RwLock::new(IndexMap::new()),
            events,
        }
    }

    /// Toggle the PATH lookup for stdio commands
    pub fn set_validate_commands(&mut self, enabled: bool) {
        self.validate_commands = enabled;
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: RegistryEvent) {
        let _ = self.events.send(event);
    }

    /// Validate and insert `config`. Duplicates and invalid configs leave the
    /// registry unchanged.
    pub fn add_server(&self, config: ServerConfig) -> ValidationResult {
        let mut result = self.validate_config(&config);
        let name = config.name.clone();
        {
            let mut entries = self.entries.write();
            if entries.contains_key(&name) {
                result.add_error(ConfigFieldError::new(
                    &name,
                    "name",
                    Some(name.clone()),
                    "a server with this name is already registered",
                ));
            }
            if result.valid {
                entries.insert(
                    name.clone(),
                    RegistryEntry {
                        config: Arc::new(config),
                        state: RegistryState::Added,
                        validation: result.clone(),
                        added_at: Utc::now(),
                    },
                );
            }
        }

        if result.valid {
            tracing::debug!(server = %name, warnings = result.warnings.len(), "server registered");
            self.emit(RegistryEvent::Added { name });
        } else {
            tracing::warn!(server = %name, errors = ?result.error_messages(), "server rejected");
            self.emit(RegistryEvent::Rejected {
                name,
                errors: result.error_messages(),
            });
        }
        result
    }

    /// Add several configs, one result per config in input order
    pub fn add_servers(&self, configs: impl IntoIterator<Item = ServerConfig>) -> Vec<ValidationResult> {
        configs.into_iter().map(|c| self.add_server(c)).collect()
    }

    /// Replace the config of an already registered server, keeping its position
    pub fn update_server(&self, config: ServerConfig) -> ValidationResult {
        let mut result = self.validate_config(&config);
        let name = config.name.clone();
        {
            let mut entries = self.entries.write();
            match entries.get_mut(&name) {
                None => result.add_error(ConfigFieldError::new(
                    &name,
                    "name",
                    Some(name.clone()),
                    "no server with this name is registered",
                )),
                Some(entry) if result.valid => {
                    entry.config = Arc::new(config);
                    entry.state = RegistryState::Added;
                    entry.validation = result.clone();
                }
                Some(_) => {}
            }
        }
        if result.valid {
            self.emit(RegistryEvent::Updated { name });
        }
        result
    }

    pub fn remove_server(&self, name: &str) -> Option<RegistryEntry> {
        let removed = self.entries.write().shift_remove(name);
        removed.map(|mut entry| {
            entry.state = RegistryState::Removed;
            self.emit(RegistryEvent::Removed {
                name: name.to_string(),
            });
            entry
        })
    }

    pub fn get_server(&self, name: &str) -> Option<Arc<ServerConfig>> {
        self.entries.read().get(name).map(|e| Arc::clone(&e.config))
    }

    /// All configs in registration order
    pub fn get_all_servers(&self) -> Vec<Arc<ServerConfig>> {
        self.entries
            .read()
            .values()
            .map(|e| Arc::clone(&e.config))
            .collect()
    }

    pub fn enabled_servers(&self) -> Vec<Arc<ServerConfig>> {
        self.entries
            .read()
            .values()
            .filter(|e| e.config.enabled)
            .map(|e| Arc::clone(&e.config))
            .collect()
    }

    /// Server names in registration order
    pub fn server_names(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    pub fn entry(&self, name: &str) -> Option<RegistryEntry> {
        self.entries.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Re-run validation on a registered server. A passing result marks the
    /// entry `Validated`; `None` if the server is unknown.
    pub fn validate(&self, name: &str) -> Option<ValidationResult> {
        let config = self.get_server(name)?;
        let result = self.validate_config(&config);
        if let Some(entry) = self.entries.write().get_mut(name) {
            if result.valid {
                entry.state = RegistryState::Validated;
            }
            entry.validation = result.clone();
        }
        Some(result)
    }

    /// Check a config without registering it
    pub fn validate_config(&self, config: &ServerConfig) -> ValidationResult {
        let mut result = ValidationResult::valid();
        let name = config.name.as_str();

        if let Err(message) = validate_server_name(name, &self.separator) {
            result.add_error(ConfigFieldError::new(
                name,
                "name",
                Some(name.to_string()),
                message,
            ));
        }

        match config.transport_type {
            TransportType::Stdio => match config.command.as_deref().map(str::trim) {
                None | Some("") => result.add_error(ConfigFieldError::new(
                    name,
                    "command",
                    config.command.clone(),
                    "stdio transport requires a command",
                )),
                Some(command) => {
                    if self.validate_commands && !command_exists(command) {
                        result.add_warning(ConfigFieldError::new(
                            name,
                            "command",
                            Some(command.to_string()),
                            "command not found on PATH",
                        ));
                    }
                    if let Some(cwd) = &config.cwd {
                        if !cwd.is_dir() {
                            result.add_warning(ConfigFieldError::new(
                                name,
                                "cwd",
                                Some(cwd.display().to_string()),
                                "working directory does not exist",
                            ));
                        }
                    }
                }
            },
            TransportType::Http | TransportType::Sse => {
                match parse_endpoint(name, config.url.as_deref()) {
                    Err(e) => result.add_error(ConfigFieldError::new(
                        name,
                        "url",
                        config.url.clone(),
                        e.message(),
                    )),
                    Ok(url) => {
                        let local = matches!(
                            url.host_str(),
                            Some("localhost" | "127.0.0.1" | "[::1]" | "::1")
                        );
                        if url.scheme() == "http" && !local {
                            result.add_warning(ConfigFieldError::new(
                                name,
                                "url",
                                config.url.clone(),
                                "plain http to a remote host is not encrypted",
                            ));
                        }
                    }
                }
            }
        }

        if config.timeout.is_zero() {
            result.add_warning(ConfigFieldError::new(
                name,
                "timeout",
                Some("0".into()),
                "a zero timeout fails every request",
            ));
        }

        let mut empty_vars: Vec<_> = config
            .env
            .iter()
            .filter(|(_, value)| value.is_empty())
            .map(|(key, _)| key.clone())
            .collect();
        empty_vars.sort();
        for key in empty_vars {
            result.add_warning(ConfigFieldError::new(
                name,
                format!("env.{}", key),
                None,
                "environment variable is empty",
            ));
        }

        result
    }
}

fn command_exists(command: &str) -> bool {
    let path = Path::new(command);
    if path.components().count() > 1 {
        return path.exists();
    }
    which::which(command).is_ok()
}
