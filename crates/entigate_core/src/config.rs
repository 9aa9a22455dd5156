//! Client configuration and the connection registry.
//!
//! Connections are declared in a JSON document:
//!
//! ```json
//! {
//!   "connections": [
//!     {
//!       "connection_name": "Main",
//!       "connection_string": "Server=.;Database=Shop",
//!       "provider": "memory",
//!       "max_attempts": 5,
//!       "attempt_delay_ms": 1000,
//!       "timeout_secs": 30
//!     }
//!   ]
//! }
//! ```
//!
//! A [`ConfigRegistry`] holds an immutable snapshot of these declarations.
//! Each manager owns a [`ClientConfig`] copied out of it.

use crate::error::{GateError, GateResult};
use entigate_engine::SessionSettings;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Default maximum number of attempts per operation.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
/// Default delay between attempts, in milliseconds.
pub const DEFAULT_ATTEMPT_DELAY_MS: u64 = 1000;
/// Default command timeout, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u32 = 30;
/// Command timeouts must be strictly above this value.
pub const MIN_TIMEOUT_SECS: u32 = 3;

/// One declared connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Name used to select the connection.
    pub connection_name: String,
    /// Engine-specific connection descriptor.
    pub connection_string: String,
    /// Provider the connection is meant for.
    pub provider: Option<String>,
    /// Maximum number of attempts per operation.
    pub max_attempts: u32,
    /// Delay between attempts, in milliseconds.
    pub attempt_delay_ms: u64,
    /// Command timeout, in seconds.
    pub timeout_secs: u32,
    /// Lazy loading default.
    pub lazy_loading: bool,
    /// Capture original values automatically for archival entities.
    pub automatic_original_values: bool,
    /// Publish change notices after saving.
    pub notifications: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connection_name: String::new(),
            connection_string: String::new(),
            provider: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            attempt_delay_ms: DEFAULT_ATTEMPT_DELAY_MS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            lazy_loading: true,
            automatic_original_values: true,
            notifications: false,
        }
    }
}

impl ConnectionConfig {
    /// Creates a connection declaration with default tunables.
    pub fn new(name: impl Into<String>, connection_string: impl Into<String>) -> Self {
        Self {
            connection_name: name.into(),
            connection_string: connection_string.into(),
            ..Self::default()
        }
    }

    /// Checks every value against its allowed range.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the first invalid value.
    pub fn validate(&self) -> GateResult<()> {
        if self.connection_name.trim().is_empty() {
            return Err(GateError::configuration("connection name is empty"));
        }
        let name = &self.connection_name;
        if self.connection_string.trim().is_empty() {
            return Err(GateError::configuration(format!(
                "connection '{name}' has no connection string"
            )));
        }
        check_attempts(self.max_attempts)
            .and_then(|()| check_delay(self.attempt_delay_ms))
            .and_then(|()| check_timeout(self.timeout_secs))
            .map_err(|e| match e {
                GateError::Configuration { message, source } => GateError::Configuration {
                    message: format!("connection '{name}': {message}"),
                    source,
                },
                other => other,
            })
    }
}

fn check_attempts(value: u32) -> GateResult<()> {
    if value == 0 {
        return Err(GateError::configuration("max attempts must be greater than 0"));
    }
    Ok(())
}

fn check_delay(value: u64) -> GateResult<()> {
    if value == 0 {
        return Err(GateError::configuration("attempt delay must be greater than 0 ms"));
    }
    Ok(())
}

fn whole_millis(delay: Duration) -> Duration {
    Duration::from_millis(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX))
}

fn check_timeout(value: u32) -> GateResult<()> {
    if value <= MIN_TIMEOUT_SECS {
        return Err(GateError::configuration(format!(
            "timeout must be greater than {MIN_TIMEOUT_SECS} seconds, got {value}"
        )));
    }
    Ok(())
}

/// Configuration owned by a single manager.
///
/// Runtime setters validate their input and flag the configuration as
/// changed; the manager opens a new session the next time it starts an
/// operation and then marks the configuration synchronized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    connection_name: String,
    connection_string: String,
    provider: Option<String>,
    max_attempts: u32,
    attempt_delay: Duration,
    timeout_secs: u32,
    lazy_loading: bool,
    automatic_original_values: bool,
    notifications: bool,
    changed: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from(&ConnectionConfig::default())
    }
}

impl From<&ConnectionConfig> for ClientConfig {
    fn from(config: &ConnectionConfig) -> Self {
        Self {
            connection_name: config.connection_name.clone(),
            connection_string: config.connection_string.clone(),
            provider: config.provider.clone(),
            max_attempts: config.max_attempts,
            attempt_delay: Duration::from_millis(config.attempt_delay_ms),
            timeout_secs: config.timeout_secs,
            lazy_loading: config.lazy_loading,
            automatic_original_values: config.automatic_original_values,
            notifications: config.notifications,
            changed: false,
        }
    }
}

impl ClientConfig {
    /// Creates a configuration with default values and no connection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a configuration from a validated connection declaration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the declaration is invalid.
    pub fn from_connection(config: &ConnectionConfig) -> GateResult<Self> {
        config.validate()?;
        Ok(Self::from(config))
    }

    /// Sets the connection name and string.
    #[must_use]
    pub fn with_connection(mut self, name: impl Into<String>, connection_string: impl Into<String>) -> Self {
        self.connection_name = name.into();
        self.connection_string = connection_string.into();
        self
    }

    /// Sets the expected provider.
    #[must_use]
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Sets the maximum number of attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the delay between attempts.
    ///
    /// The delay is kept in whole milliseconds; any sub-millisecond part is
    /// dropped.
    #[must_use]
    pub fn with_attempt_delay(mut self, delay: Duration) -> Self {
        self.attempt_delay = whole_millis(delay);
        self
    }

    /// Sets the command timeout in seconds.
    #[must_use]
    pub fn with_timeout_secs(mut self, secs: u32) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Sets the lazy loading default.
    #[must_use]
    pub fn with_lazy_loading(mut self, enabled: bool) -> Self {
        self.lazy_loading = enabled;
        self
    }

    /// Sets automatic detection of archival entities.
    #[must_use]
    pub fn with_automatic_original_values(mut self, enabled: bool) -> Self {
        self.automatic_original_values = enabled;
        self
    }

    /// Enables or disables change notices.
    #[must_use]
    pub fn with_notifications(mut self, enabled: bool) -> Self {
        self.notifications = enabled;
        self
    }

    /// Checks every value against its allowed range.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the first invalid value.
    pub fn validate(&self) -> GateResult<()> {
        if self.connection_string.trim().is_empty() {
            return Err(GateError::configuration("no connection string configured"));
        }
        if self.connection_name.trim().is_empty() {
            return Err(GateError::configuration("connection name is empty"));
        }
        check_attempts(self.max_attempts)?;
        check_delay(u64::try_from(self.attempt_delay.as_millis()).unwrap_or(u64::MAX))?;
        check_timeout(self.timeout_secs)
    }

    /// Changes the maximum number of attempts.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `attempts` is zero.
    pub fn set_max_attempts(&mut self, attempts: u32) -> GateResult<()> {
        check_attempts(attempts)?;
        self.max_attempts = attempts;
        self.mark_changed();
        Ok(())
    }

    /// Changes the delay between attempts.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the delay is below one millisecond.
    /// Sub-millisecond parts are dropped.
    pub fn set_attempt_delay(&mut self, delay: Duration) -> GateResult<()> {
        check_delay(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX))?;
        self.attempt_delay = whole_millis(delay);
        self.mark_changed();
        Ok(())
    }

    /// Changes the command timeout.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the timeout is 3 seconds or less.
    pub fn set_timeout_secs(&mut self, secs: u32) -> GateResult<()> {
        check_timeout(secs)?;
        self.timeout_secs = secs;
        self.mark_changed();
        Ok(())
    }

    /// Changes the connection string.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the string is empty.
    pub fn set_connection_string(&mut self, connection_string: impl Into<String>) -> GateResult<()> {
        let connection_string = connection_string.into();
        if connection_string.trim().is_empty() {
            return Err(GateError::configuration("connection string is empty"));
        }
        self.connection_string = connection_string;
        self.mark_changed();
        Ok(())
    }

    /// Enables or disables change notices.
    pub fn set_notifications(&mut self, enabled: bool) {
        self.notifications = enabled;
    }

    /// Enables or disables automatic detection of archival entities.
    pub fn set_automatic_original_values(&mut self, enabled: bool) {
        self.automatic_original_values = enabled;
    }

    /// Switches to another declared connection.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the connection is not declared.
    pub fn change_connection(&mut self, registry: &ConfigRegistry, name: &str) -> GateResult<()> {
        let Some(config) = registry.get(name) else {
            tracing::error!(connection = name, "unable to find connection");
            return Err(GateError::configuration(format!(
                "unable to find connection '{name}'"
            )));
        };
        *self = Self::from(&config);
        self.mark_changed();
        tracing::info!(connection = name, "configuration loaded");
        Ok(())
    }

    fn mark_changed(&mut self) {
        if !self.changed {
            self.changed = true;
            tracing::info!(connection = %self.connection_name, "configuration changed");
        }
    }

    /// Marks the configuration as applied to the live session.
    pub fn mark_synchronized(&mut self) {
        if self.changed {
            self.changed = false;
            tracing::info!(connection = %self.connection_name, "configuration synchronized");
        }
    }

    /// Returns true if the configuration changed since the last session.
    #[must_use]
    pub fn is_changed(&self) -> bool {
        self.changed
    }

    /// Connection name.
    #[must_use]
    pub fn connection_name(&self) -> &str {
        &self.connection_name
    }

    /// Connection string.
    #[must_use]
    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    /// Expected provider, if declared.
    #[must_use]
    pub fn provider(&self) -> Option<&str> {
        self.provider.as_deref()
    }

    /// Maximum number of attempts per operation.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay between attempts.
    #[must_use]
    pub fn attempt_delay(&self) -> Duration {
        self.attempt_delay
    }

    /// Command timeout in seconds.
    #[must_use]
    pub fn timeout_secs(&self) -> u32 {
        self.timeout_secs
    }

    /// Lazy loading default.
    #[must_use]
    pub fn lazy_loading(&self) -> bool {
        self.lazy_loading
    }

    /// Whether archival entities trigger original-value capture.
    #[must_use]
    pub fn automatic_original_values(&self) -> bool {
        self.automatic_original_values
    }

    /// Whether change notices are published.
    #[must_use]
    pub fn notifications(&self) -> bool {
        self.notifications
    }

    /// Builds the settings used to open a session.
    #[must_use]
    pub fn to_session_settings(&self) -> SessionSettings {
        SessionSettings {
            connection_name: self.connection_name.clone(),
            connection_string: self.connection_string.clone(),
            command_timeout: self.timeout_secs,
            lazy_loading: self.lazy_loading,
            provider: self.provider.clone(),
        }
    }

    /// Converts back into a connection declaration.
    #[must_use]
    pub fn to_connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            connection_name: self.connection_name.clone(),
            connection_string: self.connection_string.clone(),
            provider: self.provider.clone(),
            max_attempts: self.max_attempts,
            attempt_delay_ms: u64::try_from(self.attempt_delay.as_millis()).unwrap_or(u64::MAX),
            timeout_secs: self.timeout_secs,
            lazy_loading: self.lazy_loading,
            automatic_original_values: self.automatic_original_values,
            notifications: self.notifications,
        }
    }
}

/// The set of declared connections at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    /// Declared connections, in declaration order.
    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,
}

impl ConfigSnapshot {
    /// Parses a JSON document.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the document is not valid JSON.
    pub fn from_json(json: &str) -> GateResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| GateError::configuration_with("invalid configuration document", e))
    }

    /// Checks every connection and rejects duplicate names.
    ///
    /// # Errors
    ///
    /// Returns the first configuration error found.
    pub fn validate(&self) -> GateResult<()> {
        for (i, connection) in self.connections.iter().enumerate() {
            connection.validate()?;
            let duplicate = self.connections[..i]
                .iter()
                .any(|c| c.connection_name.eq_ignore_ascii_case(&connection.connection_name));
            if duplicate {
                return Err(GateError::configuration(format!(
                    "connection '{}' is declared twice",
                    connection.connection_name
                )));
            }
        }
        Ok(())
    }

    /// Finds a connection by name, ignoring ASCII case.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ConnectionConfig> {
        self.connections
            .iter()
            .find(|c| c.connection_name.eq_ignore_ascii_case(name))
    }
}

/// Shared registry of declared connections.
///
/// Readers get an `Arc` to an immutable snapshot; [`ConfigRegistry::reload`]
/// swaps in a new one atomically.
#[derive(Debug, Default)]
pub struct ConfigRegistry {
    snapshot: RwLock<Arc<ConfigSnapshot>>,
}

impl ConfigRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry from connection declarations.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if any declaration is invalid.
    pub fn from_connections(connections: Vec<ConnectionConfig>) -> GateResult<Self> {
        let registry = Self::new();
        registry.reload(ConfigSnapshot { connections })?;
        Ok(registry)
    }

    /// Creates a registry from a JSON document.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the document is invalid.
    pub fn from_json(json: &str) -> GateResult<Self> {
        let registry = Self::new();
        registry.reload(ConfigSnapshot::from_json(json)?)?;
        Ok(registry)
    }

    /// Creates a registry from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the file cannot be read or is invalid.
    pub fn from_file(path: impl AsRef<Path>) -> GateResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            GateError::configuration_with(format!("cannot read {}", path.display()), e)
        })?;
        Self::from_json(&json)
    }

    /// Replaces the declared connections.
    ///
    /// The current snapshot is kept if the new one is invalid.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the snapshot is invalid.
    pub fn reload(&self, snapshot: ConfigSnapshot) -> GateResult<()> {
        snapshot.validate()?;
        let count = snapshot.connections.len();
        *self.snapshot.write() = Arc::new(snapshot);
        tracing::info!(connections = count, "configuration registry loaded");
        Ok(())
    }

    /// Returns the current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// Finds a connection by name, ignoring ASCII case.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<ConnectionConfig> {
        self.snapshot().get(name).cloned()
    }

    /// Returns the first declared connection.
    #[must_use]
    pub fn first(&self) -> Option<ConnectionConfig> {
        self.snapshot().connections.first().cloned()
    }

    /// Number of declared connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshot().connections.len()
    }

    /// Returns true if no connection is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Builds a client configuration for `name`, or for the first declared
    /// connection when `name` is `None`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the connection cannot be found.
    pub fn client_config(&self, name: Option<&str>) -> GateResult<ClientConfig> {
        let config = match name {
            Some(name) => self.get(name).ok_or_else(|| {
                GateError::configuration(format!("unable to find connection '{name}'"))
            })?,
            None => self
                .first()
                .ok_or_else(|| GateError::configuration("no connection declared"))?,
        };
        ClientConfig::from_connection(&config)
    }
}
