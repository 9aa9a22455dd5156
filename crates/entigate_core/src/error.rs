//! Error types for EntiGate core.

use entigate_engine::EngineError;
use std::error::Error as StdError;
use thiserror::Error;

/// Result type for core operations.
pub type GateResult<T> = Result<T, GateError>;

/// Boxed error used as the cause of configuration failures.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Broad category of a [`GateError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Settings missing or invalid.
    Configuration,
    /// The shape cannot be resolved or instantiated.
    Reflection,
    /// Session inconsistency reported by the provider.
    Provider,
    /// Operation aborted: budget exhausted, malformed query or disposal.
    Canceled,
    /// Programming error in the caller or the tracking state.
    InvalidState,
}

/// Errors that can occur in EntiGate core operations.
#[derive(Debug, Error)]
pub enum GateError {
    /// Settings are missing or invalid.
    #[error("configuration error: {message}")]
    Configuration {
        /// What is wrong.
        message: String,
        /// Underlying cause (I/O, parse error).
        #[source]
        source: Option<BoxError>,
    },

    /// The shape of an entity cannot be resolved or instantiated.
    #[error("cannot handle shape '{shape}': {message}")]
    Reflection {
        /// Shape name.
        shape: String,
        /// What is wrong.
        message: String,
        /// Engine cause, if any.
        #[source]
        source: Option<EngineError>,
    },

    /// The provider found the session in an inconsistent state.
    #[error("provider error: {message}")]
    Provider {
        /// What is wrong.
        message: String,
        /// Description of the entity involved.
        entity: Option<String>,
        /// Engine cause, if any.
        #[source]
        source: Option<EngineError>,
    },

    /// The operation was aborted after one or more attempts.
    #[error("unable to execute {operation} after {attempts} attempt(s): {source}")]
    Canceled {
        /// Operation that was aborted.
        operation: String,
        /// Attempts consumed.
        attempts: u32,
        /// Last statement sent to the store.
        statement: Option<String>,
        /// Engine failure of the last attempt.
        #[source]
        source: EngineError,
    },

    /// A tracking or usage invariant was violated.
    #[error("invalid state: {message}")]
    InvalidState {
        /// What is wrong.
        message: String,
        /// Description of the entity involved.
        entity: Option<String>,
    },

    /// The manager has been disposed.
    #[error("the manager has been disposed")]
    Disposed,
}

impl GateError {
    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a configuration error with a cause.
    pub fn configuration_with(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Configuration {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Creates a reflection error.
    pub fn reflection(shape: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Reflection {
            shape: shape.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Creates a reflection error caused by the engine.
    pub fn reflection_with(shape: impl Into<String>, source: EngineError) -> Self {
        Self::Reflection {
            shape: shape.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Creates a provider error.
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
            entity: None,
            source: None,
        }
    }

    /// Creates a provider error about a specific entity.
    pub fn provider_for(message: impl Into<String>, entity: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
            entity: Some(entity.into()),
            source: None,
        }
    }

    /// Creates a provider error caused by the engine.
    pub fn provider_with(message: impl Into<String>, source: EngineError) -> Self {
        Self::Provider {
            message: message.into(),
            entity: None,
            source: Some(source),
        }
    }

    /// Creates an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
            entity: None,
        }
    }

    /// Creates an invalid state error about a specific entity.
    pub fn invalid_state_for(message: impl Into<String>, entity: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
            entity: Some(entity.into()),
        }
    }

    /// Returns the category of the error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::Reflection { .. } => ErrorKind::Reflection,
            Self::Provider { .. } => ErrorKind::Provider,
            Self::Canceled { .. } | Self::Disposed => ErrorKind::Canceled,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
        }
    }

    /// Returns the engine error behind this error, if any.
    #[must_use]
    pub fn engine_error(&self) -> Option<&EngineError> {
        match self {
            Self::Canceled { source, .. } => Some(source),
            Self::Reflection { source, .. } | Self::Provider { source, .. } => source.as_ref(),
            _ => None,
        }
    }

    /// Returns the number of attempts of a canceled operation.
    #[must_use]
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::Canceled { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    /// Returns the statement captured when the operation was canceled.
    #[must_use]
    pub fn statement(&self) -> Option<&str> {
        match self {
            Self::Canceled { statement, .. } => statement.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds() {
        assert_eq!(GateError::configuration("x").kind(), ErrorKind::Configuration);
        assert_eq!(GateError::reflection("tag", "x").kind(), ErrorKind::Reflection);
        assert_eq!(GateError::provider("x").kind(), ErrorKind::Provider);
        assert_eq!(GateError::invalid_state("x").kind(), ErrorKind::InvalidState);
        assert_eq!(GateError::Disposed.kind(), ErrorKind::Canceled);
    }

    #[test]
    fn canceled_preserves_source() {
        let err = GateError::Canceled {
            operation: "save".into(),
            attempts: 2,
            statement: Some("UPDATE customers".into()),
            source: EngineError::statement(208, "invalid object name"),
        };
        assert_eq!(err.kind(), ErrorKind::Canceled);
        assert_eq!(err.attempts(), Some(2));
        assert_eq!(err.statement(), Some("UPDATE customers"));
        assert_eq!(err.engine_error().and_then(EngineError::code), Some(208));
        assert!(StdError::source(&err).is_some());
    }

    #[test]
    fn configuration_with_cause() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = GateError::configuration_with("cannot read gate.json", io);
        assert!(StdError::source(&err).is_some());
        assert!(err.to_string().contains("gate.json"));
    }
}
