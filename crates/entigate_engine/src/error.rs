//! Error types for mapping-engine operations.

use thiserror::Error;

/// Result type for mapping-engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Engine error codes that denote a malformed statement.
///
/// Failures carrying one of these codes are caused by the statement itself
/// (schema mismatch, type conversion, constraint violation) and will fail
/// again no matter how often they are retried.
pub const MALFORMED_QUERY_CODES: &[i32] = &[
    102,  // incorrect syntax
    107,  // column prefix does not match
    170,  // syntax error near token
    207,  // invalid column name
    208,  // invalid object name
    242,  // out-of-range conversion
    547,  // constraint violation
    2705, // duplicate column name
    2812, // unknown stored procedure
    3621, // statement terminated
    8152, // value would be truncated
];

/// Errors raised by a mapping engine or one of its sessions.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    /// The engine rejected or failed to run a statement.
    #[error("statement failed with code {code}: {message}")]
    Statement {
        /// Engine-specific error code.
        code: i32,
        /// Engine message.
        message: String,
    },

    /// A write was based on values that changed in the store meanwhile.
    #[error("concurrency conflict on {shape} {identifier}")]
    Concurrency {
        /// Shape of the conflicting entity.
        shape: String,
        /// Display form of the conflicting identifier.
        identifier: String,
    },

    /// The connection to the store failed.
    #[error("connection failure: {0}")]
    Connection(String),

    /// A command exceeded its timeout.
    #[error("command timed out after {seconds} seconds")]
    Timeout {
        /// The configured command timeout.
        seconds: u32,
    },

    /// The shape is not part of the engine model.
    #[error("unknown shape: {0}")]
    UnknownShape(String),

    /// A shape descriptor is malformed.
    #[error("invalid shape {shape}: {message}")]
    InvalidShape {
        /// Shape name.
        shape: String,
        /// What is wrong with it.
        message: String,
    },

    /// The entity carries no usable key.
    #[error("missing key for {shape}")]
    MissingKey {
        /// Shape of the entity.
        shape: String,
    },

    /// The entity is not attached to the session.
    #[error("entity is not attached to the session")]
    NotAttached,

    /// The requested state transition is not supported.
    #[error("invalid state transition: {0}")]
    InvalidTransition(String),
}

impl EngineError {
    /// Creates a statement error.
    pub fn statement(code: i32, message: impl Into<String>) -> Self {
        Self::Statement {
            code,
            message: message.into(),
        }
    }

    /// Creates an invalid shape error.
    pub fn invalid_shape(shape: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidShape {
            shape: shape.into(),
            message: message.into(),
        }
    }

    /// Returns the engine error code, if any.
    #[must_use]
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Statement { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns true for a concurrency conflict raised during commit.
    #[must_use]
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, Self::Concurrency { .. })
    }

    /// Returns true if the failure is caused by the statement itself.
    #[must_use]
    pub fn is_malformed_query(&self) -> bool {
        self.code()
            .is_some_and(|code| MALFORMED_QUERY_CODES.contains(&code))
    }
}
