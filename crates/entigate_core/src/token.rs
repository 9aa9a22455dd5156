//! Per-operation counters and flags.

use serde::{Deserialize, Serialize};

/// Row count of an operation that has not saved anything.
pub const NO_ROWS: i64 = -1;

/// Counters and flags of the operation in progress.
///
/// The token is reset at the start of every operation: `attempts` goes back
/// to 0 and `rows` to [`NO_ROWS`]. Only a successful save sets `rows`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionToken {
    attempts: u32,
    rows: i64,
    tracked: bool,
    save_allowed: bool,
    save_original_values: bool,
    statement: Option<String>,
}

impl Default for SessionToken {
    fn default() -> Self {
        Self {
            attempts: 0,
            rows: NO_ROWS,
            tracked: true,
            save_allowed: false,
            save_original_values: false,
            statement: None,
        }
    }
}

impl SessionToken {
    /// Creates a token in its initial state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets the per-operation counters.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.rows = NO_ROWS;
    }

    /// Counts a new attempt and returns its number, starting at 1.
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    /// Attempts made by the current operation.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Rows affected by the last save, or [`NO_ROWS`].
    #[must_use]
    pub fn rows(&self) -> i64 {
        self.rows
    }

    pub(crate) fn set_rows(&mut self, rows: i64) {
        self.rows = rows;
    }

    /// Returns true if the tracking set survives across operations.
    #[must_use]
    pub fn is_tracked(&self) -> bool {
        self.tracked
    }

    pub(crate) fn set_tracked(&mut self, tracked: bool) {
        self.tracked = tracked;
    }

    /// Returns true if the current operation may write.
    #[must_use]
    pub fn save_allowed(&self) -> bool {
        self.save_allowed
    }

    pub(crate) fn set_save_allowed(&mut self, allowed: bool) {
        self.save_allowed = allowed;
    }

    /// Returns true if original values are kept for the current entity.
    #[must_use]
    pub fn save_original_values(&self) -> bool {
        self.save_original_values
    }

    /// Asks the manager to keep original values of the current entity.
    pub fn set_save_original_values(&mut self, enabled: bool) {
        self.save_original_values = enabled;
    }

    /// Last statement sent to the store.
    #[must_use]
    pub fn statement(&self) -> Option<&str> {
        self.statement.as_deref()
    }

    pub(crate) fn set_statement(&mut self, statement: Option<String>) {
        if statement.is_some() {
            self.statement = statement;
        }
    }
}
