//! Retry loop of the execution engine.
//!
//! Every data operation runs through [`execute`]: before each attempt
//! after the first it pauses for the configured delay, then counts the
//! attempt in the session token and runs it. Engine failures are retried
//! until the attempt budget runs out, except malformed queries which are
//! canceled immediately. Any other error is returned unchanged.

use crate::config::ClientConfig;
use crate::error::{GateError, GateResult};
use crate::token::SessionToken;
use entigate_engine::EngineError;
use std::time::Duration;

/// Blocks the calling thread between attempts.
pub trait Sleeper: Send + Sync {
    /// Pauses for `delay`.
    fn sleep(&self, delay: Duration);
}

/// Sleeper backed by [`std::thread::sleep`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, delay: Duration) {
        std::thread::sleep(delay);
    }
}

/// Attempt budget of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts.
    pub max_attempts: u32,
    /// Pause before every attempt after the first.
    pub delay: Duration,
}

impl From<&ClientConfig> for RetryPolicy {
    fn from(config: &ClientConfig) -> Self {
        Self {
            max_attempts: config.max_attempts(),
            delay: config.attempt_delay(),
        }
    }
}

/// Why a single attempt failed.
#[derive(Debug)]
pub(crate) enum AttemptFailure {
    /// The store rejected the command; subject to retry.
    Engine(EngineError),
    /// Anything else; returned as is.
    Fatal(GateError),
}

impl From<EngineError> for AttemptFailure {
    fn from(err: EngineError) -> Self {
        Self::Engine(err)
    }
}

impl From<GateError> for AttemptFailure {
    fn from(err: GateError) -> Self {
        Self::Fatal(err)
    }
}

/// State the retry loop needs from whoever runs the attempts.
pub(crate) trait RetryContext {
    /// Budget of the operation.
    fn policy(&self) -> RetryPolicy;

    /// Token counting the attempts.
    fn token_mut(&mut self) -> &mut SessionToken;

    /// Pauses between attempts.
    fn pause(&self, delay: Duration);

    /// Last statement sent to the store, if known.
    fn last_statement(&self) -> Option<String>;
}

/// Runs `attempt` until it succeeds, fails fatally or the budget runs out.
///
/// # Errors
///
/// Returns [`GateError::Canceled`] wrapping the last engine error when the
/// budget is exhausted or the query is malformed, and fatal errors as
/// returned by `attempt`.
pub(crate) fn execute<C, T>(
    ctx: &mut C,
    operation: &str,
    mut attempt: impl FnMut(&mut C) -> Result<T, AttemptFailure>,
) -> GateResult<T>
where
    C: RetryContext + ?Sized,
{
    let policy = ctx.policy();
    loop {
        if ctx.token_mut().attempts() > 0 {
            tracing::debug!(operation, delay = ?policy.delay, "waiting before next attempt");
            ctx.pause(policy.delay);
        }
        let number = ctx.token_mut().begin_attempt();

        let result = attempt(ctx);
        let statement = ctx.last_statement();
        ctx.token_mut().set_statement(statement);

        let source = match result {
            Ok(value) => return Ok(value),
            Err(AttemptFailure::Fatal(err)) => return Err(err),
            Err(AttemptFailure::Engine(err)) => err,
        };

        if source.is_malformed_query() || number >= policy.max_attempts {
            let statement = ctx.token_mut().statement().map(str::to_string);
            tracing::warn!(
                operation,
                statement = statement.as_deref().unwrap_or("unknown"),
                "unable to execute command"
            );
            tracing::error!(operation, attempts = number, error = %source, "operation canceled");
            return Err(GateError::Canceled {
                operation: operation.to_string(),
                attempts: number,
                statement,
                source,
            });
        }

        tracing::warn!(operation, attempt = number, error = %source, "attempt failed, retrying");
    }
}
