//! Resilience: Transaction Retry
//!
//! Every read-modify-write against the document store goes through
//! [`run_in_transaction`], so business logic never handles conflicts itself.
//!
//! # Design
//!
//! ```text
//! attempt 1: begin → body(tx) → commit
//!   ├─ commit ok                → Ok(value)
//!   ├─ body error (not conflict) → Err(error), nothing written
//!   └─ conflict                 → sleep(delay_for(1)), attempt 2 from a fresh snapshot
//! ...
//! attempt N conflicts           → Err(RetriesExhausted)
//! ```
//!
//! The body is synchronous: model calls and typing delays cannot happen
//! while a transaction is open.
//!
//! # Usage
//!
//! ```rust,ignore
//! let joined = run_in_transaction(&store, &policy, "join_cohort", |tx| {
//!     let mut p: ParticipantProfile = tx.require(&path)?;
//!     p.current_cohort_id = cohort_id.to_string();
//!     tx.set(&path, &p)?;
//!     Ok(p)
//! })
//! .await?;
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{CoordinationError, CoordinationResult};
use crate::state::{DocumentStore, StoreError, Transaction};

/// Bounded retry schedule for conflicting transactions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay after the first conflict
    pub base_delay: Duration,
    /// Delay multiplier per further conflict (1.0 = fixed delay)
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_multiplier: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            backoff_multiplier: backoff_multiplier.max(1.0),
        }
    }

    /// Delay to wait after the given (1-based) failed attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        self.base_delay
            .mul_f64(self.backoff_multiplier.powi(exponent))
    }

    /// Same schedule with a different attempt budget
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(100), 1.0)
    }
}

/// Run `body` in a transaction, retrying from scratch on conflicts
pub async fn run_in_transaction<T, F>(
    store: &DocumentStore,
    policy: &RetryPolicy,
    operation: &str,
    mut body: F,
) -> CoordinationResult<T>
where
    F: FnMut(&mut Transaction<'_>) -> CoordinationResult<T>,
{
    for attempt in 1..=policy.max_attempts {
        let conflict = match attempt_once(store, &mut body) {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation, attempt, "Transaction committed after retry");
                }
                return Ok(value);
            }
            Err(CoordinationError::Store(StoreError::Conflict { path })) => path,
            Err(e) => return Err(e),
        };

        if attempt < policy.max_attempts {
            let delay = policy.delay_for(attempt);
            warn!(
                operation,
                attempt,
                path = %conflict,
                delay_ms = delay.as_millis() as u64,
                "Transaction conflict, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    warn!(
        operation,
        attempts = policy.max_attempts,
        "Transaction retries exhausted"
    );
    Err(CoordinationError::RetriesExhausted {
        operation: operation.to_string(),
        attempts: policy.max_attempts,
    })
}

fn attempt_once<T, F>(store: &DocumentStore, body: &mut F) -> CoordinationResult<T>
where
    F: FnMut(&mut Transaction<'_>) -> CoordinationResult<T>,
{
    let mut tx = store.begin()?;
    let value = body(&mut tx)?;
    tx.commit()?;
    Ok(value)
}
