use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

/// How a failed transaction is retried.
#[derive(Clone)]
pub struct RetryOptions {
    pub(crate) attempts: u32,
    pub(crate) backoff: Arc<dyn Fn(u32) -> Duration + Send + Sync>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    Serializable,
}

/// Options for the transaction statement sent to the server.
#[derive(Debug, Clone)]
pub struct TransactionOptions {
    pub(crate) isolation: IsolationLevel,
    pub(crate) read_only: bool,
    pub(crate) deferrable: bool,
}

impl RetryOptions {
    /// `attempts` bounds the total number of tries, including the
    /// first one.
    pub fn new(
        attempts: u32,
        backoff: impl Fn(u32) -> Duration + Send + Sync + 'static,
    ) -> RetryOptions {
        RetryOptions {
            attempts,
            backoff: Arc::new(backoff),
        }
    }
}

impl Default for RetryOptions {
    fn default() -> RetryOptions {
        RetryOptions {
            attempts: 3,
            backoff: Arc::new(default_backoff),
        }
    }
}

impl fmt::Debug for RetryOptions {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RetryOptions")
            .field("attempts", &self.attempts)
            .finish_non_exhaustive()
    }
}

/// Exponential backoff with jitter: 100ms, 200ms, 400ms, ... plus up
/// to 100ms of randomness.
pub fn default_backoff(attempt: u32) -> Duration {
    Duration::from_millis(2u64.saturating_pow(attempt) * 100 + rand::rng().random_range(0..100))
}

impl Default for TransactionOptions {
    fn default() -> TransactionOptions {
        TransactionOptions {
            isolation: IsolationLevel::Serializable,
            read_only: false,
            deferrable: false,
        }
    }
}

impl TransactionOptions {
    pub fn isolation(mut self, isolation: IsolationLevel) -> TransactionOptions {
        self.isolation = isolation;
        self
    }
    pub fn read_only(mut self, read_only: bool) -> TransactionOptions {
        self.read_only = read_only;
        self
    }
    pub fn deferrable(mut self, deferrable: bool) -> TransactionOptions {
        self.deferrable = deferrable;
        self
    }
    pub(crate) fn start_command(&self) -> String {
        let mut out = String::from("start transaction isolation serializable");
        out.push_str(if self.read_only {
            ", read only"
        } else {
            ", read write"
        });
        out.push_str(if self.deferrable {
            ", deferrable"
        } else {
            ", not deferrable"
        });
        out
    }
}
