//! Engine configuration: filter budgets and transaction defaults.

use std::time::Duration;

use crate::filter::FilterLimits;

/// Requested transaction isolation level.
///
/// The reference backend runs every transaction under a single-writer
/// copy-on-write overlay, which satisfies all four levels; the requested
/// level is recorded and surfaced for backends that distinguish them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    /// Weakest level; dirty reads permitted by contract.
    ReadUncommitted,
    /// Statements see only committed data.
    ReadCommitted,
    /// Reads are repeatable within the transaction.
    RepeatableRead,
    /// Full serializability.
    Serializable,
}

/// Timeouts and isolation for one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionOptions {
    /// Time allowed waiting to acquire the transactional context.
    pub max_wait: Duration,
    /// Time allowed for the transaction body to complete.
    pub timeout: Duration,
    /// Requested isolation level.
    pub isolation: IsolationLevel,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            max_wait: Duration::from_secs(2),
            timeout: Duration::from_secs(5),
            isolation: IsolationLevel::Serializable,
        }
    }
}

impl TransactionOptions {
    /// Sets `max_wait`.
    pub fn max_wait(mut self, value: Duration) -> Self {
        self.max_wait = value;
        self
    }

    /// Sets `timeout`.
    pub fn timeout(mut self, value: Duration) -> Self {
        self.timeout = value;
        self
    }

    /// Sets the isolation level.
    pub fn isolation(mut self, value: IsolationLevel) -> Self {
        self.isolation = value;
        self
    }
}

/// Engine-wide configuration.
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    /// Budgets applied while compiling predicate trees.
    pub limits: FilterLimits,
    /// Defaults for transactions started without explicit options.
    pub transaction: TransactionOptions,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            limits: FilterLimits::default(),
            transaction: TransactionOptions::default(),
        }
    }
}

impl DatabaseOptions {
    /// Tight budgets for untrusted callers.
    pub fn strict() -> Self {
        Self {
            limits: FilterLimits {
                max_depth: 8,
                max_nodes: 64,
                max_in_list: 128,
            },
            transaction: TransactionOptions {
                max_wait: Duration::from_millis(500),
                timeout: Duration::from_secs(2),
                isolation: IsolationLevel::Serializable,
            },
        }
    }

    /// Wide budgets for trusted in-process callers.
    pub fn permissive() -> Self {
        Self {
            limits: FilterLimits {
                max_depth: 128,
                max_nodes: 4096,
                max_in_list: 16384,
            },
            transaction: TransactionOptions {
                max_wait: Duration::from_secs(10),
                timeout: Duration::from_secs(30),
                isolation: IsolationLevel::Serializable,
            },
        }
    }
}
