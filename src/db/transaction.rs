//! Explicit transaction boundary over the copy-on-write table overlay.
//!
//! A transaction acquires the single-writer context (bounded by
//! `max_wait`), clones the live tables into a working overlay, and swaps
//! the overlay in on commit. Rolling back, or dropping the handle without
//! committing, discards the overlay; partial writes are never visible to
//! other requests.

use std::time::Instant;

use parking_lot::RwLockWriteGuard;
use tracing::{debug, warn};

use crate::db::config::TransactionOptions;
use crate::db::{Database, TxEntityClient};
use crate::error::{Result, TesseraError, TimeoutPhase};
use crate::store::Tables;

/// The state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// Transaction is active and can accept operations.
    Active,
    /// Transaction has been successfully committed.
    Committed,
    /// Transaction has been rolled back.
    RolledBack,
}

/// A database transaction guaranteeing all-or-nothing application.
///
/// Obtained from [`Database::begin`] or the [`Database::transaction`]
/// callback. Operations go through [`Transaction::entity`], which exposes
/// the same per-entity surface as the non-transactional client. The body
/// deadline (`timeout`) is checked on every operation and again at commit.
pub struct Transaction<'db> {
    guard: RwLockWriteGuard<'db, Tables>,
    db: &'db Database,
    work: Tables,
    state: TxState,
    deadline: Instant,
    options: TransactionOptions,
}

impl<'db> Transaction<'db> {
    pub(crate) fn begin(db: &'db Database, options: TransactionOptions) -> Result<Self> {
        let guard = db
            .tables
            .try_write_for(options.max_wait)
            .ok_or(TesseraError::TransactionTimeout {
                phase: TimeoutPhase::Acquire,
            })?;
        let work = guard.clone();
        debug!(
            isolation = ?options.isolation,
            timeout_ms = options.timeout.as_millis() as u64,
            "transaction started"
        );
        Ok(Self {
            guard,
            db,
            work,
            state: TxState::Active,
            deadline: Instant::now() + options.timeout,
            options,
        })
    }

    /// Current state of the transaction.
    pub fn state(&self) -> TxState {
        self.state
    }

    /// Options the transaction was started with.
    pub fn options(&self) -> &TransactionOptions {
        &self.options
    }

    pub(crate) fn check_deadline(&self) -> Result<()> {
        if Instant::now() > self.deadline {
            warn!("transaction body deadline exceeded");
            return Err(TesseraError::TransactionTimeout {
                phase: TimeoutPhase::Execute,
            });
        }
        Ok(())
    }

    /// Transactional client for one entity.
    pub fn entity(&mut self, name: &str) -> Result<TxEntityClient<'_>> {
        self.check_deadline()?;
        let entity = self.db.schema.entity(name)?.name;
        Ok(TxEntityClient {
            schema: &self.db.schema,
            limits: &self.db.options.limits,
            tables: &mut self.work,
            entity,
            deadline: self.deadline,
        })
    }

    /// Commits the overlay, making all changes visible atomically.
    pub fn commit(mut self) -> Result<()> {
        self.check_deadline()?;
        *self.guard = std::mem::take(&mut self.work);
        self.state = TxState::Committed;
        debug!("transaction committed");
        Ok(())
    }

    /// Discards the overlay.
    pub fn rollback(mut self) {
        self.state = TxState::RolledBack;
        debug!("transaction rolled back");
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.state == TxState::Active {
            debug!("transaction dropped without commit; rolling back");
        }
    }
}
