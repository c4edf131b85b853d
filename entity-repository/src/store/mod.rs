//! The persistence collaborator behind every repository
//!
//! A [`Store`] executes composed [`QueryPlan`]s, looks rows up by primary
//! key, and saves batches of staged changes. It also owns the
//! [`ChangeTracker`] that tracked reads attach to.
//!
//! Two implementations ship with the crate:
//!
//! - [`MemoryStore`]: in-process tables with unique and foreign-key
//!   constraint emulation, for tests and embedded use
//! - [`PgStore`]: PostgreSQL through sqlx (feature `database`)

mod memory;
#[cfg(feature = "database")]
mod postgres;
mod tracker;

use std::future::Future;

pub use memory::MemoryStore;
#[cfg(feature = "database")]
pub use postgres::{render_count, render_select, PgStore};
pub use tracker::{ChangeKind, ChangeTracker, PendingChange, SavedChange, UnitOfWork};

use crate::repository::{Entity, EntityDescriptor, Query, QueryPlan, RepositoryResult, Row, Tracking};

/// Storage engine contract
///
/// Implementations must apply the stages of a plan in order: filter, then
/// ordering, then projection, then the page window. `save_changes` is
/// all-or-nothing.
pub trait Store: Clone + Send + Sync + 'static {
    /// Execute a composed read and return the projected rows
    fn fetch(&self, plan: &QueryPlan) -> impl Future<Output = RepositoryResult<Vec<Row>>> + Send;

    /// Count rows matching the plan's filter (projection and page ignored)
    fn count(&self, plan: &QueryPlan) -> impl Future<Output = RepositoryResult<u64>> + Send;

    /// Primary-key lookup returning every column
    fn find_by_key(
        &self,
        entity: &EntityDescriptor,
        key: i64,
    ) -> impl Future<Output = RepositoryResult<Option<Row>>> + Send;

    /// Apply every staged change atomically
    ///
    /// Returns one [`SavedChange`] per staged change, in staging order, with
    /// generated keys filled in. On error nothing is applied.
    fn save_changes(
        &self,
        unit: UnitOfWork,
    ) -> impl Future<Output = RepositoryResult<Vec<SavedChange>>> + Send;

    fn tracker(&self) -> &ChangeTracker;

    /// Open a unit of work for staging changes
    fn begin(&self) -> UnitOfWork {
        UnitOfWork::new()
    }

    /// Detach an entity from the change tracker
    fn detach(&self, table: &'static str, key: i64) -> bool {
        self.tracker().detach(table, key)
    }

    /// The full collection of `E`, ready for composition
    fn set_of<E: Entity>(&self, tracking: Tracking) -> Query<'_, Self, E> {
        Query::new(self, tracking)
    }
}

/// Attach fetched rows when the plan asks for tracking of whole entities
pub(crate) fn attach_results(tracker: &ChangeTracker, plan: &QueryPlan, rows: &[Row]) {
    if plan.attaches_results() {
        for row in rows {
            tracker.attach(&plan.entity, row.clone());
        }
    }
}
