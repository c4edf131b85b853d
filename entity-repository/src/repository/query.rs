//! Query composition
//!
//! Every read composes the same fixed pipeline:
//!
//! ```text
//! base collection -> tracking -> filter / search / order -> projection -> pagination
//! ```
//!
//! The stages are encoded in the types. [`Query`] accepts tracking, filters
//! and ordering; [`Query::select`] turns it into a [`Projected`] query, which
//! no longer accepts filters; [`Projected::paginate`] yields a [`Paged`]
//! query, which can only be executed. Filters therefore always see the full
//! entity (they may reference columns the projection drops), and page windows
//! always index the final projected sequence.
//!
//! The composed [`QueryPlan`] is handed to the store in one call, so the
//! whole chain costs one round trip.
//!
//! # Example
//!
//! ```rust,ignore
//! let titles = store
//!     .set_of::<Book>(Tracking::Detached)
//!     .filter(FilterCondition::eq("author_id", 7_i64))
//!     .search(Filter::search(["title"], "dragon"))
//!     .select(Selector::<String>::column::<String>("title")?)
//!     .paginate(Page::new(2, 10)?)
//!     .fetch()
//!     .await?;
//! ```

use std::fmt;
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

use super::entity::{Entity, EntityDescriptor, Row};
use super::error::{RepositoryError, RepositoryOperation};
use super::filter::Filter;
use super::pagination::{OrderDirection, Page};
use super::selector::Selector;
use super::RepositoryResult;
use crate::store::Store;

/// Whether materialised entities join the store's change-tracking context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tracking {
    /// Attached: later updates need no re-fetch
    Tracked,
    /// Read-only snapshots
    #[default]
    Detached,
}

impl Tracking {
    pub const fn is_tracked(self) -> bool {
        matches!(self, Self::Tracked)
    }
}

impl From<bool> for Tracking {
    fn from(track_changes: bool) -> Self {
        if track_changes {
            Self::Tracked
        } else {
            Self::Detached
        }
    }
}

impl fmt::Display for Tracking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tracked => write!(f, "tracked"),
            Self::Detached => write!(f, "detached"),
        }
    }
}

/// A fully composed read, as handed to a store
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub entity: EntityDescriptor,
    pub tracking: Tracking,
    /// Conjunction of every filter stage, in application order
    pub filter: Filter,
    pub order_by: Vec<(String, OrderDirection)>,
    /// Projected columns; empty means every entity column
    pub projection: Vec<String>,
    pub page: Option<Page>,
}

impl QueryPlan {
    pub fn new(entity: EntityDescriptor, tracking: Tracking) -> Self {
        Self {
            entity,
            tracking,
            filter: Filter::All,
            order_by: Vec::new(),
            projection: Vec::new(),
            page: None,
        }
    }

    pub fn for_entity<E: Entity>(tracking: Tracking) -> Self {
        Self::new(EntityDescriptor::of::<E>(), tracking)
    }

    /// Columns the store must return
    pub fn projected_columns(&self) -> Vec<&str> {
        if self.projection.is_empty() {
            self.entity.columns.to_vec()
        } else {
            self.projection.iter().map(String::as_str).collect()
        }
    }

    /// True when each result row carries a whole entity
    pub fn materializes_entity(&self) -> bool {
        let projected = self.projected_columns();
        self.entity.columns.iter().all(|c| projected.contains(c))
    }

    /// Whether result rows should be attached to the change tracker
    pub fn attaches_results(&self) -> bool {
        self.tracking.is_tracked() && self.materializes_entity()
    }

    /// Explicit ordering followed by the key, so page windows are stable
    pub fn effective_order(&self) -> Vec<(&str, OrderDirection)> {
        let mut order: Vec<(&str, OrderDirection)> = self
            .order_by
            .iter()
            .map(|(column, direction)| (column.as_str(), *direction))
            .collect();
        if !order.iter().any(|(column, _)| *column == self.entity.key) {
            order.push((self.entity.key, OrderDirection::Ascending));
        }
        order
    }

    /// Reject references to columns the entity does not have
    pub fn validate(&self) -> RepositoryResult<()> {
        let unknown = self
            .filter
            .columns()
            .into_iter()
            .chain(self.order_by.iter().map(|(column, _)| column.as_str()))
            .chain(self.projection.iter().map(String::as_str))
            .find(|column| !self.entity.has_column(column));

        match unknown {
            Some(column) => Err(RepositoryError::invalid_query(
                RepositoryOperation::Project,
                format!("`{}` has no column `{}`", self.entity.table, column),
            )
            .with_entity_type(self.entity.name)),
            None => Ok(()),
        }
    }
}

impl fmt::Display for QueryPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.entity.table, self.tracking)?;
        if !self.filter.is_all() {
            write!(f, " where {:?}", self.filter.columns())?;
        }
        if !self.order_by.is_empty() {
            write!(f, " order {:?}", self.order_by)?;
        }
        write!(f, " select {:?}", self.projected_columns())?;
        if let Some(page) = &self.page {
            write!(f, " {}", page)?;
        }
        Ok(())
    }
}

/// Stage 1-2: base collection with tracking, filters and ordering
pub struct Query<'s, S, E> {
    store: &'s S,
    plan: QueryPlan,
    _entity: PhantomData<fn() -> E>,
}

impl<'s, S: Store, E: Entity> Query<'s, S, E> {
    pub fn new(store: &'s S, tracking: Tracking) -> Self {
        Self {
            store,
            plan: QueryPlan::for_entity::<E>(tracking),
            _entity: PhantomData,
        }
    }

    /// Restrict the collection; successive filters are ANDed
    #[must_use]
    pub fn filter(mut self, filter: impl Into<Filter>) -> Self {
        let current = std::mem::take(&mut self.plan.filter);
        self.plan.filter = current.and(filter);
        self
    }

    /// Apply an optional search predicate; `None` restricts nothing
    #[must_use]
    pub fn search(self, search: Option<Filter>) -> Self {
        match search {
            Some(filter) => self.filter(filter),
            None => self,
        }
    }

    #[must_use]
    pub fn order_by(mut self, column: impl Into<String>, direction: OrderDirection) -> Self {
        self.plan.order_by.push((column.into(), direction));
        self
    }

    /// Project the filtered collection
    pub fn select<R>(mut self, selector: Selector<R>) -> Projected<'s, S, E, R> {
        self.plan.projection = selector.columns().to_vec();
        Projected {
            store: self.store,
            plan: self.plan,
            selector,
            _entity: PhantomData,
        }
    }

    pub fn plan(&self) -> &QueryPlan {
        &self.plan
    }

    /// Materialise whole entities
    pub async fn fetch(self) -> RepositoryResult<Vec<E>> {
        self.select(Selector::<E>::entity()).fetch().await
    }

    /// Count rows matching the filters
    pub async fn count(self) -> RepositoryResult<u64> {
        self.store.count(&self.plan).await
    }
}

/// Stage 3: projected, optionally paginated next
pub struct Projected<'s, S, E, R> {
    store: &'s S,
    plan: QueryPlan,
    selector: Selector<R>,
    _entity: PhantomData<fn() -> E>,
}

impl<'s, S: Store, E: Entity, R> Projected<'s, S, E, R> {
    /// Window the projected results
    pub fn paginate(mut self, page: Page) -> Paged<'s, S, E, R> {
        self.plan.page = Some(page);
        Paged {
            store: self.store,
            plan: self.plan,
            selector: self.selector,
            _entity: PhantomData,
        }
    }

    pub fn plan(&self) -> &QueryPlan {
        &self.plan
    }

    pub async fn fetch(self) -> RepositoryResult<Vec<R>> {
        execute(self.store, &self.plan, &self.selector).await
    }
}

/// Stage 4: projected and paginated
pub struct Paged<'s, S, E, R> {
    store: &'s S,
    plan: QueryPlan,
    selector: Selector<R>,
    _entity: PhantomData<fn() -> E>,
}

impl<S: Store, E: Entity, R> Paged<'_, S, E, R> {
    pub fn plan(&self) -> &QueryPlan {
        &self.plan
    }

    pub async fn fetch(self) -> RepositoryResult<Vec<R>> {
        execute(self.store, &self.plan, &self.selector).await
    }
}

async fn execute<S: Store, R>(
    store: &S,
    plan: &QueryPlan,
    selector: &Selector<R>,
) -> RepositoryResult<Vec<R>> {
    tracing::debug!(plan = %plan, "executing query");
    let rows: Vec<Row> = store.fetch(plan).await?;
    rows.iter()
        .map(|row| {
            selector
                .project(row)
                .map_err(|e| e.with_entity_type(plan.entity.name))
        })
        .collect()
}
