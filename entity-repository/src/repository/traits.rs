//! Repository trait definitions
//!
//! The trait uses RPITIT (Return Position Impl Trait In Traits), available
//! since Rust 1.75, so async methods need no `async_trait`.
//!
//! # Example
//!
//! ```rust,ignore
//! use entity_repository::prelude::*;
//!
//! async fn titles_by(
//!     books: &impl Repository<Book>,
//!     author_id: i64,
//!     page: Page,
//! ) -> RepositoryResult<Vec<String>> {
//!     books
//!         .get_selected_columns_filtered_with_pagination(
//!             Selector::column::<String>("title")?,
//!             FilterCondition::eq("author_id", author_id).into(),
//!             Tracking::Detached,
//!             page,
//!         )
//!         .await
//! }
//! ```

use std::future::Future;

use super::entity::Entity;
use super::error::RepositoryError;
use super::filter::Filter;
use super::pagination::Page;
use super::query::{Query, Tracking};
use super::selector::Selector;
use crate::store::Store;

/// Result type for repository operations
pub type RepositoryResult<T> = std::result::Result<T, RepositoryError>;

/// Uniform data access over one entity type
///
/// Lookups that find nothing return `Ok(None)`; every other failure is an
/// error. Mutations flush immediately: when `add`, `update` or `delete`
/// returns an error, nothing was committed.
pub trait Repository<E: Entity>: Send + Sync {
    /// The persistence collaborator
    type Store: Store;

    /// Find by wide primary key; the entity stays attached to the tracker
    fn get(&self, id: i64) -> impl Future<Output = RepositoryResult<Option<E>>> + Send;

    /// Find by narrow primary key; the entity is returned detached
    fn get_detached(&self, id: i32) -> impl Future<Output = RepositoryResult<Option<E>>> + Send;

    /// The whole collection as a lazy, composable query
    ///
    /// Nothing runs until the query is fetched or counted.
    fn get_all(&self, tracking: Tracking) -> Query<'_, Self::Store, E>;

    /// Insert and flush; a zero key is replaced by the generated one
    ///
    /// # Errors
    ///
    /// `ConstraintViolation` when the store rejects the row.
    fn add(&self, entity: &mut E) -> impl Future<Output = RepositoryResult<()>> + Send;

    /// Persist the entity's full state and flush
    ///
    /// # Errors
    ///
    /// `Stale` when no row with the entity's key exists.
    fn update(&self, entity: &E) -> impl Future<Output = RepositoryResult<()>> + Send;

    /// Remove and flush
    ///
    /// # Errors
    ///
    /// `Stale` when the row is already gone, `ConstraintViolation` when other
    /// rows still reference it.
    fn delete(&self, entity: &E) -> impl Future<Output = RepositoryResult<()>> + Send;

    /// Size of the whole collection, ignoring any filter
    fn count(&self) -> impl Future<Output = RepositoryResult<u64>> + Send;

    /// Rows matching `filter`
    fn count_filtered(&self, filter: Filter) -> impl Future<Output = RepositoryResult<u64>> + Send;

    /// Project every row
    fn get_selected_columns<R: Send + 'static>(
        &self,
        selector: Selector<R>,
        tracking: Tracking,
    ) -> impl Future<Output = RepositoryResult<Vec<R>>> + Send;

    /// Project rows matching `filter`
    fn get_selected_columns_filtered<R: Send + 'static>(
        &self,
        selector: Selector<R>,
        filter: Filter,
        tracking: Tracking,
    ) -> impl Future<Output = RepositoryResult<Vec<R>>> + Send;

    /// Project every row, then take one page
    fn get_selected_columns_with_pagination<R: Send + 'static>(
        &self,
        selector: Selector<R>,
        tracking: Tracking,
        page: Page,
    ) -> impl Future<Output = RepositoryResult<Vec<R>>> + Send;

    /// Filter, project, then take one page
    fn get_selected_columns_filtered_with_pagination<R: Send + 'static>(
        &self,
        selector: Selector<R>,
        filter: Filter,
        tracking: Tracking,
        page: Page,
    ) -> impl Future<Output = RepositoryResult<Vec<R>>> + Send;

    /// Like the filtered, paginated variant, but the predicate is optional
    ///
    /// `None` restricts nothing.
    fn get_selected_columns_with_pagination_and_search<R: Send + 'static>(
        &self,
        selector: Selector<R>,
        search: Option<Filter>,
        page: Page,
        tracking: Tracking,
    ) -> impl Future<Output = RepositoryResult<Vec<R>>> + Send;
}
