//! The one [`Repository`] implementation
//!
//! [`GenericRepository`] holds nothing but its store handle and settings.
//! Every call is a single composed read or a single stage-and-flush
//! mutation against the store.

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::time::Instant;

use super::entity::{Entity, EntityDescriptor};
use super::error::{RepositoryError, RepositoryOperation};
use super::filter::Filter;
use super::pagination::Page;
use super::query::{Query, Tracking};
use super::selector::Selector;
use super::traits::{Repository, RepositoryResult};
use crate::config::RepositoryConfig;
use crate::store::{Store, UnitOfWork};

/// Repository for entity `E` backed by store `S`
///
/// # Example
///
/// ```rust,ignore
/// let books = GenericRepository::<Book, _>::new(MemoryStore::new());
///
/// let mut book = Book::new("Dune");
/// books.add(&mut book).await?;
/// assert_ne!(book.id, 0);
///
/// let page = books
///     .get_selected_columns_with_pagination(
///         Selector::column::<String>("title")?,
///         Tracking::Detached,
///         Page::first(10)?,
///     )
///     .await?;
/// ```
pub struct GenericRepository<E, S> {
    store: S,
    config: RepositoryConfig,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity, S: Store> GenericRepository<E, S> {
    pub fn new(store: S) -> Self {
        Self::with_config(store, RepositoryConfig::default())
    }

    pub fn with_config(store: S, config: RepositoryConfig) -> Self {
        Self {
            store,
            config,
            _entity: PhantomData,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    fn check_page(&self, page: Page) -> RepositoryResult<()> {
        if page.size() > self.config.max_page_size {
            return Err(RepositoryError::validation_failed(format!(
                "page size {} exceeds the maximum of {}",
                page.size(),
                self.config.max_page_size
            ))
            .with_entity_type(E::NAME));
        }
        Ok(())
    }

    /// Run a read, tagging failures and logging slow ones
    async fn timed<T, F>(&self, operation: RepositoryOperation, read: F) -> RepositoryResult<T>
    where
        F: Future<Output = RepositoryResult<T>> + Send,
    {
        let started = Instant::now();
        let result = read.await;
        let elapsed = started.elapsed();

        if elapsed > self.config.slow_query_threshold() {
            tracing::warn!(
                entity = E::NAME,
                %operation,
                elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                threshold_ms = self.config.slow_query_threshold_ms,
                "slow repository read"
            );
        }
        result.map_err(|e| e.with_operation(operation).with_entity_type(E::NAME))
    }

    /// Stage one change and flush it
    async fn flush<F>(&self, operation: RepositoryOperation, stage: F) -> RepositoryResult<i64>
    where
        F: FnOnce(&mut UnitOfWork) + Send,
    {
        let mut unit = self.store.begin();
        stage(&mut unit);

        match self.store.save_changes(unit).await {
            Ok(saved) => {
                let key = saved.first().map_or(0, |change| change.key);
                tracing::debug!(entity = E::NAME, %operation, key, "changes saved");
                Ok(key)
            }
            Err(e) => {
                let e = e.with_operation(operation);
                tracing::error!(entity = E::NAME, %operation, error = %e, "failed to save changes");
                Err(e)
            }
        }
    }

    async fn find(&self, operation: RepositoryOperation, id: i64) -> RepositoryResult<Option<E>> {
        let descriptor = EntityDescriptor::of::<E>();
        let found = self
            .timed(operation, self.store.find_by_key(&descriptor, id))
            .await
            .map_err(|e| e.with_entity(E::NAME, id.to_string()))?;

        let Some(row) = found else {
            tracing::debug!(entity = E::NAME, id, "not found");
            return Ok(None);
        };
        let entity = E::from_row(&row).map_err(|e| {
            e.with_operation(operation)
                .with_entity(E::NAME, id.to_string())
        })?;
        self.store.tracker().attach(&descriptor, row);
        Ok(Some(entity))
    }
}

impl<E: Entity, S: Store> Repository<E> for GenericRepository<E, S> {
    type Store = S;

    async fn get(&self, id: i64) -> RepositoryResult<Option<E>> {
        self.find(RepositoryOperation::FindById, id).await
    }

    async fn get_detached(&self, id: i32) -> RepositoryResult<Option<E>> {
        let key = i64::from(id);
        let found = self.find(RepositoryOperation::FindById, key).await?;
        if found.is_some() {
            self.store.detach(E::TABLE, key);
        }
        Ok(found)
    }

    fn get_all(&self, tracking: Tracking) -> Query<'_, S, E> {
        self.store.set_of::<E>(tracking)
    }

    async fn add(&self, entity: &mut E) -> RepositoryResult<()> {
        let row = entity.to_row();
        let key = self
            .flush(RepositoryOperation::Create, move |unit| {
                unit.mark_added(EntityDescriptor::of::<E>(), row);
            })
            .await?;
        entity.set_key(key);
        Ok(())
    }

    async fn update(&self, entity: &E) -> RepositoryResult<()> {
        let row = entity.to_row();
        self.flush(RepositoryOperation::Update, move |unit| {
            unit.mark_modified(EntityDescriptor::of::<E>(), row);
        })
        .await?;
        Ok(())
    }

    async fn delete(&self, entity: &E) -> RepositoryResult<()> {
        let row = entity.to_row();
        self.flush(RepositoryOperation::Delete, move |unit| {
            unit.mark_removed(EntityDescriptor::of::<E>(), row);
        })
        .await?;
        Ok(())
    }

    async fn count(&self) -> RepositoryResult<u64> {
        let query = self.get_all(Tracking::Detached);
        self.timed(RepositoryOperation::Count, query.count()).await
    }

    async fn count_filtered(&self, filter: Filter) -> RepositoryResult<u64> {
        let query = self.get_all(Tracking::Detached).filter(filter);
        self.timed(RepositoryOperation::Count, query.count()).await
    }

    async fn get_selected_columns<R: Send + 'static>(
        &self,
        selector: Selector<R>,
        tracking: Tracking,
    ) -> RepositoryResult<Vec<R>> {
        let query = self.get_all(tracking).select(selector);
        match self.timed(RepositoryOperation::Project, query.fetch()).await {
            Err(e) if self.config.swallow_unfiltered_projection_errors => {
                tracing::warn!(
                    entity = E::NAME,
                    error = %e,
                    "projection failed; returning no rows"
                );
                Ok(Vec::new())
            }
            result => result,
        }
    }

    async fn get_selected_columns_filtered<R: Send + 'static>(
        &self,
        selector: Selector<R>,
        filter: Filter,
        tracking: Tracking,
    ) -> RepositoryResult<Vec<R>> {
        let query = self.get_all(tracking).filter(filter).select(selector);
        self.timed(RepositoryOperation::Project, query.fetch()).await
    }

    async fn get_selected_columns_with_pagination<R: Send + 'static>(
        &self,
        selector: Selector<R>,
        tracking: Tracking,
        page: Page,
    ) -> RepositoryResult<Vec<R>> {
        self.check_page(page)?;
        let query = self.get_all(tracking).select(selector).paginate(page);
        self.timed(RepositoryOperation::Project, query.fetch()).await
    }

    async fn get_selected_columns_filtered_with_pagination<R: Send + 'static>(
        &self,
        selector: Selector<R>,
        filter: Filter,
        tracking: Tracking,
        page: Page,
    ) -> RepositoryResult<Vec<R>> {
        self.check_page(page)?;
        let query = self
            .get_all(tracking)
            .filter(filter)
            .select(selector)
            .paginate(page);
        self.timed(RepositoryOperation::Project, query.fetch()).await
    }

    async fn get_selected_columns_with_pagination_and_search<R: Send + 'static>(
        &self,
        selector: Selector<R>,
        search: Option<Filter>,
        page: Page,
        tracking: Tracking,
    ) -> RepositoryResult<Vec<R>> {
        self.check_page(page)?;
        let query = self
            .get_all(tracking)
            .search(search)
            .select(selector)
            .paginate(page);
        self.timed(RepositoryOperation::Search, query.fetch()).await
    }
}

impl<E, S: Clone> Clone for GenericRepository<E, S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            config: self.config.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E: Entity, S> fmt::Debug for GenericRepository<E, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenericRepository")
            .field("entity", &E::NAME)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
