//! Projections from an entity to a result shape

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use super::entity::{Entity, Row};
use super::error::{RepositoryError, RepositoryOperation};
use super::RepositoryResult;

type MapFn<R> = dyn Fn(&Row) -> RepositoryResult<R> + Send + Sync;

/// Which columns to materialise and how to turn them into `R`
///
/// The column list is what the store fetches; the mapper only ever sees
/// those columns. A selector always names at least one column.
///
/// # Example
///
/// ```rust
/// use entity_repository::repository::{Row, Selector};
///
/// #[derive(Debug, PartialEq)]
/// struct TitleOnly {
///     id: i64,
///     title: String,
/// }
///
/// let selector = Selector::new(["id", "title"], |row: &Row| {
///     Ok(TitleOnly {
///         id: row.get("id")?,
///         title: row.get("title")?,
///     })
/// })
/// .unwrap();
///
/// assert_eq!(selector.columns(), ["id", "title"]);
/// ```
pub struct Selector<R> {
    columns: Arc<[String]>,
    map: Arc<MapFn<R>>,
    _result: PhantomData<fn() -> R>,
}

impl<R> Selector<R> {
    /// Create a selector over the given columns
    ///
    /// Fails with `ValidationFailed` when no column is given or a column is repeated.
    pub fn new<I, S, F>(columns: I, map: F) -> RepositoryResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&Row) -> RepositoryResult<R> + Send + Sync + 'static,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        if columns.is_empty() {
            return Err(RepositoryError::validation_failed(
                "a selector must project at least one column",
            ));
        }
        for (index, column) in columns.iter().enumerate() {
            if columns[..index].contains(column) {
                return Err(RepositoryError::validation_failed(format!(
                    "column `{}` is projected more than once",
                    column
                )));
            }
        }
        Ok(Self {
            columns: columns.into(),
            map: Arc::new(map),
            _result: PhantomData,
        })
    }

    /// Project a single column as a typed scalar
    pub fn column<T>(column: &str) -> RepositoryResult<Self>
    where
        T: super::entity::FromValue + 'static,
        R: From<T> + 'static,
    {
        let name = column.to_string();
        Self::new([column], move |row: &Row| row.get::<T>(&name).map(R::from))
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Whether every one of `columns` is projected
    pub fn covers(&self, columns: &[&str]) -> bool {
        columns
            .iter()
            .all(|column| self.columns.iter().any(|own| own == column))
    }

    pub(crate) fn project(&self, row: &Row) -> RepositoryResult<R> {
        (self.map)(row).map_err(|e| e.with_operation(RepositoryOperation::Project))
    }
}

impl<E: Entity> Selector<E> {
    /// Project every column and rebuild the entity
    pub fn entity() -> Self {
        Self {
            columns: E::COLUMNS.iter().map(|c| (*c).to_string()).collect(),
            map: Arc::new(E::from_row),
            _result: PhantomData,
        }
    }
}

impl<R> Clone for Selector<R> {
    fn clone(&self) -> Self {
        Self {
            columns: Arc::clone(&self.columns),
            map: Arc::clone(&self.map),
            _result: PhantomData,
        }
    }
}

impl<R> fmt::Debug for Selector<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selector")
            .field("columns", &self.columns)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::RepositoryErrorKind;

    #[test]
    fn test_empty_selector_rejected() {
        let err = Selector::<i64>::new(Vec::<String>::new(), |_| Ok(0)).unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::ValidationFailed);
    }

    #[test]
    fn test_duplicate_column_rejected() {
        assert!(Selector::<i64>::new(["id", "id"], |_| Ok(0)).is_err());
    }

    #[test]
    fn test_scalar_column_selector() {
        let selector = Selector::<String>::column::<String>("title").unwrap();
        let row = Row::new().with("title", "Dune");
        assert_eq!(selector.project(&row).unwrap(), "Dune");
        assert!(selector.covers(&["title"]));
        assert!(!selector.covers(&["title", "id"]));
    }

    #[test]
    fn test_mapper_errors_are_tagged_as_projection() {
        let selector = Selector::<i64>::column::<i64>("pages").unwrap();
        let err = selector.project(&Row::new().with("pages", "lots")).unwrap_err();
        assert_eq!(err.operation, RepositoryOperation::Project);
        assert_eq!(err.kind, RepositoryErrorKind::SerializationError);
    }
}
