//! Generic repository over persisted entities
//!
//! # Features
//!
//! - **Entities as rows**: [`Entity`] maps a type to a table and a [`Row`]
//! - **Composable reads**: [`Query`] stages tracking, filters, search and
//!   ordering, then a [`Selector`] projection, then a [`Page`] window, and
//!   runs the whole chain as one store round trip
//! - **Filtering**: [`Filter`] trees of [`FilterCondition`]s with SQL
//!   three-valued logic, plus [`Filter::search`] for free-text matching
//! - **Immediate mutations**: add, update and delete stage one change and
//!   flush it at once
//!
//! # Example
//!
//! ```rust,ignore
//! use entity_repository::repository::{
//!     FilterCondition, GenericRepository, Page, Repository, Selector, Tracking,
//! };
//! use entity_repository::store::MemoryStore;
//!
//! let books = GenericRepository::<Book, _>::new(MemoryStore::new());
//!
//! let mut dune = Book::new("Dune", 1);
//! books.add(&mut dune).await?;
//!
//! let titles = books
//!     .get_selected_columns_filtered_with_pagination(
//!         Selector::column::<String>("title")?,
//!         FilterCondition::eq("author_id", 1_i64).into(),
//!         Tracking::Detached,
//!         Page::new(1, 20)?,
//!     )
//!     .await?;
//! ```

mod entity;
mod error;
mod filter;
mod generic;
mod pagination;
mod query;
mod selector;
mod traits;

pub use entity::{Entity, EntityDescriptor, FromValue, Row, Value};
pub use error::{RepositoryError, RepositoryErrorKind, RepositoryOperation};
pub use filter::{escape_like, like_match, Filter, FilterCondition, FilterOperator, FilterValue};
pub use generic::GenericRepository;
pub use pagination::{OrderDirection, Page};
pub use query::{Paged, Projected, Query, QueryPlan, Tracking};
pub use selector::Selector;
pub use traits::{Repository, RepositoryResult};
