//! # entity-repository
//!
//! Generic data access over persisted entities: CRUD, projection, filtering,
//! pagination and search through one composable query pipeline.
//!
//! ## Features
//!
//! - **One repository for every entity**: [`GenericRepository`](repository::GenericRepository)
//!   implements the whole [`Repository`](repository::Repository) surface once
//! - **Fixed composition order**: tracking, filter, search, projection, then
//!   pagination, enforced by the query builder's types
//! - **One round trip per read**: a composed [`QueryPlan`](repository::QueryPlan)
//!   runs as a single store call (a single SQL statement on PostgreSQL)
//! - **Change tracking**: tracked reads attach entities; mutations stage and
//!   flush atomically through a unit of work
//! - **Stores**: in-memory with constraint emulation, and PostgreSQL via sqlx
//!   (feature `database`)
//!
//! ## Example
//!
//! ```rust,no_run
//! use entity_repository::prelude::*;
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct Book {
//!     id: i64,
//!     title: String,
//! }
//!
//! impl Entity for Book {
//!     const NAME: &'static str = "Book";
//!     const TABLE: &'static str = "books";
//!     const COLUMNS: &'static [&'static str] = &["id", "title"];
//!
//!     fn key(&self) -> i64 {
//!         self.id
//!     }
//!
//!     fn set_key(&mut self, key: i64) {
//!         self.id = key;
//!     }
//!
//!     fn to_row(&self) -> Row {
//!         Row::new().with("id", self.id).with("title", self.title.as_str())
//!     }
//!
//!     fn from_row(row: &Row) -> RepositoryResult<Self> {
//!         Ok(Self {
//!             id: row.get("id")?,
//!             title: row.get("title")?,
//!         })
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::load()?;
//!     init_tracing(&config)?;
//!
//!     let books = GenericRepository::<Book, _>::with_config(
//!         MemoryStore::new(),
//!         config.repository.clone(),
//!     );
//!
//!     let mut book = Book { id: 0, title: "Dune".into() };
//!     books.add(&mut book).await?;
//!
//!     let titles = books
//!         .get_selected_columns_with_pagination_and_search(
//!             Selector::<String>::column::<String>("title")?,
//!             Filter::search(["title"], "dune"),
//!             Page::first(20)?,
//!             Tracking::Detached,
//!         )
//!         .await?;
//!     assert_eq!(titles, vec!["Dune".to_string()]);
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod observability;
pub mod repository;
pub mod store;

#[cfg(feature = "database")]
pub mod database;

/// Commonly used types
pub mod prelude {
    pub use crate::config::{Config, DatabaseConfig, LogFormat, LoggingConfig, RepositoryConfig};
    pub use crate::error::{Error, Result};
    pub use crate::observability::init_tracing;
    pub use crate::repository::{
        Entity, Filter, FilterCondition, FilterOperator, FilterValue, GenericRepository,
        OrderDirection, Page, Query, Repository, RepositoryError, RepositoryErrorKind,
        RepositoryOperation, RepositoryResult, Row, Selector, Tracking, Value,
    };
    pub use crate::store::{MemoryStore, Store};

    #[cfg(feature = "database")]
    pub use crate::error::{DatabaseError, DatabaseErrorKind, DatabaseOperation};

    #[cfg(feature = "database")]
    pub use crate::store::PgStore;
}
