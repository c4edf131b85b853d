//! In-memory store
//!
//! Tables are ordered maps keyed by primary key. Keys are generated from a
//! per-table sequence. Unique and foreign-key constraints can be declared up
//! front so constraint failures behave like a relational engine's: an insert
//! or update that breaks one is rejected, and so is deleting a row that
//! other rows still reference.
//!
//! # Example
//!
//! ```rust
//! use entity_repository::store::MemoryStore;
//!
//! let store = MemoryStore::builder()
//!     .unique("books", "isbn")
//!     .foreign_key("books", "author_id", "authors")
//!     .build();
//! # let _ = store;
//! ```

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::RwLock;

use super::tracker::{ChangeKind, ChangeTracker, PendingChange, SavedChange, UnitOfWork};
use super::{attach_results, Store};
use crate::repository::{
    EntityDescriptor, OrderDirection, QueryPlan, RepositoryError, RepositoryOperation,
    RepositoryResult, Row, Value,
};

#[derive(Debug, Clone, Default)]
struct Table {
    rows: BTreeMap<i64, Row>,
    last_key: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ForeignKey {
    table: &'static str,
    column: &'static str,
    references: &'static str,
}

#[derive(Debug, Clone, Default)]
struct Constraints {
    unique: Vec<(&'static str, &'static str)>,
    foreign_keys: Vec<ForeignKey>,
}

#[derive(Debug, Default)]
struct Inner {
    tables: RwLock<HashMap<&'static str, Table>>,
    constraints: Constraints,
    tracker: ChangeTracker,
}

/// A complete [`Store`] kept in process memory
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

/// Declares constraints before the store is shared
#[derive(Debug, Default)]
pub struct MemoryStoreBuilder {
    constraints: Constraints,
}

impl MemoryStoreBuilder {
    /// No two rows of `table` may share a non-null `column` value
    #[must_use]
    pub fn unique(mut self, table: &'static str, column: &'static str) -> Self {
        self.constraints.unique.push((table, column));
        self
    }

    /// Non-null `table.column` must name an existing key of `references`
    #[must_use]
    pub fn foreign_key(
        mut self,
        table: &'static str,
        column: &'static str,
        references: &'static str,
    ) -> Self {
        self.constraints.foreign_keys.push(ForeignKey {
            table,
            column,
            references,
        });
        self
    }

    pub fn build(self) -> MemoryStore {
        MemoryStore {
            inner: Arc::new(Inner {
                tables: RwLock::default(),
                constraints: self.constraints,
                tracker: ChangeTracker::new(),
            }),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> MemoryStoreBuilder {
        MemoryStoreBuilder::default()
    }

    /// Number of persisted rows in a table
    pub async fn row_count(&self, table: &str) -> usize {
        self.inner
            .tables
            .read()
            .await
            .get(table)
            .map_or(0, |t| t.rows.len())
    }
}

impl Store for MemoryStore {
    async fn fetch(&self, plan: &QueryPlan) -> RepositoryResult<Vec<Row>> {
        plan.validate()?;
        let tables = self.inner.tables.read().await;

        let mut matched: Vec<&Row> = Vec::new();
        if let Some(table) = tables.get(plan.entity.table) {
            for row in table.rows.values() {
                let keep = plan
                    .filter
                    .matches(row)
                    .map_err(|e| e.with_entity_type(plan.entity.name))?;
                if keep {
                    matched.push(row);
                }
            }
        }

        let order = plan.effective_order();
        matched.sort_by(|a, b| compare_rows(a, b, &order));

        let columns = plan.projected_columns();
        let projected = matched
            .into_iter()
            .map(|row| row.project(&columns))
            .collect::<RepositoryResult<Vec<Row>>>()?;

        let rows = match plan.page {
            Some(page) => page.window(projected),
            None => projected,
        };
        attach_results(&self.inner.tracker, plan, &rows);
        Ok(rows)
    }

    async fn count(&self, plan: &QueryPlan) -> RepositoryResult<u64> {
        plan.validate()
            .map_err(|e| e.with_operation(RepositoryOperation::Count))?;
        let tables = self.inner.tables.read().await;
        let Some(table) = tables.get(plan.entity.table) else {
            return Ok(0);
        };
        let mut total = 0_u64;
        for row in table.rows.values() {
            if plan
                .filter
                .matches(row)
                .map_err(|e| e.with_operation(RepositoryOperation::Count))?
            {
                total += 1;
            }
        }
        Ok(total)
    }

    async fn find_by_key(
        &self,
        entity: &EntityDescriptor,
        key: i64,
    ) -> RepositoryResult<Option<Row>> {
        let tables = self.inner.tables.read().await;
        Ok(tables
            .get(entity.table)
            .and_then(|table| table.rows.get(&key))
            .cloned())
    }

    async fn save_changes(&self, unit: UnitOfWork) -> RepositoryResult<Vec<SavedChange>> {
        let mut tables = self.inner.tables.write().await;

        // Changes are applied in place under the write guard; on failure the
        // undo log restores every touched row before the guard is released.
        let mut saved = Vec::with_capacity(unit.pending().len());
        let mut undo = Vec::with_capacity(unit.pending().len());
        for change in unit.pending() {
            match apply(&mut tables, &self.inner.constraints, change) {
                Ok((change, step)) => {
                    saved.push(change);
                    undo.push(step);
                }
                Err(e) => {
                    rollback(&mut tables, undo);
                    return Err(e);
                }
            }
        }

        drop(tables);
        self.inner.tracker.apply_saved(&saved);
        Ok(saved)
    }

    fn tracker(&self) -> &ChangeTracker {
        &self.inner.tracker
    }
}

/// Prior state of one row touched by a batch
#[derive(Debug)]
struct Undo {
    table: &'static str,
    key: i64,
    previous: Option<Row>,
    last_key: i64,
}

fn rollback(tables: &mut HashMap<&'static str, Table>, undo: Vec<Undo>) {
    for step in undo.into_iter().rev() {
        let table = tables.entry(step.table).or_default();
        match step.previous {
            Some(row) => {
                table.rows.insert(step.key, row);
            }
            None => {
                table.rows.remove(&step.key);
            }
        }
        table.last_key = step.last_key;
    }
}

fn apply(
    tables: &mut HashMap<&'static str, Table>,
    constraints: &Constraints,
    change: &PendingChange,
) -> RepositoryResult<(SavedChange, Undo)> {
    let entity = change.entity;
    let mut row = change.row.clone();
    let last_key = tables.get(entity.table).map_or(0, |t| t.last_key);

    match change.kind {
        ChangeKind::Added => {
            let mut key = change.key();
            if key == 0 {
                key = last_key.checked_add(1).ok_or_else(|| {
                    RepositoryError::constraint_violation(
                        RepositoryOperation::Create,
                        format!("key sequence of {} is exhausted", entity.table),
                    )
                    .with_entity_type(entity.name)
                })?;
                row.insert(entity.key, key);
            } else if row_exists(tables, entity.table, key) {
                return Err(RepositoryError::constraint_violation(
                    RepositoryOperation::Create,
                    format!("duplicate key {} in {}", key, entity.table),
                )
                .with_entity(entity.name, key.to_string()));
            }
            check_row(tables, constraints, &entity, key, &row, RepositoryOperation::Create)?;
            let table = tables.entry(entity.table).or_default();
            table.last_key = last_key.max(key);
            table.rows.insert(key, row.clone());
            Ok((
                SavedChange {
                    kind: ChangeKind::Added,
                    entity,
                    key,
                    row,
                },
                Undo {
                    table: entity.table,
                    key,
                    previous: None,
                    last_key,
                },
            ))
        }
        ChangeKind::Modified => {
            let key = change.key();
            if !row_exists(tables, entity.table, key) {
                return Err(RepositoryError::stale(entity.name, key));
            }
            check_row(tables, constraints, &entity, key, &row, RepositoryOperation::Update)?;
            let previous = tables
                .get_mut(entity.table)
                .and_then(|table| table.rows.insert(key, row.clone()));
            Ok((
                SavedChange {
                    kind: ChangeKind::Modified,
                    entity,
                    key,
                    row,
                },
                Undo {
                    table: entity.table,
                    key,
                    previous,
                    last_key,
                },
            ))
        }
        ChangeKind::Removed => {
            let key = change.key();
            if !row_exists(tables, entity.table, key) {
                return Err(
                    RepositoryError::stale(entity.name, key).with_operation(RepositoryOperation::Delete)
                );
            }
            check_dependents(tables, constraints, &entity, key)?;
            let removed = tables
                .get_mut(entity.table)
                .and_then(|table| table.rows.remove(&key));
            Ok((
                SavedChange {
                    kind: ChangeKind::Removed,
                    entity,
                    key,
                    row: removed.clone().unwrap_or(row),
                },
                Undo {
                    table: entity.table,
                    key,
                    previous: removed,
                    last_key,
                },
            ))
        }
    }
}

fn row_exists(tables: &HashMap<&'static str, Table>, table: &str, key: i64) -> bool {
    tables
        .get(table)
        .is_some_and(|t| t.rows.contains_key(&key))
}

/// Unique and foreign-key checks for a row about to be written
fn check_row(
    tables: &HashMap<&'static str, Table>,
    constraints: &Constraints,
    entity: &EntityDescriptor,
    key: i64,
    row: &Row,
    operation: RepositoryOperation,
) -> RepositoryResult<()> {
    for &(table, column) in &constraints.unique {
        if table != entity.table {
            continue;
        }
        let Some(value) = row.value(column).filter(|v| !v.is_null()) else {
            continue;
        };
        let duplicate = tables.get(table).is_some_and(|t| {
            t.rows
                .iter()
                .any(|(other_key, other)| *other_key != key && other.value(column) == Some(value))
        });
        if duplicate {
            return Err(RepositoryError::constraint_violation(
                operation,
                format!("duplicate value {} for unique column {}.{}", value, table, column),
            )
            .with_entity(entity.name, key.to_string()));
        }
    }

    for fk in &constraints.foreign_keys {
        if fk.table != entity.table {
            continue;
        }
        let target = match row.value(fk.column) {
            None | Some(Value::Null) => continue,
            Some(Value::Int(target)) => *target,
            Some(other) => {
                return Err(RepositoryError::constraint_violation(
                    operation,
                    format!(
                        "foreign key {}.{} must be an integer, got {}",
                        fk.table,
                        fk.column,
                        other.type_name()
                    ),
                ))
            }
        };
        if !row_exists(tables, fk.references, target) {
            return Err(RepositoryError::constraint_violation(
                operation,
                format!(
                    "{}.{} = {} references a missing {} row",
                    fk.table, fk.column, target, fk.references
                ),
            )
            .with_entity(entity.name, key.to_string()));
        }
    }
    Ok(())
}

/// Referential integrity for a row about to be removed
fn check_dependents(
    tables: &HashMap<&'static str, Table>,
    constraints: &Constraints,
    entity: &EntityDescriptor,
    key: i64,
) -> RepositoryResult<()> {
    for fk in constraints
        .foreign_keys
        .iter()
        .filter(|fk| fk.references == entity.table)
    {
        let referenced = tables.get(fk.table).is_some_and(|t| {
            t.rows
                .values()
                .any(|row| row.value(fk.column) == Some(&Value::Int(key)))
        });
        if referenced {
            return Err(RepositoryError::constraint_violation(
                RepositoryOperation::Delete,
                format!(
                    "{} row {} is still referenced by {}.{}",
                    entity.table, key, fk.table, fk.column
                ),
            )
            .with_entity(entity.name, key.to_string()));
        }
    }
    Ok(())
}

fn compare_rows(a: &Row, b: &Row, order: &[(&str, OrderDirection)]) -> Ordering {
    for (column, direction) in order {
        let ordering = match (a.value(column), b.value(column)) {
            (Some(x), Some(y)) => compare_values(x, y),
            _ => Ordering::Equal,
        };
        let ordering = match direction {
            OrderDirection::Ascending => ordering,
            OrderDirection::Descending => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Ascending order with NULLs last, as PostgreSQL sorts by default
fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Value::Int(x), Value::Float(y)) => (*x as f64).partial_cmp(y).unwrap_or(Ordering::Equal),
        (Value::Float(x), Value::Int(y)) => x.partial_cmp(&(*y as f64)).unwrap_or(Ordering::Equal),
        (Value::Text(x), Value::Text(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Timestamp(x), Value::Timestamp(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}
