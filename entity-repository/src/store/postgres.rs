//! PostgreSQL store
//!
//! Every composed [`QueryPlan`] renders to a single parameterised statement:
//!
//! ```sql
//! SELECT "id", "title" FROM "books"
//! WHERE ("author_id" = $1 AND ("title" ILIKE $2 OR "summary" ILIKE $3))
//! ORDER BY "title" ASC, "id" ASC
//! LIMIT $4 OFFSET $5
//! ```
//!
//! Identifiers come from entity metadata and are always double-quoted.
//! Values are always bound. A staged batch runs inside one transaction.

use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::postgres::{PgPool, PgRow, Postgres};
use sqlx::{Column, QueryBuilder, Row as _, Transaction, TypeInfo, ValueRef};

use super::tracker::{ChangeKind, ChangeTracker, PendingChange, SavedChange, UnitOfWork};
use super::{attach_results, Store};
use crate::config::DatabaseConfig;
use crate::database::create_pool;
use crate::error::{DatabaseError, DatabaseOperation};
use crate::repository::{
    EntityDescriptor, Filter, FilterCondition, FilterOperator, FilterValue, QueryPlan,
    RepositoryError, RepositoryOperation, RepositoryResult, Row, Value,
};

/// [`Store`] backed by a sqlx PostgreSQL pool
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    tracker: Arc<ChangeTracker>,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            tracker: Arc::new(ChangeTracker::new()),
        }
    }

    /// Create the pool (with retries) and wrap it
    pub async fn connect(config: &DatabaseConfig) -> crate::error::Result<Self> {
        Ok(Self::new(create_pool(config).await?))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl Store for PgStore {
    async fn fetch(&self, plan: &QueryPlan) -> RepositoryResult<Vec<Row>> {
        plan.validate()?;
        let mut query = render_select(plan)?;
        let records = query
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| driver_error(e, DatabaseOperation::Query, &plan.entity))?;

        let rows = records
            .iter()
            .map(decode_row)
            .collect::<RepositoryResult<Vec<Row>>>()?;
        attach_results(&self.tracker, plan, &rows);
        Ok(rows)
    }

    async fn count(&self, plan: &QueryPlan) -> RepositoryResult<u64> {
        plan.validate()
            .map_err(|e| e.with_operation(RepositoryOperation::Count))?;
        let mut query = render_count(plan)?;
        let total: i64 = query
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                driver_error(e, DatabaseOperation::Query, &plan.entity)
                    .with_operation(RepositoryOperation::Count)
            })?;
        Ok(u64::try_from(total).unwrap_or(0))
    }

    async fn find_by_key(
        &self,
        entity: &EntityDescriptor,
        key: i64,
    ) -> RepositoryResult<Option<Row>> {
        let mut query = QueryBuilder::<Postgres>::new("SELECT ");
        push_column_list(&mut query, entity.columns.iter().copied());
        query.push(" FROM ").push(quote(entity.table));
        query.push(" WHERE ").push(quote(entity.key)).push(" = ");
        query.push_bind(key);

        let record = query
            .build()
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                driver_error(e, DatabaseOperation::Query, entity)
                    .with_operation(RepositoryOperation::FindById)
            })?;
        record.as_ref().map(decode_row).transpose()
    }

    async fn save_changes(&self, unit: UnitOfWork) -> RepositoryResult<Vec<SavedChange>> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            RepositoryError::from(DatabaseError::from(e).during(DatabaseOperation::Transaction))
        })?;

        let mut saved = Vec::with_capacity(unit.pending().len());
        for change in unit.pending() {
            // An early return drops `tx`, which rolls the batch back.
            saved.push(apply(&mut tx, change).await?);
        }

        tx.commit().await.map_err(|e| {
            RepositoryError::from(DatabaseError::from(e).during(DatabaseOperation::Transaction))
        })?;
        self.tracker.apply_saved(&saved);
        Ok(saved)
    }

    fn tracker(&self) -> &ChangeTracker {
        &self.tracker
    }
}

async fn apply(
    tx: &mut Transaction<'static, Postgres>,
    change: &PendingChange,
) -> RepositoryResult<SavedChange> {
    let entity = change.entity;
    let key = change.key();
    let mut row = change.row.clone();

    match change.kind {
        ChangeKind::Added => {
            // A zero key is left to the column default (identity / serial).
            let columns: Vec<&str> = if key == 0 {
                entity.value_columns().collect()
            } else {
                entity.columns.to_vec()
            };

            let mut query = QueryBuilder::<Postgres>::new("INSERT INTO ");
            query.push(quote(entity.table));
            if columns.is_empty() {
                query.push(" DEFAULT VALUES");
            } else {
                query.push(" (");
                push_column_list(&mut query, columns.iter().copied());
                query.push(") VALUES (");
                for (i, column) in columns.iter().enumerate() {
                    if i > 0 {
                        query.push(", ");
                    }
                    push_value(&mut query, row.value(column).unwrap_or(&Value::Null));
                }
                query.push(")");
            }
            query
                .push(" RETURNING CAST(")
                .push(quote(entity.key))
                .push(" AS BIGINT)");

            let generated: i64 = query
                .build_query_scalar()
                .fetch_one(&mut **tx)
                .await
                .map_err(|e| {
                    driver_error(e, DatabaseOperation::Insert, &entity)
                        .with_entity(entity.name, key.to_string())
                })?;
            row.insert(entity.key, generated);
            Ok(SavedChange {
                kind: ChangeKind::Added,
                entity,
                key: generated,
                row,
            })
        }
        ChangeKind::Modified => {
            let mut query = QueryBuilder::<Postgres>::new("UPDATE ");
            query.push(quote(entity.table)).push(" SET ");
            let mut assigned = false;
            for column in entity.value_columns() {
                if assigned {
                    query.push(", ");
                }
                query.push(quote(column)).push(" = ");
                push_value(&mut query, row.value(column).unwrap_or(&Value::Null));
                assigned = true;
            }
            if !assigned {
                query.push(quote(entity.key)).push(" = ").push(quote(entity.key));
            }
            query.push(" WHERE ").push(quote(entity.key)).push(" = ");
            query.push_bind(key);

            let result = query.build().execute(&mut **tx).await.map_err(|e| {
                driver_error(e, DatabaseOperation::Update, &entity)
                    .with_entity(entity.name, key.to_string())
            })?;
            if result.rows_affected() == 0 {
                return Err(RepositoryError::stale(entity.name, key));
            }
            Ok(SavedChange {
                kind: ChangeKind::Modified,
                entity,
                key,
                row,
            })
        }
        ChangeKind::Removed => {
            let mut query = QueryBuilder::<Postgres>::new("DELETE FROM ");
            query.push(quote(entity.table));
            query.push(" WHERE ").push(quote(entity.key)).push(" = ");
            query.push_bind(key);

            let result = query.build().execute(&mut **tx).await.map_err(|e| {
                driver_error(e, DatabaseOperation::Delete, &entity)
                    .with_entity(entity.name, key.to_string())
            })?;
            if result.rows_affected() == 0 {
                return Err(RepositoryError::stale(entity.name, key)
                    .with_operation(RepositoryOperation::Delete));
            }
            Ok(SavedChange {
                kind: ChangeKind::Removed,
                entity,
                key,
                row,
            })
        }
    }
}

fn driver_error(
    err: sqlx::Error,
    operation: DatabaseOperation,
    entity: &EntityDescriptor,
) -> RepositoryError {
    RepositoryError::from(
        DatabaseError::from(err)
            .during(operation)
            .add_context(entity.table),
    )
    .with_entity_type(entity.name)
}

/// Double-quote an identifier, escaping embedded quotes
fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

fn push_column_list<'a>(
    query: &mut QueryBuilder<'static, Postgres>,
    columns: impl IntoIterator<Item = &'a str>,
) {
    let mut separated = query.separated(", ");
    for column in columns {
        separated.push(quote(column));
    }
}

fn push_value(query: &mut QueryBuilder<'static, Postgres>, value: &Value) {
    match value {
        // Untyped NULL lets the server infer the column type.
        Value::Null => {
            query.push("NULL");
        }
        Value::Bool(b) => {
            query.push_bind(*b);
        }
        Value::Int(n) => {
            query.push_bind(*n);
        }
        Value::Float(x) => {
            query.push_bind(*x);
        }
        Value::Text(s) => {
            query.push_bind(s.clone());
        }
        Value::Timestamp(ts) => {
            query.push_bind(*ts);
        }
    }
}

/// Render the full read: filter, ordering, projection and page window
pub fn render_select(plan: &QueryPlan) -> RepositoryResult<QueryBuilder<'static, Postgres>> {
    let mut query = QueryBuilder::<Postgres>::new("SELECT ");
    push_column_list(&mut query, plan.projected_columns());
    query.push(" FROM ").push(quote(plan.entity.table));
    push_where(&mut query, &plan.filter)?;

    query.push(" ORDER BY ");
    for (i, (column, direction)) in plan.effective_order().into_iter().enumerate() {
        if i > 0 {
            query.push(", ");
        }
        query
            .push(quote(column))
            .push(" ")
            .push(direction.as_sql());
    }

    if let Some(page) = &plan.page {
        query.push(" LIMIT ");
        query.push_bind(to_sql_int(page.limit()));
        query.push(" OFFSET ");
        query.push_bind(to_sql_int(page.offset()));
    }
    Ok(query)
}

/// Render `SELECT COUNT(*)` over the plan's filter
pub fn render_count(plan: &QueryPlan) -> RepositoryResult<QueryBuilder<'static, Postgres>> {
    let mut query = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM ");
    query.push(quote(plan.entity.table));
    push_where(&mut query, &plan.filter)?;
    Ok(query)
}

fn to_sql_int(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn push_where(query: &mut QueryBuilder<'static, Postgres>, filter: &Filter) -> RepositoryResult<()> {
    if filter.is_all() {
        return Ok(());
    }
    query.push(" WHERE ");
    push_filter(query, filter)
}

fn push_filter(query: &mut QueryBuilder<'static, Postgres>, filter: &Filter) -> RepositoryResult<()> {
    match filter {
        Filter::All => {
            query.push("TRUE");
        }
        Filter::Condition(condition) => push_condition(query, condition)?,
        Filter::And(children) | Filter::Or(children) if children.is_empty() => {
            query.push(if matches!(filter, Filter::And(_)) { "TRUE" } else { "FALSE" });
        }
        Filter::And(children) | Filter::Or(children) => {
            let joiner = if matches!(filter, Filter::And(_)) { " AND " } else { " OR " };
            query.push("(");
            for (i, child) in children.iter().enumerate() {
                if i > 0 {
                    query.push(joiner);
                }
                push_filter(query, child)?;
            }
            query.push(")");
        }
        Filter::Not(inner) => {
            query.push("NOT (");
            push_filter(query, inner)?;
            query.push(")");
        }
    }
    Ok(())
}

fn push_condition(
    query: &mut QueryBuilder<'static, Postgres>,
    condition: &FilterCondition,
) -> RepositoryResult<()> {
    let column = quote(&condition.field);
    match (condition.operator, &condition.value) {
        (FilterOperator::IsNull, _) | (FilterOperator::Equal, FilterValue::Null) => {
            query.push(column).push(" IS NULL");
        }
        (FilterOperator::IsNotNull, _) | (FilterOperator::NotEqual, FilterValue::Null) => {
            query.push(column).push(" IS NOT NULL");
        }
        (FilterOperator::Like | FilterOperator::ILike, FilterValue::String(pattern)) => {
            query.push(column).push(" ").push(condition.operator.to_string()).push(" ");
            query.push_bind(pattern.clone());
        }
        (FilterOperator::In, FilterValue::StringList(list)) => {
            query.push(column).push(" = ANY(");
            query.push_bind(list.clone());
            query.push(")");
        }
        (FilterOperator::In, FilterValue::IntegerList(list)) => {
            query.push(column).push(" = ANY(");
            query.push_bind(list.clone());
            query.push(")");
        }
        (operator, value) => {
            let symbol = match operator {
                FilterOperator::Equal => "=",
                FilterOperator::NotEqual => "<>",
                FilterOperator::GreaterThan => ">",
                FilterOperator::GreaterThanOrEqual => ">=",
                FilterOperator::LessThan => "<",
                FilterOperator::LessThanOrEqual => "<=",
                _ => return Err(unsupported(condition)),
            };
            query.push(column).push(" ").push(symbol).push(" ");
            match value {
                FilterValue::String(s) => {
                    query.push_bind(s.clone());
                }
                FilterValue::Integer(n) => {
                    query.push_bind(*n);
                }
                FilterValue::Float(x) => {
                    query.push_bind(*x);
                }
                FilterValue::Boolean(b) => {
                    query.push_bind(*b);
                }
                FilterValue::Timestamp(ts) => {
                    query.push_bind(*ts);
                }
                _ => return Err(unsupported(condition)),
            }
        }
    }
    Ok(())
}

fn unsupported(condition: &FilterCondition) -> RepositoryError {
    RepositoryError::invalid_query(
        RepositoryOperation::Project,
        format!(
            "cannot apply `{}` to column `{}` with {:?}",
            condition.operator, condition.field, condition.value
        ),
    )
}

/// Convert a driver row into a [`Row`] by column type
fn decode_row(record: &PgRow) -> RepositoryResult<Row> {
    let mut row = Row::new();
    for (index, column) in record.columns().iter().enumerate() {
        let raw = record.try_get_raw(index).map_err(decode_error)?;
        if raw.is_null() {
            row.insert(column.name(), Value::Null);
            continue;
        }

        let value = match column.type_info().name() {
            "INT2" => Value::Int(i64::from(record.try_get::<i16, _>(index).map_err(decode_error)?)),
            "INT4" => Value::Int(i64::from(record.try_get::<i32, _>(index).map_err(decode_error)?)),
            "INT8" => Value::Int(record.try_get::<i64, _>(index).map_err(decode_error)?),
            "FLOAT4" => Value::Float(f64::from(
                record.try_get::<f32, _>(index).map_err(decode_error)?,
            )),
            "FLOAT8" => Value::Float(record.try_get::<f64, _>(index).map_err(decode_error)?),
            "BOOL" => Value::Bool(record.try_get::<bool, _>(index).map_err(decode_error)?),
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => {
                Value::Text(record.try_get::<String, _>(index).map_err(decode_error)?)
            }
            "TIMESTAMPTZ" => Value::Timestamp(
                record
                    .try_get::<DateTime<Utc>, _>(index)
                    .map_err(decode_error)?,
            ),
            "TIMESTAMP" => Value::Timestamp(
                record
                    .try_get::<NaiveDateTime, _>(index)
                    .map_err(decode_error)?
                    .and_utc(),
            ),
            other => {
                return Err(RepositoryError::serialization_error(
                    RepositoryOperation::FindAll,
                    format!("column `{}` has unsupported type {}", column.name(), other),
                ))
            }
        };
        row.insert(column.name(), value);
    }
    Ok(row)
}

fn decode_error(err: sqlx::Error) -> RepositoryError {
    RepositoryError::from(DatabaseError::from(err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{OrderDirection, Page, Tracking};
    use crate::testing::Book;

    fn plan() -> QueryPlan {
        QueryPlan::for_entity::<Book>(Tracking::Detached)
    }

    #[test]
    fn test_render_plain_select() {
        let query = render_select(&plan()).unwrap();
        assert_eq!(
            query.sql(),
            r#"SELECT "id", "author_id", "title", "pages", "in_print" FROM "books" ORDER BY "id" ASC"#
        );
    }

    #[test]
    fn test_render_composed_select() {
        let mut plan = plan();
        plan.filter = Filter::from(FilterCondition::eq("author_id", 7_i64))
            .and(Filter::search(["title"], "dune").unwrap());
        plan.order_by = vec![("title".into(), OrderDirection::Descending)];
        plan.projection = vec!["id".into(), "title".into()];
        plan.page = Some(Page::new(3, 20).unwrap());

        let query = render_select(&plan).unwrap();
        assert_eq!(
            query.sql(),
            r#"SELECT "id", "title" FROM "books" WHERE ("author_id" = $1 AND ("title" ILIKE $2)) ORDER BY "title" DESC, "id" ASC LIMIT $3 OFFSET $4"#
        );
    }

    #[test]
    fn test_render_null_and_list_conditions() {
        let mut plan = plan();
        plan.filter = Filter::all_of([
            FilterCondition::is_null("title").into(),
            FilterCondition::ne("pages", FilterValue::Null).into(),
            FilterCondition::in_integers("author_id", vec![1, 2]).into(),
            Filter::from(FilterCondition::eq("in_print", true)).negate(),
        ]);

        let query = render_count(&plan).unwrap();
        assert_eq!(
            query.sql(),
            r#"SELECT COUNT(*) FROM "books" WHERE ("title" IS NULL AND "pages" IS NOT NULL AND "author_id" = ANY($1) AND NOT ("in_print" = $2))"#
        );
    }

    #[test]
    fn test_render_empty_disjunction_is_false() {
        let mut plan = plan();
        plan.filter = Filter::any_of(Vec::new());
        let query = render_count(&plan).unwrap();
        assert_eq!(query.sql(), r#"SELECT COUNT(*) FROM "books" WHERE FALSE"#);
    }

    #[test]
    fn test_render_rejects_list_comparison() {
        let mut plan = plan();
        plan.filter = FilterCondition::gt("pages", vec![1_i64, 2]).into();
        assert!(render_select(&plan).is_err());
    }

    #[test]
    fn test_quote_escapes_embedded_quotes() {
        assert_eq!(quote("title"), r#""title""#);
        assert_eq!(quote(r#"we"ird"#), r#""we""ird""#);
    }
}
