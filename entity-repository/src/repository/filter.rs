//! Filter predicates for repository queries
//!
//! Filters are data, not closures: a [`Filter`] is a tree of
//! [`FilterCondition`]s joined with AND/OR/NOT that a store translates into
//! its own query language (a SQL `WHERE` clause for [`PgStore`], direct
//! evaluation for [`MemoryStore`]). Because they are data, a filter and a
//! search filter compose into one query and one store round trip.
//!
//! Evaluation follows SQL three-valued logic: a comparison against `NULL` is
//! unknown, and only rows whose predicate is definitely true are kept.
//!
//! # Example
//!
//! ```rust
//! use entity_repository::repository::{Filter, FilterCondition};
//!
//! // Required structural predicate: books of one author
//! let by_author = Filter::from(FilterCondition::eq("author_id", 7_i64));
//!
//! // Optional free-text predicate; a blank term means "no restriction"
//! let search = Filter::search(["title", "summary"], "dragon");
//! assert!(search.is_some());
//! assert!(Filter::search(["title"], "   ").is_none());
//!
//! let combined = by_author.and(search.unwrap_or_default());
//! assert_eq!(combined.columns(), vec!["author_id", "title", "summary"]);
//! ```
//!
//! [`PgStore`]: crate::store::PgStore
//! [`MemoryStore`]: crate::store::MemoryStore

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};

use super::entity::{Row, Value};
use super::error::{RepositoryError, RepositoryOperation};
use super::RepositoryResult;

/// Comparison operators for filter conditions
///
/// ```rust
/// use entity_repository::repository::FilterOperator;
///
/// assert_eq!(format!("{}", FilterOperator::Equal), "=");
/// assert_eq!(format!("{}", FilterOperator::ILike), "ILIKE");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOperator {
    /// Equal to (=)
    Equal,
    /// Not equal to (!=)
    NotEqual,
    /// Greater than (>)
    GreaterThan,
    /// Greater than or equal to (>=)
    GreaterThanOrEqual,
    /// Less than (<)
    LessThan,
    /// Less than or equal to (<=)
    LessThanOrEqual,
    /// Case-sensitive pattern matching (LIKE)
    Like,
    /// Case-insensitive pattern matching (ILIKE)
    ILike,
    /// Value is in a list (IN)
    In,
    /// Value is null (IS NULL)
    IsNull,
    /// Value is not null (IS NOT NULL)
    IsNotNull,
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equal => write!(f, "="),
            Self::NotEqual => write!(f, "!="),
            Self::GreaterThan => write!(f, ">"),
            Self::GreaterThanOrEqual => write!(f, ">="),
            Self::LessThan => write!(f, "<"),
            Self::LessThanOrEqual => write!(f, "<="),
            Self::Like => write!(f, "LIKE"),
            Self::ILike => write!(f, "ILIKE"),
            Self::In => write!(f, "IN"),
            Self::IsNull => write!(f, "IS NULL"),
            Self::IsNotNull => write!(f, "IS NOT NULL"),
        }
    }
}

/// A value that can be used in filter conditions
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    /// String value
    String(String),
    /// 64-bit integer value
    Integer(i64),
    /// 64-bit floating point value
    Float(f64),
    /// Boolean value
    Boolean(bool),
    /// UTC timestamp
    Timestamp(DateTime<Utc>),
    /// List of string values (for IN operator)
    StringList(Vec<String>),
    /// List of integer values (for IN operator)
    IntegerList(Vec<i64>),
    /// Null value (for IS NULL / IS NOT NULL)
    Null,
}

impl From<&str> for FilterValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for FilterValue {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<i32> for FilterValue {
    fn from(n: i32) -> Self {
        Self::Integer(i64::from(n))
    }
}

impl From<f64> for FilterValue {
    fn from(n: f64) -> Self {
        Self::Float(n)
    }
}

impl From<bool> for FilterValue {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<DateTime<Utc>> for FilterValue {
    fn from(ts: DateTime<Utc>) -> Self {
        Self::Timestamp(ts)
    }
}

impl From<Vec<String>> for FilterValue {
    fn from(list: Vec<String>) -> Self {
        Self::StringList(list)
    }
}

impl From<Vec<i64>> for FilterValue {
    fn from(list: Vec<i64>) -> Self {
        Self::IntegerList(list)
    }
}

/// A single filter condition: `field operator value`
#[derive(Debug, Clone, PartialEq)]
pub struct FilterCondition {
    /// The field name to filter on
    pub field: String,
    /// The comparison operator
    pub operator: FilterOperator,
    /// The value to compare against
    pub value: FilterValue,
}

impl FilterCondition {
    pub fn new(field: impl Into<String>, operator: FilterOperator, value: FilterValue) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }

    /// Create an equality filter (field = value)
    pub fn eq(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(field, FilterOperator::Equal, value.into())
    }

    /// Create a not-equal filter (field != value)
    pub fn ne(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(field, FilterOperator::NotEqual, value.into())
    }

    /// Create a greater-than filter (field > value)
    pub fn gt(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(field, FilterOperator::GreaterThan, value.into())
    }

    /// Create a greater-than-or-equal filter (field >= value)
    pub fn gte(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(field, FilterOperator::GreaterThanOrEqual, value.into())
    }

    /// Create a less-than filter (field < value)
    pub fn lt(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(field, FilterOperator::LessThan, value.into())
    }

    /// Create a less-than-or-equal filter (field <= value)
    pub fn lte(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(field, FilterOperator::LessThanOrEqual, value.into())
    }

    /// Create a LIKE pattern filter (`%` any run, `_` any char, `\` escapes)
    pub fn like(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::new(field, FilterOperator::Like, FilterValue::String(pattern.into()))
    }

    /// Create a case-insensitive ILIKE pattern filter
    pub fn ilike(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::new(field, FilterOperator::ILike, FilterValue::String(pattern.into()))
    }

    /// Create an IN list filter for strings
    pub fn in_strings(field: impl Into<String>, values: Vec<String>) -> Self {
        Self::new(field, FilterOperator::In, FilterValue::StringList(values))
    }

    /// Create an IN list filter for integers
    pub fn in_integers(field: impl Into<String>, values: Vec<i64>) -> Self {
        Self::new(field, FilterOperator::In, FilterValue::IntegerList(values))
    }

    /// Create an IS NULL filter
    pub fn is_null(field: impl Into<String>) -> Self {
        Self::new(field, FilterOperator::IsNull, FilterValue::Null)
    }

    /// Create an IS NOT NULL filter
    pub fn is_not_null(field: impl Into<String>) -> Self {
        Self::new(field, FilterOperator::IsNotNull, FilterValue::Null)
    }

    /// Evaluate against a row. `None` is SQL "unknown".
    fn evaluate(&self, row: &Row) -> RepositoryResult<Option<bool>> {
        let value = row.value(&self.field).ok_or_else(|| {
            RepositoryError::invalid_query(
                RepositoryOperation::Project,
                format!("filter references unknown column `{}`", self.field),
            )
        })?;

        match (self.operator, &self.value) {
            (FilterOperator::IsNull, _) | (FilterOperator::Equal, FilterValue::Null) => {
                Ok(Some(value.is_null()))
            }
            (FilterOperator::IsNotNull, _) | (FilterOperator::NotEqual, FilterValue::Null) => {
                Ok(Some(!value.is_null()))
            }
            _ if value.is_null() => Ok(None),
            (FilterOperator::Like | FilterOperator::ILike, operand) => {
                let (Value::Text(text), FilterValue::String(pattern)) = (value, operand) else {
                    return Err(self.mismatch(value));
                };
                Ok(Some(like_match(
                    pattern,
                    text,
                    self.operator == FilterOperator::ILike,
                )))
            }
            (FilterOperator::In, operand) => match (value, operand) {
                (Value::Text(text), FilterValue::StringList(list)) => {
                    Ok(Some(list.iter().any(|candidate| candidate == text)))
                }
                (Value::Int(n), FilterValue::IntegerList(list)) => Ok(Some(list.contains(n))),
                _ => Err(self.mismatch(value)),
            },
            (FilterOperator::Equal, _) => self.compare_with(value, Ordering::is_eq),
            (FilterOperator::NotEqual, _) => self.compare_with(value, Ordering::is_ne),
            (FilterOperator::GreaterThan, _) => self.compare_with(value, Ordering::is_gt),
            (FilterOperator::GreaterThanOrEqual, _) => self.compare_with(value, Ordering::is_ge),
            (FilterOperator::LessThan, _) => self.compare_with(value, Ordering::is_lt),
            (FilterOperator::LessThanOrEqual, _) => self.compare_with(value, Ordering::is_le),
        }
    }

    /// Order `value` against the operand; incomparable floats are unknown
    fn compare_with(
        &self,
        value: &Value,
        holds: fn(Ordering) -> bool,
    ) -> RepositoryResult<Option<bool>> {
        let ordering = compare(value, &self.value).ok_or_else(|| self.mismatch(value))?;
        Ok(ordering.map(holds))
    }

    fn mismatch(&self, value: &Value) -> RepositoryError {
        RepositoryError::invalid_query(
            RepositoryOperation::Project,
            format!(
                "cannot apply `{}` to column `{}` of type {} with {:?}",
                self.operator,
                self.field,
                value.type_name(),
                self.value
            ),
        )
    }
}

/// Compare a column value with a filter operand.
///
/// Outer `None`: the types are incompatible. Inner `None`: unordered (NaN).
fn compare(value: &Value, operand: &FilterValue) -> Option<Option<Ordering>> {
    match (value, operand) {
        (Value::Int(a), FilterValue::Integer(b)) => Some(Some(a.cmp(b))),
        (Value::Int(a), FilterValue::Float(b)) => Some((*a as f64).partial_cmp(b)),
        (Value::Float(a), FilterValue::Float(b)) => Some(a.partial_cmp(b)),
        (Value::Float(a), FilterValue::Integer(b)) => Some(a.partial_cmp(&(*b as f64))),
        (Value::Text(a), FilterValue::String(b)) => Some(Some(a.as_str().cmp(b.as_str()))),
        (Value::Bool(a), FilterValue::Boolean(b)) => Some(Some(a.cmp(b))),
        (Value::Timestamp(a), FilterValue::Timestamp(b)) => Some(Some(a.cmp(b))),
        _ => None,
    }
}

/// SQL LIKE matching with `%`, `_` and backslash escapes
pub fn like_match(pattern: &str, text: &str, case_insensitive: bool) -> bool {
    enum Token {
        Any,
        One,
        Literal(char),
    }

    let fold = |c: char| -> char {
        if case_insensitive {
            c.to_lowercase().next().unwrap_or(c)
        } else {
            c
        }
    };

    let mut tokens = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        tokens.push(match c {
            '%' => Token::Any,
            '_' => Token::One,
            '\\' => Token::Literal(fold(chars.next().unwrap_or('\\'))),
            other => Token::Literal(fold(other)),
        });
    }
    let text: Vec<char> = text.chars().map(fold).collect();

    // matched[j]: tokens consumed so far match text[..j]
    let mut matched = vec![false; text.len() + 1];
    matched[0] = true;
    for token in &tokens {
        let mut next = vec![false; text.len() + 1];
        match token {
            Token::Any => {
                let mut reachable = false;
                for j in 0..=text.len() {
                    reachable |= matched[j];
                    next[j] = reachable;
                }
            }
            Token::One => {
                for j in 1..=text.len() {
                    next[j] = matched[j - 1];
                }
            }
            Token::Literal(expected) => {
                for j in 1..=text.len() {
                    next[j] = matched[j - 1] && text[j - 1] == *expected;
                }
            }
        }
        matched = next;
    }
    matched[text.len()]
}

/// Escape `%`, `_` and `\` so a user term matches literally inside a pattern
pub fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// A composable boolean predicate over an entity's columns
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Filter {
    /// Matches every row
    #[default]
    All,
    Condition(FilterCondition),
    /// Every child must match (empty: true)
    And(Vec<Filter>),
    /// At least one child must match (empty: false)
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl From<FilterCondition> for Filter {
    fn from(condition: FilterCondition) -> Self {
        Self::Condition(condition)
    }
}

impl Filter {
    /// A filter that restricts nothing
    pub fn all() -> Self {
        Self::All
    }

    /// Conjunction, flattening nested ANDs and dropping `All`
    #[must_use]
    pub fn and(self, other: impl Into<Filter>) -> Self {
        match (self, other.into()) {
            (Self::All, other) => other,
            (this, Self::All) => this,
            (Self::And(mut left), Self::And(right)) => {
                left.extend(right);
                Self::And(left)
            }
            (Self::And(mut left), right) => {
                left.push(right);
                Self::And(left)
            }
            (left, Self::And(mut right)) => {
                right.insert(0, left);
                Self::And(right)
            }
            (left, right) => Self::And(vec![left, right]),
        }
    }

    /// Disjunction; `All` on either side absorbs the other
    #[must_use]
    pub fn or(self, other: impl Into<Filter>) -> Self {
        match (self, other.into()) {
            (Self::All, _) | (_, Self::All) => Self::All,
            (Self::Or(mut left), Self::Or(right)) => {
                left.extend(right);
                Self::Or(left)
            }
            (Self::Or(mut left), right) => {
                left.push(right);
                Self::Or(left)
            }
            (left, right) => Self::Or(vec![left, right]),
        }
    }

    #[must_use]
    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    pub fn any_of(filters: impl IntoIterator<Item = Filter>) -> Self {
        Self::Or(filters.into_iter().collect())
    }

    pub fn all_of(filters: impl IntoIterator<Item = Filter>) -> Self {
        filters.into_iter().fold(Self::All, Self::and)
    }

    /// Case-insensitive substring search over several text columns
    ///
    /// Returns `None` for a blank term, which callers treat as "no restriction".
    pub fn search<I, S>(columns: I, term: &str) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let term = term.trim();
        if term.is_empty() {
            return None;
        }
        let pattern = format!("%{}%", escape_like(term));
        Some(Self::any_of(columns.into_iter().map(|column| {
            Self::Condition(FilterCondition::ilike(column, pattern.clone()))
        })))
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }

    /// Columns referenced anywhere in the tree, in first-use order
    pub fn columns(&self) -> Vec<&str> {
        let mut columns = Vec::new();
        self.collect_columns(&mut columns);
        columns
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::All => {}
            Self::Condition(condition) => {
                if !out.contains(&condition.field.as_str()) {
                    out.push(condition.field.as_str());
                }
            }
            Self::And(children) | Self::Or(children) => {
                for child in children {
                    child.collect_columns(out);
                }
            }
            Self::Not(inner) => inner.collect_columns(out),
        }
    }

    /// Whether a row satisfies the predicate (unknown counts as no)
    pub fn matches(&self, row: &Row) -> RepositoryResult<bool> {
        Ok(self.evaluate(row)? == Some(true))
    }

    fn evaluate(&self, row: &Row) -> RepositoryResult<Option<bool>> {
        match self {
            Self::All => Ok(Some(true)),
            Self::Condition(condition) => condition.evaluate(row),
            Self::And(children) => {
                let mut result = Some(true);
                for child in children {
                    match child.evaluate(row)? {
                        Some(false) => return Ok(Some(false)),
                        None => result = None,
                        Some(true) => {}
                    }
                }
                Ok(result)
            }
            Self::Or(children) => {
                let mut result = Some(false);
                for child in children {
                    match child.evaluate(row)? {
                        Some(true) => return Ok(Some(true)),
                        None => result = None,
                        Some(false) => {}
                    }
                }
                Ok(result)
            }
            Self::Not(inner) => Ok(inner.evaluate(row)?.map(|b| !b)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::RepositoryErrorKind;

    fn book() -> Row {
        Row::new()
            .with("id", 1_i64)
            .with("title", "The Left Hand of Darkness")
            .with("pages", 304_i32)
            .with("rating", 4.5_f64)
            .with("in_print", true)
            .with("subtitle", Option::<String>::None)
    }

    #[test]
    fn test_filter_operator_display() {
        assert_eq!(format!("{}", FilterOperator::NotEqual), "!=");
        assert_eq!(format!("{}", FilterOperator::GreaterThanOrEqual), ">=");
        assert_eq!(format!("{}", FilterOperator::Like), "LIKE");
        assert_eq!(format!("{}", FilterOperator::In), "IN");
        assert_eq!(format!("{}", FilterOperator::IsNotNull), "IS NOT NULL");
    }

    #[test]
    fn test_filter_value_conversions() {
        assert_eq!(FilterValue::from("a"), FilterValue::String("a".to_string()));
        assert_eq!(FilterValue::from(42_i32), FilterValue::Integer(42));
        assert_eq!(
            FilterValue::from(vec![1_i64, 2]),
            FilterValue::IntegerList(vec![1, 2])
        );
    }

    #[test]
    fn test_comparisons() {
        let row = book();
        assert!(Filter::from(FilterCondition::eq("pages", 304_i64)).matches(&row).unwrap());
        assert!(Filter::from(FilterCondition::gt("pages", 300_i64)).matches(&row).unwrap());
        assert!(!Filter::from(FilterCondition::lt("pages", 300_i64)).matches(&row).unwrap());
        assert!(Filter::from(FilterCondition::gte("rating", 4_i64)).matches(&row).unwrap());
        assert!(Filter::from(FilterCondition::eq("in_print", true)).matches(&row).unwrap());
        assert!(Filter::from(FilterCondition::ne("title", "Dune")).matches(&row).unwrap());
    }

    #[test]
    fn test_ordering_operators_at_the_boundary() {
        let row = book();
        let holds = |condition: FilterCondition| Filter::from(condition).matches(&row).unwrap();
        assert!(holds(FilterCondition::eq("pages", 304_i64)));
        assert!(!holds(FilterCondition::ne("pages", 304_i64)));
        assert!(!holds(FilterCondition::gt("pages", 304_i64)));
        assert!(holds(FilterCondition::gte("pages", 304_i64)));
        assert!(!holds(FilterCondition::lt("pages", 304_i64)));
        assert!(holds(FilterCondition::lte("pages", 304_i64)));

        // NaN is incomparable, so every ordering test is unknown
        let nan = Filter::from(FilterCondition::lte("rating", f64::NAN));
        assert!(!nan.matches(&row).unwrap());
        assert!(!nan.negate().matches(&row).unwrap());
    }

    #[test]
    fn test_in_lists() {
        let row = book();
        assert!(Filter::from(FilterCondition::in_integers("id", vec![1, 2]))
            .matches(&row)
            .unwrap());
        assert!(!Filter::from(FilterCondition::in_integers("id", vec![]))
            .matches(&row)
            .unwrap());
    }

    #[test]
    fn test_null_semantics() {
        let row = book();
        assert!(Filter::from(FilterCondition::is_null("subtitle")).matches(&row).unwrap());
        assert!(!Filter::from(FilterCondition::is_not_null("subtitle"))
            .matches(&row)
            .unwrap());
        // comparison against NULL is unknown, and so is its negation
        let cmp = Filter::from(FilterCondition::eq("subtitle", "x"));
        assert!(!cmp.matches(&row).unwrap());
        assert!(!cmp.negate().matches(&row).unwrap());
    }

    #[test]
    fn test_unknown_column_is_invalid_query() {
        let err = Filter::from(FilterCondition::eq("isbn", "123"))
            .matches(&book())
            .unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::InvalidQuery);
    }

    #[test]
    fn test_type_mismatch_is_invalid_query() {
        let err = Filter::from(FilterCondition::eq("pages", "many"))
            .matches(&book())
            .unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::InvalidQuery);
    }

    #[test]
    fn test_like_matching() {
        assert!(like_match("%Dark%", "The Left Hand of Darkness", false));
        assert!(!like_match("%dark%", "The Left Hand of Darkness", false));
        assert!(like_match("%dark%", "The Left Hand of Darkness", true));
        assert!(like_match("D_ne", "Dune", false));
        assert!(!like_match("D_ne", "Duune", false));
        assert!(like_match("100\\%", "100%", false));
        assert!(!like_match("100\\%", "1000", false));
        assert!(like_match("%", "", false));
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert!(like_match(&format!("%{}%", escape_like("50%")), "save 50% now", false));
        assert!(!like_match(&format!("%{}%", escape_like("50%")), "save 500 now", false));
    }

    #[test]
    fn test_search_builder() {
        let search = Filter::search(["title", "subtitle"], " hand ").unwrap();
        assert!(search.matches(&book()).unwrap());
        let miss = Filter::search(["title"], "dragon").unwrap();
        assert!(!miss.matches(&book()).unwrap());
        assert!(Filter::search(["title"], "").is_none());
    }

    #[test]
    fn test_and_or_composition() {
        let a = Filter::from(FilterCondition::eq("id", 1_i64));
        let b = Filter::from(FilterCondition::eq("in_print", false));
        assert!(!a.clone().and(b.clone()).matches(&book()).unwrap());
        assert!(a.clone().or(b.clone()).matches(&book()).unwrap());
        assert_eq!(Filter::all().and(a.clone()), a);
        assert!(Filter::all().or(b).is_all());
        assert!(!Filter::Or(vec![]).matches(&book()).unwrap());
        assert!(Filter::And(vec![]).matches(&book()).unwrap());
    }

    #[test]
    fn test_all_of_flattens() {
        let filter = Filter::all_of([
            FilterCondition::eq("id", 1_i64).into(),
            FilterCondition::eq("pages", 304_i64).into(),
            Filter::all(),
        ]);
        match filter {
            Filter::And(children) => assert_eq!(children.len(), 2),
            other => panic!("expected And, got {:?}", other),
        }
    }
}
