//! Repository error types
//!
//! Every repository operation reports failures as a [`RepositoryError`] that
//! records which operation failed, the category of failure, and (when known)
//! the entity involved. A lookup that finds nothing is not an error: it is
//! reported as `Ok(None)`.
//!
//! # Example
//!
//! ```rust
//! use entity_repository::repository::{RepositoryError, RepositoryErrorKind};
//!
//! let error = RepositoryError::stale("Book", 42);
//! assert_eq!(error.kind, RepositoryErrorKind::Stale);
//! assert_eq!(error.entity_id.as_deref(), Some("42"));
//! ```

use std::fmt;

/// Operation being performed when the repository error occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepositoryOperation {
    /// Primary-key lookup
    FindById,
    /// Reading the full collection
    FindAll,
    /// Projected query (with or without filter and pagination)
    Project,
    /// Projected query driven by an optional search predicate
    Search,
    /// Counting rows
    Count,
    /// Inserting a new entity
    Create,
    /// Replacing the persisted state of an entity
    Update,
    /// Removing an entity
    Delete,
}

impl fmt::Display for RepositoryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FindById => write!(f, "find_by_id"),
            Self::FindAll => write!(f, "find_all"),
            Self::Project => write!(f, "project"),
            Self::Search => write!(f, "search"),
            Self::Count => write!(f, "count"),
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// Category of repository error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepositoryErrorKind {
    /// Entity was not found where one was required
    NotFound,
    /// Database constraint violation (unique, foreign key, not null)
    ConstraintViolation,
    /// Arguments rejected before reaching the store
    ValidationFailed,
    /// Failed to connect to the store
    ConnectionFailed,
    /// Operation timed out
    Timeout,
    /// Underlying database error
    DatabaseError,
    /// A row could not be converted to or from the requested shape
    SerializationError,
    /// The composed query could not be built or executed
    InvalidQuery,
    /// Update or delete targeted a row that is no longer persisted
    Stale,
    /// Other unclassified error
    Other,
}

impl fmt::Display for RepositoryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not_found"),
            Self::ConstraintViolation => write!(f, "constraint_violation"),
            Self::ValidationFailed => write!(f, "validation_failed"),
            Self::ConnectionFailed => write!(f, "connection_failed"),
            Self::Timeout => write!(f, "timeout"),
            Self::DatabaseError => write!(f, "database_error"),
            Self::SerializationError => write!(f, "serialization_error"),
            Self::InvalidQuery => write!(f, "invalid_query"),
            Self::Stale => write!(f, "stale"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Structured repository error with operation context
///
/// # Example
///
/// ```rust
/// use entity_repository::repository::{RepositoryError, RepositoryOperation};
///
/// let error = RepositoryError::constraint_violation(
///     RepositoryOperation::Create,
///     "duplicate value for books.isbn",
/// )
/// .with_entity("Book", "0");
///
/// assert!(error.to_string().contains("[Book: 0]"));
/// assert!(!error.is_retriable());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryError {
    /// The operation being performed when the error occurred
    pub operation: RepositoryOperation,
    /// The category of error
    pub kind: RepositoryErrorKind,
    /// Human-readable error message
    pub message: String,
    /// The type of entity involved (e.g., "Book")
    pub entity_type: Option<String>,
    /// The ID of the entity involved
    pub entity_id: Option<String>,
}

impl RepositoryError {
    /// Create a new repository error
    pub fn new(
        operation: RepositoryOperation,
        kind: RepositoryErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            operation,
            kind,
            message: message.into(),
            entity_type: None,
            entity_id: None,
        }
    }

    /// Create a "not found" error with entity context
    pub fn not_found(entity_type: impl Into<String>, entity_id: impl ToString) -> Self {
        Self::new(
            RepositoryOperation::FindById,
            RepositoryErrorKind::NotFound,
            "Entity not found",
        )
        .with_entity(entity_type, entity_id.to_string())
    }

    /// Create a validation failed error
    ///
    /// # Example
    ///
    /// ```rust
    /// use entity_repository::repository::{RepositoryError, RepositoryErrorKind};
    ///
    /// let error = RepositoryError::validation_failed("page number must be at least 1");
    /// assert_eq!(error.kind, RepositoryErrorKind::ValidationFailed);
    /// ```
    pub fn validation_failed(message: impl Into<String>) -> Self {
        Self::new(
            RepositoryOperation::Project,
            RepositoryErrorKind::ValidationFailed,
            message,
        )
    }

    /// Create a constraint violation error
    pub fn constraint_violation(
        operation: RepositoryOperation,
        message: impl Into<String>,
    ) -> Self {
        Self::new(operation, RepositoryErrorKind::ConstraintViolation, message)
    }

    /// Create a connection failed error
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::new(
            RepositoryOperation::FindById,
            RepositoryErrorKind::ConnectionFailed,
            message,
        )
    }

    /// Create a timeout error
    pub fn timeout(operation: RepositoryOperation, message: impl Into<String>) -> Self {
        Self::new(operation, RepositoryErrorKind::Timeout, message)
    }

    /// Create a database error
    pub fn database_error(operation: RepositoryOperation, message: impl Into<String>) -> Self {
        Self::new(operation, RepositoryErrorKind::DatabaseError, message)
    }

    /// Create a serialization error
    pub fn serialization_error(operation: RepositoryOperation, message: impl Into<String>) -> Self {
        Self::new(operation, RepositoryErrorKind::SerializationError, message)
    }

    /// Create an error for a query that could not be composed or executed
    pub fn invalid_query(operation: RepositoryOperation, message: impl Into<String>) -> Self {
        Self::new(operation, RepositoryErrorKind::InvalidQuery, message)
    }

    /// Create an error for an update/delete whose row no longer exists
    pub fn stale(entity_type: impl Into<String>, entity_id: impl ToString) -> Self {
        Self::new(
            RepositoryOperation::Update,
            RepositoryErrorKind::Stale,
            "No persisted row matches the entity key",
        )
        .with_entity(entity_type, entity_id.to_string())
    }

    /// Add entity context to an existing error
    #[must_use]
    pub fn with_entity(
        mut self,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    /// Add only the entity type, leaving the ID untouched
    #[must_use]
    pub fn with_entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    /// Set the operation that caused the error
    #[must_use]
    pub fn with_operation(mut self, operation: RepositoryOperation) -> Self {
        self.operation = operation;
        self
    }

    /// Check if this error is retriable (transient errors that may succeed on retry)
    ///
    /// The repository never retries on its own; this is a hint for callers.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self.kind,
            RepositoryErrorKind::ConnectionFailed | RepositoryErrorKind::Timeout
        )
    }
}

impl fmt::Display for RepositoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Repository {} error during {}: {}",
            self.kind, self.operation, self.message
        )?;
        match (&self.entity_type, &self.entity_id) {
            (Some(entity_type), Some(entity_id)) => write!(f, " [{}: {}]", entity_type, entity_id)?,
            (Some(entity_type), None) => write!(f, " [{}]", entity_type)?,
            _ => {}
        }
        Ok(())
    }
}

impl std::error::Error for RepositoryError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_operation_display() {
        assert_eq!(format!("{}", RepositoryOperation::FindById), "find_by_id");
        assert_eq!(format!("{}", RepositoryOperation::FindAll), "find_all");
        assert_eq!(format!("{}", RepositoryOperation::Project), "project");
        assert_eq!(format!("{}", RepositoryOperation::Search), "search");
        assert_eq!(format!("{}", RepositoryOperation::Count), "count");
        assert_eq!(format!("{}", RepositoryOperation::Create), "create");
        assert_eq!(format!("{}", RepositoryOperation::Update), "update");
        assert_eq!(format!("{}", RepositoryOperation::Delete), "delete");
    }

    #[test]
    fn test_repository_error_kind_display() {
        assert_eq!(format!("{}", RepositoryErrorKind::NotFound), "not_found");
        assert_eq!(
            format!("{}", RepositoryErrorKind::ConstraintViolation),
            "constraint_violation"
        );
        assert_eq!(
            format!("{}", RepositoryErrorKind::InvalidQuery),
            "invalid_query"
        );
        assert_eq!(format!("{}", RepositoryErrorKind::Stale), "stale");
        assert_eq!(format!("{}", RepositoryErrorKind::Other), "other");
    }

    #[test]
    fn test_not_found_convenience() {
        let error = RepositoryError::not_found("Book", 7);
        assert_eq!(error.operation, RepositoryOperation::FindById);
        assert_eq!(error.kind, RepositoryErrorKind::NotFound);
        assert_eq!(error.entity_type, Some("Book".to_string()));
        assert_eq!(error.entity_id, Some("7".to_string()));
    }

    #[test]
    fn test_stale_convenience() {
        let error = RepositoryError::stale("Book", 99).with_operation(RepositoryOperation::Delete);
        assert_eq!(error.operation, RepositoryOperation::Delete);
        assert_eq!(error.kind, RepositoryErrorKind::Stale);
        assert_eq!(error.entity_id, Some("99".to_string()));
    }

    #[test]
    fn test_invalid_query_convenience() {
        let error = RepositoryError::invalid_query(RepositoryOperation::Project, "unknown column");
        assert_eq!(error.kind, RepositoryErrorKind::InvalidQuery);
        assert_eq!(error.operation, RepositoryOperation::Project);
    }

    #[test]
    fn test_is_retriable_transient_errors() {
        assert!(RepositoryError::connection_failed("refused").is_retriable());
        assert!(RepositoryError::timeout(RepositoryOperation::FindAll, "timeout").is_retriable());
    }

    #[test]
    fn test_is_retriable_permanent_errors() {
        assert!(!RepositoryError::not_found("Book", 1).is_retriable());
        assert!(!RepositoryError::stale("Book", 1).is_retriable());
        assert!(!RepositoryError::validation_failed("invalid").is_retriable());
        assert!(
            !RepositoryError::constraint_violation(RepositoryOperation::Create, "fk")
                .is_retriable()
        );
        assert!(
            !RepositoryError::invalid_query(RepositoryOperation::Search, "bad").is_retriable()
        );
    }

    #[test]
    fn test_display_without_entity() {
        let error = RepositoryError::database_error(RepositoryOperation::Create, "Query failed");
        let display = format!("{}", error);
        assert!(display.contains("database_error"));
        assert!(display.contains("create"));
        assert!(display.contains("Query failed"));
        assert!(!display.contains('['));
    }

    #[test]
    fn test_display_with_entity_type_only() {
        let error = RepositoryError::invalid_query(RepositoryOperation::Project, "bad column")
            .with_entity_type("Book");
        assert!(format!("{}", error).ends_with("[Book]"));
    }

    #[test]
    fn test_display_with_entity() {
        let error = RepositoryError::not_found("Book", 123);
        let display = format!("{}", error);
        assert!(display.contains("not_found"));
        assert!(display.contains("find_by_id"));
        assert!(display.contains("[Book: 123]"));
    }

    #[test]
    fn test_error_is_error_trait() {
        let error: Box<dyn std::error::Error> = Box::new(RepositoryError::not_found("Book", 1));
        assert!(error.to_string().contains("not_found"));
    }
}
