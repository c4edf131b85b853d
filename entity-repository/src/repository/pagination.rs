//! Pagination and ordering types for repository queries
//!
//! A [`Page`] is a 1-indexed window over the *final* (filtered and projected)
//! result set: page `n` of size `s` skips `(n - 1) * s` results and takes `s`.
//!
//! # Example
//!
//! ```rust
//! use entity_repository::repository::{OrderDirection, Page};
//!
//! let page = Page::new(3, 20).unwrap();
//! assert_eq!(page.offset(), 40);
//! assert_eq!(page.limit(), 20);
//!
//! assert!(Page::new(0, 20).is_err());
//! assert_eq!(format!("{}", OrderDirection::Descending), "desc");
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::RepositoryError;
use super::RepositoryResult;

/// Direction for ordering results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderDirection {
    /// Sort in ascending order (A-Z, 0-9)
    #[default]
    Ascending,
    /// Sort in descending order (Z-A, 9-0)
    Descending,
}

impl OrderDirection {
    /// SQL keyword for an ORDER BY clause
    #[must_use]
    pub const fn as_sql(&self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }
}

impl fmt::Display for OrderDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ascending => write!(f, "asc"),
            Self::Descending => write!(f, "desc"),
        }
    }
}

/// A validated 1-indexed page window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Page {
    number: u32,
    size: u32,
}

impl Page {
    /// Create a page, rejecting a zero page number or page size
    pub fn new(number: u32, size: u32) -> RepositoryResult<Self> {
        if number == 0 {
            return Err(RepositoryError::validation_failed(
                "page number must be at least 1",
            ));
        }
        if size == 0 {
            return Err(RepositoryError::validation_failed(
                "page size must be at least 1",
            ));
        }
        Ok(Self { number, size })
    }

    /// The first page of the given size
    pub fn first(size: u32) -> RepositoryResult<Self> {
        Self::new(1, size)
    }

    #[must_use]
    pub const fn number(&self) -> u32 {
        self.number
    }

    #[must_use]
    pub const fn size(&self) -> u32 {
        self.size
    }

    /// Number of results to skip
    #[must_use]
    pub const fn offset(&self) -> u64 {
        (self.number as u64 - 1) * self.size as u64
    }

    /// Maximum number of results to return
    #[must_use]
    pub const fn limit(&self) -> u64 {
        self.size as u64
    }

    /// The following page with the same size
    #[must_use]
    pub const fn next(&self) -> Self {
        Self {
            number: self.number.saturating_add(1),
            size: self.size,
        }
    }

    /// Apply the window to an already ordered sequence
    pub fn window<T>(&self, items: impl IntoIterator<Item = T>) -> Vec<T> {
        let skip = usize::try_from(self.offset()).unwrap_or(usize::MAX);
        let take = usize::try_from(self.limit()).unwrap_or(usize::MAX);
        items.into_iter().skip(skip).take(take).collect()
    }
}

impl fmt::Display for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page {} (size {})", self.number, self.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::RepositoryErrorKind;

    #[test]
    fn test_order_direction_display() {
        assert_eq!(format!("{}", OrderDirection::Ascending), "asc");
        assert_eq!(format!("{}", OrderDirection::Descending), "desc");
        assert_eq!(OrderDirection::Descending.as_sql(), "DESC");
    }

    #[test]
    fn test_order_direction_default() {
        assert_eq!(OrderDirection::default(), OrderDirection::Ascending);
    }

    #[test]
    fn test_page_offsets() {
        let page1 = Page::new(1, 20).unwrap();
        assert_eq!(page1.offset(), 0);
        assert_eq!(page1.limit(), 20);

        let page3 = Page::new(3, 20).unwrap();
        assert_eq!(page3.offset(), 40);
        assert_eq!(page3.next().offset(), 60);
    }

    #[test]
    fn test_page_rejects_zero() {
        let err = Page::new(0, 10).unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::ValidationFailed);
        assert!(Page::new(1, 0).is_err());
    }

    #[test]
    fn test_page_offset_does_not_overflow() {
        let page = Page::new(u32::MAX, u32::MAX).unwrap();
        assert_eq!(page.offset(), (u64::from(u32::MAX) - 1) * u64::from(u32::MAX));
    }

    #[test]
    fn test_window_over_25_items() {
        let items: Vec<u32> = (1..=25).collect();
        let sizes: Vec<usize> = (1..=4)
            .map(|n| Page::new(n, 10).unwrap().window(items.iter()).len())
            .collect();
        assert_eq!(sizes, vec![10, 10, 5, 0]);
    }
}
