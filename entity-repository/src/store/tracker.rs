//! Change tracking
//!
//! A [`ChangeTracker`] is the store-side context that tracked reads attach
//! entities to. It only holds what a caller asked to track: writes refresh
//! or evict entries that are already attached, but never add new ones.
//!
//! Mutations are staged in a [`UnitOfWork`] owned by the caller, then handed
//! to [`Store::save_changes`](super::Store::save_changes), which applies the
//! batch atomically. Units share no state, so writers run concurrently up to
//! whatever the store itself serialises.

use dashmap::DashMap;

use crate::repository::{EntityDescriptor, Row};

/// What a staged change does to its row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// A change staged in a unit of work
#[derive(Debug, Clone, PartialEq)]
pub struct PendingChange {
    pub kind: ChangeKind,
    pub entity: EntityDescriptor,
    /// Full entity state; the key column is `0` for an add without a preset key
    pub row: Row,
}

impl PendingChange {
    pub fn key(&self) -> i64 {
        self.entity.key_of(&self.row)
    }
}

/// A change the store has durably applied
#[derive(Debug, Clone, PartialEq)]
pub struct SavedChange {
    pub kind: ChangeKind,
    pub entity: EntityDescriptor,
    /// Key of the affected row (generated by the store for adds)
    pub key: i64,
    /// Persisted state, key included
    pub row: Row,
}

type TrackedKey = (&'static str, i64);

/// Identity map of attached entities
#[derive(Debug, Default)]
pub struct ChangeTracker {
    attached: DashMap<TrackedKey, Row>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach (or refresh) an entity snapshot
    pub fn attach(&self, entity: &EntityDescriptor, row: Row) {
        let key = entity.key_of(&row);
        self.attached.insert((entity.table, key), row);
    }

    /// Remove an entity from tracking; returns whether it was attached
    pub fn detach(&self, table: &'static str, key: i64) -> bool {
        self.attached.remove(&(table, key)).is_some()
    }

    pub fn is_attached(&self, table: &'static str, key: i64) -> bool {
        self.attached.contains_key(&(table, key))
    }

    /// Last known state of an attached entity
    pub fn snapshot(&self, table: &'static str, key: i64) -> Option<Row> {
        self.attached.get(&(table, key)).map(|entry| entry.value().clone())
    }

    pub fn attached_count(&self) -> usize {
        self.attached.len()
    }

    /// Drop every attached entity
    pub fn clear(&self) {
        self.attached.clear();
    }

    /// Reflect a committed batch in the identity map
    ///
    /// Updates refresh attached snapshots and removals evict them. Entities
    /// that were not attached stay untracked.
    pub fn apply_saved(&self, saved: &[SavedChange]) {
        for change in saved {
            let key = (change.entity.table, change.key);
            match change.kind {
                ChangeKind::Added | ChangeKind::Modified => {
                    if let Some(mut entry) = self.attached.get_mut(&key) {
                        *entry = change.row.clone();
                    }
                }
                ChangeKind::Removed => {
                    self.attached.remove(&key);
                }
            }
        }
    }
}

/// Changes staged for one flush
///
/// Dropping a unit of work without saving it discards the staged changes.
#[derive(Debug, Default)]
pub struct UnitOfWork {
    changes: Vec<PendingChange>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_added(&mut self, entity: EntityDescriptor, row: Row) {
        self.stage(ChangeKind::Added, entity, row);
    }

    pub fn mark_modified(&mut self, entity: EntityDescriptor, row: Row) {
        self.stage(ChangeKind::Modified, entity, row);
    }

    pub fn mark_removed(&mut self, entity: EntityDescriptor, row: Row) {
        self.stage(ChangeKind::Removed, entity, row);
    }

    fn stage(&mut self, kind: ChangeKind, entity: EntityDescriptor, row: Row) {
        self.changes.push(PendingChange { kind, entity, row });
    }

    pub fn pending(&self) -> &[PendingChange] {
        &self.changes
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::Entity;
    use crate::testing::{book_descriptor, Book};

    fn saved(kind: ChangeKind, book: &Book) -> SavedChange {
        SavedChange {
            kind,
            entity: book_descriptor(),
            key: book.id,
            row: book.to_row(),
        }
    }

    #[test]
    fn test_attach_and_detach() {
        let tracker = ChangeTracker::new();
        let book = Book::new(3, 1, "Dune");
        tracker.attach(&book_descriptor(), book.to_row());

        assert!(tracker.is_attached("books", 3));
        assert_eq!(tracker.snapshot("books", 3), Some(book.to_row()));
        assert!(tracker.detach("books", 3));
        assert!(!tracker.detach("books", 3));
        assert_eq!(tracker.attached_count(), 0);
    }

    #[test]
    fn test_saved_changes_never_attach_new_entities() {
        let tracker = ChangeTracker::new();
        let book = Book::new(8, 1, "Emma");
        tracker.apply_saved(&[
            saved(ChangeKind::Added, &book),
            saved(ChangeKind::Modified, &book),
        ]);
        assert_eq!(tracker.attached_count(), 0);
    }

    #[test]
    fn test_saved_changes_refresh_and_evict_attached_entities() {
        let tracker = ChangeTracker::new();
        let mut book = Book::new(8, 1, "Emma");
        tracker.attach(&book_descriptor(), book.to_row());

        book.title = "Persuasion".into();
        tracker.apply_saved(&[saved(ChangeKind::Modified, &book)]);
        assert_eq!(tracker.snapshot("books", 8), Some(book.to_row()));

        tracker.apply_saved(&[saved(ChangeKind::Removed, &book)]);
        assert!(!tracker.is_attached("books", 8));
    }

    #[test]
    fn test_unit_of_work_stages_in_order() {
        let mut unit = UnitOfWork::new();
        assert!(unit.is_empty());

        unit.mark_added(book_descriptor(), Book::new(0, 1, "A").to_row());
        unit.mark_removed(book_descriptor(), Book::new(4, 1, "B").to_row());

        let kinds: Vec<ChangeKind> = unit.pending().iter().map(|c| c.kind).collect();
        assert_eq!(kinds, vec![ChangeKind::Added, ChangeKind::Removed]);
        assert_eq!(unit.pending()[0].key(), 0);
        assert_eq!(unit.pending()[1].key(), 4);
    }
}
