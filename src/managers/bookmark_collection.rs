//! Bookmark Collection.
//!
//! Ordered, id-unique sequence of bookmarks for one identity, newest first.
//! `insert_front` and `remove_by_id` are idempotent so overlapping sources
//! (pipeline confirmation and push echo) can apply the same change twice.

use crate::types::bookmark::Bookmark;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookmarkCollection {
    records: Vec<Bookmark>,
}

impl BookmarkCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the contents wholesale. Input is expected in backend order
    /// (`created_at` descending); duplicate ids keep their first occurrence.
    pub fn replace_all(&mut self, records: Vec<Bookmark>) {
        self.records.clear();
        for record in records {
            if !self.contains(&record.id) {
                self.records.push(record);
            }
        }
    }

    /// Inserts at the head. Returns `false` (and changes nothing) if the id is already present.
    pub fn insert_front(&mut self, record: Bookmark) -> bool {
        if self.contains(&record.id) {
            return false;
        }
        self.records.insert(0, record);
        true
    }

    /// Inserts at the position that keeps `created_at` descending.
    /// Ties go after existing records with the same timestamp.
    pub fn insert_sorted(&mut self, record: Bookmark) -> bool {
        if self.contains(&record.id) {
            return false;
        }
        let at = self
            .records
            .iter()
            .position(|r| r.created_at < record.created_at)
            .unwrap_or(self.records.len());
        self.records.insert(at, record);
        true
    }

    /// Removes the record with `id`, returning it. No-op when absent.
    pub fn remove_by_id(&mut self, id: &str) -> Option<Bookmark> {
        let at = self.records.iter().position(|r| r.id == id)?;
        Some(self.records.remove(at))
    }

    pub fn snapshot(&self) -> &[Bookmark] {
        &self.records
    }

    pub fn get(&self, id: &str) -> Option<&Bookmark> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.iter().any(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}
