//! Vigil Catalog Collection
//!
//! Id-ordered table of one entity kind. Tables carry no lock of their own;
//! the catalog guards all of them together so cross-table reference checks
//! and the write that depends on them are atomic.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::entities::Entity;
use std::collections::BTreeMap;
use vigil_common::{Page, PageRequest, Result, VigilError};

// =============================================================================
// Entity Table
// =============================================================================

#[derive(Debug, Clone)]
pub struct EntityTable<T: Entity> {
    rows: BTreeMap<String, T>,
}

impl<T: Entity> Default for EntityTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> EntityTable<T> {
    pub fn new() -> Self {
        Self {
            rows: BTreeMap::new(),
        }
    }

    // -------------------------------------------------------------------------
    // Row Operations
    // -------------------------------------------------------------------------

    pub fn insert(&mut self, entity: T) -> Result<()> {
        let id = entity.id().to_string();
        if self.rows.contains_key(&id) {
            return Err(VigilError::conflict(format!("{} {} already exists", T::KIND, id)));
        }
        self.rows.insert(id, entity);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<&T> {
        self.rows.get(id).ok_or_else(|| VigilError::not_found(T::KIND, id))
    }

    pub fn get_mut(&mut self, id: &str) -> Result<&mut T> {
        self.rows.get_mut(id).ok_or_else(|| VigilError::not_found(T::KIND, id))
    }

    pub fn remove(&mut self, id: &str) -> Result<T> {
        self.rows.remove(id).ok_or_else(|| VigilError::not_found(T::KIND, id))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.rows.contains_key(id)
    }

    /// Missing-reference check used before writes that point at this table.
    pub fn require(&self, id: &str) -> Result<()> {
        if self.contains(id) {
            Ok(())
        } else {
            Err(VigilError::not_found(T::KIND, id))
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.rows.values()
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.rows.values_mut()
    }

    // -------------------------------------------------------------------------
    // Query Operations
    // -------------------------------------------------------------------------

    /// Matching rows in id order, sliced to one page.
    pub fn page<F>(&self, filter: F, page: PageRequest) -> Page<T>
    where
        F: Fn(&T) -> bool,
    {
        let matching: Vec<T> = self.rows.values().filter(|e| filter(e)).cloned().collect();
        Page::from_sorted(matching, page)
    }

    pub fn ids_where<F>(&self, filter: F) -> Vec<String>
    where
        F: Fn(&T) -> bool,
    {
        self.rows
            .values()
            .filter(|e| filter(e))
            .map(|e| e.id().to_string())
            .collect()
    }

    pub fn replace_all(&mut self, entities: Vec<T>) {
        self.rows = entities
            .into_iter()
            .map(|e| (e.id().to_string(), e))
            .collect();
    }
}

// =============================================================================
// Tests
// =============================================================================
