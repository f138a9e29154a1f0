// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! This module defines the database model: a tree of tables, at most
//! four levels deep, read-only once the storage schema has been
//! synced.

use anyhow::{bail, ensure};
use std::{collections::HashMap, sync::Arc};

/// The maximum nesting depth of a table.
pub const MAX_DEPTH: u8 = 4;

/// A table in the model. Rows of a table at depth N are addressed by
/// N key components, the first N-1 identifying the parent rows.
#[derive(Debug, Clone)]
pub struct Table {
    name: String,
    depth: u8,
    flat_name: String,
    sub_tables: HashMap<String, Arc<Table>>,
}

impl Table {
    fn new(name: &str, parent: Option<&Table>) -> Self {
        let (depth, flat_name) = match parent {
            Some(parent) => (parent.depth + 1, format!("{}_{}", parent.flat_name, name)),
            None => (1, name.to_owned()),
        };
        Table {
            name: name.to_owned(),
            depth,
            flat_name,
            sub_tables: HashMap::new(),
        }
    }
    /// Get the table name.
    pub fn name(&self) -> &str {
        &self.name
    }
    /// Get the nesting depth, starting at 1 for top-level tables.
    pub fn depth(&self) -> u8 {
        self.depth
    }
    /// Get the storage name: the underscore-joined ancestor path.
    pub fn flat_name(&self) -> &str {
        &self.flat_name
    }
    /// Get a direct sub-table by name.
    pub fn sub_table(&self, name: &str) -> Option<Arc<Table>> {
        self.sub_tables.get(name).cloned()
    }
    /// Iterate the direct sub-tables.
    pub fn sub_tables(&self) -> impl Iterator<Item = &Arc<Table>> {
        self.sub_tables.values()
    }
}

/// The tree of tables. Built once at startup, synced into storage,
/// then shared read-only.
#[derive(Debug, Clone, Default)]
pub struct Model {
    tables: HashMap<String, Arc<Table>>,
}

impl Model {
    /// Create an empty model.
    pub fn new() -> Self {
        Self::default()
    }
    /// Create the table at the `/`-separated path, along with any
    /// missing ancestors. Creating an existing table is a no-op.
    pub fn create_table(&mut self, path: &str) -> anyhow::Result<Arc<Table>> {
        let mut segments = path.split('/');
        let top = segments.next().unwrap_or_default();
        ensure!(!top.is_empty(), "empty table path");
        let mut current = self
            .tables
            .entry(top.to_owned())
            .or_insert_with(|| Arc::new(Table::new(top, None)));
        for segment in segments {
            ensure!(!segment.is_empty(), "empty segment in table path {}", path);
            if current.depth == MAX_DEPTH {
                bail!("table {} exceeds the maximum depth of {}", path, MAX_DEPTH);
            }
            let level = current;
            let table = Arc::make_mut(level);
            let child = Table::new(segment, Some(table));
            current = table
                .sub_tables
                .entry(segment.to_owned())
                .or_insert_with(|| Arc::new(child));
        }
        Ok(current.clone())
    }
    /// Navigate to the table at the `/`-separated path.
    pub fn get_table(&self, path: &str) -> Option<Arc<Table>> {
        let mut segments = path.split('/');
        let mut current = self.tables.get(segments.next()?)?.clone();
        for segment in segments {
            let next = current.sub_table(segment)?;
            current = next;
        }
        Some(current)
    }
    /// Iterate the top-level tables.
    pub fn tables(&self) -> impl Iterator<Item = &Arc<Table>> {
        self.tables.values()
    }
    /// Collect every table in the model, parents before children.
    pub fn flattened(&self) -> Vec<Arc<Table>> {
        fn walk(table: &Arc<Table>, out: &mut Vec<Arc<Table>>) {
            out.push(table.clone());
            for sub in table.sub_tables() {
                walk(sub, out);
            }
        }
        let mut out = Vec::new();
        for table in self.tables.values() {
            walk(table, &mut out);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_creation_and_navigation() {
        let mut model = Model::new();
        model.create_table("users/posts/comments").unwrap();
        let posts = model.get_table("users/posts").unwrap();
        assert_eq!(posts.name(), "posts");
        assert_eq!(posts.depth(), 2);
        assert_eq!(posts.flat_name(), "users_posts");
        let comments = model.get_table("users/posts/comments").unwrap();
        assert_eq!(comments.depth(), 3);
        assert_eq!(comments.flat_name(), "users_posts_comments");
        assert!(model.get_table("users/missing").is_none());
    }

    #[test]
    fn creation_is_idempotent() {
        let mut model = Model::new();
        model.create_table("users").unwrap();
        model.create_table("users/posts").unwrap();
        model.create_table("users/posts").unwrap();
        assert_eq!(model.flattened().len(), 2);
    }

    #[test]
    fn depth_is_capped() {
        let mut model = Model::new();
        assert!(model.create_table("a/b/c/d").is_ok());
        assert!(model.create_table("a/b/c/d/e").is_err());
    }
}
