// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! This module defines the versioned row store contract. Rows are
//! addressed by `(table, k1..kN, timestamp)`; the logical current
//! value of a key at time T is its row with the largest timestamp at
//! or before T.

use crate::{
    model::{Model, Table},
    ring::Token,
};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

pub mod memory;

pub use memory::MemoryStorage;

/// A storage failure.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The referenced table was never synced into the schema.
    #[error("table {0} does not exist")]
    UnknownTable(String),
    /// The key component count does not match the table depth.
    #[error("table {table} takes {expected} key components, got {got}")]
    KeyCount {
        /// The flattened table name.
        table: String,
        /// The table depth.
        expected: usize,
        /// The provided component count.
        got: usize,
    },
    /// Any other backend failure.
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// A stored row version.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    /// Insert timestamp in nanoseconds.
    pub timestamp: i64,
    /// First key component.
    pub key1: String,
    /// Second key component, empty when unused.
    pub key2: String,
    /// Third key component, empty when unused.
    pub key3: String,
    /// Fourth key component, empty when unused.
    pub key4: String,
    /// The opaque payload.
    pub data: Vec<u8>,
}

impl Row {
    /// Get the key components in order.
    pub fn keys(&self) -> [&str; 4] {
        [&self.key1, &self.key2, &self.key3, &self.key4]
    }
    /// Set the key components; unused slots stay empty.
    pub fn set_keys(&mut self, keys: &[String]) {
        let mut slots = [
            &mut self.key1,
            &mut self.key2,
            &mut self.key3,
            &mut self.key4,
        ];
        for (slot, key) in slots.iter_mut().zip(keys) {
            **slot = key.clone();
        }
    }
}

/// A latest-version scan under a key prefix.
#[derive(Debug, Clone)]
pub struct StorageQuery {
    /// The table to scan.
    pub table: Arc<Table>,
    /// The leading key components rows must match.
    pub prefix: Vec<String>,
    /// The maximum number of rows to yield.
    pub limit: Option<usize>,
}

/// A change to a logical key across versions.
#[derive(Debug, Clone, PartialEq)]
pub struct RowMutation {
    /// The version immediately preceding `new`, if one existed.
    pub old: Option<Row>,
    /// The written version.
    pub new: Row,
    /// Reserved; never set.
    pub last_version: bool,
}

/// A stream of rows out of a query.
#[async_trait]
pub trait RowIterator: Send {
    /// Get the next row; `None` once exhausted.
    async fn next_row(&mut self) -> Result<Option<Row>, StorageError>;
}

/// A storage backend. A backend may ignore the partition token in
/// single-node mode, but must stamp every write of a transaction
/// with the transaction's timestamp.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Create any table of the model missing from the schema, named
    /// by its underscore-flattened path. Existing tables are never
    /// altered.
    async fn sync_model(&self, model: &Model) -> Result<(), StorageError>;
    /// Open a transaction pinned to `(token, timestamp)`.
    async fn transaction(
        &self,
        token: Token,
        timestamp: i64,
    ) -> Result<Box<dyn StorageTransaction>, StorageError>;
    /// Drop all data and schema. Test tooling.
    async fn nuke(&self) -> Result<(), StorageError>;
}

/// One storage transaction. Writes are staged until `commit` and
/// become atomically visible; reads observe the committed state at
/// the transaction timestamp plus the transaction's own writes.
/// Committing or rolling back consumes the handle.
#[async_trait]
pub trait StorageTransaction: Send {
    /// Upsert a row at the transaction timestamp. The component
    /// count must equal the table depth.
    async fn set(
        &mut self,
        table: &Table,
        keys: &[String],
        data: Vec<u8>,
    ) -> Result<(), StorageError>;
    /// Get the row with the largest timestamp at or before the
    /// transaction timestamp.
    async fn get(&mut self, table: &Table, keys: &[String]) -> Result<Option<Row>, StorageError>;
    /// Stream, for each distinct key matching the query prefix, its
    /// latest version. Order is backend-defined but stable within
    /// one iterator.
    async fn query(&mut self, query: StorageQuery) -> Result<Box<dyn RowIterator>, StorageError>;
    /// Collect up to `count` row versions with a timestamp at or
    /// after `from_time`, ascending, each paired with the version it
    /// replaced.
    async fn timeline(
        &mut self,
        table: &Table,
        from_time: i64,
        count: usize,
    ) -> Result<Vec<RowMutation>, StorageError>;
    /// Make the staged writes durable and release the connection.
    async fn commit(self: Box<Self>) -> Result<(), StorageError>;
    /// Discard the staged writes and release the connection.
    async fn rollback(self: Box<Self>) -> Result<(), StorageError>;
}
