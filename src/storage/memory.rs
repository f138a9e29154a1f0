// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! This module implements the in-process storage backend: the
//! reference implementation of the storage contract, used by tests
//! and single-node deployments.

use super::{
    Row, RowIterator, RowMutation, Storage, StorageError, StorageQuery, StorageTransaction,
};
use crate::{
    model::{Model, Table},
    ring::Token,
};
use async_trait::async_trait;
use log::debug;
use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::{Arc, Mutex, PoisonError},
};

type RowKey = [String; 4];

fn row_key(keys: &[String]) -> RowKey {
    let mut key = RowKey::default();
    for (slot, component) in key.iter_mut().zip(keys) {
        *slot = component.clone();
    }
    key
}

#[derive(Debug, Default)]
struct TableStore {
    depth: u8,
    // key -> timestamp -> payload
    rows: BTreeMap<RowKey, BTreeMap<i64, Vec<u8>>>,
}

#[derive(Debug, Default)]
struct StoreInner {
    tables: HashMap<String, TableStore>,
}

/// The in-process storage backend. Committed state is shared between
/// transactions; each transaction stages its writes and observes
/// them overlaid on its reads.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<StoreInner>>,
}

impl MemoryStorage {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock(inner: &Mutex<StoreInner>) -> std::sync::MutexGuard<'_, StoreInner> {
    // a poisoned store only means a writer panicked mid-borrow; the
    // map itself is always structurally intact
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

fn table_store<'a>(
    store: &'a StoreInner,
    flat_name: &str,
) -> Result<&'a TableStore, StorageError> {
    store
        .tables
        .get(flat_name)
        .ok_or_else(|| StorageError::UnknownTable(flat_name.to_owned()))
}

fn check_keys(flat_name: &str, depth: u8, count: usize) -> Result<(), StorageError> {
    if count != depth as usize {
        return Err(StorageError::KeyCount {
            table: flat_name.to_owned(),
            expected: depth as usize,
            got: count,
        });
    }
    Ok(())
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn sync_model(&self, model: &Model) -> Result<(), StorageError> {
        let mut store = lock(&self.inner);
        for table in model.flattened() {
            if !store.tables.contains_key(table.flat_name()) {
                debug!("creating table {}", table.flat_name());
                store.tables.insert(
                    table.flat_name().to_owned(),
                    TableStore {
                        depth: table.depth(),
                        rows: BTreeMap::new(),
                    },
                );
            }
        }
        Ok(())
    }

    async fn transaction(
        &self,
        _token: Token,
        timestamp: i64,
    ) -> Result<Box<dyn StorageTransaction>, StorageError> {
        Ok(Box::new(MemoryTransaction {
            inner: self.inner.clone(),
            timestamp,
            staged: HashMap::new(),
        }))
    }

    async fn nuke(&self) -> Result<(), StorageError> {
        lock(&self.inner).tables.clear();
        Ok(())
    }
}

/// One staged transaction over the shared store.
pub struct MemoryTransaction {
    inner: Arc<Mutex<StoreInner>>,
    timestamp: i64,
    staged: HashMap<(String, RowKey), Vec<u8>>,
}

impl MemoryTransaction {
    fn staged_for(&self, flat_name: &str, key: &RowKey) -> Option<&Vec<u8>> {
        self.staged.get(&(flat_name.to_owned(), key.clone()))
    }

    // latest version of `key` at or before the transaction
    // timestamp, staged writes overlaid
    fn current_version(
        &self,
        store: &TableStore,
        flat_name: &str,
        key: &RowKey,
    ) -> Option<(i64, Vec<u8>)> {
        if let Some(data) = self.staged_for(flat_name, key) {
            return Some((self.timestamp, data.clone()));
        }
        store
            .rows
            .get(key)
            .and_then(|versions| versions.range(..=self.timestamp).next_back())
            .map(|(timestamp, data)| (*timestamp, data.clone()))
    }

    fn build_row(key: &RowKey, timestamp: i64, data: Vec<u8>) -> Row {
        let mut row = Row {
            timestamp,
            data,
            ..Row::default()
        };
        row.set_keys(key);
        row
    }
}

#[async_trait]
impl StorageTransaction for MemoryTransaction {
    async fn set(
        &mut self,
        table: &Table,
        keys: &[String],
        data: Vec<u8>,
    ) -> Result<(), StorageError> {
        {
            let store = lock(&self.inner);
            let table_store = table_store(&store, table.flat_name())?;
            check_keys(table.flat_name(), table_store.depth, keys.len())?;
        }
        self.staged
            .insert((table.flat_name().to_owned(), row_key(keys)), data);
        Ok(())
    }

    async fn get(&mut self, table: &Table, keys: &[String]) -> Result<Option<Row>, StorageError> {
        let store = lock(&self.inner);
        let table_store = table_store(&store, table.flat_name())?;
        check_keys(table.flat_name(), table_store.depth, keys.len())?;
        let key = row_key(keys);
        Ok(self
            .current_version(table_store, table.flat_name(), &key)
            .map(|(timestamp, data)| Self::build_row(&key, timestamp, data)))
    }

    async fn query(&mut self, query: StorageQuery) -> Result<Box<dyn RowIterator>, StorageError> {
        let flat_name = query.table.flat_name();
        let store = lock(&self.inner);
        let table_store = table_store(&store, flat_name)?;
        let matches = |key: &RowKey| {
            query
                .prefix
                .iter()
                .zip(key.iter())
                .all(|(wanted, component)| wanted == component)
        };
        // distinct keys in stable (btree) order, staged keys merged in
        let mut keys: Vec<RowKey> = table_store
            .rows
            .keys()
            .filter(|key| matches(*key))
            .cloned()
            .collect();
        for (staged_table, key) in self.staged.keys() {
            if staged_table == flat_name && matches(key) && !table_store.rows.contains_key(key) {
                keys.push(key.clone());
            }
        }
        keys.sort();
        keys.dedup();
        let mut rows = VecDeque::new();
        for key in keys {
            if query.limit.map_or(false, |limit| rows.len() >= limit) {
                break;
            }
            if let Some((timestamp, data)) = self.current_version(table_store, flat_name, &key) {
                rows.push_back(Self::build_row(&key, timestamp, data));
            }
        }
        Ok(Box::new(MemoryRowIterator { rows }))
    }

    async fn timeline(
        &mut self,
        table: &Table,
        from_time: i64,
        count: usize,
    ) -> Result<Vec<RowMutation>, StorageError> {
        let flat_name = table.flat_name();
        let store = lock(&self.inner);
        let table_store = table_store(&store, flat_name)?;

        // merged version chains: committed plus this transaction's
        // staged writes
        let mut chains: BTreeMap<RowKey, BTreeMap<i64, Vec<u8>>> = table_store.rows.clone();
        for ((staged_table, key), data) in &self.staged {
            if staged_table == flat_name {
                chains
                    .entry(key.clone())
                    .or_default()
                    .insert(self.timestamp, data.clone());
            }
        }

        let mut versions: Vec<(i64, RowKey)> = Vec::new();
        for (key, chain) in &chains {
            for timestamp in chain.keys() {
                if *timestamp >= from_time {
                    versions.push((*timestamp, key.clone()));
                }
            }
        }
        versions.sort();
        versions.truncate(count);

        let mut mutations = Vec::with_capacity(versions.len());
        for (timestamp, key) in versions {
            let chain = &chains[&key];
            let new = Self::build_row(&key, timestamp, chain[&timestamp].clone());
            let old = chain
                .range(..timestamp)
                .next_back()
                .map(|(previous, data)| Self::build_row(&key, *previous, data.clone()));
            mutations.push(RowMutation {
                old,
                new,
                last_version: false,
            });
        }
        Ok(mutations)
    }

    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        let MemoryTransaction {
            inner,
            timestamp,
            staged,
        } = *self;
        let mut store = lock(&inner);
        for ((flat_name, key), data) in staged {
            let table_store = store
                .tables
                .get_mut(&flat_name)
                .ok_or_else(|| StorageError::UnknownTable(flat_name.clone()))?;
            table_store.rows.entry(key).or_default().insert(timestamp, data);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StorageError> {
        Ok(())
    }
}

struct MemoryRowIterator {
    rows: VecDeque<Row>,
}

#[async_trait]
impl RowIterator for MemoryRowIterator {
    async fn next_row(&mut self) -> Result<Option<Row>, StorageError> {
        Ok(self.rows.pop_front())
    }
}
