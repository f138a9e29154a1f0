// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! This module implements the engine front: a database bound to a
//! model and a storage backend, executing plans with the two-pass
//! protocol. The dry pass discovers the partition token without
//! touching storage; the real pass runs against a storage
//! transaction pinned to that token and the plan's id-derived
//! timestamp, committing on success and rolling back on failure.

use crate::{
    exec::{ExecContext, ExecError},
    model::Model,
    storage::{Storage, StorageError},
    transaction::{Transaction, TransactionReturn},
};
use log::{debug, warn};
use std::sync::Arc;

/// A database bound to a service name, a model and a storage
/// backend.
pub struct Db {
    service_name: String,
    model: Arc<Model>,
    storage: Arc<dyn Storage>,
}

impl Db {
    /// Create a database over the given model and storage.
    pub fn new(service_name: impl Into<String>, model: Model, storage: Arc<dyn Storage>) -> Self {
        Db {
            service_name: service_name.into(),
            model: Arc::new(model),
            storage,
        }
    }

    /// Get the service name.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Get the model.
    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    /// Get the storage backend.
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Create any missing storage table for the model.
    pub async fn sync(&self) -> Result<(), StorageError> {
        self.storage.sync_model(&self.model).await
    }

    /// Execute a plan and produce the reply plan: same id, populated
    /// return, no blocks. Every failure path yields a structured
    /// error; nothing panics across this boundary.
    pub async fn execute(&self, trx: &Transaction) -> Transaction {
        debug!("executing transaction {}", trx.id);
        let ret = self.execute_inner(trx).await;
        Transaction {
            id: trx.id,
            ret: Some(ret),
            blocks: Vec::new(),
        }
    }

    async fn execute_inner(&self, trx: &Transaction) -> TransactionReturn {
        // dry pass: no storage handle, discovers the token and
        // structural errors
        let mut dry = ExecContext::dry(&self.model);
        dry.run(trx).await;
        let token = match dry.token {
            Some(token) if dry.ret.error.is_none() => token,
            _ => {
                if dry.ret.error.is_none() {
                    dry.set_error(ExecError::Token(
                        "Couldn't find token for transaction".to_owned(),
                    ));
                }
                debug!("transaction {} failed in dry pass", trx.id);
                return dry.ret;
            }
        };
        debug!("transaction {} has token {}", trx.id, token);

        // real pass: bound to the resolved token and the id-derived
        // timestamp
        let mut storage_trx = match self.storage.transaction(token, trx.id as i64).await {
            Ok(storage_trx) => storage_trx,
            Err(e) => {
                return TransactionReturn {
                    error: Some(
                        ExecError::Storage(format!("Couldn't get storage transaction: {}", e))
                            .into(),
                    ),
                    data: Vec::new(),
                };
            }
        };
        let mut real = ExecContext::real(&self.model, storage_trx.as_mut());
        real.run(trx).await;
        let mut ret = real.ret;

        if ret.error.is_none() {
            if let Err(e) = storage_trx.commit().await {
                ret.error = Some(
                    ExecError::Storage(format!("Couldn't commit transaction: {}", e)).into(),
                );
            }
        } else {
            debug!(
                "transaction {} failed in real pass, rolling back",
                trx.id
            );
            if let Err(e) = storage_trx.rollback().await {
                warn!("couldn't roll back transaction {}: {}", trx.id, e);
            }
        }
        ret
    }
}
