// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! This module implements the transaction interpreter. A plan is
//! walked twice: a dry pass that resolves the partition token and
//! surfaces structural errors without touching storage, then a real
//! pass against a storage transaction. Capabilities missing in the
//! dry pass are tolerated silently because variables are
//! placeholders there; the real pass fails loudly.

use crate::{
    model::Model,
    ring::{self, Token},
    storage::{StorageQuery, StorageTransaction},
    transaction::{
        Transaction, TransactionError, TransactionObject, TransactionOperation, TransactionReturn,
        TransactionVariable,
    },
    wire::{Value, WireDecoder, WireEncoder},
};
use log::trace;
use thiserror::Error;

pub mod values;

pub use values::{ServerValue, META_KEYS, META_TIMESTAMP};

use std::collections::HashMap;
use values::{strip_meta_keys, RowRef, TableRef};

/// An execution failure, surfaced to the client inside the plan
/// return.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecError {
    /// The plan itself is malformed.
    #[error("{0}")]
    Structural(String),
    /// The partition token is unresolved or conflicting.
    #[error("{0}")]
    Token(String),
    /// An operation was applied to a value lacking the capability.
    #[error("{0}")]
    Type(String),
    /// A referenced table does not exist in the model.
    #[error("{0}")]
    Schema(String),
    /// The backing store failed.
    #[error("{0}")]
    Storage(String),
}

impl ExecError {
    /// The stable error kind id carried on the wire.
    pub fn id(&self) -> u32 {
        match self {
            ExecError::Structural(_) => 1,
            ExecError::Token(_) => 2,
            ExecError::Type(_) => 3,
            ExecError::Schema(_) => 4,
            ExecError::Storage(_) => 5,
        }
    }
}

impl From<ExecError> for TransactionError {
    fn from(error: ExecError) -> Self {
        TransactionError {
            id: error.id(),
            message: error.to_string(),
        }
    }
}

/// Everything one interpretation pass needs: the pass kind, the
/// model, the variable environment, the storage handle of the real
/// pass, and the return under construction.
pub struct ExecContext<'a> {
    dry: bool,
    model: &'a Model,
    storage: Option<&'a mut dyn StorageTransaction>,
    vars: HashMap<TransactionVariable, ServerValue>,
    /// The return accumulator sent back to the client.
    pub ret: TransactionReturn,
    /// The partition token, once resolved from a top-level key.
    pub token: Option<Token>,
}

impl<'a> ExecContext<'a> {
    /// Create the dry-pass context; no storage is ever touched.
    pub fn dry(model: &'a Model) -> Self {
        ExecContext {
            dry: true,
            model,
            storage: None,
            vars: HashMap::new(),
            ret: TransactionReturn::default(),
            token: None,
        }
    }

    /// Create the real-pass context over an open storage transaction.
    pub fn real(model: &'a Model, storage: &'a mut dyn StorageTransaction) -> Self {
        ExecContext {
            dry: false,
            model,
            storage: Some(storage),
            vars: HashMap::new(),
            ret: TransactionReturn::default(),
            token: None,
        }
    }

    /// Record a failure; the first one wins.
    pub fn set_error(&mut self, error: ExecError) {
        if self.ret.error.is_none() {
            self.ret.error = Some(error.into());
        }
    }

    /// Interpret the plan's main block until it returns, fails, or
    /// runs out of operations.
    pub async fn run(&mut self, trx: &Transaction) {
        let main_block = match trx.main_block() {
            Some(block) => block,
            None => {
                self.set_error(ExecError::Structural("No main block defined".to_owned()));
                return;
            }
        };
        for operation in &main_block.operations {
            let stop = self.execute_operation(operation).await;
            if stop || self.ret.error.is_some() {
                return;
            }
        }
    }

    async fn execute_operation(&mut self, operation: &TransactionOperation) -> bool {
        trace!("executing operation {:?}", operation.opcode());
        let result = match operation {
            TransactionOperation::GetTable {
                name,
                destination,
                source,
            } => self
                .op_get_table(name, *destination, *source)
                .await
                .map(|_| false),
            TransactionOperation::Get {
                source,
                key,
                destination,
            } => self.op_get(*source, key, *destination).await.map(|_| false),
            TransactionOperation::Set {
                destination,
                key,
                value,
            } => self.op_set(*destination, key, value).await.map(|_| false),
            TransactionOperation::GetAll {
                source,
                destination,
            } => self.op_get_all(*source, *destination).await.map(|_| false),
            TransactionOperation::Return { data } => self.op_return(data).map(|_| true),
        };
        match result {
            Ok(stop) => stop,
            Err(error) => {
                self.set_error(error);
                true
            }
        }
    }

    fn var(&self, variable: TransactionVariable) -> ServerValue {
        self.vars
            .get(&variable)
            .cloned()
            .unwrap_or(ServerValue::Nil)
    }

    fn bind(&mut self, variable: TransactionVariable, value: ServerValue) {
        self.vars.insert(variable, value);
    }

    fn object_value(&self, object: &TransactionObject) -> Result<Value, ExecError> {
        if let Some(value) = &object.value {
            return Ok(value.clone());
        }
        match object.variable {
            Some(variable) => self.var(variable).to_value(),
            None => Ok(Value::Nil),
        }
    }

    // a variable-fed object may be an unbound placeholder during the
    // dry pass; its operation is skipped rather than failed
    fn dry_placeholder(&self, object: &TransactionObject) -> bool {
        self.dry && object.value.is_none()
    }

    fn resolve_token(&mut self, key: &str) -> Result<(), ExecError> {
        let token = ring::resolve_token(key);
        if let Some(existing) = self.token {
            if existing != token {
                return Err(ExecError::Token(format!(
                    "Token conflict: {}!={}",
                    token, existing
                )));
            }
        }
        self.token = Some(token);
        Ok(())
    }

    fn storage(&mut self) -> Result<&mut dyn StorageTransaction, ExecError> {
        match self.storage {
            Some(ref mut storage) => Ok(&mut **storage),
            None => Err(ExecError::Storage("No storage transaction".to_owned())),
        }
    }

    async fn op_get_table(
        &mut self,
        name: &TransactionObject,
        destination: TransactionVariable,
        source: Option<TransactionVariable>,
    ) -> Result<(), ExecError> {
        let name_value = self.object_value(name)?;
        let table_name = match name_value.as_str() {
            Some(table_name) => table_name.to_owned(),
            None if self.dry_placeholder(name) => return Ok(()),
            None => return Err(ExecError::Type("Table name must be a string".to_owned())),
        };
        match source {
            None => match self.model.get_table(&table_name) {
                Some(table) => {
                    self.bind(
                        destination,
                        ServerValue::Table(TableRef {
                            table,
                            prefix: Vec::new(),
                        }),
                    );
                    Ok(())
                }
                None => Err(ExecError::Schema(format!(
                    "Couldn't find table named {}",
                    table_name
                ))),
            },
            Some(source) => match self.var(source) {
                ServerValue::Row(row) => match row.sub_table(&table_name) {
                    Some(table) => {
                        self.bind(destination, ServerValue::Table(table));
                        Ok(())
                    }
                    None => Err(ExecError::Schema(format!(
                        "Couldn't find table named {}",
                        table_name
                    ))),
                },
                _ if self.dry => Ok(()),
                _ => Err(ExecError::Type(
                    "Cannot execute getTable on that variable".to_owned(),
                )),
            },
        }
    }

    async fn op_get(
        &mut self,
        source: TransactionVariable,
        key: &TransactionObject,
        destination: TransactionVariable,
    ) -> Result<(), ExecError> {
        match self.var(source) {
            ServerValue::Table(table) => {
                let key_value = self.object_value(key)?;
                let key = match key_value.key_string() {
                    Some(key) => key,
                    None if self.dry_placeholder(key) => return Ok(()),
                    None => {
                        return Err(ExecError::Type(
                            "Cannot use that value as a key".to_owned(),
                        ))
                    }
                };
                if table.prefix.is_empty() {
                    self.resolve_token(&key)?;
                }
                // the row is pinned to this snapshot by fetching it
                // eagerly; the dry pass binds it unfetched
                let row = if self.dry {
                    None
                } else {
                    let keys = table.keys_with(&key);
                    self.storage()?
                        .get(&table.table, &keys)
                        .await
                        .map_err(|e| {
                            ExecError::Storage(format!("Couldn't get from storage: {}", e))
                        })?
                };
                self.bind(
                    destination,
                    ServerValue::Row(RowRef {
                        table: table.table,
                        prefix: table.prefix,
                        key,
                        row,
                    }),
                );
                Ok(())
            }
            _ if self.dry => Ok(()),
            _ => Err(ExecError::Type(
                "Cannot execute get on that variable".to_owned(),
            )),
        }
    }

    async fn op_set(
        &mut self,
        destination: TransactionVariable,
        key: &TransactionObject,
        value: &TransactionObject,
    ) -> Result<(), ExecError> {
        match self.var(destination) {
            ServerValue::Table(table) => {
                let key_value = self.object_value(key)?;
                let key = match key_value.key_string() {
                    Some(key) => key,
                    None if self.dry_placeholder(key) => return Ok(()),
                    None => {
                        return Err(ExecError::Type(
                            "Cannot use that value as a key".to_owned(),
                        ))
                    }
                };
                if table.prefix.is_empty() {
                    self.resolve_token(&key)?;
                }
                if !self.dry {
                    let mut map = self
                        .object_value(value)?
                        .into_map()
                        .ok_or_else(|| {
                            ExecError::Type("Can only store a map into table".to_owned())
                        })?;
                    strip_meta_keys(&mut map);
                    let bytes = Value::Map(map).encode_new();
                    let keys = table.keys_with(&key);
                    self.storage()?
                        .set(&table.table, &keys, bytes)
                        .await
                        .map_err(|e| {
                            ExecError::Storage(format!("Couldn't set value into table: {}", e))
                        })?;
                }
                Ok(())
            }
            _ if self.dry => Ok(()),
            _ => Err(ExecError::Type(
                "Cannot execute set on that variable".to_owned(),
            )),
        }
    }

    async fn op_get_all(
        &mut self,
        source: TransactionVariable,
        destination: TransactionVariable,
    ) -> Result<(), ExecError> {
        // a table delegates to a pending query over its prefix
        let source_value = match self.var(source) {
            ServerValue::Table(table) => {
                if table.prefix.is_empty() {
                    return Err(ExecError::Type(
                        "'getAll' not supported on top level tables".to_owned(),
                    ));
                }
                ServerValue::Query(table)
            }
            other => other,
        };
        match source_value {
            ServerValue::Query(table) => self.run_query(table, destination).await,
            _ if self.dry => Ok(()),
            _ => Err(ExecError::Type(
                "Cannot execute getAll on that variable".to_owned(),
            )),
        }
    }

    async fn run_query(
        &mut self,
        table: TableRef,
        destination: TransactionVariable,
    ) -> Result<(), ExecError> {
        if self.dry {
            return Ok(());
        }
        let query = StorageQuery {
            table: table.table.clone(),
            prefix: table.prefix.clone(),
            limit: None,
        };
        let mut iterator = self
            .storage()?
            .query(query)
            .await
            .map_err(|e| ExecError::Storage(format!("Couldn't get from storage: {}", e)))?;
        let mut values = Vec::new();
        loop {
            let row = iterator
                .next_row()
                .await
                .map_err(|e| ExecError::Storage(format!("Couldn't get from storage: {}", e)))?;
            let row = match row {
                Some(row) => row,
                None => break,
            };
            let value = Value::decode_all(&row.data)
                .map_err(|e| ExecError::Storage(format!("Couldn't unmarshall value: {}", e)))?;
            values.push(value);
        }
        self.bind(destination, ServerValue::Array(values));
        Ok(())
    }

    fn op_return(&mut self, data: &[TransactionObject]) -> Result<(), ExecError> {
        if self.dry {
            return Ok(());
        }
        let mut values = Vec::with_capacity(data.len());
        for object in data {
            values.push(self.object_value(object)?);
        }
        self.ret.data = values;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Model;

    fn model_with(path: &str) -> Model {
        let mut model = Model::new();
        model.create_table(path).unwrap();
        model
    }

    #[tokio::test]
    async fn dry_pass_resolves_the_token() {
        let model = model_with("t");
        let trx = Transaction::build_with_id(1, |b| {
            b.from("t").get("k1").ret();
        });
        let mut context = ExecContext::dry(&model);
        context.run(&trx).await;
        assert!(context.ret.error.is_none());
        assert_eq!(context.token, Some(crate::ring::resolve_token("k1")));
    }

    #[tokio::test]
    async fn dry_pass_reports_token_conflicts() {
        let model = model_with("t");
        let trx = Transaction::build_with_id(1, |b| {
            b.from("t").get("alpha");
            b.from("t").get("beta");
        });
        let mut context = ExecContext::dry(&model);
        context.run(&trx).await;
        let error = context.ret.error.unwrap();
        assert!(error.message.starts_with("Token conflict:"));
    }

    #[tokio::test]
    async fn missing_main_block_is_structural() {
        let model = Model::new();
        let trx = Transaction::default();
        let mut context = ExecContext::dry(&model);
        context.run(&trx).await;
        assert_eq!(
            context.ret.error.unwrap().message,
            "No main block defined"
        );
    }

    #[tokio::test]
    async fn missing_table_fails_in_the_dry_pass() {
        let model = model_with("t");
        let trx = Transaction::build_with_id(1, |b| {
            b.from("nope").get("k").ret();
        });
        let mut context = ExecContext::dry(&model);
        context.run(&trx).await;
        let error = context.ret.error.unwrap();
        assert!(error.message.contains("nope"));
    }

    #[tokio::test]
    async fn set_resolves_the_token_at_top_level() {
        let model = model_with("t");
        let trx = Transaction::build_with_id(1, |b| {
            b.into_table("t").set("k1", "ignored-in-dry");
        });
        let mut context = ExecContext::dry(&model);
        context.run(&trx).await;
        assert!(context.ret.error.is_none());
        assert_eq!(context.token, Some(crate::ring::resolve_token("k1")));
    }
}
