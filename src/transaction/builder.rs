// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! This module implements the client-side plan builder: a fluent
//! surface that appends operations to the main block and hands back
//! variable handles for chaining.

use super::{
    Transaction, TransactionBlock, TransactionObject, TransactionOperation, TransactionVariable,
};
use crate::wire::Value;
use std::{
    cell::RefCell,
    rc::Rc,
    time::{SystemTime, UNIX_EPOCH},
};

/// Anything that can travel as a plan object: an inline value or a
/// variable handle.
pub trait IntoObject {
    /// Convert into a plan object.
    fn into_object(self) -> TransactionObject;
}

macro_rules! impl_into_object_via_value {
    ($($ty:ty),+) => {
        $(impl IntoObject for $ty {
            fn into_object(self) -> TransactionObject {
                TransactionObject::from_value(self.into())
            }
        })+
    };
}

impl_into_object_via_value!(
    &str,
    String,
    i32,
    i64,
    bool,
    f64,
    Vec<u8>,
    Vec<Value>,
    std::collections::HashMap<String, Value>,
    Value
);

impl IntoObject for &BlockVariable {
    fn into_object(self) -> TransactionObject {
        TransactionObject::from_variable(self.variable)
    }
}

impl IntoObject for BlockVariable {
    fn into_object(self) -> TransactionObject {
        TransactionObject::from_variable(self.variable)
    }
}

impl IntoObject for TransactionObject {
    fn into_object(self) -> TransactionObject {
        self
    }
}

/// The builder handle of the block under construction.
pub struct BlockBuilder {
    block: Rc<RefCell<TransactionBlock>>,
}

/// A handle on a block variable; every call appends one operation to
/// the owning block and yields the handle of its destination.
#[derive(Clone)]
pub struct BlockVariable {
    block: Rc<RefCell<TransactionBlock>>,
    variable: TransactionVariable,
}

fn new_variable(block: &Rc<RefCell<TransactionBlock>>) -> TransactionVariable {
    let mut inner = block.borrow_mut();
    let variable = TransactionVariable {
        id: inner.variables.len() as u32,
        block: inner.id,
    };
    inner.variables.push(variable);
    variable
}

fn push_operation(block: &Rc<RefCell<TransactionBlock>>, operation: TransactionOperation) {
    block.borrow_mut().operations.push(operation);
}

impl BlockBuilder {
    fn new(id: u32) -> Self {
        BlockBuilder {
            block: Rc::new(RefCell::new(TransactionBlock {
                id,
                parent: None,
                variables: Vec::new(),
                operations: Vec::new(),
            })),
        }
    }

    /// Materialize the named top-level table for reading.
    pub fn from(&mut self, name: impl IntoObject) -> BlockVariable {
        let variable = new_variable(&self.block);
        push_operation(
            &self.block,
            TransactionOperation::GetTable {
                name: name.into_object(),
                destination: variable,
                source: None,
            },
        );
        BlockVariable {
            block: self.block.clone(),
            variable,
        }
    }

    /// Materialize the named top-level table for writing; alias of
    /// [`from`](Self::from).
    pub fn into_table(&mut self, name: impl IntoObject) -> BlockVariable {
        self.from(name)
    }

    /// Terminate the block, yielding the given objects.
    pub fn ret(&mut self, data: Vec<TransactionObject>) -> BlockVariable {
        let variable = new_variable(&self.block);
        push_operation(&self.block, TransactionOperation::Return { data });
        BlockVariable {
            block: self.block.clone(),
            variable,
        }
    }
}

impl BlockVariable {
    /// Get the underlying plan variable.
    pub fn variable(&self) -> TransactionVariable {
        self.variable
    }

    fn next(&self) -> (TransactionVariable, BlockVariable) {
        let variable = new_variable(&self.block);
        (
            variable,
            BlockVariable {
                block: self.block.clone(),
                variable,
            },
        )
    }

    /// Materialize the named sub-table in relation to this row.
    pub fn rel(&self, name: impl IntoObject) -> BlockVariable {
        let (destination, handle) = self.next();
        push_operation(
            &self.block,
            TransactionOperation::GetTable {
                name: name.into_object(),
                destination,
                source: Some(self.variable),
            },
        );
        handle
    }

    /// Read the row under `key`.
    pub fn get(&self, key: impl IntoObject) -> BlockVariable {
        let (destination, handle) = self.next();
        push_operation(
            &self.block,
            TransactionOperation::Get {
                source: self.variable,
                key: key.into_object(),
                destination,
            },
        );
        handle
    }

    /// Write `value` under `key`.
    pub fn set(&self, key: impl IntoObject, value: impl IntoObject) -> BlockVariable {
        let (_, handle) = self.next();
        push_operation(
            &self.block,
            TransactionOperation::Set {
                destination: self.variable,
                key: key.into_object(),
                value: value.into_object(),
            },
        );
        handle
    }

    /// Read the latest version of every row under this prefix.
    pub fn get_all(&self) -> BlockVariable {
        let (destination, handle) = self.next();
        push_operation(
            &self.block,
            TransactionOperation::GetAll {
                source: self.variable,
                destination,
            },
        );
        handle
    }

    /// Terminate the block, yielding this variable.
    pub fn ret(&self) -> BlockVariable {
        let (_, handle) = self.next();
        push_operation(
            &self.block,
            TransactionOperation::Return {
                data: vec![TransactionObject::from_variable(self.variable)],
            },
        );
        handle
    }

    /// Reserved: accepted for forward compatibility, emits no
    /// operation.
    pub fn filter(&self, _predicate: impl IntoObject) -> BlockVariable {
        let (_, handle) = self.next();
        handle
    }

    /// Reserved: accepted for forward compatibility, emits no
    /// operation.
    pub fn order(&self, _field: impl IntoObject) -> BlockVariable {
        let (_, handle) = self.next();
        handle
    }
}

fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as u64)
        .unwrap_or_default()
}

impl Transaction {
    /// Build a plan with an id derived from the current time in
    /// nanoseconds; the id doubles as the storage timestamp.
    pub fn build<F>(assemble: F) -> Transaction
    where
        F: FnOnce(&mut BlockBuilder),
    {
        Self::build_with_id(now_nanos(), assemble)
    }

    /// Build a plan with an explicit id. Ids should be unique per
    /// submission; replays are not deduplicated.
    pub fn build_with_id<F>(id: u64, assemble: F) -> Transaction
    where
        F: FnOnce(&mut BlockBuilder),
    {
        let mut builder = BlockBuilder::new(0);
        assemble(&mut builder);
        let block = builder.block.borrow().clone();
        Transaction {
            id,
            ret: None,
            blocks: vec![block],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_set_emits_get_table_then_set() {
        let trx = Transaction::build_with_id(1, |b| {
            b.from("t").set("k", "v");
        });
        let block = trx.main_block().unwrap();
        assert_eq!(block.operations.len(), 2);
        assert!(matches!(
            block.operations[0],
            TransactionOperation::GetTable { source: None, .. }
        ));
        match &block.operations[1] {
            TransactionOperation::Set { destination, key, value } => {
                assert_eq!(*destination, block.variables[0]);
                assert_eq!(key.value, Some(Value::from("k")));
                assert_eq!(value.value, Some(Value::from("v")));
            }
            other => panic!("expected a set operation, got {:?}", other),
        }
    }

    #[test]
    fn variables_are_fresh_within_the_block() {
        let trx = Transaction::build_with_id(1, |b| {
            let row = b.from("t").get("k");
            row.ret();
        });
        let block = trx.main_block().unwrap();
        let ids: Vec<u32> = block.variables.iter().map(|v| v.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert!(block.variables.iter().all(|v| v.block == block.id));
    }

    #[test]
    fn filter_and_order_emit_nothing() {
        let trx = Transaction::build_with_id(1, |b| {
            b.from("t").get_all().filter("f").order("o");
        });
        let block = trx.main_block().unwrap();
        assert_eq!(block.operations.len(), 2);
        // placeholders still allocate fresh variables
        assert_eq!(block.variables.len(), 4);
    }

    #[test]
    fn variable_reference_travels_as_object() {
        let trx = Transaction::build_with_id(1, |b| {
            let row = b.from("t").get("k");
            b.ret(vec![(&row).into_object(), 12i64.into_object()]);
        });
        let block = trx.main_block().unwrap();
        match block.operations.last().unwrap() {
            TransactionOperation::Return { data } => {
                assert_eq!(data[0].variable, Some(block.variables[1]));
                assert_eq!(data[1].value, Some(Value::Int(12)));
            }
            other => panic!("expected a return operation, got {:?}", other),
        }
    }
}
