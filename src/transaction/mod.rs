// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! This module defines the transaction plan: the serializable
//! data-flow program a client submits and the engine interprets.

use crate::wire::{Decoder, Value, WireDecoder, WireEncoder};
use anyhow::anyhow;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

pub mod builder;

pub use builder::{BlockBuilder, BlockVariable, IntoObject};

/// The operation code prefixing every encoded operation.
#[derive(Debug, Copy, Clone, PartialEq, FromPrimitive)]
#[repr(u8)]
pub enum Opcode {
    /// Materialize a table.
    GetTable = 1,
    /// Read a row.
    Get = 2,
    /// Write a row.
    Set = 3,
    /// Read the latest version of every row under a prefix.
    GetAll = 4,
    /// Terminate the block and yield data.
    Return = 5,
}

/// A transaction plan: an id, the blocks to interpret, and the
/// return slot the server populates before replying.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Transaction {
    /// The plan id; doubles as the storage timestamp in nanoseconds.
    pub id: u64,
    /// The structured return, populated server-side.
    pub ret: Option<TransactionReturn>,
    /// The blocks; exactly one has no parent.
    pub blocks: Vec<TransactionBlock>,
}

/// A linearly executed list of operations with a local variable
/// scope.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TransactionBlock {
    /// The block id, unique within the plan.
    pub id: u32,
    /// The parent block id; the main block has none.
    pub parent: Option<u32>,
    /// The variables scoped to this block.
    pub variables: Vec<TransactionVariable>,
    /// The operations, executed in order.
    pub operations: Vec<TransactionOperation>,
}

/// A block-scoped variable, addressed by `(block, id)`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct TransactionVariable {
    /// The variable id, unique within its block.
    pub id: u32,
    /// The owning block id.
    pub block: u32,
}

/// Either an inline value or a variable reference.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TransactionObject {
    /// The inline value, if any.
    pub value: Option<Value>,
    /// The variable reference, if any.
    pub variable: Option<TransactionVariable>,
}

impl TransactionObject {
    /// Wrap an inline value.
    pub fn from_value(value: Value) -> Self {
        TransactionObject {
            value: Some(value),
            variable: None,
        }
    }
    /// Wrap a variable reference.
    pub fn from_variable(variable: TransactionVariable) -> Self {
        TransactionObject {
            value: None,
            variable: Some(variable),
        }
    }
}

/// One step of a transaction plan.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionOperation {
    /// Materialize a table, either top-level or in relation to a row.
    GetTable {
        /// The table name.
        name: TransactionObject,
        /// The variable receiving the table.
        destination: TransactionVariable,
        /// The row variable to navigate from, if any.
        source: Option<TransactionVariable>,
    },
    /// Read a row out of the source variable.
    Get {
        /// The variable read from.
        source: TransactionVariable,
        /// The row key.
        key: TransactionObject,
        /// The variable receiving the row.
        destination: TransactionVariable,
    },
    /// Write a value under a key of the destination variable.
    Set {
        /// The variable written to.
        destination: TransactionVariable,
        /// The row key.
        key: TransactionObject,
        /// The value to store.
        value: TransactionObject,
    },
    /// Read the latest version of every row under the source.
    GetAll {
        /// The variable read from.
        source: TransactionVariable,
        /// The variable receiving the array.
        destination: TransactionVariable,
    },
    /// Terminate the block, yielding the listed objects.
    Return {
        /// The objects to yield.
        data: Vec<TransactionObject>,
    },
}

impl TransactionOperation {
    /// Get the opcode of this operation.
    pub fn opcode(&self) -> Opcode {
        match self {
            TransactionOperation::GetTable { .. } => Opcode::GetTable,
            TransactionOperation::Get { .. } => Opcode::Get,
            TransactionOperation::Set { .. } => Opcode::Set,
            TransactionOperation::GetAll { .. } => Opcode::GetAll,
            TransactionOperation::Return { .. } => Opcode::Return,
        }
    }
}

/// A structured execution failure.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TransactionError {
    /// The error kind id.
    pub id: u32,
    /// The error message.
    pub message: String,
}

/// The structured return of an executed plan.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TransactionReturn {
    /// The failure, if execution failed.
    pub error: Option<TransactionError>,
    /// The yielded values; empty on failure.
    pub data: Vec<Value>,
}

impl TransactionReturn {
    /// Get the yielded values.
    pub fn all(&self) -> &[Value] {
        &self.data
    }
    /// Get the first yielded value, if any.
    pub fn first(&self) -> Option<&Value> {
        self.data.first()
    }
}

impl Transaction {
    /// Find the main block: the unique block without a parent.
    pub fn main_block(&self) -> Option<&TransactionBlock> {
        self.blocks.iter().find(|block| block.parent.is_none())
    }
}

impl WireEncoder for TransactionVariable {
    fn encode(&self, buffer: &mut Vec<u8>) {
        self.id.encode(buffer);
        self.block.encode(buffer);
    }
}

impl WireDecoder for TransactionVariable {
    fn decode(decoder: &mut Decoder) -> anyhow::Result<Self> {
        Ok(TransactionVariable {
            id: decoder.read_u32()?,
            block: decoder.read_u32()?,
        })
    }
}

impl WireEncoder for TransactionObject {
    fn encode(&self, buffer: &mut Vec<u8>) {
        self.value.encode(buffer);
        self.variable.encode(buffer);
    }
}

impl WireDecoder for TransactionObject {
    fn decode(decoder: &mut Decoder) -> anyhow::Result<Self> {
        Ok(TransactionObject {
            value: decoder.read_option()?,
            variable: decoder.read_option()?,
        })
    }
}

impl WireEncoder for TransactionOperation {
    fn encode(&self, buffer: &mut Vec<u8>) {
        buffer.push(self.opcode() as u8);
        match self {
            TransactionOperation::GetTable {
                name,
                destination,
                source,
            } => {
                name.encode(buffer);
                destination.encode(buffer);
                source.encode(buffer);
            }
            TransactionOperation::Get {
                source,
                key,
                destination,
            } => {
                source.encode(buffer);
                key.encode(buffer);
                destination.encode(buffer);
            }
            TransactionOperation::Set {
                destination,
                key,
                value,
            } => {
                destination.encode(buffer);
                key.encode(buffer);
                value.encode(buffer);
            }
            TransactionOperation::GetAll { source, destination } => {
                source.encode(buffer);
                destination.encode(buffer);
            }
            TransactionOperation::Return { data } => {
                data.encode(buffer);
            }
        }
    }
}

impl WireDecoder for TransactionOperation {
    fn decode(decoder: &mut Decoder) -> anyhow::Result<Self> {
        let raw = decoder.read_u8()?;
        let opcode = Opcode::from_u8(raw).ok_or_else(|| anyhow!("unknown opcode {}", raw))?;
        Ok(match opcode {
            Opcode::GetTable => TransactionOperation::GetTable {
                name: TransactionObject::decode(decoder)?,
                destination: TransactionVariable::decode(decoder)?,
                source: decoder.read_option()?,
            },
            Opcode::Get => TransactionOperation::Get {
                source: TransactionVariable::decode(decoder)?,
                key: TransactionObject::decode(decoder)?,
                destination: TransactionVariable::decode(decoder)?,
            },
            Opcode::Set => TransactionOperation::Set {
                destination: TransactionVariable::decode(decoder)?,
                key: TransactionObject::decode(decoder)?,
                value: TransactionObject::decode(decoder)?,
            },
            Opcode::GetAll => TransactionOperation::GetAll {
                source: TransactionVariable::decode(decoder)?,
                destination: TransactionVariable::decode(decoder)?,
            },
            Opcode::Return => TransactionOperation::Return {
                data: decoder.read_list()?,
            },
        })
    }
}

impl WireEncoder for TransactionBlock {
    fn encode(&self, buffer: &mut Vec<u8>) {
        self.id.encode(buffer);
        self.parent.encode(buffer);
        self.variables.encode(buffer);
        self.operations.encode(buffer);
    }
}

impl WireDecoder for TransactionBlock {
    fn decode(decoder: &mut Decoder) -> anyhow::Result<Self> {
        Ok(TransactionBlock {
            id: decoder.read_u32()?,
            parent: if decoder.read_presence()? {
                Some(decoder.read_u32()?)
            } else {
                None
            },
            variables: decoder.read_list()?,
            operations: decoder.read_list()?,
        })
    }
}

impl WireEncoder for TransactionError {
    fn encode(&self, buffer: &mut Vec<u8>) {
        self.id.encode(buffer);
        self.message.encode(buffer);
    }
}

impl WireDecoder for TransactionError {
    fn decode(decoder: &mut Decoder) -> anyhow::Result<Self> {
        Ok(TransactionError {
            id: decoder.read_u32()?,
            message: decoder.read_string()?,
        })
    }
}

impl WireEncoder for TransactionReturn {
    fn encode(&self, buffer: &mut Vec<u8>) {
        self.error.encode(buffer);
        self.data.encode(buffer);
    }
}

impl WireDecoder for TransactionReturn {
    fn decode(decoder: &mut Decoder) -> anyhow::Result<Self> {
        Ok(TransactionReturn {
            error: decoder.read_option()?,
            data: decoder.read_list()?,
        })
    }
}

impl WireEncoder for Transaction {
    fn encode(&self, buffer: &mut Vec<u8>) {
        self.id.encode(buffer);
        self.ret.encode(buffer);
        self.blocks.encode(buffer);
    }
}

impl WireDecoder for Transaction {
    fn decode(decoder: &mut Decoder) -> anyhow::Result<Self> {
        Ok(Transaction {
            id: decoder.read_u64()?,
            ret: decoder.read_option()?,
            blocks: decoder.read_list()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{Marshaller, TransactionMarshaller};
    use maplit::hashmap;

    #[test]
    fn plan_round_trip() {
        let trx = Transaction::build(|b| {
            let row = b.from("users").get("u1");
            row.rel("posts").set("p1", Value::Map(hashmap! {
                "title".to_owned() => Value::from("hello"),
            }));
            row.ret();
        });
        let bytes = TransactionMarshaller::marshal(&trx);
        let decoded = TransactionMarshaller::unmarshal(&bytes).unwrap();
        assert_eq!(trx, decoded);
    }

    #[test]
    fn return_round_trip() {
        let trx = Transaction {
            id: 42,
            ret: Some(TransactionReturn {
                error: Some(TransactionError {
                    id: 0,
                    message: "Token conflict: 1!=2".to_owned(),
                }),
                data: vec![Value::from(7i64), Value::Nil],
            }),
            blocks: vec![],
        };
        let bytes = TransactionMarshaller::marshal(&trx);
        assert_eq!(TransactionMarshaller::unmarshal(&bytes).unwrap(), trx);
    }

    #[test]
    fn main_block_is_the_parentless_one() {
        let trx = Transaction::build(|b| {
            b.from("t");
        });
        assert_eq!(trx.main_block().map(|b| b.id), Some(0));
        assert_eq!(trx.blocks.len(), 1);
    }
}
