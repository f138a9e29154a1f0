// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! This module defines the server-side values bound to plan
//! variables during interpretation. Each variant declares which of
//! the operation capabilities it supports; the interpreter matches
//! on the variant instead of downcasting.

use super::ExecError;
use crate::{
    model::Table,
    storage::Row,
    wire::{Value, WireDecoder},
};
use std::sync::Arc;

/// The meta key carrying the row insert timestamp on reads.
pub const META_TIMESTAMP: &str = "_timestamp";
/// The meta keys carrying the row key components on reads.
pub const META_KEYS: [&str; 4] = ["_key1", "_key2", "_key3", "_key4"];

/// Strip the reserved meta keys off a payload map before it is
/// stored; they are re-injected on read and never part of user data.
pub fn strip_meta_keys(map: &mut std::collections::HashMap<String, Value>) {
    map.remove(META_TIMESTAMP);
    for key in &META_KEYS {
        map.remove(*key);
    }
}

/// A table bound to a variable, optionally positioned under the row
/// keys of its ancestors.
#[derive(Debug, Clone)]
pub struct TableRef {
    /// The model table.
    pub table: Arc<Table>,
    /// The ancestor row keys; empty for a top-level table.
    pub prefix: Vec<String>,
}

impl TableRef {
    /// The full component list addressing `key` under this table.
    pub fn keys_with(&self, key: &str) -> Vec<String> {
        let mut keys = self.prefix.clone();
        keys.push(key.to_owned());
        keys
    }
}

/// A row bound to a variable. The real pass fetches the row eagerly
/// so later reads stay stable at the transaction snapshot.
#[derive(Debug, Clone)]
pub struct RowRef {
    /// The table the row was read from.
    pub table: Arc<Table>,
    /// The ancestor row keys of the table.
    pub prefix: Vec<String>,
    /// The row key within the table.
    pub key: String,
    /// The fetched row; `None` when absent or during the dry pass.
    pub row: Option<Row>,
}

impl RowRef {
    /// Decode the row into a map value with the meta keys injected;
    /// nil when no row exists.
    pub fn to_value(&self) -> Result<Value, ExecError> {
        let row = match &self.row {
            Some(row) => row,
            None => return Ok(Value::Nil),
        };
        let decoded = Value::decode_all(&row.data)
            .map_err(|e| ExecError::Storage(format!("Couldn't unmarshall value: {}", e)))?;
        let mut map = decoded
            .into_map()
            .ok_or_else(|| ExecError::Storage("Couldn't unmarshall value: not a map".to_owned()))?;
        map.insert(META_TIMESTAMP.to_owned(), Value::Int(row.timestamp));
        for (meta, component) in META_KEYS.iter().zip(row.keys().iter()) {
            map.insert((*meta).to_owned(), Value::String((*component).to_owned()));
        }
        Ok(Value::Map(map))
    }

    /// Navigate to the named sub-table; its prefix is this row's
    /// position.
    pub fn sub_table(&self, name: &str) -> Option<TableRef> {
        self.table.sub_table(name).map(|table| TableRef {
            table,
            prefix: self.keys(),
        })
    }

    fn keys(&self) -> Vec<String> {
        let mut keys = self.prefix.clone();
        keys.push(self.key.clone());
        keys
    }
}

/// A value bound to a server-side variable.
#[derive(Debug, Clone)]
pub enum ServerValue {
    /// The placeholder value; every capability is refused.
    Nil,
    /// A string; only convertible back to a value.
    Str(String),
    /// An integer; only convertible back to a value.
    Int(i64),
    /// A map; only convertible back to a value.
    Map(std::collections::HashMap<String, Value>),
    /// An array; only convertible back to a value.
    Array(Vec<Value>),
    /// A table; supports `get`, `set` and, under a prefix, `getAll`.
    Table(TableRef),
    /// A row; supports `getTable` and conversion to a value.
    Row(RowRef),
    /// A pending prefix scan; supports `getAll`.
    Query(TableRef),
}

impl ServerValue {
    /// Bind a plain value to a variable.
    pub fn from_value(value: Value) -> ServerValue {
        match value {
            Value::String(s) => ServerValue::Str(s),
            Value::Int(i) => ServerValue::Int(i),
            Value::Map(m) => ServerValue::Map(m),
            Value::Array(a) => ServerValue::Array(a),
            _ => ServerValue::Nil,
        }
    }

    /// Convert back to a plain value for returns and object
    /// evaluation.
    pub fn to_value(&self) -> Result<Value, ExecError> {
        Ok(match self {
            ServerValue::Nil => Value::Nil,
            ServerValue::Str(s) => Value::String(s.clone()),
            ServerValue::Int(i) => Value::Int(*i),
            ServerValue::Map(m) => Value::Map(m.clone()),
            ServerValue::Array(a) => Value::Array(a.clone()),
            ServerValue::Table(table) => Value::String(format!("TABLE {}", table.table.name())),
            ServerValue::Row(row) => row.to_value()?,
            ServerValue::Query(_) => Value::Nil,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::WireEncoder;
    use maplit::hashmap;

    #[test]
    fn from_value_wraps_supported_primitives() {
        assert!(matches!(
            ServerValue::from_value(Value::from("s")),
            ServerValue::Str(_)
        ));
        assert!(matches!(
            ServerValue::from_value(Value::from(3i64)),
            ServerValue::Int(3)
        ));
        assert!(matches!(
            ServerValue::from_value(Value::Map(hashmap! {})),
            ServerValue::Map(_)
        ));
        assert!(matches!(
            ServerValue::from_value(Value::Array(vec![])),
            ServerValue::Array(_)
        ));
        assert!(matches!(
            ServerValue::from_value(Value::Nil),
            ServerValue::Nil
        ));
    }

    #[test]
    fn primitive_values_round_trip() {
        for value in vec![
            Value::from("s"),
            Value::from(3i64),
            Value::Map(hashmap! { "a".to_owned() => Value::from(1i64) }),
            Value::Array(vec![Value::from(false)]),
            Value::Nil,
        ] {
            assert_eq!(
                ServerValue::from_value(value.clone()).to_value().unwrap(),
                value
            );
        }
    }

    #[test]
    fn row_value_injects_meta_keys() {
        let payload = Value::Map(hashmap! { "a".to_owned() => Value::from(1i64) });
        let mut model = crate::model::Model::new();
        let table = model.create_table("t").unwrap();
        let mut row = Row {
            timestamp: 7,
            data: payload.encode_new(),
            ..Row::default()
        };
        row.set_keys(&["k".to_owned()]);
        let row_ref = RowRef {
            table,
            prefix: vec![],
            key: "k".to_owned(),
            row: Some(row),
        };
        let value = row_ref.to_value().unwrap();
        let map = value.as_map().unwrap();
        assert_eq!(map["a"], Value::Int(1));
        assert_eq!(map[META_TIMESTAMP], Value::Int(7));
        assert_eq!(map["_key1"], Value::from("k"));
        assert_eq!(map["_key2"], Value::from(""));
    }

    #[test]
    fn missing_row_converts_to_nil() {
        let mut model = crate::model::Model::new();
        let table = model.create_table("t").unwrap();
        let row_ref = RowRef {
            table,
            prefix: vec![],
            key: "k".to_owned(),
            row: None,
        };
        assert_eq!(row_ref.to_value().unwrap(), Value::Nil);
    }

    #[test]
    fn meta_keys_are_stripped_before_store() {
        let mut map = hashmap! {
            "a".to_owned() => Value::from(1i64),
            META_TIMESTAMP.to_owned() => Value::from(9i64),
            "_key1".to_owned() => Value::from("x"),
        };
        strip_meta_keys(&mut map);
        assert_eq!(map.len(), 1);
        assert!(map.contains_key("a"));
    }
}
