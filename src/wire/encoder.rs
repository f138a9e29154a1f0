// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! This module implements the wire encoder.

use super::value::Value;

/// The wire encoder; every field is appended big-endian, strings and
/// byte strings carry an `i32` length prefix, collections an `i32`
/// entry count.
pub trait WireEncoder {
    /// Encode into the buffer.
    fn encode(&self, buffer: &mut Vec<u8>);
    /// Encode into a fresh buffer.
    fn encode_new(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        self.encode(&mut buffer);
        buffer
    }
}

impl WireEncoder for u8 {
    fn encode(&self, buffer: &mut Vec<u8>) {
        buffer.push(*self);
    }
}

impl WireEncoder for bool {
    fn encode(&self, buffer: &mut Vec<u8>) {
        buffer.push(*self as u8);
    }
}

impl WireEncoder for u32 {
    fn encode(&self, buffer: &mut Vec<u8>) {
        buffer.extend(&u32::to_be_bytes(*self));
    }
}

impl WireEncoder for i32 {
    fn encode(&self, buffer: &mut Vec<u8>) {
        buffer.extend(&i32::to_be_bytes(*self));
    }
}

impl WireEncoder for u64 {
    fn encode(&self, buffer: &mut Vec<u8>) {
        buffer.extend(&u64::to_be_bytes(*self));
    }
}

impl WireEncoder for i64 {
    fn encode(&self, buffer: &mut Vec<u8>) {
        buffer.extend(&i64::to_be_bytes(*self));
    }
}

impl WireEncoder for f64 {
    fn encode(&self, buffer: &mut Vec<u8>) {
        buffer.extend(&f64::to_be_bytes(*self));
    }
}

impl WireEncoder for str {
    fn encode(&self, buffer: &mut Vec<u8>) {
        buffer.extend(&i32::to_be_bytes(self.len() as i32));
        buffer.extend(self.bytes());
    }
}

impl WireEncoder for String {
    fn encode(&self, buffer: &mut Vec<u8>) {
        self.as_str().encode(buffer);
    }
}

impl WireEncoder for [u8] {
    fn encode(&self, buffer: &mut Vec<u8>) {
        buffer.extend(&i32::to_be_bytes(self.len() as i32));
        buffer.extend(self);
    }
}

impl<T> WireEncoder for Option<T>
where
    T: WireEncoder,
{
    fn encode(&self, buffer: &mut Vec<u8>) {
        match self {
            Some(inner) => {
                buffer.push(1);
                inner.encode(buffer);
            }
            None => buffer.push(0),
        }
    }
}

impl<T> WireEncoder for Vec<T>
where
    T: WireEncoder,
{
    fn encode(&self, buffer: &mut Vec<u8>) {
        buffer.extend(&i32::to_be_bytes(self.len() as i32));
        for element in self {
            element.encode(buffer);
        }
    }
}

impl WireEncoder for Value {
    fn encode(&self, buffer: &mut Vec<u8>) {
        buffer.push(self.tag() as u8);
        match self {
            Value::Nil => (),
            Value::Int(i) => i.encode(buffer),
            Value::Bool(b) => b.encode(buffer),
            Value::Double(d) => d.encode(buffer),
            Value::String(s) => s.encode(buffer),
            Value::Bytes(b) => b.as_slice().encode(buffer),
            // both collections share the entry layout: a key-presence
            // byte, the key when present, then the value
            Value::Map(m) => {
                buffer.extend(&i32::to_be_bytes(m.len() as i32));
                for (key, value) in m {
                    buffer.push(1);
                    key.encode(buffer);
                    value.encode(buffer);
                }
            }
            Value::Array(a) => {
                buffer.extend(&i32::to_be_bytes(a.len() as i32));
                for value in a {
                    buffer.push(0);
                    value.encode(buffer);
                }
            }
        }
    }
}
