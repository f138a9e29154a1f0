// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! This module implements the wire decoder.

use super::value::{Value, ValueTag};
use anyhow::{anyhow, bail, ensure};
use num_traits::FromPrimitive;
use std::collections::HashMap;
use std::convert::TryInto;

/// A cursor over an encoded buffer with typed read methods.
pub struct Decoder<'a> {
    buffer: &'a [u8],
    cursor: usize,
}

/// A message that can be decoded off a wire buffer.
pub trait WireDecoder: Sized {
    /// Decode one message at the decoder's cursor.
    fn decode(decoder: &mut Decoder) -> anyhow::Result<Self>;
    /// Decode a buffer expected to hold exactly one message.
    fn decode_all(buffer: &[u8]) -> anyhow::Result<Self> {
        let mut decoder = Decoder::new(buffer);
        let message = Self::decode(&mut decoder)?;
        ensure!(
            decoder.remaining() == 0,
            "{} trailing bytes after message",
            decoder.remaining()
        );
        Ok(message)
    }
}

impl<'a> Decoder<'a> {
    /// Create a decoder over the buffer.
    pub fn new(buffer: &'a [u8]) -> Self {
        Decoder { buffer, cursor: 0 }
    }
    /// The number of bytes left to decode.
    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.cursor
    }
    fn advance(&mut self, len: usize) -> anyhow::Result<&'a [u8]> {
        ensure!(
            self.remaining() >= len,
            "buffer underrun: need {} bytes, {} remaining",
            len,
            self.remaining()
        );
        let slice = &self.buffer[self.cursor..self.cursor + len];
        self.cursor += len;
        Ok(slice)
    }
    /// Read one byte.
    pub fn read_u8(&mut self) -> anyhow::Result<u8> {
        Ok(self.advance(1)?[0])
    }
    /// Read a presence byte.
    pub fn read_presence(&mut self) -> anyhow::Result<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => bail!("invalid presence byte {}", other),
        }
    }
    /// Read a big-endian `u32`.
    pub fn read_u32(&mut self) -> anyhow::Result<u32> {
        Ok(u32::from_be_bytes(self.advance(4)?.try_into()?))
    }
    /// Read a big-endian `i32`.
    pub fn read_i32(&mut self) -> anyhow::Result<i32> {
        Ok(i32::from_be_bytes(self.advance(4)?.try_into()?))
    }
    /// Read a big-endian `u64`.
    pub fn read_u64(&mut self) -> anyhow::Result<u64> {
        Ok(u64::from_be_bytes(self.advance(8)?.try_into()?))
    }
    /// Read a big-endian `i64`.
    pub fn read_i64(&mut self) -> anyhow::Result<i64> {
        Ok(i64::from_be_bytes(self.advance(8)?.try_into()?))
    }
    /// Read a big-endian `f64`.
    pub fn read_f64(&mut self) -> anyhow::Result<f64> {
        Ok(f64::from_be_bytes(self.advance(8)?.try_into()?))
    }
    /// Read an `i32`-prefixed byte string.
    pub fn read_byte_string(&mut self) -> anyhow::Result<Vec<u8>> {
        let len = self.read_i32()?;
        ensure!(len >= 0, "negative byte string length {}", len);
        Ok(self.advance(len as usize)?.to_vec())
    }
    /// Read an `i32`-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> anyhow::Result<String> {
        let bytes = self.read_byte_string()?;
        String::from_utf8(bytes).map_err(|e| anyhow!("invalid utf-8 string: {}", e))
    }
    /// Read an `i32` collection count.
    pub fn read_count(&mut self) -> anyhow::Result<usize> {
        let count = self.read_i32()?;
        ensure!(count >= 0, "negative collection count {}", count);
        Ok(count as usize)
    }
    /// Read an optional message behind a presence byte.
    pub fn read_option<T: WireDecoder>(&mut self) -> anyhow::Result<Option<T>> {
        if self.read_presence()? {
            Ok(Some(T::decode(self)?))
        } else {
            Ok(None)
        }
    }
    /// Read an `i32`-counted list of messages.
    pub fn read_list<T: WireDecoder>(&mut self) -> anyhow::Result<Vec<T>> {
        let count = self.read_count()?;
        let mut list = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            list.push(T::decode(self)?);
        }
        Ok(list)
    }
}

impl WireDecoder for Value {
    fn decode(decoder: &mut Decoder) -> anyhow::Result<Self> {
        let raw = decoder.read_u8()?;
        let tag = ValueTag::from_u8(raw).ok_or_else(|| anyhow!("unknown value tag {}", raw))?;
        Ok(match tag {
            ValueTag::Nil => Value::Nil,
            ValueTag::Int => Value::Int(decoder.read_i64()?),
            ValueTag::Bool => Value::Bool(decoder.read_presence()?),
            ValueTag::Double => Value::Double(decoder.read_f64()?),
            ValueTag::String => Value::String(decoder.read_string()?),
            ValueTag::Bytes => Value::Bytes(decoder.read_byte_string()?),
            ValueTag::Map => {
                let count = decoder.read_count()?;
                let mut map = HashMap::with_capacity(count.min(1024));
                for _ in 0..count {
                    ensure!(decoder.read_presence()?, "map entry without a key");
                    let key = decoder.read_string()?;
                    map.insert(key, Value::decode(decoder)?);
                }
                Value::Map(map)
            }
            ValueTag::Array => {
                let count = decoder.read_count()?;
                let mut array = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    ensure!(!decoder.read_presence()?, "array entry with a key");
                    array.push(Value::decode(decoder)?);
                }
                Value::Array(array)
            }
        })
    }
}
