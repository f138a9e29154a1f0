// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! This module defines the timeline mutation messages consumed by
//! change-feed jobs.

use super::{
    decoder::{Decoder, WireDecoder},
    encoder::WireEncoder,
    value::Value,
};

/// A decoded row as published on a timeline feed.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JobRow {
    /// Insert timestamp in nanoseconds.
    pub timestamp: u64,
    /// First key component.
    pub key1: String,
    /// Second key component, empty when unused.
    pub key2: String,
    /// Third key component, empty when unused.
    pub key3: String,
    /// Fourth key component, empty when unused.
    pub key4: String,
    /// The decoded payload.
    pub data: Value,
}

/// A change to a logical key: the new row version and, when one
/// existed, the version it replaced.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JobRowMutation {
    /// The row version that was written.
    pub new: Option<JobRow>,
    /// The immediately preceding version, if any.
    pub old: Option<JobRow>,
}

impl WireEncoder for JobRow {
    fn encode(&self, buffer: &mut Vec<u8>) {
        self.timestamp.encode(buffer);
        self.key1.encode(buffer);
        self.key2.encode(buffer);
        self.key3.encode(buffer);
        self.key4.encode(buffer);
        self.data.encode(buffer);
    }
}

impl WireDecoder for JobRow {
    fn decode(decoder: &mut Decoder) -> anyhow::Result<Self> {
        Ok(JobRow {
            timestamp: decoder.read_u64()?,
            key1: decoder.read_string()?,
            key2: decoder.read_string()?,
            key3: decoder.read_string()?,
            key4: decoder.read_string()?,
            data: Value::decode(decoder)?,
        })
    }
}

impl WireEncoder for JobRowMutation {
    fn encode(&self, buffer: &mut Vec<u8>) {
        self.new.encode(buffer);
        self.old.encode(buffer);
    }
}

impl WireDecoder for JobRowMutation {
    fn decode(decoder: &mut Decoder) -> anyhow::Result<Self> {
        Ok(JobRowMutation {
            new: decoder.read_option()?,
            old: decoder.read_option()?,
        })
    }
}
