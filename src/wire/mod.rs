// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! This module implements the wire layer: the tagged value type, the
//! length-delimited binary codec, and the named marshallers exchanged
//! over the cluster protocol.

pub mod decoder;
pub mod encoder;
pub mod marshal;
pub mod mutation;
pub mod value;

pub use decoder::{Decoder, WireDecoder};
pub use encoder::WireEncoder;
pub use marshal::{Marshaller, MutationMarshaller, TransactionMarshaller};
pub use mutation::{JobRow, JobRowMutation};
pub use value::{Value, ValueTag};
