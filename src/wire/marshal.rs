// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! This module defines the named marshallers registered on the
//! cluster protocol.

use super::{
    decoder::WireDecoder,
    encoder::WireEncoder,
    mutation::JobRowMutation,
};
use crate::transaction::Transaction;

/// A named codec for one message type streamed over the cluster
/// protocol. The name travels in the frame header so peers pick the
/// matching unmarshaller.
pub trait Marshaller {
    /// The message this marshaller carries.
    type Message;
    /// The registered marshaller name.
    const NAME: &'static str;
    /// Marshal a message to bytes.
    fn marshal(message: &Self::Message) -> Vec<u8>;
    /// Unmarshal a message from bytes.
    fn unmarshal(bytes: &[u8]) -> anyhow::Result<Self::Message>;
}

/// Marshaller for transaction plans.
pub struct TransactionMarshaller;

impl Marshaller for TransactionMarshaller {
    type Message = Transaction;
    const NAME: &'static str = "mrytrx";

    fn marshal(message: &Transaction) -> Vec<u8> {
        message.encode_new()
    }

    fn unmarshal(bytes: &[u8]) -> anyhow::Result<Transaction> {
        Transaction::decode_all(bytes)
    }
}

/// Marshaller for timeline mutations.
pub struct MutationMarshaller;

impl Marshaller for MutationMarshaller {
    type Message = JobRowMutation;
    const NAME: &'static str = "mrymut";

    fn marshal(message: &JobRowMutation) -> Vec<u8> {
        message.encode_new()
    }

    fn unmarshal(bytes: &[u8]) -> anyhow::Result<JobRowMutation> {
        JobRowMutation::decode_all(bytes)
    }
}
