// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! This module resolves partition tokens. The cluster substrate maps
//! token ranges to owning nodes; the engine only derives and compares
//! tokens.

/// The partition token of a top-level key.
pub type Token = i64;

/// Resolve the partition token of a top-level key: the first eight
/// bytes of the key's md5 digest, big-endian. Stable across nodes and
/// processes.
pub fn resolve_token(key: &str) -> Token {
    let digest = md5::compute(key.as_bytes());
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_deterministic() {
        assert_eq!(resolve_token("alpha"), resolve_token("alpha"));
        assert_ne!(resolve_token("alpha"), resolve_token("beta"));
    }

    #[test]
    fn token_ignores_process_state() {
        // md5("") = d41d8cd98f00b204e9800998ecf8427e
        assert_eq!(resolve_token(""), i64::from_be_bytes([0xd4, 0x1d, 0x8c, 0xd9, 0x8f, 0x00, 0xb2, 0x04]));
    }
}
