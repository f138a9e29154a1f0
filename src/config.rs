// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! This module defines the host configuration. Cluster membership
//! and storage credentials stay with the host; the engine only needs
//! its service name, where to listen, and which timelines to feed.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::Path};

/// The engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    /// The cluster service name the engine registers under.
    pub service_name: String,
    /// Where to bind the execute routes; `None` for an embedded,
    /// in-process engine.
    #[serde(default)]
    pub listen_address: Option<SocketAddr>,
    /// The timeline feeders to start.
    #[serde(default)]
    pub feeders: Vec<FeederConfig>,
}

/// One timeline feeder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeederConfig {
    /// The `/`-separated path of the fed table.
    pub table: String,
    /// The timestamp to start feeding from.
    #[serde(default)]
    pub from_time: i64,
}

impl DbConfig {
    /// Load a configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("couldn't read config file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("couldn't parse config file {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_parses() {
        let config: DbConfig = serde_json::from_str(r#"{ "service_name": "mry" }"#).unwrap();
        assert_eq!(config.service_name, "mry");
        assert!(config.listen_address.is_none());
        assert!(config.feeders.is_empty());
    }

    #[test]
    fn feeders_parse_with_defaults() {
        let config: DbConfig = serde_json::from_str(
            r#"{
                "service_name": "mry",
                "listen_address": "127.0.0.1:7401",
                "feeders": [{ "table": "users/posts" }, { "table": "users", "from_time": 12 }]
            }"#,
        )
        .unwrap();
        assert_eq!(config.feeders.len(), 2);
        assert_eq!(config.feeders[0].from_time, 0);
        assert_eq!(config.feeders[1].from_time, 12);
        assert!(config.listen_address.is_some());
    }
}
