// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! This module implements the timeline feeder: a background task
//! draining a table's change timeline into a channel of decoded
//! mutations, for change-feed jobs to consume.

use crate::{
    config::FeederConfig,
    db::Db,
    model::Table,
    storage::Row,
    wire::{JobRow, JobRowMutation, Value, WireDecoder},
};
use anyhow::anyhow;
use log::{debug, error, info, warn};
use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time,
};

/// The number of mutations fetched per timeline batch.
const BATCH_SIZE: usize = 1000;
/// How long the feeder idles once the timeline is drained.
const IDLE_DELAY: Duration = Duration::from_secs(1);

/// A feeder over one table's timeline. Mutations are emitted in
/// timestamp order; the cursor advances past each emitted row, so a
/// restart with the last cursor resumes without replaying.
pub struct TimelineFeeder {
    db: Arc<Db>,
    table: String,
    from_time: i64,
}

/// A running feeder task.
pub struct FeederHandle {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl FeederHandle {
    /// Stop the feeder after its current batch.
    pub async fn stop(self) {
        self.stop.send(true).ok();
        self.handle.await.ok();
    }
}

impl TimelineFeeder {
    /// Create a feeder over `table`, starting at the beginning of
    /// time.
    pub fn new(db: Arc<Db>, table: impl Into<String>) -> Self {
        TimelineFeeder {
            db,
            table: table.into(),
            from_time: 0,
        }
    }

    /// Create a feeder from its host configuration.
    pub fn from_config(db: Arc<Db>, config: &FeederConfig) -> Self {
        Self::new(db, config.table.as_str()).from_time(config.from_time)
    }

    /// Start at the given timestamp instead of the beginning of
    /// time.
    pub fn from_time(mut self, from_time: i64) -> Self {
        self.from_time = from_time;
        self
    }

    /// Spawn the feeder task, emitting mutations on `sender`. Fails
    /// if the table is not part of the model.
    pub fn spawn(self, sender: mpsc::Sender<JobRowMutation>) -> anyhow::Result<FeederHandle> {
        let table = self
            .db
            .model()
            .get_table(&self.table)
            .ok_or_else(|| anyhow!("table {} doesn't exist", self.table))?;
        let (stop, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(feed(self.db, table, self.from_time, sender, stop_rx));
        Ok(FeederHandle { stop, handle })
    }
}

async fn feed(
    db: Arc<Db>,
    table: Arc<Table>,
    mut from_time: i64,
    sender: mpsc::Sender<JobRowMutation>,
    mut stop: watch::Receiver<bool>,
) {
    info!("feeding timeline of {} from {}", table.flat_name(), from_time);
    loop {
        if *stop.borrow() {
            return;
        }
        let mut storage_trx = match db.storage().transaction(0, now_nanos()).await {
            Ok(storage_trx) => storage_trx,
            Err(e) => {
                error!("couldn't get a storage transaction for the feeder: {}", e);
                if idle(&mut stop).await {
                    return;
                }
                continue;
            }
        };
        let mutations = match storage_trx.timeline(&table, from_time, BATCH_SIZE).await {
            Ok(mutations) => mutations,
            Err(e) => {
                error!("couldn't read the timeline of {}: {}", table.flat_name(), e);
                storage_trx.rollback().await.ok();
                if idle(&mut stop).await {
                    return;
                }
                continue;
            }
        };
        let drained = mutations.is_empty();
        for mutation in mutations {
            let new_timestamp = mutation.new.timestamp;
            let emitted = JobRowMutation {
                new: Some(job_row(&mutation.new)),
                old: mutation.old.as_ref().map(job_row),
            };
            if sender.send(emitted).await.is_err() {
                debug!("feeder channel closed, stopping");
                storage_trx.rollback().await.ok();
                return;
            }
            from_time = new_timestamp + 1;
        }
        if let Err(e) = storage_trx.commit().await {
            warn!("couldn't close the feeder transaction: {}", e);
        }
        if drained && idle(&mut stop).await {
            return;
        }
    }
}

// true once the feeder should stop, either because the flag flipped
// or because the handle is gone
async fn idle(stop: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = time::sleep(IDLE_DELAY) => false,
        changed = stop.changed() => changed.is_err() || *stop.borrow(),
    }
}

fn job_row(row: &Row) -> JobRow {
    let data = Value::decode_all(&row.data).unwrap_or_else(|e| {
        warn!("undecodable timeline payload: {}", e);
        Value::Nil
    });
    JobRow {
        timestamp: row.timestamp as u64,
        key1: row.key1.clone(),
        key2: row.key2.clone(),
        key3: row.key3.clone(),
        key4: row.key4.clone(),
        data,
    }
}

fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as i64)
        .unwrap_or_default()
}
