// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! This module binds the execution endpoint. The cluster substrate
//! owning request routing is external; this binding publishes the
//! execute routes over a plain length-prefixed TCP frame:
//!
//! ```text
//! request:  [u16 path len][path][u16 name len][marshaller name][u32 body len][body]
//! reply:    [u16 name len][marshaller name][u32 body len][body]
//! ```
//!
//! The body is the named marshaller's output carrying the plan.

use crate::{
    db::Db,
    transaction::Transaction,
    wire::{Marshaller, TransactionMarshaller},
};
use anyhow::ensure;
use std::{net::SocketAddr, sync::Arc};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::watch,
    task::JoinHandle,
};

pub mod listener;

/// The execute route.
pub const EXECUTE_PATH: &str = "/execute";
/// The write-intent route prefix.
pub const EXECUTE_WRITE_PREFIX: &str = "/execute/write/";
/// The read-intent route prefix.
pub const EXECUTE_READ_PREFIX: &str = "/execute/read/";

/// The largest frame body accepted off the wire.
pub const MAX_BODY_LEN: u32 = 16 * 1024 * 1024;

/// The endpoint binding: resolves routes to the engine and applies
/// the registered marshallers.
#[derive(Clone)]
pub struct Service {
    db: Arc<Db>,
}

impl Service {
    /// Bind the execute routes to the database.
    pub fn new(db: Arc<Db>) -> Self {
        Service { db }
    }

    /// Check whether a path names one of the bound routes.
    pub fn route_matches(path: &str) -> bool {
        path == EXECUTE_PATH
            || path.starts_with(EXECUTE_WRITE_PREFIX)
            || path.starts_with(EXECUTE_READ_PREFIX)
    }

    /// Handle one request frame: unmarshal the plan, execute it and
    /// marshal the reply plan.
    pub async fn handle(
        &self,
        path: &str,
        marshaller: &str,
        body: &[u8],
    ) -> anyhow::Result<Vec<u8>> {
        ensure!(Self::route_matches(path), "no binding for path {}", path);
        ensure!(
            marshaller == TransactionMarshaller::NAME,
            "unknown marshaller {}",
            marshaller
        );
        let trx = TransactionMarshaller::unmarshal(body)?;
        let reply = self.db.execute(&trx).await;
        Ok(TransactionMarshaller::marshal(&reply))
    }
}

/// A running service listener.
pub struct ServiceHandle {
    address: SocketAddr,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ServiceHandle {
    /// The bound address; useful when listening on port 0.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Stop accepting connections and wait for the accept loop.
    pub async fn shutdown(self) {
        // the loop may already be gone; nothing to unwind then
        self.shutdown.send(true).ok();
        self.handle.await.ok();
    }
}

/// Bind the execute routes of `db` on `address` and serve them until
/// shut down.
pub async fn serve(db: Arc<Db>, address: SocketAddr) -> anyhow::Result<ServiceHandle> {
    let listener = tokio::net::TcpListener::bind(address).await?;
    let address = listener.local_addr()?;
    let (shutdown, shutdown_rx) = watch::channel(false);
    let service = Service::new(db);
    let handle = tokio::spawn(listener::listen(listener, service, shutdown_rx));
    Ok(ServiceHandle {
        address,
        shutdown,
        handle,
    })
}

/// Submit a plan to a remote service and wait for the reply plan.
pub async fn call(address: SocketAddr, path: &str, trx: &Transaction) -> anyhow::Result<Transaction> {
    let mut stream = TcpStream::connect(address).await?;
    let body = TransactionMarshaller::marshal(trx);
    write_frame_head(&mut stream, path).await?;
    write_message(&mut stream, &body).await?;

    let name = read_short_string(&mut stream).await?;
    ensure!(
        name == TransactionMarshaller::NAME,
        "reply carries unknown marshaller {}",
        name
    );
    let body = read_body(&mut stream).await?;
    TransactionMarshaller::unmarshal(&body)
}

pub(crate) async fn write_frame_head(stream: &mut TcpStream, path: &str) -> anyhow::Result<()> {
    stream.write_u16(path.len() as u16).await?;
    stream.write_all(path.as_bytes()).await?;
    Ok(())
}

pub(crate) async fn write_message(stream: &mut TcpStream, body: &[u8]) -> anyhow::Result<()> {
    let name = TransactionMarshaller::NAME;
    stream.write_u16(name.len() as u16).await?;
    stream.write_all(name.as_bytes()).await?;
    stream.write_u32(body.len() as u32).await?;
    stream.write_all(body).await?;
    stream.flush().await?;
    Ok(())
}

pub(crate) async fn read_short_string(stream: &mut TcpStream) -> anyhow::Result<String> {
    let len = stream.read_u16().await? as usize;
    let mut raw = vec![0u8; len];
    stream.read_exact(&mut raw).await?;
    Ok(String::from_utf8(raw)?)
}

pub(crate) async fn read_body(stream: &mut TcpStream) -> anyhow::Result<Vec<u8>> {
    let len = stream.read_u32().await?;
    ensure!(len <= MAX_BODY_LEN, "frame body of {} bytes is too large", len);
    let mut body = vec![0u8; len as usize];
    stream.read_exact(&mut body).await?;
    Ok(body)
}
