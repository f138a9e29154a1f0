// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! This module implements the accept loop: one task per connection,
//! frames dispatched through the service binding. A malformed frame
//! closes its connection; the loop keeps serving the rest.

use super::{read_body, read_short_string, write_message, Service};
use log::{debug, info, warn};
use tokio::{
    io::AsyncReadExt,
    net::{TcpListener, TcpStream},
    sync::watch,
};

/// Accept connections until the shutdown flag flips.
pub async fn listen(listener: TcpListener, service: Service, mut shutdown: watch::Receiver<bool>) {
    info!(
        "service listening on {}",
        listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "<unknown>".to_owned())
    );
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("service listener shutting down");
                return;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!("accepted connection from {}", peer);
                        let service = service.clone();
                        tokio::spawn(async move {
                            if let Err(e) = serve_connection(stream, service).await {
                                warn!("connection from {} closed: {}", peer, e);
                            }
                        });
                    }
                    Err(e) => warn!("accept failed: {}", e),
                }
            }
        }
    }
}

async fn serve_connection(mut stream: TcpStream, service: Service) -> anyhow::Result<()> {
    loop {
        // a clean end of stream between frames is a normal hangup
        let path_len = match stream.read_u16().await {
            Ok(len) => len as usize,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let mut raw = vec![0u8; path_len];
        stream.read_exact(&mut raw).await?;
        let path = String::from_utf8(raw)?;
        let marshaller = read_short_string(&mut stream).await?;
        let body = read_body(&mut stream).await?;

        let reply = service.handle(&path, &marshaller, &body).await?;
        write_message(&mut stream, &reply).await?;
    }
}
