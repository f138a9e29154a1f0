// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Single-node walkthrough: an embedded engine with the in-process
//! backend, served over the execute route, with a feeder tailing the
//! posts timeline.

use maplit::hashmap;
use mry_rs::{prelude::*, service};
use std::sync::Arc;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut model = Model::new();
    model.create_table("users")?;
    model.create_table("users/posts")?;

    let db = Arc::new(Db::new("mry", model, Arc::new(MemoryStorage::new())));
    db.sync().await?;

    let server = service::serve(db.clone(), "127.0.0.1:0".parse()?).await?;
    let address = server.address();
    println!("serving on {}", address);

    let (sender, mut mutations) = mpsc::channel(64);
    let feeder = TimelineFeeder::new(db.clone(), "users/posts").spawn(sender)?;

    let write = Transaction::build(|b| {
        b.into_table("users")
            .set("u1", Value::Map(hashmap! { "name".to_owned() => Value::from("ada") }));
        b.from("users")
            .get("u1")
            .rel("posts")
            .set("p1", Value::Map(hashmap! { "title".to_owned() => Value::from("hello") }));
    });
    let reply = service::call(address, "/execute/write/users", &write).await?;
    println!("write reply: {:?}", reply.ret);

    let read = Transaction::build(|b| {
        b.from("users").get("u1").rel("posts").get_all().ret();
    });
    let reply = service::call(address, "/execute/read/users", &read).await?;
    println!("posts of u1: {:?}", reply.ret.and_then(|r| r.data.into_iter().next()));

    if let Some(mutation) = mutations.recv().await {
        println!(
            "timeline mutation at {}: {:?}",
            mutation.new.as_ref().map(|r| r.timestamp).unwrap_or_default(),
            mutation.new.map(|r| r.data)
        );
    }

    feeder.stop().await;
    server.shutdown().await;
    Ok(())
}
