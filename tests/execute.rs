// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use maplit::hashmap;
use mry_rs::prelude::*;
use std::sync::Arc;

async fn db_with(paths: &[&str]) -> Arc<Db> {
    let mut model = Model::new();
    for path in paths {
        model.create_table(path).unwrap();
    }
    let storage = Arc::new(MemoryStorage::new());
    let db = Db::new("mry_test", model, storage);
    db.sync().await.unwrap();
    Arc::new(db)
}

fn keys(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| (*p).to_owned()).collect()
}

#[tokio::test]
async fn set_then_get_in_the_same_transaction() {
    let db = db_with(&["t"]).await;
    let trx = Transaction::build_with_id(1000, |b| {
        b.into_table("t")
            .set("k1", Value::Map(hashmap! { "a".to_owned() => Value::from(1i64) }));
        b.from("t").get("k1").ret();
    });
    let reply = db.execute(&trx).await;
    assert_eq!(reply.id, 1000);
    let ret = reply.ret.unwrap();
    assert!(ret.error.is_none(), "unexpected error: {:?}", ret.error);

    let map = ret.data[0].as_map().unwrap();
    assert_eq!(map["a"], Value::Int(1));
    assert_eq!(map["_timestamp"], Value::Int(1000));
    assert_eq!(map["_key1"], Value::from("k1"));
    assert_eq!(map["_key2"], Value::from(""));
    assert_eq!(map["_key3"], Value::from(""));
    assert_eq!(map["_key4"], Value::from(""));
}

#[tokio::test]
async fn conflicting_tokens_fail_and_write_nothing() {
    let db = db_with(&["t"]).await;
    let trx = Transaction::build_with_id(1000, |b| {
        b.into_table("t")
            .set("alpha", Value::Map(hashmap! { "a".to_owned() => Value::from(1i64) }));
        b.into_table("t")
            .set("beta", Value::Map(hashmap! { "b".to_owned() => Value::from(2i64) }));
    });
    let reply = db.execute(&trx).await;
    let error = reply.ret.unwrap().error.unwrap();
    assert!(
        error.message.starts_with("Token conflict:"),
        "unexpected message {}",
        error.message
    );

    for key in &["alpha", "beta"] {
        let read = Transaction::build_with_id(2000, |b| {
            b.from("t").get(*key).ret();
        });
        let ret = db.execute(&read).await.ret.unwrap();
        assert!(ret.error.is_none());
        assert_eq!(ret.data[0], Value::Nil, "{} must not be written", key);
    }
}

#[tokio::test]
async fn missing_tables_are_schema_errors() {
    let db = db_with(&["t"]).await;
    let trx = Transaction::build_with_id(1000, |b| {
        b.from("nope").get("k").ret();
    });
    let error = db.execute(&trx).await.ret.unwrap().error.unwrap();
    assert!(error.message.contains("nope"), "unexpected message {}", error.message);
}

#[tokio::test]
async fn non_map_sets_roll_back() {
    let db = db_with(&["t"]).await;
    let trx = Transaction::build_with_id(1000, |b| {
        b.into_table("t").set("k", "not-a-map");
    });
    let error = db.execute(&trx).await.ret.unwrap().error.unwrap();
    assert_eq!(error.message, "Can only store a map into table");

    let read = Transaction::build_with_id(2000, |b| {
        b.from("t").get("k").ret();
    });
    let ret = db.execute(&read).await.ret.unwrap();
    assert!(ret.error.is_none());
    assert_eq!(ret.data[0], Value::Nil, "the failed write must not persist");
}

#[tokio::test]
async fn timeline_reflects_three_updates() {
    let db = db_with(&["t"]).await;
    for (id, version) in &[(1000u64, 1i64), (1001, 2), (1002, 3)] {
        let trx = Transaction::build_with_id(*id, |b| {
            b.into_table("t")
                .set("k", Value::Map(hashmap! { "v".to_owned() => Value::from(*version) }));
        });
        let ret = db.execute(&trx).await.ret.unwrap();
        assert!(ret.error.is_none());
    }

    let mut storage_trx = db.storage().transaction(0, 5000).await.unwrap();
    let table = db.model().get_table("t").unwrap();
    let mutations = storage_trx.timeline(&table, 0, 10).await.unwrap();
    storage_trx.rollback().await.unwrap();

    assert_eq!(mutations.len(), 3);
    let timestamps: Vec<i64> = mutations.iter().map(|m| m.new.timestamp).collect();
    assert_eq!(timestamps, vec![1000, 1001, 1002]);
    assert!(mutations[0].old.is_none());
    assert_eq!(
        mutations[1].old.as_ref().map(|r| r.timestamp),
        Some(1000),
        "each old row is the immediately preceding version"
    );
    assert_eq!(mutations[2].old.as_ref().map(|r| r.timestamp), Some(1001));
}

#[tokio::test]
async fn sub_table_navigation_writes_under_the_parent_key() {
    let db = db_with(&["users/posts"]).await;
    let trx = Transaction::build_with_id(1000, |b| {
        b.from("users")
            .get("u1")
            .rel("posts")
            .set("p1", Value::Map(hashmap! { "title".to_owned() => Value::from("x") }));
    });
    let ret = db.execute(&trx).await.ret.unwrap();
    assert!(ret.error.is_none(), "unexpected error: {:?}", ret.error);

    let posts = db.model().get_table("users/posts").unwrap();
    assert_eq!(posts.flat_name(), "users_posts");
    let mut storage_trx = db.storage().transaction(0, 2000).await.unwrap();
    let row = storage_trx
        .get(&posts, &keys(&["u1", "p1"]))
        .await
        .unwrap()
        .expect("the post row must exist under (u1, p1)");
    storage_trx.rollback().await.unwrap();
    assert_eq!((row.key1.as_str(), row.key2.as_str()), ("u1", "p1"));
}

#[tokio::test]
async fn get_all_collects_the_latest_post_versions() {
    let db = db_with(&["users/posts"]).await;
    for (id, key, title) in &[(1000u64, "p1", "one"), (1001, "p2", "two"), (1002, "p1", "one-v2")] {
        let trx = Transaction::build_with_id(*id, |b| {
            b.from("users")
                .get("u1")
                .rel("posts")
                .set(*key, Value::Map(hashmap! { "title".to_owned() => Value::from(*title) }));
        });
        let ret = db.execute(&trx).await.ret.unwrap();
        assert!(ret.error.is_none());
    }

    let trx = Transaction::build_with_id(2000, |b| {
        b.from("users").get("u1").rel("posts").get_all().ret();
    });
    let ret = db.execute(&trx).await.ret.unwrap();
    assert!(ret.error.is_none(), "unexpected error: {:?}", ret.error);
    let posts = ret.data[0].as_array().unwrap();
    let titles: Vec<&str> = posts
        .iter()
        .map(|p| p.as_map().unwrap()["title"].as_str().unwrap())
        .collect();
    assert_eq!(titles, vec!["one-v2", "two"]);
}

#[tokio::test]
async fn get_all_is_refused_on_top_level_tables() {
    let db = db_with(&["t"]).await;
    let trx = Transaction::build_with_id(1000, |b| {
        b.from("t").get_all().ret();
    });
    let error = db.execute(&trx).await.ret.unwrap().error.unwrap();
    assert_eq!(error.message, "'getAll' not supported on top level tables");
}

#[tokio::test]
async fn plans_without_key_operations_have_no_token() {
    let db = db_with(&["t"]).await;
    let trx = Transaction::build_with_id(1000, |b| {
        let table = b.from("t");
        table.ret();
    });
    let error = db.execute(&trx).await.ret.unwrap().error.unwrap();
    assert_eq!(error.message, "Couldn't find token for transaction");
}

#[tokio::test]
async fn returned_rows_read_back_what_was_stored() {
    let db = db_with(&["t"]).await;
    let payload = hashmap! {
        "s".to_owned() => Value::from("text"),
        "n".to_owned() => Value::from(42i64),
        "f".to_owned() => Value::from(1.5f64),
        "b".to_owned() => Value::from(true),
        "raw".to_owned() => Value::Bytes(vec![0, 1, 2]),
        "list".to_owned() => Value::Array(vec![Value::from(1i64), Value::from("x")]),
        "nested".to_owned() => Value::Map(hashmap! { "k".to_owned() => Value::Nil }),
    };
    let write = Transaction::build_with_id(1000, |b| {
        b.into_table("t").set("k", Value::Map(payload.clone()));
    });
    assert!(db.execute(&write).await.ret.unwrap().error.is_none());

    let read = Transaction::build_with_id(2000, |b| {
        b.from("t").get("k").ret();
    });
    let ret = db.execute(&read).await.ret.unwrap();
    let map = ret.data[0].as_map().unwrap();
    for (key, value) in &payload {
        assert_eq!(&map[key], value, "field {} must round-trip", key);
    }
    assert_eq!(map["_timestamp"], Value::Int(1000));
}
