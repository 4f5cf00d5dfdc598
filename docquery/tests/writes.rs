use bson::{Bson, Document, doc};
use docquery::{memory::InMemoryStore, prelude::*};

fn tags_of(document: &Document) -> Vec<&str> {
    document
        .get_array("tags")
        .unwrap()
        .iter()
        .map(|tag| tag.as_str().unwrap())
        .collect()
}

#[tokio::test]
async fn push_respects_uniqueness() {
    let connection = Connection::new(InMemoryStore::new());
    let users = connection.collection("users");
    users
        .insert([doc! { "name": "John Doe", "tags": ["tag1"] }])
        .await
        .unwrap();

    assert_eq!(users.push("tags", "tag1", true).await.unwrap(), 0);
    assert_eq!(tags_of(&users.first().await.unwrap().unwrap()), vec!["tag1"]);

    assert_eq!(users.push("tags", "tag1", false).await.unwrap(), 1);
    assert_eq!(tags_of(&users.first().await.unwrap().unwrap()), vec!["tag1", "tag1"]);

    users.push("tags", vec!["tag2", "tag3"], false).await.unwrap();
    assert_eq!(
        tags_of(&users.first().await.unwrap().unwrap()),
        vec!["tag1", "tag1", "tag2", "tag3"]
    );
}

#[tokio::test]
async fn push_with_a_map_appends_each_value() {
    let connection = Connection::new(InMemoryStore::new());
    let users = connection.collection("users");
    users.insert([doc! { "name": "John Doe" }]).await.unwrap();

    users
        .push(doc! { "messages": { "from": "Jane", "body": "Hi" } }, Bson::Null, false)
        .await
        .unwrap();

    let user = users.first().await.unwrap().unwrap();
    assert_eq!(
        user.get_array("messages").unwrap(),
        &vec![Bson::Document(doc! { "from": "Jane", "body": "Hi" })]
    );
}

#[tokio::test]
async fn push_with_a_map_and_a_value_is_ambiguous() {
    let connection = Connection::new(InMemoryStore::new());
    let users = connection.collection("users");
    users.insert([doc! { "tags": [] }]).await.unwrap();

    let err = users
        .push(doc! { "tags": "tag1" }, "tag2", false)
        .await
        .unwrap_err();

    let QueryError::InvalidArgument(message) = err else {
        panic!("expected an invalid argument error, got {err:?}");
    };
    assert!(message.contains("document"));
    assert!(message.contains("string"));
}

#[tokio::test]
async fn pull_keeps_the_remaining_order() {
    let connection = Connection::new(InMemoryStore::new());
    let users = connection.collection("users");
    users
        .insert([doc! { "tags": ["tag1", "tag2", "tag3", "tag4"] }])
        .await
        .unwrap();

    assert_eq!(users.pull("tags", "tag3").await.unwrap(), 1);
    assert_eq!(tags_of(&users.first().await.unwrap().unwrap()), vec!["tag1", "tag2", "tag4"]);

    users.pull("tags", vec!["tag1", "tag4"]).await.unwrap();
    assert_eq!(tags_of(&users.first().await.unwrap().unwrap()), vec!["tag2"]);
}

#[tokio::test]
async fn pull_matches_compound_elements_deeply() {
    let connection = Connection::new(InMemoryStore::new());
    let users = connection.collection("users");
    users
        .insert([doc! { "messages": [ { "from": "Jane" }, { "from": "Mark" } ] }])
        .await
        .unwrap();

    users.pull("messages", doc! { "from": "Jane" }).await.unwrap();

    let user = users.first().await.unwrap().unwrap();
    assert_eq!(
        user.get_array("messages").unwrap(),
        &vec![Bson::Document(doc! { "from": "Mark" })]
    );
}

#[tokio::test]
async fn update_merges_plain_keys_and_operators() {
    let connection = Connection::new(InMemoryStore::new());
    let users = connection.collection("users");
    users
        .insert([
            doc! { "name": "John", "age": 30, "address": { "city": "Ghent", "zip": "9000" } },
            doc! { "name": "Jane", "age": 40 },
        ])
        .await
        .unwrap();

    let changed = users
        .clone()
        .where_eq("name", "John")
        .update(
            doc! { "address.city": "Brussels", "$inc": { "age": 1 } },
            UpdateOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(changed, 1);

    let john = users.clone().where_eq("name", "John").first().await.unwrap().unwrap();
    assert_eq!(john.get_i32("age").unwrap(), 31);
    assert_eq!(
        john.get_document("address").unwrap(),
        &doc! { "city": "Brussels", "zip": "9000" }
    );

    let everyone = users
        .update(doc! { "active": true }, UpdateOptions::default())
        .await
        .unwrap();
    assert_eq!(everyone, 2);
}

#[tokio::test]
async fn update_with_upsert_inserts_from_the_filter() {
    let connection = Connection::new(InMemoryStore::new());
    let users = connection.collection("users");

    let written = users
        .clone()
        .where_eq("email", "john@example.com")
        .update(doc! { "name": "John" }, UpdateOptions::upsert())
        .await
        .unwrap();
    assert_eq!(written, 1);

    let john = users.first().await.unwrap().unwrap();
    assert_eq!(john.get_str("email").unwrap(), "john@example.com");
    assert_eq!(john.get_str("name").unwrap(), "John");
}

#[tokio::test]
async fn empty_updates_are_rejected() {
    let connection = Connection::new(InMemoryStore::new());
    let result = connection
        .collection("users")
        .update(Document::new(), UpdateOptions::default())
        .await;

    assert!(matches!(result, Err(QueryError::InvalidArgument(_))));
}

#[tokio::test]
async fn replace_swaps_the_whole_document() {
    let connection = Connection::new(InMemoryStore::new());
    let users = connection.collection("users");
    let id = users
        .insert_get_id(doc! { "name": "John", "age": 30 })
        .await
        .unwrap();

    users.replace(doc! { "name": "Johnny" }).await.unwrap();

    let johnny = users.find(id).await.unwrap().unwrap();
    assert_eq!(johnny.get_str("name").unwrap(), "Johnny");
    assert!(!johnny.contains_key("age"));
}

#[tokio::test]
async fn increment_skips_explicit_nulls() {
    let connection = Connection::new(InMemoryStore::new());
    let counters = connection.collection("counters");
    counters
        .insert([
            doc! { "_id": 1, "n": 1 },
            doc! { "_id": 2, "n": Bson::Null },
            doc! { "_id": 3 },
        ])
        .await
        .unwrap();

    let changed = counters
        .increment("n", 1, doc! { "touched": true })
        .await
        .unwrap();
    assert_eq!(changed, 2);

    assert_eq!(counters.find(1).await.unwrap().unwrap().get_i32("n").unwrap(), 2);
    assert_eq!(counters.find(2).await.unwrap().unwrap().get("n"), Some(&Bson::Null));
    assert_eq!(counters.find(3).await.unwrap().unwrap().get_i32("n").unwrap(), 1);
    assert!(!counters.find(2).await.unwrap().unwrap().contains_key("touched"));

    counters.clone().where_eq("_id", 1).decrement("n", 5, Document::new()).await.unwrap();
    assert_eq!(counters.find(1).await.unwrap().unwrap().get_i32("n").unwrap(), -3);
}

#[tokio::test]
async fn unset_is_idempotent() {
    let connection = Connection::new(InMemoryStore::new());
    let users = connection.collection("users");
    users
        .insert([doc! { "name": "John", "note": "x", "flag": true }])
        .await
        .unwrap();

    assert_eq!(users.unset(["note", "flag"]).await.unwrap(), 1);
    assert_eq!(users.unset(["note"]).await.unwrap(), 0);

    let john = users.first().await.unwrap().unwrap();
    assert_eq!(john.keys().filter(|key| *key != "_id").collect::<Vec<_>>(), vec!["name"]);
}

#[tokio::test]
async fn upsert_counts_inserted_and_changed_rows() {
    let connection = Connection::new(InMemoryStore::new());
    let users = connection.collection("users");
    users
        .insert([
            doc! { "email": "a@example.com", "name": "A" },
            doc! { "email": "b@example.com", "name": "B" },
        ])
        .await
        .unwrap();

    let affected = users
        .upsert(
            [
                doc! { "email": "a@example.com", "name": "A" },
                doc! { "email": "c@example.com", "name": "C" },
            ],
            &["email"],
            None,
        )
        .await
        .unwrap();
    assert_eq!(affected, 1);

    let affected = users
        .upsert(
            [
                doc! { "email": "b@example.com", "name": "Bee", "age": 9 },
                doc! { "email": "d@example.com", "name": "D" },
            ],
            &["email"],
            Some(&["name"][..]),
        )
        .await
        .unwrap();
    assert_eq!(affected, 2);

    assert_eq!(users.count().await.unwrap(), 4);
    let bee = users.clone().where_eq("email", "b@example.com").first().await.unwrap().unwrap();
    assert_eq!(bee.get_str("name").unwrap(), "Bee");
    assert!(!bee.contains_key("age"));

    let only_keys = users
        .upsert([doc! { "email": "e@example.com" }], &["email"], None)
        .await
        .unwrap();
    assert_eq!(only_keys, 1);
    assert_eq!(users.count().await.unwrap(), 5);
}

#[tokio::test]
async fn upsert_inserts_full_rows_but_updates_only_listed_columns() {
    let connection = Connection::new(InMemoryStore::new());
    let users = connection.collection("users");
    users
        .insert([doc! { "email": "a@example.com", "name": "A", "age": 1 }])
        .await
        .unwrap();

    let affected = users
        .upsert(
            [
                doc! { "email": "a@example.com", "name": "Ay", "age": 2 },
                doc! { "email": "new@example.com", "name": "N", "age": 5 },
            ],
            &["email"],
            Some(&["name"][..]),
        )
        .await
        .unwrap();
    assert_eq!(affected, 2);

    let existing = users.clone().where_eq("email", "a@example.com").first().await.unwrap().unwrap();
    assert_eq!(existing.get_str("name").unwrap(), "Ay");
    assert_eq!(existing.get_i32("age").unwrap(), 1);

    let inserted = users.clone().where_eq("email", "new@example.com").first().await.unwrap().unwrap();
    assert_eq!(inserted.get_str("name").unwrap(), "N");
    assert_eq!(inserted.get_i32("age").unwrap(), 5);
}

#[tokio::test]
async fn upsert_requires_unique_fields_on_every_row() {
    let connection = Connection::new(InMemoryStore::new());
    let result = connection
        .collection("users")
        .upsert([doc! { "name": "no email" }], &["email"], None)
        .await;

    assert!(matches!(result, Err(QueryError::InvalidArgument(_))));
}

#[tokio::test]
async fn delete_by_id_is_scoped_to_the_call() {
    let connection = Connection::new(InMemoryStore::new());
    connection
        .collection("items")
        .insert([
            doc! { "_id": 1, "type": "a" },
            doc! { "_id": 2, "type": "a" },
            doc! { "_id": 3, "type": "b" },
        ])
        .await
        .unwrap();

    let type_a = connection.collection("items").where_eq("type", "a");

    assert_eq!(type_a.delete_by_id(3).await.unwrap(), 0);
    assert_eq!(type_a.delete_by_id(1).await.unwrap(), 1);
    assert_eq!(type_a.delete().await.unwrap(), 1);

    let left = connection.collection("items").pluck("_id").await.unwrap();
    assert_eq!(left, vec![Bson::Int32(3)]);
}

#[tokio::test]
async fn truncate_twice_leaves_nothing() {
    let connection = Connection::new(InMemoryStore::new());
    let items = connection.collection("items");
    items
        .insert([doc! { "name": "knife" }, doc! { "name": "fork" }])
        .await
        .unwrap();

    assert!(items.clone().where_eq("name", "knife").truncate().await.unwrap());
    assert_eq!(items.count().await.unwrap(), 0);
    assert!(items.truncate().await.unwrap());
    assert_eq!(items.count().await.unwrap(), 0);
}

#[tokio::test]
async fn inserts_keep_order_and_reject_duplicate_ids() {
    let connection = Connection::new(InMemoryStore::new());
    let items = connection.collection("items");

    assert!(items.insert(Vec::new()).await.unwrap().is_empty());

    let ids = items
        .insert([doc! { "_id": "x", "n": 1 }, doc! { "n": 2 }])
        .await
        .unwrap();
    assert_eq!(ids[0], Bson::from("x"));
    assert!(matches!(ids[1], Bson::ObjectId(_)));

    let duplicate = items.insert([doc! { "_id": "y" }, doc! { "_id": "x" }]).await;
    assert!(matches!(duplicate, Err(QueryError::Store(_))));
    assert_eq!(items.count().await.unwrap(), 3);
}
