use std::time::Duration;

use bson::{Bson, DateTime, doc, oid::ObjectId};
use chrono::{TimeZone, Utc};
use docquery::{compiler::CompiledQuery, memory::InMemoryStore, prelude::*};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};

async fn kitchen() -> Connection<InMemoryStore> {
    let connection = Connection::new(InMemoryStore::new());
    connection
        .collection("items")
        .insert([
            doc! { "name": "knife", "type": "sharp", "amount": 34 },
            doc! { "name": "fork", "type": "sharp", "amount": 20 },
            doc! { "name": "spoon", "type": "round", "amount": 3 },
            doc! { "name": "spoon", "type": "round", "amount": 14 },
        ])
        .await
        .unwrap();

    connection
}

fn names(documents: &[bson::Document]) -> Vec<&str> {
    documents
        .iter()
        .map(|document| document.get_str("name").unwrap())
        .collect()
}

#[tokio::test]
async fn comparison_operators_filter_by_their_definition() {
    let connection = kitchen().await;
    let items = || connection.collection("items");

    let large = items().where_("amount", ">", 14).unwrap().get().await.unwrap();
    assert_eq!(names(&large), vec!["knife", "fork"]);

    let at_most = items().where_("amount", "<=", 14).unwrap().get().await.unwrap();
    assert_eq!(names(&at_most), vec!["spoon", "spoon"]);

    let not_spoons = items().where_("name", "<>", "spoon").unwrap().get().await.unwrap();
    assert_eq!(names(&not_spoons), vec!["knife", "fork"]);

    let native_alias = items().where_("amount", "$GTE", 20).unwrap().count().await.unwrap();
    assert_eq!(native_alias, 2);
}

#[tokio::test]
async fn mod_returns_only_multiples() {
    let connection = Connection::new(InMemoryStore::new());
    let numbers = connection.collection("numbers");
    numbers
        .insert([doc! { "n": 15 }, doc! { "n": 30 }, doc! { "n": 7 }, doc! { "n": 0 }])
        .await
        .unwrap();

    let multiples = numbers
        .clone()
        .where_("n", "mod", vec![15, 0])
        .unwrap()
        .pluck("n")
        .await
        .unwrap();
    assert_eq!(multiples, vec![Bson::Int32(15), Bson::Int32(30), Bson::Int32(0)]);
}

#[tokio::test]
async fn array_operators() {
    let connection = Connection::new(InMemoryStore::new());
    let posts = connection.collection("posts");
    posts
        .insert([
            doc! { "title": "a", "tags": ["red", "green", "blue"], "lines": [ { "qty": 5 }, { "qty": 15 } ] },
            doc! { "title": "b", "tags": ["red"], "lines": [ { "qty": 1 } ] },
        ])
        .await
        .unwrap();

    let all = posts.clone().where_("tags", "all", vec!["blue", "red"]).unwrap();
    assert_eq!(all.pluck("title").await.unwrap(), vec![Bson::from("a")]);

    let size = posts.clone().where_("tags", "size", 1).unwrap();
    assert_eq!(size.pluck("title").await.unwrap(), vec![Bson::from("b")]);

    let matched = posts
        .clone()
        .where_("lines", "elemMatch", doc! { "qty": { "$gt": 10 } })
        .unwrap();
    assert_eq!(matched.pluck("title").await.unwrap(), vec![Bson::from("a")]);

    let contains = posts.clone().where_eq("tags", "green");
    assert_eq!(contains.count().await.unwrap(), 1);
}

#[tokio::test]
async fn exists_and_type() {
    let connection = Connection::new(InMemoryStore::new());
    let values = connection.collection("values");
    values
        .insert([doc! { "v": 1 }, doc! { "v": "1" }, doc! { "w": true }])
        .await
        .unwrap();

    assert_eq!(values.clone().where_("v", "exists", true).unwrap().count().await.unwrap(), 2);
    assert_eq!(values.clone().where_("v", "exists", false).unwrap().count().await.unwrap(), 1);
    assert_eq!(values.clone().where_("v", "type", 2).unwrap().count().await.unwrap(), 1);
    assert_eq!(values.clone().where_("v", "type", "number").unwrap().count().await.unwrap(), 1);
}

#[tokio::test]
async fn like_and_regex() {
    let connection = kitchen().await;
    let items = || connection.collection("items");

    let with_o = items().where_("name", "like", "%O%").unwrap().get().await.unwrap();
    assert_eq!(names(&with_o), vec!["fork", "spoon", "spoon"]);

    let prefix = items().where_("name", "like", "kn%").unwrap().get().await.unwrap();
    assert_eq!(names(&prefix), vec!["knife"]);

    let without = items().where_("name", "not like", "%o%").unwrap().get().await.unwrap();
    assert_eq!(names(&without), vec!["knife"]);

    let regex = items().where_("name", "regex", "/^F/i").unwrap().get().await.unwrap();
    assert_eq!(names(&regex), vec!["fork"]);

    let not_regex = items().where_("name", "not regexp", "/n/").unwrap().get().await.unwrap();
    assert_eq!(names(&not_regex), vec!["fork"]);
}

#[tokio::test]
async fn like_treats_underscore_literally() {
    let connection = Connection::new(InMemoryStore::new());
    let tags = || connection.collection("tags");
    tags()
        .insert([doc! { "name": "snake_case" }, doc! { "name": "snakeXcase" }])
        .await
        .unwrap();

    let exact = tags().where_("name", "like", "snake_case").unwrap().get().await.unwrap();
    assert_eq!(names(&exact), vec!["snake_case"]);

    let prefixed = tags().where_("name", "like", "snake_%").unwrap().get().await.unwrap();
    assert_eq!(names(&prefixed), vec!["snake_case"]);
}

#[tokio::test]
async fn in_between_and_null() {
    let connection = kitchen().await;
    let items = || connection.collection("items");

    assert_eq!(items().where_in("name", ["fork", "knife"]).count().await.unwrap(), 2);
    assert_eq!(items().where_not_in("name", ["fork", "knife"]).count().await.unwrap(), 2);
    assert_eq!(items().where_between("amount", 10, 30).count().await.unwrap(), 2);
    assert_eq!(items().where_not_between("amount", 10, 30).count().await.unwrap(), 2);
    assert_eq!(items().where_null("colour").count().await.unwrap(), 4);
    assert_eq!(items().where_not_null("amount").count().await.unwrap(), 4);
}

#[tokio::test]
async fn and_binds_tighter_than_or() {
    let connection = kitchen().await;

    let results = connection
        .collection("items")
        .where_eq("type", "round")
        .where_eq("amount", 3)
        .or_where_eq("name", "knife")
        .get()
        .await
        .unwrap();
    assert_eq!(names(&results), vec!["knife", "spoon"]);

    let nested = connection
        .collection("items")
        .where_eq("type", "sharp")
        .or_where_nested(|query| Ok(query.where_eq("name", "spoon").where_("amount", ">", 10)?))
        .unwrap()
        .get()
        .await
        .unwrap();
    assert_eq!(nested.len(), 3);

    let grouped = connection
        .collection("items")
        .where_("amount", ">", 10)
        .unwrap()
        .where_nested(|query| Ok(query.where_eq("name", "fork").or_where_eq("name", "spoon")))
        .unwrap()
        .get()
        .await
        .unwrap();
    let amounts: Vec<i32> = grouped.iter().map(|d| d.get_i32("amount").unwrap()).collect();
    assert_eq!(amounts, vec![20, 14]);
}

#[tokio::test]
async fn where_date_compares_whole_days() {
    let connection = Connection::new(InMemoryStore::new());
    let people = connection.collection("people");
    let at = |y, m, d, h| DateTime::from_chrono(Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap());
    people
        .insert([
            doc! { "name": "john", "birthday": at(1980, 1, 1, 0) },
            doc! { "name": "jane", "birthday": at(1980, 1, 1, 23) },
            doc! { "name": "mark", "birthday": at(1983, 6, 3, 12) },
        ])
        .await
        .unwrap();

    let same_day = people.clone().where_date("birthday", "=", "1980-01-01").unwrap();
    assert_eq!(same_day.count().await.unwrap(), 2);

    let after = people.clone().where_date("birthday", ">", "1980-01-01").unwrap();
    assert_eq!(after.pluck("name").await.unwrap(), vec![Bson::from("mark")]);

    let before = people.clone().where_date("birthday", "<", "1980-01-02").unwrap();
    assert_eq!(before.count().await.unwrap(), 2);

    let not_on = people.clone().where_date("birthday", "!=", "1980-01-01").unwrap();
    assert_eq!(not_on.count().await.unwrap(), 1);
}

#[tokio::test]
async fn find_round_trips_object_ids() {
    let connection = Connection::new(InMemoryStore::new());
    let users = connection.collection("users");
    let id = users
        .insert_get_id(doc! { "name": "John Doe", "age": 35 })
        .await
        .unwrap();

    let Bson::ObjectId(oid) = id else {
        panic!("expected a generated ObjectId, got {id:?}");
    };

    let by_hex = users.find(oid.to_hex()).await.unwrap().unwrap();
    assert_eq!(by_hex.get_object_id("_id").unwrap(), oid);
    assert_eq!(by_hex.get_str("name").unwrap(), "John Doe");
    assert_eq!(by_hex.get_i32("age").unwrap(), 35);

    assert!(users.find(oid).await.unwrap().is_some());
    assert!(users.find(ObjectId::new()).await.unwrap().is_none());
    assert!(users.find(Bson::Null).await.unwrap().is_none());
}

#[tokio::test]
async fn custom_keys_are_not_coerced() {
    let connection = Connection::new(InMemoryStore::new());
    let codes = connection.collection("codes");
    codes.insert([doc! { "_id": "abc", "label": "first" }]).await.unwrap();

    let found = codes.find("abc").await.unwrap().unwrap();
    assert_eq!(found.get_str("label").unwrap(), "first");
}

#[tokio::test]
async fn first_returns_none_without_matches() {
    let connection = kitchen().await;

    let missing = connection.collection("items").where_eq("name", "ladle");
    assert!(missing.first().await.unwrap().is_none());
    assert!(missing.doesnt_exist().await.unwrap());
    assert!(connection.collection("items").exists().await.unwrap());
}

#[tokio::test]
async fn ordering_skip_and_limit() {
    let connection = kitchen().await;

    let ordered = connection
        .collection("items")
        .order_by("type", SortDirection::Asc)
        .order_by_desc("amount")
        .skip(1)
        .take(2)
        .get()
        .await
        .unwrap();
    let amounts: Vec<i32> = ordered.iter().map(|d| d.get_i32("amount").unwrap()).collect();
    assert_eq!(amounts, vec![3, 34]);

    let natural = connection
        .collection("items")
        .order_by("natural", SortDirection::Desc)
        .first()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(natural.get_i32("amount").unwrap(), 14);

    let hinted = connection
        .collection("items")
        .hint(doc! { "$natural": -1 })
        .first()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(hinted.get_i32("amount").unwrap(), 14);
}

#[tokio::test]
async fn unknown_hints_surface_as_store_errors() {
    let connection = kitchen().await;
    let result = connection.collection("items").hint("amount_1").get().await;

    assert!(matches!(result, Err(QueryError::Store(_))));
}

#[tokio::test]
async fn timeout_becomes_milliseconds_at_dispatch() {
    let connection = kitchen().await;
    let query = connection.collection("items").timeout(Duration::from_secs(2));

    let Ok(CompiledQuery::Find(command)) = query.to_command() else {
        panic!("expected a find command");
    };
    assert_eq!(command.max_time_ms, Some(2000));
    assert_eq!(query.get().await.unwrap().len(), 4);
}

#[tokio::test]
async fn select_and_projection() {
    let connection = Connection::new(InMemoryStore::new());
    let posts = connection.collection("posts");
    posts
        .insert([doc! { "title": "a", "body": "long", "tags": ["t1", "t2", "t3"] }])
        .await
        .unwrap();

    let selected = posts.clone().select(["title"]).first().await.unwrap().unwrap();
    assert!(selected.contains_key("title"));
    assert!(!selected.contains_key("body"));

    let sliced = posts
        .clone()
        .project(doc! { "tags": { "$slice": 2 } })
        .first()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sliced.get_array("tags").unwrap(), &vec![Bson::from("t1"), Bson::from("t2")]);
}

#[tokio::test]
async fn value_and_pluck() {
    let connection = kitchen().await;
    let items = || connection.collection("items");

    assert_eq!(
        items().where_eq("name", "knife").value("amount").await.unwrap(),
        Some(Bson::Int32(34))
    );
    assert_eq!(items().where_eq("name", "ladle").value("amount").await.unwrap(), None);

    let names = items().order_by("amount", SortDirection::Asc).pluck("name").await.unwrap();
    assert_eq!(names, vec![Bson::from("spoon"), Bson::from("spoon"), Bson::from("fork"), Bson::from("knife")]);

    let keyed = items().pluck_keyed("amount", "name").await.unwrap();
    assert_eq!(keyed, doc! { "knife": 34, "fork": 20, "spoon": 14 });
}

#[tokio::test]
async fn cursor_streams_every_match() {
    let connection = kitchen().await;
    let cursor = connection
        .collection("items")
        .where_eq("type", "sharp")
        .cursor()
        .await
        .unwrap();

    assert_eq!(cursor.collection(), "items");
    let documents: Vec<bson::Document> = cursor.try_collect().await.unwrap();
    assert_eq!(names(&documents), vec!["knife", "fork"]);
}

#[tokio::test]
async fn raw_hands_out_the_native_collection() {
    let connection = kitchen().await;
    let items = connection.collection("items");

    assert_eq!(items.raw(|collection| collection.name().to_string()), "items");

    let stored = items
        .raw(|collection| async move { collection.count_documents().await })
        .await;
    assert_eq!(stored, 4);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Item {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    id: Option<ObjectId>,
    name: String,
    amount: i32,
}

impl Model for Item {
    fn collection_name() -> &'static str {
        "items"
    }
}

#[tokio::test]
async fn models_map_onto_their_collection() {
    let connection = kitchen().await;
    let id = connection
        .model::<Item>()
        .insert_model(&Item {
            id: None,
            name: "ladle".into(),
            amount: 2,
        })
        .await
        .unwrap();

    let ladle: Item = connection.model::<Item>().find_model(id.clone()).await.unwrap().unwrap();
    assert_eq!(ladle.name, "ladle");
    assert_eq!(ladle.id.map(Bson::ObjectId), Some(id));

    let spoons: Vec<Item> = connection
        .model::<Item>()
        .where_eq("name", "spoon")
        .get_models()
        .await
        .unwrap();
    assert_eq!(spoons.len(), 2);

    assert_eq!(connection.model_raw::<Item>().count_documents().await, 5);
}

#[tokio::test]
async fn grammar_errors_surface_before_io() {
    let connection = kitchen().await;

    let unsupported = connection.collection("items").where_("amount", "near", 1);
    assert!(matches!(unsupported, Err(QueryError::UnsupportedOperator(_))));

    let malformed = connection.collection("items").where_("amount", "in", 1);
    assert!(matches!(malformed, Err(QueryError::InvalidArgument(_))));

    let deferred = connection.collection("items").where_eq("", 1).order_by_desc("amount");
    assert!(matches!(deferred.get().await, Err(QueryError::InvalidArgument(_))));
    assert!(matches!(deferred.delete().await, Err(QueryError::InvalidArgument(_))));
    assert_eq!(connection.collection("items").count().await.unwrap(), 4);
}
