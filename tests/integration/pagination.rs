#![allow(missing_docs)]

use proptest::prelude::*;
use tessera::db::Database;
use tessera::model;
use tessera::mutation::CreateData;
use tessera::query::{Cursor, FindManyArgs, NullsOrder, OrderBy};
use tessera::relation::Projection;
use tessera::{Record, Value};

fn open_seeded() -> Database {
    let db = Database::open(model::schema());
    let user = db
        .entity("User")
        .unwrap()
        .create(&CreateData::new().set("username", "pager"), &Projection::Default)
        .expect("create user");
    let user_id = user.str_field("id").unwrap().to_owned();
    let conns = db.entity("SshConnection").unwrap();
    for i in 1..=9 {
        let data = CreateData::new()
            .set("name", format!("c{i}"))
            .set("host", "h.example.com")
            .set("port", 7000 + i as i64)
            .set("username", "u")
            .set("userId", user_id.as_str());
        conns.create(&data, &Projection::Default).expect("create connection");
    }
    db
}

fn names(records: &[Record]) -> Vec<String> {
    records
        .iter()
        .map(|r| r.str_field("name").unwrap().to_owned())
        .collect()
}

fn list(db: &Database, args: &FindManyArgs) -> Vec<Record> {
    db.entity("SshConnection")
        .unwrap()
        .find_many(args, &Projection::Default)
        .expect("find_many")
}

#[test]
fn forward_pages_partition_the_result_set() {
    let db = open_seeded();
    let base = || FindManyArgs::default().order_by(OrderBy::asc("name"));

    let page1 = list(&db, &base().take(3));
    assert_eq!(names(&page1), vec!["c1", "c2", "c3"]);

    // Forward windows start at the anchor row, so the next page anchors on
    // the previous page's last row and skips it.
    let anchor1 = page1.last().unwrap().str_field("id").unwrap().to_owned();
    let page2 = list(&db, &base().cursor(Cursor::new("id", anchor1)).skip(1).take(3));
    assert_eq!(names(&page2), vec!["c4", "c5", "c6"]);

    let anchor2 = page2.last().unwrap().str_field("id").unwrap().to_owned();
    let page3 = list(&db, &base().cursor(Cursor::new("id", anchor2)).skip(1).take(3));
    assert_eq!(names(&page3), vec!["c7", "c8", "c9"]);

    let anchor3 = page3.last().unwrap().str_field("id").unwrap().to_owned();
    let page4 = list(&db, &base().cursor(Cursor::new("id", anchor3)).skip(1).take(3));
    assert!(page4.is_empty());
}

#[test]
fn backward_take_yields_the_preceding_page() {
    let db = open_seeded();
    let base = || FindManyArgs::default().order_by(OrderBy::asc("name"));

    let page2_first = list(&db, &base().skip(3).take(1));
    let anchor = page2_first[0].str_field("id").unwrap().to_owned();

    let prev = list(&db, &base().cursor(Cursor::new("id", anchor)).take(-3));
    assert_eq!(names(&prev), vec!["c1", "c2", "c3"]);
}

#[test]
fn window_is_stable_under_outside_inserts() {
    let db = open_seeded();
    let base = || FindManyArgs::default().order_by(OrderBy::asc("name"));

    let page1 = list(&db, &base().take(3));
    let anchor = page1.last().unwrap().str_field("id").unwrap().to_owned();
    let before = list(&db, &base().cursor(Cursor::new("id", anchor.as_str())).skip(1).take(3));

    // A row sorting before the anchor must not shift the anchored window.
    let user_id = page1[0].str_field("userId").unwrap().to_owned();
    let data = CreateData::new()
        .set("name", "a0")
        .set("host", "h.example.com")
        .set("username", "u")
        .set("userId", user_id);
    db.entity("SshConnection")
        .unwrap()
        .create(&data, &Projection::Default)
        .unwrap();

    let after = list(&db, &base().cursor(Cursor::new("id", anchor)).skip(1).take(3));
    assert_eq!(names(&before), names(&after));
}

#[test]
fn cursor_miss_is_empty_unless_or_throw() {
    let db = open_seeded();
    let args = FindManyArgs::default()
        .order_by(OrderBy::asc("name"))
        .cursor(Cursor::new("id", "never-assigned"))
        .take(3);
    assert!(list(&db, &args).is_empty());

    let err = db
        .entity("SshConnection")
        .unwrap()
        .find_first_or_throw(&args, &Projection::Default)
        .unwrap_err();
    assert_eq!(err.code(), "NotFound");
}

#[test]
fn cursor_requires_a_unique_field() {
    let db = open_seeded();
    let args = FindManyArgs::default().cursor(Cursor::new("name", "c1")).take(2);
    let err = db
        .entity("SshConnection")
        .unwrap()
        .find_many(&args, &Projection::Default)
        .unwrap_err();
    assert_eq!(err.code(), "Validation");
}

#[test]
fn skip_take_edges() {
    let db = open_seeded();
    let base = || FindManyArgs::default().order_by(OrderBy::asc("name"));
    assert!(list(&db, &base().skip(40)).is_empty());
    assert!(list(&db, &base().take(0)).is_empty());
    assert_eq!(list(&db, &base().skip(7)).len(), 2);
}

#[test]
fn distinct_keeps_first_seen_per_tuple() {
    let db = open_seeded();
    let conns = db.entity("SshConnection").unwrap();
    let user_id = list(&db, &FindManyArgs::default())[0]
        .str_field("userId")
        .unwrap()
        .to_owned();
    for (name, status) in [("x1", "CONNECTED"), ("x2", "CONNECTED"), ("x3", "ERROR")] {
        let data = CreateData::new()
            .set("name", name)
            .set("host", "h.example.com")
            .set("username", "u")
            .set("status", status)
            .set("userId", user_id.as_str());
        conns.create(&data, &Projection::Default).unwrap();
    }

    let args = FindManyArgs::default()
        .order_by(OrderBy::asc("name"))
        .distinct(["status"]);
    let out = list(&db, &args);
    // c1 is the first DISCONNECTED row; x1 and x3 introduce the other two.
    assert_eq!(names(&out), vec!["c1", "x1", "x3"]);
}

#[test]
fn nulls_follow_direction_unless_overridden() {
    let db = open_seeded();
    let conns = db.entity("SshConnection").unwrap();
    let all = list(&db, &FindManyArgs::default());
    let user_id = all[0].str_field("userId").unwrap().to_owned();
    let data = CreateData::new()
        .set("name", "used")
        .set("host", "h.example.com")
        .set("username", "u")
        .set("lastUsed", Value::DateTime(10))
        .set("userId", user_id);
    conns.create(&data, &Projection::Default).unwrap();

    let asc = list(&db, &FindManyArgs::default().order_by(OrderBy::asc("lastUsed")));
    assert_eq!(asc.first().unwrap().str_field("name").unwrap(), "used");
    assert_eq!(asc.last().unwrap().opt_datetime_field("lastUsed").unwrap(), None);

    let desc = list(&db, &FindManyArgs::default().order_by(OrderBy::desc("lastUsed")));
    assert_eq!(desc.last().unwrap().str_field("name").unwrap(), "used");

    let overridden = list(
        &db,
        &FindManyArgs::default().order_by(OrderBy::asc("lastUsed").nulls(NullsOrder::First)),
    );
    assert_eq!(overridden.last().unwrap().str_field("name").unwrap(), "used");
}

#[test]
fn equal_sort_keys_tie_break_on_primary_key() {
    let db = open_seeded();
    // All nine rows share the same host, so the order is the id order.
    let out = list(&db, &FindManyArgs::default().order_by(OrderBy::asc("host")));
    let ids: Vec<&str> = out.iter().map(|r| r.str_field("id").unwrap()).collect();
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    // Walking forward page by page partitions the ordered result set, for
    // any page size; walking back from the first row of a page with a
    // negative take reproduces the preceding page.
    #[test]
    fn pages_partition_for_any_size(page_size in 1i64..12) {
        let db = open_seeded();
        let base = || FindManyArgs::default().order_by(OrderBy::asc("name"));
        let full = names(&list(&db, &base()));

        let mut walked = Vec::new();
        let mut pages = Vec::new();
        let mut page = list(&db, &base().take(page_size));
        while !page.is_empty() {
            walked.extend(names(&page));
            pages.push(page.clone());
            let anchor = page.last().unwrap().str_field("id").unwrap().to_owned();
            page = list(&db, &base().cursor(Cursor::new("id", anchor)).skip(1).take(page_size));
        }
        prop_assert_eq!(&walked, &full);

        for pair in pages.windows(2) {
            let anchor = pair[1][0].str_field("id").unwrap().to_owned();
            let back = list(&db, &base().cursor(Cursor::new("id", anchor)).take(-page_size));
            prop_assert_eq!(names(&back), names(&pair[0]));
        }
    }
}
