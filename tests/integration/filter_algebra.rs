#![allow(missing_docs)]

use proptest::prelude::*;
use tessera::db::{Database, DatabaseOptions};
use tessera::filter::{Filter, ScalarCond};
use tessera::model;
use tessera::mutation::CreateData;
use tessera::relation::Projection;
use tessera::Value;

fn open() -> Database {
    Database::open(model::schema())
}

fn seed(db: &Database) -> String {
    let user = db
        .entity("User")
        .unwrap()
        .create(&CreateData::new().set("username", "ops"), &Projection::Default)
        .expect("create user");
    let user_id = user.str_field("id").unwrap().to_owned();
    let conns = db.entity("SshConnection").unwrap();
    let rows = [
        ("alpha", "alpha.example.com", 22i64, "CONNECTED", true),
        ("beta", "Beta.example.com", 2222, "DISCONNECTED", false),
        ("gamma", "gamma.internal", 22, "ERROR", true),
        ("delta", "delta.example.com", 8022, "DISCONNECTED", false),
    ];
    for (name, host, port, status, used) in rows {
        let mut data = CreateData::new()
            .set("name", name)
            .set("host", host)
            .set("port", port)
            .set("username", "deploy")
            .set("status", status)
            .set("userId", user_id.as_str());
        if used {
            data = data.set("lastUsed", Value::now());
        }
        conns.create(&data, &Projection::Default).expect("create connection");
    }
    user_id
}

fn count(db: &Database, filter: &Filter) -> u64 {
    db.entity("SshConnection")
        .unwrap()
        .count(Some(filter))
        .expect("count")
}

#[test]
fn scalar_operators() {
    let db = open();
    seed(&db);

    assert_eq!(count(&db, &Filter::scalar("port", ScalarCond::equals(22i64))), 2);
    assert_eq!(count(&db, &Filter::scalar("port", ScalarCond::not(22i64))), 2);
    assert_eq!(
        count(
            &db,
            &Filter::scalar(
                "status",
                ScalarCond::is_in(vec!["CONNECTED".into(), "ERROR".into()])
            )
        ),
        2
    );
    assert_eq!(count(&db, &Filter::scalar("port", ScalarCond::lt(100i64))), 2);
    assert_eq!(count(&db, &Filter::scalar("port", ScalarCond::gte(2222i64))), 2);
}

#[test]
fn string_operators_and_case_folding() {
    let db = open();
    seed(&db);

    assert_eq!(
        count(&db, &Filter::scalar("host", ScalarCond::contains("example"))),
        3
    );
    assert_eq!(
        count(
            &db,
            &Filter::scalar(
                "host",
                ScalarCond {
                    starts_with: Some("beta".into()),
                    ..ScalarCond::default()
                }
            )
        ),
        0
    );
    assert_eq!(
        count(
            &db,
            &Filter::scalar(
                "host",
                ScalarCond {
                    starts_with: Some("beta".into()),
                    ..ScalarCond::default()
                }
                .insensitive()
            )
        ),
        1
    );
    assert_eq!(
        count(
            &db,
            &Filter::scalar(
                "host",
                ScalarCond {
                    ends_with: Some(".internal".into()),
                    ..ScalarCond::default()
                }
            )
        ),
        1
    );
    // String pattern operators on a non-string field are rejected.
    let err = db
        .entity("SshConnection")
        .unwrap()
        .count(Some(&Filter::scalar("port", ScalarCond::contains("2"))))
        .unwrap_err();
    assert_eq!(err.code(), "Validation");
}

#[test]
fn null_comparisons_are_two_valued() {
    let db = open();
    seed(&db);

    // Two rows store a null lastUsed.
    assert_eq!(count(&db, &Filter::scalar("lastUsed", ScalarCond::is_null())), 2);
    // A comparison against a stored null is simply false.
    assert_eq!(
        count(
            &db,
            &Filter::scalar("lastUsed", ScalarCond::gte(Value::DateTime(0)))
        ),
        2
    );
    // Plain negation: null rows fail the inner condition, so they match.
    assert_eq!(
        count(
            &db,
            &Filter::not(Filter::scalar(
                "lastUsed",
                ScalarCond::gte(Value::DateTime(0))
            ))
        ),
        2
    );
}

#[test]
fn combinators_nest() {
    let db = open();
    seed(&db);

    let f = Filter::And(vec![
        Filter::scalar("port", ScalarCond::equals(22i64)),
        Filter::Or(vec![
            Filter::scalar("status", ScalarCond::equals("CONNECTED")),
            Filter::scalar("status", ScalarCond::equals("ERROR")),
        ]),
    ]);
    assert_eq!(count(&db, &f), 2);
    assert_eq!(count(&db, &Filter::And(vec![])), 4);
    assert_eq!(count(&db, &Filter::not(Filter::And(vec![]))), 0);
}

#[test]
fn conflicting_and_malformed_leaves_are_rejected() {
    let db = open();
    seed(&db);
    let conns = db.entity("SshConnection").unwrap();

    let conflict = Filter::scalar(
        "name",
        ScalarCond {
            equals: Some("alpha".into()),
            r#in: Some(vec!["alpha".into()]),
            ..ScalarCond::default()
        },
    );
    assert_eq!(conns.count(Some(&conflict)).unwrap_err().code(), "Validation");

    let unknown = Filter::scalar("nope", ScalarCond::equals("x"));
    assert_eq!(conns.count(Some(&unknown)).unwrap_err().code(), "Validation");

    let bad_variant = Filter::scalar("status", ScalarCond::equals("OFFLINE"));
    assert_eq!(conns.count(Some(&bad_variant)).unwrap_err().code(), "Validation");

    let cross_typed = Filter::scalar("port", ScalarCond::equals("22"));
    assert_eq!(conns.count(Some(&cross_typed)).unwrap_err().code(), "Validation");
}

#[test]
fn budgets_bound_tree_size() {
    let db = Database::new(model::schema(), DatabaseOptions::strict());
    seed(&db);
    let conns = db.entity("SshConnection").unwrap();

    let mut deep = Filter::scalar("port", ScalarCond::equals(22i64));
    for _ in 0..50 {
        deep = Filter::not(deep);
    }
    assert_eq!(conns.count(Some(&deep)).unwrap_err().code(), "Validation");

    let wide = Filter::scalar(
        "port",
        ScalarCond::is_in((0..200i64).map(Value::Int).collect()),
    );
    assert_eq!(conns.count(Some(&wide)).unwrap_err().code(), "Validation");

    let in_budget = Filter::scalar(
        "port",
        ScalarCond::is_in((0..100i64).map(Value::Int).collect()),
    );
    assert!(conns.count(Some(&in_budget)).is_ok());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    // De Morgan holds under two-valued evaluation: !(A && B) == !A || !B
    // and !(A || B) == !A && !B, measured as matched-row counts.
    #[test]
    fn de_morgan_over_random_ports(
        ports in proptest::collection::vec(0i64..64, 1..24),
        a in 0i64..64,
        b in 0i64..64,
    ) {
        let db = open();
        let user = db
            .entity("User")
            .unwrap()
            .create(&CreateData::new(), &Projection::Default)
            .unwrap();
        let user_id = user.str_field("id").unwrap().to_owned();
        let conns = db.entity("SshConnection").unwrap();
        for (i, port) in ports.iter().enumerate() {
            let data = CreateData::new()
                .set("name", format!("c{i}"))
                .set("host", "h.example.com")
                .set("port", *port)
                .set("username", "u")
                .set("userId", user_id.as_str());
            conns.create(&data, &Projection::Default).unwrap();
        }

        let cond_a = || Filter::scalar("port", ScalarCond::gte(a));
        let cond_b = || Filter::scalar("port", ScalarCond::lt(b));

        let not_and = Filter::not(Filter::And(vec![cond_a(), cond_b()]));
        let or_nots = Filter::Or(vec![Filter::not(cond_a()), Filter::not(cond_b())]);
        prop_assert_eq!(count(&db, &not_and), count(&db, &or_nots));

        let not_or = Filter::not(Filter::Or(vec![cond_a(), cond_b()]));
        let and_nots = Filter::And(vec![Filter::not(cond_a()), Filter::not(cond_b())]);
        prop_assert_eq!(count(&db, &not_or), count(&db, &and_nots));
    }
}
