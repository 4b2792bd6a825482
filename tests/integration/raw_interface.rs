#![allow(missing_docs)]

use tessera::db::{Database, UniqueWhere};
use tessera::model;
use tessera::mutation::CreateData;
use tessera::relation::Projection;
use tessera::Value;

fn open_seeded() -> (Database, String) {
    let db = Database::open(model::schema());
    let user = db
        .entity("User")
        .unwrap()
        .create(&CreateData::new().set("username", "raw"), &Projection::Default)
        .expect("create user");
    let user_id = user.str_field("id").unwrap().to_owned();
    let logs = db.entity("CommandLog").unwrap();
    for (command, level) in [
        ("ls", "SAFE"),
        ("pwd", "SAFE"),
        ("rm -rf /", "DANGEROUS"),
    ] {
        logs.create(
            &CreateData::new()
                .set("command", command)
                .set("safetyLevel", level)
                .set("userId", user_id.as_str()),
            &Projection::Default,
        )
        .expect("create log");
    }
    (db, user_id)
}

#[test]
fn query_raw_returns_full_records() {
    let (db, _) = open_seeded();
    let rows = db
        .query_raw(
            "SELECT * FROM CommandLog WHERE safetyLevel = $1",
            &[Value::String("SAFE".into())],
        )
        .expect("raw select");
    assert_eq!(rows.len(), 2);
    for row in &rows {
        assert_eq!(row.str_field("safetyLevel").unwrap(), "SAFE");
        assert!(row.get("createdAt").is_some());
    }

    let all = db.query_raw("SELECT * FROM CommandLog", &[]).unwrap();
    assert_eq!(all.len(), 3);
}

#[test]
fn bindings_conjoin_and_bind_by_position() {
    let (db, user_id) = open_seeded();
    let rows = db
        .query_raw(
            "SELECT * FROM CommandLog WHERE safetyLevel = $1 AND userId = $2",
            &[Value::String("SAFE".into()), Value::String(user_id)],
        )
        .unwrap();
    assert_eq!(rows.len(), 2);

    // The same parameter may be referenced more than once.
    let rows = db
        .query_raw(
            "SELECT * FROM CommandLog WHERE safetyLevel = $1 AND safetyLevel = $1",
            &[Value::String("DANGEROUS".into())],
        )
        .unwrap();
    assert_eq!(rows.len(), 1);
}

#[test]
fn execute_raw_select_reports_matched_count() {
    let (db, _) = open_seeded();
    let n = db
        .execute_raw(
            "SELECT * FROM CommandLog WHERE safetyLevel = $1",
            &[Value::String("SAFE".into())],
        )
        .unwrap();
    assert_eq!(n, 2);
}

#[test]
fn execute_raw_delete_removes_rows() {
    let (db, _) = open_seeded();
    let removed = db
        .execute_raw(
            "DELETE FROM CommandLog WHERE safetyLevel = $1",
            &[Value::String("SAFE".into())],
        )
        .unwrap();
    assert_eq!(removed, 2);
    assert_eq!(db.entity("CommandLog").unwrap().count(None).unwrap(), 1);

    let removed = db.execute_raw("DELETE FROM CommandLog", &[]).unwrap();
    assert_eq!(removed, 1);
}

#[test]
fn raw_delete_bypasses_referential_actions() {
    let (db, user_id) = open_seeded();
    let folders = db.entity("SshFolder").unwrap();
    let root = folders
        .create(
            &CreateData::new().set("name", "root").set("userId", user_id.as_str()),
            &Projection::Default,
        )
        .unwrap();
    let root_id = root.str_field("id").unwrap().to_owned();
    let child = folders
        .create(
            &CreateData::new()
                .set("name", "leaf")
                .set("parentId", root_id.as_str())
                .set("userId", user_id.as_str()),
            &Projection::Default,
        )
        .unwrap();

    // The typed path refuses this delete; the raw path does not consult the
    // relation graph at all.
    assert!(folders
        .delete(&UniqueWhere::id(root_id.as_str()), &Projection::Default)
        .is_err());
    let removed = db
        .execute_raw(
            "DELETE FROM SshFolder WHERE id = $1",
            &[Value::String(root_id.clone())],
        )
        .unwrap();
    assert_eq!(removed, 1);

    // The child survives with its now-dangling parent reference.
    let orphan = folders
        .find_unique_or_throw(
            &UniqueWhere::id(child.str_field("id").unwrap()),
            &Projection::Default,
        )
        .unwrap();
    assert_eq!(orphan.opt_str_field("parentId").unwrap(), Some(root_id.as_str()));
}

#[test]
fn malformed_statements_are_storage_errors() {
    let (db, _) = open_seeded();
    let cases = [
        "UPDATE CommandLog SET command = $1",
        "DROP TABLE CommandLog",
        "SELECT command FROM CommandLog",
        "SELECT * FROM CommandLog WHERE command = 'ls'",
        "SELECT * FROM CommandLog WHERE command = $0",
        "SELECT * FROM CommandLog WHERE command = $1 OR command = $2",
    ];
    for sql in cases {
        let err = db.execute_raw(sql, &[Value::String("x".into())]).unwrap_err();
        assert_eq!(err.code(), "StorageError", "statement: {sql}");
    }
}

#[test]
fn unknown_names_and_missing_params_are_storage_errors() {
    let (db, _) = open_seeded();

    let err = db.query_raw("SELECT * FROM Nothing", &[]).unwrap_err();
    assert_eq!(err.code(), "StorageError");

    let err = db
        .query_raw(
            "SELECT * FROM CommandLog WHERE nonexistent = $1",
            &[Value::String("x".into())],
        )
        .unwrap_err();
    assert_eq!(err.code(), "StorageError");

    let err = db
        .query_raw("SELECT * FROM CommandLog WHERE command = $2", &[Value::String("ls".into())])
        .unwrap_err();
    assert_eq!(err.code(), "StorageError");
}

#[test]
fn query_raw_rejects_non_select_verbs() {
    let (db, _) = open_seeded();
    let err = db.query_raw("DELETE FROM CommandLog", &[]).unwrap_err();
    assert_eq!(err.code(), "StorageError");
    // The refused statement must not have deleted anything.
    assert_eq!(db.entity("CommandLog").unwrap().count(None).unwrap(), 3);
}
