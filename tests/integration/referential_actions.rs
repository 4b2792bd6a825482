#![allow(missing_docs)]

use tessera::db::{Database, UniqueWhere};
use tessera::error::{ConstraintKind, TesseraError};
use tessera::filter::{Filter, ScalarCond};
use tessera::model;
use tessera::mutation::{CreateData, UpdateData};
use tessera::relation::Projection;
use tessera::schema::ReferentialAction;

fn open() -> Database {
    Database::open(model::schema())
}

fn create_user(db: &Database, username: &str) -> String {
    let rec = db
        .entity("User")
        .unwrap()
        .create(&CreateData::new().set("username", username), &Projection::Default)
        .expect("create user");
    rec.str_field("id").unwrap().to_owned()
}

fn create_folder(db: &Database, user_id: &str, name: &str, parent: Option<&str>) -> String {
    let mut data = CreateData::new().set("name", name).set("userId", user_id);
    if let Some(parent_id) = parent {
        data = data.set("parentId", parent_id);
    }
    let rec = db
        .entity("SshFolder")
        .unwrap()
        .create(&data, &Projection::Default)
        .expect("create folder");
    rec.str_field("id").unwrap().to_owned()
}

fn create_connection(db: &Database, user_id: &str, name: &str, folder: Option<&str>) -> String {
    let mut data = CreateData::new()
        .set("name", name)
        .set("host", "h.internal")
        .set("username", "ops")
        .set("userId", user_id);
    if let Some(folder_id) = folder {
        data = data.set("folderId", folder_id);
    }
    let rec = db
        .entity("SshConnection")
        .unwrap()
        .create(&data, &Projection::Default)
        .expect("create connection");
    rec.str_field("id").unwrap().to_owned()
}

#[test]
fn restrict_blocks_deleting_a_folder_with_children() {
    let db = open();
    let user_id = create_user(&db, "amy");
    let root = create_folder(&db, &user_id, "root", None);
    create_folder(&db, &user_id, "leaf", Some(&root));
    let folders = db.entity("SshFolder").unwrap();

    let err = folders
        .delete(&UniqueWhere::id(root.as_str()), &Projection::Default)
        .unwrap_err();
    assert!(matches!(
        err,
        TesseraError::Constraint {
            kind: ConstraintKind::Restrict,
            ..
        }
    ));
    assert_eq!(err.code(), "ConstraintViolation");
    // Nothing was removed.
    assert_eq!(folders.count(None).unwrap(), 2);
}

#[test]
fn leaf_first_deletion_succeeds() {
    let db = open();
    let user_id = create_user(&db, "bert");
    let root = create_folder(&db, &user_id, "root", None);
    let leaf = create_folder(&db, &user_id, "leaf", Some(&root));
    let folders = db.entity("SshFolder").unwrap();

    folders.delete(&UniqueWhere::id(leaf.as_str()), &Projection::Default).unwrap();
    folders.delete(&UniqueWhere::id(root.as_str()), &Projection::Default).unwrap();
    assert_eq!(folders.count(None).unwrap(), 0);
}

#[test]
fn set_null_detaches_optional_dependents() {
    let db = open();
    let user_id = create_user(&db, "cleo");
    let folder = create_folder(&db, &user_id, "tools", None);
    let conn = create_connection(&db, &user_id, "bastion", Some(&folder));

    db.entity("SshFolder")
        .unwrap()
        .delete(&UniqueWhere::id(folder.as_str()), &Projection::Default)
        .expect("folder delete detaches connections");

    let survivor = db
        .entity("SshConnection")
        .unwrap()
        .find_unique_or_throw(&UniqueWhere::id(conn.as_str()), &Projection::Default)
        .unwrap();
    assert_eq!(survivor.opt_str_field("folderId").unwrap(), None);
}

#[test]
fn connection_delete_detaches_logs_and_sessions() {
    let db = open();
    let user_id = create_user(&db, "dana");
    let conn = create_connection(&db, &user_id, "worker", None);
    let log = db
        .entity("CommandLog")
        .unwrap()
        .create(
            &CreateData::new()
                .set("command", "uptime")
                .set("sshConnectionId", conn.as_str())
                .set("userId", user_id.as_str()),
            &Projection::Default,
        )
        .unwrap();
    let session = db
        .entity("ChatSession")
        .unwrap()
        .create(
            &CreateData::new()
                .set("title", "debugging")
                .set("type", "SSH")
                .set("sshConnectionId", conn.as_str())
                .set("userId", user_id.as_str()),
            &Projection::Default,
        )
        .unwrap();

    db.entity("SshConnection")
        .unwrap()
        .delete(&UniqueWhere::id(conn.as_str()), &Projection::Default)
        .unwrap();

    let log = db
        .entity("CommandLog")
        .unwrap()
        .find_unique_or_throw(
            &UniqueWhere::id(log.str_field("id").unwrap()),
            &Projection::Default,
        )
        .unwrap();
    assert_eq!(log.opt_str_field("sshConnectionId").unwrap(), None);

    let session = db
        .entity("ChatSession")
        .unwrap()
        .find_unique_or_throw(
            &UniqueWhere::id(session.str_field("id").unwrap()),
            &Projection::Default,
        )
        .unwrap();
    assert_eq!(session.opt_str_field("sshConnectionId").unwrap(), None);
}

#[test]
fn session_delete_cascades_messages() {
    let db = open();
    let user_id = create_user(&db, "eric");
    let session = db
        .entity("ChatSession")
        .unwrap()
        .create(
            &CreateData::new().set("title", "notes").set("userId", user_id.as_str()),
            &Projection::Default,
        )
        .unwrap();
    let session_id = session.str_field("id").unwrap().to_owned();
    let messages = db.entity("Message").unwrap();
    for content in ["hi", "there"] {
        messages
            .create(
                &CreateData::new()
                    .set("content", content)
                    .set("sessionId", session_id.as_str())
                    .set("userId", user_id.as_str()),
                &Projection::Default,
            )
            .unwrap();
    }

    db.entity("ChatSession")
        .unwrap()
        .delete(&UniqueWhere::id(session_id.as_str()), &Projection::Default)
        .unwrap();
    assert_eq!(messages.count(None).unwrap(), 0);
}

#[test]
fn user_delete_cascades_the_whole_ownership_graph() {
    let db = open();
    let user_id = create_user(&db, "frida");
    let bystander = create_user(&db, "gus");
    let bystander_conn = create_connection(&db, &bystander, "other", None);

    // A nested folder tree plus a filed connection; the cascade covers both
    // even though the child tree carries a restrict policy of its own.
    let root = create_folder(&db, &user_id, "root", None);
    let mid = create_folder(&db, &user_id, "mid", Some(&root));
    create_folder(&db, &user_id, "leaf", Some(&mid));
    create_connection(&db, &user_id, "filed", Some(&root));
    let session = db
        .entity("ChatSession")
        .unwrap()
        .create(
            &CreateData::new().set("title", "work").set("userId", user_id.as_str()),
            &Projection::Default,
        )
        .unwrap();
    db.entity("Message")
        .unwrap()
        .create(
            &CreateData::new()
                .set("content", "ping")
                .set("sessionId", session.str_field("id").unwrap())
                .set("userId", user_id.as_str()),
            &Projection::Default,
        )
        .unwrap();

    db.entity("User")
        .unwrap()
        .delete(&UniqueWhere::id(user_id.as_str()), &Projection::Default)
        .expect("user delete cascades");

    assert_eq!(db.entity("SshFolder").unwrap().count(None).unwrap(), 0);
    assert_eq!(db.entity("ChatSession").unwrap().count(None).unwrap(), 0);
    assert_eq!(db.entity("Message").unwrap().count(None).unwrap(), 0);
    // The other user's data is untouched.
    assert_eq!(db.entity("SshConnection").unwrap().count(None).unwrap(), 1);
    let other = db
        .entity("SshConnection")
        .unwrap()
        .find_unique_or_throw(&UniqueWhere::id(bystander_conn.as_str()), &Projection::Default)
        .unwrap();
    assert_eq!(other.str_field("name").unwrap(), "other");
}

#[test]
fn parent_reassignment_cannot_form_a_cycle() {
    let db = open();
    let user_id = create_user(&db, "hana");
    let a = create_folder(&db, &user_id, "a", None);
    let b = create_folder(&db, &user_id, "b", Some(&a));
    let c = create_folder(&db, &user_id, "c", Some(&b));
    let folders = db.entity("SshFolder").unwrap();

    for (node, new_parent) in [(&a, &c), (&a, &b), (&a, &a)] {
        let err = folders
            .update(
                &UniqueWhere::id(node.as_str()),
                &UpdateData::new().set("parentId", new_parent.as_str()),
                &Projection::Default,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            TesseraError::Constraint {
                kind: ConstraintKind::Cycle,
                ..
            }
        ));
    }

    // Reparenting within the tree is still allowed.
    folders
        .update(
            &UniqueWhere::id(c.as_str()),
            &UpdateData::new().set("parentId", a.as_str()),
            &Projection::Default,
        )
        .expect("legal reparent");
}

#[test]
fn ownership_and_foreign_keys_must_resolve() {
    let db = open();
    let user_id = create_user(&db, "iris");

    let err = db
        .entity("SshFolder")
        .unwrap()
        .create(
            &CreateData::new().set("name", "orphan").set("userId", "no-such-user"),
            &Projection::Default,
        )
        .unwrap_err();
    assert!(matches!(
        err,
        TesseraError::Constraint {
            kind: ConstraintKind::Ownership,
            ..
        }
    ));

    let err = db
        .entity("SshConnection")
        .unwrap()
        .create(
            &CreateData::new()
                .set("name", "dangling")
                .set("host", "h")
                .set("username", "u")
                .set("folderId", "no-such-folder")
                .set("userId", user_id.as_str()),
            &Projection::Default,
        )
        .unwrap_err();
    assert!(matches!(
        err,
        TesseraError::Constraint {
            kind: ConstraintKind::ForeignKey,
            ..
        }
    ));
}

#[test]
fn delete_many_counts_matched_rows_once() {
    let db = open();
    let user_id = create_user(&db, "june");
    let session = db
        .entity("ChatSession")
        .unwrap()
        .create(
            &CreateData::new().set("title", "bulk").set("userId", user_id.as_str()),
            &Projection::Default,
        )
        .unwrap();
    let session_id = session.str_field("id").unwrap().to_owned();
    let messages = db.entity("Message").unwrap();
    for i in 0..4 {
        messages
            .create(
                &CreateData::new()
                    .set("content", format!("m{i}"))
                    .set("sessionId", session_id.as_str())
                    .set("userId", user_id.as_str()),
                &Projection::Default,
            )
            .unwrap();
    }

    let filter = Filter::scalar("content", ScalarCond::contains("m"));
    assert_eq!(messages.delete_many(Some(&filter)).unwrap(), 4);
    assert_eq!(messages.count(None).unwrap(), 0);
}

#[test]
fn delete_policy_override_turns_restrict_into_cascade() {
    let schema = model::schema_builder()
        .on_delete("SshFolder", "children", ReferentialAction::Cascade)
        .build()
        .expect("schema with override");
    let db = Database::open(schema);
    let user_id = create_user(&db, "kira");
    let root = create_folder(&db, &user_id, "root", None);
    let mid = create_folder(&db, &user_id, "mid", Some(&root));
    create_folder(&db, &user_id, "leaf", Some(&mid));
    let folders = db.entity("SshFolder").unwrap();

    folders
        .delete(&UniqueWhere::id(root.as_str()), &Projection::Default)
        .expect("cascade removes the subtree");
    assert_eq!(folders.count(None).unwrap(), 0);
}
