#![allow(missing_docs)]

use tessera::aggregate::{
    AggOp, AggregateArgs, AggregateSelections, CountResult, GroupByArgs, Having,
};
use tessera::db::Database;
use tessera::filter::{Filter, ScalarCond};
use tessera::model;
use tessera::mutation::CreateData;
use tessera::query::OrderBy;
use tessera::relation::Projection;
use tessera::Value;

fn open_seeded() -> Database {
    let db = Database::open(model::schema());
    let user = db
        .entity("User")
        .unwrap()
        .create(&CreateData::new().set("username", "audit"), &Projection::Default)
        .expect("create user");
    let user_id = user.str_field("id").unwrap().to_owned();
    let logs = db.entity("CommandLog").unwrap();
    let rows: [(&str, &str, Option<i64>, Option<i64>); 6] = [
        ("ls -la", "SAFE", Some(0), Some(12)),
        ("cat /etc/hosts", "SAFE", Some(0), Some(8)),
        ("systemctl restart nginx", "CAUTION", Some(0), Some(340)),
        ("rm -rf /tmp/build", "DANGEROUS", Some(0), Some(95)),
        ("dd if=/dev/zero of=/dev/sda", "DANGEROUS", None, None),
        ("shutdown now", "DANGEROUS", Some(1), Some(3)),
    ];
    for (command, level, exit_code, duration) in rows {
        let mut data = CreateData::new()
            .set("command", command)
            .set("safetyLevel", level)
            .set("userId", user_id.as_str());
        if let Some(code) = exit_code {
            data = data.set("exitCode", code);
        }
        if let Some(d) = duration {
            data = data.set("duration", d);
        }
        logs.create(&data, &Projection::Default).expect("create log");
    }
    db
}

#[test]
fn aggregate_count_min_max_avg_sum() {
    let db = open_seeded();
    let logs = db.entity("CommandLog").unwrap();
    let args = AggregateArgs {
        filter: None,
        selections: AggregateSelections::default()
            .count_all()
            .min(["duration"])
            .max(["duration"])
            .avg(["duration"])
            .sum(["duration"]),
    };
    let result = logs.aggregate(&args).expect("aggregate");

    assert_eq!(result.count, Some(CountResult::Total(6)));
    assert_eq!(result.min[0].1, Value::Int(3));
    assert_eq!(result.max[0].1, Value::Int(340));
    assert_eq!(result.sum[0].1, Value::Int(458));
    // Null durations are excluded from the mean.
    assert_eq!(result.avg[0].1, Value::Float(458.0 / 5.0));
}

#[test]
fn per_field_counts_skip_nulls() {
    let db = open_seeded();
    let logs = db.entity("CommandLog").unwrap();
    let args = AggregateArgs {
        filter: None,
        selections: AggregateSelections::default().count_fields(["exitCode", "duration", "output"]),
    };
    let result = logs.aggregate(&args).unwrap();
    assert_eq!(
        result.count,
        Some(CountResult::Fields(vec![
            ("exitCode".to_owned(), 5),
            ("duration".to_owned(), 5),
            ("output".to_owned(), 0),
        ]))
    );
}

#[test]
fn empty_input_yields_null_aggregates() {
    let db = open_seeded();
    let logs = db.entity("CommandLog").unwrap();
    let args = AggregateArgs {
        filter: Some(Filter::scalar("command", ScalarCond::equals("never-run"))),
        selections: AggregateSelections::default()
            .count_all()
            .min(["duration"])
            .avg(["duration"])
            .sum(["duration"]),
    };
    let result = logs.aggregate(&args).unwrap();
    assert_eq!(result.count, Some(CountResult::Total(0)));
    assert_eq!(result.min[0].1, Value::Null);
    assert_eq!(result.avg[0].1, Value::Null);
    assert_eq!(result.sum[0].1, Value::Null);
}

#[test]
fn min_max_work_on_orderable_non_numeric_fields() {
    let db = open_seeded();
    let logs = db.entity("CommandLog").unwrap();
    let args = AggregateArgs {
        filter: None,
        selections: AggregateSelections::default().min(["command"]).max(["createdAt"]),
    };
    let result = logs.aggregate(&args).unwrap();
    assert_eq!(result.min[0].1, Value::String("cat /etc/hosts".to_owned()));
    assert!(matches!(result.max[0].1, Value::DateTime(_)));
}

#[test]
fn avg_and_sum_require_numeric_fields() {
    let db = open_seeded();
    let logs = db.entity("CommandLog").unwrap();
    let args = AggregateArgs {
        filter: None,
        selections: AggregateSelections::default().avg(["command"]),
    };
    assert_eq!(logs.aggregate(&args).unwrap_err().code(), "Validation");

    let args = AggregateArgs {
        filter: None,
        selections: AggregateSelections::default().min(["metadata"]),
    };
    assert_eq!(logs.aggregate(&args).unwrap_err().code(), "Validation");
}

#[test]
fn group_by_counts_per_key() {
    let db = open_seeded();
    let logs = db.entity("CommandLog").unwrap();
    let args = GroupByArgs {
        by: vec!["safetyLevel".to_owned()],
        order_by: vec![OrderBy::asc("safetyLevel")],
        selections: AggregateSelections::default().count_all().sum(["duration"]),
        ..GroupByArgs::default()
    };
    let groups = logs.group_by(&args).expect("group_by");
    assert_eq!(groups.len(), 3);

    assert_eq!(groups[0].by_value("safetyLevel"), Some(&Value::String("CAUTION".into())));
    assert_eq!(groups[0].aggregates.count, Some(CountResult::Total(1)));
    assert_eq!(groups[1].by_value("safetyLevel"), Some(&Value::String("DANGEROUS".into())));
    assert_eq!(groups[1].aggregates.count, Some(CountResult::Total(3)));
    assert_eq!(groups[1].aggregates.sum[0].1, Value::Int(98));
    assert_eq!(groups[2].by_value("safetyLevel"), Some(&Value::String("SAFE".into())));
    assert_eq!(groups[2].aggregates.count, Some(CountResult::Total(2)));
}

#[test]
fn having_filters_groups() {
    let db = open_seeded();
    let logs = db.entity("CommandLog").unwrap();
    let args = GroupByArgs {
        by: vec!["safetyLevel".to_owned()],
        having: Some(Having::Aggregate {
            op: AggOp::Count,
            field: None,
            cond: ScalarCond::gte(2i64),
        }),
        order_by: vec![OrderBy::asc("safetyLevel")],
        selections: AggregateSelections::default().count_all(),
        ..GroupByArgs::default()
    };
    let groups = logs.group_by(&args).unwrap();
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].by_value("safetyLevel"), Some(&Value::String("DANGEROUS".into())));
    assert_eq!(groups[1].by_value("safetyLevel"), Some(&Value::String("SAFE".into())));

    let field_having = GroupByArgs {
        by: vec!["safetyLevel".to_owned()],
        having: Some(Having::Field {
            field: "safetyLevel".to_owned(),
            cond: ScalarCond::not("SAFE"),
        }),
        selections: AggregateSelections::default().count_all(),
        ..GroupByArgs::default()
    };
    assert_eq!(logs.group_by(&field_having).unwrap().len(), 2);
}

#[test]
fn group_by_shape_violations_are_validation_errors() {
    let db = open_seeded();
    let logs = db.entity("CommandLog").unwrap();

    let empty_by = GroupByArgs::default();
    assert_eq!(logs.group_by(&empty_by).unwrap_err().code(), "Validation");

    let having_outside_by = GroupByArgs {
        by: vec!["safetyLevel".to_owned()],
        having: Some(Having::Field {
            field: "command".to_owned(),
            cond: ScalarCond::equals("ls -la"),
        }),
        ..GroupByArgs::default()
    };
    assert_eq!(logs.group_by(&having_outside_by).unwrap_err().code(), "Validation");

    let order_outside_by = GroupByArgs {
        by: vec!["safetyLevel".to_owned()],
        order_by: vec![OrderBy::asc("command")],
        take: Some(2),
        ..GroupByArgs::default()
    };
    assert_eq!(logs.group_by(&order_outside_by).unwrap_err().code(), "Validation");

    let negative_take = GroupByArgs {
        by: vec!["safetyLevel".to_owned()],
        take: Some(-1),
        ..GroupByArgs::default()
    };
    assert_eq!(logs.group_by(&negative_take).unwrap_err().code(), "Validation");

    let having_sum_on_string = GroupByArgs {
        by: vec!["safetyLevel".to_owned()],
        having: Some(Having::Aggregate {
            op: AggOp::Sum,
            field: Some("command".to_owned()),
            cond: ScalarCond::gte(1i64),
        }),
        ..GroupByArgs::default()
    };
    assert_eq!(logs.group_by(&having_sum_on_string).unwrap_err().code(), "Validation");

    let having_pattern = GroupByArgs {
        by: vec!["safetyLevel".to_owned()],
        having: Some(Having::Field {
            field: "safetyLevel".to_owned(),
            cond: ScalarCond::contains("SAFE"),
        }),
        ..GroupByArgs::default()
    };
    assert_eq!(logs.group_by(&having_pattern).unwrap_err().code(), "Validation");
}

#[test]
fn group_windows_apply_after_ordering() {
    let db = open_seeded();
    let logs = db.entity("CommandLog").unwrap();
    let args = GroupByArgs {
        by: vec!["safetyLevel".to_owned()],
        order_by: vec![OrderBy::desc("safetyLevel")],
        skip: 1,
        take: Some(1),
        selections: AggregateSelections::default().count_all(),
        ..GroupByArgs::default()
    };
    let groups = logs.group_by(&args).unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].by_value("safetyLevel"), Some(&Value::String("DANGEROUS".into())));
}

#[test]
fn integer_sums_saturate_instead_of_wrapping() {
    let db = Database::open(model::schema());
    let user = db
        .entity("User")
        .unwrap()
        .create(&CreateData::new().set("username", "extreme"), &Projection::Default)
        .unwrap();
    let user_id = user.str_field("id").unwrap().to_owned();
    let logs = db.entity("CommandLog").unwrap();
    for command in ["first", "second"] {
        logs.create(
            &CreateData::new()
                .set("command", command)
                .set("duration", i64::MAX)
                .set("userId", user_id.as_str()),
            &Projection::Default,
        )
        .unwrap();
    }

    let args = AggregateArgs {
        filter: None,
        selections: AggregateSelections::default().sum(["duration"]),
    };
    let result = logs.aggregate(&args).unwrap();
    assert_eq!(result.sum[0].1, Value::Int(i64::MAX));
}

#[test]
fn entity_count_honors_filters() {
    let db = open_seeded();
    let logs = db.entity("CommandLog").unwrap();
    assert_eq!(logs.count(None).unwrap(), 6);
    let dangerous = Filter::scalar("safetyLevel", ScalarCond::equals("DANGEROUS"));
    assert_eq!(logs.count(Some(&dangerous)).unwrap(), 3);
}
