use sqlkit_sqlite::function::{aggregate1, scalar1};
use sqlkit_sqlite::{ColumnInfo, Connection, Result, StepResult, TransactionMode, Value};

fn open() -> Connection {
    Connection::open_memory().expect("open sqlite memory db")
}

#[test]
fn sqlite_autocommit_tracks_begin_commit_and_rollback() {
    let conn = open();
    assert!(conn.is_auto_commit().unwrap());

    conn.begin_transaction(TransactionMode::Deferred).unwrap();
    assert!(!conn.is_auto_commit().unwrap());
    conn.commit().unwrap();
    assert!(conn.is_auto_commit().unwrap());

    conn.begin_transaction(TransactionMode::Immediate).unwrap();
    assert!(!conn.is_auto_commit().unwrap());
    conn.rollback().unwrap();
    assert!(conn.is_auto_commit().unwrap());
}

#[test]
fn sqlite_reset_clears_busy_but_keeps_bindings() {
    let conn = open();
    let mut stmt = conn.prepare("SELECT ?1 * 2").unwrap();
    stmt.bind(0, &Value::Integer(21)).unwrap();

    assert_eq!(stmt.step().unwrap(), StepResult::Row);
    assert!(stmt.is_busy().unwrap());
    stmt.reset().unwrap();
    assert!(!stmt.is_busy().unwrap());

    assert_eq!(stmt.step().unwrap(), StepResult::Row);
    assert_eq!(stmt.column_value(0).unwrap(), Value::Integer(42));
}

#[test]
fn sqlite_column_info_orders_lexicographically() {
    let mut columns = vec![
        ColumnInfo::new("b").table_name("t"),
        ColumnInfo::new("a").table_name("z"),
        ColumnInfo::new("a").table_name("t").declared_type("TEXT"),
        ColumnInfo::new("a").table_name("t"),
    ];
    columns.sort();
    let keys: Vec<_> = columns
        .iter()
        .map(|c| (c.name.as_str(), c.table_name.as_str(), c.declared_type.as_deref()))
        .collect();
    assert_eq!(
        keys,
        [
            ("a", "t", None),
            ("a", "t", Some("TEXT")),
            ("a", "z", None),
            ("b", "t", None),
        ]
    );
}

#[test]
fn sqlite_values_round_trip_exactly() {
    let conn = open();
    let values = [
        Value::Integer(i64::MIN),
        Value::Integer(i64::MAX),
        Value::Float(0.1),
        Value::Float(-1.5e300),
        Value::Text("héllo, wörld".into()),
        Value::Text(String::new()),
        Value::Blob(vec![0, 255, 1, 254]),
        Value::Null,
    ];
    let row = conn
        .query_row("SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8", &values)
        .unwrap()
        .expect("one row");
    assert_eq!(row.values(), &values[..]);
}

#[test]
fn sqlite_null_coercions_never_fail() {
    let conn = open();
    let value = conn.query_scalar("SELECT NULL", &[]).unwrap();
    assert!(value.is_null());
    assert_eq!(value.to_i64(), 0);
    assert_eq!(value.to_i32(), 0);
    assert!(value.to_f64().abs() < f64::EPSILON);
    assert!(!value.to_bool());
    assert_eq!(value.to_text(), "");
    assert!(value.to_blob().is_empty());
}

#[test]
fn sqlite_scalar_and_aggregate_share_one_key_space() {
    let conn = open();
    conn.register_scalar_function(scalar1("twice", |v| Ok(Value::Integer(v.to_i64() * 2))))
        .unwrap();
    let err = conn
        .register_aggregate_function(aggregate1(
            "TWICE",
            0_i64,
            |acc, v| Ok(acc + v.to_i64()),
            |acc| Ok(Value::Integer(acc)),
        ))
        .unwrap_err();
    assert!(err.is_contract_violation());

    // The original registration still works.
    assert_eq!(
        conn.query_scalar("SELECT twice(4)", &[]).unwrap(),
        Value::Integer(8)
    );
}

#[test]
fn sqlite_sum_plus_count_aggregate() {
    let conn = open();
    conn.register_aggregate_function(aggregate1(
        "sum_plus_count",
        (0_i64, 0_i64),
        |(sum, count), v| Ok((sum + v.to_i64(), count + 1)),
        |(sum, count)| Ok(Value::Integer(sum + count)),
    ))
    .unwrap();
    conn.execute_batch(
        "CREATE TABLE nums (n INTEGER);
         INSERT INTO nums VALUES (0), (1), (2), (3), (4);",
    )
    .unwrap();
    assert_eq!(
        conn.query_scalar("SELECT sum_plus_count(n) FROM nums", &[])
            .unwrap(),
        Value::Integer(15)
    );
}

#[test]
fn sqlite_cube_scalar_function() {
    let conn = open();
    conn.register_scalar_function(
        scalar1("cube", |x| {
            let x = x.to_i64();
            Ok(Value::Integer(x * x * x))
        })
        .deterministic(true),
    )
    .unwrap();
    assert_eq!(
        conn.query_scalar("SELECT cube(5)", &[]).unwrap(),
        Value::Integer(125)
    );
}

#[test]
fn sqlite_run_in_transaction_failure_leaves_connection_usable() {
    let conn = open();
    conn.execute_batch("CREATE TABLE accounts (id INTEGER PRIMARY KEY, balance INTEGER NOT NULL)")
        .unwrap();
    conn.execute("INSERT INTO accounts (balance) VALUES (?1)", &[Value::Integer(100)])
        .unwrap();

    let result: Result<()> = conn.run_in_transaction(|c| {
        c.execute("UPDATE accounts SET balance = balance - 50", &[])?;
        c.execute("INSERT INTO accounts (balance) VALUES (NULL)", &[])?;
        Ok(())
    });
    let err = result.unwrap_err();
    assert!(err.is_constraint());

    assert_eq!(
        conn.query_scalar("SELECT balance FROM accounts", &[]).unwrap(),
        Value::Integer(100)
    );
    assert!(conn.is_auto_commit().unwrap());

    conn.run_in_transaction(|c| {
        c.execute("UPDATE accounts SET balance = balance - 50", &[])?;
        Ok(())
    })
    .unwrap();
    assert_eq!(
        conn.query_scalar("SELECT balance FROM accounts", &[]).unwrap(),
        Value::Integer(50)
    );
}

#[test]
fn sqlite_close_finalizes_open_statements() {
    let conn = open();
    conn.execute_batch("CREATE TABLE t (x); INSERT INTO t VALUES (1), (2);")
        .unwrap();

    let mut idle = conn.prepare("SELECT x FROM t").unwrap();
    let mut running = conn.prepare("SELECT x FROM t ORDER BY x").unwrap();
    assert_eq!(running.step().unwrap(), StepResult::Row);
    assert_eq!(conn.statement_count(), 2);

    conn.close().expect("close with open statements");
    assert!(conn.is_closed());
    assert!(idle.is_closed());
    assert!(running.is_closed());
    assert!(idle.step().unwrap_err().is_disposed());
    assert!(running.current().unwrap_err().is_disposed());
    assert!(conn.query_scalar("SELECT 1", &[]).unwrap_err().is_disposed());

    // Closing again is a no-op.
    conn.close().unwrap();
    idle.close().unwrap();
}

#[test]
fn sqlite_result_sets_serialize_to_json() {
    let conn = open();
    let rows = conn
        .query("SELECT 1 AS id, 'Alice' AS name, NULL AS note", &[])
        .unwrap();
    let row = &rows[0];

    let names: Vec<&str> = row.columns().iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, ["id", "name", "note"]);
    assert_eq!(
        serde_json::to_value(row.values()).unwrap(),
        serde_json::json!([{ "Integer": 1 }, { "Text": "Alice" }, "Null"])
    );

    let columns_json = serde_json::to_string(row.columns()).unwrap();
    let columns: Vec<ColumnInfo> = serde_json::from_str(&columns_json).unwrap();
    assert_eq!(columns, row.columns());
}
