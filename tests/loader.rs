mod common;

use chrono::NaiveDate;
use common::{Event, RecordingConnection};
use csv_to_trino::data::Value;
use csv_to_trino::error::LoadError;
use csv_to_trino::loader::{bind_columns, insert_rows, typed_columns};
use csv_to_trino::source::SourceTable;
use log::{Level, LevelFilter, Log, Metadata, Record};
use proptest::prelude::*;
use std::sync::{Mutex, Once};

struct CapturedLog {
    records: Mutex<Vec<(Level, String)>>,
}

impl Log for CapturedLog {
    fn enabled(&self, _: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if let Ok(mut records) = self.records.lock() {
            records.push((record.level(), record.args().to_string()));
        }
    }

    fn flush(&self) {}
}

static CAPTURED: CapturedLog = CapturedLog {
    records: Mutex::new(Vec::new()),
};

fn captured_warnings() -> Vec<String> {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        log::set_logger(&CAPTURED).expect("no other logger installed");
        log::set_max_level(LevelFilter::Warn);
    });
    CAPTURED
        .records
        .lock()
        .unwrap()
        .iter()
        .filter(|(level, _)| *level == Level::Warn)
        .map(|(_, message)| message.clone())
        .collect()
}

fn table(column_count: usize, rows: &[&[&str]]) -> SourceTable {
    SourceTable::new(
        "purchases.csv",
        column_count,
        rows.iter()
            .map(|row| row.iter().map(|v| v.to_string()).collect())
            .collect(),
    )
}

fn text(value: &str) -> Value {
    Value::Text(value.to_string())
}

#[test]
fn end_to_end_inserts_each_row_then_commits_and_releases() {
    let connection = RecordingConnection::with_columns(&["a", "b"]);
    let log = connection.log();
    let source = table(2, &[&["x1", "y1"], &["x2", "y2"], &["x3", "y3"]]);

    let summary = insert_rows(connection, &source, "t", true).expect("load succeeds");
    assert_eq!(summary.rows, 3);
    assert_eq!(summary.columns, vec!["a", "b"]);
    assert_eq!(summary.truncated_from, None);

    let events = log.events();
    // discovery, three inserts, commit, cursor close, connection close
    assert_eq!(events.len(), 7);
    assert!(matches!(&events[0], Event::Execute { sql, .. } if sql.contains("information_schema.columns")));
    for event in &events[1..4] {
        match event {
            Event::Execute { sql, params } => {
                assert_eq!(sql, "INSERT INTO t (\"a\", \"b\") VALUES (?, ?)");
                assert_eq!(params.len(), 2);
            }
            other => panic!("expected insert, got {other:?}"),
        }
    }
    assert_eq!(
        &events[4..],
        &[Event::Commit, Event::CursorClose, Event::ConnectionClose]
    );
    assert_eq!(
        log.inserted_rows()[2],
        vec![text("x3"), text("y3")]
    );
}

#[test]
fn wide_table_is_truncated_to_csv_width() {
    captured_warnings();
    let connection = RecordingConnection::with_columns(&["id", "name", "date_opened"]);
    let log = connection.log();
    let source = table(2, &[&["1", "Alice"], &["2", "Bob"]]);

    let summary = insert_rows(connection, &source, "accounts", true).expect("load succeeds");
    assert_eq!(summary.columns, vec!["id", "name"]);
    assert_eq!(summary.truncated_from, Some(3));
    assert!(
        captured_warnings()
            .iter()
            .any(|message| message == "Table has 3 columns but CSV only has 2 columns")
    );
    assert!(
        log.statements()
            .iter()
            .any(|sql| sql == "INSERT INTO accounts (\"id\", \"name\") VALUES (?, ?)")
    );
    for params in log.inserted_rows() {
        assert_eq!(params.len(), 2);
    }
}

#[test]
fn narrow_table_binds_only_its_columns() {
    let connection = RecordingConnection::with_columns(&["id"]);
    let log = connection.log();
    let source = table(3, &[&["1", "ignored", "also ignored"]]);

    insert_rows(connection, &source, "t", true).expect("load succeeds");
    assert_eq!(log.inserted_rows(), vec![vec![Value::Integer(1)]]);
}

#[test]
fn short_rows_bind_null_for_missing_fields() {
    let connection = RecordingConnection::with_columns(&["id", "name"]);
    let log = connection.log();
    let source = table(2, &[&["1", "A"], &["2"]]);

    insert_rows(connection, &source, "t", false).expect("load succeeds");
    assert_eq!(
        log.inserted_rows(),
        vec![vec![text("1"), text("A")], vec![text("2"), Value::Null]]
    );
}

#[test]
fn inferred_types_still_null_fill_short_rows() {
    let connection = RecordingConnection::with_columns(&["id", "name"]);
    let log = connection.log();
    let source = table(2, &[&["1", "A"], &["2"]]);

    insert_rows(connection, &source, "t", true).expect("load succeeds");
    assert_eq!(
        log.inserted_rows()[1],
        vec![Value::Integer(2), Value::Null]
    );
}

#[test]
fn date_named_column_is_coerced() {
    let connection = RecordingConnection::with_columns(&["ticker", "trade_date"]);
    let log = connection.log();
    let source = table(2, &[&["AAPL", "2023-01-15"], &["MSFT", ""]]);

    insert_rows(connection, &source, "t", true).expect("load succeeds");
    let rows = log.inserted_rows();
    assert_eq!(
        rows[0][1],
        Value::Date(NaiveDate::from_ymd_opt(2023, 1, 15).unwrap())
    );
    assert_eq!(rows[1][1], Value::Null);
}

#[test]
fn unparseable_date_column_keeps_original_text() {
    let connection = RecordingConnection::with_columns(&["ticker", "trade_date"]);
    let log = connection.log();
    let source = table(2, &[&["AAPL", "2023-01-15"], &["MSFT", "not-a-date"]]);

    insert_rows(connection, &source, "t", true).expect("no error from date coercion");
    let rows = log.inserted_rows();
    assert_eq!(rows[0][1], text("2023-01-15"));
    assert_eq!(rows[1][1], text("not-a-date"));
}

#[test]
fn date_coercion_only_looks_at_column_name() {
    let source = table(2, &[&["2023-01-15", "2023-01-15"]]);
    let columns = vec!["opened".to_string(), "Closing_Date".to_string()];
    let typed = typed_columns(&source, &columns, true);
    assert_eq!(typed[0][0], text("2023-01-15"));
    assert!(matches!(typed[1][0], Value::Date(_)));
}

#[test]
fn missing_table_is_reported_and_resources_released() {
    let connection = RecordingConnection::with_columns(&[]);
    let log = connection.log();
    let source = table(1, &[&["1"]]);

    let err = insert_rows(connection, &source, "sales.missing", true).unwrap_err();
    assert!(matches!(err, LoadError::TableNotFoundOrEmpty { ref table } if table == "sales.missing"));
    assert_eq!(log.inserted_rows().len(), 0);
    assert_eq!(log.count(&Event::Commit), 0);
    assert_eq!(log.count(&Event::Rollback), 0);
    assert_eq!(log.count(&Event::CursorClose), 1);
    assert_eq!(log.count(&Event::ConnectionClose), 1);
}

#[test]
fn discovery_query_uses_qualified_schema() {
    let connection = RecordingConnection::with_columns(&["a"]);
    let log = connection.log();
    insert_rows(connection, &table(1, &[]), "Sales.Orders", true).expect("load succeeds");
    assert_eq!(
        log.statements()[0],
        "SELECT column_name FROM information_schema.columns \
         WHERE table_name = 'orders' AND table_schema = 'sales' ORDER BY ordinal_position"
    );
}

#[test]
fn discovery_falls_back_to_connection_schema() {
    let connection = RecordingConnection::with_columns(&["a"]);
    let log = connection.log();
    insert_rows(connection, &table(1, &[]), "orders", true).expect("load succeeds");
    assert!(log.statements()[0].contains("table_schema = 'default'"));

    let connection = RecordingConnection::with_columns(&["a"]).without_default_schema();
    let log = connection.log();
    insert_rows(connection, &table(1, &[]), "orders", true).expect("load succeeds");
    assert!(!log.statements()[0].contains("table_schema"));
}

#[test]
fn failed_insert_rolls_back_and_still_closes() {
    let connection = RecordingConnection::with_columns(&["a"]).failing_insert(2);
    let log = connection.log();
    let source = table(1, &[&["1"], &["2"], &["3"]]);

    let err = insert_rows(connection, &source, "t", true).unwrap_err();
    assert!(matches!(err, LoadError::StatementExecution { row: 2, .. }));
    assert_eq!(log.inserted_rows().len(), 2, "third row never attempted");
    let events = log.events();
    assert_eq!(
        &events[events.len() - 3..],
        &[Event::Rollback, Event::CursorClose, Event::ConnectionClose]
    );
    assert_eq!(log.count(&Event::Commit), 0);
}

#[test]
fn failed_commit_rolls_back() {
    let connection = RecordingConnection::with_columns(&["a"]).failing_commit();
    let log = connection.log();
    let err = insert_rows(connection, &table(1, &[&["1"]]), "t", true).unwrap_err();
    assert!(matches!(err, LoadError::Commit { .. }));
    let events = log.events();
    assert_eq!(
        &events[events.len() - 4..],
        &[
            Event::Commit,
            Event::Rollback,
            Event::CursorClose,
            Event::ConnectionClose
        ]
    );
}

#[test]
fn cursor_failure_still_closes_connection() {
    let connection = RecordingConnection::with_columns(&["a"]).failing_cursor();
    let log = connection.log();
    let err = insert_rows(connection, &table(1, &[&["1"]]), "t", true).unwrap_err();
    assert!(matches!(err, LoadError::Cursor(_)));
    assert_eq!(log.events(), vec![Event::ConnectionClose]);
}

proptest! {
    #[test]
    fn bound_width_is_min_of_table_and_csv(
        table_width in 1usize..8,
        csv_width in 1usize..8,
        row_lengths in proptest::collection::vec(0usize..8, 0..6)
    ) {
        let mut columns = (0..table_width).map(|i| format!("c{i}")).collect::<Vec<_>>();
        let truncated = bind_columns(&mut columns, csv_width);
        prop_assert_eq!(columns.len(), table_width.min(csv_width));
        prop_assert_eq!(truncated.is_some(), table_width > csv_width);

        let rows = row_lengths
            .iter()
            .map(|len| (0..(*len).min(csv_width)).map(|i| format!("v{i}")).collect())
            .collect::<Vec<Vec<String>>>();
        let source = SourceTable::new("p.csv", csv_width, rows.clone());
        let typed = typed_columns(&source, &columns, false);
        prop_assert_eq!(typed.len(), columns.len());
        for (col_idx, column) in typed.iter().enumerate() {
            prop_assert_eq!(column.len(), rows.len());
            for (row_idx, value) in column.iter().enumerate() {
                if col_idx < rows[row_idx].len() {
                    prop_assert_eq!(value, &Value::Text(format!("v{col_idx}")));
                } else {
                    prop_assert_eq!(value, &Value::Null);
                }
            }
        }
    }
}
