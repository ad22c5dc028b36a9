use anyhow::{Context, Result};
use log::{debug, info, warn};

use crate::{
    cli::Cli,
    client::{Connection, Cursor},
    config::{self, CsvSettings, TrinoSettings},
    data::{ColumnType, TypeCandidate, Value, coerce_date_column, quote_identifier, typed_value},
    discover,
    error::{ClientError, LoadError},
    io_utils,
    source::{self, SourceTable},
    trino::TrinoConnection,
};

/// Result of a completed load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadSummary {
    pub rows: usize,
    /// Table columns that received values, in table order.
    pub columns: Vec<String>,
    /// Column count reported by the catalog when it exceeded the CSV width.
    pub truncated_from: Option<usize>,
}

pub fn execute(args: &Cli) -> Result<LoadSummary> {
    info!("Loading connection config from {:?}", args.config);
    let config = config::load_config(&args.config)?;
    let trino = TrinoSettings::from_config(&config)?;
    let csv_settings = CsvSettings::from_config(&config)?;

    let source = read_csv(&args.csv_file, &csv_settings)?;
    info!(
        "Read {} row(s) with {} column(s) from {:?}",
        source.row_count(),
        source.column_count,
        args.csv_file
    );

    info!("Connecting to {trino}");
    let connection = TrinoConnection::connect(trino)
        .with_context(|| format!("Connecting to Trino for table {}", args.table_name))?;
    let summary = insert_rows(
        connection,
        &source,
        &args.table_name,
        csv_settings.infer_types,
    )?;

    println!(
        "Data from {} inserted into {} successfully!",
        args.csv_file.display(),
        args.table_name
    );
    println!(
        "Inserted {} rows with {} columns",
        summary.rows,
        summary.columns.len()
    );
    Ok(summary)
}

pub fn read_csv(path: &std::path::Path, settings: &CsvSettings) -> Result<SourceTable> {
    let delimiter = io_utils::resolve_input_delimiter(path, settings.delimiter);
    let encoding = io_utils::resolve_encoding(settings.encoding.as_deref())?;
    Ok(source::read_source(path, delimiter, encoding)?)
}

/// Truncates `table_columns` to the CSV width. Returns the original width when
/// truncation happened.
pub fn bind_columns(table_columns: &mut Vec<String>, data_columns: usize) -> Option<usize> {
    let table_width = table_columns.len();
    if table_width > data_columns {
        table_columns.truncate(data_columns);
        Some(table_width)
    } else {
        None
    }
}

pub fn insert_statement(table_name: &str, columns: &[String]) -> String {
    let column_list = columns
        .iter()
        .map(|c| quote_identifier(c))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = vec!["?"; columns.len()].join(", ");
    format!("INSERT INTO {table_name} ({column_list}) VALUES ({placeholders})")
}

fn is_date_column(name: &str) -> bool {
    name.to_lowercase().contains("date")
}

/// Converts the bound columns of `source` into typed values, column by column.
///
/// Columns named like dates become `Date` values when every non-empty value
/// parses; otherwise they are typed like any other column.
pub fn typed_columns(source: &SourceTable, columns: &[String], infer_types: bool) -> Vec<Vec<Value>> {
    columns
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            if is_date_column(name) {
                if let Some(dates) = coerce_date_column(source.column(idx)) {
                    debug!("Column '{name}' converted to dates");
                    return dates;
                }
                debug!("Column '{name}' left as-is: not every value is a date");
            }
            let ty = if infer_types {
                let mut candidate = TypeCandidate::new();
                for value in source.column(idx).flatten() {
                    candidate.observe(value);
                }
                candidate.decide()
            } else {
                ColumnType::Text
            };
            source
                .column(idx)
                .map(|raw| raw.map_or(Value::Null, |raw| typed_value(raw, ty)))
                .collect()
        })
        .collect()
}

/// Discovers the table's columns, inserts every source row, and commits.
///
/// The cursor and the connection are closed on every path. On a failed
/// insert or commit the connection is rolled back before closing.
pub fn insert_rows<C>(
    connection: C,
    source: &SourceTable,
    table_name: &str,
    infer_types: bool,
) -> Result<LoadSummary, LoadError>
where
    C: Connection,
{
    let mut cursor = match connection.cursor() {
        Ok(cursor) => cursor,
        Err(err) => {
            if let Err(close_err) = connection.close() {
                warn!("Closing connection failed: {close_err}");
            }
            return Err(LoadError::Cursor(err));
        }
    };

    let outcome = load(&connection, &mut cursor, source, table_name, infer_types);
    if matches!(
        outcome,
        Err(LoadError::StatementExecution { .. } | LoadError::Commit { .. })
    ) {
        warn!("Rolling back inserts into {table_name}");
        if let Err(err) = connection.rollback() {
            warn!("Rollback failed: {err}");
        }
    }

    let cursor_closed = cursor.close();
    let connection_closed = connection.close();
    match outcome {
        Ok(summary) => {
            cursor_closed.map_err(|source| closing("cursor", source))?;
            connection_closed.map_err(|source| closing("connection", source))?;
            Ok(summary)
        }
        Err(err) => {
            for (what, result) in [("cursor", cursor_closed), ("connection", connection_closed)] {
                if let Err(close_err) = result {
                    warn!("Closing {what} failed: {close_err}");
                }
            }
            Err(err)
        }
    }
}

fn closing(what: &'static str, source: ClientError) -> LoadError {
    LoadError::Close { what, source }
}

fn load<C>(
    connection: &C,
    cursor: &mut C::Cursor,
    source: &SourceTable,
    table_name: &str,
    infer_types: bool,
) -> Result<LoadSummary, LoadError>
where
    C: Connection,
{
    let mut columns = discover::table_columns(cursor, table_name, connection.default_schema())?;
    println!("Using table columns: {columns:?}");

    let truncated_from = bind_columns(&mut columns, source.column_count);
    if let Some(table_width) = truncated_from {
        warn!(
            "Table has {table_width} columns but CSV only has {} columns",
            source.column_count
        );
    }

    let values = typed_columns(source, &columns, infer_types);
    let statement = insert_statement(table_name, &columns);
    debug!("Insert statement: {statement}");

    for row_idx in 0..source.row_count() {
        let params = values
            .iter()
            .map(|column| column[row_idx].clone())
            .collect::<Vec<_>>();
        cursor
            .execute(&statement, &params)
            .map_err(|source| LoadError::StatementExecution {
                table: table_name.to_string(),
                row: row_idx + 1,
                source,
            })?;
    }

    connection.commit().map_err(|source| LoadError::Commit {
        table: table_name.to_string(),
        source,
    })?;
    info!(
        "Committed {} row(s) into {table_name}",
        source.row_count()
    );
    Ok(LoadSummary {
        rows: source.row_count(),
        columns,
        truncated_from,
    })
}
