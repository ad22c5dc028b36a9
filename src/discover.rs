use std::fmt;

use log::debug;

use crate::{
    client::Cursor,
    data::quote_literal,
    error::{ClientError, LoadError},
};

/// A table name, optionally qualified as `schema.table`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub schema: Option<String>,
    pub table: String,
}

impl TableRef {
    /// Splits on the first `.`; everything after it is the table name.
    pub fn parse(name: &str) -> Self {
        match name.split_once('.') {
            Some((schema, table)) => Self {
                schema: Some(schema.to_string()),
                table: table.to_string(),
            },
            None => Self {
                schema: None,
                table: name.to_string(),
            },
        }
    }

    /// Fills in `schema` when the name was unqualified.
    pub fn with_default_schema(mut self, schema: Option<&str>) -> Self {
        if self.schema.is_none() {
            self.schema = schema.map(str::to_string);
        }
        self
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{schema}.{}", self.table),
            None => write!(f, "{}", self.table),
        }
    }
}

/// Catalog query listing the table's columns in ordinal order.
pub fn columns_query(table: &TableRef) -> String {
    let mut query = format!(
        "SELECT column_name FROM information_schema.columns WHERE table_name = {}",
        quote_literal(&table.table.to_lowercase())
    );
    if let Some(schema) = &table.schema {
        query.push_str(&format!(
            " AND table_schema = {}",
            quote_literal(&schema.to_lowercase())
        ));
    }
    query.push_str(" ORDER BY ordinal_position");
    query
}

/// Lists the columns of `table_name` in ordinal order.
///
/// A missing table and a table without columns both yield
/// [`LoadError::TableNotFoundOrEmpty`].
pub fn table_columns<C>(
    cursor: &mut C,
    table_name: &str,
    default_schema: Option<&str>,
) -> Result<Vec<String>, LoadError>
where
    C: Cursor,
{
    let table = TableRef::parse(table_name).with_default_schema(default_schema);
    let query = columns_query(&table);
    debug!("Discovering columns of {table}");
    let discovery_failed = |source: ClientError| LoadError::Discovery {
        table: table_name.to_string(),
        source,
    };
    cursor.execute(&query, &[]).map_err(discovery_failed)?;
    let rows = cursor.fetch_all().map_err(discovery_failed)?;

    let columns = rows
        .into_iter()
        .filter_map(|row| row.into_iter().next())
        .map(|value| match value {
            serde_json::Value::String(name) => name,
            other => other.to_string(),
        })
        .collect::<Vec<_>>();
    if columns.is_empty() {
        return Err(LoadError::TableNotFoundOrEmpty {
            table: table_name.to_string(),
        });
    }
    Ok(columns)
}
