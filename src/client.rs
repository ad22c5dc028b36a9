//! Connection and cursor seam between the loader and the query engine.

use crate::{data::Value, error::ClientError};

pub type Row = Vec<serde_json::Value>;

pub trait Cursor {
    /// Runs `sql`, binding `params` to its `?` placeholders in order.
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<(), ClientError>;

    fn fetch_all(&mut self) -> Result<Vec<Row>, ClientError>;

    fn close(self) -> Result<(), ClientError>;
}

pub trait Connection {
    type Cursor: Cursor;

    fn cursor(&self) -> Result<Self::Cursor, ClientError>;

    /// Schema that unqualified table names resolve against.
    fn default_schema(&self) -> Option<&str>;

    fn commit(&self) -> Result<(), ClientError>;

    fn rollback(&self) -> Result<(), ClientError>;

    fn close(self) -> Result<(), ClientError>;
}
