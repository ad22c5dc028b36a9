use std::path::PathBuf;

use thiserror::Error;

/// Failures while locating, reading, or interpreting the connection config.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("Unsupported config file format: {extension:?}. Use .yaml, .yml, or .json")]
    UnsupportedFormat { extension: String },

    #[error("Reading config file {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parsing config file {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("Config key '{key}' {message}")]
    InvalidValue { key: String, message: String },
}

impl ConfigError {
    pub fn invalid(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Failures while reading the CSV source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Opening input file {}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Reading row {row} in {}", path.display())]
    Read {
        path: PathBuf,
        row: usize,
        #[source]
        source: csv::Error,
    },

    #[error("Row {row} in {} is not valid {encoding}", path.display())]
    Decode {
        path: PathBuf,
        row: usize,
        encoding: &'static str,
    },

    #[error("Input file {} has no header row", path.display())]
    Empty { path: PathBuf },

    #[error("Row {row} in {} has {found} fields but the header has {expected}", path.display())]
    RaggedRow {
        path: PathBuf,
        row: usize,
        found: usize,
        expected: usize,
    },
}

/// Failures reported by the engine client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request to {url} failed")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Trino returned HTTP {status} for {url}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("Query failed ({name}): {message}")]
    Query { name: String, message: String },

    #[error("Unexpected response from server: {0}")]
    Protocol(String),

    #[error("Connection is closed")]
    Closed,
}

impl ClientError {
    pub fn query(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Query {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Failures while discovering the target table and inserting rows.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Table {table} not found or has no columns")]
    TableNotFoundOrEmpty { table: String },

    #[error("Listing columns of {table}")]
    Discovery {
        table: String,
        #[source]
        source: ClientError,
    },

    #[error("Inserting data row {row} into {table}")]
    StatementExecution {
        table: String,
        row: usize,
        #[source]
        source: ClientError,
    },

    #[error("Committing inserts into {table}")]
    Commit {
        table: String,
        #[source]
        source: ClientError,
    },

    #[error("Opening cursor")]
    Cursor(#[source] ClientError),

    #[error("Closing {what}")]
    Close {
        what: &'static str,
        #[source]
        source: ClientError,
    },
}
