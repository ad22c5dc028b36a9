#![allow(dead_code)]

use std::cell::RefCell;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use csv_to_trino::client::{Connection, Cursor, Row};
use csv_to_trino::data::Value;
use csv_to_trino::error::ClientError;
use tempfile::{TempDir, tempdir};

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        self.write_bytes(name, contents.as_bytes())
    }

    pub fn write_bytes(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents).expect("write temp file contents");
        path
    }
}

/// Everything the loader asked of the fake engine, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Execute { sql: String, params: Vec<Value> },
    Commit,
    Rollback,
    CursorClose,
    ConnectionClose,
}

#[derive(Debug, Default)]
struct EngineState {
    events: Vec<Event>,
    columns: Vec<String>,
    pending: Vec<Row>,
    inserts_seen: usize,
    fail_on_insert: Option<usize>,
    fail_commit: bool,
    fail_cursor: bool,
}

/// In-memory stand-in for a Trino connection that answers the column
/// discovery query and records every call.
pub struct RecordingConnection {
    state: Rc<RefCell<EngineState>>,
    default_schema: Option<String>,
}

pub struct RecordingCursor {
    state: Rc<RefCell<EngineState>>,
}

/// Read handle that outlives the connection handed to the loader.
#[derive(Clone)]
pub struct EventLog {
    state: Rc<RefCell<EngineState>>,
}

impl RecordingConnection {
    pub fn with_columns(columns: &[&str]) -> Self {
        let state = EngineState {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            ..EngineState::default()
        };
        Self {
            state: Rc::new(RefCell::new(state)),
            default_schema: Some("default".to_string()),
        }
    }

    pub fn without_default_schema(mut self) -> Self {
        self.default_schema = None;
        self
    }

    /// Makes the `n`th INSERT (1-based) fail.
    pub fn failing_insert(self, n: usize) -> Self {
        self.state.borrow_mut().fail_on_insert = Some(n);
        self
    }

    pub fn failing_commit(self) -> Self {
        self.state.borrow_mut().fail_commit = true;
        self
    }

    pub fn failing_cursor(self) -> Self {
        self.state.borrow_mut().fail_cursor = true;
        self
    }

    pub fn log(&self) -> EventLog {
        EventLog {
            state: Rc::clone(&self.state),
        }
    }
}

impl EventLog {
    pub fn events(&self) -> Vec<Event> {
        self.state.borrow().events.clone()
    }

    pub fn statements(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Execute { sql, .. } => Some(sql),
                _ => None,
            })
            .collect()
    }

    /// Parameter lists of every INSERT, in execution order.
    pub fn inserted_rows(&self) -> Vec<Vec<Value>> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Execute { sql, params } if sql.starts_with("INSERT") => Some(params),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, wanted: &Event) -> usize {
        self.events().iter().filter(|event| *event == wanted).count()
    }
}

impl Connection for RecordingConnection {
    type Cursor = RecordingCursor;

    fn cursor(&self) -> Result<RecordingCursor, ClientError> {
        if self.state.borrow().fail_cursor {
            return Err(ClientError::Protocol("no cursor for you".to_string()));
        }
        Ok(RecordingCursor {
            state: Rc::clone(&self.state),
        })
    }

    fn default_schema(&self) -> Option<&str> {
        self.default_schema.as_deref()
    }

    fn commit(&self) -> Result<(), ClientError> {
        let mut state = self.state.borrow_mut();
        state.events.push(Event::Commit);
        if state.fail_commit {
            return Err(ClientError::query("TRANSACTION_CONFLICT", "commit rejected"));
        }
        Ok(())
    }

    fn rollback(&self) -> Result<(), ClientError> {
        self.state.borrow_mut().events.push(Event::Rollback);
        Ok(())
    }

    fn close(self) -> Result<(), ClientError> {
        self.state.borrow_mut().events.push(Event::ConnectionClose);
        Ok(())
    }
}

impl Cursor for RecordingCursor {
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<(), ClientError> {
        let mut state = self.state.borrow_mut();
        state.events.push(Event::Execute {
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        if sql.contains("information_schema.columns") {
            let rows = state
                .columns
                .iter()
                .map(|c| vec![serde_json::Value::String(c.clone())])
                .collect();
            state.pending = rows;
        } else if sql.starts_with("INSERT") {
            state.inserts_seen += 1;
            if state.fail_on_insert == Some(state.inserts_seen) {
                return Err(ClientError::query("CONSTRAINT_VIOLATION", "row rejected"));
            }
        }
        Ok(())
    }

    fn fetch_all(&mut self) -> Result<Vec<Row>, ClientError> {
        Ok(std::mem::take(&mut self.state.borrow_mut().pending))
    }

    fn close(self) -> Result<(), ClientError> {
        self.state.borrow_mut().events.push(Event::CursorClose);
        Ok(())
    }
}
