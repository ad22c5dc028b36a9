//! Blocking client for Trino's HTTP statement protocol.
//!
//! A statement is `POST`ed to `/v1/statement`; the coordinator answers with a
//! page of results and, while the query is still running, a `nextUri` to poll.
//! Session changes (transactions, prepared statements) come back as response
//! headers and must be echoed on later requests, so the connection keeps them
//! in a [`Session`] shared with its cursors.

use std::{
    cell::RefCell,
    collections::{BTreeMap, HashMap},
    rc::Rc,
    thread,
    time::Duration,
};

use log::{debug, warn};
use reqwest::{
    StatusCode,
    blocking::{Client, RequestBuilder, Response},
    header::{HeaderMap, HeaderName, HeaderValue},
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    client::{Connection, Cursor, Row},
    config::{IsolationLevel, TrinoSettings},
    data::Value,
    error::ClientError,
};

const STATEMENT_PATH: &str = "/v1/statement";
const NO_TRANSACTION: &str = "NONE";
const MAX_ATTEMPTS: u32 = 3;
const RETRY_PAUSE: Duration = Duration::from_millis(250);

pub const HEADER_USER: &str = "x-trino-user";
pub const HEADER_SOURCE: &str = "x-trino-source";
pub const HEADER_CATALOG: &str = "x-trino-catalog";
pub const HEADER_SCHEMA: &str = "x-trino-schema";
pub const HEADER_TRANSACTION: &str = "x-trino-transaction-id";
pub const HEADER_PREPARED_STATEMENT: &str = "x-trino-prepared-statement";
pub const HEADER_STARTED_TRANSACTION: &str = "x-trino-started-transaction-id";
pub const HEADER_CLEAR_TRANSACTION: &str = "x-trino-clear-transaction-id";
pub const HEADER_ADDED_PREPARE: &str = "x-trino-added-prepare";
pub const HEADER_DEALLOCATED_PREPARE: &str = "x-trino-deallocated-prepare";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResults {
    #[serde(default)]
    id: String,
    #[serde(default)]
    next_uri: Option<String>,
    #[serde(default)]
    data: Option<Vec<Row>>,
    #[serde(default)]
    error: Option<QueryError>,
    #[serde(default)]
    update_type: Option<String>,
    #[serde(default)]
    update_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryError {
    message: String,
    #[serde(default)]
    error_name: Option<String>,
}

/// Rows and update information from a finished statement.
#[derive(Debug, Default)]
struct StatementOutcome {
    rows: Vec<Row>,
    update_type: Option<String>,
    update_count: Option<u64>,
}

/// Client state shared by a connection and its cursors.
struct Session {
    settings: TrinoSettings,
    http: Client,
    transaction_id: Option<String>,
    prepared: BTreeMap<String, String>,
    closed: bool,
}

impl Session {
    fn statement_url(&self) -> String {
        format!("{}{}", self.settings.base_url(), STATEMENT_PATH)
    }

    fn headers(&self) -> Result<HeaderMap, ClientError> {
        let mut headers = HeaderMap::new();
        insert_header(&mut headers, HEADER_USER, &self.settings.user)?;
        insert_header(&mut headers, HEADER_SOURCE, &self.settings.source)?;
        insert_header(&mut headers, HEADER_CATALOG, &self.settings.catalog)?;
        insert_header(&mut headers, HEADER_SCHEMA, &self.settings.schema)?;
        if !self.settings.isolation_level.is_autocommit() {
            let transaction = self.transaction_id.as_deref().unwrap_or(NO_TRANSACTION);
            insert_header(&mut headers, HEADER_TRANSACTION, transaction)?;
        }
        if let Some(prepared) = prepared_statement_header(&self.prepared) {
            insert_header(&mut headers, HEADER_PREPARED_STATEMENT, &prepared)?;
        }
        Ok(headers)
    }

    /// Runs `sql`, opening a transaction first when the isolation level asks for one.
    fn execute(&mut self, sql: &str) -> Result<StatementOutcome, ClientError> {
        if self.closed {
            return Err(ClientError::Closed);
        }
        if self.transaction_id.is_none() {
            if let Some(level) = self.settings.isolation_level.sql() {
                self.submit(&format!("START TRANSACTION ISOLATION LEVEL {level}"))?;
                if self.transaction_id.is_none() {
                    return Err(ClientError::Protocol(
                        "server did not report a started transaction".to_string(),
                    ));
                }
            }
        }
        self.submit(sql)
    }

    fn submit(&mut self, sql: &str) -> Result<StatementOutcome, ClientError> {
        debug!("Submitting statement: {sql}");
        let url = self.statement_url();
        let headers = self.headers()?;
        let body = sql.to_string();
        let mut response = self.send(&url, || {
            self.http
                .post(&url)
                .headers(headers.clone())
                .body(body.clone())
        })?;

        let mut outcome = StatementOutcome::default();
        loop {
            self.absorb_headers(response.headers());
            let page: QueryResults = response
                .json()
                .map_err(|err| ClientError::Protocol(format!("invalid response body: {err}")))?;
            if let Some(error) = page.error {
                return Err(ClientError::query(
                    error.error_name.unwrap_or_else(|| "QUERY_FAILED".to_string()),
                    error.message,
                ));
            }
            if let Some(data) = page.data {
                outcome.rows.extend(data);
            }
            if page.update_type.is_some() {
                outcome.update_type = page.update_type;
            }
            if page.update_count.is_some() {
                outcome.update_count = page.update_count;
            }
            match page.next_uri {
                Some(next) => {
                    let headers = self.headers()?;
                    response = self.send(&next, || self.http.get(&next).headers(headers.clone()))?;
                }
                None => {
                    debug!(
                        "Query {} finished ({} row(s), update {:?} {:?})",
                        page.id,
                        outcome.rows.len(),
                        outcome.update_type,
                        outcome.update_count
                    );
                    return Ok(outcome);
                }
            }
        }
    }

    fn send<F>(&self, url: &str, build: F) -> Result<Response, ClientError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 1;
        loop {
            let response = build().send().map_err(|source| ClientError::Http {
                url: url.to_string(),
                source,
            })?;
            let status = response.status();
            if status == StatusCode::SERVICE_UNAVAILABLE && attempt < MAX_ATTEMPTS {
                warn!("Coordinator busy (HTTP 503), retrying {url} (attempt {attempt})");
                thread::sleep(RETRY_PAUSE * attempt);
                attempt += 1;
                continue;
            }
            if !status.is_success() {
                let body = response.text().unwrap_or_default();
                return Err(ClientError::Status {
                    url: url.to_string(),
                    status: status.as_u16(),
                    body,
                });
            }
            return Ok(response);
        }
    }

    fn absorb_headers(&mut self, headers: &HeaderMap) {
        if let Some(id) = header_str(headers, HEADER_STARTED_TRANSACTION) {
            debug!("Started transaction {id}");
            self.transaction_id = Some(id.to_string());
        }
        if headers.contains_key(HEADER_CLEAR_TRANSACTION) {
            debug!("Cleared transaction {:?}", self.transaction_id);
            self.transaction_id = None;
        }
        for value in headers.get_all(HEADER_ADDED_PREPARE) {
            if let Some((name, sql)) = value.to_str().ok().and_then(parse_added_prepare) {
                self.prepared.insert(name, sql);
            }
        }
        for value in headers.get_all(HEADER_DEALLOCATED_PREPARE) {
            if let Ok(names) = value.to_str() {
                for name in names.split(',').map(str::trim) {
                    self.prepared.remove(name);
                }
            }
        }
    }

    fn finish_transaction(&mut self, statement: &str) -> Result<(), ClientError> {
        if self.closed {
            return Err(ClientError::Closed);
        }
        if self.transaction_id.is_none() {
            return Ok(());
        }
        let result = self.submit(statement).map(|_| ());
        self.transaction_id = None;
        result
    }
}

fn insert_header(headers: &mut HeaderMap, name: &'static str, value: &str) -> Result<(), ClientError> {
    let value = HeaderValue::from_str(value)
        .map_err(|_| ClientError::Protocol(format!("value for {name} is not a valid header")))?;
    headers.insert(HeaderName::from_static(name), value);
    Ok(())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn url_encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

fn url_decode(value: &str) -> String {
    url::form_urlencoded::parse(format!("v={value}").as_bytes())
        .next()
        .map(|(_, decoded)| decoded.into_owned())
        .unwrap_or_default()
}

/// `name1=sql1,name2=sql2` with each statement form-url-encoded.
pub fn prepared_statement_header(prepared: &BTreeMap<String, String>) -> Option<String> {
    if prepared.is_empty() {
        return None;
    }
    Some(
        prepared
            .iter()
            .map(|(name, sql)| format!("{name}={}", url_encode(sql)))
            .collect::<Vec<_>>()
            .join(","),
    )
}

fn parse_added_prepare(value: &str) -> Option<(String, String)> {
    let (name, encoded) = value.split_once('=')?;
    Some((name.trim().to_string(), url_decode(encoded)))
}

/// `EXECUTE <name> [USING literal, ...]`.
pub fn execute_statement(name: &str, params: &[Value]) -> String {
    if params.is_empty() {
        return format!("EXECUTE {name}");
    }
    let literals = params
        .iter()
        .map(Value::to_sql_literal)
        .collect::<Vec<_>>()
        .join(", ");
    format!("EXECUTE {name} USING {literals}")
}

pub struct TrinoConnection {
    session: Rc<RefCell<Session>>,
    default_schema: String,
}

impl TrinoConnection {
    /// Builds the HTTP client. No request is made until the first statement.
    pub fn connect(settings: TrinoSettings) -> Result<Self, ClientError> {
        let http = Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|source| ClientError::Http {
                url: settings.base_url(),
                source,
            })?;
        let default_schema = settings.schema.clone();
        Ok(Self {
            session: Rc::new(RefCell::new(Session {
                settings,
                http,
                transaction_id: None,
                prepared: BTreeMap::new(),
                closed: false,
            })),
            default_schema,
        })
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.session.borrow().settings.isolation_level
    }

    pub fn in_transaction(&self) -> bool {
        self.session.borrow().transaction_id.is_some()
    }
}

impl Connection for TrinoConnection {
    type Cursor = TrinoCursor;

    fn cursor(&self) -> Result<TrinoCursor, ClientError> {
        if self.session.borrow().closed {
            return Err(ClientError::Closed);
        }
        Ok(TrinoCursor {
            session: Rc::clone(&self.session),
            statements: HashMap::new(),
            rows: Vec::new(),
        })
    }

    fn default_schema(&self) -> Option<&str> {
        Some(self.default_schema.as_str())
    }

    fn commit(&self) -> Result<(), ClientError> {
        self.session.borrow_mut().finish_transaction("COMMIT")
    }

    fn rollback(&self) -> Result<(), ClientError> {
        self.session.borrow_mut().finish_transaction("ROLLBACK")
    }

    fn close(self) -> Result<(), ClientError> {
        let mut session = self.session.borrow_mut();
        if session.closed {
            return Ok(());
        }
        let result = session.finish_transaction("ROLLBACK");
        session.closed = true;
        result
    }
}

impl Drop for TrinoConnection {
    fn drop(&mut self) {
        let Ok(mut session) = self.session.try_borrow_mut() else {
            return;
        };
        if session.closed {
            return;
        }
        if session.transaction_id.is_some() {
            warn!("Connection dropped with an open transaction; rolling back");
            if let Err(err) = session.finish_transaction("ROLLBACK") {
                warn!("Rollback on drop failed: {err}");
            }
        }
        session.closed = true;
    }
}

pub struct TrinoCursor {
    session: Rc<RefCell<Session>>,
    /// SQL text → prepared statement name, for statements this cursor prepared.
    statements: HashMap<String, String>,
    rows: Vec<Row>,
}

impl TrinoCursor {
    fn prepare(&mut self, sql: &str) -> Result<String, ClientError> {
        if let Some(name) = self.statements.get(sql) {
            return Ok(name.clone());
        }
        let name = format!("st_{}", Uuid::new_v4().simple());
        let mut session = self.session.borrow_mut();
        session.execute(&format!("PREPARE {name} FROM {sql}"))?;
        session.prepared.insert(name.clone(), sql.to_string());
        drop(session);
        self.statements.insert(sql.to_string(), name.clone());
        Ok(name)
    }
}

impl Cursor for TrinoCursor {
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<(), ClientError> {
        let outcome = if params.is_empty() {
            self.session.borrow_mut().execute(sql)?
        } else {
            let name = self.prepare(sql)?;
            self.session
                .borrow_mut()
                .execute(&execute_statement(&name, params))?
        };
        self.rows = outcome.rows;
        Ok(())
    }

    fn fetch_all(&mut self) -> Result<Vec<Row>, ClientError> {
        Ok(std::mem::take(&mut self.rows))
    }

    fn close(mut self) -> Result<(), ClientError> {
        let mut session = self.session.borrow_mut();
        if session.closed {
            return Ok(());
        }
        // Never starts a transaction; the cursor may outlive COMMIT.
        let mut first_error = None;
        for (_, name) in self.statements.drain() {
            if let Err(err) = session.submit(&format!("DEALLOCATE PREPARE {name}")) {
                warn!("Deallocating {name} failed: {err}");
                first_error.get_or_insert(err);
            }
            session.prepared.remove(&name);
        }
        first_error.map_or(Ok(()), Err)
    }
}
