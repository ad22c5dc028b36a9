use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime};

/// A single bound cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Renders the value as a Trino SQL literal.
    pub fn to_sql_literal(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => {
                if f.is_nan() {
                    "nan()".to_string()
                } else if f.is_infinite() {
                    if *f > 0.0 {
                        "infinity()".to_string()
                    } else {
                        "-infinity()".to_string()
                    }
                } else {
                    format!("DOUBLE '{f:?}'")
                }
            }
            Value::Text(s) => quote_literal(s),
            Value::Date(d) => format!("DATE '{}'", d.format("%Y-%m-%d")),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

/// Wraps `value` in single quotes, doubling embedded quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Wraps `name` in double quotes, doubling embedded quotes.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Outcome of a best-effort date parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateParse {
    Parsed(NaiveDate),
    Unparsed(String),
}

// Month-first before day-first for ambiguous dates.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%Y/%m/%d",
    "%m-%d-%Y",
    "%d-%m-%Y",
    "%b %d, %Y",
    "%b %d %Y",
    "%d %b %Y",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

pub fn parse_naive_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
}

pub fn parse_naive_datetime(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .or_else(|| {
            DateTime::parse_from_rfc3339(value)
                .ok()
                .map(|dt| dt.naive_local())
        })
}

/// Parses a date, accepting datetimes by discarding their time part.
pub fn coerce_date(value: &str) -> DateParse {
    match parse_naive_date(value).or_else(|| parse_naive_datetime(value).map(|dt| dt.date())) {
        Some(date) => DateParse::Parsed(date),
        None => DateParse::Unparsed(value.to_string()),
    }
}

/// Converts a whole column to dates, or returns `None` if any non-empty value
/// fails to parse. Empty values become `Null`.
pub fn coerce_date_column<'a, I>(values: I) -> Option<Vec<Value>>
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    let mut converted = Vec::new();
    for value in values {
        match value {
            None | Some("") => converted.push(Value::Null),
            Some(raw) => match coerce_date(raw) {
                DateParse::Parsed(date) => converted.push(Value::Date(date)),
                DateParse::Unparsed(_) => return None,
            },
        }
    }
    Some(converted)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Float,
    Boolean,
    Text,
}

/// Narrows a column's type as values are observed; an untouched candidate
/// (all values empty) settles on `Text`.
#[derive(Debug, Clone)]
pub struct TypeCandidate {
    possible_integer: bool,
    possible_float: bool,
    possible_boolean: bool,
    observed: bool,
}

impl Default for TypeCandidate {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeCandidate {
    pub fn new() -> Self {
        Self {
            possible_integer: true,
            possible_float: true,
            possible_boolean: true,
            observed: false,
        }
    }

    pub fn observe(&mut self, value: &str) {
        if value.is_empty() {
            return;
        }
        self.observed = true;
        let trimmed = value.trim();
        if self.possible_integer && trimmed.parse::<i64>().is_err() {
            self.possible_integer = false;
        }
        if self.possible_float && trimmed.parse::<f64>().is_err() {
            self.possible_float = false;
        }
        if self.possible_boolean && parse_boolean(trimmed).is_none() {
            self.possible_boolean = false;
        }
    }

    pub fn decide(&self) -> ColumnType {
        if !self.observed {
            ColumnType::Text
        } else if self.possible_integer {
            ColumnType::Integer
        } else if self.possible_float {
            ColumnType::Float
        } else if self.possible_boolean {
            ColumnType::Boolean
        } else {
            ColumnType::Text
        }
    }
}

fn parse_boolean(value: &str) -> Option<bool> {
    if value.eq_ignore_ascii_case("true") {
        Some(true)
    } else if value.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// Converts a raw field to a value of `ty`. Empty fields are `Null`; a field
/// that does not fit `ty` is kept as text.
pub fn typed_value(raw: &str, ty: ColumnType) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    let trimmed = raw.trim();
    let parsed = match ty {
        ColumnType::Integer => trimmed.parse().ok().map(Value::Integer),
        ColumnType::Float => trimmed.parse().ok().map(Value::Float),
        ColumnType::Boolean => parse_boolean(trimmed).map(Value::Boolean),
        ColumnType::Text => None,
    };
    parsed.unwrap_or_else(|| Value::Text(raw.to_string()))
}
