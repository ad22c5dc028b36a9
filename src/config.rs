
use std::{fmt, fs, path::Path, str::FromStr, time::Duration};

use log::debug;
use serde_json::{Map, Value};

use crate::error::ConfigError;

pub type ConfigMap = Value;

pub const TRINO_SECTION: &str = "trino";
pub const CSV_SECTION: &str = "csv";

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_USER: &str = "trino";
pub const DEFAULT_CATALOG: &str = "iceberg";
pub const DEFAULT_SCHEMA: &str = "default";
pub const DEFAULT_SOURCE: &str = "csv-to-trino";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigFormat {
    Yaml,
    Json,
}

impl ConfigFormat {
    fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "yaml" | "yml" => Ok(ConfigFormat::Yaml),
            "json" => Ok(ConfigFormat::Json),
            _ => Err(ConfigError::UnsupportedFormat {
                extension: if extension.is_empty() {
                    String::new()
                } else {
                    format!(".{extension}")
                },
            }),
        }
    }
}

/// Reads a YAML or JSON config file into an untyped mapping.
pub fn load_config(path: &Path) -> Result<ConfigMap, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let format = ConfigFormat::from_path(path)?;
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    debug!("Parsing {format:?} config from {path:?}");
    let parsed = match format {
        ConfigFormat::Yaml => serde_yaml::from_str::<Value>(&raw).map_err(|err| err.to_string()),
        ConfigFormat::Json => serde_json::from_str::<Value>(&raw).map_err(|err| err.to_string()),
    }
    .map_err(|message| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    })?;
    Ok(match parsed {
        Value::Null => Value::Object(Map::new()),
        other => other,
    })
}

fn section<'a>(config: &'a ConfigMap, name: &str) -> Result<Option<&'a Map<String, Value>>, ConfigError> {
    let root = config
        .as_object()
        .ok_or_else(|| ConfigError::invalid("<root>", "must be a mapping"))?;
    match root.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(_) => Err(ConfigError::invalid(name, "must be a mapping")),
    }
}

fn qualified(section: &str, key: &str) -> String {
    format!("{section}.{key}")
}

fn string_key(
    map: Option<&Map<String, Value>>,
    section: &str,
    key: &str,
) -> Result<Option<String>, ConfigError> {
    match map.and_then(|m| m.get(key)) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        // YAML happily reads `schema: 2024` as a number; keep it usable as text.
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(_) => Err(ConfigError::invalid(
            qualified(section, key),
            "must be a string",
        )),
    }
}

fn u64_key(
    map: Option<&Map<String, Value>>,
    section: &str,
    key: &str,
) -> Result<Option<u64>, ConfigError> {
    match map.and_then(|m| m.get(key)) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n.as_u64().map(Some).ok_or_else(|| {
            ConfigError::invalid(qualified(section, key), "must be a non-negative integer")
        }),
        Some(Value::String(s)) => s.trim().parse::<u64>().map(Some).map_err(|_| {
            ConfigError::invalid(qualified(section, key), format!("'{s}' is not an integer"))
        }),
        Some(_) => Err(ConfigError::invalid(
            qualified(section, key),
            "must be an integer",
        )),
    }
}

fn bool_key(
    map: Option<&Map<String, Value>>,
    section: &str,
    key: &str,
) -> Result<Option<bool>, ConfigError> {
    match map.and_then(|m| m.get(key)) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(ConfigError::invalid(
            qualified(section, key),
            "must be true or false",
        )),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HttpScheme {
    #[default]
    Http,
    Https,
}

impl HttpScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpScheme::Http => "http",
            HttpScheme::Https => "https",
        }
    }
}

impl FromStr for HttpScheme {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(HttpScheme::Http),
            "https" => Ok(HttpScheme::Https),
            other => Err(format!("unknown scheme '{other}' (expected http or https)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    #[default]
    Autocommit,
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn sql(&self) -> Option<&'static str> {
        match self {
            IsolationLevel::Autocommit => None,
            IsolationLevel::ReadUncommitted => Some("READ UNCOMMITTED"),
            IsolationLevel::ReadCommitted => Some("READ COMMITTED"),
            IsolationLevel::RepeatableRead => Some("REPEATABLE READ"),
            IsolationLevel::Serializable => Some("SERIALIZABLE"),
        }
    }

    pub fn is_autocommit(&self) -> bool {
        matches!(self, IsolationLevel::Autocommit)
    }
}

impl FromStr for IsolationLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "autocommit" => Ok(IsolationLevel::Autocommit),
            "read_uncommitted" => Ok(IsolationLevel::ReadUncommitted),
            "read_committed" => Ok(IsolationLevel::ReadCommitted),
            "repeatable_read" => Ok(IsolationLevel::RepeatableRead),
            "serializable" => Ok(IsolationLevel::Serializable),
            _ => Err(format!("unknown isolation level '{value}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrinoSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub catalog: String,
    pub schema: String,
    pub http_scheme: HttpScheme,
    pub source: String,
    pub isolation_level: IsolationLevel,
    pub request_timeout: Option<Duration>,
}

impl Default for TrinoSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            user: DEFAULT_USER.to_string(),
            catalog: DEFAULT_CATALOG.to_string(),
            schema: DEFAULT_SCHEMA.to_string(),
            http_scheme: HttpScheme::default(),
            source: DEFAULT_SOURCE.to_string(),
            isolation_level: IsolationLevel::default(),
            request_timeout: None,
        }
    }
}

impl TrinoSettings {
    pub fn from_config(config: &ConfigMap) -> Result<Self, ConfigError> {
        let map = section(config, TRINO_SECTION)?;
        let s = TRINO_SECTION;
        let defaults = TrinoSettings::default();

        let port = match u64_key(map, s, "port")? {
            None => defaults.port,
            Some(value) => u16::try_from(value)
                .map_err(|_| ConfigError::invalid(qualified(s, "port"), "is out of range"))?,
        };
        let http_scheme = match string_key(map, s, "http_scheme")? {
            None => defaults.http_scheme,
            Some(raw) => raw
                .parse()
                .map_err(|msg: String| ConfigError::invalid(qualified(s, "http_scheme"), msg))?,
        };
        let isolation_level = match string_key(map, s, "isolation_level")? {
            None => defaults.isolation_level,
            Some(raw) => raw.parse().map_err(|msg: String| {
                ConfigError::invalid(qualified(s, "isolation_level"), msg)
            })?,
        };

        Ok(Self {
            host: string_key(map, s, "host")?.unwrap_or(defaults.host),
            port,
            user: string_key(map, s, "user")?.unwrap_or(defaults.user),
            catalog: string_key(map, s, "catalog")?.unwrap_or(defaults.catalog),
            schema: string_key(map, s, "schema")?.unwrap_or(defaults.schema),
            http_scheme,
            source: string_key(map, s, "source")?.unwrap_or(defaults.source),
            isolation_level,
            request_timeout: u64_key(map, s, "request_timeout_secs")?.map(Duration::from_secs),
        })
    }

    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.http_scheme.as_str(), self.host, self.port)
    }
}

impl fmt::Display for TrinoSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{} ({}.{})",
            self.user,
            self.base_url(),
            self.catalog,
            self.schema
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvSettings {
    /// Field delimiter; `None` picks one from the file extension.
    pub delimiter: Option<u8>,
    pub encoding: Option<String>,
    pub infer_types: bool,
}

impl Default for CsvSettings {
    fn default() -> Self {
        Self {
            delimiter: None,
            encoding: None,
            infer_types: true,
        }
    }
}

impl CsvSettings {
    pub fn from_config(config: &ConfigMap) -> Result<Self, ConfigError> {
        let map = section(config, CSV_SECTION)?;
        let s = CSV_SECTION;
        let delimiter = match string_key(map, s, "delimiter")? {
            None => None,
            Some(raw) => Some(
                parse_delimiter(&raw)
                    .map_err(|msg| ConfigError::invalid(qualified(s, "delimiter"), msg))?,
            ),
        };
        Ok(Self {
            delimiter,
            encoding: string_key(map, s, "encoding")?,
            infer_types: bool_key(map, s, "infer_types")?.unwrap_or(true),
        })
    }
}

/// Accepts a single ASCII character or one of the names `tab`, `comma`,
/// `semicolon`, `pipe`.
pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value.to_ascii_lowercase().as_str() {
        "tab" | "\\t" => return Ok(b'\t'),
        "comma" => return Ok(b','),
        "semicolon" => return Ok(b';'),
        "pipe" => return Ok(b'|'),
        _ => {}
    }
    let mut chars = value.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii() => Ok(c as u8),
        _ => Err(format!("'{value}' is not a single-byte delimiter")),
    }
}
