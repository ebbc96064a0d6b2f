//! Query-related data models.
//!
//! This module defines statement commands, their parameters, and the explicit
//! item-to-parameter mapping used by `insert_item`.

use crate::error::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A parameter value for parameterized queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Binary data
    Bytes(Vec<u8>),
    /// Structured value, bound as the engine's JSON type
    Json(JsonValue),
}

impl QueryParam {
    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Json(_) => "json",
        }
    }
}

impl From<bool> for QueryParam {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for QueryParam {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<i64> for QueryParam {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u32> for QueryParam {
    fn from(v: u32) -> Self {
        Self::Int(v.into())
    }
}

impl From<f64> for QueryParam {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for QueryParam {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for QueryParam {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<u8>> for QueryParam {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl<T: Into<QueryParam>> From<Option<T>> for QueryParam {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

impl From<JsonValue> for QueryParam {
    /// Scalars map onto their natural variant; arrays and objects stay JSON.
    fn from(v: JsonValue) -> Self {
        match v {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else if n.is_u64() {
                    // Beyond i64; bound as text so no digits are lost.
                    Self::String(n.to_string())
                } else {
                    n.as_f64().map(Self::Float).unwrap_or(Self::Null)
                }
            }
            JsonValue::String(s) => Self::String(s),
            other => Self::Json(other),
        }
    }
}

/// A named statement parameter.
///
/// Parameters are bound positionally, in the order they were added to the
/// [`Command`]; the name identifies the parameter in diagnostics and field
/// filters.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub value: QueryParam,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: impl Into<QueryParam>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// What a statement is meant to do. Only used for logging and error context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    SelectOne,
    SelectList,
    Insert,
    Update,
    Delete,
    Execute,
}

impl StatementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SelectOne => "select_one",
            Self::SelectList => "select_list",
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Execute => "execute",
        }
    }

    /// Classify a raw statement by its leading keyword.
    ///
    /// Row-returning statements map to `SelectList`; anything unrecognized is `Execute`.
    pub fn from_sql(sql: &str) -> Self {
        let keyword = leading_keyword(sql).to_ascii_uppercase();
        match keyword.as_str() {
            "SELECT" | "WITH" | "SHOW" | "EXPLAIN" | "PRAGMA" | "VALUES" | "DESCRIBE" | "DESC" => {
                Self::SelectList
            }
            "INSERT" | "REPLACE" => Self::Insert,
            "UPDATE" => Self::Update,
            "DELETE" => Self::Delete,
            _ => Self::Execute,
        }
    }

    pub fn returns_rows(&self) -> bool {
        matches!(self, Self::SelectOne | Self::SelectList)
    }
}

/// First word of a statement, skipping whitespace, `--` line comments and
/// opening parentheses.
fn leading_keyword(sql: &str) -> &str {
    let mut rest = sql;
    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == '(');
        match rest.strip_prefix("--") {
            Some(comment) => rest = comment.split_once('\n').map(|(_, tail)| tail).unwrap_or(""),
            None => break,
        }
    }
    let end = rest
        .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .unwrap_or(rest.len());
    &rest[..end]
}

impl std::fmt::Display for StatementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A statement bound to its parameters, ready to run on a connection.
#[derive(Debug, Clone)]
pub struct Command {
    sql: String,
    params: Vec<Parameter>,
    kind: StatementKind,
}

impl Command {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            kind: StatementKind::Execute,
        }
    }

    /// Add a parameter to this command.
    pub fn bind(mut self, param: Parameter) -> Self {
        self.params.push(param);
        self
    }

    /// Add several parameters, keeping their order.
    pub fn bind_all(mut self, params: impl IntoIterator<Item = Parameter>) -> Self {
        self.params.extend(params);
        self
    }

    pub fn with_kind(mut self, kind: StatementKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[Parameter] {
        &self.params
    }

    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    /// Whether this command is expected to produce a result set.
    pub fn returns_rows(&self) -> bool {
        self.kind.returns_rows()
    }
}

/// Explicit mapping from an item to named statement parameters.
///
/// The returned order is the binding order and must be stable for a given type.
pub trait ToParams {
    fn to_params(&self) -> Vec<Parameter>;
}

impl ToParams for Vec<Parameter> {
    fn to_params(&self) -> Vec<Parameter> {
        self.clone()
    }
}

impl ToParams for serde_json::Map<String, JsonValue> {
    fn to_params(&self) -> Vec<Parameter> {
        self.iter()
            .map(|(k, v)| Parameter::new(k.clone(), v.clone()))
            .collect()
    }
}

/// Derive parameters from any serializable struct.
///
/// Fields come out in the map order of `serde_json` (sorted by name), which is
/// stable across calls. The item must serialize to a JSON object.
pub fn params_from_serialize<T: Serialize + ?Sized>(item: &T) -> DbResult<Vec<Parameter>> {
    match serde_json::to_value(item) {
        Ok(JsonValue::Object(map)) => Ok(map.to_params()),
        Ok(other) => Err(DbError::invalid_input(format!(
            "Item must serialize to an object, got {}",
            json_type_name(&other)
        ))),
        Err(e) => Err(DbError::invalid_input(format!(
            "Failed to serialize item: {}",
            e
        ))),
    }
}

fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

/// Which derived fields to keep when persisting an item.
#[derive(Debug, Clone, Default)]
pub enum FieldFilter {
    /// Keep every field.
    #[default]
    All,
    /// Keep only the named fields.
    Allow(Vec<String>),
    /// Drop the named fields (e.g. generated keys or computed columns).
    Deny(Vec<String>),
}

impl FieldFilter {
    pub fn allow<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Allow(fields.into_iter().map(Into::into).collect())
    }

    pub fn deny<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Deny(fields.into_iter().map(Into::into).collect())
    }

    pub fn keeps(&self, name: &str) -> bool {
        match self {
            Self::All => true,
            Self::Allow(names) => names.iter().any(|n| n == name),
            Self::Deny(names) => !names.iter().any(|n| n == name),
        }
    }

    /// Apply the filter, preserving the input order.
    pub fn apply(&self, params: Vec<Parameter>) -> Vec<Parameter> {
        params.into_iter().filter(|p| self.keeps(&p.name)).collect()
    }
}
