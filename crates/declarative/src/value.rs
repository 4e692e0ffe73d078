//! Typed attribute values
//!
//! The remote API speaks loosely typed JSON. Attribute values are coerced
//! into [`Value`] against the schema-declared [`ValueType`] at plan time so
//! type errors surface before any remote call is made.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Declared type of an attribute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    String,
    Number,
    Bool,
    /// Order-sensitive sequence
    List(Box<ValueType>),
    /// Order-insensitive collection without duplicates
    Set(Box<ValueType>),
    /// String-keyed map with homogeneous values
    Map(Box<ValueType>),
    /// Nested block with its own typed fields
    Block(BTreeMap<String, ValueType>),
}

impl ValueType {
    pub fn list(inner: ValueType) -> Self {
        Self::List(Box::new(inner))
    }

    pub fn set(inner: ValueType) -> Self {
        Self::Set(Box::new(inner))
    }

    pub fn map(inner: ValueType) -> Self {
        Self::Map(Box::new(inner))
    }

    pub fn block<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, ValueType)>,
        K: Into<String>,
    {
        Self::Block(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => f.write_str("string"),
            Self::Number => f.write_str("number"),
            Self::Bool => f.write_str("bool"),
            Self::List(inner) => write!(f, "list({inner})"),
            Self::Set(inner) => write!(f, "set({inner})"),
            Self::Map(inner) => write!(f, "map({inner})"),
            Self::Block(_) => f.write_str("block"),
        }
    }
}

/// How strictly raw JSON is checked during coercion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coercion {
    /// User configuration: unknown block fields and nulls are errors
    Strict,
    /// Remote responses: unknown block fields and nulls are dropped
    Lenient,
}

/// A typed attribute value
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    String(String),
    Number(f64),
    Bool(bool),
    List(Vec<Value>),
    Set(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Block(BTreeMap<String, Value>),
}

impl Value {
    /// Coerce raw JSON into a value of the declared type.
    ///
    /// Integers widen to numbers and sets drop duplicate elements. Returns
    /// `Ok(None)` for a null in lenient mode.
    pub fn coerce(
        raw: &serde_json::Value,
        ty: &ValueType,
        mode: Coercion,
    ) -> Result<Option<Value>, String> {
        use serde_json::Value as Json;

        if raw.is_null() {
            return match mode {
                Coercion::Lenient => Ok(None),
                Coercion::Strict => Err(format!("expected {ty}, found null")),
            };
        }

        let value = match (ty, raw) {
            (ValueType::String, Json::String(s)) => Value::String(s.clone()),
            (ValueType::Number, Json::Number(n)) => Value::Number(
                n.as_f64()
                    .ok_or_else(|| format!("number {n} is out of range"))?,
            ),
            (ValueType::Bool, Json::Bool(b)) => Value::Bool(*b),
            (ValueType::List(inner), Json::Array(items)) => {
                Value::List(coerce_items(items, inner, mode)?)
            }
            (ValueType::Set(inner), Json::Array(items)) => {
                let mut unique: Vec<Value> = Vec::with_capacity(items.len());
                for item in coerce_items(items, inner, mode)? {
                    if !unique.contains(&item) {
                        unique.push(item);
                    }
                }
                Value::Set(unique)
            }
            (ValueType::Map(inner), Json::Object(entries)) => {
                let mut map = BTreeMap::new();
                for (key, raw) in entries {
                    let value = Self::coerce(raw, inner, mode).map_err(|e| format!("{key}: {e}"))?;
                    if let Some(value) = value {
                        map.insert(key.clone(), value);
                    }
                }
                Value::Map(map)
            }
            (ValueType::Block(fields), Json::Object(entries)) => {
                let mut block = BTreeMap::new();
                for (key, raw) in entries {
                    let Some(field_ty) = fields.get(key) else {
                        if mode == Coercion::Strict {
                            return Err(format!("unknown block field '{key}'"));
                        }
                        continue;
                    };
                    let value =
                        Self::coerce(raw, field_ty, mode).map_err(|e| format!("{key}: {e}"))?;
                    if let Some(value) = value {
                        block.insert(key.clone(), value);
                    }
                }
                Value::Block(block)
            }
            (ty, raw) => return Err(format!("expected {ty}, found {}", json_type_name(raw))),
        };

        Ok(Some(value))
    }

    /// Convert back to JSON for request payloads.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;

        match self {
            Self::String(s) => Json::String(s.clone()),
            Self::Number(n) => number_to_json(*n),
            Self::Bool(b) => Json::Bool(*b),
            Self::List(items) | Self::Set(items) => {
                Json::Array(items.iter().map(Value::to_json).collect())
            }
            Self::Map(entries) | Self::Block(entries) => Json::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// Whether this value inhabits the given type.
    pub fn conforms_to(&self, ty: &ValueType) -> bool {
        match (self, ty) {
            (Self::String(_), ValueType::String)
            | (Self::Number(_), ValueType::Number)
            | (Self::Bool(_), ValueType::Bool) => true,
            (Self::List(items), ValueType::List(inner)) | (Self::Set(items), ValueType::Set(inner)) => {
                items.iter().all(|v| v.conforms_to(inner))
            }
            (Self::Map(entries), ValueType::Map(inner)) => {
                entries.values().all(|v| v.conforms_to(inner))
            }
            (Self::Block(entries), ValueType::Block(fields)) => entries
                .iter()
                .all(|(k, v)| fields.get(k).is_some_and(|t| v.conforms_to(t))),
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Set(a), Self::Set(b)) => {
                a.len() == b.len() && a.iter().all(|x| b.contains(x)) && b.iter().all(|x| a.contains(x))
            }
            (Self::Map(a), Self::Map(b)) | (Self::Block(a), Self::Block(b)) => a == b,
            _ => false,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s:?}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::List(items) | Self::Set(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Map(entries) | Self::Block(entries) => {
                f.write_str("{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k} = {v}")?;
                }
                f.write_str("}")
            }
        }
    }
}

fn coerce_items(
    items: &[serde_json::Value],
    inner: &ValueType,
    mode: Coercion,
) -> Result<Vec<Value>, String> {
    let mut out = Vec::with_capacity(items.len());
    for (i, raw) in items.iter().enumerate() {
        if let Some(value) = Value::coerce(raw, inner, mode).map_err(|e| format!("[{i}]: {e}"))? {
            out.push(value);
        }
    }
    Ok(out)
}

/// Whole numbers are sent as integers; APIs commonly reject `80.0` for an id or count.
fn number_to_json(n: f64) -> serde_json::Value {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        serde_json::Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map_or(serde_json::Value::Null, serde_json::Value::Number)
    }
}

fn json_type_name(raw: &serde_json::Value) -> &'static str {
    match raw {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
