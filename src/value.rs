//! Content values and the coercion boundary.
//!
//! [`Value`] is the closed set of typed field values the pipeline produces.
//! Untyped input (CSV cells, decoded JSON scalars) becomes a [`Value`] only
//! through [`coerce_str`] / [`coerce_json`], which also own the distinction
//! between an absent value (field omitted from the record) and an invalid
//! one (present but unparseable for the declared type).

use std::fmt;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::id::{GroupId, ItemId};
use crate::schema::FieldType;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Value {
    Text(String),
    Integer(i64),
    Number(f64),
    Bool(bool),
    DateTime(DateTime<FixedOffset>),
    Url(Url),
    Reference(ItemId),
    Asset(String),
    Group(GroupId),
    Geometry(String),
}

impl Eq for Value {}

impl Value {
    pub fn as_display(&self) -> String {
        match self {
            Value::Text(s) => s.clone(),
            Value::Integer(i) => i.to_string(),
            Value::Number(f) => {
                if f.fract() == 0.0 {
                    (*f as i64).to_string()
                } else {
                    f.to_string()
                }
            }
            Value::Bool(b) => b.to_string(),
            Value::DateTime(dt) => dt.to_rfc3339(),
            Value::Url(u) => u.to_string(),
            Value::Reference(id) => id.to_string(),
            Value::Asset(a) => a.clone(),
            Value::Group(g) => g.to_string(),
            Value::Geometry(g) => g.clone(),
        }
    }

    /// Target of a reference-typed value, if this is one.
    pub fn as_reference(&self) -> Option<ItemId> {
        match self {
            Value::Reference(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_group(&self) -> Option<GroupId> {
        match self {
            Value::Group(id) => Some(*id),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

/// Outcome of one coercion attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Coerced {
    /// The raw input produced a typed value.
    Ok(Value),
    /// The raw input was empty or null; the field is omitted from the
    /// record, never set to a zero value.
    Absent,
    /// The raw input is present but does not parse for the target type.
    Invalid,
}

impl Coerced {
    pub fn into_option(self) -> Option<Value> {
        match self {
            Coerced::Ok(value) => Some(value),
            Coerced::Absent | Coerced::Invalid => None,
        }
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, Coerced::Invalid)
    }
}

/// Coerces a raw string (a CSV cell) into a value of the target type.
pub fn coerce_str(raw: &str, ty: &FieldType) -> Coerced {
    if raw.is_empty() {
        return Coerced::Absent;
    }
    match ty {
        FieldType::Integer => {
            if let Ok(parsed) = raw.parse::<i64>() {
                Coerced::Ok(Value::Integer(parsed))
            } else if let Ok(parsed) = raw.parse::<f64>() {
                Coerced::Ok(Value::Integer(parsed.trunc() as i64))
            } else {
                Coerced::Invalid
            }
        }
        FieldType::Number => match raw.parse::<f64>() {
            Ok(parsed) => Coerced::Ok(Value::Number(parsed)),
            Err(_) => Coerced::Invalid,
        },
        FieldType::Bool | FieldType::Checkbox => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" => Coerced::Ok(Value::Bool(true)),
            "false" | "0" => Coerced::Ok(Value::Bool(false)),
            _ => Coerced::Invalid,
        },
        FieldType::DateTime => match DateTime::parse_from_rfc3339(raw) {
            Ok(parsed) => Coerced::Ok(Value::DateTime(parsed)),
            Err(_) => Coerced::Invalid,
        },
        FieldType::Url => match Url::parse(raw) {
            Ok(parsed) => Coerced::Ok(Value::Url(parsed)),
            Err(_) => Coerced::Invalid,
        },
        FieldType::Reference => match raw.parse::<ItemId>() {
            Ok(parsed) => Coerced::Ok(Value::Reference(parsed)),
            Err(_) => Coerced::Invalid,
        },
        FieldType::Asset => Coerced::Ok(Value::Asset(raw.to_string())),
        FieldType::Group(_) => match raw.parse::<GroupId>() {
            Ok(parsed) => Coerced::Ok(Value::Group(parsed)),
            Err(_) => Coerced::Invalid,
        },
        FieldType::GeometryObject | FieldType::GeometryEditor => {
            match serde_json::from_str::<serde_json::Value>(raw) {
                Ok(_) => Coerced::Ok(Value::Geometry(raw.to_string())),
                Err(_) => Coerced::Invalid,
            }
        }
        // Text-family types, and any type added later, take the raw string
        // unchanged.
        _ => Coerced::Ok(Value::Text(raw.to_string())),
    }
}

/// Coerces a decoded JSON scalar into a value of the target type.
pub fn coerce_json(raw: &serde_json::Value, ty: &FieldType) -> Coerced {
    match raw {
        serde_json::Value::Null => Coerced::Absent,
        serde_json::Value::String(s) => coerce_str(s, ty),
        serde_json::Value::Bool(b) => match ty {
            FieldType::Bool | FieldType::Checkbox => Coerced::Ok(Value::Bool(*b)),
            _ if ty.is_textual() => Coerced::Ok(Value::Text(b.to_string())),
            _ => Coerced::Invalid,
        },
        serde_json::Value::Number(n) => match ty {
            FieldType::Integer => {
                if let Some(i) = n.as_i64() {
                    Coerced::Ok(Value::Integer(i))
                } else if let Some(f) = n.as_f64() {
                    Coerced::Ok(Value::Integer(f.trunc() as i64))
                } else {
                    Coerced::Invalid
                }
            }
            FieldType::Number => match n.as_f64() {
                Some(f) => Coerced::Ok(Value::Number(f)),
                None => Coerced::Invalid,
            },
            _ if ty.is_textual() => Coerced::Ok(Value::Text(n.to_string())),
            _ => Coerced::Invalid,
        },
        composite @ (serde_json::Value::Array(_) | serde_json::Value::Object(_)) => match ty {
            FieldType::GeometryObject | FieldType::GeometryEditor => {
                match serde_json::to_string(composite) {
                    Ok(text) => Coerced::Ok(Value::Geometry(text)),
                    Err(_) => Coerced::Invalid,
                }
            }
            _ if ty.is_textual() => match serde_json::to_string(composite) {
                Ok(text) => Coerced::Ok(Value::Text(text)),
                Err(_) => Coerced::Invalid,
            },
            _ => Coerced::Invalid,
        },
    }
}
