//! Schema model, field-key validation, and first-record type inference.
//!
//! This module owns the [`Schema`] struct (the ordered field list governing a
//! model's items), the [`FieldType`] enum, and the inference engine that
//! proposes new fields from the shape of the first decoded record of an
//! import stream.
//!
//! ## Responsibilities
//!
//! - Field-key syntax validation (one compiled pattern, cached)
//! - Type inference from JSON scalar kinds, preserving source key order
//! - The assignability table deciding whether an inferred type may flow into
//!   an existing field
//! - Duplicate-key protection when appending inferred fields

use std::sync::OnceLock;

use log::debug;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ImportError, Result};
use crate::id::{FieldId, ProjectId, SchemaId};

/// The reserved record key naming the item identifier. Never a field.
pub const ID_KEY: &str = "id";

const FIELD_KEY_PATTERN: &str = "^[a-zA-Z0-9_-]{1,64}$";

fn field_key_regex() -> &'static Regex {
    static FIELD_KEY: OnceLock<Regex> = OnceLock::new();
    FIELD_KEY.get_or_init(|| Regex::new(FIELD_KEY_PATTERN).expect("field key pattern"))
}

/// True when `key` may name a schema field.
pub fn is_valid_field_key(key: &str) -> bool {
    key != ID_KEY && field_key_regex().is_match(key)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldType {
    Text,
    TextArea,
    RichText,
    Markdown,
    Select,
    Tag,
    Integer,
    Number,
    Bool,
    Checkbox,
    DateTime,
    Url,
    Reference,
    Asset,
    /// A field whose values live in the referenced group schema.
    Group(SchemaId),
    GeometryObject,
    GeometryEditor,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::TextArea => "textArea",
            FieldType::RichText => "richText",
            FieldType::Markdown => "markdown",
            FieldType::Select => "select",
            FieldType::Tag => "tag",
            FieldType::Integer => "integer",
            FieldType::Number => "number",
            FieldType::Bool => "bool",
            FieldType::Checkbox => "checkbox",
            FieldType::DateTime => "dateTime",
            FieldType::Url => "url",
            FieldType::Reference => "reference",
            FieldType::Asset => "asset",
            FieldType::Group(_) => "group",
            FieldType::GeometryObject => "geometryObject",
            FieldType::GeometryEditor => "geometryEditor",
        }
    }

    pub fn is_textual(&self) -> bool {
        matches!(
            self,
            FieldType::Text
                | FieldType::TextArea
                | FieldType::RichText
                | FieldType::Markdown
                | FieldType::Select
                | FieldType::Tag
        )
    }

    pub fn is_geometry(&self) -> bool {
        matches!(self, FieldType::GeometryObject | FieldType::GeometryEditor)
    }

    pub fn group_schema(&self) -> Option<SchemaId> {
        match self {
            FieldType::Group(schema) => Some(*schema),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Field {
    pub id: FieldId,
    pub key: String,
    pub field_type: FieldType,
    pub description: String,
    pub required: bool,
    pub unique: bool,
}

impl Field {
    pub fn new(key: impl Into<String>, field_type: FieldType) -> Result<Self> {
        let key = key.into();
        if !is_valid_field_key(&key) {
            return Err(ImportError::InvalidFieldKey(key));
        }
        Ok(Self {
            id: FieldId::new(),
            key,
            field_type,
            description: String::new(),
            required: false,
            unique: false,
        })
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    pub id: SchemaId,
    pub project: ProjectId,
    pub fields: Vec<Field>,
}

impl Schema {
    pub fn new(project: ProjectId) -> Self {
        Self {
            id: SchemaId::new(),
            project,
            fields: Vec::new(),
        }
    }

    pub fn field_by_key(&self, key: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.key == key)
    }

    pub fn field_by_id(&self, id: FieldId) -> Option<&Field> {
        self.fields.iter().find(|f| f.id == id)
    }

    /// Fields of [`FieldType::Group`], in declaration order.
    pub fn group_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields
            .iter()
            .filter(|f| matches!(f.field_type, FieldType::Group(_)))
    }

    /// Appends a field, refusing duplicate keys.
    pub fn append(&mut self, field: Field) -> Result<()> {
        if self.field_by_key(&field.key).is_some() {
            return Err(ImportError::DuplicateFieldKey(field.key));
        }
        self.fields.push(field);
        Ok(())
    }
}

/// A proposed new schema field, produced by inference and persisted by
/// appending to the schema's field list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateFieldParam {
    pub key: String,
    pub field_type: FieldType,
    pub description: String,
}

impl CreateFieldParam {
    pub fn into_field(self) -> Result<Field> {
        let mut field = Field::new(self.key, self.field_type)?;
        field.description = self.description;
        Ok(field)
    }
}

/// Whether a value of `source` (an inferred type) may flow into an existing
/// field of type `existing` without a schema change.
pub fn assignable(source: &FieldType, existing: &FieldType) -> bool {
    if source == existing {
        return true;
    }
    match source {
        FieldType::Integer => matches!(
            existing,
            FieldType::Text | FieldType::RichText | FieldType::Markdown | FieldType::Number
        ),
        FieldType::Number => matches!(
            existing,
            FieldType::Text | FieldType::RichText | FieldType::Markdown
        ),
        FieldType::Bool => matches!(
            existing,
            FieldType::Checkbox | FieldType::Text | FieldType::RichText | FieldType::Markdown
        ),
        FieldType::Text => matches!(existing, FieldType::RichText | FieldType::Markdown),
        _ => false,
    }
}

fn infer_type(value: &serde_json::Value) -> FieldType {
    match value {
        serde_json::Value::Bool(_) => FieldType::Bool,
        serde_json::Value::Number(_) => FieldType::Number,
        _ => FieldType::Text,
    }
}

/// Proposes new fields for the unknown keys of the first decoded record.
///
/// Keys are walked in source order so inferred fields preserve the input's
/// column order. The reserved `id` key is skipped; a syntactically invalid
/// key aborts the whole import. Keys already naming a schema field never
/// produce a proposal: existing fields are authoritative, and a
/// non-assignable apparent type is left for per-record coercion to reject.
pub fn infer_fields(
    first: &[(String, serde_json::Value)],
    schema: &Schema,
) -> Result<Vec<CreateFieldParam>> {
    let mut proposals: Vec<CreateFieldParam> = Vec::new();
    for (key, value) in first {
        if key == ID_KEY {
            continue;
        }
        if !is_valid_field_key(key) {
            return Err(ImportError::InvalidFieldKey(key.clone()));
        }
        let inferred = infer_type(value);
        if let Some(existing) = schema.field_by_key(key) {
            if !assignable(&inferred, &existing.field_type) {
                debug!(
                    "key '{}' looks like {} but field is {}; leaving for value coercion",
                    key,
                    inferred.as_str(),
                    existing.field_type.as_str()
                );
            }
            continue;
        }
        if let Some(pending) = proposals.iter().find(|p| &p.key == key) {
            if pending.field_type != inferred {
                return Err(ImportError::AmbiguousInferredType(key.clone()));
            }
            continue;
        }
        proposals.push(CreateFieldParam {
            key: key.clone(),
            field_type: inferred,
            description: String::new(),
        });
    }
    Ok(proposals)
}
