//! Decoded records and the normalizer turning them into import parameters.
//!
//! A [`Decoded`] record preserves source key order (inference order is
//! observable), and normalization converts it into an [`ImportItemParam`]:
//! the reserved `id` key becomes the resolution target, everything else
//! becomes one field parameter per key.

use indexmap::IndexMap;
use serde::Deserialize;

use crate::error::{ImportError, Result};
use crate::id::{FieldId, ItemId};
use crate::schema::ID_KEY;
use crate::value::Value;

/// A decoded GeoJSON feature. Foreign members are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct Feature {
    #[serde(default)]
    pub geometry: serde_json::Value,
    #[serde(default)]
    pub properties: IndexMap<String, serde_json::Value>,
}

/// One record pulled from the input stream, before normalization.
#[derive(Debug, Clone)]
pub enum Decoded {
    Object(IndexMap<String, serde_json::Value>),
    Feature(Feature),
}

impl Decoded {
    /// The ordered key/value pairs inference walks. For GeoJSON this is the
    /// `properties` sub-object only; the geometry is never schema-inferred.
    pub fn inference_pairs(&self) -> Vec<(String, serde_json::Value)> {
        let map = match self {
            Decoded::Object(map) => map,
            Decoded::Feature(feature) => &feature.properties,
        };
        map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

/// A field reference carried by an import parameter: by stable ID (CSV
/// header-mapped) or by human key (resolved against the schema later).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldRef {
    Id(FieldId),
    Key(String),
}

/// A raw field value awaiting coercion, or one the normalizer already
/// coerced (CSV cells, serialized geometry).
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Str(String),
    Json(serde_json::Value),
    Typed(Value),
}

#[derive(Debug, Clone)]
pub struct ImportFieldParam {
    pub field: FieldRef,
    pub value: RawValue,
}

/// One normalized input record. Produced by the normalizer, consumed and
/// discarded within one chunk.
#[derive(Debug, Clone, Default)]
pub struct ImportItemParam {
    pub item: Option<ItemId>,
    pub metadata: Option<ItemId>,
    pub fields: Vec<ImportFieldParam>,
}

fn parse_item_id(raw: &serde_json::Value) -> Result<Option<ItemId>> {
    match raw {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::String(s) if s.is_empty() => Ok(None),
        serde_json::Value::String(s) => s
            .parse::<ItemId>()
            .map(Some)
            .map_err(|_| ImportError::InvalidItemId(s.clone())),
        other => Err(ImportError::InvalidItemId(other.to_string())),
    }
}

fn normalize_object(map: &IndexMap<String, serde_json::Value>) -> Result<ImportItemParam> {
    let mut param = ImportItemParam::default();
    for (key, value) in map {
        if key == ID_KEY {
            param.item = parse_item_id(value)?;
            continue;
        }
        param.fields.push(ImportFieldParam {
            field: FieldRef::Key(key.clone()),
            value: RawValue::Json(value.clone()),
        });
    }
    Ok(param)
}

/// Converts a decoded record into import parameters.
///
/// For features, `geometry_field` is the already-resolved geometry field of
/// the schema; the feature's `geometry` sub-document is serialized into that
/// one field and `properties` then normalizes as a flat object.
pub fn normalize(decoded: &Decoded, geometry_field: Option<FieldId>) -> Result<ImportItemParam> {
    match decoded {
        Decoded::Object(map) => normalize_object(map),
        Decoded::Feature(feature) => {
            let field = geometry_field
                .ok_or_else(|| ImportError::GeometryFieldMissing(String::new()))?;
            let mut param = normalize_object(&feature.properties)?;
            if !feature.geometry.is_null() {
                let serialized = serde_json::to_string(&feature.geometry)
                    .map_err(|e| ImportError::Decode(e.to_string()))?;
                param.fields.insert(
                    0,
                    ImportFieldParam {
                        field: FieldRef::Id(field),
                        value: RawValue::Typed(Value::Geometry(serialized)),
                    },
                );
            }
            Ok(param)
        }
    }
}
