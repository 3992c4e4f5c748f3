//! Error taxonomy for the import pipeline.
//!
//! Every fatal condition unwinds to the top-level entry points as an
//! [`ImportError`]; nothing is retried at any layer. Variants are grouped so
//! callers can distinguish bad input, denied writes, broken linkage, resource
//! limits, and cancellation without string matching.

use thiserror::Error;

use crate::id::{FieldId, ItemId, JobId, ModelId, SchemaId};

/// Result alias used throughout the pipeline.
pub type Result<T> = std::result::Result<T, ImportError>;

#[derive(Debug, Error)]
pub enum ImportError {
    /// Malformed input stream: invalid JSON, a `FeatureCollection` without a
    /// `features` array, or a CSV header that cannot be read.
    #[error("decode error: {0}")]
    Decode(String),

    /// A record key is not a syntactically valid field key.
    #[error("invalid field key '{0}'")]
    InvalidFieldKey(String),

    /// The same key inferred two different types within the first record.
    #[error("ambiguous inferred type for key '{0}'")]
    AmbiguousInferredType(String),

    /// Inference proposed a key the schema already gained during this pass.
    #[error("duplicate field key '{0}' in schema")]
    DuplicateFieldKey(String),

    /// A record carried an `id` value that does not parse as an item ID.
    #[error("invalid item id '{0}'")]
    InvalidItemId(String),

    /// GeoJSON import without a usable geometry field in the schema.
    #[error("geometry field '{0}' is missing or not geometry-typed")]
    GeometryFieldMissing(String),

    /// A field reference resolved against neither the model schema nor any
    /// of its group schemas.
    #[error("field '{0}' not found in schema")]
    FieldNotFound(String),

    /// A decoded JSON value does not match the declared type of its field.
    #[error("value for field '{0}' does not match its type")]
    InvalidValue(String),

    /// The operator may not update the resolved item.
    #[error("operation denied for item {0}")]
    PermissionDenied(ItemId),

    /// A declared metadata item does not use the model's metadata schema.
    #[error("metadata item {item} does not match metadata schema of model {model}")]
    MetadataSchemaMismatch { item: ItemId, model: ModelId },

    /// Item and metadata item already point at different partners.
    #[error("metadata linkage mismatch on item {0}")]
    MetadataLinkMismatch(ItemId),

    /// A unique field received a value already present in the model.
    #[error("duplicate value for unique field {0}")]
    DuplicateValue(FieldId),

    /// A group-schema field arrived before its owning group field had a value.
    #[error("group field '{0}' cannot be resolved against the item")]
    GroupUnresolved(String),

    /// The run exceeded the record ceiling. Reported distinctly so callers
    /// can tell "too much data" from "bad data".
    #[error("import exceeds the record limit ({limit} records)")]
    TooManyRecords { limit: usize },

    /// The backing job was cancelled between chunks.
    #[error("import job {0} was cancelled")]
    Cancelled(JobId),

    /// A state transition was attempted on a job already in a terminal
    /// state.
    #[error("job {0} is already in a terminal state")]
    JobTerminal(JobId),

    /// The job backing an asynchronous import does not exist.
    #[error("job {0} not found")]
    JobNotFound(JobId),

    #[error("model {0} not found")]
    ModelNotFound(ModelId),

    #[error("schema {0} not found")]
    SchemaNotFound(SchemaId),

    /// A referenced item is missing or already linked elsewhere.
    #[error("reference linkage mismatch for item {0}")]
    ReferenceLinkMismatch(ItemId),

    /// An error surfaced by one of the backing stores.
    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl ImportError {
    /// True for outcomes that leave previously committed chunks in place by
    /// design rather than by accident.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ImportError::Cancelled(_))
    }
}
