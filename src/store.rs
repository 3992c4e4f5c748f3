//! Collaborator interfaces the pipeline runs against.
//!
//! Persistence, permissions, transactions, and progress delivery are owned
//! by the embedding system; the pipeline consumes them through these traits.
//! They return [`anyhow::Result`] so backends can surface whatever error
//! chain they carry; the pipeline wraps failures into
//! [`ImportError::Store`](crate::error::ImportError::Store).

use crate::id::{FieldId, ItemId, JobId, ModelId, ProjectId, SchemaId};
use crate::item::Item;
use crate::job::{Job, Progress};
use crate::model::{Model, Project};
use crate::schema::Schema;
use crate::value::Value;

/// Schema, model, and project lookups plus the single schema save the
/// inference pass performs.
pub trait SchemaStore {
    fn find_schema(&self, id: SchemaId) -> anyhow::Result<Option<Schema>>;
    fn save_schema(&self, schema: &Schema) -> anyhow::Result<()>;
    fn find_model(&self, id: ModelId) -> anyhow::Result<Option<Model>>;
    fn find_project(&self, id: ProjectId) -> anyhow::Result<Option<Project>>;
}

/// The generic entity repository, reduced to what one chunk needs: a batch
/// point-lookup, a batch save, and the model-scoped uniqueness probe.
pub trait ItemStore {
    fn find_items_by_ids(&self, ids: &[ItemId]) -> anyhow::Result<Vec<Item>>;
    fn save_all(&self, items: &[Item]) -> anyhow::Result<()>;
    fn field_value_exists(
        &self,
        model: ModelId,
        field: FieldId,
        value: &Value,
        excluding: &[ItemId],
    ) -> anyhow::Result<bool>;
}

/// Wraps one chunk. Dropping an uncommitted transaction rolls it back.
pub trait Transaction {
    fn commit(self: Box<Self>) -> anyhow::Result<()>;
    fn rollback(self: Box<Self>) -> anyhow::Result<()>;
}

pub trait TransactionProvider {
    fn begin(&self) -> anyhow::Result<Box<dyn Transaction + '_>>;
}

/// Caller-supplied operator capabilities. Only the update permission is
/// consulted by the pipeline.
pub trait Capabilities {
    fn can_update(&self, item: &Item) -> bool;
}

/// Persisted job records backing the asynchronous CSV path.
pub trait JobStore {
    fn find_job(&self, id: JobId) -> anyhow::Result<Option<Job>>;
    fn save_job(&self, job: &Job) -> anyhow::Result<()>;
}

/// Fire-and-forget progress delivery. Publish failures and absent
/// subscribers must never block or fail the import, so the interface is
/// infallible by construction.
pub trait ProgressPublisher {
    fn publish(&self, job: JobId, progress: Progress);
}
