//! In-memory implementations of the collaborator interfaces.
//!
//! These back the test suite and the benches, and let an embedder drive the
//! pipeline end to end without a database. Transactions snapshot the item
//! table on begin and restore it on rollback (or on drop without commit);
//! they are not nested.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::bail;

use crate::id::{FieldId, ItemId, JobId, ModelId, ProjectId, SchemaId};
use crate::item::Item;
use crate::job::{Job, JobStatus, Progress};
use crate::model::{Model, Project};
use crate::schema::Schema;
use crate::store::{
    Capabilities, ItemStore, JobStore, ProgressPublisher, SchemaStore, Transaction,
    TransactionProvider,
};
use crate::value::Value;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().expect("poisoned lock")
}

#[derive(Default)]
pub struct MemoryStores {
    schemas: Mutex<BTreeMap<SchemaId, Schema>>,
    models: Mutex<BTreeMap<ModelId, Model>>,
    projects: Mutex<BTreeMap<ProjectId, Project>>,
    items: Mutex<BTreeMap<ItemId, Item>>,
    jobs: Mutex<BTreeMap<JobId, Job>>,
    snapshot: Mutex<Option<BTreeMap<ItemId, Item>>>,
}

impl MemoryStores {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_project(&self, project: Project) {
        lock(&self.projects).insert(project.id, project);
    }

    pub fn seed_model(&self, model: Model) {
        lock(&self.models).insert(model.id, model);
    }

    pub fn seed_schema(&self, schema: Schema) {
        lock(&self.schemas).insert(schema.id, schema);
    }

    pub fn seed_item(&self, item: Item) {
        lock(&self.items).insert(item.id, item);
    }

    pub fn seed_job(&self, job: Job) {
        lock(&self.jobs).insert(job.id, job);
    }

    pub fn item(&self, id: ItemId) -> Option<Item> {
        lock(&self.items).get(&id).cloned()
    }

    pub fn items(&self) -> Vec<Item> {
        lock(&self.items).values().cloned().collect()
    }

    pub fn item_count(&self) -> usize {
        lock(&self.items).len()
    }

    pub fn schema(&self, id: SchemaId) -> Option<Schema> {
        lock(&self.schemas).get(&id).cloned()
    }

    pub fn job(&self, id: JobId) -> Option<Job> {
        lock(&self.jobs).get(&id).cloned()
    }

    /// Marks a job cancelled, the way an external cancel request would.
    pub fn cancel_job(&self, id: JobId) {
        if let Some(job) = lock(&self.jobs).get_mut(&id) {
            job.status = JobStatus::Cancelled;
        }
    }
}

impl SchemaStore for MemoryStores {
    fn find_schema(&self, id: SchemaId) -> anyhow::Result<Option<Schema>> {
        Ok(lock(&self.schemas).get(&id).cloned())
    }

    fn save_schema(&self, schema: &Schema) -> anyhow::Result<()> {
        lock(&self.schemas).insert(schema.id, schema.clone());
        Ok(())
    }

    fn find_model(&self, id: ModelId) -> anyhow::Result<Option<Model>> {
        Ok(lock(&self.models).get(&id).cloned())
    }

    fn find_project(&self, id: ProjectId) -> anyhow::Result<Option<Project>> {
        Ok(lock(&self.projects).get(&id).cloned())
    }
}

impl ItemStore for MemoryStores {
    fn find_items_by_ids(&self, ids: &[ItemId]) -> anyhow::Result<Vec<Item>> {
        let items = lock(&self.items);
        Ok(ids.iter().filter_map(|id| items.get(id).cloned()).collect())
    }

    fn save_all(&self, batch: &[Item]) -> anyhow::Result<()> {
        let mut items = lock(&self.items);
        for item in batch {
            items.insert(item.id, item.clone());
        }
        Ok(())
    }

    fn field_value_exists(
        &self,
        model: ModelId,
        field: FieldId,
        value: &Value,
        excluding: &[ItemId],
    ) -> anyhow::Result<bool> {
        let rendered = value.as_display();
        let items = lock(&self.items);
        Ok(items.values().any(|item| {
            item.model == model
                && !excluding.contains(&item.id)
                && item
                    .fields
                    .iter()
                    .any(|f| f.field == field && f.value.as_display() == rendered)
        }))
    }
}

struct MemoryTransaction<'a> {
    stores: &'a MemoryStores,
    finished: bool,
}

impl MemoryTransaction<'_> {
    fn restore(&self) {
        if let Some(snapshot) = lock(&self.stores.snapshot).take() {
            *lock(&self.stores.items) = snapshot;
        }
    }
}

impl Transaction for MemoryTransaction<'_> {
    fn commit(mut self: Box<Self>) -> anyhow::Result<()> {
        self.finished = true;
        lock(&self.stores.snapshot).take();
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> anyhow::Result<()> {
        self.finished = true;
        self.restore();
        Ok(())
    }
}

impl Drop for MemoryTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.restore();
        }
    }
}

impl TransactionProvider for MemoryStores {
    fn begin(&self) -> anyhow::Result<Box<dyn Transaction + '_>> {
        let mut snapshot = lock(&self.snapshot);
        if snapshot.is_some() {
            bail!("a transaction is already in progress");
        }
        *snapshot = Some(lock(&self.items).clone());
        Ok(Box::new(MemoryTransaction {
            stores: self,
            finished: false,
        }))
    }
}

impl JobStore for MemoryStores {
    fn find_job(&self, id: JobId) -> anyhow::Result<Option<Job>> {
        Ok(lock(&self.jobs).get(&id).cloned())
    }

    fn save_job(&self, job: &Job) -> anyhow::Result<()> {
        lock(&self.jobs).insert(job.id, job.clone());
        Ok(())
    }
}

/// Grants every update.
pub struct AllowAll;

impl Capabilities for AllowAll {
    fn can_update(&self, _item: &Item) -> bool {
        true
    }
}

/// Denies every update; inserts are unaffected.
pub struct DenyUpdates;

impl Capabilities for DenyUpdates {
    fn can_update(&self, _item: &Item) -> bool {
        false
    }
}

/// Records every published progress value, newest last.
#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<(JobId, Progress)>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(JobId, Progress)> {
        lock(&self.events).clone()
    }
}

impl ProgressPublisher for RecordingPublisher {
    fn publish(&self, job: JobId, progress: Progress) {
        lock(&self.events).push((job, progress));
    }
}
