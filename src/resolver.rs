//! The transactional chunk resolver.
//!
//! One call resolves and persists one chunk of normalized records inside one
//! storage transaction: a single batched item pre-fetch, the strategy
//! decision per record, permission and linkage checks, field application
//! with uniqueness enforcement, reference-index reconciliation, and one
//! batched save at the end. Any hard error rolls the whole chunk back;
//! strategy "ignored" outcomes are counted, never raised.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, warn};

use crate::error::{ImportError, Result};
use crate::id::{FieldId, ItemId, SchemaId};
use crate::import::Strategy;
use crate::item::Item;
use crate::model::{Model, Operator};
use crate::record::{FieldRef, ImportItemParam, RawValue};
use crate::schema::{Field, FieldType, Schema};
use crate::store::{Capabilities, ItemStore, TransactionProvider};
use crate::value::{Coerced, Value, coerce_json, coerce_str};

/// Per-chunk outcome counters, merged into the run's result by the
/// orchestrator.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChunkCounters {
    pub total: usize,
    pub inserted: usize,
    pub updated: usize,
    pub ignored: usize,
}

/// Everything one chunk resolution needs, owned by the orchestrator for the
/// duration of the run.
pub struct ChunkContext<'a> {
    pub items: &'a dyn ItemStore,
    pub transactions: &'a dyn TransactionProvider,
    pub capabilities: &'a dyn Capabilities,
    pub model: &'a Model,
    pub schema: &'a Schema,
    pub group_schemas: &'a [Schema],
    pub operator: Operator,
    pub strategy: Strategy,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Action {
    Insert,
    Update,
}

/// Resolves and persists one chunk. Commits on success; on any error the
/// transaction is rolled back and nothing from the chunk is persisted.
pub fn resolve_and_save(ctx: &ChunkContext, params: &[ImportItemParam]) -> Result<ChunkCounters> {
    let tx = ctx.transactions.begin()?;
    match process(ctx, params) {
        Ok(counters) => {
            tx.commit()?;
            debug!(
                "chunk committed: {} inserted, {} updated, {} ignored",
                counters.inserted, counters.updated, counters.ignored
            );
            Ok(counters)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback() {
                warn!("rollback failed after chunk error: {rollback_err:#}");
            }
            Err(err)
        }
    }
}

fn process(ctx: &ChunkContext, params: &[ImportItemParam]) -> Result<ChunkCounters> {
    let mut counters = ChunkCounters::default();

    // One point-lookup for the whole chunk: every explicit item ID plus
    // every declared metadata ID.
    let mut wanted: BTreeSet<ItemId> = params.iter().filter_map(|p| p.item).collect();
    wanted.extend(params.iter().filter_map(|p| p.metadata));
    let mut resolved: BTreeMap<ItemId, Item> = if wanted.is_empty() {
        BTreeMap::new()
    } else {
        let ids: Vec<ItemId> = wanted.into_iter().collect();
        ctx.items
            .find_items_by_ids(&ids)?
            .into_iter()
            .map(|item| (item.id, item))
            .collect()
    };

    // Save order follows first-touch order within the chunk.
    let mut queued: Vec<ItemId> = Vec::new();
    let mut unique_seen: BTreeMap<FieldId, BTreeMap<String, ItemId>> = BTreeMap::new();

    for param in params {
        let existing = param.item.and_then(|id| resolved.get(&id).cloned());
        let (action, mut item) = match (ctx.strategy, existing) {
            (Strategy::Insert, Some(_)) | (Strategy::Update, None) => {
                counters.total += 1;
                counters.ignored += 1;
                continue;
            }
            (Strategy::Update, Some(existing)) | (Strategy::Upsert, Some(existing)) => {
                if !ctx.capabilities.can_update(&existing) {
                    return Err(ImportError::PermissionDenied(existing.id));
                }
                let mut item = existing;
                item.touched_by(ctx.operator);
                (Action::Update, item)
            }
            (Strategy::Insert, None) | (Strategy::Upsert, None) => {
                let mut item = Item::new(
                    ctx.schema.id,
                    ctx.model.id,
                    ctx.model.project,
                    ctx.operator,
                );
                // A supplied ID that resolved to nothing is adopted, so
                // later chunks (and later runs) can address the item.
                if let Some(id) = param.item {
                    item.id = id;
                }
                (Action::Insert, item)
            }
        };

        if let Some(metadata_id) = param.metadata {
            link_metadata(ctx, &mut item, metadata_id, &mut resolved, &mut queued)?;
        }

        let touched = queued.contains(&item.id);
        apply_fields(ctx, &mut item, param, &mut unique_seen, touched)?;
        item.sync_references();

        counters.total += 1;
        match action {
            Action::Insert => counters.inserted += 1,
            Action::Update => counters.updated += 1,
        }
        if !queued.contains(&item.id) {
            queued.push(item.id);
        }
        resolved.insert(item.id, item);
    }

    if !queued.is_empty() {
        let batch: Vec<Item> = queued
            .iter()
            .filter_map(|id| resolved.get(id).cloned())
            .collect();
        ctx.items.save_all(&batch)?;
    }
    Ok(counters)
}

/// Step 5: metadata linkage. The metadata item must exist, use the model's
/// declared metadata schema, and any linkage already present on either side
/// must agree with the new one.
fn link_metadata(
    ctx: &ChunkContext,
    item: &mut Item,
    metadata_id: ItemId,
    resolved: &mut BTreeMap<ItemId, Item>,
    queued: &mut Vec<ItemId>,
) -> Result<()> {
    let declared = ctx
        .model
        .metadata_schema
        .ok_or(ImportError::MetadataSchemaMismatch {
            item: metadata_id,
            model: ctx.model.id,
        })?;
    let mut metadata =
        resolved
            .get(&metadata_id)
            .cloned()
            .ok_or(ImportError::MetadataSchemaMismatch {
                item: metadata_id,
                model: ctx.model.id,
            })?;
    if metadata.schema != declared {
        return Err(ImportError::MetadataSchemaMismatch {
            item: metadata_id,
            model: ctx.model.id,
        });
    }

    item.link_metadata(metadata_id)?;
    let already_linked = metadata.original_item == Some(item.id);
    metadata.link_original(item.id)?;
    if !already_linked && !queued.contains(&metadata_id) {
        queued.push(metadata_id);
    }
    resolved.insert(metadata_id, metadata);
    Ok(())
}

enum Slot<'a> {
    Direct(&'a Field),
    Group(SchemaId, &'a Field),
}

fn resolve_field<'a>(ctx: &'a ChunkContext, fref: &FieldRef) -> Result<Slot<'a>> {
    match fref {
        FieldRef::Id(id) => {
            if let Some(field) = ctx.schema.field_by_id(*id) {
                return Ok(Slot::Direct(field));
            }
            for group in ctx.group_schemas {
                if let Some(field) = group.field_by_id(*id) {
                    return Ok(Slot::Group(group.id, field));
                }
            }
            Err(ImportError::FieldNotFound(id.to_string()))
        }
        FieldRef::Key(key) => {
            if let Some(field) = ctx.schema.field_by_key(key) {
                return Ok(Slot::Direct(field));
            }
            for group in ctx.group_schemas {
                if let Some(field) = group.field_by_key(key) {
                    return Ok(Slot::Group(group.id, field));
                }
            }
            Err(ImportError::FieldNotFound(key.clone()))
        }
    }
}

/// Coerces one raw parameter for its resolved field. Decoded JSON that does
/// not fit the declared type is a hard error; an opaque CSV string that does
/// not fit degrades at field granularity like any other CSV cell.
fn coerce_param(field: &Field, raw: &RawValue) -> Result<Option<Value>> {
    let coerced = match raw {
        RawValue::Typed(value) => return Ok(Some(value.clone())),
        RawValue::Str(s) => match coerce_str(s, &field.field_type) {
            Coerced::Invalid => {
                debug!("dropping value for field '{}': not a {}", field.key, field.field_type.as_str());
                Coerced::Absent
            }
            other => other,
        },
        RawValue::Json(json) => coerce_json(json, &field.field_type),
    };
    match coerced {
        Coerced::Ok(value) => Ok(Some(value)),
        Coerced::Absent => Ok(None),
        Coerced::Invalid => Err(ImportError::InvalidValue(field.key.clone())),
    }
}

/// Steps 6 and 7: direct fields first (coercion, uniqueness, reference
/// rules), then group fields resolved against the already-applied direct
/// values.
fn apply_fields(
    ctx: &ChunkContext,
    item: &mut Item,
    param: &ImportItemParam,
    unique_seen: &mut BTreeMap<FieldId, BTreeMap<String, ItemId>>,
    touched_this_run: bool,
) -> Result<()> {
    let mut deferred: Vec<(SchemaId, &Field, &RawValue)> = Vec::new();

    for field_param in &param.fields {
        match resolve_field(ctx, &field_param.field)? {
            Slot::Direct(field) => {
                let Some(value) = coerce_param(field, &field_param.value)? else {
                    continue;
                };
                check_unique(ctx, field, &value, item.id, unique_seen)?;
                if field.field_type == FieldType::Reference
                    && touched_this_run
                    && let Some(previous) = item.field(field.id, None)
                    && let Some(old_target) = previous.value.as_reference()
                    && value.as_reference() != Some(old_target)
                {
                    // A linkage set earlier in this run is immutable for the
                    // rest of it.
                    return Err(ImportError::ReferenceLinkMismatch(item.id));
                }
                item.apply_field(field.id, value, None);
            }
            Slot::Group(group_schema, field) => {
                deferred.push((group_schema, field, &field_param.value));
            }
        }
    }

    for (group_schema, field, raw) in deferred {
        let Some(value) = coerce_param(field, raw)? else {
            continue;
        };
        let owner = ctx
            .schema
            .group_fields()
            .find(|gf| gf.field_type.group_schema() == Some(group_schema))
            .ok_or_else(|| ImportError::GroupUnresolved(field.key.clone()))?;
        let group = item
            .field(owner.id, None)
            .and_then(|f| f.value.as_group())
            .ok_or_else(|| ImportError::GroupUnresolved(field.key.clone()))?;
        item.apply_field(field.id, value, Some(group));
    }
    Ok(())
}

/// Uniqueness is scoped to the model: the probe excludes the item being
/// written, and values seen earlier in the same chunk conflict unless they
/// belong to the same item.
fn check_unique(
    ctx: &ChunkContext,
    field: &Field,
    value: &Value,
    item: ItemId,
    unique_seen: &mut BTreeMap<FieldId, BTreeMap<String, ItemId>>,
) -> Result<()> {
    if !field.unique {
        return Ok(());
    }
    let rendered = value.as_display();
    let per_field = unique_seen.entry(field.id).or_default();
    match per_field.get(&rendered) {
        Some(owner) if *owner != item => return Err(ImportError::DuplicateValue(field.id)),
        _ => {
            per_field.insert(rendered, item);
        }
    }
    if ctx
        .items
        .field_value_exists(ctx.model.id, field.id, value, &[item])?
    {
        return Err(ImportError::DuplicateValue(field.id));
    }
    Ok(())
}
