//! The content item aggregate.
//!
//! An [`Item`] owns its field values, its metadata linkage, and a forward
//! reference index derived from reference-typed field values. The index
//! travels with the item because persistence only sees whole aggregates
//! through `save_all`.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ImportError, Result};
use crate::id::{FieldId, GroupId, ItemId, ModelId, ProjectId, SchemaId};
use crate::model::Operator;
use crate::value::Value;

/// One applied field value. `group` is set when the value belongs to a group
/// instance rather than directly to the item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemField {
    pub field: FieldId,
    pub value: Value,
    pub group: Option<GroupId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub schema: SchemaId,
    pub model: ModelId,
    pub project: ProjectId,
    pub fields: Vec<ItemField>,
    /// Link to this item's metadata item, when the model declares one.
    pub metadata_item: Option<ItemId>,
    /// On a metadata item: the primary item it belongs to.
    pub original_item: Option<ItemId>,
    /// Items referenced by this item's reference-typed fields.
    pub references: BTreeSet<ItemId>,
    pub created_by: Operator,
    pub updated_by: Option<Operator>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Item {
    pub fn new(schema: SchemaId, model: ModelId, project: ProjectId, actor: Operator) -> Self {
        let now = Utc::now();
        Self {
            id: ItemId::new(),
            schema,
            model,
            project,
            fields: Vec::new(),
            metadata_item: None,
            original_item: None,
            references: BTreeSet::new(),
            created_by: actor,
            updated_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn field(&self, field: FieldId, group: Option<GroupId>) -> Option<&ItemField> {
        self.fields
            .iter()
            .find(|f| f.field == field && f.group == group)
    }

    /// Sets or replaces one field value, returning the previous value when
    /// the field was already set.
    pub fn apply_field(
        &mut self,
        field: FieldId,
        value: Value,
        group: Option<GroupId>,
    ) -> Option<Value> {
        if let Some(existing) = self
            .fields
            .iter_mut()
            .find(|f| f.field == field && f.group == group)
        {
            let previous = std::mem::replace(&mut existing.value, value);
            return Some(previous);
        }
        self.fields.push(ItemField {
            field,
            value,
            group,
        });
        None
    }

    /// Rebuilds the forward reference index from the current field values.
    /// Called once per record after all field changes are applied, so the
    /// index never drifts from the values it summarizes.
    pub fn sync_references(&mut self) {
        self.references = self
            .fields
            .iter()
            .filter_map(|f| f.value.as_reference())
            .collect();
    }

    /// Links this item to its metadata item. An existing link to a different
    /// metadata item is a hard error: metadata identity is not overwritable
    /// through import.
    pub fn link_metadata(&mut self, metadata: ItemId) -> Result<()> {
        match self.metadata_item {
            Some(existing) if existing != metadata => Err(ImportError::MetadataLinkMismatch(self.id)),
            _ => {
                self.metadata_item = Some(metadata);
                Ok(())
            }
        }
    }

    /// Links a metadata item back to its primary item, with the same
    /// no-silent-overwrite rule as [`Item::link_metadata`].
    pub fn link_original(&mut self, original: ItemId) -> Result<()> {
        match self.original_item {
            Some(existing) if existing != original => Err(ImportError::MetadataLinkMismatch(self.id)),
            _ => {
                self.original_item = Some(original);
                Ok(())
            }
        }
    }

    /// Re-attributes the item to the acting operator.
    pub fn touched_by(&mut self, actor: Operator) {
        self.updated_by = Some(actor);
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::UserId;

    fn item() -> Item {
        Item::new(
            SchemaId::new(),
            ModelId::new(),
            ProjectId::new(),
            Operator::User(UserId::new()),
        )
    }

    #[test]
    fn apply_field_replaces_and_returns_previous() {
        let mut item = item();
        let field = FieldId::new();
        assert_eq!(
            item.apply_field(field, Value::Text("a".into()), None),
            None
        );
        assert_eq!(
            item.apply_field(field, Value::Text("b".into()), None),
            Some(Value::Text("a".into()))
        );
        assert_eq!(item.fields.len(), 1);
    }

    #[test]
    fn group_scoped_fields_do_not_collide_with_direct_ones() {
        let mut item = item();
        let field = FieldId::new();
        let group = GroupId::new();
        item.apply_field(field, Value::Integer(1), None);
        item.apply_field(field, Value::Integer(2), Some(group));
        assert_eq!(item.fields.len(), 2);
        assert_eq!(
            item.field(field, Some(group)).map(|f| &f.value),
            Some(&Value::Integer(2))
        );
    }

    #[test]
    fn sync_references_tracks_current_targets_only() {
        let mut item = item();
        let field = FieldId::new();
        let first = ItemId::new();
        let second = ItemId::new();
        item.apply_field(field, Value::Reference(first), None);
        item.sync_references();
        assert!(item.references.contains(&first));

        item.apply_field(field, Value::Reference(second), None);
        item.sync_references();
        assert!(!item.references.contains(&first));
        assert!(item.references.contains(&second));
    }

    #[test]
    fn metadata_link_is_not_overwritable() {
        let mut item = item();
        let metadata = ItemId::new();
        item.link_metadata(metadata).unwrap();
        // Re-linking the same partner is fine.
        item.link_metadata(metadata).unwrap();
        assert!(matches!(
            item.link_metadata(ItemId::new()),
            Err(ImportError::MetadataLinkMismatch(_))
        ));
    }
}
