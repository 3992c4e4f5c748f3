#![allow(dead_code)]

use item_import::id::{ItemId, ModelId, ProjectId, SchemaId, UserId};
use item_import::import::{Format, ImportRequest, Importer, Strategy};
use item_import::item::Item;
use item_import::memory::{AllowAll, MemoryStores};
use item_import::model::{Model, Operator, Project};
use item_import::schema::{Field, Schema};

/// One seeded project/schema/model plus the in-memory stores, ready for an
/// import run.
pub struct Fixture {
    pub stores: MemoryStores,
    pub caps: AllowAll,
    pub project: ProjectId,
    pub schema: SchemaId,
    pub model: ModelId,
    pub operator: Operator,
}

impl Fixture {
    /// Builds a fixture whose main schema carries `fields`.
    pub fn with_fields(fields: Vec<Field>) -> Self {
        let stores = MemoryStores::new();
        let project = Project::new();
        let mut schema = Schema::new(project.id);
        for field in fields {
            schema.append(field).expect("distinct fixture field keys");
        }
        let model = Model::new(project.id, schema.id);

        let fixture = Fixture {
            project: project.id,
            schema: schema.id,
            model: model.id,
            operator: Operator::User(UserId::new()),
            caps: AllowAll,
            stores,
        };
        fixture.stores.seed_project(project);
        fixture.stores.seed_schema(schema);
        fixture.stores.seed_model(model);
        fixture
    }

    pub fn empty() -> Self {
        Self::with_fields(Vec::new())
    }

    pub fn importer(&self) -> Importer<'_> {
        Importer::new(&self.stores, &self.stores, &self.stores, &self.caps)
    }

    pub fn request(&self, format: Format, strategy: Strategy, mutate_schema: bool) -> ImportRequest {
        ImportRequest {
            model: self.model,
            format,
            strategy,
            mutate_schema,
            geometry_field: None,
            operator: self.operator,
        }
    }

    /// Seeds a pre-existing item with a known ID and no fields.
    pub fn seed_item(&self, id: ItemId) -> Item {
        let mut item = Item::new(self.schema, self.model, self.project, self.operator);
        item.id = id;
        self.stores.seed_item(item.clone());
        item
    }

    /// The current persisted main schema.
    pub fn current_schema(&self) -> Schema {
        self.stores.schema(self.schema).expect("fixture schema")
    }
}
