//! Streaming bulk-import pipeline for schema-governed content items.
//!
//! The pipeline decodes JSON arrays, GeoJSON `FeatureCollection`s, or CSV
//! into content items, optionally extending the target schema from the
//! shape of the first record, and persists records in fixed-size chunks of
//! one transaction each. The CSV path can additionally run under a
//! persisted [`job::Job`] with per-chunk progress publication and
//! cooperative cancellation.
//!
//! Persistence, permissions, and progress delivery are supplied by the
//! embedder through the [`store`] traits; [`memory`] ships in-memory
//! implementations good enough for tests and prototyping.
//!
//! ```
//! use item_import::{Format, ImportRequest, Importer, Schema, Strategy};
//! use item_import::id::UserId;
//! use item_import::memory::{AllowAll, MemoryStores};
//! use item_import::model::{Model, Operator, Project};
//!
//! let stores = MemoryStores::new();
//! let project = Project::new();
//! let schema = Schema::new(project.id);
//! let model = Model::new(project.id, schema.id);
//! let request = ImportRequest {
//!     model: model.id,
//!     format: Format::Json,
//!     strategy: Strategy::Upsert,
//!     mutate_schema: true,
//!     geometry_field: None,
//!     operator: Operator::User(UserId::new()),
//! };
//! stores.seed_project(project);
//! stores.seed_schema(schema);
//! stores.seed_model(model);
//!
//! let importer = Importer::new(&stores, &stores, &stores, &AllowAll);
//! let outcome = importer.import(&request, &br#"[{"name": "first"}]"#[..]);
//! assert!(outcome.is_ok());
//! assert_eq!(outcome.result.inserted, 1);
//! ```

pub mod decode;
pub mod error;
pub mod id;
pub mod import;
pub mod io;
pub mod item;
pub mod job;
pub mod memory;
pub mod model;
pub mod record;
pub mod resolver;
pub mod schema;
pub mod store;
pub mod value;

pub use error::ImportError;
pub use import::{CHUNK_SIZE, Format, ImportOutcome, ImportRequest, ImportResult, Importer, Strategy};
pub use job::{Job, JobStatus, MAX_IMPORT_RECORDS, Progress};
pub use schema::{CreateFieldParam, Field, FieldType, Schema};
pub use value::Value;
