//! The import orchestrator.
//!
//! Drives the streaming decode loop for JSON and GeoJSON, or the CSV row
//! loop, accumulating records into fixed-size chunks and handing each chunk
//! to the resolver. The first decoded record triggers schema inference
//! (once per run, when schema mutation is enabled). A fatal error stops the
//! run and is returned alongside the partial result: some prefix of the
//! stream was committed, the rest was not attempted.

use std::io::{Read, Seek};
use std::str::FromStr;

use anyhow::anyhow;
use itertools::Itertools;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::decode::{RecordSink, stream_geojson, stream_json};
use crate::error::{ImportError, Result};
use crate::id::{FieldId, JobId, ModelId};
use crate::io;
use crate::job::{
    ChunkObserver, JobStatus, MAX_IMPORT_RECORDS, NoopObserver, Progress, ProgressController,
};
use crate::model::{Model, Operator};
use crate::record::{Decoded, ImportItemParam, normalize};
use crate::resolver::{ChunkCounters, ChunkContext, resolve_and_save};
use crate::schema::{Field, Schema, infer_fields};
use crate::store::{
    Capabilities, ItemStore, JobStore, ProgressPublisher, SchemaStore, TransactionProvider,
};

/// Records per chunk; one chunk is one storage transaction.
pub const CHUNK_SIZE: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Json,
    GeoJson,
    Csv,
}

impl Format {
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Json => "json",
            Format::GeoJson => "geojson",
            Format::Csv => "csv",
        }
    }
}

impl FromStr for Format {
    type Err = ImportError;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "json" => Ok(Format::Json),
            "geojson" => Ok(Format::GeoJson),
            "csv" => Ok(Format::Csv),
            other => Err(ImportError::Decode(format!("unknown format '{other}'"))),
        }
    }
}

/// The record-resolution policy applied uniformly to every record of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Insert,
    Update,
    Upsert,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Insert => "insert",
            Strategy::Update => "update",
            Strategy::Upsert => "upsert",
        }
    }
}

impl FromStr for Strategy {
    type Err = ImportError;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "insert" => Ok(Strategy::Insert),
            "update" => Ok(Strategy::Update),
            "upsert" => Ok(Strategy::Upsert),
            other => Err(ImportError::Decode(format!("unknown strategy '{other}'"))),
        }
    }
}

/// Immutable input descriptor for one import invocation. The byte stream is
/// passed separately to the entry points.
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub model: ModelId,
    pub format: Format,
    pub strategy: Strategy,
    /// Whether inference may extend the schema from the first record.
    pub mutate_schema: bool,
    /// Key of the geometry field (GeoJSON only).
    pub geometry_field: Option<String>,
    pub operator: Operator,
}

/// Accumulated counters for one run. Monotonically updated, never reset.
#[derive(Debug, Clone, Default)]
pub struct ImportResult {
    pub total: usize,
    pub inserted: usize,
    pub updated: usize,
    pub ignored: usize,
    /// Fields created by inference, in source order.
    pub new_fields: Vec<Field>,
}

impl ImportResult {
    fn merge(&mut self, counters: ChunkCounters) {
        self.total += counters.total;
        self.inserted += counters.inserted;
        self.updated += counters.updated;
        self.ignored += counters.ignored;
    }
}

/// An import's result together with the error that stopped it, if any.
/// Chunks committed before the error remain committed either way.
#[derive(Debug)]
pub struct ImportOutcome {
    pub result: ImportResult,
    pub error: Option<ImportError>,
}

impl ImportOutcome {
    fn done(result: ImportResult) -> Self {
        Self {
            result,
            error: None,
        }
    }

    fn failed(result: ImportResult, error: ImportError) -> Self {
        Self {
            result,
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Discards the partial result when an error is present.
    pub fn into_result(self) -> Result<ImportResult> {
        match self.error {
            None => Ok(self.result),
            Some(err) => Err(err),
        }
    }
}

/// The import pipeline over caller-supplied stores.
pub struct Importer<'a> {
    pub schemas: &'a dyn SchemaStore,
    pub items: &'a dyn ItemStore,
    pub transactions: &'a dyn TransactionProvider,
    pub capabilities: &'a dyn Capabilities,
}

impl<'a> Importer<'a> {
    pub fn new(
        schemas: &'a dyn SchemaStore,
        items: &'a dyn ItemStore,
        transactions: &'a dyn TransactionProvider,
        capabilities: &'a dyn Capabilities,
    ) -> Self {
        Self {
            schemas,
            items,
            transactions,
            capabilities,
        }
    }

    /// Synchronous entry point for all three formats.
    pub fn import<R: Read>(&self, request: &ImportRequest, reader: R) -> ImportOutcome {
        let mut observer = NoopObserver;
        self.run(request, reader, &mut observer)
    }

    /// Asynchronous CSV entry point. The input must be seekable: one full
    /// pass counts rows for an exact progress total, then the stream is
    /// rewound for the import itself.
    pub fn import_with_progress<R: Read + Seek>(
        &self,
        jobs: &dyn JobStore,
        publisher: &dyn ProgressPublisher,
        job: JobId,
        request: &ImportRequest,
        mut source: R,
    ) -> ImportOutcome {
        if request.format != Format::Csv {
            return ImportOutcome::failed(
                ImportResult::default(),
                ImportError::Decode("progress imports accept csv input only".into()),
            );
        }

        let total = match io::count_records(&mut source) {
            Ok(total) => total,
            Err(err) => {
                finalize_job(jobs, job, JobStatus::Failed, None);
                return ImportOutcome::failed(ImportResult::default(), err);
            }
        };
        if total > MAX_IMPORT_RECORDS {
            let err = ImportError::TooManyRecords {
                limit: MAX_IMPORT_RECORDS,
            };
            finalize_job(jobs, job, JobStatus::Failed, None);
            return ImportOutcome::failed(ImportResult::default(), err);
        }
        if let Err(err) = source.rewind() {
            finalize_job(jobs, job, JobStatus::Failed, None);
            return ImportOutcome::failed(
                ImportResult::default(),
                ImportError::Decode(err.to_string()),
            );
        }

        if let Err(err) = mark_running(jobs, job, total) {
            return ImportOutcome::failed(ImportResult::default(), err);
        }

        let mut controller = ProgressController::new(jobs, publisher, job, total);
        let outcome = self.run(request, source, &mut controller);

        match &outcome.error {
            None => finalize_job(
                jobs,
                job,
                JobStatus::Done,
                Some(Progress {
                    processed: outcome.result.total,
                    total,
                }),
            ),
            // The cancelled state was written by whoever cancelled us;
            // committed chunks and published progress stay visible.
            Some(ImportError::Cancelled(_)) => {}
            Some(_) => finalize_job(jobs, job, JobStatus::Failed, None),
        }
        outcome
    }

    fn run<R: Read>(
        &self,
        request: &ImportRequest,
        reader: R,
        observer: &mut dyn ChunkObserver,
    ) -> ImportOutcome {
        let mut engine = match ImportEngine::prepare(self, request, observer) {
            Ok(engine) => engine,
            Err(err) => return ImportOutcome::failed(ImportResult::default(), err),
        };
        info!(
            "importing {} into model {} (strategy {})",
            request.format.as_str(),
            request.model,
            request.strategy.as_str()
        );
        let streamed = match request.format {
            Format::Json => stream_json(reader, &mut engine),
            Format::GeoJson => stream_geojson(reader, &mut engine),
            Format::Csv => engine.run_csv(reader),
        };
        let finished = streamed.and_then(|()| engine.flush());
        let result = engine.result;
        match finished {
            Ok(()) => {
                info!(
                    "import finished: {} record(s), {} inserted, {} updated, {} ignored",
                    result.total, result.inserted, result.updated, result.ignored
                );
                ImportOutcome::done(result)
            }
            Err(err) => ImportOutcome::failed(result, err),
        }
    }
}

fn mark_running(jobs: &dyn JobStore, job_id: JobId, total: usize) -> Result<()> {
    let mut job = jobs
        .find_job(job_id)?
        .ok_or(ImportError::JobNotFound(job_id))?;
    if job.status == JobStatus::Cancelled {
        return Err(ImportError::Cancelled(job_id));
    }
    job.transition(JobStatus::Running)?;
    job.progress = Progress {
        processed: 0,
        total,
    };
    jobs.save_job(&job)?;
    Ok(())
}

/// Best-effort terminal bookkeeping; the import's own outcome is already
/// decided when this runs.
fn finalize_job(jobs: &dyn JobStore, job_id: JobId, status: JobStatus, progress: Option<Progress>) {
    let found = match jobs.find_job(job_id) {
        Ok(found) => found,
        Err(err) => {
            warn!("failed to load job {job_id} for finalization: {err:#}");
            return;
        }
    };
    let Some(mut job) = found else {
        warn!("job {job_id} vanished before finalization");
        return;
    };
    if let Some(progress) = progress {
        job.progress = progress;
    }
    if let Err(err) = job.transition(status) {
        warn!("job {job_id} refused terminal transition: {err}");
        return;
    }
    if let Err(err) = jobs.save_job(&job) {
        warn!("failed to persist terminal state of job {job_id}: {err:#}");
    }
}

enum Pending {
    Decoded(Decoded),
    Param(ImportItemParam),
}

/// The run's accumulator: the authoritative schema handle, the chunk
/// buffer, and the running counters, threaded explicitly through the decode
/// loop.
struct ImportEngine<'a, 'b> {
    importer: &'a Importer<'b>,
    model: Model,
    schema: Schema,
    group_schemas: Vec<Schema>,
    geometry_field: Option<FieldId>,
    strategy: Strategy,
    operator: Operator,
    mutate_schema: bool,
    chunk: Vec<Pending>,
    result: ImportResult,
    saw_first: bool,
    observer: &'a mut dyn ChunkObserver,
}

impl<'a, 'b> ImportEngine<'a, 'b> {
    fn prepare(
        importer: &'a Importer<'b>,
        request: &ImportRequest,
        observer: &'a mut dyn ChunkObserver,
    ) -> Result<Self> {
        let model = importer
            .schemas
            .find_model(request.model)?
            .ok_or(ImportError::ModelNotFound(request.model))?;
        let schema = importer
            .schemas
            .find_schema(model.schema)?
            .ok_or(ImportError::SchemaNotFound(model.schema))?;
        importer
            .schemas
            .find_project(model.project)?
            .ok_or_else(|| anyhow!("project {} not found", model.project))?;

        let group_ids: Vec<_> = schema
            .group_fields()
            .filter_map(|f| f.field_type.group_schema())
            .unique()
            .collect();
        let mut group_schemas = Vec::with_capacity(group_ids.len());
        for id in group_ids {
            let group = importer
                .schemas
                .find_schema(id)?
                .ok_or(ImportError::SchemaNotFound(id))?;
            group_schemas.push(group);
        }

        let geometry_field = if request.format == Format::GeoJson {
            let key = request
                .geometry_field
                .as_deref()
                .ok_or_else(|| ImportError::GeometryFieldMissing("(unset)".into()))?;
            let field = schema
                .field_by_key(key)
                .filter(|f| f.field_type.is_geometry())
                .ok_or_else(|| ImportError::GeometryFieldMissing(key.to_string()))?;
            Some(field.id)
        } else {
            None
        };

        Ok(Self {
            importer,
            model,
            schema,
            group_schemas,
            geometry_field,
            strategy: request.strategy,
            operator: request.operator,
            mutate_schema: request.mutate_schema,
            chunk: Vec::new(),
            result: ImportResult::default(),
            saw_first: false,
            observer,
        })
    }

    /// Runs inference exactly once, against the first record of the stream,
    /// and persists any accepted proposals in a single save before any
    /// chunk is processed.
    fn run_inference(&mut self, pairs: &[(String, serde_json::Value)]) -> Result<()> {
        if self.saw_first {
            return Ok(());
        }
        self.saw_first = true;
        if !self.mutate_schema {
            return Ok(());
        }
        let proposals = infer_fields(pairs, &self.schema)?;
        if proposals.is_empty() {
            return Ok(());
        }
        for proposal in proposals {
            let field = proposal.into_field()?;
            self.result.new_fields.push(field.clone());
            self.schema.append(field)?;
        }
        self.importer.schemas.save_schema(&self.schema)?;
        info!(
            "schema {} extended with {} inferred field(s)",
            self.schema.id,
            self.result.new_fields.len()
        );
        Ok(())
    }

    fn push(&mut self, pending: Pending) -> Result<()> {
        self.chunk.push(pending);
        if self.chunk.len() >= CHUNK_SIZE {
            self.flush()?;
        }
        Ok(())
    }

    /// Normalizes and resolves the buffered chunk. The observer is
    /// consulted before the chunk (cancellation) and notified after it
    /// (progress).
    fn flush(&mut self) -> Result<()> {
        if self.chunk.is_empty() {
            return Ok(());
        }
        self.observer.before_chunk()?;
        let pending = std::mem::take(&mut self.chunk);
        let params = pending
            .into_iter()
            .map(|record| match record {
                Pending::Param(param) => Ok(param),
                Pending::Decoded(decoded) => normalize(&decoded, self.geometry_field),
            })
            .collect::<Result<Vec<_>>>()?;
        let ctx = ChunkContext {
            items: self.importer.items,
            transactions: self.importer.transactions,
            capabilities: self.importer.capabilities,
            model: &self.model,
            schema: &self.schema,
            group_schemas: &self.group_schemas,
            operator: self.operator,
            strategy: self.strategy,
        };
        let counters = resolve_and_save(&ctx, &params)?;
        self.result.merge(counters);
        self.observer.after_chunk(self.result.total)?;
        Ok(())
    }

    fn run_csv<R: Read>(&mut self, reader: R) -> Result<()> {
        let mut reader = io::open_csv_reader(reader);
        let headers = io::reader_headers(&mut reader)?;
        let mut targets = Vec::new();
        for row in reader.records() {
            let row = row.map_err(|err| ImportError::Decode(err.to_string()))?;
            if !self.saw_first {
                self.run_inference(&io::first_row_pairs(&headers, &row))?;
                // The mapping is computed once, after inference has had its
                // chance to extend the schema.
                targets = io::header_targets(&headers, &self.schema);
            }
            let param = io::row_to_param(&targets, &row)?;
            self.push(Pending::Param(param))?;
        }
        Ok(())
    }
}

impl RecordSink for ImportEngine<'_, '_> {
    fn record(&mut self, record: Decoded) -> Result<()> {
        self.run_inference(&record.inference_pairs())?;
        self.push(Pending::Decoded(record))
    }
}
