mod common;

use std::io::Cursor;
use std::sync::Mutex;

use common::Fixture;
use item_import::ImportError;
use item_import::id::JobId;
use item_import::import::{CHUNK_SIZE, Format, Strategy};
use item_import::job::{Job, JobStatus, MAX_IMPORT_RECORDS, Progress};
use item_import::memory::{MemoryStores, RecordingPublisher};
use item_import::schema::{Field, FieldType};
use item_import::store::ProgressPublisher;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn seeded_job(fixture: &Fixture) -> JobId {
    let job = Job::new();
    let id = job.id;
    fixture.stores.seed_job(job);
    id
}

fn csv_rows(count: usize) -> Cursor<Vec<u8>> {
    let mut body = String::from("name\n");
    for i in 0..count {
        body.push_str(&format!("row-{i}\n"));
    }
    Cursor::new(body.into_bytes())
}

#[test]
fn progress_runs_to_done_with_exact_totals() {
    init_logging();
    let fixture = Fixture::with_fields(vec![Field::new("name", FieldType::Text).unwrap()]);
    let job = seeded_job(&fixture);
    let publisher = RecordingPublisher::new();

    let outcome = fixture.importer().import_with_progress(
        &fixture.stores,
        &publisher,
        job,
        &fixture.request(Format::Csv, Strategy::Insert, false),
        csv_rows(3),
    );

    assert!(outcome.is_ok(), "unexpected error: {:?}", outcome.error);
    assert_eq!(outcome.result.inserted, 3);

    let finished = fixture.stores.job(job).unwrap();
    assert_eq!(finished.status, JobStatus::Done);
    assert_eq!(
        finished.progress,
        Progress {
            processed: 3,
            total: 3
        }
    );

    let events = publisher.events();
    assert_eq!(events.len(), 1);
    assert_eq!(
        events[0].1,
        Progress {
            processed: 3,
            total: 3
        }
    );
}

/// Cancels the backing job the moment the first progress value is
/// published, the way an external cancel request between chunks would.
struct CancelOnFirstPublish<'a> {
    stores: &'a MemoryStores,
    inner: RecordingPublisher,
    fired: Mutex<bool>,
}

impl ProgressPublisher for CancelOnFirstPublish<'_> {
    fn publish(&self, job: JobId, progress: Progress) {
        self.inner.publish(job, progress);
        let mut fired = self.fired.lock().expect("poisoned lock");
        if !*fired {
            *fired = true;
            self.stores.cancel_job(job);
        }
    }
}

#[test]
fn cancellation_after_chunk_one_keeps_its_records_committed() {
    init_logging();
    let fixture = Fixture::with_fields(vec![Field::new("name", FieldType::Text).unwrap()]);
    let job = seeded_job(&fixture);
    let publisher = CancelOnFirstPublish {
        stores: &fixture.stores,
        inner: RecordingPublisher::new(),
        fired: Mutex::new(false),
    };
    let rows = CHUNK_SIZE * 2 + CHUNK_SIZE / 2;

    let outcome = fixture.importer().import_with_progress(
        &fixture.stores,
        &publisher,
        job,
        &fixture.request(Format::Csv, Strategy::Insert, false),
        csv_rows(rows),
    );

    assert!(matches!(outcome.error, Some(ImportError::Cancelled(id)) if id == job));
    // Chunk 1 is committed and stays committed; chunks 2 and 3 were never
    // attempted.
    assert_eq!(outcome.result.inserted, CHUNK_SIZE);
    assert_eq!(fixture.stores.item_count(), CHUNK_SIZE);

    let cancelled = fixture.stores.job(job).unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert_eq!(cancelled.progress.processed, CHUNK_SIZE);
    assert_eq!(cancelled.progress.total, rows);

    // A second cancellation has no further effect.
    fixture.stores.cancel_job(job);
    let mut reread = fixture.stores.job(job).unwrap();
    reread.transition(JobStatus::Cancelled).unwrap();
    assert_eq!(reread.status, JobStatus::Cancelled);
    assert_eq!(fixture.stores.item_count(), CHUNK_SIZE);
}

#[test]
fn the_record_ceiling_fails_the_run_before_any_chunk() {
    let fixture = Fixture::with_fields(vec![Field::new("name", FieldType::Text).unwrap()]);
    let job = seeded_job(&fixture);
    let publisher = RecordingPublisher::new();

    let outcome = fixture.importer().import_with_progress(
        &fixture.stores,
        &publisher,
        job,
        &fixture.request(Format::Csv, Strategy::Insert, false),
        csv_rows(MAX_IMPORT_RECORDS + 1),
    );

    assert!(matches!(
        outcome.error,
        Some(ImportError::TooManyRecords { limit }) if limit == MAX_IMPORT_RECORDS
    ));
    assert_eq!(fixture.stores.item_count(), 0);
    assert!(publisher.events().is_empty());
    assert_eq!(fixture.stores.job(job).unwrap().status, JobStatus::Failed);
}

#[test]
fn a_missing_job_fails_the_run() {
    let fixture = Fixture::with_fields(vec![Field::new("name", FieldType::Text).unwrap()]);
    let publisher = RecordingPublisher::new();
    let job = JobId::new();

    let outcome = fixture.importer().import_with_progress(
        &fixture.stores,
        &publisher,
        job,
        &fixture.request(Format::Csv, Strategy::Insert, false),
        csv_rows(1),
    );

    assert!(matches!(outcome.error, Some(ImportError::JobNotFound(id)) if id == job));
    assert_eq!(fixture.stores.item_count(), 0);
}

#[test]
fn a_job_cancelled_before_the_run_starts_never_imports() {
    let fixture = Fixture::with_fields(vec![Field::new("name", FieldType::Text).unwrap()]);
    let job = seeded_job(&fixture);
    fixture.stores.cancel_job(job);
    let publisher = RecordingPublisher::new();

    let outcome = fixture.importer().import_with_progress(
        &fixture.stores,
        &publisher,
        job,
        &fixture.request(Format::Csv, Strategy::Insert, false),
        csv_rows(5),
    );

    assert!(matches!(outcome.error, Some(ImportError::Cancelled(_))));
    assert_eq!(fixture.stores.item_count(), 0);
    assert!(publisher.events().is_empty());
}

#[test]
fn progress_imports_accept_csv_only() {
    let fixture = Fixture::empty();
    let job = seeded_job(&fixture);
    let publisher = RecordingPublisher::new();

    let outcome = fixture.importer().import_with_progress(
        &fixture.stores,
        &publisher,
        job,
        &fixture.request(Format::Json, Strategy::Insert, false),
        Cursor::new(b"[]".to_vec()),
    );

    assert!(matches!(outcome.error, Some(ImportError::Decode(_))));
}
