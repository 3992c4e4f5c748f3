//! Job records and chunk-boundary progress/cancellation hooks.
//!
//! The asynchronous CSV path persists a [`Job`] per run. Cancellation is
//! cooperative: the job is re-read before every chunk and a cancelled state
//! stops the run without touching chunks already committed. Progress is
//! best-effort: it is published to subscribers and persisted after every
//! chunk, and a persistence failure is logged rather than failing the
//! import.

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{ImportError, Result};
use crate::id::JobId;
use crate::store::{JobStore, ProgressPublisher};

/// Ceiling on the number of records one run may carry, enforced across the
/// whole run rather than per chunk.
pub const MAX_IMPORT_RECORDS: usize = 100_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub processed: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Done | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub progress: Progress,
}

impl Job {
    pub fn new() -> Self {
        Self {
            id: JobId::new(),
            status: JobStatus::Pending,
            progress: Progress::default(),
        }
    }

    /// Moves the job to `next`. Terminal states are final: any transition
    /// away from them is refused, while re-entering the current state is a
    /// no-op so repeated cancellations stay idempotent.
    pub fn transition(&mut self, next: JobStatus) -> Result<()> {
        if self.status == next {
            return Ok(());
        }
        if self.status.is_terminal() {
            return Err(ImportError::JobTerminal(self.id));
        }
        self.status = next;
        Ok(())
    }
}

impl Default for Job {
    fn default() -> Self {
        Self::new()
    }
}

/// Chunk-boundary hooks threaded through the orchestrator. The synchronous
/// entry point uses [`NoopObserver`]; the asynchronous CSV path uses
/// [`ProgressController`].
pub trait ChunkObserver {
    /// Consulted before each chunk; an error stops the run before the chunk
    /// is attempted.
    fn before_chunk(&mut self) -> Result<()>;

    /// Called after each committed chunk with the cumulative record count.
    fn after_chunk(&mut self, processed: usize) -> Result<()>;
}

pub struct NoopObserver;

impl ChunkObserver for NoopObserver {
    fn before_chunk(&mut self) -> Result<()> {
        Ok(())
    }

    fn after_chunk(&mut self, _processed: usize) -> Result<()> {
        Ok(())
    }
}

/// Publishes and persists progress per chunk, and honors cancellation
/// requests at chunk boundaries.
pub struct ProgressController<'a> {
    jobs: &'a dyn JobStore,
    publisher: &'a dyn ProgressPublisher,
    job: JobId,
    total: usize,
}

impl<'a> ProgressController<'a> {
    pub fn new(
        jobs: &'a dyn JobStore,
        publisher: &'a dyn ProgressPublisher,
        job: JobId,
        total: usize,
    ) -> Self {
        Self {
            jobs,
            publisher,
            job,
            total,
        }
    }

    fn load_job(&self) -> Result<Job> {
        self.jobs
            .find_job(self.job)?
            .ok_or(ImportError::JobNotFound(self.job))
    }
}

impl ChunkObserver for ProgressController<'_> {
    fn before_chunk(&mut self) -> Result<()> {
        let job = self.load_job()?;
        if job.status == JobStatus::Cancelled {
            return Err(ImportError::Cancelled(self.job));
        }
        Ok(())
    }

    fn after_chunk(&mut self, processed: usize) -> Result<()> {
        let progress = Progress {
            processed,
            total: self.total,
        };
        self.publisher.publish(self.job, progress);
        match self.load_job() {
            Ok(mut job) => {
                job.progress = progress;
                if let Err(err) = self.jobs.save_job(&job) {
                    warn!("failed to persist progress for job {}: {err:#}", self.job);
                }
            }
            Err(err) => {
                warn!("failed to re-read job {} for progress: {err}", self.job);
            }
        }
        Ok(())
    }
}
