// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Job storage layout and conversion dispatch shared by both intake servers.
//
// Originals land in `{storage_root}/originals/{job_id}.{ext}`; conversion
// output goes to `{storage_root}/processed/`.  Conversion runs in a detached
// task per job, so intake never waits on it.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use zikzi_core::error::Result;
use zikzi_core::repository::GatewayStore;
use zikzi_core::types::{JobId, JobIntake, JobOutcome};
use zikzi_document::ConversionPipeline;

/// Owns the storage layout and hands finished uploads to the pipeline.
pub struct JobDispatcher {
    store: Arc<dyn GatewayStore>,
    pipeline: Arc<ConversionPipeline>,
    storage_root: PathBuf,
}

impl JobDispatcher {
    pub fn new(
        store: Arc<dyn GatewayStore>,
        pipeline: Arc<ConversionPipeline>,
        storage_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            pipeline,
            storage_root: storage_root.into(),
        }
    }

    pub fn originals_dir(&self) -> PathBuf {
        self.storage_root.join("originals")
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.storage_root.join("processed")
    }

    /// Where the original document of `job_id` is written.
    pub fn original_path(&self, job_id: &JobId, extension: &str) -> PathBuf {
        self.originals_dir().join(format!("{job_id}.{extension}"))
    }

    /// Create the storage directories.
    pub async fn prepare(&self) -> Result<()> {
        tokio::fs::create_dir_all(self.originals_dir()).await?;
        tokio::fs::create_dir_all(self.processed_dir()).await?;
        Ok(())
    }

    /// Record the intake and start conversion.  The returned handle may be
    /// dropped; the task keeps running.
    pub fn begin(&self, job_id: JobId, intake: &JobIntake) -> Result<JoinHandle<()>> {
        self.store.begin_processing(&job_id, intake)?;
        Ok(self.dispatch(job_id, intake.original_file.clone()))
    }

    /// Mark a job that will never reach conversion as failed.
    pub fn abandon(&self, job_id: &JobId, intake: &JobIntake, reason: String) {
        let result = self.store.begin_processing(job_id, intake).and_then(|()| {
            self.store
                .finish_job(job_id, &JobOutcome::Failed { error: reason })
        });
        if let Err(e) = result {
            error!(job_id = %job_id, error = %e, "failed to record aborted upload");
        }
    }

    /// Run the pipeline for `original` in a detached task and record the result.
    pub fn dispatch(&self, job_id: JobId, original: PathBuf) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let pipeline = Arc::clone(&self.pipeline);
        let output_dir = self.processed_dir();

        tokio::spawn(async move {
            let outcome = pipeline
                .run(&original, &output_dir, &job_id)
                .await
                .into_outcome();
            log_outcome(&job_id, &outcome);
            if let Err(e) = store.finish_job(&job_id, &outcome) {
                error!(job_id = %job_id, error = %e, "failed to record conversion result");
            }
        })
    }
}

fn log_outcome(job_id: &JobId, outcome: &JobOutcome) {
    match outcome {
        JobOutcome::Completed { page_count, .. } => {
            info!(job_id = %job_id, page_count, "job completed");
        }
        JobOutcome::Failed { error } => {
            warn!(job_id = %job_id, error = %error, "job failed");
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::Path;

    use crate::store::SqliteStore;
    use crate::testing::{FakeConverter, fake_pipeline};
    use zikzi_core::types::{JobStatus, PrintJob};

    async fn file_size(path: &Path) -> u64 {
        tokio::fs::metadata(path).await.unwrap().len()
    }

    fn dispatcher(root: &Path, converter: FakeConverter) -> (Arc<SqliteStore>, JobDispatcher) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let pipeline = Arc::new(fake_pipeline(root, converter));
        let dispatcher = JobDispatcher::new(store.clone(), pipeline, root.join("storage"));
        (store, dispatcher)
    }

    async fn received_job(store: &SqliteStore, dispatcher: &JobDispatcher) -> (JobId, JobIntake) {
        let job = PrintJob::new(None, "10.0.0.5".parse().unwrap());
        store.create_job(&job).unwrap();
        let original = dispatcher.original_path(&job.id, "ps");
        tokio::fs::write(&original, "%!PS\n%%Page: 1 1\nshowpage\n")
            .await
            .unwrap();
        let intake = JobIntake {
            document_name: "memo".into(),
            file_size: file_size(&original).await,
            original_file: original,
            ..JobIntake::default()
        };
        (job.id, intake)
    }

    #[tokio::test]
    async fn layout_under_storage_root() {
        let dir = tempfile::tempdir().unwrap();
        let (_, dispatcher) = dispatcher(dir.path(), FakeConverter::Succeeds);
        dispatcher.prepare().await.unwrap();

        let id = JobId::new();
        let path = dispatcher.original_path(&id, "pdf");
        assert_eq!(path, dir.path().join(format!("storage/originals/{id}.pdf")));
        assert!(dispatcher.originals_dir().is_dir());
        assert!(dispatcher.processed_dir().is_dir());
    }

    #[tokio::test]
    async fn successful_conversion_completes_job() {
        let dir = tempfile::tempdir().unwrap();
        let (store, dispatcher) = dispatcher(dir.path(), FakeConverter::Succeeds);
        dispatcher.prepare().await.unwrap();
        let (id, intake) = received_job(&store, &dispatcher).await;

        dispatcher.begin(id, &intake).unwrap().await.unwrap();

        let job = store.get_job(&id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.page_count, 1);
        let pdf = job.pdf_file.unwrap();
        assert!(pdf.starts_with(dispatcher.processed_dir()));
        assert!(std::fs::metadata(pdf).unwrap().len() > 0);
        assert!(job.processed_at.is_some());
    }

    #[tokio::test]
    async fn failed_conversion_fails_job() {
        let dir = tempfile::tempdir().unwrap();
        let (store, dispatcher) = dispatcher(dir.path(), FakeConverter::Fails);
        dispatcher.prepare().await.unwrap();
        let (id, intake) = received_job(&store, &dispatcher).await;

        dispatcher.begin(id, &intake).unwrap().await.unwrap();

        let job = store.get_job(&id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.is_some());
        assert!(job.pdf_file.is_none());
    }

    #[tokio::test]
    async fn abandoned_upload_never_stays_received() {
        let dir = tempfile::tempdir().unwrap();
        let (store, dispatcher) = dispatcher(dir.path(), FakeConverter::Succeeds);
        dispatcher.prepare().await.unwrap();
        let (id, intake) = received_job(&store, &dispatcher).await;

        dispatcher.abandon(&id, &intake, "connection reset".into());

        let job = store.get_job(&id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("connection reset"));
    }
}
