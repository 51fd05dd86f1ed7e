//! Job manager: accepts probe requests and runs them in the background.

use crate::db::{JobId, JobRecord, JobStore, StoreError};
use crate::probe::{ProbeRequest, ProbeRunner};

use std::sync::Arc;

/// Entry point for submitting probe jobs and reading their outcome.
#[derive(Clone)]
pub struct JobManager {
    store: Arc<dyn JobStore>,
    runner: Arc<ProbeRunner>,
}

impl JobManager {
    pub fn new(store: Arc<dyn JobStore>, runner: Arc<ProbeRunner>) -> Self {
        Self { store, runner }
    }

    /// Record a pending job and start probing in the background.
    ///
    /// Returns as soon as the pending record is stored. Errors here are
    /// storage errors; probe failures only show up in the stored record.
    pub fn submit(&self, request: ProbeRequest) -> Result<JobId, StoreError> {
        let id = JobId::new();
        self.store.create(&id)?;

        tracing::info!(
            "{}: will ping {} with period {:?} duration {:?}",
            id,
            request.target,
            request.period,
            request.duration
        );

        tokio::spawn(run_job(
            id,
            request,
            self.store.clone(),
            self.runner.clone(),
        ));

        Ok(id)
    }

    /// Look up a job by the identifier text from its link and return the
    /// stored record text unchanged.
    pub fn retrieve(&self, id: &str) -> Result<String, StoreError> {
        let id: JobId = id.parse().map_err(|_| StoreError::NotFound)?;
        self.store.read_raw(&id)
    }
}

/// Run one probe and write its terminal record exactly once.
async fn run_job(
    id: JobId,
    request: ProbeRequest,
    store: Arc<dyn JobStore>,
    runner: Arc<ProbeRunner>,
) {
    // The probe runs in its own task so a panic still ends in a failed record.
    let probe = tokio::spawn(async move {
        runner
            .run(request.target, request.period, request.duration)
            .await
    });

    let record = match probe.await {
        Ok(Ok(samples)) => {
            tracing::info!("{}: done pinging {}", id, request.target);
            JobRecord::complete(id.link(), request.target.to_string(), samples)
        }
        Ok(Err(e)) => {
            tracing::warn!("{}: pinging {} failed: {}", id, request.target, e);
            JobRecord::failed(e.to_string())
        }
        Err(e) => {
            tracing::error!("{}: probe task aborted: {}", id, e);
            JobRecord::failed(format!("probe task aborted: {}", e))
        }
    };

    if let Err(e) = store.finalize(&id, &record) {
        tracing::error!("{}: failed to store result: {}", id, e);
    }
}
