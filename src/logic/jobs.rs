use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::logic::commit::CommitManager;
use crate::logic::merge;
use crate::model::{
    now_millis, parent_path, Id, JobStatus, MergeJob, MergeRequest, OntoError,
};
use crate::store::traits::Store;

/// Serializes concurrent merge requests per branch path behind the branch
/// locks, exposing asynchronous job status. The job wraps the synchronous
/// merge in a background task and introduces no concurrency semantics beyond
/// single-flight-per-path: a request against a locked target fails
/// immediately and the lock message lands verbatim in the job record.
pub struct MergeJobQueue<S: Store> {
    manager: Arc<CommitManager<S>>,
    jobs: Arc<RwLock<HashMap<Id, MergeJob>>>,
}

impl<S: Store> MergeJobQueue<S> {
    pub fn new(manager: Arc<CommitManager<S>>) -> Self {
        Self {
            manager,
            jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Submit a merge; returns the job id immediately. The direction is
    /// derived from the paths: parent -> child is a rebase, child -> parent a
    /// promotion.
    pub fn submit(&self, request: MergeRequest) -> Id {
        let job = MergeJob::new(&request, now_millis());
        let job_id = job.id.clone();
        self.jobs.write().insert(job_id.clone(), job);

        let manager = Arc::clone(&self.manager);
        let jobs = Arc::clone(&self.jobs);
        let id = job_id.clone();
        tokio::spawn(async move {
            set_status(&jobs, &id, JobStatus::Running, None);
            let result = run_merge(&manager, &request).await;
            match result {
                Ok(_) => {
                    log::info!(
                        "merge job {} ({} -> {}) completed",
                        id,
                        request.source_path,
                        request.target_path
                    );
                    set_status(&jobs, &id, JobStatus::Completed, None);
                }
                Err(err) => {
                    // The blocking condition lands verbatim for operator
                    // tooling ("branch already locked: ...")
                    log::warn!(
                        "merge job {} ({} -> {}) failed: {}",
                        id,
                        request.source_path,
                        request.target_path,
                        err
                    );
                    set_status(&jobs, &id, JobStatus::Failed, Some(err.to_string()));
                }
            }
        });
        job_id
    }

    pub fn status(&self, job_id: &str) -> Option<MergeJob> {
        self.jobs.read().get(job_id).cloned()
    }

    /// Poll a job to completion, for callers that want the eventual status
    pub async fn wait(&self, job_id: &str, timeout: Duration) -> Option<MergeJob> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(job) = self.status(job_id) {
                if job.is_finished() {
                    return Some(job);
                }
            } else {
                return None;
            }
            if tokio::time::Instant::now() >= deadline {
                return self.status(job_id);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

async fn run_merge<S: Store>(
    manager: &CommitManager<S>,
    request: &MergeRequest,
) -> Result<(), OntoError> {
    if parent_path(&request.target_path) == Some(request.source_path.as_str()) {
        merge::rebase(
            manager,
            &request.source_path,
            &request.target_path,
            &request.manually_merged_concepts,
        )
        .await?;
    } else if parent_path(&request.source_path) == Some(request.target_path.as_str()) {
        merge::promote(manager, &request.source_path, &request.target_path).await?;
    } else {
        return Err(OntoError::BranchesNotRelated {
            source_path: request.source_path.clone(),
            target_path: request.target_path.clone(),
        });
    }
    Ok(())
}

fn set_status(
    jobs: &Arc<RwLock<HashMap<Id, MergeJob>>>,
    job_id: &str,
    status: JobStatus,
    message: Option<String>,
) {
    let mut jobs = jobs.write();
    if let Some(job) = jobs.get_mut(job_id) {
        job.status = status;
        job.message = message;
        job.updated_at = now_millis();
    }
}
