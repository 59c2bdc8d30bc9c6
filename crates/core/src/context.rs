//! Correlation fields carried explicitly through every processing call.
//!
//! Log statements render these as structured `tracing` fields; missing
//! values render as `"unknown"` so every line has the same shape.

use crate::domain::job::{Job, JobId, TraceId};
use crate::domain::repository::RepoFullName;
use crate::domain::workspace::WorkspaceId;

const UNKNOWN: &str = "unknown";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogContext {
    pub trace_id: TraceId,
    pub job_id: Option<JobId>,
    pub repo: Option<RepoFullName>,
    pub pr_number: Option<u64>,
    pub workspace_id: Option<WorkspaceId>,
}

impl LogContext {
    pub fn new(trace_id: TraceId) -> Self {
        Self { trace_id, job_id: None, repo: None, pr_number: None, workspace_id: None }
    }

    pub fn for_job(job: &Job) -> Self {
        Self { job_id: Some(job.id.clone()), ..Self::new(job.trace_id.clone()) }
    }

    pub fn with_pr(&self, repo: &RepoFullName, pr_number: u64) -> Self {
        Self { repo: Some(repo.clone()), pr_number: Some(pr_number), ..self.clone() }
    }

    pub fn with_workspace(&self, workspace_id: &WorkspaceId) -> Self {
        Self { workspace_id: Some(workspace_id.clone()), ..self.clone() }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id.0
    }

    pub fn job_id(&self) -> &str {
        self.job_id.as_ref().map(|id| id.0.as_str()).unwrap_or(UNKNOWN)
    }

    pub fn repo(&self) -> &str {
        self.repo.as_ref().map(RepoFullName::as_str).unwrap_or(UNKNOWN)
    }

    pub fn pr_number(&self) -> u64 {
        self.pr_number.unwrap_or_default()
    }

    pub fn workspace(&self) -> &str {
        self.workspace_id.as_ref().map(|id| id.0.as_str()).unwrap_or(UNKNOWN)
    }
}
