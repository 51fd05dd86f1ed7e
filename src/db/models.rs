//! Job record types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::probe::ProbeSample;

/// Globally unique job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Retrieval path for this job.
    pub fn link(&self) -> String {
        format!("/data/{}", self.0)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Complete,
    Failed,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Complete => "complete",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, JobState::Pending)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRecord {
    pub complete: bool,
    pub link: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompleteRecord {
    pub complete: bool,
    pub link: String,
    pub target: String,
    pub results: Vec<ProbeSample>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedRecord {
    pub error: String,
}

/// The persisted state of a job. Its JSON form is also the retrieval body.
///
/// Variant order matters for deserialization: a failed record is the only
/// one with `error`, and a complete record is the only one with `results`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobRecord {
    Failed(FailedRecord),
    Complete(CompleteRecord),
    Pending(PendingRecord),
}

impl JobRecord {
    pub fn pending(link: String) -> Self {
        JobRecord::Pending(PendingRecord {
            complete: false,
            link,
        })
    }

    pub fn complete(link: String, target: String, results: Vec<ProbeSample>) -> Self {
        JobRecord::Complete(CompleteRecord {
            complete: true,
            link,
            target,
            results,
        })
    }

    pub fn failed(error: impl Into<String>) -> Self {
        JobRecord::Failed(FailedRecord {
            error: error.into(),
        })
    }

    pub fn state(&self) -> JobState {
        match self {
            JobRecord::Pending(_) => JobState::Pending,
            JobRecord::Complete(_) => JobState::Complete,
            JobRecord::Failed(_) => JobState::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }
}
