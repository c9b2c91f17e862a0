//! Per-request job state.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
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

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Upload is stored locally
    #[default]
    Received,
    /// Segment payload is being validated
    Validating,
    /// Filter graph is being built
    Building,
    /// Engine is running
    Processing,
    /// Output is being sent to the caller
    Streaming,
    /// Output fully sent
    Completed,
    /// Any stage failed
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Received => "received",
            JobState::Validating => "validating",
            JobState::Building => "building",
            JobState::Processing => "processing",
            JobState::Streaming => "streaming",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    /// The stage that follows this one on the success path.
    fn next(&self) -> Option<JobState> {
        match self {
            JobState::Received => Some(JobState::Validating),
            JobState::Validating => Some(JobState::Building),
            JobState::Building => Some(JobState::Processing),
            JobState::Processing => Some(JobState::Streaming),
            JobState::Streaming => Some(JobState::Completed),
            JobState::Completed | JobState::Failed => None,
        }
    }

    /// Stages only move forward one step at a time; any live stage may fail.
    pub fn can_transition_to(&self, to: JobState) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == JobState::Failed || self.next() == Some(to)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid job transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: JobState,
    pub to: JobState,
}

/// One request's mutable state. Owned by the task handling the request.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub created_at: DateTime<Utc>,
    state: JobState,
}

impl Job {
    pub fn new(input_path: impl Into<PathBuf>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            id: JobId::new(),
            input_path: input_path.into(),
            output_path: output_path.into(),
            created_at: Utc::now(),
            state: JobState::Received,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn input_path(&self) -> &Path {
        &self.input_path
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Move to `to`, rejecting out-of-order transitions.
    pub fn transition(&mut self, to: JobState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(to) {
            return Err(InvalidTransition { from: self.state, to });
        }
        self.state = to;
        Ok(())
    }

    /// Seconds elapsed since the job was created.
    pub fn elapsed_secs(&self) -> f64 {
        (Utc::now() - self.created_at).num_milliseconds() as f64 / 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_path() {
        let mut job = Job::new("uploads/a.mp4", "processed/b.mp4");
        for state in [
            JobState::Validating,
            JobState::Building,
            JobState::Processing,
            JobState::Streaming,
            JobState::Completed,
        ] {
            job.transition(state).unwrap();
        }
        assert!(job.state().is_terminal());
    }

    #[test]
    fn test_no_skipping_stages() {
        let mut job = Job::new("in", "out");
        job.transition(JobState::Validating).unwrap();
        let err = job.transition(JobState::Processing).unwrap_err();
        assert_eq!(err.from, JobState::Validating);
        assert_eq!(err.to, JobState::Processing);
    }

    #[test]
    fn test_fail_from_any_live_stage() {
        for state in [JobState::Received, JobState::Processing, JobState::Streaming] {
            assert!(state.can_transition_to(JobState::Failed));
        }
        assert!(!JobState::Completed.can_transition_to(JobState::Failed));
        assert!(!JobState::Failed.can_transition_to(JobState::Failed));
    }
}
