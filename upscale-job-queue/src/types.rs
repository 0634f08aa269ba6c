//! Core types for the job queue system.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Globally unique job identifier, identical in format across queue modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Generate a fresh random identifier.
    #[inline]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[inline]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for JobId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Externally visible job status. Identical vocabulary in both queue modes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Pending,
    Success,
    Failure,
}

impl JobStatus {
    /// Returns true if this status represents a terminal state.
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "PENDING",
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
        })
    }
}

/// Current lifecycle state of a job as reported by a status lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobState {
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobState {
    #[inline]
    pub const fn pending() -> Self {
        Self {
            status: JobStatus::Pending,
            error: None,
        }
    }

    #[inline]
    pub const fn success() -> Self {
        Self {
            status: JobStatus::Success,
            error: None,
        }
    }

    #[inline]
    pub fn failure(cause: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failure,
            error: Some(cause.into()),
        }
    }

    #[inline]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Handle returned by a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub job_id: JobId,
    pub state: JobState,
}

/// How a queue schedules execution. Fixed for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueMode {
    Eager,
    Distributed,
}

impl fmt::Display for QueueMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Eager => "eager",
            Self::Distributed => "distributed",
        })
    }
}

/// Unit of work handed to a broker for a worker to pick up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub job_id: JobId,
    #[serde(with = "base64_payload")]
    pub input: Bytes,
}

impl WorkItem {
    #[inline]
    pub fn new(job_id: JobId, input: impl Into<Bytes>) -> Self {
        Self {
            job_id,
            input: input.into(),
        }
    }

    /// Best-effort recovery of the job id from a queue entry that does not
    /// decode as a full [`WorkItem`].
    pub fn salvage_job_id(payload: &str) -> Option<JobId> {
        #[derive(Deserialize)]
        struct IdOnly {
            job_id: JobId,
        }
        serde_json::from_str::<IdOnly>(payload)
            .ok()
            .map(|partial| partial.job_id)
    }
}

/// Broker-native job state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum BrokerState {
    Queued,
    Started,
    Success,
    Failure,
}

impl BrokerState {
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }

    /// Collapse broker states into the external vocabulary.
    #[inline]
    pub const fn status(self) -> JobStatus {
        match self {
            Self::Queued | Self::Started => JobStatus::Pending,
            Self::Success => JobStatus::Success,
            Self::Failure => JobStatus::Failure,
        }
    }
}

/// Broker's record of a job, written by submitters and workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerRecord {
    pub state: BrokerState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl BrokerRecord {
    fn with_state(state: BrokerState, error: Option<String>) -> Self {
        Self {
            state,
            error,
            updated_at: Utc::now(),
        }
    }

    pub fn queued() -> Self {
        Self::with_state(BrokerState::Queued, None)
    }

    pub fn started() -> Self {
        Self::with_state(BrokerState::Started, None)
    }

    pub fn success() -> Self {
        Self::with_state(BrokerState::Success, None)
    }

    pub fn failure(cause: impl Into<String>) -> Self {
        Self::with_state(BrokerState::Failure, Some(cause.into()))
    }

    /// Map this record to the externally visible state.
    pub fn job_state(&self) -> JobState {
        match self.state.status() {
            JobStatus::Failure => {
                let cause = self
                    .error
                    .as_deref()
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .unwrap_or("unknown error");
                JobState::failure(cause)
            }
            status => JobState {
                status,
                error: None,
            },
        }
    }
}

mod base64_payload {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
