// libs/video-cell/src/models.rs
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One entry of the backend's currently-active meeting list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MeetingDescriptor {
    pub appointment_id: Uuid,
    pub meeting_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VideoCallInfo {
    pub meeting_id: String,
    pub meeting_url: String,
    pub joined_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallDetails {
    pub video_call_info: VideoCallInfo,
}

/// Human-readable remaining wait until the applicable join threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemainingWait {
    pub hours: i64,
    pub minutes: i64,
}

impl RemainingWait {
    pub fn total_minutes(&self) -> i64 {
        self.hours * 60 + self.minutes
    }
}

impl fmt::Display for RemainingWait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hours > 0 {
            write!(f, "{} hr {} min", self.hours, self.minutes)
        } else {
            write!(f, "{} min", self.minutes)
        }
    }
}

/// Result of a join request. Eligibility violations are values consumed by
/// the UI, never errors.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinOutcome {
    Approved(CallDetails),
    NotYetJoinable(Option<RemainingWait>),
    NotPermitted,
    UnknownMeeting,
}

#[derive(Debug, Clone)]
pub enum CallEvent {
    Ended { meeting_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStep {
    DestroyInstance,
    RemoveInjectedElements,
    CloseVendorSockets,
    ArmInterceptor,
    RestoreInterceptor,
}

#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub step: TeardownStep,
    pub ok: bool,
    pub detail: Option<String>,
}

/// Per-step record of a teardown run. One failing step never prevents the
/// steps after it.
#[derive(Debug, Clone, Default)]
pub struct TeardownReport {
    pub steps: Vec<StepOutcome>,
}

impl TeardownReport {
    pub fn succeeded(&self) -> bool {
        self.steps.iter().all(|s| s.ok)
    }

    pub fn outcome(&self, step: TeardownStep) -> Option<&StepOutcome> {
        self.steps.iter().find(|s| s.step == step)
    }
}

#[derive(Debug, Clone)]
pub struct VideoConfig {
    pub poll_interval: Duration,
    pub request_timeout: Duration,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
        }
    }
}
