use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::InvocationId;

/// Mode requested by the client for an invocation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestedMode {
    #[default]
    Call,
    Stream,
}

/// Lifecycle of one invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    /// Accepted and waiting for a concurrency slot.
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl InvocationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn is_open(&self) -> bool {
        !self.is_terminal()
    }
}

/// Broker-side bookkeeping for an accepted invocation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationRecord {
    pub invocation_id: InvocationId,
    pub tool_name: String,
    pub mode: RequestedMode,
    pub started_at: DateTime<Utc>,
    pub status: InvocationStatus,
}

impl InvocationRecord {
    pub fn new(invocation_id: InvocationId, tool_name: impl Into<String>, mode: RequestedMode) -> Self {
        Self {
            invocation_id,
            tool_name: tool_name.into(),
            mode,
            started_at: Utc::now(),
            status: InvocationStatus::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_classification() {
        assert!(!InvocationStatus::Pending.is_terminal());
        assert!(!InvocationStatus::Running.is_terminal());
        assert!(InvocationStatus::Completed.is_terminal());
        assert!(InvocationStatus::Failed.is_terminal());
        assert!(InvocationStatus::Cancelled.is_terminal());
    }

    #[test]
    fn new_record_is_pending() {
        let rec = InvocationRecord::new(InvocationId::from("a"), "weather", RequestedMode::Call);
        assert_eq!(rec.status, InvocationStatus::Pending);
        assert_eq!(rec.tool_name, "weather");
    }

    #[test]
    fn mode_defaults_to_call() {
        assert_eq!(RequestedMode::default(), RequestedMode::Call);
        let parsed: RequestedMode = serde_json::from_str(r#""stream""#).unwrap();
        assert_eq!(parsed, RequestedMode::Stream);
    }
}
