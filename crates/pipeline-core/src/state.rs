//! Lifecycle state shared by every execution-tree node.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::{Cause, RunContext};
use crate::error::{Error, Result};

/// Status of a pipeline, stage, job, step, queue item or run record.
///
/// Transitions advance monotonically: `pending → running → {succeeded |
/// failed | cancelled}`. Terminal states are sticky.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl Status {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Succeeded | Status::Failed | Status::Cancelled)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Pending => "pending",
            Status::Running => "running",
            Status::Succeeded => "succeeded",
            Status::Failed => "failed",
            Status::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Lifecycle record attached to a node once it has been set up.
///
/// The `id` is a path label: the run's UUID for the pipeline, and
/// `parent.index` for every child below it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    pub id: String,
    pub status: Status,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub succeed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl State {
    /// A freshly set-up node goes straight to `running`.
    pub fn running(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: Status::Running,
            started_at: Utc::now(),
            succeed_at: None,
            failed_at: None,
            cancelled_at: None,
            error: None,
        }
    }

    pub fn succeed(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        self.status = Status::Succeeded;
        self.succeed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = Status::Failed;
        self.failed_at = Some(Utc::now());
        self.error = Some(error.into());
    }

    pub fn cancel(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        self.status = Status::Cancelled;
        self.cancelled_at = Some(Utc::now());
    }
}

/// Finish a node's state from its run result.
///
/// When the node's own derived context is done, the outcome is rewritten:
/// a deadline becomes `"<level> timeout after N seconds: …"` with status
/// `failed`, an explicit cancel keeps its kind with status `cancelled`.
pub(crate) fn settle(
    state: &mut State,
    level: &str,
    timeout: u64,
    scope: &RunContext,
    result: Result<()>,
) -> Result<()> {
    match result {
        Ok(()) => {
            state.succeed();
            Ok(())
        }
        Err(err) => match scope.cause() {
            Some(Cause::Deadline) => {
                let wrapped =
                    Error::Timeout(format!("{level} timeout after {timeout} seconds: {err}"));
                state.fail(wrapped.to_string());
                Err(wrapped)
            }
            Some(Cause::Cancelled) => {
                state.cancel();
                Err(Error::Cancelled)
            }
            None => {
                state.fail(err.to_string());
                Err(err)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_sticky() {
        let mut state = State::running("id");
        state.cancel();
        assert_eq!(state.status, Status::Cancelled);

        state.succeed();
        assert_eq!(state.status, Status::Cancelled);
        assert!(state.succeed_at.is_none());

        state.fail("late failure");
        assert_eq!(state.status, Status::Cancelled);
        assert!(state.error.is_none());
    }

    #[test]
    fn status_advances_monotonically() {
        let mut state = State::running("id");
        assert_eq!(state.status, Status::Running);

        state.succeed();
        assert_eq!(state.status, Status::Succeeded);
        assert!(state.succeed_at.is_some());
        assert!(state.succeed_at.unwrap() >= state.started_at);
    }

    #[tokio::test]
    async fn settle_rewrites_deadline_errors() {
        tokio::time::pause();
        let scope = RunContext::new().child_with_timeout(1);
        // Force the deadline into the past.
        tokio::time::advance(std::time::Duration::from_secs(2)).await;

        let mut state = State::running("id");
        let err = settle(
            &mut state,
            "job",
            1,
            &scope,
            Err(Error::ExecutionFailed("boom".into())),
        )
        .unwrap_err();

        assert!(err.is_timeout());
        assert!(err.to_string().contains("job timeout after 1 seconds"));
        assert_eq!(state.status, Status::Failed);
    }
}
