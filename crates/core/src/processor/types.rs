//! Types for the processor module.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::status::Status;

/// A step of the item pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Resolve,
    Fetch,
    Customize,
    Place,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Resolve => "resolve",
            Step::Fetch => "fetch",
            Step::Customize => "customize",
            Step::Place => "place",
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of driving one item through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProcessingOutcome {
    /// The item was delivered (`Completed` or `Downloaded`).
    Completed { file_name: Option<String> },
    /// The item failed; the reason is also in its status info.
    Failed { reason: String },
    /// The item ended `Cancelled` or `Terminated`.
    Stopped { status: Status },
    /// Cancellation arrived before the item started; it was left untouched.
    NotStarted { status: Status },
    /// Another task of this process is already working on the item.
    AlreadyRunning,
}

impl ProcessingOutcome {
    /// Outcome describing an item that already reached a terminal status.
    pub fn from_terminal(status: Status, file_name: Option<String>, info: &str) -> Self {
        match status {
            Status::Completed | Status::Downloaded => ProcessingOutcome::Completed { file_name },
            Status::Failed => ProcessingOutcome::Failed {
                reason: info.to_string(),
            },
            other => ProcessingOutcome::Stopped { status: other },
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, ProcessingOutcome::Completed { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ProcessingOutcome::Failed { .. })
    }
}

/// Result of processing every item of a batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub batch_id: String,
    /// Final status of each item, keyed by item ID.
    pub statuses: HashMap<String, Status>,
}

impl BatchOutcome {
    /// Aggregate status derived from the item statuses.
    pub fn status(&self) -> Status {
        aggregate_status(self.statuses.values().copied())
    }
}

/// Derive the status of a group (batch or order) from its members.
///
/// `Failed` if any member failed, else `InProduction` while any member is
/// not terminal, else `Completed` if every member succeeded. Remaining
/// mixes of success and stop statuses aggregate to `Terminated` if any
/// member was terminated, otherwise `Cancelled`. An empty group is
/// `Completed`.
pub fn aggregate_status<I>(statuses: I) -> Status
where
    I: IntoIterator<Item = Status>,
{
    let mut any_failed = false;
    let mut any_open = false;
    let mut all_success = true;
    let mut any_terminated = false;

    for status in statuses {
        any_failed |= status == Status::Failed;
        any_open |= !status.is_terminal();
        all_success &= status.is_success();
        any_terminated |= status == Status::Terminated;
    }

    if any_failed {
        Status::Failed
    } else if any_open {
        Status::InProduction
    } else if all_success {
        Status::Completed
    } else if any_terminated {
        Status::Terminated
    } else {
        Status::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use Status::*;

    #[test]
    fn test_any_failed_wins() {
        assert_eq!(aggregate_status([Completed, Failed, InProduction]), Failed);
        assert_eq!(aggregate_status([Failed, Completed, Completed]), Failed);
    }

    #[test]
    fn test_open_items_keep_in_production() {
        assert_eq!(aggregate_status([Completed, Submitted]), InProduction);
        assert_eq!(aggregate_status([Accepted, Suspended]), InProduction);
    }

    #[test]
    fn test_success_includes_downloaded() {
        assert_eq!(aggregate_status([Completed, Downloaded]), Completed);
        assert_eq!(aggregate_status(std::iter::empty()), Completed);
    }

    #[test]
    fn test_stopped_mixes() {
        assert_eq!(aggregate_status([Completed, Cancelled]), Cancelled);
        assert_eq!(aggregate_status([Cancelled, Terminated]), Terminated);
    }

    #[test]
    fn test_order_independent() {
        let statuses = [Completed, Failed, Completed, Cancelled];
        let mut reversed = statuses;
        reversed.reverse();
        assert_eq!(aggregate_status(statuses), aggregate_status(reversed));
    }

    #[test]
    fn test_outcome_from_terminal() {
        assert_eq!(
            ProcessingOutcome::from_terminal(Downloaded, Some("a.tif".into()), ""),
            ProcessingOutcome::Completed {
                file_name: Some("a.tif".into())
            }
        );
        assert_eq!(
            ProcessingOutcome::from_terminal(Failed, None, "fetch failed"),
            ProcessingOutcome::Failed {
                reason: "fetch failed".into()
            }
        );
        assert_eq!(
            ProcessingOutcome::from_terminal(Terminated, None, ""),
            ProcessingOutcome::Stopped { status: Terminated }
        );
    }
}
