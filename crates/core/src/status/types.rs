//! Processing status shared by orders and order items.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by the status model.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StatusError {
    /// The requested change is not an edge of the transition table.
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: Status, to: Status },

    /// A stored status string could not be parsed.
    #[error("unknown status: {0}")]
    Unknown(String),
}

/// Processing status of an order or order item.
///
/// Transition table:
/// ```text
/// Submitted    -> Accepted | Cancelled
/// Accepted     -> InProduction | Cancelled
/// InProduction -> Suspended | Completed | Failed | Cancelled
/// Suspended    -> InProduction | Cancelled
/// Completed    -> Downloaded
/// (any)        -> Terminated
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Submitted,
    Accepted,
    InProduction,
    Suspended,
    Cancelled,
    Completed,
    Failed,
    Terminated,
    Downloaded,
}

impl Status {
    /// All statuses, in lifecycle order.
    pub const ALL: [Status; 9] = [
        Status::Submitted,
        Status::Accepted,
        Status::InProduction,
        Status::Suspended,
        Status::Cancelled,
        Status::Completed,
        Status::Failed,
        Status::Terminated,
        Status::Downloaded,
    ];

    /// Returns true if no pipeline-driven transition leaves this status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Status::Completed
                | Status::Failed
                | Status::Terminated
                | Status::Cancelled
                | Status::Downloaded
        )
    }

    /// Returns true for the successful terminal statuses.
    pub fn is_success(&self) -> bool {
        matches!(self, Status::Completed | Status::Downloaded)
    }

    /// Returns true if `self -> to` is an edge of the transition table.
    ///
    /// Staying in the same status is not a transition.
    pub fn can_transition(&self, to: Status) -> bool {
        use Status::*;

        if *self == to {
            return false;
        }
        if to == Terminated {
            return true;
        }
        matches!(
            (*self, to),
            (Submitted, Accepted)
                | (Submitted, Cancelled)
                | (Accepted, InProduction)
                | (Accepted, Cancelled)
                | (InProduction, Suspended)
                | (InProduction, Completed)
                | (InProduction, Failed)
                | (InProduction, Cancelled)
                | (Suspended, InProduction)
                | (Suspended, Cancelled)
                | (Completed, Downloaded)
        )
    }

    /// Checks a single transition.
    pub fn check_transition(&self, to: Status) -> Result<(), StatusError> {
        if self.can_transition(to) {
            Ok(())
        } else {
            Err(StatusError::InvalidTransition { from: *self, to })
        }
    }

    /// Checks a chain of hops starting at `self` and returns the final status.
    pub fn check_path(&self, hops: &[Status]) -> Result<Status, StatusError> {
        let mut current = *self;
        for hop in hops {
            current.check_transition(*hop)?;
            current = *hop;
        }
        Ok(current)
    }

    /// Hops needed to bring a not-yet-started entity into production.
    pub fn path_to_production(&self) -> Result<&'static [Status], StatusError> {
        match self {
            Status::Submitted => Ok(&[Status::Accepted, Status::InProduction]),
            Status::Accepted => Ok(&[Status::InProduction]),
            Status::Suspended => Ok(&[Status::InProduction]),
            other => Err(StatusError::InvalidTransition {
                from: *other,
                to: Status::InProduction,
            }),
        }
    }

    /// The OSEO name of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Submitted => "Submitted",
            Status::Accepted => "Accepted",
            Status::InProduction => "InProduction",
            Status::Suspended => "Suspended",
            Status::Cancelled => "Cancelled",
            Status::Completed => "Completed",
            Status::Failed => "Failed",
            Status::Terminated => "Terminated",
            Status::Downloaded => "Downloaded",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Status {
    type Err = StatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Status::ALL
            .iter()
            .find(|status| status.as_str() == s)
            .copied()
            .ok_or_else(|| StatusError::Unknown(s.to_string()))
    }
}
