//! Resolving indeterminate results into a gate decision
//!
//! The admission primitives never decide what an unreachable authority
//! means. Callers that want a single boolean apply a [`FailurePolicy`] on top.

use crate::error::ClientError;
use tracing::warn;

/// What to do when an admission primitive returns an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Admit when authorization cannot be determined
    Open,
    /// Deny when authorization cannot be determined
    #[default]
    Closed,
}

impl FailurePolicy {
    pub fn from_fail_open(fail_open: bool) -> Self {
        if fail_open {
            FailurePolicy::Open
        } else {
            FailurePolicy::Closed
        }
    }

    /// Collapse a primitive's result into a gate decision
    ///
    /// `admitted` extracts the decision from a successful outcome. Errors
    /// resolve according to the policy, except [`ClientError::UsageNotRecorded`]:
    /// the gate already opened for that one, so it always admits.
    ///
    /// # Example
    ///
    /// ```
    /// use licensegate_client::{ClientError, FailurePolicy};
    ///
    /// let unreachable: Result<bool, ClientError> = Err(ClientError::Timeout);
    ///
    /// assert!(FailurePolicy::Open.admit_or(&unreachable, |admitted| *admitted));
    /// assert!(!FailurePolicy::Closed.admit_or(&unreachable, |admitted| *admitted));
    /// ```
    pub fn admit_or<T, F>(self, result: &Result<T, ClientError>, admitted: F) -> bool
    where
        F: FnOnce(&T) -> bool,
    {
        match result {
            Ok(outcome) => admitted(outcome),
            Err(ClientError::UsageNotRecorded { .. }) => true,
            Err(err) => {
                let decision = self == FailurePolicy::Open;
                warn!(error = %err, policy = ?self, admitted = decision, "Authorization indeterminate");
                decision
            }
        }
    }
}
