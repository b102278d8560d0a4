//! Per-item problems collected during a run.
//!
//! Problems that only affect one outlet or node do not stop a run. They are
//! collected here and logged together once the run has finished.

use std::fmt;

use serde::{Serialize, Serializer};
use tracing::{info, warn};

use crate::outlets::RejectReason;

/// Most issues logged individually by [`Diagnostics::log_summary`].
pub const MAX_LOGGED_ISSUES: usize = 20;

/// One non-fatal problem.
#[derive(Debug, Clone, PartialEq)]
pub enum Issue {
    /// An option string key that is not understood.
    UnknownOption { source: &'static str, key: String },
    /// An outlet that was skipped.
    OutletRejected {
        ordinal: usize,
        reason: RejectReason,
    },
    /// An outlet with no basin; its path length is null.
    OutletFlagged { ordinal: usize, id: Option<u32> },
    /// Nodes with neither upstream nor downstream neighbors.
    OrphanNodes { count: usize, sample: Vec<String> },
    /// Nodes that drain to no outlet.
    UnassignedNodes { count: usize },
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Issue::UnknownOption { source, key } => {
                write!(f, "unknown {} option '{}' ignored", source, key)
            }
            Issue::OutletRejected { ordinal, reason } => {
                write!(f, "outlet #{} skipped: {}", ordinal, reason)
            }
            Issue::OutletFlagged { ordinal, id } => match id {
                Some(id) => write!(f, "outlet #{} (id {}) has no basin", ordinal, id),
                None => write!(f, "outlet #{} has no basin", ordinal),
            },
            Issue::OrphanNodes { count, sample } => {
                write!(f, "{} orphan node(s)", count)?;
                if !sample.is_empty() {
                    write!(f, ", e.g. {}", sample.join(", "))?;
                }
                Ok(())
            }
            Issue::UnassignedNodes { count } => {
                write!(f, "{} node(s) drain to no outlet", count)
            }
        }
    }
}

/// Issues from one run, in the order they were found.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    issues: Vec<Issue>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, issue: Issue) {
        self.issues.push(issue);
    }

    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    /// Number of rejected outlets.
    pub fn rejected_outlets(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| matches!(i, Issue::OutletRejected { .. }))
            .count()
    }

    /// Logs every issue up to [`MAX_LOGGED_ISSUES`], then a count of the rest.
    pub fn log_summary(&self, operation: &str) {
        if self.issues.is_empty() {
            info!(operation, "no issues");
            return;
        }
        for issue in self.issues.iter().take(MAX_LOGGED_ISSUES) {
            warn!(operation, "{}", issue);
        }
        if self.issues.len() > MAX_LOGGED_ISSUES {
            warn!(
                operation,
                omitted = self.issues.len() - MAX_LOGGED_ISSUES,
                "further issues not shown"
            );
        }
        info!(operation, issues = self.issues.len(), "run finished with issues");
    }
}

/// Serialized as the list of issue messages.
impl Serialize for Diagnostics {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.issues.iter().map(|issue| issue.to_string()))
    }
}
