//! Run report - per-entity outcomes and summary counts

use crate::diff::{FieldChange, Operation};
use crate::error::{Error, ErrorCategory};
use crate::model::ResourceKey;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Why an entity was not attempted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipCause {
    /// An entity it depends on failed or was skipped; `ancestor` is the root cause
    Dependency { ancestor: ResourceKey },
    /// The run was cancelled before it started
    Cancelled,
}

/// Final outcome of one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    NoOp,
    Created,
    Updated { fields: Vec<FieldChange> },
    Replaced { fields: Vec<FieldChange> },
    Deleted,
    /// Undeclared and left alone
    Orphaned,
    /// Dry run: the operation that would be carried out
    Planned { operation: Operation },
    Skipped { cause: SkipCause },
    Failed { category: ErrorCategory, error: String },
}

impl Outcome {
    pub fn failed(error: &Error) -> Self {
        Self::Failed {
            category: error.category(),
            error: error.to_string(),
        }
    }

    pub fn skipped_by(ancestor: &ResourceKey) -> Self {
        Self::Skipped {
            cause: SkipCause::Dependency {
                ancestor: ancestor.clone(),
            },
        }
    }

    /// Outcome of successfully carrying out an operation
    pub fn applied(operation: &Operation) -> Self {
        match operation {
            Operation::NoOp => Self::NoOp,
            Operation::Create => Self::Created,
            Operation::Update { fields } => Self::Updated {
                fields: fields.clone(),
            },
            Operation::Replace { fields } => Self::Replaced {
                fields: fields.clone(),
            },
            Operation::Delete => Self::Deleted,
            Operation::Orphaned => Self::Orphaned,
        }
    }

    /// Check if the outcome represents success (no failure, not skipped)
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. } | Self::Skipped { .. })
    }

    /// Check if the outcome represents a change made to a host
    pub fn is_change(&self) -> bool {
        matches!(
            self,
            Self::Created | Self::Updated { .. } | Self::Replaced { .. } | Self::Deleted
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::NoOp => "no-op",
            Self::Created => "created",
            Self::Updated { .. } => "updated",
            Self::Replaced { .. } => "replaced",
            Self::Deleted => "deleted",
            Self::Orphaned => "orphaned",
            Self::Planned { .. } => "planned",
            Self::Skipped { .. } => "skipped",
            Self::Failed { .. } => "failed",
        }
    }
}

/// One line of the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityReport {
    pub key: ResourceKey,
    #[serde(flatten)]
    pub outcome: Outcome,
    /// Found on the host but not declared
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub orphan: bool,
}

/// Summary of reconciliation results
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub replaced: usize,
    pub skipped: usize,
    pub failed: usize,
    pub no_op: usize,
    pub orphaned: usize,
    pub planned: usize,
}

impl RunSummary {
    /// Add an outcome to the summary. A replacement counts as one delete and one create.
    pub fn add(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::NoOp => self.no_op += 1,
            Outcome::Created => self.created += 1,
            Outcome::Updated { .. } => self.updated += 1,
            Outcome::Replaced { .. } => {
                self.replaced += 1;
                self.created += 1;
                self.deleted += 1;
            }
            Outcome::Deleted => self.deleted += 1,
            Outcome::Orphaned => self.orphaned += 1,
            Outcome::Planned { .. } => self.planned += 1,
            Outcome::Skipped { .. } => self.skipped += 1,
            Outcome::Failed { .. } => self.failed += 1,
        }
    }

    /// Total number of changes made
    pub fn total_changes(&self) -> usize {
        self.created + self.updated + self.deleted
    }

    /// Check if the run completed without failures or skips
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }
}

/// Overall result of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every entity reached its intended outcome
    Success,
    /// Some entities failed or were skipped
    PartialFailure,
    /// No host could be probed at all
    Fatal,
}

impl RunStatus {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Success => 0,
            Self::PartialFailure => 2,
            Self::Fatal => 3,
        }
    }
}

/// Structured report of one reconciliation run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    /// Declared entities in apply order, then orphans
    pub entries: Vec<EntityReport>,
    pub summary: RunSummary,
    pub warnings: Vec<String>,
    pub status: RunStatus,
}

impl RunReport {
    /// Assemble a report from ordered entries
    pub fn new(
        started_at: DateTime<Utc>,
        dry_run: bool,
        entries: Vec<EntityReport>,
        warnings: Vec<String>,
        hosts_reached: usize,
        hosts_total: usize,
    ) -> Self {
        let mut summary = RunSummary::default();
        for entry in &entries {
            summary.add(&entry.outcome);
        }

        let status = if hosts_total > 0 && hosts_reached == 0 {
            RunStatus::Fatal
        } else if summary.is_success() {
            RunStatus::Success
        } else {
            RunStatus::PartialFailure
        };

        Self {
            started_at,
            finished_at: Utc::now(),
            dry_run,
            entries,
            summary,
            warnings,
            status,
        }
    }

    /// Find an entity's outcome
    pub fn outcome(&self, key: &ResourceKey) -> Option<&Outcome> {
        self.entries.iter().find(|e| &e.key == key).map(|e| &e.outcome)
    }

    /// Entries that failed
    pub fn failures(&self) -> impl Iterator<Item = &EntityReport> {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, Outcome::Failed { .. }))
    }

    pub fn exit_code(&self) -> i32 {
        self.status.exit_code()
    }
}
