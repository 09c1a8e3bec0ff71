//! Batch results
use crate::covers::CoverStatus;
use crate::reconcile::Outcome;
use serde::Serialize;

/// What happened to one item of a batch
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Reconciled(Outcome),
    Cover(CoverStatus),
    /// Never reached reconciliation, e.g. unknown id or repeat within the batch
    Skipped(String),
}

impl ItemOutcome {
    #[must_use]
    #[inline]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Reconciled(outcome) => outcome.label(),
            Self::Cover(CoverStatus::Uploaded { .. }) => "cover_uploaded",
            Self::Cover(CoverStatus::BadQuality) => "cover_bad_quality",
            Self::Cover(CoverStatus::NotFound) => "cover_not_found",
            Self::Skipped(_) => "skipped",
        }
    }
}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemReport {
    /// Book id, ISBN or title, whichever identified the item in its batch
    pub key: String,
    pub outcome: ItemOutcome,
}

/// Result of one pipeline invocation. An aborted batch stopped at a fatal error; the items after
/// it were not attempted and the whole batch is expected to be redelivered.
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub items: Vec<ItemReport>,
    pub aborted: Option<String>,
}

/// Per-label tallies for the end-of-run log line
#[derive(Debug, Default, Serialize, PartialEq, Eq)]
pub struct Summary {
    pub inserted: usize,
    pub updated: usize,
    pub merged: usize,
    pub rejected: usize,
    pub skipped: usize,
    pub covers_uploaded: usize,
}

impl BatchReport {
    #[must_use]
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record(&mut self, key: impl Into<String>, outcome: ItemOutcome) {
        let key = key.into();
        tracing::debug!(%key, outcome = outcome.label(), "item finished");
        self.items.push(ItemReport { key, outcome });
    }

    #[inline]
    pub fn abort(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::error!(%reason, completed = self.items.len(), "batch aborted");
        self.aborted = Some(reason);
    }

    /// Whether every item was attempted
    #[must_use]
    #[inline]
    pub const fn is_complete(&self) -> bool {
        self.aborted.is_none()
    }

    #[must_use]
    #[allow(clippy::missing_inline_in_public_items, reason = "Called once per batch")]
    pub fn summary(&self) -> Summary {
        let mut summary = Summary::default();
        for item in &self.items {
            match &item.outcome {
                ItemOutcome::Reconciled(Outcome::Inserted(_)) => summary.inserted += 1,
                ItemOutcome::Reconciled(Outcome::Updated(_)) => summary.updated += 1,
                ItemOutcome::Reconciled(Outcome::DuplicateMerged { .. }) => summary.merged += 1,
                ItemOutcome::Reconciled(Outcome::Rejected(_)) => summary.rejected += 1,
                ItemOutcome::Cover(CoverStatus::Uploaded { .. }) => summary.covers_uploaded += 1,
                ItemOutcome::Cover(_) => {}
                ItemOutcome::Skipped(_) => summary.skipped += 1,
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    #[test]
    fn summary_counts_each_outcome() {
        let mut report = BatchReport::new();
        report.record("a", ItemOutcome::Reconciled(Outcome::Inserted(Uuid::nil())));
        report.record("b", ItemOutcome::Reconciled(Outcome::Rejected("box set".to_owned())));
        report.record("c", ItemOutcome::Skipped("repeat".to_owned()));
        report.record(
            "d",
            ItemOutcome::Cover(CoverStatus::Uploaded {
                key: "covers/d.jpg".to_owned(),
            }),
        );
        report.record("e", ItemOutcome::Cover(CoverStatus::BadQuality));

        assert!(report.is_complete());
        assert_eq!(
            report.summary(),
            Summary {
                inserted: 1,
                rejected: 1,
                skipped: 1,
                covers_uploaded: 1,
                ..Summary::default()
            }
        );
    }

    #[test]
    fn abort_marks_incomplete() {
        let mut report = BatchReport::new();
        report.abort("database error: pool timed out");
        assert!(!report.is_complete());
    }
}
