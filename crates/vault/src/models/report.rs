//! Error report accumulated over one sync or restore call

use serde::{Deserialize, Serialize};

use super::{StableId, TransientId};

/// A message the remote service could not hand over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unfetchable {
    pub transient_id: TransientId,
    /// None when the stable id could not be recovered either
    pub stable_id: Option<StableId>,
}

/// A label that could not be applied by the background label worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelFailure {
    pub label: String,
    pub stable_ids: Vec<StableId>,
    pub reason: String,
}

/// Recoverable problems met during an operation
///
/// Every recovered failure lands here so the caller sees what was skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Archived messages marked as known-unrestorable
    pub quarantined: Vec<StableId>,
    /// Messages that failed to fetch even individually
    pub unfetchable: Vec<Unfetchable>,
    /// Ids for which the server answered without any data
    pub empty_responses: Vec<TransientId>,
    /// Labels the background worker failed to apply
    pub label_failures: Vec<LabelFailure>,
    /// Connection re-establishments over the whole call
    pub reconnections: usize,
}

impl ErrorReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_quarantined(&mut self, id: StableId) {
        if !self.quarantined.contains(&id) {
            self.quarantined.push(id);
        }
    }

    pub fn record_unfetchable(&mut self, transient_id: TransientId, stable_id: Option<StableId>) {
        self.unfetchable.push(Unfetchable {
            transient_id,
            stable_id,
        });
    }

    pub fn record_empty(&mut self, transient_id: TransientId) {
        self.empty_responses.push(transient_id);
    }

    pub fn record_label_failure(&mut self, failure: LabelFailure) {
        self.label_failures.push(failure);
    }

    /// Fold another report into this one
    ///
    /// Reconnection counts add up since each report tracks its own connection.
    pub fn merge(&mut self, other: ErrorReport) {
        for id in other.quarantined {
            self.record_quarantined(id);
        }
        self.unfetchable.extend(other.unfetchable);
        self.empty_responses.extend(other.empty_responses);
        self.label_failures.extend(other.label_failures);
        self.reconnections += other.reconnections;
    }

    /// True when nothing had to be skipped or recovered
    pub fn is_clean(&self) -> bool {
        self.quarantined.is_empty()
            && self.unfetchable.is_empty()
            && self.empty_responses.is_empty()
            && self.label_failures.is_empty()
            && self.reconnections == 0
    }

    /// Human-readable totals for the end of an operation
    pub fn summary(&self) -> String {
        format!(
            "Number of reconnections: {}.\n\
             Number of emails quarantined: {}.\n\
             Number of emails that could not be fetched: {}.\n\
             Number of emails that were returned empty: {}.\n\
             Number of labels that could not be applied: {}.",
            self.reconnections,
            self.quarantined.len(),
            self.unfetchable.len(),
            self.empty_responses.len(),
            self.label_failures.len(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_report_is_clean() {
        assert!(ErrorReport::new().is_clean());
    }

    #[test]
    fn test_quarantine_is_recorded_once() {
        let mut report = ErrorReport::new();
        report.record_quarantined(StableId::new(5));
        report.record_quarantined(StableId::new(5));
        assert_eq!(report.quarantined, vec![StableId::new(5)]);
    }

    #[test]
    fn test_merge() {
        let mut left = ErrorReport::new();
        left.record_quarantined(StableId::new(1));
        left.reconnections = 2;

        let mut right = ErrorReport::new();
        right.record_quarantined(StableId::new(1));
        right.record_quarantined(StableId::new(2));
        right.record_unfetchable(TransientId::new(9), None);
        right.record_empty(TransientId::new(10));
        right.reconnections = 1;

        left.merge(right);

        assert_eq!(left.quarantined, vec![StableId::new(1), StableId::new(2)]);
        assert_eq!(left.unfetchable.len(), 1);
        assert_eq!(left.empty_responses, vec![TransientId::new(10)]);
        assert_eq!(left.reconnections, 3);
    }

    #[test]
    fn test_summary_lists_totals() {
        let mut report = ErrorReport::new();
        report.record_unfetchable(TransientId::new(3), Some(StableId::new(30)));
        report.reconnections = 4;

        let summary = report.summary();
        assert!(summary.contains("Number of reconnections: 4."));
        assert!(summary.contains("could not be fetched: 1."));
    }
}
