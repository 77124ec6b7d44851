use crate::inventory::HeaderDiff;
use mediadiff_common::{ComparisonResult, ResultKind, Warning};
use serde::{Deserialize, Serialize};

/// Result counts per kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub total: usize,
    pub matched: usize,
    pub hash_mismatch: usize,
    pub missing_on_disk: usize,
    pub missing_in_manifest: usize,
    pub duplicate_identifier: usize,
    pub duplicate_path: usize,
}

impl Summary {
    pub fn from_results(results: &[ComparisonResult]) -> Self {
        let mut summary = Summary::default();
        for result in results {
            summary.total += 1;
            *summary.slot(result.kind) += 1;
        }
        summary
    }

    fn slot(&mut self, kind: ResultKind) -> &mut usize {
        match kind {
            ResultKind::Match => &mut self.matched,
            ResultKind::HashMismatch => &mut self.hash_mismatch,
            ResultKind::MissingOnDisk => &mut self.missing_on_disk,
            ResultKind::MissingInManifest => &mut self.missing_in_manifest,
            ResultKind::DuplicateIdentifier => &mut self.duplicate_identifier,
            ResultKind::DuplicatePath => &mut self.duplicate_path,
        }
    }

    pub fn count(&self, kind: ResultKind) -> usize {
        match kind {
            ResultKind::Match => self.matched,
            ResultKind::HashMismatch => self.hash_mismatch,
            ResultKind::MissingOnDisk => self.missing_on_disk,
            ResultKind::MissingInManifest => self.missing_in_manifest,
            ResultKind::DuplicateIdentifier => self.duplicate_identifier,
            ResultKind::DuplicatePath => self.duplicate_path,
        }
    }
}

/// Ordered outcome of one reconciliation run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffReport {
    pub results: Vec<ComparisonResult>,
    pub summary: Summary,
    pub warnings: Vec<Warning>,
    /// False when the run was cancelled before every pair was verified
    pub complete: bool,
    /// Identifiers of left entries whose digests were never compared
    #[serde(default)]
    pub unverified: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_diff: Option<HeaderDiff>,
}

/// Count result kinds and wrap the ordered results in a report
pub fn summarize(results: Vec<ComparisonResult>) -> DiffReport {
    DiffReport {
        summary: Summary::from_results(&results),
        results,
        warnings: Vec::new(),
        complete: true,
        unverified: Vec::new(),
        header_diff: None,
    }
}

impl DiffReport {
    /// True when any result is not a MATCH
    pub fn has_discrepancies(&self) -> bool {
        self.results.iter().any(|r| r.kind != ResultKind::Match)
    }

    pub fn results_of(&self, kind: ResultKind) -> impl Iterator<Item = &ComparisonResult> {
        self.results.iter().filter(move |r| r.kind == kind)
    }

    pub fn discrepancies(&self) -> impl Iterator<Item = &ComparisonResult> {
        self.results.iter().filter(|r| r.kind != ResultKind::Match)
    }
}
