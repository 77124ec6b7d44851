use crate::digest_cache::DigestCache;
use crate::hash_engine::HashEngine;
use crate::inventory::HeaderDiff;
use crate::manifest::Manifest;
use crate::report::{summarize, DiffReport};
use crate::scanner::ScanOutcome;
use mediadiff_common::{
    ComparisonResult, Counterpart, DigestSet, DiscoveredFile, HashAlgorithm, JoinMode,
    ManifestEntry, MediaDiffError, ResultKind, RunConfig, Warning, WarningKind,
};
use rayon::prelude::*;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where the right-hand digests of a pair come from
pub trait DigestSource: Sync {
    fn digests(
        &self,
        counterpart: &Counterpart,
        algorithms: &[HashAlgorithm],
    ) -> Result<DigestSet, MediaDiffError>;
}

/// Digests already stated by the counterpart; never touches the filesystem
pub struct DeclaredDigests;

impl DigestSource for DeclaredDigests {
    fn digests(
        &self,
        counterpart: &Counterpart,
        algorithms: &[HashAlgorithm],
    ) -> Result<DigestSet, MediaDiffError> {
        let known = match counterpart {
            Counterpart::Entry(entry) => &entry.declared_hashes,
            Counterpart::File(file) => &file.computed_hashes,
        };
        Ok(algorithms
            .iter()
            .filter_map(|a| known.get(a).map(|d| (*a, d.clone())))
            .collect())
    }
}

/// Digests computed from file content under a media root
pub struct ComputedDigests<'a> {
    engine: HashEngine,
    cache: &'a DigestCache,
    media_root: PathBuf,
}

impl<'a> ComputedDigests<'a> {
    pub fn new(media_root: impl Into<PathBuf>, cache: &'a DigestCache) -> Self {
        Self {
            engine: HashEngine::new(),
            cache,
            media_root: media_root.into(),
        }
    }
}

impl DigestSource for ComputedDigests<'_> {
    fn digests(
        &self,
        counterpart: &Counterpart,
        algorithms: &[HashAlgorithm],
    ) -> Result<DigestSet, MediaDiffError> {
        let relative = counterpart.relative_path();
        if let Some(cached) = self.cache.get(relative, algorithms) {
            debug!("Digest cache hit for {}", relative);
            return Ok(cached);
        }

        let digests = self
            .engine
            .compute(&self.media_root.join(relative), algorithms)?;
        self.cache.put(relative, &digests);
        Ok(digests)
    }
}

pub type ProgressCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Joins a load file against a media tree or a second load file
pub struct Reconciler {
    config: RunConfig,
    cancel: Option<Arc<AtomicBool>>,
    progress: Option<ProgressCallback>,
}

struct DuplicateOf {
    kind: ResultKind,
    detail: String,
}

enum Check {
    Settled { kind: ResultKind, detail: String },
    Digest { job: usize },
}

enum LeftPlan {
    Duplicate(DuplicateOf),
    Unpaired,
    Paired { right: usize, check: Check },
}

struct Job {
    right: usize,
    algorithms: Vec<HashAlgorithm>,
}

/// Identity of one item as seen by duplicate detection
struct Key<'a> {
    identifier: &'a str,
    path: &'a str,
    line: Option<u64>,
}

impl Reconciler {
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            cancel: None,
            progress: None,
        }
    }

    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Verify a load file against files discovered under the media root
    pub fn reconcile_disk(
        &self,
        manifest: &Manifest,
        files: Vec<DiscoveredFile>,
    ) -> Result<DiffReport, MediaDiffError> {
        self.reconcile_scan(
            manifest,
            ScanOutcome {
                files,
                warnings: Vec::new(),
            },
        )
    }

    /// Like [`Reconciler::reconcile_disk`], carrying the scan's warnings into the report
    pub fn reconcile_scan(
        &self,
        manifest: &Manifest,
        scan: ScanOutcome,
    ) -> Result<DiffReport, MediaDiffError> {
        info!(
            "Reconciling {} entries against {} files under {:?}",
            manifest.len(),
            scan.files.len(),
            self.config.media_root
        );

        // Digests are only trusted for the run that computed them
        let cache = DigestCache::new();
        let source = ComputedDigests::new(self.config.media_root.clone(), &cache);
        let right = scan.files.into_iter().map(Counterpart::File).collect();
        let mut warnings = manifest.warnings.clone();
        warnings.extend(scan.warnings);

        self.reconcile(manifest, right, false, JoinMode::Disk, &source, warnings)
    }

    /// Compare the declared digests of two load files
    pub fn reconcile_manifests(
        &self,
        left: &Manifest,
        right: &Manifest,
    ) -> Result<DiffReport, MediaDiffError> {
        info!(
            "Reconciling {} entries against {} entries",
            left.len(),
            right.len()
        );

        let counterparts = right
            .entries
            .iter()
            .cloned()
            .map(Counterpart::Entry)
            .collect();
        let mut warnings = left.warnings.clone();
        warnings.extend(right.warnings.iter().cloned());

        let mut report = self.reconcile(
            left,
            counterparts,
            right.identifiers_declared,
            JoinMode::Manifest,
            &DeclaredDigests,
            warnings,
        )?;
        report.header_diff = Some(HeaderDiff::between(&left.header, &right.header));
        Ok(report)
    }

    fn reconcile(
        &self,
        left: &Manifest,
        right: Vec<Counterpart>,
        right_identifiers: bool,
        mode: JoinMode,
        source: &dyn DigestSource,
        mut warnings: Vec<Warning>,
    ) -> Result<DiffReport, MediaDiffError> {
        let selected = self.config.algorithms()?;

        // Plan: duplicates, joins and the digest jobs they need
        let left_duplicates = find_duplicates(
            left.entries.iter().map(|e| Key {
                identifier: &e.identifier,
                path: &e.relative_path,
                line: Some(e.line),
            }),
            left.identifiers_declared,
        );
        let right_duplicates = find_duplicates(right.iter().map(right_key), right_identifiers);

        let mut by_identifier: HashMap<&str, usize> = HashMap::new();
        let mut by_path: HashMap<&str, usize> = HashMap::new();
        for (index, counterpart) in right.iter().enumerate() {
            if right_duplicates[index].is_some() {
                continue;
            }
            let key = right_key(counterpart);
            by_identifier.entry(key.identifier).or_insert(index);
            by_path.entry(key.path).or_insert(index);
        }

        let join_by_identifier =
            mode == JoinMode::Manifest && left.identifiers_declared && right_identifiers;
        let mut claimed = vec![false; right.len()];
        let mut pairs: Vec<Option<usize>> = vec![None; left.entries.len()];

        for (index, entry) in left.entries.iter().enumerate() {
            if left_duplicates[index].is_some() {
                continue;
            }
            let found = if join_by_identifier {
                by_identifier.get(entry.identifier.as_str())
            } else {
                by_path.get(entry.relative_path.as_str())
            };
            if let Some(&j) = found {
                if !claimed[j] {
                    claimed[j] = true;
                    pairs[index] = Some(j);
                }
            }
        }

        if join_by_identifier {
            // Path fallback only sees what the identifier join left behind
            for (index, entry) in left.entries.iter().enumerate() {
                if left_duplicates[index].is_some() || pairs[index].is_some() {
                    continue;
                }
                if let Some(&j) = by_path.get(entry.relative_path.as_str()) {
                    if !claimed[j] {
                        claimed[j] = true;
                        pairs[index] = Some(j);
                    }
                }
            }
        }

        let mut jobs = Vec::new();
        let mut plan = Vec::with_capacity(left.entries.len());
        for (index, (entry, duplicate)) in left.entries.iter().zip(left_duplicates).enumerate() {
            let step = match (duplicate, pairs[index]) {
                (Some(duplicate), _) => LeftPlan::Duplicate(duplicate),
                (None, None) => LeftPlan::Unpaired,
                (None, Some(j)) => LeftPlan::Paired {
                    right: j,
                    check: plan_check(entry, &right[j], j, &selected, &mut jobs),
                },
            };
            plan.push(step);
        }

        debug!(
            "Planned {} pairs, {} digest jobs, {} unclaimed counterparts",
            pairs.iter().filter(|p| p.is_some()).count(),
            jobs.len(),
            claimed.iter().filter(|c| !**c).count()
        );

        // Digest: the only parallel stage
        let outcomes = self.run_jobs(&jobs, &right, source)?;

        // Assemble in left order, then unclaimed right items in right order
        let mut right: Vec<Option<Counterpart>> = right.into_iter().map(Some).collect();
        let mut results = Vec::with_capacity(plan.len() + right.len());
        let mut unverified = Vec::new();

        for (entry, step) in left.entries.iter().zip(plan) {
            let result = match step {
                LeftPlan::Duplicate(duplicate) => ComparisonResult {
                    kind: duplicate.kind,
                    manifest_entry: Some(entry.clone()),
                    counterpart: None,
                    detail: duplicate.detail,
                },
                LeftPlan::Unpaired => ComparisonResult {
                    kind: ResultKind::MissingOnDisk,
                    manifest_entry: Some(entry.clone()),
                    counterpart: None,
                    detail: match mode {
                        JoinMode::Disk => "not found under the media root".to_string(),
                        JoinMode::Manifest => "not present in the right load file".to_string(),
                    },
                },
                LeftPlan::Paired { right: j, check } => {
                    let counterpart = right[j].take();
                    match check {
                        Check::Settled { kind, detail } => ComparisonResult {
                            kind,
                            manifest_entry: Some(entry.clone()),
                            counterpart,
                            detail,
                        },
                        Check::Digest { job } => match &outcomes[job] {
                            None => {
                                unverified.push(entry.identifier.clone());
                                continue;
                            }
                            Some(Err(err)) => {
                                warn!("Cannot hash {}: {}", entry.relative_path, err);
                                warnings.push(
                                    Warning::new(WarningKind::Io, err.to_string())
                                        .at_line(entry.line)
                                        .with_path(entry.relative_path.clone()),
                                );
                                ComparisonResult {
                                    kind: ResultKind::MissingOnDisk,
                                    manifest_entry: Some(entry.clone()),
                                    counterpart,
                                    detail: format!("unreadable: {}", err),
                                }
                            }
                            Some(Ok(actual)) => {
                                let (kind, detail) =
                                    compare_digests(entry, &jobs[job].algorithms, actual);
                                let counterpart = counterpart.map(|c| match c {
                                    Counterpart::File(mut file) => {
                                        file.computed_hashes = actual.clone();
                                        Counterpart::File(file)
                                    }
                                    other => other,
                                });
                                ComparisonResult {
                                    kind,
                                    manifest_entry: Some(entry.clone()),
                                    counterpart,
                                    detail,
                                }
                            }
                        },
                    }
                }
            };
            results.push(result);
        }

        for (slot, duplicate) in right.iter_mut().zip(right_duplicates) {
            let Some(counterpart) = slot.take() else {
                continue;
            };
            let (kind, detail) = match duplicate {
                Some(duplicate) => (duplicate.kind, duplicate.detail),
                None => (
                    ResultKind::MissingInManifest,
                    match mode {
                        JoinMode::Disk => "not listed in the load file".to_string(),
                        JoinMode::Manifest => "not present in the left load file".to_string(),
                    },
                ),
            };
            results.push(ComparisonResult {
                kind,
                manifest_entry: None,
                counterpart: Some(counterpart),
                detail,
            });
        }

        let mut report = summarize(results);
        report.warnings = warnings;
        report.complete = unverified.is_empty();
        report.unverified = unverified;

        if report.complete {
            info!(
                "Reconciled {} results: {} matched, {} discrepancies",
                report.summary.total,
                report.summary.matched,
                report.summary.total - report.summary.matched
            );
        } else {
            warn!(
                "Run cancelled with {} pairs unverified",
                report.unverified.len()
            );
        }
        Ok(report)
    }

    fn run_jobs(
        &self,
        jobs: &[Job],
        right: &[Counterpart],
        source: &dyn DigestSource,
    ) -> Result<Vec<Option<Result<DigestSet, MediaDiffError>>>, MediaDiffError> {
        if jobs.is_empty() {
            return Ok(Vec::new());
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.worker_count())
            .build()
            .map_err(|e| MediaDiffError::Config(format!("Failed to start hashing pool: {}", e)))?;

        let total = jobs.len();
        let done = AtomicUsize::new(0);
        let cancelled = || {
            self.cancel
                .as_ref()
                .map_or(false, |flag| flag.load(Ordering::Relaxed))
        };

        Ok(pool.install(|| {
            jobs.par_iter()
                .map(|job| {
                    if cancelled() {
                        return None;
                    }
                    let outcome = source.digests(&right[job.right], &job.algorithms);
                    let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
                    if let Some(progress) = &self.progress {
                        progress(finished, total);
                    }
                    Some(outcome)
                })
                .collect()
        }))
    }
}

fn right_key(counterpart: &Counterpart) -> Key<'_> {
    match counterpart {
        Counterpart::File(file) => Key {
            identifier: &file.relative_path,
            path: &file.relative_path,
            line: None,
        },
        Counterpart::Entry(entry) => Key {
            identifier: &entry.identifier,
            path: &entry.relative_path,
            line: Some(entry.line),
        },
    }
}

/// Flag every item after the first sharing an identifier or a path
fn find_duplicates<'a>(
    keys: impl Iterator<Item = Key<'a>>,
    check_identifiers: bool,
) -> Vec<Option<DuplicateOf>> {
    let mut identifiers: HashMap<&str, Option<u64>> = HashMap::new();
    let mut paths: HashMap<&str, Option<u64>> = HashMap::new();

    keys.map(|key| {
        let duplicate = if let Some(first) = identifiers
            .get(key.identifier)
            .filter(|_| check_identifiers)
        {
            Some(DuplicateOf {
                kind: ResultKind::DuplicateIdentifier,
                detail: first_seen("identifier", key.identifier, *first),
            })
        } else {
            paths.get(key.path).map(|first| DuplicateOf {
                kind: ResultKind::DuplicatePath,
                detail: first_seen("path", key.path, *first),
            })
        };

        if duplicate.is_none() {
            identifiers.insert(key.identifier, key.line);
            paths.insert(key.path, key.line);
        }
        duplicate
    })
    .collect()
}

fn first_seen(what: &str, value: &str, line: Option<u64>) -> String {
    match line {
        Some(line) => format!("{} {} first declared at line {}", what, value, line),
        None => format!("{} {} listed more than once", what, value),
    }
}

/// Decide whether a pair needs digests, queueing a job when it does
fn plan_check(
    entry: &ManifestEntry,
    counterpart: &Counterpart,
    right: usize,
    selected: &[HashAlgorithm],
    jobs: &mut Vec<Job>,
) -> Check {
    let mut algorithms: Vec<HashAlgorithm> = entry
        .declared_hashes
        .keys()
        .copied()
        .filter(|a| selected.is_empty() || selected.contains(a))
        .collect();

    match counterpart {
        Counterpart::File(_) if algorithms.is_empty() => {
            return Check::Settled {
                kind: ResultKind::Match,
                detail: "present on disk; no declared digest selected for verification"
                    .to_string(),
            };
        }
        Counterpart::Entry(other) => {
            algorithms.retain(|a| other.declared_hashes.contains_key(a));
            if algorithms.is_empty() {
                return Check::Settled {
                    kind: ResultKind::HashMismatch,
                    detail: "no comparable algorithm".to_string(),
                };
            }
        }
        Counterpart::File(_) => {}
    }

    jobs.push(Job { right, algorithms });
    Check::Digest {
        job: jobs.len() - 1,
    }
}

fn compare_digests(
    entry: &ManifestEntry,
    algorithms: &[HashAlgorithm],
    actual: &DigestSet,
) -> (ResultKind, String) {
    let mut mismatches = Vec::new();
    for algorithm in algorithms {
        let expected = entry
            .declared_hashes
            .get(algorithm)
            .map(String::as_str)
            .unwrap_or("");
        let found = actual.get(algorithm).map(String::as_str).unwrap_or("");
        if !expected.eq_ignore_ascii_case(found) {
            mismatches.push(format!(
                "{} expected {}, actual {}",
                algorithm,
                expected,
                if found.is_empty() { "<none>" } else { found }
            ));
        }
    }

    if mismatches.is_empty() {
        let names: Vec<&str> = algorithms.iter().map(|a| a.name()).collect();
        (ResultKind::Match, format!("verified {}", names.join(", ")))
    } else {
        (ResultKind::HashMismatch, mismatches.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest_parser;
    use crate::scanner::MediaScanner;
    use mediadiff_common::{ColumnMapping, Dialect, HashColumn};
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    const EMPTY_MD5: &str = "d41d8cd98f00b204e9800998ecf8427e";

    fn csv_config(root: &Path) -> RunConfig {
        RunConfig {
            delimiter: ',',
            quote_char: '"',
            media_root: root.to_path_buf(),
            concurrency: 2,
            ..RunConfig::default()
        }
    }

    fn manifest(input: &str, mapping: &ColumnMapping) -> Manifest {
        let dialect = Dialect {
            delimiter: ',',
            quote_char: '"',
            ..Dialect::default()
        };
        let parsed = manifest_parser::parse(input.as_bytes(), &dialect).unwrap();
        Manifest::from_parsed(parsed, mapping, Path::new("")).unwrap()
    }

    fn disk_report(root: &Path, input: &str) -> DiffReport {
        let config = csv_config(root);
        let manifest = manifest(input, &config.columns);
        let scan = MediaScanner::new(&config).scan(root).unwrap();
        Reconciler::new(config).reconcile_scan(&manifest, scan).unwrap()
    }

    fn kinds(report: &DiffReport) -> Vec<ResultKind> {
        report.results.iter().map(|r| r.kind).collect()
    }

    #[test]
    fn test_empty_file_matches_empty_md5() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("docs")).unwrap();
        fs::write(temp.path().join("docs/a1.tif"), b"").unwrap();

        let report = disk_report(
            temp.path(),
            &format!("BATES,PATH,MD5SUM\nA1,docs\\a1.tif,{}\n", EMPTY_MD5),
        );

        assert_eq!(kinds(&report), vec![ResultKind::Match]);
        assert!(!report.has_discrepancies());
        assert!(report.complete);
        let file = report.results[0].discovered_file().unwrap();
        assert_eq!(file.computed_hashes[&HashAlgorithm::Md5], EMPTY_MD5);
    }

    #[test]
    fn test_changed_content_is_hash_mismatch() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("docs")).unwrap();
        fs::write(temp.path().join("docs/a1.tif"), b"abc").unwrap();

        let report = disk_report(
            temp.path(),
            &format!("BATES,PATH,MD5SUM\nA1,docs/a1.tif,{}\n", EMPTY_MD5.to_uppercase()),
        );

        assert_eq!(kinds(&report), vec![ResultKind::HashMismatch]);
        let detail = &report.results[0].detail;
        assert!(detail.contains("MD5"));
        assert!(detail.contains(EMPTY_MD5));
        assert!(detail.contains("900150983cd24fb0d6963f7d28e17f72"));
    }

    #[test]
    fn test_missing_and_orphan_files() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("b.tif"), b"").unwrap();
        fs::write(temp.path().join("extra1.tif"), b"").unwrap();
        fs::write(temp.path().join("extra2.tif"), b"").unwrap();

        let report = disk_report(
            temp.path(),
            &format!(
                "BATES,PATH,MD5SUM\nA1,a.tif,{0}\nB1,b.tif,{0}\n",
                EMPTY_MD5
            ),
        );

        assert_eq!(
            kinds(&report),
            vec![
                ResultKind::MissingOnDisk,
                ResultKind::Match,
                ResultKind::MissingInManifest,
                ResultKind::MissingInManifest,
            ]
        );
        let orphans: Vec<&str> = report
            .results_of(ResultKind::MissingInManifest)
            .map(|r| r.display_path())
            .collect();
        assert_eq!(orphans, vec!["extra1.tif", "extra2.tif"]);
        assert!(report
            .results_of(ResultKind::MissingInManifest)
            .all(|r| r.manifest_entry.is_none()));
    }

    #[test]
    fn test_duplicate_identifier_uses_first_record() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("first.tif"), b"").unwrap();
        fs::write(temp.path().join("second.tif"), b"").unwrap();

        let report = disk_report(
            temp.path(),
            &format!(
                "BATES,PATH,MD5SUM\nDOC001,first.tif,{0}\nDOC001,second.tif,{0}\n",
                EMPTY_MD5
            ),
        );

        assert_eq!(
            kinds(&report),
            vec![
                ResultKind::Match,
                ResultKind::DuplicateIdentifier,
                ResultKind::MissingInManifest,
            ]
        );
        assert_eq!(report.results[2].display_path(), "second.tif");
        assert_eq!(
            report
                .warnings
                .iter()
                .filter(|w| w.kind == WarningKind::DuplicateIdentifier)
                .count(),
            1
        );
    }

    #[test]
    fn test_duplicate_path() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.tif"), b"").unwrap();

        let report = disk_report(
            temp.path(),
            "BATES,PATH,MD5SUM\nA1,a.tif,\nA2,./a.tif,\n",
        );

        assert_eq!(
            kinds(&report),
            vec![ResultKind::Match, ResultKind::DuplicatePath]
        );
        assert!(report.results[0].detail.contains("no declared digest"));
        assert!(report.results[1].detail.contains("line 2"));
    }

    #[test]
    fn test_reused_reconciler_rereads_changed_files() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.tif"), b"").unwrap();
        let config = csv_config(temp.path());
        let manifest = manifest(
            &format!("BATES,PATH,MD5SUM\nA1,a.tif,{}\n", EMPTY_MD5),
            &config.columns,
        );
        let scanner = MediaScanner::new(&config);
        let reconciler = Reconciler::new(config);

        let first = reconciler
            .reconcile_scan(&manifest, scanner.scan(temp.path()).unwrap())
            .unwrap();
        assert_eq!(kinds(&first), vec![ResultKind::Match]);

        fs::write(temp.path().join("a.tif"), b"tampered").unwrap();
        let second = reconciler
            .reconcile_scan(&manifest, scanner.scan(temp.path()).unwrap())
            .unwrap();
        assert_eq!(kinds(&second), vec![ResultKind::HashMismatch]);
        assert_eq!(second.results[0].discovered_file().unwrap().size_bytes, 8);
    }

    #[test]
    fn test_duplicate_warnings_agree_with_results() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("p1.tif"), b"").unwrap();
        fs::write(temp.path().join("p2.tif"), b"").unwrap();

        let report = disk_report(temp.path(), "BATES,PATH,MD5SUM\nA,p1.tif,\nA,p2.tif,\nB,p2.tif,\n");

        assert_eq!(
            kinds(&report),
            vec![
                ResultKind::Match,
                ResultKind::DuplicateIdentifier,
                ResultKind::Match,
            ]
        );
        let warned: Vec<(WarningKind, Option<u64>)> =
            report.warnings.iter().map(|w| (w.kind, w.line)).collect();
        assert_eq!(warned, vec![(WarningKind::DuplicateIdentifier, Some(3))]);
    }

    #[test]
    fn test_unreadable_file_is_missing_with_warning() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.tif"), b"x").unwrap();
        let config = csv_config(temp.path());
        let manifest = manifest(
            &format!("BATES,PATH,MD5SUM\nA1,a.tif,{}\n", EMPTY_MD5),
            &config.columns,
        );
        let scan = MediaScanner::new(&config).scan(temp.path()).unwrap();
        fs::remove_file(temp.path().join("a.tif")).unwrap();

        let report = Reconciler::new(config).reconcile_scan(&manifest, scan).unwrap();
        assert_eq!(kinds(&report), vec![ResultKind::MissingOnDisk]);
        assert!(report.results[0].detail.starts_with("unreadable:"));
        assert!(report.results[0].discovered_file().is_some());
        assert_eq!(report.warnings[0].kind, WarningKind::Io);
    }

    #[test]
    fn test_cancelled_run_is_incomplete() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.tif"), b"").unwrap();
        fs::write(temp.path().join("orphan.tif"), b"").unwrap();
        let config = csv_config(temp.path());
        let manifest = manifest(
            &format!("BATES,PATH,MD5SUM\nA1,a.tif,{}\nB1,b.tif,\n", EMPTY_MD5),
            &config.columns,
        );
        let scan = MediaScanner::new(&config).scan(temp.path()).unwrap();

        let report = Reconciler::new(config)
            .with_cancel(Arc::new(AtomicBool::new(true)))
            .reconcile_scan(&manifest, scan)
            .unwrap();

        assert!(!report.complete);
        assert_eq!(report.unverified, vec!["A1".to_string()]);
        assert_eq!(
            kinds(&report),
            vec![ResultKind::MissingOnDisk, ResultKind::MissingInManifest]
        );
    }

    #[test]
    fn test_progress_reports_every_job() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.tif"), b"").unwrap();
        fs::write(temp.path().join("b.tif"), b"").unwrap();
        let config = csv_config(temp.path());
        let manifest = manifest(
            &format!("BATES,PATH,MD5SUM\nA,a.tif,{0}\nB,b.tif,{0}\n", EMPTY_MD5),
            &config.columns,
        );
        let scan = MediaScanner::new(&config).scan(temp.path()).unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let report = Reconciler::new(config)
            .with_progress(Arc::new(move |_, total| {
                assert_eq!(total, 2);
                seen.fetch_add(1, Ordering::SeqCst);
            }))
            .reconcile_scan(&manifest, scan)
            .unwrap();

        assert!(!report.has_discrepancies());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_selected_algorithms_filter_declared() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.tif"), b"").unwrap();
        let mut config = csv_config(temp.path());
        config.hash_algorithms = vec!["sha1".to_string()];
        config.columns.hashes.push(HashColumn {
            algorithm: "sha1".to_string(),
            column: "SHA1".to_string(),
        });
        let manifest = manifest(
            "BATES,PATH,MD5SUM,SHA1\nA1,a.tif,ffffffffffffffffffffffffffffffff,da39a3ee5e6b4b0d3255bfef95601890afd80709\n",
            &config.columns,
        );
        let scan = MediaScanner::new(&config).scan(temp.path()).unwrap();

        let report = Reconciler::new(config).reconcile_scan(&manifest, scan).unwrap();
        assert_eq!(kinds(&report), vec![ResultKind::Match]);
        assert_eq!(report.results[0].detail, "verified SHA1");
    }

    #[test]
    fn test_manifest_vs_manifest() {
        let mapping = ColumnMapping::default();
        let left = manifest(
            &format!(
                "BATES,PATH,MD5SUM\nA1,a.tif,{0}\nA2,b.tif,{0}\nA3,c.tif,\nA4,d.tif,{0}\n",
                EMPTY_MD5
            ),
            &mapping,
        );
        let right = manifest(
            &format!(
                "BATES,PATH,MD5SUM,TITLE\nA2,moved/b.tif,ffffffffffffffffffffffffffffffff,\nA1,a.tif,{0},\nA3,c.tif,{0},\nZ9,z.tif,{0},\n",
                EMPTY_MD5
            ),
            &mapping,
        );

        let report = Reconciler::new(RunConfig::default())
            .reconcile_manifests(&left, &right)
            .unwrap();

        assert_eq!(
            kinds(&report),
            vec![
                ResultKind::Match,
                ResultKind::HashMismatch,
                ResultKind::HashMismatch,
                ResultKind::MissingOnDisk,
                ResultKind::MissingInManifest,
            ]
        );
        assert_eq!(report.results[2].detail, "no comparable algorithm");
        assert_eq!(report.results[4].counterpart.as_ref().unwrap().label(), "Z9");
        assert_eq!(
            report.header_diff.as_ref().unwrap().right_only,
            vec!["TITLE".to_string()]
        );
    }

    #[test]
    fn test_manifest_path_fallback_without_identifiers() {
        let left = manifest(
            &format!("BATES,PATH,MD5SUM\nA1,x/a.tif,{}\n", EMPTY_MD5),
            &ColumnMapping::default(),
        );
        let right_mapping = ColumnMapping {
            identifier: None,
            ..ColumnMapping::default()
        };
        let right = manifest(
            &format!("PATH,MD5SUM\nx\\a.tif,{}\n", EMPTY_MD5),
            &right_mapping,
        );

        let report = Reconciler::new(RunConfig::default())
            .reconcile_manifests(&left, &right)
            .unwrap();
        assert_eq!(kinds(&report), vec![ResultKind::Match]);
    }

    #[test]
    fn test_identifier_match_beats_path_match() {
        let mapping = ColumnMapping::default();
        let left = manifest(
            &format!("BATES,PATH,MD5SUM\nA1,a.tif,{0}\nA2,b.tif,{0}\n", EMPTY_MD5),
            &mapping,
        );
        let right = manifest(
            &format!(
                "BATES,PATH,MD5SUM\nA2,a.tif,{0}\nA1,c.tif,{0}\n",
                EMPTY_MD5
            ),
            &mapping,
        );

        let report = Reconciler::new(RunConfig::default())
            .reconcile_manifests(&left, &right)
            .unwrap();

        assert_eq!(kinds(&report), vec![ResultKind::Match, ResultKind::Match]);
        assert_eq!(
            report.results[0].counterpart.as_ref().unwrap().relative_path(),
            "c.tif"
        );
    }

    #[test]
    fn test_right_side_duplicates_are_reported() {
        let mapping = ColumnMapping::default();
        let left = manifest(
            &format!("BATES,PATH,MD5SUM\nA1,a.tif,{}\n", EMPTY_MD5),
            &mapping,
        );
        let right = manifest(
            &format!("BATES,PATH,MD5SUM\nA1,a.tif,{0}\nA1,b.tif,{0}\n", EMPTY_MD5),
            &mapping,
        );

        let report = Reconciler::new(RunConfig::default())
            .reconcile_manifests(&left, &right)
            .unwrap();

        assert_eq!(
            kinds(&report),
            vec![ResultKind::Match, ResultKind::DuplicateIdentifier]
        );
        assert!(report.results[1].manifest_entry.is_none());
    }
}
