use crate::hash_engine::{is_valid_digest, normalize_digest};
use crate::manifest_parser::{self, ParsedManifest, RawRecord};
use mediadiff_common::{
    ColumnMapping, DigestSet, HashAlgorithm, ManifestEntry, MediaDiffError, RunConfig, Warning,
    WarningKind,
};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Why a load file path could not be normalized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathRejection {
    Empty,
    EscapesRoot,
    OutsideMediaRoot,
}

impl fmt::Display for PathRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathRejection::Empty => f.write_str("path is empty after normalization"),
            PathRejection::EscapesRoot => f.write_str("path escapes the media root"),
            PathRejection::OutsideMediaRoot => {
                f.write_str("absolute path is not under the media root")
            }
        }
    }
}

/// Normalize a load file path to a forward-slash path relative to the media root.
///
/// Backslashes become `/`, `.` segments are dropped and `..` segments are
/// resolved. Absolute paths are accepted only when they lie under
/// `media_root`, in which case the root prefix is stripped.
pub fn normalize_relative_path(raw: &str, media_root: &Path) -> Result<String, PathRejection> {
    let mut path = raw.trim().replace('\\', "/");

    if is_absolute(&path) {
        let root = media_root.to_string_lossy().replace('\\', "/");
        let root = root.trim_end_matches('/');
        if root.is_empty() {
            return Err(PathRejection::OutsideMediaRoot);
        }
        path = match path.strip_prefix(root) {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => rest.to_string(),
            _ => return Err(PathRejection::OutsideMediaRoot),
        };
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(PathRejection::EscapesRoot);
                }
            }
            other => segments.push(other),
        }
    }

    if segments.is_empty() {
        return Err(PathRejection::Empty);
    }
    Ok(segments.join("/"))
}

fn is_absolute(path: &str) -> bool {
    let bytes = path.as_bytes();
    path.starts_with('/')
        || (bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':')
}

/// Normalized entries of one load file
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    pub source: Option<PathBuf>,
    pub header: Vec<String>,
    pub entries: Vec<ManifestEntry>,
    pub warnings: Vec<Warning>,
    /// False when the identifier is derived from the path
    pub identifiers_declared: bool,
}

impl Manifest {
    /// Read, parse and normalize a load file
    pub fn load(path: &Path, config: &RunConfig) -> Result<Manifest, MediaDiffError> {
        let parsed = manifest_parser::parse_file(path, &config.dialect())?;
        let mut manifest = Manifest::from_parsed(parsed, &config.columns, &config.media_root)?;
        manifest.source = Some(path.to_path_buf());
        info!(
            "Loaded {} entries from {:?} ({} warnings)",
            manifest.entries.len(),
            path,
            manifest.warnings.len()
        );
        Ok(manifest)
    }

    /// Normalize a parsed load file, keeping the parser's warnings
    pub fn from_parsed(
        parsed: ParsedManifest,
        mapping: &ColumnMapping,
        media_root: &Path,
    ) -> Result<Manifest, MediaDiffError> {
        let ParsedManifest {
            header,
            records,
            warnings,
        } = parsed;
        let mut manifest = Manifest::build(header, &records, mapping, media_root)?;
        let mut all_warnings = warnings;
        all_warnings.append(&mut manifest.warnings);
        manifest.warnings = all_warnings;
        Ok(manifest)
    }

    /// Turn raw records into typed entries according to `mapping`
    pub fn build(
        header: Vec<String>,
        records: &[RawRecord],
        mapping: &ColumnMapping,
        media_root: &Path,
    ) -> Result<Manifest, MediaDiffError> {
        let hash_columns = mapping.resolved_hash_columns()?;

        let mut mapped: Vec<&str> = vec![mapping.relative_path.as_str()];
        if let Some(identifier) = &mapping.identifier {
            mapped.push(identifier);
        }
        mapped.extend(hash_columns.iter().map(|(_, column)| column.as_str()));
        for column in &mapped {
            match header.iter().filter(|h| h == column).count() {
                0 => return Err(MediaDiffError::MissingColumn(column.to_string())),
                1 => {}
                n => {
                    return Err(MediaDiffError::Config(format!(
                        "column {} appears {} times in the header",
                        column, n
                    )))
                }
            }
        }

        let identifiers_declared = mapping.identifier.is_some();
        let mut entries = Vec::with_capacity(records.len());
        let mut warnings = Vec::new();
        let mut seen_identifiers: HashMap<String, u64> = HashMap::new();
        let mut seen_paths: HashMap<String, u64> = HashMap::new();

        for record in records {
            let Some(entry) = build_entry(
                record,
                mapping,
                &hash_columns,
                &mapped,
                media_root,
                &mut warnings,
            ) else {
                continue;
            };

            // Only first-seen entries claim an identifier or path, as in reconciliation
            let duplicate = match seen_identifiers
                .get(&entry.identifier)
                .filter(|_| identifiers_declared)
            {
                Some(first) => Some(
                    Warning::new(
                        WarningKind::DuplicateIdentifier,
                        format!(
                            "identifier {} already declared at line {}",
                            entry.identifier, first
                        ),
                    )
                    .at_line(entry.line)
                    .with_path(entry.relative_path.clone()),
                ),
                None => seen_paths
                    .get(&entry.relative_path)
                    .map(|first| duplicate_path_warning(&entry, *first)),
            };

            match duplicate {
                Some(warning) => warnings.push(warning),
                None => {
                    seen_identifiers.insert(entry.identifier.clone(), entry.line);
                    seen_paths.insert(entry.relative_path.clone(), entry.line);
                }
            }
            entries.push(entry);
        }

        debug!(
            "Built {} entries from {} records",
            entries.len(),
            records.len()
        );

        Ok(Manifest {
            source: None,
            header,
            entries,
            warnings,
            identifiers_declared,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn duplicate_path_warning(entry: &ManifestEntry, first: u64) -> Warning {
    Warning::new(
        WarningKind::DuplicatePath,
        format!("path already declared at line {}", first),
    )
    .at_line(entry.line)
    .with_path(entry.relative_path.clone())
}

fn build_entry(
    record: &RawRecord,
    mapping: &ColumnMapping,
    hash_columns: &[(HashAlgorithm, String)],
    mapped: &[&str],
    media_root: &Path,
    warnings: &mut Vec<Warning>,
) -> Option<ManifestEntry> {
    let line = record.line;
    let raw_path = record.get(&mapping.relative_path).unwrap_or("").trim();
    if raw_path.is_empty() {
        warnings.push(missing_field(line, &mapping.relative_path));
        return None;
    }

    let relative_path = match normalize_relative_path(raw_path, media_root) {
        Ok(path) => path,
        Err(rejection) => {
            let err = MediaDiffError::InvalidPath {
                line,
                path: raw_path.to_string(),
                reason: rejection.to_string(),
            };
            warn!("{}", err);
            warnings.push(
                Warning::new(WarningKind::InvalidPath, err.to_string())
                    .at_line(line)
                    .with_path(raw_path),
            );
            return None;
        }
    };

    let identifier = match &mapping.identifier {
        Some(column) => {
            let value = record.get(column).unwrap_or("").trim();
            if value.is_empty() {
                warnings.push(missing_field(line, column));
                return None;
            }
            value.to_string()
        }
        None => relative_path.clone(),
    };

    let mut declared_hashes = DigestSet::new();
    for (algorithm, column) in hash_columns {
        let value = normalize_digest(record.get(column).unwrap_or(""));
        if value.is_empty() {
            continue;
        }
        if !is_valid_digest(*algorithm, &value) {
            warnings.push(
                Warning::new(
                    WarningKind::InvalidDigest,
                    format!("{} value {:?} in column {} is not a valid digest", algorithm, value, column),
                )
                .at_line(line)
                .with_path(relative_path.clone()),
            );
        }
        declared_hashes.insert(*algorithm, value);
    }

    let mut extra_fields: BTreeMap<String, String> = record
        .fields
        .iter()
        .filter(|(name, _)| !mapped.contains(&name.as_str()))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    for (index, value) in record.overflow.iter().enumerate() {
        extra_fields.insert(format!("_overflow_{}", index + 1), value.clone());
    }

    Some(ManifestEntry {
        identifier,
        relative_path,
        declared_hashes,
        extra_fields,
        line,
    })
}

fn missing_field(line: u64, column: &str) -> Warning {
    let err = MediaDiffError::MissingField {
        line,
        field: column.to_string(),
    };
    Warning::new(WarningKind::MissingField, err.to_string()).at_line(line)
}
