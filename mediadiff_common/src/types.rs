use crate::{MediaDiffError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Digest algorithms the hash engine can compute
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum HashAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha512,
    Blake3,
}

impl HashAlgorithm {
    pub const ALL: [HashAlgorithm; 5] = [
        HashAlgorithm::Md5,
        HashAlgorithm::Sha1,
        HashAlgorithm::Sha256,
        HashAlgorithm::Sha512,
        HashAlgorithm::Blake3,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::Md5 => "MD5",
            HashAlgorithm::Sha1 => "SHA1",
            HashAlgorithm::Sha256 => "SHA256",
            HashAlgorithm::Sha512 => "SHA512",
            HashAlgorithm::Blake3 => "BLAKE3",
        }
    }

    /// Width of the lowercase hex digest
    pub fn hex_len(&self) -> usize {
        match self {
            HashAlgorithm::Md5 => 32,
            HashAlgorithm::Sha1 => 40,
            HashAlgorithm::Sha256 => 64,
            HashAlgorithm::Sha512 => 128,
            HashAlgorithm::Blake3 => 64,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = MediaDiffError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_lowercase();

        match normalized.as_str() {
            "md5" => Ok(HashAlgorithm::Md5),
            "sha1" => Ok(HashAlgorithm::Sha1),
            "sha256" => Ok(HashAlgorithm::Sha256),
            "sha512" => Ok(HashAlgorithm::Sha512),
            "blake3" => Ok(HashAlgorithm::Blake3),
            _ => Err(MediaDiffError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

impl TryFrom<String> for HashAlgorithm {
    type Error = MediaDiffError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<HashAlgorithm> for String {
    fn from(value: HashAlgorithm) -> Self {
        value.name().to_string()
    }
}

/// Algorithm to lowercase hex digest
pub type DigestSet = BTreeMap<HashAlgorithm, String>;

/// One record of a load file after normalization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub identifier: String,
    /// Forward-slash path relative to the media root
    pub relative_path: String,
    pub declared_hashes: DigestSet,
    pub extra_fields: BTreeMap<String, String>,
    /// 1-based line of the record in its load file
    pub line: u64,
}

/// A regular file found under the media root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredFile {
    pub relative_path: String,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub computed_hashes: DigestSet,
}

impl DiscoveredFile {
    pub fn new(relative_path: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            relative_path: relative_path.into(),
            size_bytes,
            computed_hashes: DigestSet::new(),
        }
    }
}

/// The right-hand side of a reconciled pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum Counterpart {
    File(DiscoveredFile),
    Entry(ManifestEntry),
}

impl Counterpart {
    pub fn relative_path(&self) -> &str {
        match self {
            Counterpart::File(file) => &file.relative_path,
            Counterpart::Entry(entry) => &entry.relative_path,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Counterpart::File(file) => &file.relative_path,
            Counterpart::Entry(entry) => &entry.identifier,
        }
    }
}

/// Classification of a reconciled pair or orphan
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultKind {
    Match,
    HashMismatch,
    MissingOnDisk,
    MissingInManifest,
    DuplicateIdentifier,
    DuplicatePath,
}

impl ResultKind {
    pub const ALL: [ResultKind; 6] = [
        ResultKind::Match,
        ResultKind::HashMismatch,
        ResultKind::MissingOnDisk,
        ResultKind::MissingInManifest,
        ResultKind::DuplicateIdentifier,
        ResultKind::DuplicatePath,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResultKind::Match => "MATCH",
            ResultKind::HashMismatch => "HASH_MISMATCH",
            ResultKind::MissingOnDisk => "MISSING_ON_DISK",
            ResultKind::MissingInManifest => "MISSING_IN_MANIFEST",
            ResultKind::DuplicateIdentifier => "DUPLICATE_IDENTIFIER",
            ResultKind::DuplicatePath => "DUPLICATE_PATH",
        }
    }
}

impl fmt::Display for ResultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the diff report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub kind: ResultKind,
    /// Absent only for right-hand orphans
    pub manifest_entry: Option<ManifestEntry>,
    /// Discovered file (disk mode) or right-hand entry (manifest mode)
    pub counterpart: Option<Counterpart>,
    pub detail: String,
}

impl ComparisonResult {
    pub fn discovered_file(&self) -> Option<&DiscoveredFile> {
        match &self.counterpart {
            Some(Counterpart::File(file)) => Some(file),
            _ => None,
        }
    }

    /// Path used when rendering the row
    pub fn display_path(&self) -> &str {
        self.manifest_entry
            .as_ref()
            .map(|e| e.relative_path.as_str())
            .or_else(|| self.counterpart.as_ref().map(|c| c.relative_path()))
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    Io,
    MalformedRecord,
    InvalidPath,
    MissingField,
    DuplicateIdentifier,
    DuplicatePath,
    InvalidDigest,
}

/// A recoverable problem collected during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub kind: WarningKind,
    pub line: Option<u64>,
    pub path: Option<String>,
    pub message: String,
}

impl Warning {
    pub fn new(kind: WarningKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            line: None,
            path: None,
            message: message.into(),
        }
    }

    pub fn at_line(mut self, line: u64) -> Self {
        self.line = Some(line);
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(line) = self.line {
            write!(f, "line {}: ", line)?;
        }
        if let Some(path) = &self.path {
            write!(f, "{}: ", path)?;
        }
        f.write_str(&self.message)
    }
}

/// Which right-hand side a run reconciles against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinMode {
    #[default]
    Disk,
    Manifest,
}

/// Syntactic parameters of one delimited-text format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dialect {
    pub delimiter: char,
    pub quote_char: char,
    pub has_header: bool,
    pub encoding: String,
    /// Column names used when the load file has no header row
    pub positional_columns: Vec<String>,
    pub lenient: bool,
}

impl Default for Dialect {
    fn default() -> Self {
        Self {
            delimiter: CONCORDANCE_DELIMITER,
            quote_char: CONCORDANCE_QUOTE,
            has_header: true,
            encoding: "utf-8".to_string(),
            positional_columns: Vec::new(),
            lenient: false,
        }
    }
}

/// Concordance DAT field separator (DC4)
pub const CONCORDANCE_DELIMITER: char = '\u{14}';
/// Concordance DAT text qualifier (thorn)
pub const CONCORDANCE_QUOTE: char = '\u{fe}';

/// Load file column carrying a digest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashColumn {
    pub algorithm: String,
    pub column: String,
}

/// Maps semantic fields onto load file column names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    /// When unset the normalized path doubles as the identifier
    #[serde(default)]
    pub identifier: Option<String>,

    pub relative_path: String,

    #[serde(default)]
    pub hashes: Vec<HashColumn>,
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self {
            identifier: Some("BATES".to_string()),
            relative_path: "PATH".to_string(),
            hashes: vec![HashColumn {
                algorithm: "MD5".to_string(),
                column: "MD5SUM".to_string(),
            }],
        }
    }
}

impl ColumnMapping {
    /// Resolve hash columns against the algorithm registry.
    ///
    /// Two columns declaring the same algorithm are rejected: there is no
    /// defined way to reconcile them.
    pub fn resolved_hash_columns(&self) -> Result<Vec<(HashAlgorithm, String)>> {
        let mut seen = BTreeSet::new();
        let mut resolved = Vec::with_capacity(self.hashes.len());

        for hash_column in &self.hashes {
            let algorithm: HashAlgorithm = hash_column.algorithm.parse()?;
            if !seen.insert(algorithm) {
                return Err(MediaDiffError::Config(format!(
                    "{} is mapped to more than one column",
                    algorithm
                )));
            }
            resolved.push((algorithm, hash_column.column.clone()));
        }

        Ok(resolved)
    }
}

/// Resolved configuration for one comparison run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default = "default_delimiter")]
    pub delimiter: char,

    #[serde(default = "default_quote")]
    pub quote_char: char,

    #[serde(default = "default_true")]
    pub has_header: bool,

    #[serde(default = "default_encoding")]
    pub encoding: String,

    /// Column names for header-less load files
    #[serde(default)]
    pub positional_columns: Vec<String>,

    /// Algorithms to verify; empty means every declared algorithm
    #[serde(default)]
    pub hash_algorithms: Vec<String>,

    #[serde(default)]
    pub media_root: PathBuf,

    #[serde(default)]
    pub lenient_parsing: bool,

    #[serde(default)]
    pub follow_symlinks: bool,

    /// Hashing workers; 0 uses the available parallelism
    #[serde(default)]
    pub concurrency: usize,

    #[serde(default)]
    pub join_mode: JoinMode,

    #[serde(default)]
    pub columns: ColumnMapping,

    /// Gitignore-style patterns excluded from the media scan
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
}

fn default_delimiter() -> char {
    CONCORDANCE_DELIMITER
}

fn default_quote() -> char {
    CONCORDANCE_QUOTE
}

fn default_true() -> bool {
    true
}

fn default_encoding() -> String {
    "utf-8".to_string()
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            delimiter: default_delimiter(),
            quote_char: default_quote(),
            has_header: true,
            encoding: default_encoding(),
            positional_columns: Vec::new(),
            hash_algorithms: Vec::new(),
            media_root: PathBuf::new(),
            lenient_parsing: false,
            follow_symlinks: false,
            concurrency: 0,
            join_mode: JoinMode::default(),
            columns: ColumnMapping::default(),
            ignore_patterns: Vec::new(),
        }
    }
}

pub const MAX_CONCURRENCY: usize = 1024;

impl RunConfig {
    pub fn dialect(&self) -> Dialect {
        Dialect {
            delimiter: self.delimiter,
            quote_char: self.quote_char,
            has_header: self.has_header,
            encoding: self.encoding.clone(),
            positional_columns: self.positional_columns.clone(),
            lenient: self.lenient_parsing,
        }
    }

    /// Algorithms selected for verification, in configured order
    pub fn algorithms(&self) -> Result<Vec<HashAlgorithm>> {
        let mut algorithms = Vec::with_capacity(self.hash_algorithms.len());
        for name in &self.hash_algorithms {
            let algorithm: HashAlgorithm = name.parse()?;
            if !algorithms.contains(&algorithm) {
                algorithms.push(algorithm);
            }
        }
        Ok(algorithms)
    }

    /// Worker count after resolving the 0 default
    pub fn worker_count(&self) -> usize {
        if self.concurrency > 0 {
            return self.concurrency;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    /// Reject configuration defects before any file is touched
    pub fn validate(&self) -> Result<()> {
        self.algorithms()?;
        self.columns.resolved_hash_columns()?;

        if self.delimiter == self.quote_char {
            return Err(MediaDiffError::Config(
                "delimiter and quote character must differ".to_string(),
            ));
        }
        if matches!(self.delimiter, '\n' | '\r') || matches!(self.quote_char, '\n' | '\r') {
            return Err(MediaDiffError::Config(
                "line terminators cannot be used as delimiter or quote".to_string(),
            ));
        }
        if self.columns.relative_path.trim().is_empty() {
            return Err(MediaDiffError::Config(
                "a relative path column must be mapped".to_string(),
            ));
        }
        if !self.has_header && self.positional_columns.is_empty() {
            return Err(MediaDiffError::Config(
                "positional column names are required when the load file has no header"
                    .to_string(),
            ));
        }
        if self.concurrency > MAX_CONCURRENCY {
            return Err(MediaDiffError::Config(format!(
                "concurrency {} exceeds the maximum of {}",
                self.concurrency, MAX_CONCURRENCY
            )));
        }

        Ok(())
    }
}
