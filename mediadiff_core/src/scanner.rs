use ignore::gitignore::{Gitignore, GitignoreBuilder};
use jwalk::WalkDir;
use mediadiff_common::{DiscoveredFile, MediaDiffError, RunConfig, Warning, WarningKind};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// Files found under a media root plus the entries that could not be read
#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    pub files: Vec<DiscoveredFile>,
    pub warnings: Vec<Warning>,
}

/// Parallel media tree scanner using jwalk
pub struct MediaScanner {
    follow_symlinks: bool,
    ignore: Option<Gitignore>,
}

impl MediaScanner {
    pub fn new(config: &RunConfig) -> Self {
        Self {
            follow_symlinks: config.follow_symlinks,
            ignore: Self::build_ignore(&config.ignore_patterns),
        }
    }

    fn build_ignore(patterns: &[String]) -> Option<Gitignore> {
        if patterns.is_empty() {
            return None;
        }

        let mut builder = GitignoreBuilder::new("");
        for pattern in patterns {
            if let Err(err) = builder.add_line(None, pattern) {
                warn!("Skipping ignore pattern '{}': {}", pattern, err);
            }
        }

        match builder.build() {
            Ok(ignore) => Some(ignore),
            Err(e) => {
                warn!("Failed to build ignore patterns: {}", e);
                None
            }
        }
    }

    /// Enumerate every regular file under `root`
    pub fn scan(&self, root: &Path) -> Result<ScanOutcome, MediaDiffError> {
        self.scan_with_cancel(root, None)
    }

    /// Enumerate every regular file under `root`, stopping when `cancel` is set.
    ///
    /// Paths are relative to `root` and use `/` separators. Entries that
    /// cannot be read become warnings; only an unreadable root is fatal.
    pub fn scan_with_cancel(
        &self,
        root: &Path,
        cancel: Option<&AtomicBool>,
    ) -> Result<ScanOutcome, MediaDiffError> {
        let metadata = fs::metadata(root).map_err(|e| MediaDiffError::io(root, e))?;
        if !metadata.is_dir() {
            return Err(MediaDiffError::io(
                root,
                io::Error::new(io::ErrorKind::InvalidInput, "media root is not a directory"),
            ));
        }

        let mut outcome = ScanOutcome::default();
        let walker = WalkDir::new(root)
            .follow_links(self.follow_symlinks)
            .skip_hidden(false)
            .sort(true);

        for entry in walker {
            if cancel.map_or(false, |flag| flag.load(Ordering::Relaxed)) {
                return Err(MediaDiffError::Cancelled);
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Walk error under {:?}: {}", root, e);
                    let mut warning = Warning::new(WarningKind::Io, e.to_string());
                    if let Some(path) = e.path() {
                        warning = warning.with_path(path.to_string_lossy());
                    }
                    outcome.warnings.push(warning);
                    continue;
                }
            };

            let path = entry.path();
            let Ok(relative) = path.strip_prefix(root) else {
                continue;
            };
            if relative.as_os_str().is_empty() {
                continue;
            }

            let file_type = entry.file_type();
            if self.is_ignored(relative, file_type.is_dir()) {
                continue;
            }

            let relative_path = to_forward_slashes(relative);
            let metadata = if file_type.is_file() {
                entry.metadata().map_err(|e| e.to_string())
            } else if file_type.is_symlink() && self.follow_symlinks {
                // Links the walker left unresolved, dangling ones included
                fs::metadata(&path).map_err(|e| e.to_string())
            } else {
                continue;
            };

            match metadata {
                Ok(metadata) if metadata.is_file() => outcome
                    .files
                    .push(DiscoveredFile::new(relative_path, metadata.len())),
                Ok(_) => {}
                Err(e) => {
                    warn!("Cannot stat {}: {}", relative_path, e);
                    outcome
                        .warnings
                        .push(Warning::new(WarningKind::Io, e).with_path(relative_path));
                }
            }
        }

        debug!(
            "Scanned {} files from {:?} ({} warnings)",
            outcome.files.len(),
            root,
            outcome.warnings.len()
        );
        Ok(outcome)
    }

    /// Check a path and all of its parent directories against the ignore patterns
    fn is_ignored(&self, path: &Path, is_dir: bool) -> bool {
        let Some(ignore) = &self.ignore else {
            return false;
        };

        if ignore.matched(path, is_dir).is_ignore() {
            return true;
        }
        path.ancestors()
            .skip(1)
            .filter(|parent| !parent.as_os_str().is_empty())
            .any(|parent| ignore.matched(parent, true).is_ignore())
    }
}

fn to_forward_slashes(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
