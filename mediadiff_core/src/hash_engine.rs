use mediadiff_common::{DigestSet, HashAlgorithm, MediaDiffError};
use md5::{Digest, Md5};
use sha1::Sha1;
use sha2::{Sha256, Sha512};
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

const BUFFER_SIZE: usize = 64 * 1024;

/// Running state of one digest algorithm
enum RunningDigest {
    Md5(Md5),
    Sha1(Sha1),
    Sha256(Sha256),
    Sha512(Sha512),
    Blake3(Box<blake3::Hasher>),
}

impl RunningDigest {
    fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Md5 => RunningDigest::Md5(Md5::new()),
            HashAlgorithm::Sha1 => RunningDigest::Sha1(Sha1::new()),
            HashAlgorithm::Sha256 => RunningDigest::Sha256(Sha256::new()),
            HashAlgorithm::Sha512 => RunningDigest::Sha512(Sha512::new()),
            HashAlgorithm::Blake3 => RunningDigest::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            RunningDigest::Md5(h) => Digest::update(h, data),
            RunningDigest::Sha1(h) => Digest::update(h, data),
            RunningDigest::Sha256(h) => Digest::update(h, data),
            RunningDigest::Sha512(h) => Digest::update(h, data),
            RunningDigest::Blake3(h) => {
                h.update(data);
            }
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            RunningDigest::Md5(h) => hex::encode(h.finalize()),
            RunningDigest::Sha1(h) => hex::encode(h.finalize()),
            RunningDigest::Sha256(h) => hex::encode(h.finalize()),
            RunningDigest::Sha512(h) => hex::encode(h.finalize()),
            RunningDigest::Blake3(h) => h.finalize().to_hex().to_string(),
        }
    }
}

/// Streaming multi-digest hasher.
///
/// Every requested algorithm is fed from the same read buffer, so a file is
/// read exactly once however many digests are asked for.
#[derive(Debug, Clone)]
pub struct HashEngine {
    buffer_size: usize,
}

impl Default for HashEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl HashEngine {
    pub fn new() -> Self {
        Self {
            buffer_size: BUFFER_SIZE,
        }
    }

    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
        }
    }

    /// Resolve algorithm names and hash a file in one pass
    pub fn compute_named(
        &self,
        path: &Path,
        algorithms: &[&str],
    ) -> Result<DigestSet, MediaDiffError> {
        let resolved = algorithms
            .iter()
            .map(|name| name.parse::<HashAlgorithm>())
            .collect::<Result<Vec<_>, _>>()?;
        self.compute(path, &resolved)
    }

    /// Hash a file with every requested algorithm in one pass
    pub fn compute(
        &self,
        path: &Path,
        algorithms: &[HashAlgorithm],
    ) -> Result<DigestSet, MediaDiffError> {
        let file = File::open(path).map_err(|e| MediaDiffError::io(path, e))?;
        self.compute_reader(file, algorithms)
            .map_err(|e| MediaDiffError::io(path, e))
    }

    /// Hash any reader with every requested algorithm in one pass
    pub fn compute_reader<R: Read>(
        &self,
        mut reader: R,
        algorithms: &[HashAlgorithm],
    ) -> std::io::Result<DigestSet> {
        let mut running: Vec<(HashAlgorithm, RunningDigest)> = Vec::with_capacity(algorithms.len());
        for &algorithm in algorithms {
            if running.iter().all(|(a, _)| *a != algorithm) {
                running.push((algorithm, RunningDigest::new(algorithm)));
            }
        }

        let mut buffer = vec![0u8; self.buffer_size];
        loop {
            let n = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            for (_, digest) in running.iter_mut() {
                digest.update(&buffer[..n]);
            }
        }

        Ok(running
            .into_iter()
            .map(|(algorithm, digest)| (algorithm, digest.finalize_hex()))
            .collect())
    }
}

/// Whether `text` has the width and alphabet of an `algorithm` hex digest
pub fn is_valid_digest(algorithm: HashAlgorithm, text: &str) -> bool {
    text.len() == algorithm.hex_len() && text.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Lowercase, trimmed form used for every digest comparison
pub fn normalize_digest(text: &str) -> String {
    text.trim().to_ascii_lowercase()
}
