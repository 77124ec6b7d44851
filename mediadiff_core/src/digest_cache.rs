use mediadiff_common::{DigestSet, HashAlgorithm};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

/// Run-scoped digest cache keyed by relative path.
///
/// A file referenced by several entries is read once. Nothing is persisted:
/// the cache lives only as long as one reconciliation.
#[derive(Debug, Default)]
pub struct DigestCache {
    entries: RwLock<HashMap<String, DigestSet>>,
}

impl DigestCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached digests for `path`, if every algorithm in `algorithms` is present
    pub fn get(&self, path: &str, algorithms: &[HashAlgorithm]) -> Option<DigestSet> {
        let entries = self.entries.read().ok()?;
        let cached = entries.get(path)?;
        if algorithms.iter().all(|a| cached.contains_key(a)) {
            Some(
                algorithms
                    .iter()
                    .filter_map(|a| cached.get(a).map(|d| (*a, d.clone())))
                    .collect(),
            )
        } else {
            None
        }
    }

    /// Store digests for `path`. A digest already cached for an algorithm is kept.
    pub fn put(&self, path: &str, digests: &DigestSet) {
        if let Ok(mut entries) = self.entries.write() {
            let cached = entries.entry(path.to_string()).or_default();
            for (algorithm, digest) in digests {
                cached
                    .entry(*algorithm)
                    .or_insert_with(|| digest.clone());
            }
        }
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            debug!("Clearing {} cached digest sets", entries.len());
            entries.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digests(pairs: &[(HashAlgorithm, &str)]) -> DigestSet {
        pairs.iter().map(|(a, d)| (*a, d.to_string())).collect()
    }

    #[test]
    fn test_digest_cache_basic() {
        let cache = DigestCache::new();
        assert!(cache.get("a.tif", &[HashAlgorithm::Md5]).is_none());

        cache.put("a.tif", &digests(&[(HashAlgorithm::Md5, "aa")]));
        assert_eq!(
            cache.get("a.tif", &[HashAlgorithm::Md5]),
            Some(digests(&[(HashAlgorithm::Md5, "aa")]))
        );
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_digest_cache_requires_every_algorithm() {
        let cache = DigestCache::new();
        cache.put("a.tif", &digests(&[(HashAlgorithm::Md5, "aa")]));
        assert!(cache
            .get("a.tif", &[HashAlgorithm::Md5, HashAlgorithm::Sha1])
            .is_none());

        cache.put("a.tif", &digests(&[(HashAlgorithm::Sha1, "bb")]));
        let both = cache
            .get("a.tif", &[HashAlgorithm::Md5, HashAlgorithm::Sha1])
            .unwrap();
        assert_eq!(both.len(), 2);
    }

    #[test]
    fn test_digest_cache_first_value_wins() {
        let cache = DigestCache::new();
        cache.put("a.tif", &digests(&[(HashAlgorithm::Md5, "aa")]));
        cache.put("a.tif", &digests(&[(HashAlgorithm::Md5, "zz")]));
        assert_eq!(cache.get("a.tif", &[HashAlgorithm::Md5]).unwrap()[&HashAlgorithm::Md5], "aa");

        cache.clear();
        assert!(cache.is_empty());
    }
}
