pub mod digest_cache;
pub mod hash_engine;
pub mod inventory;
pub mod manifest;
pub mod manifest_parser;
pub mod reconcile;
pub mod report;
pub mod scanner;

pub use digest_cache::DigestCache;
pub use hash_engine::{is_valid_digest, normalize_digest, HashEngine};
pub use inventory::{
    ColumnInventory, FileDigestComparison, HeaderDiff, InventoryDiff, ValueInventory,
    ValueInventoryDiff,
};
pub use manifest::{normalize_relative_path, Manifest, PathRejection};
pub use manifest_parser::{ParsedManifest, RawRecord};
pub use reconcile::{ComputedDigests, DeclaredDigests, DigestSource, ProgressCallback, Reconciler};
pub use report::{summarize, DiffReport, Summary};
pub use scanner::{MediaScanner, ScanOutcome};
