use crate::hash_engine::HashEngine;
use crate::manifest_parser::RawRecord;
use mediadiff_common::{HashAlgorithm, MediaDiffError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

/// Columns present in only one of two load file headers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderDiff {
    pub left_only: Vec<String>,
    pub right_only: Vec<String>,
}

impl HeaderDiff {
    pub fn between(left: &[String], right: &[String]) -> Self {
        Self {
            left_only: left.iter().filter(|c| !right.contains(c)).cloned().collect(),
            right_only: right.iter().filter(|c| !left.contains(c)).cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.left_only.is_empty() && self.right_only.is_empty()
    }
}

/// Populated-value count of one column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnCount {
    pub column: String,
    pub populated: usize,
}

/// How many records populate each column of a load file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInventory {
    pub rows: usize,
    /// In header order
    pub columns: Vec<ColumnCount>,
}

impl ColumnInventory {
    pub fn from_records(header: &[String], records: &[RawRecord]) -> Self {
        let columns = header
            .iter()
            .enumerate()
            .map(|(index, column)| ColumnCount {
                column: column.clone(),
                populated: records
                    .iter()
                    .filter(|r| {
                        r.fields
                            .get(index)
                            .map_or(false, |(_, value)| !value.trim().is_empty())
                    })
                    .count(),
            })
            .collect();

        Self {
            rows: records.len(),
            columns,
        }
    }

    pub fn populated(&self, column: &str) -> Option<usize> {
        self.columns
            .iter()
            .find(|c| c.column == column)
            .map(|c| c.populated)
    }
}

/// A column present on both sides whose populated counts disagree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountMismatch {
    pub column: String,
    pub left: usize,
    pub right: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryDiff {
    pub left_rows: usize,
    pub right_rows: usize,
    pub header: HeaderDiff,
    pub count_mismatches: Vec<CountMismatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<ValueInventoryDiff>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_digests: Option<FileDigestComparison>,
}

impl InventoryDiff {
    pub fn between(left: &ColumnInventory, right: &ColumnInventory) -> Self {
        let left_names: Vec<String> = left.columns.iter().map(|c| c.column.clone()).collect();
        let right_names: Vec<String> = right.columns.iter().map(|c| c.column.clone()).collect();

        let mut seen = BTreeSet::new();
        let count_mismatches = left
            .columns
            .iter()
            .filter(|c| seen.insert(c.column.as_str()))
            .filter_map(|c| {
                let other = right.populated(&c.column)?;
                (other != c.populated).then(|| CountMismatch {
                    column: c.column.clone(),
                    left: c.populated,
                    right: other,
                })
            })
            .collect();

        Self {
            left_rows: left.rows,
            right_rows: right.rows,
            header: HeaderDiff::between(&left_names, &right_names),
            count_mismatches,
            values: None,
            file_digests: None,
        }
    }

    pub fn with_values(mut self, values: ValueInventoryDiff) -> Self {
        self.values = Some(values);
        self
    }

    pub fn with_file_digests(mut self, digests: FileDigestComparison) -> Self {
        self.file_digests = Some(digests);
        self
    }

    pub fn has_differences(&self) -> bool {
        self.left_rows != self.right_rows
            || !self.header.is_empty()
            || !self.count_mismatches.is_empty()
            || self.values.as_ref().map_or(false, |v| v.has_differences())
            || self.file_digests.as_ref().map_or(false, |d| !d.is_equal())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueCount {
    pub value: String,
    pub count: usize,
}

/// How often each distinct value of one column occurs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueInventory {
    pub column: String,
    pub rows: usize,
    /// In order of first occurrence
    pub values: Vec<ValueCount>,
}

impl ValueInventory {
    /// Count the values of `column`; the column must appear exactly once in `header`
    pub fn for_column(
        header: &[String],
        records: &[RawRecord],
        column: &str,
    ) -> Result<Self, MediaDiffError> {
        let positions: Vec<usize> = header
            .iter()
            .enumerate()
            .filter(|(_, name)| name.as_str() == column)
            .map(|(index, _)| index)
            .collect();
        let index = match positions.as_slice() {
            [index] => *index,
            [] => return Err(MediaDiffError::MissingColumn(column.to_string())),
            many => {
                return Err(MediaDiffError::Config(format!(
                    "column {} appears {} times in the header",
                    column,
                    many.len()
                )))
            }
        };

        let mut values: Vec<ValueCount> = Vec::new();
        let mut slots: HashMap<&str, usize> = HashMap::new();
        for record in records {
            let value = record
                .fields
                .get(index)
                .map_or("", |(_, value)| value.as_str());
            match slots.get(value) {
                Some(&slot) => values[slot].count += 1,
                None => {
                    slots.insert(value, values.len());
                    values.push(ValueCount {
                        value: value.to_string(),
                        count: 1,
                    });
                }
            }
        }

        Ok(Self {
            column: column.to_string(),
            rows: records.len(),
            values,
        })
    }

    pub fn count(&self, value: &str) -> Option<usize> {
        self.values
            .iter()
            .find(|v| v.value == value)
            .map(|v| v.count)
    }
}

/// A value present on both sides that occurs a different number of times
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueMismatch {
    pub value: String,
    pub left: usize,
    pub right: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueInventoryDiff {
    pub column: String,
    pub left_only: Vec<ValueCount>,
    pub right_only: Vec<ValueCount>,
    pub count_mismatches: Vec<ValueMismatch>,
}

impl ValueInventoryDiff {
    pub fn between(left: &ValueInventory, right: &ValueInventory) -> Self {
        let right_counts: HashMap<&str, usize> = right
            .values
            .iter()
            .map(|v| (v.value.as_str(), v.count))
            .collect();
        let left_values: BTreeSet<&str> = left.values.iter().map(|v| v.value.as_str()).collect();

        let mut left_only = Vec::new();
        let mut count_mismatches = Vec::new();
        for value in &left.values {
            match right_counts.get(value.value.as_str()) {
                None => left_only.push(value.clone()),
                Some(&count) if count != value.count => count_mismatches.push(ValueMismatch {
                    value: value.value.clone(),
                    left: value.count,
                    right: count,
                }),
                Some(_) => {}
            }
        }

        Self {
            column: left.column.clone(),
            left_only,
            right_only: right
                .values
                .iter()
                .filter(|v| !left_values.contains(v.value.as_str()))
                .cloned()
                .collect(),
            count_mismatches,
        }
    }

    pub fn has_differences(&self) -> bool {
        !self.left_only.is_empty()
            || !self.right_only.is_empty()
            || !self.count_mismatches.is_empty()
    }
}

/// Digests of two load files taken over their raw bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDigestComparison {
    pub algorithm: HashAlgorithm,
    pub left: String,
    pub right: String,
}

impl FileDigestComparison {
    pub fn compute(
        left: &Path,
        right: &Path,
        algorithm: HashAlgorithm,
        engine: &HashEngine,
    ) -> Result<Self, MediaDiffError> {
        let digest_of = |path: &Path| -> Result<String, MediaDiffError> {
            let mut digests = engine.compute(path, &[algorithm])?;
            Ok(digests.remove(&algorithm).unwrap_or_default())
        };

        Ok(Self {
            algorithm,
            left: digest_of(left)?,
            right: digest_of(right)?,
        })
    }

    pub fn is_equal(&self) -> bool {
        self.left == self.right
    }
}
