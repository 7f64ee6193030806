//! Pairwise target similarity lookups.
//!
//! The pair file is comma-separated text (`targetA,targetB,score`) with an
//! optional header. Quoted fields follow CSV rules, so `"T1",T2,0.8` names
//! target `T1`. Lookups are symmetric: a row for (A, B) answers (B, A) too.
//! A pair the file never mentions is `None`, which is not the same as a score of
//! zero.

use ahash::AHashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimilarityError {
    #[error("Failed to read similarity file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse similarity file '{path}': {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },
    #[error("Similarity line {line} has {found} fields; expected 'targetA,targetB,score'.")]
    MalformedLine { line: usize, found: usize },
    #[error("Similarity line {line} has a non-numeric score '{value}'.")]
    InvalidScore { line: usize, value: String },
}

/// Symmetric map from an unordered pair of target identifiers to a score.
#[derive(Debug, Clone, Default)]
pub struct SimilarityTable {
    scores: AHashMap<(String, String), f64>,
}

fn pair_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

impl SimilarityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a score for the pair unless the pair is already known.
    /// Returns `false` when an earlier entry was kept.
    pub fn insert(&mut self, a: &str, b: &str, score: f64) -> bool {
        use std::collections::hash_map::Entry;
        match self.scores.entry(pair_key(a, b)) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(score);
                true
            }
        }
    }

    pub fn lookup(&self, a: &str, b: &str) -> Option<f64> {
        self.scores.get(&pair_key(a, b)).copied()
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn from_path(path: &Path, has_header: bool) -> Result<Self, SimilarityError> {
        let file = File::open(path).map_err(|source| SimilarityError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_reader(BufReader::new(file), has_header).map_err(|e| match e {
            SimilarityError::Csv { source, .. } => SimilarityError::Csv {
                path: path.display().to_string(),
                source,
            },
            other => other,
        })
    }

    /// Parses pair rows from any reader. Blank lines are skipped; when the same
    /// pair appears twice the first score wins.
    pub fn from_reader<R: Read>(reader: R, has_header: bool) -> Result<Self, SimilarityError> {
        let mut table = Self::new();
        let mut reader = delimited_reader(reader, has_header);
        for record in reader.records() {
            let record = record.map_err(|source| SimilarityError::Csv {
                path: String::from("<reader>"),
                source,
            })?;
            let line_no = record_line(&record);
            let fields = record_fields(&record);
            if fields.is_empty() {
                continue;
            }
            if fields.len() < 3 {
                return Err(SimilarityError::MalformedLine {
                    line: line_no,
                    found: fields.len(),
                });
            }
            let score: f64 = fields[2]
                .parse()
                .map_err(|_| SimilarityError::InvalidScore {
                    line: line_no,
                    value: fields[2].to_string(),
                })?;
            if !table.insert(fields[0], fields[1], score) {
                log::debug!(
                    "Ignoring repeated similarity entry for ({}, {}) on line {line_no}",
                    fields[0],
                    fields[1]
                );
            }
        }
        Ok(table)
    }
}

/// Comma-separated reader for the small hand-edited side files (pair scores,
/// feature selections): rows may differ in length, fields are trimmed and
/// surrounding double quotes are removed.
pub fn delimited_reader<R: Read>(reader: R, has_header: bool) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .has_headers(has_header)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader)
}

/// The record's fields, without the empty field a trailing comma leaves behind.
/// A whitespace-only line yields no fields.
pub fn record_fields(record: &csv::StringRecord) -> Vec<&str> {
    let mut fields: Vec<&str> = record.iter().collect();
    if fields.last() == Some(&"") {
        fields.pop();
    }
    fields
}

/// 1-based line number of a record in its source.
pub fn record_line(record: &csv::StringRecord) -> usize {
    record.position().map_or(0, |p| p.line() as usize)
}
