//! Domain Validator
//!
//! Loads the per-position whitelist from the domain reference file. Reference
//! lines use `/` as their delimiter and are sampled with the same positions
//! and case rules as filenames, so a key validates exactly when each of its
//! fields was seen at that position in some reference line.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use super::key::{ClassificationKey, NamingScheme};
use crate::error::{Result, RouterError};

/// Delimiter between fields in a domain reference line
pub const DOMAIN_DELIMITER: char = '/';

/// Immutable per-position sets of allowed key values
#[derive(Debug, Clone)]
pub struct DomainWhitelist {
    scheme: NamingScheme,
    sets: Vec<HashSet<String>>,
    /// Lines ignored for having too few fields
    skipped_lines: usize,
}

impl DomainWhitelist {
    /// Whitelist with every set empty; rejects every key
    pub fn empty(scheme: NamingScheme) -> Self {
        Self {
            scheme,
            sets: vec![HashSet::new(); scheme.arity()],
            skipped_lines: 0,
        }
    }

    /// Load the whitelist from a reference file.
    ///
    /// A missing or unreadable file is a configuration error; the caller
    /// decides between aborting and continuing fail-closed.
    pub fn load(path: &Path, scheme: NamingScheme) -> Result<Self> {
        let file = File::open(path).map_err(|source| RouterError::DomainUnavailable {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_reader(BufReader::new(file), scheme).map_err(|source| {
            RouterError::DomainUnavailable {
                path: path.to_path_buf(),
                source,
            }
        })
    }

    /// Build a whitelist from any line source
    pub fn from_reader<R: BufRead>(reader: R, scheme: NamingScheme) -> std::io::Result<Self> {
        let mut whitelist = Self::empty(scheme);

        for line in reader.lines() {
            let line = line?;
            whitelist.insert_line(&line);
        }

        tracing::debug!(
            sizes = ?whitelist.set_sizes(),
            skipped = whitelist.skipped_lines,
            "Loaded domain whitelist"
        );

        Ok(whitelist)
    }

    fn insert_line(&mut self, line: &str) {
        let parts: Vec<&str> = line.trim().split(DOMAIN_DELIMITER).collect();

        match self.scheme.sample(&parts) {
            Some(values) => {
                for (set, value) in self.sets.iter_mut().zip(values) {
                    set.insert(value);
                }
            }
            None => self.skipped_lines += 1,
        }
    }

    pub fn scheme(&self) -> NamingScheme {
        self.scheme
    }

    /// True when no reference line contributed any value
    pub fn is_empty(&self) -> bool {
        self.sets.iter().all(HashSet::is_empty)
    }

    pub fn skipped_lines(&self) -> usize {
        self.skipped_lines
    }

    /// Number of allowed values per key position
    pub fn set_sizes(&self) -> Vec<usize> {
        self.sets.iter().map(HashSet::len).collect()
    }

    /// Allowed values at one key position
    pub fn allowed(&self, position: usize) -> Option<&HashSet<String>> {
        self.sets.get(position)
    }

    /// Whether every field of `key` is present in its position's set.
    ///
    /// Keys of the wrong arity never validate.
    pub fn contains(&self, key: &ClassificationKey) -> bool {
        key.fields().len() == self.sets.len()
            && key
                .fields()
                .iter()
                .zip(&self.sets)
                .all(|(field, set)| set.contains(field))
    }

    /// Index of the first field that fails validation, for diagnostics
    pub fn first_miss(&self, key: &ClassificationKey) -> Option<usize> {
        key.fields()
            .iter()
            .zip(&self.sets)
            .position(|(field, set)| !set.contains(field))
    }
}
