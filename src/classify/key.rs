//! Key Extractor
//!
//! Decodes the classification key embedded in a CDR filename. Malformed names
//! are not errors: they classify as `Excepted` and keep their raw name so the
//! exception route can still place them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Delimiter between metadata tokens in a filename
pub const FILENAME_DELIMITER: char = '_';

/// Suffix every source artifact carries
pub const TEXT_SUFFIX: &str = ".txt";

/// Constant discriminator appended to every key
pub const KEY_TAG: &str = "CDR";

/// One sampled token position and its case rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Zero-based token index
    pub index: usize,
    /// Whether the value is uppercased for comparison and path construction
    pub uppercase: bool,
}

impl FieldSpec {
    const fn raw(index: usize) -> Self {
        Self {
            index,
            uppercase: false,
        }
    }

    const fn upper(index: usize) -> Self {
        Self {
            index,
            uppercase: true,
        }
    }

    /// Apply this position's case rule to a raw token
    pub fn normalize(&self, token: &str) -> String {
        if self.uppercase {
            token.to_uppercase()
        } else {
            token.to_string()
        }
    }
}

/// Sampled positions in path order: first, second, seventh, fourth
const EXTENDED_FIELDS: [FieldSpec; 4] = [
    FieldSpec::raw(0),
    FieldSpec::upper(1),
    FieldSpec::upper(6),
    FieldSpec::upper(3),
];

/// Sampled positions in path order: first, second, third, fourth
const POSITIONAL_FIELDS: [FieldSpec; 4] = [
    FieldSpec::raw(0),
    FieldSpec::upper(1),
    FieldSpec::raw(2),
    FieldSpec::upper(3),
];

/// Filename convention used to decode keys
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamingScheme {
    /// Five-field key sampled from a name of at least seven tokens
    #[default]
    Extended,
    /// Four-field key sampled from the first four tokens
    Positional,
}

impl NamingScheme {
    /// Minimum token count for a name (or domain line) to carry a key
    pub fn required_tokens(&self) -> usize {
        match self {
            NamingScheme::Extended => 7,
            NamingScheme::Positional => 4,
        }
    }

    /// Sampled positions in path order
    pub fn fields(&self) -> &'static [FieldSpec] {
        match self {
            NamingScheme::Extended => &EXTENDED_FIELDS,
            NamingScheme::Positional => &POSITIONAL_FIELDS,
        }
    }

    /// Number of key fields, excluding the constant tag
    pub fn arity(&self) -> usize {
        self.fields().len()
    }

    /// Sample and normalize the key fields from already-split tokens.
    ///
    /// Returns `None` when there are too few tokens or a sampled token
    /// cannot serve as a path segment.
    pub fn sample(&self, tokens: &[&str]) -> Option<Vec<String>> {
        if tokens.len() < self.required_tokens() {
            return None;
        }

        self.fields()
            .iter()
            .map(|field| {
                let token = tokens[field.index].trim();
                if is_usable_segment(token) {
                    Some(field.normalize(token))
                } else {
                    None
                }
            })
            .collect()
    }
}

impl std::str::FromStr for NamingScheme {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "extended" | "five" | "5" => Ok(Self::Extended),
            "positional" | "four" | "4" => Ok(Self::Positional),
            other => Err(format!("unknown naming scheme '{}'", other)),
        }
    }
}

/// Empty tokens and dot segments would collapse or escape the destination tree
fn is_usable_segment(token: &str) -> bool {
    !token.is_empty() && token != "." && token != ".."
}

/// Decoded classification fields plus the constant tag
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClassificationKey {
    fields: Vec<String>,
}

impl ClassificationKey {
    pub fn new(fields: Vec<String>) -> Self {
        Self { fields }
    }

    /// Key fields in path order, excluding the tag
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// First field, kept in its extracted casing
    pub fn first(&self) -> &str {
        self.fields.first().map(String::as_str).unwrap_or_default()
    }

    pub fn tag(&self) -> &'static str {
        KEY_TAG
    }

    /// Path segments: every field followed by the tag
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(KEY_TAG))
    }

    /// Fields joined with the filename delimiter, used for artifact names
    pub fn label(&self) -> String {
        self.fields.join(&FILENAME_DELIMITER.to_string())
    }
}

impl fmt::Display for ClassificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.fields.join("/"), KEY_TAG)
    }
}

/// Outcome of decoding a filename
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "key", rename_all = "snake_case")]
pub enum Classification {
    /// The name carried a complete key
    Classified(ClassificationKey),
    /// The name was malformed; the record keeps its raw name for reporting
    Excepted,
}

impl Classification {
    pub fn key(&self) -> Option<&ClassificationKey> {
        match self {
            Classification::Classified(key) => Some(key),
            Classification::Excepted => None,
        }
    }

    pub fn is_excepted(&self) -> bool {
        matches!(self, Classification::Excepted)
    }
}

/// One physical source file and its decoded key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    /// Original filename
    pub raw_name: String,
    /// Delimiter-split tokens, with the text suffix removed from the last one
    pub fields: Vec<String>,
    pub classification: Classification,
    /// Where the body currently lives
    pub source: PathBuf,
}

impl FileRecord {
    pub fn key(&self) -> Option<&ClassificationKey> {
        self.classification.key()
    }
}

/// Decodes filenames according to one naming scheme
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyExtractor {
    scheme: NamingScheme,
}

impl KeyExtractor {
    pub fn new(scheme: NamingScheme) -> Self {
        Self { scheme }
    }

    pub fn scheme(&self) -> NamingScheme {
        self.scheme
    }

    /// Split a filename into its metadata tokens
    pub fn tokens(name: &str) -> Vec<&str> {
        name.strip_suffix(TEXT_SUFFIX)
            .unwrap_or(name)
            .split(FILENAME_DELIMITER)
            .collect()
    }

    /// Decode only the key of a name
    pub fn key_of(&self, name: &str) -> Option<ClassificationKey> {
        self.scheme
            .sample(&Self::tokens(name))
            .map(ClassificationKey::new)
    }

    /// Decode a filename found in `source_dir`
    pub fn extract(&self, source_dir: &Path, name: &str) -> FileRecord {
        let tokens = Self::tokens(name);
        let classification = match self.scheme.sample(&tokens) {
            Some(fields) => Classification::Classified(ClassificationKey::new(fields)),
            None => Classification::Excepted,
        };

        FileRecord {
            raw_name: name.to_string(),
            fields: tokens.iter().map(|t| t.to_string()).collect(),
            classification,
            source: source_dir.join(name),
        }
    }

    /// Decode a whole listing, preserving discovery order
    pub fn extract_all(&self, source_dir: &Path, names: &[String]) -> Vec<FileRecord> {
        let records: Vec<FileRecord> = names
            .iter()
            .map(|name| self.extract(source_dir, name))
            .collect();

        let excepted = records
            .iter()
            .filter(|r| r.classification.is_excepted())
            .count();
        tracing::debug!(
            records = records.len(),
            excepted,
            scheme = ?self.scheme,
            "Extracted classification keys"
        );

        records
    }
}
