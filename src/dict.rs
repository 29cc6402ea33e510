use std::fs;
use std::io::{self, Read};
use std::path::Path;

use serde::Deserialize;

/// One dictionary entry: a pattern key and its associated value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct DictEntry {
    pub key: String,
    pub value: String,
}

impl DictEntry {
    /// Creates a new dictionary entry.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Loads pattern dictionaries from JSON.
pub struct DictLoader;

impl DictLoader {
    /// Loads dictionary entries from a JSON file.
    pub fn load_from_file(path: &Path) -> io::Result<Vec<DictEntry>> {
        let content = fs::read_to_string(path)?;
        Self::load_from_str(&content)
    }

    /// Loads dictionary entries from a reader providing JSON content.
    pub fn load_from_reader(reader: &mut dyn Read) -> io::Result<Vec<DictEntry>> {
        let mut content = String::new();
        reader.read_to_string(&mut content)?;
        Self::load_from_str(&content)
    }

    /// Loads dictionary entries from a JSON string.
    pub fn load_from_str(json: &str) -> io::Result<Vec<DictEntry>> {
        let entries: Vec<DictEntry> =
            serde_json::from_str(json).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(entries)
    }
}
