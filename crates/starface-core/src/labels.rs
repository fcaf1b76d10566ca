//! Label dictionary: the bijection between class names and dense class ids.

use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Name reported for class ids the dictionary does not know.
pub const UNKNOWN_LABEL: &str = "Unknown";

#[derive(Error, Debug)]
pub enum LabelError {
    #[error("class dictionary not found: {0}")]
    NotFound(String),
    #[error("failed to read class dictionary {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("class dictionary is not a JSON object of name -> id: {0}")]
    Json(#[from] serde_json::Error),
    #[error("class dictionary is empty")]
    Empty,
    #[error("class ids must be dense 0..{len}; id {id} is missing or duplicated")]
    NotDense { id: usize, len: usize },
}

/// Immutable name <-> id mapping, iterated in id order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelDictionary {
    names: Vec<String>,
}

impl LabelDictionary {
    /// Build from `(name, id)` pairs. Ids must cover `0..N` exactly once.
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self, LabelError>
    where
        I: IntoIterator<Item = (S, usize)>,
        S: Into<String>,
    {
        let mut pairs: Vec<(String, usize)> = pairs.into_iter().map(|(n, id)| (n.into(), id)).collect();
        if pairs.is_empty() {
            return Err(LabelError::Empty);
        }
        pairs.sort_by_key(|(_, id)| *id);

        let len = pairs.len();
        for (expected, (_, id)) in pairs.iter().enumerate() {
            if *id != expected {
                return Err(LabelError::NotDense { id: expected, len });
            }
        }

        Ok(Self {
            names: pairs.into_iter().map(|(name, _)| name).collect(),
        })
    }

    /// Parse a JSON object such as `{"alice": 0, "bob": 1}`.
    pub fn from_json(json: &str) -> Result<Self, LabelError> {
        let map: HashMap<String, usize> = serde_json::from_str(json)?;
        Self::from_pairs(map)
    }

    pub fn load(path: &Path) -> Result<Self, LabelError> {
        if !path.exists() {
            return Err(LabelError::NotFound(path.display().to_string()));
        }
        let json = std::fs::read_to_string(path).map_err(|source| LabelError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let labels = Self::from_json(&json)?;
        tracing::info!(path = %path.display(), classes = ?labels.names, "loaded class dictionary");
        Ok(labels)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn name(&self, id: usize) -> Option<&str> {
        self.names.get(id).map(String::as_str)
    }

    /// Name for `id`, or [`UNKNOWN_LABEL`] when the id is out of range.
    pub fn resolve(&self, id: usize) -> &str {
        self.name(id).unwrap_or_else(|| {
            tracing::warn!(class_id = id, "class id missing from dictionary");
            UNKNOWN_LABEL
        })
    }

    /// Class names in id order.
    pub fn names(&self) -> &[String] {
        &self.names
    }
}
