use std::collections::HashMap;

use serde::Serialize;

/// One secondary-index field over a JSON document.
#[derive(Debug, Clone)]
pub struct IndexField {
    /// JSONPath into the document, e.g. `$.participants[*]._id`.
    pub path: String,
    /// Alias used in search expressions.
    pub alias: String,
    pub kind: IndexFieldKind,
}

#[derive(Debug, Clone)]
pub enum IndexFieldKind {
    Tag,
    Text { weight: f32, sortable: bool },
    Numeric { sortable: bool },
}

impl IndexField {
    pub fn tag(path: &str, alias: &str) -> Self {
        Self { path: path.to_string(), alias: alias.to_string(), kind: IndexFieldKind::Tag }
    }

    pub fn text(path: &str, alias: &str, weight: f32) -> Self {
        Self {
            path: path.to_string(),
            alias: alias.to_string(),
            kind: IndexFieldKind::Text { weight, sortable: false },
        }
    }

    pub fn text_sortable(path: &str, alias: &str, weight: f32) -> Self {
        Self {
            path: path.to_string(),
            alias: alias.to_string(),
            kind: IndexFieldKind::Text { weight, sortable: true },
        }
    }

    pub fn numeric(path: &str, alias: &str, sortable: bool) -> Self {
        Self {
            path: path.to_string(),
            alias: alias.to_string(),
            kind: IndexFieldKind::Numeric { sortable },
        }
    }
}

/// Options for an index search. The caller always fetches full documents by
/// key afterwards, so the search itself only returns keys.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub sort_by: Option<String>,
    pub descending: bool,
    pub offset: u64,
    pub limit: u64,
}

#[derive(Debug, Clone, Default)]
pub struct SearchResult {
    pub total: u64,
    pub keys: Vec<String>,
}

/// One entry read from a stream.
#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub id: String,
    pub fields: HashMap<String, String>,
}

/// Snapshot of the client's health, surfaced by the status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct HotTierStatus {
    pub degraded: bool,
    #[serde(rename = "clusterEnabled")]
    pub cluster_enabled: bool,
    #[serde(rename = "fallbackToMaster")]
    pub fallback_to_master: u64,
    #[serde(rename = "consecutiveFailures")]
    pub consecutive_failures: u32,
    #[serde(rename = "fallbackEntries")]
    pub fallback_entries: usize,
}
