//! Document references attached to timeline events.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::event::Event;

/// A downloadable file attached to an event.
///
/// Derived deterministically from the event's details; the destination path
/// is computed by [`download::filename`](crate::download::filename).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentReference {
    /// Source URL (usually pre-signed)
    pub url: String,
    /// Suggested title
    pub title: String,
    /// Document id
    pub id: String,
    /// Document date as provided by the service (`dd.mm.yyyy`)
    pub date: Option<String>,
}

impl DocumentReference {
    /// Where this document of `event` is stored below `base`.
    ///
    /// See [`document_path`](crate::download::filename::document_path).
    pub fn destination(&self, base: &Path, event: &Event) -> PathBuf {
        crate::download::filename::document_path(base, event, self)
    }

    pub(crate) fn from_entry(entry: DocumentEntry) -> Option<Self> {
        let url = entry.action?.payload.as_str()?.to_string();
        Some(Self {
            url,
            title: entry.title,
            id: entry.id,
            date: entry.detail,
        })
    }
}

/// Wire form of an entry in a `documents` section.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct DocumentEntry {
    #[serde(default)]
    title: String,
    id: String,
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    action: Option<DocumentAction>,
}

#[derive(Debug, Clone, Deserialize)]
struct DocumentAction {
    #[serde(default)]
    payload: serde_json::Value,
}
