//! Revision List Loader
//!
//! Parses a revision list in `git log --oneline` shape (one revision per
//! line, first token is the identifier, the rest is an annotation) and
//! slices it between two named boundaries into chronological order.

use crate::error::{BisectError, BisectResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One point in the project's history
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Revision {
    /// Short commit hash
    pub id: String,
    /// Trailing text of the list line (commit subject), display only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
}

impl Revision {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            annotation: None,
        }
    }
}

impl std::fmt::Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// Order in which the source lists revisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListOrder {
    /// `git log` order
    #[default]
    NewestFirst,
    OldestFirst,
}

impl std::str::FromStr for ListOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "newest_first" => Ok(Self::NewestFirst),
            "oldest_first" => Ok(Self::OldestFirst),
            other => Err(format!(
                "unknown list order '{other}' (expected newest-first or oldest-first)"
            )),
        }
    }
}

/// Revisions in source order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionList {
    revisions: Vec<Revision>,
    order: ListOrder,
}

impl RevisionList {
    /// Parse list text. Blank lines and `#` comments are skipped.
    pub fn parse(text: &str, order: ListOrder) -> Self {
        let revisions = text
            .lines()
            .filter_map(|line| {
                let line = line.trim();
                let mut parts = line.splitn(2, char::is_whitespace);
                let id = parts.next().filter(|id| !id.is_empty())?;
                if id.starts_with('#') {
                    return None;
                }
                let annotation = parts
                    .next()
                    .map(str::trim)
                    .filter(|rest| !rest.is_empty())
                    .map(str::to_string);
                Some(Revision {
                    id: id.to_string(),
                    annotation,
                })
            })
            .collect();

        Self { revisions, order }
    }

    /// Read and parse a revision list file
    pub fn load(path: impl AsRef<Path>, order: ListOrder) -> BisectResult<Self> {
        let path = path.as_ref();
        let text =
            std::fs::read_to_string(path).map_err(|e| BisectError::RevisionListUnreadable {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        let list = Self::parse(&text, order);
        tracing::debug!(path = %path.display(), count = list.len(), "Loaded revision list");
        Ok(list)
    }

    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }

    /// Revisions in source order
    pub fn as_slice(&self) -> &[Revision] {
        &self.revisions
    }

    /// Position of `id` in source order
    pub fn position(&self, id: &str) -> Option<usize> {
        self.revisions.iter().position(|r| r.id == id)
    }

    /// All revisions, oldest first
    pub fn chronological(&self) -> Vec<Revision> {
        let mut revisions = self.revisions.clone();
        if self.order == ListOrder::NewestFirst {
            revisions.reverse();
        }
        revisions
    }

    /// Revisions strictly after `end` up to and including `start`, oldest
    /// first.
    ///
    /// `start` is the newer boundary. In a `git log` (newest first) file it
    /// sits above `end`, and the selection is the file rows from `start`
    /// down to, but not including, `end`. A missing `end` starts at the
    /// oldest revision, a missing `start` runs to the newest.
    pub fn slice(&self, start: Option<&str>, end: Option<&str>) -> BisectResult<Vec<Revision>> {
        let chronological = self.chronological();
        let locate = |id: &str| {
            chronological
                .iter()
                .position(|r| r.id == id)
                .ok_or_else(|| BisectError::revision_not_found(id))
        };

        let from = match end {
            Some(id) => locate(id)? + 1,
            None => 0,
        };
        let to = match start {
            Some(id) => locate(id)? + 1,
            None => chronological.len(),
        };

        if from > to {
            // Only reachable with both boundaries given: `start` is older than `end`
            return Err(BisectError::inverted_range(
                start.unwrap_or_default(),
                end.unwrap_or_default(),
            ));
        }

        Ok(chronological[from..to].to_vec())
    }
}
