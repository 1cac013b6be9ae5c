// Copyright 2025 KohakuHub (https://github.com/KohakuBlueleaf/KohakuHub)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Repository identifiers and name normalization.
//!
//! Namespaces and repo names are unique under a case-insensitive,
//! `_`-folded normalization; the original spelling is preserved for
//! display. The normalized tuple also derives the LakeFS repository name
//! and the S3 prefix owned by that repository.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of repository, mirrored from the HuggingFace Hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoType {
    Model,
    Dataset,
    Space,
}

impl RepoType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepoType::Model => "model",
            RepoType::Dataset => "dataset",
            RepoType::Space => "space",
        }
    }

    /// Plural path segment used in API routes (`models`, `datasets`, `spaces`).
    pub fn plural(&self) -> &'static str {
        match self {
            RepoType::Model => "models",
            RepoType::Dataset => "datasets",
            RepoType::Space => "spaces",
        }
    }

    /// Parse either the singular or the plural route form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "model" | "models" => Some(RepoType::Model),
            "dataset" | "datasets" => Some(RepoType::Dataset),
            "space" | "spaces" => Some(RepoType::Space),
            _ => None,
        }
    }
}

impl fmt::Display for RepoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalization used for uniqueness checks and external system names:
/// lowercase, `_` folded to `-`.
pub fn normalize_name(name: &str) -> String {
    name.to_lowercase().replace('_', "-")
}

/// Check that a namespace or repo name is acceptable.
///
/// Alphanumerics plus `-`, `_`, `.`; no leading/trailing separator; at
/// most 96 characters. Matches what the hub accepts at creation time.
pub fn valid_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 96 {
        return false;
    }
    let ok_chars = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    let boundary = |c: char| c == '-' || c == '_' || c == '.';
    ok_chars
        && !name.starts_with(boundary)
        && !name.ends_with(boundary)
        && !name.contains("..")
}

/// Fully qualified repository identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoId {
    pub repo_type: RepoType,
    pub namespace: String,
    pub name: String,
}

impl RepoId {
    pub fn new(repo_type: RepoType, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            repo_type,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// `namespace/name`, case preserved.
    pub fn full_id(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Parse a `namespace/name` pair.
    pub fn from_full_id(repo_type: RepoType, full_id: &str) -> Option<Self> {
        let (namespace, name) = full_id.split_once('/')?;
        if namespace.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        Some(Self::new(repo_type, namespace, name))
    }

    /// Name of the backing LakeFS repository: `hf-{type}-{ns}-{name}`,
    /// normalized.
    pub fn lakefs_name(&self) -> String {
        format!(
            "hf-{}-{}-{}",
            self.repo_type.as_str(),
            normalize_name(&self.namespace),
            normalize_name(&self.name)
        )
    }

    /// S3 prefix owned by the backing LakeFS repository.
    pub fn storage_prefix(&self) -> String {
        format!("{}/", self.lakefs_name())
    }

    /// Uniqueness key: `(type, normalized namespace, normalized name)`.
    pub fn normalized(&self) -> (RepoType, String, String) {
        (
            self.repo_type,
            normalize_name(&self.namespace),
            normalize_name(&self.name),
        )
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_folds_case_and_underscore() {
        assert_eq!(normalize_name("My_Model"), "my-model");
        assert_eq!(normalize_name("already-fine"), "already-fine");
    }

    #[test]
    fn normalized_tuples_collide() {
        let a = RepoId::new(RepoType::Model, "Alice", "My_Model");
        let b = RepoId::new(RepoType::Model, "alice", "my-model");
        assert_eq!(a.normalized(), b.normalized());
        // Cross-type shadowing is allowed
        let c = RepoId::new(RepoType::Dataset, "alice", "my-model");
        assert_ne!(a.normalized(), c.normalized());
    }

    #[test]
    fn lakefs_name_is_normalized() {
        let id = RepoId::new(RepoType::Model, "Alice", "My_Model");
        assert_eq!(id.lakefs_name(), "hf-model-alice-my-model");
        assert_eq!(id.storage_prefix(), "hf-model-alice-my-model/");
    }

    #[test]
    fn name_validation() {
        assert!(valid_name("bert-base"));
        assert!(valid_name("v1.0_final"));
        assert!(!valid_name(""));
        assert!(!valid_name("-leading"));
        assert!(!valid_name("trailing."));
        assert!(!valid_name("a..b"));
        assert!(!valid_name("has/slash"));
        assert!(!valid_name(&"x".repeat(97)));
    }

    #[test]
    fn full_id_round_trip() {
        let id = RepoId::from_full_id(RepoType::Dataset, "org/data").unwrap();
        assert_eq!(id.full_id(), "org/data");
        assert!(RepoId::from_full_id(RepoType::Model, "noslash").is_none());
        assert!(RepoId::from_full_id(RepoType::Model, "a/b/c").is_none());
    }

    #[test]
    fn repo_type_parses_both_forms() {
        assert_eq!(RepoType::parse("models"), Some(RepoType::Model));
        assert_eq!(RepoType::parse("model"), Some(RepoType::Model));
        assert_eq!(RepoType::parse("weights"), None);
    }
}
