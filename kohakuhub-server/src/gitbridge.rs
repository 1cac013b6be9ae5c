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

//! Translation from the version store's commit graph to Git objects.
//!
//! Every version-store commit becomes exactly one synthesized Git
//! commit; trees are rebuilt bottom-up from recursive listings; blobs
//! backed by the global LFS prefix become pointer files, everything else
//! streams through as raw content. The whole object set is synthesized
//! per request — nothing is cached server-side, so there is no state to
//! invalidate and a disconnect costs nothing.

use std::collections::{HashMap, HashSet};

use kohakuhub_core::{LfsPointer, Oid};
use kohakuhub_git::{
    advertisement, object_id, pkt_line, sideband_chunks, CommitBuilder, GitOid, ObjectKind,
    RefAdvert, TreeBuilder, TreeEntry, UploadPackRequest, FLUSH_PKT, PackWriter, SIDEBAND_DATA,
};
use kohakuhub_meta::Repository;

use crate::error::{ApiError, Result};
use crate::state::AppState;

/// Commit-graph walk depth cap; repos live under the HF commit API, so
/// graphs are shallow chains in practice.
const MAX_WALK: usize = 1000;

/// A fully synthesized git view of one repository.
pub struct GitSnapshot {
    pub refs: Vec<RefAdvert>,
    pub head_target: String,
    /// oid hex -> (kind, content)
    objects: HashMap<String, (ObjectKind, Vec<u8>)>,
}

impl GitSnapshot {
    pub fn advertisement_body(&self) -> Vec<u8> {
        advertisement(&self.head_target, &self.refs)
    }

    pub fn knows(&self, oid_hex: &str) -> bool {
        self.objects.contains_key(oid_hex)
    }

    /// `NAK` + side-banded pack + flush. Wants must have been advertised.
    pub fn upload_pack_response(&self, request: &UploadPackRequest) -> Result<Vec<u8>> {
        for want in &request.wants {
            if !self.knows(want) {
                return Err(ApiError::BadRequest(format!("unknown want: {want}")));
            }
        }

        let mut writer = PackWriter::new(self.objects.len() as u32);
        // Commits first, then trees, then blobs; index-pack does not
        // care, but the locality keeps small fetches warm.
        for kind in [ObjectKind::Commit, ObjectKind::Tree, ObjectKind::Blob] {
            for (object_kind, content) in self.objects.values() {
                if *object_kind == kind {
                    writer.add_object(kind, content);
                }
            }
        }
        let pack = writer.finish();

        let mut body = Vec::with_capacity(pack.len() + 1024);
        body.extend_from_slice(&pkt_line(b"NAK\n"));
        for frame in sideband_chunks(SIDEBAND_DATA, &pack) {
            body.extend_from_slice(&frame);
        }
        body.extend_from_slice(FLUSH_PKT);
        Ok(body)
    }
}

/// Walk the version store and synthesize the full object set.
pub async fn build_snapshot(state: &AppState, repo: &Repository) -> Result<GitSnapshot> {
    let lakefs_name = repo.repo_id().lakefs_name();
    let threshold = state.config.app.git_lfs_threshold_bytes as i64;

    let branches = state.lakefs.list_branches(&lakefs_name).await?;
    let tags = state.lakefs.list_tags(&lakefs_name).await.unwrap_or_default();

    // Discover the commit graph breadth-first from every ref tip.
    let mut order: Vec<kohakuhub_lakefs::CommitInfo> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut frontier: Vec<String> = branches
        .iter()
        .map(|b| b.commit_id.clone())
        .chain(tags.iter().map(|t| t.commit_id.clone()))
        .collect();
    while let Some(commit_id) = frontier.pop() {
        if commit_id.is_empty() || !seen.insert(commit_id.clone()) {
            continue;
        }
        if order.len() >= MAX_WALK {
            tracing::warn!(repo = %repo.full_id, "commit graph walk truncated");
            break;
        }
        let info = state.lakefs.get_commit(&lakefs_name, &commit_id).await?;
        frontier.extend(info.parents.iter().cloned());
        order.push(info);
    }
    // Parents before children: lakeFS ids chain newest-first from the
    // tips, so creation date gives a stable topological order here.
    order.sort_by_key(|c| c.creation_date);

    let mut objects: HashMap<String, (ObjectKind, Vec<u8>)> = HashMap::new();
    let mut commit_map: HashMap<String, GitOid> = HashMap::new();
    // Raw content cache keyed by checksum so shared blobs fetch once.
    let mut blob_cache: HashMap<String, GitOid> = HashMap::new();

    for info in &order {
        let listing = state
            .lakefs
            .list_all_objects(&lakefs_name, &info.id, "")
            .await?;

        let mut files: Vec<(String, GitOid)> = Vec::with_capacity(listing.len());
        for stats in &listing {
            if stats.is_common_prefix() {
                continue;
            }
            let cache_key = format!("{}:{}", stats.checksum, stats.size_bytes);
            let blob_oid = if let Some(oid) = blob_cache.get(&cache_key) {
                *oid
            } else {
                let content = blob_content(state, &lakefs_name, info, stats, threshold).await?;
                let oid = object_id(ObjectKind::Blob, &content);
                objects.insert(hex::encode(oid), (ObjectKind::Blob, content));
                blob_cache.insert(cache_key, oid);
                oid
            };
            files.push((stats.path.clone(), blob_oid));
        }

        let tree_oid = build_trees(&files, &mut objects);

        // Author and timestamp come from the denormalized commit row
        // when we have one; external commits fall back to lakeFS data.
        let row = state
            .meta
            .get_commit(&repo.full_id, repo.repo_type, &info.id)
            .await?;
        let (author, timestamp, message) = match row {
            Some(row) => (row.username, row.created_at, commit_message(&row.message, &row.description)),
            None => (
                info.committer.clone(),
                info.creation_date,
                info.message.clone(),
            ),
        };

        let parents: Vec<GitOid> = info
            .parents
            .iter()
            .filter_map(|p| commit_map.get(p).copied())
            .collect();
        let commit_content = CommitBuilder {
            tree: tree_oid,
            parents,
            author_email: format!("{author}@kohakuhub"),
            author_name: author,
            timestamp,
            message,
        }
        .build();
        let commit_oid = object_id(ObjectKind::Commit, &commit_content);
        objects.insert(hex::encode(commit_oid), (ObjectKind::Commit, commit_content));
        commit_map.insert(info.id.clone(), commit_oid);
    }

    let mut refs: Vec<RefAdvert> = Vec::new();
    for branch in &branches {
        if let Some(oid) = commit_map.get(&branch.commit_id) {
            refs.push(RefAdvert {
                name: format!("refs/heads/{}", branch.id),
                oid_hex: hex::encode(oid),
            });
        }
    }
    for tag in &tags {
        if let Some(oid) = commit_map.get(&tag.commit_id) {
            refs.push(RefAdvert {
                name: format!("refs/tags/{}", tag.id),
                oid_hex: hex::encode(oid),
            });
        }
    }
    refs.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(GitSnapshot {
        refs,
        head_target: "refs/heads/main".to_string(),
        objects,
    })
}

fn commit_message(summary: &str, description: &str) -> String {
    if description.is_empty() {
        summary.to_string()
    } else {
        format!("{summary}\n\n{description}")
    }
}

/// Blob bytes for one listed object: a canonical LFS pointer when the
/// physical address lives under the global LFS prefix or the object
/// crosses the pointer threshold with a usable sha256, raw content
/// otherwise.
async fn blob_content(
    state: &AppState,
    lakefs_name: &str,
    commit: &kohakuhub_lakefs::CommitInfo,
    stats: &kohakuhub_lakefs::ObjectStats,
    threshold: i64,
) -> Result<Vec<u8>> {
    let lfs_oid = crate::pipeline::lfs_oid_from_physical(&stats.physical_address).or_else(|| {
        (stats.size_bytes >= threshold && stats.checksum.len() == 64)
            .then(|| stats.checksum.clone())
    });

    if let Some(oid_hex) = lfs_oid {
        if let Ok(oid) = Oid::from_hex(&oid_hex) {
            return Ok(LfsPointer::new(oid, stats.size_bytes as u64)
                .encode()
                .into_bytes());
        }
    }

    let content = state
        .lakefs
        .get_object(lakefs_name, &commit.id, &stats.path)
        .await?;
    Ok(content.to_vec())
}

/// Build the tree objects for one commit bottom-up; returns the root
/// tree oid and stores every tree in `objects`.
fn build_trees(
    files: &[(String, GitOid)],
    objects: &mut HashMap<String, (ObjectKind, Vec<u8>)>,
) -> GitOid {
    // dir path ("" = root) -> (blob entries, child dirs)
    let mut dirs: HashMap<String, Vec<(String, GitOid)>> = HashMap::new();
    let mut children: HashMap<String, HashSet<String>> = HashMap::new();
    dirs.entry(String::new()).or_default();

    for (path, oid) in files {
        let (dir, name) = match path.rsplit_once('/') {
            Some((dir, name)) => (dir.to_string(), name.to_string()),
            None => (String::new(), path.clone()),
        };
        // Materialize the parent chain.
        let mut current = dir.clone();
        while !current.is_empty() {
            dirs.entry(current.clone()).or_default();
            let (parent, leaf) = match current.rsplit_once('/') {
                Some((parent, leaf)) => (parent.to_string(), leaf.to_string()),
                None => (String::new(), current.clone()),
            };
            children.entry(parent.clone()).or_default().insert(leaf);
            // Re-derive the child full path on the way up.
            current = parent;
        }
        dirs.entry(dir).or_default().push((name, *oid));
    }

    // Deepest directories first so parents can reference child ids.
    let mut dir_paths: Vec<String> = dirs.keys().cloned().collect();
    dir_paths.sort_by_key(|p| std::cmp::Reverse(p.matches('/').count() + usize::from(!p.is_empty())));

    let mut tree_ids: HashMap<String, GitOid> = HashMap::new();
    for dir in dir_paths {
        let mut builder = TreeBuilder::new();
        for (name, oid) in dirs.get(&dir).into_iter().flatten() {
            builder.push(TreeEntry::blob(name.clone(), *oid));
        }
        if let Some(child_names) = children.get(&dir) {
            for child in child_names {
                let full = if dir.is_empty() {
                    child.clone()
                } else {
                    format!("{dir}/{child}")
                };
                if let Some(child_oid) = tree_ids.get(&full) {
                    builder.push(TreeEntry::subtree(child.clone(), *child_oid));
                }
            }
        }
        let content = builder.build();
        let oid = object_id(ObjectKind::Tree, &content);
        objects.insert(hex::encode(oid), (ObjectKind::Tree, content));
        tree_ids.insert(dir, oid);
    }

    tree_ids[""]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(data: &[u8]) -> GitOid {
        object_id(ObjectKind::Blob, data)
    }

    #[test]
    fn nested_trees_compose_to_one_root() {
        let mut objects = HashMap::new();
        let files = vec![
            ("README.md".to_string(), blob(b"readme")),
            ("src/lib.rs".to_string(), blob(b"lib")),
            ("src/deep/mod.rs".to_string(), blob(b"mod")),
        ];
        let root = build_trees(&files, &mut objects);
        // Root, src, src/deep.
        let trees = objects
            .values()
            .filter(|(k, _)| *k == ObjectKind::Tree)
            .count();
        assert_eq!(trees, 3);
        assert!(objects.contains_key(&hex::encode(root)));
    }

    #[test]
    fn identical_content_produces_identical_trees() {
        let mut a = HashMap::new();
        let mut b = HashMap::new();
        let files = vec![
            ("b.txt".to_string(), blob(b"1")),
            ("a.txt".to_string(), blob(b"2")),
        ];
        let mut reversed = files.clone();
        reversed.reverse();
        assert_eq!(build_trees(&files, &mut a), build_trees(&reversed, &mut b));
    }

    #[test]
    fn empty_file_set_yields_empty_root() {
        let mut objects = HashMap::new();
        let root = build_trees(&[], &mut objects);
        // Canonical empty tree id.
        assert_eq!(
            hex::encode(root),
            "4b825dc642cb6eb9a060e54bf8d69288fbee4904"
        );
    }
}
