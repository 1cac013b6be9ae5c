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

//! Git object synthesis: ids, trees and commits built from scratch.
//!
//! Object ids are the SHA-1 of `"{kind} {len}\0" + content`. Tree
//! entries sort by name bytes with directories compared as if their name
//! ended in `/` — getting that wrong silently corrupts every tree id
//! above the mistake.

use sha1::{Digest, Sha1};

/// 20-byte object id.
pub type GitOid = [u8; 20];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Commit,
    Tree,
    Blob,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Commit => "commit",
            ObjectKind::Tree => "tree",
            ObjectKind::Blob => "blob",
        }
    }

    /// Type code in pack object headers.
    pub fn pack_type(&self) -> u8 {
        match self {
            ObjectKind::Commit => 1,
            ObjectKind::Tree => 2,
            ObjectKind::Blob => 3,
        }
    }
}

/// Hash an object the way `git hash-object` does.
pub fn object_id(kind: ObjectKind, content: &[u8]) -> GitOid {
    let mut hasher = Sha1::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update(b" ");
    hasher.update(content.len().to_string().as_bytes());
    hasher.update([0u8]);
    hasher.update(content);
    hasher.finalize().into()
}

/// One entry in a tree object.
#[derive(Debug, Clone)]
pub struct TreeEntry {
    /// `100644` for blobs, `40000` for subtrees (no leading zero).
    pub mode: &'static str,
    pub name: String,
    pub id: GitOid,
}

impl TreeEntry {
    pub fn blob(name: impl Into<String>, id: GitOid) -> Self {
        Self {
            mode: "100644",
            name: name.into(),
            id,
        }
    }

    pub fn subtree(name: impl Into<String>, id: GitOid) -> Self {
        Self {
            mode: "40000",
            name: name.into(),
            id,
        }
    }

    fn is_tree(&self) -> bool {
        self.mode == "40000"
    }

    /// Key for git's tree ordering: directory names compare with a
    /// trailing `/`.
    fn sort_key(&self) -> Vec<u8> {
        let mut key = self.name.as_bytes().to_vec();
        if self.is_tree() {
            key.push(b'/');
        }
        key
    }
}

/// Accumulates entries and serializes a canonical tree object.
#[derive(Debug, Default)]
pub struct TreeBuilder {
    entries: Vec<TreeEntry>,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: TreeEntry) {
        self.entries.push(entry);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialized tree content (not including the object header).
    pub fn build(mut self) -> Vec<u8> {
        self.entries.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        let mut out = Vec::new();
        for entry in &self.entries {
            out.extend_from_slice(entry.mode.as_bytes());
            out.push(b' ');
            out.extend_from_slice(entry.name.as_bytes());
            out.push(0);
            out.extend_from_slice(&entry.id);
        }
        out
    }
}

/// Builds a commit object's content.
#[derive(Debug)]
pub struct CommitBuilder {
    pub tree: GitOid,
    pub parents: Vec<GitOid>,
    pub author_name: String,
    pub author_email: String,
    /// Seconds since epoch; rendered with a `+0000` zone.
    pub timestamp: i64,
    pub message: String,
}

impl CommitBuilder {
    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"tree ");
        out.extend_from_slice(hex::encode(self.tree).as_bytes());
        out.push(b'\n');
        for parent in &self.parents {
            out.extend_from_slice(b"parent ");
            out.extend_from_slice(hex::encode(parent).as_bytes());
            out.push(b'\n');
        }
        let ident = format!(
            "{} <{}> {} +0000",
            self.author_name, self.author_email, self.timestamp
        );
        out.extend_from_slice(format!("author {ident}\n").as_bytes());
        out.extend_from_slice(format!("committer {ident}\n").as_bytes());
        out.push(b'\n');
        out.extend_from_slice(self.message.as_bytes());
        if !self.message.ends_with('\n') {
            out.push(b'\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_id_matches_git_hash_object() {
        // `echo 'hello' | git hash-object --stdin`
        let id = object_id(ObjectKind::Blob, b"hello\n");
        assert_eq!(
            hex::encode(id),
            "ce013625030ba8dba906f756967f9e9ca394464a"
        );
        // Empty blob is a well-known constant.
        let empty = object_id(ObjectKind::Blob, b"");
        assert_eq!(
            hex::encode(empty),
            "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391"
        );
    }

    #[test]
    fn tree_orders_directories_with_trailing_slash() {
        // "foo" (dir) must sort after "foo.txt" (file): "foo/" > "foo.txt".
        let blob = object_id(ObjectKind::Blob, b"x");
        let mut tree = TreeBuilder::new();
        tree.push(TreeEntry::subtree("foo", blob));
        tree.push(TreeEntry::blob("foo.txt", blob));
        let content = tree.build();

        let first_name_end = content.iter().position(|&b| b == 0).unwrap();
        let first = String::from_utf8_lossy(&content[..first_name_end]);
        assert!(first.ends_with("foo.txt"), "got {first}");
    }

    #[test]
    fn tree_serialization_layout() {
        let blob = object_id(ObjectKind::Blob, b"data");
        let mut tree = TreeBuilder::new();
        tree.push(TreeEntry::blob("a", blob));
        let content = tree.build();
        // "100644 a\0" + 20 raw bytes
        assert_eq!(&content[..9], b"100644 a\0");
        assert_eq!(content.len(), 9 + 20);
    }

    #[test]
    fn commit_layout_and_parents() {
        let tree = object_id(ObjectKind::Tree, b"");
        let parent = object_id(ObjectKind::Blob, b"p");
        let commit = CommitBuilder {
            tree,
            parents: vec![parent],
            author_name: "alice".into(),
            author_email: "alice@hub".into(),
            timestamp: 1_700_000_000,
            message: "init".into(),
        }
        .build();
        let text = String::from_utf8(commit).unwrap();
        assert!(text.starts_with(&format!("tree {}\n", hex::encode(tree))));
        assert!(text.contains(&format!("parent {}\n", hex::encode(parent))));
        assert!(text.contains("author alice <alice@hub> 1700000000 +0000\n"));
        assert!(text.ends_with("\ninit\n"));
    }
}
