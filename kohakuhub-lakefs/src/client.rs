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

use std::time::Duration;

use bytes::Bytes;
use serde_json::json;

use kohakuhub_core::config::LakeFsConfig;

use crate::error::{LakeFsError, Result};
use crate::types::*;

const TRANSIENT_RETRIES: u32 = 3;

#[derive(Clone)]
pub struct LakeFsClient {
    http: reqwest::Client,
    base: String,
    access_key: String,
    secret_key: String,
}

impl LakeFsClient {
    pub fn new(cfg: &LakeFsConfig, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LakeFsError::Transient(e.to_string()))?;
        Ok(Self {
            http,
            base: format!("{}/api/v1", cfg.endpoint.trim_end_matches('/')),
            access_key: cfg.access_key.clone(),
            secret_key: cfg.secret_key.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, self.url(path))
            .basic_auth(&self.access_key, Some(&self.secret_key))
    }

    /// Send with transient retry. Builders are cloneable because none of
    /// our requests use streaming bodies.
    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let mut attempt = 0u32;
        loop {
            let req = builder
                .try_clone()
                .ok_or_else(|| LakeFsError::Transient("unclonable request".into()))?;
            match req.send().await {
                Ok(resp) if resp.status().is_server_error() && attempt < TRANSIENT_RETRIES => {
                    attempt += 1;
                    tracing::warn!(
                        status = resp.status().as_u16(),
                        attempt,
                        "version store 5xx, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(200 * attempt as u64)).await;
                }
                Ok(resp) => return Ok(resp),
                Err(err) if attempt < TRANSIENT_RETRIES && err.is_connect() => {
                    attempt += 1;
                    tokio::time::sleep(Duration::from_millis(200 * attempt as u64)).await;
                }
                Err(err) => return Err(LakeFsError::Transient(err.to_string())),
            }
        }
    }

    /// Map an error response to the typed taxonomy. `ref_context` selects
    /// the 404 flavor.
    async fn check(resp: reqwest::Response, ref_context: bool) -> Result<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let message = resp.text().await.unwrap_or_default();
        Err(match status.as_u16() {
            404 if ref_context => LakeFsError::RefNotFound(message),
            404 => LakeFsError::NotFound(message),
            409 => LakeFsError::Conflict(message),
            412 => LakeFsError::PreconditionFailed(message),
            s if s >= 500 => LakeFsError::Transient(message),
            s => LakeFsError::Api { status: s, message },
        })
    }

    // Repositories ------------------------------------------------------

    pub async fn create_repo(
        &self,
        name: &str,
        storage_namespace: &str,
        default_branch: &str,
    ) -> Result<RepositoryInfo> {
        let resp = self
            .send(self.request(reqwest::Method::POST, "/repositories").json(&json!({
                "name": name,
                "storage_namespace": storage_namespace,
                "default_branch": default_branch,
            })))
            .await?;
        Ok(Self::check(resp, false).await?.json().await.map_err(wire)?)
    }

    pub async fn delete_repo(&self, name: &str) -> Result<()> {
        let resp = self
            .send(self.request(reqwest::Method::DELETE, &format!("/repositories/{name}")))
            .await?;
        // Deleting an absent repo is success for our callers.
        match Self::check(resp, false).await {
            Ok(_) => Ok(()),
            Err(LakeFsError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    // Branches and tags -------------------------------------------------

    pub async fn create_branch(&self, repo: &str, name: &str, source_ref: &str) -> Result<()> {
        let resp = self
            .send(
                self.request(
                    reqwest::Method::POST,
                    &format!("/repositories/{repo}/branches"),
                )
                .json(&json!({ "name": name, "source": source_ref })),
            )
            .await?;
        Self::check(resp, true).await.map(|_| ())
    }

    pub async fn delete_branch(&self, repo: &str, name: &str) -> Result<()> {
        let resp = self
            .send(self.request(
                reqwest::Method::DELETE,
                &format!("/repositories/{repo}/branches/{name}"),
            ))
            .await?;
        Self::check(resp, true).await.map(|_| ())
    }

    pub async fn list_branches(&self, repo: &str) -> Result<Vec<BranchInfo>> {
        let resp = self
            .send(self.request(
                reqwest::Method::GET,
                &format!("/repositories/{repo}/branches?amount=1000"),
            ))
            .await?;
        let page: Page<BranchInfo> =
            Self::check(resp, false).await?.json().await.map_err(wire)?;
        Ok(page.results)
    }

    pub async fn get_branch(&self, repo: &str, name: &str) -> Result<BranchInfo> {
        let resp = self
            .send(self.request(
                reqwest::Method::GET,
                &format!("/repositories/{repo}/branches/{name}"),
            ))
            .await?;
        Ok(Self::check(resp, true).await?.json().await.map_err(wire)?)
    }

    pub async fn create_tag(&self, repo: &str, name: &str, target_ref: &str) -> Result<()> {
        let resp = self
            .send(
                self.request(reqwest::Method::POST, &format!("/repositories/{repo}/tags"))
                    .json(&json!({ "id": name, "ref": target_ref })),
            )
            .await?;
        Self::check(resp, true).await.map(|_| ())
    }

    pub async fn delete_tag(&self, repo: &str, name: &str) -> Result<()> {
        let resp = self
            .send(self.request(
                reqwest::Method::DELETE,
                &format!("/repositories/{repo}/tags/{name}"),
            ))
            .await?;
        Self::check(resp, true).await.map(|_| ())
    }

    pub async fn list_tags(&self, repo: &str) -> Result<Vec<TagInfo>> {
        let resp = self
            .send(self.request(
                reqwest::Method::GET,
                &format!("/repositories/{repo}/tags?amount=1000"),
            ))
            .await?;
        let page: Page<TagInfo> = Self::check(resp, false).await?.json().await.map_err(wire)?;
        Ok(page.results)
    }

    // Objects -----------------------------------------------------------

    /// Upload small inline content to the branch staging area.
    pub async fn upload_object(
        &self,
        repo: &str,
        branch: &str,
        path: &str,
        content: Bytes,
    ) -> Result<ObjectStats> {
        let resp = self
            .send(
                self.request(
                    reqwest::Method::POST,
                    &format!(
                        "/repositories/{repo}/branches/{branch}/objects?path={}",
                        urlencode(path)
                    ),
                )
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .body(content),
            )
            .await?;
        Ok(Self::check(resp, true).await?.json().await.map_err(wire)?)
    }

    /// Associate an already-uploaded S3 object with a logical path
    /// without moving bytes. The heart of LFS linking.
    pub async fn link_physical_address(
        &self,
        repo: &str,
        branch: &str,
        path: &str,
        s3_uri: &str,
        checksum: &str,
        size_bytes: i64,
    ) -> Result<ObjectStats> {
        let body = StagingMetadata {
            staging: StagingLocation {
                physical_address: s3_uri.to_string(),
            },
            checksum: checksum.to_string(),
            size_bytes,
        };
        let resp = self
            .send(
                self.request(
                    reqwest::Method::PUT,
                    &format!(
                        "/repositories/{repo}/branches/{branch}/staging/backing?path={}",
                        urlencode(path)
                    ),
                )
                .json(&body),
            )
            .await?;
        Ok(Self::check(resp, true).await?.json().await.map_err(wire)?)
    }

    pub async fn commit(
        &self,
        repo: &str,
        branch: &str,
        message: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<CommitInfo> {
        let mut body = json!({ "message": message });
        if let Some(metadata) = metadata {
            body["metadata"] = metadata;
        }
        let resp = self
            .send(
                self.request(
                    reqwest::Method::POST,
                    &format!("/repositories/{repo}/branches/{branch}/commits"),
                )
                .json(&body),
            )
            .await?;
        Ok(Self::check(resp, true).await?.json().await.map_err(wire)?)
    }

    pub async fn get_commit(&self, repo: &str, commit_id: &str) -> Result<CommitInfo> {
        let resp = self
            .send(self.request(
                reqwest::Method::GET,
                &format!("/repositories/{repo}/commits/{commit_id}"),
            ))
            .await?;
        Ok(Self::check(resp, true).await?.json().await.map_err(wire)?)
    }

    /// One page of a tree listing.
    pub async fn list_objects(
        &self,
        repo: &str,
        reference: &str,
        prefix: &str,
        recursive: bool,
        after: Option<&str>,
        amount: usize,
    ) -> Result<Page<ObjectStats>> {
        let mut path = format!(
            "/repositories/{repo}/refs/{}/objects/ls?prefix={}&amount={amount}",
            urlencode(reference),
            urlencode(prefix),
        );
        if !recursive {
            path.push_str("&delimiter=%2F");
        }
        if let Some(after) = after {
            path.push_str(&format!("&after={}", urlencode(after)));
        }
        let resp = self.send(self.request(reqwest::Method::GET, &path)).await?;
        Ok(Self::check(resp, true).await?.json().await.map_err(wire)?)
    }

    /// Full recursive listing, driving pagination internally.
    pub async fn list_all_objects(
        &self,
        repo: &str,
        reference: &str,
        prefix: &str,
    ) -> Result<Vec<ObjectStats>> {
        let mut all = Vec::new();
        let mut after: Option<String> = None;
        loop {
            let page = self
                .list_objects(repo, reference, prefix, true, after.as_deref(), 1000)
                .await?;
            all.extend(page.results);
            if page.pagination.has_more {
                after = Some(page.pagination.next_offset);
            } else {
                return Ok(all);
            }
        }
    }

    pub async fn stat_object(
        &self,
        repo: &str,
        reference: &str,
        path: &str,
    ) -> Result<ObjectStats> {
        let resp = self
            .send(self.request(
                reqwest::Method::GET,
                &format!(
                    "/repositories/{repo}/refs/{}/objects/stat?path={}",
                    urlencode(reference),
                    urlencode(path)
                ),
            ))
            .await?;
        Ok(Self::check(resp, true).await?.json().await.map_err(wire)?)
    }

    /// Fetch object content. Small objects only; large content goes to
    /// clients via pre-signed S3 URLs, never through this call.
    pub async fn get_object(&self, repo: &str, reference: &str, path: &str) -> Result<Bytes> {
        let resp = self
            .send(self.request(
                reqwest::Method::GET,
                &format!(
                    "/repositories/{repo}/refs/{}/objects?path={}",
                    urlencode(reference),
                    urlencode(path)
                ),
            ))
            .await?;
        Self::check(resp, true)
            .await?
            .bytes()
            .await
            .map_err(wire)
    }

    pub async fn delete_object(&self, repo: &str, branch: &str, path: &str) -> Result<()> {
        let resp = self
            .send(self.request(
                reqwest::Method::DELETE,
                &format!(
                    "/repositories/{repo}/branches/{branch}/objects?path={}",
                    urlencode(path)
                ),
            ))
            .await?;
        // Deleting a missing path is success (idempotent deletes).
        match Self::check(resp, true).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    // Refs --------------------------------------------------------------

    pub async fn diff(
        &self,
        repo: &str,
        left_ref: &str,
        right_ref: &str,
        after: Option<&str>,
        amount: usize,
    ) -> Result<Page<DiffEntry>> {
        let mut path = format!(
            "/repositories/{repo}/refs/{}/diff/{}?amount={amount}",
            urlencode(left_ref),
            urlencode(right_ref),
        );
        if let Some(after) = after {
            path.push_str(&format!("&after={}", urlencode(after)));
        }
        let resp = self.send(self.request(reqwest::Method::GET, &path)).await?;
        Ok(Self::check(resp, true).await?.json().await.map_err(wire)?)
    }

    pub async fn merge(&self, repo: &str, source_ref: &str, dest_branch: &str) -> Result<String> {
        let resp = self
            .send(
                self.request(
                    reqwest::Method::POST,
                    &format!(
                        "/repositories/{repo}/refs/{}/merge/{}",
                        urlencode(source_ref),
                        urlencode(dest_branch)
                    ),
                )
                .json(&json!({})),
            )
            .await?;
        let body: serde_json::Value =
            Self::check(resp, true).await?.json().await.map_err(wire)?;
        Ok(body
            .get("reference")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string())
    }

    pub async fn revert(&self, repo: &str, branch: &str, commit_ref: &str) -> Result<()> {
        let resp = self
            .send(
                self.request(
                    reqwest::Method::POST,
                    &format!("/repositories/{repo}/branches/{branch}/revert"),
                )
                .json(&json!({ "ref": commit_ref, "parent_number": 1 })),
            )
            .await?;
        Self::check(resp, true).await.map(|_| ())
    }

    /// Discard everything staged on a branch since its tip.
    pub async fn reset_branch(&self, repo: &str, branch: &str) -> Result<()> {
        let resp = self
            .send(
                self.request(
                    reqwest::Method::PUT,
                    &format!("/repositories/{repo}/branches/{branch}"),
                )
                .json(&json!({ "type": "reset" })),
            )
            .await?;
        Self::check(resp, true).await.map(|_| ())
    }

    /// Move a branch head to an arbitrary commit, discarding history
    /// after it.
    pub async fn hard_reset(&self, repo: &str, branch: &str, commit_ref: &str) -> Result<()> {
        let resp = self
            .send(self.request(
                reqwest::Method::PUT,
                &format!(
                    "/repositories/{repo}/branches/{branch}/hard_reset?ref={}",
                    urlencode(commit_ref)
                ),
            ))
            .await?;
        Self::check(resp, true).await.map(|_| ())
    }
}

fn wire(err: reqwest::Error) -> LakeFsError {
    LakeFsError::Transient(err.to_string())
}

/// Percent-encode a query value (paths routinely contain `/`).
fn urlencode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urlencode_escapes_path_separators() {
        assert_eq!(urlencode("dir/file.txt"), "dir%2Ffile.txt");
        assert_eq!(urlencode("a b"), "a+b");
        assert_eq!(urlencode("plain"), "plain");
    }
}
