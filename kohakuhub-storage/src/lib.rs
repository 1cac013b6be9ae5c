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

//! KohakuHub Storage Gateway
//!
//! Thin wrapper around an S3-compatible object store. No business logic
//! lives here: pre-signed GET/PUT URLs, HEAD, server-side copy and
//! prefix deletes, with jittered exponential backoff on transient
//! faults.
//!
//! Two clients are held: one against the internal endpoint for server
//! calls, and one against the public endpoint whose only job is signing
//! URLs that leave the building (MinIO behind a reverse proxy signs
//! against the host the client will actually hit).

pub mod retry;

use std::time::Duration;

use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use aws_sdk_s3::Client;
use thiserror::Error;

use kohakuhub_core::config::S3Config;

pub use retry::with_retries;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("transient s3 failure: {0}")]
    Transient(String),

    #[error("s3 error: {0}")]
    S3(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Result of a HEAD call on an existing object.
#[derive(Debug, Clone)]
pub struct HeadInfo {
    pub size: i64,
    pub etag: String,
}

#[derive(Clone)]
pub struct ObjectStore {
    client: Client,
    presign_client: Client,
    bucket: String,
}

fn build_client(endpoint: &str, cfg: &S3Config) -> Client {
    let credentials = Credentials::new(
        cfg.access_key.clone(),
        cfg.secret_key.clone(),
        None,
        None,
        "kohakuhub",
    );
    let conf = aws_sdk_s3::Config::builder()
        .behavior_version(BehaviorVersion::latest())
        .region(Region::new(cfg.region.clone()))
        .endpoint_url(endpoint.to_string())
        .credentials_provider(credentials)
        .force_path_style(cfg.force_path_style)
        .build();
    Client::from_conf(conf)
}

impl ObjectStore {
    pub fn new(cfg: &S3Config) -> Self {
        let client = build_client(&cfg.endpoint, cfg);
        let public_endpoint = cfg.public_endpoint.as_deref().unwrap_or(&cfg.endpoint);
        let presign_client = if public_endpoint == cfg.endpoint {
            client.clone()
        } else {
            build_client(public_endpoint, cfg)
        };
        Self {
            client,
            presign_client,
            bucket: cfg.bucket.clone(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// `s3://bucket/key` form used for LakeFS physical addresses.
    pub fn s3_uri(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key)
    }

    /// Pre-signed PUT for a direct client upload.
    pub async fn presign_put(&self, key: &str, size: i64, expires: Duration) -> Result<String> {
        let presigning = PresigningConfig::expires_in(expires)
            .map_err(|e| StorageError::S3(e.to_string()))?;
        let request = self
            .presign_client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_length(size)
            .presigned(presigning)
            .await
            .map_err(|e| StorageError::S3(e.to_string()))?;
        Ok(request.uri().to_string())
    }

    /// Pre-signed GET for a direct client download.
    pub async fn presign_get(&self, key: &str, expires: Duration) -> Result<String> {
        let presigning = PresigningConfig::expires_in(expires)
            .map_err(|e| StorageError::S3(e.to_string()))?;
        let request = self
            .presign_client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| StorageError::S3(e.to_string()))?;
        Ok(request.uri().to_string())
    }

    /// HEAD an object; `None` when it does not exist.
    pub async fn head(&self, key: &str) -> Result<Option<HeadInfo>> {
        let bucket = self.bucket.clone();
        let client = self.client.clone();
        let key_owned = key.to_string();

        with_retries("s3.head", move || {
            let client = client.clone();
            let bucket = bucket.clone();
            let key = key_owned.clone();
            async move {
                match client.head_object().bucket(bucket).key(key).send().await {
                    Ok(out) => Ok(Some(HeadInfo {
                        size: out.content_length().unwrap_or(0),
                        etag: out.e_tag().unwrap_or_default().trim_matches('"').to_string(),
                    })),
                    Err(err) => {
                        let not_found = err
                            .as_service_error()
                            .map(|e| e.is_not_found())
                            .unwrap_or(false);
                        if not_found {
                            Ok(None)
                        } else {
                            Err(StorageError::Transient(err.to_string()))
                        }
                    }
                }
            }
        })
        .await
    }

    /// Server-side copy inside the bucket.
    pub async fn copy(&self, src_key: &str, dst_key: &str) -> Result<()> {
        let source = format!("{}/{}", self.bucket, src_key);
        let bucket = self.bucket.clone();
        let client = self.client.clone();
        let dst = dst_key.to_string();

        with_retries("s3.copy", move || {
            let client = client.clone();
            let bucket = bucket.clone();
            let source = source.clone();
            let dst = dst.clone();
            async move {
                client
                    .copy_object()
                    .bucket(bucket)
                    .key(dst)
                    .copy_source(source)
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|e| StorageError::Transient(e.to_string()))
            }
        })
        .await
    }

    /// Delete one object. Missing keys are success.
    pub async fn delete_object(&self, key: &str) -> Result<()> {
        let bucket = self.bucket.clone();
        let client = self.client.clone();
        let key_owned = key.to_string();

        with_retries("s3.delete", move || {
            let client = client.clone();
            let bucket = bucket.clone();
            let key = key_owned.clone();
            async move {
                client
                    .delete_object()
                    .bucket(bucket)
                    .key(key)
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|e| StorageError::Transient(e.to_string()))
            }
        })
        .await
    }

    /// List every key under a prefix.
    pub async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let mut req = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);
            if let Some(token) = &continuation {
                req = req.continuation_token(token);
            }
            let out = req
                .send()
                .await
                .map_err(|e| StorageError::Transient(e.to_string()))?;
            for obj in out.contents() {
                if let Some(key) = obj.key() {
                    keys.push(key.to_string());
                }
            }
            match out.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }
        Ok(keys)
    }

    /// Delete everything under a prefix, batched. Idempotent.
    pub async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let keys = self.list_prefix(prefix).await?;
        let total = keys.len();

        for chunk in keys.chunks(1000) {
            let objects: Vec<ObjectIdentifier> = chunk
                .iter()
                .filter_map(|key| ObjectIdentifier::builder().key(key).build().ok())
                .collect();
            if objects.is_empty() {
                continue;
            }
            let delete = Delete::builder()
                .set_objects(Some(objects))
                .build()
                .map_err(|e| StorageError::S3(e.to_string()))?;
            self.client
                .delete_objects()
                .bucket(&self.bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|e| StorageError::Transient(e.to_string()))?;
        }

        if total > 0 {
            tracing::info!(prefix, deleted = total, "deleted prefix from object store");
        }
        Ok(total)
    }

    /// Server-side copy of a whole prefix (repository move).
    pub async fn copy_prefix(&self, src_prefix: &str, dst_prefix: &str) -> Result<usize> {
        let keys = self.list_prefix(src_prefix).await?;
        for key in &keys {
            let suffix = &key[src_prefix.len()..];
            let dst = format!("{dst_prefix}{suffix}");
            self.copy(key, &dst).await?;
        }
        Ok(keys.len())
    }
}
