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

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

/// KohakuHub Server Configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HubConfig {
    #[serde(default)]
    pub server: HttpConfig,
    #[serde(default)]
    pub app: AppConfig,
    pub s3: S3Config,
    pub lakefs: LakeFsConfig,
    pub db: DbConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpConfig {
    /// HTTP API listen address (e.g., "0.0.0.0:48888")
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Per-request fan-out width for commit and LFS batch operations
    #[serde(default = "default_fanout")]
    pub fanout: usize,

    /// Outbound call timeout in seconds (S3, LakeFS)
    #[serde(default = "default_outbound_timeout")]
    pub outbound_timeout_secs: u64,

    /// Enable CORS
    #[serde(default = "default_enable_cors")]
    pub enable_cors: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Public URL of the hub; used in response `url` fields
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Path prefix for the HF-compatible API
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Max size of an inline (base64) commit file; above this is LFS mode
    #[serde(default = "default_inline_threshold")]
    pub inline_threshold_bytes: u64,

    /// Packfile blob-vs-pointer threshold for the git bridge
    #[serde(default = "default_git_lfs_threshold")]
    pub git_lfs_threshold_bytes: u64,

    /// Retained historical LFS versions per (repo, path)
    #[serde(default = "default_lfs_history_keep")]
    pub lfs_history_keep: usize,

    /// Pre-signed upload URL lifetime in seconds
    #[serde(default = "default_presign_upload_expiry")]
    pub presign_upload_expiry_seconds: u64,

    /// Pre-signed download URL lifetime in seconds
    #[serde(default = "default_presign_download_expiry")]
    pub presign_download_expiry_seconds: u64,

    /// StagingUpload row time-to-live in seconds
    #[serde(default = "default_staging_ttl")]
    pub staging_upload_ttl_seconds: u64,

    /// Verbose request/response payload logging (redacted)
    #[serde(default)]
    pub debug_log_payloads: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct S3Config {
    /// Internal endpoint the server talks to (e.g., "http://minio:9000")
    pub endpoint: String,

    /// Endpoint embedded in pre-signed URLs handed to clients.
    /// Falls back to `endpoint` when unset.
    #[serde(default)]
    pub public_endpoint: Option<String>,

    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,

    #[serde(default = "default_s3_region")]
    pub region: String,

    /// Path-style addressing; required for MinIO
    #[serde(default = "default_force_path_style")]
    pub force_path_style: bool,

    /// Signature version; only "s3v4" is supported
    #[serde(default = "default_signature_version")]
    pub signature_version: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LakeFsConfig {
    /// LakeFS API endpoint (e.g., "http://lakefs:8000")
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DbConfig {
    /// Database URL; `sqlite:` and `postgres:` schemes are supported
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Secret for session cookie validation (issuance happens elsewhere)
    pub session_secret: Option<String>,

    /// Static bearer token granting the admin API surface
    pub admin_secret_token: Option<String>,
}

/// Initial quota grants. `None` = unlimited.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct QuotaConfig {
    pub default_user_private_quota_bytes: Option<i64>,
    pub default_user_public_quota_bytes: Option<i64>,
    pub default_org_private_quota_bytes: Option<i64>,
    pub default_org_public_quota_bytes: Option<i64>,
}

// Default values
fn default_listen_addr() -> String {
    "0.0.0.0:48888".to_string()
}

fn default_fanout() -> usize {
    8
}

fn default_outbound_timeout() -> u64 {
    30
}

fn default_enable_cors() -> bool {
    true
}

fn default_base_url() -> String {
    "http://localhost:48888".to_string()
}

fn default_api_base() -> String {
    "/api".to_string()
}

fn default_inline_threshold() -> u64 {
    10 * 1024 * 1024
}

fn default_git_lfs_threshold() -> u64 {
    1024 * 1024
}

fn default_lfs_history_keep() -> usize {
    5
}

fn default_presign_upload_expiry() -> u64 {
    15 * 60
}

fn default_presign_download_expiry() -> u64 {
    60 * 60
}

fn default_staging_ttl() -> u64 {
    24 * 60 * 60
}

fn default_s3_region() -> String {
    "us-east-1".to_string()
}

fn default_force_path_style() -> bool {
    true
}

fn default_signature_version() -> String {
    "s3v4".to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            fanout: default_fanout(),
            outbound_timeout_secs: default_outbound_timeout(),
            enable_cors: default_enable_cors(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_base: default_api_base(),
            inline_threshold_bytes: default_inline_threshold(),
            git_lfs_threshold_bytes: default_git_lfs_threshold(),
            lfs_history_keep: default_lfs_history_keep(),
            presign_upload_expiry_seconds: default_presign_upload_expiry(),
            presign_download_expiry_seconds: default_presign_download_expiry(),
            staging_upload_ttl_seconds: default_staging_ttl(),
            debug_log_payloads: false,
        }
    }
}

impl HubConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration with priority: file > env > defaults.
    ///
    /// Supported environment variables:
    /// - KOHAKU_LISTEN_ADDR: HTTP listen address
    /// - KOHAKU_BASE_URL: public hub URL
    /// - KOHAKU_DB_URL: database URL
    /// - KOHAKU_S3_ENDPOINT / KOHAKU_S3_PUBLIC_ENDPOINT
    /// - KOHAKU_S3_BUCKET / KOHAKU_S3_ACCESS_KEY / KOHAKU_S3_SECRET_KEY
    /// - KOHAKU_LAKEFS_ENDPOINT / KOHAKU_LAKEFS_ACCESS_KEY / KOHAKU_LAKEFS_SECRET_KEY
    /// - KOHAKU_SESSION_SECRET / KOHAKU_ADMIN_SECRET_TOKEN
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let mut config = match config_file {
            Some(path) if path.exists() => {
                tracing::info!("Loading configuration from file: {:?}", path);
                Self::from_file(path)?
            }
            Some(path) => {
                anyhow::bail!("Config file not found: {:?}", path);
            }
            None => {
                // No file: env must provide the required sections.
                Self::from_env_only()?
            }
        };

        config.merge_with_env();
        Ok(config)
    }

    fn from_env_only() -> Result<Self> {
        let need = |key: &str| -> Result<String> {
            std::env::var(key).map_err(|_| anyhow::anyhow!("Missing required env var: {}", key))
        };

        Ok(Self {
            server: HttpConfig::default(),
            app: AppConfig::default(),
            s3: S3Config {
                endpoint: need("KOHAKU_S3_ENDPOINT")?,
                public_endpoint: std::env::var("KOHAKU_S3_PUBLIC_ENDPOINT").ok(),
                bucket: need("KOHAKU_S3_BUCKET")?,
                access_key: need("KOHAKU_S3_ACCESS_KEY")?,
                secret_key: need("KOHAKU_S3_SECRET_KEY")?,
                region: default_s3_region(),
                force_path_style: default_force_path_style(),
                signature_version: default_signature_version(),
            },
            lakefs: LakeFsConfig {
                endpoint: need("KOHAKU_LAKEFS_ENDPOINT")?,
                access_key: need("KOHAKU_LAKEFS_ACCESS_KEY")?,
                secret_key: need("KOHAKU_LAKEFS_SECRET_KEY")?,
            },
            db: DbConfig {
                url: need("KOHAKU_DB_URL")?,
            },
            auth: AuthConfig::default(),
            quota: QuotaConfig::default(),
        })
    }

    /// Override file-provided values from the environment (env wins).
    fn merge_with_env(&mut self) {
        if let Ok(addr) = std::env::var("KOHAKU_LISTEN_ADDR") {
            self.server.listen_addr = addr;
        }
        if let Ok(url) = std::env::var("KOHAKU_BASE_URL") {
            self.app.base_url = url;
        }
        if let Ok(url) = std::env::var("KOHAKU_DB_URL") {
            self.db.url = url;
        }
        if let Ok(ep) = std::env::var("KOHAKU_S3_ENDPOINT") {
            self.s3.endpoint = ep;
        }
        if let Ok(ep) = std::env::var("KOHAKU_S3_PUBLIC_ENDPOINT") {
            self.s3.public_endpoint = Some(ep);
        }
        if let Ok(bucket) = std::env::var("KOHAKU_S3_BUCKET") {
            self.s3.bucket = bucket;
        }
        if let Ok(key) = std::env::var("KOHAKU_S3_ACCESS_KEY") {
            self.s3.access_key = key;
        }
        if let Ok(key) = std::env::var("KOHAKU_S3_SECRET_KEY") {
            self.s3.secret_key = key;
        }
        if let Ok(ep) = std::env::var("KOHAKU_LAKEFS_ENDPOINT") {
            self.lakefs.endpoint = ep;
        }
        if let Ok(key) = std::env::var("KOHAKU_LAKEFS_ACCESS_KEY") {
            self.lakefs.access_key = key;
        }
        if let Ok(key) = std::env::var("KOHAKU_LAKEFS_SECRET_KEY") {
            self.lakefs.secret_key = key;
        }
        if let Ok(secret) = std::env::var("KOHAKU_SESSION_SECRET") {
            self.auth.session_secret = Some(secret);
        }
        if let Ok(token) = std::env::var("KOHAKU_ADMIN_SECRET_TOKEN") {
            self.auth.admin_secret_token = Some(token);
        }
    }

    /// Parse listen address as SocketAddr
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        Ok(self.server.listen_addr.parse()?)
    }

    /// Endpoint to embed in pre-signed URLs handed to clients
    pub fn s3_public_endpoint(&self) -> &str {
        self.s3
            .public_endpoint
            .as_deref()
            .unwrap_or(&self.s3.endpoint)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.socket_addr()?;

        if self.s3.signature_version != "s3v4" {
            anyhow::bail!(
                "Unsupported s3.signature_version: {}",
                self.s3.signature_version
            );
        }
        if self.app.inline_threshold_bytes == 0 {
            anyhow::bail!("inline_threshold_bytes must be > 0");
        }
        if self.app.lfs_history_keep == 0 {
            anyhow::bail!("lfs_history_keep must be >= 1");
        }
        if !self.db.url.starts_with("sqlite:") && !self.db.url.starts_with("postgres:") {
            anyhow::bail!("Unsupported db.url scheme: {}", self.db.url);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
[s3]
endpoint = "http://127.0.0.1:9000"
bucket = "kohakuhub"
access_key = "minioadmin"
secret_key = "minioadmin"

[lakefs]
endpoint = "http://127.0.0.1:8000"
access_key = "AKIA"
secret_key = "SECRET"

[db]
url = "sqlite::memory:"
"#;

    #[test]
    fn minimal_file_gets_defaults() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(MINIMAL.as_bytes()).unwrap();

        let config = HubConfig::from_file(f.path()).unwrap();
        assert_eq!(config.server.listen_addr, "0.0.0.0:48888");
        assert_eq!(config.app.inline_threshold_bytes, 10 * 1024 * 1024);
        assert_eq!(config.app.git_lfs_threshold_bytes, 1024 * 1024);
        assert_eq!(config.app.lfs_history_keep, 5);
        assert!(config.s3.force_path_style);
        config.validate().unwrap();
    }

    #[test]
    fn public_endpoint_falls_back() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(MINIMAL.as_bytes()).unwrap();

        let config = HubConfig::from_file(f.path()).unwrap();
        assert_eq!(config.s3_public_endpoint(), "http://127.0.0.1:9000");
    }

    #[test]
    fn rejects_bad_db_scheme() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(MINIMAL.replace("sqlite::memory:", "mysql://x").as_bytes())
            .unwrap();

        let config = HubConfig::from_file(f.path()).unwrap();
        assert!(config.validate().is_err());
    }
}
