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

//! Identity resolution from request headers.
//!
//! Token issuance and session login live outside the core; this module
//! only consumes credentials: a bearer token resolved against the token
//! table, the static admin token, or nothing (anonymous).

use axum::http::HeaderMap;
use base64::Engine;

use kohakuhub_meta::User;

use crate::error::{ApiError, Result};
use crate::state::AppState;

#[derive(Debug, Clone)]
pub enum Identity {
    Anonymous,
    User(User),
    Admin,
}

impl Identity {
    pub fn user(&self) -> Option<&User> {
        match self {
            Identity::User(user) => Some(user),
            _ => None,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Identity::Anonymous)
    }

    pub fn username(&self) -> &str {
        match self {
            Identity::User(user) => &user.username,
            Identity::Admin => "admin",
            Identity::Anonymous => "anonymous",
        }
    }
}

/// Resolve the caller. Unknown or inactive tokens are anonymous rather
/// than an error; endpoints that need identity reject later.
pub async fn identify(state: &AppState, headers: &HeaderMap) -> Result<Identity> {
    let Some(token) = extract_token(headers) else {
        return Ok(Identity::Anonymous);
    };

    if let Some(admin_token) = &state.config.auth.admin_secret_token {
        if token == *admin_token {
            return Ok(Identity::Admin);
        }
    }

    match state.meta.lookup_token(&token).await? {
        Some(user) => Ok(Identity::User(user)),
        None => Ok(Identity::Anonymous),
    }
}

/// Like `identify`, but anonymous is an error.
pub async fn require_user(state: &AppState, headers: &HeaderMap) -> Result<User> {
    match identify(state, headers).await? {
        Identity::User(user) => Ok(user),
        Identity::Admin => Err(ApiError::BadRequest(
            "admin token cannot act as a user".into(),
        )),
        Identity::Anonymous => Err(ApiError::Forbidden("authentication required".into())),
    }
}

/// Admin surface guard.
pub async fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<()> {
    match identify(state, headers).await? {
        Identity::Admin => Ok(()),
        _ => Err(ApiError::Forbidden("admin token required".into())),
    }
}

/// Pull a credential out of `Authorization`: bearer tokens from the HF
/// client, basic auth passwords from git/git-lfs (username is ignored,
/// the token rides in the password slot).
fn extract_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    if let Some(token) = value.strip_prefix("Bearer ") {
        return Some(token.trim().to_string());
    }
    if let Some(encoded) = value.strip_prefix("Basic ") {
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .ok()?;
        let text = String::from_utf8(decoded).ok()?;
        let (_, password) = text.split_once(':')?;
        if !password.is_empty() {
            return Some(password.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::AUTHORIZATION;

    #[test]
    fn extracts_bearer_and_basic() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Bearer hf_abc".parse().unwrap());
        assert_eq!(extract_token(&headers).as_deref(), Some("hf_abc"));

        let encoded = base64::engine::general_purpose::STANDARD.encode("user:hf_xyz");
        headers.insert(
            AUTHORIZATION,
            format!("Basic {encoded}").parse().unwrap(),
        );
        assert_eq!(extract_token(&headers).as_deref(), Some("hf_xyz"));

        headers.insert(AUTHORIZATION, "Digest whatever".parse().unwrap());
        assert_eq!(extract_token(&headers), None);
    }

    #[test]
    fn empty_basic_password_is_anonymous() {
        let mut headers = HeaderMap::new();
        let encoded = base64::engine::general_purpose::STANDARD.encode("user:");
        headers.insert(
            AUTHORIZATION,
            format!("Basic {encoded}").parse().unwrap(),
        );
        assert_eq!(extract_token(&headers), None);
    }
}
