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

//! HTTP surface assembly.
//!
//! Three families of routes share one router: the HuggingFace JSON API
//! under `/api`, the file resolve endpoints, and the Git Smart HTTP +
//! LFS endpoints. Dataset and space repos carry their type as a path
//! prefix; models go bare, exactly as the upstream hub does it.

pub mod admin;
pub mod commit;
pub mod git;
pub mod lfs;
pub mod org;
pub mod repos;
pub mod resolve;
pub mod tree;
pub mod user;

use axum::routing::{delete, get, post, put};
use axum::Router;

use kohakuhub_core::RepoType;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let mut app = Router::new()
        // Repo lifecycle
        .route("/api/repos/create", post(repos::create))
        .route("/api/repos/delete", delete(repos::remove))
        .route("/api/repos/move", post(repos::relocate))
        // Listing / info / settings
        .route("/api/:rtype", get(repos::list))
        .route("/api/:rtype/:namespace/:name", get(repos::info))
        .route(
            "/api/:rtype/:namespace/:name/revision/:revision",
            get(repos::info_at_revision),
        )
        .route(
            "/api/:rtype/:namespace/:name/settings",
            put(repos::settings),
        )
        .route(
            "/api/:rtype/:namespace/:name/squash",
            post(repos::squash),
        )
        // Tree and metadata
        .route("/api/:rtype/:namespace/:name/tree/:revision", get(tree::list_root))
        .route(
            "/api/:rtype/:namespace/:name/tree/:revision/*path",
            get(tree::list_path),
        )
        .route(
            "/api/:rtype/:namespace/:name/paths-info/:revision",
            post(tree::paths_info),
        )
        .route(
            "/api/:rtype/:namespace/:name/commits/:revision",
            get(tree::commit_log),
        )
        .route("/api/:rtype/:namespace/:name/refs", get(tree::refs))
        .route(
            "/api/:rtype/:namespace/:name/branch/:branch",
            post(tree::create_branch).delete(tree::delete_branch),
        )
        .route(
            "/api/:rtype/:namespace/:name/tag/:tag",
            post(tree::create_tag).delete(tree::delete_tag),
        )
        // Upload path
        .route(
            "/api/:rtype/:namespace/:name/preupload/:revision",
            post(commit::preupload),
        )
        .route(
            "/api/:rtype/:namespace/:name/commit/:revision",
            post(commit::create_commit),
        )
        // LFS verify (the batch API hands this URL out). The two leading
        // captures are `{namespace}/{name}.git`; param names reuse the
        // `/api` tree's spelling because the router requires one name
        // per position.
        .route(
            "/api/:rtype/:namespace/info/lfs/verify",
            post(lfs::verify),
        )
        // Identity & keys
        .route("/api/whoami-v2", get(user::whoami))
        .route("/api/user/keys", get(user::list_keys).post(user::add_key))
        .route("/api/user/keys/:key_id", delete(user::delete_key))
        // Organizations
        .route("/api/organizations", post(org::create))
        .route("/api/organizations/:name", get(org::info))
        .route("/api/organizations/:name/members", post(org::add_member))
        .route(
            "/api/organizations/:name/members/:username",
            delete(org::remove_member),
        )
        // Admin surface
        .route(
            "/api/admin/quota/:namespace/recompute",
            post(admin::recompute_quota),
        )
        .route("/api/admin/quota/:namespace", put(admin::set_quota));

    // Resolve + git + lfs-batch per repo type; models are unprefixed and
    // the handlers recover the type from the path via `rtype_from_uri`.
    for prefix in ["", "/datasets", "/spaces"] {
        app = app
            .route(
                &format!("{prefix}/:namespace/:name/resolve/:revision/*path"),
                get(resolve::get_file).head(resolve::head_file),
            )
            .route(
                &format!("{prefix}/:namespace/:name/info/refs"),
                get(git::info_refs),
            )
            .route(
                &format!("{prefix}/:namespace/:name/git-upload-pack"),
                post(git::upload_pack),
            )
            .route(
                &format!("{prefix}/:namespace/:name/git-receive-pack"),
                post(git::receive_pack),
            )
            .route(&format!("{prefix}/:namespace/:name/HEAD"), get(git::head_ref))
            .route(
                &format!("{prefix}/:namespace/:name/info/lfs/objects/batch"),
                post(lfs::batch),
            );
    }

    app.with_state(state)
}

/// Repo type for the git/resolve family, recovered from the request
/// path prefix ("" = model).
pub fn rtype_from_uri(uri: &axum::http::Uri) -> RepoType {
    let path = uri.path();
    if path.starts_with("/datasets/") {
        RepoType::Dataset
    } else if path.starts_with("/spaces/") {
        RepoType::Space
    } else {
        RepoType::Model
    }
}
