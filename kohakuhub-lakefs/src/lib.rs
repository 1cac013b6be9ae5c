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

//! KohakuHub Version Store Client
//!
//! Purely async HTTP client for a LakeFS-style branch/commit service.
//! No business logic; every hub-level decision (permissions, quota,
//! dedup) happens above this crate. Failures map to a small typed error
//! set, and transient upstream faults are retried.

pub mod client;
pub mod error;
pub mod types;

pub use client::LakeFsClient;
pub use error::{LakeFsError, Result};
pub use types::*;
