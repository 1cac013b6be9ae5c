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

//! Jittered exponential backoff for transient S3 faults.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::StorageError;

const MAX_RETRIES: u32 = 5;
const BASE_DELAY_MS: u64 = 100;
const MAX_DELAY_MS: u64 = 5_000;

/// Run `op` until it succeeds, fails non-transiently, or exhausts the
/// retry budget. Only `StorageError::Transient` is retried.
pub async fn with_retries<T, F, Fut>(name: &str, mut op: F) -> crate::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = crate::Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(StorageError::Transient(msg)) if attempt < MAX_RETRIES => {
                attempt += 1;
                let delay = backoff_delay(attempt);
                tracing::warn!(
                    op = name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %msg,
                    "transient storage failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let exp = BASE_DELAY_MS.saturating_mul(1u64 << attempt.min(10));
    let capped = exp.min(MAX_DELAY_MS);
    // Full jitter: anywhere between half and the full backoff.
    let jittered = rand::thread_rng().gen_range(capped / 2..=capped);
    Duration::from_millis(jittered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retries("test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(StorageError::Transient("flaky".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_transient_fails_immediately() {
        let calls = AtomicU32::new(0);
        let result: crate::Result<()> = with_retries("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StorageError::NotFound("gone".into())) }
        })
        .await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_grows_and_caps() {
        for attempt in 1..=8 {
            let d = backoff_delay(attempt);
            assert!(d.as_millis() as u64 <= MAX_DELAY_MS);
            assert!(d.as_millis() as u64 >= BASE_DELAY_MS / 2);
        }
    }
}
