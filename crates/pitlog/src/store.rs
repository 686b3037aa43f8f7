// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Object store helpers shared by the repository and the executors

use std::future::Future;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use bytes::Bytes;
use diagnostics::*;
use futures::TryStreamExt;
use object_store::path::Path;
use object_store::{ObjectMeta, ObjectStore, PutMode, PutOptions, PutPayload};
use serde::{Deserialize, Serialize};

/// Log a retry outside the generic retry loop
fn log_retry(operation: &str, err: &object_store::Error, delay: Duration) {
    let operation = operation.to_string();
    let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    let error = err.to_string();
    warn!("Retrying {operation} in {delay_ms}ms: {error}", operation: operation, delay_ms: delay_ms, error: error);
}

/// Exponential backoff for transient store failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total tries including the first
    pub max_attempts: usize,
    #[serde(with = "millis")]
    pub min_delay: Duration,
    #[serde(with = "millis")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            min_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Errors worth another attempt. Outcomes that describe the object itself
/// (missing, already present, precondition) are answers, not failures.
#[must_use]
pub fn is_transient(err: &object_store::Error) -> bool {
    !matches!(
        err,
        object_store::Error::NotFound { .. }
            | object_store::Error::AlreadyExists { .. }
            | object_store::Error::Precondition { .. }
            | object_store::Error::NotModified { .. }
            | object_store::Error::NotImplemented
            | object_store::Error::NotSupported { .. }
            | object_store::Error::InvalidPath { .. }
            | object_store::Error::PermissionDenied { .. }
            | object_store::Error::Unauthenticated { .. }
            | object_store::Error::UnknownConfigurationKey { .. }
    )
}

impl RetryPolicy {
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_attempts.saturating_sub(1))
            .with_jitter()
    }

    /// Run an idempotent store operation, retrying transient failures
    pub async fn run<T, F, Fut>(&self, operation: &str, op: F) -> object_store::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = object_store::Result<T>>,
    {
        op.retry(self.backoff())
            .sleep(tokio::time::sleep)
            .when(is_transient)
            .notify(|err: &object_store::Error, delay: Duration| log_retry(operation, err, delay))
            .await
    }

    pub async fn get_bytes(&self, store: &dyn ObjectStore, path: &Path) -> object_store::Result<Bytes> {
        self.run("get", move || async move { store.get(path).await?.bytes().await })
            .await
    }

    pub async fn head(&self, store: &dyn ObjectStore, path: &Path) -> object_store::Result<ObjectMeta> {
        self.run("head", move || store.head(path)).await
    }

    /// `head` that maps `NotFound` to `None`
    pub async fn exists(&self, store: &dyn ObjectStore, path: &Path) -> object_store::Result<Option<ObjectMeta>> {
        match self.head(store, path).await {
            Ok(meta) => Ok(Some(meta)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn put(&self, store: &dyn ObjectStore, path: &Path, bytes: Bytes) -> object_store::Result<()> {
        self.run("put", move || {
            let payload = PutPayload::from(bytes.clone());
            async move { store.put(path, payload).await.map(|_| ()) }
        })
        .await
    }

    /// Create-only put. `Ok(false)` when the object already exists.
    ///
    /// A retried create that reports `AlreadyExists` may have been our own
    /// earlier attempt; callers that need to tell the two apart compare the
    /// stored bytes.
    pub async fn put_if_absent(
        &self,
        store: &dyn ObjectStore,
        path: &Path,
        bytes: Bytes,
    ) -> object_store::Result<bool> {
        let result = self
            .run("put_if_absent", move || {
                let payload = PutPayload::from(bytes.clone());
                let opts = PutOptions {
                    mode: PutMode::Create,
                    ..PutOptions::default()
                };
                async move { store.put_opts(path, payload, opts).await.map(|_| ()) }
            })
            .await;
        match result {
            Ok(()) => Ok(true),
            Err(object_store::Error::AlreadyExists { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn list(&self, store: &dyn ObjectStore, prefix: &Path) -> object_store::Result<Vec<ObjectMeta>> {
        self.run("list", move || store.list(Some(prefix)).try_collect::<Vec<_>>())
            .await
    }
}
