// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Bounded, checksum-verified file transfer

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use diagnostics::*;
use futures::{StreamExt, TryStreamExt, stream};
use object_store::WriteMultipart;
use pitlog::{ContentHasher, Deadline, RepositoryError, RetryPolicy, sha256_hex};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StewardError};
use crate::stores::Located;

const PART_SIZE: usize = 16 * 1024 * 1024;
const PARTS_IN_FLIGHT: usize = 4;

/// Transfer settings shared by backup and restore
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferOptions {
    /// Files copied at once
    pub concurrency: usize,
    /// Files at least this large are streamed with multipart uploads
    pub multipart_threshold: u64,
    pub retry: RetryPolicy,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            concurrency: 8,
            multipart_threshold: 64 * 1024 * 1024,
            retry: RetryPolicy::default(),
        }
    }
}

/// A bounded run stopped at its first failure
#[derive(Debug)]
pub(crate) struct Aborted {
    pub completed: usize,
    pub total: usize,
    pub source: StewardError,
}

impl From<Aborted> for StewardError {
    fn from(aborted: Aborted) -> Self {
        StewardError::PartialFailure {
            completed: aborted.completed,
            total: aborted.total,
            source: Box::new(aborted.source),
        }
    }
}

/// Run `op` over `items`, at most `concurrency` at a time.
///
/// The first failure drops every transfer still in flight.
pub(crate) async fn for_each_bounded<T, F, Fut>(
    items: Vec<T>,
    concurrency: usize,
    deadline: &Deadline,
    op: F,
) -> std::result::Result<usize, Aborted>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let total = items.len();
    let completed = AtomicUsize::new(0);
    let result = stream::iter(items)
        .map(Ok::<T, StewardError>)
        .try_for_each_concurrent(concurrency.max(1), |item| {
            let transfer = op(item);
            let completed = &completed;
            async move {
                deadline.check("file copy")?;
                transfer.await?;
                _ = completed.fetch_add(1, Ordering::Relaxed);
                Ok::<(), StewardError>(())
            }
        })
        .await;

    let completed = completed.load(Ordering::Relaxed);
    match result {
        Ok(()) => Ok(completed),
        Err(source) => Err(Aborted {
            completed,
            total,
            source,
        }),
    }
}

pub(crate) fn verify_checksum(label: &str, expected: &str, bytes: &[u8]) -> Result<()> {
    let actual = sha256_hex(bytes);
    if actual != expected {
        return Err(RepositoryError::ChecksumMismatch {
            path: label.to_string(),
            expected: expected.to_string(),
            actual,
        }
        .into());
    }
    Ok(())
}

/// Copy `src` to `dst`, failing with `ChecksumMismatch` unless the bytes
/// hash to `expected`. Nothing is left at `dst` on mismatch.
pub(crate) async fn copy_verified(
    label: &str,
    src: &Located,
    dst: &Located,
    expected: &str,
    size: u64,
    options: &TransferOptions,
) -> Result<()> {
    let retry = &options.retry;
    if size < options.multipart_threshold {
        let bytes = retry.get_bytes(src.store.as_ref(), &src.path).await?;
        verify_checksum(label, expected, &bytes)?;
        retry.put(dst.store.as_ref(), &dst.path, bytes).await?;
        return Ok(());
    }

    debug!("Streaming {label} ({size} bytes) in parts", label: label, size: size);
    let mut source = src.store.get(&src.path).await?.into_stream();
    let upload = dst.store.put_multipart(&dst.path).await?;
    let mut writer = WriteMultipart::new_with_chunk_size(upload, PART_SIZE);
    let mut hasher = ContentHasher::new();

    let streamed = async {
        while let Some(chunk) = source.try_next().await? {
            writer.wait_for_capacity(PARTS_IN_FLIGHT).await?;
            hasher.update(&chunk);
            writer.write(&chunk);
        }
        Ok::<_, object_store::Error>(())
    }
    .await;
    if let Err(e) = streamed {
        writer.abort().await?;
        return Err(e.into());
    }

    let actual = hasher.finish();
    if actual != expected {
        writer.abort().await?;
        return Err(RepositoryError::ChecksumMismatch {
            path: label.to_string(),
            expected: expected.to_string(),
            actual,
        }
        .into());
    }
    _ = writer.finish().await?;
    Ok(())
}

/// Write already-verified bytes
pub(crate) async fn put_bytes(dst: &Located, bytes: Bytes, options: &TransferOptions) -> Result<()> {
    options
        .retry
        .put(dst.store.as_ref(), &dst.path, bytes)
        .await
        .map_err(StewardError::from)
}
