use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::info;

use super::engine::{SyncEngine, SyncError, join_in_order};
use super::paths::local_target;

/// Expiry of the signed access URL used for private-bucket downloads.
pub const SIGNED_DOWNLOAD_EXPIRY_SECS: i64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketAuthority {
    PublicRead,
    Private,
}

impl SyncEngine {
    /// Visibility of a bucket, read from the `authority` marker on the
    /// bucket-root stat. Anything but an explicit public-read marker is
    /// treated as private.
    pub async fn bucket_authority(&self, bucket: &str) -> Result<BucketAuthority, SyncError> {
        let stat = self.client.stat_bucket(bucket).await?;
        if stat.is_public_read() {
            Ok(BucketAuthority::PublicRead)
        } else {
            Ok(BucketAuthority::Private)
        }
    }

    /// Streams one remote object to `target` via plain GET, written to a
    /// partial file and renamed into place once complete.
    pub async fn download_file(
        &self,
        bucket: &str,
        remote_path: &str,
        target: &Path,
    ) -> Result<(), SyncError> {
        let _permit = self.permit().await?;
        let url = match self.bucket_authority(bucket).await? {
            BucketAuthority::PublicRead => self.client.access_url(bucket, remote_path)?,
            BucketAuthority::Private => {
                self.client
                    .signed_access_url(bucket, remote_path, SIGNED_DOWNLOAD_EXPIRY_SECS)?
            }
        };
        let response = self.http.get(url).send().await?.error_for_status()?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let partial = partial_path(target);
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        file.sync_all().await?;
        tokio::fs::rename(partial, target).await?;

        info!(path = remote_path, target = %target.display(), "downloaded file");
        Ok(())
    }

    /// Mirrors the remote subtree at `remote_path` under `local_dir`:
    /// directories are materialized first, then files download concurrently.
    pub async fn download_folder(
        &self,
        bucket: &str,
        remote_path: &str,
        local_dir: &Path,
    ) -> Result<(), SyncError> {
        tokio::fs::create_dir_all(local_dir).await?;
        let snapshot = self.scan(bucket, remote_path, -1).await?;

        for entry in snapshot.iter().filter(|entry| entry.is_dir()) {
            let target = local_target(local_dir, remote_path, &entry.path)?;
            tokio::fs::create_dir_all(&target).await?;
            info!(target = %target.display(), "created local directory");
        }

        let mut handles = Vec::new();
        for entry in snapshot.into_iter().filter(|entry| !entry.is_dir()) {
            let engine = self.clone();
            let bucket = bucket.to_string();
            let target = local_target(local_dir, remote_path, &entry.path)?;
            handles.push(tokio::spawn(async move {
                engine.download_file(&bucket, &entry.path, &target).await
            }));
        }
        join_in_order(handles).await?;
        Ok(())
    }
}

fn partial_path(target: &Path) -> PathBuf {
    target.with_extension(format!(
        "{}partial",
        target
            .extension()
            .map(|ext| format!("{}.", ext.to_string_lossy()))
            .unwrap_or_default()
    ))
}
