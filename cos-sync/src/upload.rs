use std::io::SeekFrom;
use std::path::Path;

use cos_core::{SliceAck, UploadReceipt};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use sha1::{Digest, Sha1};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::info;

use super::engine::{SyncEngine, SyncError, join_in_order};

/// Files at or above this size go through the resumable slice protocol;
/// smaller files are sent in one request.
pub const SLICE_UPLOAD_THRESHOLD: u64 = 10 * 1024 * 1024;

impl SyncEngine {
    /// Uploads one local file to `remote_path`, choosing whole-file or
    /// sliced transfer by size.
    pub async fn upload_file(
        &self,
        source: &Path,
        bucket: &str,
        remote_path: &str,
    ) -> Result<UploadReceipt, SyncError> {
        let size = tokio::fs::metadata(source).await?.len();
        let receipt = if size < SLICE_UPLOAD_THRESHOLD {
            let _permit = self.permit().await?;
            let content = tokio::fs::read(source).await?;
            self.client.upload(bucket, remote_path, content).await?
        } else {
            let ack = self.upload_sliced(source, bucket, remote_path).await?;
            UploadReceipt {
                message: ack.message,
                access_url: ack.access_url,
            }
        };
        info!(path = remote_path, message = %receipt.message, "uploaded file");
        Ok(receipt)
    }

    /// Resumable slice upload of one file.
    ///
    /// The server is authoritative for the session id, the starting offset
    /// and the slice size: each is captured from the first response that
    /// carries it and never recomputed. The loop itself is bounded by the
    /// locally tracked offset, independent of the server's reply sequence.
    pub async fn upload_sliced(
        &self,
        source: &Path,
        bucket: &str,
        remote_path: &str,
    ) -> Result<SliceAck, SyncError> {
        let _permit = self.permit().await?;
        let mut file = File::open(source).await?;
        let (sha, file_size) = hash_file(&mut file).await?;

        let mut ack = self
            .client
            .prepare_slice(bucket, remote_path, file_size, &sha)
            .await?;

        let mut session_id: Option<String> = None;
        let mut next_offset: Option<i64> = None;
        let mut slice_size: Option<i64> = None;
        loop {
            if ack.access_url.is_some() {
                // Dedup hit, or a previous session already finished.
                return Ok(ack);
            }
            let session = match &session_id {
                Some(session) => session.clone(),
                None => {
                    let session = ack.session.clone().ok_or(SyncError::SliceField("session"))?;
                    session_id = Some(session.clone());
                    session
                }
            };
            let offset = match next_offset {
                Some(offset) => offset,
                None => {
                    let offset = ack
                        .offset
                        .filter(|offset| *offset >= 0)
                        .ok_or(SyncError::SliceField("offset"))?;
                    next_offset = Some(offset);
                    offset
                }
            };
            if slice_size.is_none() {
                slice_size = ack.slice_size.filter(|size| *size > 0);
            }
            let step = slice_size.ok_or(SyncError::SliceField("slice_size"))?;

            file.seek(SeekFrom::Start(offset as u64)).await?;
            // A short read at end of file is expected; whatever was read is
            // sent as the final slice.
            let slice = read_up_to(&mut file, step as usize).await?;
            ack = self
                .client
                .upload_slice(bucket, remote_path, &session, offset, slice)
                .await?;

            next_offset = Some(offset + step);
            if offset + step > file_size {
                return Ok(ack);
            }
        }
    }

    /// Mirrors a local directory onto `remote_path`, fanning out over the
    /// entries with bounded concurrency. On error the completion state of
    /// sibling branches is unspecified.
    pub fn upload_folder(
        &self,
        local_dir: &Path,
        bucket: &str,
        remote_path: &str,
    ) -> BoxFuture<'static, Result<(), SyncError>> {
        let engine = self.clone();
        let local_dir = local_dir.to_path_buf();
        let bucket = bucket.to_string();
        let remote_path = remote_path.to_string();
        async move {
            engine
                .upload_folder_inner(&local_dir, &bucket, &remote_path)
                .await
        }
        .boxed()
    }

    async fn upload_folder_inner(
        &self,
        local_dir: &Path,
        bucket: &str,
        remote_path: &str,
    ) -> Result<(), SyncError> {
        let mut listing = tokio::fs::read_dir(local_dir).await?;
        let mut children = Vec::new();
        while let Some(entry) = listing.next_entry().await? {
            let name = entry
                .file_name()
                .into_string()
                .map_err(|name| SyncError::InvalidName(name.to_string_lossy().into_owned()))?;
            let is_dir = entry.file_type().await?.is_dir();
            children.push((name, is_dir));
        }

        let receipt = {
            let _permit = self.permit().await?;
            self.client.create_folder(bucket, remote_path).await?
        };
        info!(path = remote_path, message = %receipt.message, "created folder");

        let mut handles = Vec::with_capacity(children.len());
        for (name, is_dir) in children {
            let child_local = local_dir.join(&name);
            let child_remote = format!("{remote_path}/{name}");
            if is_dir {
                handles.push(tokio::spawn(self.upload_folder(
                    &child_local,
                    bucket,
                    &child_remote,
                )));
            } else {
                let engine = self.clone();
                let bucket = bucket.to_string();
                handles.push(tokio::spawn(async move {
                    engine
                        .upload_file(&child_local, &bucket, &child_remote)
                        .await
                        .map(|_| ())
                }));
            }
        }
        join_in_order(handles).await?;
        Ok(())
    }
}

async fn hash_file(file: &mut File) -> Result<(String, i64), SyncError> {
    let mut hasher = Sha1::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut total: u64 = 0;
    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
        total += read as u64;
    }
    Ok((format!("{:x}", hasher.finalize()), total as i64))
}

async fn read_up_to(file: &mut File, limit: usize) -> Result<Vec<u8>, SyncError> {
    let mut buf = vec![0u8; limit];
    let mut filled = 0;
    while filled < limit {
        let read = file.read(&mut buf[filled..]).await?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    buf.truncate(filled);
    Ok(buf)
}
