use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tracing::info;

use super::engine::{SyncEngine, SyncError, join_in_order};

impl SyncEngine {
    /// Recursively deletes the remote subtree at `path`: children first,
    /// concurrently, then the folder entry itself. When the path turns out
    /// to be a single file, only that file is deleted.
    pub fn delete(&self, bucket: &str, path: &str) -> BoxFuture<'static, Result<(), SyncError>> {
        let engine = self.clone();
        let bucket = bucket.to_string();
        let path = path.to_string();
        async move { engine.delete_tree(&bucket, &path).await }.boxed()
    }

    async fn delete_tree(&self, bucket: &str, path: &str) -> Result<(), SyncError> {
        let snapshot = self.scan(bucket, path, 1).await?;
        // The scanner's leaf fallback yields exactly the queried path; in
        // that case there is no folder entry to remove afterwards.
        let root_is_file = snapshot.len() == 1 && snapshot[0].path == path;

        let mut handles = Vec::with_capacity(snapshot.len());
        for entry in snapshot {
            if entry.is_dir() {
                handles.push(tokio::spawn(self.delete(bucket, &entry.path)));
            } else {
                let engine = self.clone();
                let bucket = bucket.to_string();
                handles.push(tokio::spawn(async move {
                    let _permit = engine.permit().await?;
                    if let Some(receipt) = engine.client.delete_file(&bucket, &entry.path).await? {
                        info!(path = %entry.path, message = %receipt.message, "deleted file");
                    }
                    Ok(())
                }));
            }
        }
        join_in_order(handles).await?;

        if root_is_file {
            return Ok(());
        }
        let _permit = self.permit().await?;
        if let Some(receipt) = self.client.delete_folder(bucket, path).await? {
            info!(path, message = %receipt.message, "deleted folder");
        }
        Ok(())
    }
}
