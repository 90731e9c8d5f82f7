use std::{env, sync::Arc};

use cos_core::{CosClient, CosError};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinHandle};

use super::paths::PathError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("api error: {0}")]
    Api(#[from] CosError),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("path error: {0}")]
    Path(#[from] PathError),
    #[error("slice negotiation response missing {0}")]
    SliceField(&'static str),
    #[error("list page reported has_more without a continuation cursor")]
    MissingCursor,
    #[error("local name is not valid unicode: {0}")]
    InvalidName(String),
    #[error("worker task failed: {0}")]
    Worker(#[from] JoinError),
    #[error("concurrency limiter is closed")]
    ConcurrencyClosed,
}

#[derive(Debug, Clone, Copy)]
pub struct SyncConfig {
    /// Upper bound on concurrently in-flight remote operations across the
    /// whole engine. Permits are held around single calls or single-file
    /// transfers, never across a recursion step.
    pub max_in_flight: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_in_flight: read_limit("COS_SYNC_CONCURRENCY", 32),
        }
    }
}

#[derive(Clone)]
pub struct SyncEngine {
    pub(crate) client: CosClient,
    pub(crate) http: reqwest::Client,
    limit: Arc<Semaphore>,
}

impl SyncEngine {
    pub fn new(client: CosClient) -> Self {
        Self::with_config(client, SyncConfig::default())
    }

    pub fn with_config(client: CosClient, config: SyncConfig) -> Self {
        Self {
            client,
            http: reqwest::Client::new(),
            limit: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
        }
    }

    pub fn client(&self) -> &CosClient {
        &self.client
    }

    pub(crate) async fn permit(&self) -> Result<OwnedSemaphorePermit, SyncError> {
        self.limit
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| SyncError::ConcurrencyClosed)
    }
}

/// Fan-in for spawned per-entry workers: waits for every child, keeps the
/// successful results in spawn order, and reports the first error observed.
/// Siblings already running are not canceled.
pub(crate) async fn join_in_order<T>(
    handles: Vec<JoinHandle<Result<T, SyncError>>>,
) -> Result<Vec<T>, SyncError> {
    let mut results = Vec::with_capacity(handles.len());
    let mut first_error = None;
    for handle in handles {
        match handle.await {
            Ok(Ok(value)) => results.push(value),
            Ok(Err(err)) => {
                first_error.get_or_insert(err);
            }
            Err(err) => {
                first_error.get_or_insert(SyncError::Worker(err));
            }
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(results),
    }
}

fn read_limit(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}
