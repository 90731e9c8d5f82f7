mod delete;
mod download;
mod engine;
mod paths;
mod scan;
mod upload;

pub use download::{BucketAuthority, SIGNED_DOWNLOAD_EXPIRY_SECS};
pub use engine::{SyncConfig, SyncEngine, SyncError};
pub use paths::{PathError, local_target};
pub use scan::{RemoteEntry, SCAN_PAGE_SIZE};
pub use upload::SLICE_UPLOAD_THRESHOLD;
