mod auth;
mod client;
mod paths;

pub use auth::{Credentials, Signer};
pub use client::{
    CosClient, CosError, EntryInfo, ListOrder, ListPage, ListPattern, PATH_IS_FILE_CODE, Receipt,
    SliceAck, StatEntry, UploadReceipt,
};
pub use paths::norm_path;
