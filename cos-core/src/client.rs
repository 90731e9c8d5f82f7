use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use sha1::{Digest, Sha1};
use thiserror::Error;
use url::Url;

use crate::auth::{Credentials, Signer, unix_now};
use crate::paths::norm_path;

const DEFAULT_BASE_URL: &str = "https://web.file.myqcloud.com/files/v1";
const DEFAULT_ACCESS_HOST: &str = "file.myqcloud.com";
const DEFAULT_SIGN_VALIDITY_SECS: i64 = 600;
const DEFAULT_PAGE_SIZE: u32 = 30;

/// Semantic code returned by directory-oriented operations applied to a
/// leaf path ("this path is a file, not a directory").
pub const PATH_IS_FILE_CODE: i64 = -166;

#[derive(Debug, Error)]
pub enum CosError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned http {status}: {body}")]
    Http { status: StatusCode, body: String },
    #[error("api returned code {code}: {message}")]
    Api {
        status: StatusCode,
        code: i64,
        message: String,
    },
}

impl CosError {
    /// True for the reserved sentinel marking a leaf path (see
    /// [`PATH_IS_FILE_CODE`]).
    pub fn is_path_a_file(&self) -> bool {
        matches!(self, CosError::Api { code, .. } if *code == PATH_IS_FILE_CODE)
    }
}

/// Listing filter, `pattern` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListPattern {
    #[default]
    Both,
    FileOnly,
    DirOnly,
}

impl ListPattern {
    fn as_str(self) -> &'static str {
        match self {
            ListPattern::Both => "eListBoth",
            ListPattern::FileOnly => "eListFileOnly",
            ListPattern::DirOnly => "eListDirOnly",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListOrder {
    #[default]
    Forward,
    Reverse,
}

impl ListOrder {
    fn as_str(self) -> &'static str {
        match self {
            ListOrder::Forward => "0",
            ListOrder::Reverse => "1",
        }
    }
}

/// One directory entry as reported by `list`. An entry with no `sha` is a
/// directory; unrecognized payload fields are retained in `extra`.
#[derive(Debug, Clone, Deserialize)]
pub struct EntryInfo {
    pub name: String,
    #[serde(default)]
    pub sha: Option<String>,
    #[serde(default)]
    pub filesize: Option<i64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One page of a paginated listing. `cursor` is opaque and must be passed
/// back verbatim to continue.
#[derive(Debug, Default, Deserialize)]
pub struct ListPage {
    #[serde(default, rename = "infos")]
    pub entries: Vec<EntryInfo>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default, rename = "context")]
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatEntry {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub sha: Option<String>,
    #[serde(default)]
    pub filesize: Option<i64>,
    #[serde(default)]
    pub authority: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl StatEntry {
    /// Bucket visibility marker from a bucket-root stat.
    pub fn is_public_read(&self) -> bool {
        self.authority.as_deref() == Some("eWPrivateRPublic")
    }
}

/// Acknowledgement of a completed remote mutation.
#[derive(Debug, Clone)]
pub struct Receipt {
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct UploadReceipt {
    pub message: String,
    pub access_url: Option<String>,
}

/// Response to `prepare_slice` and `upload_slice`. A present `access_url`
/// means the transfer is already complete (dedup hit or finished session);
/// otherwise the server dictates session, offset and slice size.
#[derive(Debug, Clone)]
pub struct SliceAck {
    pub message: String,
    pub session: Option<String>,
    pub offset: Option<i64>,
    pub slice_size: Option<i64>,
    pub access_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<T>,
}

struct ResponseParts<T> {
    message: String,
    data: T,
}

#[derive(Debug, Default, Deserialize)]
struct UploadData {
    #[serde(default, alias = "access_url")]
    url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SliceData {
    #[serde(default)]
    session: Option<String>,
    #[serde(default)]
    offset: Option<i64>,
    #[serde(default)]
    slice_size: Option<i64>,
    #[serde(default, alias = "access_url")]
    url: Option<String>,
}

#[derive(Clone)]
pub struct CosClient {
    http: Client,
    base_url: Url,
    access_base_url: Option<Url>,
    signer: Signer,
    sign_validity_secs: i64,
    insert_only: bool,
}

impl CosClient {
    pub fn new(credentials: Credentials) -> Result<Self, CosError> {
        Self::with_base_url(DEFAULT_BASE_URL, credentials)
    }

    pub fn with_base_url(base_url: &str, credentials: Credentials) -> Result<Self, CosError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            access_base_url: None,
            signer: Signer::new(credentials),
            sign_validity_secs: DEFAULT_SIGN_VALIDITY_SECS,
            insert_only: true,
        })
    }

    /// Overrides the public-access endpoint, normally templated on bucket
    /// and appid. Used for private deployments and tests.
    pub fn with_access_base_url(mut self, base_url: &str) -> Result<Self, CosError> {
        self.access_base_url = Some(Url::parse(base_url)?);
        Ok(self)
    }

    pub fn with_insert_only(mut self, insert_only: bool) -> Self {
        self.insert_only = insert_only;
        self
    }

    pub fn appid(&self) -> &str {
        &self.signer.credentials().appid
    }

    pub async fn create_folder(&self, bucket: &str, path: &str) -> Result<Receipt, CosError> {
        let bucket = bucket.trim_matches('/');
        let url = self.resource_url(bucket, path, true)?;
        let response = self
            .http
            .post(url)
            .header("Authorization", self.multi_use_sign(bucket))
            .json(&serde_json::json!({ "op": "create" }))
            .send()
            .await?;
        let parts = Self::handle_response::<serde_json::Value>(response).await?;
        Ok(Receipt {
            message: parts.message,
        })
    }

    pub async fn stat_file(&self, bucket: &str, path: &str) -> Result<StatEntry, CosError> {
        self.stat(bucket, path, false).await
    }

    pub async fn stat_folder(&self, bucket: &str, path: &str) -> Result<StatEntry, CosError> {
        self.stat(bucket, path, true).await
    }

    /// Stat of the bucket root; its payload carries the `authority`
    /// visibility marker.
    pub async fn stat_bucket(&self, bucket: &str) -> Result<StatEntry, CosError> {
        self.stat(bucket, "", true).await
    }

    /// Content hash of a remote file, if the server reports one.
    pub async fn content_hash(&self, bucket: &str, path: &str) -> Result<Option<String>, CosError> {
        Ok(self.stat_file(bucket, path).await?.sha)
    }

    async fn stat(&self, bucket: &str, path: &str, directory: bool) -> Result<StatEntry, CosError> {
        let bucket = bucket.trim_matches('/');
        let mut url = self.resource_url(bucket, path, directory)?;
        url.query_pairs_mut().append_pair("op", "stat");
        let response = self
            .http
            .get(url)
            .header("Authorization", self.multi_use_sign(bucket))
            .send()
            .await?;
        let parts = Self::handle_response::<StatEntry>(response).await?;
        Ok(parts.data)
    }

    /// One page of a directory listing. `num == 0` falls back to the
    /// protocol default of 30 entries per page.
    pub async fn list(
        &self,
        bucket: &str,
        path: &str,
        num: u32,
        pattern: ListPattern,
        order: ListOrder,
        cursor: Option<&str>,
    ) -> Result<ListPage, CosError> {
        let bucket = bucket.trim_matches('/');
        let mut url = self.resource_url(bucket, path, true)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("op", "list");
            let num = if num == 0 { DEFAULT_PAGE_SIZE } else { num };
            query.append_pair("num", &num.to_string());
            query.append_pair("pattern", pattern.as_str());
            query.append_pair("order", order.as_str());
            if let Some(cursor) = cursor {
                query.append_pair("context", cursor);
            }
        }
        let response = self
            .http
            .get(url)
            .header("Authorization", self.multi_use_sign(bucket))
            .send()
            .await?;
        let parts = Self::handle_response::<ListPage>(response).await?;
        Ok(parts.data)
    }

    /// Whole-file upload; the payload's content hash is computed here and
    /// sent alongside so the server can short-circuit duplicates.
    pub async fn upload(
        &self,
        bucket: &str,
        path: &str,
        content: Vec<u8>,
    ) -> Result<UploadReceipt, CosError> {
        let bucket = bucket.trim_matches('/');
        let url = self.resource_url(bucket, path, false)?;
        let sha = format!("{:x}", Sha1::digest(&content));
        let form = self
            .upload_form("upload", &sha)
            .part("filecontent", Part::bytes(content).file_name(norm_path(path)));
        let response = self
            .http
            .post(url)
            .header("Authorization", self.multi_use_sign(bucket))
            .multipart(form)
            .send()
            .await?;
        let parts = Self::handle_response::<UploadData>(response).await?;
        Ok(UploadReceipt {
            message: parts.message,
            access_url: parts.data.url,
        })
    }

    /// Opens (or resumes) a slice-upload session for a file of `file_size`
    /// bytes with content hash `sha`.
    pub async fn prepare_slice(
        &self,
        bucket: &str,
        path: &str,
        file_size: i64,
        sha: &str,
    ) -> Result<SliceAck, CosError> {
        let bucket = bucket.trim_matches('/');
        let url = self.resource_url(bucket, path, false)?;
        let form = self
            .upload_form("upload_slice", sha)
            .text("filesize", file_size.to_string());
        let response = self
            .http
            .post(url)
            .header("Authorization", self.multi_use_sign(bucket))
            .multipart(form)
            .send()
            .await?;
        Self::slice_ack(response).await
    }

    /// Uploads one slice at the server-dictated `offset` within an open
    /// session. The returned ack supersedes the prepare response.
    pub async fn upload_slice(
        &self,
        bucket: &str,
        path: &str,
        session: &str,
        offset: i64,
        content: Vec<u8>,
    ) -> Result<SliceAck, CosError> {
        let bucket = bucket.trim_matches('/');
        let url = self.resource_url(bucket, path, false)?;
        let sha = format!("{:x}", Sha1::digest(&content));
        let form = self
            .upload_form("upload_slice", &sha)
            .text("session", session.to_string())
            .text("offset", offset.to_string())
            .part("filecontent", Part::bytes(content).file_name(norm_path(path)));
        let response = self
            .http
            .post(url)
            .header("Authorization", self.multi_use_sign(bucket))
            .multipart(form)
            .send()
            .await?;
        Self::slice_ack(response).await
    }

    pub async fn delete_file(&self, bucket: &str, path: &str) -> Result<Option<Receipt>, CosError> {
        self.delete(bucket, path, false).await
    }

    pub async fn delete_folder(
        &self,
        bucket: &str,
        path: &str,
    ) -> Result<Option<Receipt>, CosError> {
        self.delete(bucket, path, true).await
    }

    /// Deletes carry a single-use signature bound to the exact resource id.
    /// Deleting the bucket root is a no-op: `Ok(None)`, no request issued.
    async fn delete(
        &self,
        bucket: &str,
        path: &str,
        directory: bool,
    ) -> Result<Option<Receipt>, CosError> {
        let bucket = bucket.trim_matches('/');
        let normalized = norm_path(path);
        if normalized == "/" {
            return Ok(None);
        }
        let url = self.resource_url(bucket, path, directory)?;
        let suffix = if directory { "/" } else { "" };
        let file_id = format!("/{}/{}/{}{}", self.appid(), bucket, normalized, suffix);
        let response = self
            .http
            .post(url)
            .header("Authorization", self.signer.sign_once(bucket, &file_id))
            .json(&serde_json::json!({ "op": "delete" }))
            .send()
            .await?;
        let parts = Self::handle_response::<serde_json::Value>(response).await?;
        Ok(Some(Receipt {
            message: parts.message,
        }))
    }

    /// Direct object URL on the public-access endpoint, unsigned.
    pub fn access_url(&self, bucket: &str, path: &str) -> Result<Url, CosError> {
        let bucket = bucket.trim_matches('/');
        let mut url = match &self.access_base_url {
            Some(base) => base.clone(),
            None => Url::parse(&format!(
                "https://{}-{}.{}",
                bucket,
                self.appid(),
                DEFAULT_ACCESS_HOST
            ))?,
        };
        Self::push_path(&mut url, &norm_path(path), false);
        Ok(url)
    }

    /// Object URL carrying a time-limited signature as the `sign` query
    /// parameter, for buckets that are not public-read.
    pub fn signed_access_url(
        &self,
        bucket: &str,
        path: &str,
        expires_in_secs: i64,
    ) -> Result<Url, CosError> {
        let mut url = self.access_url(bucket, path)?;
        let bucket = bucket.trim_matches('/');
        let sign = self.signer.sign_more(bucket, unix_now() + expires_in_secs);
        url.query_pairs_mut().append_pair("sign", &sign);
        Ok(url)
    }

    fn upload_form(&self, op: &'static str, sha: &str) -> Form {
        Form::new()
            .text("op", op)
            .text("sha", sha.to_string())
            .text("insertOnly", if self.insert_only { "1" } else { "0" })
    }

    fn multi_use_sign(&self, bucket: &str) -> String {
        self.signer
            .sign_more(bucket, unix_now() + self.sign_validity_secs)
    }

    fn resource_url(&self, bucket: &str, path: &str, directory: bool) -> Result<Url, CosError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| url::ParseError::SetHostOnCannotBeABaseUrl)?;
            segments.pop_if_empty().push(self.appid()).push(bucket);
        }
        Self::push_path(&mut url, &norm_path(path), directory);
        Ok(url)
    }

    fn push_path(url: &mut Url, normalized: &str, directory: bool) {
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty();
            if normalized != "/" {
                segments.extend(normalized.split('/'));
            }
            if directory {
                segments.push("");
            }
        }
    }

    async fn slice_ack(response: reqwest::Response) -> Result<SliceAck, CosError> {
        let parts = Self::handle_response::<SliceData>(response).await?;
        Ok(SliceAck {
            message: parts.message,
            session: parts.data.session,
            offset: parts.data.offset,
            slice_size: parts.data.slice_size,
            access_url: parts.data.url,
        })
    }

    async fn handle_response<T: serde::de::DeserializeOwned + Default>(
        response: reqwest::Response,
    ) -> Result<ResponseParts<T>, CosError> {
        let status = response.status();
        let body = response.text().await?;
        let envelope: Envelope<T> =
            serde_json::from_str(&body).map_err(|_| CosError::Http { status, body })?;
        if envelope.code != 0 {
            return Err(CosError::Api {
                status,
                code: envelope.code,
                message: envelope.message,
            });
        }
        Ok(ResponseParts {
            message: envelope.message,
            data: envelope.data.unwrap_or_default(),
        })
    }
}
