use cos_core::{CosError, EntryInfo, ListOrder, ListPattern, StatEntry};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use super::engine::{SyncEngine, SyncError, join_in_order};

/// Page size used while scanning, larger than the protocol default to cut
/// round trips on wide directories.
pub const SCAN_PAGE_SIZE: u32 = 100;

/// One remote file or directory discovered by a scan. The full path is
/// assembled client-side from the parent path and the entry name; the
/// server never reports it.
#[derive(Debug, Clone)]
pub struct RemoteEntry {
    pub path: String,
    pub name: String,
    pub sha: Option<String>,
    pub size: Option<i64>,
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl RemoteEntry {
    /// An entry is a directory iff the server reported no content hash.
    pub fn is_dir(&self) -> bool {
        self.sha.is_none()
    }

    fn from_info(parent: &str, info: EntryInfo) -> Self {
        Self {
            path: format!("{parent}/{}", info.name),
            name: info.name,
            sha: info.sha,
            size: info.filesize,
            extra: info.extra,
        }
    }

    fn from_stat(path: &str, stat: StatEntry) -> Self {
        let name = stat
            .name
            .unwrap_or_else(|| path.rsplit('/').next().unwrap_or(path).to_string());
        Self {
            path: path.to_string(),
            name,
            sha: stat.sha,
            size: stat.filesize,
            extra: stat.extra,
        }
    }
}

impl SyncEngine {
    /// Flattened snapshot of the remote subtree rooted at `path`.
    ///
    /// `depth == 0` is a no-op, a positive depth descends exactly that many
    /// levels, a negative depth descends without limit. Per level the order
    /// is: directories, then their recursively discovered contents in
    /// discovery order, then files.
    pub fn scan(
        &self,
        bucket: &str,
        path: &str,
        depth: i32,
    ) -> BoxFuture<'static, Result<Vec<RemoteEntry>, SyncError>> {
        let engine = self.clone();
        let bucket = bucket.to_string();
        let path = path.to_string();
        async move { engine.scan_tree(&bucket, &path, depth).await }.boxed()
    }

    async fn scan_tree(
        &self,
        bucket: &str,
        path: &str,
        depth: i32,
    ) -> Result<Vec<RemoteEntry>, SyncError> {
        if depth == 0 {
            return Ok(Vec::new());
        }

        let mut dirs = Vec::new();
        let mut files = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let _permit = self.permit().await?;
            let page = match self
                .client
                .list(
                    bucket,
                    path,
                    SCAN_PAGE_SIZE,
                    ListPattern::Both,
                    ListOrder::Forward,
                    cursor.as_deref(),
                )
                .await
            {
                Ok(page) => page,
                Err(err @ CosError::Api { .. }) if err.is_path_a_file() => {
                    // The root is itself a file; the snapshot is that single
                    // entry, path taken verbatim from the query.
                    let stat = self.client.stat_file(bucket, path).await?;
                    return Ok(vec![RemoteEntry::from_stat(path, stat)]);
                }
                Err(err) => return Err(err.into()),
            };

            for info in page.entries {
                let entry = RemoteEntry::from_info(path, info);
                if entry.is_dir() {
                    dirs.push(entry);
                } else {
                    files.push(entry);
                }
            }
            if !page.has_more {
                break;
            }
            cursor = Some(page.cursor.ok_or(SyncError::MissingCursor)?);
        }

        let mut snapshot = dirs.clone();
        if depth != 1 {
            let handles = dirs
                .iter()
                .map(|dir| tokio::spawn(self.scan(bucket, &dir.path, depth - 1)))
                .collect();
            for subtree in join_in_order(handles).await? {
                snapshot.extend(subtree);
            }
        }
        snapshot.extend(files);
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use cos_core::{CosClient, Credentials, PATH_IS_FILE_CODE};
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn engine(server: &MockServer) -> SyncEngine {
        let client = CosClient::with_base_url(
            &server.uri(),
            Credentials::new("100042", "secret-id", "secret-key"),
        )
        .unwrap();
        SyncEngine::new(client)
    }

    fn list_body(infos: serde_json::Value) -> serde_json::Value {
        json!({
            "code": 0,
            "message": "SUCCESS",
            "data": { "infos": infos, "has_more": false }
        })
    }

    #[tokio::test]
    async fn depth_zero_is_a_no_op() {
        let server = MockServer::start().await;
        let snapshot = engine(&server).scan("photos", "docs", 0).await.unwrap();

        assert!(snapshot.is_empty());
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn single_level_orders_dirs_before_files_and_builds_paths() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/100042/photos/docs/"))
            .and(query_param("op", "list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(list_body(json!([
                { "name": "a.txt", "sha": "aa", "filesize": 1 },
                { "name": "sub" },
                { "name": "b.txt", "sha": "bb", "filesize": 2 }
            ]))))
            .mount(&server)
            .await;

        let snapshot = engine(&server).scan("photos", "docs", 1).await.unwrap();

        let paths: Vec<_> = snapshot.iter().map(|entry| entry.path.as_str()).collect();
        assert_eq!(paths, vec!["docs/sub", "docs/a.txt", "docs/b.txt"]);
        assert!(snapshot[0].is_dir());
        assert_eq!(snapshot[1].size, Some(1));
    }

    #[tokio::test]
    async fn pagination_round_trips_the_cursor_until_exhausted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/100042/photos/docs/"))
            .and(query_param("op", "list"))
            .and(query_param_is_missing("context"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 0,
                "message": "SUCCESS",
                "data": {
                    "infos": [ { "name": "a.txt", "sha": "aa" } ],
                    "has_more": true,
                    "context": "cursor-1"
                }
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/100042/photos/docs/"))
            .and(query_param("op", "list"))
            .and(query_param("context", "cursor-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(list_body(json!([
                { "name": "b.txt", "sha": "bb" }
            ]))))
            .expect(1)
            .mount(&server)
            .await;

        let snapshot = engine(&server).scan("photos", "docs", 1).await.unwrap();

        let paths: Vec<_> = snapshot.iter().map(|entry| entry.path.as_str()).collect();
        assert_eq!(paths, vec!["docs/a.txt", "docs/b.txt"]);
    }

    #[tokio::test]
    async fn recursion_emits_dirs_then_children_then_files() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/100042/photos/docs/"))
            .and(query_param("op", "list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(list_body(json!([
                { "name": "sub" },
                { "name": "top.txt", "sha": "tt" }
            ]))))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/100042/photos/docs/sub/"))
            .and(query_param("op", "list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(list_body(json!([
                { "name": "nested.txt", "sha": "nn" }
            ]))))
            .mount(&server)
            .await;

        let snapshot = engine(&server).scan("photos", "docs", -1).await.unwrap();

        let paths: Vec<_> = snapshot.iter().map(|entry| entry.path.as_str()).collect();
        assert_eq!(paths, vec!["docs/sub", "docs/sub/nested.txt", "docs/top.txt"]);
    }

    #[tokio::test]
    async fn depth_limits_how_far_recursion_descends() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/100042/photos/docs/"))
            .and(query_param("op", "list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(list_body(json!([
                { "name": "sub" }
            ]))))
            .mount(&server)
            .await;

        let snapshot = engine(&server).scan("photos", "docs", 1).await.unwrap();

        assert_eq!(snapshot.len(), 1);
        // Only the root listing was fetched; "docs/sub" was never descended.
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn leaf_root_falls_back_to_stat_with_verbatim_path() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/100042/photos/docs/a.txt/"))
            .and(query_param("op", "list"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "code": PATH_IS_FILE_CODE,
                "message": "path is a file"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/100042/photos/docs/a.txt"))
            .and(query_param("op", "stat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 0,
                "message": "SUCCESS",
                "data": { "name": "a.txt", "sha": "aa", "filesize": 7 }
            })))
            .mount(&server)
            .await;

        let snapshot = engine(&server).scan("photos", "docs/a.txt", -1).await.unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].path, "docs/a.txt");
        assert_eq!(snapshot[0].name, "a.txt");
        assert!(!snapshot[0].is_dir());
    }

    #[tokio::test]
    async fn page_fetch_failure_aborts_the_whole_snapshot() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/100042/photos/docs/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": -4018,
                "message": "over quota"
            })))
            .mount(&server)
            .await;

        let err = engine(&server)
            .scan("photos", "docs", -1)
            .await
            .expect_err("expected semantic failure");

        assert!(matches!(err, SyncError::Api(CosError::Api { code: -4018, .. })));
    }

    #[tokio::test]
    async fn has_more_without_cursor_is_a_protocol_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/100042/photos/docs/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 0,
                "message": "SUCCESS",
                "data": { "infos": [], "has_more": true }
            })))
            .mount(&server)
            .await;

        let err = engine(&server)
            .scan("photos", "docs", 1)
            .await
            .expect_err("expected protocol error");

        assert!(matches!(err, SyncError::MissingCursor));
    }
}
