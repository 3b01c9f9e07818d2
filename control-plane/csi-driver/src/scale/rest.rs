//! Storage Scale management REST API (`scalemgmt/v2`) connector.
use super::{
    error::{Config, InvalidResponse, JobFailed, JobTimeout, NotFound, Request, Unreachable},
    ConnectorError, ConnectorResult, CreateFilesetRequest, DirectoryOwner, FilesetInfo,
    FilesystemMountDetails, ScaleConnector,
};

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{Method, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;
use snafu::{OptionExt, ResultExt};
use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};
use tracing::{debug, info, trace, warn};

/// Timeouts and job polling settings of a [`RestConnector`].
#[derive(Debug, Clone)]
pub struct RestOptions {
    /// Timeout of a single request.
    pub request_timeout: Duration,
    /// How long to wait for an asynchronous job.
    pub job_timeout: Duration,
    /// First wait between job polls, doubled after each poll.
    pub job_poll_initial: Duration,
    /// Cap of the wait between job polls.
    pub job_poll_max: Duration,
}

impl Default for RestOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            job_timeout: Duration::from_secs(600),
            job_poll_initial: utils::JOB_POLL_INITIAL,
            job_poll_max: utils::JOB_POLL_MAX,
        }
    }
}

/// Credentials of the REST user.
#[derive(Clone)]
pub struct RestCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for RestCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestCredentials")
            .field("username", &self.username)
            .finish()
    }
}

/// Server certificate verification.
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    /// Verify the server certificates.
    pub secure: bool,
    /// PEM bundle of the CA to trust in addition to the system roots.
    pub ca_pem: Option<Vec<u8>>,
}

/// A [`ScaleConnector`] which talks to the management GUI servers of a cluster.
pub struct RestConnector {
    client: reqwest::Client,
    endpoints: Vec<url::Url>,
    current: AtomicUsize,
    credentials: RestCredentials,
    options: RestOptions,
}

impl std::fmt::Debug for RestConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestConnector")
            .field("endpoints", &self.endpoints_str())
            .field("current", &self.current.load(Ordering::Relaxed))
            .field("credentials", &self.credentials)
            .finish()
    }
}

/// Characters escaped in a path segment.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Percent-encode a single path segment, including any `/`.
fn encode(segment: &str) -> String {
    utf8_percent_encode(segment.trim_start_matches('/'), SEGMENT).to_string()
}

/// Envelope of every REST response.
#[derive(Debug, Deserialize, Default)]
struct ResponseStatus {
    #[serde(default)]
    message: String,
}
#[derive(Debug, Deserialize)]
struct StatusEnvelope {
    status: ResponseStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClusterSummary {
    cluster_id: u64,
}
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Cluster {
    cluster_summary: ClusterSummary,
}
#[derive(Debug, Deserialize)]
struct ClusterResponse {
    cluster: Cluster,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct Mount {
    mount_point: String,
    remote_device_name: String,
    nodes_mounted: Vec<String>,
}
#[derive(Debug, Deserialize)]
struct Filesystem {
    name: String,
    #[serde(default)]
    uuid: String,
    #[serde(default)]
    mount: Mount,
}
#[derive(Debug, Deserialize)]
struct FilesystemsResponse {
    #[serde(default)]
    filesystems: Vec<Filesystem>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct FilesetConfig {
    id: u64,
    path: String,
    is_inode_space_owner: bool,
    max_num_inodes: u64,
}
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Fileset {
    fileset_name: String,
    #[serde(default)]
    config: FilesetConfig,
}
#[derive(Debug, Deserialize)]
struct FilesetsResponse {
    #[serde(default)]
    filesets: Vec<Fileset>,
}

impl From<Fileset> for FilesetInfo {
    fn from(fileset: Fileset) -> Self {
        let path = match fileset.config.path.as_str() {
            "" | "--" => None,
            path => Some(path.to_string()),
        };
        Self {
            name: fileset.fileset_name,
            id: fileset.config.id,
            path,
            independent: fileset.config.is_inode_space_owner,
            max_num_inodes: fileset.config.max_num_inodes,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Quota {
    #[serde(default)]
    block_limit: u64,
}
#[derive(Debug, Deserialize)]
struct QuotasResponse {
    #[serde(default)]
    quotas: Vec<Quota>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snapshot {
    snapshot_name: String,
}
#[derive(Debug, Deserialize)]
struct SnapshotsResponse {
    #[serde(default)]
    snapshots: Vec<Snapshot>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct JobResult {
    stderr: Vec<String>,
}
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Job {
    job_id: u64,
    status: String,
    #[serde(default)]
    result: JobResult,
}
#[derive(Debug, Deserialize)]
struct JobsResponse {
    #[serde(default)]
    jobs: Vec<Job>,
}

/// Terminal and in-flight job states.
#[derive(Debug, PartialEq, Eq, strum_macros::EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
enum JobState {
    Running,
    Completed,
    Unknown,
    Failed,
    Cancelled,
}

impl RestConnector {
    /// Create a connector for the given GUI server base urls.
    pub fn new(
        endpoints: Vec<url::Url>,
        credentials: RestCredentials,
        tls: TlsOptions,
        options: RestOptions,
    ) -> ConnectorResult<Self> {
        if endpoints.is_empty() {
            return Config {
                message: "at least one REST endpoint is required",
            }
            .fail();
        }
        let mut builder = reqwest::Client::builder().timeout(options.request_timeout);
        if tls.secure {
            if let Some(pem) = &tls.ca_pem {
                let certificate = reqwest::Certificate::from_pem(pem).map_err(|error| {
                    ConnectorError::Config {
                        message: format!("invalid CA certificate: {error}"),
                    }
                })?;
                builder = builder.add_root_certificate(certificate);
            }
        } else {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder.build().map_err(|error| ConnectorError::Config {
            message: format!("failed to build the http client: {error}"),
        })?;
        Ok(Self {
            client,
            endpoints,
            current: AtomicUsize::new(0),
            credentials,
            options,
        })
    }

    /// The base url of a GUI server.
    pub fn endpoint_url(host: &str, port: u16) -> Result<url::Url, url::ParseError> {
        url::Url::parse(&format!("https://{host}:{port}/"))
    }

    fn endpoints_str(&self) -> String {
        self.endpoints
            .iter()
            .map(|url| url.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn url(base: &url::Url, path: &str) -> String {
        format!("{base}{}/{path}", utils::SCALE_REST_PREFIX)
    }

    /// Send a request, failing over to the next endpoint when one can't be reached.
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> ConnectorResult<(String, reqwest::Response)> {
        let count = self.endpoints.len();
        let start = self.current.load(Ordering::Relaxed) % count;
        let mut last_error = None;

        for attempt in 0 .. count {
            let index = (start + attempt) % count;
            let url = Self::url(&self.endpoints[index], path);
            trace!(%method, %url, "REST request");

            let mut request = self
                .client
                .request(method.clone(), &url)
                .basic_auth(&self.credentials.username, Some(&self.credentials.password));
            if let Some(body) = body {
                request = request.json(body);
            }
            match request.send().await {
                Ok(response) => {
                    if index != start {
                        info!(endpoint = %self.endpoints[index], "Switched to REST endpoint");
                        self.current.store(index, Ordering::Relaxed);
                    }
                    return Ok((url, response));
                }
                Err(error) if error.is_connect() || error.is_timeout() => {
                    warn!(%url, %error, "REST endpoint is not reachable");
                    last_error = Some(error);
                }
                Err(source) => return Err(ConnectorError::Request { url, source }),
            }
        }

        let source = last_error.context(Config {
            message: "no REST endpoint was tried",
        })?;
        Err(source).context(Unreachable {
            endpoints: self.endpoints_str(),
        })
    }

    /// Send a request and decode the successful response.
    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> ConnectorResult<T> {
        let (url, response) = self.send(method, path, body).await?;
        let status = response.status();
        let text = response.text().await.context(Request { url: url.clone() })?;

        if !status.is_success() {
            let message = match serde_json::from_str::<StatusEnvelope>(&text) {
                Ok(envelope) if !envelope.status.message.is_empty() => envelope.status.message,
                _ => text,
            };
            return Err(match status {
                StatusCode::UNAUTHORIZED => ConnectorError::Unauthenticated { url, message },
                StatusCode::FORBIDDEN => ConnectorError::PermissionDenied { url, message },
                StatusCode::NOT_FOUND => ConnectorError::NotFound {
                    message: format!("{url}: {message}"),
                },
                status => ConnectorError::Api {
                    url,
                    status: status.as_u16(),
                    message,
                },
            });
        }

        serde_json::from_str(&text).map_err(|error| ConnectorError::InvalidResponse {
            url,
            message: error.to_string(),
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> ConnectorResult<T> {
        self.call(Method::GET, path, None).await
    }

    /// Start an asynchronous job and wait for it to complete.
    async fn run_job(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> ConnectorResult<()> {
        let response: JobsResponse = self.call(method, path, body.as_ref()).await?;
        let job = response.jobs.into_iter().next().context(InvalidResponse {
            url: path,
            message: "no job in the response",
        })?;
        match job.status.parse::<JobState>() {
            Ok(JobState::Completed) => Ok(()),
            _ => self.wait_for_job(job.job_id).await,
        }
    }

    /// Poll the job until it finishes, doubling the wait between polls up to the cap.
    async fn wait_for_job(&self, job_id: u64) -> ConnectorResult<()> {
        let deadline = tokio::time::Instant::now() + self.options.job_timeout;
        let mut delay = self.options.job_poll_initial;
        let path = format!("jobs/{job_id}?fields=:all:");

        loop {
            let response: JobsResponse = self.get(&path).await?;
            let job = response.jobs.into_iter().next().context(NotFound {
                message: format!("job {job_id}"),
            })?;
            match job.status.parse::<JobState>() {
                Ok(JobState::Completed | JobState::Unknown) => {
                    debug!(job_id, status = %job.status, "Job finished");
                    return Ok(());
                }
                Ok(JobState::Running) => {}
                _ => {
                    return JobFailed {
                        job_id,
                        stderr: job.result.stderr.join("\n"),
                    }
                    .fail()
                }
            }

            if tokio::time::Instant::now() + delay > deadline {
                return JobTimeout {
                    job_id,
                    timeout: self.options.job_timeout,
                }
                .fail();
            }
            trace!(job_id, ?delay, "Job still running");
            tokio::time::sleep(delay).await;
            delay = std::cmp::min(delay * 2, self.options.job_poll_max);
        }
    }

    async fn filesystem(&self, fs: &str) -> ConnectorResult<Filesystem> {
        let response: FilesystemsResponse = self
            .get(&format!("filesystems/{}?fields=:all:", encode(fs)))
            .await?;
        response.filesystems.into_iter().next().context(NotFound {
            message: format!("filesystem {fs}"),
        })
    }
}

#[async_trait::async_trait]
impl ScaleConnector for RestConnector {
    async fn get_cluster_id(&self) -> ConnectorResult<String> {
        let response: ClusterResponse = self.get("cluster").await?;
        Ok(response.cluster.cluster_summary.cluster_id.to_string())
    }

    async fn get_filesystem_mount_details(
        &self,
        fs: &str,
    ) -> ConnectorResult<FilesystemMountDetails> {
        let filesystem = self.filesystem(fs).await?;
        Ok(FilesystemMountDetails {
            name: filesystem.name,
            uuid: filesystem.uuid,
            mount_point: filesystem.mount.mount_point,
            remote_device_name: filesystem.mount.remote_device_name,
            nodes_mounted: filesystem.mount.nodes_mounted,
        })
    }

    async fn get_fs_name_from_uuid(&self, uuid: &str) -> ConnectorResult<String> {
        let response: FilesystemsResponse = self.get("filesystems?fields=uuid").await?;
        response
            .filesystems
            .into_iter()
            .find(|fs| fs.uuid == uuid)
            .map(|fs| fs.name)
            .context(NotFound {
                message: format!("filesystem with uuid {uuid}"),
            })
    }

    async fn mount_filesystem(&self, fs: &str, node: &str) -> ConnectorResult<()> {
        self.run_job(
            Method::PUT,
            &format!("filesystems/{}/mount", encode(fs)),
            Some(json!({ "nodes": [node] })),
        )
        .await
    }

    async fn list_fileset(&self, fs: &str, fileset: &str) -> ConnectorResult<FilesetInfo> {
        let response: FilesetsResponse = self
            .get(&format!("filesystems/{}/filesets/{}", encode(fs), encode(fileset)))
            .await?;
        response
            .filesets
            .into_iter()
            .next()
            .map(FilesetInfo::from)
            .context(NotFound {
                message: format!("fileset {fileset} in filesystem {fs}"),
            })
    }

    async fn get_fileset_name_from_id(&self, fs: &str, id: &str) -> ConnectorResult<String> {
        let response: FilesetsResponse = self
            .get(&format!(
                "filesystems/{}/filesets?filter=config.id={}",
                encode(fs),
                encode(id)
            ))
            .await?;
        response
            .filesets
            .into_iter()
            .next()
            .map(|fileset| fileset.fileset_name)
            .context(NotFound {
                message: format!("fileset with id {id} in filesystem {fs}"),
            })
    }

    async fn create_fileset(
        &self,
        fs: &str,
        request: &CreateFilesetRequest,
    ) -> ConnectorResult<()> {
        let body = serde_json::to_value(request).map_err(|error| ConnectorError::Config {
            message: format!("invalid fileset request: {error}"),
        })?;
        self.run_job(
            Method::POST,
            &format!("filesystems/{}/filesets", encode(fs)),
            Some(body),
        )
        .await
    }

    async fn link_fileset(&self, fs: &str, fileset: &str, path: &str) -> ConnectorResult<()> {
        self.run_job(
            Method::POST,
            &format!("filesystems/{}/filesets/{}/link", encode(fs), encode(fileset)),
            Some(json!({ "path": path })),
        )
        .await
    }

    async fn unlink_fileset(&self, fs: &str, fileset: &str) -> ConnectorResult<()> {
        self.run_job(
            Method::DELETE,
            &format!(
                "filesystems/{}/filesets/{}/link?force=True",
                encode(fs),
                encode(fileset)
            ),
            None,
        )
        .await
    }

    async fn delete_fileset(&self, fs: &str, fileset: &str) -> ConnectorResult<()> {
        self.run_job(
            Method::DELETE,
            &format!("filesystems/{}/filesets/{}", encode(fs), encode(fileset)),
            None,
        )
        .await
    }

    async fn set_fileset_quota(&self, fs: &str, fileset: &str, bytes: u64) -> ConnectorResult<()> {
        let limit = format!("{}K", bytes.div_ceil(1024));
        self.run_job(
            Method::POST,
            &format!("filesystems/{}/quotas", encode(fs)),
            Some(json!({
                "operationType": "setQuota",
                "quotaType": "fileset",
                "objectName": fileset,
                "blockSoftLimit": limit,
                "blockHardLimit": limit,
            })),
        )
        .await
    }

    async fn get_fileset_quota(&self, fs: &str, fileset: &str) -> ConnectorResult<u64> {
        let path = format!(
            "filesystems/{}/quotas?filter=objectName={},quotaType=FILESET",
            encode(fs),
            encode(fileset)
        );
        let response: QuotasResponse = self.get(&path).await?;
        match response.quotas.first() {
            None => Ok(0),
            Some(quota) => quota.block_limit.checked_mul(1024).context(InvalidResponse {
                url: path,
                message: format!("block limit {} KiB is out of range", quota.block_limit),
            }),
        }
    }

    async fn make_directory(
        &self,
        fs: &str,
        path: &str,
        owner: &DirectoryOwner,
    ) -> ConnectorResult<()> {
        let body = serde_json::to_value(owner).map_err(|error| ConnectorError::Config {
            message: format!("invalid directory owner: {error}"),
        })?;
        self.run_job(
            Method::POST,
            &format!("filesystems/{}/directory/{}", encode(fs), encode(path)),
            Some(body),
        )
        .await
    }

    async fn delete_directory(&self, fs: &str, path: &str) -> ConnectorResult<()> {
        self.run_job(
            Method::DELETE,
            &format!("filesystems/{}/directory/{}", encode(fs), encode(path)),
            None,
        )
        .await
    }

    async fn path_exists(&self, fs: &str, path: &str) -> ConnectorResult<bool> {
        let result: ConnectorResult<serde_json::Value> = self
            .get(&format!("filesystems/{}/owner/{}", encode(fs), encode(path)))
            .await;
        match result {
            Ok(_) => Ok(true),
            Err(error) if error.is_not_found() => Ok(false),
            Err(error) => Err(error),
        }
    }

    async fn create_symlink(
        &self,
        fs: &str,
        target_fs: &str,
        target: &str,
        link: &str,
    ) -> ConnectorResult<()> {
        self.run_job(
            Method::POST,
            &format!("filesystems/{}/symlink/{}", encode(fs), encode(link)),
            Some(json!({ "filesystemName": target_fs, "relativePath": target })),
        )
        .await
    }

    async fn delete_symlink(&self, fs: &str, link: &str) -> ConnectorResult<()> {
        self.run_job(
            Method::DELETE,
            &format!("filesystems/{}/symlink/{}", encode(fs), encode(link)),
            None,
        )
        .await
    }

    async fn list_fileset_snapshots(
        &self,
        fs: &str,
        fileset: &str,
    ) -> ConnectorResult<Vec<String>> {
        let response: SnapshotsResponse = self
            .get(&format!(
                "filesystems/{}/filesets/{}/snapshots",
                encode(fs),
                encode(fileset)
            ))
            .await?;
        Ok(response
            .snapshots
            .into_iter()
            .map(|snapshot| snapshot.snapshot_name)
            .collect())
    }

    async fn is_valid_node_class(&self, node_class: &str) -> ConnectorResult<bool> {
        let result: ConnectorResult<serde_json::Value> =
            self.get(&format!("nodeclasses/{}", encode(node_class))).await;
        match result {
            Ok(_) => Ok(true),
            Err(error) if error.is_not_found() => Ok(false),
            Err(error) => Err(error),
        }
    }
}
