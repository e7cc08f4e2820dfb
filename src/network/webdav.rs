use crate::daemon_error_with_source;
use crate::err::Result;
use crate::global_var::LOGGER;
use crate::network::RemoteSync;
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use std::path::Path;
use std::time::Duration;

const METADATA_TIMEOUT: Duration = Duration::from_secs(30);
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(300);
const MAX_NAME_CANDIDATES: u32 = 1000;

/// Name tried on the `attempt`-th probe for a free remote file name.
///
/// The first attempt is the plain name; later ones follow the `Copy_<n>-<stem><.ext>`
/// scheme, e.g. `Copy_2-report.pdf`.
pub fn candidate_name(file_name: &str, attempt: u32) -> String {
    if attempt <= 1 {
        return file_name.to_string();
    }
    let path = Path::new(file_name);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name);
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("Copy_{}-{}.{}", attempt, stem, ext),
        None => format!("Copy_{}-{}", attempt, stem),
    }
}

fn dir_segments(remote_dir: &str) -> Vec<&str> {
    remote_dir.split('/').filter(|s| !s.is_empty()).collect()
}

fn is_upload_success(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::OK | StatusCode::CREATED | StatusCode::NO_CONTENT
    )
}

/// WebDAV client for a Nextcloud user's file space.
#[derive(Debug, Clone)]
pub struct NextcloudClient {
    http: Client,
    webdav_root: Url,
    username: String,
    password: String,
}

impl NextcloudClient {
    pub fn new(server_url: &str, username: &str, password: &str) -> Result<Self> {
        let mut webdav_root = Url::parse(server_url.trim_end_matches('/')).map_err(|e| {
            daemon_error_with_source!(e, "Invalid Nextcloud server URL '{}'", server_url)
        })?;
        webdav_root
            .path_segments_mut()
            .map_err(|_| format!("Nextcloud server URL '{}' cannot be a base", server_url))?
            .pop_if_empty()
            .extend(["remote.php", "dav", "files", username]);

        let http = Client::builder()
            .connect_timeout(METADATA_TIMEOUT)
            .build()
            .map_err(|e| daemon_error_with_source!(e, "Failed to create HTTP client"))?;

        Ok(Self {
            http,
            webdav_root,
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    pub fn webdav_root(&self) -> &Url {
        &self.webdav_root
    }

    /// URL of `remote_dir` (and optionally a file inside it) under the WebDAV root.
    pub fn url_for(&self, remote_dir: &str, file_name: Option<&str>) -> Result<Url> {
        let mut url = self.webdav_root.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| "WebDAV root cannot be a base URL")?;
            segments.extend(dir_segments(remote_dir));
            if let Some(name) = file_name {
                segments.push(name);
            }
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http
            .request(method, url)
            .basic_auth(&self.username, Some(&self.password))
    }

    async fn propfind(&self, url: Url) -> Result<StatusCode> {
        let method = Method::from_bytes(b"PROPFIND")?;
        let response = self
            .request(method, url)
            .header("Depth", "0")
            .timeout(METADATA_TIMEOUT)
            .send()
            .await?;
        Ok(response.status())
    }

    /// Check that the server is reachable and accepts our credentials.
    pub async fn test_connection(&self) -> Result<()> {
        let status = self.propfind(self.webdav_root.clone()).await.map_err(|e| {
            format!("Failed to connect to Nextcloud server {}: {}", self.webdav_root, e)
        })?;
        match status {
            StatusCode::OK | StatusCode::MULTI_STATUS => Ok(()),
            other => Err(format!(
                "Failed to connect to Nextcloud server {}: HTTP {}",
                self.webdav_root, other
            )
            .into()),
        }
    }

    /// Make sure every folder along `remote_dir` exists, creating missing ones.
    pub async fn ensure_remote_directory(&self, remote_dir: &str) -> Result<()> {
        let segments = dir_segments(remote_dir);
        for depth in 1..=segments.len() {
            let partial = segments[..depth].join("/");
            let url = self.url_for(&partial, None)?;
            match self.propfind(url.clone()).await? {
                StatusCode::MULTI_STATUS | StatusCode::OK => {
                    LOGGER.trace(format!("Directory {} already exists", partial));
                }
                StatusCode::NOT_FOUND => {
                    LOGGER.info(format!("Creating directory {}", partial));
                    let method = Method::from_bytes(b"MKCOL")?;
                    let status = self
                        .request(method, url)
                        .timeout(METADATA_TIMEOUT)
                        .send()
                        .await?
                        .status();
                    // 405: somebody else created it in the meantime
                    if status != StatusCode::CREATED
                        && status != StatusCode::OK
                        && status != StatusCode::METHOD_NOT_ALLOWED
                    {
                        return Err(format!(
                            "Failed to create directory {}: HTTP {}",
                            partial, status
                        )
                        .into());
                    }
                }
                other => {
                    return Err(format!(
                        "Unexpected response when checking directory {}: HTTP {}",
                        partial, other
                    )
                    .into());
                }
            }
        }
        Ok(())
    }

    /// Find a name for `file_name` that is not taken inside `remote_dir`.
    pub async fn unique_remote_name(&self, remote_dir: &str, file_name: &str) -> Result<String> {
        for attempt in 1..=MAX_NAME_CANDIDATES {
            let candidate = candidate_name(file_name, attempt);
            let url = self.url_for(remote_dir, Some(&candidate))?;
            let response = match self
                .request(Method::HEAD, url)
                .timeout(METADATA_TIMEOUT)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    // the upload itself will report a real connectivity problem
                    LOGGER.warn(format!("Error checking file existence: {}", e));
                    return Ok(candidate);
                }
            };
            match response.status() {
                StatusCode::NOT_FOUND => return Ok(candidate),
                status if status.is_success() => continue,
                status => {
                    return Err(format!(
                        "Unexpected response when probing {}: HTTP {}",
                        candidate, status
                    )
                    .into());
                }
            }
        }
        Err(format!(
            "No free remote name for {} in {} after {} attempts",
            file_name, remote_dir, MAX_NAME_CANDIDATES
        )
        .into())
    }

    async fn put_file(&self, local_path: &Path, url: Url) -> Result<()> {
        let body = tokio::fs::read(local_path).await.map_err(|e| {
            daemon_error_with_source!(e, "Cannot read {}", local_path.display())
        })?;
        let status = self
            .request(Method::PUT, url.clone())
            .timeout(UPLOAD_TIMEOUT)
            .body(body)
            .send()
            .await?
            .status();
        if is_upload_success(status) {
            Ok(())
        } else {
            Err(format!("PUT {} failed: HTTP {}", url, status).into())
        }
    }
}

#[async_trait]
impl RemoteSync for NextcloudClient {
    async fn create(&self, local_path: &Path, remote_dir: &str) -> Result<String> {
        let file_name = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| format!("{} has no usable file name", local_path.display()))?;

        self.ensure_remote_directory(remote_dir).await?;
        let remote_name = self.unique_remote_name(remote_dir, file_name).await?;
        let url = self.url_for(remote_dir, Some(&remote_name))?;
        self.put_file(local_path, url).await?;

        LOGGER.info(format!(
            "Successfully uploaded {} as {} to {}",
            local_path.display(),
            remote_name,
            remote_dir
        ));
        Ok(remote_name)
    }

    async fn replace(&self, local_path: &Path, remote_name: &str, remote_dir: &str) -> Result<()> {
        let url = self.url_for(remote_dir, Some(remote_name))?;
        self.put_file(local_path, url).await?;
        LOGGER.info(format!(
            "Successfully updated {} in {}",
            remote_name, remote_dir
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_names_follow_copy_scheme() {
        assert_eq!(candidate_name("file.txt", 1), "file.txt");
        assert_eq!(candidate_name("file.txt", 2), "Copy_2-file.txt");
        assert_eq!(candidate_name("archive.tar.gz", 3), "Copy_3-archive.tar.gz");
        assert_eq!(candidate_name("README", 2), "Copy_2-README");
        assert_eq!(candidate_name(".bashrc", 2), "Copy_2-.bashrc");
    }

    #[test]
    fn webdav_root_is_built_from_server_and_user() {
        let client = NextcloudClient::new("https://cloud.example.com/", "alice", "pw").unwrap();
        assert_eq!(
            client.webdav_root().as_str(),
            "https://cloud.example.com/remote.php/dav/files/alice"
        );

        let nested = NextcloudClient::new("https://example.com/nextcloud", "bob", "pw").unwrap();
        assert_eq!(
            nested.webdav_root().as_str(),
            "https://example.com/nextcloud/remote.php/dav/files/bob"
        );
    }

    #[test]
    fn url_for_encodes_segments() {
        let client = NextcloudClient::new("https://cloud.example.com", "alice", "pw").unwrap();
        let url = client.url_for("/Scans/2024/", Some("my file.pdf")).unwrap();
        assert_eq!(
            url.as_str(),
            "https://cloud.example.com/remote.php/dav/files/alice/Scans/2024/my%20file.pdf"
        );
        let root_file = client.url_for("/", Some("a.txt")).unwrap();
        assert_eq!(
            root_file.as_str(),
            "https://cloud.example.com/remote.php/dav/files/alice/a.txt"
        );
    }

    #[test]
    fn invalid_server_url_is_rejected() {
        assert!(NextcloudClient::new("not a url", "alice", "pw").is_err());
    }

    #[test]
    fn upload_success_statuses() {
        assert!(is_upload_success(StatusCode::CREATED));
        assert!(is_upload_success(StatusCode::NO_CONTENT));
        assert!(!is_upload_success(StatusCode::INTERNAL_SERVER_ERROR));
    }
}
