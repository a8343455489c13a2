use reqwest::header::{CONTENT_DISPOSITION, LOCATION};
use reqwest::redirect::Policy;
use reqwest::{Client, Response, StatusCode};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::file_name;
use super::{AttemptResult, AttemptStats};
use crate::config::DownloadConfig;
use crate::error::{ProbeError, root_cause};
use crate::message::Task;
use crate::repository::TaskRepository;
use crate::text;

pub const MAX_REDIRECTS: usize = 10;

/// Status line and message recorded for one HTTP response.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpHop {
    pub status: u16,
    pub message: String,
}

impl HttpHop {
    fn new(status: StatusCode, message: String) -> Self {
        Self {
            status: status.as_u16(),
            message,
        }
    }
}

/// Outcome of a download probe.
///
/// A download makes a single attempt; `stats` holds it so that download
/// results aggregate like the other commands.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DownloadResult {
    pub url: String,
    pub stats: AttemptStats,
    pub hops: Vec<HttpHop>,
    pub file_name: Option<String>,
    pub bytes: u64,
    pub connect_success: bool,
    pub download_success: bool,
    pub file_exists: bool,
    pub delete_attempted: bool,
    pub delete_success: bool,
    pub delete_error: Option<String>,
    pub stopped: bool,
    pub valid: bool,
    pub timed_out: bool,
    pub error: Option<String>,
}

impl DownloadResult {
    pub fn success(&self) -> bool {
        self.connect_success && self.download_success && !self.stopped
    }
}

/// Fetches a URL through the already resolved address, following redirects
/// by hand, and streams the body into the download folder.
pub struct DownloadCommand {
    task: Task,
    ip: IpAddr,
    config: DownloadConfig,
    repository: Arc<dyn TaskRepository>,
}

impl DownloadCommand {
    pub fn new(
        task: Task,
        ip: IpAddr,
        config: DownloadConfig,
        repository: Arc<dyn TaskRepository>,
    ) -> Self {
        Self {
            task,
            ip,
            config,
            repository,
        }
    }

    pub async fn execute(&self, cancel: &CancellationToken) -> DownloadResult {
        let start = Instant::now();
        let mut result = DownloadResult {
            valid: true,
            ..DownloadResult::default()
        };

        self.download(&mut result, start, cancel).await;

        let attempt = if result.download_success && !result.stopped {
            AttemptResult::success(start.elapsed())
        } else if result.timed_out || result.error.is_none() {
            AttemptResult::timeout(start.elapsed())
        } else {
            AttemptResult::error(start.elapsed(), result.error.clone().unwrap_or_default())
        };
        result.stats.record(&attempt);
        result
    }

    async fn download(&self, result: &mut DownloadResult, start: Instant, cancel: &CancellationToken) {
        let url = match parse_url(&self.task.address) {
            Ok(url) => url,
            Err(e) => {
                result.url = self.task.address.clone();
                result.error = Some(format!("invalid URL: {}", e));
                return;
            }
        };
        result.url = url.to_string();

        let client = match self.client(&url) {
            Ok(client) => client,
            Err(e) => {
                result.error = Some(root_cause(&e));
                return;
            }
        };

        let (final_url, response) = match self.follow_redirects(&client, url, result).await {
            Ok(Some(found)) => found,
            Ok(None) => return,
            Err(e) => {
                result.timed_out = e.is_timeout() || start.elapsed() >= self.task.timeout;
                result.error = Some(root_cause(&e));
                return;
            }
        };

        result.connect_success = true;
        if !response.status().is_success() {
            tracing::debug!("download {} answered {}", final_url, response.status());
            return;
        }

        let disposition = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|value| value.to_str().ok());
        let name = file_name::pick(disposition, &final_url);
        let (path, mut file) = match file_name::create_unique(
            &self.config.folder,
            &name,
            &chrono::Utc::now(),
            self.config.max_file_suffix,
        )
        .await
        {
            Ok(created) => created,
            Err(e) => {
                result.error = Some(e.to_string());
                return;
            }
        };
        result.file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());

        self.stream(response, &mut file, result, start, cancel).await;
        drop(file);

        result.file_exists = tokio::fs::try_exists(&path).await.unwrap_or(false);
        if result.file_exists && !self.config.keep_files {
            self.discard(&path, result).await;
        }
    }

    fn client(&self, url: &Url) -> reqwest::Result<Client> {
        let mut builder = Client::builder()
            .redirect(Policy::none())
            .connect_timeout(self.task.timeout)
            .read_timeout(self.task.timeout);

        // Connect to the address the resolver picked while keeping the
        // original host for TLS and the Host header.
        if let Some(url::Host::Domain(domain)) = url.host() {
            builder = builder.resolve(domain, SocketAddr::new(self.ip, 0));
        }
        builder.build()
    }

    async fn follow_redirects(
        &self,
        client: &Client,
        mut url: Url,
        result: &mut DownloadResult,
    ) -> reqwest::Result<Option<(Url, Response)>> {
        for hop in 1..=MAX_REDIRECTS {
            let response = client.get(url.clone()).send().await?;
            let status = response.status();
            if !status.is_redirection() {
                result.hops.push(HttpHop::new(status, text::http_status(status)));
                return Ok(Some((url, response)));
            }

            result.connect_success = true;
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default()
                .to_string();
            let mut message = text::redirect(status, &location);
            let next = if location.is_empty() {
                None
            } else {
                url.join(&location).ok()
            };

            match next {
                None => {
                    message.push_str(text::REDIRECT_INVALID);
                    result.hops.push(HttpHop::new(status, message));
                    return Ok(None);
                }
                Some(_) if hop == MAX_REDIRECTS => {
                    message.push_str(text::REDIRECT_LIMIT);
                    result.hops.push(HttpHop::new(status, message));
                    return Ok(None);
                }
                Some(next) => {
                    tracing::trace!("redirect {} of {}: {} -> {}", hop, url, status, next);
                    result.hops.push(HttpHop::new(status, message));
                    url = next;
                }
            }
        }
        Ok(None)
    }

    async fn stream(
        &self,
        mut response: Response,
        file: &mut File,
        result: &mut DownloadResult,
        start: Instant,
        cancel: &CancellationToken,
    ) {
        let interval = self.config.liveness_check_interval;
        let mut last_check = Instant::now();

        loop {
            if cancel.is_cancelled() {
                result.stopped = true;
                result.valid = false;
                break;
            }
            if last_check.elapsed() >= interval {
                last_check = Instant::now();
                if !self.still_live().await {
                    tracing::info!(
                        "task {} was stopped or changed, aborting download of {}",
                        self.task.id,
                        result.url
                    );
                    result.stopped = true;
                    result.valid = false;
                    break;
                }
            }

            match response.chunk().await {
                Ok(Some(bytes)) => {
                    if let Err(e) = file.write_all(&bytes).await {
                        result.error = Some(ProbeError::FileSystem(e.to_string()).to_string());
                        break;
                    }
                    result.bytes += bytes.len() as u64;
                }
                Ok(None) => {
                    match file.flush().await {
                        Ok(()) => result.download_success = true,
                        Err(e) => {
                            result.error = Some(ProbeError::FileSystem(e.to_string()).to_string())
                        }
                    }
                    break;
                }
                Err(e) => {
                    result.timed_out = e.is_timeout() || start.elapsed() >= self.task.timeout;
                    result.error = Some(root_cause(&e));
                    break;
                }
            }
        }
    }

    async fn still_live(&self) -> bool {
        self.repository
            .is_live(self.task.id, self.task.generation_id)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("liveness check of task {} failed: {:?}", self.task.id, e);
                true
            })
    }

    async fn discard(&self, path: &Path, result: &mut DownloadResult) {
        result.delete_attempted = true;
        match tokio::fs::remove_file(path).await {
            Ok(()) => result.delete_success = true,
            Err(e) => {
                tracing::warn!("failed to delete {}: {}", path.display(), e);
                result.delete_success = false;
                result.delete_error = Some(ProbeError::FileSystem(e.to_string()).to_string());
            }
        }
    }
}

/// Parses a task address as a URL, defaulting the scheme to `http`.
pub fn parse_url(address: &str) -> Result<Url, url::ParseError> {
    let address = address.trim();
    match Url::parse(address) {
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(&format!("http://{}", address)),
        parsed => parsed,
    }
}
