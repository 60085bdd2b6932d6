use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use futures::StreamExt;
use rand::Rng;
use reqwest::header::{HeaderMap, CONTENT_RANGE, RANGE};
use reqwest::{Client, StatusCode};
use sha2::{Digest, Sha256};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, error, info, warn};

use super::progress::{ProgressEvent, ProgressSink};
use crate::config::DownloadConfig;
use crate::error::{PalError, Result};
use crate::registry::LocalModel;
use crate::resolver::ResolvedArtifact;

/// Bounded exponential backoff between transfer attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl From<&DownloadConfig> for RetryPolicy {
    fn from(config: &DownloadConfig) -> Self {
        RetryPolicy {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

impl RetryPolicy {
    /// Delay after the `failed`-th failed attempt: doubling from the initial
    /// delay, capped, plus up to 10% jitter.
    pub fn backoff(&self, failed: u32) -> Duration {
        let doublings = failed.saturating_sub(1).min(16);
        let base = self
            .initial_backoff
            .saturating_mul(1u32 << doublings)
            .min(self.max_backoff);
        let jitter_cap = (base.as_millis() as u64 / 10).max(1);
        let jitter = rand::rng().random_range(0..=jitter_cap);
        base + Duration::from_millis(jitter)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FetchOptions {
    /// Download again even when the destination already holds the file
    pub force_refresh: bool,
}

/// How one transfer attempt ended when it did not produce a verified file.
#[derive(Debug)]
enum AttemptError {
    Retry(String),
    Fatal(String),
}

fn io_fatal(e: io::Error) -> AttemptError {
    AttemptError::Fatal(format!("local file error: {}", e))
}

/// Streams resolved artifacts into the models directory.
pub struct DownloadCoordinator {
    client: Client,
    policy: RetryPolicy,
}

impl DownloadCoordinator {
    pub fn new(config: &DownloadConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .user_agent(concat!("llmpal/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(client, RetryPolicy::from(config)))
    }

    pub fn with_client(client: Client, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    /// Makes `artifact` available at its destination.
    ///
    /// A destination that already holds the file (same size, or any size when
    /// the size is unknown) is returned without touching the network unless
    /// `force_refresh` is set. Data lands in `<destination>.part` and is only
    /// renamed into place after size and checksum verification.
    pub async fn fetch(
        &self,
        artifact: &ResolvedArtifact,
        options: FetchOptions,
        sink: &dyn ProgressSink,
    ) -> Result<LocalModel> {
        let destination = &artifact.destination;

        if !options.force_refresh {
            if let Some(existing) = already_present(destination, artifact.expected_size).await? {
                info!("{} is already present, skipping download", destination.display());
                return Ok(existing);
            }
        }

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).await?;
        }
        let part = part_path(destination);
        if options.force_refresh {
            remove_partial(&part).await;
        }

        info!("Downloading {} to {}", artifact.download_url, destination.display());
        let started = Instant::now();
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!("Download attempt {}/{}", attempt, self.policy.max_attempts);

            let outcome = match self.transfer(artifact, &part, started, sink).await {
                Ok(reported_total) => verify(artifact, &part, reported_total).await,
                Err(e) => Err(e),
            };

            match outcome {
                Ok(checksum) => {
                    fs::rename(&part, destination).await?;
                    info!(
                        "Downloaded {} in {:.1}s",
                        destination.display(),
                        started.elapsed().as_secs_f64()
                    );
                    return Ok(LocalModel::from_path(destination)?.with_checksum(checksum));
                }
                Err(AttemptError::Retry(reason)) if attempt < self.policy.max_attempts => {
                    let delay = self.policy.backoff(attempt);
                    warn!(
                        "Download attempt {} failed: {}; retrying in {:?}",
                        attempt, reason, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(AttemptError::Retry(reason)) | Err(AttemptError::Fatal(reason)) => {
                    error!("Download of {} failed: {}", artifact.download_url, reason);
                    return Err(PalError::DownloadFailed {
                        url: artifact.download_url.clone(),
                        attempts: attempt,
                        reason,
                        partial: part,
                    });
                }
            }
        }
    }

    /// One HTTP request, resuming from whatever the partial file holds.
    /// Returns the total size the server reported, if any.
    async fn transfer(
        &self,
        artifact: &ResolvedArtifact,
        part: &Path,
        started: Instant,
        sink: &dyn ProgressSink,
    ) -> std::result::Result<Option<u64>, AttemptError> {
        let resume_from = fs::metadata(part).await.map(|m| m.len()).unwrap_or(0);

        let mut request = self.client.get(&artifact.download_url);
        if resume_from > 0 {
            debug!("Resuming {} from byte {}", part.display(), resume_from);
            request = request.header(RANGE, format!("bytes={}-", resume_from));
        }

        let response = request
            .send()
            .await
            .map_err(|e| AttemptError::Retry(format!("request failed: {}", e)))?;
        let status = response.status();

        if status == StatusCode::RANGE_NOT_SATISFIABLE {
            let expected = artifact
                .expected_size
                .or_else(|| content_range_total(response.headers()));
            if resume_from > 0 && expected == Some(resume_from) {
                debug!("Partial file already holds all {} bytes", resume_from);
                return Ok(expected);
            }
            remove_partial(part).await;
            return Err(AttemptError::Retry(format!(
                "server rejected resume at byte {}",
                resume_from
            )));
        }

        if !status.is_success() {
            let reason = format!("server returned {}", status);
            return Err(if is_retryable(status) {
                AttemptError::Retry(reason)
            } else {
                AttemptError::Fatal(reason)
            });
        }

        let (mut file, offset) = if status == StatusCode::PARTIAL_CONTENT && resume_from > 0 {
            let file = OpenOptions::new().append(true).open(part).await.map_err(io_fatal)?;
            (file, resume_from)
        } else {
            if resume_from > 0 {
                debug!("Server ignored the range request, starting over");
            }
            (File::create(part).await.map_err(io_fatal)?, 0)
        };

        let total = response
            .content_length()
            .map(|len| offset + len)
            .or(artifact.expected_size);
        let mut downloaded = offset;
        sink.update(ProgressEvent {
            downloaded,
            total,
            elapsed: started.elapsed(),
        });

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    file.flush().await.map_err(io_fatal)?;
                    return Err(AttemptError::Retry(format!(
                        "transfer interrupted at byte {}: {}",
                        downloaded, e
                    )));
                }
            };
            file.write_all(&chunk).await.map_err(io_fatal)?;
            downloaded += chunk.len() as u64;
            sink.update(ProgressEvent {
                downloaded,
                total,
                elapsed: started.elapsed(),
            });
        }

        file.flush().await.map_err(io_fatal)?;
        Ok(total)
    }
}

/// Size check against the catalog (or server) size, then SHA-256 when known.
async fn verify(
    artifact: &ResolvedArtifact,
    part: &Path,
    reported_total: Option<u64>,
) -> std::result::Result<Option<String>, AttemptError> {
    let len = fs::metadata(part).await.map_err(io_fatal)?.len();

    if let Some(expected) = artifact.expected_size.or(reported_total) {
        if len < expected {
            return Err(AttemptError::Retry(format!(
                "incomplete transfer: {} of {} bytes",
                len, expected
            )));
        }
        if len > expected {
            remove_partial(part).await;
            return Err(AttemptError::Retry(format!(
                "size mismatch: got {} bytes, expected {}",
                len, expected
            )));
        }
    }

    match &artifact.sha256 {
        Some(expected) => {
            let actual = sha256_file(part).await.map_err(io_fatal)?;
            if !actual.eq_ignore_ascii_case(expected) {
                remove_partial(part).await;
                return Err(AttemptError::Retry(format!(
                    "checksum mismatch: expected {}, got {}",
                    expected, actual
                )));
            }
            Ok(Some(actual))
        }
        None => Ok(None),
    }
}

async fn already_present(destination: &Path, expected_size: Option<u64>) -> Result<Option<LocalModel>> {
    let meta = match fs::metadata(destination).await {
        Ok(meta) if meta.is_file() => meta,
        _ => return Ok(None),
    };
    match expected_size {
        Some(expected) if expected != meta.len() => {
            debug!(
                "{} has {} bytes, expected {}; downloading again",
                destination.display(),
                meta.len(),
                expected
            );
            Ok(None)
        }
        _ => Ok(Some(LocalModel::from_path(destination)?)),
    }
}

pub fn part_path(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

async fn remove_partial(part: &Path) {
    match fs::remove_file(part).await {
        Ok(()) => debug!("Discarded {}", part.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove {}: {}", part.display(), e),
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

/// Total length from `Content-Range: bytes */1234` or `bytes 0-99/1234`.
fn content_range_total(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_RANGE)?
        .to_str()
        .ok()?
        .rsplit('/')
        .next()?
        .trim()
        .parse()
        .ok()
}

async fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0; 64 * 1024];
    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn backoff_doubles_and_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
        };
        let first = policy.backoff(1);
        let second = policy.backoff(2);
        let late = policy.backoff(9);
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(110));
        assert!(second >= Duration::from_millis(200) && second <= Duration::from_millis(220));
        assert!(late >= Duration::from_millis(350) && late <= Duration::from_millis(385));
    }

    #[test]
    fn only_transient_statuses_are_retried() {
        assert!(is_retryable(StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable(StatusCode::REQUEST_TIMEOUT));
        assert!(!is_retryable(StatusCode::NOT_FOUND));
        assert!(!is_retryable(StatusCode::FORBIDDEN));
    }

    #[test]
    fn content_range_total_is_parsed() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_RANGE, HeaderValue::from_static("bytes */4096"));
        assert_eq!(content_range_total(&headers), Some(4096));
        headers.insert(CONTENT_RANGE, HeaderValue::from_static("bytes 0-99/100"));
        assert_eq!(content_range_total(&headers), Some(100));
        headers.insert(CONTENT_RANGE, HeaderValue::from_static("bytes 0-99/*"));
        assert_eq!(content_range_total(&headers), None);
    }

    #[test]
    fn part_file_sits_next_to_destination() {
        let part = part_path(Path::new("/models/phi-Q4_K_M.gguf"));
        assert_eq!(part, PathBuf::from("/models/phi-Q4_K_M.gguf.part"));
    }

    #[tokio::test]
    async fn checksum_mismatch_discards_the_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("m.gguf");
        let part = part_path(&destination);
        fs::write(&part, b"hello").await.unwrap();

        let artifact = ResolvedArtifact {
            repo_id: "ns/repo".to_string(),
            filename: "m.gguf".to_string(),
            download_url: "http://127.0.0.1:9/m.gguf".to_string(),
            destination,
            expected_size: Some(5),
            sha256: Some("00".repeat(32)),
            backend: "test".to_string(),
        };
        let err = verify(&artifact, &part, None).await.unwrap_err();
        assert!(matches!(err, AttemptError::Retry(ref r) if r.contains("checksum")));
        assert!(!part.exists());
    }

    #[tokio::test]
    async fn matching_checksum_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("m.gguf");
        let part = part_path(&destination);
        fs::write(&part, b"hello").await.unwrap();

        let artifact = ResolvedArtifact {
            repo_id: "ns/repo".to_string(),
            filename: "m.gguf".to_string(),
            download_url: "http://127.0.0.1:9/m.gguf".to_string(),
            destination,
            expected_size: None,
            sha256: Some("2CF24DBA5FB0A30E26E83B2AC5B9E29E1B161E5C1FA7425E73043362938B9824".to_string()),
            backend: "test".to_string(),
        };
        let checksum = verify(&artifact, &part, Some(5)).await.unwrap();
        assert_eq!(
            checksum.as_deref(),
            Some("2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824")
        );
    }
}
