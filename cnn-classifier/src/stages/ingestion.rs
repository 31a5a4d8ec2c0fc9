//! Dataset download and extraction.

use super::Stage;
use crate::config::DataIngestionConfig;
use crate::context::StageContext;
use crate::core::{ArtifactKind, StageArtifact};
use crate::errors::{PipelineError, Result};
use crate::utils::create_directories;
use async_trait::async_trait;
use regex::Regex;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response};
use serde_json::json;
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use zip::ZipArchive;

const DRIVE_DOWNLOAD_PREFIX: &str = "https://drive.google.com/uc?export=download&id=";

/// Builds the direct-download URL for a shareable drive link.
///
/// `https://drive.google.com/file/d/<FILEID>/view?usp=sharing` becomes
/// `https://drive.google.com/uc?export=download&id=<FILEID>`.
pub fn drive_download_url(source_url: &str) -> Result<String> {
    let pattern = Regex::new(r"/d/([A-Za-z0-9_-]+)")
        .map_err(|e| PipelineError::Download(format!("invalid file id pattern: {e}")))?;
    let file_id = pattern
        .captures(source_url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .ok_or_else(|| {
            PipelineError::Download(format!(
                "cannot find a file id after '/d/' in {source_url}"
            ))
        })?;
    Ok(format!("{DRIVE_DOWNLOAD_PREFIX}{file_id}"))
}

/// Retrieves a URL into a local file.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Writes the body of `url` to `dest` and returns the number of bytes.
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64>;
}

/// Streams downloads over HTTP.
///
/// Drive answers large files with an HTML virus-scan page; when that happens
/// the request is repeated once with `&confirm=t`.
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Creates a fetcher with a default client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a fetcher that sends requests through `client`.
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn get(&self, url: &str) -> Result<Response> {
        self.client
            .get(url)
            .send()
            .await
            .and_then(Response::error_for_status)
            .map_err(|e| PipelineError::Download(format!("request to {url} failed: {e}")))
    }
}

fn is_html(response: &Response) -> bool {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("text/html"))
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64> {
        let mut response = self.get(url).await?;
        if is_html(&response) {
            let confirmed = format!("{url}&confirm=t");
            warn!(url = %url, "Received an HTML page, retrying with confirmation");
            response = self.get(&confirmed).await?;
            if is_html(&response) {
                return Err(PipelineError::Download(format!(
                    "{url} returned an HTML page instead of the archive"
                )));
            }
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| PipelineError::io(dest, e))?;
        let mut written = 0_u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| PipelineError::Download(format!("failed reading body of {url}: {e}")))?
        {
            file.write_all(&chunk)
                .await
                .map_err(|e| PipelineError::io(dest, e))?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| PipelineError::io(dest, e))?;
        Ok(written)
    }
}

/// Downloads the dataset archive and extracts it.
pub struct DataIngestion {
    config: DataIngestionConfig,
    fetcher: Arc<dyn Fetcher>,
}

impl DataIngestion {
    /// Creates the component.
    #[must_use]
    pub fn new(config: DataIngestionConfig, fetcher: Arc<dyn Fetcher>) -> Self {
        Self { config, fetcher }
    }

    /// The configuration record.
    #[must_use]
    pub const fn config(&self) -> &DataIngestionConfig {
        &self.config
    }

    /// Downloads `source_url` to `local_data_file`, overwriting any previous
    /// archive. Returns the number of bytes written.
    pub async fn download_file(&self) -> Result<u64> {
        let dest = &self.config.local_data_file;
        info!(
            "Downloading data from : {} into : {}",
            self.config.source_url,
            dest.display()
        );

        let url = drive_download_url(&self.config.source_url)?;
        if let Some(parent) = dest.parent() {
            create_directories(&[parent])?;
        }
        let bytes = self.fetcher.fetch(&url, dest).await?;

        info!(
            "Download data from {} into : {} is completed.",
            self.config.source_url,
            dest.display()
        );
        debug!(bytes, url = %url, "Archive written");
        Ok(bytes)
    }

    /// Extracts every entry of the archive into `unzip_dir`.
    pub fn extract_zip_file(&self) -> Result<PathBuf> {
        let archive_path = &self.config.local_data_file;
        let unzip_dir = &self.config.unzip_dir;
        info!(
            "Extracting data from : {} to : {}",
            archive_path.display(),
            unzip_dir.display()
        );

        create_directories(&[unzip_dir])?;
        let file = File::open(archive_path)
            .map_err(|e| PipelineError::extraction(archive_path, e.to_string()))?;
        let mut archive = ZipArchive::new(file)
            .map_err(|e| PipelineError::extraction(archive_path, e.to_string()))?;
        let entries = archive.len();
        archive
            .extract(unzip_dir)
            .map_err(|e| PipelineError::extraction(archive_path, e.to_string()))?;

        info!(entries, "Extraction completed successfully.");
        Ok(unzip_dir.clone())
    }
}

impl fmt::Debug for DataIngestion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataIngestion")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Stage 1: fetch and unpack the dataset.
#[derive(Clone)]
pub struct DataIngestionStage {
    fetcher: Arc<dyn Fetcher>,
}

impl DataIngestionStage {
    /// Stage name used in log markers.
    pub const NAME: &'static str = "Data Ingestion Stage";

    /// Creates the stage with a custom fetcher.
    #[must_use]
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self { fetcher }
    }
}

impl Default for DataIngestionStage {
    fn default() -> Self {
        Self::new(Arc::new(HttpFetcher::new()))
    }
}

impl fmt::Debug for DataIngestionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataIngestionStage").finish_non_exhaustive()
    }
}

#[async_trait]
impl Stage for DataIngestionStage {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn run(&self, ctx: &StageContext) -> Result<Vec<StageArtifact>> {
        let config = ctx.configs().data_ingestion_config()?;
        let ingestion = DataIngestion::new(config, Arc::clone(&self.fetcher));

        let bytes = ingestion.download_file().await?;
        ctx.emit_event(
            "ingestion.downloaded",
            Some(json!({
                "path": ingestion.config().local_data_file.display().to_string(),
                "bytes": bytes,
            })),
        )
        .await;

        let unzip_dir = ingestion.extract_zip_file()?;
        ctx.emit_event(
            "ingestion.extracted",
            Some(json!({"unzip_dir": unzip_dir.display().to_string()})),
        )
        .await;

        Ok(vec![
            StageArtifact::file(ArtifactKind::Archive, &ingestion.config().local_data_file)?,
            StageArtifact::directory(unzip_dir),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{write_image_dataset, zip_directory};
    use mockall::predicate::eq;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn config_in(root: &Path) -> DataIngestionConfig {
        DataIngestionConfig {
            root_dir: root.join("artifacts/data_ingestion"),
            source_url: "https://drive.google.com/file/d/1AbC-d_9/view?usp=sharing".to_string(),
            local_data_file: root.join("artifacts/data_ingestion/data.zip"),
            unzip_dir: root.join("artifacts/data_ingestion"),
        }
    }

    #[test]
    fn test_drive_download_url() {
        let url = drive_download_url("https://drive.google.com/file/d/FILEID123/view?usp=sharing").unwrap();
        assert_eq!(url, "https://drive.google.com/uc?export=download&id=FILEID123");
    }

    #[test]
    fn test_drive_download_url_rejects_other_shapes() {
        let err = drive_download_url("https://example.com/archive.zip").unwrap_err();
        assert_eq!(err.kind(), "DownloadError");
    }

    #[tokio::test]
    async fn test_download_requests_direct_url() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());
        let expected_dest = config.local_data_file.clone();

        let mut fetcher = MockFetcher::new();
        fetcher
            .expect_fetch()
            .with(
                eq("https://drive.google.com/uc?export=download&id=1AbC-d_9"),
                eq(expected_dest.clone()),
            )
            .times(1)
            .returning(|_, dest| {
                std::fs::write(dest, b"PK").unwrap();
                Ok(2)
            });

        let ingestion = DataIngestion::new(config, Arc::new(fetcher));
        let bytes = ingestion.download_file().await.unwrap();

        assert_eq!(bytes, 2);
        assert!(expected_dest.is_file());
    }

    #[tokio::test]
    async fn test_download_failure_propagates() {
        let dir = tempdir().unwrap();
        let mut fetcher = MockFetcher::new();
        fetcher
            .expect_fetch()
            .returning(|url, _| Err(PipelineError::Download(format!("{url}: 404"))));

        let ingestion = DataIngestion::new(config_in(dir.path()), Arc::new(fetcher));
        let err = ingestion.download_file().await.unwrap_err();
        assert_eq!(err.kind(), "DownloadError");
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn test_invalid_source_url_never_fetches() {
        let dir = tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.source_url = "not a drive link".to_string();

        let mut fetcher = MockFetcher::new();
        fetcher.expect_fetch().times(0);

        let err = DataIngestion::new(config, Arc::new(fetcher))
            .download_file()
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "DownloadError");
    }

    #[test]
    fn test_extract_zip_file() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("source");
        write_image_dataset(&source.join("dataset"), &["Cyst", "Normal"], 2, 4);
        let config = config_in(dir.path());
        zip_directory(&source, &config.local_data_file);

        let ingestion = DataIngestion::new(config, Arc::new(MockFetcher::new()));
        let unzip_dir = ingestion.extract_zip_file().unwrap();

        assert!(unzip_dir.join("dataset/Cyst").is_dir());
        assert!(unzip_dir.join("dataset/Normal/img_0001.png").is_file());
    }

    #[test]
    fn test_extract_corrupt_zip_is_extraction_error() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());
        std::fs::create_dir_all(&config.root_dir).unwrap();
        std::fs::write(&config.local_data_file, b"definitely not a zip").unwrap();

        let err = DataIngestion::new(config, Arc::new(MockFetcher::new()))
            .extract_zip_file()
            .unwrap_err();
        assert_eq!(err.kind(), "ExtractionError");
    }

    #[test]
    fn test_extract_missing_archive_is_extraction_error() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());
        let archive = config.local_data_file.clone();

        let err = DataIngestion::new(config, Arc::new(MockFetcher::new()))
            .extract_zip_file()
            .unwrap_err();

        assert_eq!(err.kind(), "ExtractionError");
        assert!(matches!(err, PipelineError::Extraction { archive: ref a, .. } if *a == archive));
    }

    /// Serves one canned `(content type, body)` response per connection and
    /// records each request target.
    async fn serve(responses: Vec<(&'static str, Vec<u8>)>) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let targets = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&targets);

        tokio::spawn(async move {
            for (content_type, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut request = Vec::new();
                let mut buf = [0_u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = socket.read(&mut buf).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                }
                let text = String::from_utf8_lossy(&request);
                let target = text.split_whitespace().nth(1).unwrap_or_default().to_string();
                seen.lock().push(target);

                let head = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                socket.write_all(head.as_bytes()).await.unwrap();
                socket.write_all(&body).await.unwrap();
                socket.shutdown().await.unwrap();
            }
        });

        (format!("http://{addr}"), targets)
    }

    fn local_fetcher() -> HttpFetcher {
        HttpFetcher::with_client(Client::builder().no_proxy().build().unwrap())
    }

    #[tokio::test]
    async fn test_http_fetch_retries_confirmation_page() {
        let zip_bytes = b"PK\x03\x04 archive bytes".to_vec();
        let (base, targets) = serve(vec![
            ("text/html; charset=utf-8", b"<html>virus scan warning</html>".to_vec()),
            ("application/zip", zip_bytes.clone()),
        ])
        .await;
        let dir = tempdir().unwrap();
        let dest = dir.path().join("data.zip");

        let written = local_fetcher()
            .fetch(&format!("{base}/uc?export=download&id=ABC"), &dest)
            .await
            .unwrap();

        let targets = targets.lock().clone();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0], "/uc?export=download&id=ABC");
        assert!(targets[1].ends_with("&confirm=t"));
        assert_eq!(written, zip_bytes.len() as u64);
        assert_eq!(std::fs::read(&dest).unwrap(), zip_bytes);
    }

    #[tokio::test]
    async fn test_http_fetch_fails_when_confirmation_is_html() {
        let (base, targets) = serve(vec![
            ("text/html", b"<html>warning</html>".to_vec()),
            ("text/html", b"<html>still a warning</html>".to_vec()),
        ])
        .await;
        let dir = tempdir().unwrap();
        let dest = dir.path().join("data.zip");

        let err = local_fetcher()
            .fetch(&format!("{base}/uc?export=download&id=ABC"), &dest)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "DownloadError");
        assert_eq!(targets.lock().len(), 2);
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_http_fetch_writes_archive_directly() {
        let (base, targets) = serve(vec![("application/zip", b"PK zip".to_vec())]).await;
        let dir = tempdir().unwrap();
        let dest = dir.path().join("data.zip");

        let written = local_fetcher()
            .fetch(&format!("{base}/uc?export=download&id=XYZ"), &dest)
            .await
            .unwrap();

        assert_eq!(written, 6);
        assert_eq!(targets.lock().len(), 1);
    }
}
