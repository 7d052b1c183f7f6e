//! Model artifact resolver
//!
//! Ensures a named model artifact exists locally, downloading it from its
//! source when absent. Downloads stream into a `.tmp` sibling and are
//! renamed into place only after the full expected byte range was written,
//! so a partial file is never reported as present. An interrupted transfer
//! leaves the `.tmp` behind and a retry resumes it with an HTTP Range
//! request.

use crate::net::Connectivity;
use crate::types::ModelSpec;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Asset resolution errors
#[derive(Debug, Error)]
pub enum AssetError {
    /// The artifact is absent locally and cannot be fetched right now
    #[error("Model asset missing: {0}")]
    Missing(String),

    /// Transport failure or partial write during download
    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Resolves model artifacts to local filesystem paths
pub struct ModelAssetResolver {
    models_dir: PathBuf,
    connectivity: Arc<dyn Connectivity>,
}

impl ModelAssetResolver {
    /// Create a resolver storing artifacts under the given directory
    pub fn new(
        models_dir: impl Into<PathBuf>,
        connectivity: Arc<dyn Connectivity>,
    ) -> Result<Self, AssetError> {
        let models_dir = models_dir.into();
        fs::create_dir_all(&models_dir)?;
        Ok(Self {
            models_dir,
            connectivity,
        })
    }

    /// Create a resolver under the application data directory
    pub fn open_default(connectivity: Arc<dyn Connectivity>) -> Result<Self, AssetError> {
        let dir = crate::storage::get_data_dir()
            .map_err(|e| AssetError::Missing(format!("no data dir: {e}")))?
            .join("models");
        Self::new(dir, connectivity)
    }

    /// Local path an artifact resolves to (native path, no URI scheme)
    pub fn local_path(&self, name: &str) -> Result<PathBuf, AssetError> {
        Ok(self.models_dir.join(sanitize_local_filename(name)?))
    }

    /// Whether the artifact is fully present locally
    pub fn is_present(&self, name: &str) -> bool {
        let Ok(path) = self.local_path(name) else {
            return false;
        };
        fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false)
    }

    /// Ensure the artifact exists locally, downloading it when absent
    ///
    /// `progress` receives a monotonically non-decreasing completion
    /// fraction in [0, 1]. May block substantially for multi-gigabyte
    /// artifacts; callers keep it off their UI thread.
    pub async fn ensure_available(
        &self,
        spec: &ModelSpec,
        progress: impl Fn(f32) + Send,
    ) -> Result<PathBuf, AssetError> {
        let path = self.local_path(&spec.name)?;

        // Local existence first: no redundant network access
        if let Ok(metadata) = fs::metadata(&path) {
            if metadata.len() > 0 {
                tracing::info!("Model already present: {:?}", path);
                progress(1.0);
                return Ok(path);
            }
        }

        if !self.connectivity.is_online() {
            tracing::warn!("Offline, cannot fetch model asset {}", spec.name);
            return Err(AssetError::Missing(spec.name.clone()));
        }

        self.download(spec, &path, progress).await?;
        Ok(path)
    }

    async fn download(
        &self,
        spec: &ModelSpec,
        path: &PathBuf,
        progress: impl Fn(f32) + Send,
    ) -> Result<(), AssetError> {
        let temp_path = path.with_extension(
            path.extension()
                .map(|e| format!("{}.tmp", e.to_string_lossy()))
                .unwrap_or_else(|| "tmp".to_string()),
        );

        // Resume from an earlier interrupted transfer when possible
        let resume_from = fs::metadata(&temp_path).map(|m| m.len()).unwrap_or(0);

        tracing::info!(
            "Downloading {} from {} (resume at {} bytes)",
            spec.name,
            spec.source_url,
            resume_from
        );

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(3600)) // 1 hour timeout for large models
            .build()
            .map_err(|e| AssetError::DownloadFailed(format!("HTTP client: {e}")))?;

        let mut request = client
            .get(&spec.source_url)
            .header("User-Agent", "pocketlm/0.2.0");
        if resume_from > 0 {
            request = request.header("Range", format!("bytes={resume_from}-"));
        }

        let mut response = request
            .send()
            .await
            .map_err(|e| AssetError::DownloadFailed(e.to_string()))?;

        let status = response.status();
        let (mut temp_file, mut written, total) = match status.as_u16() {
            // Server honors the range: append the remainder
            206 if resume_from > 0 => {
                let remaining = response
                    .content_length()
                    .ok_or_else(|| AssetError::DownloadFailed("unknown asset size".into()))?;
                let file = OpenOptions::new().append(true).open(&temp_path).await?;
                (file, resume_from, resume_from + remaining)
            }
            // Full body: restart from scratch
            200 => {
                let total = response
                    .content_length()
                    .ok_or_else(|| AssetError::DownloadFailed("unknown asset size".into()))?;
                let file = File::create(&temp_path).await?;
                (file, 0, total)
            }
            _ => {
                return Err(AssetError::DownloadFailed(format!(
                    "unexpected status: {status}"
                )));
            }
        };

        tracing::info!("Asset size: {} bytes ({} MB)", total, total / 1024 / 1024);

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| AssetError::DownloadFailed(e.to_string()))?
        {
            temp_file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            progress((written as f64 / total as f64).min(1.0) as f32);
        }
        temp_file.flush().await?;
        drop(temp_file);

        if written != total {
            // Keep the partial .tmp for a later resume; the asset itself
            // stays missing until the rename below
            return Err(AssetError::DownloadFailed(format!(
                "incomplete transfer: got {written} bytes, expected {total}"
            )));
        }

        fs::rename(&temp_path, path)?;
        tracing::info!("Download complete: {:?}", path);
        Ok(())
    }
}

/// Flatten an artifact name into a safe local filename
fn sanitize_local_filename(name: &str) -> Result<String, AssetError> {
    let trimmed = name.trim();
    let no_query = trimmed.split(['?', '#']).next().unwrap_or(trimmed);
    let flattened = no_query
        .trim_start_matches('/')
        .replace('\\', "/")
        .replace('/', "__");

    let mut sanitized = String::with_capacity(flattened.len());
    for ch in flattened.chars() {
        let invalid = matches!(ch, '<' | '>' | ':' | '"' | '|' | '?' | '*');
        if invalid || ch.is_control() {
            sanitized.push('_');
        } else {
            sanitized.push(ch);
        }
    }

    while sanitized.ends_with('.') || sanitized.ends_with(' ') {
        sanitized.pop();
    }

    if sanitized.is_empty() {
        return Err(AssetError::Missing("invalid asset name".to_string()));
    }

    Ok(sanitized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::AssumeOnline;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::Mutex;

    struct Offline;
    impl Connectivity for Offline {
        fn is_online(&self) -> bool {
            false
        }
    }

    /// Serve a single HTTP response on an ephemeral port. The handler
    /// receives the raw request text and returns the bytes to write
    /// before closing the connection.
    fn serve_once(
        handler: impl FnOnce(String) -> Vec<u8> + Send + 'static,
    ) -> (String, std::thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4096];
            let mut request = String::new();
            loop {
                let n = stream.read(&mut buf).unwrap();
                request.push_str(&String::from_utf8_lossy(&buf[..n]));
                if request.contains("\r\n\r\n") || n == 0 {
                    break;
                }
            }
            let response = handler(request);
            stream.write_all(&response).unwrap();
            let _ = stream.flush();
        });
        (format!("http://127.0.0.1:{port}/model.gguf"), handle)
    }

    fn resolver(dir: &std::path::Path) -> ModelAssetResolver {
        ModelAssetResolver::new(dir.join("models"), Arc::new(AssumeOnline)).unwrap()
    }

    #[test]
    fn test_sanitize_local_filename() {
        assert_eq!(
            sanitize_local_filename("repo/model.gguf?download=true").unwrap(),
            "repo__model.gguf"
        );
        assert_eq!(sanitize_local_filename("model.gguf").unwrap(), "model.gguf");
        assert!(sanitize_local_filename("   ").is_err());
    }

    #[tokio::test]
    async fn test_present_asset_short_circuits_network() {
        let dir = tempfile::tempdir().unwrap();
        // Offline connectivity proves no network is consulted
        let resolver =
            ModelAssetResolver::new(dir.path().join("models"), Arc::new(Offline)).unwrap();

        let path = resolver.local_path("model.gguf").unwrap();
        fs::write(&path, b"weights").unwrap();

        let spec = ModelSpec::new("model.gguf", "https://unreachable.invalid/model.gguf");
        let resolved = resolver.ensure_available(&spec, |_| {}).await.unwrap();
        assert_eq!(resolved, path);
    }

    #[tokio::test]
    async fn test_offline_and_missing_reports_missing() {
        let dir = tempfile::tempdir().unwrap();
        let resolver =
            ModelAssetResolver::new(dir.path().join("models"), Arc::new(Offline)).unwrap();

        let spec = ModelSpec::new("model.gguf", "https://unreachable.invalid/model.gguf");
        let err = resolver.ensure_available(&spec, |_| {}).await.unwrap_err();
        assert!(matches!(err, AssetError::Missing(_)));
        assert!(!resolver.is_present("model.gguf"));
    }

    #[tokio::test]
    async fn test_successful_download_reports_monotonic_progress() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = resolver(dir.path());

        let body = vec![7u8; 1024];
        let (url, server) = serve_once({
            let body = body.clone();
            move |_req| {
                let mut response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                )
                .into_bytes();
                response.extend_from_slice(&body);
                response
            }
        });

        let fractions = Arc::new(Mutex::new(Vec::<f32>::new()));
        let sink = fractions.clone();
        let spec = ModelSpec::new("model.gguf", &url);
        let path = resolver
            .ensure_available(&spec, move |f| sink.lock().unwrap().push(f))
            .await
            .unwrap();
        server.join().unwrap();

        assert_eq!(fs::read(&path).unwrap(), body);
        assert!(resolver.is_present("model.gguf"));

        let fractions = fractions.lock().unwrap();
        assert!(!fractions.is_empty());
        assert!(fractions.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*fractions.last().unwrap(), 1.0);
    }

    #[tokio::test]
    async fn test_interrupted_download_stays_missing() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = resolver(dir.path());

        // Claims 1024 bytes, sends 100, then closes the connection
        let (url, server) = serve_once(|_req| {
            let mut response =
                b"HTTP/1.1 200 OK\r\nContent-Length: 1024\r\nConnection: close\r\n\r\n".to_vec();
            response.extend_from_slice(&[1u8; 100]);
            response
        });

        let spec = ModelSpec::new("model.gguf", &url);
        let err = resolver.ensure_available(&spec, |_| {}).await.unwrap_err();
        server.join().unwrap();

        assert!(matches!(err, AssetError::DownloadFailed(_)));
        assert!(!resolver.is_present("model.gguf"));
        assert!(!resolver.local_path("model.gguf").unwrap().exists());
    }

    #[tokio::test]
    async fn test_resume_appends_remainder() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = resolver(dir.path());

        // Simulate an earlier interrupted transfer of the first 4 bytes
        let partial = b"0123";
        let rest = b"456789";
        let temp = resolver
            .local_path("model.gguf")
            .unwrap()
            .with_extension("gguf.tmp");
        fs::write(&temp, partial).unwrap();

        let (url, server) = serve_once(move |req| {
            let req = req.to_ascii_lowercase();
            assert!(req.contains("range: bytes=4-"), "missing range header: {req}");
            let mut response = format!(
                "HTTP/1.1 206 Partial Content\r\nContent-Length: {}\r\nContent-Range: bytes 4-9/10\r\nConnection: close\r\n\r\n",
                rest.len()
            )
            .into_bytes();
            response.extend_from_slice(rest);
            response
        });

        let spec = ModelSpec::new("model.gguf", &url);
        let path = resolver.ensure_available(&spec, |_| {}).await.unwrap();
        server.join().unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"0123456789");
        assert!(!temp.exists());
    }
}
