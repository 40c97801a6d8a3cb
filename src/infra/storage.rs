//! Permanent archival of provider-hosted render output.

use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt};
use uuid::Uuid;

/// Errors that can occur while archiving render output.
#[derive(Debug, Error)]
pub enum OutputStorageError {
    #[error("invalid stored path")]
    InvalidPath,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("failed to download output: {0}")]
    Download(#[from] reqwest::Error),
    #[error("output exceeds the configured download limit of {limit} bytes")]
    TooLarge { limit: u64 },
    #[error("downloaded output is empty")]
    EmptyPayload,
}

/// Result of archiving one render output.
#[derive(Debug, Clone)]
pub struct StoredOutput {
    pub stored_path: String,
    pub checksum: String,
    pub size_bytes: i64,
}

/// Filesystem-backed output storage.
#[derive(Debug)]
pub struct OutputStorage {
    root: PathBuf,
    http: reqwest::Client,
    max_download_bytes: u64,
}

impl OutputStorage {
    /// Initialise storage rooted at the provided directory, creating it if necessary.
    pub fn new(
        root: PathBuf,
        http: reqwest::Client,
        max_download_bytes: u64,
    ) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            http,
            max_download_bytes,
        })
    }

    /// Download the output URL and persist it under the job's id.
    ///
    /// The payload is streamed to disk so large renders never sit in memory;
    /// the size cap is enforced on the fly and a partial file is removed on
    /// any failure.
    pub async fn archive(
        &self,
        job_id: Uuid,
        output_url: &str,
    ) -> Result<StoredOutput, OutputStorageError> {
        let stored_path = self.build_stored_path(job_id, output_url);
        let absolute = self.resolve(&stored_path)?;

        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent).await?;
        }

        let response = self
            .http
            .get(output_url)
            .send()
            .await?
            .error_for_status()?;

        let mut file = fs::File::create(&absolute).await?;
        let mut hasher = Sha256::new();
        let mut total_bytes: u64 = 0;

        let mut stream = response.bytes_stream();
        while let Some(chunk_result) = stream.next().await {
            let chunk: Bytes = match chunk_result {
                Ok(chunk) => chunk,
                Err(err) => {
                    drop(file);
                    let _ = fs::remove_file(&absolute).await;
                    return Err(err.into());
                }
            };

            if chunk.is_empty() {
                continue;
            }

            total_bytes += chunk.len() as u64;
            if total_bytes > self.max_download_bytes {
                drop(file);
                let _ = fs::remove_file(&absolute).await;
                return Err(OutputStorageError::TooLarge {
                    limit: self.max_download_bytes,
                });
            }

            hasher.update(&chunk);
            file.write_all(&chunk).await?;
        }

        file.flush().await?;
        drop(file);

        if total_bytes == 0 {
            let _ = fs::remove_file(&absolute).await;
            return Err(OutputStorageError::EmptyPayload);
        }

        Ok(StoredOutput {
            stored_path,
            checksum: hex::encode(hasher.finalize()),
            size_bytes: total_bytes as i64,
        })
    }

    /// Absolute path of a previously stored output.
    pub fn resolve(&self, stored_path: &str) -> Result<PathBuf, OutputStorageError> {
        let relative = Path::new(stored_path);
        if relative.is_absolute() {
            return Err(OutputStorageError::InvalidPath);
        }
        for component in relative.components() {
            match component {
                Component::Normal(_) => {}
                _ => return Err(OutputStorageError::InvalidPath),
            }
        }
        Ok(self.root.join(relative))
    }

    fn build_stored_path(&self, job_id: Uuid, output_url: &str) -> String {
        let extension = Path::new(output_url.split('?').next().unwrap_or(output_url))
            .extension()
            .and_then(|ext| ext.to_str())
            .filter(|ext| ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .unwrap_or("bin");

        let id = job_id.simple().to_string();
        // Shard by the first two characters to keep directories shallow.
        format!("{}/{id}.{extension}", &id[..2])
    }
}
