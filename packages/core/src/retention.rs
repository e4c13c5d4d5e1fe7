//! Retention collaborator: active-sensor mirroring and pcap archiving.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use reqwest::Client;
use serde::Serialize;

use crate::error::{AppError, ProviderError};
use crate::services::SensorApi;
use crate::types::Sensor;

/// Keeps the retention server's list of active sensors equal to the
/// directory.
#[derive(Clone)]
pub struct RetentionMirror {
    url: String,
    http: Client,
}

impl RetentionMirror {
    /// `base_url` is the retention server root, without trailing slash.
    pub fn new(base_url: &str) -> Self {
        Self {
            url: format!("{}/api/active-wids-sensors", base_url),
            http: Client::new(),
        }
    }

    /// Returns `true` when the remote list differed and was replaced.
    pub async fn sync(&self, sensors: &[Sensor]) -> Result<bool, AppError> {
        let response = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|e| AppError::Network(format!("GET {} failed: {}", self.url, e)))?;
        if !response.status().is_success() {
            return Err(ProviderError::Status {
                status: response.status().as_u16(),
            }
            .into());
        }
        let remote: Vec<Sensor> = response
            .json()
            .await
            .map_err(|e| AppError::Parse(e.to_string()))?;

        if remote == sensors {
            return Ok(false);
        }

        let response = self
            .http
            .put(&self.url)
            .json(sensors)
            .send()
            .await
            .map_err(|e| AppError::Network(format!("PUT {} failed: {}", self.url, e)))?;
        if !response.status().is_success() {
            return Err(ProviderError::Status {
                status: response.status().as_u16(),
            }
            .into());
        }

        tracing::info!("Retention server now tracks {} sensors", sensors.len());
        Ok(true)
    }
}

/// `true` for a plain file name that cannot escape its directory.
pub fn is_safe_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && !name.contains("..")
        && !name.contains(['/', '\\', '\0'])
}

/// Copies every capture a sensor lists into `<root>/<sensor id>/` unless a
/// file of that name is already there.
#[derive(Clone)]
pub struct PcapArchiver {
    api: Arc<dyn SensorApi>,
    root: PathBuf,
}

impl PcapArchiver {
    pub fn new(api: Arc<dyn SensorApi>, root: impl Into<PathBuf>) -> Self {
        Self { api, root: root.into() }
    }

    pub fn sensor_dir(&self, sensor: &Sensor) -> PathBuf {
        self.root.join(&sensor.id)
    }

    /// Returns the number of files downloaded.
    pub async fn archive(&self, sensor: &Sensor) -> Result<usize, AppError> {
        let dir = self.sensor_dir(sensor);
        tokio::fs::create_dir_all(&dir).await?;

        let listed = self.api.list_pcap_files(sensor).await?;
        let present = existing_files(&dir).await?;

        let mut downloaded = 0;
        for name in listed {
            if present.contains(&name) {
                continue;
            }
            if !is_safe_file_name(&name) {
                tracing::warn!(sensor = %sensor.id, "Refusing unsafe pcap name {:?}", name);
                continue;
            }

            // One bad download should not stop the rest.
            match self.download(sensor, &dir, &name).await {
                Ok(()) => downloaded += 1,
                Err(err) => tracing::warn!(sensor = %sensor.id, file = %name, "Pcap download failed: {}", err),
            }
        }

        if downloaded > 0 {
            tracing::info!(sensor = %sensor.id, "Archived {} pcap files", downloaded);
        }
        Ok(downloaded)
    }

    async fn download(&self, sensor: &Sensor, dir: &Path, name: &str) -> Result<(), AppError> {
        let bytes = self.api.download_pcap(sensor, name).await?;
        // Written under a temporary name so an interrupted write is retried.
        let partial = dir.join(format!(".{}.part", name));
        tokio::fs::write(&partial, &bytes).await?;
        tokio::fs::rename(&partial, dir.join(name)).await?;
        Ok(())
    }
}

/// One archived capture as listed to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchivedFile {
    pub folder_name: String,
    pub file_name: String,
}

/// Read side of the archive written by [`PcapArchiver`].
#[derive(Debug, Clone)]
pub struct PcapArchive {
    root: PathBuf,
}

impl PcapArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Every archived file, ordered by file name then folder, descending.
    /// Partial downloads are not listed.
    pub async fn list(&self) -> Result<Vec<ArchivedFile>, std::io::Error> {
        let mut files = Vec::new();
        let mut folders = match tokio::fs::read_dir(&self.root).await {
            Ok(folders) => folders,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(err) => return Err(err),
        };

        while let Some(folder) = folders.next_entry().await? {
            if !folder.file_type().await?.is_dir() {
                continue;
            }
            let Some(folder_name) = folder.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let mut entries = tokio::fs::read_dir(folder.path()).await?;
            while let Some(entry) = entries.next_entry().await? {
                let Some(file_name) = entry.file_name().to_str().map(str::to_string) else {
                    continue;
                };
                if file_name.starts_with('.') || !entry.file_type().await?.is_file() {
                    continue;
                }
                files.push(ArchivedFile {
                    folder_name: folder_name.clone(),
                    file_name,
                });
            }
        }

        files.sort_by(|a, b| {
            (&b.file_name, &b.folder_name).cmp(&(&a.file_name, &a.folder_name))
        });
        Ok(files)
    }

    /// Path of `<folder>/<file>` when both names are plain and it is a
    /// regular file.
    pub async fn locate(&self, folder: &str, file: &str) -> Option<PathBuf> {
        if !is_safe_file_name(folder) || !is_safe_file_name(file) || file.starts_with('.') {
            return None;
        }
        let path = self.root.join(folder).join(file);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Some(path),
            _ => None,
        }
    }
}

async fn existing_files(dir: &Path) -> Result<HashSet<String>, std::io::Error> {
    let mut names = HashSet::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if let Some(name) = entry.file_name().to_str() {
            names.insert(name.to_string());
        }
    }
    Ok(names)
}
