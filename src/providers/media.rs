use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use tracing::{error, info};

use crate::error::MediaError;

/// File extension for a media content type we can attach to a post.
///
/// Audio is rejected: the platform only accepts it wrapped in a video.
pub fn extension_for(content_type: &str) -> Result<&'static str, MediaError> {
    let content_type = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase();

    let ext = match content_type.as_str() {
        "image/jpeg" | "image/jpg" => ".jpg",
        "image/png" => ".png",
        "image/gif" => ".gif",
        "image/webp" => ".webp",
        "image/svg+xml" => ".svg",
        "video/mp4" => ".mp4",
        "video/quicktime" => ".mov",
        "video/webm" => ".webm",
        other if other.starts_with("image/") => ".jpg",
        other if other.starts_with("video/") => ".mp4",
        other => return Err(MediaError::Unsupported(other.to_string())),
    };
    Ok(ext)
}

static DOWNLOAD_SEQ: AtomicU64 = AtomicU64::new(0);

/// Unique per call within the process, even for downloads started in the same millisecond.
fn download_file_name(millis: i64, extension: &str) -> String {
    let seq = DOWNLOAD_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("download_{}_{}{}", millis, seq, extension)
}

/// Downloads `url` into `temp_dir` and returns the local file path.
pub async fn download_media(client: &reqwest::Client, url: &str, temp_dir: &Path) -> Result<PathBuf, MediaError> {
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        error!("Invalid media URL: {}", url);
        return Err(MediaError::InvalidUrl(url.to_string()));
    }

    let head = client.head(url).send().await?;
    let content_type = head
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let extension = extension_for(&content_type)?;

    let bytes: Bytes = client.get(url).send().await?.error_for_status()?.bytes().await?;

    tokio::fs::create_dir_all(temp_dir).await?;
    let path = temp_dir.join(download_file_name(Utc::now().timestamp_millis(), extension));
    tokio::fs::write(&path, &bytes).await?;
    info!("Downloaded {} bytes of {} to {:?}", bytes.len(), content_type, path);
    Ok(path)
}

/// Removes a downloaded file once it has been uploaded.
pub async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        error!("Failed to remove temp media {:?}: {}", path, e);
    }
}
