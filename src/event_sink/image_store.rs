//! Event image files and thumbnails

use super::ImageRef;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;

/// Thumbnail bounding size (aspect ratio preserved)
pub const THUMB_WIDTH: u32 = 320;
pub const THUMB_HEIGHT: u32 = 240;

/// Cleanup operation statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanupStats {
    /// Files examined
    pub total: usize,
    pub deleted: usize,
    pub kept: usize,
    pub bytes_freed: u64,
}

/// Filesystem store for full images and thumbnails
#[derive(Debug, Clone)]
pub struct ImageStore {
    image_dir: PathBuf,
    thumb_dir: PathBuf,
}

impl ImageStore {
    /// Create store, creating both directories if missing
    pub async fn new(image_dir: impl Into<PathBuf>, thumb_dir: impl Into<PathBuf>) -> Result<Self> {
        let store = Self {
            image_dir: image_dir.into(),
            thumb_dir: thumb_dir.into(),
        };
        fs::create_dir_all(&store.image_dir).await?;
        fs::create_dir_all(&store.thumb_dir).await?;
        Ok(store)
    }

    pub fn image_dir(&self) -> &Path {
        &self.image_dir
    }

    pub fn thumb_dir(&self) -> &Path {
        &self.thumb_dir
    }

    /// File stem `{camera_id}_{YYYYmmdd_HHMMSS_ffffff}`
    pub fn file_stem(camera_id: &str, captured_at: DateTime<Utc>) -> String {
        format!("{}_{}", camera_id, captured_at.format("%Y%m%d_%H%M%S_%6f"))
    }

    /// Write the full image and its thumbnail.
    ///
    /// A thumbnail failure is logged and yields `thumb_path: None`; only a
    /// failure to write the full image is an error.
    pub async fn save(
        &self,
        camera_id: &str,
        data: &[u8],
        captured_at: DateTime<Utc>,
    ) -> Result<ImageRef> {
        let stem = Self::file_stem(camera_id, captured_at);

        let image_path = self.image_dir.join(format!("{}.jpg", stem));
        fs::write(&image_path, data)
            .await
            .map_err(|e| Error::Sink(format!("write {}: {}", image_path.display(), e)))?;

        let thumb_path = match self.save_thumbnail(&stem, data).await {
            Ok(path) => Some(path.to_string_lossy().to_string()),
            Err(e) => {
                tracing::warn!(
                    camera_id = %camera_id,
                    error = %e,
                    "Thumbnail generation failed, recording event without thumbnail"
                );
                None
            }
        };

        Ok(ImageRef {
            image_path: image_path.to_string_lossy().to_string(),
            thumb_path,
        })
    }

    async fn save_thumbnail(&self, stem: &str, data: &[u8]) -> Result<PathBuf> {
        let encoded = encode_thumbnail(data)?;
        let path = self.thumb_dir.join(format!("{}_thumb.jpg", stem));
        fs::write(&path, encoded).await?;
        Ok(path)
    }

    /// Delete images and thumbnails older than `retention_days`
    pub async fn cleanup_older_than(&self, retention_days: u32) -> Result<CleanupStats> {
        let retention = Duration::from_secs(u64::from(retention_days) * 24 * 60 * 60);
        let cutoff = SystemTime::now()
            .checked_sub(retention)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        self.cleanup_before(cutoff).await
    }

    /// Delete every file last modified before `cutoff`
    pub async fn cleanup_before(&self, cutoff: SystemTime) -> Result<CleanupStats> {
        let mut stats = CleanupStats::default();

        for dir in [&self.image_dir, &self.thumb_dir] {
            if !dir.exists() {
                continue;
            }

            let mut entries = fs::read_dir(dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let meta = match entry.metadata().await {
                    Ok(m) if m.is_file() => m,
                    _ => continue,
                };
                stats.total += 1;

                let modified = meta.modified().unwrap_or(SystemTime::now());
                if modified >= cutoff {
                    stats.kept += 1;
                    continue;
                }

                let path = entry.path();
                if let Err(e) = fs::remove_file(&path).await {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to delete expired image"
                    );
                    stats.kept += 1;
                    continue;
                }
                stats.deleted += 1;
                stats.bytes_freed += meta.len();
            }
        }

        if stats.deleted > 0 {
            tracing::info!(
                total = stats.total,
                deleted = stats.deleted,
                bytes_freed = stats.bytes_freed,
                "Image retention enforced"
            );
        }

        Ok(stats)
    }
}

/// Decode, downscale to fit 320x240 and re-encode as JPEG
fn encode_thumbnail(data: &[u8]) -> Result<Vec<u8>> {
    let img = image::load_from_memory(data)?;
    let thumb = img.resize(THUMB_WIDTH, THUMB_HEIGHT, FilterType::Triangle);
    // JPEG has no alpha channel
    let rgb = DynamicImage::ImageRgb8(thumb.to_rgb8());

    let mut out = Cursor::new(Vec::new());
    rgb.write_to(&mut out, ImageFormat::Jpeg)?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::test_support::png_bytes;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap() + chrono::Duration::microseconds(42)
    }

    async fn store(dir: &tempfile::TempDir) -> ImageStore {
        ImageStore::new(dir.path().join("images"), dir.path().join("thumbs"))
            .await
            .unwrap()
    }

    #[test]
    fn test_file_stem_format() {
        assert_eq!(
            ImageStore::file_stem("cam-1", ts()),
            "cam-1_20260304_050607_000042"
        );
    }

    #[tokio::test]
    async fn test_save_writes_image_and_thumbnail() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        let data = png_bytes(640, 480);

        let image = store.save("cam-1", &data, ts()).await.unwrap();

        assert_eq!(fs::read(&image.image_path).await.unwrap(), data);
        let thumb = fs::read(image.thumb_path.unwrap()).await.unwrap();
        let decoded = image::load_from_memory(&thumb).unwrap();
        assert!(decoded.width() <= THUMB_WIDTH && decoded.height() <= THUMB_HEIGHT);
    }

    #[tokio::test]
    async fn test_undecodable_image_saved_without_thumbnail() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;

        let image = store.save("cam-1", b"not an image", ts()).await.unwrap();

        assert!(image.thumb_path.is_none());
        assert!(Path::new(&image.image_path).exists());
    }

    #[tokio::test]
    async fn test_cleanup_respects_cutoff() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        store.save("cam-1", &png_bytes(8, 8), ts()).await.unwrap();

        let past = SystemTime::now() - Duration::from_secs(3600);
        let stats = store.cleanup_before(past).await.unwrap();
        assert_eq!(stats.deleted, 0);
        assert_eq!(stats.kept, 2);

        let future = SystemTime::now() + Duration::from_secs(3600);
        let stats = store.cleanup_before(future).await.unwrap();
        assert_eq!(stats.deleted, 2);
        assert!(stats.bytes_freed > 0);

        let stats = store.cleanup_older_than(15).await.unwrap();
        assert_eq!(stats.total, 0);
    }
}
