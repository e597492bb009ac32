//! Asset preparation ahead of display.
//!
//! A slide only becomes eligible for display once its asset is prepared:
//! images are fetched and fully decoded, videos are on local disk so
//! playback never waits on the network.

use crate::cache::{PreparedAsset, PreparedVideo, SharedCache};
use crate::media::{MediaKind, Slide};
use crate::source::{local_path, MediaSource};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Why an asset could not be prepared.
#[derive(Debug, thiserror::Error)]
pub enum PrepareError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error("media is empty")]
    Empty,
    #[error("unsupported media location: {0}")]
    UnsupportedScheme(String),
    #[error("decoder task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("not ready after {0:?}")]
    Timeout(Duration),
}

/// Prepares slides for display. Failures are reported, never retried here.
#[async_trait]
pub trait MediaPreloader: Send + Sync {
    async fn prepare(&self, slide: &Slide) -> Result<PreparedAsset, PrepareError>;
}

/// Preloader backed by a [`MediaSource`] and a [`SharedCache`].
pub struct AssetPreloader {
    source: MediaSource,
    cache: SharedCache,
    /// Where remote videos are downloaded to.
    spool_dir: PathBuf,
}

impl AssetPreloader {
    pub fn new(source: MediaSource, cache: SharedCache, spool_dir: PathBuf) -> Self {
        Self {
            source,
            cache,
            spool_dir,
        }
    }

    async fn prepare_image(&self, slide: &Slide) -> Result<PreparedAsset, PrepareError> {
        let bytes = self.source.fetch(&slide.url).await?;
        if bytes.is_empty() {
            return Err(PrepareError::Empty);
        }

        let decoded = tokio::task::spawn_blocking(move || {
            image::load_from_memory(&bytes).map(|img| img.to_rgba8())
        })
        .await??;

        tracing::debug!(
            "Decoded {} ({}x{})",
            slide.item.path(),
            decoded.width(),
            decoded.height()
        );
        Ok(PreparedAsset::Image(Arc::new(decoded)))
    }

    async fn prepare_video(&self, slide: &Slide) -> Result<PreparedAsset, PrepareError> {
        let video = if slide.url.scheme() == "file" {
            let path = local_path(&slide.url)?;
            if tokio::fs::metadata(&path).await?.len() == 0 {
                return Err(PrepareError::Empty);
            }
            PreparedVideo::local(path)
        } else {
            self.spool(slide).await?
        };

        tracing::debug!(
            "Video {} ready at {} (spooled: {})",
            slide.item.path(),
            video.path().display(),
            video.is_spooled()
        );
        Ok(PreparedAsset::Video(Arc::new(video)))
    }

    /// Download a remote video into the spool directory. The partial file is
    /// removed if the download fails or is cancelled.
    async fn spool(&self, slide: &Slide) -> Result<PreparedVideo, PrepareError> {
        let suffix = Path::new(slide.item.path())
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| format!(".{}", ext))
            .unwrap_or_default();
        let (file, path) = tempfile::Builder::new()
            .prefix("signage-")
            .suffix(&suffix)
            .tempfile_in(&self.spool_dir)?
            .into_parts();

        let mut file = tokio::fs::File::from_std(file);
        let bytes = self.source.download_to(&slide.url, &mut file).await?;
        if bytes == 0 {
            return Err(PrepareError::Empty);
        }

        tracing::debug!(
            "Spooled {:.2} KB of {}",
            bytes as f64 / 1024.0,
            slide.item.path()
        );
        Ok(PreparedVideo::spooled(path, bytes))
    }
}

#[async_trait]
impl MediaPreloader for AssetPreloader {
    async fn prepare(&self, slide: &Slide) -> Result<PreparedAsset, PrepareError> {
        let key = slide.url.as_str();

        let cached = self.cache.lock().get(key);
        if let Some(asset) = cached {
            return Ok(asset);
        }

        let asset = match slide.kind() {
            MediaKind::Image => self.prepare_image(slide).await?,
            MediaKind::Video => self.prepare_video(slide).await?,
        };

        self.cache.lock().insert(key.to_string(), asset.clone());
        Ok(asset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::PreparedCache;
    use crate::media::MediaItem;
    use crate::source::Locator;
    use image::{ImageFormat, Rgba, RgbaImage};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn preloader() -> (AssetPreloader, SharedCache) {
        preloader_spooling_to(&std::env::temp_dir())
    }

    fn preloader_spooling_to(spool: &Path) -> (AssetPreloader, SharedCache) {
        let cache = PreparedCache::new(16).shared();
        let source = MediaSource::new(Duration::from_secs(1)).unwrap();
        (
            AssetPreloader::new(source, cache.clone(), spool.to_path_buf()),
            cache,
        )
    }

    fn slide(dir: &Path, name: &str) -> Slide {
        slide_at(dir.to_str().unwrap(), name)
    }

    fn slide_at(base: &str, name: &str) -> Slide {
        let locator = Locator::new(base, Some("42".into())).unwrap();
        Slide {
            item: MediaItem::new(name),
            url: locator.display_url(name).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_image_is_decoded_and_cached() {
        let dir = tempfile::tempdir().unwrap();
        RgbaImage::from_pixel(4, 3, Rgba([10, 20, 30, 255]))
            .save_with_format(dir.path().join("every1.png"), ImageFormat::Png)
            .unwrap();

        let (preloader, cache) = preloader();
        let slide = slide(dir.path(), "every1.png");

        match preloader.prepare(&slide).await.unwrap() {
            PreparedAsset::Image(img) => assert_eq!(img.dimensions(), (4, 3)),
            other => panic!("expected image, got {:?}", other),
        }

        let cached = cache.image(slide.url.as_str()).unwrap();
        assert_eq!(cached.get_pixel(0, 0), &Rgba([10, 20, 30, 255]));

        // Served from cache even after the file disappears.
        std::fs::remove_file(dir.path().join("every1.png")).unwrap();
        assert!(preloader.prepare(&slide).await.is_ok());
    }

    #[tokio::test]
    async fn test_corrupt_image_fails() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.jpg"), b"definitely not a jpeg").unwrap();

        let (preloader, cache) = preloader();
        let slide = slide(dir.path(), "broken.jpg");

        assert!(matches!(
            preloader.prepare(&slide).await,
            Err(PrepareError::Decode(_))
        ));
        assert!(!cache.lock().contains(slide.url.as_str()));
    }

    #[tokio::test]
    async fn test_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (preloader, _) = preloader();
        assert!(matches!(
            preloader.prepare(&slide(dir.path(), "gone.jpg")).await,
            Err(PrepareError::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_local_video_plays_in_place() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("promo.mp4"), vec![0u8; 8 * 1024]).unwrap();
        std::fs::write(dir.path().join("empty.mp4"), b"").unwrap();

        let (preloader, _) = preloader();

        match preloader.prepare(&slide(dir.path(), "promo.mp4")).await.unwrap() {
            PreparedAsset::Video(video) => {
                assert_eq!(video.path(), dir.path().join("promo.mp4"));
                assert!(!video.is_spooled());
            }
            other => panic!("expected video, got {:?}", other),
        }
        assert!(matches!(
            preloader.prepare(&slide(dir.path(), "empty.mp4")).await,
            Err(PrepareError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_remote_video_is_spooled_and_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/promo.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![5u8; 8 * 1024]))
            .expect(1)
            .mount(&server)
            .await;

        let spool = tempfile::tempdir().unwrap();
        let (preloader, cache) = preloader_spooling_to(spool.path());
        let slide = slide_at(&server.uri(), "promo.mp4");

        let video = match preloader.prepare(&slide).await.unwrap() {
            PreparedAsset::Video(video) => video,
            other => panic!("expected video, got {:?}", other),
        };
        assert!(video.is_spooled());
        assert!(video.path().starts_with(spool.path()));
        assert_eq!(video.path().extension().unwrap(), "mp4");
        assert_eq!(std::fs::read(video.path()).unwrap(), vec![5u8; 8 * 1024]);

        // Second prepare and the display lookup both hit the cache.
        assert!(preloader.prepare(&slide).await.is_ok());
        assert_eq!(cache.video(slide.url.as_str()).unwrap().path(), video.path());
        assert_eq!(cache.lock().stats().current_size, 8 * 1024);
    }

    #[tokio::test]
    async fn test_failed_download_leaves_no_spool_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone.mp4"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let spool = tempfile::tempdir().unwrap();
        let (preloader, _) = preloader_spooling_to(spool.path());

        assert!(matches!(
            preloader.prepare(&slide_at(&server.uri(), "gone.mp4")).await,
            Err(PrepareError::Http(_))
        ));
        assert_eq!(std::fs::read_dir(spool.path()).unwrap().count(), 0);
    }
}
