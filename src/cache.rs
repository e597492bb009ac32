//! LRU cache of prepared assets.
//!
//! Holds decoded bitmaps and locally playable videos keyed by the exact URL
//! they were prepared from, within a size budget.

use image::RgbaImage;
use lru::LruCache;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tempfile::TempPath;

/// A video that can be played from the local filesystem.
#[derive(Debug)]
pub struct PreparedVideo {
    path: PathBuf,
    /// Download owned by this entry; the file is removed when it drops.
    spool: Option<TempPath>,
    spooled_bytes: u64,
}

impl PreparedVideo {
    /// A video already on local disk.
    pub fn local(path: PathBuf) -> Self {
        Self {
            path,
            spool: None,
            spooled_bytes: 0,
        }
    }

    /// A video downloaded into `spool`.
    pub fn spooled(spool: TempPath, bytes: u64) -> Self {
        Self {
            path: spool.to_path_buf(),
            spool: Some(spool),
            spooled_bytes: bytes,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_spooled(&self) -> bool {
        self.spool.is_some()
    }
}

/// A media item that is ready to be shown.
#[derive(Debug, Clone)]
pub enum PreparedAsset {
    /// Fully decoded bitmap.
    Image(Arc<RgbaImage>),
    /// Video available on local disk.
    Video(Arc<PreparedVideo>),
}

impl PreparedAsset {
    /// Bytes this entry holds, in memory or in the spool directory.
    fn footprint(&self) -> u64 {
        match self {
            PreparedAsset::Image(img) => img.as_raw().len() as u64,
            PreparedAsset::Video(video) => video.spooled_bytes,
        }
    }
}

/// LRU cache for prepared assets.
pub struct PreparedCache {
    /// Maximum memory held by cached bitmaps, in bytes.
    max_size: u64,
    /// Current memory held, in bytes.
    current_size: u64,
    /// Entries keyed by URL.
    lru: LruCache<String, PreparedAsset>,
}

impl PreparedCache {
    /// Create a cache with the given memory budget.
    pub fn new(max_size_mb: u64) -> Self {
        let max_size = max_size_mb * 1024 * 1024;
        tracing::debug!("Prepared cache budget: {} MB", max_size_mb);

        Self {
            max_size,
            current_size: 0,
            lru: LruCache::unbounded(),
        }
    }

    /// Wrap for sharing between the preloader and the render thread.
    pub fn shared(self) -> SharedCache {
        SharedCache(Arc::new(Mutex::new(self)))
    }

    /// Look up an asset, marking it recently used.
    pub fn get(&mut self, url: &str) -> Option<PreparedAsset> {
        self.lru.get(url).cloned()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.lru.contains(url)
    }

    /// Insert an asset, evicting least recently used entries to stay in budget.
    pub fn insert(&mut self, url: String, asset: PreparedAsset) {
        let size = asset.footprint();

        if let Some(old) = self.lru.pop(&url) {
            self.current_size = self.current_size.saturating_sub(old.footprint());
        }

        while self.current_size + size > self.max_size {
            if !self.evict_lru() {
                tracing::warn!("Prepared asset larger than cache budget, keeping it anyway");
                break;
            }
        }

        self.lru.put(url, asset);
        self.current_size += size;

        tracing::debug!(
            "Prepared cache: {} entries, {:.2} MB",
            self.lru.len(),
            self.current_size as f64 / 1024.0 / 1024.0
        );
    }

    /// Evict the least recently used entry.
    fn evict_lru(&mut self) -> bool {
        if let Some((url, asset)) = self.lru.pop_lru() {
            tracing::debug!("Evicting prepared asset {}", url);
            self.current_size = self.current_size.saturating_sub(asset.footprint());
            return true;
        }
        false
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            current_size: self.current_size,
            max_size: self.max_size,
            item_count: self.lru.len(),
        }
    }
}

/// Cache statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub current_size: u64,
    pub max_size: u64,
    pub item_count: usize,
}

/// Thread-safe handle to a [`PreparedCache`].
#[derive(Clone)]
pub struct SharedCache(Arc<Mutex<PreparedCache>>);

impl SharedCache {
    /// Lock the cache. A panic while holding the lock leaves the cache usable.
    pub fn lock(&self) -> MutexGuard<'_, PreparedCache> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decoded bitmap for `url`, if cached.
    pub fn image(&self, url: &str) -> Option<Arc<RgbaImage>> {
        match self.lock().get(url) {
            Some(PreparedAsset::Image(img)) => Some(img),
            _ => None,
        }
    }

    /// Local copy of the video at `url`, if cached.
    #[cfg_attr(not(feature = "display"), allow(dead_code))]
    pub fn video(&self, url: &str) -> Option<Arc<PreparedVideo>> {
        match self.lock().get(url) {
            Some(PreparedAsset::Video(video)) => Some(video),
            _ => None,
        }
    }
}
