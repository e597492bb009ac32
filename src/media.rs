//! Media descriptors, candidate sets and playlists.

use crate::daykey::DayKey;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use url::Url;

/// File extensions that are played as video. Matched case-insensitively.
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "m4v", "webm", "mov", "mkv", "ogv"];

/// How a media item is shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Classify a file by its extension. Unknown or missing extensions are images.
    pub fn from_path(path: &str) -> Self {
        let is_video = Path::new(path)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| VIDEO_EXTENSIONS.iter().any(|v| v.eq_ignore_ascii_case(ext)))
            .unwrap_or(false);

        if is_video {
            MediaKind::Video
        } else {
            MediaKind::Image
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }
}

/// A candidate file and the way it is displayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaItem {
    path: String,
    kind: MediaKind,
}

impl MediaItem {
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        let kind = MediaKind::from_path(&path);
        Self { path, kind }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn is_video(&self) -> bool {
        self.kind == MediaKind::Video
    }
}

/// Always-on candidates plus the extra candidates for each day.
#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    always: Vec<MediaItem>,
    days: BTreeMap<DayKey, Vec<MediaItem>>,
}

impl CandidateSet {
    pub fn new<S: AsRef<str>>(always: &[S], days: &BTreeMap<DayKey, Vec<S>>) -> Self {
        fn to_items<S: AsRef<str>>(names: &[S]) -> Vec<MediaItem> {
            names.iter().map(|n| MediaItem::new(n.as_ref())).collect()
        }

        Self {
            always: to_items(always),
            days: days
                .iter()
                .map(|(key, names)| (*key, to_items(names.as_slice())))
                .collect(),
        }
    }

    /// Candidates eligible on `key`: always-on first, then the day's own list,
    /// each in declared order.
    pub fn for_day(&self, key: DayKey) -> impl Iterator<Item = &MediaItem> {
        let day = self.days.get(&key).map(Vec::as_slice).unwrap_or(&[]);
        self.always.iter().chain(day.iter())
    }
}

/// A playlist entry: the item and the exact URL it is fetched and shown from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slide {
    pub item: MediaItem,
    pub url: Url,
}

impl Slide {
    pub fn kind(&self) -> MediaKind {
        self.item.kind()
    }
}

/// Immutable ordered list of slides. Cloning shares the underlying storage.
#[derive(Debug, Clone)]
pub struct Playlist {
    slides: Arc<[Slide]>,
}

impl Playlist {
    pub fn new(slides: Vec<Slide>) -> Self {
        Self {
            slides: slides.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.slides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slides.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Slide> {
        self.slides.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Slide> {
        self.slides.iter()
    }

    /// Index after `index`, wrapping at the end.
    pub fn next_index(&self, index: usize) -> usize {
        if self.slides.is_empty() {
            0
        } else {
            (index + 1) % self.slides.len()
        }
    }
}

impl Default for Playlist {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_extension() {
        assert_eq!(MediaKind::from_path("clip.mp4"), MediaKind::Video);
        assert_eq!(MediaKind::from_path("CLIP.MP4"), MediaKind::Video);
        assert_eq!(MediaKind::from_path("promo.WebM"), MediaKind::Video);
        assert_eq!(MediaKind::from_path("photo.jpg"), MediaKind::Image);
        assert_eq!(MediaKind::from_path("notes.txt"), MediaKind::Image);
        assert_eq!(MediaKind::from_path("noextension"), MediaKind::Image);
        assert_eq!(MediaKind::from_path("mp4"), MediaKind::Image);
    }

    #[test]
    fn test_for_day_keeps_declared_order() {
        let mut days = BTreeMap::new();
        days.insert(DayKey::Mon, vec!["c.jpg", "d.mp4"]);
        let set = CandidateSet::new(&["a.jpg", "b.mp4"][..], &days);

        let monday: Vec<_> = set.for_day(DayKey::Mon).map(|i| i.path()).collect();
        assert_eq!(monday, vec!["a.jpg", "b.mp4", "c.jpg", "d.mp4"]);

        let tuesday: Vec<_> = set.for_day(DayKey::Tue).map(|i| i.path()).collect();
        assert_eq!(tuesday, vec!["a.jpg", "b.mp4"]);
    }

    #[test]
    fn test_next_index_wraps() {
        let base = Url::parse("http://signage.local/").unwrap();
        let slides = ["a.jpg", "b.jpg", "c.jpg"]
            .iter()
            .map(|name| Slide {
                item: MediaItem::new(*name),
                url: base.join(name).unwrap(),
            })
            .collect();
        let playlist = Playlist::new(slides);

        assert_eq!(playlist.next_index(0), 1);
        assert_eq!(playlist.next_index(2), 0);
        assert_eq!(Playlist::default().next_index(0), 0);
    }
}
