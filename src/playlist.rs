//! Day-aware playlist construction.

use crate::daykey::DayKey;
use crate::media::{CandidateSet, Playlist, Slide};
use crate::source::{ExistenceProbe, Locator};
use std::sync::Arc;
use url::Url;

/// Builds the playlist for a day from the candidate set.
pub struct PlaylistBuilder {
    candidates: CandidateSet,
    locator: Locator,
    probe: Arc<dyn ExistenceProbe>,
}

impl PlaylistBuilder {
    pub fn new(candidates: CandidateSet, locator: Locator, probe: Arc<dyn ExistenceProbe>) -> Self {
        Self {
            candidates,
            locator,
            probe,
        }
    }

    /// Always-on candidates then the day's candidates, keeping only those
    /// that exist.
    ///
    /// Candidates are probed one at a time in declared order. Missing files
    /// are routine and only logged at debug level.
    pub async fn build(&self, key: DayKey) -> Playlist {
        let mut slides = Vec::new();
        let mut skipped = 0usize;

        for item in self.candidates.for_day(key) {
            let (probe_url, display_url) = match self.resolve(item.path()) {
                Ok(urls) => urls,
                Err(e) => {
                    tracing::warn!("Skipping {}: {}", item.path(), e);
                    skipped += 1;
                    continue;
                }
            };

            if self.probe.exists(&probe_url).await {
                slides.push(Slide {
                    item: item.clone(),
                    url: display_url,
                });
            } else {
                tracing::debug!("Candidate {} not present", item.path());
                skipped += 1;
            }
        }

        tracing::info!(
            "Built playlist for {}: {} slides ({} candidates skipped)",
            key,
            slides.len(),
            skipped
        );
        Playlist::new(slides)
    }

    fn resolve(&self, path: &str) -> Result<(Url, Url), url::ParseError> {
        Ok((self.locator.probe_url(path)?, self.locator.display_url(path)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::{BTreeMap, HashSet};
    use std::sync::Mutex;

    /// Probe that answers from a fixed set and records the order of calls.
    struct FixedProbe {
        present: HashSet<&'static str>,
        calls: Mutex<Vec<String>>,
    }

    impl FixedProbe {
        fn new(present: &[&'static str]) -> Arc<Self> {
            Arc::new(Self {
                present: present.iter().copied().collect(),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ExistenceProbe for FixedProbe {
        async fn exists(&self, url: &Url) -> bool {
            let name = url.path().trim_start_matches('/').to_string();
            self.calls.lock().unwrap().push(name.clone());
            self.present.contains(name.as_str())
        }
    }

    fn candidates() -> CandidateSet {
        let mut days = BTreeMap::new();
        days.insert(DayKey::Mon, vec!["c.jpg"]);
        days.insert(DayKey::Tue, vec!["t1.jpg", "t2.mp4"]);
        CandidateSet::new(&["a.jpg", "b.mp4"][..], &days)
    }

    fn builder(probe: Arc<FixedProbe>) -> PlaylistBuilder {
        let locator = Locator::new("http://signage.local/", Some("7".into())).unwrap();
        PlaylistBuilder::new(candidates(), locator, probe)
    }

    fn paths(playlist: &Playlist) -> Vec<&str> {
        playlist.iter().map(|s| s.item.path()).collect()
    }

    #[tokio::test]
    async fn test_monday_playlist_order() {
        let probe = FixedProbe::new(&["a.jpg", "b.mp4", "c.jpg"]);
        let playlist = builder(probe).build(DayKey::Mon).await;

        assert_eq!(paths(&playlist), vec!["a.jpg", "b.mp4", "c.jpg"]);
        assert_eq!(
            playlist.get(1).unwrap().url.as_str(),
            "http://signage.local/b.mp4?v=7"
        );
        assert!(playlist.get(1).unwrap().item.is_video());
    }

    #[tokio::test]
    async fn test_missing_candidates_are_dropped() {
        let probe = FixedProbe::new(&["b.mp4", "t2.mp4"]);
        let playlist = builder(probe).build(DayKey::Tue).await;
        assert_eq!(paths(&playlist), vec!["b.mp4", "t2.mp4"]);
    }

    #[tokio::test]
    async fn test_day_without_entries_uses_always_on() {
        let probe = FixedProbe::new(&["a.jpg", "b.mp4", "c.jpg"]);
        let playlist = builder(probe).build(DayKey::Sun).await;
        assert_eq!(paths(&playlist), vec!["a.jpg", "b.mp4"]);
    }

    #[tokio::test]
    async fn test_probes_run_in_declared_order() {
        let probe = FixedProbe::new(&[]);
        let playlist = builder(probe.clone()).build(DayKey::Tue).await;

        assert!(playlist.is_empty());
        assert_eq!(
            *probe.calls.lock().unwrap(),
            vec!["a.jpg", "b.mp4", "t1.jpg", "t2.mp4"]
        );
    }
}
