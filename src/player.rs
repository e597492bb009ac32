//! Ties playlist building to the playback engine.

use crate::cache::SharedCache;
use crate::daykey::DayKey;
use crate::engine::EngineHandle;
use crate::playlist::PlaylistBuilder;
use crate::scheduler::MidnightScheduler;
use chrono_tz::Tz;

/// Rebuilds today's playlist and restarts playback with it.
pub struct Player {
    builder: PlaylistBuilder,
    engine: EngineHandle,
    cache: SharedCache,
    tz: Tz,
}

impl Player {
    pub fn new(builder: PlaylistBuilder, engine: EngineHandle, cache: SharedCache, tz: Tz) -> Self {
        Self {
            builder,
            engine,
            cache,
            tz,
        }
    }

    /// Build the playlist for the current day and hand it to the engine.
    pub async fn rebuild(&self) {
        self.rebuild_for(DayKey::now(self.tz)).await;
    }

    /// Rebuild now, then again at every midnight. Never returns; dropping
    /// the future cancels whichever rebuild is in progress.
    pub async fn run(&self, scheduler: MidnightScheduler) {
        self.rebuild().await;
        scheduler.run(|| self.rebuild()).await;
    }

    async fn rebuild_for(&self, key: DayKey) {
        tracing::info!("Rebuilding playlist for {} ({})", key, self.tz);

        let playlist = self.builder.build(key).await;
        if playlist.is_empty() {
            tracing::warn!("No media available for {}, display stays blank", key);
        }

        let stats = self.cache.lock().stats();
        tracing::debug!(
            "Prepared cache holds {} assets ({:.2} of {:.2} MB)",
            stats.item_count,
            stats.current_size as f64 / 1024.0 / 1024.0,
            stats.max_size as f64 / 1024.0 / 1024.0
        );

        self.engine.start(playlist);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::PreparedCache;
    use crate::engine::{self, EngineEvent};
    use crate::media::CandidateSet;
    use crate::source::{ExistenceProbe, Locator};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use url::Url;

    struct EverythingExists;

    #[async_trait]
    impl ExistenceProbe for EverythingExists {
        async fn exists(&self, _url: &Url) -> bool {
            true
        }
    }

    /// Media host that never answers.
    struct Unresponsive;

    #[async_trait]
    impl ExistenceProbe for Unresponsive {
        async fn exists(&self, _url: &Url) -> bool {
            std::future::pending().await
        }
    }

    fn player() -> (Player, engine::Inbox) {
        player_with(Arc::new(EverythingExists))
    }

    fn player_with(probe: Arc<dyn ExistenceProbe>) -> (Player, engine::Inbox) {
        let mut days = BTreeMap::new();
        days.insert(DayKey::Mon, vec!["mon1.jpg"]);
        days.insert(DayKey::Tue, vec!["tue1.jpg"]);
        let candidates = CandidateSet::new(&["every1.jpg"][..], &days);
        let locator = Locator::new("http://signage.local/", None).unwrap();
        let builder = PlaylistBuilder::new(candidates, locator, probe);

        let (handle, inbox) = engine::channel();
        let cache = PreparedCache::new(1).shared();
        (
            Player::new(builder, handle, cache, chrono_tz::America::Toronto),
            inbox,
        )
    }

    fn started_paths(event: EngineEvent) -> Vec<String> {
        match event {
            EngineEvent::Start(playlist) => {
                playlist.iter().map(|s| s.item.path().to_string()).collect()
            }
            other => panic!("expected start, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rebuild_uses_reference_timezone_day() {
        let (player, mut inbox) = player();

        // 02:00 UTC Tuesday is still Monday evening in Toronto.
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 2, 0, 0).unwrap();
        player.rebuild_for(DayKey::at(now, player.tz)).await;

        let event = inbox.recv().await.unwrap();
        assert_eq!(started_paths(event), vec!["every1.jpg", "mon1.jpg"]);
    }

    #[tokio::test]
    async fn test_rebuild_for_today() {
        let (player, mut inbox) = player();
        let today = DayKey::now(player.tz);

        player.rebuild().await;

        let expected = match today {
            DayKey::Mon => vec!["every1.jpg", "mon1.jpg"],
            DayKey::Tue => vec!["every1.jpg", "tue1.jpg"],
            _ => vec!["every1.jpg"],
        };
        // Tolerates a day change between the two reads.
        let started = started_paths(inbox.recv().await.unwrap());
        assert!(started == expected || DayKey::now(player.tz) != today);
    }

    #[tokio::test]
    async fn test_each_rebuild_restarts_engine() {
        let (player, mut inbox) = player();

        player.rebuild_for(DayKey::Mon).await;
        player.rebuild_for(DayKey::Tue).await;

        assert_eq!(started_paths(inbox.recv().await.unwrap()), vec!["every1.jpg", "mon1.jpg"]);
        assert_eq!(started_paths(inbox.recv().await.unwrap()), vec!["every1.jpg", "tue1.jpg"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_first_rebuild() {
        let (player, mut inbox) = player_with(Arc::new(Unresponsive));
        let scheduler = MidnightScheduler::new(player.tz, std::time::Duration::from_secs(5));

        let quit = tokio::time::sleep(std::time::Duration::from_secs(1));
        let interrupted = tokio::select! {
            _ = player.run(scheduler) => false,
            _ = quit => true,
        };

        assert!(interrupted);
        let pending = tokio::time::timeout(std::time::Duration::from_millis(1), inbox.recv());
        assert!(pending.await.is_err());
    }
}
