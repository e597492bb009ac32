mod assets;
mod cache;
mod config;
mod daykey;
mod engine;
mod layers;
mod media;
mod player;
mod playlist;
#[cfg(feature = "display")]
mod renderer;
mod scheduler;
mod source;
#[cfg(feature = "display")]
mod video;

use crate::assets::{AssetPreloader, MediaPreloader};
use crate::cache::{PreparedCache, SharedCache};
use crate::config::Settings;
use crate::engine::{EngineHandle, Inbox, PlaybackEngine};
use crate::layers::Surface;
use crate::player::Player;
use crate::playlist::PlaylistBuilder;
use crate::scheduler::MidnightScheduler;
use crate::source::{Locator, MediaSource};
use anyhow::{Context, Result};
use chrono_tz::Tz;
use std::future::Future;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("signage_player=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Shared pieces built from the settings before any surface exists.
struct Services {
    settings: Settings,
    tz: Tz,
    locator: Locator,
    source: MediaSource,
    cache: SharedCache,
    preloader: Arc<dyn MediaPreloader>,
}

impl Services {
    fn build(settings: Settings) -> Result<Self> {
        let tz = settings.tz()?;
        let version = settings.cache_bust.then(Locator::boot_version);
        let locator = Locator::new(&settings.media_base, version)
            .with_context(|| format!("Invalid media base {}", settings.media_base))?;
        let source = MediaSource::new(settings.probe_timeout())?;
        let cache = PreparedCache::new(settings.prepared_cache_mb).shared();
        let spool_dir = settings.spool_dir();
        std::fs::create_dir_all(&spool_dir)
            .with_context(|| format!("Failed to create spool directory {}", spool_dir.display()))?;
        let preloader: Arc<dyn MediaPreloader> =
            Arc::new(AssetPreloader::new(source.clone(), cache.clone(), spool_dir));

        tracing::info!("Media base: {}", locator.base());
        tracing::info!("Reference timezone: {}", tz);

        Ok(Self {
            settings,
            tz,
            locator,
            source,
            cache,
            preloader,
        })
    }

    /// Run playback on `surface` until `quit` resolves.
    async fn serve<S: Surface>(
        self,
        surface: S,
        handle: EngineHandle,
        inbox: Inbox,
        quit: impl Future<Output = ()>,
    ) -> Result<()> {
        let engine = PlaybackEngine::new(
            surface,
            self.preloader.clone(),
            self.settings.timing(),
            handle.clone(),
            inbox,
        );
        let engine_task = tokio::spawn(engine.run());

        let builder = PlaylistBuilder::new(
            self.settings.candidates.candidate_set(),
            self.locator,
            Arc::new(self.source),
        );
        let player = Player::new(builder, handle.clone(), self.cache, self.tz);
        let scheduler = MidnightScheduler::new(self.tz, self.settings.midnight_floor());

        tokio::select! {
            _ = player.run(scheduler) => {}
            _ = quit => tracing::info!("Shutting down"),
        }

        handle.shutdown();
        engine_task.await.context("Playback engine task failed")?;
        Ok(())
    }
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

#[cfg(not(feature = "display"))]
#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let settings = Settings::load()?;
    let services = Services::build(settings)?;

    tracing::info!("Starting signage player without a display");
    let (handle, inbox) = engine::channel();
    services
        .serve(layers::HeadlessSurface, handle, inbox, ctrl_c())
        .await
}

#[cfg(feature = "display")]
fn main() -> Result<()> {
    use crate::renderer::{ChannelSurface, Renderer};
    use crate::video::VideoPlayer;

    init_tracing();
    let settings = Settings::load()?;

    // SDL must stay on the main thread, so the runtime lives beside it.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build async runtime")?;

    VideoPlayer::init()?;
    let renderer = Renderer::new(settings.fade())?;

    let services = {
        let _guard = runtime.enter();
        Services::build(settings)?
    };
    let cache = services.cache.clone();
    let preloader = services.preloader.clone();

    let (surface, commands) = ChannelSurface::new();
    let (handle, inbox) = engine::channel();
    let (closed_tx, closed_rx) = tokio::sync::oneshot::channel::<()>();

    let quit = async move {
        tokio::select! {
            _ = ctrl_c() => {}
            _ = closed_rx => {}
        }
    };
    let serve = runtime.spawn(services.serve(surface, handle.clone(), inbox, quit));

    let rendered = renderer.run(commands, cache, preloader, runtime.handle().clone(), handle);
    let _ = closed_tx.send(());

    runtime
        .block_on(serve)
        .context("Player task failed")??;
    rendered
}
