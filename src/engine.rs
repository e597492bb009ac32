//! Dual-layer crossfade playback engine.
//!
//! The engine is a single task that owns the playlist position, the two
//! layers and every timer it arms. Everything that can move playback forward
//! (image timers, video end or failure, the video failsafe, preload
//! completion) arrives as an event on one channel, tagged with the token of
//! the slide it was armed for. Only events carrying the current token are
//! acted on, and arming a new slide aborts the previous slide's timers, so a
//! slide can advance at most once.

use crate::assets::{MediaPreloader, PrepareError};
use crate::cache::PreparedAsset;
use crate::layers::{Layer, LayerId, Surface};
use crate::media::{MediaKind, Playlist, Slide};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Identifies one armed slide. Issued fresh on every state entry.
pub type SlideToken = u64;

/// What asked the current slide to end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Image display time elapsed.
    SlideElapsed,
    /// Video reached its natural end.
    VideoEnded,
    /// Video could not be started or failed while playing.
    VideoFailed,
    /// Video never reported completion.
    Failsafe,
    /// Hold after a failed preload elapsed.
    Hold,
}

/// Everything the engine reacts to.
#[derive(Debug)]
pub enum EngineEvent {
    Start(Playlist),
    Stop,
    Shutdown,
    Trigger {
        token: SlideToken,
        trigger: Trigger,
    },
    Prepared {
        token: SlideToken,
        target: usize,
        outcome: Result<(), PrepareError>,
    },
}

/// Engine state as seen from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No playlist, or an empty one. Nothing is armed.
    Idle,
    /// A slide is visible on `layer` and its triggers are armed.
    Displaying { layer: LayerId, kind: MediaKind },
    /// Preparing `target` before swapping it in.
    Advancing { target: usize },
}

/// Slide timing.
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    /// How long an image stays up.
    pub slide: Duration,
    /// Upper bound on a video slide.
    pub video_failsafe: Duration,
    /// Upper bound on preparing the next slide.
    pub preload: Duration,
}

/// Cloneable sender side of the engine's event channel.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl EngineHandle {
    /// Replace the playlist and restart from its first slide.
    pub fn start(&self, playlist: Playlist) {
        self.send(EngineEvent::Start(playlist));
    }

    pub fn stop(&self) {
        self.send(EngineEvent::Stop);
    }

    /// Stop playback and end the engine task.
    pub fn shutdown(&self) {
        self.send(EngineEvent::Shutdown);
    }

    /// The video started with `token` played to its end.
    pub fn video_ended(&self, token: SlideToken) {
        self.send(EngineEvent::Trigger {
            token,
            trigger: Trigger::VideoEnded,
        });
    }

    /// The video started with `token` could not be played.
    pub fn video_failed(&self, token: SlideToken) {
        self.send(EngineEvent::Trigger {
            token,
            trigger: Trigger::VideoFailed,
        });
    }

    fn send(&self, event: EngineEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("Playback engine is gone, event dropped");
        }
    }
}

/// Receiving side of the engine's event channel.
pub struct Inbox(mpsc::UnboundedReceiver<EngineEvent>);

impl Inbox {
    pub(crate) async fn recv(&mut self) -> Option<EngineEvent> {
        self.0.recv().await
    }
}

/// Create the engine's event channel.
pub fn channel() -> (EngineHandle, Inbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EngineHandle { tx }, Inbox(rx))
}

/// State of one run through a playlist. Dropping it aborts everything it armed.
struct Session {
    playlist: Playlist,
    index: usize,
    active: LayerId,
    state: EngineState,
    token: SlideToken,
    /// Timers and the in-flight advance preload for the current token.
    armed: Vec<JoinHandle<()>>,
    lookahead: Option<JoinHandle<()>>,
    /// Videos in a row that failed without playing.
    failed_in_row: usize,
}

impl Session {
    fn disarm(&mut self) {
        for task in self.armed.drain(..) {
            task.abort();
        }
    }

    fn current(&self) -> Option<&Slide> {
        self.playlist.get(self.index)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.disarm();
        if let Some(task) = self.lookahead.take() {
            task.abort();
        }
    }
}

/// The playback state machine.
pub struct PlaybackEngine<S: Surface> {
    surface: S,
    preloader: Arc<dyn MediaPreloader>,
    timing: Timing,
    layers: [Layer; 2],
    session: Option<Session>,
    last_token: SlideToken,
    handle: EngineHandle,
    inbox: Inbox,
}

impl<S: Surface> PlaybackEngine<S> {
    pub fn new(
        surface: S,
        preloader: Arc<dyn MediaPreloader>,
        timing: Timing,
        handle: EngineHandle,
        inbox: Inbox,
    ) -> Self {
        Self {
            surface,
            preloader,
            timing,
            layers: [Layer::default(), Layer::default()],
            session: None,
            last_token: 0,
            handle,
            inbox,
        }
    }

    /// Process events until shutdown.
    pub async fn run(mut self) {
        tracing::info!("Playback engine running");
        while let Some(event) = self.inbox.recv().await {
            if !self.handle_event(event) {
                break;
            }
        }
        self.teardown();
        tracing::info!("Playback engine stopped");
    }

    /// Returns false once the engine should stop.
    fn handle_event(&mut self, event: EngineEvent) -> bool {
        match event {
            EngineEvent::Start(playlist) => self.start(playlist),
            EngineEvent::Stop => self.stop(),
            EngineEvent::Shutdown => return false,
            EngineEvent::Trigger { token, trigger } => self.on_trigger(token, trigger),
            EngineEvent::Prepared {
                token,
                target,
                outcome,
            } => self.on_prepared(token, target, outcome),
        }
        true
    }

    pub fn state(&self) -> EngineState {
        self.session
            .as_ref()
            .map(|s| s.state)
            .unwrap_or(EngineState::Idle)
    }

    pub fn index(&self) -> Option<usize> {
        self.session.as_ref().map(|s| s.index)
    }

    pub fn layers(&self) -> &[Layer; 2] {
        &self.layers
    }

    /// Tear down any running session and play `playlist` from the start.
    ///
    /// The first slide is shown directly on the front layer, without a
    /// preload and without a fade.
    pub fn start(&mut self, playlist: Playlist) {
        self.teardown();

        let Some(first) = playlist.get(0).cloned() else {
            tracing::info!("Playlist is empty, nothing to show");
            return;
        };
        tracing::info!("Starting playback of {} slides", playlist.len());

        let layer = LayerId::Front;
        self.surface.assign(layer, &first);
        self.layers[layer.index()].assigned = Some(first.item.clone());
        self.set_visible(layer, true);

        let has_next = playlist.len() > 1;
        self.session = Some(Session {
            playlist,
            index: 0,
            active: layer,
            state: EngineState::Idle,
            token: 0,
            armed: Vec::new(),
            lookahead: None,
            failed_in_row: 0,
        });

        if has_next {
            self.lookahead(1);
        }
        self.enter_displaying();
    }

    /// Tear down the session and leave the engine idle.
    pub fn stop(&mut self) {
        if self.session.is_some() {
            tracing::info!("Stopping playback");
        }
        self.teardown();
    }

    fn teardown(&mut self) {
        // Dropping the session aborts every timer and preload it armed.
        self.session = None;
        for layer in [LayerId::Front, LayerId::Back] {
            self.surface.reset(layer);
            self.layers[layer.index()] = Layer::default();
        }
    }

    fn issue_token(&mut self) -> SlideToken {
        self.last_token += 1;
        self.last_token
    }

    fn set_visible(&mut self, layer: LayerId, visible: bool) {
        self.surface.set_visible(layer, visible);
        self.layers[layer.index()].visible = visible;
    }

    /// Arm the triggers for the slide at the current index.
    fn enter_displaying(&mut self) {
        let token = self.issue_token();
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.disarm();
        session.token = token;

        let Some(slide) = session.current().cloned() else {
            return;
        };
        let layer = session.active;
        let single = session.playlist.len() == 1;
        session.state = EngineState::Displaying {
            layer,
            kind: slide.kind(),
        };

        match slide.kind() {
            // A lone image has nothing to change to.
            MediaKind::Image if single => {}
            MediaKind::Image => self.arm(self.timing.slide, Trigger::SlideElapsed),
            MediaKind::Video => {
                self.arm(self.timing.video_failsafe, Trigger::Failsafe);
                if let Err(e) = self.surface.play_video(layer, token) {
                    tracing::warn!("Could not play {}: {}", slide.item.path(), e);
                    self.on_trigger(token, Trigger::VideoFailed);
                }
            }
        }
    }

    /// Keep the visible slide up for one slide duration after a failed preload.
    fn hold(&mut self) {
        let token = self.issue_token();
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.disarm();
        session.token = token;

        let layer = session.active;
        let kind = self.layers[layer.index()]
            .assigned
            .as_ref()
            .map(|item| item.kind())
            .unwrap_or(MediaKind::Image);
        session.state = EngineState::Displaying { layer, kind };

        self.arm(self.timing.slide, Trigger::Hold);
    }

    fn arm(&mut self, after: Duration, trigger: Trigger) {
        let handle = self.handle.clone();
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let token = session.token;
        let deadline = Instant::now() + after;

        session.armed.push(tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            handle.send(EngineEvent::Trigger { token, trigger });
        }));
    }

    fn on_trigger(&mut self, token: SlideToken, trigger: Trigger) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let displaying = matches!(session.state, EngineState::Displaying { .. });
        if session.token != token || !displaying {
            tracing::debug!("Ignoring stale {:?} for slide {}", trigger, token);
            return;
        }

        let path = session.current().map(|s| s.item.path()).unwrap_or_default();
        match trigger {
            Trigger::Failsafe => tracing::warn!("Video {} never finished, forcing advance", path),
            Trigger::VideoFailed => tracing::warn!("Video {} failed, advancing", path),
            _ => tracing::debug!("{:?} on {}", trigger, path),
        }

        match trigger {
            Trigger::VideoFailed => session.failed_in_row += 1,
            Trigger::Hold => {}
            _ => session.failed_in_row = 0,
        }
        // Every slide failed at once; wait before going round again.
        if session.failed_in_row >= session.playlist.len() {
            tracing::warn!("No slide could be shown, retrying in {:?}", self.timing.slide);
            session.failed_in_row = 0;
            self.hold();
            return;
        }

        session.disarm();
        self.advance();
    }

    /// Start preparing the next slide. The swap happens when it is ready.
    fn advance(&mut self) {
        let token = self.issue_token();
        let limit = self.timing.preload;
        let preloader = self.preloader.clone();
        let handle = self.handle.clone();
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let target = session.playlist.next_index(session.index);
        let Some(slide) = session.playlist.get(target).cloned() else {
            return;
        };
        session.token = token;
        session.state = EngineState::Advancing { target };

        session.armed.push(tokio::spawn(async move {
            let outcome = prepare_within(preloader.as_ref(), &slide, limit)
                .await
                .map(|_| ());
            handle.send(EngineEvent::Prepared {
                token,
                target,
                outcome,
            });
        }));
    }

    fn on_prepared(
        &mut self,
        token: SlideToken,
        target: usize,
        outcome: Result<(), PrepareError>,
    ) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.token != token || session.state != (EngineState::Advancing { target }) {
            tracing::debug!("Ignoring stale preload of slide {}", target);
            return;
        }
        let Some(slide) = session.playlist.get(target).cloned() else {
            return;
        };

        // Skipped or not, the next advance moves past this slide.
        session.index = target;

        match outcome {
            Ok(()) => {
                let outgoing = session.active;
                let incoming = outgoing.other();
                session.active = incoming;
                let after = session.playlist.next_index(target);
                let len = session.playlist.len();

                self.surface.assign(incoming, &slide);
                self.layers[incoming.index()].assigned = Some(slide.item.clone());
                self.set_visible(incoming, true);
                self.set_visible(outgoing, false);
                tracing::debug!(
                    "Showing {} ({}/{}) on {:?}",
                    slide.item.path(),
                    target + 1,
                    len,
                    incoming
                );

                self.enter_displaying();
                if len > 1 {
                    self.lookahead(after);
                }
            }
            Err(e) => {
                tracing::warn!("Skipping {}: {}", slide.item.path(), e);
                self.hold();
            }
        }
    }

    /// Warm the cache for the slide at `index` while the current one shows.
    fn lookahead(&mut self, index: usize) {
        let limit = self.timing.preload;
        let preloader = self.preloader.clone();
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let Some(slide) = session.playlist.get(index).cloned() else {
            return;
        };

        if let Some(previous) = session.lookahead.take() {
            previous.abort();
        }
        session.lookahead = Some(tokio::spawn(async move {
            if let Err(e) = prepare_within(preloader.as_ref(), &slide, limit).await {
                tracing::debug!("Lookahead for {} failed: {}", slide.item.path(), e);
            }
        }));
    }
}

async fn prepare_within(
    preloader: &dyn MediaPreloader,
    slide: &Slide,
    limit: Duration,
) -> Result<PreparedAsset, PrepareError> {
    match tokio::time::timeout(limit, preloader.prepare(slide)).await {
        Ok(outcome) => outcome,
        Err(_) => Err(PrepareError::Timeout(limit)),
    }
}
