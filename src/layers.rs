//! The two alternating display layers and the surface that shows them.

use crate::engine::SlideToken;
use crate::media::{MediaItem, Slide};

/// One of the two display slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerId {
    Front,
    Back,
}

impl LayerId {
    pub fn index(self) -> usize {
        match self {
            LayerId::Front => 0,
            LayerId::Back => 1,
        }
    }

    /// The layer that is not `self`.
    pub fn other(self) -> Self {
        match self {
            LayerId::Front => LayerId::Back,
            LayerId::Back => LayerId::Front,
        }
    }
}

/// What the engine believes a layer currently holds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Layer {
    pub assigned: Option<MediaItem>,
    pub visible: bool,
}

/// Why a video could not be started.
#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("no video output available")]
    NoOutput,
    #[error("playback rejected: {0}")]
    Rejected(String),
}

/// Something that can show two layers.
///
/// The surface owns layout and the fade curve; the engine only decides what
/// each layer holds and the instant its visibility flips. A surface that
/// plays video reports completion through
/// [`EngineHandle::video_ended`](crate::engine::EngineHandle::video_ended) and
/// asynchronous failures through
/// [`EngineHandle::video_failed`](crate::engine::EngineHandle::video_failed),
/// quoting the token it was given.
pub trait Surface: Send + 'static {
    fn assign(&mut self, layer: LayerId, slide: &Slide);
    fn set_visible(&mut self, layer: LayerId, visible: bool);
    fn play_video(&mut self, layer: LayerId, token: SlideToken) -> Result<(), PlaybackError>;
    /// Drop whatever the layer shows and hide it immediately.
    fn reset(&mut self, layer: LayerId);
}

/// Surface that only logs. Used when no display is attached.
///
/// It has no video output, so video slides are skipped as soon as they are
/// shown.
#[derive(Debug, Default)]
pub struct HeadlessSurface;

impl Surface for HeadlessSurface {
    fn assign(&mut self, layer: LayerId, slide: &Slide) {
        tracing::info!("[{:?}] {} ({})", layer, slide.item.path(), slide.kind().as_str());
    }

    fn set_visible(&mut self, layer: LayerId, visible: bool) {
        tracing::debug!("[{:?}] visible={}", layer, visible);
    }

    fn play_video(&mut self, _layer: LayerId, _token: SlideToken) -> Result<(), PlaybackError> {
        Err(PlaybackError::NoOutput)
    }

    fn reset(&mut self, layer: LayerId) {
        tracing::debug!("[{:?}] reset", layer);
    }
}
