//! GStreamer video playback for one layer.
//!
//! Videos always play from a local file prepared ahead of time. Frames are
//! pulled through an `appsink` as RGBA. Completion is polled from the
//! pipeline bus by the render loop, which reports it to the engine.

use crate::cache::PreparedVideo;
use crate::engine::SlideToken;
use anyhow::{Context, Result};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use std::sync::{Arc, Mutex};
use url::Url;

/// Latest decoded frame.
pub struct VideoFrame {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// How a video finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoOutcome {
    Ended,
    Failed(String),
}

/// One playing video, tagged with the slide token it was started for.
pub struct VideoPlayer {
    pipeline: gst::Pipeline,
    token: SlideToken,
    latest: Arc<Mutex<Option<VideoFrame>>>,
    finished: bool,
    /// Keeps a spooled file on disk while it plays.
    _source: Arc<PreparedVideo>,
}

impl VideoPlayer {
    /// Initialize GStreamer (call once at startup).
    pub fn init() -> Result<()> {
        gst::init().context("Failed to initialize GStreamer")?;
        tracing::info!("GStreamer initialized: {}", gst::version_string());
        Ok(())
    }

    /// Build a pipeline for `video` and start it playing.
    pub fn start(video: Arc<PreparedVideo>, token: SlideToken) -> Result<Self> {
        let url = Url::from_file_path(video.path())
            .map_err(|_| anyhow::anyhow!("Not an absolute path: {}", video.path().display()))?;
        tracing::debug!("Starting video pipeline for {}", url);

        let pipeline = gst::Pipeline::new();

        let src = gst::ElementFactory::make("uridecodebin")
            .property("uri", url.as_str())
            .build()
            .context("Failed to create uridecodebin")?;
        let convert = gst::ElementFactory::make("videoconvert")
            .build()
            .context("Failed to create videoconvert")?;
        let appsink = gst_app::AppSink::builder()
            .caps(
                &gst_video::VideoCapsBuilder::new()
                    .format(gst_video::VideoFormat::Rgba)
                    .build(),
            )
            .build();

        pipeline
            .add_many([&src, &convert, appsink.upcast_ref()])
            .context("Failed to add elements to pipeline")?;
        gst::Element::link_many([&convert, appsink.upcast_ref()])
            .context("Failed to link elements")?;

        // Audio pads are left unlinked; only the first video pad is used.
        let convert_weak = convert.downgrade();
        src.connect_pad_added(move |_src, src_pad| {
            let Some(convert) = convert_weak.upgrade() else {
                return;
            };
            let Some(sink_pad) = convert.static_pad("sink") else {
                return;
            };
            if sink_pad.is_linked() {
                return;
            }

            let caps = src_pad
                .current_caps()
                .unwrap_or_else(|| src_pad.query_caps(None));
            let is_video = caps
                .structure(0)
                .map(|s| s.name().starts_with("video/"))
                .unwrap_or(false);

            if is_video {
                if let Err(e) = src_pad.link(&sink_pad) {
                    tracing::error!("Failed to link video pad: {:?}", e);
                }
            }
        });

        let latest = Arc::new(Mutex::new(None::<VideoFrame>));
        let sink_frame = latest.clone();
        appsink.set_callbacks(
            gst_app::AppSinkCallbacks::builder()
                .new_sample(move |appsink| {
                    let sample = appsink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                    let buffer = sample.buffer().ok_or(gst::FlowError::Error)?;
                    let caps = sample.caps().ok_or(gst::FlowError::Error)?;
                    let info =
                        gst_video::VideoInfo::from_caps(caps).map_err(|_| gst::FlowError::Error)?;
                    let map = buffer.map_readable().map_err(|_| gst::FlowError::Error)?;

                    if let Ok(mut guard) = sink_frame.lock() {
                        *guard = Some(VideoFrame {
                            pixels: map.as_slice().to_vec(),
                            width: info.width(),
                            height: info.height(),
                        });
                    }
                    Ok(gst::FlowSuccess::Ok)
                })
                .build(),
        );

        pipeline
            .set_state(gst::State::Playing)
            .context("Failed to set pipeline to playing")?;

        Ok(Self {
            pipeline,
            token,
            latest,
            finished: false,
            _source: video,
        })
    }

    pub fn token(&self) -> SlideToken {
        self.token
    }

    /// Take the newest frame, if one arrived since the last call.
    pub fn take_frame(&self) -> Option<VideoFrame> {
        self.latest.lock().ok()?.take()
    }

    /// Check the bus for end of stream or an error. Reports at most once.
    pub fn poll(&mut self) -> Option<VideoOutcome> {
        if self.finished {
            return None;
        }
        let bus = self.pipeline.bus()?;
        let msg = bus.pop_filtered(&[gst::MessageType::Eos, gst::MessageType::Error])?;

        let outcome = match msg.view() {
            gst::MessageView::Eos(_) => VideoOutcome::Ended,
            gst::MessageView::Error(err) => {
                tracing::error!("GStreamer error: {} ({:?})", err.error(), err.debug());
                VideoOutcome::Failed(err.error().to_string())
            }
            _ => return None,
        };
        self.finished = true;
        Some(outcome)
    }
}

impl Drop for VideoPlayer {
    fn drop(&mut self) {
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            tracing::debug!("Failed to stop video pipeline: {:?}", e);
        }
    }
}
