//! SDL2 fullscreen display surface.
//!
//! The engine drives a [`ChannelSurface`], which forwards layer commands to
//! the render loop on the main thread. Each layer's opacity ramps toward its
//! visibility target over the fade duration, so the incoming and outgoing
//! layers overlap for one fade.

use crate::assets::MediaPreloader;
use crate::cache::{PreparedAsset, PreparedVideo, SharedCache};
use crate::engine::{EngineHandle, SlideToken};
use crate::layers::{LayerId, PlaybackError, Surface};
use crate::media::{MediaKind, Slide};
use crate::video::{VideoOutcome, VideoPlayer};
use anyhow::{Context, Result};
use image::RgbaImage;
use sdl2::event::Event;
use sdl2::keyboard::Keycode;
use sdl2::pixels::{Color, PixelFormatEnum};
use sdl2::rect::Rect;
use sdl2::render::{BlendMode, Canvas, Texture, TextureCreator};
use sdl2::video::{Window, WindowContext};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Layer commands sent from the engine to the render loop.
#[derive(Debug)]
pub enum SurfaceCommand {
    Assign { layer: LayerId, slide: Slide },
    Visible { layer: LayerId, visible: bool },
    Play { layer: LayerId, token: SlideToken },
    Reset(LayerId),
}

/// [`Surface`] that forwards to the render loop.
pub struct ChannelSurface {
    tx: Sender<SurfaceCommand>,
}

impl ChannelSurface {
    pub fn new() -> (Self, Receiver<SurfaceCommand>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }

    fn send(&self, command: SurfaceCommand) -> bool {
        self.tx.send(command).is_ok()
    }
}

impl Surface for ChannelSurface {
    fn assign(&mut self, layer: LayerId, slide: &Slide) {
        self.send(SurfaceCommand::Assign {
            layer,
            slide: slide.clone(),
        });
    }

    fn set_visible(&mut self, layer: LayerId, visible: bool) {
        self.send(SurfaceCommand::Visible { layer, visible });
    }

    fn play_video(&mut self, layer: LayerId, token: SlideToken) -> Result<(), PlaybackError> {
        if self.send(SurfaceCommand::Play { layer, token }) {
            Ok(())
        } else {
            Err(PlaybackError::Rejected("display closed".into()))
        }
    }

    fn reset(&mut self, layer: LayerId) {
        self.send(SurfaceCommand::Reset(layer));
    }
}

/// Texture plus its pixel size.
struct Frame<'a> {
    texture: Texture<'a>,
    width: u32,
    height: u32,
}

/// What the render loop holds for one layer.
struct LayerSlot<'a> {
    slide: Option<Slide>,
    frame: Option<Frame<'a>>,
    video: Option<VideoPlayer>,
    opacity: f32,
    visible: bool,
}

impl LayerSlot<'_> {
    fn empty() -> Self {
        Self {
            slide: None,
            frame: None,
            video: None,
            opacity: 0.0,
            visible: false,
        }
    }

    fn clear(&mut self) {
        self.slide = None;
        self.frame = None;
        self.video = None;
    }
}

/// Result of processing window events.
pub enum EventResult {
    Continue,
    Quit,
}

/// Fullscreen window and the state needed to draw into it.
pub struct Renderer {
    canvas: Canvas<Window>,
    event_pump: sdl2::EventPump,
    screen_width: u32,
    screen_height: u32,
    fade: Duration,
}

impl Renderer {
    /// Initialize SDL2 and create a fullscreen window.
    pub fn new(fade: Duration) -> Result<Self> {
        let sdl_context = sdl2::init().map_err(|e| anyhow::anyhow!("SDL init failed: {}", e))?;
        let video_subsystem = sdl_context
            .video()
            .map_err(|e| anyhow::anyhow!("SDL video init failed: {}", e))?;

        let display_mode = video_subsystem
            .desktop_display_mode(0)
            .map_err(|e| anyhow::anyhow!("Failed to get display mode: {}", e))?;
        let screen_width = display_mode.w as u32;
        let screen_height = display_mode.h as u32;

        tracing::info!(
            "Creating fullscreen window: {}x{}",
            screen_width,
            screen_height
        );

        let window = video_subsystem
            .window("Signage", screen_width, screen_height)
            .fullscreen_desktop()
            .build()
            .context("Failed to create window")?;

        let mut canvas = window
            .into_canvas()
            .accelerated()
            .present_vsync()
            .build()
            .context("Failed to create canvas")?;

        sdl_context.mouse().show_cursor(false);

        canvas.set_draw_color(Color::RGB(0, 0, 0));
        canvas.clear();
        canvas.present();

        let event_pump = sdl_context
            .event_pump()
            .map_err(|e| anyhow::anyhow!("Failed to get event pump: {}", e))?;

        Ok(Self {
            canvas,
            event_pump,
            screen_width,
            screen_height,
            fade,
        })
    }

    /// Draw layers until the window is closed or the engine goes away.
    ///
    /// Images and videos missing from the prepared cache are prepared on
    /// `runtime` before being shown. Video outcomes are reported to `engine`.
    pub fn run(
        mut self,
        commands: Receiver<SurfaceCommand>,
        cache: SharedCache,
        preloader: Arc<dyn MediaPreloader>,
        runtime: tokio::runtime::Handle,
        engine: EngineHandle,
    ) -> Result<()> {
        let creator = self.canvas.texture_creator();
        let mut slots = [LayerSlot::empty(), LayerSlot::empty()];
        let mut last_frame = Instant::now();

        loop {
            if let EventResult::Quit = self.process_events() {
                tracing::info!("Display closed");
                return Ok(());
            }

            loop {
                match commands.try_recv() {
                    Ok(command) => {
                        let ctx = CommandContext {
                            creator: &creator,
                            cache: &cache,
                            preloader: &preloader,
                            runtime: &runtime,
                            engine: &engine,
                        };
                        ctx.apply(&mut slots, command);
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        tracing::info!("Playback engine gone, closing display");
                        return Ok(());
                    }
                }
            }

            let now = Instant::now();
            let step = self.fade_step(now - last_frame);
            last_frame = now;

            for slot in slots.iter_mut() {
                update_video(slot, &creator, &engine);
                ramp(slot, step);
            }

            self.draw(&mut slots)?;
        }
    }

    /// Opacity change for `elapsed` of wall time.
    fn fade_step(&self, elapsed: Duration) -> f32 {
        if self.fade.is_zero() {
            return 1.0;
        }
        elapsed.as_secs_f32() / self.fade.as_secs_f32()
    }

    fn draw(&mut self, slots: &mut [LayerSlot<'_>; 2]) -> Result<()> {
        self.canvas.set_draw_color(Color::RGB(0, 0, 0));
        self.canvas.clear();

        // The fading-out layer goes underneath.
        let mut order = [0usize, 1];
        order.sort_by_key(|&i| slots[i].visible);

        for i in order {
            let slot = &mut slots[i];
            let alpha = (slot.opacity * 255.0).round() as u8;
            if alpha == 0 {
                continue;
            }
            let Some(frame) = slot.frame.as_mut() else {
                continue;
            };
            let dest = self.calculate_aspect_fit(frame.width, frame.height);
            frame.texture.set_alpha_mod(alpha);
            self.canvas
                .copy(&frame.texture, None, dest)
                .map_err(|e| anyhow::anyhow!("Failed to render layer: {}", e))?;
        }

        self.canvas.present();
        Ok(())
    }

    /// Calculate aspect-fit rectangle for displaying a frame.
    fn calculate_aspect_fit(&self, width: u32, height: u32) -> Rect {
        let screen_ratio = self.screen_width as f32 / self.screen_height as f32;
        let ratio = width as f32 / height.max(1) as f32;

        let (fit_width, fit_height) = if ratio > screen_ratio {
            (self.screen_width, (self.screen_width as f32 / ratio) as u32)
        } else {
            ((self.screen_height as f32 * ratio) as u32, self.screen_height)
        };

        let x = (self.screen_width.saturating_sub(fit_width) / 2) as i32;
        let y = (self.screen_height.saturating_sub(fit_height) / 2) as i32;
        Rect::new(x, y, fit_width.max(1), fit_height.max(1))
    }

    fn process_events(&mut self) -> EventResult {
        for event in self.event_pump.poll_iter() {
            match event {
                Event::Quit { .. }
                | Event::KeyDown {
                    keycode: Some(Keycode::Escape | Keycode::Q),
                    ..
                } => return EventResult::Quit,
                _ => {}
            }
        }
        EventResult::Continue
    }
}

/// Everything a command needs besides the slots.
struct CommandContext<'c, 'a> {
    creator: &'a TextureCreator<WindowContext>,
    cache: &'c SharedCache,
    preloader: &'c Arc<dyn MediaPreloader>,
    runtime: &'c tokio::runtime::Handle,
    engine: &'c EngineHandle,
}

impl<'a> CommandContext<'_, 'a> {
    fn apply(&self, slots: &mut [LayerSlot<'a>; 2], command: SurfaceCommand) {
        match command {
            SurfaceCommand::Assign { layer, slide } => {
                let slot = &mut slots[layer.index()];
                slot.clear();
                if slide.kind() == MediaKind::Image {
                    slot.frame = self.image_frame(&slide);
                }
                slot.slide = Some(slide);
            }
            SurfaceCommand::Visible { layer, visible } => {
                slots[layer.index()].visible = visible;
            }
            SurfaceCommand::Play { layer, token } => {
                let slot = &mut slots[layer.index()];
                let Some(video) = slot.slide.as_ref().and_then(|s| self.prepared_video(s)) else {
                    self.engine.video_failed(token);
                    return;
                };
                let path = video.path().display().to_string();
                match VideoPlayer::start(video, token) {
                    Ok(player) => slot.video = Some(player),
                    Err(e) => {
                        tracing::warn!("Failed to start video {}: {:#}", path, e);
                        self.engine.video_failed(token);
                    }
                }
            }
            SurfaceCommand::Reset(layer) => {
                let slot = &mut slots[layer.index()];
                slot.clear();
                slot.visible = false;
                slot.opacity = 0.0;
            }
        }
    }

    /// Upload the prepared bitmap for `slide`, preparing it first if needed.
    fn image_frame(&self, slide: &Slide) -> Option<Frame<'a>> {
        let image = match self.cache.image(slide.url.as_str()) {
            Some(image) => image,
            None => match self.runtime.block_on(self.preloader.prepare(slide)) {
                Ok(PreparedAsset::Image(image)) => image,
                Ok(PreparedAsset::Video(_)) => return None,
                Err(e) => {
                    tracing::warn!("Cannot show {}: {}", slide.item.path(), e);
                    return None;
                }
            },
        };

        match upload_image(self.creator, &image) {
            Ok(frame) => Some(frame),
            Err(e) => {
                tracing::warn!("Cannot upload {}: {:#}", slide.item.path(), e);
                None
            }
        }
    }

    /// Local copy of the video for `slide`, preparing it first if needed.
    fn prepared_video(&self, slide: &Slide) -> Option<Arc<PreparedVideo>> {
        if let Some(video) = self.cache.video(slide.url.as_str()) {
            return Some(video);
        }
        match self.runtime.block_on(self.preloader.prepare(slide)) {
            Ok(PreparedAsset::Video(video)) => Some(video),
            Ok(PreparedAsset::Image(_)) => None,
            Err(e) => {
                tracing::warn!("Cannot play {}: {}", slide.item.path(), e);
                None
            }
        }
    }
}

/// Move a layer's opacity toward its visibility target. A layer that has
/// faded out releases its video pipeline.
fn ramp(slot: &mut LayerSlot<'_>, step: f32) {
    if slot.visible {
        slot.opacity = (slot.opacity + step).min(1.0);
    } else {
        slot.opacity = (slot.opacity - step).max(0.0);
        if slot.opacity == 0.0 && slot.video.is_some() {
            slot.video = None;
            slot.frame = None;
        }
    }
}

/// Upload the newest video frame and report completion.
fn update_video<'a>(
    slot: &mut LayerSlot<'a>,
    creator: &'a TextureCreator<WindowContext>,
    engine: &EngineHandle,
) {
    let Some(player) = slot.video.as_mut() else {
        return;
    };

    match player.poll() {
        Some(VideoOutcome::Ended) => engine.video_ended(player.token()),
        Some(VideoOutcome::Failed(_)) => engine.video_failed(player.token()),
        None => {}
    }

    let Some(frame) = player.take_frame() else {
        return;
    };
    let same_size = slot
        .frame
        .as_ref()
        .map(|f| (f.width, f.height) == (frame.width, frame.height))
        .unwrap_or(false);

    let result = if same_size {
        match slot.frame.as_mut() {
            Some(existing) => {
                copy_rows(&mut existing.texture, &frame.pixels, frame.width, frame.height)
            }
            None => Ok(()),
        }
    } else {
        upload(creator, &frame.pixels, frame.width, frame.height).map(|f| slot.frame = Some(f))
    };
    if let Err(e) = result {
        tracing::warn!("Failed to upload video frame: {:#}", e);
    }
}

fn upload_image<'a>(
    creator: &'a TextureCreator<WindowContext>,
    image: &RgbaImage,
) -> Result<Frame<'a>> {
    let (width, height) = image.dimensions();
    upload(creator, image.as_raw(), width, height)
}

/// Create a blendable texture from tightly packed RGBA pixels.
fn upload<'a>(
    creator: &'a TextureCreator<WindowContext>,
    pixels: &[u8],
    width: u32,
    height: u32,
) -> Result<Frame<'a>> {
    let mut texture = creator
        .create_texture_streaming(PixelFormatEnum::ABGR8888, width, height)
        .context("Failed to create texture")?;
    copy_rows(&mut texture, pixels, width, height)?;
    texture.set_blend_mode(BlendMode::Blend);

    Ok(Frame {
        texture,
        width,
        height,
    })
}

fn copy_rows(texture: &mut Texture<'_>, pixels: &[u8], width: u32, height: u32) -> Result<()> {
    let row_bytes = width as usize * 4;
    if pixels.len() < row_bytes * height as usize {
        anyhow::bail!("Frame holds {} bytes, expected {}", pixels.len(), row_bytes * height as usize);
    }

    texture
        .with_lock(None, |buffer: &mut [u8], pitch: usize| {
            for (y, row) in pixels.chunks_exact(row_bytes).take(height as usize).enumerate() {
                let dst = y * pitch;
                buffer[dst..dst + row_bytes].copy_from_slice(row);
            }
        })
        .map_err(|e| anyhow::anyhow!("Failed to update texture: {}", e))
}
