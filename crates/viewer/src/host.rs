use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use pixels::{Pixels, SurfaceTexture};
use stage_engine::content::SoundHandle;
use stage_engine::stage::Properties;
use stage_engine::{
    load_stage_file, prerender, AssetProvider, ContentError, FrameContext, FrameScheduler,
    FrameToken, ImageAssets, LoopConfig, LoopError, LoopState, RasterSurface, RenderLoop, Stage,
    StageConfig, StageError, SystemClock,
};
use thiserror::Error;
use tracing::{error, info, warn};
use winit::dpi::LogicalSize;
use winit::error::{EventLoopError, OsError};
use winit::event::{ElementState, Event, KeyEvent, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::WindowBuilder;

const DRAG_STEP_PX: f64 = 16.0;
const TITLE_REFRESH: Duration = Duration::from_secs(1);
const MUSIC_PROPERTY: &str = "music";

#[derive(Debug, Clone)]
pub struct ViewerConfig {
    pub stage_path: PathBuf,
    pub image_dir: PathBuf,
    pub stage: StageConfig,
    pub render_loop: LoopConfig,
}

#[derive(Debug, Error)]
pub enum ViewerError {
    #[error(transparent)]
    Content(#[from] ContentError),
    #[error(transparent)]
    Stage(#[from] StageError),
    #[error(transparent)]
    Loop(#[from] LoopError),
    #[error("failed to create event loop: {0}")]
    CreateEventLoop(#[source] EventLoopError),
    #[error("failed to create viewer window: {0}")]
    CreateWindow(#[source] OsError),
    #[error("failed to initialize pixel surface: {0}")]
    CreatePixels(#[source] pixels::Error),
    #[error("event loop failed: {0}")]
    EventLoopRun(#[source] EventLoopError),
}

/// Turns loop frame requests and interval ticks into window redraws.
#[derive(Debug, Default)]
struct WindowScheduler {
    next_token: u64,
    pending: Option<FrameToken>,
    interval: Option<Duration>,
    next_tick: Option<Instant>,
}

impl WindowScheduler {
    /// Whether a loop frame should run now; consumes the request or tick.
    fn take_due(&mut self, now: Instant) -> bool {
        if self.pending.take().is_some() {
            return true;
        }
        match (self.interval, self.next_tick) {
            (Some(interval), Some(next_tick)) if now >= next_tick => {
                let advanced = next_tick + interval;
                self.next_tick = Some(if advanced <= now { now + interval } else { advanced });
                true
            }
            _ => false,
        }
    }

    fn control_flow(&self) -> ControlFlow {
        if self.pending.is_some() {
            return ControlFlow::Poll;
        }
        match self.next_tick {
            Some(next_tick) => ControlFlow::WaitUntil(next_tick),
            None => ControlFlow::Wait,
        }
    }
}

impl FrameScheduler for WindowScheduler {
    fn request_frame(&mut self) -> FrameToken {
        self.next_token = self.next_token.wrapping_add(1);
        let token = FrameToken(self.next_token);
        self.pending = Some(token);
        token
    }

    fn cancel_frame(&mut self, token: FrameToken) {
        if self.pending == Some(token) {
            self.pending = None;
        }
    }

    fn start_interval(&mut self, period_ms: u64) {
        let interval = Duration::from_millis(period_ms.max(1));
        self.interval = Some(interval);
        self.next_tick = Some(Instant::now() + interval);
    }

    fn stop_interval(&mut self) {
        self.interval = None;
        self.next_tick = None;
    }
}

pub fn run_viewer(config: ViewerConfig) -> Result<(), ViewerError> {
    let data = load_stage_file(&config.stage_path)?;
    let mut assets = ImageAssets::with_root(&config.image_dir);
    let image_count = assets.load_stage_images(&data);
    let mut stage = Stage::new(&data, config.stage, &assets)?;
    let report = prerender(&mut stage, &assets);
    start_stage_music(&mut assets, stage.properties());
    info!(
        stage = stage.name(),
        image_count,
        instance_count = stage.instance_count(),
        folded_elements = report.folded_elements,
        composites = report.composites,
        "stage_ready"
    );

    let clock = Rc::new(SystemClock::default());
    let mut render_loop = RenderLoop::new(config.render_loop, clock)?;

    let width = config.stage.viewport_width;
    let height = config.stage.viewport_height;
    let event_loop = EventLoop::new().map_err(ViewerError::CreateEventLoop)?;
    let window = Arc::new(
        WindowBuilder::new()
            .with_title(stage.name().to_string())
            .with_inner_size(LogicalSize::new(f64::from(width), f64::from(height)))
            .build(&event_loop)
            .map_err(ViewerError::CreateWindow)?,
    );
    let inner = window.inner_size();
    let mut pixels = Pixels::new(
        width,
        height,
        SurfaceTexture::new(inner.width, inner.height, Arc::clone(&window)),
    )
    .map_err(ViewerError::CreatePixels)?;

    let mut surface = RasterSurface::new(width, height);
    let mut scheduler = WindowScheduler::default();
    let mut frame_due = false;
    let mut last_title_refresh = Instant::now();
    render_loop.run(&mut stage, &mut scheduler);

    event_loop
        .run(move |event, window_target| match event {
            Event::WindowEvent { window_id, event } if window_id == window.id() => match event {
                WindowEvent::CloseRequested => {
                    info!(reason = "window_close", "shutdown_requested");
                    render_loop.stop(&mut scheduler);
                    window_target.exit();
                }
                WindowEvent::Resized(size) => {
                    if size.width == 0 || size.height == 0 {
                        return;
                    }
                    if let Err(error) = pixels.resize_surface(size.width, size.height) {
                        warn!(error = %error, "surface_resize_failed");
                        window_target.exit();
                    }
                }
                WindowEvent::KeyboardInput { event, .. } => {
                    if !is_fresh_press(&event) {
                        return;
                    }
                    match event.physical_key {
                        PhysicalKey::Code(KeyCode::Escape) => {
                            info!(reason = "escape_key", "shutdown_requested");
                            render_loop.stop(&mut scheduler);
                            window_target.exit();
                        }
                        PhysicalKey::Code(KeyCode::KeyP) => {
                            if render_loop.state() == LoopState::Running {
                                render_loop.suspend(&mut scheduler);
                                window.set_title(&format!("{} - paused", stage.name()));
                            } else {
                                render_loop.run(&mut stage, &mut scheduler);
                                last_title_refresh = Instant::now();
                            }
                        }
                        PhysicalKey::Code(code) => {
                            if let Some((dx, dy)) = drag_for_key(code) {
                                stage.view_mut().drag(dx, dy);
                                window.request_redraw();
                            }
                        }
                        PhysicalKey::Unidentified(_) => {}
                    }
                }
                WindowEvent::RedrawRequested => {
                    if std::mem::take(&mut frame_due) {
                        let outcome = render_loop.frame(FrameContext {
                            stage: &mut stage,
                            surface: &mut surface,
                            assets: &assets,
                            scheduler: &mut scheduler,
                        });
                        if let Err(error) = outcome {
                            error!(error = %error, "frame_failed");
                            window_target.exit();
                            return;
                        }
                    } else if render_loop.state() != LoopState::Running {
                        let timestamp = stage.time();
                        render_loop
                            .renderer_mut()
                            .render(&stage, &mut surface, &assets, timestamp);
                    }

                    pixels.frame_mut().copy_from_slice(surface.image().as_raw());
                    if let Err(error) = pixels.render() {
                        warn!(error = %error, "surface_present_failed");
                        window_target.exit();
                        return;
                    }

                    if last_title_refresh.elapsed() >= TITLE_REFRESH {
                        last_title_refresh = Instant::now();
                        if let Some(rate) = render_loop.actual_rate() {
                            window.set_title(&format!("{} - {rate:.0} fps", stage.name()));
                        }
                    }
                }
                _ => {}
            },
            Event::AboutToWait => {
                if scheduler.take_due(Instant::now()) {
                    frame_due = true;
                    window.request_redraw();
                }
                window_target.set_control_flow(scheduler.control_flow());
            }
            Event::LoopExiting => {
                info!("shutdown");
            }
            _ => {}
        })
        .map_err(ViewerError::EventLoopRun)
}

/// Loops the sound named by the stage's `music` property. There is no audio
/// device here, so the sink only logs what would play.
fn start_stage_music(assets: &mut ImageAssets, properties: &Properties) -> Option<SoundHandle> {
    assets.set_sound_sink(Box::new(|handle: SoundHandle, looped: bool| {
        info!(sound = handle.0, looped, "sound_requested");
    }));
    let music = properties.get(MUSIC_PROPERTY)?.as_str()?;
    let handle = assets.register_sound(music);
    if let Err(error) = assets.play_sound(music, true) {
        warn!(sound = music, error = %error, "stage_music_failed");
    }
    Some(handle)
}

fn is_fresh_press(event: &KeyEvent) -> bool {
    event.state == ElementState::Pressed && !event.repeat
}

/// Arrow keys move the camera, so the origin shifts the opposite way.
fn drag_for_key(code: KeyCode) -> Option<(f64, f64)> {
    match code {
        KeyCode::ArrowLeft => Some((DRAG_STEP_PX, 0.0)),
        KeyCode::ArrowRight => Some((-DRAG_STEP_PX, 0.0)),
        KeyCode::ArrowUp => Some((0.0, DRAG_STEP_PX)),
        KeyCode::ArrowDown => Some((0.0, -DRAG_STEP_PX)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_request_is_due_once() {
        let mut scheduler = WindowScheduler::default();
        scheduler.request_frame();
        assert_eq!(scheduler.control_flow(), ControlFlow::Poll);

        let now = Instant::now();
        assert!(scheduler.take_due(now));
        assert!(!scheduler.take_due(now));
        assert_eq!(scheduler.control_flow(), ControlFlow::Wait);
    }

    #[test]
    fn cancelled_request_never_fires() {
        let mut scheduler = WindowScheduler::default();
        let token = scheduler.request_frame();
        scheduler.cancel_frame(token);
        assert!(!scheduler.take_due(Instant::now()));
    }

    #[test]
    fn stale_cancel_keeps_newer_request() {
        let mut scheduler = WindowScheduler::default();
        let stale = scheduler.request_frame();
        scheduler.request_frame();
        scheduler.cancel_frame(stale);
        assert!(scheduler.take_due(Instant::now()));
    }

    #[test]
    fn interval_fires_each_period_and_stops() {
        let mut scheduler = WindowScheduler::default();
        scheduler.start_interval(16);
        let start = Instant::now();
        assert!(!scheduler.take_due(start));
        assert!(scheduler.take_due(start + Duration::from_millis(20)));
        assert!(!scheduler.take_due(start + Duration::from_millis(21)));
        assert!(matches!(scheduler.control_flow(), ControlFlow::WaitUntil(_)));

        scheduler.stop_interval();
        assert!(!scheduler.take_due(start + Duration::from_secs(5)));
        assert_eq!(scheduler.control_flow(), ControlFlow::Wait);
    }

    #[test]
    fn stage_music_is_registered_from_properties() {
        let data = stage_engine::parse_stage_str(r#"{ "properties": { "music": "calm" } }"#)
            .expect("stage json");
        let mut assets = ImageAssets::new();
        let handle = start_stage_music(&mut assets, &data.properties).expect("music");
        assert_eq!(assets.sound("calm"), Some(handle));

        let silent = stage_engine::parse_stage_str(r#"{ "properties": { "music": 3 } }"#)
            .expect("stage json");
        assert!(start_stage_music(&mut ImageAssets::new(), &silent.properties).is_none());
    }

    #[test]
    fn arrow_keys_drag_against_camera_motion() {
        assert_eq!(drag_for_key(KeyCode::ArrowRight), Some((-DRAG_STEP_PX, 0.0)));
        assert_eq!(drag_for_key(KeyCode::ArrowUp), Some((0.0, DRAG_STEP_PX)));
        assert_eq!(drag_for_key(KeyCode::KeyW), None);
    }
}
