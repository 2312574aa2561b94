use std::error::Error;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::content::AssetProvider;
use crate::stage::{InstanceId, Range, Stage, Synchronizer};

use super::clock::Clock;
use super::metrics::{MetricsAccumulator, RateProbe};
use super::rendering::{DrawingSurface, StageRenderer};

const METRICS_LOG_INTERVAL_MS: f64 = 1000.0;

pub type HookError = Box<dyn Error + Send + Sync>;
pub type FrameHook = Box<dyn FnMut(&mut Stage, &FrameInfo) -> Result<(), HookError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStyle {
    /// One frame per host frame callback.
    Request,
    /// Periodic timer at the configured rate.
    Interval,
    /// `Request` when the host supports it, otherwise `Interval`.
    Auto,
}

impl FromStr for LoopStyle {
    type Err = LoopError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "request" => Ok(Self::Request),
            "interval" => Ok(Self::Interval),
            "auto" => Ok(Self::Auto),
            other => Err(LoopError::InvalidStyle(other.to_string())),
        }
    }
}

impl fmt::Display for LoopStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Request => "request",
            Self::Interval => "interval",
            Self::Auto => "auto",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopConfig {
    pub style: LoopStyle,
    pub rate: u32,
    pub max_period_ms: f64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            style: LoopStyle::Auto,
            rate: 60,
            max_period_ms: 5000.0,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoopError {
    #[error("unknown loop style `{0}`; expected request, interval or auto")]
    InvalidStyle(String),
    #[error("loop rate must be between 1 and 1000 frames per second, got {0}")]
    InvalidRate(u32),
    #[error("maximum loop period must be positive, got {0} ms")]
    InvalidMaxPeriod(f64),
    #[error("frame hook failed: {0}")]
    Hook(#[source] HookError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Fresh,
    Running,
    Suspended,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameToken(pub u64);

/// Host primitive that calls back into [`RenderLoop::frame`].
pub trait FrameScheduler {
    fn supports_frame_requests(&self) -> bool {
        true
    }

    fn request_frame(&mut self) -> FrameToken;
    fn cancel_frame(&mut self, token: FrameToken);
    fn start_interval(&mut self, period_ms: u64);
    fn stop_interval(&mut self);
}

/// Everything one frame borrows from the host.
pub struct FrameContext<'a> {
    pub stage: &'a mut Stage,
    pub surface: &'a mut dyn DrawingSurface,
    pub assets: &'a dyn AssetProvider,
    pub scheduler: &'a mut dyn FrameScheduler,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameInfo {
    pub timestamp: f64,
    pub elapsed: f64,
    pub delta: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameReport {
    pub info: FrameInfo,
    pub fixed_steps: u32,
    /// Seconds simulated by the trailing partial step.
    pub fractional_dt: f64,
    pub clamped: bool,
    pub drawn: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct SubStepPlan {
    fixed_steps: u32,
    remainder_ms: f64,
    clamped: bool,
}

pub struct RenderLoop {
    config: LoopConfig,
    period_ms: u64,
    clock: Rc<dyn Clock>,
    state: LoopState,
    driving: Option<LoopStyle>,
    start_timestamp: f64,
    last_timestamp: f64,
    pending: Option<FrameToken>,
    interval_active: bool,
    range: Option<Range>,
    hook: Option<FrameHook>,
    view_sync: Option<(Synchronizer, InstanceId)>,
    renderer: StageRenderer,
    probe: RateProbe,
    metrics: MetricsAccumulator,
}

impl fmt::Debug for RenderLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderLoop")
            .field("config", &self.config)
            .field("period_ms", &self.period_ms)
            .field("state", &self.state)
            .field("driving", &self.driving)
            .field("range", &self.range)
            .field("view_sync", &self.view_sync)
            .finish_non_exhaustive()
    }
}

impl RenderLoop {
    pub fn new(config: LoopConfig, clock: Rc<dyn Clock>) -> Result<Self, LoopError> {
        if config.rate == 0 || config.rate > 1000 {
            return Err(LoopError::InvalidRate(config.rate));
        }
        if config.max_period_ms.is_nan() || config.max_period_ms <= 0.0 {
            return Err(LoopError::InvalidMaxPeriod(config.max_period_ms));
        }
        let period_ms = u64::from(1000 / config.rate);
        let now = clock.now_ms();
        info!(
            style = %config.style,
            rate = config.rate,
            period_ms,
            max_period_ms = config.max_period_ms,
            "loop_config"
        );

        Ok(Self {
            config,
            period_ms,
            clock,
            state: LoopState::Fresh,
            driving: None,
            start_timestamp: now,
            last_timestamp: now,
            pending: None,
            interval_active: false,
            range: None,
            hook: None,
            view_sync: None,
            renderer: StageRenderer::new(),
            probe: RateProbe::default(),
            metrics: MetricsAccumulator::new(METRICS_LOG_INTERVAL_MS, now),
        })
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn period_ms(&self) -> u64 {
        self.period_ms
    }

    /// Style actually driving frames; `None` until the first `run`.
    pub fn driving_style(&self) -> Option<LoopStyle> {
        self.driving
    }

    pub fn renderer(&self) -> &StageRenderer {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut StageRenderer {
        &mut self.renderer
    }

    /// Restricts simulation to instances inside `range`.
    pub fn set_range(&mut self, range: Option<Range>) {
        self.range = range;
    }

    /// Called after the simulation update of every frame; an error stops the
    /// loop.
    pub fn set_hook(&mut self, hook: Option<FrameHook>) {
        self.hook = hook;
    }

    pub fn set_view_sync(&mut self, view_sync: Option<(Synchronizer, InstanceId)>) {
        self.view_sync = view_sync;
    }

    pub fn run(&mut self, stage: &mut Stage, scheduler: &mut dyn FrameScheduler) {
        match self.state {
            LoopState::Fresh => {
                let now = self.clock.now_ms();
                self.start_timestamp = now;
                self.last_timestamp = now;
                self.driving = Some(self.resolve_style(&*scheduler));
                stage.synchronize(self.period_ms);
                self.probe.reset(now);
                self.metrics = MetricsAccumulator::new(METRICS_LOG_INTERVAL_MS, now);
            }
            LoopState::Suspended => {
                self.probe.reset(self.clock.now_ms());
            }
            LoopState::Running | LoopState::Stopped => return,
        }
        self.transition(LoopState::Running);
        self.schedule(scheduler);
    }

    pub fn suspend(&mut self, scheduler: &mut dyn FrameScheduler) {
        if self.state != LoopState::Running {
            return;
        }
        self.cancel(scheduler);
        self.transition(LoopState::Suspended);
    }

    pub fn stop(&mut self, scheduler: &mut dyn FrameScheduler) {
        if self.state == LoopState::Stopped {
            return;
        }
        self.cancel(scheduler);
        self.transition(LoopState::Stopped);
    }

    /// Frames per second since the previous call; `None` unless running.
    pub fn actual_rate(&mut self) -> Option<f64> {
        if self.state != LoopState::Running {
            return None;
        }
        Some(self.probe.take_rate(self.clock.now_ms()))
    }

    /// Runs one frame. Returns `Ok(None)` when the loop is not running.
    pub fn frame(&mut self, context: FrameContext<'_>) -> Result<Option<FrameReport>, LoopError> {
        let FrameContext {
            stage,
            surface,
            assets,
            scheduler,
        } = context;
        if self.state != LoopState::Running {
            return Ok(None);
        }
        self.pending = None;

        let timestamp = self.clock.now_ms();
        let delta = timestamp - self.last_timestamp;
        let elapsed = timestamp - self.start_timestamp;
        self.last_timestamp = timestamp;

        let period = self.period_ms as f64;
        let plan = plan_sub_steps(delta, period, self.config.max_period_ms);
        if plan.clamped {
            warn!(
                raw_delta_ms = delta,
                max_period_ms = self.config.max_period_ms,
                "sim_clamp_triggered"
            );
        }

        stage.set_time(elapsed);
        let fractional_dt = plan.remainder_ms / 1000.0;
        let mut steps = vec![period / 1000.0; plan.fixed_steps as usize];
        steps.push(fractional_dt);
        stage.tick_frame(self.range, &steps);
        for _ in 0..plan.fixed_steps {
            self.metrics.record_tick();
        }
        match self.range {
            Some(range) => stage.update_range(range),
            None => stage.update(),
        }

        let info = FrameInfo {
            timestamp,
            elapsed,
            delta,
        };
        if let Some(hook) = self.hook.as_mut() {
            if let Err(error) = hook(&mut *stage, &info) {
                warn!(error = %error, "frame_hook_failed");
                self.stop(scheduler);
                return Err(LoopError::Hook(error));
            }
        }
        if let Some((synchronizer, target)) = self.view_sync {
            if let Err(error) = stage.synchronize_view(&synchronizer, target) {
                warn!(instance = target.0, error = %error, "view_sync_target_lost");
                self.view_sync = None;
            }
        }

        let drawn = self.renderer.render(stage, surface, assets, elapsed);

        self.probe.record_frame();
        self.metrics.record_frame(delta);
        if let Some(snapshot) = self.metrics.maybe_snapshot(timestamp) {
            debug!(
                fps = snapshot.fps,
                tps = snapshot.tps,
                frame_time_ms = snapshot.frame_time_ms,
                instance_count = stage.instance_count(),
                "loop_metrics"
            );
        }

        if self.state == LoopState::Running && self.driving == Some(LoopStyle::Request) {
            self.pending = Some(scheduler.request_frame());
        }

        Ok(Some(FrameReport {
            info,
            fixed_steps: plan.fixed_steps,
            fractional_dt,
            clamped: plan.clamped,
            drawn,
        }))
    }

    fn resolve_style(&self, scheduler: &dyn FrameScheduler) -> LoopStyle {
        match self.config.style {
            LoopStyle::Interval => LoopStyle::Interval,
            LoopStyle::Request | LoopStyle::Auto if scheduler.supports_frame_requests() => {
                LoopStyle::Request
            }
            LoopStyle::Request => {
                warn!("frame_requests_unsupported");
                LoopStyle::Interval
            }
            LoopStyle::Auto => LoopStyle::Interval,
        }
    }

    fn schedule(&mut self, scheduler: &mut dyn FrameScheduler) {
        match self.driving {
            Some(LoopStyle::Request) => {
                if self.pending.is_none() {
                    self.pending = Some(scheduler.request_frame());
                }
            }
            Some(_) => {
                if !self.interval_active {
                    scheduler.start_interval(self.period_ms);
                    self.interval_active = true;
                }
            }
            None => {}
        }
    }

    fn cancel(&mut self, scheduler: &mut dyn FrameScheduler) {
        if let Some(token) = self.pending.take() {
            scheduler.cancel_frame(token);
        }
        if self.interval_active {
            scheduler.stop_interval();
            self.interval_active = false;
        }
    }

    fn transition(&mut self, next: LoopState) {
        info!(from = ?self.state, to = ?next, "loop_state_changed");
        self.state = next;
    }
}

fn plan_sub_steps(delta_ms: f64, period_ms: f64, max_period_ms: f64) -> SubStepPlan {
    let clamped = delta_ms > max_period_ms;
    let mut remainder_ms = delta_ms.min(max_period_ms).max(0.0);
    let mut fixed_steps = 0u32;

    if period_ms > 0.0 {
        while remainder_ms > period_ms {
            remainder_ms -= period_ms;
            fixed_steps = fixed_steps.saturating_add(1);
        }
    }

    SubStepPlan {
        fixed_steps,
        remainder_ms,
        clamped,
    }
}
