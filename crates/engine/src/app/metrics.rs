#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct LoopMetricsSnapshot {
    pub(crate) fps: f32,
    pub(crate) tps: f32,
    pub(crate) frame_time_ms: f32,
}

/// Per-interval frame and tick counters, timed in clock milliseconds.
#[derive(Debug)]
pub(crate) struct MetricsAccumulator {
    interval_start: f64,
    interval_ms: f64,
    frames: u32,
    ticks: u32,
    frame_time_sum: f64,
}

impl MetricsAccumulator {
    pub(crate) fn new(interval_ms: f64, now: f64) -> Self {
        Self {
            interval_start: now,
            interval_ms,
            frames: 0,
            ticks: 0,
            frame_time_sum: 0.0,
        }
    }

    pub(crate) fn record_frame(&mut self, frame_ms: f64) {
        self.frames = self.frames.saturating_add(1);
        self.frame_time_sum += frame_ms.max(0.0);
    }

    pub(crate) fn record_tick(&mut self) {
        self.ticks = self.ticks.saturating_add(1);
    }

    pub(crate) fn maybe_snapshot(&mut self, now: f64) -> Option<LoopMetricsSnapshot> {
        let elapsed = now - self.interval_start;
        if elapsed < self.interval_ms {
            return None;
        }

        let elapsed_seconds = (elapsed / 1000.0).max(f64::EPSILON);
        let frame_time_ms = if self.frames == 0 {
            0.0
        } else {
            self.frame_time_sum / f64::from(self.frames)
        };

        let snapshot = LoopMetricsSnapshot {
            fps: (f64::from(self.frames) / elapsed_seconds) as f32,
            tps: (f64::from(self.ticks) / elapsed_seconds) as f32,
            frame_time_ms: frame_time_ms as f32,
        };

        self.interval_start = now;
        self.frames = 0;
        self.ticks = 0;
        self.frame_time_sum = 0.0;

        Some(snapshot)
    }
}

/// Frames counted since the previous read; each read resets the window.
#[derive(Debug, Default)]
pub(crate) struct RateProbe {
    since: f64,
    frames: u32,
}

impl RateProbe {
    pub(crate) fn reset(&mut self, now: f64) {
        self.since = now;
        self.frames = 0;
    }

    pub(crate) fn record_frame(&mut self) {
        self.frames = self.frames.saturating_add(1);
    }

    pub(crate) fn take_rate(&mut self, now: f64) -> f64 {
        let elapsed_seconds = ((now - self.since) / 1000.0).max(f64::EPSILON);
        let rate = f64::from(self.frames) / elapsed_seconds;
        self.reset(now);
        rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_computes_expected_values() {
        let mut accumulator = MetricsAccumulator::new(1000.0, 0.0);

        accumulator.record_frame(16.0);
        accumulator.record_frame(16.0);
        for _ in 0..4 {
            accumulator.record_tick();
        }

        let snapshot = accumulator
            .maybe_snapshot(1000.0)
            .expect("snapshot should be emitted");

        assert!((snapshot.fps - 2.0).abs() < 0.05);
        assert!((snapshot.tps - 4.0).abs() < 0.05);
        assert!((snapshot.frame_time_ms - 16.0).abs() < 0.001);
    }

    #[test]
    fn snapshot_not_emitted_before_interval() {
        let mut accumulator = MetricsAccumulator::new(1000.0, 0.0);
        accumulator.record_frame(16.0);

        assert!(accumulator.maybe_snapshot(500.0).is_none());
    }

    #[test]
    fn rate_probe_resets_on_read() {
        let mut probe = RateProbe::default();
        probe.reset(100.0);
        for _ in 0..30 {
            probe.record_frame();
        }
        assert!((probe.take_rate(600.0) - 60.0).abs() < 1e-9);
        assert_eq!(probe.take_rate(1600.0), 0.0);
    }
}
