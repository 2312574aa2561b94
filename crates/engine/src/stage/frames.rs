use std::collections::HashMap;

use tracing::{debug, warn};

use crate::content::FrameDescriptor;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ImageSource {
    Asset(String),
    /// Index into the stage's prerendered surfaces.
    Prerendered(usize),
}

/// Resolved source sub-rectangle of one animation frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub source: ImageSource,
    pub sx: u32,
    pub sy: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AnimationKey {
    Tile(String),
    Entity(String),
    Prerendered(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AnimationId(usize);

#[derive(Debug, Clone, PartialEq)]
struct FrameSpan {
    frame: Frame,
    start: u64,
    duration: u64,
}

/// Dense lookup over one loop of timed frames.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameCycle {
    spans: Vec<FrameSpan>,
    full_duration: u64,
    partial_unit: u64,
    unit: u64,
    table: Vec<usize>,
}

impl FrameCycle {
    fn new(timed: Vec<(Frame, u64)>, period: Option<u64>) -> Self {
        let mut spans = Vec::with_capacity(timed.len());
        let mut start = 0u64;
        let mut partial_unit = 0u64;
        for (frame, duration) in timed {
            spans.push(FrameSpan {
                frame,
                start,
                duration,
            });
            start += duration;
            partial_unit = gcd(partial_unit, duration);
        }
        let mut cycle = Self {
            spans,
            full_duration: start,
            partial_unit,
            unit: partial_unit,
            table: Vec::new(),
        };
        cycle.rebuild(period);
        cycle
    }

    fn rebuild(&mut self, period: Option<u64>) {
        self.unit = match period {
            Some(period) if period > 0 => gcd(self.partial_unit, period),
            _ => self.partial_unit,
        };
        let slots = (self.full_duration / self.unit) as usize;
        self.table.clear();
        self.table.reserve(slots);
        let mut span_index = 0usize;
        for slot in 0..slots {
            let offset = slot as u64 * self.unit;
            while offset >= self.spans[span_index].start + self.spans[span_index].duration {
                span_index += 1;
            }
            self.table.push(span_index);
        }
    }

    fn span_at(&self, t: f64) -> &FrameSpan {
        let offset = t % self.full_duration as f64;
        let slot = ((offset / self.unit as f64).floor() as usize).min(self.table.len() - 1);
        &self.spans[self.table[slot]]
    }

    pub fn full_duration(&self) -> u64 {
        self.full_duration
    }

    pub fn unit(&self) -> u64 {
        self.unit
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Animation {
    Static(Frame),
    Looping(FrameCycle),
    OneShot { cycle: FrameCycle, last: Frame },
}

impl Animation {
    /// A frame without a duration in last position makes the animation
    /// one-shot; untimed frames anywhere else are dropped.
    pub fn from_frames(frames: Vec<(Frame, Option<u32>)>, period: Option<u64>) -> Option<Self> {
        let mut frames = frames;
        if frames.len() <= 1 {
            return frames.pop().map(|(frame, _)| Animation::Static(frame));
        }

        let terminal = match frames.last() {
            Some((_, None)) => frames.pop().map(|(frame, _)| frame),
            _ => None,
        };
        let dropped = frames
            .iter()
            .filter(|(_, duration)| duration.unwrap_or(0) == 0)
            .count();
        if dropped > 0 {
            debug!(dropped, "untimed_frames_dropped");
        }
        let timed: Vec<(Frame, u64)> = frames
            .into_iter()
            .filter_map(|(frame, duration)| match duration {
                Some(duration) if duration > 0 => Some((frame, u64::from(duration))),
                _ => None,
            })
            .collect();

        match (timed.is_empty(), terminal) {
            (true, Some(last)) => Some(Animation::Static(last)),
            (true, None) => None,
            (false, Some(last)) => Some(Animation::OneShot {
                cycle: FrameCycle::new(timed, period),
                last,
            }),
            (false, None) => Some(Animation::Looping(FrameCycle::new(timed, period))),
        }
    }

    pub fn is_static(&self) -> bool {
        matches!(self, Animation::Static(_))
    }

    pub fn frame_at(&self, t: f64) -> &Frame {
        let t = if t.is_finite() && t > 0.0 { t } else { 0.0 };
        match self {
            Animation::Static(frame) => frame,
            Animation::Looping(cycle) => &cycle.span_at(t).frame,
            Animation::OneShot { cycle, last } => {
                if t >= cycle.full_duration as f64 {
                    last
                } else {
                    &cycle.span_at(t).frame
                }
            }
        }
    }

    pub fn cycle(&self) -> Option<&FrameCycle> {
        match self {
            Animation::Static(_) => None,
            Animation::Looping(cycle) | Animation::OneShot { cycle, .. } => Some(cycle),
        }
    }

    fn resynchronize(&mut self, period: Option<u64>) {
        match self {
            Animation::Static(_) => {}
            Animation::Looping(cycle) | Animation::OneShot { cycle, .. } => cycle.rebuild(period),
        }
    }
}

#[derive(Debug, Default)]
pub struct FrameTable {
    animations: Vec<Animation>,
    ids: HashMap<AnimationKey, AnimationId>,
    period: Option<u64>,
}

impl FrameTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves frame rectangles against decoded image sizes; the
    /// descriptors themselves are left untouched.
    pub fn register(
        &mut self,
        key: AnimationKey,
        descriptors: &[FrameDescriptor],
        image_size: &dyn Fn(&str) -> Option<(u32, u32)>,
    ) -> Option<AnimationId> {
        let frames = descriptors
            .iter()
            .map(|descriptor| (resolve_frame(descriptor, image_size), descriptor.duration))
            .collect();
        match Animation::from_frames(frames, self.period) {
            Some(animation) => Some(self.insert(key, animation)),
            None => {
                warn!(key = ?key, "animation_without_frames");
                None
            }
        }
    }

    pub fn insert(&mut self, key: AnimationKey, animation: Animation) -> AnimationId {
        if let Some(id) = self.ids.get(&key).copied() {
            self.animations[id.0] = animation;
            return id;
        }
        let id = AnimationId(self.animations.len());
        self.animations.push(animation);
        self.ids.insert(key, id);
        id
    }

    pub fn id(&self, key: &AnimationKey) -> Option<AnimationId> {
        self.ids.get(key).copied()
    }

    pub fn animation(&self, id: AnimationId) -> Option<&Animation> {
        self.animations.get(id.0)
    }

    pub fn resolve(&self, id: AnimationId, t: f64) -> Option<&Frame> {
        self.animation(id).map(|animation| animation.frame_at(t))
    }

    pub fn period(&self) -> Option<u64> {
        self.period
    }

    pub fn len(&self) -> usize {
        self.animations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.animations.is_empty()
    }

    pub fn synchronize(&mut self, period_ms: u64) {
        self.period = (period_ms > 0).then_some(period_ms);
        for animation in &mut self.animations {
            animation.resynchronize(self.period);
        }
        debug!(
            period_ms,
            animations = self.animations.len(),
            "animations_synchronized"
        );
    }
}

fn resolve_frame(
    descriptor: &FrameDescriptor,
    image_size: &dyn Fn(&str) -> Option<(u32, u32)>,
) -> Frame {
    let sx = descriptor.x.unwrap_or(0);
    let sy = descriptor.y.unwrap_or(0);
    let (width, height) = match (descriptor.width, descriptor.height) {
        (Some(width), Some(height)) => (width, height),
        (width, height) => match image_size(descriptor.id.as_str()) {
            Some((image_width, image_height)) => (
                width.unwrap_or(image_width.saturating_sub(sx)),
                height.unwrap_or(image_height.saturating_sub(sy)),
            ),
            None => {
                warn!(image = %descriptor.id, "frame_size_unresolved");
                (width.unwrap_or(0), height.unwrap_or(0))
            }
        },
    };
    Frame {
        source: ImageSource::Asset(descriptor.id.0.clone()),
        sx,
        sy,
        width,
        height,
    }
}

fn gcd(a: u64, b: u64) -> u64 {
    let (mut a, mut b) = (a, b);
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::StageId;

    fn frame(name: &str) -> Frame {
        Frame {
            source: ImageSource::Asset(name.to_string()),
            sx: 0,
            sy: 0,
            width: 8,
            height: 8,
        }
    }

    fn name_at(animation: &Animation, t: f64) -> String {
        match &animation.frame_at(t).source {
            ImageSource::Asset(name) => name.clone(),
            ImageSource::Prerendered(index) => format!("#{index}"),
        }
    }

    #[test]
    fn two_frame_loop_uses_gcd_unit() {
        let animation = Animation::from_frames(
            vec![(frame("A"), Some(100)), (frame("B"), Some(300))],
            None,
        )
        .expect("animation");

        let cycle = animation.cycle().expect("cycle");
        assert_eq!(cycle.unit(), 100);
        assert_eq!(cycle.full_duration(), 400);
        let names: Vec<String> = [0.0, 99.0, 100.0, 399.0, 400.0, 499.0, 500.0, 799.0, 800.0]
            .into_iter()
            .map(|t| name_at(&animation, t))
            .collect();
        assert_eq!(names, ["A", "A", "B", "B", "A", "A", "B", "B", "A"]);
    }

    #[test]
    fn every_offset_maps_inside_its_frame_window() {
        let durations = [30u32, 45, 15, 60];
        let frames: Vec<(Frame, Option<u32>)> = durations
            .iter()
            .enumerate()
            .map(|(index, duration)| (frame(&index.to_string()), Some(*duration)))
            .collect();
        for period in [None, Some(16), Some(33)] {
            let animation = Animation::from_frames(frames.clone(), period).expect("animation");
            let total: u32 = durations.iter().sum();
            for t in 0..total {
                let index: usize = name_at(&animation, f64::from(t)).parse().expect("index");
                let start: u32 = durations[..index].iter().sum();
                assert!(
                    t >= start && t < start + durations[index],
                    "t={t} period={period:?} index={index}"
                );
            }
        }
    }

    #[test]
    fn one_shot_holds_terminal_frame() {
        let animation = Animation::from_frames(
            vec![
                (frame("A"), Some(50)),
                (frame("B"), Some(50)),
                (frame("END"), None),
            ],
            None,
        )
        .expect("animation");

        assert!(matches!(animation, Animation::OneShot { .. }));
        assert_eq!(name_at(&animation, 49.0), "A");
        assert_eq!(name_at(&animation, 50.0), "B");
        assert_eq!(name_at(&animation, 100.0), "END");
        assert_eq!(name_at(&animation, 10_000.0), "END");
    }

    #[test]
    fn single_frame_is_static() {
        let animation = Animation::from_frames(vec![(frame("S"), Some(100))], None)
            .expect("animation");
        assert!(animation.is_static());
        assert_eq!(name_at(&animation, 12345.0), "S");
        assert!(Animation::from_frames(Vec::new(), None).is_none());
    }

    #[test]
    fn synchronize_rebuilds_tables_against_period() {
        let mut table = FrameTable::new();
        let descriptors = vec![
            FrameDescriptor {
                id: StageId::from("a.png"),
                x: Some(0),
                y: Some(0),
                width: Some(8),
                height: Some(8),
                duration: Some(100),
            },
            FrameDescriptor {
                id: StageId::from("a.png"),
                x: Some(8),
                y: Some(0),
                width: Some(8),
                height: Some(8),
                duration: Some(300),
            },
        ];
        let id = table
            .register(AnimationKey::Entity("hero".into()), &descriptors, &|_| None)
            .expect("id");
        assert_eq!(table.animation(id).and_then(Animation::cycle).map(FrameCycle::unit), Some(100));

        table.synchronize(16);
        assert_eq!(table.animation(id).and_then(Animation::cycle).map(FrameCycle::unit), Some(4));
        assert_eq!(table.resolve(id, 99.0).map(|frame| frame.sx), Some(0));
        assert_eq!(table.resolve(id, 100.0).map(|frame| frame.sx), Some(8));
    }

    #[test]
    fn missing_rectangle_is_filled_from_image_size() {
        let mut table = FrameTable::new();
        let descriptors = vec![FrameDescriptor {
            id: StageId::from("wall.png"),
            x: None,
            y: None,
            width: None,
            height: None,
            duration: None,
        }];
        let id = table
            .register(AnimationKey::Tile("wall".into()), &descriptors, &|id| {
                (id == "wall.png").then_some((32, 48))
            })
            .expect("id");
        let frame = table.resolve(id, 0.0).expect("frame");
        assert_eq!((frame.sx, frame.sy, frame.width, frame.height), (0, 0, 32, 48));
        assert_eq!(descriptors[0].width, None);
    }
}
