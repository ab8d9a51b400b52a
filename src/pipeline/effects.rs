use std::{fmt, str::FromStr};

use anyhow::anyhow;

/// Toggleable render effects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Effect {
    Skeleton,
    BoundingBoxMask,
    SegmentMask,
    DifferenceMask,
    /// Cut the live frame with the target stream's luma matte.
    LumaMatte,
}

impl Effect {
    pub const ALL: [Effect; 5] = [
        Effect::Skeleton,
        Effect::BoundingBoxMask,
        Effect::SegmentMask,
        Effect::DifferenceMask,
        Effect::LumaMatte,
    ];

    fn bit(self) -> u8 {
        match self {
            Effect::Skeleton => 1 << 0,
            Effect::BoundingBoxMask => 1 << 1,
            Effect::SegmentMask => 1 << 2,
            Effect::DifferenceMask => 1 << 3,
            Effect::LumaMatte => 1 << 4,
        }
    }

    pub fn consumes_pose(self) -> bool {
        !matches!(self, Effect::LumaMatte)
    }

    pub fn consumes_target(self) -> bool {
        matches!(self, Effect::DifferenceMask | Effect::LumaMatte)
    }

    pub fn label(self) -> &'static str {
        match self {
            Effect::Skeleton => "skeleton",
            Effect::BoundingBoxMask => "bbox",
            Effect::SegmentMask => "segment",
            Effect::DifferenceMask => "difference",
            Effect::LumaMatte => "matte",
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Effect {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Effect::ALL
            .into_iter()
            .find(|effect| effect.label().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| anyhow!("unknown effect '{s}'"))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EffectSet(u8);

impl EffectSet {
    pub const fn empty() -> Self {
        EffectSet(0)
    }

    pub fn contains(&self, effect: Effect) -> bool {
        self.0 & effect.bit() != 0
    }

    pub fn insert(&mut self, effect: Effect) {
        self.0 |= effect.bit();
    }

    pub fn remove(&mut self, effect: Effect) {
        self.0 &= !effect.bit();
    }

    pub fn set(&mut self, effect: Effect, enabled: bool) {
        if enabled {
            self.insert(effect);
        } else {
            self.remove(effect);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Effect> + use<> {
        let set = *self;
        Effect::ALL
            .into_iter()
            .filter(move |effect| set.contains(*effect))
    }

    /// True while any enabled effect reads keypoints.
    pub fn needs_pose(&self) -> bool {
        self.iter().any(Effect::consumes_pose)
    }

    pub fn needs_target(&self) -> bool {
        self.iter().any(Effect::consumes_target)
    }
}

impl FromIterator<Effect> for EffectSet {
    fn from_iter<I: IntoIterator<Item = Effect>>(iter: I) -> Self {
        let mut set = EffectSet::empty();
        for effect in iter {
            set.insert(effect);
        }
        set
    }
}

/// One stage of a frame's composition, in back-to-front order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrawStep {
    Base,
    LumaMatteCutout,
    BoundingBoxCutout,
    SegmentCutout,
    DifferenceOverlay,
    Skeleton,
}

/// Layer order for one frame. Target-backed steps are dropped while no target
/// source is attached; overlays always come after every cutout.
pub fn plan_draw(effects: EffectSet, has_target: bool) -> Vec<DrawStep> {
    let mut steps = vec![DrawStep::Base];
    if has_target && effects.contains(Effect::LumaMatte) {
        steps.push(DrawStep::LumaMatteCutout);
    }
    if effects.contains(Effect::BoundingBoxMask) {
        steps.push(DrawStep::BoundingBoxCutout);
    }
    if effects.contains(Effect::SegmentMask) {
        steps.push(DrawStep::SegmentCutout);
    }
    if has_target && effects.contains(Effect::DifferenceMask) {
        steps.push(DrawStep::DifferenceOverlay);
    }
    if effects.contains(Effect::Skeleton) {
        steps.push(DrawStep::Skeleton);
    }
    steps
}
