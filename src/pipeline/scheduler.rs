//! Per-display-frame orchestration: pull a frame, fold in the latest finished
//! estimate, compose the enabled effects.

use std::sync::Arc;

use image::{GrayImage, RgbaImage, imageops};

use super::{
    compositor::{self, BlendMode, CompositorLayer, LayerSource},
    difference::DifferenceScorer,
    effects::{DrawStep, Effect, EffectSet, plan_draw},
    estimator::{EstimateRequest, KeypointSource},
    matte::{self, MatteStatus},
    resample::{self, Filter},
    silhouette::SilhouetteBuilder,
    skeleton::{self, SkeletonStyle},
    source::FrameSource,
};
use crate::{
    config::EngineConfig,
    error::{EngineError, Result, ensure_same_dimensions},
    types::{Frame, Pose, PoseSet, ScoreResult},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    SourceAttached,
    Running,
    Stopped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    NoSource,
    SourceNotReady,
    FrameUnavailable,
    /// Composition failed for this frame only; the next tick retries.
    RenderFailed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    Drawn { tick: u64, estimate_requested: bool },
    Skipped(SkipReason),
    Stopped,
}

enum LayerBuffer {
    Image(RgbaImage),
    Mask(GrayImage),
}

pub struct RenderScheduler {
    cfg: EngineConfig,
    state: SchedulerState,
    effects: EffectSet,
    frame_source: Option<Box<dyn FrameSource>>,
    target_source: Option<Box<dyn FrameSource>>,
    keypoints: Option<Box<dyn KeypointSource>>,
    silhouette: SilhouetteBuilder,
    live_silhouette: SilhouetteBuilder,
    scorer: DifferenceScorer,
    output: RgbaImage,
    target_mask: GrayImage,
    latest_poses: Option<Arc<PoseSet>>,
    pending_ticket: Option<u64>,
    next_ticket: u64,
    /// Outcomes for tickets below this were requested for effects that have
    /// since been switched off.
    accept_from_ticket: u64,
    frame_ticks: u64,
    score: Option<ScoreResult>,
}

impl RenderScheduler {
    pub fn new(cfg: EngineConfig) -> Result<Self> {
        cfg.validate()?;
        let silhouette = SilhouetteBuilder::new(cfg.silhouette.clone());
        let live_silhouette = match cfg.difference.confidence_threshold {
            Some(threshold) => silhouette.with_threshold(threshold),
            None => SilhouetteBuilder::new(cfg.silhouette.clone()),
        };
        let scorer = DifferenceScorer::new(cfg.difference.clone());

        Ok(Self {
            cfg,
            state: SchedulerState::Idle,
            effects: EffectSet::empty(),
            frame_source: None,
            target_source: None,
            keypoints: None,
            silhouette,
            live_silhouette,
            scorer,
            output: RgbaImage::new(0, 0),
            target_mask: GrayImage::new(0, 0),
            latest_poses: None,
            pending_ticket: None,
            next_ticket: 0,
            accept_from_ticket: 0,
            frame_ticks: 0,
            score: None,
        })
    }

    pub fn with_keypoint_source(mut self, source: Box<dyn KeypointSource>) -> Self {
        self.set_keypoint_source(source);
        self
    }

    pub fn set_keypoint_source(&mut self, source: Box<dyn KeypointSource>) {
        self.keypoints = Some(source);
        self.pending_ticket = None;
        self.accept_from_ticket = self.next_ticket;
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn effects(&self) -> EffectSet {
        self.effects
    }

    pub fn output(&self) -> &RgbaImage {
        &self.output
    }

    pub fn current_score(&self) -> Option<ScoreResult> {
        self.score
    }

    /// The most recent completed estimate, in processing-frame pixels.
    pub fn latest_poses(&self) -> Option<&PoseSet> {
        self.latest_poses.as_deref()
    }

    /// True while a pose-consuming effect is on but no estimate has landed
    /// yet, so pose layers would still be drawn from nothing.
    pub fn awaiting_first_estimate(&self) -> bool {
        self.effects.needs_pose() && self.latest_poses.is_none()
    }

    pub fn has_frame_source(&self) -> bool {
        self.frame_source.is_some()
    }

    pub fn has_target_source(&self) -> bool {
        self.target_source.is_some()
    }

    fn transition(&mut self, next: SchedulerState) {
        if self.state != next {
            log::debug!("scheduler {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    /// Attaches (or swaps) the live source and starts scheduling. Also
    /// restarts a stopped scheduler.
    pub fn set_frame_source(&mut self, source: Box<dyn FrameSource>) {
        let (width, height) = source.dimensions();
        log::info!("frame source attached ({width}x{height})");
        self.frame_source = Some(source);
        self.transition(SchedulerState::SourceAttached);
        self.transition(SchedulerState::Running);
    }

    /// Detaches the live source and clears the output to transparent.
    pub fn remove_frame_source(&mut self) {
        if self.frame_source.take().is_some() {
            log::info!("frame source removed");
        }
        self.output.pixels_mut().for_each(|px| px.0 = [0, 0, 0, 0]);
        if self.state != SchedulerState::Stopped {
            self.transition(SchedulerState::Idle);
        }
    }

    pub fn set_target_source(&mut self, source: Box<dyn FrameSource>) {
        let (width, height) = source.dimensions();
        log::info!("target source attached ({width}x{height})");
        self.target_source = Some(source);
    }

    /// Target-backed effects stay enabled but draw nothing until a new target
    /// is attached.
    pub fn remove_target_source(&mut self) {
        if self.target_source.take().is_some() {
            log::info!("target source removed");
        }
        self.score = None;
    }

    pub fn enable(&mut self, effect: Effect) -> Result<()> {
        self.set_effect(effect, true)
    }

    pub fn disable(&mut self, effect: Effect) {
        self.effects.remove(effect);
        self.effects_changed();
    }

    /// Enabling a target-backed effect without a target source fails and
    /// leaves the effect set as it was.
    pub fn set_effect(&mut self, effect: Effect, enabled: bool) -> Result<()> {
        if enabled && effect.consumes_target() && self.target_source.is_none() {
            return Err(EngineError::MissingSource("target source"));
        }
        self.effects.set(effect, enabled);
        self.effects_changed();
        Ok(())
    }

    fn effects_changed(&mut self) {
        log::debug!(
            "effects now [{}]",
            self.effects
                .iter()
                .map(Effect::label)
                .collect::<Vec<_>>()
                .join(", ")
        );
        if !self.effects.needs_pose() {
            self.latest_poses = None;
            self.pending_ticket = None;
            self.accept_from_ticket = self.next_ticket;
        }
        if !self.effects.contains(Effect::DifferenceMask) {
            self.score = None;
        }
    }

    /// Halts scheduling and releases both frame sources. Safe to call twice.
    pub fn stop(&mut self) {
        if self.state == SchedulerState::Stopped {
            return;
        }
        self.frame_source = None;
        self.target_source = None;
        self.pending_ticket = None;
        self.transition(SchedulerState::Stopped);
        log::info!("scheduler stopped after {} frame(s)", self.frame_ticks);
    }

    /// `stop` plus releasing the keypoint source and cached estimates.
    pub fn destroy(&mut self) {
        self.stop();
        self.keypoints = None;
        self.latest_poses = None;
        self.score = None;
    }

    pub fn tick(&mut self) -> TickOutcome {
        if self.state == SchedulerState::Stopped {
            return TickOutcome::Stopped;
        }
        self.collect_estimates();

        let Some(source) = self.frame_source.as_mut() else {
            return TickOutcome::Skipped(SkipReason::NoSource);
        };
        let (width, height) = source.dimensions();
        if width == 0 || height == 0 || !source.is_ready() {
            log::trace!("frame source not ready");
            return TickOutcome::Skipped(SkipReason::SourceNotReady);
        }
        let Some(frame) = source.current_frame() else {
            log::debug!("frame source produced no frame");
            return TickOutcome::Skipped(SkipReason::FrameUnavailable);
        };
        let Some(base) = frame.to_image().filter(|image| image.width() > 0 && image.height() > 0)
        else {
            log::warn!(
                "dropping malformed {}x{} frame ({} bytes)",
                frame.width,
                frame.height,
                frame.rgba.len()
            );
            return TickOutcome::Skipped(SkipReason::FrameUnavailable);
        };

        let (width, height) = base.dimensions();
        if self.output.dimensions() != (width, height) {
            log::debug!("output resized to {width}x{height}");
            self.output = RgbaImage::new(width, height);
        }

        let tick = self.frame_ticks;
        self.frame_ticks += 1;
        let processing = self.cfg.scheduler.processing_dimensions(width, height);
        let estimate_requested = self.request_estimate(tick, frame, &base, processing);

        // only a difference overlay drawn this frame may set a score
        self.score = None;
        match self.render(base, processing) {
            Ok(output) => {
                self.output = output;
                TickOutcome::Drawn {
                    tick,
                    estimate_requested,
                }
            }
            Err(err) => {
                log::warn!("frame {tick} aborted: {err}");
                TickOutcome::Skipped(SkipReason::RenderFailed)
            }
        }
    }

    fn collect_estimates(&mut self) {
        let Some(keypoints) = self.keypoints.as_mut() else {
            return;
        };
        while let Some(outcome) = keypoints.poll() {
            if self.pending_ticket.is_some_and(|pending| outcome.ticket >= pending) {
                self.pending_ticket = None;
            }
            if outcome.ticket < self.accept_from_ticket || !self.effects.needs_pose() {
                log::trace!("discarding stale estimate for ticket {}", outcome.ticket);
                continue;
            }
            self.latest_poses = Some(outcome.poses);
        }
    }

    fn request_estimate(
        &mut self,
        tick: u64,
        frame: Frame,
        base: &RgbaImage,
        (proc_w, proc_h): (u32, u32),
    ) -> bool {
        if !self.effects.needs_pose() {
            return false;
        }
        if tick % u64::from(self.cfg.scheduler.estimate_interval) != 0 {
            return false;
        }
        if self.cfg.scheduler.gate_on_settled && self.pending_ticket.is_some() {
            log::trace!("estimate still in flight, not re-issuing");
            return false;
        }
        let Some(keypoints) = self.keypoints.as_mut() else {
            return false;
        };

        let frame = if (frame.width, frame.height) == (proc_w, proc_h) {
            frame
        } else {
            match resample::resize_rgba(base, proc_w, proc_h, Filter::Bilinear) {
                Ok(image) => Frame::from_image(image),
                Err(err) => {
                    log::warn!("failed to prepare estimation frame: {err}");
                    return false;
                }
            }
        };

        let ticket = self.next_ticket;
        self.next_ticket += 1;
        if keypoints.request(EstimateRequest { ticket, frame }) {
            self.pending_ticket = Some(ticket);
            true
        } else {
            log::debug!("keypoint source rejected ticket {ticket}");
            false
        }
    }

    fn render(&mut self, base: RgbaImage, processing: (u32, u32)) -> Result<RgbaImage> {
        let (width, height) = base.dimensions();
        let target = self.pull_target(width, height)?;
        let poses: Vec<Pose> = self
            .latest_poses
            .as_ref()
            .map(|set| set.rescaled_to(width, height))
            .unwrap_or_default();

        let steps = plan_draw(self.effects, target.is_some());
        let mut buffers: Vec<(BlendMode, LayerBuffer)> = Vec::with_capacity(steps.len());
        let mut base = Some(base);
        let mut score = None;

        for step in steps {
            match step {
                DrawStep::Base => {
                    if let Some(image) = base.take() {
                        buffers.push((BlendMode::Over, LayerBuffer::Image(image)));
                    }
                }
                DrawStep::LumaMatteCutout => {
                    if let Some(target) = &target {
                        let mut matte_image = target.clone();
                        if matte::apply_luma_matte(&mut matte_image) == MatteStatus::Ready {
                            buffers.push((BlendMode::Cutout, LayerBuffer::Image(matte_image)));
                        }
                    }
                }
                DrawStep::BoundingBoxCutout => {
                    let overlay = &self.cfg.overlay;
                    let mask = compositor::bounding_box_mask(
                        width,
                        height,
                        &poses,
                        overlay.confidence_threshold,
                        overlay.bbox_padding,
                    );
                    buffers.push((BlendMode::Cutout, LayerBuffer::Mask(mask)));
                }
                DrawStep::SegmentCutout => {
                    let mask = self.silhouette.build_all(&poses, width, height);
                    buffers.push((BlendMode::Cutout, LayerBuffer::Mask(mask)));
                }
                DrawStep::DifferenceOverlay => {
                    if let Some(target) = &target {
                        let (visualization, result) =
                            self.difference_layer(target, (width, height), processing)?;
                        score = Some(result);
                        buffers.push((BlendMode::Over, LayerBuffer::Image(visualization)));
                    }
                }
                DrawStep::Skeleton => {
                    let overlay = &self.cfg.overlay;
                    let style = SkeletonStyle {
                        threshold: overlay.confidence_threshold,
                        thickness: overlay.skeleton_thickness,
                        line_color: overlay.skeleton_color,
                        joint_color: overlay.joint_color,
                    };
                    let mut image = RgbaImage::new(width, height);
                    for pose in &poses {
                        skeleton::draw_skeleton(&mut image, pose, &style);
                    }
                    buffers.push((BlendMode::Over, LayerBuffer::Image(image)));
                }
            }
        }

        let layers: Vec<CompositorLayer<'_>> = buffers
            .iter()
            .map(|(blend, buffer)| CompositorLayer {
                source: match buffer {
                    LayerBuffer::Image(image) => LayerSource::Image(image),
                    LayerBuffer::Mask(mask) => LayerSource::Mask(mask),
                },
                blend: *blend,
            })
            .collect();
        let mut output = compositor::compose(width, height, &layers)?;

        if self.cfg.scheduler.mirror {
            imageops::flip_horizontal_in_place(&mut output);
        }
        if let Some(score) = score {
            self.scorer.draw_label(&mut output, &score);
            log::debug!(
                "match {} ({} of {} target cells)",
                score.display_text(),
                score.matched_pixels,
                score.target_pixels
            );
            self.score = Some(score);
        }
        Ok(output)
    }

    /// Current target frame at output size, or `None` when no target-backed
    /// effect is on or the target has nothing to show this tick.
    fn pull_target(&mut self, width: u32, height: u32) -> Result<Option<RgbaImage>> {
        if !self.effects.needs_target() {
            return Ok(None);
        }
        let Some(source) = self.target_source.as_mut() else {
            return Ok(None);
        };
        let (target_w, target_h) = source.dimensions();
        if target_w == 0 || target_h == 0 || !source.is_ready() {
            log::trace!("target source not ready");
            return Ok(None);
        }
        let Some(image) = source.current_frame().and_then(|frame| frame.to_image()) else {
            return Ok(None);
        };
        if image.dimensions() == (width, height) {
            return Ok(Some(image));
        }
        if !self.cfg.scheduler.fit_target {
            ensure_same_dimensions((width, height), image.dimensions())?;
        }
        Ok(Some(resample::resize_rgba(
            &image,
            width,
            height,
            Filter::Bilinear,
        )?))
    }

    fn difference_layer(
        &mut self,
        target: &RgbaImage,
        (width, height): (u32, u32),
        (proc_w, proc_h): (u32, u32),
    ) -> Result<(RgbaImage, ScoreResult)> {
        let target_small = resample::resize_rgba(target, proc_w, proc_h, Filter::Bilinear)?;
        if self.target_mask.dimensions() != (proc_w, proc_h) {
            self.target_mask = GrayImage::new(proc_w, proc_h);
        }
        matte::extract_luma_mask(&target_small, &mut self.target_mask)?;

        let live_poses = self
            .latest_poses
            .as_ref()
            .map(|set| set.rescaled_to(proc_w, proc_h))
            .unwrap_or_default();
        let live = self.live_silhouette.build_all(&live_poses, proc_w, proc_h);

        let classification = self.scorer.classify(&live, &self.target_mask)?;
        let visualization = self.scorer.render(&classification, width, height)?;
        Ok((visualization, classification.score()))
    }
}

impl Drop for RenderScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        pipeline::{
            estimator::EstimateOutcome,
            source::{ImageSequenceSource, StaticImageSource},
        },
        types::{Keypoint, KeypointIndex},
    };
    use image::Rgba;
    use std::{cell::Cell, cell::RefCell, collections::VecDeque, rc::Rc};

    const BLACK: [u8; 4] = [0, 0, 0, 255];

    struct DelayedSource {
        image: RgbaImage,
        not_ready_checks: Cell<u32>,
    }

    impl FrameSource for DelayedSource {
        fn dimensions(&self) -> (u32, u32) {
            self.image.dimensions()
        }

        fn is_ready(&self) -> bool {
            let left = self.not_ready_checks.get();
            if left > 0 {
                self.not_ready_checks.set(left - 1);
                return false;
            }
            true
        }

        fn current_frame(&mut self) -> Option<Frame> {
            Some(Frame::from_image(self.image.clone()))
        }
    }

    #[derive(Default)]
    struct FakeState {
        requests: Vec<(u64, (u32, u32))>,
        ready: VecDeque<EstimateOutcome>,
        /// Answer every request immediately with these poses.
        auto: Option<Vec<Pose>>,
    }

    #[derive(Clone, Default)]
    struct FakeKeypoints(Rc<RefCell<FakeState>>);

    impl FakeKeypoints {
        fn answering(poses: Vec<Pose>) -> Self {
            let fake = FakeKeypoints::default();
            fake.0.borrow_mut().auto = Some(poses);
            fake
        }

        fn request_count(&self) -> usize {
            self.0.borrow().requests.len()
        }

        fn push(&self, ticket: u64, poses: Vec<Pose>, width: u32, height: u32) {
            self.0.borrow_mut().ready.push_back(EstimateOutcome {
                ticket,
                poses: Arc::new(PoseSet::new(poses, width, height)),
            });
        }
    }

    impl KeypointSource for FakeKeypoints {
        fn request(&mut self, request: EstimateRequest) -> bool {
            let mut state = self.0.borrow_mut();
            let dims = (request.frame.width, request.frame.height);
            state.requests.push((request.ticket, dims));
            if let Some(poses) = state.auto.clone() {
                state.ready.push_back(EstimateOutcome {
                    ticket: request.ticket,
                    poses: Arc::new(PoseSet::new(poses, dims.0, dims.1)),
                });
            }
            true
        }

        fn poll(&mut self) -> Option<EstimateOutcome> {
            let mut state = self.0.borrow_mut();
            let latest = state.ready.pop_back();
            state.ready.clear();
            latest
        }
    }

    fn solid(width: u32, height: u32, color: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba(color))
    }

    fn static_source(image: RgbaImage) -> Box<dyn FrameSource> {
        Box::new(StaticImageSource::new(image).unwrap())
    }

    fn shoulders_pose() -> Pose {
        let mut pose = Pose::default();
        pose.keypoints[KeypointIndex::LeftShoulder as usize] =
            Keypoint::new(KeypointIndex::LeftShoulder, 2.0, 8.0, 0.9);
        pose.keypoints[KeypointIndex::RightShoulder as usize] =
            Keypoint::new(KeypointIndex::RightShoulder, 13.0, 8.0, 0.9);
        pose
    }

    fn scheduler_with(cfg: EngineConfig, fake: &FakeKeypoints) -> RenderScheduler {
        RenderScheduler::new(cfg)
            .unwrap()
            .with_keypoint_source(Box::new(fake.clone()))
    }

    fn interval(n: u32) -> EngineConfig {
        let mut cfg = EngineConfig::default();
        cfg.scheduler.estimate_interval = n;
        cfg
    }

    #[test]
    fn test_scenario_d_waits_for_readiness() {
        let mut scheduler = RenderScheduler::new(EngineConfig::default()).unwrap();
        scheduler.set_frame_source(Box::new(DelayedSource {
            image: solid(4, 4, BLACK),
            not_ready_checks: Cell::new(2),
        }));
        assert_eq!(scheduler.state(), SchedulerState::Running);
        assert_eq!(
            scheduler.tick(),
            TickOutcome::Skipped(SkipReason::SourceNotReady)
        );
        assert_eq!(
            scheduler.tick(),
            TickOutcome::Skipped(SkipReason::SourceNotReady)
        );
        assert!(matches!(
            scheduler.tick(),
            TickOutcome::Drawn { tick: 0, .. }
        ));
        assert_eq!(scheduler.output().get_pixel(1, 1).0, BLACK);
    }

    #[test]
    fn test_scenario_e_remove_source_clears_output() {
        let mut scheduler = RenderScheduler::new(EngineConfig::default()).unwrap();
        scheduler.set_frame_source(static_source(solid(4, 4, BLACK)));
        assert!(matches!(scheduler.tick(), TickOutcome::Drawn { .. }));
        scheduler.remove_frame_source();
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert_eq!(scheduler.output().dimensions(), (4, 4));
        assert!(scheduler.output().pixels().all(|px| px.0 == [0, 0, 0, 0]));
        assert_eq!(scheduler.tick(), TickOutcome::Skipped(SkipReason::NoSource));
    }

    #[test]
    fn test_exhausted_sequence_skips() {
        let mut scheduler = RenderScheduler::new(EngineConfig::default()).unwrap();
        scheduler.set_frame_source(Box::new(ImageSequenceSource::from_images(vec![solid(
            2, 2, BLACK,
        )])));
        assert!(matches!(scheduler.tick(), TickOutcome::Drawn { .. }));
        assert_eq!(
            scheduler.tick(),
            TickOutcome::Skipped(SkipReason::SourceNotReady)
        );
    }

    #[test]
    fn test_stop_is_idempotent_and_releases_sources() {
        let mut scheduler = RenderScheduler::new(EngineConfig::default()).unwrap();
        scheduler.set_frame_source(static_source(solid(4, 4, BLACK)));
        scheduler.set_target_source(static_source(solid(4, 4, BLACK)));
        scheduler.stop();
        scheduler.stop();
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert!(!scheduler.has_frame_source());
        assert!(!scheduler.has_target_source());
        assert_eq!(scheduler.tick(), TickOutcome::Stopped);

        scheduler.set_frame_source(static_source(solid(4, 4, BLACK)));
        assert_eq!(scheduler.state(), SchedulerState::Running);
        assert!(matches!(scheduler.tick(), TickOutcome::Drawn { .. }));
    }

    #[test]
    fn test_destroy_releases_estimates() {
        let fake = FakeKeypoints::answering(vec![shoulders_pose()]);
        let mut scheduler = scheduler_with(interval(1), &fake);
        scheduler.enable(Effect::Skeleton).unwrap();
        scheduler.set_frame_source(static_source(solid(16, 16, BLACK)));
        scheduler.tick();
        scheduler.tick();
        assert!(scheduler.latest_poses().is_some());
        scheduler.destroy();
        assert!(scheduler.latest_poses().is_none());
        assert_eq!(scheduler.tick(), TickOutcome::Stopped);
    }

    #[test]
    fn test_estimation_every_interval_ticks() {
        let fake = FakeKeypoints::answering(Vec::new());
        let mut scheduler = scheduler_with(interval(2), &fake);
        scheduler.enable(Effect::Skeleton).unwrap();
        scheduler.set_frame_source(static_source(solid(8, 8, BLACK)));
        let requested: Vec<bool> = (0..5)
            .map(|_| match scheduler.tick() {
                TickOutcome::Drawn {
                    estimate_requested, ..
                } => estimate_requested,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(requested, vec![true, false, true, false, true]);
        assert_eq!(fake.request_count(), 3);
    }

    #[test]
    fn test_no_estimation_without_pose_effects() {
        let fake = FakeKeypoints::answering(Vec::new());
        let mut scheduler = scheduler_with(interval(1), &fake);
        scheduler.set_frame_source(static_source(solid(8, 8, BLACK)));
        for _ in 0..3 {
            scheduler.tick();
        }
        assert_eq!(fake.request_count(), 0);
    }

    #[test]
    fn test_gate_holds_requests_until_settled() {
        let fake = FakeKeypoints::default();
        let mut scheduler = scheduler_with(interval(1), &fake);
        scheduler.enable(Effect::SegmentMask).unwrap();
        scheduler.set_frame_source(static_source(solid(8, 8, BLACK)));
        for _ in 0..3 {
            scheduler.tick();
        }
        assert_eq!(fake.request_count(), 1);

        fake.push(0, Vec::new(), 8, 8);
        scheduler.tick();
        assert_eq!(fake.request_count(), 2);

        let fake = FakeKeypoints::default();
        let mut cfg = interval(1);
        cfg.scheduler.gate_on_settled = false;
        let mut scheduler = scheduler_with(cfg, &fake);
        scheduler.enable(Effect::SegmentMask).unwrap();
        scheduler.set_frame_source(static_source(solid(8, 8, BLACK)));
        for _ in 0..3 {
            scheduler.tick();
        }
        assert_eq!(fake.request_count(), 3);
    }

    #[test]
    fn test_stale_results_discarded_after_disable() {
        let fake = FakeKeypoints::default();
        let mut scheduler = scheduler_with(interval(1), &fake);
        scheduler.enable(Effect::Skeleton).unwrap();
        scheduler.set_frame_source(static_source(solid(16, 16, BLACK)));
        scheduler.tick();
        assert_eq!(fake.request_count(), 1);

        scheduler.disable(Effect::Skeleton);
        fake.push(0, vec![shoulders_pose()], 16, 16);
        scheduler.enable(Effect::Skeleton).unwrap();
        scheduler.tick();
        assert!(scheduler.latest_poses().is_none());
        assert!(scheduler.output().pixels().all(|px| px.0 == BLACK));
        // disabling also released the gate
        assert_eq!(fake.request_count(), 2);
    }

    #[test]
    fn test_skeleton_uses_latest_estimate_and_clears_on_empty() {
        let fake = FakeKeypoints::answering(vec![shoulders_pose()]);
        let mut scheduler = scheduler_with(interval(1), &fake);
        scheduler.enable(Effect::Skeleton).unwrap();
        scheduler.set_frame_source(static_source(solid(16, 16, BLACK)));

        scheduler.tick();
        // first frame never waits for its own estimate
        assert!(scheduler.output().pixels().all(|px| px.0 == BLACK));
        scheduler.tick();
        let line_color = scheduler.config().overlay.skeleton_color;
        assert_eq!(scheduler.output().get_pixel(7, 8).0, line_color);

        fake.0.borrow_mut().auto = Some(Vec::new());
        scheduler.tick();
        scheduler.tick();
        assert!(scheduler.latest_poses().unwrap().is_empty());
        assert!(scheduler.output().pixels().all(|px| px.0 == BLACK));
    }

    #[test]
    fn test_bounding_box_cuts_outside_body() {
        let fake = FakeKeypoints::answering(vec![shoulders_pose()]);
        let mut cfg = interval(1);
        cfg.overlay.bbox_padding = 1.0;
        let mut scheduler = scheduler_with(cfg, &fake);
        scheduler.enable(Effect::BoundingBoxMask).unwrap();
        scheduler.set_frame_source(static_source(solid(16, 16, BLACK)));
        scheduler.tick();
        scheduler.tick();
        let output = scheduler.output();
        assert_eq!(output.get_pixel(7, 8).0, BLACK);
        assert_eq!(output.get_pixel(7, 0).0[3], 0);
    }

    #[test]
    fn test_difference_requires_target() {
        let mut scheduler = RenderScheduler::new(EngineConfig::default()).unwrap();
        assert_eq!(
            scheduler.enable(Effect::DifferenceMask),
            Err(EngineError::MissingSource("target source"))
        );
        assert!(scheduler.effects().is_empty());
        assert_eq!(
            scheduler.set_effect(Effect::LumaMatte, true),
            Err(EngineError::MissingSource("target source"))
        );
    }

    #[test]
    fn test_difference_scores_against_target() {
        let mut scheduler = RenderScheduler::new(EngineConfig::default()).unwrap();
        scheduler.set_frame_source(static_source(solid(16, 16, BLACK)));
        scheduler.set_target_source(static_source(solid(16, 16, [255, 255, 255, 255])));
        scheduler.enable(Effect::DifferenceMask).unwrap();
        assert!(matches!(scheduler.tick(), TickOutcome::Drawn { .. }));

        let score = scheduler.current_score().unwrap();
        assert_eq!(score.matched_pixels, 0);
        assert_eq!(score.target_pixels, 16);
        assert_eq!(score.percentage, 0.0);
        assert_eq!(scheduler.output().get_pixel(0, 0).0, [255, 255, 255, 255]);

        scheduler.disable(Effect::DifferenceMask);
        assert!(scheduler.current_score().is_none());
    }

    #[test]
    fn test_score_cleared_once_target_sequence_ends() {
        let mut scheduler = RenderScheduler::new(EngineConfig::default()).unwrap();
        scheduler.set_frame_source(static_source(solid(16, 16, BLACK)));
        scheduler.set_target_source(Box::new(ImageSequenceSource::from_images(vec![solid(
            16,
            16,
            [255, 255, 255, 255],
        )])));
        scheduler.enable(Effect::DifferenceMask).unwrap();

        assert!(matches!(scheduler.tick(), TickOutcome::Drawn { .. }));
        assert_eq!(scheduler.current_score().unwrap().target_pixels, 16);

        assert!(matches!(scheduler.tick(), TickOutcome::Drawn { .. }));
        assert!(scheduler.current_score().is_none());
        assert!(scheduler.output().pixels().all(|px| px.0 == BLACK));
    }

    #[test]
    fn test_score_cleared_on_aborted_frame() {
        let mut cfg = EngineConfig::default();
        cfg.scheduler.fit_target = false;
        let mut scheduler = RenderScheduler::new(cfg).unwrap();
        scheduler.set_frame_source(static_source(solid(16, 16, BLACK)));
        scheduler.set_target_source(static_source(solid(16, 16, [255, 255, 255, 255])));
        scheduler.enable(Effect::DifferenceMask).unwrap();
        scheduler.tick();
        assert!(scheduler.current_score().is_some());

        scheduler.set_target_source(static_source(solid(8, 8, [255, 255, 255, 255])));
        assert_eq!(
            scheduler.tick(),
            TickOutcome::Skipped(SkipReason::RenderFailed)
        );
        assert!(scheduler.current_score().is_none());
    }

    #[test]
    fn test_awaiting_first_estimate() {
        let fake = FakeKeypoints::answering(Vec::new());
        let mut scheduler = scheduler_with(interval(1), &fake);
        scheduler.set_frame_source(static_source(solid(8, 8, BLACK)));
        assert!(!scheduler.awaiting_first_estimate());

        scheduler.enable(Effect::SegmentMask).unwrap();
        scheduler.tick();
        assert!(scheduler.awaiting_first_estimate());
        scheduler.tick();
        // an empty estimate still counts as an answer
        assert!(!scheduler.awaiting_first_estimate());
    }

    #[test]
    fn test_luma_matte_cuts_live_frame() {
        let mut target = solid(4, 4, BLACK);
        for y in 0..4 {
            for x in 0..2 {
                target.put_pixel(x, y, Rgba([255, 255, 255, 255]));
            }
        }
        let mut scheduler = RenderScheduler::new(EngineConfig::default()).unwrap();
        scheduler.set_frame_source(static_source(solid(4, 4, [255, 0, 0, 255])));
        scheduler.set_target_source(static_source(target));
        scheduler.enable(Effect::LumaMatte).unwrap();
        scheduler.tick();
        assert_eq!(scheduler.output().get_pixel(0, 0).0, [255, 0, 0, 255]);
        assert_eq!(scheduler.output().get_pixel(3, 0).0[3], 0);
    }

    #[test]
    fn test_target_mismatch_aborts_frame_only() {
        let mut cfg = EngineConfig::default();
        cfg.scheduler.fit_target = false;
        let mut scheduler = RenderScheduler::new(cfg).unwrap();
        scheduler.set_frame_source(static_source(solid(8, 8, BLACK)));
        scheduler.set_target_source(static_source(solid(4, 4, BLACK)));
        scheduler.enable(Effect::LumaMatte).unwrap();
        assert_eq!(
            scheduler.tick(),
            TickOutcome::Skipped(SkipReason::RenderFailed)
        );
        assert_eq!(scheduler.state(), SchedulerState::Running);

        scheduler.set_target_source(static_source(solid(8, 8, [255, 255, 255, 255])));
        assert!(matches!(scheduler.tick(), TickOutcome::Drawn { .. }));
    }

    #[test]
    fn test_processing_width_downscales_estimation_frames() {
        let fake = FakeKeypoints::answering(Vec::new());
        let mut cfg = interval(1);
        cfg.scheduler.processing_width = Some(8);
        let mut scheduler = scheduler_with(cfg, &fake);
        scheduler.enable(Effect::Skeleton).unwrap();
        scheduler.set_frame_source(static_source(solid(16, 12, BLACK)));
        scheduler.tick();
        assert_eq!(fake.0.borrow().requests[0], (0, (8, 6)));
        assert_eq!(scheduler.output().dimensions(), (16, 12));
    }

    #[test]
    fn test_mirror_flips_output() {
        let mut frame = solid(4, 1, [0, 0, 255, 255]);
        frame.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        let mut cfg = EngineConfig::default();
        cfg.scheduler.mirror = true;
        let mut scheduler = RenderScheduler::new(cfg).unwrap();
        scheduler.set_frame_source(static_source(frame));
        scheduler.tick();
        assert_eq!(scheduler.output().get_pixel(3, 0).0, [255, 0, 0, 255]);
        assert_eq!(scheduler.output().get_pixel(0, 0).0, [0, 0, 255, 255]);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.scheduler.estimate_interval = 0;
        assert!(matches!(
            RenderScheduler::new(cfg),
            Err(EngineError::Config { .. })
        ));
    }
}
