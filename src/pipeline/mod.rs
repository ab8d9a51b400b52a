#[cfg(feature = "camera-nokhwa")]
pub mod camera;
pub mod compositor;
pub mod difference;
pub mod effects;
pub mod estimator;
pub mod glyphs;
pub mod matte;
pub mod raster;
pub mod resample;
pub mod scheduler;
pub mod silhouette;
pub mod skeleton;
pub mod slot;
pub mod source;

// Re-exports for convenience
#[cfg(feature = "camera-nokhwa")]
pub use camera::{CameraDevice, CameraFrameSource, available_cameras};
pub use compositor::{BlendMode, CompositorLayer, LayerSource, compose};
pub use difference::{ClassCounts, Classification, DifferenceScorer};
pub use effects::{DrawStep, Effect, EffectSet, plan_draw};
pub use estimator::{
    EstimateOutcome, EstimateRequest, KeypointSource, MoveNetEstimator, PoseEstimator,
    ThreadedKeypointSource, start_movenet,
};
pub use matte::MatteStatus;
pub use scheduler::{RenderScheduler, SchedulerState, SkipReason, TickOutcome};
pub use silhouette::SilhouetteBuilder;
pub use source::{FrameSource, ImageSequenceSource, StaticImageSource};
