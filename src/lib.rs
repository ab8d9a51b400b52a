//! Pose-driven silhouette reconstruction, luma-matte compositing and
//! live-vs-target shape scoring.

pub mod config;
pub mod error;
pub mod model_download;
pub mod pipeline;
pub mod types;

pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use types::{Frame, Keypoint, KeypointIndex, Pose, PoseSet, ScoreResult};
