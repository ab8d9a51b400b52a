use anyhow::{Context, Result, anyhow};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use super::{PoseEstimator, common};
use crate::{
    config::{EstimatorConfig, MoveNetVariant},
    types::{Frame, Pose},
};

pub struct MoveNetEstimator {
    session: Session,
    variant: MoveNetVariant,
    detection_threshold: f32,
}

impl MoveNetEstimator {
    pub fn new(cfg: &EstimatorConfig) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(cfg.intra_threads)?
            .commit_from_file(&cfg.model_path)
            .with_context(|| {
                format!(
                    "failed to load MoveNet session from {}",
                    cfg.model_path.display()
                )
            })?;
        log::info!(
            "MoveNet {} ready ({}px input) using {}",
            cfg.variant.label(),
            cfg.variant.input_size(),
            cfg.model_path.display()
        );

        Ok(Self {
            session,
            variant: cfg.variant,
            detection_threshold: cfg.detection_threshold,
        })
    }
}

impl PoseEstimator for MoveNetEstimator {
    fn estimate(&mut self, frame: &Frame) -> Result<Vec<Pose>> {
        let (input, letterbox) = common::prepare_frame(frame, self.variant.input_size())?;
        let tensor = Tensor::from_array(input)?;

        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .context("failed to run MoveNet session")?;
        if outputs.len() < 1 {
            return Err(anyhow!("MoveNet returned no outputs"));
        }

        let keypoints = outputs[0].try_extract_array::<f32>()?;
        let shape = keypoints.shape().to_vec();
        let flattened: Vec<f32> = keypoints.iter().copied().collect();

        common::decode_poses(&flattened, &shape, &letterbox, self.detection_threshold)
    }
}
