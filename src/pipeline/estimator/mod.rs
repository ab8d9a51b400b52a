//! Pose estimation off the render thread.

pub mod common;
mod movenet;

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use super::slot::LatestSlot;
use crate::{
    config::EstimatorConfig,
    model_download::ensure_model_ready,
    types::{Frame, Pose, PoseSet},
};

pub use movenet::MoveNetEstimator;

const WORKER_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Clone, Debug)]
pub struct EstimateRequest {
    pub ticket: u64,
    pub frame: Frame,
}

#[derive(Clone, Debug)]
pub struct EstimateOutcome {
    pub ticket: u64,
    pub poses: Arc<PoseSet>,
}

/// Asynchronous keypoint provider driven by the scheduler. `request` never
/// blocks and `poll` only returns finished work.
pub trait KeypointSource {
    /// Hands over a frame, replacing any request not yet picked up. `false`
    /// when the source can no longer serve requests.
    fn request(&mut self, request: EstimateRequest) -> bool;

    fn poll(&mut self) -> Option<EstimateOutcome>;
}

/// A blocking pose model.
pub trait PoseEstimator: Send + 'static {
    fn estimate(&mut self, frame: &Frame) -> anyhow::Result<Vec<Pose>>;
}

fn run_worker_loop<E: PoseEstimator>(
    mut estimator: E,
    requests: LatestSlot<EstimateRequest>,
    results: LatestSlot<EstimateOutcome>,
    shutdown: Arc<AtomicBool>,
) {
    while !shutdown.load(Ordering::Acquire) {
        let Some(request) = requests.recv_timeout(WORKER_POLL_INTERVAL) else {
            continue;
        };
        let frame = &request.frame;
        let poses = match estimator.estimate(frame) {
            Ok(poses) => poses,
            Err(err) => {
                log::warn!("pose estimation failed: {err:?}");
                Vec::new()
            }
        };
        log::trace!("ticket {} produced {} pose(s)", request.ticket, poses.len());
        results.publish(EstimateOutcome {
            ticket: request.ticket,
            poses: Arc::new(PoseSet::new(poses, frame.width, frame.height)),
        });
    }
}

/// Runs a [`PoseEstimator`] on its own thread behind two single-value slots.
pub struct ThreadedKeypointSource {
    requests: LatestSlot<EstimateRequest>,
    results: LatestSlot<EstimateOutcome>,
    shutdown: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ThreadedKeypointSource {
    pub fn spawn<E: PoseEstimator>(estimator: E) -> Self {
        Self::spawn_with(move || Ok(estimator))
    }

    /// Builds the estimator on the worker thread, so slow model loading never
    /// stalls the caller. If `init` fails the source stops accepting requests.
    pub fn spawn_with<E, F>(init: F) -> Self
    where
        E: PoseEstimator,
        F: FnOnce() -> anyhow::Result<E> + Send + 'static,
    {
        let requests = LatestSlot::new();
        let results = LatestSlot::new();
        let shutdown = Arc::new(AtomicBool::new(false));

        let handle = {
            let requests = requests.clone();
            let results = results.clone();
            let shutdown = shutdown.clone();
            thread::spawn(move || {
                let estimator = match init() {
                    Ok(estimator) => estimator,
                    Err(err) => {
                        log::error!("failed to start pose estimator: {err:?}");
                        return;
                    }
                };
                run_worker_loop(estimator, requests, results, shutdown);
            })
        };

        Self {
            requests,
            results,
            shutdown,
            handle: Some(handle),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }
}

impl KeypointSource for ThreadedKeypointSource {
    fn request(&mut self, request: EstimateRequest) -> bool {
        if !self.is_alive() {
            return false;
        }
        self.requests.publish(request);
        true
    }

    fn poll(&mut self) -> Option<EstimateOutcome> {
        self.results.take()
    }
}

/// Raises the shutdown flag without waiting on a worker that is still inside
/// `init` or `estimate`; such a thread exits on its own once that call returns.
impl Drop for ThreadedKeypointSource {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        let Some(handle) = self.handle.take() else {
            return;
        };
        if !handle.is_finished() {
            log::debug!("detaching busy pose estimator thread");
            return;
        }
        if handle.join().is_err() {
            log::error!("pose estimator thread panicked");
        }
    }
}

/// MoveNet behind a worker thread. The model is fetched (when a URL is
/// configured) and loaded on that thread.
pub fn start_movenet(cfg: EstimatorConfig) -> ThreadedKeypointSource {
    log::info!(
        "starting MoveNet {} estimator from {}",
        cfg.variant.label(),
        cfg.model_path.display()
    );
    ThreadedKeypointSource::spawn_with(move || {
        ensure_model_ready(&cfg)?;
        MoveNetEstimator::new(&cfg)
    })
}
