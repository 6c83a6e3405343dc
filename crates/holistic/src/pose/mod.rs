//! Body pose detection and landmark estimation.

pub mod detection;
pub mod landmark;

use nalgebra::Vector2;

use crate::detection::Detector;
use crate::image::{Image, Rect, RotatedRect};
use crate::landmark::{
    rotation_between, Estimate, Estimator, InstanceTracker, Landmark, LandmarkTracker,
    Landmarker, ModeGuard, NormalizedLandmark, RunningMode,
};
use crate::runtime::{BaseOptions, VisionRuntime};
use crate::timer::Timer;

use self::detection::PoseDetectionNetwork;
use self::landmark::{LandmarkIdx, PoseEstimate, PoseLandmarkNetwork};

/// Pairs of pose landmarks that are connected in the body skeleton.
pub const POSE_CONNECTIONS: &[(LandmarkIdx, LandmarkIdx)] = {
    use LandmarkIdx::*;
    &[
        // Face:
        (Nose, LeftEyeInner),
        (LeftEyeInner, LeftEye),
        (LeftEye, LeftEyeOuter),
        (LeftEyeOuter, LeftEar),
        (Nose, RightEyeInner),
        (RightEyeInner, RightEye),
        (RightEye, RightEyeOuter),
        (RightEyeOuter, RightEar),
        (MouthLeft, MouthRight),
        // Arms and hands:
        (LeftShoulder, RightShoulder),
        (LeftShoulder, LeftElbow),
        (LeftElbow, LeftWrist),
        (LeftWrist, LeftPinky),
        (LeftWrist, LeftIndex),
        (LeftWrist, LeftThumb),
        (LeftPinky, LeftIndex),
        (RightShoulder, RightElbow),
        (RightElbow, RightWrist),
        (RightWrist, RightPinky),
        (RightWrist, RightIndex),
        (RightWrist, RightThumb),
        (RightPinky, RightIndex),
        // Torso:
        (LeftShoulder, LeftHip),
        (RightShoulder, RightHip),
        (LeftHip, RightHip),
        // Legs and feet:
        (LeftHip, LeftKnee),
        (RightHip, RightKnee),
        (LeftKnee, LeftAnkle),
        (RightKnee, RightAnkle),
        (LeftAnkle, LeftHeel),
        (RightAnkle, RightHeel),
        (LeftHeel, LeftFootIndex),
        (RightHeel, RightFootIndex),
        (LeftAnkle, LeftFootIndex),
        (RightAnkle, RightFootIndex),
    ]
};

/// Computes a body RoI from the body center and a point on the circle enclosing the body.
///
/// The RoI is a square centered on `center`, rotated so that `scale_point` is straight above the
/// center.
pub(crate) fn body_roi(center: [f32; 2], scale_point: [f32; 2]) -> RotatedRect {
    let radius = (Vector2::from(scale_point) - Vector2::from(center)).norm();
    let side = radius * 2.0 * 1.25;
    RotatedRect::new(
        Rect::from_center(center[0], center[1], side, side),
        rotation_between(center, scale_point, 0.0),
    )
}

/// Options for creating a [`PoseLandmarker`].
#[derive(Debug, Clone)]
pub struct PoseLandmarkerOptions {
    pub base_options: BaseOptions,
    pub running_mode: RunningMode,
    /// Maximum number of poses to detect.
    pub num_poses: usize,
    pub min_pose_detection_confidence: f32,
    /// Minimum pose presence score in [`RunningMode::Image`].
    pub min_pose_presence_confidence: f32,
    /// Minimum pose presence score to keep tracking a pose in [`RunningMode::Video`].
    pub min_tracking_confidence: f32,
}

impl PoseLandmarkerOptions {
    /// Bundle containing `pose_detection.onnx` and `pose_landmark.onnx`.
    pub const DEFAULT_BUNDLE: &'static str = "pose_landmarker";

    pub fn new(base_options: BaseOptions) -> Self {
        Self {
            base_options,
            running_mode: RunningMode::Image,
            num_poses: 1,
            min_pose_detection_confidence: 0.5,
            min_pose_presence_confidence: 0.5,
            min_tracking_confidence: 0.5,
        }
    }

    pub fn with_running_mode(mut self, mode: RunningMode) -> Self {
        self.running_mode = mode;
        self
    }

    pub fn with_num_poses(mut self, num_poses: usize) -> Self {
        self.num_poses = num_poses;
        self
    }
}

/// Poses found in one frame.
#[derive(Debug, Clone, Default)]
pub struct PoseLandmarkerResult {
    /// 33 landmarks per pose, in normalized image coordinates.
    pub landmarks: Vec<Vec<NormalizedLandmark>>,
    /// 33 landmarks per pose, in meters, centered between the hips.
    pub world_landmarks: Vec<Vec<Landmark>>,
}

impl PoseLandmarkerResult {
    pub fn is_empty(&self) -> bool {
        self.landmarks.is_empty()
    }
}

/// Detects and tracks body pose landmarks.
pub struct PoseLandmarker {
    guard: ModeGuard,
    tracker: InstanceTracker<PoseEstimate>,
}

impl PoseLandmarker {
    /// Loads the pose networks from the bundle named by `options` and creates the landmarker.
    pub fn create_from_options(
        runtime: &VisionRuntime,
        options: PoseLandmarkerOptions,
    ) -> anyhow::Result<Self> {
        let base = &options.base_options;
        let detection = runtime.load_network(base, "pose_detection.onnx", None)?;
        let landmarks = runtime.load_network(
            base,
            "pose_landmark.onnx",
            Some(&PoseLandmarkNetwork::OUTPUTS[..]),
        )?;

        let mut detector = Detector::new(PoseDetectionNetwork::new(detection)?);
        detector.set_threshold(options.min_pose_detection_confidence);

        let network = PoseLandmarkNetwork::new(landmarks)?;
        let loss_threshold = match options.running_mode {
            RunningMode::Image => options.min_pose_presence_confidence,
            RunningMode::Video => options.min_tracking_confidence,
        };
        let make_tracker = move || {
            let mut tracker = LandmarkTracker::new(Estimator::new(network.clone()));
            tracker.set_loss_threshold(loss_threshold);
            tracker
        };

        log::info!(
            "pose landmarker ready ({:?} mode, up to {} poses)",
            options.running_mode,
            options.num_poses,
        );
        Ok(Self {
            guard: ModeGuard::new(options.running_mode),
            tracker: InstanceTracker::new(
                detector,
                make_tracker,
                detection::detection_roi,
                options.num_poses,
            ),
        })
    }

    fn process(&mut self, image: &Image) -> anyhow::Result<PoseLandmarkerResult> {
        let tracked = self.tracker.process(image, self.guard.mode())?;
        let res = image.resolution();

        let mut result = PoseLandmarkerResult::default();
        for mut pose in tracked {
            pose.estimate.rotate_world(pose.view_rect.rotation_radians());
            let normalized = pose.estimate.landmarks().normalized(res);
            result
                .landmarks
                .push(normalized.into_iter().take(landmark::NUM_LANDMARKS).collect());
            result
                .world_landmarks
                .push(pose.estimate.world_landmarks().collect());
        }
        Ok(result)
    }
}

impl Landmarker for PoseLandmarker {
    type Result = PoseLandmarkerResult;

    fn detect(&mut self, image: &Image) -> anyhow::Result<PoseLandmarkerResult> {
        self.guard.check_image("detect")?;
        self.process(image)
    }

    fn detect_for_video(
        &mut self,
        image: &Image,
        timestamp_ms: u64,
    ) -> anyhow::Result<PoseLandmarkerResult> {
        self.guard.check_video("detect_for_video", timestamp_ms)?;
        self.process(image)
    }

    fn timers(&self) -> Vec<&Timer> {
        self.tracker.timers().collect()
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::FRAC_PI_2;

    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn body_roi_rotation() {
        // Body lying on its side, head to the right.
        let roi = body_roi([50.0, 50.0], [90.0, 50.0]);
        assert_abs_diff_eq!(roi.rotation_radians(), FRAC_PI_2, epsilon = 1e-6);
        assert_abs_diff_eq!(roi.rect().width(), 100.0, epsilon = 1e-4);
        assert_eq!(roi.center().x, 50.0);
    }

    #[test]
    fn connections_in_range() {
        assert_eq!(POSE_CONNECTIONS.len(), 35);
        assert!(POSE_CONNECTIONS
            .iter()
            .all(|&(a, b)| (a as usize) < landmark::NUM_LANDMARKS
                && (b as usize) < landmark::NUM_LANDMARKS));
    }
}
