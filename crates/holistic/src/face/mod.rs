//! Face detection and face mesh estimation.

pub mod detection;
pub mod landmark;
pub mod mesh;

use crate::detection::Detector;
use crate::image::Image;
use crate::landmark::{
    Category, Estimate, Estimator, InstanceTracker, LandmarkTracker, Landmarker, ModeGuard,
    NormalizedLandmark, RunningMode,
};
use crate::runtime::{BaseOptions, VisionRuntime};
use crate::timer::Timer;

use self::detection::FaceDetectionNetwork;
use self::landmark::{FaceEstimate, FaceMeshNetwork};
use self::mesh::Connection;

/// Options for creating a [`FaceLandmarker`].
#[derive(Debug, Clone)]
pub struct FaceLandmarkerOptions {
    pub base_options: BaseOptions,
    pub running_mode: RunningMode,
    /// Maximum number of faces to detect.
    pub num_faces: usize,
    pub min_face_detection_confidence: f32,
    /// Minimum face presence score in [`RunningMode::Image`].
    pub min_face_presence_confidence: f32,
    /// Minimum face presence score to keep tracking a face in [`RunningMode::Video`].
    pub min_tracking_confidence: f32,
    /// Whether to report blendshape scores.
    pub output_face_blendshapes: bool,
}

impl FaceLandmarkerOptions {
    /// Bundle containing `face_detection.onnx`, `face_landmark.onnx` and optionally
    /// `canonical_face_model.obj`.
    pub const DEFAULT_BUNDLE: &'static str = "face_landmarker";

    pub fn new(base_options: BaseOptions) -> Self {
        Self {
            base_options,
            running_mode: RunningMode::Image,
            num_faces: 1,
            min_face_detection_confidence: 0.5,
            min_face_presence_confidence: 0.5,
            min_tracking_confidence: 0.5,
            output_face_blendshapes: false,
        }
    }

    pub fn with_running_mode(mut self, mode: RunningMode) -> Self {
        self.running_mode = mode;
        self
    }

    pub fn with_face_blendshapes(mut self, enable: bool) -> Self {
        self.output_face_blendshapes = enable;
        self
    }
}

/// Faces found in one frame.
#[derive(Debug, Clone, Default)]
pub struct FaceLandmarkerResult {
    /// 478 landmarks per face, in normalized image coordinates.
    pub face_landmarks: Vec<Vec<NormalizedLandmark>>,
    /// Blendshape scores per face. Empty unless blendshapes were requested.
    pub face_blendshapes: Vec<Vec<Category>>,
}

impl FaceLandmarkerResult {
    pub fn is_empty(&self) -> bool {
        self.face_landmarks.is_empty()
    }
}

/// Detects and tracks face landmarks.
pub struct FaceLandmarker {
    guard: ModeGuard,
    tracker: InstanceTracker<FaceEstimate>,
    output_blendshapes: bool,
    tessellation: Vec<Connection>,
}

impl FaceLandmarker {
    /// Loads the face networks from the bundle named by `options` and creates the landmarker.
    ///
    /// The face tessellation is read from the bundle's canonical face model. If the bundle has
    /// none, [`FaceLandmarker::tessellation`] is empty and the overlay triangulates the detected
    /// landmarks instead.
    pub fn create_from_options(
        runtime: &VisionRuntime,
        options: FaceLandmarkerOptions,
    ) -> anyhow::Result<Self> {
        let base = &options.base_options;
        let detection = runtime.load_network(base, "face_detection.onnx", None)?;
        let mesh = runtime.load_network(base, "face_landmark.onnx", None)?;

        let tessellation = match runtime.read_optional(base, "canonical_face_model.obj")? {
            Some(obj) => mesh::tessellation_from_obj(&obj, landmark::NUM_LANDMARKS)?,
            None => {
                log::warn!("no canonical face model in bundle, triangulating landmarks");
                Vec::new()
            }
        };

        let mut detector = Detector::new(FaceDetectionNetwork::new(detection)?);
        detector.set_threshold(options.min_face_detection_confidence);

        let network = FaceMeshNetwork::new(mesh)?;
        let loss_threshold = match options.running_mode {
            RunningMode::Image => options.min_face_presence_confidence,
            RunningMode::Video => options.min_tracking_confidence,
        };
        let make_tracker = move || {
            let mut tracker = LandmarkTracker::new(Estimator::new(network.clone()));
            tracker.set_loss_threshold(loss_threshold);
            tracker
        };

        log::info!(
            "face landmarker ready ({:?} mode, {} tessellation edges)",
            options.running_mode,
            tessellation.len(),
        );
        Ok(Self {
            guard: ModeGuard::new(options.running_mode),
            tracker: InstanceTracker::new(
                detector,
                make_tracker,
                detection::detection_roi,
                options.num_faces,
            ),
            output_blendshapes: options.output_face_blendshapes,
            tessellation,
        })
    }

    /// Returns the edges of the face mesh triangles.
    pub fn tessellation(&self) -> &[Connection] {
        &self.tessellation
    }

    fn process(&mut self, image: &Image) -> anyhow::Result<FaceLandmarkerResult> {
        let tracked = self.tracker.process(image, self.guard.mode())?;

        let mut result = FaceLandmarkerResult::default();
        for face in tracked {
            let estimate = &face.estimate;
            result
                .face_landmarks
                .push(estimate.landmarks().normalized(image.resolution()));
            if self.output_blendshapes {
                result.face_blendshapes.push(blendshapes(estimate));
            }
        }
        Ok(result)
    }
}

fn blendshapes(estimate: &FaceEstimate) -> Vec<Category> {
    estimate
        .tongue_out()
        .map(|score| Category {
            index: 0,
            score,
            category_name: "tongueOut".to_string(),
        })
        .into_iter()
        .collect()
}

impl Landmarker for FaceLandmarker {
    type Result = FaceLandmarkerResult;

    fn detect(&mut self, image: &Image) -> anyhow::Result<FaceLandmarkerResult> {
        self.guard.check_image("detect")?;
        self.process(image)
    }

    fn detect_for_video(
        &mut self,
        image: &Image,
        timestamp_ms: u64,
    ) -> anyhow::Result<FaceLandmarkerResult> {
        self.guard.check_video("detect_for_video", timestamp_ms)?;
        self.process(image)
    }

    fn timers(&self) -> Vec<&Timer> {
        self.tracker.timers().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blendshapes_without_tongue() {
        assert!(blendshapes(&FaceEstimate::default()).is_empty());
    }

    #[test]
    fn options() {
        let options = FaceLandmarkerOptions::new(BaseOptions::new("face"))
            .with_running_mode(RunningMode::Video)
            .with_face_blendshapes(true);
        assert_eq!(options.num_faces, 1);
        assert!(options.output_face_blendshapes);
        assert_eq!(options.running_mode, RunningMode::Video);
    }
}
