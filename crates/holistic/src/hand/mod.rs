//! Hand detection and landmark estimation.
//!
//! [`HandLandmarker`] finds hands with the palm detector, then tracks each hand with the hand
//! landmark network until it is lost.

pub mod detection;
pub mod landmark;

use std::fmt;

use crate::detection::Detector;
use crate::image::Image;
use crate::landmark::{
    Category, Estimate, Estimator, InstanceTracker, Landmark, LandmarkTracker, Landmarker,
    ModeGuard, NormalizedLandmark, RunningMode,
};
use crate::runtime::{BaseOptions, VisionRuntime};
use crate::timer::Timer;

use self::detection::PalmNetwork;
use self::landmark::{HandEstimate, HandLandmarkNetwork, LandmarkIdx};

/// Which hand a detected hand is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handedness {
    Left,
    Right,
}

impl Handedness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Handedness::Left => "Left",
            Handedness::Right => "Right",
        }
    }
}

impl fmt::Display for Handedness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The handedness classification of one hand.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HandednessCategory {
    pub handedness: Handedness,
    pub score: f32,
}

impl HandednessCategory {
    pub fn new(handedness: Handedness, score: f32) -> Self {
        Self { handedness, score }
    }

    /// Returns the classification as a generic [`Category`].
    pub fn category(&self) -> Category {
        Category {
            index: self.handedness as usize,
            score: self.score,
            category_name: self.handedness.as_str().to_string(),
        }
    }
}

/// Pairs of hand landmarks that are connected in the hand skeleton.
pub const HAND_CONNECTIONS: &[(LandmarkIdx, LandmarkIdx)] = {
    use LandmarkIdx::*;
    &[
        // Thumb:
        (Wrist, ThumbCmc),
        (ThumbCmc, ThumbMcp),
        (ThumbMcp, ThumbIp),
        (ThumbIp, ThumbTip),
        // Index:
        (Wrist, IndexFingerMcp),
        (IndexFingerMcp, IndexFingerPip),
        (IndexFingerPip, IndexFingerDip),
        (IndexFingerDip, IndexFingerTip),
        // Middle:
        (IndexFingerMcp, MiddleFingerMcp),
        (MiddleFingerMcp, MiddleFingerPip),
        (MiddleFingerPip, MiddleFingerDip),
        (MiddleFingerDip, MiddleFingerTip),
        // Ring:
        (MiddleFingerMcp, RingFingerMcp),
        (RingFingerMcp, RingFingerPip),
        (RingFingerPip, RingFingerDip),
        (RingFingerDip, RingFingerTip),
        // Pinky:
        (RingFingerMcp, PinkyMcp),
        (Wrist, PinkyMcp),
        (PinkyMcp, PinkyPip),
        (PinkyPip, PinkyDip),
        (PinkyDip, PinkyTip),
    ]
};

/// Options for creating a [`HandLandmarker`].
#[derive(Debug, Clone)]
pub struct HandLandmarkerOptions {
    pub base_options: BaseOptions,
    pub running_mode: RunningMode,
    /// Maximum number of hands to detect.
    pub num_hands: usize,
    /// Minimum palm detection confidence for a hand to be picked up.
    pub min_hand_detection_confidence: f32,
    /// Minimum hand presence score in [`RunningMode::Image`].
    pub min_hand_presence_confidence: f32,
    /// Minimum hand presence score to keep tracking a hand in [`RunningMode::Video`].
    pub min_tracking_confidence: f32,
}

impl HandLandmarkerOptions {
    /// Bundle containing `palm_detection.onnx` and `hand_landmark.onnx`.
    pub const DEFAULT_BUNDLE: &'static str = "hand_landmarker";

    pub fn new(base_options: BaseOptions) -> Self {
        Self {
            base_options,
            running_mode: RunningMode::Image,
            num_hands: 1,
            min_hand_detection_confidence: 0.5,
            min_hand_presence_confidence: 0.5,
            min_tracking_confidence: 0.5,
        }
    }

    pub fn with_running_mode(mut self, mode: RunningMode) -> Self {
        self.running_mode = mode;
        self
    }

    pub fn with_num_hands(mut self, num_hands: usize) -> Self {
        self.num_hands = num_hands;
        self
    }
}

/// Hands found in one frame.
///
/// All lists are indexed by hand.
#[derive(Debug, Clone, Default)]
pub struct HandLandmarkerResult {
    /// 21 landmarks per hand, in normalized image coordinates.
    pub landmarks: Vec<Vec<NormalizedLandmark>>,
    /// 21 landmarks per hand, in meters, relative to the hand's geometric center.
    pub world_landmarks: Vec<Vec<Landmark>>,
    pub handedness: Vec<HandednessCategory>,
}

impl HandLandmarkerResult {
    pub fn is_empty(&self) -> bool {
        self.landmarks.is_empty()
    }
}

/// Detects and tracks hand landmarks.
pub struct HandLandmarker {
    guard: ModeGuard,
    tracker: InstanceTracker<HandEstimate>,
}

impl HandLandmarker {
    /// Loads the hand networks from the bundle named by `options` and creates the landmarker.
    pub fn create_from_options(
        runtime: &VisionRuntime,
        options: HandLandmarkerOptions,
    ) -> anyhow::Result<Self> {
        let base = &options.base_options;
        let palm = runtime.load_network(base, "palm_detection.onnx", None)?;
        let landmarks = runtime.load_network(base, "hand_landmark.onnx", None)?;

        let mut detector = Detector::new(PalmNetwork::new(palm)?);
        detector.set_threshold(options.min_hand_detection_confidence);

        let network = HandLandmarkNetwork::new(landmarks)?;
        let loss_threshold = match options.running_mode {
            RunningMode::Image => options.min_hand_presence_confidence,
            RunningMode::Video => options.min_tracking_confidence,
        };
        let make_tracker = move || {
            let mut tracker = LandmarkTracker::new(Estimator::new(network.clone()));
            tracker.set_loss_threshold(loss_threshold);
            tracker
        };

        log::info!(
            "hand landmarker ready ({:?} mode, up to {} hands)",
            options.running_mode,
            options.num_hands,
        );
        Ok(Self {
            guard: ModeGuard::new(options.running_mode),
            tracker: InstanceTracker::new(
                detector,
                make_tracker,
                detection::detection_roi,
                options.num_hands,
            ),
        })
    }

    fn process(&mut self, image: &Image) -> anyhow::Result<HandLandmarkerResult> {
        let tracked = self.tracker.process(image, self.guard.mode())?;

        let mut result = HandLandmarkerResult::default();
        for mut hand in tracked {
            hand.estimate.rotate_world(hand.view_rect.rotation_radians());
            let estimate = &hand.estimate;
            result
                .landmarks
                .push(estimate.landmarks().normalized(image.resolution()));
            result
                .world_landmarks
                .push(estimate.world_landmarks().iter().collect());
            result.handedness.push(HandednessCategory::new(
                estimate.handedness(),
                estimate.handedness_score(),
            ));
        }
        Ok(result)
    }
}

impl Landmarker for HandLandmarker {
    type Result = HandLandmarkerResult;

    fn detect(&mut self, image: &Image) -> anyhow::Result<HandLandmarkerResult> {
        self.guard.check_image("detect")?;
        self.process(image)
    }

    fn detect_for_video(
        &mut self,
        image: &Image,
        timestamp_ms: u64,
    ) -> anyhow::Result<HandLandmarkerResult> {
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
    fn connections_cover_all_landmarks() {
        let mut seen = [false; landmark::NUM_LANDMARKS];
        for &(a, b) in HAND_CONNECTIONS {
            seen[a as usize] = true;
            seen[b as usize] = true;
        }
        assert!(seen.iter().all(|&s| s));
        assert_eq!(HAND_CONNECTIONS.len(), 21);
    }

    #[test]
    fn handedness_category() {
        let cat = HandednessCategory::new(Handedness::Right, 0.75).category();
        assert_eq!(cat.index, 1);
        assert_eq!(cat.category_name, "Right");
        assert_eq!(Handedness::Left.to_string(), "Left");
    }

    #[test]
    fn missing_bundle_fails() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = VisionRuntime::resolve(&crate::runtime::RuntimeOptions {
            model_dir: dir.path().to_path_buf(),
            model_url: None,
        })
        .unwrap();
        let options = HandLandmarkerOptions::new(BaseOptions::new("hand_landmarker"));
        assert!(HandLandmarker::create_from_options(&runtime, options).is_err());
    }
}
