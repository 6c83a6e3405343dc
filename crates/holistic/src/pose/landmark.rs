//! Body pose landmark prediction.

use itertools::Itertools;
use nalgebra::{Rotation2, Vector2};

use crate::image::RotatedRect;
use crate::landmark::{Confidence, Estimate, Landmark, Landmarks, Network};
use crate::nn::{Cnn, CnnInputShape, ColorMapper, NeuralNetwork, Outputs};
use crate::num::sigmoid;

use super::body_roi;

/// Number of reported pose landmarks (see [`LandmarkIdx`]).
pub const NUM_LANDMARKS: usize = 33;

/// The network additionally estimates auxiliary landmarks used for tracking.
const NUM_AUX_LANDMARKS: usize = 6;

const TOTAL_LANDMARKS: usize = NUM_LANDMARKS + NUM_AUX_LANDMARKS;

/// Auxiliary landmark at the center of the hips.
const AUX_HIPS: usize = NUM_LANDMARKS;
/// Auxiliary landmark that, together with [`AUX_HIPS`], encloses the whole body.
const AUX_FULL_BODY_SCALE: usize = NUM_LANDMARKS + 1;

#[derive(Clone)]
pub struct PoseEstimate {
    pose_presence: f32,
    landmarks: Landmarks,
    world: Landmarks,
}

impl Default for PoseEstimate {
    fn default() -> Self {
        Self {
            pose_presence: 0.0,
            landmarks: Landmarks::new(TOTAL_LANDMARKS),
            world: Landmarks::new(TOTAL_LANDMARKS),
        }
    }
}

impl PoseEstimate {
    /// Returns the 33 body landmarks, without the auxiliary landmarks.
    pub fn pose_landmarks(&self) -> impl Iterator<Item = Landmark> + '_ {
        self.landmarks.iter().take(NUM_LANDMARKS)
    }

    /// Returns the 33 body landmarks in world space, in meters, centered between the hips.
    pub fn world_landmarks(&self) -> impl Iterator<Item = Landmark> + '_ {
        self.world.iter().take(NUM_LANDMARKS)
    }

    pub fn get(&self, i: LandmarkIdx) -> Landmark {
        self.landmarks.get(i as usize)
    }

    #[inline]
    pub fn presence(&self) -> f32 {
        self.pose_presence
    }

    /// Rotates the world landmarks by `radians`, clockwise around the Z axis.
    pub(super) fn rotate_world(&mut self, radians: f32) {
        let rot = Rotation2::new(radians);
        for pos in self.world.positions_mut() {
            let v = rot * Vector2::new(pos[0], pos[1]);
            pos[0] = v.x;
            pos[1] = v.y;
        }
    }
}

impl Estimate for PoseEstimate {
    fn landmarks(&self) -> &Landmarks {
        &self.landmarks
    }

    fn landmarks_mut(&mut self) -> &mut Landmarks {
        &mut self.landmarks
    }

    fn tracking_roi(&self) -> Option<RotatedRect> {
        let point = |i: usize| {
            let [x, y, _] = self.landmarks.positions()[i];
            [x, y]
        };
        Some(body_roi(point(AUX_HIPS), point(AUX_FULL_BODY_SCALE)))
    }
}

impl Confidence for PoseEstimate {
    #[inline]
    fn confidence(&self) -> f32 {
        self.pose_presence
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LandmarkIdx {
    Nose = 0,
    LeftEyeInner = 1,
    LeftEye = 2,
    LeftEyeOuter = 3,
    RightEyeInner = 4,
    RightEye = 5,
    RightEyeOuter = 6,
    LeftEar = 7,
    RightEar = 8,
    MouthLeft = 9,
    MouthRight = 10,
    LeftShoulder = 11,
    RightShoulder = 12,
    LeftElbow = 13,
    RightElbow = 14,
    LeftWrist = 15,
    RightWrist = 16,
    LeftPinky = 17,
    RightPinky = 18,
    LeftIndex = 19,
    RightIndex = 20,
    LeftThumb = 21,
    RightThumb = 22,
    LeftHip = 23,
    RightHip = 24,
    LeftKnee = 25,
    RightKnee = 26,
    LeftAnkle = 27,
    RightAnkle = 28,
    LeftHeel = 29,
    RightHeel = 30,
    LeftFootIndex = 31,
    RightFootIndex = 32,
}

/// The pose landmark network.
///
/// Only the landmark, presence and world landmark outputs are computed, the segmentation mask and
/// heatmap are turned off during load (see [`PoseLandmarkNetwork::OUTPUTS`]).
#[derive(Clone)]
pub struct PoseLandmarkNetwork {
    cnn: Cnn,
}

impl PoseLandmarkNetwork {
    /// The network outputs to select when loading the network.
    pub const OUTPUTS: [usize; 3] = [0, 1, 4];

    pub fn new(nn: NeuralNetwork) -> anyhow::Result<Self> {
        Ok(Self {
            cnn: Cnn::new(nn, CnnInputShape::NCHW, ColorMapper::linear(0.0..=1.0))?,
        })
    }
}

impl Network for PoseLandmarkNetwork {
    type Output = PoseEstimate;

    fn cnn(&self) -> &Cnn {
        &self.cnn
    }

    fn extract(&self, outputs: &Outputs, estimate: &mut PoseEstimate) -> anyhow::Result<()> {
        extract(outputs, estimate)
    }
}

fn extract(outputs: &Outputs, estimate: &mut PoseEstimate) -> anyhow::Result<()> {
    // 5 values per landmark: x, y, z, visibility, presence
    let screen_landmarks = outputs.flat(0, TOTAL_LANDMARKS * 5)?;
    let world_landmarks = outputs.flat(2, TOTAL_LANDMARKS * 3)?;
    estimate.pose_presence = outputs.scalar(1)?;

    for (i, (x, y, z, visibility, presence)) in
        screen_landmarks.iter().copied().tuples().enumerate()
    {
        estimate.landmarks.set(
            i,
            Landmark::new([x, y, z])
                .with_visibility(sigmoid(visibility))
                .with_presence(sigmoid(presence)),
        );
    }
    estimate.world.fill_from_chunks(&world_landmarks, 3)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;

    use super::*;

    fn outputs() -> Outputs {
        let screen = Array2::from_shape_fn((1, TOTAL_LANDMARKS * 5), |(_, i)| match i % 5 {
            3 | 4 => 0.0,
            _ => i as f32,
        });
        let world = Array2::from_shape_fn((1, TOTAL_LANDMARKS * 3), |(_, i)| i as f32 * 0.01);
        [
            screen.into_dyn(),
            Array2::from_elem((1, 1), 0.75).into_dyn(),
            world.into_dyn(),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn extracts_outputs() {
        let mut estimate = PoseEstimate::default();
        extract(&outputs(), &mut estimate).unwrap();

        assert_eq!(estimate.presence(), 0.75);
        assert_eq!(estimate.pose_landmarks().count(), NUM_LANDMARKS);
        assert_eq!(estimate.world_landmarks().count(), NUM_LANDMARKS);

        let nose = estimate.get(LandmarkIdx::Nose);
        assert_eq!(nose.position(), [0.0, 1.0, 2.0]);
        assert_eq!(nose.visibility(), Some(0.5));
        assert_eq!(nose.presence(), Some(0.5));

        let elbow = estimate.get(LandmarkIdx::LeftElbow);
        assert_eq!(elbow.position(), [65.0, 66.0, 67.0]);
    }

    #[test]
    fn tracks_aux_landmarks() {
        let mut estimate = PoseEstimate::default();
        let positions = estimate.landmarks_mut().positions_mut();
        positions[AUX_HIPS] = [100.0, 200.0, 0.0];
        positions[AUX_FULL_BODY_SCALE] = [100.0, 120.0, 0.0];

        let roi = estimate.tracking_roi().unwrap();
        assert_eq!(roi.center().x, 100.0);
        assert_eq!(roi.center().y, 200.0);
        assert_abs_diff_eq!(roi.rect().width(), 200.0, epsilon = 1e-3);
        assert_abs_diff_eq!(roi.rotation_radians(), 0.0, epsilon = 1e-6);
    }
}
