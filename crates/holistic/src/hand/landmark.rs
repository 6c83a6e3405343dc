//! Hand landmark prediction.

use nalgebra::{Rotation2, Vector2};

use crate::image::RotatedRect;
use crate::landmark::{rotation_between, square_roi, Confidence, Estimate, Landmarks, Network};
use crate::nn::{Cnn, CnnInputShape, ColorMapper, NeuralNetwork, Outputs};

use super::Handedness;

pub const NUM_LANDMARKS: usize = 21;

/// Landmark results estimated by [`HandLandmarkNetwork`].
#[derive(Clone)]
pub struct HandEstimate {
    landmarks: Landmarks,
    world: Landmarks,
    presence: f32,
    raw_handedness: f32,
}

impl Default for HandEstimate {
    fn default() -> Self {
        Self {
            landmarks: Landmarks::new(NUM_LANDMARKS),
            world: Landmarks::new(NUM_LANDMARKS),
            presence: 0.0,
            raw_handedness: 0.0,
        }
    }
}

impl HandEstimate {
    /// Returns a landmark's position in the input image's coordinate system.
    pub fn landmark_position(&self, index: LandmarkIdx) -> [f32; 3] {
        self.landmarks.positions()[index as usize]
    }

    /// Returns the world landmarks, in meters, relative to the hand's geometric center.
    ///
    /// The landmarks are aligned with the RoI the hand was estimated in, not with the image.
    pub fn world_landmarks(&self) -> &Landmarks {
        &self.world
    }

    /// Computes the clockwise rotation of the palm compared to an upright position.
    ///
    /// A rotation of 0° means that fingers are pointed upwards.
    pub fn rotation_radians(&self) -> f32 {
        let [wx, wy, _] = self.landmark_position(LandmarkIdx::Wrist);
        let [fx, fy, _] = self.landmark_position(LandmarkIdx::MiddleFingerMcp);
        rotation_between([wx, wy], [fx, fy], 0.0)
    }

    /// Returns the estimated handedness of the hand in the image.
    ///
    /// This assumes that the camera image is passed in as-is, and the returned value should only be
    /// relied on when the `presence` is over some threshold.
    pub fn handedness(&self) -> Handedness {
        if self.raw_handedness > 0.5 {
            Handedness::Right
        } else {
            Handedness::Left
        }
    }

    /// Returns the probability of the reported [`Handedness`].
    pub fn handedness_score(&self) -> f32 {
        match self.handedness() {
            Handedness::Right => self.raw_handedness,
            Handedness::Left => 1.0 - self.raw_handedness,
        }
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

impl Estimate for HandEstimate {
    fn landmarks(&self) -> &Landmarks {
        &self.landmarks
    }

    fn landmarks_mut(&mut self) -> &mut Landmarks {
        &mut self.landmarks
    }

    fn angle_radians(&self) -> Option<f32> {
        Some(self.rotation_radians())
    }

    fn tracking_roi(&self) -> Option<RotatedRect> {
        let angle = self.rotation_radians();
        let points = TRACKING_LANDMARKS.iter().map(|&idx| {
            let [x, y, _] = self.landmark_position(idx);
            [x, y]
        });
        let rect = RotatedRect::bounding(angle, points)?;
        Some(square_roi(rect, 2.0, -0.1))
    }
}

impl Confidence for HandEstimate {
    fn confidence(&self) -> f32 {
        self.presence
    }
}

/// Names for the hand pose landmarks.
///
/// # Terminology
///
/// - **CMC**: [Carpometacarpal joint], the lowest joint of the thumb, located near the wrist.
/// - **MCP**: [Metacarpophalangeal joint], the lower joint forming the knuckles near the palm of
///   the hand.
/// - **PIP**: Proximal Interphalangeal joint, the joint between the MCP and DIP.
/// - **DIP**: Distal Interphalangeal joint, the highest joint of a finger.
/// - **Tip**: This landmark is just placed on the tip of the finger, above the DIP.
///
/// [Carpometacarpal joint]: https://en.wikipedia.org/wiki/Carpometacarpal_joint
/// [Metacarpophalangeal joint]: https://en.wikipedia.org/wiki/Metacarpophalangeal_joint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LandmarkIdx {
    Wrist,
    ThumbCmc,
    ThumbMcp,
    ThumbIp,
    ThumbTip,
    IndexFingerMcp,
    IndexFingerPip,
    IndexFingerDip,
    IndexFingerTip,
    MiddleFingerMcp,
    MiddleFingerPip,
    MiddleFingerDip,
    MiddleFingerTip,
    RingFingerMcp,
    RingFingerPip,
    RingFingerDip,
    RingFingerTip,
    PinkyMcp,
    PinkyPip,
    PinkyDip,
    PinkyTip,
}

/// Landmarks whose bounding box determines the RoI in the next frame (palm and lower finger
/// joints, which are estimated more reliably than the tips).
const TRACKING_LANDMARKS: &[LandmarkIdx] = {
    use LandmarkIdx::*;
    &[
        Wrist,
        ThumbCmc,
        ThumbMcp,
        ThumbIp,
        IndexFingerMcp,
        IndexFingerPip,
        MiddleFingerMcp,
        MiddleFingerPip,
        RingFingerMcp,
        RingFingerPip,
        PinkyMcp,
        PinkyPip,
    ]
};

/// The hand landmark network.
#[derive(Clone)]
pub struct HandLandmarkNetwork {
    cnn: Cnn,
}

impl HandLandmarkNetwork {
    pub fn new(nn: NeuralNetwork) -> anyhow::Result<Self> {
        Ok(Self {
            cnn: Cnn::new(nn, CnnInputShape::NCHW, ColorMapper::linear(0.0..=1.0))?,
        })
    }
}

impl Network for HandLandmarkNetwork {
    type Output = HandEstimate;

    fn cnn(&self) -> &Cnn {
        &self.cnn
    }

    fn extract(&self, outputs: &Outputs, estimate: &mut HandEstimate) -> anyhow::Result<()> {
        extract(outputs, estimate)
    }
}

fn extract(outputs: &Outputs, estimate: &mut HandEstimate) -> anyhow::Result<()> {
    let screen_landmarks = outputs.flat(0, NUM_LANDMARKS * 3)?;
    let world_landmarks = outputs.flat(3, NUM_LANDMARKS * 3)?;

    estimate.presence = outputs.scalar(1)?;
    estimate.raw_handedness = outputs.scalar(2)?;
    estimate.landmarks.fill_from_chunks(&screen_landmarks, 3)?;
    estimate.world.fill_from_chunks(&world_landmarks, 3)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::f32::consts::FRAC_PI_2;

    use approx::assert_abs_diff_eq;
    use ndarray::Array2;

    use super::*;

    fn outputs(presence: f32, handedness: f32) -> Outputs {
        let screen = Array2::from_shape_fn((1, 63), |(_, i)| i as f32);
        let world = Array2::from_shape_fn((1, 63), |(_, i)| -(i as f32) / 100.0);
        [
            screen.into_dyn(),
            Array2::from_elem((1, 1), presence).into_dyn(),
            Array2::from_elem((1, 1), handedness).into_dyn(),
            world.into_dyn(),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn extracts_outputs() {
        let mut estimate = HandEstimate::default();
        extract(&outputs(0.9, 0.8), &mut estimate).unwrap();

        assert_eq!(estimate.confidence(), 0.9);
        assert_eq!(estimate.handedness(), Handedness::Right);
        assert_abs_diff_eq!(estimate.handedness_score(), 0.8, epsilon = 1e-6);
        assert_eq!(estimate.landmarks().positions()[1], [3.0, 4.0, 5.0]);
        assert_eq!(estimate.world_landmarks().positions()[1], [-0.03, -0.04, -0.05]);

        extract(&outputs(0.9, 0.2), &mut estimate).unwrap();
        assert_eq!(estimate.handedness(), Handedness::Left);
        assert_abs_diff_eq!(estimate.handedness_score(), 0.8, epsilon = 1e-6);
    }

    #[test]
    fn rejects_wrong_shapes() {
        let bad: Outputs = [Array2::<f32>::zeros((1, 42)).into_dyn()]
            .into_iter()
            .collect();
        assert!(extract(&bad, &mut HandEstimate::default()).is_err());
    }

    #[test]
    fn upright_hand_rotation() {
        let mut estimate = HandEstimate::default();
        let lms = estimate.landmarks_mut();
        lms.positions_mut()[LandmarkIdx::Wrist as usize] = [10.0, 20.0, 0.0];
        lms.positions_mut()[LandmarkIdx::MiddleFingerMcp as usize] = [10.0, 10.0, 0.0];
        assert_abs_diff_eq!(estimate.rotation_radians(), 0.0, epsilon = 1e-6);

        // Fingers pointing left.
        let lms = estimate.landmarks_mut();
        lms.positions_mut()[LandmarkIdx::MiddleFingerMcp as usize] = [0.0, 20.0, 0.0];
        assert_abs_diff_eq!(estimate.rotation_radians(), -FRAC_PI_2, epsilon = 1e-6);
    }

    #[test]
    fn world_rotation() {
        let mut estimate = HandEstimate::default();
        estimate.world.positions_mut()[0] = [0.0, -1.0, 0.5];
        estimate.rotate_world(FRAC_PI_2);
        let [x, y, z] = estimate.world_landmarks().positions()[0];
        assert_abs_diff_eq!(x, 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(y, 0.0, epsilon = 1e-6);
        assert_eq!(z, 0.5);
    }
}
