//! Face mesh landmark prediction.
//!
//! The network estimates 478 landmarks: 468 covering the face surface, followed by 5 landmarks
//! for each iris.

use std::f32::consts::FRAC_PI_2;

use crate::image::RotatedRect;
use crate::landmark::{rotation_between, square_roi, Confidence, Estimate, Landmarks, Network};
use crate::nn::{Cnn, CnnInputShape, ColorMapper, NeuralNetwork, Outputs};
use crate::num::sigmoid;

pub const NUM_LANDMARKS: usize = 478;

/// Outer corner of the right eye (from the perspective of the person in the image).
const RIGHT_EYE_OUTER_CORNER: usize = 33;
/// Outer corner of the left eye.
const LEFT_EYE_OUTER_CORNER: usize = 263;

/// Landmark results estimated by [`FaceMeshNetwork`].
#[derive(Clone)]
pub struct FaceEstimate {
    landmarks: Landmarks,
    face_flag: f32,
    tongue_out: Option<f32>,
}

impl Default for FaceEstimate {
    fn default() -> Self {
        Self {
            landmarks: Landmarks::new(NUM_LANDMARKS),
            face_flag: 0.0,
            tongue_out: None,
        }
    }
}

impl FaceEstimate {
    /// Returns the `tongueOut` blendshape score, if the network produces one.
    #[inline]
    pub fn tongue_out(&self) -> Option<f32> {
        self.tongue_out
    }

    /// Computes the clockwise face rotation. 0° means that the eyes are level.
    pub fn rotation_radians(&self) -> f32 {
        let [rx, ry, _] = self.landmarks.positions()[RIGHT_EYE_OUTER_CORNER];
        let [lx, ly, _] = self.landmarks.positions()[LEFT_EYE_OUTER_CORNER];
        rotation_between([rx, ry], [lx, ly], FRAC_PI_2)
    }
}

impl Estimate for FaceEstimate {
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
        let points = self.landmarks.positions().iter().map(|&[x, y, _]| [x, y]);
        let rect = RotatedRect::bounding(self.rotation_radians(), points)?;
        Some(square_roi(rect, 1.5, 0.0))
    }
}

impl Confidence for FaceEstimate {
    fn confidence(&self) -> f32 {
        self.face_flag
    }
}

/// Estimates facial landmarks on a cropped image of a mostly upright face.
#[derive(Clone)]
pub struct FaceMeshNetwork {
    cnn: Cnn,
}

impl FaceMeshNetwork {
    pub fn new(nn: NeuralNetwork) -> anyhow::Result<Self> {
        Ok(Self {
            cnn: Cnn::new(nn, CnnInputShape::NCHW, ColorMapper::linear(0.0..=1.0))?,
        })
    }
}

impl Network for FaceMeshNetwork {
    type Output = FaceEstimate;

    fn cnn(&self) -> &Cnn {
        &self.cnn
    }

    fn extract(&self, outputs: &Outputs, estimate: &mut FaceEstimate) -> anyhow::Result<()> {
        extract(outputs, estimate)
    }
}

fn extract(outputs: &Outputs, estimate: &mut FaceEstimate) -> anyhow::Result<()> {
    let landmarks = outputs.flat(0, NUM_LANDMARKS * 3)?;
    estimate.landmarks.fill_from_chunks(&landmarks, 3)?;
    estimate.face_flag = sigmoid(outputs.scalar(1)?);
    estimate.tongue_out = match outputs.len() {
        0..=2 => None,
        _ => Some(outputs.scalar(2)?),
    };
    Ok(())
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::{ArrayD, IxDyn};

    use super::*;

    #[test]
    fn extracts_outputs() {
        let mesh = ArrayD::from_shape_fn(IxDyn(&[1, 1, 1, NUM_LANDMARKS * 3]), |idx| idx[3] as f32);
        let flag = ArrayD::zeros(IxDyn(&[1, 1, 1, 1]));
        let tongue = ArrayD::from_elem(IxDyn(&[1, 1]), 0.25);

        let mut estimate = FaceEstimate::default();
        let outputs: Outputs = [mesh.clone(), flag.clone()].into_iter().collect();
        extract(&outputs, &mut estimate).unwrap();
        assert_abs_diff_eq!(estimate.confidence(), 0.5);
        assert_eq!(estimate.tongue_out(), None);
        assert_eq!(estimate.landmarks().positions()[2], [6.0, 7.0, 8.0]);

        let outputs: Outputs = [mesh, flag, tongue].into_iter().collect();
        extract(&outputs, &mut estimate).unwrap();
        assert_eq!(estimate.tongue_out(), Some(0.25));
    }

    #[test]
    fn level_eyes() {
        let mut estimate = FaceEstimate::default();
        let positions = estimate.landmarks_mut().positions_mut();
        positions[RIGHT_EYE_OUTER_CORNER] = [10.0, 50.0, 0.0];
        positions[LEFT_EYE_OUTER_CORNER] = [90.0, 50.0, 0.0];
        assert_abs_diff_eq!(estimate.rotation_radians(), 0.0, epsilon = 1e-6);

        // Head tilted so that the left eye is lower.
        let positions = estimate.landmarks_mut().positions_mut();
        positions[LEFT_EYE_OUTER_CORNER] = [50.0, 90.0, 0.0];
        assert_abs_diff_eq!(
            estimate.rotation_radians(),
            std::f32::consts::FRAC_PI_4,
            epsilon = 1e-6
        );
    }
}
