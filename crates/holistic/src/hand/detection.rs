//! Palm detection.

use once_cell::sync::Lazy;

use crate::detection::{
    ssd::{self, AnchorParams, Anchors, LayerInfo},
    Detection, Network,
};
use crate::image::RotatedRect;
use crate::landmark::{rotation_between, square_roi};
use crate::nn::{Cnn, CnnInputShape, ColorMapper, NeuralNetwork, Outputs};

/// A keypoint of a palm [`Detection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keypoint {
    Wrist = 0,
    IndexFingerMcp = 1,
    MiddleFingerMcp = 2,
    RingFingerMcp = 3,
    PinkyMcp = 4,
    ThumbCmc = 5,
    ThumbMcp = 6,
}

const NUM_KEYPOINTS: usize = 7;

/// The palm detection network.
pub struct PalmNetwork {
    cnn: Cnn,
}

impl PalmNetwork {
    pub fn new(nn: NeuralNetwork) -> anyhow::Result<Self> {
        Ok(Self {
            cnn: Cnn::new(nn, CnnInputShape::NCHW, ColorMapper::linear(0.0..=1.0))?,
        })
    }
}

impl Network for PalmNetwork {
    fn cnn(&self) -> &Cnn {
        &self.cnn
    }

    fn extract(
        &self,
        outputs: &Outputs,
        threshold: f32,
        detections: &mut Vec<Detection>,
    ) -> anyhow::Result<()> {
        static ANCHORS: Lazy<Anchors> = Lazy::new(|| {
            Anchors::calculate(&AnchorParams {
                layers: &[LayerInfo::new(2, 24, 24), LayerInfo::new(6, 12, 12)],
            })
        });

        let start = detections.len();
        ssd::decode(
            &ANCHORS,
            self.cnn.input_resolution(),
            NUM_KEYPOINTS,
            outputs,
            threshold,
            detections,
        )?;

        for det in &mut detections[start..] {
            let angle = palm_angle(det);
            det.set_angle(angle);
        }
        Ok(())
    }
}

/// Computes the clockwise palm rotation, 0° meaning that the fingers point upwards.
fn palm_angle(det: &Detection) -> f32 {
    let wrist = det.keypoints()[Keypoint::Wrist as usize];
    let finger = det.keypoints()[Keypoint::MiddleFingerMcp as usize];
    rotation_between([wrist.x(), wrist.y()], [finger.x(), finger.y()], 0.0)
}

/// Computes the hand landmark RoI for a palm detection.
///
/// The palm rectangle is turned into a square that covers the whole hand, including the fingers.
pub fn detection_roi(det: &Detection) -> RotatedRect {
    square_roi(det.rotated_rect(), 2.6, -0.5)
}

#[cfg(test)]
mod tests {
    use std::f32::consts::FRAC_PI_2;

    use approx::assert_abs_diff_eq;

    use super::*;
    use crate::{detection::Keypoint as Kp, image::Rect};

    fn palm(wrist: [f32; 2], finger: [f32; 2]) -> Detection {
        let mut keypoints = vec![Kp::new(0.0, 0.0); NUM_KEYPOINTS];
        keypoints[Keypoint::Wrist as usize] = Kp::new(wrist[0], wrist[1]);
        keypoints[Keypoint::MiddleFingerMcp as usize] = Kp::new(finger[0], finger[1]);
        Detection::with_keypoints(0.9, Rect::from_center(50.0, 50.0, 20.0, 20.0), keypoints)
    }

    #[test]
    fn upright_palm() {
        let mut det = palm([50.0, 60.0], [50.0, 40.0]);
        assert_abs_diff_eq!(palm_angle(&det), 0.0, epsilon = 1e-6);

        det.set_angle(palm_angle(&det));
        let roi = detection_roi(&det);
        assert_abs_diff_eq!(roi.rect().width(), 52.0, epsilon = 1e-4);
        // Shifted towards the fingers.
        assert_abs_diff_eq!(roi.center().x, 50.0, epsilon = 1e-4);
        assert_abs_diff_eq!(roi.center().y, 40.0, epsilon = 1e-4);
    }

    #[test]
    fn sideways_palm() {
        // Fingers pointing right.
        let det = palm([40.0, 50.0], [60.0, 50.0]);
        assert_abs_diff_eq!(palm_angle(&det), FRAC_PI_2, epsilon = 1e-6);
    }
}
