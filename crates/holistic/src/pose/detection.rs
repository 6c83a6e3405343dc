//! Human body detection.

use once_cell::sync::Lazy;

use crate::detection::{
    ssd::{self, AnchorParams, Anchors, LayerInfo},
    Detection, Network,
};
use crate::image::RotatedRect;
use crate::nn::{Cnn, CnnInputShape, ColorMapper, NeuralNetwork, Outputs};

use super::body_roi;

/// Keypoints estimated by the detection network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keypoint {
    /// Center between the hips.
    Hips = 0,
    /// Together with [`Keypoint::Hips`], describes a circle enclosing the whole body.
    FullBodyScale = 1,
    /// Center between the shoulders.
    Shoulders = 2,
    /// Together with [`Keypoint::Shoulders`], describes a circle enclosing the upper body.
    UpperBodyScale = 3,
}

const NUM_KEYPOINTS: usize = 4;

/// Body pose detection network.
///
/// This network detects human bodies and computes several keypoints documented in [`Keypoint`].
pub struct PoseDetectionNetwork {
    cnn: Cnn,
}

impl PoseDetectionNetwork {
    pub fn new(nn: NeuralNetwork) -> anyhow::Result<Self> {
        Ok(Self {
            cnn: Cnn::new(nn, CnnInputShape::NCHW, ColorMapper::linear(-1.0..=1.0))?,
        })
    }
}

impl Network for PoseDetectionNetwork {
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
                layers: &[
                    LayerInfo::new(2, 28, 28),
                    LayerInfo::new(2, 14, 14),
                    LayerInfo::new(6, 7, 7),
                ],
            })
        });

        ssd::decode(
            &ANCHORS,
            self.cnn.input_resolution(),
            NUM_KEYPOINTS,
            outputs,
            threshold,
            detections,
        )
    }
}

/// Computes the pose landmark RoI for a body detection.
pub fn detection_roi(det: &Detection) -> RotatedRect {
    let point = |kp: Keypoint| {
        let kp = det.keypoints()[kp as usize];
        [kp.x(), kp.y()]
    };
    body_roi(point(Keypoint::Hips), point(Keypoint::FullBodyScale))
}
