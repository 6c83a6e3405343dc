//! Face detection module.
//!
//! This uses the short-range "BlazeFace" network, which works best for faces within about 2 meters
//! of the camera.

use std::f32::consts::FRAC_PI_2;

use once_cell::sync::Lazy;

use crate::detection::{
    ssd::{self, AnchorParams, Anchors, LayerInfo},
    Detection, Network,
};
use crate::image::RotatedRect;
use crate::landmark::{rotation_between, square_roi};
use crate::nn::{Cnn, CnnInputShape, ColorMapper, NeuralNetwork, Outputs};

/// A keypoint of a face [`Detection`].
///
/// Left and right are from the perspective of the person in the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keypoint {
    RightEye = 0,
    LeftEye = 1,
    NoseTip = 2,
    Mouth = 3,
    RightEarTragion = 4,
    LeftEarTragion = 5,
}

const NUM_KEYPOINTS: usize = 6;

/// The short-range face detection network.
pub struct FaceDetectionNetwork {
    cnn: Cnn,
}

impl FaceDetectionNetwork {
    pub fn new(nn: NeuralNetwork) -> anyhow::Result<Self> {
        Ok(Self {
            cnn: Cnn::new(nn, CnnInputShape::NCHW, ColorMapper::linear(-1.0..=1.0))?,
        })
    }
}

impl Network for FaceDetectionNetwork {
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
                layers: &[LayerInfo::new(2, 16, 16), LayerInfo::new(6, 8, 8)],
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
            let right = det.keypoints()[Keypoint::RightEye as usize];
            let left = det.keypoints()[Keypoint::LeftEye as usize];
            let angle = rotation_between([right.x(), right.y()], [left.x(), left.y()], FRAC_PI_2);
            det.set_angle(angle);
        }
        Ok(())
    }
}

/// Computes the face mesh RoI for a face detection.
pub fn detection_roi(det: &Detection) -> RotatedRect {
    square_roi(det.rotated_rect(), 1.5, 0.0)
}
