//! SSD-style object detection shared by the palm, face, and pose detectors.
//!
//! A [`Detector`] letterboxes the input image to the network's aspect ratio, runs the network,
//! merges overlapping candidates, and maps the survivors back into image coordinates.

pub mod nms;
pub mod ssd;

use crate::image::{ImageView, Rect, Resolution, RotatedRect};
use crate::nn::{Cnn, Outputs};
use crate::timer::Timer;

use self::nms::NonMaxSuppression;

/// A detection network together with its output decoding.
pub trait Network: Send + 'static {
    fn cnn(&self) -> &Cnn;

    /// Decodes the raw outputs, appending every candidate scoring at least `threshold`.
    ///
    /// Positions are in pixels of the network input.
    fn extract(
        &self,
        outputs: &Outputs,
        threshold: f32,
        detections: &mut Vec<Detection>,
    ) -> anyhow::Result<()>;
}

/// Runs a detection [`Network`] and suppresses duplicate candidates.
pub struct Detector {
    network: Box<dyn Network>,
    detections: Vec<Detection>,
    threshold: f32,
    nms: NonMaxSuppression,
    t_infer: Timer,
    t_decode: Timer,
    t_nms: Timer,
}

impl Detector {
    pub const DEFAULT_THRESHOLD: f32 = 0.5;

    pub fn new<N: Network>(network: N) -> Self {
        Self {
            network: Box::new(network),
            detections: Vec::new(),
            threshold: Self::DEFAULT_THRESHOLD,
            nms: NonMaxSuppression::new(),
            t_infer: Timer::new("detect"),
            t_decode: Timer::new("decode"),
            t_nms: Timer::new("nms"),
        }
    }

    pub fn input_resolution(&self) -> Resolution {
        self.network.cnn().input_resolution()
    }

    /// Sets the minimum score a candidate needs to be reported.
    pub fn set_threshold(&mut self, threshold: f32) {
        self.threshold = threshold;
    }

    /// Detects objects in `image`. The results use the coordinate system of `image`.
    pub fn detect(&mut self, image: &ImageView<'_>) -> anyhow::Result<&[Detection]> {
        self.detections.clear();

        let cnn = self.network.cnn();
        let input_res = cnn.input_resolution();
        let aspect = input_res
            .aspect_ratio()
            .ok_or_else(|| anyhow::anyhow!("detector has zero-sized input {input_res}"))?;

        // Letterbox: the view may extend past the image borders.
        let letterbox = image.rect().grow_to_fit_aspect(aspect);
        let view = image.view(letterbox);
        let outputs = self.t_infer.time(|| cnn.estimate(&view))?;
        log::trace!("detector outputs: {:?}", outputs);

        self.t_decode.time(|| {
            self.network
                .extract(&outputs, self.threshold, &mut self.detections)
        })?;

        self.t_nms.time(|| {
            let mut candidates = std::mem::take(&mut self.detections);
            self.detections.extend(self.nms.process(&mut candidates));
        });

        let scale = letterbox.width() / input_res.width() as f32;
        for det in &mut self.detections {
            det.map_from_input(scale, [letterbox.x(), letterbox.y()]);
        }

        Ok(&self.detections)
    }

    pub fn timers(&self) -> impl Iterator<Item = &Timer> + '_ {
        [&self.t_infer, &self.t_decode, &self.t_nms].into_iter()
    }
}

/// A detected object: its bounding box, a score, a rotation, and detector-specific keypoints.
///
/// Scores are expected in range 0.0 to 1.0, since [`nms::SuppressionMode::Average`] uses them as
/// weights.
#[derive(Debug, Clone)]
pub struct Detection {
    confidence: f32,
    angle: f32,
    rect: Rect,
    keypoints: Vec<Keypoint>,
}

impl Detection {
    pub fn new(confidence: f32, rect: Rect) -> Self {
        Self::with_keypoints(confidence, rect, Vec::new())
    }

    pub fn with_keypoints(confidence: f32, rect: Rect, keypoints: Vec<Keypoint>) -> Self {
        Self {
            confidence,
            angle: 0.0,
            rect,
            keypoints,
        }
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    /// Rotation of the object in radians, clockwise. 0.0 unless set by the detector.
    pub fn angle(&self) -> f32 {
        self.angle
    }

    pub fn set_angle(&mut self, angle: f32) {
        self.angle = angle;
    }

    /// Returns the axis-aligned box around the object.
    pub fn bounding_rect(&self) -> Rect {
        self.rect
    }

    /// Returns the bounding box rotated by [`Detection::angle`].
    pub fn rotated_rect(&self) -> RotatedRect {
        RotatedRect::new(self.rect, self.angle)
    }

    pub fn keypoints(&self) -> &[Keypoint] {
        &self.keypoints
    }

    /// Scales all positions by `scale`, then moves them by `offset`.
    fn map_from_input(&mut self, scale: f32, offset: [f32; 2]) {
        let [dx, dy] = offset;
        let c = self.rect.center();
        self.rect = Rect::from_center(
            c.x * scale + dx,
            c.y * scale + dy,
            self.rect.width() * scale,
            self.rect.height() * scale,
        );
        for kp in &mut self.keypoints {
            kp.x = kp.x * scale + dx;
            kp.y = kp.y * scale + dy;
        }
    }
}

/// A detector-specific 2D point, like a palm's wrist or a face's eye.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    x: f32,
    y: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn x(&self) -> f32 {
        self.x
    }

    pub fn y(&self) -> f32 {
        self.y
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_from_input() {
        let mut det = Detection::with_keypoints(
            0.9,
            Rect::from_center(64.0, 32.0, 16.0, 8.0),
            vec![Keypoint::new(60.0, 30.0)],
        );
        det.map_from_input(2.0, [-10.0, 5.0]);

        let rect = det.bounding_rect();
        assert_eq!([rect.center().x, rect.center().y], [118.0, 69.0]);
        assert_eq!([rect.width(), rect.height()], [32.0, 16.0]);
        assert_eq!(det.keypoints(), &[Keypoint::new(110.0, 65.0)]);
    }
}
