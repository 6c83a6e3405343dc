//! Merging of overlapping detections.
//!
//! SSD networks report many candidates for each object, one per nearby anchor. Candidates whose
//! boxes overlap more than an IoU threshold are either dropped ([`SuppressionMode::Remove`]) or
//! merged into their confidence-weighted mean ([`SuppressionMode::Average`], the default, which
//! jitters less from frame to frame).

use crate::{image::Rect, num::TotalF32};

use super::{Detection, Keypoint};

/// A non-maximum suppression algorithm.
pub struct NonMaxSuppression {
    iou_thresh: f32,
    avg_buf: Vec<Detection>,
    out_buf: Vec<Detection>,
    mode: SuppressionMode,
}

impl NonMaxSuppression {
    /// The default intersection-over-union threshold used to determine if two detections overlap.
    pub const DEFAULT_IOU_THRESH: f32 = 0.3;

    /// Creates a new non-maximum suppressor using [`SuppressionMode::Average`] and
    /// [`Self::DEFAULT_IOU_THRESH`].
    pub fn new() -> Self {
        Self {
            iou_thresh: Self::DEFAULT_IOU_THRESH,
            avg_buf: Vec::new(),
            out_buf: Vec::new(),
            mode: SuppressionMode::Average,
        }
    }

    /// Sets the intersection-over-union threshold to consider two detections as overlapping.
    pub fn set_iou_thresh(&mut self, iou_thresh: f32) {
        self.iou_thresh = iou_thresh;
    }

    /// Sets the suppression mode.
    pub fn set_mode(&mut self, mode: SuppressionMode) {
        self.mode = mode;
    }

    /// Performs non-maximum suppression on `detections`.
    ///
    /// `detections` will be emptied in the process. The filtered detections are returned as an
    /// iterator, highest confidence first.
    pub fn process(
        &mut self,
        detections: &mut Vec<Detection>,
    ) -> impl Iterator<Item = Detection> + '_ {
        self.out_buf.clear();

        // Ascending, so `pop` yields the best remaining candidate.
        detections.sort_unstable_by_key(|det| TotalF32(det.confidence));

        while let Some(seed) = detections.pop() {
            match self.mode {
                SuppressionMode::Remove => {
                    detections.retain(|other| {
                        seed.bounding_rect().iou(&other.bounding_rect()) < self.iou_thresh
                    });
                    self.out_buf.push(seed);
                }
                SuppressionMode::Average => {
                    self.avg_buf.clear();
                    let mut i = 0;
                    while i < detections.len() {
                        if seed.bounding_rect().iou(&detections[i].bounding_rect())
                            >= self.iou_thresh
                        {
                            self.avg_buf.push(detections.swap_remove(i));
                        } else {
                            i += 1;
                        }
                    }
                    let averaged = average(&seed, &self.avg_buf);
                    self.out_buf.push(averaged);
                }
            }
        }

        self.avg_buf.clear();
        self.out_buf.drain(..)
    }
}

impl Default for NonMaxSuppression {
    fn default() -> Self {
        Self::new()
    }
}

/// Computes the confidence-weighted average of `seed` and its `overlapping` detections.
///
/// The result keeps the confidence of `seed`. Detections whose keypoint count differs from the
/// seed's only contribute their rectangle.
fn average(seed: &Detection, overlapping: &[Detection]) -> Detection {
    let mut divisor = 0.0;
    let mut acc_rect = [0.0; 4];
    let mut acc_angle = 0.0;
    let mut kp_divisor = 0.0;
    let mut acc_kps = vec![[0.0f32; 2]; seed.keypoints().len()];

    for det in std::iter::once(seed).chain(overlapping) {
        let factor = det.confidence();
        divisor += factor;

        let rect = det.bounding_rect();
        let center = rect.center();
        for (acc, v) in acc_rect
            .iter_mut()
            .zip([center.x, center.y, rect.width(), rect.height()])
        {
            *acc += v * factor;
        }
        acc_angle += det.angle() * factor;

        if det.keypoints().len() == acc_kps.len() {
            kp_divisor += factor;
            for (acc, kp) in acc_kps.iter_mut().zip(det.keypoints()) {
                acc[0] += kp.x() * factor;
                acc[1] += kp.y() * factor;
            }
        }
    }

    if divisor <= 0.0 {
        return seed.clone();
    }

    let [x, y, w, h] = acc_rect.map(|v| v / divisor);
    let keypoints = acc_kps
        .into_iter()
        .map(|[x, y]| Keypoint::new(x / kp_divisor, y / kp_divisor))
        .collect();
    let mut acc = Detection::with_keypoints(
        seed.confidence(),
        Rect::from_center(x, y, w, h),
        keypoints,
    );
    acc.set_angle(acc_angle / divisor);
    acc
}

/// Describes how [`NonMaxSuppression`] should deal with overlapping detections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum SuppressionMode {
    /// Remove overlapping detections, only retain the detection with highest confidence score.
    Remove,

    /// Compute a confidence-weighted average of overlapping detections.
    Average,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nms_suppresses_non_maximum() {
        let mut nms = NonMaxSuppression::new();
        nms.set_mode(SuppressionMode::Remove);

        let rect = Rect::from_center(0.0, 0.0, 1.0, 1.0);
        let a = Detection::new(0.6, rect);
        let b = Detection::new(0.55, rect.scale(1.5));
        let detections = nms.process(&mut vec![b, a]).collect::<Vec<_>>();
        assert_eq!(detections.len(), 1);

        let d = &detections[0];
        assert_eq!(d.confidence(), 0.6);
        assert_eq!(d.bounding_rect(), rect);
    }

    #[test]
    fn nms_ignores_nonoverlapping() {
        let mut nms = NonMaxSuppression::new();
        nms.set_mode(SuppressionMode::Remove);

        let a = Detection::new(1.0, Rect::from_center(0.0, 0.0, 1.0, 1.0));
        let b = Detection::new(0.9, Rect::from_center(5.0, 0.0, 1.0, 1.0));

        let detections = nms.process(&mut vec![a, b]).collect::<Vec<_>>();
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].confidence(), 1.0);
    }

    #[test]
    fn nma_averages_detections() {
        let mut nms = NonMaxSuppression::new();
        nms.set_iou_thresh(0.0);

        let rect = Rect::from_center(-1.0, 3.0, 1.0, 1.0);
        let a = Detection::with_keypoints(1.0, rect, vec![Keypoint::new(0.0, 0.0)]);
        let b = Detection::with_keypoints(0.5, rect.scale(4.0), vec![Keypoint::new(3.0, 3.0)]);
        let detections = nms.process(&mut vec![a, b]).collect::<Vec<_>>();
        assert_eq!(detections.len(), 1);

        let d = &detections[0];
        let rect = d.bounding_rect();
        assert_eq!(d.confidence(), 1.0);
        assert_eq!(rect.center().x, -1.0);
        assert_eq!(rect.center().y, 3.0);
        assert_eq!(rect.width(), 2.0);
        assert_eq!(rect.height(), 2.0);
        assert_eq!(d.keypoints(), &[Keypoint::new(1.0, 1.0)]);
    }

    #[test]
    fn removed_output_does_not_overlap() {
        let mut rng = fastrand::Rng::with_seed(0x5eed_1e55);
        let mut detections = (0..200)
            .map(|_| {
                let rect = Rect::from_center(
                    rng.f32() * 10.0,
                    rng.f32() * 10.0,
                    0.5 + rng.f32() * 2.0,
                    0.5 + rng.f32() * 2.0,
                );
                Detection::new(rng.f32(), rect)
            })
            .collect::<Vec<_>>();

        let mut nms = NonMaxSuppression::new();
        nms.set_mode(SuppressionMode::Remove);
        let out = nms.process(&mut detections).collect::<Vec<_>>();
        assert!(!out.is_empty());
        assert!(detections.is_empty());

        for (i, a) in out.iter().enumerate() {
            for b in &out[i + 1..] {
                assert!(a.confidence() >= b.confidence());
                let iou = a.bounding_rect().iou(&b.bounding_rect());
                assert!(iou < NonMaxSuppression::DEFAULT_IOU_THRESH, "{iou}");
            }
        }
    }
}
