//! Common code for visual landmark estimation.
//!
//! The pipeline for each task (hands, faces, poses) consists of an SSD [`Detector`] that finds new
//! instances, and a [`LandmarkTracker`] per instance that estimates landmarks inside a region of
//! interest (RoI) and follows the instance from frame to frame. [`InstanceTracker`] ties both
//! together.

use nalgebra::{Rotation2, Vector2};

use crate::detection::{Detection, Detector};
use crate::error::TaskError;
use crate::image::{AspectRatio, Image, ImageView, Rect, Resolution, RotatedRect};
use crate::nn::{Cnn, Outputs};
use crate::timer::Timer;

type Position = [f32; 3];

/// Processing mode of a landmarker task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunningMode {
    /// Independent still images. Every call runs the detector.
    Image,
    /// Frames of a video stream, with monotonically increasing timestamps. Instances found in one
    /// frame are tracked into the next.
    Video,
}

/// Enforces the calling conventions of a [`RunningMode`].
#[derive(Debug)]
pub struct ModeGuard {
    mode: RunningMode,
    last_timestamp: Option<u64>,
}

impl ModeGuard {
    pub fn new(mode: RunningMode) -> Self {
        Self {
            mode,
            last_timestamp: None,
        }
    }

    pub fn mode(&self) -> RunningMode {
        self.mode
    }

    /// Checks a single-image call.
    pub fn check_image(&self, call: &'static str) -> Result<(), TaskError> {
        match self.mode {
            RunningMode::Image => Ok(()),
            mode => Err(TaskError::WrongRunningMode { call, mode }),
        }
    }

    /// Checks a video-frame call and records its timestamp.
    ///
    /// Timestamps have to increase strictly from call to call.
    pub fn check_video(&mut self, call: &'static str, timestamp_ms: u64) -> Result<(), TaskError> {
        if self.mode != RunningMode::Video {
            return Err(TaskError::WrongRunningMode {
                call,
                mode: self.mode,
            });
        }
        if let Some(previous) = self.last_timestamp {
            if timestamp_ms <= previous {
                return Err(TaskError::NonMonotonicTimestamp {
                    previous,
                    current: timestamp_ms,
                });
            }
        }
        self.last_timestamp = Some(timestamp_ms);
        Ok(())
    }
}

/// A landmark detection task that turns frames into results.
pub trait Landmarker: Send + 'static {
    /// The per-frame result, holding all detected instances.
    type Result: Default + Clone + Send + 'static;

    /// Detects landmarks on a single image. Requires [`RunningMode::Image`].
    fn detect(&mut self, image: &Image) -> anyhow::Result<Self::Result>;

    /// Detects landmarks on a video frame. Requires [`RunningMode::Video`] and strictly
    /// increasing timestamps.
    fn detect_for_video(&mut self, image: &Image, timestamp_ms: u64)
        -> anyhow::Result<Self::Result>;

    /// Returns the profiling timers of this task.
    fn timers(&self) -> Vec<&Timer> {
        Vec::new()
    }
}

/// A landmark in 3D space.
///
/// Depending on where it comes from, the coordinates are normalized image coordinates (see
/// [`NormalizedLandmark`]) or world coordinates in meters.
#[derive(Debug, PartialEq, Clone, Copy, Default)]
pub struct Landmark {
    pos: Position,
    visibility: Option<f32>,
    presence: Option<f32>,
}

/// A [`Landmark`] whose X and Y coordinates are normalized to the image size (0.0 to 1.0), with Z
/// using approximately the same scale as X.
pub type NormalizedLandmark = Landmark;

impl Landmark {
    pub fn new(position: Position) -> Self {
        Self {
            pos: position,
            visibility: None,
            presence: None,
        }
    }

    pub fn with_visibility(self, visibility: f32) -> Self {
        Self {
            visibility: Some(visibility),
            ..self
        }
    }

    pub fn with_presence(self, presence: f32) -> Self {
        Self {
            presence: Some(presence),
            ..self
        }
    }

    #[inline]
    pub fn position(&self) -> Position {
        self.pos
    }

    #[inline]
    pub fn x(&self) -> f32 {
        self.pos[0]
    }

    #[inline]
    pub fn y(&self) -> f32 {
        self.pos[1]
    }

    #[inline]
    pub fn z(&self) -> f32 {
        self.pos[2]
    }

    /// Likelihood of the landmark being visible (not occluded), if the model estimates it.
    #[inline]
    pub fn visibility(&self) -> Option<f32> {
        self.visibility
    }

    /// Likelihood of the landmark being inside the image, if the model estimates it.
    #[inline]
    pub fn presence(&self) -> Option<f32> {
        self.presence
    }
}

/// A fixed-size list of landmarks, as estimated by a network.
#[derive(Debug, Clone)]
pub struct Landmarks {
    positions: Box<[Position]>,
    visibility: Option<Box<[f32]>>,
    presence: Option<Box<[f32]>>,
}

impl Landmarks {
    /// Creates a new [`Landmarks`] collection containing `len` preallocated landmarks.
    ///
    /// All landmarks will start with all coordinates at `0.0`.
    pub fn new(len: usize) -> Self {
        Self {
            positions: vec![[0.0, 0.0, 0.0]; len].into_boxed_slice(),
            visibility: None,
            presence: None,
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Landmark> + Clone + '_ {
        (0..self.positions.len()).map(|i| self.get(i))
    }

    pub fn get(&self, index: usize) -> Landmark {
        let mut lm = Landmark::new(self.positions[index]);
        if let Some(vis) = &self.visibility {
            lm = lm.with_visibility(vis[index]);
        }
        if let Some(pres) = &self.presence {
            lm = lm.with_presence(pres[index]);
        }
        lm
    }

    pub fn set(&mut self, index: usize, landmark: Landmark) {
        let len = self.positions.len();
        self.positions[index] = landmark.pos;
        if let Some(vis) = landmark.visibility {
            self.visibility.get_or_insert_with(|| vec![0.0; len].into())[index] = vis;
        }
        if let Some(pres) = landmark.presence {
            self.presence.get_or_insert_with(|| vec![0.0; len].into())[index] = pres;
        }
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn positions_mut(&mut self) -> &mut [Position] {
        &mut self.positions
    }

    /// Fills the positions from a flat list of `stride`-sized chunks, using the first 3 values of
    /// each chunk.
    pub fn fill_from_chunks(&mut self, values: &[f32], stride: usize) -> anyhow::Result<()> {
        if stride < 3 || values.len() < self.len() * stride {
            anyhow::bail!(
                "expected {} landmarks with stride {stride}, got {} values",
                self.len(),
                values.len()
            );
        }
        for (pos, chunk) in self.positions.iter_mut().zip(values.chunks_exact(stride)) {
            *pos = [chunk[0], chunk[1], chunk[2]];
        }
        Ok(())
    }

    /// Returns the landmarks with X and Y divided by the image dimensions and Z divided by the
    /// image width.
    pub fn normalized(&self, res: Resolution) -> Vec<NormalizedLandmark> {
        let (w, h) = (res.width() as f32, res.height() as f32);
        self.iter()
            .map(|lm| {
                let [x, y, z] = lm.position();
                Landmark {
                    pos: [x / w, y / h, z / w],
                    ..lm
                }
            })
            .collect()
    }
}

/// A classification result, eg. a handedness label or a blendshape score.
#[derive(Debug, Clone, PartialEq)]
pub struct Category {
    pub index: usize,
    pub score: f32,
    pub category_name: String,
}

/// Trait for landmark estimation results returned by [`Estimator::estimate`].
pub trait Estimate: Clone + Send + 'static {
    fn landmarks(&self) -> &Landmarks;

    fn landmarks_mut(&mut self) -> &mut Landmarks;

    /// Returns the estimated clockwise object rotation in radians.
    ///
    /// Used by the default RoI update of [`LandmarkTracker`].
    fn angle_radians(&self) -> Option<f32> {
        None
    }

    /// Computes the RoI to use in the next frame, once the landmarks have been mapped to image
    /// coordinates.
    ///
    /// If this returns [`None`], the tracker uses the padded bounding rectangle of all landmarks,
    /// rotated by [`Estimate::angle_radians`].
    fn tracking_roi(&self) -> Option<RotatedRect> {
        None
    }
}

/// Trait for network inference results that contain a confidence value.
///
/// The confidence value is used by [`LandmarkTracker`] to detect when the tracked object becomes
/// obscured or leaves the camera's field of view.
pub trait Confidence {
    /// Confidence value indicating whether the tracked object is in view, from 0.0 to 1.0.
    fn confidence(&self) -> f32;
}

/// Trait implemented by wrapper types around neural networks that estimate landmarks.
pub trait Network: Send + Sync + 'static {
    /// Type representing the predicted landmarks.
    type Output: Estimate;

    /// Returns the [`Cnn`] to use for landmark estimation.
    fn cnn(&self) -> &Cnn;

    /// Extracts the network outputs and writes them to `estimate`.
    ///
    /// The landmark positions are expected to be in the coordinate system of the network's input.
    fn extract(&self, outputs: &Outputs, estimate: &mut Self::Output) -> anyhow::Result<()>;
}

/// Neural-network based landmark estimator.
pub struct Estimator<E: Estimate> {
    network: Box<dyn Network<Output = E>>,
    estimate: E,
    t_infer: Timer,
    t_extract: Timer,
}

impl<E: Estimate + Default> Estimator<E> {
    pub fn new<N: Network<Output = E>>(network: N) -> Self {
        Self {
            network: Box::new(network),
            estimate: E::default(),
            t_infer: Timer::new("landmarks"),
            t_extract: Timer::new("extract"),
        }
    }
}

impl<E: Estimate> Estimator<E> {
    /// Returns the expected input resolution of the internal neural network.
    pub fn input_resolution(&self) -> Resolution {
        self.network.cnn().input_resolution()
    }

    pub fn timers(&self) -> impl Iterator<Item = &Timer> + '_ {
        [&self.t_infer, &self.t_extract].into_iter()
    }

    /// Performs landmark estimation on `image`, returning the [`Estimate`].
    ///
    /// If the aspect ratio of `image` does not match the aspect ratio of the network's input, an
    /// enlarged view of the right aspect ratio is created first. Landmark positions are returned in
    /// the coordinate system of `image`.
    pub fn estimate(&mut self, image: &ImageView<'_>) -> anyhow::Result<&mut E> {
        let cnn = self.network.cnn();
        let input_res = cnn.input_resolution();

        let aspect = input_res
            .aspect_ratio()
            .ok_or_else(|| anyhow::anyhow!("estimator has zero-sized input {input_res}"))?;
        let rect = image.rect().grow_to_fit_aspect(aspect);
        let view = image.view(rect);
        let outputs = self.t_infer.time(|| cnn.estimate(&view))?;
        log::trace!("inference result: {:?}", outputs);

        self.t_extract
            .time(|| self.network.extract(&outputs, &mut self.estimate))?;

        // Map landmark coordinates back into the input image.
        let scale = rect.width() / input_res.width() as f32;
        for pos in self.estimate.landmarks_mut().positions_mut() {
            *pos = pos.map(|t| t * scale);
            pos[0] += rect.x();
            pos[1] += rect.y();
        }

        Ok(&mut self.estimate)
    }
}

/// Tracks a region of interest (RoI) across subsequent frames by tracking the movement of estimated
/// landmarks.
///
/// Once seeded with a region of interest, the tracker will adjust its RoI based on the estimated
/// landmarks.
pub struct LandmarkTracker<E: Estimate + Confidence> {
    aspect_ratio: AspectRatio,
    estimator: Estimator<E>,
    roi: Option<RotatedRect>,
    loss_thresh: f32,
    roi_padding: f32,
}

impl<E: Estimate + Confidence> LandmarkTracker<E> {
    pub const DEFAULT_LOSS_THRESHOLD: f32 = 0.5;

    pub const DEFAULT_ROI_PADDING: f32 = 0.3;

    pub fn new(estimator: Estimator<E>) -> Self {
        Self {
            aspect_ratio: estimator
                .input_resolution()
                .aspect_ratio()
                .unwrap_or(AspectRatio::SQUARE),
            estimator,
            roi: None,
            loss_thresh: Self::DEFAULT_LOSS_THRESHOLD,
            roi_padding: Self::DEFAULT_ROI_PADDING,
        }
    }

    pub fn timers(&self) -> impl Iterator<Item = &Timer> {
        self.estimator.timers()
    }

    /// Sets the tracking loss threshold.
    ///
    /// If the confidence value of the predicted landmarks falls below this value, tracking is
    /// considered lost and the RoI is cleared.
    pub fn set_loss_threshold(&mut self, threshold: f32) {
        self.loss_thresh = threshold;
    }

    /// Returns the current region of interest, or [`None`] if tracking is not active.
    pub fn roi(&self) -> Option<&RotatedRect> {
        self.roi.as_ref()
    }

    /// Sets the region of interest. No padding is applied.
    pub fn set_roi(&mut self, roi: impl Into<RotatedRect>) {
        self.roi = Some(roi.into());
    }

    pub fn clear_roi(&mut self) {
        self.roi = None;
    }

    /// Performs landmark tracking on `full_image`.
    ///
    /// Returns `Ok(None)` if no RoI is set or if tracking was lost in this frame. The returned
    /// [`TrackingResult`] holds landmarks in `full_image` coordinates.
    pub fn track(
        &mut self,
        full_image: &ImageView<'_>,
    ) -> anyhow::Result<Option<TrackingResult<'_, E>>> {
        let Some(roi) = self.roi else {
            return Ok(None);
        };
        let view_rect = roi.grow_to_fit_aspect(self.aspect_ratio);
        let view = full_image.view(view_rect);
        let estimate = self.estimator.estimate(&view)?;
        if estimate.confidence() < self.loss_thresh {
            log::trace!(
                "LandmarkTracker: confidence {}, loss threshold {} -> LOST",
                estimate.confidence(),
                self.loss_thresh,
            );

            self.roi = None;
            return Ok(None);
        }

        for [x, y, _] in estimate.landmarks_mut().positions_mut() {
            [*x, *y] = view_rect.transform_out(*x, *y);
        }

        let updated_roi = match estimate.tracking_roi() {
            Some(roi) => roi,
            None => {
                let angle = roi.rotation_radians() + estimate.angle_radians().unwrap_or(0.0);
                let positions = estimate.landmarks().positions().iter().map(|p| [p[0], p[1]]);
                RotatedRect::bounding(angle, positions)
                    .unwrap_or(roi)
                    .grow_rel(self.roi_padding)
            }
        };
        self.roi = Some(updated_roi);

        Ok(Some(TrackingResult {
            view_rect,
            estimate,
            updated_roi,
        }))
    }
}

/// The result returned by [`LandmarkTracker::track`].
pub struct TrackingResult<'a, E: Estimate> {
    view_rect: RotatedRect,
    estimate: &'a E,
    updated_roi: RotatedRect,
}

impl<'a, E: Estimate> TrackingResult<'a, E> {
    /// Returns the rectangle inside the full image that was used to compute the landmarks.
    pub fn view_rect(&self) -> RotatedRect {
        self.view_rect
    }

    /// Returns the estimation result. Landmark coordinates are in terms of the full image.
    pub fn estimate(&self) -> &'a E {
        self.estimate
    }

    /// Returns the RoI that will be used in the next call to [`LandmarkTracker::track`].
    pub fn updated_roi(&self) -> RotatedRect {
        self.updated_roi
    }
}

/// An instance found by [`InstanceTracker::process`].
#[derive(Debug, Clone)]
pub struct Tracked<E> {
    /// Estimate with landmarks in image coordinates.
    pub estimate: E,
    /// Rectangle the landmarks were estimated in.
    pub view_rect: RotatedRect,
}

/// Detects and tracks up to a fixed number of instances of an object.
///
/// In [`RunningMode::Video`], the detector only runs while fewer than the maximum number of
/// instances are tracked, and each tracked instance keeps its RoI between frames. In
/// [`RunningMode::Image`], every call starts from scratch.
pub struct InstanceTracker<E: Estimate + Confidence> {
    detector: Detector,
    make_tracker: Box<dyn FnMut() -> LandmarkTracker<E> + Send>,
    detection_roi: fn(&Detection) -> RotatedRect,
    trackers: Vec<LandmarkTracker<E>>,
    spare: Vec<LandmarkTracker<E>>,
    max_instances: usize,
    overlap_thresh: f32,
}

impl<E: Estimate + Confidence> InstanceTracker<E> {
    /// RoIs of new detections that overlap a tracked RoI by more than this are ignored.
    pub const DEFAULT_OVERLAP_THRESHOLD: f32 = 0.5;

    /// Creates a tracker.
    ///
    /// `make_tracker` creates the per-instance [`LandmarkTracker`]s, `detection_roi` turns a
    /// detection into the initial RoI of a new instance.
    pub fn new(
        detector: Detector,
        make_tracker: impl FnMut() -> LandmarkTracker<E> + Send + 'static,
        detection_roi: fn(&Detection) -> RotatedRect,
        max_instances: usize,
    ) -> Self {
        Self {
            detector,
            make_tracker: Box::new(make_tracker),
            detection_roi,
            trackers: Vec::new(),
            spare: Vec::new(),
            max_instances,
            overlap_thresh: Self::DEFAULT_OVERLAP_THRESHOLD,
        }
    }

    /// Processes one frame, returning all instances found in it.
    pub fn process(
        &mut self,
        image: &Image,
        mode: RunningMode,
    ) -> anyhow::Result<Vec<Tracked<E>>> {
        let full = image.view(image.rect());

        if mode == RunningMode::Image {
            self.release_all();
        }

        if self.trackers.len() < self.max_instances {
            let mut detections = self.detector.detect(&full)?.to_vec();
            detections.sort_by(|a, b| b.confidence().total_cmp(&a.confidence()));

            for det in detections {
                if self.trackers.len() >= self.max_instances {
                    break;
                }
                let roi = (self.detection_roi)(&det);
                let overlaps = self
                    .trackers
                    .iter()
                    .filter_map(|t| t.roi())
                    .any(|tracked| tracked.iou(&roi) > self.overlap_thresh);
                if overlaps {
                    continue;
                }

                let mut tracker = self.spare.pop().unwrap_or_else(|| (self.make_tracker)());
                tracker.set_roi(roi);
                self.trackers.push(tracker);
            }
        }

        let mut results = Vec::with_capacity(self.trackers.len());
        let mut i = 0;
        while i < self.trackers.len() {
            let tracked = self.trackers[i].track(&full)?.map(|res| Tracked {
                estimate: res.estimate().clone(),
                view_rect: res.view_rect(),
            });
            match tracked {
                Some(tracked) => {
                    results.push(tracked);
                    i += 1;
                }
                None => {
                    let lost = self.trackers.swap_remove(i);
                    self.spare.push(lost);
                }
            }
        }

        if mode == RunningMode::Image {
            self.release_all();
        }

        Ok(results)
    }

    fn release_all(&mut self) {
        for mut tracker in self.trackers.drain(..) {
            tracker.clear_roi();
            self.spare.push(tracker);
        }
    }

    pub fn timers(&self) -> impl Iterator<Item = &Timer> {
        self.detector
            .timers()
            .chain(self.trackers.iter().take(1).flat_map(|t| t.timers()))
    }
}

/// Computes the clockwise rotation that makes the vector from `from` to `to` point in the
/// direction `target_radians` (measured clockwise from "up").
pub fn rotation_between(from: [f32; 2], to: [f32; 2], target_radians: f32) -> f32 {
    let rel = Vector2::new(to[0] - from[0], to[1] - from[1]);
    let up = Rotation2::new(target_radians) * Vector2::new(0.0, -1.0);
    Rotation2::rotation_between(&up, &rel).angle()
}

/// Turns `rect` into a square RoI.
///
/// The long side of the rectangle is multiplied by `scale` and used as the square's side length.
/// The center is moved by `shift_y` times the rectangle's height along its own (rotated) Y axis.
pub fn square_roi(rect: RotatedRect, scale: f32, shift_y: f32) -> RotatedRect {
    let inner = rect.rect();
    let offset = Rotation2::new(rect.rotation_radians())
        * Vector2::new(0.0, shift_y * inner.height());
    let center = rect.center() + offset;
    let side = inner.width().max(inner.height()) * scale;

    RotatedRect::new(
        Rect::from_center(center.x, center.y, side, side),
        rect.rotation_radians(),
    )
}

#[cfg(test)]
mod tests {
    use std::f32::consts::FRAC_PI_2;

    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn video_mode_requires_increasing_timestamps() {
        let mut guard = ModeGuard::new(RunningMode::Video);
        guard.check_video("detect_for_video", 0).unwrap();
        guard.check_video("detect_for_video", 16).unwrap();
        assert_eq!(
            guard.check_video("detect_for_video", 16),
            Err(TaskError::NonMonotonicTimestamp {
                previous: 16,
                current: 16
            })
        );
        assert!(guard.check_video("detect_for_video", 3).is_err());
        guard.check_video("detect_for_video", 17).unwrap();

        assert_eq!(
            guard.check_image("detect"),
            Err(TaskError::WrongRunningMode {
                call: "detect",
                mode: RunningMode::Video
            })
        );
    }

    #[test]
    fn image_mode_rejects_video_calls() {
        let mut guard = ModeGuard::new(RunningMode::Image);
        guard.check_image("detect").unwrap();
        assert!(matches!(
            guard.check_video("detect_for_video", 1),
            Err(TaskError::WrongRunningMode { .. })
        ));
    }

    #[test]
    fn landmarks_visibility_and_normalization() {
        let mut lms = Landmarks::new(2);
        lms.set(0, Landmark::new([10.0, 20.0, 5.0]));
        lms.set(1, Landmark::new([40.0, 10.0, -5.0]).with_visibility(0.9));
        assert_eq!(lms.get(0).visibility(), Some(0.0));
        assert_eq!(lms.get(1).visibility(), Some(0.9));
        assert_eq!(lms.get(1).presence(), None);

        let normalized = lms.normalized(Resolution::new(40, 20));
        assert_eq!(normalized[0].position(), [0.25, 1.0, 0.125]);
        assert_eq!(normalized[1].position(), [1.0, 0.5, -0.125]);
    }

    #[test]
    fn fill_from_chunks() {
        let mut lms = Landmarks::new(2);
        lms.fill_from_chunks(&[1.0, 2.0, 3.0, 9.0, 4.0, 5.0, 6.0, 9.0], 4)
            .unwrap();
        assert_eq!(lms.positions(), &[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
        assert!(lms.fill_from_chunks(&[1.0, 2.0, 3.0], 3).is_err());
    }

    #[test]
    fn rotation_between_points() {
        // Pointing up is the target for 0.0.
        assert_abs_diff_eq!(
            rotation_between([0.0, 0.0], [0.0, -1.0], 0.0),
            0.0,
            epsilon = 1e-6
        );
        // Pointing right is a 90° clockwise rotation.
        assert_abs_diff_eq!(
            rotation_between([0.0, 0.0], [1.0, 0.0], 0.0),
            FRAC_PI_2,
            epsilon = 1e-6
        );
        // Eyes are horizontal when upright.
        assert_abs_diff_eq!(
            rotation_between([0.0, 0.0], [1.0, 0.0], FRAC_PI_2),
            0.0,
            epsilon = 1e-6
        );
    }

    #[test]
    fn square_roi_shifts_along_rotation() {
        let rect = RotatedRect::new(Rect::from_center(10.0, 10.0, 4.0, 2.0), 0.0);
        let roi = square_roi(rect, 2.0, -0.5);
        assert_eq!(roi.rect().width(), 8.0);
        assert_eq!(roi.rect().height(), 8.0);
        assert_abs_diff_eq!(roi.center().y, 9.0, epsilon = 1e-6);

        // Rotated by 90° clockwise, "up" points right.
        let rect = RotatedRect::new(Rect::from_center(10.0, 10.0, 4.0, 2.0), FRAC_PI_2);
        let roi = square_roi(rect, 1.0, -0.5);
        assert_abs_diff_eq!(roi.center().x, 11.0, epsilon = 1e-5);
        assert_abs_diff_eq!(roi.center().y, 10.0, epsilon = 1e-5);
    }
}
