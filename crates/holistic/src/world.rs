//! 3D world landmark traces.
//!
//! World landmarks of the left hand, the right hand, and the first body pose are collected into
//! three point traces every frame and plotted in two views: one for both hands and one for the
//! pose. The X axis is mirrored so that the plots match the mirrored camera image.

use crate::hand::{HandLandmarkerResult, Handedness};
use crate::image::{Image, Resolution};
use crate::landmark::Landmark;
use crate::plot3d::{Layout, Plot3d};
use crate::pose::PoseLandmarkerResult;

/// Horizontal distance that hands are moved apart by, in meters.
///
/// Hand world landmarks are centered on the hand, so without an offset both hands would be drawn
/// on top of each other.
pub const HAND_X_OFFSET: f32 = 0.2;

/// Coordinates of a set of points, stored per axis.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trace {
    pub x: Vec<f32>,
    pub y: Vec<f32>,
    pub z: Vec<f32>,
}

impl Trace {
    pub fn clear(&mut self) {
        self.x.clear();
        self.y.clear();
        self.z.clear();
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Replaces the trace contents with `landmarks`, mapping X coordinates through `map_x`.
    fn fill(&mut self, landmarks: &[Landmark], map_x: impl Fn(f32) -> f32) {
        self.clear();
        for lm in landmarks {
            self.x.push(map_x(lm.x()));
            self.y.push(lm.y());
            self.z.push(lm.z());
        }
    }

    /// Returns the points of this trace.
    pub fn points(&self) -> Vec<[f32; 3]> {
        self.x
            .iter()
            .zip(&self.y)
            .zip(&self.z)
            .map(|((&x, &y), &z)| [x, y, z])
            .collect()
    }
}

/// The three traces that are plotted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorldTraces {
    pub left_hand: Trace,
    pub right_hand: Trace,
    pub pose: Trace,
}

impl WorldTraces {
    /// Refills all traces from the latest results.
    ///
    /// Every trace is cleared first. The pose trace holds the first pose. Each hand goes into the
    /// trace of its handedness, and if several hands share a handedness, the last one is kept.
    pub fn update(&mut self, hands: &HandLandmarkerResult, poses: &PoseLandmarkerResult) {
        self.left_hand.clear();
        self.right_hand.clear();
        self.pose.clear();

        if let Some(pose) = poses.world_landmarks.first() {
            self.pose.fill(pose, |x| -x);
        }

        for (i, landmarks) in hands.world_landmarks.iter().enumerate() {
            let handedness = hands.handedness.get(i).map(|cat| cat.handedness);
            if handedness == Some(Handedness::Left) {
                self.left_hand.fill(landmarks, |x| -x - HAND_X_OFFSET);
            } else {
                self.right_hand.fill(landmarks, |x| -x + HAND_X_OFFSET);
            }
        }
    }
}

/// The hand and pose plots.
pub struct WorldViews {
    hand: Plot3d,
    pose: Plot3d,
}

impl WorldViews {
    /// Creates both views, rendering into images of size `resolution`.
    pub fn new(resolution: Resolution) -> Self {
        Self {
            hand: Plot3d::new(Layout::hands(), resolution),
            pose: Plot3d::new(Layout::pose(), resolution),
        }
    }

    /// Re-renders both plots from `traces`.
    pub fn redraw(&mut self, traces: &WorldTraces) {
        self.hand
            .render(&[traces.left_hand.points(), traces.right_hand.points()]);
        self.pose.render(&[traces.pose.points()]);
    }

    pub fn hand_view(&self) -> &Image {
        self.hand.image()
    }

    pub fn pose_view(&self) -> &Image {
        self.pose.image()
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use crate::hand::HandednessCategory;

    use super::*;

    fn landmarks(xs: &[f32]) -> Vec<Landmark> {
        xs.iter().map(|&x| Landmark::new([x, 0.5, -0.1])).collect()
    }

    fn hands(list: &[(Handedness, &[f32])]) -> HandLandmarkerResult {
        HandLandmarkerResult {
            landmarks: list.iter().map(|(_, xs)| landmarks(xs)).collect(),
            world_landmarks: list.iter().map(|(_, xs)| landmarks(xs)).collect(),
            handedness: list
                .iter()
                .map(|(h, _)| HandednessCategory::new(*h, 0.9))
                .collect(),
        }
    }

    fn poses(xs: &[f32]) -> PoseLandmarkerResult {
        PoseLandmarkerResult {
            landmarks: vec![landmarks(xs)],
            world_landmarks: vec![landmarks(xs)],
        }
    }

    #[test]
    fn pose_is_mirrored() {
        let mut traces = WorldTraces::default();
        traces.update(&HandLandmarkerResult::default(), &poses(&[0.3]));
        assert_eq!(traces.pose.x, [-0.3]);
        assert_eq!(traces.pose.y, [0.5]);
        assert_eq!(traces.pose.z, [-0.1]);
        assert!(traces.left_hand.is_empty());
        assert!(traces.right_hand.is_empty());
    }

    #[test]
    fn hands_are_offset_by_side() {
        let mut traces = WorldTraces::default();
        traces.update(
            &hands(&[(Handedness::Left, &[0.1]), (Handedness::Right, &[0.1])]),
            &PoseLandmarkerResult::default(),
        );
        assert_abs_diff_eq!(traces.left_hand.x[0], -0.3, epsilon = 1e-6);
        assert_abs_diff_eq!(traces.right_hand.x[0], 0.1, epsilon = 1e-6);
        assert!(traces.pose.is_empty());
    }

    #[test]
    fn last_hand_of_a_side_wins() {
        let mut traces = WorldTraces::default();
        traces.update(
            &hands(&[(Handedness::Right, &[0.0, 0.0]), (Handedness::Right, &[0.1])]),
            &PoseLandmarkerResult::default(),
        );
        assert_eq!(traces.right_hand.len(), 1);
        assert_abs_diff_eq!(traces.right_hand.x[0], 0.1, epsilon = 1e-6);
        assert!(traces.left_hand.is_empty());
    }

    #[test]
    fn update_clears_previous_frame() {
        let mut traces = WorldTraces::default();
        traces.update(&hands(&[(Handedness::Left, &[0.0])]), &poses(&[0.0, 0.1]));
        assert_eq!(traces.pose.len(), 2);

        traces.update(
            &HandLandmarkerResult::default(),
            &PoseLandmarkerResult::default(),
        );
        assert_eq!(traces, WorldTraces::default());
    }

    #[test]
    fn redraw_changes_views() {
        let mut views = WorldViews::new(Resolution::new(64, 64));
        let blank = views.pose_view().clone();

        let mut traces = WorldTraces::default();
        traces.update(&HandLandmarkerResult::default(), &poses(&[0.0]));
        views.redraw(&traces);
        assert_ne!(*views.pose_view(), blank);
    }
}
