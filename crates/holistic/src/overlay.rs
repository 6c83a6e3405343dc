//! 2D landmark overlay.

use once_cell::sync::OnceCell;

use crate::face::mesh::{
    self, Connection, FACE_LANDMARKS_FACE_OVAL, FACE_LANDMARKS_LEFT_EYE, FACE_LANDMARKS_LEFT_EYEBROW,
    FACE_LANDMARKS_LEFT_IRIS, FACE_LANDMARKS_LIPS, FACE_LANDMARKS_RIGHT_EYE,
    FACE_LANDMARKS_RIGHT_EYEBROW, FACE_LANDMARKS_RIGHT_IRIS,
};
use crate::face::FaceLandmarkerResult;
use crate::hand::{HandLandmarkerResult, HAND_CONNECTIONS};
use crate::image::{draw, Color, Image};
use crate::landmark::NormalizedLandmark;
use crate::num::lerp_clamped;
use crate::pose::{PoseLandmarkerResult, POSE_CONNECTIONS};

const HAND_CONNECTOR: Style = Style::new(Color::from_rgb8(0x00, 0xFF, 0x00)).line_width(5);
const HAND_LANDMARK: Style = Style::new(Color::from_rgb8(0xFF, 0x00, 0x00)).line_width(2);

const FACE_TESSELATION: Style =
    Style::new(Color::from_rgba8(0xC0, 0xC0, 0xC0, 0x70)).line_width(1);
const FACE_RIGHT: Style = Style::new(Color::from_rgb8(0xFF, 0x30, 0x30));
const FACE_LEFT: Style = Style::new(Color::from_rgb8(0x30, 0xFF, 0x30));
const FACE_OUTLINE: Style = Style::new(Color::from_rgb8(0xE0, 0xE0, 0xE0));

/// Landmarks closer to the camera (lower Z) are drawn larger.
fn pose_landmark_radius(lm: &NormalizedLandmark) -> f32 {
    lerp_clamped(lm.z(), (-0.15, 0.1), (5.0, 1.0))
}

/// Stroke and fill settings for connectors and landmarks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Style {
    pub color: Color,
    pub fill_color: Color,
    pub line_width: u32,
    pub radius: f32,
}

impl Style {
    pub const DEFAULT: Self = Self::new(Color::WHITE);

    pub const fn new(color: Color) -> Self {
        Self {
            color,
            fill_color: Color::WHITE,
            line_width: 4,
            radius: 6.0,
        }
    }

    pub const fn line_width(mut self, width: u32) -> Self {
        self.line_width = width;
        self
    }
}

impl Default for Style {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Draws lines between connected landmarks.
///
/// Connections referring to landmarks that don't exist are skipped.
pub fn draw_connectors(
    canvas: &mut Image,
    landmarks: &[NormalizedLandmark],
    connections: impl IntoIterator<Item = Connection>,
    style: &Style,
) {
    let (w, h) = (canvas.width() as f32, canvas.height() as f32);
    for (a, b) in connections {
        let (Some(a), Some(b)) = (landmarks.get(a), landmarks.get(b)) else {
            continue;
        };
        draw::line(canvas, [a.x() * w, a.y() * h], [b.x() * w, b.y() * h])
            .color(style.color)
            .stroke_width(style.line_width);
    }
}

/// Draws a filled circle for each landmark.
///
/// `radius` computes the circle radius of every landmark.
pub fn draw_landmarks(
    canvas: &mut Image,
    landmarks: &[NormalizedLandmark],
    style: &Style,
    radius: impl Fn(&NormalizedLandmark) -> f32,
) {
    let (w, h) = (canvas.width() as f32, canvas.height() as f32);
    for lm in landmarks {
        draw::circle(canvas, [lm.x() * w, lm.y() * h], radius(lm))
            .color(style.color)
            .stroke_width(style.line_width)
            .fill(style.fill_color);
    }
}

/// Draws hand, face, and pose landmarks onto a canvas.
#[derive(Debug, Default)]
pub struct OverlayRenderer {
    tessellation: Vec<Connection>,
    /// Triangulated from the first face drawn, if `tessellation` is empty.
    derived: OnceCell<Vec<Connection>>,
}

impl OverlayRenderer {
    /// Creates a renderer that draws faces with the given mesh edges.
    ///
    /// If `tessellation` is empty, the face surface landmarks of the first face that is drawn
    /// are triangulated, and the resulting edges are used for every face from then on.
    pub fn new(tessellation: Vec<Connection>) -> Self {
        Self {
            tessellation,
            derived: OnceCell::new(),
        }
    }

    fn tessellation(&self, landmarks: &[NormalizedLandmark]) -> &[Connection] {
        if !self.tessellation.is_empty() {
            return &self.tessellation;
        }
        if let Some(edges) = self.derived.get() {
            return edges;
        }
        if landmarks.len() < mesh::NUM_SURFACE_LANDMARKS {
            return &[];
        }
        self.derived.get_or_init(|| {
            let points = landmarks[..mesh::NUM_SURFACE_LANDMARKS]
                .iter()
                .map(|lm| [lm.x(), lm.y()])
                .collect::<Vec<_>>();
            let edges = mesh::triangulate(&points);
            log::debug!("triangulated face tessellation: {} edges", edges.len());
            edges
        })
    }

    /// Clears `canvas` and draws all results onto it.
    ///
    /// If `background` is given, it is scaled to the canvas size and drawn first, otherwise the
    /// canvas is cleared to transparent black.
    pub fn render(
        &self,
        canvas: &mut Image,
        background: Option<&Image>,
        hands: &HandLandmarkerResult,
        faces: &FaceLandmarkerResult,
        poses: &PoseLandmarkerResult,
    ) {
        match background {
            Some(image) => canvas.copy_scaled_from(image),
            None => canvas.clear(Color::NONE),
        }

        for landmarks in &hands.landmarks {
            let connections = HAND_CONNECTIONS
                .iter()
                .map(|&(a, b)| (a as usize, b as usize));
            draw_connectors(canvas, landmarks, connections, &HAND_CONNECTOR);
            draw_landmarks(canvas, landmarks, &HAND_LANDMARK, |_| HAND_LANDMARK.radius);
        }

        for landmarks in &faces.face_landmarks {
            let sets: [(&[Connection], &Style); 9] = [
                (self.tessellation(landmarks), &FACE_TESSELATION),
                (FACE_LANDMARKS_RIGHT_EYE, &FACE_RIGHT),
                (FACE_LANDMARKS_RIGHT_EYEBROW, &FACE_RIGHT),
                (FACE_LANDMARKS_LEFT_EYE, &FACE_LEFT),
                (FACE_LANDMARKS_LEFT_EYEBROW, &FACE_LEFT),
                (FACE_LANDMARKS_FACE_OVAL, &FACE_OUTLINE),
                (FACE_LANDMARKS_LIPS, &FACE_OUTLINE),
                (FACE_LANDMARKS_RIGHT_IRIS, &FACE_RIGHT),
                (FACE_LANDMARKS_LEFT_IRIS, &FACE_LEFT),
            ];
            for (connections, style) in sets {
                draw_connectors(canvas, landmarks, connections.iter().copied(), style);
            }
        }

        for landmarks in &poses.landmarks {
            draw_landmarks(canvas, landmarks, &Style::DEFAULT, pose_landmark_radius);
            let connections = POSE_CONNECTIONS
                .iter()
                .map(|&(a, b)| (a as usize, b as usize));
            draw_connectors(canvas, landmarks, connections, &Style::DEFAULT);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::hand::{Handedness, HandednessCategory};
    use crate::landmark::Landmark;

    use super::*;

    fn lm(x: f32, y: f32, z: f32) -> NormalizedLandmark {
        Landmark::new([x, y, z])
    }

    fn hand() -> HandLandmarkerResult {
        let landmarks = (0..21)
            .map(|i| lm(0.1 + i as f32 * 0.04, 0.5, 0.0))
            .collect::<Vec<_>>();
        HandLandmarkerResult {
            world_landmarks: vec![landmarks.clone()],
            landmarks: vec![landmarks],
            handedness: vec![HandednessCategory::new(Handedness::Left, 0.9)],
        }
    }

    #[test]
    fn empty_results_clear_canvas() {
        let mut canvas = Image::filled(32, 16, Color::BLUE);
        OverlayRenderer::default().render(
            &mut canvas,
            None,
            &HandLandmarkerResult::default(),
            &FaceLandmarkerResult::default(),
            &PoseLandmarkerResult::default(),
        );
        assert_eq!(canvas, Image::new(32, 16));
    }

    #[test]
    fn draws_hands_idempotently() {
        let renderer = OverlayRenderer::default();
        let hands = hand();
        let faces = FaceLandmarkerResult::default();
        let poses = PoseLandmarkerResult::default();

        let mut canvas = Image::new(1000, 100);
        renderer.render(&mut canvas, None, &hands, &faces, &poses);
        let first = canvas.clone();

        renderer.render(&mut canvas, None, &hands, &faces, &poses);
        assert_eq!(canvas, first);

        // Landmarks are 40 pixels apart, the connectors between them are green.
        assert_eq!(canvas.get(120, 50), HAND_CONNECTOR.color);
        assert_ne!(canvas.get(100, 50), Color::NONE);
        assert_eq!(canvas.get(0, 0), Color::NONE);
    }

    fn face() -> Vec<NormalizedLandmark> {
        (0..478)
            .map(|i| {
                let r = (i as f32 + 0.5).sqrt() / 478f32.sqrt() * 0.4;
                let theta = i as f32 * 2.399_963;
                lm(0.5 + r * theta.cos(), 0.5 + r * theta.sin(), 0.0)
            })
            .collect()
    }

    #[test]
    fn default_renderer_draws_tessellation() {
        let renderer = OverlayRenderer::default();
        let landmarks = face();
        let faces = FaceLandmarkerResult {
            face_landmarks: vec![landmarks.clone()],
            ..FaceLandmarkerResult::default()
        };

        let mut canvas = Image::new(200, 200);
        renderer.render(
            &mut canvas,
            None,
            &HandLandmarkerResult::default(),
            &faces,
            &PoseLandmarkerResult::default(),
        );
        assert!(!renderer.tessellation(&landmarks).is_empty());

        let mut without = Image::new(200, 200);
        let sets: [(&[Connection], &Style); 8] = [
            (FACE_LANDMARKS_RIGHT_EYE, &FACE_RIGHT),
            (FACE_LANDMARKS_RIGHT_EYEBROW, &FACE_RIGHT),
            (FACE_LANDMARKS_LEFT_EYE, &FACE_LEFT),
            (FACE_LANDMARKS_LEFT_EYEBROW, &FACE_LEFT),
            (FACE_LANDMARKS_FACE_OVAL, &FACE_OUTLINE),
            (FACE_LANDMARKS_LIPS, &FACE_OUTLINE),
            (FACE_LANDMARKS_RIGHT_IRIS, &FACE_RIGHT),
            (FACE_LANDMARKS_LEFT_IRIS, &FACE_LEFT),
        ];
        for (connections, style) in sets {
            draw_connectors(&mut without, &landmarks, connections.iter().copied(), style);
        }
        assert_ne!(canvas, without);
    }

    #[test]
    fn loaded_tessellation_takes_precedence() {
        let renderer = OverlayRenderer::new(vec![(0, 1), (1, 2)]);
        assert_eq!(renderer.tessellation(&face()), &[(0, 1), (1, 2)]);

        // Too few landmarks to triangulate.
        let renderer = OverlayRenderer::default();
        assert!(renderer.tessellation(&face()[..3]).is_empty());
        assert!(!renderer.tessellation(&face()).is_empty());
    }

    #[test]
    fn background_is_scaled() {
        let background = Image::filled(8, 8, Color::BLUE);
        let mut canvas = Image::new(16, 16);
        OverlayRenderer::default().render(
            &mut canvas,
            Some(&background),
            &HandLandmarkerResult::default(),
            &FaceLandmarkerResult::default(),
            &PoseLandmarkerResult::default(),
        );
        assert_eq!(canvas.get(15, 15), Color::BLUE);
    }

    #[test]
    fn skips_invalid_connections() {
        let mut canvas = Image::new(10, 10);
        draw_connectors(&mut canvas, &[lm(0.5, 0.5, 0.0)], [(0, 5)], &Style::DEFAULT);
        assert_eq!(canvas, Image::new(10, 10));
    }

    #[test]
    fn pose_radius_depends_on_depth() {
        assert_eq!(pose_landmark_radius(&lm(0.0, 0.0, -1.0)), 5.0);
        assert_eq!(pose_landmark_radius(&lm(0.0, 0.0, 1.0)), 1.0);
    }
}
