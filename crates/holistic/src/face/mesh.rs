//! Face mesh topology: the landmark groups drawn by the overlay, and the tessellation.
//!
//! The tessellation is loaded from the canonical face model when the model bundle ships one.
//! Otherwise it is triangulated from the landmarks of a detected face.

use anyhow::Context;
use itertools::Itertools;

/// A pair of connected face landmark indices.
pub type Connection = (usize, usize);

/// Number of landmarks on the face surface. The iris landmarks follow them.
pub const NUM_SURFACE_LANDMARKS: usize = 468;

pub const FACE_LANDMARKS_LIPS: &[Connection] = &[
    (61, 146),
    (146, 91),
    (91, 181),
    (181, 84),
    (84, 17),
    (17, 314),
    (314, 405),
    (405, 321),
    (321, 375),
    (375, 291),
    (61, 185),
    (185, 40),
    (40, 39),
    (39, 37),
    (37, 0),
    (0, 267),
    (267, 269),
    (269, 270),
    (270, 409),
    (409, 291),
    (78, 95),
    (95, 88),
    (88, 178),
    (178, 87),
    (87, 14),
    (14, 317),
    (317, 402),
    (402, 318),
    (318, 324),
    (324, 308),
    (78, 191),
    (191, 80),
    (80, 81),
    (81, 82),
    (82, 13),
    (13, 312),
    (312, 311),
    (311, 310),
    (310, 415),
    (415, 308),
];

pub const FACE_LANDMARKS_LEFT_EYE: &[Connection] = &[
    (263, 249),
    (249, 390),
    (390, 373),
    (373, 374),
    (374, 380),
    (380, 381),
    (381, 382),
    (382, 362),
    (263, 466),
    (466, 388),
    (388, 387),
    (387, 386),
    (386, 385),
    (385, 384),
    (384, 398),
    (398, 362),
];

pub const FACE_LANDMARKS_LEFT_EYEBROW: &[Connection] = &[
    (276, 283),
    (283, 282),
    (282, 295),
    (295, 285),
    (300, 293),
    (293, 334),
    (334, 296),
    (296, 336),
];

pub const FACE_LANDMARKS_LEFT_IRIS: &[Connection] =
    &[(474, 475), (475, 476), (476, 477), (477, 474)];

pub const FACE_LANDMARKS_RIGHT_EYE: &[Connection] = &[
    (33, 7),
    (7, 163),
    (163, 144),
    (144, 145),
    (145, 153),
    (153, 154),
    (154, 155),
    (155, 133),
    (33, 246),
    (246, 161),
    (161, 160),
    (160, 159),
    (159, 158),
    (158, 157),
    (157, 173),
    (173, 133),
];

pub const FACE_LANDMARKS_RIGHT_EYEBROW: &[Connection] = &[
    (46, 53),
    (53, 52),
    (52, 65),
    (65, 55),
    (70, 63),
    (63, 105),
    (105, 66),
    (66, 107),
];

pub const FACE_LANDMARKS_RIGHT_IRIS: &[Connection] =
    &[(469, 470), (470, 471), (471, 472), (472, 469)];

pub const FACE_LANDMARKS_FACE_OVAL: &[Connection] = &[
    (10, 338),
    (338, 297),
    (297, 332),
    (332, 284),
    (284, 251),
    (251, 389),
    (389, 356),
    (356, 454),
    (454, 323),
    (323, 361),
    (361, 288),
    (288, 397),
    (397, 365),
    (365, 379),
    (379, 378),
    (378, 400),
    (400, 377),
    (377, 152),
    (152, 148),
    (148, 176),
    (176, 149),
    (149, 150),
    (150, 136),
    (136, 172),
    (172, 58),
    (58, 132),
    (132, 93),
    (93, 234),
    (234, 127),
    (127, 162),
    (162, 21),
    (21, 54),
    (54, 103),
    (103, 67),
    (67, 109),
    (109, 10),
];

/// Computes the tessellation edges of a Wavefront OBJ mesh.
///
/// Every polygon (`f` line) contributes its outline. Edges shared between polygons are only
/// returned once. Vertex references outside `0..num_vertices` are rejected.
pub fn tessellation_from_obj(obj: &str, num_vertices: usize) -> anyhow::Result<Vec<Connection>> {
    let mut edges = Vec::new();
    for (line_no, line) in obj.lines().enumerate() {
        let mut parts = line.split_whitespace();
        if parts.next() != Some("f") {
            continue;
        }

        let polygon = parts
            .map(|vertex| parse_vertex_ref(vertex, num_vertices))
            .collect::<anyhow::Result<Vec<_>>>()
            .with_context(|| format!("invalid face on line {}", line_no + 1))?;
        if polygon.len() < 3 {
            anyhow::bail!(
                "face on line {} has only {} vertices",
                line_no + 1,
                polygon.len()
            );
        }

        for (&a, &b) in polygon.iter().circular_tuple_windows() {
            edges.push((a.min(b), a.max(b)));
        }
    }

    Ok(edges.into_iter().sorted_unstable().dedup().collect())
}

/// Computes the edges of the Delaunay triangulation of `points`.
///
/// Returns nothing if there are fewer than 3 points. Duplicate points are left unconnected.
pub fn triangulate(points: &[[f32; 2]]) -> Vec<Connection> {
    let n = points.len();
    if n < 3 {
        return Vec::new();
    }

    let mut vertices = points
        .iter()
        .map(|&[x, y]| [f64::from(x), f64::from(y)])
        .collect::<Vec<_>>();
    let (min, max) = vertices.iter().fold(
        ([f64::INFINITY; 2], [f64::NEG_INFINITY; 2]),
        |(min, max), &[x, y]| ([min[0].min(x), min[1].min(y)], [max[0].max(x), max[1].max(y)]),
    );
    let size = (max[0] - min[0]).max(max[1] - min[1]).max(1e-6);
    let [cx, cy] = [(min[0] + max[0]) / 2.0, (min[1] + max[1]) / 2.0];
    // Enclosing triangle, removed again at the end.
    vertices.extend([
        [cx - 20.0 * size, cy - size],
        [cx, cy + 20.0 * size],
        [cx + 20.0 * size, cy - size],
    ]);

    let mut triangles = vec![Triangle::new(&vertices, [n, n + 1, n + 2])];
    for i in 0..n {
        let p = vertices[i];
        let (bad, good): (Vec<_>, Vec<_>) = triangles
            .into_iter()
            .partition(|tri| tri.circumcircle_contains(p));
        triangles = good;

        // The outline of the removed triangles is formed by the edges only one of them has.
        let outline = bad
            .iter()
            .flat_map(Triangle::edges)
            .counts()
            .into_iter()
            .filter(|&(_, count)| count == 1)
            .map(|(edge, _)| edge);
        for (a, b) in outline {
            triangles.push(Triangle::new(&vertices, [a, b, i]));
        }
    }

    triangles
        .iter()
        .filter(|tri| tri.indices.iter().all(|&v| v < n))
        .flat_map(Triangle::edges)
        .sorted_unstable()
        .dedup()
        .collect()
}

struct Triangle {
    indices: [usize; 3],
    center: [f64; 2],
    radius_sq: f64,
}

impl Triangle {
    fn new(vertices: &[[f64; 2]], indices: [usize; 3]) -> Self {
        let [[ax, ay], [bx, by], [cx, cy]] = indices.map(|i| vertices[i]);
        let d = 2.0 * (ax * (by - cy) + bx * (cy - ay) + cx * (ay - by));
        if d.abs() < 1e-12 {
            // Collinear vertices, the circumcircle degenerates into a half-plane.
            return Self {
                indices,
                center: [ax, ay],
                radius_sq: f64::INFINITY,
            };
        }

        let (a2, b2, c2) = (ax * ax + ay * ay, bx * bx + by * by, cx * cx + cy * cy);
        let center = [
            (a2 * (by - cy) + b2 * (cy - ay) + c2 * (ay - by)) / d,
            (a2 * (cx - bx) + b2 * (ax - cx) + c2 * (bx - ax)) / d,
        ];
        Self {
            indices,
            center,
            radius_sq: dist_sq(center, [ax, ay]),
        }
    }

    fn circumcircle_contains(&self, p: [f64; 2]) -> bool {
        dist_sq(self.center, p) < self.radius_sq
    }

    fn edges(&self) -> [Connection; 3] {
        let [a, b, c] = self.indices;
        [(a.min(b), a.max(b)), (b.min(c), b.max(c)), (a.min(c), a.max(c))]
    }
}

fn dist_sq(a: [f64; 2], b: [f64; 2]) -> f64 {
    (a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)
}

/// Parses an OBJ vertex reference (`v`, `v/vt`, `v//vn` or `v/vt/vn`) into a 0-based index.
fn parse_vertex_ref(vertex: &str, num_vertices: usize) -> anyhow::Result<usize> {
    let index = vertex.split('/').next().unwrap_or(vertex);
    let index: usize = index
        .parse()
        .with_context(|| format!("invalid vertex reference `{vertex}`"))?;
    match index.checked_sub(1) {
        Some(index) if index < num_vertices => Ok(index),
        _ => anyhow::bail!("vertex reference `{vertex}` out of range 1..={num_vertices}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn obj_triangles_to_edges() {
        let obj = "\
# two triangles sharing an edge
v 0.0 0.0 0.0
v 1.0 0.0 0.0
v 1.0 1.0 0.0
v 0.0 1.0 0.0
vt 0.0 0.0
f 1/1 2/2 3/3
f 3/3 4/4 1/1
";
        let edges = tessellation_from_obj(obj, 4).unwrap();
        assert_eq!(edges, &[(0, 1), (0, 2), (0, 3), (1, 2), (2, 3)]);
    }

    #[test]
    fn obj_errors() {
        assert!(tessellation_from_obj("f 1 2 9", 4).is_err());
        assert!(tessellation_from_obj("f 0 1 2", 4).is_err());
        assert!(tessellation_from_obj("f 1 2", 4).is_err());
        assert!(tessellation_from_obj("f a b c", 4).is_err());
        assert!(tessellation_from_obj("v 1 2 3", 4).unwrap().is_empty());
    }

    #[test]
    fn triangulate_point_in_triangle() {
        let points = [[0.0, 0.0], [2.0, 0.0], [1.0, 2.0], [1.0, 0.5]];
        assert_eq!(
            triangulate(&points),
            &[(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)]
        );
    }

    #[test]
    fn triangulate_too_few_points() {
        assert!(triangulate(&[]).is_empty());
        assert!(triangulate(&[[0.0, 0.0], [1.0, 1.0]]).is_empty());
    }

    #[test]
    fn triangulate_spiral() {
        // Sunflower spiral, no 4 points are cocircular.
        let points = (0..NUM_SURFACE_LANDMARKS)
            .map(|i| {
                let r = (i as f32 + 0.5).sqrt();
                let theta = i as f32 * 2.399_963;
                [r * theta.cos(), r * theta.sin()]
            })
            .collect::<Vec<_>>();
        let edges = triangulate(&points);

        // A planar triangulation has at most 3n - 6 edges and at least 2n - 3.
        let n = points.len();
        assert!(edges.len() <= 3 * n - 6, "{} edges", edges.len());
        assert!(edges.len() >= 2 * n - 3, "{} edges", edges.len());
        for (i, _) in points.iter().enumerate() {
            let degree = edges.iter().filter(|&&(a, b)| a == i || b == i).count();
            assert!(degree >= 2, "point {i} has {degree} edges");
        }
        assert!(edges.iter().all(|&(a, b)| a < b && b < n));
    }

    #[test]
    fn connection_sets_are_in_range() {
        for set in [
            FACE_LANDMARKS_LIPS,
            FACE_LANDMARKS_LEFT_EYE,
            FACE_LANDMARKS_LEFT_EYEBROW,
            FACE_LANDMARKS_LEFT_IRIS,
            FACE_LANDMARKS_RIGHT_EYE,
            FACE_LANDMARKS_RIGHT_EYEBROW,
            FACE_LANDMARKS_RIGHT_IRIS,
            FACE_LANDMARKS_FACE_OVAL,
        ] {
            assert!(set.iter().all(|&(a, b)| a < 478 && b < 478));
        }
        assert_eq!(FACE_LANDMARKS_LIPS.len(), 40);
        assert_eq!(FACE_LANDMARKS_FACE_OVAL.len(), 36);
    }
}
