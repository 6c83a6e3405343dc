//! Static 3D scatter plots.
//!
//! A [`Plot3d`] renders point clouds from a fixed camera into an [`Image`]. Data coordinates are
//! first mapped into a scene box whose side lengths follow the layout's aspect ratio, then
//! projected with a perspective camera.

use std::f32::consts::FRAC_PI_4;

use nalgebra::{Isometry3, Perspective3, Point3, Vector3};

use crate::image::{draw, Color, Image, Resolution};

/// Colors assigned to consecutive series of a plot.
pub const SERIES_COLORS: [Color; 3] = [
    Color::from_rgb8(0x1f, 0x77, 0xb4),
    Color::from_rgb8(0xff, 0x7f, 0x0e),
    Color::from_rgb8(0x2c, 0xa0, 0x2c),
];

const BOX_COLOR: Color = Color::from_rgba8(0xa0, 0xa0, 0xa0, 0x60);
const BACKGROUND: Color = Color::WHITE;

/// Camera placement, in scene coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub eye: [f32; 3],
    pub center: [f32; 3],
    pub up: [f32; 3],
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            eye: [0.0, 0.0, -1.5],
            center: [0.0, 0.0, 0.0],
            up: [0.0, -1.0, 0.0],
        }
    }
}

/// Appearance of the data points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Marker {
    /// Marker diameter in pixels.
    pub size: f32,
    pub opacity: f32,
}

impl Default for Marker {
    fn default() -> Self {
        Self {
            size: 3.0,
            opacity: 0.8,
        }
    }
}

/// Fixed scene layout of a plot.
#[derive(Debug, Clone, PartialEq)]
pub struct Layout {
    /// Relative side lengths of the scene box.
    pub aspect: [f32; 3],
    /// Data range shown along each axis.
    pub ranges: [(f32, f32); 3],
    pub camera: Camera,
    pub marker: Marker,
}

impl Layout {
    /// Layout of the hand view: a wide box spanning 80 cm horizontally.
    pub fn hands() -> Self {
        Self {
            aspect: [1.0, 0.5, 0.5],
            ranges: [(-0.4, 0.4), (-0.2, 0.2), (-0.2, 0.2)],
            camera: Camera::default(),
            marker: Marker::default(),
        }
    }

    /// Layout of the pose view: a cube spanning 2 m.
    pub fn pose() -> Self {
        Self {
            aspect: [1.0, 1.0, 1.0],
            ranges: [(-1.0, 1.0); 3],
            camera: Camera::default(),
            marker: Marker::default(),
        }
    }

    /// Maps a data point into the scene box.
    ///
    /// The box is centered at the origin and has the side lengths given by `aspect`.
    fn to_scene(&self, point: [f32; 3]) -> Point3<f32> {
        let mut out = [0.0; 3];
        for (i, out) in out.iter_mut().enumerate() {
            let (min, max) = self.ranges[i];
            let t = if max == min {
                0.5
            } else {
                (point[i] - min) / (max - min)
            };
            *out = (t - 0.5) * self.aspect[i];
        }
        Point3::from(out)
    }
}

/// A 3D scatter plot rendered from a fixed viewpoint.
pub struct Plot3d {
    layout: Layout,
    view: Isometry3<f32>,
    projection: Perspective3<f32>,
    image: Image,
}

impl Plot3d {
    pub fn new(layout: Layout, resolution: Resolution) -> Self {
        let Camera { eye, center, up } = layout.camera;
        let view = Isometry3::look_at_rh(
            &Point3::from(eye),
            &Point3::from(center),
            &Vector3::from(up),
        );
        let aspect = resolution
            .aspect_ratio()
            .map_or(1.0, |aspect| aspect.as_f32());
        let projection = Perspective3::new(aspect, FRAC_PI_4, 0.01, 100.0);

        let mut this = Self {
            layout,
            view,
            projection,
            image: Image::new(resolution.width(), resolution.height()),
        };
        this.render::<&[[f32; 3]]>(&[]);
        this
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Projects a data point to pixel coordinates.
    ///
    /// Returns [`None`] for points behind the camera.
    pub fn project(&self, point: [f32; 3]) -> Option<[f32; 2]> {
        self.project_scene(self.layout.to_scene(point))
    }

    fn project_scene(&self, point: Point3<f32>) -> Option<[f32; 2]> {
        let view = self.view.transform_point(&point);
        // The camera looks along -Z in view space.
        if view.z >= -self.projection.znear() {
            return None;
        }
        let ndc = self.projection.project_point(&view);
        let (w, h) = (self.image.width() as f32, self.image.height() as f32);
        Some([(ndc.x + 1.0) * 0.5 * w, (1.0 - ndc.y) * 0.5 * h])
    }

    /// Redraws the plot with the given point series.
    ///
    /// Each series gets the next color of [`SERIES_COLORS`].
    pub fn render<S: AsRef<[[f32; 3]]>>(&mut self, series: &[S]) -> &Image {
        self.image.clear(BACKGROUND);
        self.draw_box();

        let marker = self.layout.marker;
        for (points, color) in series.iter().zip(SERIES_COLORS.iter().cycle()) {
            let color = color.with_opacity(marker.opacity);
            for &point in points.as_ref() {
                if let Some(pos) = self.project(point) {
                    draw::circle(&mut self.image, pos, marker.size / 2.0)
                        .stroke_width(0)
                        .fill(color);
                }
            }
        }

        &self.image
    }

    fn draw_box(&mut self) {
        let [ax, ay, az] = self.layout.aspect.map(|a| a / 2.0);
        let corner = |i: u8| {
            Point3::new(
                if i & 1 == 0 { -ax } else { ax },
                if i & 2 == 0 { -ay } else { ay },
                if i & 4 == 0 { -az } else { az },
            )
        };
        for a in 0..8u8 {
            for bit in [1, 2, 4] {
                let b = a | bit;
                if a == b {
                    continue;
                }
                let (Some(start), Some(end)) = (
                    self.project_scene(corner(a)),
                    self.project_scene(corner(b)),
                ) else {
                    continue;
                };
                draw::line(&mut self.image, start, end).color(BOX_COLOR);
            }
        }
    }

    /// Returns the most recently rendered image.
    pub fn image(&self) -> &Image {
        &self.image
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn center_projects_to_image_center() {
        let plot = Plot3d::new(Layout::pose(), Resolution::new(200, 100));
        let [x, y] = plot.project([0.0, 0.0, 0.0]).unwrap();
        assert_abs_diff_eq!(x, 100.0, epsilon = 1e-3);
        assert_abs_diff_eq!(y, 50.0, epsilon = 1e-3);
    }

    #[test]
    fn axis_directions() {
        let plot = Plot3d::new(Layout::hands(), Resolution::new(200, 200));
        // X points right, and with the camera's up vector being -Y, Y points down.
        let [x, _] = plot.project([0.2, 0.0, 0.0]).unwrap();
        assert!(x > 100.0);
        let [_, y] = plot.project([0.0, 0.1, 0.0]).unwrap();
        assert!(y > 100.0);

        // Points farther away appear closer to the center.
        let [near, _] = plot.project([0.2, 0.0, -0.2]).unwrap();
        let [far, _] = plot.project([0.2, 0.0, 0.2]).unwrap();
        assert!(near > far, "{near} {far}");
    }

    #[test]
    fn scene_mapping() {
        let layout = Layout::hands();
        assert_eq!(layout.to_scene([0.4, 0.2, -0.2]), Point3::new(0.5, 0.25, -0.25));
        assert_eq!(layout.to_scene([0.0, 0.0, 0.0]), Point3::new(0.0, 0.0, 0.0));
    }

    #[test]
    fn renders_markers() {
        let mut plot = Plot3d::new(Layout::pose(), Resolution::new(64, 64));
        let empty = plot.image().clone();
        let image = plot.render(&[vec![[0.0, 0.0, 0.0]]]);
        assert_ne!(*image, empty);
        assert_ne!(image.get(32, 32), BACKGROUND);
    }
}
