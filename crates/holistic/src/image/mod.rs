//! Image manipulation.
//!
//! This module provides:
//!
//! - The [`Image`] type, an owned RGBA image.
//! - [`ImageView`], a borrowed, possibly rotated rectangular view into an [`Image`], used to sample
//!   neural network inputs.
//! - A few [`draw`] functions to visualize landmarks.
//! - [`Rect`] and [`RotatedRect`], rectangles describing parts of an image.

pub mod draw;
mod rect;


use std::{fmt, path::Path};

use embedded_graphics::{pixelcolor::raw::RawU32, prelude::PixelColor};
use image::{imageops, ImageBuffer, Rgba, RgbaImage};

pub use rect::{Rect, RotatedRect, Vec2};

/// An 8-bit sRGB image with alpha channel.
#[derive(Clone, PartialEq)]
pub struct Image {
    // RGBA8 matches the texture format used by the GUI, so no conversion is needed for display.
    buf: RgbaImage,
}

impl Image {
    /// Creates an empty image of a specified size.
    ///
    /// The image will start out black and fully transparent.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            buf: ImageBuffer::new(width, height),
        }
    }

    /// Loads a JPEG or PNG image from the filesystem.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let buf = image::open(path)
            .map_err(|e| anyhow::anyhow!("failed to load '{}': {e}", path.display()))?
            .to_rgba8();
        Ok(Self { buf })
    }

    /// Decodes a JFIF JPEG or Motion JPEG frame.
    pub fn decode_jpeg(data: &[u8]) -> anyhow::Result<Self> {
        let buf = image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)?.to_rgba8();
        Ok(Self { buf })
    }

    /// Creates an image from raw RGBA8 pixel data.
    ///
    /// # Panics
    ///
    /// This will panic if `buf` does not contain exactly `4 * width * height` bytes.
    pub fn from_rgba8(res: Resolution, buf: &[u8]) -> Self {
        let expected = res.width() as usize * res.height() as usize * 4;
        assert_eq!(
            expected,
            buf.len(),
            "incorrect buffer size {} for {} image (expected {} bytes)",
            buf.len(),
            res,
            expected,
        );

        Self {
            buf: ImageBuffer::from_raw(res.width(), res.height(), buf.to_vec())
                .expect("buffer size checked above"),
        }
    }

    /// Creates an image filled with a single color.
    pub fn filled(width: u32, height: u32, color: Color) -> Self {
        Self {
            buf: ImageBuffer::from_pixel(width, height, Rgba(color.0)),
        }
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.buf.width()
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.buf.height()
    }

    #[inline]
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width(), self.height())
    }

    /// Returns a [`Rect`] at `(0, 0)` covering this image.
    #[inline]
    pub fn rect(&self) -> Rect {
        Rect::from_top_left(0.0, 0.0, self.width() as f32, self.height() as f32)
    }

    /// Gets the color at the given pixel coordinates.
    ///
    /// Returns [`Color::NONE`] for coordinates outside of the image.
    pub fn get(&self, x: u32, y: u32) -> Color {
        if x < self.width() && y < self.height() {
            Color(self.buf[(x, y)].0)
        } else {
            Color::NONE
        }
    }

    /// Sets the color at the given pixel coordinates, ignoring coordinates outside of the image.
    pub fn set(&mut self, x: u32, y: u32, color: Color) {
        if x < self.width() && y < self.height() {
            self.buf[(x, y)] = Rgba(color.0);
        }
    }

    /// Alpha-blends `color` onto the pixel at the given coordinates.
    pub fn blend(&mut self, x: u32, y: u32, color: Color) {
        if x < self.width() && y < self.height() {
            let px = &mut self.buf[(x, y)];
            px.0 = Color(px.0).blend(color).0;
        }
    }

    /// Sets every pixel to `color`.
    pub fn clear(&mut self, color: Color) {
        self.buf.pixels_mut().for_each(|px| px.0 = color.0);
    }

    /// Overwrites `self` with the contents of `src`, stretching or shrinking it as necessary.
    pub fn copy_scaled_from(&mut self, src: &Image) {
        if src.resolution() == self.resolution() {
            self.buf.copy_from_slice(src.data());
        } else {
            self.buf = imageops::resize(
                &src.buf,
                self.width(),
                self.height(),
                imageops::FilterType::Triangle,
            );
        }
    }

    /// Returns a resized copy of this image.
    pub fn resized(&self, width: u32, height: u32) -> Image {
        if self.width() == width && self.height() == height {
            return self.clone();
        }
        Image {
            buf: imageops::resize(&self.buf, width, height, imageops::FilterType::Triangle),
        }
    }

    /// Creates a view into an area of this image, specified by `rect`.
    ///
    /// `rect` may extend past the image, and may be rotated. Pixels outside of the image read as
    /// [`Color::NONE`]. The returned view always has the size of `rect`.
    pub fn view(&self, rect: impl Into<RotatedRect>) -> ImageView<'_> {
        ImageView {
            image: self,
            rect: rect.into(),
        }
    }

    /// Returns the raw RGBA8 pixel data.
    #[inline]
    pub fn data(&self) -> &[u8] {
        self.buf.as_raw()
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{} Image", self.width(), self.height())
    }
}

/// An immutable view of a (possibly rotated) rectangular section of an [`Image`].
#[derive(Clone, Copy)]
pub struct ImageView<'a> {
    image: &'a Image,
    /// View rectangle in the image's coordinates.
    rect: RotatedRect,
}

impl<'a> ImageView<'a> {
    /// Returns the width of this view, in (possibly fractional) pixels.
    #[inline]
    pub fn width(&self) -> f32 {
        self.rect.rect().width()
    }

    /// Returns the height of this view, in (possibly fractional) pixels.
    #[inline]
    pub fn height(&self) -> f32 {
        self.rect.rect().height()
    }

    /// Returns the view's rectangle in the coordinates of the underlying [`Image`].
    #[inline]
    pub fn image_rect(&self) -> RotatedRect {
        self.rect
    }

    /// Returns a [`Rect`] at `(0, 0)` with the size of this view.
    #[inline]
    pub fn rect(&self) -> Rect {
        Rect::from_top_left(0.0, 0.0, self.width(), self.height())
    }

    /// Samples the color at view coordinates `(x, y)` with nearest-neighbor filtering.
    pub fn sample(&self, x: f32, y: f32) -> Color {
        let [ix, iy] = self.rect.transform_out(x, y);
        if ix < 0.0 || iy < 0.0 {
            return Color::NONE;
        }
        self.image.get(ix as u32, iy as u32)
    }

    /// Creates a subview, with `rect` given in this view's coordinate system.
    pub fn view(&self, rect: impl Into<RotatedRect>) -> ImageView<'a> {
        let rect: RotatedRect = rect.into();
        let c = rect.center();
        let [cx, cy] = self.rect.transform_out(c.x, c.y);
        let inner = rect.rect().with_center(cx, cy);

        ImageView {
            image: self.image,
            rect: RotatedRect::new(
                inner,
                self.rect.rotation_radians() + rect.rotation_radians(),
            ),
        }
    }

    /// Copies the contents of this view into a new [`Image`].
    pub fn to_image(&self) -> Image {
        let (w, h) = (self.width().round() as u32, self.height().round() as u32);
        let mut image = Image::new(w, h);
        for y in 0..h {
            for x in 0..w {
                image.set(x, y, self.sample(x as f32 + 0.5, y as f32 + 0.5));
            }
        }
        image
    }
}

impl fmt::Debug for ImageView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{} ImageView", self.width(), self.height())
    }
}

/// An 8-bit RGBA color.
///
/// Colors are in the sRGB color space and use non-premultiplied alpha.
#[derive(PartialEq, Eq, Clone, Copy, Hash)]
pub struct Color(pub(crate) [u8; 4]);

impl Color {
    /// Fully transparent black (all components are 0).
    pub const NONE: Self = Self([0, 0, 0, 0]);
    pub const BLACK: Self = Self([0, 0, 0, 255]);
    pub const WHITE: Self = Self([255, 255, 255, 255]);
    pub const RED: Self = Self([255, 0, 0, 255]);
    pub const GREEN: Self = Self([0, 255, 0, 255]);
    pub const BLUE: Self = Self([0, 0, 255, 255]);

    #[inline]
    pub const fn from_rgb8(r: u8, g: u8, b: u8) -> Self {
        Self([r, g, b, 255])
    }

    #[inline]
    pub const fn from_rgba8(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self([r, g, b, a])
    }

    /// Parses a CSS-style hex color (`#RRGGBB` or `#RRGGBBAA`).
    pub fn from_hex(hex: &str) -> Option<Self> {
        let digits = hex.strip_prefix('#')?;
        if !matches!(digits.len(), 6 | 8) || !digits.is_ascii() {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&digits[i * 2..i * 2 + 2], 16).ok();
        let alpha = if digits.len() == 8 { channel(3)? } else { 255 };
        Some(Self([channel(0)?, channel(1)?, channel(2)?, alpha]))
    }

    #[inline]
    pub fn r(&self) -> u8 {
        self.0[0]
    }

    #[inline]
    pub fn g(&self) -> u8 {
        self.0[1]
    }

    #[inline]
    pub fn b(&self) -> u8 {
        self.0[2]
    }

    #[inline]
    pub fn a(&self) -> u8 {
        self.0[3]
    }

    #[must_use]
    pub fn with_alpha(mut self, a: u8) -> Color {
        self.0[3] = a;
        self
    }

    /// Scales the alpha channel by `opacity` (0.0 to 1.0).
    #[must_use]
    pub fn with_opacity(self, opacity: f32) -> Color {
        let a = (f32::from(self.a()) * opacity.clamp(0.0, 1.0)).round() as u8;
        self.with_alpha(a)
    }

    /// Composites `src` over `self` ("source-over" alpha blending).
    pub fn blend(self, src: Color) -> Color {
        match src.a() {
            255 => return src,
            0 => return self,
            _ => {}
        }

        let sa = f32::from(src.a()) / 255.0;
        let da = f32::from(self.a()) / 255.0;
        let out_a = sa + da * (1.0 - sa);
        let channel = |s: u8, d: u8| {
            let c = (f32::from(s) * sa + f32::from(d) * da * (1.0 - sa)) / out_a;
            c.round().clamp(0.0, 255.0) as u8
        };

        Color([
            channel(src.r(), self.r()),
            channel(src.g(), self.g()),
            channel(src.b(), self.b()),
            (out_a * 255.0).round() as u8,
        ])
    }
}

impl fmt::Debug for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{:02x}{:02x}{:02x}{:02x}",
            self.r(),
            self.g(),
            self.b(),
            self.a(),
        )
    }
}

impl PixelColor for Color {
    type Raw = RawU32;
}

/// Width and height of an image, in pixels.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Resolution {
    width: u32,
    height: u32,
}

impl Resolution {
    pub const RES_720P: Self = Self::new(1280, 720);

    #[inline]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    #[inline]
    pub const fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub const fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn num_pixels(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Returns the aspect ratio, or [`None`] if either dimension is zero.
    pub fn aspect_ratio(&self) -> Option<AspectRatio> {
        AspectRatio::new(self.width, self.height)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Ratio of width to height. Always positive and finite.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct AspectRatio(f32);

impl AspectRatio {
    pub const SQUARE: Self = Self(1.0);

    pub fn new(width: u32, height: u32) -> Option<Self> {
        if width == 0 || height == 0 {
            None
        } else {
            Some(Self(width as f32 / height as f32))
        }
    }

    #[inline]
    pub fn as_f32(self) -> f32 {
        self.0
    }
}
