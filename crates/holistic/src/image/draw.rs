//! Drawing primitives.
//!
//! Every function returns a guard that can be used to customize the drawn shape. The shape is drawn
//! when the guard is dropped. Colors with alpha below 255 are blended onto the image.

use std::convert::Infallible;

use embedded_graphics::{
    draw_target::DrawTarget,
    mono_font::{ascii, MonoTextStyle},
    prelude::*,
    primitives::{Circle, Line, PrimitiveStyle, PrimitiveStyleBuilder, Rectangle},
    text::{Alignment, Baseline, Text, TextStyleBuilder},
};

use super::{Color, Image, Rect};

fn point([x, y]: [f32; 2]) -> Point {
    Point::new(x.round() as i32, y.round() as i32)
}

fn draw<D: Drawable<Color = Color>>(image: &mut Image, drawable: &D) {
    match drawable.draw(&mut Target(image)) {
        Ok(_) => {}
        Err(infallible) => match infallible {},
    }
}

/// Guard returned by [`line`]; draws the line when dropped and allows customization.
pub struct DrawLine<'a> {
    image: &'a mut Image,
    start: [f32; 2],
    end: [f32; 2],
    color: Color,
    stroke_width: u32,
}

impl DrawLine<'_> {
    /// Sets the line's color.
    pub fn color(&mut self, color: Color) -> &mut Self {
        self.color = color;
        self
    }

    /// Sets the line's stroke width.
    ///
    /// By default, a stroke width of 1 is used.
    pub fn stroke_width(&mut self, width: u32) -> &mut Self {
        self.stroke_width = width;
        self
    }
}

impl Drop for DrawLine<'_> {
    fn drop(&mut self) {
        let line = Line::new(point(self.start), point(self.end))
            .into_styled(PrimitiveStyle::with_stroke(self.color, self.stroke_width));
        draw(self.image, &line);
    }
}

/// Guard returned by [`circle`]; draws the circle when dropped and allows customization.
pub struct DrawCircle<'a> {
    image: &'a mut Image,
    center: [f32; 2],
    radius: f32,
    stroke: Color,
    stroke_width: u32,
    fill: Option<Color>,
}

impl DrawCircle<'_> {
    /// Sets the color of the circle's outline.
    pub fn color(&mut self, color: Color) -> &mut Self {
        self.stroke = color;
        self
    }

    /// Sets the width of the circle's outline. A width of 0 draws no outline.
    ///
    /// By default, a stroke width of 1 is used.
    pub fn stroke_width(&mut self, width: u32) -> &mut Self {
        self.stroke_width = width;
        self
    }

    /// Fills the circle's interior with `color`.
    pub fn fill(&mut self, color: Color) -> &mut Self {
        self.fill = Some(color);
        self
    }
}

impl Drop for DrawCircle<'_> {
    fn drop(&mut self) {
        let diameter = (self.radius * 2.0).round().max(1.0) as u32;
        let mut style = PrimitiveStyleBuilder::new();
        if self.stroke_width > 0 {
            style = style
                .stroke_color(self.stroke)
                .stroke_width(self.stroke_width);
        }
        if let Some(fill) = self.fill {
            style = style.fill_color(fill);
        }
        let circle = Circle::with_center(point(self.center), diameter).into_styled(style.build());
        draw(self.image, &circle);
    }
}

/// Guard returned by [`rect`]; draws the rectangle when dropped and allows customization.
pub struct DrawRect<'a> {
    image: &'a mut Image,
    rect: Rect,
    color: Color,
    stroke_width: u32,
    fill: Option<Color>,
}

impl DrawRect<'_> {
    /// Sets the rectangle's outline color.
    pub fn color(&mut self, color: Color) -> &mut Self {
        self.color = color;
        self
    }

    /// Sets the rectangle's stroke width.
    pub fn stroke_width(&mut self, width: u32) -> &mut Self {
        self.stroke_width = width;
        self
    }

    /// Fills the rectangle's interior with `color`.
    pub fn fill(&mut self, color: Color) -> &mut Self {
        self.fill = Some(color);
        self
    }
}

impl Drop for DrawRect<'_> {
    fn drop(&mut self) {
        let top_left = point([self.rect.x(), self.rect.y()]);
        let size = Size::new(
            self.rect.width().round() as u32,
            self.rect.height().round() as u32,
        );
        let mut style = PrimitiveStyleBuilder::new()
            .stroke_color(self.color)
            .stroke_width(self.stroke_width);
        if let Some(fill) = self.fill {
            style = style.fill_color(fill);
        }
        draw(
            self.image,
            &Rectangle::new(top_left, size).into_styled(style.build()),
        );
    }
}

/// Guard returned by [`text`]; draws the text when dropped and allows customization.
pub struct DrawText<'a> {
    image: &'a mut Image,
    pos: [f32; 2],
    text: &'a str,
    color: Color,
}

impl DrawText<'_> {
    /// Sets the text color.
    pub fn color(&mut self, color: Color) -> &mut Self {
        self.color = color;
        self
    }
}

impl Drop for DrawText<'_> {
    fn drop(&mut self) {
        let character_style = MonoTextStyle::new(&ascii::FONT_10X20, self.color);
        let text_style = TextStyleBuilder::new()
            .alignment(Alignment::Center)
            .baseline(Baseline::Middle)
            .build();
        let text = Text::with_text_style(self.text, point(self.pos), character_style, text_style);
        draw(self.image, &text);
    }
}

/// Draws a line from `start` to `end`.
pub fn line(image: &mut Image, start: [f32; 2], end: [f32; 2]) -> DrawLine<'_> {
    DrawLine {
        image,
        start,
        end,
        color: Color::WHITE,
        stroke_width: 1,
    }
}

/// Draws a circle around `center`.
pub fn circle(image: &mut Image, center: [f32; 2], radius: f32) -> DrawCircle<'_> {
    DrawCircle {
        image,
        center,
        radius,
        stroke: Color::WHITE,
        stroke_width: 1,
        fill: None,
    }
}

/// Draws an axis-aligned rectangle.
pub fn rect(image: &mut Image, rect: Rect) -> DrawRect<'_> {
    DrawRect {
        image,
        rect,
        color: Color::WHITE,
        stroke_width: 1,
        fill: None,
    }
}

/// Draws a text string.
///
/// The text is centered horizontally and vertically around `pos`.
pub fn text<'a>(image: &'a mut Image, pos: [f32; 2], text: &'a str) -> DrawText<'a> {
    DrawText {
        image,
        pos,
        text,
        color: Color::WHITE,
    }
}

struct Target<'a>(&'a mut Image);

impl Dimensions for Target<'_> {
    fn bounding_box(&self) -> Rectangle {
        Rectangle {
            top_left: Point { x: 0, y: 0 },
            size: Size {
                width: self.0.width(),
                height: self.0.height(),
            },
        }
    }
}

impl DrawTarget for Target<'_> {
    type Color = Color;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(pos, color) in pixels {
            if pos.x >= 0 && pos.y >= 0 {
                self.0.blend(pos.x as u32, pos.y as u32, color);
            }
        }

        Ok(())
    }
}
