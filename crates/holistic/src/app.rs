//! Application wiring.
//!
//! [`App`] ties the capture controller, the background bootstrap, and the frame loop together.
//! [`run`] drives it from GUI input and a [`FrameScheduler`].

use std::{
    sync::mpsc::RecvTimeoutError,
    time::{Duration, Instant},
};

use crate::bootstrap::{self, Bootstrap};
use crate::capture::{CaptureController, Toggle};
use crate::config::Config;
use crate::frame_loop::{FrameLoop, TickReport};
use crate::gui::{self, GuiEvent, Key};
use crate::image::{draw, Color, Image, Rect};
use crate::video::{
    webcam::{self, WebcamCamera, WebcamOptions},
    Camera,
};

pub const CONTROLS_WINDOW: &str = "controls";
pub const LANDMARKS_WINDOW: &str = "landmarks";
pub const HAND_VIEW_WINDOW: &str = "hand world view";
pub const POSE_VIEW_WINDOW: &str = "pose world view";

const CONTROLS_WIDTH: u32 = 320;
const CONTROLS_HEIGHT: u32 = 64;
const BUTTON_COLOR: Color = Color::from_rgb8(0x00, 0x7f, 0x8b);
const DISABLED_COLOR: Color = Color::from_rgb8(0x60, 0x60, 0x60);

/// Fixed-rate tick source.
///
/// Ticks that were missed (because a tick took longer than the interval) are skipped instead of
/// being run back-to-back.
#[derive(Debug)]
pub struct FrameScheduler {
    interval: Duration,
    next: Instant,
}

impl FrameScheduler {
    /// Creates a scheduler whose first tick is due immediately.
    pub fn new(interval: Duration) -> Self {
        Self::starting_at(interval, Instant::now())
    }

    pub fn starting_at(interval: Duration, start: Instant) -> Self {
        Self {
            interval,
            next: start,
        }
    }

    /// Returns the time left until the next tick is due.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.next.saturating_duration_since(now)
    }

    /// Returns whether a tick is due at `now`. If so, the following tick is scheduled.
    pub fn poll(&mut self, now: Instant) -> bool {
        if now < self.next {
            return false;
        }
        self.next += self.interval;
        if self.next <= now {
            self.next = now + self.interval;
        }
        true
    }
}

/// Whether the application should keep going after handling an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Application state, owned by the application thread.
pub struct App<C> {
    bootstrap: Bootstrap<FrameLoop>,
    frame_loop: Option<FrameLoop>,
    controller: CaptureController<C>,
    armed: bool,
}

impl<C: Camera> App<C> {
    pub fn new(bootstrap: Bootstrap<FrameLoop>, controller: CaptureController<C>) -> Self {
        Self {
            bootstrap,
            frame_loop: None,
            controller,
            armed: false,
        }
    }

    /// Returns whether the landmarkers have been loaded.
    pub fn is_ready(&mut self) -> bool {
        if self.frame_loop.is_none() {
            self.frame_loop = self.bootstrap.take();
        }
        self.frame_loop.is_some()
    }

    /// Handles a click on the toggle control.
    pub fn toggle(&mut self) -> Toggle {
        let ready = self.is_ready();
        let outcome = self.controller.toggle(ready);
        if outcome != Toggle::Started {
            self.armed = self.armed && self.controller.is_running();
        }
        log::debug!("toggle: {outcome:?}, label now '{}'", self.label());
        outcome
    }

    pub fn handle(&mut self, event: &GuiEvent) -> Flow {
        match event {
            GuiEvent::Closed(key) => {
                log::info!("window '{key}' closed, exiting");
                Flow::Quit
            }
            GuiEvent::KeyPressed(_, Key::Escape) => Flow::Quit,
            GuiEvent::Clicked(key) if key == CONTROLS_WINDOW => {
                self.toggle();
                Flow::Continue
            }
            GuiEvent::KeyPressed(_, Key::Space) => {
                self.toggle();
                Flow::Continue
            }
            GuiEvent::Clicked(_) => Flow::Continue,
        }
    }

    /// Runs one frame loop iteration if the loop is armed.
    ///
    /// The loop is armed once a started stream delivers its first frame, and disarmed as soon as
    /// predictions are switched off. A landmarker error switches predictions off.
    pub fn tick(&mut self) -> Option<TickReport> {
        if self.controller.poll_loop_start() {
            log::info!("first frame received, starting frame loop");
            self.armed = true;
        }
        if !self.controller.is_running() {
            self.armed = false;
        }
        if !self.armed {
            return None;
        }

        let (frame_loop, stream) = match (&mut self.frame_loop, self.controller.stream()) {
            (Some(frame_loop), Some(stream)) => (frame_loop, stream),
            _ => return None,
        };
        match frame_loop.tick(stream) {
            Ok(report) => Some(report),
            Err(e) => {
                log::error!("frame loop stopped: {e:#}");
                self.controller.stop();
                self.armed = false;
                None
            }
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn label(&self) -> &'static str {
        self.controller.label()
    }

    pub fn controller(&self) -> &CaptureController<C> {
        &self.controller
    }

    pub fn frame_loop(&self) -> Option<&FrameLoop> {
        self.frame_loop.as_ref()
    }

    /// Renders the toggle control.
    pub fn controls_image(&self) -> Image {
        let mut image = Image::new(CONTROLS_WIDTH, CONTROLS_HEIGHT);
        let color = if self.controller.is_supported() {
            BUTTON_COLOR
        } else {
            DISABLED_COLOR
        };
        let (w, h) = (CONTROLS_WIDTH as f32, CONTROLS_HEIGHT as f32);
        draw::rect(&mut image, Rect::from_top_left(8.0, 8.0, w - 16.0, h - 16.0))
            .color(color)
            .fill(color);
        draw::text(&mut image, [w / 2.0, h / 2.0], self.label()).color(Color::WHITE);
        image
    }
}

/// Runs the viewer until a window is closed or Escape is pressed.
pub fn run() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    log::debug!("{config:?}");

    let loader_config = config.clone();
    let bootstrap = Bootstrap::spawn("landmarker bootstrap", move || {
        let landmarkers = bootstrap::load_landmarkers(&loader_config)?;
        Ok(FrameLoop::from_landmarkers(landmarkers, &loader_config)?)
    })?;

    let mut options = WebcamOptions::default().fps(config.fps);
    if let Some(name) = &config.webcam_name {
        options = options.name(name.clone());
    }
    let controller = CaptureController::new(WebcamCamera::new(options), webcam::is_supported());
    let mut app = App::new(bootstrap, controller);

    let events = gui::subscribe();
    let mut label = app.label();
    gui::show_image(CONTROLS_WINDOW, &app.controls_image());

    let mut scheduler = FrameScheduler::new(config.frame_interval());
    loop {
        match events.recv_timeout(scheduler.remaining(Instant::now())) {
            Ok(event) => {
                if app.handle(&event) == Flow::Quit {
                    return Ok(());
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return Ok(()),
        }

        if scheduler.poll(Instant::now()) {
            if let Some(TickReport::Rendered { .. }) = app.tick() {
                if let Some(frame_loop) = app.frame_loop() {
                    if let Some(image) = frame_loop.display_image() {
                        gui::show_image(LANDMARKS_WINDOW, &image);
                    }
                    gui::show_image(HAND_VIEW_WINDOW, frame_loop.views().hand_view());
                    gui::show_image(POSE_VIEW_WINDOW, frame_loop.views().pose_view());
                }
            }
        }

        if app.label() != label {
            label = app.label();
            gui::show_image(CONTROLS_WINDOW, &app.controls_image());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduler_ticks_at_fixed_rate() {
        let start = Instant::now();
        let interval = Duration::from_millis(10);
        let mut scheduler = FrameScheduler::starting_at(interval, start);

        assert!(scheduler.poll(start));
        assert!(!scheduler.poll(start + Duration::from_millis(5)));
        assert_eq!(
            scheduler.remaining(start + Duration::from_millis(5)),
            Duration::from_millis(5)
        );
        assert!(scheduler.poll(start + interval));
    }

    #[test]
    fn scheduler_skips_missed_ticks() {
        let start = Instant::now();
        let interval = Duration::from_millis(10);
        let mut scheduler = FrameScheduler::starting_at(interval, start);

        assert!(scheduler.poll(start));
        let late = start + Duration::from_millis(55);
        assert!(scheduler.poll(late));
        assert!(!scheduler.poll(late + Duration::from_millis(1)));
        assert_eq!(scheduler.remaining(late), interval);
    }
}
