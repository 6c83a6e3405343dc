//! Live hand, face, and body pose landmark viewer.
//!
//! Frames from a webcam are fed into three independent landmark pipelines (hands, faces, and body
//! poses). The landmarks are drawn onto a 2D overlay, and the 3D world-space landmarks of hands and
//! poses are plotted in two separate 3D views.
//!
//! # Coordinates
//!
//! Normalized landmarks use image coordinates: X points right and Y points *down*, both in range
//! 0.0 to 1.0 across the image. Z uses roughly the same scale as X, with smaller values being
//! closer to the camera.
//!
//! World landmarks are in meters, centered on the tracked subject (the hips for body poses, the
//! hand's approximate geometric center for hands), with the same axis directions.
//!
//! # Environment Variables
//!
//! The application is configured through environment variables (see [`config::Config`]):
//!
//! * `HOLISTIC_WEBCAM_NAME`: Forces the device to use for [`Webcam`]s created without an explicit
//!   device name. If unset, the first device that supports a compatible image format will be used.
//! * `HOLISTIC_MODEL_DIR`: Directory containing the model bundles, also used as the download cache.
//! * `HOLISTIC_MODEL_URL`: Base URL to download missing model bundles from.
//! * `HOLISTIC_DELEGATE`: Preferred inference delegate, `cpu` or `gpu`.
//! * `HOLISTIC_DISPLAY_WIDTH`: Width of the displayed overlay, in pixels.
//! * `HOLISTIC_FPS`: Rate at which the frame loop runs.
//! * `HOLISTIC_DRAW_VIDEO`: If `true`, the overlay is drawn on top of the camera image.
//!
//! [`Webcam`]: video::webcam::Webcam

use log::LevelFilter;

pub mod app;
pub mod bootstrap;
pub mod capture;
pub mod config;
pub mod detection;
pub mod error;
pub mod face;
pub mod frame_loop;
pub mod gui;
pub mod hand;
pub mod image;
pub mod landmark;
pub mod nn;
pub mod num;
pub mod overlay;
pub mod plot3d;
pub mod pose;
pub mod runtime;
pub mod termination;
pub mod timer;
pub mod video;
pub mod world;

pub use holistic_macros::main;

/// macro-use only, not part of public API.
#[doc(hidden)]
pub fn init_logger(calling_crate: &'static str) {
    let log_level = LevelFilter::Debug;
    env_logger::Builder::new()
        .filter(Some(calling_crate), log_level)
        .filter(Some(env!("CARGO_CRATE_NAME")), log_level)
        .filter(Some("wgpu"), LevelFilter::Warn)
        .filter(Some("naga"), LevelFilter::Warn)
        .parse_default_env()
        .try_init()
        .ok();
}

/// Initializes logging to *stderr*.
///
/// The calling crate and this library will log at *debug* level, `wgpu` at *warn* level. The
/// `RUST_LOG` environment variable overrides these defaults.
///
/// If a global logger is already registered, this macro will do nothing.
#[macro_export]
macro_rules! init_logger {
    () => {
        $crate::init_logger(env!("CARGO_CRATE_NAME"))
    };
}

/// macro-use only, not part of public API.
///
/// Runs `cb` on a background thread while the calling thread drives the GUI event loop.
#[doc(hidden)]
pub fn run<F, R>(cb: F) -> !
where
    F: FnOnce() -> R + Send + 'static,
    R: termination::Termination + Send,
{
    gui::run(cb)
}
