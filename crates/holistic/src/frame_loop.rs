//! The per-frame prediction and rendering loop.
//!
//! Each [`FrameLoop::tick`] looks at the current frame of a video. If the frame is new, all three
//! landmarkers run on it in parallel, each on its own worker thread. The cached results are then
//! drawn onto the overlay canvas and into the 3D world views.

use std::{
    io,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{bail, Context};
use pawawwewism::{promise, Promise, PromiseHandle, Worker};

use crate::bootstrap::Landmarkers;
use crate::config::Config;
use crate::face::{mesh::Connection, FaceLandmarkerResult};
use crate::hand::HandLandmarkerResult;
use crate::image::{Image, Resolution};
use crate::landmark::Landmarker;
use crate::overlay::OverlayRenderer;
use crate::pose::PoseLandmarkerResult;
use crate::timer::{FpsCounter, Timer};
use crate::video::VideoSource;
use crate::world::{WorldTraces, WorldViews};

/// Canvas and display sizes for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Surfaces {
    /// Size of the drawing canvas, equal to the native video resolution.
    pub canvas: Resolution,
    /// Size the canvas is shown at: a fixed width, with the height following the video's aspect
    /// ratio.
    pub display: Resolution,
}

impl Surfaces {
    pub fn for_video(video: Resolution, display_width: u32) -> Self {
        let (w, h) = (u64::from(video.width()), u64::from(video.height()));
        let display_height = match w {
            0 => 0,
            _ => (u64::from(display_width) * h + w / 2) / w,
        };
        Self {
            canvas: video,
            display: Resolution::new(display_width, display_height as u32),
        }
    }
}

/// Outcome of a [`FrameLoop::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickReport {
    /// The video has no frame yet. Nothing was rendered.
    NoFrame,
    /// The overlay and world views were rendered.
    Rendered {
        /// Whether the landmarkers ran. They are skipped if the video time hasn't changed since
        /// the last tick.
        detected: bool,
        surfaces: Surfaces,
    },
}

/// Settings of a [`FrameLoop`].
#[derive(Debug, Clone)]
pub struct FrameLoopOptions {
    pub display_width: u32,
    /// Draw the video frame underneath the landmarks.
    pub draw_video: bool,
    /// Face mesh edges drawn by the overlay. Empty to triangulate the detected landmarks.
    pub tessellation: Vec<Connection>,
    /// Size of each world view.
    pub view_resolution: Resolution,
}

impl Default for FrameLoopOptions {
    fn default() -> Self {
        Self {
            display_width: 480,
            draw_video: false,
            tessellation: Vec::new(),
            view_resolution: Resolution::new(480, 360),
        }
    }
}

struct Job<R> {
    image: Arc<Image>,
    timestamp_ms: u64,
    result: Promise<anyhow::Result<R>>,
}

fn spawn_worker<L: Landmarker>(
    name: &'static str,
    mut landmarker: L,
) -> io::Result<Worker<Job<L::Result>>> {
    let mut fps = FpsCounter::new(name);
    Worker::builder().name(name).spawn(
        move |Job {
                  image,
                  timestamp_ms,
                  result,
              }| {
            result.fulfill(landmarker.detect_for_video(&image, timestamp_ms));
            fps.tick_with(landmarker.timers());
        },
    )
}

fn join<R>(task: &str, handle: PromiseHandle<anyhow::Result<R>>) -> anyhow::Result<R> {
    match handle.block() {
        Ok(res) => res.with_context(|| format!("{task} landmarker failed")),
        Err(_) => bail!("{task} landmarker worker has stopped"),
    }
}

struct Workers {
    hand: Worker<Job<HandLandmarkerResult>>,
    face: Worker<Job<FaceLandmarkerResult>>,
    pose: Worker<Job<PoseLandmarkerResult>>,
}

impl Workers {
    /// Runs all landmarkers on `image` and waits for their results.
    fn run(
        &mut self,
        image: &Arc<Image>,
        timestamp_ms: u64,
    ) -> anyhow::Result<(HandLandmarkerResult, FaceLandmarkerResult, PoseLandmarkerResult)> {
        let (hand, hand_handle) = promise();
        let (face, face_handle) = promise();
        let (pose, pose_handle) = promise();
        self.hand.send(Job {
            image: image.clone(),
            timestamp_ms,
            result: hand,
        });
        self.face.send(Job {
            image: image.clone(),
            timestamp_ms,
            result: face,
        });
        self.pose.send(Job {
            image: image.clone(),
            timestamp_ms,
            result: pose,
        });

        // Wait for all three before reporting errors, so no frame stays in flight.
        let hands = join("hand", hand_handle);
        let faces = join("face", face_handle);
        let poses = join("pose", pose_handle);
        Ok((hands?, faces?, poses?))
    }
}

/// Runs the landmarkers on new video frames and renders their results.
pub struct FrameLoop {
    workers: Workers,
    start: Instant,
    last_timestamp: Option<u64>,
    last_video_time: Option<Duration>,
    hands: HandLandmarkerResult,
    faces: FaceLandmarkerResult,
    poses: PoseLandmarkerResult,
    overlay: OverlayRenderer,
    traces: WorldTraces,
    views: WorldViews,
    canvas: Image,
    surfaces: Option<Surfaces>,
    display_width: u32,
    draw_video: bool,
    fps: FpsCounter,
    t_detect: Timer,
    t_render: Timer,
}

impl FrameLoop {
    /// Creates a frame loop, moving each landmarker onto its own worker thread.
    pub fn new<H, F, P>(hand: H, face: F, pose: P, options: FrameLoopOptions) -> io::Result<Self>
    where
        H: Landmarker<Result = HandLandmarkerResult>,
        F: Landmarker<Result = FaceLandmarkerResult>,
        P: Landmarker<Result = PoseLandmarkerResult>,
    {
        let workers = Workers {
            hand: spawn_worker("hand landmarker", hand)?,
            face: spawn_worker("face landmarker", face)?,
            pose: spawn_worker("pose landmarker", pose)?,
        };
        Ok(Self {
            workers,
            start: Instant::now(),
            last_timestamp: None,
            last_video_time: None,
            hands: HandLandmarkerResult::default(),
            faces: FaceLandmarkerResult::default(),
            poses: PoseLandmarkerResult::default(),
            overlay: OverlayRenderer::new(options.tessellation),
            traces: WorldTraces::default(),
            views: WorldViews::new(options.view_resolution),
            canvas: Image::new(0, 0),
            surfaces: None,
            display_width: options.display_width,
            draw_video: options.draw_video,
            fps: FpsCounter::new("frame loop"),
            t_detect: Timer::new("detect"),
            t_render: Timer::new("render"),
        })
    }

    /// Creates a frame loop driving the loaded landmarkers, configured by `config`.
    pub fn from_landmarkers(landmarkers: Landmarkers, config: &Config) -> io::Result<Self> {
        let Landmarkers { hand, face, pose } = landmarkers;
        let options = FrameLoopOptions {
            display_width: config.display_width,
            draw_video: config.draw_video,
            tessellation: face.tessellation().to_vec(),
            ..FrameLoopOptions::default()
        };
        Self::new(hand, face, pose, options)
    }

    /// Processes the current frame of `video`.
    ///
    /// Errors from any landmarker are returned after all of them have finished. The caller is
    /// expected to stop the loop then.
    pub fn tick(&mut self, video: &dyn VideoSource) -> anyhow::Result<TickReport> {
        let Some(frame) = video.current_frame() else {
            return Ok(TickReport::NoFrame);
        };

        let surfaces = Surfaces::for_video(frame.image.resolution(), self.display_width);
        if self.canvas.resolution() != surfaces.canvas {
            log::debug!(
                "resizing canvas to {} (displayed at {})",
                surfaces.canvas,
                surfaces.display,
            );
            self.canvas = Image::new(surfaces.canvas.width(), surfaces.canvas.height());
        }
        self.surfaces = Some(surfaces);

        let detected = self.last_video_time != Some(frame.time);
        if detected {
            self.last_video_time = Some(frame.time);
            let timestamp_ms = self.next_timestamp();

            let guard = self.t_detect.start();
            let (hands, faces, poses) = self.workers.run(&frame.image, timestamp_ms)?;
            drop(guard);

            self.hands = hands;
            self.faces = faces;
            self.poses = poses;
        }

        let guard = self.t_render.start();
        let background = if self.draw_video {
            Some(&*frame.image)
        } else {
            None
        };
        self.overlay.render(
            &mut self.canvas,
            background,
            &self.hands,
            &self.faces,
            &self.poses,
        );
        self.traces.update(&self.hands, &self.poses);
        self.views.redraw(&self.traces);
        drop(guard);

        self.fps.tick_with([&self.t_detect, &self.t_render]);
        Ok(TickReport::Rendered { detected, surfaces })
    }

    /// Returns a strictly increasing timestamp in milliseconds since the loop was created.
    fn next_timestamp(&mut self) -> u64 {
        let now = self.start.elapsed().as_millis() as u64;
        let ts = match self.last_timestamp {
            Some(prev) if now <= prev => prev + 1,
            _ => now,
        };
        self.last_timestamp = Some(ts);
        ts
    }

    /// Returns the overlay canvas, at the native video resolution.
    pub fn canvas(&self) -> &Image {
        &self.canvas
    }

    /// Returns the overlay canvas scaled to its display size.
    ///
    /// Returns [`None`] until the first frame was rendered.
    pub fn display_image(&self) -> Option<Image> {
        let display = self.surfaces?.display;
        Some(self.canvas.resized(display.width(), display.height()))
    }

    pub fn surfaces(&self) -> Option<Surfaces> {
        self.surfaces
    }

    pub fn hands(&self) -> &HandLandmarkerResult {
        &self.hands
    }

    pub fn faces(&self) -> &FaceLandmarkerResult {
        &self.faces
    }

    pub fn poses(&self) -> &PoseLandmarkerResult {
        &self.poses
    }

    pub fn traces(&self) -> &WorldTraces {
        &self.traces
    }

    pub fn views(&self) -> &WorldViews {
        &self.views
    }
}
