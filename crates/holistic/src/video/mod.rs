//! Video sources.
//!
//! A camera is opened through the [`Camera`] trait, which hands out a [`Stream`]. Each stream runs
//! a capture thread that keeps only the most recent frame, so consumers that are slower than the
//! camera always see the latest image instead of a growing backlog.

pub mod webcam;

use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crate::error::CameraError;
use crate::image::Image;
use crate::timer::FpsCounter;

/// A decoded video frame and its presentation time.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Time since the stream was started.
    pub time: Duration,
    pub image: Arc<Image>,
}

/// Something that displays a continuously updated frame, like a playing video.
pub trait VideoSource {
    /// Returns the frame that is currently being shown, or [`None`] before the first frame.
    fn current_frame(&self) -> Option<Frame>;

    /// Returns the presentation time of the current frame.
    ///
    /// The time only changes when a new frame arrives.
    fn current_time(&self) -> Option<Duration> {
        self.current_frame().map(|frame| frame.time)
    }
}

/// A device that can be asked for a video stream.
pub trait Camera {
    /// Requests access to the camera and starts streaming from it.
    fn request_stream(&mut self) -> Result<Stream, CameraError>;
}

/// Shared slot holding the latest frame of a stream.
#[derive(Clone)]
pub struct FrameSlot {
    start: Instant,
    latest: Arc<Mutex<Option<Frame>>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            latest: Arc::new(Mutex::new(None)),
        }
    }

    /// Replaces the current frame with `image`, stamped with the time since the slot was created.
    pub fn publish(&self, image: Image) {
        self.publish_at(self.start.elapsed(), image);
    }

    /// Replaces the current frame with `image`, using an explicit presentation time.
    pub fn publish_at(&self, time: Duration, image: Image) {
        let frame = Frame {
            time,
            image: Arc::new(image),
        };
        *self.latest.lock().unwrap_or_else(|e| e.into_inner()) = Some(frame);
    }
}

impl Default for FrameSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoSource for FrameSlot {
    fn current_frame(&self) -> Option<Frame> {
        self.latest.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// An active video stream.
///
/// Dropping the stream stops its capture thread.
pub struct Stream {
    slot: FrameSlot,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Stream {
    /// Starts a capture thread that calls `read` in a loop and publishes every frame.
    ///
    /// The thread exits when `read` fails or when the stream is dropped.
    pub fn spawn<F>(name: &str, mut read: F) -> io::Result<Self>
    where
        F: FnMut() -> anyhow::Result<Image> + Send + 'static,
    {
        let slot = FrameSlot::new();
        let stop = Arc::new(AtomicBool::new(false));

        let thread = {
            let slot = slot.clone();
            let stop = stop.clone();
            let mut fps = FpsCounter::new(name);
            thread::Builder::new()
                .name(name.into())
                .spawn(move || {
                    while !stop.load(Ordering::Relaxed) {
                        match read() {
                            Ok(image) => slot.publish(image),
                            Err(e) => {
                                log::error!("capture stopped: {e:#}");
                                break;
                            }
                        }
                        fps.tick();
                    }
                })?
        };

        Ok(Self {
            slot,
            stop,
            thread: Some(thread),
        })
    }

    /// Creates a stream without capture thread, whose frames are published through `slot`.
    pub fn from_slot(slot: FrameSlot) -> Self {
        Self {
            slot,
            stop: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    /// Returns whether the stream has delivered its first frame.
    pub fn has_frame(&self) -> bool {
        self.slot.current_frame().is_some()
    }

    /// Returns whether the stream can still deliver frames.
    ///
    /// A capture thread that has exited, because reading from the device failed, has released the
    /// device. Streams without capture thread are always alive.
    pub fn is_alive(&self) -> bool {
        self.thread
            .as_ref()
            .map_or(true, |thread| !thread.is_finished())
    }

    pub fn slot(&self) -> &FrameSlot {
        &self.slot
    }
}

impl VideoSource for Stream {
    fn current_frame(&self) -> Option<Frame> {
        self.slot.current_frame()
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        // A running thread may be blocked waiting for the device, so it is detached rather than
        // joined.
        if let Some(thread) = self.thread.take() {
            if thread.is_finished() && thread.join().is_err() {
                log::error!("capture thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_keeps_latest_frame() {
        let slot = FrameSlot::new();
        assert!(slot.current_frame().is_none());
        assert_eq!(slot.current_time(), None);

        slot.publish_at(Duration::from_millis(10), Image::new(4, 4));
        slot.publish_at(Duration::from_millis(20), Image::new(8, 8));

        let frame = slot.current_frame().unwrap();
        assert_eq!(frame.time, Duration::from_millis(20));
        assert_eq!(frame.image.width(), 8);
    }

    #[test]
    fn capture_thread_publishes() {
        let (send, recv) = std::sync::mpsc::channel::<Image>();
        let stream = Stream::spawn("test capture", move || {
            recv.recv().map_err(|_| anyhow::anyhow!("closed"))
        })
        .unwrap();
        assert!(!stream.has_frame());

        send.send(Image::new(2, 2)).unwrap();
        let start = Instant::now();
        while !stream.has_frame() {
            assert!(start.elapsed() < Duration::from_secs(5), "no frame arrived");
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(stream.current_frame().unwrap().image.width(), 2);
        assert!(stream.is_alive());
    }

    #[test]
    fn read_error_ends_stream() {
        let stream =
            Stream::spawn("test capture", || Err(anyhow::anyhow!("device unplugged"))).unwrap();
        let start = Instant::now();
        while stream.is_alive() {
            assert!(start.elapsed() < Duration::from_secs(5), "capture thread kept running");
            thread::sleep(Duration::from_millis(1));
        }
        assert!(!stream.has_frame());
        assert!(Stream::from_slot(FrameSlot::new()).is_alive());
    }
}
