//! The prediction toggle.
//!
//! [`CaptureController`] owns the run-state of the frame loop and the camera stream feeding it.
//! Turning predictions off only stops the loop. The stream stays bound and is resumed by the next
//! start, so an exclusive device is never opened twice.

use std::fmt;

use crate::video::{Camera, Stream};

pub const LABEL_ENABLE: &str = "ENABLE PREDICTIONS";
pub const LABEL_DISABLE: &str = "DISABLE PREDICTIONS";

/// Outcome of [`CaptureController::toggle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    /// Capture isn't supported here, the control does nothing.
    Disabled,
    /// The landmarkers haven't finished loading. Nothing changed.
    NotReady,
    /// A camera stream was opened or resumed. The frame loop starts once it delivers a frame.
    Started,
    /// The frame loop was stopped.
    Stopped,
    /// The camera could not be opened. Predictions stay off.
    Failed,
}

/// Toggles webcam-driven predictions on and off.
pub struct CaptureController<C> {
    camera: C,
    supported: bool,
    running: bool,
    stream: Option<Stream>,
    pending_start: bool,
}

impl<C: Camera> CaptureController<C> {
    /// Creates a controller for `camera`, initially off.
    ///
    /// If `supported` is `false`, the control is disabled and every toggle is ignored.
    pub fn new(camera: C, supported: bool) -> Self {
        if !supported {
            log::warn!("video capture is not supported on this system");
        }
        Self {
            camera,
            supported,
            running: false,
            stream: None,
            pending_start: false,
        }
    }

    /// Handles a click on the control.
    ///
    /// `ready` tells whether all landmarkers are loaded. Starting without them is refused.
    pub fn toggle(&mut self, ready: bool) -> Toggle {
        if !self.supported {
            log::warn!("video capture is not supported, ignoring toggle");
            return Toggle::Disabled;
        }
        if !ready {
            log::info!("Wait! landmarkers not loaded yet.");
            return Toggle::NotReady;
        }

        if self.running {
            self.stop();
            return Toggle::Stopped;
        }

        self.running = true;
        self.pending_start = true;
        if self.stream.as_ref().is_some_and(Stream::is_alive) {
            log::debug!("resuming bound camera stream");
            return Toggle::Started;
        }

        // Any stream still bound has a finished capture thread, join it before reopening.
        self.stream = None;
        match self.camera.request_stream() {
            Ok(stream) => {
                self.stream = Some(stream);
                Toggle::Started
            }
            Err(e) => {
                log::error!("{}: {}", e.name(), e);
                self.stop();
                Toggle::Failed
            }
        }
    }

    /// Stops the frame loop, keeping the current stream bound.
    pub fn stop(&mut self) {
        self.running = false;
        self.pending_start = false;
    }

    /// Returns `true` exactly once after a successful start, as soon as the stream has delivered
    /// its first frame.
    pub fn poll_loop_start(&mut self) -> bool {
        if !self.pending_start || !self.running {
            return false;
        }
        match &self.stream {
            Some(stream) if stream.has_frame() => {
                self.pending_start = false;
                true
            }
            _ => false,
        }
    }

    /// Returns whether predictions are switched on.
    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_supported(&self) -> bool {
        self.supported
    }

    /// Returns the label to show on the control.
    pub fn label(&self) -> &'static str {
        if self.running {
            LABEL_DISABLE
        } else {
            LABEL_ENABLE
        }
    }

    /// Returns the bound stream, if any.
    pub fn stream(&self) -> Option<&Stream> {
        self.stream.as_ref()
    }
}

impl<C> fmt::Debug for CaptureController<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureController")
            .field("supported", &self.supported)
            .field("running", &self.running)
            .field("stream", &self.stream.is_some())
            .field("pending_start", &self.pending_start)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        cell::Cell,
        rc::Rc,
        sync::Arc,
        thread,
        time::{Duration, Instant},
    };

    use crate::error::CameraError;
    use crate::image::Image;
    use crate::video::FrameSlot;

    use super::*;

    /// Camera handing out streams fed by a shared slot.
    struct MockCamera {
        requests: Rc<Cell<usize>>,
        slot: FrameSlot,
        fail: bool,
    }

    impl Camera for MockCamera {
        fn request_stream(&mut self) -> Result<Stream, CameraError> {
            self.requests.set(self.requests.get() + 1);
            if self.fail {
                Err(CameraError::NotReadable("device busy".into()))
            } else {
                Ok(Stream::from_slot(self.slot.clone()))
            }
        }
    }

    fn controller(fail: bool) -> (CaptureController<MockCamera>, Rc<Cell<usize>>, FrameSlot) {
        let requests = Rc::new(Cell::new(0));
        let slot = FrameSlot::new();
        let camera = MockCamera {
            requests: requests.clone(),
            slot: slot.clone(),
            fail,
        };
        (CaptureController::new(camera, true), requests, slot)
    }

    #[test]
    fn not_ready_changes_nothing() {
        let (mut ctrl, requests, _) = controller(false);
        assert_eq!(ctrl.toggle(false), Toggle::NotReady);
        assert!(!ctrl.is_running());
        assert_eq!(ctrl.label(), LABEL_ENABLE);
        assert_eq!(requests.get(), 0);
    }

    #[test]
    fn toggle_on_off_on() {
        let (mut ctrl, requests, slot) = controller(false);

        assert_eq!(ctrl.toggle(true), Toggle::Started);
        assert_eq!(ctrl.label(), LABEL_DISABLE);
        assert_eq!(requests.get(), 1);
        assert!(!ctrl.poll_loop_start());

        slot.publish_at(Duration::from_millis(1), Image::new(2, 2));
        assert!(ctrl.poll_loop_start());
        assert!(!ctrl.poll_loop_start());

        assert_eq!(ctrl.toggle(true), Toggle::Stopped);
        assert_eq!(ctrl.label(), LABEL_ENABLE);
        assert!(ctrl.stream().is_some());
        assert_eq!(requests.get(), 1);

        // The bound stream is resumed, the camera isn't asked again.
        assert_eq!(ctrl.toggle(true), Toggle::Started);
        assert_eq!(requests.get(), 1);
        assert!(ctrl.poll_loop_start());
    }

    /// Camera that can only be opened once at a time, like a V4L2 device.
    ///
    /// Each capture thread holds a clone of `device` until it exits.
    struct ExclusiveCamera {
        device: Arc<()>,
        requests: Rc<Cell<usize>>,
        readable: bool,
    }

    impl Camera for ExclusiveCamera {
        fn request_stream(&mut self) -> Result<Stream, CameraError> {
            self.requests.set(self.requests.get() + 1);
            if Arc::strong_count(&self.device) > 1 {
                return Err(CameraError::NotReadable("Device or resource busy".into()));
            }
            let device = self.device.clone();
            let readable = self.readable;
            Stream::spawn("test capture", move || {
                let _device = &device;
                if !readable {
                    anyhow::bail!("read failed");
                }
                thread::sleep(Duration::from_millis(1));
                Ok(Image::new(2, 2))
            })
            .map_err(|e| CameraError::Aborted(e.to_string()))
        }
    }

    fn exclusive(readable: bool) -> (CaptureController<ExclusiveCamera>, Rc<Cell<usize>>) {
        let requests = Rc::new(Cell::new(0));
        let camera = ExclusiveCamera {
            device: Arc::new(()),
            requests: requests.clone(),
            readable,
        };
        (CaptureController::new(camera, true), requests)
    }

    #[test]
    fn restart_with_exclusive_device() {
        let (mut ctrl, requests) = exclusive(true);

        assert_eq!(ctrl.toggle(true), Toggle::Started);
        assert_eq!(ctrl.toggle(true), Toggle::Stopped);
        assert_eq!(ctrl.toggle(true), Toggle::Started);
        assert!(ctrl.is_running());
        assert_eq!(ctrl.label(), LABEL_DISABLE);
        assert_eq!(requests.get(), 1);
        assert!(ctrl.stream().is_some_and(Stream::is_alive));
    }

    #[test]
    fn restart_after_capture_thread_exited() {
        let (mut ctrl, requests) = exclusive(false);

        assert_eq!(ctrl.toggle(true), Toggle::Started);
        let start = Instant::now();
        while ctrl.stream().is_some_and(Stream::is_alive) {
            assert!(start.elapsed() < Duration::from_secs(5), "capture thread kept running");
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(ctrl.toggle(true), Toggle::Stopped);

        // The dead stream is replaced by a new one.
        assert_eq!(ctrl.toggle(true), Toggle::Started);
        assert_eq!(requests.get(), 2);
        assert!(ctrl.is_running());
    }

    #[test]
    fn camera_failure_reverts() {
        let (mut ctrl, requests, _) = controller(true);
        assert_eq!(ctrl.toggle(true), Toggle::Failed);
        assert!(!ctrl.is_running());
        assert_eq!(ctrl.label(), LABEL_ENABLE);
        assert_eq!(requests.get(), 1);
        assert!(!ctrl.poll_loop_start());
    }

    #[test]
    fn unsupported_is_disabled() {
        let requests = Rc::new(Cell::new(0));
        let camera = MockCamera {
            requests: requests.clone(),
            slot: FrameSlot::new(),
            fail: false,
        };
        let mut ctrl = CaptureController::new(camera, false);
        assert_eq!(ctrl.toggle(true), Toggle::Disabled);
        assert!(!ctrl.is_running());
        assert_eq!(requests.get(), 0);
    }
}
