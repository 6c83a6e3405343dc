//! End-to-end behavior of the toggle control and the frame loop, with a fake camera and fake
//! landmarkers.

use std::{
    cell::Cell,
    rc::Rc,
    sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc, Arc,
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::bail;
use holistic::{
    app::{App, Flow, CONTROLS_WINDOW},
    bootstrap::Bootstrap,
    capture::{CaptureController, Toggle, LABEL_DISABLE, LABEL_ENABLE},
    error::CameraError,
    face::FaceLandmarkerResult,
    frame_loop::{FrameLoop, FrameLoopOptions, TickReport},
    gui::{GuiEvent, Key},
    hand::{HandLandmarkerResult, Handedness, HandednessCategory},
    image::{Image, Resolution},
    landmark::{Landmark, Landmarker},
    pose::PoseLandmarkerResult,
    video::{Camera, FrameSlot, Stream},
};

struct FakeCamera {
    requests: Rc<Cell<usize>>,
    slot: FrameSlot,
}

impl Camera for FakeCamera {
    fn request_stream(&mut self) -> Result<Stream, CameraError> {
        self.requests.set(self.requests.get() + 1);
        Ok(Stream::from_slot(self.slot.clone()))
    }
}

/// Landmarker that returns a fixed result and counts its invocations.
struct Fake<R> {
    result: R,
    calls: Arc<AtomicUsize>,
    fail: bool,
}

impl<R: Default + Clone + Send + 'static> Landmarker for Fake<R> {
    type Result = R;

    fn detect(&mut self, _: &Image) -> anyhow::Result<R> {
        bail!("image mode not supported")
    }

    fn detect_for_video(&mut self, _: &Image, _timestamp_ms: u64) -> anyhow::Result<R> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            bail!("inference failed");
        }
        Ok(self.result.clone())
    }
}

fn landmarks(xs: &[f32]) -> Vec<Landmark> {
    xs.iter().map(|&x| Landmark::new([x, 0.1, 0.0])).collect()
}

fn hands() -> HandLandmarkerResult {
    HandLandmarkerResult {
        landmarks: vec![landmarks(&[0.4]), landmarks(&[0.6])],
        world_landmarks: vec![landmarks(&[0.05]), landmarks(&[-0.05])],
        handedness: vec![
            HandednessCategory::new(Handedness::Left, 0.9),
            HandednessCategory::new(Handedness::Right, 0.8),
        ],
    }
}

fn poses() -> PoseLandmarkerResult {
    PoseLandmarkerResult {
        landmarks: vec![landmarks(&[0.5, 0.5])],
        world_landmarks: vec![landmarks(&[0.3, -0.1])],
    }
}

struct Harness {
    app: App<FakeCamera>,
    requests: Rc<Cell<usize>>,
    slot: FrameSlot,
    detections: Arc<AtomicUsize>,
    constructions: Arc<AtomicUsize>,
}

fn frame_loop(fail: bool, detections: &Arc<AtomicUsize>) -> FrameLoop {
    let fake = |result| Fake {
        result,
        calls: detections.clone(),
        fail: false,
    };
    let face = Fake {
        result: FaceLandmarkerResult::default(),
        calls: detections.clone(),
        fail,
    };
    FrameLoop::new(
        fake(hands()),
        face,
        Fake {
            result: poses(),
            calls: detections.clone(),
            fail: false,
        },
        FrameLoopOptions {
            view_resolution: Resolution::new(32, 32),
            ..FrameLoopOptions::default()
        },
    )
    .unwrap()
}

fn harness(bootstrap: Bootstrap<FrameLoop>, detections: Arc<AtomicUsize>) -> Harness {
    let requests = Rc::new(Cell::new(0));
    let slot = FrameSlot::new();
    let camera = FakeCamera {
        requests: requests.clone(),
        slot: slot.clone(),
    };
    Harness {
        app: App::new(bootstrap, CaptureController::new(camera, true)),
        requests,
        slot,
        detections,
        constructions: Arc::new(AtomicUsize::new(1)),
    }
}

fn ready(fail: bool) -> Harness {
    let detections = Arc::new(AtomicUsize::new(0));
    let bootstrap = Bootstrap::ready("test", frame_loop(fail, &detections));
    harness(bootstrap, detections)
}

fn wait_ready(app: &mut App<FakeCamera>) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !app.is_ready() {
        assert!(Instant::now() < deadline, "bootstrap did not finish");
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn toggle_before_and_after_bootstrap() {
    let detections = Arc::new(AtomicUsize::new(0));
    let constructions = Arc::new(AtomicUsize::new(0));
    let (release, gate) = mpsc::channel::<()>();

    let bootstrap = {
        let detections = detections.clone();
        let constructions = constructions.clone();
        Bootstrap::spawn("test loader", move || {
            gate.recv()?;
            constructions.fetch_add(1, Ordering::SeqCst);
            Ok(frame_loop(false, &detections))
        })
        .unwrap()
    };
    let mut h = harness(bootstrap, detections);
    h.constructions = constructions;

    // Not loaded yet: nothing happens.
    assert_eq!(h.app.toggle(), Toggle::NotReady);
    assert_eq!(h.app.label(), LABEL_ENABLE);
    assert_eq!(h.requests.get(), 0);
    assert!(h.app.tick().is_none());

    release.send(()).unwrap();
    wait_ready(&mut h.app);

    assert_eq!(h.app.toggle(), Toggle::Started);
    assert_eq!(h.app.label(), LABEL_DISABLE);
    assert_eq!(h.requests.get(), 1);

    // Off, then on again: the bound stream is resumed, no new landmarkers.
    assert_eq!(h.app.toggle(), Toggle::Stopped);
    assert_eq!(h.app.toggle(), Toggle::Started);
    assert_eq!(h.requests.get(), 1);
    assert_eq!(h.constructions.load(Ordering::SeqCst), 1);
}

#[test]
fn loop_starts_with_first_frame() {
    let mut h = ready(false);
    assert_eq!(h.app.toggle(), Toggle::Started);

    // No frame decoded yet.
    assert!(h.app.tick().is_none());
    assert!(!h.app.is_armed());

    h.slot.publish_at(Duration::from_millis(33), Image::new(64, 48));
    let report = h.app.tick().unwrap();
    assert!(matches!(report, TickReport::Rendered { detected: true, .. }));
    assert!(h.app.is_armed());
    assert_eq!(h.detections.load(Ordering::SeqCst), 3);

    // Same frame again: cached results are rendered, no detection.
    let report = h.app.tick().unwrap();
    assert!(matches!(report, TickReport::Rendered { detected: false, .. }));
    assert_eq!(h.detections.load(Ordering::SeqCst), 3);
    assert_eq!(h.constructions.load(Ordering::SeqCst), 1);
}

#[test]
fn stopping_disarms_the_loop() {
    let mut h = ready(false);
    h.slot.publish_at(Duration::from_millis(1), Image::new(8, 8));
    h.app.toggle();
    assert!(h.app.tick().is_some());

    assert_eq!(h.app.toggle(), Toggle::Stopped);
    h.slot.publish_at(Duration::from_millis(2), Image::new(8, 8));
    assert!(h.app.tick().is_none());
    assert!(!h.app.is_armed());
    assert_eq!(h.detections.load(Ordering::SeqCst), 3);
}

#[test]
fn traces_follow_results() {
    let mut h = ready(false);
    h.slot.publish_at(Duration::from_millis(1), Image::new(64, 64));
    h.app.toggle();
    h.app.tick().unwrap();

    let traces = h.app.frame_loop().unwrap().traces();
    assert_eq!(traces.pose.x, [-0.3, 0.1]);
    assert_eq!(traces.left_hand.len(), 1);
    assert!((traces.left_hand.x[0] - (-0.05 - 0.2)).abs() < 1e-6);
    assert_eq!(traces.right_hand.len(), 1);
    assert!((traces.right_hand.x[0] - (0.05 + 0.2)).abs() < 1e-6);
}

#[test]
fn landmarker_error_switches_off() {
    let mut h = ready(true);
    h.slot.publish_at(Duration::from_millis(1), Image::new(8, 8));
    assert_eq!(h.app.toggle(), Toggle::Started);

    assert!(h.app.tick().is_none());
    assert!(!h.app.is_armed());
    assert!(!h.app.controller().is_running());
    assert_eq!(h.app.label(), LABEL_ENABLE);
}

#[test]
fn gui_events() {
    let mut h = ready(false);
    let controls = CONTROLS_WINDOW.to_string();

    assert_eq!(h.app.handle(&GuiEvent::Clicked(controls.clone())), Flow::Continue);
    assert_eq!(h.app.label(), LABEL_DISABLE);
    assert_eq!(
        h.app.handle(&GuiEvent::KeyPressed(controls.clone(), Key::Space)),
        Flow::Continue
    );
    assert_eq!(h.app.label(), LABEL_ENABLE);

    // Clicks on other windows don't toggle.
    h.app.handle(&GuiEvent::Clicked("landmarks".into()));
    assert_eq!(h.app.label(), LABEL_ENABLE);

    assert_eq!(
        h.app.handle(&GuiEvent::KeyPressed(controls.clone(), Key::Escape)),
        Flow::Quit
    );
    assert_eq!(h.app.handle(&GuiEvent::Closed(controls)), Flow::Quit);
}

#[test]
fn controls_show_label() {
    let mut h = ready(false);
    let off = h.app.controls_image();
    h.app.toggle();
    let on = h.app.controls_image();
    assert_ne!(off, on);
}
