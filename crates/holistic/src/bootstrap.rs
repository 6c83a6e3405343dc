//! Background construction of the landmarker tasks.
//!
//! Loading (and possibly downloading) the networks takes a while, so it runs on its own thread
//! while the GUI is already up. [`Bootstrap`] is polled from the application thread and hands the
//! finished value over exactly once.

use std::{
    io,
    sync::mpsc::{self, Receiver, TryRecvError},
    thread,
};

use crate::config::Config;
use crate::face::{FaceLandmarker, FaceLandmarkerOptions};
use crate::hand::{HandLandmarker, HandLandmarkerOptions};
use crate::landmark::RunningMode;
use crate::pose::{PoseLandmarker, PoseLandmarkerOptions};
use crate::runtime::{BaseOptions, RuntimeOptions, VisionRuntime};
use crate::timer::Timer;

enum State<T> {
    Pending(Receiver<anyhow::Result<T>>),
    Ready(T),
    Taken,
    Failed,
}

/// A value that is being constructed on a background thread.
pub struct Bootstrap<T> {
    name: &'static str,
    state: State<T>,
}

impl<T: Send + 'static> Bootstrap<T> {
    /// Starts running `loader` on a new thread called `name`.
    ///
    /// There is no retry: if `loader` fails, the error is logged once and the value stays
    /// unavailable.
    pub fn spawn<F>(name: &'static str, loader: F) -> io::Result<Self>
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        let (sender, recv) = mpsc::sync_channel(1);
        thread::Builder::new().name(name.into()).spawn(move || {
            // The receiver may be gone if the application is shutting down.
            sender.send(loader()).ok();
        })?;

        Ok(Self {
            name,
            state: State::Pending(recv),
        })
    }

    /// Creates an already finished [`Bootstrap`].
    pub fn ready(name: &'static str, value: T) -> Self {
        Self {
            name,
            state: State::Ready(value),
        }
    }

    /// Checks for completion without blocking. Returns whether the value is available.
    pub fn poll(&mut self) -> bool {
        if let State::Pending(recv) = &self.state {
            let res = match recv.try_recv() {
                Ok(res) => res,
                Err(TryRecvError::Empty) => return false,
                Err(TryRecvError::Disconnected) => Err(anyhow::anyhow!("loader thread panicked")),
            };
            self.finish(res);
        }
        matches!(self.state, State::Ready(_))
    }

    /// Blocks until loading has finished. Returns whether the value is available.
    pub fn wait(&mut self) -> bool {
        if let State::Pending(recv) = &self.state {
            let res = recv
                .recv()
                .unwrap_or_else(|_| Err(anyhow::anyhow!("loader thread panicked")));
            self.finish(res);
        }
        matches!(self.state, State::Ready(_))
    }

    fn finish(&mut self, res: anyhow::Result<T>) {
        self.state = match res {
            Ok(value) => {
                log::info!("{} finished loading", self.name);
                State::Ready(value)
            }
            Err(e) => {
                log::error!("{} failed to load: {e:#}", self.name);
                State::Failed
            }
        };
    }

    /// Returns whether loading failed. A failed bootstrap never becomes ready.
    pub fn is_failed(&self) -> bool {
        matches!(self.state, State::Failed)
    }

    /// Takes the loaded value out.
    ///
    /// Returns [`None`] if the value isn't ready yet, or if it was already taken.
    pub fn take(&mut self) -> Option<T> {
        self.poll();
        match std::mem::replace(&mut self.state, State::Taken) {
            State::Ready(value) => Some(value),
            other => {
                self.state = other;
                None
            }
        }
    }
}

/// The three landmarker tasks driven by the frame loop.
pub struct Landmarkers {
    pub hand: HandLandmarker,
    pub face: FaceLandmarker,
    pub pose: PoseLandmarker,
}

/// Constructs all landmarkers in [`RunningMode::Video`].
///
/// Up to 2 hands and 1 pose are tracked. Face blendshapes are enabled.
pub fn load_landmarkers(config: &Config) -> anyhow::Result<Landmarkers> {
    let t_total = Timer::new("load");
    let _guard = t_total.start();

    let runtime = VisionRuntime::resolve(&RuntimeOptions {
        model_dir: config.model_dir.clone(),
        model_url: config.model_url.clone(),
    })?;
    let base = |bundle: &str| BaseOptions::new(bundle).with_delegate(config.delegate);

    let hand = HandLandmarker::create_from_options(
        &runtime,
        HandLandmarkerOptions::new(base(HandLandmarkerOptions::DEFAULT_BUNDLE))
            .with_running_mode(RunningMode::Video)
            .with_num_hands(2),
    )?;
    let face = FaceLandmarker::create_from_options(
        &runtime,
        FaceLandmarkerOptions::new(base(FaceLandmarkerOptions::DEFAULT_BUNDLE))
            .with_running_mode(RunningMode::Video)
            .with_face_blendshapes(true),
    )?;
    let pose = PoseLandmarker::create_from_options(
        &runtime,
        PoseLandmarkerOptions::new(base(PoseLandmarkerOptions::DEFAULT_BUNDLE))
            .with_running_mode(RunningMode::Video)
            .with_num_poses(1),
    )?;

    Ok(Landmarkers { hand, face, pose })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hands_over_once() {
        let mut boot = Bootstrap::spawn("answer", || Ok(42)).unwrap();
        assert!(boot.wait());
        assert!(boot.poll());
        assert!(!boot.is_failed());
        assert_eq!(boot.take(), Some(42));
        assert_eq!(boot.take(), None);
        assert!(!boot.poll());
    }

    #[test]
    fn failure_is_permanent() {
        let mut boot: Bootstrap<()> =
            Bootstrap::spawn("broken", || Err(anyhow::anyhow!("no models"))).unwrap();
        assert!(!boot.wait());
        assert!(boot.is_failed());
        assert!(!boot.poll());
        assert_eq!(boot.take(), None);
        assert!(boot.is_failed());
    }

    #[test]
    fn pending_until_loaded() {
        let (release, wait) = mpsc::channel::<()>();
        let mut boot = Bootstrap::spawn("slow", move || {
            wait.recv().ok();
            Ok("done")
        })
        .unwrap();
        assert!(!boot.poll());
        assert_eq!(boot.take(), None);

        release.send(()).unwrap();
        assert!(boot.wait());
        assert_eq!(boot.take(), Some("done"));
    }

    #[test]
    fn missing_models() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            model_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        assert!(load_landmarkers(&config).is_err());
    }
}
