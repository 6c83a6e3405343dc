//! V4L2 webcam access.
//!
//! Only V4L2 `VIDEO_CAPTURE` devices yielding JFIF JPEG or Motion JPEG frames are supported.

use std::cmp::Reverse;

use linuxvideo::{
    format::{FrameIntervals, FrameSizes, PixFormat, Pixelformat},
    stream::ReadStream,
    BufType, CapabilityFlags, Device, Fract,
};

use crate::error::CameraError;
use crate::image::{Image, Resolution};
use crate::timer::Timer;

use super::{Camera, Stream};

/// Indicates whether to prefer a higher resolution or frame rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParamPreference {
    /// Prefer increased resolution over higher frame rates.
    #[default]
    Resolution,
    /// Prefer higher frame rate over higher image resolution.
    Framerate,
}

#[derive(Debug, Default, Clone, Copy)]
struct FramePrefs {
    resolution: Option<Resolution>,
    fps: Option<u32>,
    pref: ParamPreference,
}

/// Device selection and format negotiation options.
#[derive(Debug, Default, Clone)]
pub struct WebcamOptions {
    name: Option<String>,
    frame: FramePrefs,
}

impl WebcamOptions {
    /// Sets the name of the webcam device to open.
    ///
    /// If no webcam with the given name can be found, opening the webcam fails with
    /// [`CameraError::NotFound`].
    pub fn name(self, name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..self
        }
    }

    /// Sets the desired image resolution.
    ///
    /// A lower resolution might be selected if the webcam cannot deliver it.
    pub fn resolution(mut self, resolution: Resolution) -> Self {
        self.frame.resolution = Some(resolution);
        self
    }

    /// Sets the desired frame rate.
    pub fn fps(mut self, fps: u32) -> Self {
        self.frame.fps = Some(fps);
        self
    }

    /// Selects whether to keep the resolution or the frame rate when the camera can't deliver
    /// both.
    pub fn prefer(mut self, pref: ParamPreference) -> Self {
        self.frame.pref = pref;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct FrameFormat {
    resolution: Resolution,
    frame_interval: Fract,
}

fn negotiate_format(device: &Device, prefs: FramePrefs) -> Result<(PixFormat, Fract), CameraError> {
    let overconstrained = |msg: String| CameraError::Overconstrained(msg);
    let io = |e: std::io::Error| CameraError::NotReadable(e.to_string());

    let mut pixel_format = None;
    for format in device.formats(BufType::VIDEO_CAPTURE) {
        let format = format.map_err(io)?;
        if format.pixelformat() == Pixelformat::JPEG || format.pixelformat() == Pixelformat::MJPG {
            pixel_format = Some(format.pixelformat());
            break;
        }
    }
    let Some(pixel_format) = pixel_format else {
        return Err(overconstrained("no JPEG or MJPG pixel format".into()));
    };

    let mut formats = Vec::new();
    match device.frame_sizes(pixel_format).map_err(io)? {
        FrameSizes::Discrete(sizes) => {
            for size in sizes {
                let intervals = match device
                    .frame_intervals(pixel_format, size.width(), size.height())
                    .map_err(io)?
                {
                    FrameIntervals::Discrete(intervals) => intervals,
                    FrameIntervals::Stepwise(_) | FrameIntervals::Continuous(_) => {
                        return Err(overconstrained(
                            "stepwise or continuous frame rates are not supported".into(),
                        ));
                    }
                };
                for rate in intervals {
                    formats.push(FrameFormat {
                        resolution: Resolution::new(size.width(), size.height()),
                        frame_interval: *rate.fract(),
                    });
                }
            }
        }
        FrameSizes::Stepwise(_) | FrameSizes::Continuous(_) => {
            return Err(overconstrained(
                "stepwise or continuous resolutions are not supported".into(),
            ));
        }
    }

    let fmt = negotiate_with_fallback(&formats, prefs)
        .ok_or_else(|| overconstrained("no frame format matches".into()))?;
    Ok((
        PixFormat::new(
            fmt.resolution.width(),
            fmt.resolution.height(),
            pixel_format,
        ),
        fmt.frame_interval,
    ))
}

/// Picks a format, relaxing the less preferred parameter first if nothing matches.
fn negotiate_with_fallback(formats: &[FrameFormat], mut prefs: FramePrefs) -> Option<FrameFormat> {
    loop {
        if let Some(fmt) = negotiate_format_step(formats, prefs) {
            return Some(fmt);
        }

        log::debug!("failed to negotiate format with prefs {:?}", prefs);
        let relaxed = match prefs.pref {
            ParamPreference::Resolution => {
                prefs.fps.take().is_some() || prefs.resolution.take().is_some()
            }
            ParamPreference::Framerate => {
                prefs.resolution.take().is_some() || prefs.fps.take().is_some()
            }
        };
        if !relaxed {
            return None;
        }
    }
}

fn negotiate_format_step(formats: &[FrameFormat], prefs: FramePrefs) -> Option<FrameFormat> {
    let mut eligible = formats
        .iter()
        .filter(|fmt| {
            prefs.resolution.map_or(true, |res| {
                fmt.resolution.width() >= res.width() && fmt.resolution.height() >= res.height()
            }) && prefs.fps.map_or(true, |fps| {
                (1.0 / fmt.frame_interval.as_f32()).round() >= fps as f32
            })
        })
        .copied()
        .collect::<Vec<_>>();
    match prefs.pref {
        ParamPreference::Resolution => {
            eligible.sort_by_key(|fmt| (fmt.resolution.num_pixels(), Reverse(fmt.frame_interval)))
        }
        ParamPreference::Framerate => {
            eligible.sort_by_key(|fmt| (Reverse(fmt.frame_interval), fmt.resolution.num_pixels()))
        }
    }
    eligible.last().copied()
}

/// Returns whether capture devices can be enumerated on this system.
pub fn is_supported() -> bool {
    match linuxvideo::list() {
        Ok(_) => true,
        Err(e) => {
            log::debug!("cannot enumerate video devices: {e}");
            false
        }
    }
}

/// A webcam yielding a stream of [`Image`]s.
pub struct Webcam {
    stream: ReadStream,
    resolution: Resolution,
    t_dequeue: Timer,
    t_decode: Timer,
}

impl Webcam {
    /// Opens the first supported webcam matching `options`.
    ///
    /// This can block for a significant amount of time while the webcam initializes (on the order
    /// of hundreds of milliseconds).
    pub fn open(options: &WebcamOptions) -> Result<Self, CameraError> {
        let devices = linuxvideo::list().map_err(|e| CameraError::NotReadable(e.to_string()))?;

        let mut last_error = None;
        for res in devices {
            match res {
                Ok(dev) => match Self::open_device(dev, options) {
                    Ok(Some(webcam)) => return Ok(webcam),
                    Ok(None) => {}
                    Err(e) => {
                        log::debug!("{}: {}", e.name(), e);
                        last_error = Some(e);
                    }
                },
                Err(e) => log::warn!("{e}"),
            }
        }

        Err(last_error.unwrap_or(CameraError::NotFound))
    }

    fn open_device(dev: Device, options: &WebcamOptions) -> Result<Option<Self>, CameraError> {
        let io = |e: std::io::Error| CameraError::NotReadable(e.to_string());

        let caps = dev.capabilities().map_err(io)?;
        if let Some(name) = &options.name {
            if caps.card() != name {
                return Ok(None);
            }
        }

        let cap_flags = caps.device_capabilities();
        let path = dev.path().map_err(io)?;
        log::debug!(
            "device {} ({}) capabilities: {:?}",
            caps.card(),
            path.display(),
            cap_flags,
        );
        if !cap_flags.contains(CapabilityFlags::VIDEO_CAPTURE) {
            return Ok(None);
        }

        let (pixfmt, fract) = negotiate_format(&dev, options.frame)?;
        let capture = dev.video_capture(pixfmt).map_err(io)?;
        let format = capture.format();
        let resolution = Resolution::new(format.width(), format.height());
        let actual = capture.set_frame_interval(fract).map_err(io)?;

        log::info!(
            "opened {} ({}), {} @ {:.1}Hz",
            caps.card(),
            path.display(),
            resolution,
            1.0 / actual.as_f32(),
        );

        let stream = capture.into_stream(2).map_err(io)?;
        Ok(Some(Self {
            stream,
            resolution,
            t_dequeue: Timer::new("dequeue"),
            t_decode: Timer::new("decode"),
        }))
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Reads the next frame from the camera, blocking until one is available.
    pub fn read(&mut self) -> anyhow::Result<Image> {
        let dequeue_guard = self.t_dequeue.start();
        let res = self.resolution;
        let t_decode = &self.t_decode;
        let image = self.stream.dequeue(|buf| {
            drop(dequeue_guard);
            let image = match t_decode.time(|| Image::decode_jpeg(&buf)) {
                Ok(image) => image,
                Err(e) => {
                    // Webcams occasionally produce corrupted MJPG frames. A blank frame keeps the
                    // stream going at the same latency.
                    log::error!("webcam decode error: {e}");
                    Image::new(res.width(), res.height())
                }
            };
            Ok(image)
        })?;
        Ok(image)
    }

    /// Returns profiling timers for webcam access and decoding.
    pub fn timers(&self) -> impl Iterator<Item = &Timer> + '_ {
        [&self.t_dequeue, &self.t_decode].into_iter()
    }
}

/// The system webcam as a [`Camera`].
///
/// Every successful [`Camera::request_stream`] call opens the device and spawns a capture thread.
pub struct WebcamCamera {
    options: WebcamOptions,
}

impl WebcamCamera {
    pub fn new(options: WebcamOptions) -> Self {
        Self { options }
    }
}

impl Camera for WebcamCamera {
    fn request_stream(&mut self) -> Result<Stream, CameraError> {
        let mut webcam = Webcam::open(&self.options)?;
        Stream::spawn("webcam", move || webcam.read())
            .map_err(|e| CameraError::Aborted(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(w: u32, h: u32, fps: u32) -> FrameFormat {
        FrameFormat {
            resolution: Resolution::new(w, h),
            frame_interval: Fract::new(1, fps),
        }
    }

    fn formats() -> Vec<FrameFormat> {
        vec![
            format(640, 480, 30),
            format(640, 480, 60),
            format(1280, 720, 30),
            format(1920, 1080, 15),
        ]
    }

    #[test]
    fn prefers_resolution() {
        let prefs = FramePrefs {
            resolution: Some(Resolution::RES_720P),
            fps: Some(30),
            pref: ParamPreference::Resolution,
        };
        assert_eq!(
            negotiate_with_fallback(&formats(), prefs),
            Some(format(1280, 720, 30))
        );
    }

    #[test]
    fn prefers_framerate() {
        let prefs = FramePrefs {
            resolution: None,
            fps: Some(60),
            pref: ParamPreference::Framerate,
        };
        assert_eq!(
            negotiate_with_fallback(&formats(), prefs),
            Some(format(640, 480, 60))
        );
    }

    #[test]
    fn relaxes_constraints() {
        // Nothing delivers 1080p at 30 FPS, so the frame rate is given up first.
        let prefs = FramePrefs {
            resolution: Some(Resolution::new(1920, 1080)),
            fps: Some(30),
            pref: ParamPreference::Resolution,
        };
        assert_eq!(
            negotiate_with_fallback(&formats(), prefs),
            Some(format(1920, 1080, 15))
        );

        assert_eq!(negotiate_with_fallback(&[], FramePrefs::default()), None);
    }
}
