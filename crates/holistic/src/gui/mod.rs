//! A small image-window GUI.
//!
//! Every image key gets its own window. Clicks, key presses, and close requests on those windows
//! are forwarded to the application thread as [`GuiEvent`]s.

mod renderer;

use std::{
    collections::HashMap,
    panic::{catch_unwind, AssertUnwindSafe},
    process,
    rc::Rc,
    sync::{
        mpsc::{self, Receiver, Sender},
        Mutex,
    },
};

use once_cell::sync::OnceCell;
use raw_window_handle::{HasRawDisplayHandle, RawDisplayHandle};
use winit::{
    event::{ElementState, Event, KeyboardInput, MouseButton, VirtualKeyCode, WindowEvent},
    event_loop::{ControlFlow, EventLoop, EventLoopBuilder, EventLoopProxy, EventLoopWindowTarget},
    window::WindowId,
};

use crate::{
    image::{Image, Resolution},
    termination::Termination,
};

use self::renderer::{Gpu, Renderer, Window};

/// Keys that are forwarded to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Space,
    Escape,
}

/// User input on one of the image windows, identified by its key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuiEvent {
    /// The left mouse button was pressed inside the window.
    Clicked(String),
    KeyPressed(String, Key),
    /// The window's close button was pressed.
    Closed(String),
}

impl GuiEvent {
    /// Returns the key of the window this event happened on.
    pub fn window(&self) -> &str {
        match self {
            GuiEvent::Clicked(key) | GuiEvent::KeyPressed(key, _) | GuiEvent::Closed(key) => key,
        }
    }
}

struct Gui {
    gpu: Rc<Gpu>,
    windows: HashMap<String, Renderer>,
    win_id_to_key: HashMap<WindowId, String>,
}

impl Gui {
    fn new() -> anyhow::Result<Self> {
        Ok(Self {
            gpu: Rc::new(pollster::block_on(Gpu::open())?),
            windows: HashMap::new(),
            win_id_to_key: HashMap::new(),
        })
    }

    fn show(
        &mut self,
        target: &EventLoopWindowTarget<Msg>,
        key: String,
        res: Resolution,
        data: &[u8],
    ) {
        if !self.windows.contains_key(&key) {
            log::debug!("creating window for image '{key}' at {res}");
            let renderer = match Window::open(target, &key, res)
                .and_then(|win| Renderer::new(win, self.gpu.clone()))
            {
                Ok(renderer) => renderer,
                Err(e) => {
                    log::error!("failed to create window '{key}': {e:#}");
                    return;
                }
            };
            self.win_id_to_key.insert(renderer.window().id(), key.clone());
            self.windows.insert(key.clone(), renderer);
        }

        if let Some(renderer) = self.windows.get_mut(&key) {
            renderer.update_texture(res, data);
            renderer.window().request_redraw();
        }
    }

    fn window_event(&mut self, win: WindowId, event: WindowEvent<'_>) {
        let Some(key) = self.win_id_to_key.get(&win) else {
            return;
        };
        let event = match event {
            WindowEvent::CloseRequested => GuiEvent::Closed(key.clone()),
            WindowEvent::MouseInput {
                state: ElementState::Pressed,
                button: MouseButton::Left,
                ..
            } => GuiEvent::Clicked(key.clone()),
            WindowEvent::KeyboardInput {
                input:
                    KeyboardInput {
                        state: ElementState::Pressed,
                        virtual_keycode: Some(code),
                        ..
                    },
                ..
            } => match code {
                VirtualKeyCode::Space => GuiEvent::KeyPressed(key.clone(), Key::Space),
                VirtualKeyCode::Escape => GuiEvent::KeyPressed(key.clone(), Key::Escape),
                _ => return,
            },
            _ => return,
        };
        dispatch(event);
    }

    fn run(mut self, event_loop: EventLoop<Msg>) -> ! {
        event_loop.run(move |event, target, flow| {
            *flow = ControlFlow::Wait;
            match event {
                Event::UserEvent(Msg::Image { key, res, data }) => {
                    self.show(target, key, res, &data);
                }
                Event::WindowEvent { window_id, event } => self.window_event(window_id, event),
                Event::RedrawRequested(window) => {
                    if let Some(renderer) = self
                        .win_id_to_key
                        .get(&window)
                        .and_then(|key| self.windows.get_mut(key))
                    {
                        renderer.redraw();
                    }
                }
                _ => {}
            }
        });
    }
}

#[derive(Debug)]
enum Msg {
    Image {
        key: String,
        res: Resolution,
        data: Vec<u8>,
    },
}

struct UnsafeSendSync<T>(T);
unsafe impl<T> Sync for UnsafeSendSync<T> {}
unsafe impl<T> Send for UnsafeSendSync<T> {}

/// A connection to the native display server.
pub struct Display {
    raw: UnsafeSendSync<RawDisplayHandle>,
    proxy: Mutex<EventLoopProxy<Msg>>,
    subscribers: Mutex<Vec<Sender<GuiEvent>>>,
}

impl Display {
    /// Returns the display, or [`None`] when called outside of [`run`].
    pub fn get() -> Option<&'static Display> {
        DISPLAY.get()
    }
}

unsafe impl HasRawDisplayHandle for Display {
    fn raw_display_handle(&self) -> RawDisplayHandle {
        self.raw.0
    }
}

static DISPLAY: OnceCell<Display> = OnceCell::new();

fn send(msg: Msg) {
    let Some(display) = Display::get() else {
        let Msg::Image { key, .. } = msg;
        log::warn!("GUI is not running, cannot show '{key}'");
        return;
    };
    let proxy = display.proxy.lock().unwrap_or_else(|e| e.into_inner());
    if proxy.send_event(msg).is_err() {
        log::debug!("event loop closed, dropping message");
    }
}

fn dispatch(event: GuiEvent) {
    let Some(display) = Display::get() else {
        return;
    };
    let mut subscribers = display.subscribers.lock().unwrap_or_else(|e| e.into_inner());
    subscribers.retain(|tx| tx.send(event.clone()).is_ok());
}

/// Returns a channel receiving all [`GuiEvent`]s from now on.
///
/// Outside of a running GUI, the returned channel never receives anything.
pub fn subscribe() -> Receiver<GuiEvent> {
    let (tx, rx) = mpsc::channel();
    match Display::get() {
        Some(display) => display
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx),
        None => log::warn!("GUI is not running, no events will be received"),
    }
    rx
}

pub(crate) fn run<F, R>(cb: F) -> !
where
    F: FnOnce() -> R + Send + 'static,
    R: Termination + Send,
{
    let event_loop = EventLoopBuilder::with_user_event().build();
    let proxy = event_loop.create_proxy();
    let display = Display {
        raw: UnsafeSendSync(event_loop.raw_display_handle()),
        proxy: Mutex::new(proxy),
        subscribers: Mutex::new(Vec::new()),
    };
    if DISPLAY.set(display).is_err() {
        log::error!("GUI is already running");
        process::exit(1);
    }

    let gui = match Gui::new() {
        Ok(gui) => gui,
        Err(e) => {
            log::error!("failed to initialize GPU: {e:#}");
            process::exit(1);
        }
    };

    std::thread::spawn(move || {
        let result = catch_unwind(AssertUnwindSafe(cb));
        match result {
            Ok(r) => {
                if r.is_success() {
                    process::exit(0);
                } else {
                    r.report();
                    process::exit(1);
                }
            }
            // The panic hook has already printed the message. 101 is what libstd exits with.
            Err(_payload) => process::exit(101),
        }
    });

    gui.run(event_loop);
}

/// Displays an image in the window named `key`, creating it if necessary.
///
/// The window is resized when the image size changes.
pub fn show_image(key: impl Into<String>, image: &Image) {
    // Image data is RGBA8 internally, so it can be uploaded as-is.
    send(Msg::Image {
        key: key.into(),
        res: Resolution::new(image.width(), image.height()),
        data: image.data().to_vec(),
    });
}
