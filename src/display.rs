//! The window-system seam.
//!
//! The window manager only talks to the display through [`DisplayServer`].
//! `x11.rs` implements it over x11rb; tests use a recording fake.

use std::time::Duration;

use anyhow::Result;

use crate::geometry::{Point, Rect};

/// Server-side window id
pub type Window = u32;

/// One X screen
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenInfo {
    pub index: usize,
    pub root: Window,
    pub width: i32,
    pub height: i32,
}

/// An active output, in screen coordinates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputInfo {
    /// Connector name, e.g. "DP-1"
    pub name: String,
    pub rect: Rect,
}

/// The attributes that decide whether and how a window is managed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowAttrs {
    pub input_only: bool,
    pub override_redirect: bool,
    pub viewable: bool,
}

/// A partial geometry change; `None` fields are left alone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConfigureChanges {
    pub x: Option<i32>,
    pub y: Option<i32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl ConfigureChanges {
    /// Move and resize to exactly `rect`
    pub fn rect(rect: Rect) -> Self {
        Self {
            x: Some(rect.x),
            y: Some(rect.y),
            width: Some(rect.width.max(1) as u32),
            height: Some(rect.height.max(1) as u32),
        }
    }

    pub fn position(p: Point) -> Self {
        Self {
            x: Some(p.x),
            y: Some(p.y),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_none() && self.y.is_none() && self.width.is_none() && self.height.is_none()
    }
}

/// How a passive button grab behaves once it fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonGrab {
    /// Freeze the pointer so the click can be replayed to the client
    Replay,
    /// Keep the click and report pointer motion while held
    Intercept,
}

/// A server-reported request failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolError {
    pub kind: String,
    pub major_opcode: u8,
    pub minor_opcode: u16,
    pub bad_value: u32,
    pub sequence: u16,
}

/// Events the window manager reacts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WmEvent {
    MapRequest {
        window: Window,
    },
    UnmapNotify {
        window: Window,
    },
    ConfigureRequest {
        window: Window,
        changes: ConfigureChanges,
    },
    Motion {
        window: Window,
        root_pos: Point,
    },
    KeyPress {
        window: Window,
        keysym: u32,
        state: u16,
    },
    ButtonPress {
        window: Window,
        subwindow: Option<Window>,
        button: u8,
        root_pos: Point,
        state: u16,
    },
    ButtonRelease {
        window: Window,
        button: u8,
    },
    Focus {
        window: Window,
        focused: bool,
        /// Caused by a keyboard grab or ungrab
        grab: bool,
    },
    Expose {
        window: Window,
        count: u16,
    },
    ClientMessage {
        window: Window,
        message_type: String,
    },
}

/// Operations the window manager needs from the window system
pub trait DisplayServer {
    /// Name of the connected display, e.g. ":0"
    fn display_name(&self) -> &str;

    fn screens(&self) -> Vec<ScreenInfo>;

    /// Active outputs of a screen, or the whole screen without RandR
    fn outputs(&mut self, screen: &ScreenInfo) -> Result<Vec<OutputInfo>>;

    fn children(&mut self, root: Window) -> Result<Vec<Window>>;

    /// Take substructure redirection on `root`; fails if another window
    /// manager holds it
    fn become_wm(&mut self, root: Window) -> Result<()>;

    /// Root background colour and the crosshair cursor
    fn decorate_root(&mut self, root: Window, background: u32) -> Result<()>;

    fn attributes(&mut self, window: Window) -> Result<WindowAttrs>;

    /// Geometry relative to the window's root, excluding the border
    fn geometry(&mut self, window: Window) -> Result<Rect>;

    fn root_of(&mut self, window: Window) -> Result<Window>;

    fn select_focus_events(&mut self, window: Window) -> Result<()>;

    fn set_border_width(&mut self, window: Window, width: u32) -> Result<()>;

    fn set_border_color(&mut self, window: Window, color: u32) -> Result<()>;

    fn configure(&mut self, window: Window, changes: &ConfigureChanges) -> Result<()>;

    fn map(&mut self, window: Window) -> Result<()>;

    fn raise(&mut self, window: Window) -> Result<()>;

    fn input_focus(&mut self) -> Result<Window>;

    fn set_input_focus(&mut self, window: Window) -> Result<()>;

    fn grab_button(&mut self, window: Window, button: u8, modifiers: u16, mode: ButtonGrab) -> Result<()>;

    fn ungrab_button(&mut self, window: Window, button: u8, modifiers: u16) -> Result<()>;

    fn grab_key(&mut self, window: Window, keysym: u32, modifiers: u16) -> Result<()>;

    /// Release a frozen pointer, delivering the click to the client
    fn replay_pointer(&mut self) -> Result<()>;

    /// Ask a client to close via WM_DELETE_WINDOW
    fn send_delete(&mut self, window: Window) -> Result<()>;

    /// Create (unmapped) an override-redirect grid overlay window that
    /// reports focus, exposure and key events
    fn create_overlay(&mut self, root: Window, rect: Rect, border: u32, border_color: u32, background: u32) -> Result<Window>;

    fn destroy_window(&mut self, window: Window) -> Result<()>;

    fn clear(&mut self, window: Window) -> Result<()>;

    fn draw_lines(&mut self, window: Window, color: u32, width: u32, lines: &[(Point, Point)]) -> Result<()>;

    /// Next event, waiting at most `timeout` when none is queued
    fn next_event(&mut self, timeout: Duration) -> Result<Option<WmEvent>>;

    fn flush(&mut self) -> Result<()>;
}
