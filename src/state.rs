//! Interaction state for the event dispatcher.
//!
//! Two state machines live here, both owned by [`DispatcherState`]:
//! the mouse drag and grid build mode. Neither holds server resources
//! besides the overlay windows recorded on each monitor.

use crate::display::Window;
use crate::geometry::{Direction, Point, Rect};
use crate::registry::MonitorId;

/// Mouse button that moves the window
pub const MOVE_BUTTON: u8 = 1;
/// Mouse button that resizes the window
pub const RESIZE_BUTTON: u8 = 3;

/// Mouse move/resize in progress
///
/// ```text
///              modifier + ButtonPress
///   ┌──────┐ ─────────────────────────► ┌──────────┐
///   │ Idle │                            │ Dragging │ ◄─┐ MotionNotify:
///   └──────┘ ◄───────────────────────── └────┬─────┘ ──┘ move/resize
///       ▲      ButtonRelease, plain click,   │
///       │      or the window unmaps          │ modifier + ButtonPress
///       │                                    ▼
///       │                              (restarts on the new target)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DragState {
    pub window: Window,
    /// Pointer position at the press, in root coordinates
    pub start: Point,
    /// Window geometry at the press
    pub rect: Rect,
    pub button: u8,
    /// Left or Right edge being resized, if any
    pub horizontal: Option<Direction>,
    /// Up or Down edge being resized, if any
    pub vertical: Option<Direction>,
}

/// `true` when `p2` is less than `threshold` past `p1`
fn near(p2: i32, p1: i32, threshold: i32) -> bool {
    (p2 - p1).max(0) < threshold
}

impl DragState {
    /// Start a drag; resize edges are those within `threshold` of the click
    pub fn start(window: Window, click: Point, rect: Rect, button: u8, threshold: i32) -> Self {
        let horizontal = if near(click.x, rect.x, threshold) {
            Some(Direction::Left)
        } else if near(rect.x + rect.width, click.x, threshold) {
            Some(Direction::Right)
        } else {
            None
        };

        let vertical = if near(click.y, rect.y, threshold) {
            Some(Direction::Up)
        } else if near(rect.y + rect.height, click.y, threshold) {
            Some(Direction::Down)
        } else {
            None
        };

        Self {
            window,
            start: click,
            rect,
            button,
            horizontal,
            vertical,
        }
    }

    /// Geometry for the pointer at `pointer`. `None` for buttons that
    /// neither move nor resize.
    pub fn apply(&self, pointer: Point, min_size: i32) -> Option<Rect> {
        let dx = pointer.x - self.start.x;
        let dy = pointer.y - self.start.y;
        let r = self.rect;

        match self.button {
            MOVE_BUTTON => Some(Rect::new(r.x + dx, r.y + dy, r.width, r.height)),
            RESIZE_BUTTON => {
                let (x, width) = match self.horizontal {
                    Some(Direction::Left) => (r.x + dx, (r.width - dx).max(min_size)),
                    Some(Direction::Right) => (r.x, (r.width + dx).max(min_size)),
                    _ => (r.x, r.width),
                };
                let (y, height) = match self.vertical {
                    Some(Direction::Up) => (r.y + dy, (r.height - dy).max(min_size)),
                    Some(Direction::Down) => (r.y, (r.height + dy).max(min_size)),
                    _ => (r.y, r.height),
                };
                Some(Rect::new(x, y, width, height))
            }
            _ => None,
        }
    }
}

/// Grid build mode
///
/// ```text
///   ┌──────────┐   grid command    ┌────────┐ ◄─┐ h/j/k/l: resize grid
///   │ Inactive │ ────────────────► │ Active │ ──┘ Shift+h/j/k/l: next overlay
///   └──────────┘ ◄──────────────── └────────┘
///                  grid command
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridSession {
    /// Monitor whose overlay should have input focus
    pub focused: Option<MonitorId>,
    /// Window to give focus back to on exit
    pub restore_focus: Option<Window>,
}

/// Everything the dispatcher remembers between events
#[derive(Debug, Default)]
pub struct DispatcherState {
    pub drag: Option<DragState>,
    pub grid: Option<GridSession>,
    /// Last client to receive focus
    pub last_focus: Option<Window>,
}

impl DispatcherState {
    pub fn grid_active(&self) -> bool {
        self.grid.is_some()
    }

    /// Forget a drag on `window`, if there is one
    pub fn cancel_drag_on(&mut self, window: Window) {
        if self.drag.is_some_and(|d| d.window == window) {
            log::debug!("Drag on 0x{:x} cancelled", window);
            self.drag = None;
        }
    }
}
