//! In-memory stand-ins for the display server, the DDC/CI bus and the
//! process launcher. Each fake is a cheap handle over shared state, so a
//! test can keep a clone to inspect what the window manager did.

use std::cell::{RefCell, RefMut};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};

use crate::config::Config;
use crate::ddc::{ControlChannel, DisplayDataChannel, DisplayId, Tuning};
use crate::display::{
    ButtonGrab, ConfigureChanges, DisplayServer, OutputInfo, ScreenInfo, Window, WindowAttrs, WmEvent,
};
use crate::error::DdcError;
use crate::geometry::{Point, Rect};
use crate::launcher::Launcher;
use crate::wm::Wm;

// =============================================================================
// DDC/CI
// =============================================================================

#[derive(Default)]
struct ChannelState {
    attached: Vec<DisplayId>,
    values: HashMap<DisplayId, u16>,
    fail_open: HashSet<DisplayId>,
    fail_read: HashSet<DisplayId>,
    fail_write: HashSet<DisplayId>,
    tuning: Option<Tuning>,
    writes: Vec<(DisplayId, u8, u16)>,
}

#[derive(Clone, Default)]
pub struct FakeChannel(Rc<RefCell<ChannelState>>);

impl FakeChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plug in a monitor whose input source reads as `value`
    pub fn attach(&self, id: DisplayId, value: u16) {
        let mut s = self.0.borrow_mut();
        s.values.insert(id.clone(), value);
        s.attached.push(id);
    }

    pub fn set_value(&self, id: &DisplayId, value: u16) {
        self.0.borrow_mut().values.insert(id.clone(), value);
    }

    pub fn fail_open(&self, id: &DisplayId) {
        self.0.borrow_mut().fail_open.insert(id.clone());
    }

    pub fn fail_read(&self, id: &DisplayId) {
        self.0.borrow_mut().fail_read.insert(id.clone());
    }

    pub fn fail_write(&self, id: &DisplayId) {
        self.0.borrow_mut().fail_write.insert(id.clone());
    }

    pub fn tuning(&self) -> Option<Tuning> {
        self.0.borrow().tuning
    }

    pub fn writes(&self) -> Vec<(DisplayId, u8, u16)> {
        self.0.borrow().writes.clone()
    }
}

fn bus_error(id: &DisplayId) -> DdcError {
    DdcError::Protocol(format!("no answer from {}", id))
}

impl ControlChannel for FakeChannel {
    type DisplayRef = DisplayId;
    type Handle = DisplayId;

    fn tune(&mut self, tuning: &Tuning) {
        self.0.borrow_mut().tuning = Some(*tuning);
    }

    fn detect(&mut self) -> Result<Vec<(DisplayId, DisplayId)>, DdcError> {
        Ok(self.0.borrow().attached.iter().map(|id| (id.clone(), id.clone())).collect())
    }

    fn open(&mut self, display: &DisplayId) -> Result<DisplayId, DdcError> {
        if self.0.borrow().fail_open.contains(display) {
            return Err(bus_error(display));
        }
        Ok(display.clone())
    }

    fn read_feature(&mut self, handle: &mut DisplayId, _code: u8) -> Result<u16, DdcError> {
        let s = self.0.borrow();
        if s.fail_read.contains(handle) {
            return Err(bus_error(handle));
        }
        s.values.get(handle).copied().ok_or_else(|| bus_error(handle))
    }

    fn write_feature(&mut self, handle: &mut DisplayId, code: u8, value: u16) -> Result<(), DdcError> {
        let mut s = self.0.borrow_mut();
        if s.fail_write.contains(handle) {
            return Err(bus_error(handle));
        }
        s.writes.push((handle.clone(), code, value));
        s.values.insert(handle.clone(), value);
        Ok(())
    }
}

// =============================================================================
// Launcher
// =============================================================================

#[derive(Clone, Default)]
pub struct RecordingLauncher(Rc<RefCell<Vec<(String, String)>>>);

impl RecordingLauncher {
    /// `(command, DISPLAY)` pairs, oldest first
    pub fn launched(&self) -> Vec<(String, String)> {
        self.0.borrow().clone()
    }
}

impl Launcher for RecordingLauncher {
    fn launch(&mut self, command: &str, display: &str) -> Result<()> {
        self.0.borrow_mut().push((command.to_string(), display.to_string()));
        Ok(())
    }
}

// =============================================================================
// Display server
// =============================================================================

/// A display request the window manager made
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    BecomeWm(Window),
    DecorateRoot(Window, u32),
    SelectFocus(Window),
    BorderWidth(Window, u32),
    BorderColor(Window, u32),
    Configure(Window, ConfigureChanges),
    Map(Window),
    Raise(Window),
    SetFocus(Window),
    GrabButton(Window, u8, u16, ButtonGrab),
    UngrabButton(Window, u8, u16),
    GrabKey(Window, u32, u16),
    ReplayPointer,
    SendDelete(Window),
    CreateOverlay(Window, Rect),
    Destroy(Window),
    Clear(Window),
    DrawLines(Window, u32, usize),
}

#[derive(Debug, Clone)]
pub struct FakeWindow {
    pub root: Window,
    pub rect: Rect,
    pub attrs: WindowAttrs,
}

#[derive(Default)]
pub struct DisplayState {
    pub screens: Vec<ScreenInfo>,
    pub outputs: HashMap<usize, Vec<OutputInfo>>,
    pub windows: BTreeMap<Window, FakeWindow>,
    pub focus: Window,
    pub events: VecDeque<WmEvent>,
    pub calls: Vec<Call>,
    /// Some other client already holds SubstructureRedirect
    pub other_wm: bool,
    /// SetInputFocus fails, as it does for a window destroyed meanwhile
    pub fail_focus: bool,
    next_window: Window,
}

#[derive(Clone, Default)]
pub struct FakeDisplay(Rc<RefCell<DisplayState>>);

impl FakeDisplay {
    /// Root window of the first screen
    pub const ROOT: Window = 0x100;

    pub fn new() -> Self {
        let fake = Self::default();
        fake.state().next_window = 0x1000;
        fake
    }

    /// One 3840x1080 screen with monitors "A" (left) and "B" (right)
    pub fn side_by_side() -> Self {
        let fake = Self::new();
        fake.add_screen(
            3840,
            1080,
            &[("A", Rect::new(0, 0, 1920, 1080)), ("B", Rect::new(1920, 0, 1920, 1080))],
        );
        fake
    }

    pub fn state(&self) -> RefMut<'_, DisplayState> {
        self.0.borrow_mut()
    }

    /// Add a screen and return its root
    pub fn add_screen(&self, width: i32, height: i32, outputs: &[(&str, Rect)]) -> Window {
        let mut s = self.state();
        let index = s.screens.len();
        let root = Self::ROOT + index as Window;
        s.screens.push(ScreenInfo { index, root, width, height });
        s.outputs.insert(
            index,
            outputs
                .iter()
                .map(|(name, rect)| OutputInfo { name: name.to_string(), rect: *rect })
                .collect(),
        );
        root
    }

    /// Create a viewable top-level window on the first screen
    pub fn add_window(&self, rect: Rect) -> Window {
        self.add_window_on(Self::ROOT, rect)
    }

    pub fn add_window_on(&self, root: Window, rect: Rect) -> Window {
        let mut s = self.state();
        let window = s.next_window;
        s.next_window += 1;
        let attrs = WindowAttrs { viewable: true, ..WindowAttrs::default() };
        s.windows.insert(window, FakeWindow { root, rect, attrs });
        window
    }

    pub fn set_attrs(&self, window: Window, attrs: WindowAttrs) {
        if let Some(w) = self.state().windows.get_mut(&window) {
            w.attrs = attrs;
        }
    }

    pub fn rect(&self, window: Window) -> Rect {
        self.state().windows[&window].rect
    }

    pub fn focus(&self) -> Window {
        self.state().focus
    }

    pub fn set_focus(&self, window: Window) {
        self.state().focus = window;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn exists(&self, window: Window) -> bool {
        self.state().windows.contains_key(&window)
    }

    fn record(&self, call: Call) {
        self.state().calls.push(call);
    }

    fn window(&self, window: Window) -> Result<FakeWindow> {
        self.state()
            .windows
            .get(&window)
            .cloned()
            .ok_or_else(|| anyhow!("BadWindow 0x{:x}", window))
    }
}

impl DisplayServer for FakeDisplay {
    fn display_name(&self) -> &str {
        ":9"
    }

    fn screens(&self) -> Vec<ScreenInfo> {
        self.0.borrow().screens.clone()
    }

    fn outputs(&mut self, screen: &ScreenInfo) -> Result<Vec<OutputInfo>> {
        Ok(self.state().outputs.get(&screen.index).cloned().unwrap_or_default())
    }

    fn children(&mut self, root: Window) -> Result<Vec<Window>> {
        Ok(self
            .state()
            .windows
            .iter()
            .filter(|(_, w)| w.root == root)
            .map(|(id, _)| *id)
            .collect())
    }

    fn become_wm(&mut self, root: Window) -> Result<()> {
        if self.state().other_wm {
            bail!("Another window manager is already running!");
        }
        self.record(Call::BecomeWm(root));
        Ok(())
    }

    fn decorate_root(&mut self, root: Window, background: u32) -> Result<()> {
        self.record(Call::DecorateRoot(root, background));
        Ok(())
    }

    fn attributes(&mut self, window: Window) -> Result<WindowAttrs> {
        Ok(self.window(window)?.attrs)
    }

    fn geometry(&mut self, window: Window) -> Result<Rect> {
        if let Some(screen) = self.0.borrow().screens.iter().find(|s| s.root == window) {
            return Ok(Rect::new(0, 0, screen.width, screen.height));
        }
        Ok(self.window(window)?.rect)
    }

    fn root_of(&mut self, window: Window) -> Result<Window> {
        if self.0.borrow().screens.iter().any(|s| s.root == window) {
            return Ok(window);
        }
        Ok(self.window(window)?.root)
    }

    fn select_focus_events(&mut self, window: Window) -> Result<()> {
        self.record(Call::SelectFocus(window));
        Ok(())
    }

    fn set_border_width(&mut self, window: Window, width: u32) -> Result<()> {
        self.record(Call::BorderWidth(window, width));
        Ok(())
    }

    fn set_border_color(&mut self, window: Window, color: u32) -> Result<()> {
        self.record(Call::BorderColor(window, color));
        Ok(())
    }

    fn configure(&mut self, window: Window, changes: &ConfigureChanges) -> Result<()> {
        self.record(Call::Configure(window, *changes));
        if let Some(w) = self.state().windows.get_mut(&window) {
            let r = &mut w.rect;
            r.x = changes.x.unwrap_or(r.x);
            r.y = changes.y.unwrap_or(r.y);
            r.width = changes.width.map_or(r.width, |v| v as i32);
            r.height = changes.height.map_or(r.height, |v| v as i32);
        }
        Ok(())
    }

    fn map(&mut self, window: Window) -> Result<()> {
        self.record(Call::Map(window));
        Ok(())
    }

    fn raise(&mut self, window: Window) -> Result<()> {
        self.record(Call::Raise(window));
        Ok(())
    }

    fn input_focus(&mut self) -> Result<Window> {
        Ok(self.focus())
    }

    fn set_input_focus(&mut self, window: Window) -> Result<()> {
        if self.state().fail_focus {
            bail!("BadMatch focusing 0x{:x}", window);
        }
        self.record(Call::SetFocus(window));
        self.set_focus(window);
        Ok(())
    }

    fn grab_button(&mut self, window: Window, button: u8, modifiers: u16, mode: ButtonGrab) -> Result<()> {
        self.record(Call::GrabButton(window, button, modifiers, mode));
        Ok(())
    }

    fn ungrab_button(&mut self, window: Window, button: u8, modifiers: u16) -> Result<()> {
        self.record(Call::UngrabButton(window, button, modifiers));
        Ok(())
    }

    fn grab_key(&mut self, window: Window, keysym: u32, modifiers: u16) -> Result<()> {
        self.record(Call::GrabKey(window, keysym, modifiers));
        Ok(())
    }

    fn replay_pointer(&mut self) -> Result<()> {
        self.record(Call::ReplayPointer);
        Ok(())
    }

    fn send_delete(&mut self, window: Window) -> Result<()> {
        self.record(Call::SendDelete(window));
        Ok(())
    }

    fn create_overlay(
        &mut self,
        root: Window,
        rect: Rect,
        _border: u32,
        _border_color: u32,
        _background: u32,
    ) -> Result<Window> {
        self.record(Call::CreateOverlay(root, rect));
        let window = self.add_window_on(root, rect);
        // Overlays are override-redirect and never reported as children
        self.set_attrs(window, WindowAttrs { override_redirect: true, viewable: true, ..WindowAttrs::default() });
        Ok(window)
    }

    fn destroy_window(&mut self, window: Window) -> Result<()> {
        self.record(Call::Destroy(window));
        self.state().windows.remove(&window);
        Ok(())
    }

    fn clear(&mut self, window: Window) -> Result<()> {
        self.record(Call::Clear(window));
        Ok(())
    }

    fn draw_lines(&mut self, window: Window, color: u32, _width: u32, lines: &[(Point, Point)]) -> Result<()> {
        self.record(Call::DrawLines(window, color, lines.len()));
        Ok(())
    }

    fn next_event(&mut self, _timeout: Duration) -> Result<Option<WmEvent>> {
        Ok(self.state().events.pop_front())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

// =============================================================================
// Window manager harness
// =============================================================================

pub type TestWm = Wm<FakeDisplay, FakeChannel, RecordingLauncher>;

impl Wm<FakeDisplay, FakeChannel, RecordingLauncher> {
    /// Start on `display` without DDC/CI
    pub fn start(display: FakeDisplay, config: &Config) -> Self {
        Wm::new(display, RecordingLauncher::default(), None, config).unwrap()
    }

    pub fn with_ddc(display: FakeDisplay, channel: FakeChannel, config: &Config) -> Self {
        let ddc = DisplayDataChannel::new(channel);
        Wm::new(display, RecordingLauncher::default(), Some(ddc), config).unwrap()
    }

    /// Default configuration on [`FakeDisplay::side_by_side`]
    pub fn side_by_side() -> (Self, FakeDisplay) {
        let fake = FakeDisplay::side_by_side();
        (Self::start(fake.clone(), &Config::default()), fake)
    }

    /// Map a new window through a MapRequest, as a client would
    pub fn open_window(&mut self, rect: Rect) -> Window {
        let window = self.display.add_window(rect);
        self.handle_event(WmEvent::MapRequest { window }).unwrap();
        window
    }

    /// Press a bound key with the focused window as the event window
    pub fn press(&mut self, keysym: u32, state: u16) {
        let window = self.display.focus();
        self.handle_event(WmEvent::KeyPress { window, keysym, state }).unwrap();
    }

    /// Focus `window` and deliver the FocusIn the server would send
    pub fn focus_window(&mut self, window: Window) {
        self.display.set_focus(window);
        self.handle_event(WmEvent::Focus { window, focused: true, grab: false }).unwrap();
    }
}
