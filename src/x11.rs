//! X11 backend: [`DisplayServer`] over an x11rb `RustConnection`.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use x11rb::connection::Connection;
use x11rb::cursor::Handle as CursorHandle;
use x11rb::protocol::randr::{self, ConnectionExt as _};
use x11rb::protocol::xproto::*;
use x11rb::protocol::Event;
use x11rb::resource_manager;
use x11rb::rust_connection::RustConnection;
use x11rb::x11_utils::X11Error;
use x11rb::{CURRENT_TIME, NONE};

use crate::display::{
    ButtonGrab, ConfigureChanges, DisplayServer, OutputInfo, ProtocolError, ScreenInfo, Window, WindowAttrs,
    WmEvent,
};
use crate::geometry::{Point, Rect};

/// Called for every error the server reports on an unchecked request
pub type ErrorHandler = Box<dyn FnMut(&ProtocolError)>;

/// Default handler: log and carry on
pub fn log_protocol_error(e: &ProtocolError) {
    log::error!(
        "X error {} (request {}.{}, value 0x{:x}, sequence {})",
        e.kind,
        e.major_opcode,
        e.minor_opcode,
        e.bad_value,
        e.sequence
    );
}

impl From<&X11Error> for ProtocolError {
    fn from(e: &X11Error) -> Self {
        Self {
            kind: format!("{:?}", e.error_kind),
            major_opcode: e.major_opcode,
            minor_opcode: e.minor_opcode,
            bad_value: e.bad_value,
            sequence: e.sequence,
        }
    }
}

/// Atoms we need
struct Atoms {
    wm_protocols: Atom,
    wm_delete_window: Atom,
}

impl Atoms {
    fn new(conn: &RustConnection) -> Result<Self> {
        Ok(Self {
            wm_protocols: Self::intern(conn, b"WM_PROTOCOLS")?,
            wm_delete_window: Self::intern(conn, b"WM_DELETE_WINDOW")?,
        })
    }

    fn intern(conn: &RustConnection, name: &[u8]) -> Result<Atom> {
        Ok(conn.intern_atom(false, name)?.reply()?.atom)
    }
}

/// Keycode <-> keysym tables from the server's keyboard mapping
struct Keymap {
    min_keycode: Keycode,
    keysyms_per_keycode: usize,
    keysyms: Vec<u32>,
    keysym_to_keycode: HashMap<u32, Keycode>,
}

impl Keymap {
    fn load(conn: &RustConnection) -> Result<Self> {
        let setup = conn.setup();
        let min_keycode = setup.min_keycode;
        let max_keycode = setup.max_keycode;

        let mapping = conn
            .get_keyboard_mapping(min_keycode, max_keycode - min_keycode + 1)?
            .reply()
            .context("Failed to read keyboard mapping")?;
        let keysyms_per_keycode = mapping.keysyms_per_keycode as usize;

        let mut keysym_to_keycode = HashMap::new();
        if keysyms_per_keycode > 0 {
            for (i, chunk) in mapping.keysyms.chunks(keysyms_per_keycode).enumerate() {
                for keysym in chunk {
                    if *keysym != 0 {
                        keysym_to_keycode
                            .entry(*keysym)
                            .or_insert(min_keycode + i as u8);
                    }
                }
            }
        }

        Ok(Self {
            min_keycode,
            keysyms_per_keycode,
            keysyms: mapping.keysyms,
            keysym_to_keycode,
        })
    }

    /// Unshifted keysym of a keycode
    fn keysym(&self, keycode: Keycode) -> u32 {
        let idx = keycode.saturating_sub(self.min_keycode) as usize * self.keysyms_per_keycode;
        self.keysyms.get(idx).copied().unwrap_or(0)
    }

    fn keycode(&self, keysym: u32) -> Option<Keycode> {
        self.keysym_to_keycode.get(&keysym).copied()
    }
}

/// NumLock and CapsLock combinations every grab is repeated for
fn lock_combos() -> [ModMask; 4] {
    [
        ModMask::from(0u16),
        ModMask::LOCK,
        ModMask::M2,
        ModMask::LOCK | ModMask::M2,
    ]
}

pub struct X11Display {
    conn: RustConnection,
    name: String,
    atoms: Atoms,
    keymap: Keymap,
    /// Drawing context per overlay
    gcs: HashMap<Window, Gcontext>,
    /// Events read ahead while coalescing motion
    pending: VecDeque<Event>,
    on_error: ErrorHandler,
}

impl X11Display {
    /// Connect to `display` (or `$DISPLAY`)
    pub fn connect(display: Option<&str>, on_error: ErrorHandler) -> Result<Self> {
        let (conn, screen_num) = RustConnection::connect(display).context("Failed to connect to X11 server")?;

        let name = display
            .map(str::to_string)
            .or_else(|| std::env::var("DISPLAY").ok())
            .unwrap_or_else(|| ":0".to_string());
        log::info!(
            "Connected to X11 display {} ({} screen(s), default {})",
            name,
            conn.setup().roots.len(),
            screen_num
        );

        let atoms = Atoms::new(&conn)?;
        let keymap = Keymap::load(&conn)?;

        Ok(Self {
            conn,
            name,
            atoms,
            keymap,
            gcs: HashMap::new(),
            pending: VecDeque::new(),
            on_error,
        })
    }

    fn screen_of_root(&self, root: Window) -> Option<usize> {
        self.conn.setup().roots.iter().position(|s| s.root == root)
    }

    /// Crosshair cursor for `screen`, if the cursor theme can be loaded
    fn crosshair(&self, screen: usize) -> Option<Cursor> {
        let db = resource_manager::new_from_default(&self.conn).ok()?;
        let handle = CursorHandle::new(&self.conn, screen, &db).ok()?.reply().ok()?;
        handle.load_cursor(&self.conn, "crosshair").ok()
    }

    fn supports_delete(&self, window: Window) -> bool {
        let Ok(cookie) = self
            .conn
            .get_property(false, window, self.atoms.wm_protocols, AtomEnum::ATOM, 0, 32)
        else {
            return false;
        };
        match cookie.reply() {
            Ok(reply) => reply
                .value32()
                .is_some_and(|mut atoms| atoms.any(|a| a == self.atoms.wm_delete_window)),
            Err(_) => false,
        }
    }

    /// RandR outputs with a CRTC, in screen coordinates
    fn randr_outputs(&self, root: Window) -> Result<Vec<OutputInfo>> {
        let resources = self.conn.randr_get_screen_resources_current(root)?.reply()?;
        let mut outputs = Vec::new();

        for output in resources.outputs {
            let info = self
                .conn
                .randr_get_output_info(output, resources.config_timestamp)?
                .reply()?;
            if info.crtc == NONE || info.connection != randr::Connection::CONNECTED {
                continue;
            }
            let crtc = self
                .conn
                .randr_get_crtc_info(info.crtc, resources.config_timestamp)?
                .reply()?;
            outputs.push(OutputInfo {
                name: String::from_utf8_lossy(&info.name).into_owned(),
                rect: Rect::new(crtc.x as i32, crtc.y as i32, crtc.width as i32, crtc.height as i32),
            });
        }

        Ok(outputs)
    }

    fn read_event(&mut self) -> Result<Option<Event>> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(Some(event));
        }
        Ok(self.conn.poll_for_event()?)
    }

    /// Skip to the latest of a run of motion events for the same window
    fn coalesce_motion(&mut self, mut motion: MotionNotifyEvent) -> Result<MotionNotifyEvent> {
        while let Some(event) = self.conn.poll_for_event()? {
            match event {
                Event::MotionNotify(next) if next.event == motion.event => motion = next,
                other => {
                    self.pending.push_back(other);
                    break;
                }
            }
        }
        Ok(motion)
    }

    /// Turn a raw event into one the window manager handles
    fn translate(&mut self, event: Event) -> Result<Option<WmEvent>> {
        let event = match event {
            Event::Error(e) => {
                (self.on_error)(&ProtocolError::from(&e));
                return Ok(None);
            }
            Event::MapRequest(e) => WmEvent::MapRequest { window: e.window },
            Event::UnmapNotify(e) => WmEvent::UnmapNotify { window: e.window },
            Event::ConfigureRequest(e) => {
                let mask = e.value_mask;
                let changes = ConfigureChanges {
                    x: mask.contains(ConfigWindow::X).then_some(e.x as i32),
                    y: mask.contains(ConfigWindow::Y).then_some(e.y as i32),
                    width: mask.contains(ConfigWindow::WIDTH).then_some(e.width as u32),
                    height: mask.contains(ConfigWindow::HEIGHT).then_some(e.height as u32),
                };
                WmEvent::ConfigureRequest {
                    window: e.window,
                    changes,
                }
            }
            Event::MotionNotify(e) => {
                let e = self.coalesce_motion(e)?;
                WmEvent::Motion {
                    window: e.event,
                    root_pos: Point::new(e.root_x as i32, e.root_y as i32),
                }
            }
            Event::KeyPress(e) => WmEvent::KeyPress {
                window: e.event,
                keysym: self.keymap.keysym(e.detail),
                state: u16::from(e.state),
            },
            Event::ButtonPress(e) => WmEvent::ButtonPress {
                window: e.event,
                subwindow: (e.child != NONE).then_some(e.child),
                button: e.detail,
                root_pos: Point::new(e.root_x as i32, e.root_y as i32),
                state: u16::from(e.state),
            },
            Event::ButtonRelease(e) => WmEvent::ButtonRelease {
                window: e.event,
                button: e.detail,
            },
            Event::FocusIn(e) => WmEvent::Focus {
                window: e.event,
                focused: true,
                grab: e.mode == NotifyMode::GRAB || e.mode == NotifyMode::UNGRAB,
            },
            Event::FocusOut(e) => WmEvent::Focus {
                window: e.event,
                focused: false,
                grab: e.mode == NotifyMode::GRAB || e.mode == NotifyMode::UNGRAB,
            },
            Event::Expose(e) => WmEvent::Expose {
                window: e.window,
                count: e.count,
            },
            Event::ClientMessage(e) => {
                let name = self.conn.get_atom_name(e.type_)?.reply()?.name;
                WmEvent::ClientMessage {
                    window: e.window,
                    message_type: String::from_utf8_lossy(&name).into_owned(),
                }
            }
            Event::MappingNotify(e) => {
                if e.request == Mapping::KEYBOARD {
                    log::info!("Keyboard mapping changed");
                    self.keymap = Keymap::load(&self.conn)?;
                }
                return Ok(None);
            }
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

impl DisplayServer for X11Display {
    fn display_name(&self) -> &str {
        &self.name
    }

    fn screens(&self) -> Vec<ScreenInfo> {
        self.conn
            .setup()
            .roots
            .iter()
            .enumerate()
            .map(|(index, s)| ScreenInfo {
                index,
                root: s.root,
                width: s.width_in_pixels as i32,
                height: s.height_in_pixels as i32,
            })
            .collect()
    }

    fn outputs(&mut self, screen: &ScreenInfo) -> Result<Vec<OutputInfo>> {
        match self.randr_outputs(screen.root) {
            Ok(outputs) if !outputs.is_empty() => Ok(outputs),
            Ok(_) => {
                log::warn!("RandR reports no active outputs on screen {}, using the whole screen", screen.index);
                Ok(vec![OutputInfo {
                    name: "default".to_string(),
                    rect: Rect::new(0, 0, screen.width, screen.height),
                }])
            }
            Err(e) => {
                log::warn!("RandR unavailable on screen {} ({:#}), using the whole screen", screen.index, e);
                Ok(vec![OutputInfo {
                    name: "default".to_string(),
                    rect: Rect::new(0, 0, screen.width, screen.height),
                }])
            }
        }
    }

    fn children(&mut self, root: Window) -> Result<Vec<Window>> {
        Ok(self.conn.query_tree(root)?.reply()?.children)
    }

    /// Become the window manager by requesting SubstructureRedirect on root
    fn become_wm(&mut self, root: Window) -> Result<()> {
        let event_mask = EventMask::SUBSTRUCTURE_REDIRECT | EventMask::SUBSTRUCTURE_NOTIFY | EventMask::STRUCTURE_NOTIFY;

        let result = self
            .conn
            .change_window_attributes(root, &ChangeWindowAttributesAux::new().event_mask(event_mask));
        self.conn.flush()?;

        if let Err(e) = result?.check() {
            bail!("Another window manager is already running! Error: {}", e);
        }

        log::info!("Successfully became the window manager on root 0x{:x}", root);
        Ok(())
    }

    fn decorate_root(&mut self, root: Window, background: u32) -> Result<()> {
        let mut aux = ChangeWindowAttributesAux::new().background_pixel(background);
        if let Some(cursor) = self.screen_of_root(root).and_then(|s| self.crosshair(s)) {
            aux = aux.cursor(cursor);
        }
        self.conn.change_window_attributes(root, &aux)?;
        self.conn.clear_area(false, root, 0, 0, 0, 0)?;
        Ok(())
    }

    fn attributes(&mut self, window: Window) -> Result<WindowAttrs> {
        let attrs = self.conn.get_window_attributes(window)?.reply()?;
        Ok(WindowAttrs {
            input_only: attrs.class == WindowClass::INPUT_ONLY,
            override_redirect: attrs.override_redirect,
            viewable: attrs.map_state == MapState::VIEWABLE,
        })
    }

    fn geometry(&mut self, window: Window) -> Result<Rect> {
        let g = self.conn.get_geometry(window)?.reply()?;
        Ok(Rect::new(g.x as i32, g.y as i32, g.width as i32, g.height as i32))
    }

    fn root_of(&mut self, window: Window) -> Result<Window> {
        Ok(self.conn.get_geometry(window)?.reply()?.root)
    }

    fn select_focus_events(&mut self, window: Window) -> Result<()> {
        self.conn.change_window_attributes(
            window,
            &ChangeWindowAttributesAux::new().event_mask(EventMask::FOCUS_CHANGE),
        )?;
        Ok(())
    }

    fn set_border_width(&mut self, window: Window, width: u32) -> Result<()> {
        self.conn
            .configure_window(window, &ConfigureWindowAux::new().border_width(width))?;
        Ok(())
    }

    fn set_border_color(&mut self, window: Window, color: u32) -> Result<()> {
        self.conn
            .change_window_attributes(window, &ChangeWindowAttributesAux::new().border_pixel(color))?;
        Ok(())
    }

    fn configure(&mut self, window: Window, changes: &ConfigureChanges) -> Result<()> {
        let aux = ConfigureWindowAux::new()
            .x(changes.x)
            .y(changes.y)
            .width(changes.width)
            .height(changes.height);
        self.conn.configure_window(window, &aux)?;
        Ok(())
    }

    fn map(&mut self, window: Window) -> Result<()> {
        self.conn.map_window(window)?;
        Ok(())
    }

    fn raise(&mut self, window: Window) -> Result<()> {
        self.conn
            .configure_window(window, &ConfigureWindowAux::new().stack_mode(StackMode::ABOVE))?;
        Ok(())
    }

    fn input_focus(&mut self) -> Result<Window> {
        Ok(self.conn.get_input_focus()?.reply()?.focus)
    }

    fn set_input_focus(&mut self, window: Window) -> Result<()> {
        self.conn.set_input_focus(InputFocus::POINTER_ROOT, window, CURRENT_TIME)?;
        Ok(())
    }

    fn grab_button(&mut self, window: Window, button: u8, modifiers: u16, mode: ButtonGrab) -> Result<()> {
        let (event_mask, pointer_mode) = match mode {
            ButtonGrab::Replay => (EventMask::BUTTON_PRESS, GrabMode::SYNC),
            ButtonGrab::Intercept => (
                EventMask::BUTTON_PRESS | EventMask::BUTTON_RELEASE | EventMask::BUTTON_MOTION,
                GrabMode::ASYNC,
            ),
        };
        for extra in lock_combos() {
            self.conn.grab_button(
                false,
                window,
                event_mask,
                pointer_mode,
                GrabMode::ASYNC,
                NONE,
                NONE,
                ButtonIndex::from(button),
                ModMask::from(modifiers) | extra,
            )?;
        }
        Ok(())
    }

    fn ungrab_button(&mut self, window: Window, button: u8, modifiers: u16) -> Result<()> {
        for extra in lock_combos() {
            self.conn
                .ungrab_button(ButtonIndex::from(button), window, ModMask::from(modifiers) | extra)?;
        }
        Ok(())
    }

    fn grab_key(&mut self, window: Window, keysym: u32, modifiers: u16) -> Result<()> {
        let Some(keycode) = self.keymap.keycode(keysym) else {
            log::warn!("Could not find keycode for keysym 0x{:x}", keysym);
            return Ok(());
        };
        for extra in lock_combos() {
            self.conn.grab_key(
                false,
                window,
                ModMask::from(modifiers) | extra,
                keycode,
                GrabMode::ASYNC,
                GrabMode::ASYNC,
            )?;
        }
        Ok(())
    }

    fn replay_pointer(&mut self) -> Result<()> {
        self.conn.allow_events(Allow::REPLAY_POINTER, CURRENT_TIME)?;
        Ok(())
    }

    fn send_delete(&mut self, window: Window) -> Result<()> {
        if !self.supports_delete(window) {
            log::warn!("0x{:x} does not list WM_DELETE_WINDOW, it may ignore the close request", window);
        }

        let data = ClientMessageData::from([self.atoms.wm_delete_window, 0u32, 0u32, 0u32, 0u32]);
        let event = ClientMessageEvent {
            response_type: CLIENT_MESSAGE_EVENT,
            format: 32,
            sequence: 0,
            window,
            type_: self.atoms.wm_protocols,
            data,
        };
        self.conn.send_event(false, window, EventMask::NO_EVENT, event)?;
        Ok(())
    }

    fn create_overlay(
        &mut self,
        root: Window,
        rect: Rect,
        border: u32,
        border_color: u32,
        background: u32,
    ) -> Result<Window> {
        let window = self.conn.generate_id()?;
        self.conn.create_window(
            x11rb::COPY_DEPTH_FROM_PARENT,
            window,
            root,
            rect.x as i16,
            rect.y as i16,
            rect.width.max(1) as u16,
            rect.height.max(1) as u16,
            border as u16,
            WindowClass::INPUT_OUTPUT,
            x11rb::COPY_FROM_PARENT,
            &CreateWindowAux::new()
                .background_pixel(background)
                .border_pixel(border_color)
                .override_redirect(1)
                .event_mask(EventMask::EXPOSURE | EventMask::KEY_PRESS | EventMask::FOCUS_CHANGE),
        )?;

        let gc = self.conn.generate_id()?;
        self.conn.create_gc(gc, window, &CreateGCAux::new().foreground(border_color))?;
        self.gcs.insert(window, gc);

        log::debug!("Created overlay 0x{:x} at {:?}", window, rect);
        Ok(window)
    }

    fn destroy_window(&mut self, window: Window) -> Result<()> {
        if let Some(gc) = self.gcs.remove(&window) {
            self.conn.free_gc(gc)?;
        }
        self.conn.destroy_window(window)?;
        Ok(())
    }

    fn clear(&mut self, window: Window) -> Result<()> {
        self.conn.clear_area(false, window, 0, 0, 0, 0)?;
        Ok(())
    }

    fn draw_lines(&mut self, window: Window, color: u32, width: u32, lines: &[(Point, Point)]) -> Result<()> {
        let Some(&gc) = self.gcs.get(&window) else {
            bail!("No drawing context for 0x{:x}", window);
        };
        self.conn
            .change_gc(gc, &ChangeGCAux::new().foreground(color).line_width(width))?;

        let segments: Vec<Segment> = lines
            .iter()
            .map(|(a, b)| Segment {
                x1: a.x as i16,
                y1: a.y as i16,
                x2: b.x as i16,
                y2: b.y as i16,
            })
            .collect();
        self.conn.poly_segment(window, gc, &segments)?;
        Ok(())
    }

    fn next_event(&mut self, timeout: Duration) -> Result<Option<WmEvent>> {
        let mut waited = timeout.is_zero();
        loop {
            let event = match self.read_event()? {
                Some(event) => event,
                None if !waited => {
                    // Nothing queued, sleep briefly to avoid busy-waiting
                    self.conn.flush()?;
                    std::thread::sleep(timeout);
                    waited = true;
                    continue;
                }
                None => return Ok(None),
            };
            if let Some(event) = self.translate(event)? {
                return Ok(Some(event));
            }
        }
    }

    fn flush(&mut self) -> Result<()> {
        self.conn.flush()?;
        Ok(())
    }
}
