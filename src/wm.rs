//! The window manager: startup, the event loop and shared helpers.
//!
//! Event handlers live in `event.rs`, key binding actions in `actions.rs`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::config::{Config, ParsedBinding, Style, WmAction};
use crate::ddc::{ControlChannel, DisplayDataChannel};
use crate::display::{ButtonGrab, ConfigureChanges, DisplayServer, Window};
use crate::geometry::{Point, Rect};
use crate::grid::{self, GridDims};
use crate::launcher::Launcher;
use crate::monitor::match_outputs;
use crate::registry::{Monitor, MonitorId, Registry, RootId};
use crate::state::{DispatcherState, MOVE_BUTTON, RESIZE_BUTTON};

/// How long to block waiting for an event before checking timers
const EVENT_WAIT: Duration = Duration::from_millis(20);

/// Values resolved from the configuration at startup
#[derive(Debug, Clone)]
pub struct Settings {
    pub style: Style,
    pub drag_modifiers: u16,
    pub edge_threshold: i32,
    pub min_size: i32,
    pub grid: GridDims,
    pub poll_interval: Duration,
}

impl Settings {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            style: config.style()?,
            drag_modifiers: config.drag_modifiers(),
            edge_threshold: config.drag.edge_threshold,
            min_size: config.drag.min_size,
            grid: GridDims::new(config.grid.columns, config.grid.rows),
            poll_interval: config.ddc.poll_interval(),
        })
    }
}

/// Center `size` (plus border) on `area`, shrinking it to fit
pub fn fit_centered(area: Rect, size: Rect, border: i32) -> Rect {
    let w = (size.width + 2 * border).min(area.width);
    let h = (size.height + 2 * border).min(area.height);
    let c = area.center();
    Rect::new(c.x - w / 2, c.y - h / 2, w - 2 * border, h - 2 * border)
}

/// The main window manager state
pub struct Wm<D: DisplayServer, C: ControlChannel, L: Launcher> {
    pub(crate) display: D,
    pub(crate) launcher: L,
    pub(crate) settings: Settings,
    pub(crate) bindings: HashMap<ParsedBinding, WmAction>,
    pub(crate) grid_key: Option<ParsedBinding>,
    pub(crate) registry: Registry,
    pub(crate) state: DispatcherState,
    pub(crate) ddc: Option<DisplayDataChannel<C>>,
    pub(crate) next_ddc_poll: Instant,
    pub(crate) running: bool,
}

impl<D: DisplayServer, C: ControlChannel, L: Launcher> Wm<D, C, L> {
    /// Take over the display: claim every configured screen, match
    /// monitors, open DDC/CI and adopt existing windows.
    pub fn new(display: D, launcher: L, ddc: Option<DisplayDataChannel<C>>, config: &Config) -> Result<Self> {
        let settings = Settings::from_config(config)?;

        let mut bindings = HashMap::new();
        let mut grid_key = None;
        for (action, binding) in config.parse_keybindings() {
            if action == WmAction::GridMode {
                grid_key = Some(binding);
            }
            if let Some(previous) = bindings.insert(binding, action.clone()) {
                log::warn!("{:?} and {:?} share a key binding; keeping {:?}", previous, action, action);
            }
        }

        let mut wm = Self {
            display,
            launcher,
            settings,
            bindings,
            grid_key,
            registry: Registry::new(),
            state: DispatcherState::default(),
            ddc,
            next_ddc_poll: Instant::now(),
            running: true,
        };

        wm.claim_screens(config)?;
        wm.init_ddc()?;
        wm.adopt_existing()?;
        wm.display.flush()?;
        Ok(wm)
    }

    fn claim_screens(&mut self, config: &Config) -> Result<()> {
        let origins = config.screen_origins()?;
        let screens = self.display.screens();
        log::info!("Display {} has {} screen(s)", self.display.display_name(), screens.len());

        for screen in origins.keys() {
            if !screens.iter().any(|s| s.index == *screen) {
                log::warn!("Configured screen {} does not exist", screen);
            }
        }

        let mut next_x = 0;
        let mut detected = Vec::new();
        for screen in &screens {
            let abs_origin = if origins.is_empty() {
                let origin = Point::new(next_x, 0);
                next_x += screen.width;
                origin
            } else {
                match origins.get(&screen.index) {
                    Some(origin) => *origin,
                    None => continue,
                }
            };

            self.display
                .become_wm(screen.root)
                .with_context(|| format!("Failed to manage screen {}", screen.index))?;
            self.display.decorate_root(screen.root, self.settings.style.root_background)?;
            self.registry.add_root(
                screen.root,
                screen.index,
                abs_origin,
                Rect::new(0, 0, screen.width, screen.height),
            );
            log::info!("Managing screen {} root 0x{:x} at {:?}", screen.index, screen.root, abs_origin);

            self.grab_keys(screen.root)?;

            for output in self.display.outputs(screen)? {
                detected.push((screen.index, output));
            }
        }

        let matched = match_outputs(&config.monitors, &detected)?;
        for m in matched {
            let Some((root_id, root)) = self.registry.roots().find(|(_, r)| r.screen == m.screen) else {
                continue;
            };
            let abs_origin = root.abs_origin;
            self.registry.add_monitor(Monitor {
                name: m.name,
                config: m.config,
                rect: m.rect,
                root: root_id,
                abs_origin,
                grid: self.settings.grid,
                visible: None,
                overlay: None,
            });
        }

        Ok(())
    }

    /// Grab every bound key on a root window
    fn grab_keys(&mut self, root: Window) -> Result<()> {
        for (binding, action) in &self.bindings {
            self.display.grab_key(root, binding.keysym, binding.modifiers)?;
            log::debug!("Grabbed {:?} (keysym 0x{:x}, mods 0x{:x})", action, binding.keysym, binding.modifiers);
        }
        Ok(())
    }

    fn init_ddc(&mut self) -> Result<()> {
        let Some(ddc) = self.ddc.as_mut() else {
            return Ok(());
        };
        let expected: Vec<_> = self
            .registry
            .monitors()
            .filter_map(|(_, m)| m.config.ddc_identity())
            .collect();
        ddc.init(&expected).context("Failed to initialize monitor control")
    }

    /// Manage the windows that existed before we started
    fn adopt_existing(&mut self) -> Result<()> {
        let roots: Vec<Window> = self.registry.roots().map(|(_, r)| r.window).collect();
        for root in roots {
            for window in self.display.children(root)? {
                if let Err(e) = self.manage(window, true) {
                    log::warn!("Failed to adopt window 0x{:x}: {:#}", window, e);
                }
            }
        }
        Ok(())
    }

    /// Start managing `window`. At startup, unmapped windows are tracked
    /// but ignored.
    pub(crate) fn manage(&mut self, window: Window, at_startup: bool) -> Result<bool> {
        if self.registry.client_id(window).is_some() {
            log::error!("Window 0x{:x} is already managed", window);
            return Ok(false);
        }

        let attrs = self.display.attributes(window)?;
        if attrs.input_only || attrs.override_redirect {
            log::debug!("Ignoring non-graphics window 0x{:x}", window);
            return Ok(false);
        }

        let root = self.display.root_of(window)?;
        let ignore = at_startup && !attrs.viewable;
        if let Err(e) = self.registry.add_client(window, root, ignore) {
            log::warn!("Not managing 0x{:x}: {}", window, e);
            return Ok(false);
        }

        let drag = self.settings.drag_modifiers;
        self.display.grab_button(window, MOVE_BUTTON, 0, ButtonGrab::Replay)?;
        self.display.grab_button(window, MOVE_BUTTON, drag, ButtonGrab::Intercept)?;
        self.display.grab_button(window, RESIZE_BUTTON, drag, ButtonGrab::Intercept)?;
        self.display.select_focus_events(window)?;
        self.display.set_border_width(window, self.settings.style.border_width)?;
        self.display.set_border_color(window, self.settings.style.border_unfocused)?;

        if !ignore {
            self.display.map(window)?;
        }
        log::info!("Managing window 0x{:x}{}", window, if ignore { " (ignored)" } else { "" });
        Ok(true)
    }

    /// Main event loop
    pub fn run(&mut self) -> Result<()> {
        log::info!("Entering event loop");

        while self.running {
            let now = Instant::now();
            if now >= self.next_ddc_poll {
                self.poll_ddc(now);
            }

            let mut next = self.display.next_event(EVENT_WAIT)?;
            while let Some(event) = next {
                if let Err(e) = self.handle_event(event) {
                    log::error!("Error handling event: {:#}", e);
                }
                if !self.running {
                    break;
                }
                next = self.display.next_event(Duration::ZERO)?;
            }

            self.display.flush()?;
            self.launcher.reap();
        }

        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        log::info!("Shutting down");
        if self.state.grid_active() {
            self.close_overlays()?;
        }
        self.display.flush()
    }

    /// Refresh monitor visibility from DDC/CI and schedule the next poll.
    /// A failure makes every visibility unknown and retries sooner.
    pub(crate) fn poll_ddc(&mut self, now: Instant) {
        let interval = self.settings.poll_interval;
        let Some(ddc) = self.ddc.as_mut() else {
            self.next_ddc_poll = now + interval;
            return;
        };

        match ddc.poll() {
            Ok(()) => {
                for (_, monitor) in self.registry.monitors_mut() {
                    let visible = monitor
                        .config
                        .ddc_identity()
                        .and_then(|id| ddc.source(&id))
                        .map(|source| source == monitor.config.visible_input);
                    monitor.set_visible(visible);
                }
                self.next_ddc_poll = now + interval;
            }
            Err(e) => {
                log::warn!("DDC poll failed, visibility unknown: {}", e);
                for (_, monitor) in self.registry.monitors_mut() {
                    monitor.set_visible(None);
                }
                self.next_ddc_poll = now + interval / 10;
            }
        }
    }

    /// Give `window` input focus and raise it
    pub(crate) fn switch_focus(&mut self, window: Window) -> Result<()> {
        let current = self.display.input_focus()?;
        if current == window {
            return Ok(());
        }
        log::debug!("Switching focus from 0x{:x} to 0x{:x}", current, window);
        self.display.set_input_focus(window)?;
        self.display.raise(window)
    }

    /// The focused window, if it is a managed, non-ignored client
    pub(crate) fn focused_client(&mut self) -> Result<Option<Window>> {
        let focus = self.display.input_focus()?;
        Ok(self
            .registry
            .client_by_window(focus)
            .filter(|c| !c.ignore)
            .map(|c| c.window))
    }

    /// Root a window belongs to, if it is on a managed screen
    pub(crate) fn root_id_of(&mut self, window: Window) -> Option<RootId> {
        if let Some(client) = self.registry.client_by_window(window) {
            return Some(client.root);
        }
        if let Some(root) = self.registry.root_id(window) {
            return Some(root);
        }
        let root = self.display.root_of(window).ok()?;
        self.registry.root_id(root)
    }

    /// Window geometry in the combined coordinate space
    pub(crate) fn abs_rect(&mut self, window: Window) -> Result<Rect> {
        let rect = self.display.geometry(window)?;
        let origin = match self.root_id_of(window).and_then(|r| self.registry.root(r)) {
            Some(root) => root.abs_origin,
            None => Point::default(),
        };
        Ok(rect.translate(origin))
    }

    /// Monitor holding the center of `window`, with the window's geometry
    pub(crate) fn monitor_of(&mut self, window: Window) -> Result<Option<(MonitorId, Rect)>> {
        let rect = self.display.geometry(window)?;
        let Some(root) = self.root_id_of(window) else {
            log::error!("Window 0x{:x} is not on a managed screen", window);
            return Ok(None);
        };
        let c = rect.center();
        match self.registry.monitor_containing(root, c) {
            Some(id) => Ok(Some((id, rect))),
            None => {
                log::error!("No monitor contains ({}, {})", c.x, c.y);
                Ok(None)
            }
        }
    }

    /// Snap `window` to the grid of the monitor holding `rect`'s center
    pub(crate) fn snap_window(&mut self, window: Window, rect: Rect) -> Result<()> {
        let Some(root) = self.root_id_of(window) else {
            return Ok(());
        };
        let c = rect.center();
        let Some(monitor) = self.registry.monitor_containing(root, c).and_then(|id| self.registry.monitor(id)) else {
            log::error!("No monitor contains ({}, {})", c.x, c.y);
            return Ok(());
        };
        let border = self.settings.style.border_width as i32;
        let snapped = grid::snap(monitor.rect, monitor.grid, rect, border);
        log::debug!("Snapping 0x{:x} from {:?} to {:?}", window, rect, snapped);
        self.display.configure(window, &ConfigureChanges::rect(snapped))
    }

    /// Draw the grid on a monitor's overlay
    pub(crate) fn draw_grid(&mut self, monitor: MonitorId, active: bool) -> Result<()> {
        let Some(m) = self.registry.monitor(monitor) else {
            return Ok(());
        };
        let Some(overlay) = m.overlay else {
            return Ok(());
        };
        let style = &self.settings.style;
        let color = if active { style.grid_active } else { style.grid_inactive };
        let width = style.grid_line_width;
        let lines = grid::grid_lines(m.rect.width, m.rect.height, m.grid);

        self.display.clear(overlay)?;
        self.display.set_border_color(overlay, color)?;
        self.display.draw_lines(overlay, color, width, &lines)
    }

    /// Destroy every overlay and leave grid build mode
    pub(crate) fn close_overlays(&mut self) -> Result<()> {
        let overlays: Vec<Window> = self
            .registry
            .monitors_mut()
            .filter_map(|(_, m)| m.overlay.take())
            .collect();
        for overlay in overlays {
            self.display.destroy_window(overlay)?;
        }
        self.state.grid = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorConfig;
    use crate::ddc::DisplayId;
    use crate::display::WindowAttrs;
    use crate::testing::{Call, FakeChannel, FakeDisplay, TestWm};

    #[test]
    fn test_fit_centered() {
        let area = Rect::new(1920, 0, 1920, 1080);
        assert_eq!(fit_centered(area, Rect::new(0, 0, 390, 190), 5), Rect::new(2680, 440, 390, 190));
        // Too big: clamped to the area
        assert_eq!(fit_centered(area, Rect::new(0, 0, 3000, 190), 5), Rect::new(1920, 440, 1910, 190));
    }

    #[test]
    fn test_startup_claims_screen_and_adopts_outputs() {
        let (wm, fake) = TestWm::side_by_side();

        assert_eq!(wm.registry.roots().count(), 1);
        let names: Vec<_> = wm.registry.monitors().map(|(_, m)| m.name.clone()).collect();
        assert_eq!(names, vec!["A", "B"]);

        let calls = fake.calls();
        assert!(calls.contains(&Call::BecomeWm(FakeDisplay::ROOT)));
        assert!(calls.contains(&Call::DecorateRoot(FakeDisplay::ROOT, 0x604020)));
        // h with Mod4 for focus-left
        assert!(calls.contains(&Call::GrabKey(FakeDisplay::ROOT, 0x68, 64)));
    }

    #[test]
    fn test_startup_adopts_existing_windows() {
        let fake = FakeDisplay::side_by_side();
        let shown = fake.add_window(Rect::new(100, 100, 400, 300));
        let hidden = fake.add_window(Rect::new(100, 100, 400, 300));
        fake.set_attrs(hidden, WindowAttrs { viewable: false, ..WindowAttrs::default() });
        let popup = fake.add_window(Rect::new(10, 10, 50, 50));
        fake.set_attrs(popup, WindowAttrs { override_redirect: true, viewable: true, ..WindowAttrs::default() });

        let wm = TestWm::start(fake.clone(), &Config::default());

        assert!(!wm.registry.client_by_window(shown).unwrap().ignore);
        assert!(wm.registry.client_by_window(hidden).unwrap().ignore);
        assert!(wm.registry.client_by_window(popup).is_none());

        let calls = fake.calls();
        assert!(calls.contains(&Call::Map(shown)));
        assert!(!calls.contains(&Call::Map(hidden)));
        assert!(calls.contains(&Call::BorderWidth(shown, 5)));
        assert!(calls.contains(&Call::GrabButton(shown, 1, 0, ButtonGrab::Replay)));
        assert!(calls.contains(&Call::GrabButton(shown, 3, 64, ButtonGrab::Intercept)));
    }

    #[test]
    fn test_startup_fails_when_another_wm_runs() {
        let fake = FakeDisplay::side_by_side();
        fake.state().other_wm = true;
        let result = Wm::new(fake, crate::testing::RecordingLauncher::default(), None::<DisplayDataChannel<FakeChannel>>, &Config::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_startup_rejects_unconfigured_output() {
        let fake = FakeDisplay::side_by_side();
        let mut config = Config::default();
        config.monitors.insert("left".to_string(), MonitorConfig::adopted(0, "A"));
        let result = Wm::new(fake, crate::testing::RecordingLauncher::default(), None::<DisplayDataChannel<FakeChannel>>, &config);
        assert!(result.is_err());
    }

    #[test]
    fn test_unlisted_screens_are_left_alone() {
        let fake = FakeDisplay::side_by_side();
        let second_root = fake.add_screen(1280, 1024, &[("C", Rect::new(0, 0, 1280, 1024))]);
        let config: Config = toml::from_str("[screens]\n1 = { x = 3840, y = 0 }\n").unwrap();

        let wm = TestWm::start(fake.clone(), &config);

        let roots: Vec<_> = wm.registry.roots().map(|(_, r)| (r.window, r.abs_origin)).collect();
        assert_eq!(roots, vec![(second_root, Point::new(3840, 0))]);
        assert!(!fake.calls().contains(&Call::BecomeWm(FakeDisplay::ROOT)));
    }

    #[test]
    fn test_zero_config_screens_side_by_side() {
        let fake = FakeDisplay::side_by_side();
        let second_root = fake.add_screen(1280, 1024, &[("C", Rect::new(0, 0, 1280, 1024))]);
        let wm = TestWm::start(fake, &Config::default());

        let root = wm.registry.root_id(second_root).unwrap();
        assert_eq!(wm.registry.root(root).unwrap().abs_origin, Point::new(3840, 0));
    }

    fn ddc_config() -> Config {
        toml::from_str(
            r#"
[monitors.A]
connector = "A"
visible_input = 0x0f
model = "M"
serial = "1"

[monitors.B]
connector = "B"
visible_input = 0x0f
model = "M"
serial = "2"
"#,
        )
        .unwrap()
    }

    fn visibility(wm: &TestWm) -> Vec<Option<bool>> {
        wm.registry.monitors().map(|(_, m)| m.visible).collect()
    }

    #[test]
    fn test_poll_ddc_sets_visibility() {
        let channel = FakeChannel::new();
        channel.attach(DisplayId::new("M", "1"), 0x0f);
        channel.attach(DisplayId::new("M", "2"), 0x11);
        let mut wm = TestWm::with_ddc(FakeDisplay::side_by_side(), channel, &ddc_config());

        let now = Instant::now();
        wm.poll_ddc(now);

        assert_eq!(visibility(&wm), vec![Some(true), Some(false)]);
        assert_eq!(wm.next_ddc_poll, now + Duration::from_secs(60));
    }

    #[test]
    fn test_poll_ddc_failure_makes_everything_unknown() {
        let channel = FakeChannel::new();
        channel.attach(DisplayId::new("M", "1"), 0x0f);
        channel.attach(DisplayId::new("M", "2"), 0x0f);
        let mut wm = TestWm::with_ddc(FakeDisplay::side_by_side(), channel.clone(), &ddc_config());
        wm.poll_ddc(Instant::now());
        assert_eq!(visibility(&wm), vec![Some(true), Some(true)]);

        channel.fail_read(&DisplayId::new("M", "2"));
        let now = Instant::now();
        wm.poll_ddc(now);

        assert_eq!(visibility(&wm), vec![None, None]);
        assert_eq!(wm.next_ddc_poll, now + Duration::from_secs(6));
    }

    #[test]
    fn test_ddc_init_failure_is_fatal() {
        let channel = FakeChannel::new();
        channel.attach(DisplayId::new("M", "1"), 0x0f);
        channel.attach(DisplayId::new("M", "1"), 0x0f);
        let ddc = DisplayDataChannel::new(channel);

        let result = Wm::new(
            FakeDisplay::side_by_side(),
            crate::testing::RecordingLauncher::default(),
            Some(ddc),
            &ddc_config(),
        );
        let err = result.err().expect("startup should fail");
        assert!(format!("{:#}", err).contains("duplicate display identity"));
    }

    #[test]
    fn test_ddc_open_failure_is_fatal() {
        let channel = FakeChannel::new();
        channel.attach(DisplayId::new("M", "1"), 0x0f);
        channel.fail_open(&DisplayId::new("M", "1"));
        let ddc = DisplayDataChannel::new(channel);

        let result = Wm::new(
            FakeDisplay::side_by_side(),
            crate::testing::RecordingLauncher::default(),
            Some(ddc),
            &ddc_config(),
        );
        assert!(result.is_err());
    }
}
