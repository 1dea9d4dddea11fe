//! Event handling.
//!
//! Dispatch for every [`WmEvent`] the display reports, plus the grid build
//! mode key handling that takes over the keyboard while overlays are up.

use anyhow::Result;

use crate::config::{clean_modifiers, SHIFT_MASK};
use crate::ddc::ControlChannel;
use crate::display::{ButtonGrab, ConfigureChanges, DisplayServer, Window, WmEvent};
use crate::geometry::{nearest_in_direction, nearest_to_point, Direction, Point};
use crate::launcher::Launcher;
use crate::state::{DragState, MOVE_BUTTON};
use crate::wm::{fit_centered, Wm};

impl<D: DisplayServer, C: ControlChannel, L: Launcher> Wm<D, C, L> {
    pub fn handle_event(&mut self, event: WmEvent) -> Result<()> {
        match event {
            WmEvent::MapRequest { window } => self.handle_map_request(window),
            WmEvent::UnmapNotify { window } => {
                self.handle_unmap_notify(window);
                Ok(())
            }
            WmEvent::ConfigureRequest { window, changes } => self.handle_configure_request(window, changes),
            WmEvent::Motion { window, root_pos } => self.handle_motion(window, root_pos),
            WmEvent::KeyPress { window, keysym, state } => self.handle_key_press(window, keysym, state),
            WmEvent::ButtonPress {
                window,
                subwindow,
                button,
                root_pos,
                state,
            } => self.handle_button_press(window, subwindow, button, root_pos, state),
            WmEvent::ButtonRelease { window, button } => {
                if self.state.drag.take().is_some() {
                    log::debug!("Drag ended on 0x{:x} (button {})", window, button);
                }
                Ok(())
            }
            WmEvent::Focus { window, focused, grab } => self.handle_focus(window, focused, grab),
            WmEvent::Expose { window, count } => self.handle_expose(window, count),
            WmEvent::ClientMessage { window, message_type } => {
                log::info!("ClientMessage {} for 0x{:x}", message_type, window);
                Ok(())
            }
        }
    }

    fn handle_map_request(&mut self, window: Window) -> Result<()> {
        log::debug!("MapRequest for 0x{:x}", window);

        // Found unmapped at startup and now asking to be shown
        if let Some(id) = self.registry.client_id(window) {
            if let Some(client) = self.registry.client_mut(id).filter(|c| c.ignore) {
                client.ignore = false;
                log::info!("Window 0x{:x} no longer ignored", window);
                self.display.map(window)?;
                return self.place_on_monitor(window);
            }
        }

        if self.manage(window, false)? {
            self.place_on_monitor(window)?;
        }
        Ok(())
    }

    /// Move a window that opened outside every monitor onto the nearest one
    fn place_on_monitor(&mut self, window: Window) -> Result<()> {
        let rect = self.display.geometry(window)?;
        let Some(root) = self.root_id_of(window) else {
            return Ok(());
        };
        let center = rect.center();
        if self.registry.monitor_containing(root, center).is_some() {
            return Ok(());
        }

        let candidates: Vec<_> = self
            .registry
            .monitors()
            .filter(|(_, m)| m.root == root)
            .map(|(id, m)| (m.rect, id))
            .collect();
        let Some(target) = nearest_to_point(center, &candidates).and_then(|id| self.registry.monitor(id)) else {
            log::error!("No monitor to place 0x{:x} on", window);
            return Ok(());
        };

        let border = self.settings.style.border_width as i32;
        let placed = fit_centered(target.rect, rect, border);
        log::info!("Window 0x{:x} opened off-screen, moving to monitor {}", window, target.name);
        self.display.configure(window, &ConfigureChanges::rect(placed))
    }

    fn handle_unmap_notify(&mut self, window: Window) {
        if self.registry.remove_client(window).is_some() {
            log::info!("Unmanaged window 0x{:x}", window);
        }
        self.state.cancel_drag_on(window);
        if self.state.last_focus == Some(window) {
            self.state.last_focus = None;
        }
    }

    fn handle_configure_request(&mut self, window: Window, changes: ConfigureChanges) -> Result<()> {
        if self.registry.client_id(window).is_none() {
            log::debug!("ConfigureRequest for untracked window 0x{:x}", window);
        }
        self.display.configure(window, &changes)
    }

    fn handle_motion(&mut self, window: Window, root_pos: Point) -> Result<()> {
        let Some(drag) = self.state.drag else {
            return Ok(());
        };
        if drag.window != window {
            log::debug!("Motion on 0x{:x} while dragging 0x{:x}", window, drag.window);
        }
        let Some(rect) = drag.apply(root_pos, self.settings.min_size) else {
            return Ok(());
        };

        let changes = if drag.button == MOVE_BUTTON {
            ConfigureChanges::position(rect.origin())
        } else {
            ConfigureChanges::rect(rect)
        };
        self.display.configure(drag.window, &changes)
    }

    fn handle_button_press(
        &mut self,
        window: Window,
        subwindow: Option<Window>,
        button: u8,
        root_pos: Point,
        state: u16,
    ) -> Result<()> {
        let mods = clean_modifiers(state);

        if mods == 0 {
            // The pointer stays frozen until replayed, whatever focus does
            self.state.drag = None;
            let focused = self.switch_focus(subwindow.unwrap_or(window));
            self.display.replay_pointer()?;
            return focused;
        }

        if self.state.grid_active() {
            return Ok(());
        }

        let drag_mods = self.settings.drag_modifiers;
        if mods & drag_mods == drag_mods {
            self.switch_focus(window)?;
            let rect = self.display.geometry(window)?;
            let drag = DragState::start(window, root_pos, rect, button, self.settings.edge_threshold);
            log::debug!(
                "Drag start on 0x{:x}: button {} edges {:?}/{:?}",
                window,
                button,
                drag.horizontal,
                drag.vertical
            );
            self.state.drag = Some(drag);
        }
        Ok(())
    }

    fn handle_key_press(&mut self, window: Window, keysym: u32, state: u16) -> Result<()> {
        if self.state.grid_active() {
            return self.handle_grid_key(window, keysym, state);
        }

        let binding = crate::config::ParsedBinding {
            keysym,
            modifiers: clean_modifiers(state),
        };
        match self.bindings.get(&binding).cloned() {
            Some(action) => {
                log::debug!("Key 0x{:x} (mods 0x{:x}) -> {:?}", keysym, binding.modifiers, action);
                self.perform(action)
            }
            None => {
                log::debug!("Unbound key 0x{:x} (mods 0x{:x})", keysym, binding.modifiers);
                Ok(())
            }
        }
    }

    /// Keys while overlays are up: h/j/k/l resize the grid, Shift+h/j/k/l
    /// move between monitors, the grid key leaves.
    fn handle_grid_key(&mut self, window: Window, keysym: u32, state: u16) -> Result<()> {
        if self.grid_key.is_some_and(|k| k.keysym == keysym) {
            return self.toggle_grid_mode();
        }

        let Some(monitor) = self.registry.monitor_by_overlay(window) else {
            log::error!("Grid key on 0x{:x}, which is not an overlay", window);
            return Ok(());
        };
        let Some(dir) = Direction::from_vi_keysym(keysym) else {
            log::debug!("Ignoring key 0x{:x} in grid mode", keysym);
            return Ok(());
        };

        if clean_modifiers(state) & SHIFT_MASK != 0 {
            let Some(origin) = self.registry.monitor(monitor).map(|m| m.abs_rect().center()) else {
                return Ok(());
            };
            let candidates: Vec<_> = self
                .registry
                .monitors()
                .filter(|(id, _)| *id != monitor)
                .map(|(id, m)| (m.abs_rect().center(), id))
                .collect();
            let Some(next) = nearest_in_direction(dir, origin, &candidates) else {
                log::debug!("No monitor {:?} of the current one", dir);
                return Ok(());
            };
            let Some(overlay) = self.registry.monitor(next).and_then(|m| m.overlay) else {
                return Ok(());
            };
            if let Some(session) = self.state.grid.as_mut() {
                session.focused = Some(next);
            }
            self.switch_focus(overlay)
        } else {
            if let Some(m) = self.registry.monitor_mut(monitor) {
                m.grid.adjust(dir);
                log::info!("Monitor {} grid is now {}x{}", m.name, m.grid.x(), m.grid.y());
            }
            self.draw_grid(monitor, true)
        }
    }

    fn handle_focus(&mut self, window: Window, focused: bool, grab: bool) -> Result<()> {
        if grab {
            return Ok(());
        }

        if let Some(monitor) = self.registry.monitor_by_overlay(window) {
            return self.draw_grid(monitor, focused);
        }
        if self.registry.client_id(window).is_none() {
            return Ok(());
        }

        let style = &self.settings.style;
        if focused {
            let color = style.border_focused;
            self.display.ungrab_button(window, MOVE_BUTTON, 0)?;
            self.display.set_border_color(window, color)?;
            self.state.last_focus = Some(window);
        } else {
            let color = style.border_unfocused;
            self.display.grab_button(window, MOVE_BUTTON, 0, ButtonGrab::Replay)?;
            self.display.set_border_color(window, color)?;
        }
        Ok(())
    }

    fn handle_expose(&mut self, window: Window, count: u16) -> Result<()> {
        if count != 0 {
            return Ok(());
        }
        let Some(monitor) = self.registry.monitor_by_overlay(window) else {
            return Ok(());
        };
        let active = self.state.grid.is_some_and(|g| g.focused == Some(monitor));
        self.draw_grid(monitor, active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, MOD4_MASK};
    use crate::display::WindowAttrs;
    use crate::geometry::Rect;
    use crate::state::RESIZE_BUTTON;
    use crate::testing::{Call, FakeDisplay, TestWm};

    fn press(window: Window, button: u8, at: Point, state: u16) -> WmEvent {
        WmEvent::ButtonPress {
            window,
            subwindow: None,
            button,
            root_pos: at,
            state,
        }
    }

    #[test]
    fn test_map_request_manages_and_maps() {
        let (mut wm, fake) = TestWm::side_by_side();
        let w = wm.open_window(Rect::new(100, 100, 400, 300));

        assert_eq!(wm.registry.client_count(), 1);
        let calls = fake.calls();
        assert!(calls.contains(&Call::Map(w)));
        assert!(calls.contains(&Call::SelectFocus(w)));
        assert!(calls.contains(&Call::BorderColor(w, 0x0c0c0c)));
    }

    #[test]
    fn test_duplicate_map_request_rejected() {
        let (mut wm, _fake) = TestWm::side_by_side();
        let w = wm.open_window(Rect::new(100, 100, 400, 300));
        wm.handle_event(WmEvent::MapRequest { window: w }).unwrap();
        assert_eq!(wm.registry.client_count(), 1);
    }

    #[test]
    fn test_map_request_for_ignored_window_maps_it() {
        let fake = FakeDisplay::side_by_side();
        let w = fake.add_window(Rect::new(100, 100, 400, 300));
        fake.set_attrs(w, WindowAttrs::default());
        let mut wm = TestWm::start(fake.clone(), &Config::default());
        assert!(wm.registry.client_by_window(w).unwrap().ignore);

        wm.handle_event(WmEvent::MapRequest { window: w }).unwrap();

        assert!(!wm.registry.client_by_window(w).unwrap().ignore);
        assert!(fake.calls().contains(&Call::Map(w)));
        assert_eq!(wm.registry.client_count(), 1);
    }

    #[test]
    fn test_map_request_ignores_override_redirect() {
        let (mut wm, fake) = TestWm::side_by_side();
        let w = fake.add_window(Rect::new(0, 0, 10, 10));
        fake.set_attrs(w, WindowAttrs { override_redirect: true, viewable: true, ..WindowAttrs::default() });
        wm.handle_event(WmEvent::MapRequest { window: w }).unwrap();
        assert_eq!(wm.registry.client_count(), 0);
    }

    #[test]
    fn test_offscreen_window_is_moved_to_nearest_monitor() {
        let (mut wm, fake) = TestWm::side_by_side();
        // Center (4090, 150): past the right edge of B
        let w = wm.open_window(Rect::new(3900, 0, 380, 300));
        // Centered on B, border 5 on each side
        assert_eq!(fake.rect(w), Rect::new(2685, 385, 380, 300));
    }

    #[test]
    fn test_onscreen_window_stays_put() {
        let (mut wm, fake) = TestWm::side_by_side();
        let w = wm.open_window(Rect::new(100, 100, 400, 300));
        assert_eq!(fake.rect(w), Rect::new(100, 100, 400, 300));
    }

    #[test]
    fn test_unmap_removes_client_and_cancels_drag() {
        let (mut wm, _fake) = TestWm::side_by_side();
        let w = wm.open_window(Rect::new(100, 100, 400, 300));
        wm.handle_event(press(w, MOVE_BUTTON, Point::new(300, 250), MOD4_MASK)).unwrap();
        assert!(wm.state.drag.is_some());

        wm.handle_event(WmEvent::UnmapNotify { window: w }).unwrap();

        assert_eq!(wm.registry.client_count(), 0);
        assert!(wm.state.drag.is_none());
    }

    #[test]
    fn test_configure_request_forwards_only_requested_fields() {
        let (mut wm, fake) = TestWm::side_by_side();
        let w = wm.open_window(Rect::new(100, 100, 400, 300));
        let changes = ConfigureChanges {
            width: Some(640),
            ..ConfigureChanges::default()
        };

        wm.handle_event(WmEvent::ConfigureRequest { window: w, changes }).unwrap();

        assert!(fake.calls().contains(&Call::Configure(w, changes)));
        assert_eq!(fake.rect(w), Rect::new(100, 100, 640, 300));
    }

    #[test]
    fn test_configure_request_for_untracked_window_passes_through() {
        let (mut wm, fake) = TestWm::side_by_side();
        let w = fake.add_window(Rect::new(0, 0, 100, 100));
        let changes = ConfigureChanges::position(Point::new(10, 20));
        wm.handle_event(WmEvent::ConfigureRequest { window: w, changes }).unwrap();
        assert_eq!(fake.rect(w), Rect::new(10, 20, 100, 100));
    }

    #[test]
    fn test_plain_click_focuses_and_replays() {
        let (mut wm, fake) = TestWm::side_by_side();
        let w = wm.open_window(Rect::new(100, 100, 400, 300));

        // NumLock on: still a plain click
        wm.handle_event(press(w, MOVE_BUTTON, Point::new(150, 150), 16)).unwrap();

        assert_eq!(fake.focus(), w);
        assert!(fake.calls().contains(&Call::Raise(w)));
        assert_eq!(fake.calls().last(), Some(&Call::ReplayPointer));
        assert!(wm.state.drag.is_none());
    }

    #[test]
    fn test_plain_click_replays_even_if_focus_fails() {
        let (mut wm, fake) = TestWm::side_by_side();
        let w = wm.open_window(Rect::new(100, 100, 400, 300));
        fake.state().fail_focus = true;
        fake.clear_calls();

        let result = wm.handle_event(press(w, MOVE_BUTTON, Point::new(150, 150), 0));

        assert!(result.is_err());
        assert_eq!(fake.calls(), vec![Call::ReplayPointer]);
    }

    #[test]
    fn test_click_on_root_focuses_subwindow() {
        let (mut wm, fake) = TestWm::side_by_side();
        let w = wm.open_window(Rect::new(100, 100, 400, 300));
        wm.handle_event(WmEvent::ButtonPress {
            window: FakeDisplay::ROOT,
            subwindow: Some(w),
            button: MOVE_BUTTON,
            root_pos: Point::new(150, 150),
            state: 0,
        })
        .unwrap();
        assert_eq!(fake.focus(), w);
    }

    #[test]
    fn test_drag_move() {
        let (mut wm, fake) = TestWm::side_by_side();
        let w = wm.open_window(Rect::new(100, 100, 400, 300));

        wm.handle_event(press(w, MOVE_BUTTON, Point::new(300, 250), MOD4_MASK)).unwrap();
        assert_eq!(fake.focus(), w);
        wm.handle_event(WmEvent::Motion { window: w, root_pos: Point::new(350, 200) }).unwrap();

        assert_eq!(fake.rect(w), Rect::new(150, 50, 400, 300));

        wm.handle_event(WmEvent::ButtonRelease { window: w, button: MOVE_BUTTON }).unwrap();
        assert!(wm.state.drag.is_none());
        wm.handle_event(WmEvent::Motion { window: w, root_pos: Point::new(0, 0) }).unwrap();
        assert_eq!(fake.rect(w), Rect::new(150, 50, 400, 300));
    }

    #[test]
    fn test_drag_resize_respects_minimum() {
        let (mut wm, fake) = TestWm::side_by_side();
        let w = wm.open_window(Rect::new(100, 100, 400, 300));

        // Bottom-right corner
        wm.handle_event(press(w, RESIZE_BUTTON, Point::new(495, 395), MOD4_MASK)).unwrap();
        wm.handle_event(WmEvent::Motion { window: w, root_pos: Point::new(0, 0) }).unwrap();

        assert_eq!(fake.rect(w), Rect::new(100, 100, 25, 25));
    }

    #[test]
    fn test_no_drag_in_grid_mode() {
        let (mut wm, _fake) = TestWm::side_by_side();
        let w = wm.open_window(Rect::new(100, 100, 400, 300));
        wm.toggle_grid_mode().unwrap();

        wm.handle_event(press(w, MOVE_BUTTON, Point::new(300, 250), MOD4_MASK)).unwrap();
        assert!(wm.state.drag.is_none());
    }

    #[test]
    fn test_focus_in_and_out_toggle_border_and_grab() {
        let (mut wm, fake) = TestWm::side_by_side();
        let w = wm.open_window(Rect::new(100, 100, 400, 300));
        fake.clear_calls();

        wm.focus_window(w);
        assert_eq!(fake.calls(), vec![Call::UngrabButton(w, 1, 0), Call::BorderColor(w, 0x005f87)]);
        assert_eq!(wm.state.last_focus, Some(w));

        fake.clear_calls();
        wm.handle_event(WmEvent::Focus { window: w, focused: false, grab: false }).unwrap();
        assert_eq!(
            fake.calls(),
            vec![Call::GrabButton(w, 1, 0, ButtonGrab::Replay), Call::BorderColor(w, 0x0c0c0c)]
        );
    }

    #[test]
    fn test_grab_focus_events_ignored() {
        let (mut wm, fake) = TestWm::side_by_side();
        let w = wm.open_window(Rect::new(100, 100, 400, 300));
        fake.clear_calls();
        wm.handle_event(WmEvent::Focus { window: w, focused: true, grab: true }).unwrap();
        assert!(fake.calls().is_empty());
        assert_eq!(wm.state.last_focus, None);
    }

    #[test]
    fn test_unbound_key_is_ignored() {
        let (mut wm, fake) = TestWm::side_by_side();
        fake.clear_calls();
        wm.press(0x7a, 0);
        assert!(fake.calls().is_empty());
    }
}
