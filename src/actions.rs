//! Key binding actions.

use std::time::Instant;

use anyhow::Result;

use crate::config::{WmAction, SHIFT_MASK};
use crate::ddc::ControlChannel;
use crate::display::{ConfigureChanges, DisplayServer, Window};
use crate::geometry::{nearest_in_direction, nearest_to_point, Direction, Point, Rect};
use crate::grid::{self, GridDims};
use crate::launcher::{screen_display, Launcher};
use crate::registry::MonitorId;
use crate::state::GridSession;
use crate::wm::{fit_centered, Wm};

/// The vi direction keys, grabbed on every overlay
const GRID_KEYS: [u32; 4] = [0x68, 0x6a, 0x6b, 0x6c];

impl<D: DisplayServer, C: ControlChannel, L: Launcher> Wm<D, C, L> {
    pub(crate) fn perform(&mut self, action: WmAction) -> Result<()> {
        match action {
            WmAction::Spawn(command) => self.spawn(&command),
            WmAction::Focus(dir) => self.focus_direction(dir),
            WmAction::GridMove(dir) => self.grid_step(dir, grid::step_move),
            WmAction::GridResize(dir) => self.grid_step(dir, grid::step_resize),
            WmAction::MoveToMonitor(dir) => self.move_to_monitor(dir),
            WmAction::CloseWindow => self.close_window(),
            WmAction::Maximize => self.maximize(),
            WmAction::Unmaximize => self.unmaximize(),
            WmAction::GridMode => self.toggle_grid_mode(),
            WmAction::Snap => self.snap_focused(),
            WmAction::ReclaimInputs => {
                self.reclaim_inputs();
                Ok(())
            }
            WmAction::SwitchInput { monitor, input } => {
                self.switch_input(&monitor, input);
                Ok(())
            }
            WmAction::Quit => {
                log::info!("Quit requested");
                self.running = false;
                Ok(())
            }
        }
    }

    /// Absolute rects of the navigable clients, minus `exclude`
    fn client_rects(&mut self, exclude: Window) -> Vec<(Rect, Window)> {
        let windows: Vec<Window> = self
            .registry
            .managed_clients()
            .map(|c| c.window)
            .filter(|w| *w != exclude)
            .collect();

        let mut rects = Vec::with_capacity(windows.len());
        for window in windows {
            match self.abs_rect(window) {
                Ok(rect) => rects.push((rect, window)),
                Err(e) => log::debug!("Skipping 0x{:x}: {:#}", window, e),
            }
        }
        rects
    }

    fn spawn(&mut self, command: &str) -> Result<()> {
        let screen = self.focused_screen();
        let display = screen_display(self.display.display_name(), screen);
        self.launcher.launch(command, &display)
    }

    /// Screen of the focused window, or the first managed screen
    fn focused_screen(&mut self) -> usize {
        let root = match self.display.input_focus() {
            Ok(focus) => self.root_id_of(focus),
            Err(_) => None,
        };
        if let Some(root) = root.and_then(|r| self.registry.root(r)) {
            return root.screen;
        }
        self.registry.roots().next().map_or(0, |(_, r)| r.screen)
    }

    fn focus_direction(&mut self, dir: Direction) -> Result<()> {
        let current = self.display.input_focus()?;
        let origin = match self.abs_rect(current) {
            Ok(rect) => rect.center(),
            // Focus is None or PointerRoot
            Err(_) => self
                .registry
                .roots()
                .next()
                .map_or(Point::default(), |(_, r)| r.rect.translate(r.abs_origin).center()),
        };

        let candidates: Vec<(Point, Window)> = self
            .client_rects(current)
            .into_iter()
            .map(|(rect, window)| (rect.center(), window))
            .collect();

        match nearest_in_direction(dir, origin, &candidates) {
            Some(target) => self.switch_focus(target),
            None => {
                log::debug!("Nothing {:?} of 0x{:x}", dir, current);
                Ok(())
            }
        }
    }

    fn close_window(&mut self) -> Result<()> {
        let Some(window) = self.focused_client()? else {
            log::debug!("Close: no client focused");
            return Ok(());
        };
        let center = self.abs_rect(window)?.center();

        log::info!("Closing window 0x{:x}", window);
        self.display.send_delete(window)?;

        let candidates = self.client_rects(window);
        if let Some(next) = nearest_to_point(center, &candidates) {
            self.switch_focus(next)?;
        }
        Ok(())
    }

    fn maximize(&mut self) -> Result<()> {
        let Some(window) = self.focused_client()? else {
            return Ok(());
        };
        let Some((monitor, rect)) = self.monitor_of(window)? else {
            return Ok(());
        };
        let Some(m) = self.registry.monitor(monitor) else {
            return Ok(());
        };

        let border = self.settings.style.border_width as i32;
        let target = Rect::new(
            m.rect.x,
            m.rect.y,
            m.rect.width - 2 * border,
            m.rect.height - 2 * border,
        );
        if rect.width == target.width && rect.height == target.height {
            return Ok(());
        }

        if let Some(client) = self.registry.client_id(window).and_then(|id| self.registry.client_mut(id)) {
            if !rect.is_degenerate() {
                client.pre_maximize = Some(rect);
            }
        }
        log::info!("Maximizing 0x{:x}", window);
        self.display.configure(window, &ConfigureChanges::rect(target))
    }

    fn unmaximize(&mut self) -> Result<()> {
        let Some(window) = self.focused_client()? else {
            return Ok(());
        };
        let restore = self
            .registry
            .client_id(window)
            .and_then(|id| self.registry.client_mut(id))
            .and_then(|c| c.pre_maximize.take());

        match restore {
            Some(rect) => {
                log::info!("Restoring 0x{:x} to {:?}", window, rect);
                self.display.configure(window, &ConfigureChanges::rect(rect))
            }
            None => Ok(()),
        }
    }

    fn snap_focused(&mut self) -> Result<()> {
        let Some(window) = self.focused_client()? else {
            return Ok(());
        };
        let rect = self.display.geometry(window)?;
        self.snap_window(window, rect)
    }

    /// Move or resize the focused window by one grid cell, then snap it
    fn grid_step(&mut self, dir: Direction, step: fn(Rect, GridDims, Rect, Direction) -> Rect) -> Result<()> {
        let Some(window) = self.focused_client()? else {
            return Ok(());
        };
        let Some((monitor, rect)) = self.monitor_of(window)? else {
            return Ok(());
        };
        let Some(m) = self.registry.monitor(monitor) else {
            return Ok(());
        };
        let stepped = step(m.rect, m.grid, rect, dir);
        self.snap_window(window, stepped)
    }

    fn move_to_monitor(&mut self, dir: Direction) -> Result<()> {
        let Some(window) = self.focused_client()? else {
            return Ok(());
        };
        let Some((current, rect)) = self.monitor_of(window)? else {
            return Ok(());
        };
        let Some(cur) = self.registry.monitor(current) else {
            return Ok(());
        };
        let (root, origin) = (cur.root, cur.rect.center());

        let candidates: Vec<(Point, MonitorId)> = self
            .registry
            .monitors()
            .filter(|(id, m)| *id != current && m.root == root)
            .map(|(id, m)| (m.rect.center(), id))
            .collect();
        let Some(target) = nearest_in_direction(dir, origin, &candidates).and_then(|id| self.registry.monitor(id)) else {
            log::debug!("No monitor {:?} of the current one", dir);
            return Ok(());
        };

        let border = self.settings.style.border_width as i32;
        let placed = fit_centered(target.rect, rect, border);
        log::info!("Moving 0x{:x} to monitor {}", window, target.name);
        self.display.configure(window, &ConfigureChanges::rect(placed))
    }

    /// Enter or leave grid build mode
    pub(crate) fn toggle_grid_mode(&mut self) -> Result<()> {
        if let Some(session) = self.state.grid {
            log::info!("Leaving grid mode");
            self.close_overlays()?;
            if let Some(window) = session.restore_focus.filter(|w| self.registry.client_id(*w).is_some()) {
                self.switch_focus(window)?;
            }
            return Ok(());
        }

        log::info!("Entering grid mode");
        let style = self.settings.style.clone();
        let thick = style.grid_line_width;
        let mut exit_keys = GRID_KEYS.to_vec();
        if let Some(key) = self.grid_key {
            exit_keys.push(key.keysym);
        }

        let monitors: Vec<(MonitorId, Window, Rect)> = self
            .registry
            .monitors()
            .filter_map(|(id, m)| self.registry.root(m.root).map(|r| (id, r.window, m.rect)))
            .collect();

        for (id, root, rect) in monitors {
            let t = thick as i32;
            let area = Rect::new(rect.x, rect.y, rect.width - 2 * t, rect.height - 2 * t);
            let overlay = self
                .display
                .create_overlay(root, area, thick, style.grid_active, style.grid_background)?;
            for &keysym in &exit_keys {
                self.display.grab_key(overlay, keysym, 0)?;
                self.display.grab_key(overlay, keysym, SHIFT_MASK)?;
            }
            self.display.map(overlay)?;
            if let Some(m) = self.registry.monitor_mut(id) {
                m.overlay = Some(overlay);
            }
        }

        let restore = self.state.last_focus;
        let mut focused = None;
        if let Some(window) = restore {
            focused = self.monitor_of(window).ok().flatten().map(|(id, _)| id);
        }
        let focused = focused.or_else(|| self.registry.monitors().next().map(|(id, _)| id));

        self.state.grid = Some(GridSession {
            focused,
            restore_focus: restore,
        });

        if let Some(overlay) = focused.and_then(|id| self.registry.monitor(id)).and_then(|m| m.overlay) {
            self.switch_focus(overlay)?;
        }
        Ok(())
    }

    /// Switch every monitor that isn't showing us back to our input
    fn reclaim_inputs(&mut self) {
        let Some(ddc) = self.ddc.as_mut() else {
            log::warn!("DDC/CI is disabled, cannot reclaim inputs");
            return;
        };

        for (_, monitor) in self.registry.monitors() {
            if monitor.visible == Some(true) {
                continue;
            }
            let Some(id) = monitor.config.ddc_identity() else {
                continue;
            };
            log::info!("Reclaiming monitor {} (input 0x{:02x})", monitor.name, monitor.config.visible_input);
            if let Err(e) = ddc.set_source(&id, monitor.config.visible_input) {
                log::error!("Failed to reclaim monitor {}: {}", monitor.name, e);
            }
        }

        self.poll_ddc(Instant::now());
    }

    fn switch_input(&mut self, name: &str, input: u8) {
        let Some(ddc) = self.ddc.as_mut() else {
            log::warn!("DDC/CI is disabled, cannot switch inputs");
            return;
        };
        let Some(monitor) = self.registry.monitor_by_name(name).and_then(|id| self.registry.monitor(id)) else {
            log::error!("No monitor named {}", name);
            return;
        };
        let Some(id) = monitor.config.ddc_identity() else {
            log::error!("Monitor {} has no DDC/CI identity", name);
            return;
        };

        log::info!("Switching monitor {} to input 0x{:02x}", name, input);
        if let Err(e) = ddc.set_source(&id, input) {
            log::error!("Failed to switch monitor {}: {}", name, e);
        }
        self.poll_ddc(Instant::now());
    }
}
