//! Entity registry: roots, monitors and clients.
//!
//! All three live in slotmap arenas and refer to each other by id. The
//! registry holds no server state beyond what the window manager decided;
//! geometry is always queried from the display.

use std::collections::HashMap;

use slotmap::{new_key_type, SlotMap};

use crate::config::MonitorConfig;
use crate::display::Window;
use crate::error::RegistryError;
use crate::geometry::{Point, Rect};
use crate::grid::GridDims;

new_key_type! {
    /// Unique identifier for a managed window
    pub struct ClientId;
    /// Unique identifier for a monitor
    pub struct MonitorId;
    /// Unique identifier for a managed screen
    pub struct RootId;
}

/// A managed X screen
#[derive(Debug, Clone)]
pub struct Root {
    pub window: Window,
    pub screen: usize,
    /// Position of this screen in the combined coordinate space
    pub abs_origin: Point,
    /// Screen size, at the origin
    pub rect: Rect,
}

/// A managed top-level window
#[derive(Debug, Clone)]
pub struct Client {
    pub window: Window,
    pub root: RootId,
    /// Found unmapped at startup; never focused, navigated to or mapped
    pub ignore: bool,
    /// Geometry before the last maximize, consumed by unmaximize
    pub pre_maximize: Option<Rect>,
    pub abs_origin: Point,
}

/// A physical monitor
#[derive(Debug, Clone)]
pub struct Monitor {
    pub name: String,
    pub config: MonitorConfig,
    /// Position and size on the root window
    pub rect: Rect,
    pub root: RootId,
    pub abs_origin: Point,
    pub grid: GridDims,
    /// Whether it is showing this computer, per DDC/CI; `None` if unknown
    pub visible: Option<bool>,
    /// Grid overlay window while grid build mode is active
    pub overlay: Option<Window>,
}

impl Monitor {
    /// Rect in the combined coordinate space
    pub fn abs_rect(&self) -> Rect {
        self.rect.translate(self.abs_origin)
    }

    pub fn set_visible(&mut self, visible: Option<bool>) {
        if self.visible != visible {
            log::info!("Monitor {} visibility {:?} -> {:?}", self.name, self.visible, visible);
        }
        self.visible = visible;
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    roots: SlotMap<RootId, Root>,
    monitors: SlotMap<MonitorId, Monitor>,
    clients: SlotMap<ClientId, Client>,
    root_by_window: HashMap<Window, RootId>,
    client_by_window: HashMap<Window, ClientId>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_root(&mut self, window: Window, screen: usize, abs_origin: Point, rect: Rect) -> RootId {
        let id = self.roots.insert(Root {
            window,
            screen,
            abs_origin,
            rect,
        });
        self.root_by_window.insert(window, id);
        id
    }

    pub fn root(&self, id: RootId) -> Option<&Root> {
        self.roots.get(id)
    }

    pub fn root_id(&self, window: Window) -> Option<RootId> {
        self.root_by_window.get(&window).copied()
    }

    pub fn roots(&self) -> impl Iterator<Item = (RootId, &Root)> {
        self.roots.iter()
    }

    /// Register a monitor on an existing root
    pub fn add_monitor(&mut self, monitor: Monitor) -> Option<MonitorId> {
        if !self.roots.contains_key(monitor.root) {
            log::error!("Monitor {} refers to an unknown root", monitor.name);
            return None;
        }
        Some(self.monitors.insert(monitor))
    }

    pub fn monitor(&self, id: MonitorId) -> Option<&Monitor> {
        self.monitors.get(id)
    }

    pub fn monitor_mut(&mut self, id: MonitorId) -> Option<&mut Monitor> {
        self.monitors.get_mut(id)
    }

    /// All monitors, in registration order
    pub fn monitors(&self) -> impl Iterator<Item = (MonitorId, &Monitor)> {
        self.monitors.iter()
    }

    pub fn monitors_mut(&mut self) -> impl Iterator<Item = (MonitorId, &mut Monitor)> {
        self.monitors.iter_mut()
    }

    pub fn monitor_by_name(&self, name: &str) -> Option<MonitorId> {
        self.monitors.iter().find(|(_, m)| m.name == name).map(|(id, _)| id)
    }

    pub fn monitor_by_overlay(&self, window: Window) -> Option<MonitorId> {
        self.monitors
            .iter()
            .find(|(_, m)| m.overlay == Some(window))
            .map(|(id, _)| id)
    }

    /// First monitor of `root` containing `p` (root coordinates). Points on
    /// a shared edge go to whichever monitor was registered first.
    pub fn monitor_containing(&self, root: RootId, p: Point) -> Option<MonitorId> {
        self.monitors
            .iter()
            .find(|(_, m)| m.root == root && m.rect.contains(p))
            .map(|(id, _)| id)
    }

    /// Start tracking `window` under the root window `root`
    pub fn add_client(&mut self, window: Window, root: Window, ignore: bool) -> Result<ClientId, RegistryError> {
        if self.client_by_window.contains_key(&window) {
            return Err(RegistryError::DuplicateClient(window));
        }
        let root_id = self.root_id(root).ok_or(RegistryError::UnknownRoot(root))?;
        let abs_origin = self.roots[root_id].abs_origin;

        let id = self.clients.insert(Client {
            window,
            root: root_id,
            ignore,
            pre_maximize: None,
            abs_origin,
        });
        self.client_by_window.insert(window, id);
        Ok(id)
    }

    pub fn remove_client(&mut self, window: Window) -> Option<Client> {
        let id = self.client_by_window.remove(&window)?;
        self.clients.remove(id)
    }

    pub fn client_id(&self, window: Window) -> Option<ClientId> {
        self.client_by_window.get(&window).copied()
    }

    pub fn client(&self, id: ClientId) -> Option<&Client> {
        self.clients.get(id)
    }

    pub fn client_mut(&mut self, id: ClientId) -> Option<&mut Client> {
        self.clients.get_mut(id)
    }

    pub fn client_by_window(&self, window: Window) -> Option<&Client> {
        self.client_id(window).and_then(|id| self.clients.get(id))
    }

    /// Clients that take part in focus and navigation
    pub fn managed_clients(&self) -> impl Iterator<Item = &Client> {
        self.clients.values().filter(|c| !c.ignore)
    }

    #[cfg(test)]
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}
