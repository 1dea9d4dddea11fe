//! Configuration file support for mwm.
//!
//! Loads settings from ~/.config/mwm/config.toml if it exists, otherwise
//! uses defaults that manage every screen and adopt every detected output.
//!
//! Also provides `Style`, the runtime struct with resolved colour values.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::ddc::DisplayId;
use crate::error::ConfigError;
use crate::geometry::{Direction, Point};

// X11 modifier masks
pub const SHIFT_MASK: u16 = 1;
pub const LOCK_MASK: u16 = 2;
pub const CONTROL_MASK: u16 = 4;
pub const MOD1_MASK: u16 = 8; // Alt
pub const MOD2_MASK: u16 = 16; // NumLock
pub const MOD4_MASK: u16 = 64; // Super/Win
pub const MOD5_MASK: u16 = 128;

/// Strip the lock modifiers (CapsLock, NumLock) and button bits from an
/// event state so it can be compared with a binding.
pub fn clean_modifiers(state: u16) -> u16 {
    state & !(LOCK_MASK | MOD2_MASK) & 0xff
}

// =============================================================================
// Runtime Configuration (resolved values)
// =============================================================================

/// Resolved colours and sizes used while drawing borders and overlays
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Style {
    pub border_width: u32,
    pub border_focused: u32,
    pub border_unfocused: u32,
    pub root_background: u32,
    pub grid_line_width: u32,
    pub grid_active: u32,
    pub grid_inactive: u32,
    pub grid_background: u32,
}

impl Default for Style {
    fn default() -> Self {
        Self {
            border_width: 5,
            border_focused: 0x005f87,
            border_unfocused: 0x0c0c0c,
            root_background: 0x604020,
            grid_line_width: 1,
            grid_active: 0x005f87,
            grid_inactive: 0x880000,
            grid_background: 0x181818,
        }
    }
}

// =============================================================================
// File-based Configuration (TOML parsing)
// =============================================================================

/// Top-level configuration
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// X display to connect to; `$DISPLAY` when unset
    pub display: Option<String>,
    /// Screens to manage, keyed by screen number, with their absolute origin
    pub screens: BTreeMap<String, ScreenConfig>,
    /// Declared monitors, keyed by name
    pub monitors: BTreeMap<String, MonitorConfig>,
    pub appearance: AppearanceConfig,
    pub grid: GridConfig,
    pub drag: DragConfig,
    pub ddc: DdcConfig,
    pub keybindings: KeybindingConfig,
    pub exec: ExecConfig,
    pub inputs: InputsConfig,
}

/// Absolute origin of a screen in the combined coordinate space
#[derive(Debug, Default, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct ScreenConfig {
    pub x: i32,
    pub y: i32,
}

/// A physical monitor the window manager expects to find
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    /// X screen the monitor is attached to
    #[serde(default)]
    pub screen: usize,
    /// RandR output name (e.g. "DP-1")
    pub connector: String,
    /// Input-source value (VCP 0x60) meaning "showing this computer"
    #[serde(default = "default_visible_input")]
    pub visible_input: u8,
    /// EDID model name, for DDC/CI
    pub model: Option<String>,
    /// EDID serial, for DDC/CI
    pub serial: Option<String>,
}

fn default_visible_input() -> u8 {
    0x0f
}

impl MonitorConfig {
    /// Configuration for an output adopted without being declared
    pub fn adopted(screen: usize, connector: &str) -> Self {
        Self {
            screen,
            connector: connector.to_string(),
            visible_input: default_visible_input(),
            model: None,
            serial: None,
        }
    }

    /// The DDC/CI identity, present only when both model and serial are set
    pub fn ddc_identity(&self) -> Option<DisplayId> {
        match (&self.model, &self.serial) {
            (Some(model), Some(serial)) => Some(DisplayId::new(model, serial)),
            _ => None,
        }
    }
}

/// Border and root window appearance
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AppearanceConfig {
    pub border_width: u32,
    pub border_focused: String,
    pub border_unfocused: String,
    pub background: String,
}

/// Grid overlay settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Initial columns per monitor
    pub columns: u32,
    /// Initial rows per monitor
    pub rows: u32,
    pub line_width: u32,
    pub active: String,
    pub inactive: String,
    pub background: String,
}

/// Mouse move/resize settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DragConfig {
    /// Modifier held while clicking to move (button 1) or resize (button 3)
    pub modifier: String,
    /// Distance from an edge within which a resize grabs that edge
    pub edge_threshold: i32,
    /// Smallest width/height a resize can produce
    pub min_size: i32,
}

/// DDC/CI monitor control settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DdcConfig {
    pub enabled: bool,
    pub poll_interval_secs: u64,
}

impl DdcConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

/// Keybinding configuration (strings like "Mod4+Shift+h")
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct KeybindingConfig {
    pub focus_left: Option<String>,
    pub focus_down: Option<String>,
    pub focus_up: Option<String>,
    pub focus_right: Option<String>,
    pub grid_move_left: Option<String>,
    pub grid_move_down: Option<String>,
    pub grid_move_up: Option<String>,
    pub grid_move_right: Option<String>,
    pub grid_resize_left: Option<String>,
    pub grid_resize_down: Option<String>,
    pub grid_resize_up: Option<String>,
    pub grid_resize_right: Option<String>,
    pub monitor_left: Option<String>,
    pub monitor_down: Option<String>,
    pub monitor_up: Option<String>,
    pub monitor_right: Option<String>,
    pub close_window: Option<String>,
    pub maximize: Option<String>,
    pub unmaximize: Option<String>,
    pub grid_mode: Option<String>,
    pub snap: Option<String>,
    pub reclaim_inputs: Option<String>,
    pub quit: Option<String>,
}

/// Exec keybindings (key combo -> command to run)
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExecConfig {
    #[serde(flatten)]
    pub bindings: HashMap<String, String>,
}

/// Input switching keybindings (key combo -> monitor input)
#[derive(Debug, Default, Deserialize, Clone)]
#[serde(default)]
pub struct InputsConfig {
    #[serde(flatten)]
    pub bindings: HashMap<String, InputBinding>,
}

/// Switch `monitor` to input source `input`
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct InputBinding {
    pub monitor: String,
    pub input: u8,
}

/// Parsed keybinding (ready for X11 grab)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParsedBinding {
    pub keysym: u32,
    pub modifiers: u16,
}

/// Window manager action
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WmAction {
    Spawn(String),
    Focus(Direction),
    GridMove(Direction),
    GridResize(Direction),
    MoveToMonitor(Direction),
    CloseWindow,
    Maximize,
    Unmaximize,
    GridMode,
    Snap,
    ReclaimInputs,
    SwitchInput { monitor: String, input: u8 },
    Quit,
}

impl Config {
    /// Default config file path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mwm")
            .join("config.toml")
    }

    /// Load config from a specific path. A missing file gives the defaults;
    /// a file that does not parse is an error.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                let config: Config = toml::from_str(&contents)
                    .with_context(|| format!("Failed to parse config {:?}", path))?;
                log::info!("Loaded config from {:?}", path);
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No config file found at {:?}, using defaults", path);
                Ok(Self::default())
            }
            Err(e) => Err(e).with_context(|| format!("Failed to read config {:?}", path)),
        }
    }

    /// Check the cross references TOML itself cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        let screens = self.screen_origins()?;
        for (name, monitor) in &self.monitors {
            if !screens.is_empty() && !screens.contains_key(&monitor.screen) {
                return Err(ConfigError::UnknownScreen {
                    monitor: name.clone(),
                    screen: monitor.screen,
                });
            }
        }
        self.style()?;
        parse_modifiers(&self.drag.modifier)
            .ok_or_else(|| ConfigError::BadKeyBinding(self.drag.modifier.clone()))?;

        for combo in self.exec.bindings.keys().chain(self.inputs.bindings.keys()) {
            if parse_key_binding(combo).is_none() {
                return Err(ConfigError::BadKeyBinding(combo.clone()));
            }
        }
        for binding in self.inputs.bindings.values() {
            if !self.monitors.contains_key(&binding.monitor) {
                return Err(ConfigError::UnknownMonitor(binding.monitor.clone()));
            }
        }
        Ok(())
    }

    /// Screen number -> absolute origin. Empty means "every screen".
    pub fn screen_origins(&self) -> Result<BTreeMap<usize, Point>, ConfigError> {
        self.screens
            .iter()
            .map(|(key, screen)| {
                key.trim()
                    .parse::<usize>()
                    .map(|n| (n, Point::new(screen.x, screen.y)))
                    .map_err(|_| ConfigError::InvalidScreenKey(key.clone()))
            })
            .collect()
    }

    /// Resolve the colour strings
    pub fn style(&self) -> Result<Style, ConfigError> {
        let color = |s: &str| parse_color(s).ok_or_else(|| ConfigError::BadColor(s.to_string()));
        Ok(Style {
            border_width: self.appearance.border_width,
            border_focused: color(&self.appearance.border_focused)?,
            border_unfocused: color(&self.appearance.border_unfocused)?,
            root_background: color(&self.appearance.background)?,
            grid_line_width: self.grid.line_width.max(1),
            grid_active: color(&self.grid.active)?,
            grid_inactive: color(&self.grid.inactive)?,
            grid_background: color(&self.grid.background)?,
        })
    }

    /// Modifier mask for mouse move/resize
    pub fn drag_modifiers(&self) -> u16 {
        parse_modifiers(&self.drag.modifier).unwrap_or(MOD4_MASK)
    }

    /// Parse keybindings into action -> ParsedBinding map
    pub fn parse_keybindings(&self) -> HashMap<WmAction, ParsedBinding> {
        let mut bindings = HashMap::new();

        let mut insert = |action: WmAction, key_str: &Option<String>| {
            if let Some(s) = key_str {
                if let Some(parsed) = parse_key_binding(s) {
                    bindings.insert(action, parsed);
                } else {
                    log::warn!("Failed to parse keybinding: {}", s);
                }
            }
        };

        let kb = &self.keybindings;
        insert(WmAction::Focus(Direction::Left), &kb.focus_left);
        insert(WmAction::Focus(Direction::Down), &kb.focus_down);
        insert(WmAction::Focus(Direction::Up), &kb.focus_up);
        insert(WmAction::Focus(Direction::Right), &kb.focus_right);
        insert(WmAction::GridMove(Direction::Left), &kb.grid_move_left);
        insert(WmAction::GridMove(Direction::Down), &kb.grid_move_down);
        insert(WmAction::GridMove(Direction::Up), &kb.grid_move_up);
        insert(WmAction::GridMove(Direction::Right), &kb.grid_move_right);
        insert(WmAction::GridResize(Direction::Left), &kb.grid_resize_left);
        insert(WmAction::GridResize(Direction::Down), &kb.grid_resize_down);
        insert(WmAction::GridResize(Direction::Up), &kb.grid_resize_up);
        insert(WmAction::GridResize(Direction::Right), &kb.grid_resize_right);
        insert(WmAction::MoveToMonitor(Direction::Left), &kb.monitor_left);
        insert(WmAction::MoveToMonitor(Direction::Down), &kb.monitor_down);
        insert(WmAction::MoveToMonitor(Direction::Up), &kb.monitor_up);
        insert(WmAction::MoveToMonitor(Direction::Right), &kb.monitor_right);
        insert(WmAction::CloseWindow, &kb.close_window);
        insert(WmAction::Maximize, &kb.maximize);
        insert(WmAction::Unmaximize, &kb.unmaximize);
        insert(WmAction::GridMode, &kb.grid_mode);
        insert(WmAction::Snap, &kb.snap);
        insert(WmAction::ReclaimInputs, &kb.reclaim_inputs);
        insert(WmAction::Quit, &kb.quit);

        for (key_combo, command) in &self.exec.bindings {
            if let Some(parsed) = parse_key_binding(key_combo) {
                bindings.insert(WmAction::Spawn(command.clone()), parsed);
            } else {
                log::warn!("Failed to parse exec keybinding: {}", key_combo);
            }
        }

        for (key_combo, target) in &self.inputs.bindings {
            if let Some(parsed) = parse_key_binding(key_combo) {
                let action = WmAction::SwitchInput {
                    monitor: target.monitor.clone(),
                    input: target.input,
                };
                bindings.insert(action, parsed);
            } else {
                log::warn!("Failed to parse input keybinding: {}", key_combo);
            }
        }

        bindings
    }
}

/// Parse a "+"-separated modifier list like "Mod4+Shift". An empty string
/// means no modifiers.
pub fn parse_modifiers(s: &str) -> Option<u16> {
    let mut modifiers = 0;
    for part in s.split('+').filter(|p| !p.is_empty()) {
        modifiers |= match part.to_lowercase().as_str() {
            "mod4" | "super" | "win" => MOD4_MASK,
            "shift" => SHIFT_MASK,
            "control" | "ctrl" => CONTROL_MASK,
            "mod1" | "alt" => MOD1_MASK,
            "mod5" => MOD5_MASK,
            _ => {
                log::warn!("Unknown modifier: {}", part);
                return None;
            }
        };
    }
    Some(modifiers)
}

/// Parse a key binding string like "Mod4+Shift+h" into keysym and modifiers
pub fn parse_key_binding(s: &str) -> Option<ParsedBinding> {
    let (mods, key) = match s.rsplit_once('+') {
        Some((mods, key)) => (mods, key),
        None => ("", s),
    };
    let modifiers = parse_modifiers(mods)?;
    let keysym = key_to_keysym(key)?;
    Some(ParsedBinding { keysym, modifiers })
}

/// Convert key name to X11 keysym
fn key_to_keysym(key: &str) -> Option<u32> {
    let lower = key.to_lowercase();
    if let [c] = lower.as_bytes() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            return Some(*c as u32);
        }
    }
    match lower.as_str() {
        "return" | "enter" => Some(0xff0d),
        "tab" => Some(0xff09),
        "escape" | "esc" => Some(0xff1b),
        "space" => Some(0x20),
        "backspace" => Some(0xff08),
        "delete" => Some(0xffff),
        "print" => Some(0xff61),
        "left" => Some(0xff51),
        "up" => Some(0xff52),
        "right" => Some(0xff53),
        "down" => Some(0xff54),
        "f1" => Some(0xffbe),
        "f2" => Some(0xffbf),
        "f3" => Some(0xffc0),
        "f4" => Some(0xffc1),
        "f5" => Some(0xffc2),
        "f6" => Some(0xffc3),
        "f7" => Some(0xffc4),
        "f8" => Some(0xffc5),
        "f9" => Some(0xffc6),
        "f10" => Some(0xffc7),
        "f11" => Some(0xffc8),
        "f12" => Some(0xffc9),
        // Multimedia keys
        "xf86audiolowervolume" => Some(0x1008ff11),
        "xf86audiomute" => Some(0x1008ff12),
        "xf86audioraisevolume" => Some(0x1008ff13),
        "xf86monbrightnessup" => Some(0x1008ff02),
        "xf86monbrightnessdown" => Some(0x1008ff03),
        _ => {
            log::warn!("Unknown key: {}", key);
            None
        }
    }
}

/// Parse hex color string (e.g., "#005f87" or "005f87") to u32
pub fn parse_color(s: &str) -> Option<u32> {
    let s = s.trim_start_matches('#');
    if s.is_empty() || s.len() > 6 {
        return None;
    }
    u32::from_str_radix(s, 16).ok()
}

impl Default for AppearanceConfig {
    fn default() -> Self {
        Self {
            border_width: 5,
            border_focused: "#005f87".to_string(),
            border_unfocused: "#0c0c0c".to_string(),
            background: "#604020".to_string(),
        }
    }
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            columns: 1,
            rows: 1,
            line_width: 1,
            active: "#005f87".to_string(),
            inactive: "#880000".to_string(),
            background: "#181818".to_string(),
        }
    }
}

impl Default for DragConfig {
    fn default() -> Self {
        Self {
            modifier: "Mod4".to_string(),
            edge_threshold: 50,
            min_size: 25,
        }
    }
}

impl Default for DdcConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: 60,
        }
    }
}

impl Default for ExecConfig {
    fn default() -> Self {
        let mut bindings = HashMap::new();
        bindings.insert("Mod4+t".to_string(), "st".to_string());
        bindings.insert("Mod4+r".to_string(), "dmenu_run".to_string());
        bindings.insert("Print".to_string(), "scrot ~/screenshot-%Y%m%d-%H%M%S.png".to_string());
        bindings.insert("Mod4+Escape".to_string(), "slock".to_string());
        bindings.insert("XF86AudioLowerVolume".to_string(), "amixer -q set Master 5%-".to_string());
        bindings.insert("XF86AudioRaiseVolume".to_string(), "amixer -q set Master 5%+".to_string());
        bindings.insert("XF86AudioMute".to_string(), "amixer -q set Master toggle".to_string());
        Self { bindings }
    }
}

impl Default for KeybindingConfig {
    fn default() -> Self {
        let key = |s: &str| Some(s.to_string());
        Self {
            focus_left: key("Mod4+h"),
            focus_down: key("Mod4+j"),
            focus_up: key("Mod4+k"),
            focus_right: key("Mod4+l"),
            grid_move_left: key("Mod4+Shift+h"),
            grid_move_down: key("Mod4+Shift+j"),
            grid_move_up: key("Mod4+Shift+k"),
            grid_move_right: key("Mod4+Shift+l"),
            grid_resize_left: key("Mod4+Control+h"),
            grid_resize_down: key("Mod4+Control+j"),
            grid_resize_up: key("Mod4+Control+k"),
            grid_resize_right: key("Mod4+Control+l"),
            monitor_left: key("Mod4+Mod1+h"),
            monitor_down: key("Mod4+Mod1+j"),
            monitor_up: key("Mod4+Mod1+k"),
            monitor_right: key("Mod4+Mod1+l"),
            close_window: key("Mod4+d"),
            maximize: key("Mod4+m"),
            unmaximize: key("Mod4+n"),
            grid_mode: key("Mod4+g"),
            snap: key("Mod4+s"),
            reclaim_inputs: key("Mod4+i"),
            quit: key("Mod4+Shift+q"),
        }
    }
}
