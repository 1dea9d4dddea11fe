//! Domain errors.
//!
//! X11 plumbing and startup use `anyhow`; the failures below are the ones
//! callers inspect or report individually.

use thiserror::Error;

use crate::ddc::DisplayId;

/// Failures of the DDC/CI monitor-control client and its transport
#[derive(Debug, Error)]
pub enum DdcError {
    #[error("i2c transport error on {path}: {source}")]
    Transport {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid DDC/CI reply: {0}")]
    Protocol(String),

    #[error("DDC/CI reply checksum mismatch (expected 0x{expected:02x}, got 0x{actual:02x})")]
    Checksum { expected: u8, actual: u8 },

    #[error("VCP feature 0x{0:02x} is not supported by the display")]
    Unsupported(u8),

    #[error("VCP feature 0x{code:02x} read back 0x{actual:04x}, wrote 0x{expected:04x}")]
    Verify { code: u8, expected: u16, actual: u16 },

    #[error("duplicate display identity {0}")]
    DuplicateDisplay(DisplayId),

    #[error("unknown display identity {0}")]
    UnknownDisplay(DisplayId),

    #[error("failed to open display {id}: {reason}")]
    Open { id: DisplayId, reason: String },
}

/// Mismatches between detected outputs and the declared monitors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MonitorError {
    #[error("output {connector} on screen {screen} is not configured")]
    UnconfiguredConnector { screen: usize, connector: String },

    #[error("monitor {0} matched more than one output")]
    DuplicateMonitor(String),

    #[error("configured monitor {0} was not detected")]
    MissingMonitor(String),
}

/// Rejected registry mutations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("window 0x{0:x} is already managed")]
    DuplicateClient(u32),

    #[error("window 0x{0:x} is not a known root")]
    UnknownRoot(u32),
}

/// Configuration values that parse as TOML but make no sense
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("screen key {0:?} is not a screen number")]
    InvalidScreenKey(String),

    #[error("monitor {monitor} refers to undeclared screen {screen}")]
    UnknownScreen { monitor: String, screen: usize },

    #[error("invalid colour {0:?}")]
    BadColor(String),

    #[error("invalid key binding {0:?}")]
    BadKeyBinding(String),

    #[error("input binding refers to unknown monitor {0}")]
    UnknownMonitor(String),
}
