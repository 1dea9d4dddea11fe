//! DDC/CI monitor control.
//!
//! Keeps a cached input-source value (VCP feature 0x60) for each physical
//! monitor we were told to expect, and switches inputs on request. The bus
//! itself sits behind [`ControlChannel`]; see `i2c.rs` for the Linux
//! transport.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::error::DdcError;

/// VCP feature code for the active input source
pub const FEATURE_INPUT_SOURCE: u8 = 0x60;

/// Upper bound for every retry count
pub const MAX_TRIES: u8 = 15;

/// Identity of a physical monitor as reported by its EDID
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DisplayId {
    pub model: String,
    pub serial: String,
}

impl DisplayId {
    pub fn new(model: impl Into<String>, serial: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            serial: serial.into(),
        }
    }
}

impl fmt::Display for DisplayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "model=({}) serial=({})", self.model, self.serial)
    }
}

/// Retry and timing knobs applied to the transport before detection
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tuning {
    pub write_only_tries: u8,
    pub write_read_tries: u8,
    pub multi_part_tries: u8,
    /// Read a feature back after writing it
    pub verify: bool,
    /// Allow skipping the protocol's mandatory post-command sleeps
    pub sleep_suppression: bool,
    pub usb_detection: bool,
    /// Scales every protocol sleep
    pub sleep_multiplier: f64,
}

impl Tuning {
    /// Maximum retries, no shortcuts, long sleeps. Cheap monitors drop
    /// DDC/CI traffic constantly, so this is what we run with.
    pub fn robust() -> Self {
        Self {
            write_only_tries: MAX_TRIES,
            write_read_tries: MAX_TRIES,
            multi_part_tries: MAX_TRIES,
            verify: false,
            sleep_suppression: false,
            usb_detection: false,
            sleep_multiplier: 3.0,
        }
    }
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            write_only_tries: 4,
            write_read_tries: 4,
            multi_part_tries: 8,
            verify: true,
            sleep_suppression: false,
            usb_detection: false,
            sleep_multiplier: 1.0,
        }
    }
}

/// Transport for DDC/CI traffic
pub trait ControlChannel {
    /// Reference to a detected but unopened display
    type DisplayRef;
    /// An open display
    type Handle;

    fn tune(&mut self, tuning: &Tuning);

    /// Enumerate attached displays
    fn detect(&mut self) -> Result<Vec<(DisplayId, Self::DisplayRef)>, DdcError>;

    fn open(&mut self, display: &Self::DisplayRef) -> Result<Self::Handle, DdcError>;

    /// Current value of a non-table VCP feature
    fn read_feature(&mut self, handle: &mut Self::Handle, code: u8) -> Result<u16, DdcError>;

    fn write_feature(&mut self, handle: &mut Self::Handle, code: u8, value: u16) -> Result<(), DdcError>;
}

struct OpenDisplay<H> {
    handle: H,
    source: Option<u8>,
}

/// Cached input-source state for every expected display
pub struct DisplayDataChannel<C: ControlChannel> {
    channel: C,
    displays: BTreeMap<DisplayId, OpenDisplay<C::Handle>>,
}

impl<C: ControlChannel> DisplayDataChannel<C> {
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            displays: BTreeMap::new(),
        }
    }

    /// Tune the transport, then detect and open every display in
    /// `expected`. Displays we were not told about are skipped; two
    /// detected displays sharing an expected identity are an error.
    pub fn init(&mut self, expected: &[DisplayId]) -> Result<(), DdcError> {
        let tuning = Tuning::robust();
        self.channel.tune(&tuning);
        log::info!(
            "DDC retry settings: max={} write_only={} write_read={} multi_part={}",
            MAX_TRIES,
            tuning.write_only_tries,
            tuning.write_read_tries,
            tuning.multi_part_tries
        );
        log::info!(
            "DDC sleep settings: suppression={} multiplier={}",
            tuning.sleep_suppression,
            tuning.sleep_multiplier
        );

        let detected = self.channel.detect()?;
        let mut seen = HashSet::new();
        for (id, display_ref) in detected {
            if !expected.contains(&id) {
                log::warn!("DDC ignoring display {}", id);
                continue;
            }
            if !seen.insert(id.clone()) {
                return Err(DdcError::DuplicateDisplay(id));
            }

            let handle = self.channel.open(&display_ref).map_err(|e| DdcError::Open {
                id: id.clone(),
                reason: e.to_string(),
            })?;
            log::info!("DDC opened display {}", id);
            self.displays.insert(id, OpenDisplay { handle, source: None });
        }

        for id in expected {
            if !self.displays.contains_key(id) {
                log::warn!("DDC display {} was not detected", id);
            }
        }

        Ok(())
    }

    /// Refresh the input source of every open display, stopping at the
    /// first failure. The failing display's cached value is cleared.
    pub fn poll(&mut self) -> Result<(), DdcError> {
        for (id, display) in self.displays.iter_mut() {
            match self.channel.read_feature(&mut display.handle, FEATURE_INPUT_SOURCE) {
                Ok(value) => {
                    let source = (value & 0xff) as u8;
                    display.source = Some(source);
                    log::debug!("DDC {} input source 0x{:02x}", id, source);
                }
                Err(e) => {
                    display.source = None;
                    log::error!("DDC unable to query input source of {}: {}", id, e);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Last polled input source
    pub fn source(&self, id: &DisplayId) -> Option<u8> {
        self.displays.get(id).and_then(|d| d.source)
    }

    /// Switch a display's input. The cache is only refreshed by `poll`.
    pub fn set_source(&mut self, id: &DisplayId, source: u8) -> Result<(), DdcError> {
        let display = self
            .displays
            .get_mut(id)
            .ok_or_else(|| DdcError::UnknownDisplay(id.clone()))?;

        if let Err(e) = self
            .channel
            .write_feature(&mut display.handle, FEATURE_INPUT_SOURCE, source as u16)
        {
            display.source = None;
            log::error!("DDC unable to set input source of {}: {}", id, e);
            return Err(e);
        }
        log::info!("DDC set input source of {} to 0x{:02x}", id, source);
        Ok(())
    }

    /// Identities of the open displays, in poll order
    pub fn displays(&self) -> impl Iterator<Item = &DisplayId> {
        self.displays.keys()
    }
}
