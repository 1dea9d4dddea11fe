//! DDC/CI over Linux i2c-dev.
//!
//! Every `/dev/i2c-*` bus with a readable EDID at slave 0x50 is a candidate
//! display. VCP traffic goes to slave 0x37. Framing:
//!
//! ```text
//! get request   51 82 01 <code> <chk>
//! get reply     6E 88 02 <result> <code> <type> <max hi> <max lo> <cur hi> <cur lo> <chk>
//! set request   51 84 03 <code> <hi> <lo> <chk>
//! ```
//!
//! Request checksums start from the destination address 0x6E, reply
//! checksums from the virtual host address 0x50.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use i2cdev::core::I2CDevice;
use i2cdev::linux::{LinuxI2CDevice, LinuxI2CError};

use crate::ddc::{ControlChannel, DisplayId, Tuning};
use crate::error::DdcError;

const EDID_ADDR: u16 = 0x50;
const DDC_ADDR: u16 = 0x37;

const HOST_ADDR: u8 = 0x51;
const DISPLAY_ADDR: u8 = 0x6e;
const REPLY_CHECK_SEED: u8 = 0x50;

const EDID_HEADER: [u8; 8] = [0x00, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x00];
const EDID_LEN: usize = 128;

const GET_VCP_DELAY: Duration = Duration::from_millis(40);
const SET_VCP_DELAY: Duration = Duration::from_millis(50);

fn checksum(seed: u8, bytes: &[u8]) -> u8 {
    bytes.iter().fold(seed, |acc, b| acc ^ b)
}

/// Get VCP Feature request
pub fn encode_get_vcp(code: u8) -> [u8; 5] {
    let mut msg = [HOST_ADDR, 0x82, 0x01, code, 0];
    msg[4] = checksum(DISPLAY_ADDR, &msg[..4]);
    msg
}

/// Set VCP Feature request
pub fn encode_set_vcp(code: u8, value: u16) -> [u8; 7] {
    let [hi, lo] = value.to_be_bytes();
    let mut msg = [HOST_ADDR, 0x84, 0x03, code, hi, lo, 0];
    msg[6] = checksum(DISPLAY_ADDR, &msg[..6]);
    msg
}

/// Decoded Get VCP Feature reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VcpReply {
    pub maximum: u16,
    pub current: u16,
}

/// Check and decode a Get VCP Feature reply for `code`
pub fn decode_vcp_reply(code: u8, reply: &[u8]) -> Result<VcpReply, DdcError> {
    if reply.len() >= 2 && reply[0] == DISPLAY_ADDR && reply[1] == 0x80 {
        return Err(DdcError::Protocol("null message".to_string()));
    }
    if reply.len() < 11 {
        return Err(DdcError::Protocol(format!("short reply ({} bytes)", reply.len())));
    }
    if reply[0] != DISPLAY_ADDR {
        return Err(DdcError::Protocol(format!("unexpected source address 0x{:02x}", reply[0])));
    }
    if reply[1] != 0x88 {
        return Err(DdcError::Protocol(format!("unexpected length byte 0x{:02x}", reply[1])));
    }

    let expected = checksum(REPLY_CHECK_SEED, &reply[..10]);
    if expected != reply[10] {
        return Err(DdcError::Checksum {
            expected,
            actual: reply[10],
        });
    }

    if reply[2] != 0x02 {
        return Err(DdcError::Protocol(format!("unexpected opcode 0x{:02x}", reply[2])));
    }
    match reply[3] {
        0x00 => {}
        0x01 => return Err(DdcError::Unsupported(code)),
        other => return Err(DdcError::Protocol(format!("result code 0x{:02x}", other))),
    }
    if reply[4] != code {
        return Err(DdcError::Protocol(format!(
            "reply for feature 0x{:02x}, asked for 0x{:02x}",
            reply[4], code
        )));
    }

    Ok(VcpReply {
        maximum: u16::from_be_bytes([reply[6], reply[7]]),
        current: u16::from_be_bytes([reply[8], reply[9]]),
    })
}

/// Text of an EDID display descriptor, without the 0x0A terminator and
/// trailing padding
fn descriptor_text(desc: &[u8]) -> String {
    let text = &desc[5..18];
    let end = text.iter().position(|&b| b == 0x0a).unwrap_or(text.len());
    String::from_utf8_lossy(&text[..end]).trim_end().to_string()
}

/// Monitor identity from a 128-byte EDID base block
pub fn parse_edid(edid: &[u8]) -> Result<DisplayId, DdcError> {
    if edid.len() < EDID_LEN {
        return Err(DdcError::Protocol(format!("EDID too short ({} bytes)", edid.len())));
    }
    let edid = &edid[..EDID_LEN];
    if edid[..8] != EDID_HEADER {
        return Err(DdcError::Protocol("bad EDID header".to_string()));
    }
    let sum = edid.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    if sum != 0 {
        return Err(DdcError::Protocol("bad EDID checksum".to_string()));
    }

    let mut model = None;
    let mut serial = None;
    for desc in edid[54..126].chunks(18) {
        if desc[0] != 0 || desc[1] != 0 {
            continue; // detailed timing
        }
        match desc[3] {
            0xfc => model = Some(descriptor_text(desc)),
            0xff => serial = Some(descriptor_text(desc)),
            _ => {}
        }
    }

    let serial = serial.unwrap_or_else(|| {
        u32::from_le_bytes([edid[12], edid[13], edid[14], edid[15]]).to_string()
    });
    Ok(DisplayId::new(model.unwrap_or_default(), serial))
}

fn transport_err(path: &Path, source: LinuxI2CError) -> DdcError {
    DdcError::Transport {
        path: path.display().to_string(),
        source: source.into(),
    }
}

fn open_bus(path: &Path, addr: u16) -> Result<LinuxI2CDevice, DdcError> {
    LinuxI2CDevice::new(path, addr).map_err(|e| transport_err(path, e))
}

fn read_edid(path: &Path) -> Result<DisplayId, DdcError> {
    let mut bus = open_bus(path, EDID_ADDR)?;
    bus.write(&[0x00]).map_err(|e| transport_err(path, e))?;
    let mut edid = [0u8; EDID_LEN];
    bus.read(&mut edid).map_err(|e| transport_err(path, e))?;
    parse_edid(&edid)
}

/// Bus number of an `i2c-N` device name
fn bus_number(name: &str) -> Option<u32> {
    name.strip_prefix("i2c-")?.parse().ok()
}

/// An open DDC/CI connection to one display
pub struct I2cHandle {
    path: PathBuf,
    bus: LinuxI2CDevice,
}

/// DDC/CI transport over `/dev/i2c-*`
pub struct I2cChannel {
    dev_dir: PathBuf,
    tuning: Tuning,
}

impl I2cChannel {
    pub fn new() -> Self {
        Self::with_dev_dir("/dev")
    }

    pub fn with_dev_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dev_dir: dir.into(),
            tuning: Tuning::default(),
        }
    }

    fn sleep(&self, base: Duration) {
        thread::sleep(base.mul_f64(self.tuning.sleep_multiplier));
    }

    fn try_read(&self, handle: &mut I2cHandle, code: u8) -> Result<VcpReply, DdcError> {
        handle
            .bus
            .write(&encode_get_vcp(code))
            .map_err(|e| transport_err(&handle.path, e))?;
        self.sleep(GET_VCP_DELAY);
        let mut reply = [0u8; 11];
        handle
            .bus
            .read(&mut reply)
            .map_err(|e| transport_err(&handle.path, e))?;
        decode_vcp_reply(code, &reply)
    }

    fn try_write(&self, handle: &mut I2cHandle, code: u8, value: u16) -> Result<(), DdcError> {
        handle
            .bus
            .write(&encode_set_vcp(code, value))
            .map_err(|e| transport_err(&handle.path, e))?;
        self.sleep(SET_VCP_DELAY);
        Ok(())
    }
}

impl Default for I2cChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlChannel for I2cChannel {
    type DisplayRef = PathBuf;
    type Handle = I2cHandle;

    fn tune(&mut self, tuning: &Tuning) {
        if tuning.usb_detection {
            log::warn!("USB monitor detection is not supported over i2c-dev");
        }
        self.tuning = *tuning;
    }

    fn detect(&mut self) -> Result<Vec<(DisplayId, PathBuf)>, DdcError> {
        let entries = std::fs::read_dir(&self.dev_dir).map_err(|e| DdcError::Transport {
            path: self.dev_dir.display().to_string(),
            source: e,
        })?;
        let mut buses: Vec<(u32, PathBuf)> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let n = bus_number(entry.file_name().to_str()?)?;
                Some((n, entry.path()))
            })
            .collect();
        buses.sort();

        let mut found = Vec::new();
        for (_, path) in buses {
            match read_edid(&path) {
                Ok(id) => {
                    log::info!("DDC found display {} on {:?}", id, path);
                    found.push((id, path));
                }
                Err(e) => log::debug!("No display on {:?}: {}", path, e),
            }
        }
        Ok(found)
    }

    fn open(&mut self, path: &PathBuf) -> Result<I2cHandle, DdcError> {
        let bus = open_bus(path, DDC_ADDR)?;
        Ok(I2cHandle {
            path: path.clone(),
            bus,
        })
    }

    fn read_feature(&mut self, handle: &mut I2cHandle, code: u8) -> Result<u16, DdcError> {
        let tries = self.tuning.write_read_tries.max(1);
        let mut last = None;
        for attempt in 1..=tries {
            match self.try_read(handle, code) {
                Ok(reply) => return Ok(reply.current),
                Err(e @ DdcError::Unsupported(_)) => return Err(e),
                Err(e) => {
                    log::debug!("DDC read 0x{:02x} attempt {}/{} failed: {}", code, attempt, tries, e);
                    last = Some(e);
                    self.sleep(GET_VCP_DELAY);
                }
            }
        }
        Err(last.unwrap_or_else(|| DdcError::Protocol("no attempts made".to_string())))
    }

    fn write_feature(&mut self, handle: &mut I2cHandle, code: u8, value: u16) -> Result<(), DdcError> {
        let tries = self.tuning.write_only_tries.max(1);
        let mut last = None;
        for attempt in 1..=tries {
            match self.try_write(handle, code, value) {
                Ok(()) => {
                    last = None;
                    break;
                }
                Err(e) => {
                    log::debug!("DDC write 0x{:02x} attempt {}/{} failed: {}", code, attempt, tries, e);
                    last = Some(e);
                }
            }
        }
        if let Some(e) = last {
            return Err(e);
        }

        if self.tuning.verify {
            let actual = self.read_feature(handle, code)?;
            if actual != value {
                return Err(DdcError::Verify {
                    code,
                    expected: value,
                    actual,
                });
            }
        }
        Ok(())
    }
}
