//! Over-the-air frame layouts for the pairing handshake and steady state.
//!
//! All frames end in a [`frame_checksum`] byte over the preceding bytes.
//! Addresses travel least-significant-byte-first on the wire; in memory they
//! are kept prefix-first (see [`PipeAddress`](crate::link::PipeAddress)).

use core::fmt;

use crate::checksum::{frame_checksum, verify_frame};
use crate::config::UnifyingConfig;
use crate::link::PipeAddress;
use crate::store::DeviceInfo;

/// Full-size request/response frame length.
pub const FRAME_LEN: usize = 22;
/// Short keep-alive probe length.
pub const PROBE_LEN: usize = 5;
/// Final handshake frame length.
pub const REQUEST_4_LEN: usize = 10;
/// Phase 3 response length.
pub const PHASE_3_RESPONSE_LEN: usize = 10;

pub const MARKER_PHASE_1: u8 = 0xe1;
pub const MARKER_PHASE_2: u8 = 0xe2;
pub const MARKER_PHASE_3: u8 = 0xe3;

/// Report type byte values (frame byte 1, possibly combined with
/// `KEEP_ALIVE` and the encrypted bit `0x80`).
pub mod report_type {
    pub const KEYBOARD: u8 = 0x01;
    pub const MOUSE: u8 = 0x02;
    pub const MULTIMEDIA: u8 = 0x03;
    pub const SYSTEM_CTL: u8 = 0x04;
    pub const LED: u8 = 0x0e;
    pub const SET_KEEP_ALIVE: u8 = 0x0f;
    pub const HIDPP_SHORT: u8 = 0x10;
    pub const HIDPP_LONG: u8 = 0x11;
    pub const ENCRYPTED_KEYBOARD: u8 = 0x13;
    pub const ENCRYPTED_HIDPP_LONG: u8 = 0x1b;
    pub const PAIRING: u8 = 0x1f;
    pub const KEEP_ALIVE: u8 = 0x40;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum DeviceProtocol {
    Unifying = 0x4,
    G700 = 0x7,
    Lightspeed = 0xc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum DeviceType {
    Unknown = 0x0,
    Keyboard = 0x1,
    Mouse = 0x2,
    Numpad = 0x3,
    Presenter = 0x4,
    Remote = 0x7,
    Trackball = 0x8,
    Touchpad = 0x9,
    Tablet = 0xa,
    Gamepad = 0xb,
    Joystick = 0xc,
}

/// Capability bits announced in pairing request 1.
pub mod capability {
    pub const LINK_ENCRYPTION: u8 = 1 << 0;
    pub const BATTERY_STATUS: u8 = 1 << 1;
    pub const UNIFYING_COMPATIBLE: u8 = 1 << 2;
    pub const EXTRA: u8 = 1 << 3;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum PowerSwitchLocation {
    Reserved = 0x0,
    Base = 0x1,
    TopCase = 0x2,
    TopRightEdge = 0x3,
    Other = 0x4,
    TopLeftCorner = 0x5,
    BottomLeftCorner = 0x6,
    TopRightCorner = 0x7,
    BottomRightCorner = 0x8,
    TopEdge = 0x9,
    RightEdge = 0xa,
    LeftEdge = 0xb,
    BottomEdge = 0xc,
}

/// Why a receiver response was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ResponseDefect {
    Length,
    Checksum,
    Marker,
    ReportType,
    Sequence,
}

impl fmt::Display for ResponseDefect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Length => write!(f, "Wrong response length"),
            Self::Checksum => write!(f, "Response checksum mismatch"),
            Self::Marker => write!(f, "Wrong phase marker"),
            Self::ReportType => write!(f, "Wrong report type"),
            Self::Sequence => write!(f, "Wrong sequence byte"),
        }
    }
}

/// Pairing request 1: introduces the device under its pseudo address.
pub fn pairing_request_1(config: &UnifyingConfig, device: &DeviceInfo) -> [u8; FRAME_LEN] {
    let mut frame = [0u8; FRAME_LEN];
    frame[0] = MARKER_PHASE_1;
    frame[1] = report_type::PAIRING | report_type::KEEP_ALIVE;
    frame[2] = 1;
    frame[3..8].copy_from_slice(&device.pseudo_device_address);
    frame[8] = config.keepalive_interval_ms;
    frame[9..11].copy_from_slice(&config.wpid);
    frame[11] = config.protocol as u8;
    frame[12] = 0x0; // 0x2 for some devices
    frame[13] = config.device_type as u8;
    frame[14] = config.capabilities;
    frame[20] = 0x1a;
    frame[21] = frame_checksum(&frame[..21]);
    frame
}

/// Short probe asking the receiver for its response to the previous
/// request. `echo` repeats an address byte of the sender.
pub fn keep_alive_probe(marker: u8, phase: u8, echo: u8) -> [u8; PROBE_LEN] {
    let mut frame = [0u8; PROBE_LEN];
    frame[0] = marker;
    frame[1] = report_type::KEEP_ALIVE;
    frame[2] = phase;
    frame[3] = echo;
    frame[4] = frame_checksum(&frame[..4]);
    frame
}

/// Pairing request 2: nonce and serial exchange.
pub fn pairing_request_2(
    config: &UnifyingConfig,
    device: &DeviceInfo,
    device_nonce: &[u8; 4],
) -> [u8; FRAME_LEN] {
    let mut frame = [0u8; FRAME_LEN];
    frame[0] = MARKER_PHASE_2;
    frame[1] = report_type::PAIRING | report_type::KEEP_ALIVE;
    frame[2] = 2;
    frame[3..7].copy_from_slice(device_nonce);
    frame[7..11].copy_from_slice(&device.device_serial);
    let report_types: u32 = 1 << report_type::KEYBOARD;
    frame[11..15].copy_from_slice(&report_types.to_le_bytes());
    frame[15] = config.power_switch_location as u8;
    frame[21] = frame_checksum(&frame[..21]);
    frame
}

/// Pairing request 3: announces the device name.
pub fn pairing_request_3(config: &UnifyingConfig) -> [u8; FRAME_LEN] {
    let name = config.device_name.as_bytes();
    let mut frame = [0u8; FRAME_LEN];
    frame[0] = MARKER_PHASE_3;
    frame[1] = report_type::PAIRING | report_type::KEEP_ALIVE;
    frame[2] = 3;
    frame[3] = 1; // name fits a single packet
    frame[4] = name.len() as u8;
    frame[5..5 + name.len()].copy_from_slice(name);
    frame[21] = frame_checksum(&frame[..21]);
    frame
}

/// Pairing request 4: final confirmation, completes the handshake.
pub fn pairing_request_4() -> [u8; REQUEST_4_LEN] {
    let mut frame = [0u8; REQUEST_4_LEN];
    frame[0] = MARKER_PHASE_2;
    frame[1] = report_type::SET_KEEP_ALIVE | report_type::KEEP_ALIVE;
    frame[2] = 6;
    frame[3] = 1;
    frame[9] = frame_checksum(&frame[..9]);
    frame
}

/// Steady-state keep-alive, also used as the reconnection probe.
pub fn keep_alive(interval_ms: u8) -> [u8; PROBE_LEN] {
    let mut frame = [0u8; PROBE_LEN];
    frame[1] = report_type::KEEP_ALIVE;
    frame[3] = interval_ms;
    frame[4] = frame_checksum(&frame[..4]);
    frame
}

/// Converts the HID boot report into the cleartext layout of an encrypted
/// keyboard report: the reserved byte is dropped and byte 7 carries a fixed
/// flag.
pub fn plain_keyboard_report(six_keys: &[u8; 8]) -> [u8; 8] {
    let mut report = [0u8; 8];
    report[0] = six_keys[0];
    report[1..7].copy_from_slice(&six_keys[2..8]);
    report[7] = 0xc9;
    report
}

/// Receiver response to pairing request 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Phase1Response {
    /// Assigned device address, converted to prefix-first order.
    pub device_address: PipeAddress,
    pub dongle_wpid: [u8; 2],
}

pub fn parse_phase1_response(frame: &[u8]) -> Result<Phase1Response, ResponseDefect> {
    check_response(frame, FRAME_LEN, MARKER_PHASE_1, report_type::PAIRING, 1)?;
    let mut device_address = [0u8; 5];
    for (i, byte) in device_address.iter_mut().enumerate() {
        *byte = frame[3 + 4 - i];
    }
    Ok(Phase1Response {
        device_address,
        dongle_wpid: [frame[9], frame[10]],
    })
}

/// Returns the receiver nonce from the phase 2 response.
pub fn parse_phase2_response(frame: &[u8]) -> Result<[u8; 4], ResponseDefect> {
    check_response(frame, FRAME_LEN, MARKER_PHASE_2, report_type::PAIRING, 2)?;
    let mut nonce = [0u8; 4];
    nonce.copy_from_slice(&frame[3..7]);
    Ok(nonce)
}

pub fn parse_phase3_response(frame: &[u8]) -> Result<(), ResponseDefect> {
    check_response(
        frame,
        PHASE_3_RESPONSE_LEN,
        MARKER_PHASE_3,
        report_type::SET_KEEP_ALIVE,
        6,
    )
}

fn check_response(
    frame: &[u8],
    length: usize,
    marker: u8,
    report: u8,
    sequence: u8,
) -> Result<(), ResponseDefect> {
    if frame.len() != length {
        return Err(ResponseDefect::Length);
    }
    if !verify_frame(frame) {
        return Err(ResponseDefect::Checksum);
    }
    if frame[0] != marker {
        return Err(ResponseDefect::Marker);
    }
    if frame[1] != report {
        return Err(ResponseDefect::ReportType);
    }
    if frame[2] != sequence {
        return Err(ResponseDefect::Sequence);
    }
    Ok(())
}

/// Report received from the receiver while connected, carried in an
/// acknowledgment payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InboundReport {
    /// Host LED state.
    Leds {
        num_lock: bool,
        caps_lock: bool,
        scroll_lock: bool,
    },
    /// HID++ request addressed at the device.
    HidPp,
    Unknown(u8),
}

pub fn classify_inbound(frame: &[u8]) -> InboundReport {
    let kind = frame.get(1).copied().unwrap_or(0) & 0x1f;
    match kind {
        report_type::LED if frame.len() >= 3 => InboundReport::Leds {
            num_lock: frame[2] & 0x01 != 0,
            caps_lock: frame[2] & 0x02 != 0,
            scroll_lock: frame[2] & 0x04 != 0,
        },
        report_type::HIDPP_SHORT | report_type::HIDPP_LONG => InboundReport::HidPp,
        other => InboundReport::Unknown(other),
    }
}
