//! Four-phase pairing handshake.
//!
//! Each phase transmits a fixed-layout request and then a short keep-alive
//! probe; the receiver attaches its response to the probe's acknowledgment.
//! Phase 1 runs on the fixed pairing address, later phases on the address
//! the receiver assigned. Any malformed response or undelivered frame aborts
//! the whole handshake; nothing is persisted here.

pub mod frames;

use core::fmt;

use embassy_time::{Duration, Timer};
use rand_core::RngCore;

use crate::config::UnifyingConfig;
use crate::crypto::{self, DeviceKey, KeyMaterial};
use crate::link::{AckPayload, EsbRadio, LinkError, Pipe, RadioLink};
use crate::store::{DeviceInfo, PairingRecord};
use self::frames::ResponseDefect;

/// Wait between a transmitted request and the probe fetching the receiver's
/// response.
const RESPONSE_DELAY: Duration = Duration::from_millis(10);

/// Receiver-side settle time between a response and the next request.
const SETTLE_DELAY: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PairingError {
    /// A frame could not be delivered.
    Link(LinkError),

    /// The receiver's response failed validation.
    Response(ResponseDefect),

    /// The receiver acknowledged a probe without attaching a response.
    NoResponse,
}

impl From<LinkError> for PairingError {
    fn from(error: LinkError) -> Self {
        Self::Link(error)
    }
}

impl From<ResponseDefect> for PairingError {
    fn from(defect: ResponseDefect) -> Self {
        Self::Response(defect)
    }
}

impl fmt::Display for PairingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Link(error) => write!(f, "Pairing frame undelivered: {error}"),
            Self::Response(defect) => write!(f, "Pairing response rejected: {defect}"),
            Self::NoResponse => write!(f, "Receiver did not respond"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for PairingError {}

/// Runs the whole handshake over `link` and returns the pairing record
/// together with the device key derived from it.
pub async fn pair<R: EsbRadio>(
    link: &mut RadioLink<'_, R>,
    config: &UnifyingConfig,
    device: &DeviceInfo,
    rng: &mut impl RngCore,
) -> Result<(PairingRecord, DeviceKey), PairingError> {
    link.set_pairing_channels()?;
    link.configure_pairing_address()?;

    // Phase 1: introduce the device under its pseudo address; the receiver
    // answers with the address it assigned.
    let request = frames::pairing_request_1(config, device);
    link.send(Pipe::Pairing, &request).await?;
    Timer::after(RESPONSE_DELAY).await;
    let probe =
        frames::keep_alive_probe(frames::MARKER_PHASE_1, 1, device.pseudo_device_address[0]);
    let response = expect_response(link.send(Pipe::Pairing, &probe).await?)?;
    let phase1 = frames::parse_phase1_response(&response)?;
    debug!("pairing: assigned address received");

    // Pipe 1 now listens on the assigned address; confirm it on the pairing
    // pipe before using it.
    link.configure_device_address(&phase1.device_address)?;
    Timer::after(SETTLE_DELAY).await;
    link.send(Pipe::Pairing, &probe).await?;
    Timer::after(SETTLE_DELAY).await;

    // Phase 2: nonce exchange.
    let mut device_nonce = [0u8; 4];
    rng.fill_bytes(&mut device_nonce);
    let request = frames::pairing_request_2(config, device, &device_nonce);
    link.send(Pipe::Device, &request).await?;
    Timer::after(RESPONSE_DELAY).await;
    let probe =
        frames::keep_alive_probe(frames::MARKER_PHASE_2, 2, device.pseudo_device_address[0]);
    let response = expect_response(link.send(Pipe::Device, &probe).await?)?;
    let dongle_nonce = frames::parse_phase2_response(&response)?;

    // The key material is complete at this point; phases 3 and 4 could
    // already be encrypted.
    let record = PairingRecord {
        device_address: phase1.device_address,
        device_nonce,
        dongle_nonce,
        dongle_wpid: phase1.dongle_wpid,
        valid: true,
    };
    let key = crypto::derive_device_key(&key_material(config, &record));
    Timer::after(SETTLE_DELAY).await;

    // Phase 3: transmit the device name.
    let request = frames::pairing_request_3(config);
    link.send(Pipe::Device, &request).await?;
    Timer::after(RESPONSE_DELAY).await;
    let probe = frames::keep_alive_probe(frames::MARKER_PHASE_3, 3, 1);
    let response = expect_response(link.send(Pipe::Device, &probe).await?)?;
    frames::parse_phase3_response(&response)?;
    Timer::after(SETTLE_DELAY).await;

    // Phase 4: final confirmation, no response expected.
    link.send(Pipe::Device, &frames::pairing_request_4()).await?;

    info!("pairing complete");
    Ok((record, key))
}

/// Assembles the key-derivation material for a pairing record.
pub fn key_material(config: &UnifyingConfig, record: &PairingRecord) -> KeyMaterial {
    KeyMaterial {
        device_address: record.device_address,
        device_wpid: config.wpid,
        dongle_wpid: record.dongle_wpid,
        device_nonce: record.device_nonce,
        dongle_nonce: record.dongle_nonce,
    }
}

fn expect_response(ack: Option<AckPayload>) -> Result<AckPayload, PairingError> {
    ack.ok_or(PairingError::NoResponse)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Canned receiver responses for handshake tests.

    use super::frames::{self, report_type};
    use crate::checksum::frame_checksum;
    use crate::link::mock::MockRadio;

    pub const WIRE_ADDRESS: [u8; 5] = [0xaa, 0xbb, 0xcc, 0xdd, 0xee];
    /// `WIRE_ADDRESS` as stored in a pairing record (prefix first).
    pub const ASSIGNED_ADDRESS: [u8; 5] = [0xee, 0xdd, 0xcc, 0xbb, 0xaa];
    pub const DONGLE_WPID: [u8; 2] = [0x88, 0x04];
    pub const DONGLE_NONCE: [u8; 4] = [0x9a, 0xbc, 0xde, 0xf0];

    pub fn phase1_response() -> [u8; frames::FRAME_LEN] {
        let mut frame = [0u8; frames::FRAME_LEN];
        frame[0] = frames::MARKER_PHASE_1;
        frame[1] = report_type::PAIRING;
        frame[2] = 1;
        frame[3..8].copy_from_slice(&WIRE_ADDRESS);
        frame[9..11].copy_from_slice(&DONGLE_WPID);
        frame[21] = frame_checksum(&frame[..21]);
        frame
    }

    pub fn phase2_response() -> [u8; frames::FRAME_LEN] {
        let mut frame = [0u8; frames::FRAME_LEN];
        frame[0] = frames::MARKER_PHASE_2;
        frame[1] = report_type::PAIRING;
        frame[2] = 2;
        frame[3..7].copy_from_slice(&DONGLE_NONCE);
        frame[21] = frame_checksum(&frame[..21]);
        frame
    }

    pub fn phase3_response() -> [u8; frames::PHASE_3_RESPONSE_LEN] {
        let mut frame = [0u8; frames::PHASE_3_RESPONSE_LEN];
        frame[0] = frames::MARKER_PHASE_3;
        frame[1] = report_type::SET_KEEP_ALIVE;
        frame[2] = 6;
        frame[9] = frame_checksum(&frame[..9]);
        frame
    }

    /// Scripts all receiver responses for a successful handshake.
    pub fn script_happy_handshake(radio: &mut MockRadio) {
        radio.push_ack(); // request 1
        radio.push_response(&phase1_response());
        radio.push_ack(); // address confirmation
        radio.push_ack(); // request 2
        radio.push_response(&phase2_response());
        radio.push_ack(); // request 3
        radio.push_response(&phase3_response());
        radio.push_ack(); // request 4
    }
}
