//! Channel-hopping link layer with failover retransmission.
//!
//! [`RadioLink`] owns the active channel table and retries a frame across
//! all configured channels when the receiver does not acknowledge it. The
//! radio hardware itself is reached through the [`EsbRadio`] capability
//! trait, so the link logic is testable without hardware.

#[cfg(test)]
pub mod mock;
mod transport;

pub use transport::{AckPayload, EsbRadio, LinkError, MAX_FRAME_LEN, Pipe, PipeAddress, Result};

use core::sync::atomic::{AtomicBool, Ordering};

/// Address the receiver listens on for pairing requests (prefix first).
pub const PAIRING_ADDRESS: PipeAddress = [0x75, 0xa5, 0xdc, 0x0a, 0xbb];

/// Channels used while a pairing handshake is in progress.
pub const PAIRING_CHANNELS: [u8; 11] = [62, 8, 35, 65, 14, 41, 71, 17, 44, 74, 5];

/// Channels used once a receiver is paired.
pub const NORMAL_CHANNELS: [u8; 25] = [
    5, 8, 11, 14, 17, 20, 23, 26, 29, 32, 35, 38, 41, 44, 47, 50, 53, 56, 59, 62, 65, 68, 71, 74,
    77,
];

/// Full passes over the channel table before a send is abandoned. Two passes
/// ride out a single channel blocked by interference while keeping the
/// worst-case send time bounded.
const FAILOVER_LOOP_COUNT: u8 = 2;

/// Single-packet send with acknowledgment wait and channel failover.
pub struct RadioLink<'a, R: EsbRadio> {
    radio: R,
    channels: &'static [u8],
    index: usize,
    shutdown: &'a AtomicBool,
}

impl<'a, R: EsbRadio> RadioLink<'a, R> {
    /// Wraps a radio. `shutdown` aborts in-progress sends when set; see
    /// [`SessionShared::radio_shutdown`](crate::session::SessionShared::radio_shutdown).
    pub fn new(radio: R, shutdown: &'a AtomicBool) -> Self {
        Self {
            radio,
            channels: &PAIRING_CHANNELS,
            index: 0,
            shutdown,
        }
    }

    fn set_channels(&mut self, table: &'static [u8]) -> Result<()> {
        self.channels = table;
        self.index = 0;
        self.radio.set_channel(table[0])
    }

    /// Selects the handshake channel table, starting at its first entry.
    pub fn set_pairing_channels(&mut self) -> Result<()> {
        self.set_channels(&PAIRING_CHANNELS)
    }

    /// Selects the steady-state channel table, starting at its first entry.
    pub fn set_normal_channels(&mut self) -> Result<()> {
        self.set_channels(&NORMAL_CHANNELS)
    }

    /// Listens on the fixed pairing address only.
    pub fn configure_pairing_address(&mut self) -> Result<()> {
        self.radio.set_addresses(&PAIRING_ADDRESS, None)
    }

    /// Programs pipe 1 with the receiver-assigned device address.
    pub fn configure_device_address(&mut self, address: &PipeAddress) -> Result<()> {
        self.radio.set_addresses(&PAIRING_ADDRESS, Some(address))
    }

    /// Sends one frame, hopping across the channel table until the receiver
    /// acknowledges it.
    ///
    /// Failover tries every channel in order, starting from the channel that
    /// was active on entry, and gives up after the table has been cycled
    /// twice. On success the cursor stays on the channel that worked, so the
    /// next send starts there.
    pub async fn send(&mut self, pipe: Pipe, frame: &[u8]) -> Result<Option<AckPayload>> {
        if frame.len() > MAX_FRAME_LEN {
            return Err(LinkError::FrameTooLarge);
        }

        let start = self.index;
        let mut loops = 0;
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                return Err(LinkError::Shutdown);
            }
            match self.radio.transmit(pipe, frame).await {
                Ok(ack) => return Ok(ack),
                Err(LinkError::NotAcknowledged) => {
                    self.index = (self.index + 1) % self.channels.len();
                    self.radio.set_channel(self.channels[self.index])?;
                    if self.index == start {
                        loops += 1;
                        if loops == FAILOVER_LOOP_COUNT {
                            debug!("link: channel table exhausted");
                            return Err(LinkError::ChannelsExhausted);
                        }
                    }
                }
                Err(error) => return Err(error),
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }
}

#[cfg(test)]
mod tests {
    use super::mock::{MockRadio, TxScript};
    use super::*;
    use embassy_futures::block_on;

    fn test_link(stop: &AtomicBool) -> RadioLink<'_, MockRadio> {
        let mut link = RadioLink::new(MockRadio::new(), stop);
        link.set_pairing_channels().unwrap();
        link.radio_mut().switch_count = 0;
        link
    }

    #[test]
    fn test_send_on_first_try() {
        let stop = AtomicBool::new(false);
        let mut link = test_link(&stop);

        let ack = block_on(link.send(Pipe::Pairing, &[0xaa, 0xbb])).unwrap();
        assert_eq!(ack, None);

        let radio = link.radio_mut();
        assert_eq!(radio.sent.len(), 1);
        assert_eq!(radio.sent[0].channel, PAIRING_CHANNELS[0]);
        assert_eq!(radio.switch_count, 0);
    }

    #[test]
    fn test_failover_advances_to_next_channel() {
        let stop = AtomicBool::new(false);
        let mut link = test_link(&stop);
        link.radio_mut().script.push_back(TxScript::Miss).unwrap();

        block_on(link.send(Pipe::Pairing, &[0x01])).unwrap();

        let radio = link.radio_mut();
        assert_eq!(radio.sent.len(), 2);
        assert_eq!(radio.sent[0].channel, PAIRING_CHANNELS[0]);
        assert_eq!(radio.sent[1].channel, PAIRING_CHANNELS[1]);

        // The cursor stays on the channel that worked.
        radio.sent.clear();
        block_on(link.send(Pipe::Pairing, &[0x02])).unwrap();
        assert_eq!(link.radio_mut().sent[0].channel, PAIRING_CHANNELS[1]);
    }

    #[test]
    fn test_failover_cycles_the_table_exactly_twice() {
        let stop = AtomicBool::new(false);
        let mut link = test_link(&stop);
        link.radio_mut().fail_all = true;

        let result = block_on(link.send(Pipe::Device, &[0x42]));
        assert_eq!(result, Err(LinkError::ChannelsExhausted));

        let n = PAIRING_CHANNELS.len();
        let radio = link.radio_mut();
        assert_eq!(radio.switch_count, 2 * n);
        assert_eq!(radio.sent.len(), 2 * n);
        for (i, sent) in radio.sent.iter().enumerate() {
            assert_eq!(sent.channel, PAIRING_CHANNELS[i % n]);
        }
    }

    #[test]
    fn test_failover_starts_mid_table() {
        let stop = AtomicBool::new(false);
        let mut link = test_link(&stop);

        // Move the cursor to the second channel, then exhaust the table.
        link.radio_mut().script.push_back(TxScript::Miss).unwrap();
        block_on(link.send(Pipe::Pairing, &[0x01])).unwrap();
        link.radio_mut().sent.clear();
        link.radio_mut().fail_all = true;

        let result = block_on(link.send(Pipe::Pairing, &[0x02]));
        assert_eq!(result, Err(LinkError::ChannelsExhausted));

        let n = PAIRING_CHANNELS.len();
        let radio = link.radio_mut();
        assert_eq!(radio.sent.len(), 2 * n);
        for (i, sent) in radio.sent.iter().enumerate() {
            assert_eq!(sent.channel, PAIRING_CHANNELS[(1 + i) % n]);
        }
    }

    #[test]
    fn test_oversized_frame_is_rejected() {
        let stop = AtomicBool::new(false);
        let mut link = test_link(&stop);

        let frame = [0u8; MAX_FRAME_LEN + 1];
        let result = block_on(link.send(Pipe::Pairing, &frame));
        assert_eq!(result, Err(LinkError::FrameTooLarge));
        assert!(link.radio_mut().sent.is_empty());
    }

    #[test]
    fn test_shutdown_aborts_send() {
        let stop = AtomicBool::new(false);
        let mut link = test_link(&stop);

        stop.store(true, Ordering::Release);
        let result = block_on(link.send(Pipe::Device, &[0x55]));
        assert_eq!(result, Err(LinkError::Shutdown));
        assert!(link.radio_mut().sent.is_empty());
    }

    #[test]
    fn test_ack_payload_is_returned() {
        let stop = AtomicBool::new(false);
        let mut link = test_link(&stop);
        link.radio_mut().push_response(&[0xe1, 0x1f, 0x01]);

        let ack = block_on(link.send(Pipe::Device, &[0x10])).unwrap();
        assert_eq!(ack.as_deref(), Some(&[0xe1, 0x1f, 0x01][..]));
    }
}
