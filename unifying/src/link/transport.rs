//! Radio transport interface and link-level errors.

use core::fmt;

use heapless::Vec;

/// Maximum over-the-air payload size of the underlying radio.
pub const MAX_FRAME_LEN: usize = 32;

/// Logical 5-byte pipe address: one prefix byte followed by the 4-byte base
/// address.
pub type PipeAddress = [u8; 5];

/// Payload the receiver attached to an acknowledgment.
pub type AckPayload = Vec<u8, MAX_FRAME_LEN>;

/// Logical endpoints used by the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Pipe {
    /// Pipe 0, listening on the fixed pairing address.
    Pairing,
    /// Pipe 1, listening on the receiver-assigned device address.
    Device,
}

/// Errors that can occur on the radio link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkError {
    /// The receiver did not acknowledge the frame on the current channel.
    NotAcknowledged,

    /// Failover cycled the whole channel table twice without an
    /// acknowledgment.
    ChannelsExhausted,

    /// Frame exceeds the radio payload size.
    FrameTooLarge,

    /// The link was shut down while a transmission was in progress.
    Shutdown,

    /// Radio hardware failure.
    Hardware,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAcknowledged => write!(f, "Frame not acknowledged"),
            Self::ChannelsExhausted => write!(f, "Channel table exhausted"),
            Self::FrameTooLarge => write!(f, "Frame too large"),
            Self::Shutdown => write!(f, "Link shut down"),
            Self::Hardware => write!(f, "Hardware error"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for LinkError {}

/// Result type for link operations.
pub type Result<T> = core::result::Result<T, LinkError>;

/// Enhanced-ShockBurst-style radio capability used by the link layer.
///
/// Implementations perform a single transmission attempt, including the
/// radio's own short hardware retransmit window, and report whether the
/// frame was acknowledged. Channel failover is handled above this trait by
/// [`RadioLink`](super::RadioLink).
///
/// [`Pipe::Pairing`] carries the address programmed as `pairing`,
/// [`Pipe::Device`] the one programmed as `device`.
#[allow(async_fn_in_trait)]
pub trait EsbRadio {
    /// Tunes the radio to the given 2.4GHz channel number.
    fn set_channel(&mut self, channel: u8) -> Result<()>;

    /// Programs the pipe addresses.
    ///
    /// `device` is `None` until a receiver has assigned an address during
    /// pairing.
    fn set_addresses(&mut self, pairing: &PipeAddress, device: Option<&PipeAddress>) -> Result<()>;

    /// Transmits one frame and waits for the acknowledgment window.
    ///
    /// Returns the payload the receiver attached to its acknowledgment, if
    /// any. Returns [`LinkError::NotAcknowledged`] when the hardware
    /// retransmit window elapsed without an acknowledgment.
    async fn transmit(&mut self, pipe: Pipe, frame: &[u8]) -> Result<Option<AckPayload>>;
}
