//! Mock radio for testing the link layer and the protocol logic above it
//! without hardware.

use heapless::Deque;

use super::transport::{AckPayload, EsbRadio, LinkError, Pipe, PipeAddress, Result};

/// Scripted outcome for one `transmit` call.
#[derive(Debug, Clone)]
pub enum TxScript {
    /// Acknowledged without a payload.
    Ack,
    /// Acknowledged with a response payload attached.
    AckPayload(AckPayload),
    /// Not acknowledged on this channel.
    Miss,
}

/// One logged transmission attempt.
#[derive(Debug, Clone)]
pub struct SentFrame {
    pub pipe: Pipe,
    pub channel: u8,
    pub frame: std::vec::Vec<u8>,
}

/// Scripted radio: consumes one [`TxScript`] entry per transmission; an
/// empty script acknowledges everything.
pub struct MockRadio {
    pub script: Deque<TxScript, 64>,
    /// Drop every frame regardless of the script.
    pub fail_all: bool,
    /// Log of every transmission attempt.
    pub sent: std::vec::Vec<SentFrame>,
    /// Number of `set_channel` calls.
    pub switch_count: usize,
    /// Addresses last programmed via `set_addresses`.
    pub addresses: Option<(PipeAddress, Option<PipeAddress>)>,
    channel: u8,
}

impl MockRadio {
    pub fn new() -> Self {
        Self {
            script: Deque::new(),
            fail_all: false,
            sent: std::vec::Vec::new(),
            switch_count: 0,
            addresses: None,
            channel: 0,
        }
    }

    /// Scripts a plain acknowledgment.
    pub fn push_ack(&mut self) {
        self.script.push_back(TxScript::Ack).unwrap();
    }

    /// Scripts an acknowledgment carrying `payload`.
    pub fn push_response(&mut self, payload: &[u8]) {
        let payload = AckPayload::from_slice(payload).unwrap();
        self.script.push_back(TxScript::AckPayload(payload)).unwrap();
    }

    /// Scripts a lost frame.
    pub fn push_miss(&mut self) {
        self.script.push_back(TxScript::Miss).unwrap();
    }

    /// Frames sent on `pipe`, in order.
    pub fn sent_on(&self, pipe: Pipe) -> std::vec::Vec<&SentFrame> {
        self.sent.iter().filter(|s| s.pipe == pipe).collect()
    }
}

impl Default for MockRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl EsbRadio for MockRadio {
    fn set_channel(&mut self, channel: u8) -> Result<()> {
        self.channel = channel;
        self.switch_count += 1;
        Ok(())
    }

    fn set_addresses(&mut self, pairing: &PipeAddress, device: Option<&PipeAddress>) -> Result<()> {
        self.addresses = Some((*pairing, device.copied()));
        Ok(())
    }

    async fn transmit(&mut self, pipe: Pipe, frame: &[u8]) -> Result<Option<AckPayload>> {
        self.sent.push(SentFrame {
            pipe,
            channel: self.channel,
            frame: frame.to_vec(),
        });
        if self.fail_all {
            return Err(LinkError::NotAcknowledged);
        }
        match self.script.pop_front() {
            None | Some(TxScript::Ack) => Ok(None),
            Some(TxScript::AckPayload(payload)) => Ok(Some(payload)),
            Some(TxScript::Miss) => Err(LinkError::NotAcknowledged),
        }
    }
}
