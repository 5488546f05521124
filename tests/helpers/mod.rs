/// Test doubles standing in for the CAN controllers and the board.
use canbridge::protocol::config::{BusConfig, Capabilities};
use canbridge::protocol::health::ErrorStatus;
use canbridge::protocol::packet::{Packet, RawFrame};
use canbridge::protocol::traits::board::{Board, ResetTarget};
use canbridge::protocol::traits::can_hardware::{CanHardware, TxCompletion};
use embedded_can::{Id, StandardId};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FakeError;

#[derive(Debug, Default)]
#[allow(dead_code)]
/// In-memory controller: frames to receive are queued by the test, sent
/// frames are logged.
pub struct FakeCan {
    pub caps: Capabilities,
    pub rx: VecDeque<RawFrame>,
    pub sent: Vec<RawFrame>,
    pub status: ErrorStatus,
    pub overrun: bool,
    /// Completion reported on the next poll.
    pub completion: Option<TxCompletion>,
    /// Completion queued automatically after each send; `None` keeps the
    /// mailbox busy until the test completes it.
    pub auto_complete: Option<TxCompletion>,
    pub mailbox_busy: bool,
    pub reject_send: bool,
    pub reject_config: bool,
    pub applied: Vec<BusConfig>,
    pub mailbox_resets: usize,
    pub aborts_cleared: usize,
    pub activity: usize,
}

#[allow(dead_code)]
impl FakeCan {
    pub fn classic() -> Self {
        Self {
            caps: Capabilities::CLASSIC,
            auto_complete: Some(TxCompletion::Delivered),
            ..Self::default()
        }
    }

    pub fn fd() -> Self {
        Self {
            caps: Capabilities::FD,
            ..Self::classic()
        }
    }

    /// Queue `packet` as if it had arrived on the wire.
    pub fn inject(&mut self, packet: &Packet) {
        self.rx.push_back(RawFrame::from_packet(packet));
    }

    /// Free the mailbox and report `completion` on the next poll.
    pub fn complete(&mut self, completion: TxCompletion) {
        self.mailbox_busy = false;
        self.completion = Some(completion);
    }

    pub fn sent_packets(&self) -> Vec<Packet> {
        self.sent
            .iter()
            .map(|frame| frame.to_packet().expect("sent frames decode"))
            .collect()
    }
}

impl CanHardware for FakeCan {
    type Error = FakeError;

    fn capabilities(&self) -> Capabilities {
        self.caps
    }

    fn apply_config(&mut self, config: &BusConfig) -> Result<(), Self::Error> {
        if self.reject_config {
            return Err(FakeError);
        }
        self.applied.push(*config);
        Ok(())
    }

    fn reset_mailboxes(&mut self) {
        self.mailbox_resets += 1;
        self.mailbox_busy = false;
        self.completion = None;
    }

    fn receive(&mut self) -> Option<RawFrame> {
        self.rx.pop_front()
    }

    fn take_rx_overrun(&mut self) -> bool {
        std::mem::take(&mut self.overrun)
    }

    fn poll_tx_completion(&mut self) -> Option<TxCompletion> {
        self.completion.take()
    }

    fn mailbox_free(&self) -> bool {
        !self.mailbox_busy
    }

    fn send_raw(&mut self, frame: &RawFrame) -> Result<(), Self::Error> {
        if self.reject_send {
            return Err(FakeError);
        }
        self.sent.push(*frame);
        match self.auto_complete {
            Some(completion) => self.completion = Some(completion),
            None => self.mailbox_busy = true,
        }
        Ok(())
    }

    fn error_status(&mut self) -> ErrorStatus {
        self.status
    }

    fn clear_abort(&mut self) {
        self.aborts_cleared += 1;
    }

    fn signal_activity(&mut self) {
        self.activity += 1;
    }
}

#[derive(Debug, Default)]
#[allow(dead_code)]
/// Board recording reset requests instead of resetting.
pub struct FakeBoard {
    pub hw_type: u8,
    pub resets: Vec<ResetTarget>,
}

impl Board for FakeBoard {
    fn hw_type(&self) -> u8 {
        self.hw_type
    }

    fn request_reset(&mut self, target: ResetTarget) {
        self.resets.push(target);
    }
}

#[allow(dead_code)]
/// Sealed standard-identifier packet.
pub fn std_packet(id: u16, bus: u8, data: &[u8]) -> Packet {
    Packet::new(Id::Standard(StandardId::new(id).expect("11-bit id")), bus, data)
        .expect("valid packet")
}

#[allow(dead_code)]
pub fn std_id(packet: &Packet) -> u16 {
    match packet.id {
        Id::Standard(id) => id.as_raw(),
        Id::Extended(_) => panic!("expected a standard identifier"),
    }
}
