//! Minimal abstraction over one CAN controller: a receive FIFO drained while
//! frames are pending, a single transmit mailbox, and the error status
//! register. Pin muxing, clocks and board revisions stay behind this trait.
use crate::protocol::config::{BusConfig, Capabilities};
use crate::protocol::health::ErrorStatus;
use crate::protocol::packet::RawFrame;

/// Outcome of the previous transmission, reported once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TxCompletion {
    /// The frame went out and was acknowledged.
    Delivered,
    /// Arbitration was lost or the transmission errored out.
    Failed,
}

/// Contract between the bus controller and one CAN peripheral.
///
/// Every method is called from interrupt context inside a short critical
/// section and must return without waiting on the bus.
pub trait CanHardware {
    type Error: core::fmt::Debug;

    /// Static capabilities of the controller.
    fn capabilities(&self) -> Capabilities;

    /// Program bit timings and modes. The configuration is already validated.
    ///
    /// Runs inside the bus critical section: write the registers and return.
    /// Implementations must not busy-wait on the controller (e.g. for an
    /// init-mode acknowledge); finish such handshakes from a later interrupt
    /// or report an error.
    fn apply_config(&mut self, config: &BusConfig) -> Result<(), Self::Error>;

    /// Abort whatever sits in the transmit mailbox.
    fn reset_mailboxes(&mut self);

    /// Next pending received frame, encoded with its checksum.
    fn receive(&mut self) -> Option<RawFrame>;

    /// Report (and clear) a receive FIFO overrun since the last call.
    fn take_rx_overrun(&mut self) -> bool;

    /// Result of the last transmission, if one completed since the last call.
    fn poll_tx_completion(&mut self) -> Option<TxCompletion>;

    /// `true` when a frame can be written to the mailbox.
    fn mailbox_free(&self) -> bool;

    /// Load `frame` into the mailbox and request transmission.
    fn send_raw(&mut self, frame: &RawFrame) -> Result<(), Self::Error>;

    /// Sample the error status register.
    fn error_status(&mut self) -> ErrorStatus;

    /// Clear a pending abort / error condition so the mailbox can retry.
    fn clear_abort(&mut self);

    /// Activity indicator (typically an LED pulse) after a received frame.
    fn signal_activity(&mut self) {}
}
