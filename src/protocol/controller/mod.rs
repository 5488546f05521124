//! Per-bus controller: receive, transmit and error handlers run from the
//! bus interrupts.
//!
//! A [`BusSlot`] holds everything owned by one bus (hardware port, outbound
//! queue, health tracker). A [`BusController`] is a short-lived view over a
//! slot plus the engine-wide [`Backplane`] (inbound host queue, overflow
//! counters) and the resolved forwarding target; the engine builds one per
//! interrupt.
//!
//! Locking discipline: each hardware access, queue operation and health
//! update is its own critical section. Checksums are computed and verified
//! between them, never while interrupts are masked.
use core::cell::{Cell, RefCell};
use core::task::Waker;

use embassy_sync::blocking_mutex::{raw::RawMutex, Mutex};
use embassy_sync::waitqueue::WakerRegistration;

use crate::error::ConfigError;
use crate::infra::checksum;
use crate::infra::queue::SharedQueue;
use crate::protocol::config::{BusConfig, Capabilities};
use crate::protocol::health::{Counter, HealthTracker};
use crate::protocol::packet::{Packet, RawFrame};
use crate::protocol::traits::can_hardware::{CanHardware, TxCompletion};

//==================================================================================BACKPLANE
/// Engine-wide overflow counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OverflowCounters {
    /// Packets lost because the inbound host queue was full.
    pub rx_buffer_overflow: u32,
    /// Packets lost because an outbound bus queue was full.
    pub tx_buffer_overflow: u32,
}

/// State shared by every bus: the inbound host queue, the waker of its async
/// consumer and the overflow counters.
pub struct Backplane<M: RawMutex, const Q: usize> {
    inbound: SharedQueue<M, Q>,
    inbound_waker: Mutex<M, RefCell<WakerRegistration>>,
    overflow: Mutex<M, Cell<OverflowCounters>>,
}

impl<M: RawMutex, const Q: usize> Default for Backplane<M, Q> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RawMutex, const Q: usize> Backplane<M, Q> {
    pub const fn new() -> Self {
        Self {
            inbound: SharedQueue::new(),
            inbound_waker: Mutex::new(RefCell::new(WakerRegistration::new())),
            overflow: Mutex::new(Cell::new(OverflowCounters {
                rx_buffer_overflow: 0,
                tx_buffer_overflow: 0,
            })),
        }
    }

    pub fn inbound(&self) -> &SharedQueue<M, Q> {
        &self.inbound
    }

    /// Wake `waker` on the next inbound push.
    pub(crate) fn register_inbound_waker(&self, waker: &Waker) {
        self.inbound_waker
            .lock(|cell| cell.borrow_mut().register(waker));
    }

    /// Queue a packet for the host, counting it when the queue is full.
    pub fn push_inbound(&self, packet: Packet) -> bool {
        if self.inbound.push(packet) {
            self.inbound_waker.lock(|cell| cell.borrow_mut().wake());
            true
        } else {
            self.count_rx_overflow();
            false
        }
    }

    pub fn count_rx_overflow(&self) {
        self.overflow.lock(|cell| {
            let mut counters = cell.get();
            counters.rx_buffer_overflow = counters.rx_buffer_overflow.wrapping_add(1);
            cell.set(counters);
        });
    }

    pub fn count_tx_overflow(&self) {
        self.overflow.lock(|cell| {
            let mut counters = cell.get();
            counters.tx_buffer_overflow = counters.tx_buffer_overflow.wrapping_add(1);
            cell.set(counters);
        });
    }

    pub fn overflow_counters(&self) -> OverflowCounters {
        self.overflow.lock(|cell| cell.get())
    }
}

//==================================================================================BUS_SLOT
/// Hardware side of a bus: the peripheral, its configuration and the packet
/// currently sitting in the transmit mailbox.
pub struct BusPort<H> {
    hw: H,
    config: BusConfig,
    in_flight: Option<Packet>,
}

/// Everything owned by one bus.
pub struct BusSlot<M: RawMutex, H, const Q: usize> {
    port: Mutex<M, RefCell<BusPort<H>>>,
    outbound: SharedQueue<M, Q>,
    health: HealthTracker<M>,
}

impl<M: RawMutex, H: CanHardware, const Q: usize> BusSlot<M, H, Q> {
    pub fn new(hw: H) -> Self {
        Self {
            port: Mutex::new(RefCell::new(BusPort {
                hw,
                config: BusConfig::DEFAULT,
                in_flight: None,
            })),
            outbound: SharedQueue::new(),
            health: HealthTracker::new(),
        }
    }

    pub fn outbound(&self) -> &SharedQueue<M, Q> {
        &self.outbound
    }

    pub fn health(&self) -> &HealthTracker<M> {
        &self.health
    }

    pub fn config(&self) -> BusConfig {
        self.with_port(|port| port.config)
    }

    pub fn capabilities(&self) -> Capabilities {
        self.with_port(|port| port.hw.capabilities())
    }

    /// Run `f` on the hardware inside a critical section.
    pub fn with_hw<R>(&self, f: impl FnOnce(&mut H) -> R) -> R {
        self.with_port(|port| f(&mut port.hw))
    }

    fn with_port<R>(&self, f: impl FnOnce(&mut BusPort<H>) -> R) -> R {
        self.port.lock(|cell| f(&mut cell.borrow_mut()))
    }
}

//==================================================================================BUS_CONTROLLER
/// Result of one receive interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ReceiveSummary {
    /// Frames drained from the hardware FIFO.
    pub drained: usize,
    /// Frames dropped on integrity errors.
    pub dropped: usize,
    /// Copies queued on the forwarding destination.
    pub forwarded: usize,
}

/// What the transmit handler did with the mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransmitOutcome {
    /// Nothing queued.
    Idle,
    /// Mailbox still occupied by the previous frame.
    Busy,
    /// A packet was written to the mailbox.
    Sent,
    /// The popped packet failed its checksum and was dropped.
    ChecksumDropped,
    /// The controller refused the frame; it is counted as lost.
    Lost,
}

/// Handlers of one bus, borrowed from the engine for the duration of an interrupt.
pub struct BusController<'a, M: RawMutex, H, const Q: usize> {
    bus: u8,
    slot: &'a BusSlot<M, H, Q>,
    backplane: &'a Backplane<M, Q>,
    forward: Option<(u8, &'a BusSlot<M, H, Q>)>,
}

impl<'a, M: RawMutex, H: CanHardware, const Q: usize> BusController<'a, M, H, Q> {
    pub fn new(
        bus: u8,
        slot: &'a BusSlot<M, H, Q>,
        backplane: &'a Backplane<M, Q>,
        forward: Option<(u8, &'a BusSlot<M, H, Q>)>,
    ) -> Self {
        Self {
            bus,
            slot,
            backplane,
            forward,
        }
    }

    pub fn bus(&self) -> u8 {
        self.bus
    }

    /// Validate `config` and program it. Queued packets are kept, the mailbox
    /// is reset. On failure the previous configuration stays in place.
    ///
    /// Validation runs outside the critical section; only the mailbox reset
    /// and the register writes of [`CanHardware::apply_config`] run inside it.
    pub fn configure(&self, config: BusConfig) -> Result<(), ConfigError> {
        config.validate(self.slot.capabilities())?;

        self.slot.with_port(|port| {
            let previous = port.config;
            port.hw.reset_mailboxes();
            port.in_flight = None;
            match port.hw.apply_config(&config) {
                Ok(()) => {
                    port.config = config;
                    Ok(())
                }
                Err(_err) => {
                    #[cfg(feature = "defmt")]
                    defmt::error!("Controller rejected config: {}", defmt::Debug2Format(&_err));
                    // best effort: the controller keeps running the old timings
                    let _ = port.hw.apply_config(&previous);
                    Err(ConfigError::HardwareRejected)
                }
            }
        })
    }

    //==================================================================================RECEIVE
    /// "Message pending" interrupt: drain every frame the FIFO holds.
    pub fn handle_receive(&self) -> ReceiveSummary {
        let mut summary = ReceiveSummary::default();

        if self.slot.with_hw(|hw| hw.take_rx_overrun()) {
            #[cfg(feature = "defmt")]
            defmt::warn!("Bus {}: receive FIFO overrun", self.bus);
            self.slot.health.increment(Counter::RxLost);
        }

        while let Some(raw) = self.slot.with_hw(|hw| hw.receive()) {
            summary.drained += 1;
            match self.accept(&raw) {
                Some(packet) => {
                    if self.deliver(packet) {
                        summary.forwarded += 1;
                    }
                    self.slot.with_hw(|hw| hw.signal_activity());
                }
                None => summary.dropped += 1,
            }
            self.sample();
        }

        summary
    }

    /// Decode and verify one received frame. Frames failing the checksum, or
    /// tagged with another bus, are counted and dropped.
    fn accept(&self, raw: &RawFrame) -> Option<Packet> {
        match raw.to_packet() {
            Ok(packet) if checksum::verify(&packet) && packet.bus == self.bus => Some(packet),
            _ => {
                #[cfg(feature = "defmt")]
                defmt::debug!("Bus {}: dropping corrupted frame", self.bus);
                self.slot.health.increment(Counter::RxChecksumError);
                None
            }
        }
    }

    /// Forward `packet` if this bus has a destination, then queue it for the
    /// host. Returns `true` when a forwarded copy was queued.
    fn deliver(&self, packet: Packet) -> bool {
        self.slot.health.increment(Counter::Rx);

        let mut forwarded = false;
        if let Some((dst, dst_slot)) = self.forward {
            let copy = packet.retargeted(dst);
            if copy.needs_fd() && !dst_slot.config().fd_enabled {
                #[cfg(feature = "defmt")]
                defmt::debug!("Bus {}: CAN-FD frame not forwarded to classic bus {}", self.bus, dst);
                dst_slot.health.increment(Counter::TxLost);
            } else if dst_slot.outbound.push(copy) {
                self.slot.health.increment(Counter::Forwarded);
                forwarded = true;
            } else {
                self.backplane.count_tx_overflow();
            }
        }

        self.backplane.push_inbound(packet);
        forwarded
    }

    //==================================================================================TRANSMIT
    /// "Mailbox free" interrupt: reconcile the previous transmission, then load
    /// the next queued packet when the mailbox is free.
    pub fn handle_transmit(&self) -> TransmitOutcome {
        let (completion, in_flight) = self.slot.with_port(|port| {
            let completion = port.hw.poll_tx_completion();
            let in_flight = completion.and_then(|_| port.in_flight.take());
            (completion, in_flight)
        });

        match completion {
            Some(TxCompletion::Delivered) => {
                if let Some(sent) = in_flight {
                    self.backplane.push_inbound(sent.confirmation());
                }
            }
            Some(TxCompletion::Failed) => {
                #[cfg(feature = "defmt")]
                defmt::debug!("Bus {}: transmission lost", self.bus);
                self.slot.health.increment(Counter::TxLost);
            }
            None => {}
        }

        let outcome = self.load_mailbox();
        self.sample();
        outcome
    }

    fn load_mailbox(&self) -> TransmitOutcome {
        if !self.slot.with_hw(|hw| hw.mailbox_free()) {
            return TransmitOutcome::Busy;
        }

        let Some(mut packet) = self.slot.outbound.pop() else {
            return TransmitOutcome::Idle;
        };

        if !checksum::verify(&packet) {
            #[cfg(feature = "defmt")]
            defmt::warn!("Bus {}: outbound checksum mismatch", self.bus);
            self.slot.health.increment(Counter::TxChecksumError);
            return TransmitOutcome::ChecksumDropped;
        }

        packet.bus = self.bus;
        checksum::seal(&mut packet);
        let frame = RawFrame::from_packet(&packet);

        let sent = self.slot.with_port(|port| match port.hw.send_raw(&frame) {
            Ok(()) => {
                port.in_flight = Some(packet);
                true
            }
            Err(_) => false,
        });

        if sent {
            self.slot.health.increment(Counter::Tx);
            TransmitOutcome::Sent
        } else {
            self.slot.health.increment(Counter::TxLost);
            TransmitOutcome::Lost
        }
    }

    //==================================================================================ERROR
    /// Error status interrupt.
    pub fn handle_error(&self) {
        let status = self.slot.with_hw(|hw| {
            let status = hw.error_status();
            hw.clear_abort();
            status
        });
        self.slot.health.error_interrupt(status);
    }

    fn sample(&self) {
        let status = self.slot.with_hw(|hw| hw.error_status());
        self.slot.health.sample(status);
    }
}
