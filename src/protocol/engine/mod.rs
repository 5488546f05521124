//! The packet engine: owns every bus, the inbound host queue and the
//! forwarding table, and is the only component that knows about all buses.
//!
//! The engine is meant to live in a `static` and be shared between the bus
//! interrupts (`on_receive`, `on_transmit`, `on_error`), the periodic tick
//! (`service`) and the host-facing path (submit, drain, configuration).
use core::cell::Cell;
use core::pin::Pin;
use core::task::{Context, Poll};

use embassy_sync::blocking_mutex::{raw::RawMutex, Mutex};
use futures_util::Stream;

use crate::error::{ConfigError, SubmitError};
use crate::infra::checksum;
use crate::infra::queue::SharedQueue;
use crate::protocol::config::{BusConfig, Capabilities};
use crate::protocol::controller::{
    Backplane, BusController, BusSlot, OverflowCounters, ReceiveSummary, TransmitOutcome,
};
use crate::protocol::forwarding::ForwardingTable;
use crate::protocol::health::{BusHealthRecord, Counter, BUS_HEALTH_REPORT_LEN};
use crate::protocol::packet::Packet;
use crate::protocol::traits::can_hardware::CanHardware;

//==================================================================================QUEUE_TARGET
/// Queue named by a host "clear queue" request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum QueueTarget {
    /// The shared host-facing queue.
    Inbound,
    /// Outbound queue of one bus.
    Outbound(u8),
}

//==================================================================================PACKET_ENGINE
/// `N` buses, queues of `Q` packets each (`Q` a power of two).
pub struct PacketEngine<M: RawMutex, H, const N: usize, const Q: usize> {
    slots: [BusSlot<M, H, Q>; N],
    backplane: Backplane<M, Q>,
    forwarding: Mutex<M, Cell<ForwardingTable<N>>>,
}

impl<M: RawMutex, H: CanHardware, const N: usize, const Q: usize> PacketEngine<M, H, N, Q> {
    /// Take ownership of one hardware port per bus, index `i` driving bus `i`.
    /// Nothing is programmed until [`PacketEngine::init`].
    pub fn new(hardware: [H; N]) -> Self {
        Self {
            slots: hardware.map(BusSlot::new),
            backplane: Backplane::new(),
            forwarding: Mutex::new(Cell::new(ForwardingTable::new())),
        }
    }

    /// Program every bus with the default configuration.
    pub fn init(&self) -> Result<(), ConfigError> {
        for bus in 0..N as u8 {
            self.set_bus_config(bus, BusConfig::DEFAULT)?;
        }
        #[cfg(feature = "defmt")]
        defmt::info!("Packet engine up: {} buses, queue depth {}", N, Q);
        Ok(())
    }

    pub const fn bus_count(&self) -> usize {
        N
    }

    pub fn capabilities(&self, bus: u8) -> Option<Capabilities> {
        self.slot(bus).map(BusSlot::capabilities)
    }

    fn slot(&self, bus: u8) -> Option<&BusSlot<M, H, Q>> {
        self.slots.get(bus as usize)
    }

    /// Handlers of `bus`, with its forwarding destination resolved.
    pub fn controller(&self, bus: u8) -> Option<BusController<'_, M, H, Q>> {
        let slot = self.slot(bus)?;
        let forward = self
            .forwarding()
            .get(bus)
            .and_then(|dst| self.slot(dst).map(|dst_slot| (dst, dst_slot)));
        Some(BusController::new(bus, slot, &self.backplane, forward))
    }

    //==================================================================================INTERRUPTS
    /// Receive interrupt of `bus`. The bus' own mailbox is refilled afterwards
    /// so queued traffic keeps moving while the bus is busy receiving.
    pub fn on_receive(&self, bus: u8) -> ReceiveSummary {
        let Some(controller) = self.controller(bus) else {
            return ReceiveSummary::default();
        };
        let summary = controller.handle_receive();
        controller.handle_transmit();
        summary
    }

    /// Transmit-mailbox-empty interrupt of `bus`.
    pub fn on_transmit(&self, bus: u8) -> TransmitOutcome {
        self.controller(bus)
            .map_or(TransmitOutcome::Idle, |controller| controller.handle_transmit())
    }

    /// Error status interrupt of `bus`.
    pub fn on_error(&self, bus: u8) {
        if let Some(controller) = self.controller(bus) {
            controller.handle_error();
        }
    }

    /// Periodic tick: give every bus a chance to load its mailbox.
    pub fn service(&self) {
        for bus in 0..N as u8 {
            self.on_transmit(bus);
        }
    }

    //==================================================================================CONFIGURATION
    pub fn set_forwarding(&self, src: u8, dst: Option<u8>) -> Result<(), ConfigError> {
        self.forwarding.lock(|cell| {
            let mut table = cell.get();
            table.set(src, dst)?;
            cell.set(table);
            Ok(())
        })?;
        #[cfg(feature = "defmt")]
        defmt::info!("Forwarding {} -> {}", src, dst);
        Ok(())
    }

    pub fn forwarding(&self) -> ForwardingTable<N> {
        self.forwarding.lock(|cell| cell.get())
    }

    /// Reconfigure `bus`. Queued packets are preserved, the hardware mailbox is
    /// reset. A rejected request leaves the bus untouched.
    pub fn set_bus_config(&self, bus: u8, config: BusConfig) -> Result<(), ConfigError> {
        let controller = self.controller(bus).ok_or(ConfigError::InvalidBus { bus })?;
        controller.configure(config)?;
        #[cfg(feature = "defmt")]
        defmt::info!("Bus {} configured: {}", bus, config);
        controller.handle_transmit();
        Ok(())
    }

    pub fn bus_config(&self, bus: u8) -> Option<BusConfig> {
        self.slot(bus).map(BusSlot::config)
    }

    /// Read-modify-write of one bus configuration.
    pub fn update_bus_config(
        &self,
        bus: u8,
        update: impl FnOnce(BusConfig) -> BusConfig,
    ) -> Result<(), ConfigError> {
        let current = self.bus_config(bus).ok_or(ConfigError::InvalidBus { bus })?;
        self.set_bus_config(bus, update(current))
    }

    /// Loopback on every bus.
    pub fn set_loopback(&self, enabled: bool) -> Result<(), ConfigError> {
        self.update_all_buses(|config| config.with_loopback(enabled))
    }

    /// Listen-only mode on every bus.
    pub fn set_silent(&self, enabled: bool) -> Result<(), ConfigError> {
        self.update_all_buses(|config| config.with_silent(enabled))
    }

    /// Apply `update` to every bus, all or nothing: every new configuration
    /// is validated before the first bus is touched, and buses already
    /// reprogrammed are restored when a controller rejects its timings.
    fn update_all_buses(&self, update: impl Fn(BusConfig) -> BusConfig) -> Result<(), ConfigError> {
        let previous: [BusConfig; N] = core::array::from_fn(|bus| self.slots[bus].config());

        for (slot, config) in self.slots.iter().zip(previous) {
            update(config).validate(slot.capabilities())?;
        }

        for (bus, config) in previous.iter().enumerate() {
            if let Err(err) = self.set_bus_config(bus as u8, update(*config)) {
                for (undo, config) in previous.iter().enumerate().take(bus) {
                    // the rolled-back timings were running a moment ago
                    let _ = self.set_bus_config(undo as u8, *config);
                }
                return Err(err);
            }
        }
        Ok(())
    }

    //==================================================================================HOST_PATH
    /// Queue `packet` for transmission on `packet.bus`.
    pub fn try_submit_for_transmit(&self, packet: Packet) -> Result<(), SubmitError> {
        let slot = self
            .slot(packet.bus)
            .ok_or(SubmitError::InvalidBus { bus: packet.bus })?;

        if !checksum::verify(&packet) {
            slot.health().increment(Counter::TxChecksumError);
            return Err(SubmitError::Checksum);
        }

        if packet.needs_fd() && !slot.config().fd_enabled {
            return Err(SubmitError::FdDisabled);
        }

        if slot.outbound().push(packet) {
            Ok(())
        } else {
            self.backplane.count_tx_overflow();
            Err(SubmitError::QueueFull)
        }
    }

    /// Boolean form of [`PacketEngine::try_submit_for_transmit`].
    pub fn submit_for_transmit(&self, packet: Packet) -> bool {
        self.try_submit_for_transmit(packet).is_ok()
    }

    /// Pop up to `max_count` packets for the host. The iterator is lazy: each
    /// `next` pops one packet, and dropping it early leaves the rest queued.
    pub fn drain_inbound(&self, max_count: usize) -> InboundDrain<'_, M, Q> {
        InboundDrain {
            queue: self.backplane.inbound(),
            remaining: max_count,
        }
    }

    /// Endless stream of inbound packets for async consumers.
    pub fn inbound_stream(&self) -> InboundStream<'_, M, Q> {
        InboundStream {
            backplane: &self.backplane,
        }
    }

    pub fn reset_queue(&self, target: QueueTarget) -> Result<(), ConfigError> {
        match target {
            QueueTarget::Inbound => self.backplane.inbound().clear(),
            QueueTarget::Outbound(bus) => self
                .slot(bus)
                .ok_or(ConfigError::InvalidBus { bus })?
                .outbound()
                .clear(),
        }
        #[cfg(feature = "defmt")]
        defmt::debug!("Queue cleared: {}", target);
        Ok(())
    }

    /// Clear every queue, inbound and outbound.
    pub fn reset_communications(&self) {
        self.backplane.inbound().clear();
        for slot in &self.slots {
            slot.outbound().clear();
        }
    }

    //==================================================================================TELEMETRY
    pub fn snapshot_health(&self, bus: u8) -> Option<BusHealthRecord> {
        self.slot(bus).map(|slot| slot.health().snapshot())
    }

    /// Fixed-size health report of `bus`, with its configuration.
    pub fn health_report(&self, bus: u8) -> Option<[u8; BUS_HEALTH_REPORT_LEN]> {
        let slot = self.slot(bus)?;
        let config = slot.config();
        Some(slot.health().snapshot().encode_report(&config))
    }

    pub fn overflow_counters(&self) -> OverflowCounters {
        self.backplane.overflow_counters()
    }

    pub fn inbound_len(&self) -> usize {
        self.backplane.inbound().len()
    }

    pub fn outbound_len(&self, bus: u8) -> Option<usize> {
        self.slot(bus).map(|slot| slot.outbound().len())
    }

    /// Run `f` on the hardware of `bus`, inside its critical section.
    pub fn with_hardware<R>(&self, bus: u8, f: impl FnOnce(&mut H) -> R) -> Option<R> {
        self.slot(bus).map(|slot| slot.with_hw(f))
    }
}

//==================================================================================DRAIN
/// Lazy, bounded view over the inbound queue returned by
/// [`PacketEngine::drain_inbound`].
pub struct InboundDrain<'a, M: RawMutex, const Q: usize> {
    queue: &'a SharedQueue<M, Q>,
    remaining: usize,
}

impl<M: RawMutex, const Q: usize> Iterator for InboundDrain<'_, M, Q> {
    type Item = Packet;

    fn next(&mut self) -> Option<Packet> {
        if self.remaining == 0 {
            return None;
        }
        let packet = self.queue.pop()?;
        self.remaining -= 1;
        Some(packet)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}

//==================================================================================STREAM
/// Stream returned by [`PacketEngine::inbound_stream`]. Never terminates.
pub struct InboundStream<'a, M: RawMutex, const Q: usize> {
    backplane: &'a Backplane<M, Q>,
}

impl<M: RawMutex, const Q: usize> Stream for InboundStream<'_, M, Q> {
    type Item = Packet;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Packet>> {
        loop {
            if let Some(packet) = self.backplane.inbound().pop() {
                return Poll::Ready(Some(packet));
            }
            self.backplane.register_inbound_waker(cx.waker());
            // a push racing the registration is seen by this check
            if self.backplane.inbound().is_empty() {
                return Poll::Pending;
            }
        }
    }
}
