//! Per-bus health tracking.
//!
//! The record is purely derived from the controller: every receive, every
//! transmit-complete poll and every error interrupt takes exactly one
//! [`ErrorStatus`] sample. Lifetime counters only ever grow; `bus_off`,
//! `error_warning` and `error_passive` mirror the instantaneous hardware state.
//! The firmware never forces bus-off recovery, it only reports it.
use core::cell::RefCell;

use embassy_sync::blocking_mutex::{raw::RawMutex, Mutex};

use crate::protocol::config::BusConfig;

//==================================================================================Constants
/// Version of the binary bus health layout served to the host.
pub const BUS_HEALTH_PACKET_VERSION: u8 = 4;
/// Size of the encoded bus health report.
pub const BUS_HEALTH_REPORT_LEN: usize = 48;

//==================================================================================LAST_ERROR_CODE
/// CAN protocol error classification (LEC field).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum LastErrorCode {
    #[default]
    NoError = 0,
    Stuff = 1,
    Form = 2,
    Ack = 3,
    Bit1 = 4,
    Bit0 = 5,
    Crc = 6,
    /// Nothing happened since the controller last reported a code.
    NoChange = 7,
}

impl LastErrorCode {
    /// Decode the three LEC bits (upper bits are ignored).
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0x7 {
            0 => Self::NoError,
            1 => Self::Stuff,
            2 => Self::Form,
            3 => Self::Ack,
            4 => Self::Bit1,
            5 => Self::Bit0,
            6 => Self::Crc,
            _ => Self::NoChange,
        }
    }

    /// Codes worth latching into the `last_stored_*` fields.
    pub const fn is_significant(self) -> bool {
        !matches!(self, Self::NoError | Self::NoChange)
    }
}

//==================================================================================ERROR_STATUS
/// One sample of the controller error state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ErrorStatus {
    pub bus_off: bool,
    pub error_warning: bool,
    pub error_passive: bool,
    pub last_error: LastErrorCode,
    /// Data-phase error code, CAN-FD controllers only.
    pub last_data_error: LastErrorCode,
    /// 0-127 in practice.
    pub receive_error_count: u8,
    pub transmit_error_count: u8,
}

impl ErrorStatus {
    pub const EWGF: u32 = 1 << 0;
    pub const EPVF: u32 = 1 << 1;
    pub const BOFF: u32 = 1 << 2;
    pub const LEC_POS: u32 = 4;
    pub const TEC_POS: u32 = 16;
    pub const REC_POS: u32 = 24;

    /// Decode a bxCAN style error status register.
    pub const fn from_esr(esr: u32) -> Self {
        Self {
            bus_off: esr & Self::BOFF != 0,
            error_warning: esr & Self::EWGF != 0,
            error_passive: esr & Self::EPVF != 0,
            last_error: LastErrorCode::from_bits((esr >> Self::LEC_POS) as u8),
            last_data_error: LastErrorCode::NoError,
            receive_error_count: (esr >> Self::REC_POS) as u8,
            transmit_error_count: (esr >> Self::TEC_POS) as u8,
        }
    }

    /// Most severe state the flags describe.
    pub const fn state(&self) -> BusState {
        if self.bus_off {
            BusState::BusOff
        } else if self.error_passive {
            BusState::ErrorPassive
        } else if self.error_warning {
            BusState::ErrorWarning
        } else {
            BusState::Normal
        }
    }
}

/// `NORMAL -> ERROR_WARNING -> ERROR_PASSIVE -> BUS_OFF`, recovered by hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusState {
    Normal,
    ErrorWarning,
    ErrorPassive,
    BusOff,
}

//==================================================================================RECORD
/// Health counters of one bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusHealthRecord {
    pub bus_off: bool,
    pub bus_off_cnt: u32,
    pub error_warning: bool,
    pub error_passive: bool,
    pub last_error: LastErrorCode,
    pub last_stored_error: LastErrorCode,
    pub last_data_error: LastErrorCode,
    pub last_data_stored_error: LastErrorCode,
    pub receive_error_cnt: u8,
    pub transmit_error_cnt: u8,
    /// Error interrupts taken.
    pub total_error_cnt: u32,
    /// Transmissions lost to arbitration or errors.
    pub total_tx_lost_cnt: u32,
    /// Frames lost to receive FIFO overrun.
    pub total_rx_lost_cnt: u32,
    pub total_tx_cnt: u32,
    pub total_rx_cnt: u32,
    /// Frames forwarded from this bus to another one.
    pub total_fwd_cnt: u32,
    /// Outbound packets dropped because their checksum did not match.
    pub total_tx_checksum_error_cnt: u32,
    /// Received frames dropped because their checksum did not match.
    pub total_rx_checksum_error_cnt: u32,
}

/// Lifetime counters a controller bumps while moving packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Counter {
    RxLost,
    TxLost,
    Rx,
    Tx,
    Forwarded,
    TxChecksumError,
    RxChecksumError,
}

impl BusHealthRecord {
    pub const fn new() -> Self {
        Self {
            bus_off: false,
            bus_off_cnt: 0,
            error_warning: false,
            error_passive: false,
            last_error: LastErrorCode::NoError,
            last_stored_error: LastErrorCode::NoError,
            last_data_error: LastErrorCode::NoError,
            last_data_stored_error: LastErrorCode::NoError,
            receive_error_cnt: 0,
            transmit_error_cnt: 0,
            total_error_cnt: 0,
            total_tx_lost_cnt: 0,
            total_rx_lost_cnt: 0,
            total_tx_cnt: 0,
            total_rx_cnt: 0,
            total_fwd_cnt: 0,
            total_tx_checksum_error_cnt: 0,
            total_rx_checksum_error_cnt: 0,
        }
    }

    pub fn state(&self) -> BusState {
        ErrorStatus {
            bus_off: self.bus_off,
            error_warning: self.error_warning,
            error_passive: self.error_passive,
            ..ErrorStatus::default()
        }
        .state()
    }

    /// Fold one status sample into the record.
    pub fn apply_sample(&mut self, status: &ErrorStatus) {
        if status.bus_off && !self.bus_off {
            self.bus_off_cnt = self.bus_off_cnt.wrapping_add(1);
        }
        self.bus_off = status.bus_off;
        self.error_warning = status.error_warning;
        self.error_passive = status.error_passive;

        self.last_error = status.last_error;
        if status.last_error.is_significant() {
            self.last_stored_error = status.last_error;
        }
        self.last_data_error = status.last_data_error;
        if status.last_data_error.is_significant() {
            self.last_data_stored_error = status.last_data_error;
        }

        self.receive_error_cnt = status.receive_error_count;
        self.transmit_error_cnt = status.transmit_error_count;
    }

    pub fn increment(&mut self, counter: Counter) {
        let field = match counter {
            Counter::RxLost => &mut self.total_rx_lost_cnt,
            Counter::TxLost => &mut self.total_tx_lost_cnt,
            Counter::Rx => &mut self.total_rx_cnt,
            Counter::Tx => &mut self.total_tx_cnt,
            Counter::Forwarded => &mut self.total_fwd_cnt,
            Counter::TxChecksumError => &mut self.total_tx_checksum_error_cnt,
            Counter::RxChecksumError => &mut self.total_rx_checksum_error_cnt,
        };
        *field = field.wrapping_add(1);
    }

    /// Encode the record and the static bus configuration in the packed
    /// little-endian layout read by the host (`<BIBBBBBBBBIIIIIIIHHBBB`).
    /// Speeds are reported in kbit/s.
    pub fn encode_report(&self, config: &BusConfig) -> [u8; BUS_HEALTH_REPORT_LEN] {
        let mut out = [0u8; BUS_HEALTH_REPORT_LEN];
        let mut cursor = 0;
        let mut put = |bytes: &[u8]| {
            out[cursor..cursor + bytes.len()].copy_from_slice(bytes);
            cursor += bytes.len();
        };

        put(&[self.bus_off as u8]);
        put(&self.bus_off_cnt.to_le_bytes());
        put(&[
            self.error_warning as u8,
            self.error_passive as u8,
            self.last_error as u8,
            self.last_stored_error as u8,
            self.last_data_error as u8,
            self.last_data_stored_error as u8,
            self.receive_error_cnt,
            self.transmit_error_cnt,
        ]);
        for counter in [
            self.total_error_cnt,
            self.total_tx_lost_cnt,
            self.total_rx_lost_cnt,
            self.total_tx_cnt,
            self.total_rx_cnt,
            self.total_fwd_cnt,
            self.total_tx_checksum_error_cnt,
        ] {
            put(&counter.to_le_bytes());
        }
        put(&speed_kbps(config.nominal_speed).to_le_bytes());
        put(&speed_kbps(config.data_speed).to_le_bytes());
        put(&[
            config.fd_enabled as u8,
            config.brs_enabled as u8,
            config.fd_non_iso as u8,
        ]);
        out
    }
}

fn speed_kbps(speed: u32) -> u16 {
    u16::try_from(speed / 1000).unwrap_or(u16::MAX)
}

//==================================================================================TRACKER
/// [`BusHealthRecord`] shared between the bus interrupt handlers and the
/// telemetry path. Every update and every snapshot is one critical section.
pub struct HealthTracker<M: RawMutex> {
    record: Mutex<M, RefCell<BusHealthRecord>>,
}

impl<M: RawMutex> Default for HealthTracker<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RawMutex> HealthTracker<M> {
    pub const fn new() -> Self {
        Self {
            record: Mutex::new(RefCell::new(BusHealthRecord::new())),
        }
    }

    /// Periodic sample taken on every receive and transmit-complete poll.
    pub fn sample(&self, status: ErrorStatus) {
        self.update(status, false);
    }

    /// Error interrupt: count it and take the sample that goes with it.
    pub fn error_interrupt(&self, status: ErrorStatus) {
        self.update(status, true);
    }

    fn update(&self, status: ErrorStatus, error_irq: bool) {
        let entered_bus_off = self.record.lock(|cell| {
            let mut record = cell.borrow_mut();
            if error_irq {
                record.total_error_cnt = record.total_error_cnt.wrapping_add(1);
            }
            let was_bus_off = record.bus_off;
            record.apply_sample(&status);
            !was_bus_off && record.bus_off
        });

        if entered_bus_off {
            #[cfg(feature = "defmt")]
            defmt::warn!("Bus entered bus-off: TEC={}", status.transmit_error_count);
        }
    }

    pub fn increment(&self, counter: Counter) {
        self.record
            .lock(|cell| cell.borrow_mut().increment(counter));
    }

    /// Copy of the current record; never mutates.
    pub fn snapshot(&self) -> BusHealthRecord {
        self.record.lock(|cell| *cell.borrow())
    }
}
