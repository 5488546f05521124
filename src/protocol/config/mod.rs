//! Per-bus configuration: bit timings, CAN-FD options and test modes.
//!
//! Configurations are plain values; they are validated against the supported
//! speed tables and the controller capabilities before the engine applies
//! them, so a rejected request never touches the running bus.
use crate::error::ConfigError;

//==================================================================================Constants
/// Supported nominal (arbitration phase) speeds, bit/s.
pub const NOMINAL_SPEEDS: [u32; 8] = [
    10_000, 20_000, 50_000, 100_000, 125_000, 250_000, 500_000, 1_000_000,
];

/// Supported CAN-FD data phase speeds, bit/s.
pub const DATA_SPEEDS: [u32; 11] = [
    10_000, 20_000, 50_000, 100_000, 125_000, 250_000, 500_000, 1_000_000, 2_000_000,
    5_000_000, 8_000_000,
];

//==================================================================================CAPABILITIES
/// What a controller can do. Board revisions differ by data, not by code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Capabilities {
    /// Controller speaks CAN-FD (data phase, BRS, non-ISO framing).
    pub fd: bool,
}

impl Capabilities {
    pub const CLASSIC: Capabilities = Capabilities { fd: false };
    pub const FD: Capabilities = Capabilities { fd: true };
}

//==================================================================================BUS_CONFIG
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Configuration of one bus. Lives until power-off; never persisted.
pub struct BusConfig {
    /// Arbitration phase speed, bit/s.
    pub nominal_speed: u32,
    /// CAN-FD data phase speed, bit/s. Only meaningful with `fd_enabled`.
    pub data_speed: u32,
    pub fd_enabled: bool,
    /// Bit-rate switching for the data phase.
    pub brs_enabled: bool,
    /// Bosch (non-ISO) CAN-FD framing.
    pub fd_non_iso: bool,
    /// Internal loopback, used for bench testing.
    pub loopback: bool,
    /// Listen-only: never ACK nor transmit.
    pub silent: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl BusConfig {
    /// 500 kbit/s classic CAN, 2 Mbit/s data phase prepared for FD.
    pub const DEFAULT: BusConfig = BusConfig {
        nominal_speed: 500_000,
        data_speed: 2_000_000,
        fd_enabled: false,
        brs_enabled: false,
        fd_non_iso: false,
        loopback: false,
        silent: false,
    };

    pub fn with_nominal_speed(mut self, speed: u32) -> Self {
        self.nominal_speed = speed;
        self
    }

    pub fn with_data_speed(mut self, speed: u32) -> Self {
        self.data_speed = speed;
        self
    }

    /// Set the data phase speed the way the host command does: CAN-FD is on
    /// when the data phase is at least as fast as arbitration, BRS when it is
    /// strictly faster.
    pub fn with_data_phase(mut self, speed: u32) -> Self {
        self.data_speed = speed;
        self.fd_enabled = speed >= self.nominal_speed;
        self.brs_enabled = speed > self.nominal_speed;
        self
    }

    pub fn with_fd(mut self, enabled: bool) -> Self {
        self.fd_enabled = enabled;
        self
    }

    pub fn with_brs(mut self, enabled: bool) -> Self {
        self.brs_enabled = enabled;
        self
    }

    pub fn with_non_iso(mut self, enabled: bool) -> Self {
        self.fd_non_iso = enabled;
        self
    }

    pub fn with_loopback(mut self, enabled: bool) -> Self {
        self.loopback = enabled;
        self
    }

    pub fn with_silent(mut self, enabled: bool) -> Self {
        self.silent = enabled;
        self
    }

    /// Check the configuration against the speed tables and `caps`.
    pub fn validate(&self, caps: Capabilities) -> Result<(), ConfigError> {
        if !NOMINAL_SPEEDS.contains(&self.nominal_speed) {
            return Err(ConfigError::UnsupportedNominalSpeed {
                speed: self.nominal_speed,
            });
        }

        if !caps.fd && (self.fd_enabled || self.brs_enabled || self.fd_non_iso) {
            return Err(ConfigError::FdNotSupported);
        }

        // data speed is checked with FD off too
        if !DATA_SPEEDS.contains(&self.data_speed) {
            return Err(ConfigError::UnsupportedDataSpeed {
                speed: self.data_speed,
            });
        }

        if self.fd_enabled {
            if self.data_speed < self.nominal_speed {
                return Err(ConfigError::DataSpeedBelowNominal {
                    nominal: self.nominal_speed,
                    data: self.data_speed,
                });
            }
        }

        if self.brs_enabled && (!self.fd_enabled || self.data_speed <= self.nominal_speed) {
            return Err(ConfigError::InvalidBitRateSwitch);
        }

        Ok(())
    }
}
