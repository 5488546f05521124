//! Error definitions shared across library modules.
//! Per-packet failures (integrity, capacity, bus errors) are counted where
//! they happen and never propagated; only configuration requests, explicit
//! submits and host control requests surface an error to the caller.
use thiserror_no_std::Error;

//==================================================================================CONFIG_ERROR
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Reasons a bus configuration request is rejected. The bus keeps its
/// previous configuration in every case.
pub enum ConfigError {
    /// Bus index outside the configured bus set.
    #[error("Invalid bus index: {bus}")]
    InvalidBus { bus: u8 },
    /// Nominal (arbitration) speed not present in the supported table.
    #[error("Unsupported nominal speed: {speed} bit/s")]
    UnsupportedNominalSpeed { speed: u32 },
    /// Data-phase speed not present in the supported table.
    #[error("Unsupported data speed: {speed} bit/s")]
    UnsupportedDataSpeed { speed: u32 },
    /// CAN-FD, BRS or non-ISO mode requested on a classic CAN controller.
    #[error("CAN-FD is not supported by this controller")]
    FdNotSupported,
    /// With CAN-FD enabled the data phase cannot be slower than arbitration.
    #[error("Data speed {data} bit/s below nominal speed {nominal} bit/s")]
    DataSpeedBelowNominal { nominal: u32, data: u32 },
    /// Bit-rate switching needs CAN-FD and a data phase faster than arbitration.
    #[error("Bit-rate switching requires CAN-FD and a faster data phase")]
    InvalidBitRateSwitch,
    /// A forwarding entry pointing a bus at itself.
    #[error("Bus {bus} cannot forward to itself")]
    SelfForwarding { bus: u8 },
    /// The controller refused the configuration while applying it.
    #[error("Controller rejected the configuration")]
    HardwareRejected,
}

//==================================================================================PACKET_ERROR
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Failures while building or decoding a packet.
pub enum PacketError {
    /// Buffer shorter than the frame it is supposed to hold.
    #[error("Truncated frame -> needed: {needed}, available: {available}")]
    Truncated { needed: usize, available: usize },
    /// Payload length has no data length code (valid: 0-8, 12, 16, 20, 24, 32, 48, 64).
    #[error("Invalid payload length: {len}")]
    InvalidLength { len: usize },
    /// Standard identifier wider than 11 bits.
    #[error("Invalid identifier: {raw:#X}")]
    InvalidIdentifier { raw: u32 },
    /// Bus index does not fit the 3-bit wire field.
    #[error("Invalid bus index: {bus}")]
    InvalidBus { bus: u8 },
}

//==================================================================================SUBMIT_ERROR
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Reasons a packet handed to the engine for transmission is dropped.
pub enum SubmitError {
    /// The packet targets a bus the engine does not drive.
    #[error("Invalid bus index: {bus}")]
    InvalidBus { bus: u8 },
    /// The checksum byte does not match the packet contents.
    #[error("Checksum mismatch")]
    Checksum,
    /// CAN-FD frame submitted to a bus running classic CAN.
    #[error("CAN-FD frame on a classic CAN bus")]
    FdDisabled,
    /// The outbound queue of the bus is full.
    #[error("Outbound queue full")]
    QueueFull,
}

//==================================================================================HOST_ERROR
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Errors answered to a host control request.
pub enum HostError {
    /// No handler exists for the request code.
    #[error("No handler for request {request:#X}")]
    UnknownRequest { request: u8 },
    /// Parameter does not name a bus (or queue) of this device.
    #[error("Invalid bus index: {bus}")]
    InvalidBus { bus: u16 },
    /// Parameter outside the accepted range for the request.
    #[error("Invalid parameter {value} for request {request:#X}")]
    InvalidParameter { request: u8, value: u16 },
    /// The response buffer cannot hold the reply.
    #[error("Response buffer too small -> needed: {needed}, available: {available}")]
    ResponseTooSmall { needed: usize, available: usize },
    /// Configuration request rejected by the engine.
    #[error(transparent)]
    Config(#[from] ConfigError),
}
