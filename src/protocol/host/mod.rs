//! Host-facing side of the engine, kept thin: USB bulk framing and the
//! control request dispatcher. The USB stack itself lives outside the crate
//! and only moves bytes in and out of these types.
pub mod bulk;
pub mod control;

/// Version of the device health packet layout.
pub const HEALTH_PACKET_VERSION: u8 = 1;
/// Version of the CAN packet wire layout.
pub const CAN_PACKET_VERSION: u8 = 4;
