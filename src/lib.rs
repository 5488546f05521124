//! `canbridge` library: the packet engine of a firmware bridging several
//! CAN / CAN-FD buses to a USB host. It exposes the infrastructure modules
//! (checksum, interrupt-safe bounded queues) and the protocol logic (packets,
//! bus health, bus configuration, per-bus controllers, forwarding, the engine
//! orchestrating all buses, and the host-facing framing).
#![no_std]
//==================================================================================
/// Configuration, integrity, capacity and host-protocol errors.
pub mod error;
/// Building blocks shared by every bus: checksum codec and bounded queues.
pub mod infra;
/// Packet representation, bus health, bus controllers, forwarding, the packet
/// engine and the host protocol.
pub mod protocol;
//==================================================================================
