//! Protocol side of the bridge: packet representation, bus health and
//! configuration, the per-bus controllers, forwarding, the packet engine and
//! the host-facing framing.
pub mod config;
pub mod controller;
pub mod engine;
pub mod forwarding;
pub mod health;
pub mod host;
pub mod packet;
pub mod traits;
