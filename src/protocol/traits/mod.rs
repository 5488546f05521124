//! Capability interfaces the engine is written against. One implementation
//! exists per hardware variant; the engine never sees a concrete board type.
pub mod board;
pub mod can_hardware;
