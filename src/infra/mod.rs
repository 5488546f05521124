//! Building blocks used by every bus: the XOR checksum codec and the
//! fixed-capacity packet queues shared between interrupt and mainline code.
pub mod checksum;
pub mod queue;
