//! Integrity byte carried by every packet.
//!
//! The checksum is chosen so that the exclusive-OR of every byte of the encoded
//! frame (five header bytes, the checksum byte itself, and the payload) is zero.
//! [`compute`] produces that byte, [`verify`] accepts a packet iff the fold over
//! its bytes including the carried checksum is zero.
use crate::protocol::packet::Packet;

//==================================================================================BYTES
/// XOR of every byte in `bytes`.
#[inline]
pub fn xor_fold(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

/// Accept an encoded frame iff its bytes XOR to zero.
#[inline]
pub fn verify_wire(frame: &[u8]) -> bool {
    xor_fold(frame) == 0
}

//==================================================================================PACKET
/// Checksum byte for `packet`, ignoring whatever checksum it currently carries.
pub fn compute(packet: &Packet) -> u8 {
    xor_fold(&packet.header_bytes()) ^ xor_fold(packet.data())
}

/// `true` when the checksum carried by `packet` matches its contents.
pub fn verify(packet: &Packet) -> bool {
    compute(packet) ^ packet.checksum() == 0
}

/// Store a freshly computed checksum into `packet`.
pub fn seal(packet: &mut Packet) {
    let checksum = compute(packet);
    packet.set_checksum(checksum);
}
