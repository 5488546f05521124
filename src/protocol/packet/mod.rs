//! In-memory and wire representation of one CAN or CAN-FD frame.
//!
//! Wire layout (bit-exact with the host library):
//!
//! ```text
//! byte 0      dlc << 4 | bus << 1 | fd
//! bytes 1..5  u32 LE: id << 3 | extended << 2 | returned << 1 | rejected
//! byte 5      checksum (XOR of bytes 0..5 and the payload)
//! bytes 6..   payload, DLC_TO_LEN[dlc] bytes
//! ```
use embedded_can::{ExtendedId, Frame, Id, StandardId};

use crate::error::PacketError;
use crate::infra::checksum;

//==================================================================================Constants
/// Payload capacity of a packet (CAN-FD maximum).
pub const MAX_DATA_LEN: usize = 64;
/// Largest classic CAN payload.
pub const CLASSIC_MAX_DATA_LEN: usize = 8;
/// Header size on the wire, checksum included.
pub const HEADER_LEN: usize = 6;
/// Largest encoded frame.
pub const MAX_FRAME_LEN: usize = HEADER_LEN + MAX_DATA_LEN;
/// Highest bus index representable in the 3-bit wire field.
pub const MAX_BUS_INDEX: u8 = 7;
/// Payload length for each data length code.
pub const DLC_TO_LEN: [u8; 16] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 12, 16, 20, 24, 32, 48, 64];

/// Data length code for an exact payload length.
pub fn len_to_dlc(len: usize) -> Option<u8> {
    DLC_TO_LEN
        .iter()
        .position(|&l| l as usize == len)
        .map(|dlc| dlc as u8)
}

//==================================================================================PACKET
/// One frame travelling through the engine. Packets have no identity beyond a
/// single queue traversal: they are copied in and out of queues, hardware
/// registers and USB buffers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Packet {
    /// 11-bit standard or 29-bit extended identifier.
    pub id: Id,
    /// Bus the packet was received on or is destined for.
    pub bus: u8,
    /// CAN-FD frame format.
    pub fd: bool,
    /// Echo of a frame this device transmitted successfully.
    pub returned: bool,
    /// Transmission was refused or failed.
    pub rejected: bool,
    dlc: u8,
    data: [u8; MAX_DATA_LEN],
    checksum: u8,
}

impl Packet {
    /// Zeroed placeholder used to fill queue storage.
    pub const EMPTY: Packet = Packet {
        id: Id::Standard(StandardId::ZERO),
        bus: 0,
        fd: false,
        returned: false,
        rejected: false,
        dlc: 0,
        data: [0; MAX_DATA_LEN],
        checksum: 0,
    };

    /// Build a sealed packet. Payloads above 8 bytes are flagged as CAN-FD.
    pub fn new(id: Id, bus: u8, data: &[u8]) -> Result<Self, PacketError> {
        if bus > MAX_BUS_INDEX {
            return Err(PacketError::InvalidBus { bus });
        }
        let dlc = len_to_dlc(data.len()).ok_or(PacketError::InvalidLength { len: data.len() })?;
        let mut packet = Packet {
            id,
            bus,
            fd: data.len() > CLASSIC_MAX_DATA_LEN,
            dlc,
            ..Packet::EMPTY
        };
        packet.data[..data.len()].copy_from_slice(data);
        checksum::seal(&mut packet);
        Ok(packet)
    }

    /// Build a sealed CAN-FD packet, whatever its payload length.
    pub fn new_fd(id: Id, bus: u8, data: &[u8]) -> Result<Self, PacketError> {
        let mut packet = Self::new(id, bus, data)?;
        packet.fd = true;
        checksum::seal(&mut packet);
        Ok(packet)
    }

    #[inline]
    pub fn is_extended(&self) -> bool {
        matches!(self.id, Id::Extended(_))
    }

    /// Raw identifier bits (11 or 29 significant bits).
    #[inline]
    pub fn raw_id(&self) -> u32 {
        match self.id {
            Id::Standard(id) => id.as_raw() as u32,
            Id::Extended(id) => id.as_raw(),
        }
    }

    #[inline]
    pub fn data_len_code(&self) -> u8 {
        self.dlc
    }

    /// Payload length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        DLC_TO_LEN[self.dlc as usize] as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.dlc == 0
    }

    /// Only a CAN-FD bus can carry this packet.
    #[inline]
    pub fn needs_fd(&self) -> bool {
        self.fd || self.len() > CLASSIC_MAX_DATA_LEN
    }

    /// Valid payload bytes.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data[..self.len()]
    }

    /// Mutable payload. Editing does not reseal: call [`checksum::seal`] afterwards.
    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        let len = self.len();
        &mut self.data[..len]
    }

    #[inline]
    pub fn checksum(&self) -> u8 {
        self.checksum
    }

    #[inline]
    pub fn set_checksum(&mut self, checksum: u8) {
        self.checksum = checksum;
    }

    /// Sealed copy targeting `bus`, flags cleared. Used for forwarding.
    pub fn retargeted(&self, bus: u8) -> Packet {
        let mut copy = Packet {
            bus: bus & MAX_BUS_INDEX,
            returned: false,
            rejected: false,
            ..*self
        };
        checksum::seal(&mut copy);
        copy
    }

    /// Sealed copy reporting a successful transmission to the host.
    pub fn confirmation(&self) -> Packet {
        let mut copy = Packet {
            returned: true,
            rejected: false,
            ..*self
        };
        checksum::seal(&mut copy);
        copy
    }

    /// First five header bytes, the part of the header covered by the checksum.
    pub fn header_bytes(&self) -> [u8; HEADER_LEN - 1] {
        let word = (self.raw_id() << 3)
            | ((self.is_extended() as u32) << 2)
            | ((self.returned as u32) << 1)
            | (self.rejected as u32);
        let word = word.to_le_bytes();
        [
            (self.dlc << 4) | ((self.bus & MAX_BUS_INDEX) << 1) | (self.fd as u8),
            word[0],
            word[1],
            word[2],
            word[3],
        ]
    }

    /// Number of bytes [`encode`](Self::encode) writes.
    #[inline]
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.len()
    }

    /// Write the wire representation, carried checksum included, into `buf`.
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, PacketError> {
        let needed = self.encoded_len();
        if buf.len() < needed {
            return Err(PacketError::Truncated {
                needed,
                available: buf.len(),
            });
        }
        buf[..HEADER_LEN - 1].copy_from_slice(&self.header_bytes());
        buf[HEADER_LEN - 1] = self.checksum;
        buf[HEADER_LEN..needed].copy_from_slice(self.data());
        Ok(needed)
    }

    /// Read one frame from the start of `buf`. Returns the packet and the number
    /// of bytes consumed. The checksum is carried over, not verified.
    pub fn decode(buf: &[u8]) -> Result<(Packet, usize), PacketError> {
        if buf.len() < HEADER_LEN {
            return Err(PacketError::Truncated {
                needed: HEADER_LEN,
                available: buf.len(),
            });
        }
        let dlc = buf[0] >> 4;
        let needed = Self::frame_len(buf[0]);
        if buf.len() < needed {
            return Err(PacketError::Truncated {
                needed,
                available: buf.len(),
            });
        }

        let word = u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]);
        let raw = word >> 3;
        let id = match (word >> 2) & 0x1 {
            1 => ExtendedId::new(raw).map(Id::Extended),
            _ => u16::try_from(raw)
                .ok()
                .and_then(StandardId::new)
                .map(Id::Standard),
        };
        let id = id.ok_or(PacketError::InvalidIdentifier { raw })?;

        let mut packet = Packet {
            id,
            bus: (buf[0] >> 1) & MAX_BUS_INDEX,
            fd: buf[0] & 0x1 == 1,
            returned: (word >> 1) & 0x1 == 1,
            rejected: word & 0x1 == 1,
            dlc,
            data: [0; MAX_DATA_LEN],
            checksum: buf[HEADER_LEN - 1],
        };
        packet.data[..needed - HEADER_LEN].copy_from_slice(&buf[HEADER_LEN..needed]);
        Ok((packet, needed))
    }

    /// Total frame length announced by a header's first byte.
    #[inline]
    pub fn frame_len(first_byte: u8) -> usize {
        HEADER_LEN + DLC_TO_LEN[(first_byte >> 4) as usize] as usize
    }
}

impl Default for Packet {
    fn default() -> Self {
        Packet::EMPTY
    }
}

//==================================================================================EMBEDDED_CAN
impl Frame for Packet {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        Packet::new(id.into(), 0, data).ok()
    }

    /// Remote frames are not carried by the bridge.
    fn new_remote(_id: impl Into<Id>, _dlc: usize) -> Option<Self> {
        None
    }

    fn is_extended(&self) -> bool {
        Packet::is_extended(self)
    }

    fn is_remote_frame(&self) -> bool {
        false
    }

    fn id(&self) -> Id {
        self.id
    }

    fn dlc(&self) -> usize {
        self.len()
    }

    fn data(&self) -> &[u8] {
        Packet::data(self)
    }
}

//==================================================================================RAW_FRAME
/// Encoded frame as exchanged with the hardware layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawFrame {
    bytes: [u8; MAX_FRAME_LEN],
    len: usize,
}

impl RawFrame {
    /// Encode `packet` with the checksum it carries.
    pub fn from_packet(packet: &Packet) -> Self {
        let mut bytes = [0; MAX_FRAME_LEN];
        let len = HEADER_LEN + packet.len();
        bytes[..HEADER_LEN - 1].copy_from_slice(&packet.header_bytes());
        bytes[HEADER_LEN - 1] = packet.checksum();
        bytes[HEADER_LEN..len].copy_from_slice(packet.data());
        Self { bytes, len }
    }

    /// Copy an already encoded frame. `None` when it exceeds [`MAX_FRAME_LEN`].
    pub fn from_bytes(frame: &[u8]) -> Option<Self> {
        if frame.len() > MAX_FRAME_LEN {
            return None;
        }
        let mut bytes = [0; MAX_FRAME_LEN];
        bytes[..frame.len()].copy_from_slice(frame);
        Some(Self {
            bytes,
            len: frame.len(),
        })
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// Mutable view, e.g. for drivers filling registers in place.
    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes[..self.len]
    }

    /// Decode into a packet (checksum carried, not verified).
    pub fn to_packet(&self) -> Result<Packet, PacketError> {
        Packet::decode(self.as_bytes()).map(|(packet, _)| packet)
    }
}
