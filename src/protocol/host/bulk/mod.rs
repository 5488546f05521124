//! Packet streams over USB bulk transfers.
//!
//! Transfers are byte streams: a frame may start in one transfer and end in
//! the next, in both directions. The encoder carries the unsent tail of a
//! frame over to the next IN transfer, the decoder keeps a partial frame until
//! the next OUT transfer completes it.
use crate::error::SubmitError;
use crate::infra::checksum;
use crate::protocol::packet::{Packet, HEADER_LEN, MAX_FRAME_LEN};

//==================================================================================BULK_IN
/// Device -> host framing.
#[derive(Debug, Clone)]
pub struct BulkInEncoder {
    pending: [u8; MAX_FRAME_LEN],
    pending_len: usize,
    pending_pos: usize,
}

impl Default for BulkInEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl BulkInEncoder {
    pub const fn new() -> Self {
        Self {
            pending: [0; MAX_FRAME_LEN],
            pending_len: 0,
            pending_pos: 0,
        }
    }

    /// Bytes of a frame already started in a previous transfer.
    pub fn pending(&self) -> usize {
        self.pending_len - self.pending_pos
    }

    /// Drop any partially sent frame.
    pub fn reset(&mut self) {
        self.pending_len = 0;
        self.pending_pos = 0;
    }

    /// Fill `buf` with the pending tail, then with packets pulled from
    /// `packets` while room remains. Returns the number of bytes written.
    /// A packet is only pulled when at least one of its bytes fits.
    pub fn fill(&mut self, buf: &mut [u8], packets: &mut impl Iterator<Item = Packet>) -> usize {
        let mut written = self.flush_pending(buf);

        while written < buf.len() {
            let Some(packet) = packets.next() else {
                break;
            };
            let len = match packet.encode(&mut self.pending) {
                Ok(len) => len,
                // cannot happen: the scratch buffer holds the largest frame
                Err(_) => continue,
            };
            self.pending_len = len;
            self.pending_pos = 0;
            written += self.flush_pending(&mut buf[written..]);
        }

        written
    }

    fn flush_pending(&mut self, buf: &mut [u8]) -> usize {
        let count = self.pending().min(buf.len());
        buf[..count].copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + count]);
        self.pending_pos += count;
        if self.pending_pos == self.pending_len {
            self.reset();
        }
        count
    }
}

//==================================================================================BULK_OUT
/// What one OUT transfer produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FeedSummary {
    /// Frames handed to the sink and accepted.
    pub accepted: usize,
    /// Frames whose checksum did not match.
    pub checksum_errors: usize,
    /// Frames that could not be decoded (bad identifier).
    pub malformed: usize,
    /// Frames the sink refused.
    pub rejected: usize,
}

/// Host -> device framing.
#[derive(Debug, Clone)]
pub struct BulkOutDecoder {
    partial: [u8; MAX_FRAME_LEN],
    partial_len: usize,
}

impl Default for BulkOutDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl BulkOutDecoder {
    pub const fn new() -> Self {
        Self {
            partial: [0; MAX_FRAME_LEN],
            partial_len: 0,
        }
    }

    /// Bytes of an incomplete frame waiting for the next transfer.
    pub fn buffered(&self) -> usize {
        self.partial_len
    }

    pub fn reset(&mut self) {
        self.partial_len = 0;
    }

    /// Decode every complete frame in `bytes` (completing a buffered one
    /// first) and hand it to `sink`. Frames failing their checksum never
    /// reach the sink.
    pub fn feed(
        &mut self,
        mut bytes: &[u8],
        mut sink: impl FnMut(Packet) -> Result<(), SubmitError>,
    ) -> FeedSummary {
        let mut summary = FeedSummary::default();

        if self.partial_len > 0 {
            let needed = Packet::frame_len(self.partial[0]);
            let take = (needed - self.partial_len).min(bytes.len());
            self.partial[self.partial_len..self.partial_len + take].copy_from_slice(&bytes[..take]);
            self.partial_len += take;
            bytes = &bytes[take..];

            if self.partial_len < needed {
                return summary;
            }
            self.partial_len = 0;
            Self::dispatch(&self.partial[..needed], &mut sink, &mut summary);
        }

        while !bytes.is_empty() {
            let needed = Packet::frame_len(bytes[0]);
            if bytes.len() < needed {
                self.partial[..bytes.len()].copy_from_slice(bytes);
                self.partial_len = bytes.len();
                break;
            }
            Self::dispatch(&bytes[..needed], &mut sink, &mut summary);
            bytes = &bytes[needed..];
        }

        summary
    }

    fn dispatch(
        frame: &[u8],
        sink: &mut impl FnMut(Packet) -> Result<(), SubmitError>,
        summary: &mut FeedSummary,
    ) {
        debug_assert!(frame.len() >= HEADER_LEN);
        if !checksum::verify_wire(frame) {
            #[cfg(feature = "defmt")]
            defmt::debug!("Host frame dropped: checksum mismatch");
            summary.checksum_errors += 1;
            return;
        }
        match Packet::decode(frame) {
            Ok((packet, _)) => match sink(packet) {
                Ok(()) => summary.accepted += 1,
                Err(_err) => {
                    #[cfg(feature = "defmt")]
                    defmt::debug!("Host frame refused: {}", _err);
                    summary.rejected += 1;
                }
            },
            Err(_) => summary.malformed += 1,
        }
    }
}
