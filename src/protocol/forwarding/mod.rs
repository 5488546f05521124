//! Static bus-to-bus forwarding applied on receive.
//!
//! Each entry is one-directional; bidirectional forwarding takes two entries.
//! A bus never forwards to itself.
use crate::error::ConfigError;

//==================================================================================FORWARDING_TABLE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Source bus index -> optional destination bus index.
pub struct ForwardingTable<const N: usize> {
    entries: [Option<u8>; N],
}

impl<const N: usize> Default for ForwardingTable<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> ForwardingTable<N> {
    /// Every entry set to "none".
    pub const fn new() -> Self {
        Self { entries: [None; N] }
    }

    /// Destination for frames received on `src`.
    pub fn get(&self, src: u8) -> Option<u8> {
        self.entries.get(src as usize).copied().flatten()
    }

    /// Set or clear the entry of `src`.
    pub fn set(&mut self, src: u8, dst: Option<u8>) -> Result<(), ConfigError> {
        if src as usize >= N {
            return Err(ConfigError::InvalidBus { bus: src });
        }
        if let Some(dst) = dst {
            if dst as usize >= N {
                return Err(ConfigError::InvalidBus { bus: dst });
            }
            if dst == src {
                return Err(ConfigError::SelfForwarding { bus: src });
            }
        }
        self.entries[src as usize] = dst;
        Ok(())
    }

    /// Iterate over `(src, dst)` pairs that forward.
    pub fn routes(&self) -> impl Iterator<Item = (u8, u8)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(src, dst)| dst.map(|dst| (src as u8, dst)))
    }
}
