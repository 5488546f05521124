//! Board-level services reachable from host commands.

/// Where to go after a reset request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ResetTarget {
    /// Plain reset back into the application.
    Application,
    /// ROM bootloader (DFU).
    Bootloader,
    /// Signed update stub.
    Softloader,
}

/// Services the host protocol needs from the board.
pub trait Board {
    /// Hardware revision reported to the host.
    fn hw_type(&self) -> u8;

    /// Reset into `target`. Real boards do not return; the secure boot chain
    /// takes over from there.
    fn request_reset(&mut self, target: ResetTarget);
}
