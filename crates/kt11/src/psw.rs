use std::sync::atomic::{AtomicU16, Ordering};

/// Supplier of the CPU's current and previous access modes.
///
/// The MMU consumes this narrow contract instead of holding a back-reference
/// to the CPU; the modes are the raw 2-bit PSW field values, so unimplemented
/// encodings (1 and 2) pass through and abort inside translation.
pub trait ModeSource {
    /// PSW<15:14>.
    fn current_mode(&self) -> u16;
    /// PSW<13:12>.
    fn previous_mode(&self) -> u16;
}

/// Access modes this MMU implements.
///
/// The hardware encodes four; only kernel (0) and user (3) exist here. The
/// supervisor encodings are deliberately unimplemented and abort.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessMode {
    Kernel,
    User,
}

impl AccessMode {
    /// Decodes a raw 2-bit PSW mode field. `None` for the unimplemented
    /// supervisor encodings.
    pub fn from_raw(raw: u16) -> Option<Self> {
        match raw & 0o3 {
            0 => Some(AccessMode::Kernel),
            3 => Some(AccessMode::User),
            _ => None,
        }
    }
}

/// The processor status word, shared between the CPU loop and the MMU.
///
/// Only the mode fields matter to translation; the CPU keeps condition codes
/// and the priority field in here as well.
#[derive(Debug, Default)]
pub struct Psw(AtomicU16);

impl Psw {
    pub const fn new() -> Self {
        Self(AtomicU16::new(0))
    }

    #[inline]
    pub fn value(&self) -> u16 {
        self.0.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set(&self, value: u16) {
        self.0.store(value, Ordering::Relaxed);
    }
}

impl ModeSource for Psw {
    #[inline]
    fn current_mode(&self) -> u16 {
        (self.value() & 0o140000) >> 14
    }

    #[inline]
    fn previous_mode(&self) -> u16 {
        (self.value() & 0o30000) >> 12
    }
}
