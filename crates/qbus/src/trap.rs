use thiserror::Error;

pub type Result<T> = std::result::Result<T, Trap>;

/// Faults raised by the bus and the memory management unit.
///
/// Every variant is synchronous: it propagates straight to the CPU's
/// trap-dispatch path with no retry and no local recovery. Device-level I/O
/// failures (a backing-store read error, say) are *not* traps; controllers
/// report those through their own status registers plus a normal completion
/// event, and the guest's driver deals with them.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Trap {
    /// No device claims the physical address.
    #[error("bus timeout at {0:#o}")]
    BusTimeout(u32),

    /// Word-sized access to an odd address.
    #[error("odd address {0:#o}")]
    OddAddress(u16),

    /// Memory-management abort: length violation, non-resident page, or
    /// write-protect violation. The faulting context is latched in MMR0.
    #[error("memory management abort")]
    SegmentationError,

    /// Operation intentionally unsupported by a device stub.
    #[error("unimplemented: {0}")]
    Unimplemented(&'static str),
}
