use std::sync::Arc;

use crate::trap::Result;

/// The capability contract every bus participant implements.
///
/// Addresses handed to `read`/`write`/`write_byte` are full physical bus
/// addresses, not offsets; a device registered over several ranges picks the
/// register out of the address itself.
///
/// Methods take `&self`: devices guard their own interior state, and the bus
/// shares one handle across the CPU loop and any producer threads.
pub trait BusDevice: Send + Sync {
    /// Return the device to its power-on state. Invoked by [`crate::Bus::reset`].
    fn reset(&self);

    /// Word read from a register or memory cell inside the device's range.
    fn read(&self, addr: u32) -> Result<u16>;

    /// Word write.
    fn write(&self, addr: u32, value: u16) -> Result<()>;

    /// Byte write. Byte reads do not exist on the bus; the CPU reads the
    /// containing word and picks the byte itself.
    fn write_byte(&self, addr: u32, value: u8) -> Result<()>;

    /// Deferred completion callback, fired when an event scheduled via
    /// [`crate::Bus::schedule_event`] comes due. `data` is the opaque payload
    /// the device passed when scheduling.
    fn event_service(&self, data: i32) {
        let _ = data;
    }

    /// Interrupt-acknowledge callback, invoked by the CPU when it takes this
    /// device's interrupt.
    fn interrupt_service(&self) {}
}

/// Shared handle to a bus participant.
///
/// The bus, the event queue, and the interrupt queue all hold clones of this
/// handle; none of them owns the device. Identity is pointer identity, never
/// structural comparison.
pub type SharedDevice = Arc<dyn BusDevice>;

/// Handle identity: do `a` and `b` refer to the same device?
pub fn handle_eq(a: &SharedDevice, b: &SharedDevice) -> bool {
    Arc::ptr_eq(a, b)
}
