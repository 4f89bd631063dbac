//! Qbus: the device bus at the center of the PDP-11 machine model.
//!
//! The bus owns three pieces of shared state:
//! - the **device registry**: address ranges claimed by bus participants,
//!   dispatched first-match in scan order (memory ranges scan first),
//! - the **event queue**: deferred device callbacks keyed by the virtual
//!   instruction clock,
//! - the **interrupt queue**: pending interrupt requests ordered by bus-request
//!   level.
//!
//! All three live behind a single mutex so that the CPU loop and asynchronous
//! producers (e.g. a terminal listener feeding received bytes into a device)
//! observe every mutation atomically. The mutex is never held across a device
//! callback: dispatch snapshots the handle (or drains the due entries) under
//! the lock and calls the device after releasing it, so callbacks may re-enter
//! any bus operation.
#![forbid(unsafe_code)]

mod bus;
mod clock;
mod device;
mod trap;

pub use bus::{Bus, InterruptRequest, Registration};
pub use clock::VirtualClock;
pub use device::{handle_eq, BusDevice, SharedDevice};
pub use trap::{Result, Trap};
