//! The assembled machine: bus, clock, main memory, MMU, and the shared
//! processor status word, wired together behind one context object.
//!
//! Every component is held by `Arc` and handed out through accessors, so the
//! CPU loop, device constructors, and producer threads all share the same
//! instances; there are no process-wide singletons.
#![forbid(unsafe_code)]

mod ram;

use std::sync::Arc;

use tracing::debug;

use kt11::{register_kt11, Kt11, Psw};
use qbus::{Bus, Registration, SharedDevice, VirtualClock};

pub use ram::Ms11;

/// Main-memory size of a fully populated system, in words.
pub const DEFAULT_RAM_WORDS: usize = 124 * 1024;

/// Machine construction parameters.
#[derive(Clone, Debug)]
pub struct MachineConfig {
    /// Main-memory size in words, registered at physical address 0.
    pub ram_words: usize,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            ram_words: DEFAULT_RAM_WORDS,
        }
    }
}

/// The emulated system context.
///
/// Owns the virtual clock, the bus, main memory, the MMU, and the processor
/// status word. Peripheral devices are constructed by the caller and register
/// themselves on [`Machine::bus`].
pub struct Machine {
    clock: Arc<VirtualClock>,
    bus: Arc<Bus>,
    ram: Arc<Ms11>,
    mmu: Arc<Kt11>,
    psw: Arc<Psw>,
}

impl Machine {
    pub fn new(config: MachineConfig) -> Self {
        debug!(ram_words = config.ram_words, "building machine");
        let clock = Arc::new(VirtualClock::new());
        let bus = Arc::new(Bus::new(clock.clone()));

        let ram = Arc::new(Ms11::new(config.ram_words));
        let ram_dev: SharedDevice = ram.clone();
        bus.register_device(
            Registration::new(ram_dev, 0, config.ram_words as u32, "MS11"),
            true,
        );

        let mmu = Arc::new(Kt11::new());
        register_kt11(&bus, &mmu);

        Self {
            clock,
            bus,
            ram,
            mmu,
            psw: Arc::new(Psw::new()),
        }
    }

    pub fn clock(&self) -> &Arc<VirtualClock> {
        &self.clock
    }

    pub fn bus(&self) -> &Arc<Bus> {
        &self.bus
    }

    pub fn ram(&self) -> &Arc<Ms11> {
        &self.ram
    }

    pub fn mmu(&self) -> &Arc<Kt11> {
        &self.mmu
    }

    pub fn psw(&self) -> &Arc<Psw> {
        &self.psw
    }

    /// Whole-system reset: every registered device, then the bus queues.
    pub fn reset(&self) {
        self.bus.reset();
    }
}

impl Default for Machine {
    fn default() -> Self {
        Self::new(MachineConfig::default())
    }
}
