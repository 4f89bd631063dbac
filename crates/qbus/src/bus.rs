use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, trace};

use crate::clock::VirtualClock;
use crate::device::{handle_eq, SharedDevice};
use crate::trap::{Result, Trap};

/// A device's claim on a range of bus addresses.
///
/// `size` is in words; the claimed byte range is `[base, base + size * 2)`.
/// Ranges are not checked for overlap: the first registration to match in
/// scan order wins, and memory-class registrations scan before peripheral
/// registers.
#[derive(Clone)]
pub struct Registration {
    pub device: SharedDevice,
    pub base: u32,
    pub size: u32,
    pub name: &'static str,
}

impl Registration {
    pub fn new(device: SharedDevice, base: u32, size: u32, name: &'static str) -> Self {
        Self {
            device,
            base,
            size,
            name,
        }
    }

    fn contains(&self, addr: u32) -> bool {
        addr >= self.base && addr < self.base + self.size * 2
    }
}

/// A pending deferred callback, owned by the event queue until it fires or
/// its device cancels it.
struct Event {
    device: SharedDevice,
    /// Absolute virtual time at which the event comes due.
    time: u64,
    data: i32,
}

/// A pending interrupt request.
///
/// Equality is the full (device, level, vector) triple, with device equality
/// being handle identity; scheduling an already-pending triple is a no-op.
#[derive(Clone)]
pub struct InterruptRequest {
    pub device: SharedDevice,
    /// Bus-request level, 0-7. An interrupt is delivered only while its level
    /// strictly exceeds the CPU's current priority.
    pub level: u8,
    /// Vector offset from which the CPU loads the service routine address.
    pub vector: u16,
}

impl PartialEq for InterruptRequest {
    fn eq(&self, other: &Self) -> bool {
        handle_eq(&self.device, &other.device)
            && self.level == other.level
            && self.vector == other.vector
    }
}

#[derive(Default)]
struct BusState {
    registry: Vec<Registration>,
    events: Vec<Event>,
    interrupts: Vec<InterruptRequest>,
}

/// The device bus: address-range dispatch plus the event and interrupt queues.
///
/// One mutex guards the registry and both queues, so registration, dispatch,
/// and scheduling are linearizable across the CPU loop and producer threads.
/// Device callbacks always run outside the lock; a callback may re-enter any
/// bus operation. One observable consequence: an event scheduled from within
/// a [`Bus::run_events`] drain is not fired by that same drain even if it is
/// already due, it waits for the next call.
pub struct Bus {
    clock: Arc<VirtualClock>,
    state: Mutex<BusState>,
}

impl Bus {
    pub fn new(clock: Arc<VirtualClock>) -> Self {
        Self {
            clock,
            state: Mutex::new(BusState::default()),
        }
    }

    /// The virtual clock the event queue is keyed by.
    pub fn clock(&self) -> &Arc<VirtualClock> {
        &self.clock
    }

    fn state(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().expect("bus state poisoned")
    }

    /// Adds a device's address claim to the registry.
    ///
    /// Memory-class registrations go to the front of the scan order so main
    /// memory is checked before peripheral registers. No overlap detection is
    /// performed.
    pub fn register_device(&self, registration: Registration, is_memory: bool) {
        trace!(
            name = registration.name,
            base = format_args!("{:#o}", registration.base),
            size = registration.size,
            is_memory,
            "register device"
        );
        let mut state = self.state();
        if is_memory {
            state.registry.insert(0, registration);
        } else {
            state.registry.push(registration);
        }
    }

    /// Resets every registered device in scan order, then clears both queues.
    ///
    /// Queues are cleared after the device resets so a reset handler that
    /// schedules work does not leave stale entries behind.
    pub fn reset(&self) {
        debug!("bus reset");
        let devices: Vec<SharedDevice> = {
            let state = self.state();
            state.registry.iter().map(|r| r.device.clone()).collect()
        };
        for device in devices {
            device.reset();
        }
        let mut state = self.state();
        state.events.clear();
        state.interrupts.clear();
    }

    fn claimant(&self, addr: u32) -> Result<SharedDevice> {
        let state = self.state();
        for r in &state.registry {
            if r.contains(addr) {
                trace!(addr = format_args!("{addr:#o}"), name = r.name, "dispatch");
                return Ok(r.device.clone());
            }
        }
        Err(Trap::BusTimeout(addr))
    }

    /// Word read from the first device claiming `addr`.
    pub fn read(&self, addr: u32) -> Result<u16> {
        self.claimant(addr)?.read(addr)
    }

    /// Word write to the first device claiming `addr`.
    pub fn write(&self, addr: u32, value: u16) -> Result<()> {
        self.claimant(addr)?.write(addr, value)
    }

    /// Byte write to the first device claiming `addr`.
    pub fn write_byte(&self, addr: u32, value: u8) -> Result<()> {
        self.claimant(addr)?.write_byte(addr, value)
    }

    /// Schedules a deferred callback for `device`, `delay` ticks from now.
    ///
    /// The queue stays sorted ascending by fire time; among equal fire times,
    /// earlier-scheduled entries fire first.
    pub fn schedule_event(&self, device: &SharedDevice, delay: u64, data: i32) {
        let time = self.clock.now() + delay;
        let mut state = self.state();
        let at = state.events.partition_point(|e| e.time <= time);
        state.events.insert(
            at,
            Event {
                device: device.clone(),
                time,
                data,
            },
        );
    }

    /// Removes every pending event owned by `device`.
    pub fn cancel_events(&self, device: &SharedDevice) {
        let mut state = self.state();
        state.events.retain(|e| !handle_eq(&e.device, device));
    }

    /// Fires, in ascending time order, every event whose fire time is strictly
    /// before the current virtual time.
    ///
    /// With `advance_if_idle` set and the earliest event still in the future,
    /// the clock is first fast-forwarded to `earliest + 1` so an otherwise
    /// idle machine jumps straight to the next scheduled device activity.
    pub fn run_events(&self, advance_if_idle: bool) {
        let due: Vec<(SharedDevice, i32)> = {
            let mut state = self.state();
            if state.events.is_empty() {
                return;
            }
            let mut now = self.clock.now();
            if advance_if_idle {
                let next = state.events[0].time + 1;
                if next > now {
                    debug!(from = now, to = next, "idle fast-forward");
                    now = self.clock.advance_to_at_least(next);
                }
            }
            let n = state.events.partition_point(|e| e.time < now);
            state
                .events
                .drain(..n)
                .map(|e| (e.device, e.data))
                .collect()
        };
        for (device, data) in due {
            device.event_service(data);
        }
    }

    /// Requests an interrupt at `level` with vector offset `vector`.
    ///
    /// Idempotent: if the identical (device, level, vector) triple is already
    /// pending, nothing changes. Otherwise the request is inserted keeping the
    /// queue sorted by level descending, behind any pending request at the
    /// same level (first requested, first served).
    pub fn schedule_interrupt(&self, device: &SharedDevice, level: u8, vector: u16) {
        let request = InterruptRequest {
            device: device.clone(),
            level,
            vector,
        };
        let mut state = self.state();
        for i in 0..state.interrupts.len() {
            if state.interrupts[i] == request {
                return;
            }
            if state.interrupts[i].level < request.level {
                state.interrupts.insert(i, request);
                return;
            }
        }
        state.interrupts.push(request);
    }

    /// Removes all pending interrupts matching the (device, level, vector)
    /// triple.
    pub fn cancel_interrupt(&self, device: &SharedDevice, level: u8, vector: u16) {
        let request = InterruptRequest {
            device: device.clone(),
            level,
            vector,
        };
        let mut state = self.state();
        state.interrupts.retain(|n| *n != request);
    }

    /// Takes the highest-priority pending interrupt if it outranks
    /// `current_level`, the CPU's current priority mask.
    pub fn run_interrupts(&self, current_level: u8) -> Option<InterruptRequest> {
        let mut state = self.state();
        if state.interrupts.first()?.level > current_level {
            Some(state.interrupts.remove(0))
        } else {
            None
        }
    }

    /// Like [`Bus::run_interrupts`] but read-only; used to decide whether to
    /// leave a wait state.
    pub fn waiting_interrupt(&self, current_level: u8) -> bool {
        let state = self.state();
        state
            .interrupts
            .first()
            .is_some_and(|n| n.level > current_level)
    }
}
