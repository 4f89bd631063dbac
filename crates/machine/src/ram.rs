use std::sync::Mutex;

use qbus::{BusDevice, Result};

/// Main memory, word-addressable from physical address 0.
///
/// Power-up contents are the address-derived test pattern the hardware
/// diagnostics expect: word `i` holds `i & 0xffff`. Reset leaves memory
/// untouched, as on the real boards.
pub struct Ms11 {
    mem: Mutex<Vec<u16>>,
}

impl Ms11 {
    pub fn new(words: usize) -> Self {
        let mem = (0..words).map(|i| i as u16).collect();
        Self {
            mem: Mutex::new(mem),
        }
    }

    /// Size in words.
    pub fn size(&self) -> usize {
        self.mem.lock().expect("ram poisoned").len()
    }
}

impl BusDevice for Ms11 {
    fn reset(&self) {}

    fn read(&self, addr: u32) -> Result<u16> {
        Ok(self.mem.lock().expect("ram poisoned")[(addr >> 1) as usize])
    }

    fn write(&self, addr: u32, value: u16) -> Result<()> {
        self.mem.lock().expect("ram poisoned")[(addr >> 1) as usize] = value;
        Ok(())
    }

    fn write_byte(&self, addr: u32, value: u8) -> Result<()> {
        let mut mem = self.mem.lock().expect("ram poisoned");
        let word = &mut mem[(addr >> 1) as usize];
        if addr & 1 == 0 {
            *word = (*word & 0xff00) | u16::from(value);
        } else {
            *word = (*word & 0x00ff) | (u16::from(value) << 8);
        }
        Ok(())
    }
}
