//! Access to the BCM2835 peripheral registers.
//!
//! Everything above this module talks to hardware through [`RegisterWindow`], which
//! addresses 32-bit registers by *word* offset from the start of a peripheral block.

use std::{
    fs::OpenOptions,
    os::unix::fs::OpenOptionsExt,
    path::Path,
    sync::atomic::{AtomicU32, AtomicUsize, Ordering},
};

use memmap2::{MmapOptions, MmapRaw};
use tracing::{debug, info};

use crate::{Error, Result};

/// Bus base of the peripherals on the Pi 1 and Zero (the Pi 2/3 use 0x3F00_0000)
pub const DEFAULT_PERIPHERAL_BASE: u64 = 0x2000_0000;
/// Offset of the GPIO controller from the peripheral base
pub const GPIO_OFFSET: u64 = 0x20_0000;
/// Offset of the clock manager from the peripheral base
pub const CLOCK_OFFSET: u64 = 0x10_1000;
/// How many words of each block we map
pub const WINDOW_WORDS: usize = 41;

/// GPIO pin level register 0 (pins 0..=31)
pub const GPLEV0: usize = 13;
/// General purpose clock 0 control register
pub const CM_GP0CTL: usize = 28;
/// General purpose clock 0 divider register
pub const CM_GP0DIV: usize = 29;

/// Clock manager writes are ignored unless they carry this password
pub const CM_PASSWORD: u32 = 0x5A00_0000;
/// Clock generator is running (or has not settled yet)
pub const CM_BUSY: u32 = 1 << 7;
/// Clock generator enable
pub const CM_ENABLE: u32 = 1 << 4;

/// A range of memory-mapped 32-bit registers.
///
/// Implementations must perform every access as a single, unelided 32-bit access in
/// program order.
pub trait RegisterWindow {
    fn read(&self, offset: usize) -> u32;
    fn write(&self, offset: usize, value: u32);
}

impl<T: RegisterWindow + ?Sized> RegisterWindow for &T {
    fn read(&self, offset: usize) -> u32 {
        (**self).read(offset)
    }

    fn write(&self, offset: usize, value: u32) {
        (**self).write(offset, value)
    }
}

/// A peripheral block mapped out of `/dev/mem`. Unmapped on drop.
pub struct MappedWindow {
    map: MmapRaw,
    words: usize,
}

impl MappedWindow {
    /// Map `words` registers starting at the physical address `phys`
    pub fn map(mem: &Path, phys: u64, words: usize) -> Result<Self> {
        let acquisition = |source| Error::Acquisition {
            path: mem.to_owned(),
            source,
        };
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(mem)
            .map_err(acquisition)?;
        let map = MmapOptions::new()
            .offset(phys)
            .len(words * std::mem::size_of::<u32>())
            .map_raw(&file)
            .map_err(acquisition)?;
        info!(phys = %format!("{phys:#010x}"), words, "Mapped register window");
        Ok(Self { map, words })
    }

    fn register(&self, offset: usize) -> *mut u32 {
        assert!(offset < self.words, "register offset {offset} out of window");
        // Safety: the map is page aligned and `offset` was just checked against its length
        unsafe { (self.map.as_mut_ptr() as *mut u32).add(offset) }
    }
}

impl RegisterWindow for MappedWindow {
    fn read(&self, offset: usize) -> u32 {
        // Safety: `register` bounds checks against the mapped length
        unsafe { self.register(offset).read_volatile() }
    }

    fn write(&self, offset: usize, value: u32) {
        // Safety: `register` bounds checks against the mapped length
        unsafe { self.register(offset).write_volatile(value) }
    }
}

impl Drop for MappedWindow {
    fn drop(&mut self) {
        debug!(words = self.words, "Unmapping register window");
    }
}

/// The GPIO and clock manager blocks, mapped together
pub struct Peripherals {
    pub gpio: MappedWindow,
    pub clock: MappedWindow,
}

impl Peripherals {
    pub fn map(mem: &Path, base: u64) -> Result<Self> {
        Ok(Self {
            gpio: MappedWindow::map(mem, base + GPIO_OFFSET, WINDOW_WORDS)?,
            clock: MappedWindow::map(mem, base + CLOCK_OFFSET, WINDOW_WORDS)?,
        })
    }
}

/// In-memory stand-in for a peripheral block.
///
/// Reads of [`GPLEV0`] replay a repeating pattern of level words, and the busy flag of
/// [`CM_GP0CTL`] reads as set for a configurable number of polls after every write.
pub struct SimulatedWindow {
    regs: Vec<AtomicU32>,
    levels: Vec<u32>,
    level_cursor: AtomicUsize,
    busy_polls: usize,
    busy_remaining: AtomicUsize,
}

impl SimulatedWindow {
    pub fn new(levels: Vec<u32>) -> Self {
        Self {
            regs: (0..WINDOW_WORDS).map(|_| AtomicU32::new(0)).collect(),
            levels,
            level_cursor: AtomicUsize::new(0),
            busy_polls: 0,
            busy_remaining: AtomicUsize::new(0),
        }
    }

    /// Keep the clock busy flag raised for `polls` reads after each control write
    pub fn with_busy_polls(mut self, polls: usize) -> Self {
        self.busy_polls = polls;
        self
    }

    /// Raw register contents, without any simulated side effects
    pub fn peek(&self, offset: usize) -> u32 {
        self.regs[offset].load(Ordering::Relaxed)
    }

    /// How many level reads have been served so far
    pub fn level_reads(&self) -> usize {
        self.level_cursor.load(Ordering::Relaxed)
    }
}

impl RegisterWindow for SimulatedWindow {
    fn read(&self, offset: usize) -> u32 {
        match offset {
            GPLEV0 if !self.levels.is_empty() => {
                let i = self.level_cursor.fetch_add(1, Ordering::Relaxed);
                self.levels[i % self.levels.len()]
            }
            CM_GP0CTL => {
                let busy = self
                    .busy_remaining
                    .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
                    .is_ok();
                let ctl = self.peek(CM_GP0CTL) & !CM_BUSY;
                if busy {
                    ctl | CM_BUSY
                } else {
                    ctl
                }
            }
            _ => self.peek(offset),
        }
    }

    fn write(&self, offset: usize, value: u32) {
        if offset == CM_GP0CTL {
            self.busy_remaining.store(self.busy_polls, Ordering::Relaxed);
        }
        self.regs[offset].store(value, Ordering::Relaxed);
    }
}
