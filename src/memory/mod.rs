//! Memory bus emulation
//!
//! A flat 1 MiB real-mode address space. Every byte write is reported to
//! the watchpoint manager before the byte is updated, which is what keeps
//! the decoded-instruction caches coherent with guest self-modification.
//! Multi-byte accessors compose from the byte accessors so that watchpoint
//! reporting stays byte-granular.

pub mod watchpoint;

pub use watchpoint::{WatchpointHit, WatchpointManager};

/// Size of the real-mode address space (1 MiB)
const MEMORY_SIZE: usize = 0x10_0000;

/// Memory bus with write watchpoints
pub struct MemoryBus {
    ram: Vec<u8>,
    watchpoints: WatchpointManager,
}

impl MemoryBus {
    /// Create a new memory bus with zeroed RAM
    pub fn new() -> Self {
        Self {
            ram: vec![0; MEMORY_SIZE],
            watchpoints: WatchpointManager::new(),
        }
    }

    /// Read a byte from memory
    ///
    /// Unmapped addresses (beyond 1 MiB) read as 0xFF.
    #[inline(always)]
    pub fn read_u8(&self, addr: u32) -> u8 {
        match self.ram.get(addr as usize) {
            Some(&b) => b,
            None => 0xFF,
        }
    }

    /// Write a byte to memory
    ///
    /// The watchpoint manager sees the write before the byte is updated.
    /// Out-of-range writes are ignored.
    #[inline(always)]
    pub fn write_u8(&mut self, addr: u32, value: u8) {
        if let Some(slot) = self.ram.get_mut(addr as usize) {
            let old = *slot;
            self.watchpoints.notify_write(addr, old, value);
            *slot = value;
        }
    }

    /// Read a word (little-endian) from memory
    #[inline(always)]
    pub fn read_u16(&self, addr: u32) -> u16 {
        let lo = self.read_u8(addr) as u16;
        let hi = self.read_u8(addr.wrapping_add(1)) as u16;
        lo | (hi << 8)
    }

    /// Write a word (little-endian) to memory
    #[inline(always)]
    pub fn write_u16(&mut self, addr: u32, value: u16) {
        self.write_u8(addr, value as u8);
        self.write_u8(addr.wrapping_add(1), (value >> 8) as u8);
    }

    /// Read a dword (little-endian) from memory
    #[inline(always)]
    pub fn read_u32(&self, addr: u32) -> u32 {
        let lo = self.read_u16(addr) as u32;
        let hi = self.read_u16(addr.wrapping_add(2)) as u32;
        lo | (hi << 16)
    }

    /// Write a dword (little-endian) to memory
    #[inline(always)]
    pub fn write_u32(&mut self, addr: u32, value: u32) {
        self.write_u16(addr, value as u16);
        self.write_u16(addr.wrapping_add(2), (value >> 16) as u16);
    }

    /// Load data into RAM at the specified linear offset.
    ///
    /// This is the ROM/program-image path: it bypasses watchpoint
    /// reporting, so it must not be used while decoded instructions cover
    /// the target range.
    pub fn load(&mut self, data: &[u8], offset: usize) {
        let end = (offset + data.len()).min(self.ram.len());
        self.ram[offset..end].copy_from_slice(&data[..end - offset]);
    }

    /// Shared access to the watchpoint manager
    pub fn watchpoints(&self) -> &WatchpointManager {
        &self.watchpoints
    }

    /// Mutable access to the watchpoint manager
    pub fn watchpoints_mut(&mut self) -> &mut WatchpointManager {
        &mut self.watchpoints
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}
