//! Main memory.
use crate::constants::*;

/// Fixed 4KB address space.
///
/// Every access is checked against the buffer size. An out of range access
/// is a bug in the caller and panics; the interpreter validates program
/// controlled addresses before they reach this type.
pub struct Memory {
    ram: Box<[u8; MEM_SIZE]>,
}

impl Default for Memory {
    fn default() -> Self {
        Self {
            ram: Box::new([0; MEM_SIZE]),
        }
    }
}

impl Memory {
    pub fn new() -> Self {
        Default::default()
    }

    /// Check whether `len` bytes starting at `addr` lie within memory.
    #[inline]
    pub fn contains(addr: usize, len: usize) -> bool {
        addr.checked_add(len).map_or(false, |end| end <= MEM_SIZE)
    }

    #[inline]
    pub fn read_byte(&self, addr: usize) -> u8 {
        assert!(addr < MEM_SIZE, "memory read out of bounds: {addr:04X}");
        self.ram[addr]
    }

    #[inline]
    pub fn write_byte(&mut self, addr: usize, value: u8) {
        assert!(addr < MEM_SIZE, "memory write out of bounds: {addr:04X}");
        self.ram[addr] = value;
    }

    /// Read a big-endian word, as instructions are stored.
    #[inline]
    pub fn read_word(&self, addr: usize) -> u16 {
        assert!(
            Self::contains(addr, 2),
            "memory word read out of bounds: {addr:04X}"
        );
        ((self.ram[addr] as u16) << 8) | self.ram[addr + 1] as u16
    }

    /// Copy a block of bytes into memory starting at `addr`.
    pub fn write_block(&mut self, addr: usize, bytes: &[u8]) {
        assert!(
            Self::contains(addr, bytes.len()),
            "memory block write out of bounds: {addr:04X}+{}",
            bytes.len()
        );
        self.ram[addr..addr + bytes.len()].copy_from_slice(bytes);
    }

    /// Borrow `len` bytes starting at `addr`.
    pub fn slice(&self, addr: usize, len: usize) -> &[u8] {
        assert!(
            Self::contains(addr, len),
            "memory slice out of bounds: {addr:04X}+{len}"
        );
        &self.ram[addr..addr + len]
    }

    /// Erase the whole address space.
    pub fn clear(&mut self) {
        self.ram.fill(0);
    }
}
