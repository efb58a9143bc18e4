//! CPU and memory state.
use crate::{
    constants::*, instruction::Reg, keyboard::Keyboard, memory::Memory, screen::Screen,
    stack::Stack,
};

/// Core state for a chip8 interpreter.
pub struct Chip8Cpu {
    // ------------------------------------------------------------------------
    // Registers
    /// Program counter pointing to the next instruction in memory.
    pub(crate) pc: usize,
    /// General purpose registers for temporary values.
    ///
    /// Register 16 (VF) is used for either the carry flag or borrow switch depending on opcode.
    pub(crate) registers: [u8; REGISTER_COUNT],
    /// (I) Pointer register used for temporarily storing an address.
    pub(crate) address: Address,
    /// (DT) Delay timer that counts down to 0.
    pub(crate) delay_timer: u8,
    /// (ST) Sound timer that counts down to 0. While it has a non-zero value, a beep is played.
    pub(crate) sound_timer: u8,

    // ------------------------------------------------------------------------
    // Memory
    /// Main memory storage space.
    pub(crate) ram: Memory,
    /// Stack of return pointers used for jumping when a routine call finishes.
    pub(crate) stack: Stack,
    /// Screen buffer that is drawn to.
    pub(crate) display: Screen,

    // ------------------------------------------------------------------------
    // Input
    pub(crate) keyboard: Keyboard,
}

impl Default for Chip8Cpu {
    fn default() -> Self {
        Self {
            pc: MEM_START,
            registers: [0; REGISTER_COUNT],
            address: 0,
            delay_timer: 0,
            sound_timer: 0,

            ram: Memory::new(),
            stack: Stack::new(),
            display: Screen::new(),

            keyboard: Keyboard::new(),
        }
    }
}

impl Chip8Cpu {
    pub fn new() -> Self {
        Default::default()
    }

    /// Return every register, buffer and the keyboard to power-on state,
    /// with the program counter at the load address.
    pub(crate) fn reset(&mut self) {
        self.pc = MEM_START;
        self.registers.fill(0);
        self.address = 0;
        self.delay_timer = 0;
        self.sound_timer = 0;
        self.ram.clear();
        self.stack.clear();
        self.display.clear();
        self.keyboard.clear();
    }

    #[inline(always)]
    pub(crate) fn reg(&self, r: Reg) -> u8 {
        self.registers[r.index()]
    }

    #[inline(always)]
    pub(crate) fn set_reg(&mut self, r: Reg, value: u8) {
        self.registers[r.index()] = value;
    }

    #[inline(always)]
    pub(crate) fn set_flag(&mut self, flag: bool) {
        self.registers[FLAG_REGISTER] = flag as u8;
    }

    /// Count down the delay timer.
    #[inline]
    pub fn tick_delay(&mut self) {
        self.delay_timer = self.delay_timer.saturating_sub(1);
    }

    #[inline]
    pub fn tick_sound(&mut self) {
        self.sound_timer = self.sound_timer.saturating_sub(1);
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    pub fn registers(&self) -> &[u8; REGISTER_COUNT] {
        &self.registers
    }

    /// Value of the index register `I`.
    pub fn address(&self) -> Address {
        self.address
    }

    pub fn delay_timer(&self) -> u8 {
        self.delay_timer
    }

    pub fn sound_timer(&self) -> u8 {
        self.sound_timer
    }

    pub fn memory(&self) -> &Memory {
        &self.ram
    }

    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    pub fn screen(&self) -> &Screen {
        &self.display
    }

    pub fn keyboard(&self) -> &Keyboard {
        &self.keyboard
    }
}
