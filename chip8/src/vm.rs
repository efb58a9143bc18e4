//! Virtual machine.
use std::{
    fmt::{self, Write},
    time::Duration,
};

use log::{debug, error, info, trace};
use rand::prelude::*;

use crate::{
    constants::*,
    cpu::Chip8Cpu,
    devices::{Devices, NullDevices},
    error::{Chip8Error, Chip8Result, Corruption},
    instruction::{Instruction, Reg},
    keyboard::KeyCode,
    memory::Memory,
    screen::Chip8DisplayBuffer,
};

pub struct Chip8Vm {
    cpu: Chip8Cpu,
    state: EmulatorState,
    /// Set by instructions that change the framebuffer,
    /// cleared when the timer tick signals the renderer.
    redraw: bool,
    devices: Box<dyn Devices>,
    conf: Chip8Conf,
}

impl Chip8Vm {
    pub fn new(conf: Chip8Conf) -> Self {
        Self::with_devices(conf, NullDevices)
    }

    pub fn with_devices(conf: Chip8Conf, devices: impl Devices + 'static) -> Self {
        let mut vm = Chip8Vm {
            cpu: Chip8Cpu::new(),
            state: EmulatorState::Idle,
            redraw: false,
            devices: Box::new(devices),
            conf,
        };
        vm.load_font();
        vm
    }

    /// Configuration that was used to instantiate the VM.
    pub fn config(&self) -> &Chip8Conf {
        &self.conf
    }

    fn load_font(&mut self) {
        self.cpu.ram.write_block(FONTSET_START, &FONTSET);
    }

    /// Reset the machine and copy the program into memory at the load address.
    ///
    /// A program that does not fit is rejected and the current machine state,
    /// including memory, is left untouched.
    pub fn load_bytecode(&mut self, bytecode: &[u8]) -> Chip8Result<()> {
        if !check_program_size(bytecode) {
            return self.fail(Chip8Error::InvalidRom {
                size: bytecode.len(),
                max_size: MAX_PROGRAM_SIZE,
            });
        }

        // Start with clean memory to avoid leaking previous program.
        self.cpu.reset();

        // Reset fonts
        self.load_font();

        // Load program into virtual RAM
        self.cpu.ram.write_block(MEM_START, bytecode);

        self.redraw = true;
        self.state = EmulatorState::Idle;

        info!("loaded program of {} bytes", bytecode.len());

        Ok(())
    }

    pub fn cpu(&self) -> &Chip8Cpu {
        &self.cpu
    }

    pub fn display_buffer(&self) -> Chip8DisplayBuffer {
        self.cpu.display.buffer()
    }

    /// State of the pixel at column `x`, row `y`.
    pub fn pixel_at(&self, x: usize, y: usize) -> bool {
        self.cpu.display.pixel_at(x, y)
    }

    /// Whether the framebuffer changed since the last timer tick.
    pub fn redraw_pending(&self) -> bool {
        self.redraw
    }
}

/// Program has more bytes than can fit above the load address.
fn check_program_size(bytecode: &[u8]) -> bool {
    bytecode.len() <= MAX_PROGRAM_SIZE
}

/// Outcome of a single instruction cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    Ok,
    /// Program counter has jumped to a new address.
    ///
    /// This is returned when the interpreter encounters:
    ///
    /// - 1nnn (`JP addr`)
    /// - 2nnn (`CALL addr`)
    /// - 00EE (`RET`)
    /// - Bnnn (`JP V0, addr`)
    Jump,
    /// The framebuffer was changed.
    Draw,
    /// The sound timer was set.
    Sound,
    /// Wait for a keypress.
    ///
    /// This is triggered by the opcode `Fx0A` (`LD Vx, K`), which stops
    /// execution until a key is pressed, and loads the key value into `Vx`.
    KeyWait,
}

/// Where the program counter goes after an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Advance {
    /// Continue to the following instruction.
    Next,
    /// Skip over the following instruction.
    Skip,
    /// Explicit control transfer.
    To(usize),
    /// Execute the same instruction again next cycle.
    Stay,
}

/// Run state of the emulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmulatorState {
    /// Loaded, but the clocks are stopped.
    Idle,
    Playing(GameState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameState {
    Running,
    /// Stalled on `LD Vx, K` until a key is pressed.
    Sleeping,
}

/// VM Configuration Parameters.
#[derive(Debug, Default, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Chip8Conf {
    /// Instructions executed per second. Defaults to 800Hz.
    pub clock_frequency: Option<Hz>,
}

impl Chip8Conf {
    /// Time between two CPU cycles.
    pub fn cpu_interval(&self) -> Duration {
        self.clock_frequency
            .unwrap_or(Hz(DEFAULT_CLOCK_FREQUENCY))
            .into()
    }
}

/// CPU clock frequency, in hertz (per second)
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct Hz(pub u64);

impl From<Hz> for Duration {
    fn from(freq: Hz) -> Self {
        if freq.0 == 0 {
            Duration::from_nanos(0)
        } else {
            Duration::from_nanos(NANOS_IN_SECOND / freq.0)
        }
    }
}

/// Run control
impl Chip8Vm {
    pub fn state(&self) -> EmulatorState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        matches!(self.state, EmulatorState::Playing(_))
    }

    /// Enter the playing state. Does nothing if already playing.
    pub fn resume(&mut self) {
        if !self.is_playing() {
            info!("resume at {:04X}", self.cpu.pc);
            self.state = EmulatorState::Playing(GameState::Running);
        }
    }

    /// Return to idle, keeping all registers and memory as they are.
    pub fn suspend(&mut self) {
        if self.is_playing() {
            info!("suspend at {:04X}", self.cpu.pc);
            self.state = EmulatorState::Idle;
        }
    }

    /// Only a playing machine can fall asleep or wake up.
    fn set_sleeping(&mut self, sleeping: bool) {
        if self.is_playing() {
            let game = if sleeping {
                GameState::Sleeping
            } else {
                GameState::Running
            };
            self.state = EmulatorState::Playing(game);
        }
    }
}

/// Input
impl Chip8Vm {
    pub fn key_down(&mut self, key: KeyCode) {
        debug!("key down: {key}");
        self.cpu.keyboard.press(key);
    }

    pub fn key_up(&mut self, key: KeyCode) {
        debug!("key up: {key}");
        self.cpu.keyboard.release(key);
    }
}

/// Interpreter
impl Chip8Vm {
    /// Count down both timers, and signal the host for sound and display.
    ///
    /// Intended to be called at [`DELAY_FREQUENCY`].
    pub fn tick_timers(&mut self) {
        // Buzzer is on for every tick the sound timer is counting down.
        if self.cpu.sound_timer > 0 {
            self.devices.beep();
        }

        self.cpu.tick_delay();
        self.cpu.tick_sound();

        if self.redraw {
            self.redraw = false;
            self.devices.redraw();
        }
    }

    /// Execute the given number of instruction cycles, stopping at the first error.
    pub fn run_steps(&mut self, step_count: usize) -> Chip8Result<Flow> {
        let mut flow = Flow::Ok;

        for _ in 0..step_count {
            flow = self.run_cycle()?;
        }

        Ok(flow)
    }

    /// Fetch, decode and execute a single instruction.
    ///
    /// On failure the error is reported to the devices, and the machine
    /// state is left exactly as it was before the cycle.
    pub fn run_cycle(&mut self) -> Chip8Result<Flow> {
        let pc = self.cpu.pc;

        // Each instruction is two bytes, with the opcode identity in the first 4-bit nibble.
        if !Memory::contains(pc, 2) {
            return self.fail(Corruption::MemoryOutOfBounds { address: pc }.into());
        }
        let opcode = self.cpu.ram.read_word(pc);

        let instr = match Instruction::decode(opcode) {
            Some(instr) => instr,
            None => {
                return self.fail(Chip8Error::UnrecognizedOpcode {
                    opcode,
                    address: pc as Address,
                })
            }
        };

        trace!("{pc:04X}: {instr}");

        match self.exec(instr) {
            Ok((advance, flow)) => {
                self.cpu.pc = match advance {
                    Advance::Next => pc + 2,
                    Advance::Skip => pc + 4,
                    Advance::To(address) => address,
                    Advance::Stay => pc,
                };
                Ok(flow)
            }
            Err(corruption) => self.fail(corruption.into()),
        }
    }

    fn fail<T>(&mut self, err: Chip8Error) -> Chip8Result<T> {
        error!("{err}");
        self.devices.error(&err);
        Err(err)
    }

    /// Check that `len` bytes from the index register lie within memory.
    #[inline]
    fn check_address_range(&self, len: usize) -> Result<usize, Corruption> {
        let address = self.cpu.address as usize;
        if Memory::contains(address, len) {
            Ok(address)
        } else {
            Err(Corruption::MemoryOutOfBounds {
                address: address + len - 1,
            })
        }
    }

    /// Apply the effect of the instruction.
    ///
    /// Nothing is mutated when a structural limit would be breached.
    fn exec(&mut self, instr: Instruction) -> Result<(Advance, Flow), Corruption> {
        use Instruction as I;

        let cpu = &mut self.cpu;

        let result = match instr {
            // 0nnn (SYS addr)
            //
            // Machine code routines do not exist here.
            I::Sys { .. } => (Advance::Next, Flow::Ok),
            // 00E0 (CLS)
            //
            // Clear display
            I::ClearScreen => {
                cpu.display.clear();
                self.redraw = true;
                (Advance::Next, Flow::Draw)
            }
            // 00EE (RET)
            //
            // Return from a subroutine.
            // Set the program counter to the value at the top of the stack.
            I::Return => {
                if cpu.stack.is_empty() {
                    return Err(Corruption::StackUnderflow);
                }
                let address = cpu.stack.pop();
                (Advance::To(address as usize), Flow::Jump)
            }
            // 1nnn (JP addr)
            I::Jump { address } => (Advance::To(address.get() as usize), Flow::Jump),
            // 2nnn (CALL addr)
            //
            // Push the address of the following instruction, then jump.
            I::Call { address } => {
                if cpu.stack.is_full() {
                    return Err(Corruption::StackOverflow);
                }
                cpu.stack.push((cpu.pc + 2) as Address);
                (Advance::To(address.get() as usize), Flow::Jump)
            }
            // 3xkk (SE Vx, byte)
            I::SkipEqByte { vx, kk } => (skip_if(cpu.reg(vx) == kk), Flow::Ok),
            // 4xkk (SNE Vx, byte)
            I::SkipNotEqByte { vx, kk } => (skip_if(cpu.reg(vx) != kk), Flow::Ok),
            // 5xy0 (SE Vx, Vy)
            I::SkipEq { vx, vy } => (skip_if(cpu.reg(vx) == cpu.reg(vy)), Flow::Ok),
            // 6xkk (LD Vx, byte)
            I::LoadByte { vx, kk } => {
                cpu.set_reg(vx, kk);
                (Advance::Next, Flow::Ok)
            }
            // 7xkk (ADD Vx, byte)
            //
            // Carry flag is not set.
            I::AddByte { vx, kk } => {
                cpu.set_reg(vx, cpu.reg(vx).wrapping_add(kk));
                (Advance::Next, Flow::Ok)
            }
            // ----------------------------------------------------------------
            // 8xy_ Arithmetic
            I::Load { vx, vy } => {
                cpu.set_reg(vx, cpu.reg(vy));
                (Advance::Next, Flow::Ok)
            }
            I::Or { vx, vy } => {
                cpu.set_reg(vx, cpu.reg(vx) | cpu.reg(vy));
                (Advance::Next, Flow::Ok)
            }
            I::And { vx, vy } => {
                cpu.set_reg(vx, cpu.reg(vx) & cpu.reg(vy));
                (Advance::Next, Flow::Ok)
            }
            I::Xor { vx, vy } => {
                cpu.set_reg(vx, cpu.reg(vx) ^ cpu.reg(vy));
                (Advance::Next, Flow::Ok)
            }
            // 8xy4 (ADD Vx, Vy)
            //
            // VF is written last, so it holds the carry even when x is F.
            I::Add { vx, vy } => {
                let (result, carry) = cpu.reg(vx).overflowing_add(cpu.reg(vy));
                cpu.set_reg(vx, result);
                cpu.set_flag(carry);
                (Advance::Next, Flow::Ok)
            }
            // 8xy5 (SUB Vx, Vy)
            //
            // VF = 1 when there is no borrow.
            I::Sub { vx, vy } => {
                let (x, y) = (cpu.reg(vx), cpu.reg(vy));
                cpu.set_reg(vx, x.wrapping_sub(y));
                cpu.set_flag(x >= y);
                (Advance::Next, Flow::Ok)
            }
            // 8xy6 (SHR Vx)
            I::ShiftRight { vx, .. } => {
                let x = cpu.reg(vx);
                cpu.set_reg(vx, x >> 1);
                cpu.set_flag(x & 1 == 1);
                (Advance::Next, Flow::Ok)
            }
            // 8xy7 (SUBN Vx, Vy)
            I::SubReverse { vx, vy } => {
                let (x, y) = (cpu.reg(vx), cpu.reg(vy));
                cpu.set_reg(vx, y.wrapping_sub(x));
                cpu.set_flag(y >= x);
                (Advance::Next, Flow::Ok)
            }
            // 8xyE (SHL Vx)
            I::ShiftLeft { vx, .. } => {
                let x = cpu.reg(vx);
                cpu.set_reg(vx, x << 1);
                cpu.set_flag(x >> 7 == 1);
                (Advance::Next, Flow::Ok)
            }
            // ----------------------------------------------------------------
            // 9xy0 (SNE Vx, Vy)
            I::SkipNotEq { vx, vy } => (skip_if(cpu.reg(vx) != cpu.reg(vy)), Flow::Ok),
            // Annn (LD I, addr)
            I::LoadAddress { address } => {
                cpu.address = address.get();
                (Advance::Next, Flow::Ok)
            }
            // Bnnn (JP V0, addr)
            //
            // The target may lie past the end of memory, which the next fetch reports.
            I::JumpOffset { address } => {
                let target = address.get() as usize + cpu.reg(Reg::V0) as usize;
                (Advance::To(target), Flow::Jump)
            }
            // Cxkk (RND Vx, byte)
            I::Random { vx, kk } => {
                cpu.set_reg(vx, thread_rng().gen::<u8>() & kk);
                (Advance::Next, Flow::Ok)
            }
            // Dxyn (DRW Vx, Vy, nibble)
            //
            // Sprite rows are read from memory at I.
            // VF is set when any lit pixel is erased.
            I::Draw { vx, vy, n } => {
                let rows = n.get() as usize;
                let address = self.check_address_range(rows)?;
                let cpu = &mut self.cpu;

                let (x, y) = (cpu.reg(vx), cpu.reg(vy));
                let sprite = cpu.ram.slice(address, rows);
                let is_erased = cpu.display.draw_sprite(x, y, sprite);
                cpu.set_flag(is_erased);

                self.redraw = true;
                (Advance::Next, Flow::Draw)
            }
            // ----------------------------------------------------------------
            // Ex9E (SKP Vx)
            I::SkipKeyPressed { vx } => (skip_if(is_key_down(cpu, cpu.reg(vx))), Flow::Ok),
            // ExA1 (SKNP Vx)
            I::SkipKeyNotPressed { vx } => (skip_if(!is_key_down(cpu, cpu.reg(vx))), Flow::Ok),
            // ----------------------------------------------------------------
            // Fx07 (LD Vx, DT)
            I::LoadDelay { vx } => {
                cpu.set_reg(vx, cpu.delay_timer);
                (Advance::Next, Flow::Ok)
            }
            // Fx0A (LD Vx, K)
            //
            // Stall on this instruction until the keyboard latches a press.
            I::WaitKey { vx } => match cpu.keyboard.take_last_pressed() {
                Some(key) => {
                    cpu.set_reg(vx, key.as_u8());
                    self.set_sleeping(false);
                    (Advance::Next, Flow::Ok)
                }
                None => {
                    self.set_sleeping(true);
                    (Advance::Stay, Flow::KeyWait)
                }
            },
            // Fx15 (LD DT, Vx)
            I::SetDelay { vx } => {
                cpu.delay_timer = cpu.reg(vx);
                (Advance::Next, Flow::Ok)
            }
            // Fx18 (LD ST, Vx)
            I::SetSound { vx } => {
                cpu.sound_timer = cpu.reg(vx);
                (Advance::Next, Flow::Sound)
            }
            // Fx1E (ADD I, Vx)
            I::AddAddress { vx } => {
                cpu.address = cpu.address.wrapping_add(cpu.reg(vx) as Address);
                (Advance::Next, Flow::Ok)
            }
            // Fx29 (LD F, Vx)
            //
            // Set I = location of sprite for digit Vx.
            I::LoadFont { vx } => {
                let glyph = cpu.reg(vx) as usize * FONTSET_HEIGHT;
                cpu.address = (FONTSET_START + glyph) as Address;
                (Advance::Next, Flow::Ok)
            }
            // Fx33 (LD B, Vx)
            //
            // Store the binary-coded decimal representation of Vx
            // in the memory locations I, I+1, and I+2.
            #[rustfmt::skip]
            I::StoreBcd { vx } => {
                let addr = self.check_address_range(3)?;
                let cpu = &mut self.cpu;
                let x = cpu.reg(vx);
                cpu.ram.write_byte(addr,     x / 100 % 10);
                cpu.ram.write_byte(addr + 1, x / 10  % 10);
                cpu.ram.write_byte(addr + 2, x       % 10);
                (Advance::Next, Flow::Ok)
            }
            // Fx55 (LD [I], Vx)
            //
            // Store registers V0 through Vx in memory starting at location I.
            I::StoreRegisters { vx } => {
                let count = vx.index() + 1;
                let addr = self.check_address_range(count)?;
                let cpu = &mut self.cpu;
                cpu.ram.write_block(addr, &cpu.registers[..count]);
                (Advance::Next, Flow::Ok)
            }
            // Fx65 (LD Vx, [I])
            //
            // Read registers V0 through Vx from memory starting at location I.
            I::LoadRegisters { vx } => {
                let count = vx.index() + 1;
                let addr = self.check_address_range(count)?;
                let cpu = &mut self.cpu;
                cpu.registers[..count].copy_from_slice(cpu.ram.slice(addr, count));
                (Advance::Next, Flow::Ok)
            }
        };

        Ok(result)
    }
}

#[inline]
fn skip_if(cond: bool) -> Advance {
    if cond {
        Advance::Skip
    } else {
        Advance::Next
    }
}

/// Register values outside the keypad range are never pressed.
#[inline]
fn is_key_down(cpu: &Chip8Cpu, key_id: u8) -> bool {
    KeyCode::try_from(key_id)
        .map(|key| cpu.keyboard.is_down(key))
        .unwrap_or(false)
}

/// Troubleshooting
#[doc(hidden)]
impl Chip8Vm {
    /// Returns the program words in memory as a human readable string.
    pub fn dump_ram(&self, count: usize) -> Result<String, fmt::Error> {
        let mut buf = String::new();
        let end = (MEM_START + count).min(MEM_SIZE - 1);

        for addr in (MEM_START..end).step_by(2) {
            let word = self.cpu.ram.read_word(addr);
            match Instruction::decode(word) {
                Some(instr) => writeln!(buf, "{addr:04X}: {word:04X}  {instr}")?,
                None => writeln!(buf, "{addr:04X}: {word:04X}")?,
            }
        }

        Ok(buf)
    }

    pub fn dump_display(&self) -> String {
        self.cpu.display.to_string()
    }

    pub fn dump_keys(&self) -> Result<String, fmt::Error> {
        let mut buf = String::new();

        if self.cpu.keyboard.any_key() {
            write!(buf, "keys:")?;
            for key in self.cpu.keyboard.pressed_keys() {
                write!(buf, " {key}")?;
            }
        }

        Ok(buf)
    }
}

#[cfg(test)]
mod test {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::instruction::{assemble, Addr, Instruction as I, Nibble, Reg};

    fn v(index: u8) -> Reg {
        Reg::new(index).unwrap()
    }

    fn addr(address: u16) -> Addr {
        Addr::new(address).unwrap()
    }

    fn vm_with(program: &[I]) -> Chip8Vm {
        let mut vm = Chip8Vm::new(Chip8Conf::default());
        vm.load_bytecode(&assemble(program)).unwrap();
        vm
    }

    /// Records device signals for assertions.
    #[derive(Default, Clone)]
    struct Recorder {
        redraws: Arc<Mutex<usize>>,
        beeps: Arc<Mutex<usize>>,
        errors: Arc<Mutex<Vec<String>>>,
    }

    impl Devices for Recorder {
        fn redraw(&self) {
            *self.redraws.lock().unwrap() += 1;
        }

        fn beep(&self) {
            *self.beeps.lock().unwrap() += 1;
        }

        fn error(&self, err: &Chip8Error) {
            self.errors.lock().unwrap().push(err.to_string());
        }
    }

    #[test]
    fn test_clock_hz() {
        let interval: Duration = Hz(60).into();
        assert_eq!(interval.as_millis(), 16);

        let interval: Duration = Hz(0).into();
        assert_eq!(interval, Duration::ZERO);

        let conf = Chip8Conf::default();
        assert_eq!(conf.cpu_interval(), Duration::from_nanos(1_250_000));
    }

    #[test]
    fn test_load_bytecode() {
        let mut vm = Chip8Vm::new(Chip8Conf::default());
        vm.load_bytecode(&[0x12, 0x34]).unwrap();

        assert_eq!(vm.cpu().pc(), MEM_START);
        assert_eq!(vm.cpu().memory().read_word(MEM_START), 0x1234);
        assert_eq!(
            vm.cpu().memory().slice(FONTSET_START, FONTSET_DATA_LENGTH),
            &FONTSET[..]
        );
        assert_eq!(vm.state(), EmulatorState::Idle);

        assert_eq!(vm.run_cycle().unwrap(), Flow::Jump);
        assert_eq!(vm.cpu().pc(), 0x234);
    }

    #[test]
    fn test_load_max_program_size() {
        let recorder = Recorder::default();
        let mut vm = Chip8Vm::with_devices(Chip8Conf::default(), recorder.clone());
        assert!(vm.load_bytecode(&[0; MAX_PROGRAM_SIZE]).is_ok());

        vm.load_bytecode(&[0xAB, 0xCD]).unwrap();
        let err = vm.load_bytecode(&[0; MAX_PROGRAM_SIZE + 1]).unwrap_err();
        assert!(matches!(
            err,
            Chip8Error::InvalidRom { size, .. } if size == MAX_PROGRAM_SIZE + 1
        ));

        // Previous program survives a rejected load.
        assert_eq!(vm.cpu().memory().read_word(MEM_START), 0xABCD);
        assert_eq!(recorder.errors.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_add_carry() {
        let mut vm = vm_with(&[
            I::LoadByte { vx: v(0), kk: 0xFF },
            I::LoadByte { vx: v(1), kk: 0x02 },
            I::Add { vx: v(0), vy: v(1) },
            I::Add { vx: v(0), vy: v(1) },
        ]);

        vm.run_steps(3).unwrap();
        assert_eq!(vm.cpu().registers()[0], 0x01);
        assert_eq!(vm.cpu().registers()[0xF], 1);

        vm.run_cycle().unwrap();
        assert_eq!(vm.cpu().registers()[0], 0x03);
        assert_eq!(vm.cpu().registers()[0xF], 0);
    }

    /// The flag is written after the result, so it wins when the target is VF.
    #[test]
    fn test_add_into_flag_register() {
        let vf = Reg::VF;
        let mut vm = vm_with(&[
            I::LoadByte { vx: vf, kk: 0x10 },
            I::LoadByte { vx: v(1), kk: 0x10 },
            I::Add { vx: vf, vy: v(1) },
        ]);

        vm.run_steps(3).unwrap();
        assert_eq!(vm.cpu().registers()[0xF], 0);
    }

    #[test]
    fn test_sub_borrow() {
        let mut vm = vm_with(&[
            I::LoadByte { vx: v(0), kk: 0x05 },
            I::LoadByte { vx: v(1), kk: 0x07 },
            I::Sub { vx: v(0), vy: v(1) },
            I::LoadByte { vx: v(2), kk: 0x07 },
            I::LoadByte { vx: v(3), kk: 0x07 },
            I::Sub { vx: v(2), vy: v(3) },
            I::LoadByte { vx: v(4), kk: 0x05 },
            I::LoadByte { vx: v(5), kk: 0x07 },
            I::SubReverse { vx: v(4), vy: v(5) },
        ]);

        vm.run_steps(3).unwrap();
        assert_eq!(vm.cpu().registers()[0], 0xFE);
        assert_eq!(vm.cpu().registers()[0xF], 0);

        vm.run_steps(3).unwrap();
        assert_eq!(vm.cpu().registers()[2], 0);
        assert_eq!(vm.cpu().registers()[0xF], 1);

        vm.run_steps(3).unwrap();
        assert_eq!(vm.cpu().registers()[4], 2);
        assert_eq!(vm.cpu().registers()[0xF], 1);
    }

    #[test]
    fn test_shifts() {
        let mut vm = vm_with(&[
            I::LoadByte {
                vx: v(0),
                kk: 0b1000_0011,
            },
            I::ShiftRight { vx: v(0), vy: v(0) },
            I::ShiftLeft { vx: v(0), vy: v(0) },
            I::ShiftLeft { vx: v(0), vy: v(0) },
        ]);

        vm.run_steps(2).unwrap();
        assert_eq!(vm.cpu().registers()[0], 0b0100_0001);
        assert_eq!(vm.cpu().registers()[0xF], 1);

        vm.run_cycle().unwrap();
        assert_eq!(vm.cpu().registers()[0], 0b1000_0010);
        assert_eq!(vm.cpu().registers()[0xF], 0);

        vm.run_cycle().unwrap();
        assert_eq!(vm.cpu().registers()[0], 0b0000_0100);
        assert_eq!(vm.cpu().registers()[0xF], 1);
    }

    #[test]
    fn test_skips() {
        let mut vm = vm_with(&[
            I::LoadByte { vx: v(0), kk: 0x42 },
            I::SkipEqByte { vx: v(0), kk: 0x42 },
            I::ClearScreen,
            I::SkipNotEqByte { vx: v(0), kk: 0x42 },
            I::SkipEq { vx: v(0), vy: v(1) },
            I::SkipNotEq { vx: v(0), vy: v(1) },
        ]);

        vm.run_cycle().unwrap();
        vm.run_cycle().unwrap();
        assert_eq!(vm.cpu().pc(), 0x206);
        vm.run_cycle().unwrap();
        assert_eq!(vm.cpu().pc(), 0x208);
        vm.run_cycle().unwrap();
        assert_eq!(vm.cpu().pc(), 0x20A);
        vm.run_cycle().unwrap();
        assert_eq!(vm.cpu().pc(), 0x20E);
    }

    #[test]
    fn test_call_return() {
        let target = addr(0x300);
        let call = I::Call { address: target }.to_bytes();
        let mut program = vec![0; 0x102];
        program[..2].copy_from_slice(&call);
        program[0x100..].copy_from_slice(&I::Return.to_bytes());

        let mut vm = Chip8Vm::new(Chip8Conf::default());
        vm.load_bytecode(&program).unwrap();

        assert_eq!(vm.run_cycle().unwrap(), Flow::Jump);
        assert_eq!(vm.cpu().pc(), 0x300);
        assert_eq!(vm.cpu().stack().as_slice(), &[0x202]);

        assert_eq!(vm.run_cycle().unwrap(), Flow::Jump);
        assert_eq!(vm.cpu().pc(), 0x202);
        assert!(vm.cpu().stack().is_empty());
    }

    #[test]
    fn test_return_underflow() {
        let recorder = Recorder::default();
        let mut vm = Chip8Vm::with_devices(Chip8Conf::default(), recorder.clone());
        vm.load_bytecode(&assemble(&[I::Return])).unwrap();

        let err = vm.run_cycle().unwrap_err();
        assert!(matches!(err, Chip8Error::CorruptProgram(Corruption::StackUnderflow)));
        assert!(err.is_runtime());
        assert_eq!(vm.cpu().pc(), MEM_START);
        assert_eq!(recorder.errors.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_call_overflow() {
        // Recurse into itself until the stack is exhausted.
        let mut vm = vm_with(&[I::Call {
            address: addr(0x200),
        }]);

        vm.run_steps(STACK_SIZE).unwrap();
        assert!(vm.cpu().stack().is_full());

        let err = vm.run_cycle().unwrap_err();
        assert!(matches!(err, Chip8Error::CorruptProgram(Corruption::StackOverflow)));
        assert_eq!(vm.cpu().stack().len(), STACK_SIZE);
    }

    #[test]
    fn test_unrecognized_opcode() {
        let mut vm = Chip8Vm::new(Chip8Conf::default());
        vm.load_bytecode(&[0x60, 0x01, 0x5A, 0xB1]).unwrap();
        vm.run_cycle().unwrap();

        let err = vm.run_cycle().unwrap_err();
        assert!(matches!(
            err,
            Chip8Error::UnrecognizedOpcode {
                opcode: 0x5AB1,
                address: 0x202
            }
        ));
        assert_eq!(vm.cpu().pc(), 0x202);
    }

    #[test]
    fn test_jump_offset_out_of_memory() {
        let mut vm = vm_with(&[
            I::LoadByte { vx: v(0), kk: 0xFF },
            I::JumpOffset {
                address: addr(0xFFF),
            },
        ]);

        vm.run_steps(2).unwrap();
        assert_eq!(vm.cpu().pc(), 0xFFF + 0xFF);

        let err = vm.run_cycle().unwrap_err();
        assert!(matches!(
            err,
            Chip8Error::CorruptProgram(Corruption::MemoryOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_random_mask() {
        let mut vm = vm_with(&[
            I::LoadByte { vx: v(0), kk: 0xFF },
            I::Random { vx: v(0), kk: 0x0F },
        ]);

        vm.run_steps(2).unwrap();
        assert_eq!(vm.cpu().registers()[0] & 0xF0, 0);
    }

    /// Fx0A (LD Vx, K)
    ///
    /// Wait for a keypress, then store the key value in Vx.
    /// The VM must stall while waiting, and signal the state to the outer executer.
    #[test]
    fn test_key_wait() {
        let mut vm = vm_with(&[
            I::WaitKey { vx: v(1) },
            I::LoadByte { vx: v(2), kk: 0x42 }, // sentinel
        ]);
        vm.resume();

        // machine must stall
        assert_eq!(vm.run_cycle().unwrap(), Flow::KeyWait);
        assert_eq!(vm.cpu().pc(), MEM_START);
        assert_eq!(vm.run_cycle().unwrap(), Flow::KeyWait);
        assert_eq!(vm.cpu().pc(), MEM_START);
        assert_eq!(vm.state(), EmulatorState::Playing(GameState::Sleeping));

        vm.key_down(KeyCode::KeyA);
        assert_eq!(vm.run_cycle().unwrap(), Flow::Ok);
        assert_eq!(vm.cpu().pc(), MEM_START + 2);
        assert_eq!(vm.cpu().registers()[1], 0xA);
        assert_eq!(vm.state(), EmulatorState::Playing(GameState::Running));

        vm.run_cycle().unwrap();
        assert_eq!(vm.cpu().registers()[2], 0x42);
    }

    /// Waiting outside of play does not change the run state.
    #[test]
    fn test_key_wait_idle() {
        let mut vm = vm_with(&[I::WaitKey { vx: v(1) }]);

        assert_eq!(vm.run_cycle().unwrap(), Flow::KeyWait);
        assert_eq!(vm.state(), EmulatorState::Idle);
    }

    #[test]
    fn test_skip_key() {
        let mut vm = vm_with(&[
            I::LoadByte { vx: v(0), kk: 0x5 },
            I::SkipKeyNotPressed { vx: v(0) },
            I::SkipKeyPressed { vx: v(0) },
            I::ClearScreen,
            I::LoadByte { vx: v(1), kk: 0x10 },
            I::SkipKeyNotPressed { vx: v(1) },
        ]);
        vm.key_down(KeyCode::Key5);

        vm.run_steps(2).unwrap();
        assert_eq!(vm.cpu().pc(), 0x204);
        vm.run_cycle().unwrap();
        assert_eq!(vm.cpu().pc(), 0x208);

        // Values past the keypad are never pressed.
        vm.run_steps(2).unwrap();
        assert_eq!(vm.cpu().pc(), 0x20E);
    }

    #[test]
    fn test_draw_collision() {
        // Draw two sprites next to each other.
        // The zero bits of the second draw must not erase
        // the pixels of the first draw.
        //
        // draw sprite 1
        // ____####, vf == 0
        //
        // draw sprite 2
        // ####____, vf == 0
        let (v0, v1) = (v(0), v(1));
        let n = Nibble::new(1).unwrap();
        let mut program = assemble(&[
            I::LoadAddress {
                address: addr(0x20C),
            },
            I::LoadByte { vx: v0, kk: 4 },
            I::Draw { vx: v0, vy: v1, n },
            I::Draw { vx: v1, vy: v1, n },
            I::Draw { vx: v1, vy: v1, n },
            I::ClearScreen,
        ]);
        program.push(0b1111_0000);

        let recorder = Recorder::default();
        let mut vm = Chip8Vm::with_devices(Chip8Conf::default(), recorder.clone());
        vm.load_bytecode(&program).unwrap();

        vm.run_steps(2).unwrap();
        assert_eq!(vm.run_cycle().unwrap(), Flow::Draw);
        assert_eq!(vm.cpu().registers()[0xF], 0);
        vm.run_cycle().unwrap();
        assert_eq!(vm.cpu().registers()[0xF], 0);
        assert_eq!(vm.cpu().screen().lit_pixels().count(), 8);

        // Drawn over the first half.
        vm.run_cycle().unwrap();
        assert_eq!(vm.cpu().registers()[0xF], 1);
        assert!(!vm.pixel_at(0, 0));
        assert!(vm.pixel_at(4, 0));

        assert!(vm.redraw_pending());
        vm.tick_timers();
        assert!(!vm.redraw_pending());
        assert_eq!(*recorder.redraws.lock().unwrap(), 1);

        vm.run_cycle().unwrap();
        assert!(vm.display_buffer().iter().all(|px| !px));
        assert!(vm.redraw_pending());
    }

    #[test]
    fn test_draw_out_of_memory() {
        let v0 = v(0);
        let n = Nibble::new(3).unwrap();
        let mut vm = vm_with(&[
            I::LoadAddress {
                address: addr(0xFFE),
            },
            I::Draw { vx: v0, vy: v0, n },
        ]);

        vm.run_cycle().unwrap();
        let err = vm.run_cycle().unwrap_err();
        assert!(matches!(
            err,
            Chip8Error::CorruptProgram(Corruption::MemoryOutOfBounds { address: 0x1000 })
        ));
        assert_eq!(vm.cpu().screen().lit_pixels().count(), 0);
    }

    #[test]
    fn test_font_address() {
        let mut vm = vm_with(&[
            I::LoadByte { vx: v(0), kk: 0xA },
            I::LoadFont { vx: v(0) },
        ]);

        vm.run_steps(2).unwrap();
        assert_eq!(vm.cpu().address(), 50);
        assert_eq!(vm.cpu().memory().read_byte(50), 0xF0);
    }

    #[test]
    fn test_bcd() {
        let mut vm = vm_with(&[
            I::LoadByte { vx: v(3), kk: 254 },
            I::LoadAddress {
                address: addr(0x400),
            },
            I::StoreBcd { vx: v(3) },
        ]);

        vm.run_steps(3).unwrap();
        assert_eq!(vm.cpu().memory().slice(0x400, 3), &[2, 5, 4]);
    }

    #[test]
    fn test_store_load_registers() {
        let mut vm = vm_with(&[
            I::LoadByte { vx: v(0), kk: 1 },
            I::LoadByte { vx: v(1), kk: 2 },
            I::LoadByte { vx: v(2), kk: 3 },
            I::LoadAddress {
                address: addr(0x400),
            },
            I::StoreRegisters { vx: v(1) },
            I::LoadByte { vx: v(0), kk: 0 },
            I::LoadByte { vx: v(1), kk: 0 },
            I::LoadRegisters { vx: v(2) },
        ]);

        vm.run_steps(5).unwrap();
        // Only V0 through V1 are stored.
        assert_eq!(vm.cpu().memory().slice(0x400, 3), &[1, 2, 0]);
        assert_eq!(vm.cpu().address(), 0x400);

        vm.run_steps(3).unwrap();
        assert_eq!(&vm.cpu().registers()[..3], &[1, 2, 0]);
    }

    #[test]
    fn test_timers() {
        let recorder = Recorder::default();
        let mut vm = Chip8Vm::with_devices(Chip8Conf::default(), recorder.clone());
        vm.load_bytecode(&assemble(&[
            I::LoadByte { vx: v(0), kk: 2 },
            I::SetSound { vx: v(0) },
            I::SetDelay { vx: v(0) },
            I::LoadDelay { vx: v(1) },
        ]))
        .unwrap();

        vm.run_cycle().unwrap();
        assert_eq!(vm.run_cycle().unwrap(), Flow::Sound);
        vm.run_cycle().unwrap();

        for _ in 0..5 {
            vm.tick_timers();
        }
        assert_eq!(*recorder.beeps.lock().unwrap(), 2);
        assert_eq!(vm.cpu().sound_timer(), 0);

        vm.run_cycle().unwrap();
        assert_eq!(vm.cpu().registers()[1], 0);
    }

    #[test]
    fn test_add_address() {
        let mut vm = vm_with(&[
            I::LoadAddress {
                address: addr(0xFFF),
            },
            I::LoadByte { vx: v(0), kk: 0x01 },
            I::AddAddress { vx: v(0) },
        ]);

        vm.run_steps(3).unwrap();
        assert_eq!(vm.cpu().address(), 0x1000);
    }

    #[test]
    fn test_resume_suspend() {
        let mut vm = vm_with(&[I::ClearScreen]);
        assert_eq!(vm.state(), EmulatorState::Idle);

        vm.resume();
        vm.resume();
        assert_eq!(vm.state(), EmulatorState::Playing(GameState::Running));

        vm.run_cycle().unwrap();
        vm.suspend();
        assert_eq!(vm.state(), EmulatorState::Idle);
        assert_eq!(vm.cpu().pc(), 0x202);
    }

    #[test]
    fn test_dump() {
        let mut vm = vm_with(&[
            I::ClearScreen,
            I::Jump {
                address: addr(0x200),
            },
        ]);
        vm.key_down(KeyCode::Key1);
        vm.key_down(KeyCode::KeyC);

        let ram = vm.dump_ram(4).unwrap();
        let mut lines = ram.lines();
        assert_eq!(lines.next(), Some("0200: 00E0  CLS"));
        assert_eq!(lines.next(), Some("0202: 1200  JP 0x200"));
        assert_eq!(lines.next(), None);

        assert_eq!(vm.dump_keys().unwrap(), "keys: k1 kc");
        assert_eq!(vm.dump_display().lines().count(), DISPLAY_HEIGHT);
    }
}
