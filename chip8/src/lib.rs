mod clock;
pub mod constants;
mod cpu;
mod devices;
mod error;
mod instruction;
mod keyboard;
mod memory;
mod runner;
mod screen;
mod stack;
mod vm;

pub use self::vm::Hz;

/// Version of this interpreter implementation.
pub const IMPL_VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod prelude {
    pub use super::{
        cpu::Chip8Cpu,
        devices::{Devices, NullDevices},
        error::{Chip8Error, Chip8Result, Corruption},
        instruction::{assemble, Addr, Instruction, Nibble, Reg},
        keyboard::{InvalidKeyCode, KeyCode, Keyboard},
        memory::Memory,
        runner::Runner,
        screen::{Chip8DisplayBuffer, Screen},
        stack::Stack,
        vm::{Chip8Conf, Chip8Vm, EmulatorState, Flow, GameState, Hz},
    };
}
