//! Result and errors.
use std::fmt::{self, Display, Formatter};

use crate::constants::Address;

pub type Chip8Result<T> = std::result::Result<T, Chip8Error>;

#[derive(Debug)]
pub enum Chip8Error {
    /// Attempt to load a bytecode program that can't fit in memory.
    InvalidRom { size: usize, max_size: usize },
    /// The fetched word does not decode to a known instruction.
    UnrecognizedOpcode { opcode: u16, address: Address },
    /// The program tried to breach one of the machine's structural limits.
    CorruptProgram(Corruption),
}

/// Structural limit that a malformed program attempted to break.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corruption {
    /// `CALL` with all sixteen stack levels in use.
    StackOverflow,
    /// `RET` with an empty call stack.
    StackUnderflow,
    /// Memory access outside of the 4KB address space.
    MemoryOutOfBounds { address: usize },
}

impl Chip8Error {
    /// Errors that the program itself caused while executing.
    pub fn is_runtime(&self) -> bool {
        matches!(
            self,
            Self::UnrecognizedOpcode { .. } | Self::CorruptProgram(_)
        )
    }
}

impl Display for Chip8Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRom { size, max_size } => write!(
                f,
                "program too large for VM memory: {size} bytes, maximum is {max_size}"
            ),
            Self::UnrecognizedOpcode { opcode, address } => {
                write!(f, "unrecognized opcode {opcode:04X} at {address:04X}")
            }
            Self::CorruptProgram(corruption) => write!(f, "corrupt program: {corruption}"),
        }
    }
}

impl Display for Corruption {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::StackOverflow => write!(f, "call stack overflow"),
            Self::StackUnderflow => write!(f, "call stack underflow"),
            Self::MemoryOutOfBounds { address } => {
                write!(f, "memory access out of bounds at {address:04X}")
            }
        }
    }
}

impl std::error::Error for Chip8Error {}

impl From<Corruption> for Chip8Error {
    fn from(corruption: Corruption) -> Self {
        Chip8Error::CorruptProgram(corruption)
    }
}
