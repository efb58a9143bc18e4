//! Instruction set.
//!
//! Every instruction is a 16-bit big-endian word. The highest nibble
//! identifies the instruction group, and the remaining nibbles either carry
//! operands or further select the instruction within the group.
//!
//! ```text
//! _nnn  12-bit address
//! _x__  register Vx
//! __y_  register Vy
//! __kk  8-bit immediate
//! ___n  4-bit immediate
//! ```
use std::fmt;

use crate::constants::REGISTER_COUNT;

/// Index of a general purpose register, `V0` to `VF`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reg(u8);

impl Reg {
    pub const V0: Reg = Reg(0x0);
    pub const VF: Reg = Reg(0xF);

    /// Returns `None` when the index is not a register.
    pub const fn new(index: u8) -> Option<Self> {
        if (index as usize) < REGISTER_COUNT {
            Some(Reg(index))
        } else {
            None
        }
    }

    /// Take the lowest nibble as register index.
    #[inline(always)]
    const fn nibble(value: u16) -> Self {
        Reg((value & 0xF) as u8)
    }

    #[inline(always)]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "v{:X}", self.0)
    }
}

/// 12-bit memory address operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Addr(u16);

impl Addr {
    pub const MAX: u16 = 0xFFF;

    /// Returns `None` when the value does not fit in 12 bits.
    pub const fn new(address: u16) -> Option<Self> {
        if address <= Self::MAX {
            Some(Addr(address))
        } else {
            None
        }
    }

    #[inline(always)]
    const fn masked(value: u16) -> Self {
        Addr(value & Self::MAX)
    }

    #[inline(always)]
    pub const fn get(self) -> u16 {
        self.0
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{:03X}", self.0)
    }
}

/// 4-bit immediate operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Nibble(u8);

impl Nibble {
    /// Returns `None` when the value does not fit in 4 bits.
    pub const fn new(value: u8) -> Option<Self> {
        if value <= 0xF {
            Some(Nibble(value))
        } else {
            None
        }
    }

    #[inline(always)]
    const fn masked(value: u16) -> Self {
        Nibble((value & 0xF) as u8)
    }

    #[inline(always)]
    pub const fn get(self) -> u8 {
        self.0
    }
}

/// Decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Instruction {
    /// 0nnn (SYS addr)
    ///
    /// Jump to a machine code routine at `nnn`.
    /// Only meaningful on the original hardware, and ignored by the interpreter.
    ///
    /// The addresses `0x0E0` and `0x0EE` encode as `CLS` and `RET`.
    /// Use [`Instruction::sys`] to build one that survives encoding.
    Sys { address: Addr },
    /// 00E0 (CLS)
    ///
    /// Clear the display.
    ClearScreen,
    /// 00EE (RET)
    ///
    /// Return from the sub-routine.
    Return,
    /// 1nnn (JP addr)
    ///
    /// Jump to the address in `nnn`.
    Jump { address: Addr },
    /// 2nnn (CALL addr)
    ///
    /// Call the sub-routine at address `nnn`.
    Call { address: Addr },
    /// 3xkk (SE Vx, byte)
    ///
    /// Skip the next instruction if register `Vx` equals value `kk`.
    SkipEqByte { vx: Reg, kk: u8 },
    /// 4xkk (SNE Vx, byte)
    ///
    /// Skip the next instruction if register `Vx` does not equal value `kk`.
    SkipNotEqByte { vx: Reg, kk: u8 },
    /// 5xy0 (SE Vx, Vy)
    ///
    /// Skip the next instruction if register `Vx` equals register `Vy`.
    SkipEq { vx: Reg, vy: Reg },
    /// 6xkk (LD Vx, byte)
    ///
    /// Set register `Vx` to value `kk`.
    LoadByte { vx: Reg, kk: u8 },
    /// 7xkk (ADD Vx, byte)
    ///
    /// Add byte to the value in register `Vx`. Overflow wraps, carry flag is not set.
    AddByte { vx: Reg, kk: u8 },

    // ------------------------------------------------------------------------
    // Math
    /// 8xy0 (LD Vx, Vy)
    ///
    /// Store the value of register `Vy` in register `Vx`.
    Load { vx: Reg, vy: Reg },
    /// 8xy1 (OR Vx, Vy)
    Or { vx: Reg, vy: Reg },
    /// 8xy2 (AND Vx, Vy)
    And { vx: Reg, vy: Reg },
    /// 8xy3 (XOR Vx, Vy)
    Xor { vx: Reg, vy: Reg },
    /// 8xy4 (ADD Vx, Vy)
    ///
    /// Overflow is wrapped. If overflowed, set VF to 1, else 0.
    Add { vx: Reg, vy: Reg },
    /// 8xy5 (SUB Vx, Vy)
    ///
    /// Subtracts `Vy` from `Vx`, and stores the result in `Vx`.
    /// VF is set to 0 when there is a borrow, set to 1 when there isn't.
    Sub { vx: Reg, vy: Reg },
    /// 8xy6 (SHR Vx {, Vy})
    ///
    /// VF is set to the least-significant bit of `Vx`, then `Vx` is shifted right by 1.
    /// `Vy` is encoded but not read.
    ShiftRight { vx: Reg, vy: Reg },
    /// 8xy7 (SUBN Vx, Vy)
    ///
    /// Subtracts `Vx` from `Vy`, and stores the result in `Vx`.
    /// VF is set to 0 when there is a borrow, set to 1 when there isn't.
    SubReverse { vx: Reg, vy: Reg },
    /// 8xyE (SHL Vx {, Vy})
    ///
    /// VF is set to the most-significant bit of `Vx`, then `Vx` is shifted left by 1.
    /// `Vy` is encoded but not read.
    ShiftLeft { vx: Reg, vy: Reg },

    /// 9xy0 (SNE Vx, Vy)
    ///
    /// Skip the next instruction if register `Vx` does not equal register `Vy`.
    SkipNotEq { vx: Reg, vy: Reg },
    /// Annn (LD I, addr)
    ///
    /// Load address into register `I`.
    LoadAddress { address: Addr },
    /// Bnnn (JP V0, addr)
    ///
    /// Jump to location `nnn + V0`.
    JumpOffset { address: Addr },
    /// Cxkk (RND Vx, byte)
    ///
    /// Set `Vx` to a random byte AND `kk`.
    Random { vx: Reg, kk: u8 },
    /// Dxyn (DRW Vx, Vy, nibble)
    ///
    /// Draw the `n` byte sprite at `I` to coordinates (`Vx`, `Vy`). VF is set on collision.
    Draw { vx: Reg, vy: Reg, n: Nibble },

    // ------------------------------------------------------------------------
    // Input
    /// Ex9E (SKP Vx)
    ///
    /// Skip the next instruction if the key with the value of `Vx` is pressed.
    SkipKeyPressed { vx: Reg },
    /// ExA1 (SKNP Vx)
    ///
    /// Skip the next instruction if the key with the value of `Vx` is not pressed.
    SkipKeyNotPressed { vx: Reg },

    // ------------------------------------------------------------------------
    // Misc
    /// Fx07 (LD Vx, DT)
    LoadDelay { vx: Reg },
    /// Fx0A (LD Vx, K)
    ///
    /// Wait for a key press, then store the value of the key in `Vx`.
    WaitKey { vx: Reg },
    /// Fx15 (LD DT, Vx)
    SetDelay { vx: Reg },
    /// Fx18 (LD ST, Vx)
    SetSound { vx: Reg },
    /// Fx1E (ADD I, Vx)
    AddAddress { vx: Reg },
    /// Fx29 (LD F, Vx)
    ///
    /// Set `I` to the location of the font glyph for digit `Vx`.
    LoadFont { vx: Reg },
    /// Fx33 (LD B, Vx)
    ///
    /// Store the binary-coded decimal digits of `Vx` at `I`, `I+1` and `I+2`.
    StoreBcd { vx: Reg },
    /// Fx55 (LD [I], Vx)
    ///
    /// Store registers `V0` through `Vx` in memory starting at `I`.
    StoreRegisters { vx: Reg },
    /// Fx65 (LD Vx, [I])
    ///
    /// Read registers `V0` through `Vx` from memory starting at `I`.
    LoadRegisters { vx: Reg },
}

impl Instruction {
    /// `SYS` call, or `None` when the address would encode as `CLS` or `RET`.
    pub fn sys(address: Addr) -> Option<Self> {
        match address.get() {
            0x0E0 | 0x0EE => None,
            _ => Some(Instruction::Sys { address }),
        }
    }

    /// Decode an opcode into an instruction.
    ///
    /// Returns `None` when the opcode does not match any known instruction.
    pub fn decode(opcode: u16) -> Option<Self> {
        use Instruction::*;

        let op = (opcode >> 12) & 0xF; // 0xF000
        let vx = Reg::nibble(opcode >> 8); // 0x0F00
        let vy = Reg::nibble(opcode >> 4); // 0x00F0
        let n = (opcode & 0xF) as u8; // 0x000F
        let kk = (opcode & 0xFF) as u8; // 0x00FF
        let address = Addr::masked(opcode); // 0x0FFF

        let instr = match op {
            0x0 => match opcode {
                0x00E0 => ClearScreen,
                0x00EE => Return,
                _ => Sys { address },
            },
            0x1 => Jump { address },
            0x2 => Call { address },
            0x3 => SkipEqByte { vx, kk },
            0x4 => SkipNotEqByte { vx, kk },
            0x5 if n == 0x0 => SkipEq { vx, vy },
            0x6 => LoadByte { vx, kk },
            0x7 => AddByte { vx, kk },
            0x8 => match n {
                0x0 => Load { vx, vy },
                0x1 => Or { vx, vy },
                0x2 => And { vx, vy },
                0x3 => Xor { vx, vy },
                0x4 => Add { vx, vy },
                0x5 => Sub { vx, vy },
                0x6 => ShiftRight { vx, vy },
                0x7 => SubReverse { vx, vy },
                0xE => ShiftLeft { vx, vy },
                _ => return None,
            },
            0x9 if n == 0x0 => SkipNotEq { vx, vy },
            0xA => LoadAddress { address },
            0xB => JumpOffset { address },
            0xC => Random { vx, kk },
            0xD => Draw {
                vx,
                vy,
                n: Nibble::masked(opcode),
            },
            0xE => match kk {
                0x9E => SkipKeyPressed { vx },
                0xA1 => SkipKeyNotPressed { vx },
                _ => return None,
            },
            0xF => match kk {
                0x07 => LoadDelay { vx },
                0x0A => WaitKey { vx },
                0x15 => SetDelay { vx },
                0x18 => SetSound { vx },
                0x1E => AddAddress { vx },
                0x29 => LoadFont { vx },
                0x33 => StoreBcd { vx },
                0x55 => StoreRegisters { vx },
                0x65 => LoadRegisters { vx },
                _ => return None,
            },
            _ => return None,
        };

        Some(instr)
    }

    /// Encode the instruction back into its opcode.
    pub fn encode(&self) -> u16 {
        use Instruction::*;

        match *self {
            Sys { address } => op_nnn(0x0, address),
            ClearScreen => 0x00E0,
            Return => 0x00EE,
            Jump { address } => op_nnn(0x1, address),
            Call { address } => op_nnn(0x2, address),
            SkipEqByte { vx, kk } => op_xkk(0x3, vx, kk),
            SkipNotEqByte { vx, kk } => op_xkk(0x4, vx, kk),
            SkipEq { vx, vy } => op_xyn(0x5, vx, vy, 0x0),
            LoadByte { vx, kk } => op_xkk(0x6, vx, kk),
            AddByte { vx, kk } => op_xkk(0x7, vx, kk),
            Load { vx, vy } => op_xyn(0x8, vx, vy, 0x0),
            Or { vx, vy } => op_xyn(0x8, vx, vy, 0x1),
            And { vx, vy } => op_xyn(0x8, vx, vy, 0x2),
            Xor { vx, vy } => op_xyn(0x8, vx, vy, 0x3),
            Add { vx, vy } => op_xyn(0x8, vx, vy, 0x4),
            Sub { vx, vy } => op_xyn(0x8, vx, vy, 0x5),
            ShiftRight { vx, vy } => op_xyn(0x8, vx, vy, 0x6),
            SubReverse { vx, vy } => op_xyn(0x8, vx, vy, 0x7),
            ShiftLeft { vx, vy } => op_xyn(0x8, vx, vy, 0xE),
            SkipNotEq { vx, vy } => op_xyn(0x9, vx, vy, 0x0),
            LoadAddress { address } => op_nnn(0xA, address),
            JumpOffset { address } => op_nnn(0xB, address),
            Random { vx, kk } => op_xkk(0xC, vx, kk),
            Draw { vx, vy, n } => op_xyn(0xD, vx, vy, n.get()),
            SkipKeyPressed { vx } => op_xkk(0xE, vx, 0x9E),
            SkipKeyNotPressed { vx } => op_xkk(0xE, vx, 0xA1),
            LoadDelay { vx } => op_xkk(0xF, vx, 0x07),
            WaitKey { vx } => op_xkk(0xF, vx, 0x0A),
            SetDelay { vx } => op_xkk(0xF, vx, 0x15),
            SetSound { vx } => op_xkk(0xF, vx, 0x18),
            AddAddress { vx } => op_xkk(0xF, vx, 0x1E),
            LoadFont { vx } => op_xkk(0xF, vx, 0x29),
            StoreBcd { vx } => op_xkk(0xF, vx, 0x33),
            StoreRegisters { vx } => op_xkk(0xF, vx, 0x55),
            LoadRegisters { vx } => op_xkk(0xF, vx, 0x65),
        }
    }

    /// Encode into the two bytes as they are laid out in memory.
    #[inline]
    pub fn to_bytes(&self) -> [u8; 2] {
        self.encode().to_be_bytes()
    }
}

/// Encode a sequence of instructions into program bytes.
pub fn assemble(program: &[Instruction]) -> Vec<u8> {
    program.iter().flat_map(Instruction::to_bytes).collect()
}

#[inline(always)]
fn op_nnn(op: u16, address: Addr) -> u16 {
    (op << 12) | address.get()
}

#[inline(always)]
fn op_xkk(op: u16, vx: Reg, kk: u8) -> u16 {
    (op << 12) | ((vx.0 as u16) << 8) | kk as u16
}

#[inline(always)]
fn op_xyn(op: u16, vx: Reg, vy: Reg, n: u8) -> u16 {
    (op << 12) | ((vx.0 as u16) << 8) | ((vy.0 as u16) << 4) | n as u16
}

impl TryFrom<u16> for Instruction {
    type Error = u16;

    /// Fails with the original opcode when it is not recognized.
    fn try_from(opcode: u16) -> Result<Self, Self::Error> {
        Instruction::decode(opcode).ok_or(opcode)
    }
}

impl From<Instruction> for u16 {
    fn from(instr: Instruction) -> Self {
        instr.encode()
    }
}

/// Assembly mnemonic representation.
impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use Instruction::*;

        match self {
            Sys { address } => write!(f, "SYS {address}"),
            ClearScreen => write!(f, "CLS"),
            Return => write!(f, "RET"),
            Jump { address } => write!(f, "JP {address}"),
            Call { address } => write!(f, "CALL {address}"),
            SkipEqByte { vx, kk } => write!(f, "SE {vx}, 0x{kk:02X}"),
            SkipNotEqByte { vx, kk } => write!(f, "SNE {vx}, 0x{kk:02X}"),
            SkipEq { vx, vy } => write!(f, "SE {vx}, {vy}"),
            LoadByte { vx, kk } => write!(f, "LD {vx}, 0x{kk:02X}"),
            AddByte { vx, kk } => write!(f, "ADD {vx}, 0x{kk:02X}"),
            // ------
            Load { vx, vy } => write!(f, "LD {vx}, {vy}"),
            Or { vx, vy } => write!(f, "OR {vx}, {vy}"),
            And { vx, vy } => write!(f, "AND {vx}, {vy}"),
            Xor { vx, vy } => write!(f, "XOR {vx}, {vy}"),
            Add { vx, vy } => write!(f, "ADD {vx}, {vy}"),
            Sub { vx, vy } => write!(f, "SUB {vx}, {vy}"),
            ShiftRight { vx, vy } => write!(f, "SHR {vx}, {vy}"),
            SubReverse { vx, vy } => write!(f, "SUBN {vx}, {vy}"),
            ShiftLeft { vx, vy } => write!(f, "SHL {vx}, {vy}"),
            // ------
            SkipNotEq { vx, vy } => write!(f, "SNE {vx}, {vy}"),
            LoadAddress { address } => write!(f, "LD I, {address}"),
            JumpOffset { address } => write!(f, "JP v0, {address}"),
            Random { vx, kk } => write!(f, "RND {vx}, 0x{kk:02X}"),
            Draw { vx, vy, n } => write!(f, "DRW {vx}, {vy}, {}", n.get()),
            SkipKeyPressed { vx } => write!(f, "SKP {vx}"),
            SkipKeyNotPressed { vx } => write!(f, "SKNP {vx}"),
            // ------
            LoadDelay { vx } => write!(f, "LD {vx}, DT"),
            WaitKey { vx } => write!(f, "LD {vx}, K"),
            SetDelay { vx } => write!(f, "LD DT, {vx}"),
            SetSound { vx } => write!(f, "LD ST, {vx}"),
            AddAddress { vx } => write!(f, "ADD I, {vx}"),
            LoadFont { vx } => write!(f, "LD F, {vx}"),
            StoreBcd { vx } => write!(f, "LD B, {vx}"),
            StoreRegisters { vx } => write!(f, "LD [I], {vx}"),
            LoadRegisters { vx } => write!(f, "LD {vx}, [I]"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn reg(index: u8) -> Reg {
        Reg::new(index).unwrap()
    }

    #[test]
    fn test_decode_groups() {
        assert_eq!(Instruction::decode(0x00E0), Some(Instruction::ClearScreen));
        assert_eq!(Instruction::decode(0x00EE), Some(Instruction::Return));
        assert_eq!(
            Instruction::decode(0x1234),
            Some(Instruction::Jump {
                address: Addr::new(0x234).unwrap()
            })
        );
        assert_eq!(
            Instruction::decode(0x8AB4),
            Some(Instruction::Add {
                vx: reg(0xA),
                vy: reg(0xB)
            })
        );
        assert_eq!(
            Instruction::decode(0xD125),
            Some(Instruction::Draw {
                vx: reg(1),
                vy: reg(2),
                n: Nibble::new(5).unwrap()
            })
        );
        assert_eq!(
            Instruction::decode(0xE3A1),
            Some(Instruction::SkipKeyNotPressed { vx: reg(3) })
        );
        assert_eq!(
            Instruction::decode(0xF465),
            Some(Instruction::LoadRegisters { vx: reg(4) })
        );
    }

    #[test]
    fn test_decode_sys() {
        assert_eq!(
            Instruction::decode(0x0123),
            Some(Instruction::Sys {
                address: Addr::new(0x123).unwrap()
            })
        );
    }

    #[test]
    fn test_sys_aliases() {
        for address in [0x0E0, 0x0EE] {
            let address = Addr::new(address).unwrap();
            assert_eq!(Instruction::sys(address), None, "{address}");
        }

        let instr = Instruction::sys(Addr::new(0x0E1).unwrap()).unwrap();
        assert_eq!(instr.encode(), 0x00E1);
        assert_eq!(Instruction::decode(instr.encode()), Some(instr));
    }

    #[test]
    fn test_decode_unrecognized() {
        for opcode in [
            0x5121, 0x8128, 0x812F, 0x9121, 0xE19F, 0xE1A2, 0xF1FF, 0xF100,
        ] {
            assert_eq!(Instruction::decode(opcode), None, "{opcode:04X}");
        }
        assert_eq!(Instruction::try_from(0x812F), Err(0x812F));
    }

    #[test]
    fn test_operand_ranges() {
        assert!(Reg::new(0xF).is_some());
        assert!(Reg::new(0x10).is_none());
        assert!(Addr::new(0xFFF).is_some());
        assert!(Addr::new(0x1000).is_none());
        assert!(Nibble::new(0x10).is_none());
    }

    #[test]
    fn test_display() {
        let instr = Instruction::decode(0xD015).unwrap();
        assert_eq!(instr.to_string(), "DRW v0, v1, 5");

        let instr = Instruction::decode(0x6A2F).unwrap();
        assert_eq!(instr.to_string(), "LD vA, 0x2F");

        let instr = Instruction::decode(0xA2F0).unwrap();
        assert_eq!(instr.to_string(), "LD I, 0x2F0");
    }

    #[test]
    fn test_to_bytes() {
        let instr = Instruction::Call {
            address: Addr::new(0x300).unwrap(),
        };
        assert_eq!(instr.to_bytes(), [0x23, 0x00]);
    }
}
