//! Call stack.
use crate::constants::*;

/// Bounded stack of return addresses.
///
/// Pushing onto a full stack or popping from an empty one panics.
/// Use [`Stack::is_full`] and [`Stack::is_empty`] to check first.
pub struct Stack {
    slots: [Address; STACK_SIZE],
    /// Number of occupied slots, also the index of the next free slot.
    len: usize,
}

impl Default for Stack {
    fn default() -> Self {
        Self {
            slots: [0; STACK_SIZE],
            len: 0,
        }
    }
}

impl Stack {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn push(&mut self, value: Address) {
        assert!(!self.is_full(), "call stack overflow");
        self.slots[self.len] = value;
        self.len += 1;
    }

    pub fn pop(&mut self) -> Address {
        assert!(!self.is_empty(), "call stack underflow");
        self.len -= 1;
        self.slots[self.len]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len == STACK_SIZE
    }

    pub fn clear(&mut self) {
        self.slots.fill(0);
        self.len = 0;
    }

    /// Occupied slots, bottom first.
    pub fn as_slice(&self) -> &[Address] {
        &self.slots[..self.len]
    }
}
