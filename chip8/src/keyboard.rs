//! Hexadecimal keypad.
use crate::constants::*;

/// The 16 keys of the COSMAC VIP keypad.
///
/// ```text
/// 1 2 3 C
/// 4 5 6 D
/// 7 8 9 E
/// A 0 B F
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum KeyCode {
    Key0 = 0,
    Key1,
    Key2,
    Key3,
    Key4,
    Key5,
    Key6,
    Key7,
    Key8,
    Key9,
    KeyA,
    KeyB,
    KeyC,
    KeyD,
    KeyE,
    KeyF = 0xF,
}

impl KeyCode {
    pub const ALL: [KeyCode; KEY_COUNT as usize] = [
        Self::Key0,
        Self::Key1,
        Self::Key2,
        Self::Key3,
        Self::Key4,
        Self::Key5,
        Self::Key6,
        Self::Key7,
        Self::Key8,
        Self::Key9,
        Self::KeyA,
        Self::KeyB,
        Self::KeyC,
        Self::KeyD,
        Self::KeyE,
        Self::KeyF,
    ];

    #[inline(always)]
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    #[inline(always)]
    fn mask(&self) -> u16 {
        1 << self.as_u8()
    }
}

impl std::fmt::Display for KeyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let key_id = self.as_u8();
        write!(f, "k{key_id:x}")
    }
}

impl From<KeyCode> for u8 {
    fn from(keycode: KeyCode) -> Self {
        keycode.as_u8()
    }
}

impl TryFrom<u8> for KeyCode {
    type Error = InvalidKeyCode;

    fn try_from(key_id: u8) -> Result<Self, Self::Error> {
        KeyCode::ALL
            .get(key_id as usize)
            .copied()
            .ok_or(InvalidKeyCode(key_id))
    }
}

/// Raw key identifier outside of the keypad range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidKeyCode(pub u8);

impl std::error::Error for InvalidKeyCode {}

impl std::fmt::Display for InvalidKeyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "keycode must be in range 0 <= keycode < 16, got {}",
            self.0
        )
    }
}

/// Keypad input state.
///
/// Pressed keys are stored as set bits. The most recent key press is
/// latched separately so that a program waiting for input sees a key even
/// if it was released before the interpreter got around to checking.
#[derive(Debug, Default)]
pub struct Keyboard {
    /// Pressed is a 1 bit, released is a 0 bit.
    state: u16,
    last_pressed: Option<KeyCode>,
}

impl Keyboard {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn press(&mut self, key: KeyCode) {
        self.state |= key.mask();
        self.last_pressed = Some(key);
    }

    pub fn release(&mut self, key: KeyCode) {
        self.state &= !key.mask();
    }

    #[inline]
    pub fn is_down(&self, key: KeyCode) -> bool {
        self.state & key.mask() != 0
    }

    /// Check whether any key is pressed down.
    #[inline(always)]
    pub fn any_key(&self) -> bool {
        self.state != 0
    }

    /// Return and clear the latched key press.
    pub fn take_last_pressed(&mut self) -> Option<KeyCode> {
        self.last_pressed.take()
    }

    /// Keys currently held down, in ascending order.
    pub fn pressed_keys(&self) -> impl Iterator<Item = KeyCode> + '_ {
        KeyCode::ALL
            .into_iter()
            .filter(move |key| self.is_down(*key))
    }

    /// Set all keys to up and forget the latched press.
    pub fn clear(&mut self) {
        self.state = 0;
        self.last_pressed = None;
    }
}

#[cfg(feature = "serde")]
mod de {
    use serde::de::{Deserialize, Error, Unexpected, Visitor};

    use super::*;

    impl<'de> Deserialize<'de> for KeyCode {
        fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
        where
            D: serde::Deserializer<'de>,
        {
            // YAML integer type
            deserializer.deserialize_i64(KeyCodeVisitor)
        }
    }

    struct KeyCodeVisitor;

    impl<'de> Visitor<'de> for KeyCodeVisitor {
        type Value = KeyCode;

        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            write!(f, "an integer between 0 and 15")
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: Error,
        {
            u8::try_from(v)
                .ok()
                .and_then(|key_id| KeyCode::try_from(key_id).ok())
                .ok_or_else(|| E::invalid_value(Unexpected::Signed(v), &self))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: Error,
        {
            u8::try_from(v)
                .ok()
                .and_then(|key_id| KeyCode::try_from(key_id).ok())
                .ok_or_else(|| E::invalid_value(Unexpected::Unsigned(v), &self))
        }
    }
}
