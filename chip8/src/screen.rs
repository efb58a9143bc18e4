//! Monochrome framebuffer.
use std::fmt;

use crate::constants::*;

/// Display buffer, stored row by row.
pub type Chip8DisplayBuffer<'a> = &'a [bool; DISPLAY_BUFFER_SIZE];

/// 64x32 grid of pixels that are either on or off.
pub struct Screen {
    pixels: Box<[bool; DISPLAY_BUFFER_SIZE]>,
}

impl Default for Screen {
    fn default() -> Self {
        Self {
            pixels: Box::new([false; DISPLAY_BUFFER_SIZE]),
        }
    }
}

impl Screen {
    pub fn new() -> Self {
        Default::default()
    }

    /// Turn every pixel off.
    pub fn clear(&mut self) {
        self.pixels.fill(false);
    }

    /// State of the pixel at column `x`, row `y`.
    ///
    /// Panics when the coordinate lies outside the screen.
    pub fn pixel_at(&self, x: usize, y: usize) -> bool {
        assert!(
            x < DISPLAY_WIDTH && y < DISPLAY_HEIGHT,
            "pixel out of bounds: ({x}, {y})"
        );
        self.pixels[x + y * DISPLAY_WIDTH]
    }

    /// XOR a sprite onto the screen with its top-left corner at (`x`, `y`).
    ///
    /// Each byte in `rows` is one 8 pixel row, most significant bit on the
    /// left. Pixels that fall off an edge wrap around to the opposite side.
    ///
    /// Returns `true` when a lit pixel was turned off, which programs use for
    /// collision detection.
    pub fn draw_sprite(&mut self, x: u8, y: u8, rows: &[u8]) -> bool {
        let (x, y) = (x as usize, y as usize);
        let mut is_erased = false;

        for (r, row) in rows.iter().enumerate() {
            for c in 0..SPRITE_WIDTH {
                let new_px = (row >> (7 - c) & 1) != 0;
                if !new_px {
                    continue;
                }

                let d = ((x + c) & DISPLAY_WIDTH_MASK)
                    + ((y + r) & DISPLAY_HEIGHT_MASK) * DISPLAY_WIDTH;

                // XOR erases a pixel when both the old and new values are 1.
                is_erased |= self.pixels[d];
                self.pixels[d] = !self.pixels[d];
            }
        }

        is_erased
    }

    pub fn buffer(&self) -> Chip8DisplayBuffer {
        &self.pixels
    }

    /// Iterate the coordinates of all lit pixels.
    pub fn lit_pixels(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.pixels
            .iter()
            .enumerate()
            .filter(|(_, px)| **px)
            .map(|(i, _)| (i % DISPLAY_WIDTH, i / DISPLAY_WIDTH))
    }
}

/// Text rendering, one line per row, `#` for lit and `.` for unlit pixels.
impl fmt::Display for Screen {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for row in self.pixels.chunks(DISPLAY_WIDTH) {
            for px in row {
                if *px {
                    write!(f, "#")?;
                } else {
                    write!(f, ".")?;
                }
            }
            writeln!(f)?;
        }

        Ok(())
    }
}
