//! Adler-style rolling weak checksum
//!
//! The weak checksum is what lets the delta builder slide a window over new
//! content one byte at a time and ask "does this window match any block of the
//! basis?" in O(1) per step. `s1` accumulates the byte sum and `s2` the running
//! prefix sums, both truncated to 16 bits; the packed digest is
//! `(s2 << 16) | s1`.

/// Rolling checksum over a fixed-size window
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RollingChecksum {
    s1: u32,
    s2: u32,
    len: usize,
}

impl RollingChecksum {
    /// Create an empty checksum
    pub const fn new() -> Self {
        Self { s1: 0, s2: 0, len: 0 }
    }

    /// Compute the checksum of a whole block in one go
    pub fn of(block: &[u8]) -> Self {
        let mut sum = Self::new();
        sum.update(block);
        sum
    }

    /// Extend the window with `chunk`
    pub fn update(&mut self, chunk: &[u8]) {
        let mut s1 = self.s1;
        let mut s2 = self.s2;
        for &byte in chunk {
            s1 = s1.wrapping_add(u32::from(byte));
            s2 = s2.wrapping_add(s1);
        }
        self.s1 = s1 & 0xffff;
        self.s2 = s2 & 0xffff;
        self.len += chunk.len();
    }

    /// Slide the window forward by one byte
    ///
    /// `outgoing` must be the byte leaving the front of the window and
    /// `incoming` the byte entering at the back; the window length is
    /// unchanged.
    pub fn roll(&mut self, outgoing: u8, incoming: u8) {
        let window_len = self.len as u32;
        let out = u32::from(outgoing);
        let inn = u32::from(incoming);

        self.s1 = self.s1.wrapping_sub(out).wrapping_add(inn) & 0xffff;
        self.s2 = self
            .s2
            .wrapping_sub(window_len.wrapping_mul(out))
            .wrapping_add(self.s1)
            & 0xffff;
    }

    /// Reset to the empty window
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Number of bytes in the window
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the window is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Packed digest `(s2 << 16) | s1`
    pub fn digest(&self) -> u32 {
        (self.s2 << 16) | self.s1
    }
}
