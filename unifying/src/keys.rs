//! Key state input consumed by the radio session.
//!
//! The key matrix itself lives elsewhere in the firmware; the session only
//! sees the debounced [`KeyBitmap`] through the [`Keys`] capability.

use embassy_time::Duration;

/// HID scan codes referenced by the default configuration and tests.
pub mod scancode {
    pub const KEY_A: u8 = 0x04;
    pub const KEY_B: u8 = 0x05;
    pub const KEY_P: u8 = 0x13;
    pub const KEY_U: u8 = 0x18;
    pub const KEY_X: u8 = 0x1b;
    pub const KEY_LEFT_CONTROL: u8 = 0xe0;
    pub const KEY_RIGHT_ALT: u8 = 0xe6;
    /// Matrix-internal code for the FN key, never part of a HID report.
    pub const KEY_FN: u8 = 0xf0;
}

/// Modifier byte plus up to 6 pressed scan codes, as required for the HID
/// boot protocol: `[modifiers, reserved, key1..key6]`.
pub type SixKeySet = [u8; 8];

/// Bitmap containing the state of all keys indexed by HID scan code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct KeyBitmap {
    keys: [u32; 8],
}

impl KeyBitmap {
    /// Creates an empty bitmap with no keys pressed.
    pub const fn new() -> Self {
        Self { keys: [0; 8] }
    }

    /// Marks a single key as pressed.
    pub fn set(&mut self, scan_code: u8) {
        self.keys[scan_code as usize >> 5] |= 1 << (scan_code & 0x1f);
    }

    /// Marks a single key as released.
    pub fn clear(&mut self, scan_code: u8) {
        self.keys[scan_code as usize >> 5] &= !(1 << (scan_code & 0x1f));
    }

    /// Tests whether a single key is pressed.
    pub fn is_set(&self, scan_code: u8) -> bool {
        self.keys[scan_code as usize >> 5] & (1 << (scan_code & 0x1f)) != 0
    }

    /// Tests whether every key of `scan_codes` is pressed.
    pub fn contains_all(&self, scan_codes: &[u8]) -> bool {
        scan_codes.iter().all(|code| self.is_set(*code))
    }

    /// Finds the next pressed key at or after `start`.
    fn next_set_bit(&self, start: usize) -> Option<usize> {
        let mut pos = start;
        while pos < 256 {
            let word = pos >> 5;
            let bits = self.keys[word] >> (pos & 0x1f);
            if bits == 0 {
                pos = (word + 1) << 5;
                continue;
            }
            return Some(pos + bits.trailing_zeros() as usize);
        }
        None
    }

    /// Collects the boot-protocol report: the modifier byte plus the first
    /// six pressed non-modifier keys.
    pub fn to_6kro(&self) -> SixKeySet {
        let mut six_keys = [0u8; 8];
        // The modifier byte mirrors bitmap positions 0xe0..0xe8.
        six_keys[0] = (self.keys[scancode::KEY_LEFT_CONTROL as usize >> 5] & 0xff) as u8;

        let mut count = 0;
        let mut start = 0;
        while let Some(key) = self.next_set_bit(start) {
            if key >= scancode::KEY_LEFT_CONTROL as usize {
                break;
            }
            six_keys[2 + count] = key as u8;
            count += 1;
            if count == 6 {
                break;
            }
            start = key + 1;
        }
        six_keys
    }
}

/// Debounced key state capability provided by the key matrix scanner.
#[allow(async_fn_in_trait)]
pub trait Keys {
    /// Polls all keys and advances debouncing.
    ///
    /// `interval` is the time since the previous call to `poll`.
    async fn poll(&mut self, interval: Duration);

    /// Returns the current (debounced) state of all keys.
    fn state(&self) -> KeyBitmap;
}
