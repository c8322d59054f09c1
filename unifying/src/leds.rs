//! Status LED outputs.

/// Connection status shown by the mode LED.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ModeLed {
    Off,
    Charging,
    Disconnected,
    Pairing,
    Reconnecting,
    Connected,
}

/// LED capability provided by the board.
pub trait Leds {
    fn set_mode(&mut self, mode: ModeLed);
    fn set_caps_lock(&mut self, caps_lock: bool);
    fn set_scroll_lock(&mut self, scroll_lock: bool);
}
