//! Radio keyboard configuration.

use crate::keys::scancode;
use crate::pairing::frames::{DeviceProtocol, DeviceType, PowerSwitchLocation, capability};

/// Identity and behavior of the keyboard as presented to the receiver.
///
/// The defaults describe the shipping goboard; boards with a different
/// matrix or product identity override individual fields.
///
/// # Example
///
/// ```ignore
/// use unifying::UnifyingConfig;
///
/// let config = UnifyingConfig {
///     device_name: "numpad",
///     ..Default::default()
/// };
/// assert!(config.validate());
/// ```
#[derive(Debug, Clone)]
pub struct UnifyingConfig {
    /// Name announced during pairing, at most 16 bytes.
    pub device_name: &'static str,

    /// Wireless product ID presented to the receiver.
    pub wpid: [u8; 2],

    pub protocol: DeviceProtocol,

    pub device_type: DeviceType,

    /// Capability bits announced in pairing request 1, see
    /// [`capability`].
    pub capabilities: u8,

    pub power_switch_location: PowerSwitchLocation,

    /// Keep-alive cadence in milliseconds, as advertised to the receiver.
    pub keepalive_interval_ms: u8,

    /// Consecutive undelivered frames before a connected session falls back
    /// to reconnecting.
    pub delivery_failure_limit: u8,

    /// Scan codes that must all be pressed to start pairing.
    pub pair_combo: &'static [u8],

    /// Scan codes that must all be pressed to drop the active pairing.
    pub unpair_combo: &'static [u8],

    /// Scan codes that must all be pressed to leave radio mode.
    pub radio_mode_combo: &'static [u8],
}

impl Default for UnifyingConfig {
    fn default() -> Self {
        Self {
            device_name: "goboard",
            // K270-class keyboard.
            wpid: [0x40, 0x03],
            protocol: DeviceProtocol::Unifying,
            device_type: DeviceType::Keyboard,
            capabilities: capability::LINK_ENCRYPTION
                | capability::BATTERY_STATUS
                | capability::UNIFYING_COMPATIBLE
                | capability::EXTRA,
            power_switch_location: PowerSwitchLocation::TopRightEdge,
            keepalive_interval_ms: 20,
            delivery_failure_limit: 3,
            pair_combo: &[scancode::KEY_FN, scancode::KEY_P],
            unpair_combo: &[scancode::KEY_FN, scancode::KEY_U],
            radio_mode_combo: &[scancode::KEY_FN, scancode::KEY_B],
        }
    }
}

impl UnifyingConfig {
    /// Maximum announced name length; the name field of pairing request 3 is
    /// 16 bytes.
    pub const MAX_NAME_LEN: usize = 16;

    /// Validates configuration parameters.
    pub fn validate(&self) -> bool {
        !self.device_name.is_empty()
            && self.device_name.len() <= Self::MAX_NAME_LEN
            && self.keepalive_interval_ms > 0
            && self.delivery_failure_limit > 0
            && !self.pair_combo.is_empty()
            && !self.unpair_combo.is_empty()
            && !self.radio_mode_combo.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        assert!(UnifyingConfig::default().validate());
    }

    #[test]
    fn test_overlong_name_rejected() {
        let config = UnifyingConfig {
            device_name: "a keyboard with a very long name",
            ..Default::default()
        };
        assert!(!config.validate());
    }

    #[test]
    fn test_empty_combo_rejected() {
        let config = UnifyingConfig {
            pair_combo: &[],
            ..Default::default()
        };
        assert!(!config.validate());
    }
}
