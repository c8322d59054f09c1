//! Unifying-compatible wireless link for the goboard keyboard
//!
//! This crate implements the device side of a Logitech-Unifying-style
//! 2.4GHz radio link:
//!
//! - Channel-hopping link layer with failover retransmission ([`link`])
//! - Four-phase pairing handshake ([`pairing`])
//! - Device-key derivation and per-report encryption ([`crypto`])
//! - Persisted per-profile pairing records ([`store`])
//! - The keyboard session state machine driving all of the above
//!   ([`session`])
//!
//! Hardware is consumed through narrow capability traits: [`EsbRadio`] for
//! the radio, [`Keys`] for debounced key state, [`Leds`] for status LEDs and
//! [`PersistenceStore`] for non-volatile storage. The crate itself is
//! `no_std`; the `std` feature exists for host-side testing.
//!
//! # Example
//!
//! ```ignore
//! use unifying::{Profile, SessionShared, UnifyingConfig, UnifyingKeyboard};
//!
//! static SHARED: SessionShared = SessionShared::new(Profile::Profile1);
//!
//! let mut keyboard = UnifyingKeyboard::new(
//!     keys, leds, radio, storage, rng, UnifyingConfig::default(), &SHARED);
//! // The run future is the session worker; spawn it on its own task.
//! keyboard.run().await;
//! ```

#![cfg_attr(not(any(test, feature = "std")), no_std)]

// This mod MUST go first, so that the others see its macros.
mod fmt;

pub mod checksum;
pub mod config;
pub mod crypto;
pub mod keys;
pub mod leds;
pub mod link;
pub mod pairing;
pub mod session;
pub mod store;

// Re-export commonly used types
pub use config::UnifyingConfig;
pub use crypto::{DeviceKey, KeyMaterial, ReportEncryptor};
pub use keys::{KeyBitmap, Keys, SixKeySet};
pub use leds::{Leds, ModeLed};
pub use link::{EsbRadio, LinkError, Pipe, PipeAddress, RadioLink};
pub use pairing::PairingError;
pub use session::{SessionController, SessionShared, SessionState, UnifyingKeyboard};
pub use store::{DeviceInfo, PairingRecord, PairingStore, PersistenceStore, Profile, StoreError};

#[cfg(test)]
#[ctor::ctor]
fn init_test_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}
