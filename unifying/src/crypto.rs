//! Device-key derivation and per-report encryption.
//!
//! The device key is a fixed byte shuffle of the material exchanged during
//! pairing; each outgoing report is obfuscated with a single-use frame key
//! obtained by AES-encrypting a counter block under the device key.

use aes::Aes128;
use aes::cipher::{BlockEncrypt, KeyInit};

use crate::checksum::frame_checksum;
use crate::pairing::frames::{self, report_type};

pub const DEVICE_KEY_LEN: usize = 16;

/// Per-receiver encryption key, re-derivable from the pairing record.
pub type DeviceKey = [u8; DEVICE_KEY_LEN];

/// Inputs to the device-key derivation, packed in this order: device address
/// bytes 4..0 (without byte 0), device WPID, receiver WPID, device nonce,
/// receiver nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct KeyMaterial {
    pub device_address: [u8; 5],
    pub device_wpid: [u8; 2],
    pub dongle_wpid: [u8; 2],
    pub device_nonce: [u8; 4],
    pub dongle_nonce: [u8; 4],
}

/// Byte shuffle mapping packed material to key bytes:
/// `(key index, material index, xor mask)`.
///
/// This is the exact table the receiver applies; do not alter it.
const KEY_SHUFFLE: [(usize, usize, u8); DEVICE_KEY_LEN] = [
    (2, 0, 0x00),
    (1, 1, 0xff),
    (5, 2, 0xff),
    (3, 3, 0x00),
    (14, 4, 0x00),
    (11, 5, 0x00),
    (9, 6, 0x00),
    (0, 7, 0x00),
    (8, 8, 0x00),
    (6, 9, 0x55),
    (4, 10, 0x00),
    (15, 11, 0x00),
    (10, 12, 0xff),
    (12, 13, 0x00),
    (7, 14, 0x00),
    (13, 15, 0x55),
];

/// Derives the 16-byte device key from the pairing material.
///
/// Pure function: the same material always yields the same key, which is why
/// the key itself is never persisted.
pub fn derive_device_key(material: &KeyMaterial) -> DeviceKey {
    let mut packed = [0u8; DEVICE_KEY_LEN];
    packed[0] = material.device_address[4];
    packed[1] = material.device_address[3];
    packed[2] = material.device_address[2];
    packed[3] = material.device_address[1];
    packed[4..6].copy_from_slice(&material.device_wpid);
    packed[6..8].copy_from_slice(&material.dongle_wpid);
    packed[8..12].copy_from_slice(&material.device_nonce);
    packed[12..16].copy_from_slice(&material.dongle_nonce);

    let mut key = [0u8; DEVICE_KEY_LEN];
    for (key_index, material_index, mask) in KEY_SHUFFLE {
        key[key_index] = packed[material_index] ^ mask;
    }
    key
}

/// Template encrypted under the device key to produce a frame key. The
/// frame counter overwrites bytes 7..11, big endian.
const COUNTER_BLOCK: [u8; 16] = [
    0x04, 0x14, 0x1d, 0x1f, 0x27, 0x28, 0x0d, 0x00, 0x00, 0x00, 0x00, 0x0a, 0x0d, 0x13, 0x26,
    0x0e,
];

const COUNTER_OFFSET: usize = 7;

/// Builds encrypted keyboard report frames for one connected session.
///
/// The counter starts from a random value per session and must never repeat
/// under one device key; it advances only through [`commit`](Self::commit).
pub struct ReportEncryptor {
    cipher: Aes128,
    counter: u32,
}

impl ReportEncryptor {
    pub fn new(key: &DeviceKey, initial_counter: u32) -> Self {
        Self {
            cipher: Aes128::new(key.into()),
            counter: initial_counter,
        }
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    fn frame_key(&self, counter: u32) -> [u8; 16] {
        let mut block = COUNTER_BLOCK;
        block[COUNTER_OFFSET..COUNTER_OFFSET + 4].copy_from_slice(&counter.to_be_bytes());
        self.cipher.encrypt_block((&mut block).into());
        block
    }

    /// Builds the complete 22-byte encrypted report frame for the current
    /// counter value.
    ///
    /// The cleartext report is XOR-obfuscated with the frame key; the
    /// counter itself travels in clear so the receiver can recompute the
    /// same frame key.
    pub fn seal(&self, report: &[u8; 8]) -> [u8; frames::FRAME_LEN] {
        let frame_key = self.frame_key(self.counter);
        let mut frame = [0u8; frames::FRAME_LEN];
        frame[1] = report_type::ENCRYPTED_KEYBOARD | report_type::KEEP_ALIVE | 0x80;
        for i in 0..report.len() {
            frame[2 + i] = report[i] ^ frame_key[i];
        }
        frame[10..14].copy_from_slice(&self.counter.to_be_bytes());
        frame[21] = frame_checksum(&frame[..21]);
        frame
    }

    /// Advances the counter once a frame is known to have been delivered.
    pub fn commit(&mut self) {
        self.counter = self.counter.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::verify_frame;

    fn test_material() -> KeyMaterial {
        KeyMaterial {
            device_address: [0x01, 0x02, 0x03, 0x04, 0x05],
            device_wpid: [0x40, 0x03],
            dongle_wpid: [0xaa, 0xbb],
            device_nonce: [0x12, 0x34, 0x56, 0x78],
            dongle_nonce: [0x9a, 0xbc, 0xde, 0xf0],
        }
    }

    #[test]
    fn test_key_derivation_is_deterministic() {
        let material = test_material();
        assert_eq!(derive_device_key(&material), derive_device_key(&material));
    }

    #[test]
    fn test_key_derivation_packs_material() {
        // Spot-check a few table entries against the packed material.
        let material = test_material();
        let key = derive_device_key(&material);
        assert_eq!(key[2], material.device_address[4]);
        assert_eq!(key[1], material.device_address[3] ^ 0xff);
        assert_eq!(key[14], material.device_wpid[0]);
        assert_eq!(key[8], material.device_nonce[0]);
        assert_eq!(key[13], material.dongle_nonce[3] ^ 0x55);
    }

    #[test]
    fn test_key_changes_with_dongle_nonce() {
        let material = test_material();
        let mut changed = material;
        changed.dongle_nonce[0] ^= 0x01;
        assert_ne!(derive_device_key(&material), derive_device_key(&changed));
    }

    #[test]
    fn test_no_material_byte_is_discarded() {
        // Flipping any of the 16 packed input bytes must change the key.
        // Device address byte 0 is not part of the material.
        let material = test_material();
        let reference = derive_device_key(&material);

        let mut variants = std::vec::Vec::new();
        for i in 1..5 {
            let mut m = material;
            m.device_address[i] ^= 0xa5;
            variants.push(m);
        }
        for i in 0..2 {
            let mut m = material;
            m.device_wpid[i] ^= 0xa5;
            variants.push(m);
            let mut m = material;
            m.dongle_wpid[i] ^= 0xa5;
            variants.push(m);
        }
        for i in 0..4 {
            let mut m = material;
            m.device_nonce[i] ^= 0xa5;
            variants.push(m);
            let mut m = material;
            m.dongle_nonce[i] ^= 0xa5;
            variants.push(m);
        }

        assert_eq!(variants.len(), 16);
        for variant in variants {
            assert_ne!(derive_device_key(&variant), reference);
        }
    }

    #[test]
    fn test_xor_obfuscation_is_self_inverse() {
        let key = derive_device_key(&test_material());
        let encryptor = ReportEncryptor::new(&key, 0x1000);

        let report = [0x02, 0x04, 0x05, 0x00, 0x00, 0x00, 0x00, 0xc9];
        let frame = encryptor.seal(&report);
        let frame_key = encryptor.frame_key(encryptor.counter());

        let mut recovered = [0u8; 8];
        for i in 0..8 {
            recovered[i] = frame[2 + i] ^ frame_key[i];
        }
        assert_eq!(recovered, report);
    }

    #[test]
    fn test_sealed_frame_layout() {
        let key = derive_device_key(&test_material());
        let encryptor = ReportEncryptor::new(&key, 0xdeadc0de);

        let frame = encryptor.seal(&[0u8; 8]);
        assert_eq!(frame[0], 0);
        assert_eq!(frame[1], 0xd3);
        assert_eq!(&frame[10..14], &[0xde, 0xad, 0xc0, 0xde]);
        assert!(verify_frame(&frame));
    }

    #[test]
    fn test_frame_key_depends_on_counter() {
        let key = derive_device_key(&test_material());
        let mut encryptor = ReportEncryptor::new(&key, 7);

        let first = encryptor.frame_key(encryptor.counter());
        let report = [0u8; 8];
        let first_frame = encryptor.seal(&report);
        encryptor.commit();
        assert_eq!(encryptor.counter(), 8);
        let second_frame = encryptor.seal(&report);

        assert_ne!(encryptor.frame_key(8), first);
        assert_ne!(first_frame[2..10], second_frame[2..10]);
    }
}
