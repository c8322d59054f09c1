//! Persisted pairing state, one record pair per keyboard profile.
//!
//! Records are encoded with `postcard` and written through the firmware's
//! [`PersistenceStore`] capability as opaque blobs. The device key is never
//! stored; it is re-derived from the pairing record on load.

use core::fmt;

use rand_core::RngCore;
use serde::{Deserialize, Serialize};

/// Keyboard profile selecting one persisted slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Profile {
    Profile1,
    Profile2,
}

impl Profile {
    pub const COUNT: usize = 2;

    pub fn index(self) -> usize {
        match self {
            Profile::Profile1 => 0,
            Profile::Profile2 => 1,
        }
    }
}

/// Kind of record stored under a [`RecordKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RecordKind {
    DeviceInfo,
    Pairing,
}

/// Key under which a record blob is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RecordKey {
    pub profile: Profile,
    pub kind: RecordKind,
}

impl RecordKey {
    /// Stable numeric form for stores keyed by integer.
    pub fn value(self) -> u16 {
        let kind = match self.kind {
            RecordKind::DeviceInfo => 0,
            RecordKind::Pairing => 1,
        };
        (self.profile.index() as u16) << 1 | kind
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StoreError {
    /// The backing store failed to read or write.
    Persistence,

    /// A blob did not encode or decode as a record.
    Encoding,

    /// The caller's buffer was too small for the stored blob.
    Truncated,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Persistence => write!(f, "Persistent store failure"),
            Self::Encoding => write!(f, "Record encoding failure"),
            Self::Truncated => write!(f, "Record buffer too small"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for StoreError {}

/// Non-volatile key-value capability provided by the firmware.
pub trait PersistenceStore {
    /// Loads the blob stored under `key` into `buf` and returns its length,
    /// or `None` if nothing is stored under `key`.
    fn load(&mut self, key: RecordKey, buf: &mut [u8]) -> Result<Option<usize>, StoreError>;

    /// Stores `data` under `key`, replacing any previous blob.
    fn save(&mut self, key: RecordKey, data: &[u8]) -> Result<(), StoreError>;
}

impl<P: PersistenceStore + ?Sized> PersistenceStore for &mut P {
    fn load(&mut self, key: RecordKey, buf: &mut [u8]) -> Result<Option<usize>, StoreError> {
        (**self).load(key, buf)
    }

    fn save(&mut self, key: RecordKey, data: &[u8]) -> Result<(), StoreError> {
        (**self).save(key, data)
    }
}

/// Radio identity generated once per profile and kept across power cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceInfo {
    pub pseudo_device_address: [u8; 5],
    pub device_serial: [u8; 4],
    pub valid: bool,
}

impl DeviceInfo {
    pub const fn empty() -> Self {
        Self {
            pseudo_device_address: [0; 5],
            device_serial: [0; 4],
            valid: false,
        }
    }

    fn generate(rng: &mut impl RngCore) -> Self {
        let mut info = Self::empty();
        rng.fill_bytes(&mut info.pseudo_device_address);
        rng.fill_bytes(&mut info.device_serial);
        info.valid = true;
        info
    }
}

/// Result of a completed pairing handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PairingRecord {
    /// Receiver-assigned address, prefix byte first.
    pub device_address: [u8; 5],
    pub device_nonce: [u8; 4],
    pub dongle_nonce: [u8; 4],
    pub dongle_wpid: [u8; 2],
    pub valid: bool,
}

impl PairingRecord {
    pub const fn empty() -> Self {
        Self {
            device_address: [0; 5],
            device_nonce: [0; 4],
            dongle_nonce: [0; 4],
            dongle_wpid: [0; 2],
            valid: false,
        }
    }
}

/// Encoded records are tiny; this bounds the postcard scratch buffer.
const BLOB_LEN: usize = 32;

/// Per-profile `DeviceInfo`/`PairingRecord` slots backed by the persistence
/// capability.
pub struct PairingStore<P: PersistenceStore> {
    backend: P,
    device_info: [DeviceInfo; Profile::COUNT],
    records: [PairingRecord; Profile::COUNT],
}

impl<P: PersistenceStore> PairingStore<P> {
    /// Loads both profiles from the backend. Profiles without a valid
    /// persisted identity get a freshly generated one, which is persisted
    /// immediately so it survives power cycles.
    pub fn load(backend: P, rng: &mut impl RngCore) -> Self {
        let mut store = Self {
            backend,
            device_info: [DeviceInfo::empty(); Profile::COUNT],
            records: [PairingRecord::empty(); Profile::COUNT],
        };

        for profile in [Profile::Profile1, Profile::Profile2] {
            let index = profile.index();
            let info_key = RecordKey {
                profile,
                kind: RecordKind::DeviceInfo,
            };
            store.device_info[index] = match store.load_blob::<DeviceInfo>(info_key) {
                Ok(Some(info)) if info.valid => info,
                Ok(_) => {
                    let info = DeviceInfo::generate(rng);
                    if store.save_blob(info_key, &info).is_err() {
                        warn!("device identity for profile {} not persisted", index);
                    }
                    info
                }
                Err(_) => {
                    warn!("device identity for profile {} unreadable", index);
                    let info = DeviceInfo::generate(rng);
                    let _ = store.save_blob(info_key, &info);
                    info
                }
            };

            let record_key = RecordKey {
                profile,
                kind: RecordKind::Pairing,
            };
            store.records[index] = match store.load_blob::<PairingRecord>(record_key) {
                Ok(Some(record)) if record.valid => record,
                Ok(_) => PairingRecord::empty(),
                Err(_) => {
                    warn!("pairing record for profile {} unreadable", index);
                    PairingRecord::empty()
                }
            };
        }
        store
    }

    pub fn device_info(&self, profile: Profile) -> &DeviceInfo {
        &self.device_info[profile.index()]
    }

    pub fn record(&self, profile: Profile) -> &PairingRecord {
        &self.records[profile.index()]
    }

    /// Persists a new pairing record for `profile`.
    ///
    /// If the write fails the in-memory record is reset as well, so the
    /// session never operates on a key the next boot will not have.
    pub fn store_record(
        &mut self,
        profile: Profile,
        record: PairingRecord,
    ) -> Result<(), StoreError> {
        let key = RecordKey {
            profile,
            kind: RecordKind::Pairing,
        };
        self.records[profile.index()] = record;
        match self.save_blob(key, &record) {
            Ok(()) => Ok(()),
            Err(error) => {
                self.records[profile.index()] = PairingRecord::empty();
                Err(error)
            }
        }
    }

    /// Drops the pairing record for `profile`, in memory and on the backend.
    pub fn invalidate_record(&mut self, profile: Profile) -> Result<(), StoreError> {
        let key = RecordKey {
            profile,
            kind: RecordKind::Pairing,
        };
        self.records[profile.index()] = PairingRecord::empty();
        self.save_blob(key, &PairingRecord::empty())
    }

    fn load_blob<T: for<'de> Deserialize<'de>>(
        &mut self,
        key: RecordKey,
    ) -> Result<Option<T>, StoreError> {
        let mut buf = [0u8; BLOB_LEN];
        match self.backend.load(key, &mut buf)? {
            Some(len) => postcard::from_bytes(&buf[..len])
                .map(Some)
                .map_err(|_| StoreError::Encoding),
            None => Ok(None),
        }
    }

    fn save_blob<T: Serialize>(&mut self, key: RecordKey, value: &T) -> Result<(), StoreError> {
        let mut buf = [0u8; BLOB_LEN];
        let used = postcard::to_slice(value, &mut buf).map_err(|_| StoreError::Encoding)?;
        self.backend.save(key, used)
    }
}
