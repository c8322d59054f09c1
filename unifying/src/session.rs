//! Per-profile keyboard session.
//!
//! [`UnifyingKeyboard::run`] is the session worker: a single future owning
//! the radio link, the pairing store and the report encryptor, and moving
//! between the idle, pairing, reconnecting and connected states. The owning
//! context only ever touches the session through [`SessionController`],
//! which shares a profile cell, a stop flag and a wakeup channel with the
//! worker.

use core::cell::Cell;
use core::sync::atomic::{AtomicBool, Ordering};

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Duration, with_timeout};
use rand_core::RngCore;

use crate::config::UnifyingConfig;
use crate::crypto::{self, ReportEncryptor};
use crate::keys::{KeyBitmap, Keys};
use crate::leds::{Leds, ModeLed};
use crate::link::{EsbRadio, LinkError, Pipe, RadioLink};
use crate::pairing::frames::{self, InboundReport};
use crate::pairing::{self, PairingError};
use crate::store::{PairingRecord, PairingStore, PersistenceStore, Profile};

/// Poll cadence while idle or waiting to reconnect.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Poll cadence while connected.
const CONNECTED_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Idle polls between reconnection attempts, one attempt per second.
const RECONNECT_POLL_COUNT: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionState {
    Idle,
    Pairing,
    Reconnecting,
    Connected,
    Stopping,
}

/// Event delivered to the session worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionEvent {
    /// Re-check shared state now instead of waiting out the poll interval.
    Wakeup,
    /// Terminate the session worker.
    Stop,
}

/// State shared between the session worker and its owner.
///
/// Typically a `static`, created before the worker is spawned.
pub struct SessionShared {
    profile: Mutex<CriticalSectionRawMutex, Cell<Profile>>,
    stop: AtomicBool,
    radio_shutdown: AtomicBool,
    events: Channel<CriticalSectionRawMutex, SessionEvent, 4>,
}

impl SessionShared {
    pub const fn new(profile: Profile) -> Self {
        Self {
            profile: Mutex::new(Cell::new(profile)),
            stop: AtomicBool::new(false),
            radio_shutdown: AtomicBool::new(false),
            events: Channel::new(),
        }
    }

    /// Handle for the owning context.
    pub fn controller(&self) -> SessionController<'_> {
        SessionController { shared: self }
    }

    /// Flag aborting in-flight transmissions, shared with
    /// [`RadioLink::new`].
    pub fn radio_shutdown(&self) -> &AtomicBool {
        &self.radio_shutdown
    }
}

/// Owner-side control handle of a session.
#[derive(Clone, Copy)]
pub struct SessionController<'a> {
    shared: &'a SessionShared,
}

impl SessionController<'_> {
    /// Profile as requested by the owner; the worker may still be switching
    /// over to it.
    pub fn profile(&self) -> Profile {
        self.shared.profile.lock(|cell| cell.get())
    }

    /// Requests a profile switch. The worker restarts device selection on
    /// its next wakeup, which this triggers immediately.
    pub fn set_profile(&self, profile: Profile) {
        self.shared.profile.lock(|cell| cell.set(profile));
        let _ = self.shared.events.try_send(SessionEvent::Wakeup);
    }

    /// Shuts the session down.
    ///
    /// The radio is shut down before the worker is woken, so that a send
    /// blocked in failover returns immediately instead of finishing its
    /// cycle. The caller then awaits the worker's
    /// [`run`](UnifyingKeyboard::run) future.
    pub fn request_stop(&self) {
        self.shared.stop.store(true, Ordering::Release);
        self.shared.radio_shutdown.store(true, Ordering::Release);
        let _ = self.shared.events.try_send(SessionEvent::Stop);
    }
}

/// Outcome of one keyboard poll.
enum Poll {
    Keys(KeyBitmap),
    Transition(SessionState),
}

/// Logitech Unifying keyboard session.
pub struct UnifyingKeyboard<'a, K, L, R, P, G>
where
    K: Keys,
    L: Leds,
    R: EsbRadio,
    P: PersistenceStore,
    G: RngCore,
{
    keys: K,
    leds: L,
    link: RadioLink<'a, R>,
    store: PairingStore<P>,
    rng: G,
    config: UnifyingConfig,
    shared: &'a SessionShared,
    /// Profile the worker is acting on, trailing the shared cell.
    profile: Profile,
    state: SessionState,
    encryptor: Option<ReportEncryptor>,
    last_keys: KeyBitmap,
    delivery_failures: u8,
    fn_latched: bool,
}

impl<'a, K, L, R, P, G> UnifyingKeyboard<'a, K, L, R, P, G>
where
    K: Keys,
    L: Leds,
    R: EsbRadio,
    P: PersistenceStore,
    G: RngCore,
{
    /// Creates the session, loading persisted pairing state.
    ///
    /// A session with a valid pairing record for the active profile starts
    /// out reconnecting; otherwise it starts idle.
    pub fn new(
        keys: K,
        leds: L,
        radio: R,
        backend: P,
        mut rng: G,
        config: UnifyingConfig,
        shared: &'a SessionShared,
    ) -> Self {
        debug_assert!(config.validate());
        let store = PairingStore::load(backend, &mut rng);
        let profile = shared.profile.lock(|cell| cell.get());
        let state = if store.record(profile).valid {
            SessionState::Reconnecting
        } else {
            SessionState::Idle
        };
        Self {
            keys,
            leds,
            link: RadioLink::new(radio, &shared.radio_shutdown),
            store,
            rng,
            config,
            shared,
            profile,
            state,
            encryptor: None,
            last_keys: KeyBitmap::new(),
            delivery_failures: 0,
            fn_latched: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Runs the session until it is stopped.
    ///
    /// This future is the worker context: it has exclusive ownership of the
    /// session state, the radio link and the pairing store for its entire
    /// lifetime.
    pub async fn run(&mut self) {
        loop {
            let next = match self.state {
                SessionState::Idle => self.idle().await,
                SessionState::Pairing => self.pairing().await,
                SessionState::Reconnecting => self.reconnecting().await,
                SessionState::Connected => self.connected().await,
                SessionState::Stopping => break,
            };
            self.state = next;
        }
        self.leds.set_mode(ModeLed::Off);
        info!("session stopped");
    }

    async fn idle(&mut self) -> SessionState {
        self.leds.set_mode(ModeLed::Disconnected);
        loop {
            match self.poll_keyboard(IDLE_POLL_INTERVAL).await {
                Poll::Transition(next) => return next,
                Poll::Keys(_) => {}
            }
        }
    }

    async fn pairing(&mut self) -> SessionState {
        self.leds.set_mode(ModeLed::Pairing);
        let device = *self.store.device_info(self.profile);
        match pairing::pair(&mut self.link, &self.config, &device, &mut self.rng).await {
            Ok((record, key)) => {
                if self.store.store_record(self.profile, record).is_err() {
                    error!(
                        "pairing record for profile {} could not be persisted",
                        self.profile.index()
                    );
                    return SessionState::Idle;
                }
                self.encryptor = Some(ReportEncryptor::new(&key, self.rng.next_u32()));
                SessionState::Connected
            }
            Err(PairingError::Link(LinkError::Shutdown)) => SessionState::Stopping,
            Err(_) => {
                warn!("pairing failed");
                SessionState::Idle
            }
        }
    }

    async fn reconnecting(&mut self) -> SessionState {
        self.leds.set_mode(ModeLed::Reconnecting);
        let record = *self.store.record(self.profile);
        if !record.valid {
            return SessionState::Idle;
        }
        if self.encryptor.is_none() {
            let key = crypto::derive_device_key(&pairing::key_material(&self.config, &record));
            self.encryptor = Some(ReportEncryptor::new(&key, self.rng.next_u32()));
        }
        if let Err(error) = self.prepare_link(&record) {
            return self.link_fault(error);
        }

        let mut polls_until_attempt = 0u32;
        loop {
            if polls_until_attempt == 0 {
                polls_until_attempt = RECONNECT_POLL_COUNT;
                match self.reassociate().await {
                    Ok(()) => return SessionState::Connected,
                    Err(LinkError::Shutdown) => return SessionState::Stopping,
                    Err(_) => debug!("reconnect attempt failed"),
                }
            }
            match self.poll_keyboard(IDLE_POLL_INTERVAL).await {
                Poll::Transition(next) => return next,
                Poll::Keys(_) => polls_until_attempt -= 1,
            }
        }
    }

    async fn connected(&mut self) -> SessionState {
        self.leds.set_mode(ModeLed::Connected);
        self.delivery_failures = 0;
        self.last_keys = self.keys.state();
        loop {
            let bitmap = match self.poll_keyboard(CONNECTED_POLL_INTERVAL).await {
                Poll::Transition(next) => return next,
                Poll::Keys(bitmap) => bitmap,
            };
            let result = if bitmap != self.last_keys {
                self.send_report(&bitmap).await
            } else {
                self.send_keep_alive().await
            };
            match result {
                Ok(()) => self.delivery_failures = 0,
                Err(LinkError::Shutdown) => return SessionState::Stopping,
                Err(_) => {
                    self.delivery_failures = self.delivery_failures.saturating_add(1);
                    if self.delivery_failures >= self.config.delivery_failure_limit {
                        warn!("link lost, reconnecting");
                        return SessionState::Reconnecting;
                    }
                }
            }
        }
    }

    /// Sleeps until the next poll tick or a wakeup event, then polls the
    /// keys and the shared control state.
    async fn poll_keyboard(&mut self, interval: Duration) -> Poll {
        match with_timeout(interval, self.shared.events.receive()).await {
            Ok(SessionEvent::Stop) => return Poll::Transition(SessionState::Stopping),
            Ok(SessionEvent::Wakeup) | Err(_) => {}
        }
        if self.shared.stop.load(Ordering::Acquire) {
            return Poll::Transition(SessionState::Stopping);
        }
        if let Some(next) = self.profile_change() {
            return Poll::Transition(next);
        }
        self.keys.poll(interval).await;
        let bitmap = self.keys.state();
        if let Some(next) = self.process_fn_keys(&bitmap) {
            return Poll::Transition(next);
        }
        Poll::Keys(bitmap)
    }

    /// Picks up a profile switch requested by the owner. The current phase
    /// is abandoned rather than continued with the old profile's keys.
    fn profile_change(&mut self) -> Option<SessionState> {
        let requested = self.shared.profile.lock(|cell| cell.get());
        if requested == self.profile {
            return None;
        }
        info!("switching to profile {}", requested.index());
        self.profile = requested;
        self.encryptor = None;
        Some(self.start_state())
    }

    fn start_state(&self) -> SessionState {
        if self.store.record(self.profile).valid {
            SessionState::Reconnecting
        } else {
            SessionState::Idle
        }
    }

    /// Handles the pair/unpair/mode-switch function key combinations.
    /// A combination fires once per press; all keys must be released before
    /// the next one is accepted.
    fn process_fn_keys(&mut self, bitmap: &KeyBitmap) -> Option<SessionState> {
        let pair = bitmap.contains_all(self.config.pair_combo);
        let unpair = bitmap.contains_all(self.config.unpair_combo);
        let mode = bitmap.contains_all(self.config.radio_mode_combo);
        if !(pair || unpair || mode) {
            self.fn_latched = false;
            return None;
        }
        if self.fn_latched {
            return None;
        }
        self.fn_latched = true;

        if mode {
            // Hand the radio back to the firmware for a mode change.
            info!("mode switch requested");
            return Some(SessionState::Stopping);
        }
        if pair {
            self.discard_pairing();
            return Some(SessionState::Pairing);
        }
        self.discard_pairing();
        Some(SessionState::Idle)
    }

    fn discard_pairing(&mut self) {
        self.encryptor = None;
        if self.store.invalidate_record(self.profile).is_err() {
            error!(
                "pairing record for profile {} could not be cleared",
                self.profile.index()
            );
        }
    }

    fn prepare_link(&mut self, record: &PairingRecord) -> Result<(), LinkError> {
        self.link.set_normal_channels()?;
        self.link.configure_device_address(&record.device_address)
    }

    fn link_fault(&mut self, error: LinkError) -> SessionState {
        match error {
            LinkError::Shutdown => SessionState::Stopping,
            _ => {
                error!("radio fault");
                SessionState::Idle
            }
        }
    }

    /// Lightweight re-association with a paired receiver: an acknowledged
    /// keep-alive on the stored device address.
    async fn reassociate(&mut self) -> Result<(), LinkError> {
        let frame = frames::keep_alive(self.config.keepalive_interval_ms);
        let ack = self.link.send(Pipe::Device, &frame).await?;
        if let Some(payload) = ack {
            self.handle_inbound(&payload);
        }
        Ok(())
    }

    async fn send_report(&mut self, bitmap: &KeyBitmap) -> Result<(), LinkError> {
        let frame = match self.encryptor.as_ref() {
            Some(encryptor) => {
                encryptor.seal(&frames::plain_keyboard_report(&bitmap.to_6kro()))
            }
            // Unreachable: connected states always derive a key first.
            None => return Err(LinkError::Hardware),
        };
        let ack = self.link.send(Pipe::Device, &frame).await?;
        // Counter values must not repeat under one key, so the counter
        // advances only for frames the receiver actually saw.
        if let Some(encryptor) = self.encryptor.as_mut() {
            encryptor.commit();
        }
        self.last_keys = *bitmap;
        if let Some(payload) = ack {
            self.handle_inbound(&payload);
        }
        Ok(())
    }

    async fn send_keep_alive(&mut self) -> Result<(), LinkError> {
        let frame = frames::keep_alive(self.config.keepalive_interval_ms);
        let ack = self.link.send(Pipe::Device, &frame).await?;
        if let Some(payload) = ack {
            self.handle_inbound(&payload);
        }
        Ok(())
    }

    fn handle_inbound(&mut self, payload: &[u8]) {
        match frames::classify_inbound(payload) {
            InboundReport::Leds {
                caps_lock,
                scroll_lock,
                ..
            } => {
                self.leds.set_caps_lock(caps_lock);
                self.leds.set_scroll_lock(scroll_lock);
            }
            InboundReport::HidPp => {
                // Not implemented; keep the gap loud instead of quietly
                // acknowledging a request we cannot answer.
                error!("receiver sent a HID++ request, not implemented");
            }
            InboundReport::Unknown(kind) => {
                warn!("unhandled report type {:#x}", kind);
            }
        }
    }
}
