//! Bond state machine.
//!
//! Serializes bonding and unbonding per device. The machine is `Stable` when nothing is in
//! flight and `PendingCommand` while at least one device waits for the radio to report the
//! outcome of a bond operation. A new create or remove request for a device that is already in
//! flight is deferred until that device leaves the in-flight set.

use bt_topshim::btif::{
    BtBondState, BtSspVariant, BtStatus, BtTransport, OobData, RadioControl, RawAddress,
};
use log::{debug, error, info, warn};
use num_traits::cast::FromPrimitive;
use rand::Rng;

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::adapter_properties::AdapterProperties;
use crate::bluetooth::SharedCallbacks;
use crate::cod;
use crate::deferred::DeferredQueue;
use crate::device_policy::{AccessPermission, SharedDevicePolicy, ALL_ACCESS_KINDS};
use crate::remote_devices::RemoteDevices;

/// Why a bond ended, as reported to clients alongside the bond state.
#[derive(Clone, Copy, Debug, FromPrimitive, ToPrimitive, PartialEq, Eq)]
#[repr(u32)]
pub enum BondReason {
    Success = 0,
    AuthFailed = 1,
    AuthRejected = 2,
    AuthCanceled = 3,
    RemoteDeviceDown = 4,
    DiscoveryInProgress = 5,
    AuthTimeout = 6,
    RepeatedAttempts = 7,
    RemoteAuthCanceled = 8,
    Removed = 9,
}

impl From<BtStatus> for BondReason {
    fn from(status: BtStatus) -> Self {
        match status {
            BtStatus::Success => BondReason::Success,
            BtStatus::RemoteDeviceDown => BondReason::RemoteDeviceDown,
            BtStatus::AuthFailure => BondReason::AuthFailed,
            BtStatus::AuthRejected => BondReason::AuthRejected,
            BtStatus::AuthTimeout => BondReason::AuthTimeout,
            _ => BondReason::Removed,
        }
    }
}

/// Prompt shown to the user during pairing.
#[derive(Clone, Copy, Debug, FromPrimitive, ToPrimitive, PartialEq, Eq)]
#[repr(u32)]
pub enum PairingVariant {
    Pin = 0,
    Passkey,
    PasskeyConfirmation,
    Consent,
    DisplayPasskey,
    DisplayPin,
    OobConsent,
    Pin16Digits,
}

impl PairingVariant {
    /// Maps a raw SSP variant code. The passkey is only shown for the variants that display it.
    pub fn from_ssp(raw_variant: u32) -> Option<(PairingVariant, bool)> {
        match BtSspVariant::from_u32(raw_variant)? {
            BtSspVariant::PasskeyConfirmation => Some((PairingVariant::PasskeyConfirmation, true)),
            BtSspVariant::Consent => Some((PairingVariant::Consent, false)),
            BtSspVariant::PasskeyEntry => Some((PairingVariant::Passkey, false)),
            BtSspVariant::PasskeyNotification => Some((PairingVariant::DisplayPasskey, true)),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum BondMessage {
    CreateBond(RawAddress, BtTransport, Option<OobData>),
    RemoveBond(RawAddress),
    CancelBond(RawAddress),
    BondingStateChange(RawAddress, BtBondState, BtStatus),
    /// Address, raw SSP variant and passkey.
    SspRequest(RawAddress, u32, u32),
    /// Address, class of device and whether a 16 digit PIN is required.
    PinRequest(RawAddress, u32, bool),
}

impl BondMessage {
    fn address(&self) -> RawAddress {
        match self {
            BondMessage::CreateBond(addr, _, _)
            | BondMessage::RemoveBond(addr)
            | BondMessage::CancelBond(addr)
            | BondMessage::BondingStateChange(addr, _, _)
            | BondMessage::SspRequest(addr, _, _)
            | BondMessage::PinRequest(addr, _, _) => *addr,
        }
    }

    /// Requests that wait while their device is in flight.
    fn is_deferrable(&self) -> bool {
        match self {
            BondMessage::CreateBond(_, _, _) | BondMessage::RemoveBond(_) => true,
            _ => false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BondState {
    Stable,
    PendingCommand,
}

pub struct BondStateMachine {
    state: BondState,
    devices: BTreeSet<RawAddress>,
    deferred: DeferredQueue<BondMessage>,
    radio: Arc<dyn RadioControl>,
    properties: Arc<AdapterProperties>,
    remote_devices: Arc<RemoteDevices>,
    policy: SharedDevicePolicy,
    callbacks: SharedCallbacks,
}

impl BondStateMachine {
    pub fn new(
        radio: Arc<dyn RadioControl>,
        properties: Arc<AdapterProperties>,
        remote_devices: Arc<RemoteDevices>,
        policy: SharedDevicePolicy,
        callbacks: SharedCallbacks,
    ) -> BondStateMachine {
        BondStateMachine {
            state: BondState::Stable,
            devices: BTreeSet::new(),
            deferred: DeferredQueue::new(),
            radio,
            properties,
            remote_devices,
            policy,
            callbacks,
        }
    }

    pub fn get_state(&self) -> BondState {
        self.state
    }

    /// Devices with a bond operation in flight.
    pub fn get_pending_devices(&self) -> Vec<RawAddress> {
        self.devices.iter().cloned().collect()
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    /// Processes one message and replays deferred requests whenever the machine changes state
    /// or a device leaves the in-flight set.
    pub fn handle(&mut self, msg: BondMessage) {
        let mut progressed = self.process(msg);
        while progressed {
            progressed = false;
            for deferred in self.deferred.take_all() {
                debug!("Replaying {:?}", deferred);
                if self.process(deferred) {
                    progressed = true;
                }
            }
        }
    }

    /// Forgets every bond operation in flight along with the requests waiting on them.
    pub fn reset(&mut self) {
        if !self.devices.is_empty() || !self.deferred.is_empty() {
            info!(
                "Dropping {} in flight and {} deferred bond operations",
                self.devices.len(),
                self.deferred.len()
            );
        }
        self.deferred.clear();
        self.devices.clear();
        self.move_to(BondState::Stable);
    }

    pub fn shutdown(&mut self) {
        self.reset();
    }

    fn move_to(&mut self, state: BondState) {
        if self.state != state {
            info!("Bond state machine {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    fn process(&mut self, msg: BondMessage) -> bool {
        let prev_state = self.state;
        let prev_devices = self.devices.len();
        let addr = msg.address();

        if msg.is_deferrable() && self.devices.contains(&addr) {
            info!("[{}] Deferring {:?}, bond operation in flight", addr, msg);
            self.deferred.defer(msg);
            return false;
        }

        match msg {
            BondMessage::CreateBond(addr, transport, oob_data) => {
                if self.create_bond(&addr, transport, oob_data) {
                    self.devices.insert(addr);
                    self.move_to(BondState::PendingCommand);
                }
            }
            BondMessage::RemoveBond(addr) => {
                if self.remove_bond(&addr) {
                    self.devices.insert(addr);
                    self.move_to(BondState::PendingCommand);
                }
            }
            BondMessage::CancelBond(addr) => {
                self.cancel_bond(&addr);
            }
            BondMessage::BondingStateChange(addr, state, status) => {
                self.on_bonding_state_change(addr, state, status);
            }
            BondMessage::SspRequest(addr, variant, passkey) => {
                self.on_ssp_request(addr, variant, passkey);
            }
            BondMessage::PinRequest(addr, cod, min_16_digit) => {
                self.on_pin_request(addr, cod, min_16_digit);
            }
        }

        self.state != prev_state || self.devices.len() < prev_devices
    }

    fn create_bond(
        &mut self,
        addr: &RawAddress,
        transport: BtTransport,
        oob_data: Option<OobData>,
    ) -> bool {
        let bond_state = self.remote_devices.get_bond_state(addr);
        if bond_state != BtBondState::NotBonded {
            warn!("[{}] Cannot create bond in {:?}", addr, bond_state);
            return false;
        }

        info!("[{}] Creating bond over {:?}", addr, transport);
        self.remote_devices.add_device(addr);
        let status = match &oob_data {
            Some(oob) => self.radio.create_bond_out_of_band(addr, transport, oob),
            None => self.radio.create_bond(addr, transport),
        };

        if status != BtStatus::Success {
            error!("[{}] Create bond rejected: {:?}", addr, status);
            // Nobody would otherwise ever hear back about this request.
            let device = self.remote_devices.get_bluetooth_device(addr);
            self.callbacks.lock().unwrap().for_all_callbacks(|callback| {
                callback.on_bond_state_changed(
                    device.clone(),
                    BtBondState::NotBonded,
                    BtBondState::NotBonded,
                    BondReason::Removed,
                );
            });
            return false;
        }
        true
    }

    fn remove_bond(&mut self, addr: &RawAddress) -> bool {
        let bond_state = self.remote_devices.get_bond_state(addr);
        if bond_state != BtBondState::Bonded {
            warn!("[{}] Cannot remove bond in {:?}", addr, bond_state);
            return false;
        }

        let status = self.radio.remove_bond(addr);
        if status != BtStatus::Success {
            error!("[{}] Remove bond rejected: {:?}", addr, status);
            return false;
        }
        true
    }

    fn cancel_bond(&mut self, addr: &RawAddress) {
        let bond_state = self.remote_devices.get_bond_state(addr);
        if bond_state != BtBondState::Bonding {
            warn!("[{}] Nothing to cancel in {:?}", addr, bond_state);
            return;
        }

        let status = self.radio.cancel_bond(addr);
        if status != BtStatus::Success {
            error!("[{}] Cancel bond rejected: {:?}", addr, status);
        }
    }

    fn on_bonding_state_change(&mut self, addr: RawAddress, state: BtBondState, status: BtStatus) {
        let reason = BondReason::from(status);
        debug!("[{}] Bond state {:?} ({:?}) in {:?}", addr, state, status, self.state);

        match self.state {
            BondState::Stable => match state {
                BtBondState::Bonding => {
                    // Pairing initiated by the remote device.
                    self.notify_bond_state(&addr, state, BondReason::Success);
                    self.devices.insert(addr);
                    self.move_to(BondState::PendingCommand);
                }
                BtBondState::NotBonded => {
                    self.notify_bond_state(&addr, state, reason);
                    self.reset_device_policy(&addr);
                }
                BtBondState::Bonded => {
                    error!("[{}] Unexpected bonded report while stable", addr);
                }
            },
            BondState::PendingCommand => {
                self.notify_bond_state(&addr, state, reason);
                match state {
                    BtBondState::Bonding => {
                        self.devices.insert(addr);
                    }
                    BtBondState::Bonded | BtBondState::NotBonded => {
                        self.devices.remove(&addr);
                        if state == BtBondState::NotBonded {
                            self.reset_device_policy(&addr);
                        }
                        if self.devices.is_empty() {
                            self.move_to(BondState::Stable);
                        }
                    }
                }
            }
        }
    }

    fn on_ssp_request(&mut self, addr: RawAddress, raw_variant: u32, passkey: u32) {
        if self.state != BondState::PendingCommand {
            warn!("[{}] Dropping SSP request while no bond is in flight", addr);
            return;
        }

        let (variant, show_passkey) = match PairingVariant::from_ssp(raw_variant) {
            Some(v) => v,
            None => {
                error!("[{}] Unknown SSP variant {}", addr, raw_variant);
                return;
            }
        };

        let passkey = if show_passkey { Some(passkey) } else { None };
        self.notify_pairing_request(&addr, variant, passkey);
    }

    fn on_pin_request(&mut self, addr: RawAddress, cod: u32, min_16_digit: bool) {
        if self.state != BondState::PendingCommand {
            warn!("[{}] Dropping PIN request while no bond is in flight", addr);
            return;
        }

        if cod::is_cod_keyboard_like(cod) {
            // Keyboards get a locally generated PIN that the user types on the keyboard.
            let pin = rand::thread_rng().gen_range(100000..1000000);
            self.notify_pairing_request(&addr, PairingVariant::DisplayPin, Some(pin));
            return;
        }

        let variant = if min_16_digit { PairingVariant::Pin16Digits } else { PairingVariant::Pin };
        self.notify_pairing_request(&addr, variant, None);
    }

    fn notify_pairing_request(
        &self,
        addr: &RawAddress,
        variant: PairingVariant,
        passkey: Option<u32>,
    ) {
        info!("[{}] Pairing request {:?}", addr, variant);
        let device = self.remote_devices.get_bluetooth_device(addr);
        self.callbacks.lock().unwrap().for_all_callbacks(|callback| {
            callback.on_pairing_request(device.clone(), variant, passkey);
        });
    }

    /// Publishes a bond state change. Nothing is sent when the state did not change.
    fn notify_bond_state(&self, addr: &RawAddress, state: BtBondState, reason: BondReason) {
        let prev = self.remote_devices.get_bond_state(addr);
        if prev == state {
            debug!("[{}] Bond state unchanged ({:?})", addr, state);
            return;
        }

        info!("[{}] Bond state {:?} -> {:?} ({:?})", addr, prev, state, reason);
        self.properties.on_bond_state_changed(addr, state);

        let device = self.remote_devices.get_bluetooth_device(addr);
        self.callbacks.lock().unwrap().for_all_callbacks(|callback| {
            callback.on_bond_state_changed(device.clone(), prev, state, reason);
        });
    }

    fn reset_device_policy(&self, addr: &RawAddress) {
        let mut policy = self.policy.lock().unwrap();
        for kind in ALL_ACCESS_KINDS.iter() {
            policy.set_access_permission(addr, *kind, AccessPermission::Unknown);
        }
        policy.clear_profile_priorities(addr);
    }
}
