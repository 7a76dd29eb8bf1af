//! Anything related to the adapter API (IBluetooth).

use bt_topshim::btif::{
    BaseCallbacks, BaseCallbacksDispatcher, BtAclState, BtBondState, BtDeviceType, BtScanMode,
    BtSspVariant, BtStatus, BtTransport, OobData, RadioControl, RawAddress, Uuid128Bit,
};
use log::{info, warn};

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

use crate::adapter_properties::{AdapterProperties, LeFeatures, ProfileConnectionState};
use crate::adapter_state::{AdapterState, AdapterStateMessage};
use crate::bond_state_machine::{BondMessage, BondReason, PairingVariant};
use crate::callbacks::Callbacks;
use crate::device_policy::{AccessKind, AccessPermission, ProfilePriority, SharedDevicePolicy};
use crate::energy::{ActivityEnergyInfo, EnergyInfoTracker};
use crate::profile_services::{ProfileService, ProfileServiceState};
use crate::remote_devices::RemoteDevices;
use crate::Message;

/// Longest PIN accepted by the radio, in bytes.
pub const MAX_PIN_LENGTH: usize = 16;

/// Defines the adapter API.
pub trait IBluetooth {
    /// Adds a callback from a client who wishes to observe adapter events.
    ///
    /// Returns the id used to unregister it.
    fn register_callback(&mut self, callback: Box<dyn IBluetoothCallback + Send>) -> u32;

    /// Removes a callback. Returns false if the id is unknown.
    fn unregister_callback(&mut self, id: u32) -> bool;

    /// Turns the adapter fully on.
    ///
    /// Returns true if the request is accepted.
    fn enable(&mut self) -> bool;

    /// Turns on LE only.
    ///
    /// Returns true if the request is accepted.
    fn enable_ble(&mut self) -> bool;

    /// Turns the adapter off.
    ///
    /// Returns true if the request is accepted.
    fn disable(&mut self) -> bool;

    /// Turns BR/EDR off and leaves LE on.
    ///
    /// Returns true if the request is accepted.
    fn disable_bredr(&mut self) -> bool;

    fn get_state(&self) -> AdapterState;

    /// Returns the Bluetooth address of the local adapter.
    fn get_address(&self) -> RawAddress;

    fn get_name(&self) -> String;

    fn set_name(&self, name: String) -> bool;

    fn get_class_of_device(&self) -> u32;

    fn get_scan_mode(&self) -> BtScanMode;

    fn set_scan_mode(&self, mode: BtScanMode) -> bool;

    fn get_discoverable_timeout(&self) -> u32;

    fn set_discoverable_timeout(&self, seconds: u32) -> bool;

    /// Returns the services offered by the local adapter.
    fn get_uuids(&self) -> Vec<Uuid128Bit>;

    /// Starts BREDR Inquiry.
    fn start_discovery(&self) -> bool;

    /// Cancels BREDR Inquiry.
    fn cancel_discovery(&self) -> bool;

    fn is_discovering(&self) -> bool;

    /// Initiates pairing to a remote device. Triggers connection if not already started.
    fn create_bond(&self, device: BluetoothDevice, transport: BtTransport) -> bool;

    /// Initiates pairing with out of band material.
    fn create_bond_out_of_band(
        &self,
        device: BluetoothDevice,
        transport: BtTransport,
        oob_data: OobData,
    ) -> bool;

    /// Cancels a pairing in progress.
    fn cancel_bond_process(&self, device: BluetoothDevice) -> bool;

    /// Removes the bond with a device.
    fn remove_bond(&self, device: BluetoothDevice) -> bool;

    fn get_bonded_devices(&self) -> Vec<BluetoothDevice>;

    fn get_bond_state(&self, device: BluetoothDevice) -> BtBondState;

    /// Answers a PIN request.
    fn set_pin(&self, device: BluetoothDevice, accept: bool, pin_code: Vec<u8>) -> bool;

    /// Answers a passkey entry request.
    fn set_passkey(&self, device: BluetoothDevice, accept: bool, passkey: u32) -> bool;

    /// Answers a passkey confirmation request.
    fn set_pairing_confirmation(&self, device: BluetoothDevice, accept: bool) -> bool;

    fn get_remote_name(&self, device: BluetoothDevice) -> String;

    /// Returns the alias, or the name if no alias was set.
    fn get_remote_alias(&self, device: BluetoothDevice) -> String;

    fn set_remote_alias(&self, device: BluetoothDevice, alias: String) -> bool;

    fn get_remote_class(&self, device: BluetoothDevice) -> u32;

    fn get_remote_type(&self, device: BluetoothDevice) -> BtDeviceType;

    fn get_remote_uuids(&self, device: BluetoothDevice) -> Vec<Uuid128Bit>;

    /// Triggers a service search. The result is sent through `on_remote_uuids`.
    fn fetch_remote_uuids(&self, device: BluetoothDevice) -> bool;

    /// Returns the adapter wide connection state.
    fn get_connection_state(&self) -> ProfileConnectionState;

    fn get_profile_connection_state(&self, profile: ProfileService) -> ProfileConnectionState;

    /// Reports a profile connection change. Used by the profile services.
    fn send_connection_state_change(
        &self,
        device: BluetoothDevice,
        profile: ProfileService,
        state: u32,
        prev_state: u32,
    );

    fn get_access_permission(&self, device: BluetoothDevice, kind: AccessKind)
        -> AccessPermission;

    fn set_access_permission(
        &self,
        device: BluetoothDevice,
        kind: AccessKind,
        permission: AccessPermission,
    ) -> bool;

    fn get_profile_priority(&self, device: BluetoothDevice, profile: ProfileService)
        -> ProfilePriority;

    fn set_profile_priority(
        &self,
        device: BluetoothDevice,
        profile: ProfileService,
        priority: ProfilePriority,
    ) -> bool;

    /// Collects controller activity since the last call.
    ///
    /// Returns None unless the adapter is on and the controller reports activity.
    fn report_activity_info(&self) -> Option<ActivityEnergyInfo>;

    fn get_le_features(&self) -> Option<LeFeatures>;

    fn is_multi_advertisement_supported(&self) -> bool;

    fn is_offloaded_filtering_supported(&self) -> bool;

    fn is_offloaded_scan_batching_supported(&self) -> bool;

    fn is_rpa_offload_supported(&self) -> bool;

    fn is_extended_scan_supported(&self) -> bool;

    fn is_debug_logging_supported(&self) -> bool;

    fn is_activity_and_energy_reporting_supported(&self) -> bool;

    /// Reports the state of a profile service. Used by the profile service launcher.
    fn on_profile_service_state_changed(&self, profile: ProfileService, state: ProfileServiceState);

    /// Stops the dispatch loop after releasing the radio.
    fn shutdown(&self) -> bool;
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BluetoothDevice {
    pub address: RawAddress,
    pub name: String,
}

impl BluetoothDevice {
    pub fn new(address: RawAddress) -> Self {
        BluetoothDevice { address, name: String::new() }
    }
}

/// The interface for adapter callbacks registered through `IBluetooth::register_callback`.
pub trait IBluetoothCallback {
    fn on_adapter_state_changed(&self, prev: AdapterState, state: AdapterState);

    /// When any of the adapter local address is changed.
    fn on_address_changed(&self, addr: RawAddress);

    fn on_name_changed(&self, name: String);

    fn on_scan_mode_changed(&self, mode: BtScanMode);

    /// When the discovery state is changed.
    fn on_discovering_changed(&self, discovering: bool);

    /// When a device is found via discovery.
    fn on_device_found(&self, remote_device: BluetoothDevice);

    /// When the adapter wide connection state has an edge.
    fn on_connection_state_changed(
        &self,
        remote_device: BluetoothDevice,
        prev: ProfileConnectionState,
        state: ProfileConnectionState,
    );

    fn on_bond_state_changed(
        &self,
        remote_device: BluetoothDevice,
        prev: BtBondState,
        state: BtBondState,
        reason: BondReason,
    );

    /// When there is a pairing/bonding process and requires agent to display the event to UI.
    fn on_pairing_request(
        &self,
        remote_device: BluetoothDevice,
        variant: PairingVariant,
        passkey: Option<u32>,
    );

    /// When a pairing prompt should be dismissed.
    fn on_pairing_cancelled(&self, remote_device: BluetoothDevice);

    fn on_remote_uuids(&self, remote_device: BluetoothDevice, uuids: Vec<Uuid128Bit>);

    fn on_acl_state_changed(
        &self,
        remote_device: BluetoothDevice,
        state: BtAclState,
        le_only: bool,
    );
}

pub type SharedCallbacks = Arc<Mutex<Callbacks<dyn IBluetoothCallback + Send>>>;

/// Routes radio callbacks into the dispatch loop.
pub fn get_bt_dispatcher(tx: UnboundedSender<Message>) -> BaseCallbacksDispatcher {
    BaseCallbacksDispatcher {
        dispatch: Box::new(move |cb: BaseCallbacks| {
            if tx.send(Message::Base(cb)).is_err() {
                warn!("Dispatch loop is gone, dropping radio callback");
            }
        }),
    }
}

/// Implementation of the adapter API.
///
/// A cheap handle. Reads go to the caches, state changing requests are posted to the dispatch
/// loop.
#[derive(Clone)]
pub struct Bluetooth {
    tx: UnboundedSender<Message>,
    radio: Arc<dyn RadioControl>,
    properties: Arc<AdapterProperties>,
    remote_devices: Arc<RemoteDevices>,
    energy: Arc<EnergyInfoTracker>,
    policy: SharedDevicePolicy,
    callbacks: SharedCallbacks,
    energy_info_wait: Duration,
}

impl Bluetooth {
    pub(crate) fn new(
        tx: UnboundedSender<Message>,
        radio: Arc<dyn RadioControl>,
        properties: Arc<AdapterProperties>,
        remote_devices: Arc<RemoteDevices>,
        energy: Arc<EnergyInfoTracker>,
        policy: SharedDevicePolicy,
        callbacks: SharedCallbacks,
        energy_info_wait: Duration,
    ) -> Bluetooth {
        Bluetooth {
            tx,
            radio,
            properties,
            remote_devices,
            energy,
            policy,
            callbacks,
            energy_info_wait,
        }
    }

    fn post(&self, msg: Message) -> bool {
        self.tx.send(msg).is_ok()
    }

    fn post_adapter(&self, msgs: &[AdapterStateMessage]) -> bool {
        msgs.iter().all(|m| self.post(Message::AdapterState(m.clone())))
    }

    fn is_on(&self) -> bool {
        self.properties.get_state() == AdapterState::On
    }

    fn le_feature<F: Fn(&LeFeatures) -> bool>(&self, f: F) -> bool {
        match self.properties.get_le_features() {
            Some(features) => f(&features),
            None => false,
        }
    }

    fn ssp_reply(
        &self,
        device: &BluetoothDevice,
        variant: BtSspVariant,
        accept: bool,
        passkey: u32,
    ) -> bool {
        if self.remote_devices.get_bond_state(&device.address) != BtBondState::Bonding {
            warn!("[{}] No pairing in progress", device.address);
            return false;
        }
        self.radio.ssp_reply(&device.address, variant, accept, passkey) == BtStatus::Success
    }
}

impl IBluetooth for Bluetooth {
    fn register_callback(&mut self, callback: Box<dyn IBluetoothCallback + Send>) -> u32 {
        self.callbacks.lock().unwrap().add_callback(callback)
    }

    fn unregister_callback(&mut self, id: u32) -> bool {
        self.callbacks.lock().unwrap().remove_callback(id)
    }

    fn enable(&mut self) -> bool {
        info!("Enable requested");
        self.post_adapter(&[AdapterStateMessage::RequestBleOn, AdapterStateMessage::RequestFullOn])
    }

    fn enable_ble(&mut self) -> bool {
        info!("BLE enable requested");
        self.post_adapter(&[AdapterStateMessage::RequestBleOn])
    }

    fn disable(&mut self) -> bool {
        info!("Disable requested");
        self.post_adapter(&[AdapterStateMessage::RequestOff, AdapterStateMessage::RequestBleOff])
    }

    fn disable_bredr(&mut self) -> bool {
        info!("BR/EDR disable requested");
        self.post_adapter(&[AdapterStateMessage::RequestOff])
    }

    fn get_state(&self) -> AdapterState {
        self.properties.get_state()
    }

    fn get_address(&self) -> RawAddress {
        self.properties.get_address()
    }

    fn get_name(&self) -> String {
        self.properties.get_name()
    }

    fn set_name(&self, name: String) -> bool {
        self.properties.set_name(name)
    }

    fn get_class_of_device(&self) -> u32 {
        self.properties.get_class_of_device()
    }

    fn get_scan_mode(&self) -> BtScanMode {
        self.properties.get_scan_mode()
    }

    fn set_scan_mode(&self, mode: BtScanMode) -> bool {
        self.properties.set_scan_mode(mode)
    }

    fn get_discoverable_timeout(&self) -> u32 {
        self.properties.get_discoverable_timeout()
    }

    fn set_discoverable_timeout(&self, seconds: u32) -> bool {
        self.properties.set_discoverable_timeout(seconds)
    }

    fn get_uuids(&self) -> Vec<Uuid128Bit> {
        self.properties.get_uuids()
    }

    fn start_discovery(&self) -> bool {
        if !self.is_on() {
            warn!("Cannot start discovery while {:?}", self.get_state());
            return false;
        }
        self.radio.start_discovery() == BtStatus::Success
    }

    fn cancel_discovery(&self) -> bool {
        if !self.is_on() {
            return false;
        }
        self.radio.cancel_discovery() == BtStatus::Success
    }

    fn is_discovering(&self) -> bool {
        self.properties.is_discovering()
    }

    fn create_bond(&self, device: BluetoothDevice, transport: BtTransport) -> bool {
        if !self.is_on() {
            warn!("[{}] Cannot bond while {:?}", device.address, self.get_state());
            return false;
        }
        if self.remote_devices.get_bond_state(&device.address) != BtBondState::NotBonded {
            return false;
        }

        // Pairing is unreliable while an inquiry is running.
        self.radio.cancel_discovery();
        self.post(Message::Bond(BondMessage::CreateBond(device.address, transport, None)))
    }

    fn create_bond_out_of_band(
        &self,
        device: BluetoothDevice,
        transport: BtTransport,
        oob_data: OobData,
    ) -> bool {
        if !oob_data.is_valid() {
            warn!("[{}] Invalid out of band data", device.address);
            return false;
        }
        if !self.is_on()
            || self.remote_devices.get_bond_state(&device.address) != BtBondState::NotBonded
        {
            return false;
        }

        self.radio.cancel_discovery();
        self.post(Message::Bond(BondMessage::CreateBond(device.address, transport, Some(oob_data))))
    }

    fn cancel_bond_process(&self, device: BluetoothDevice) -> bool {
        if self.remote_devices.get_bond_state(&device.address) != BtBondState::Bonding {
            return false;
        }
        self.post(Message::Bond(BondMessage::CancelBond(device.address)))
    }

    fn remove_bond(&self, device: BluetoothDevice) -> bool {
        if self.remote_devices.get_bond_state(&device.address) != BtBondState::Bonded {
            return false;
        }
        self.post(Message::Bond(BondMessage::RemoveBond(device.address)))
    }

    fn get_bonded_devices(&self) -> Vec<BluetoothDevice> {
        self.properties
            .get_bonded_devices()
            .iter()
            .map(|addr| self.remote_devices.get_bluetooth_device(addr))
            .collect()
    }

    fn get_bond_state(&self, device: BluetoothDevice) -> BtBondState {
        self.remote_devices.get_bond_state(&device.address)
    }

    fn set_pin(&self, device: BluetoothDevice, accept: bool, pin_code: Vec<u8>) -> bool {
        // Bonded devices may ask again for a security upgrade.
        match self.remote_devices.get_bond_state(&device.address) {
            BtBondState::Bonding | BtBondState::Bonded => (),
            BtBondState::NotBonded => {
                warn!("[{}] No pairing in progress", device.address);
                return false;
            }
        }
        if pin_code.len() > MAX_PIN_LENGTH {
            warn!("[{}] PIN too long", device.address);
            return false;
        }

        self.radio.pin_reply(&device.address, accept, &pin_code) == BtStatus::Success
    }

    fn set_passkey(&self, device: BluetoothDevice, accept: bool, passkey: u32) -> bool {
        self.ssp_reply(&device, BtSspVariant::PasskeyEntry, accept, passkey)
    }

    fn set_pairing_confirmation(&self, device: BluetoothDevice, accept: bool) -> bool {
        self.ssp_reply(&device, BtSspVariant::PasskeyConfirmation, accept, 0)
    }

    fn get_remote_name(&self, device: BluetoothDevice) -> String {
        self.remote_devices.get_name(&device.address)
    }

    fn get_remote_alias(&self, device: BluetoothDevice) -> String {
        self.remote_devices.get_alias(&device.address)
    }

    fn set_remote_alias(&self, device: BluetoothDevice, alias: String) -> bool {
        self.remote_devices.set_alias(&device.address, alias)
    }

    fn get_remote_class(&self, device: BluetoothDevice) -> u32 {
        self.remote_devices.get_class_of_device(&device.address)
    }

    fn get_remote_type(&self, device: BluetoothDevice) -> BtDeviceType {
        self.remote_devices.get_device_type(&device.address)
    }

    fn get_remote_uuids(&self, device: BluetoothDevice) -> Vec<Uuid128Bit> {
        self.remote_devices.get_uuids(&device.address)
    }

    fn fetch_remote_uuids(&self, device: BluetoothDevice) -> bool {
        self.post(Message::FetchUuids(device.address))
    }

    fn get_connection_state(&self) -> ProfileConnectionState {
        self.properties.get_connection_state()
    }

    fn get_profile_connection_state(&self, profile: ProfileService) -> ProfileConnectionState {
        self.properties.get_profile_connection_state(profile)
    }

    fn send_connection_state_change(
        &self,
        device: BluetoothDevice,
        profile: ProfileService,
        state: u32,
        prev_state: u32,
    ) {
        self.properties.send_connection_state_change(&device.address, profile, state, prev_state);
    }

    fn get_access_permission(
        &self,
        device: BluetoothDevice,
        kind: AccessKind,
    ) -> AccessPermission {
        self.policy.lock().unwrap().get_access_permission(&device.address, kind)
    }

    fn set_access_permission(
        &self,
        device: BluetoothDevice,
        kind: AccessKind,
        permission: AccessPermission,
    ) -> bool {
        self.policy.lock().unwrap().set_access_permission(&device.address, kind, permission);
        true
    }

    fn get_profile_priority(
        &self,
        device: BluetoothDevice,
        profile: ProfileService,
    ) -> ProfilePriority {
        self.policy.lock().unwrap().get_profile_priority(&device.address, profile)
    }

    fn set_profile_priority(
        &self,
        device: BluetoothDevice,
        profile: ProfileService,
        priority: ProfilePriority,
    ) -> bool {
        self.policy.lock().unwrap().set_profile_priority(&device.address, profile, priority);
        true
    }

    fn report_activity_info(&self) -> Option<ActivityEnergyInfo> {
        if !self.is_on() || !self.is_activity_and_energy_reporting_supported() {
            return None;
        }

        let since = self.energy.generation();
        let status = self.radio.read_energy_info();
        if status != BtStatus::Success {
            warn!("Energy info request rejected: {:?}", status);
        }
        Some(self.energy.wait_and_take(since, self.energy_info_wait))
    }

    fn get_le_features(&self) -> Option<LeFeatures> {
        self.properties.get_le_features()
    }

    fn is_multi_advertisement_supported(&self) -> bool {
        self.le_feature(|f| f.is_multi_adv_supported())
    }

    fn is_offloaded_filtering_supported(&self) -> bool {
        self.le_feature(|f| f.is_offloaded_filtering_supported())
    }

    fn is_offloaded_scan_batching_supported(&self) -> bool {
        self.le_feature(|f| f.is_offloaded_scan_batching_supported())
    }

    fn is_rpa_offload_supported(&self) -> bool {
        self.le_feature(|f| f.rpa_offload_supported)
    }

    fn is_extended_scan_supported(&self) -> bool {
        self.le_feature(|f| f.extended_scan_support)
    }

    fn is_debug_logging_supported(&self) -> bool {
        self.le_feature(|f| f.debug_logging_supported)
    }

    fn is_activity_and_energy_reporting_supported(&self) -> bool {
        self.le_feature(|f| f.activity_energy_info_supported)
    }

    fn on_profile_service_state_changed(
        &self,
        profile: ProfileService,
        state: ProfileServiceState,
    ) {
        self.post(Message::ProfileServiceStateChanged(profile, state));
    }

    fn shutdown(&self) -> bool {
        self.post(Message::Shutdown)
    }
}
