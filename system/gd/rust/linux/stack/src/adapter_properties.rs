//! Adapter level property cache.
//!
//! Mirrors what the radio last reported about the local adapter and turns raw property updates
//! into notifications. All fields sit behind one lock. Notifications are emitted after the lock
//! is released.

use bt_topshim::btif::{
    BtBondState, BtDiscoveryState, BtProperty, BtPropertyType, BtScanMode, BtStatus, RadioControl,
    RawAddress, Uuid, Uuid128Bit,
};
use log::{debug, error, info, warn};
use num_traits::cast::FromPrimitive;

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedSender;

use crate::adapter_state::{AdapterState, AdapterStateMessage};
use crate::bluetooth::{IBluetoothCallback, SharedCallbacks};
use crate::profile_services::ProfileService;
use crate::remote_devices::RemoteDevices;
use crate::Message;

/// Longest adapter name the radio accepts, in bytes.
pub const MAX_NAME_LENGTH: usize = 248;

pub const MIN_ADV_INSTANCES_FOR_MULTI_ADV: u8 = 5;
pub const MIN_OFFLOADED_FILTERS: u8 = 10;
pub const MIN_OFFLOADED_SCAN_STORAGE_BYTES: u16 = 1024;

const LE_FEATURES_MIN_LEN: usize = 14;

#[derive(Clone, Copy, Debug, FromPrimitive, ToPrimitive, PartialEq, Eq)]
#[repr(u32)]
pub enum ProfileConnectionState {
    Disconnected = 0,
    Connecting,
    Connected,
    Disconnecting,
}

/// LE capabilities reported once by the controller.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LeFeatures {
    pub version_supported: u16,
    pub local_privacy_enabled: bool,
    pub max_adv_instance: u8,
    pub rpa_offload_supported: bool,
    pub max_irk_list_size: u8,
    pub max_adv_filter_supported: u8,
    pub activity_energy_info_supported: bool,
    pub scan_result_storage_size: u16,
    pub total_trackable_advertisers: u16,
    pub extended_scan_support: bool,
    pub debug_logging_supported: bool,
}

impl LeFeatures {
    pub fn from_bytes(val: &[u8]) -> Option<LeFeatures> {
        if val.len() < LE_FEATURES_MIN_LEN {
            return None;
        }

        Some(LeFeatures {
            version_supported: u16::from_le_bytes([val[0], val[1]]),
            local_privacy_enabled: val[2] != 0,
            max_adv_instance: val[3],
            rpa_offload_supported: val[4] != 0,
            max_irk_list_size: val[5],
            max_adv_filter_supported: val[6],
            activity_energy_info_supported: val[7] != 0,
            scan_result_storage_size: u16::from_le_bytes([val[8], val[9]]),
            total_trackable_advertisers: u16::from_le_bytes([val[10], val[11]]),
            extended_scan_support: val[12] != 0,
            debug_logging_supported: val[13] != 0,
        })
    }

    pub fn is_multi_adv_supported(&self) -> bool {
        self.max_adv_instance >= MIN_ADV_INSTANCES_FOR_MULTI_ADV
    }

    pub fn is_offloaded_filtering_supported(&self) -> bool {
        self.max_adv_filter_supported >= MIN_OFFLOADED_FILTERS
    }

    pub fn is_offloaded_scan_batching_supported(&self) -> bool {
        self.scan_result_storage_size >= MIN_OFFLOADED_SCAN_STORAGE_BYTES
    }
}

struct PropertiesInner {
    state: AdapterState,
    name: String,
    address: RawAddress,
    class_of_device: u32,
    scan_mode: BtScanMode,
    discoverable_timeout: u32,
    uuids: Vec<Uuid128Bit>,
    bonded_devices: BTreeSet<RawAddress>,
    discovering: bool,
    le_features: Option<LeFeatures>,
    connection_state: ProfileConnectionState,
    profile_connection_state: HashMap<ProfileService, (ProfileConnectionState, u32)>,
    profiles_connecting: u32,
    profiles_connected: u32,
    profiles_disconnecting: u32,
    bluetooth_disabling: bool,
}

impl PropertiesInner {
    fn new() -> Self {
        PropertiesInner {
            state: AdapterState::Off,
            name: String::new(),
            address: RawAddress::default(),
            class_of_device: 0,
            scan_mode: BtScanMode::None_,
            discoverable_timeout: 0,
            uuids: vec![],
            bonded_devices: BTreeSet::new(),
            discovering: false,
            le_features: None,
            connection_state: ProfileConnectionState::Disconnected,
            profile_connection_state: HashMap::new(),
            profiles_connecting: 0,
            profiles_connected: 0,
            profiles_disconnecting: 0,
            bluetooth_disabling: false,
        }
    }

    fn reset_connection_aggregate(&mut self) {
        self.profile_connection_state.clear();
        self.profiles_connecting = 0;
        self.profiles_connected = 0;
        self.profiles_disconnecting = 0;
    }

    /// Folds one device transition into the per-profile aggregate.
    ///
    /// Returns whether the aggregate entry was written.
    fn update_profile_connection_state(
        &mut self,
        profile: ProfileService,
        state: ProfileConnectionState,
        prev: ProfileConnectionState,
    ) -> bool {
        let mut num_dev = 1;
        let mut new_hash_state = state;
        let mut update = true;

        if let Some((curr_hash_state, count)) = self.profile_connection_state.get(&profile) {
            let curr_hash_state = *curr_hash_state;
            num_dev = *count;

            if state == curr_hash_state {
                num_dev += 1;
            } else if state == ProfileConnectionState::Connected
                || (state == ProfileConnectionState::Connecting
                    && curr_hash_state != ProfileConnectionState::Connected)
            {
                num_dev = 1;
            } else if num_dev == 1 && prev == curr_hash_state {
                update = true;
            } else if num_dev > 1 && prev == curr_hash_state {
                num_dev -= 1;
                if curr_hash_state == ProfileConnectionState::Connected
                    || curr_hash_state == ProfileConnectionState::Connecting
                {
                    new_hash_state = curr_hash_state;
                }
            } else {
                update = false;
            }
        }

        if update {
            self.profile_connection_state.insert(profile, (new_hash_state, num_dev));
        }
        update
    }

    /// Updates the adapter wide counters and returns true when the transition is an edge of the
    /// adapter connection state.
    fn update_counters_and_check(
        &mut self,
        state: ProfileConnectionState,
        prev: ProfileConnectionState,
    ) -> bool {
        let counter = match prev {
            ProfileConnectionState::Connecting => Some(&mut self.profiles_connecting),
            ProfileConnectionState::Connected => Some(&mut self.profiles_connected),
            ProfileConnectionState::Disconnecting => Some(&mut self.profiles_disconnecting),
            ProfileConnectionState::Disconnected => None,
        };
        if let Some(counter) = counter {
            if *counter > 0 {
                *counter -= 1;
            } else {
                error!("Profile counter for {:?} would go below zero", prev);
            }
        }

        match state {
            ProfileConnectionState::Connecting => {
                self.profiles_connecting += 1;
                self.profiles_connected == 0 && self.profiles_connecting == 1
            }
            ProfileConnectionState::Connected => {
                self.profiles_connected += 1;
                self.profiles_connected == 1
            }
            ProfileConnectionState::Disconnecting => {
                self.profiles_disconnecting += 1;
                self.profiles_connected == 0 && self.profiles_disconnecting == 1
            }
            ProfileConnectionState::Disconnected => {
                self.profiles_connected == 0 && self.profiles_connecting == 0
            }
        }
    }
}

pub struct AdapterProperties {
    inner: Mutex<PropertiesInner>,
    radio: Arc<dyn RadioControl>,
    remote_devices: Arc<RemoteDevices>,
    callbacks: SharedCallbacks,
    tx: UnboundedSender<Message>,
}

impl AdapterProperties {
    pub fn new(
        radio: Arc<dyn RadioControl>,
        remote_devices: Arc<RemoteDevices>,
        callbacks: SharedCallbacks,
        tx: UnboundedSender<Message>,
    ) -> AdapterProperties {
        AdapterProperties {
            inner: Mutex::new(PropertiesInner::new()),
            radio,
            remote_devices,
            callbacks,
            tx,
        }
    }

    fn for_all_callbacks<F: Fn(&Box<dyn IBluetoothCallback + Send>)>(&self, f: F) {
        self.callbacks.lock().unwrap().for_all_callbacks(f);
    }

    /// Clears everything learned during the previous power cycle.
    pub fn init(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.reset_connection_aggregate();
            inner.connection_state = ProfileConnectionState::Disconnected;
            inner.bonded_devices.clear();
            inner.discovering = false;
            inner.bluetooth_disabling = false;
        }
        self.remote_devices.reset();
    }

    pub fn get_state(&self) -> AdapterState {
        self.inner.lock().unwrap().state
    }

    pub fn set_state(&self, state: AdapterState) {
        let prev = {
            let mut inner = self.inner.lock().unwrap();
            let prev = inner.state;
            inner.state = state;
            prev
        };

        if prev != state {
            info!("Adapter state {:?} -> {:?}", prev, state);
            self.for_all_callbacks(|callback| {
                callback.on_adapter_state_changed(prev, state);
            });
        }
    }

    pub fn get_name(&self) -> String {
        self.inner.lock().unwrap().name.clone()
    }

    pub fn get_address(&self) -> RawAddress {
        self.inner.lock().unwrap().address
    }

    pub fn get_class_of_device(&self) -> u32 {
        self.inner.lock().unwrap().class_of_device
    }

    pub fn get_scan_mode(&self) -> BtScanMode {
        self.inner.lock().unwrap().scan_mode
    }

    pub fn get_discoverable_timeout(&self) -> u32 {
        self.inner.lock().unwrap().discoverable_timeout
    }

    pub fn get_uuids(&self) -> Vec<Uuid128Bit> {
        self.inner.lock().unwrap().uuids.clone()
    }

    pub fn get_bonded_devices(&self) -> Vec<RawAddress> {
        self.inner.lock().unwrap().bonded_devices.iter().cloned().collect()
    }

    pub fn is_discovering(&self) -> bool {
        self.inner.lock().unwrap().discovering
    }

    pub fn get_le_features(&self) -> Option<LeFeatures> {
        self.inner.lock().unwrap().le_features.clone()
    }

    pub fn get_connection_state(&self) -> ProfileConnectionState {
        self.inner.lock().unwrap().connection_state
    }

    pub fn get_profile_connection_state(&self, profile: ProfileService) -> ProfileConnectionState {
        match self.inner.lock().unwrap().profile_connection_state.get(&profile) {
            Some((state, _)) => *state,
            None => ProfileConnectionState::Disconnected,
        }
    }

    fn set_property(&self, prop: BtProperty) -> bool {
        let prop_type = prop.prop_type;
        let status = self.radio.set_adapter_property(prop);
        if status != BtStatus::Success {
            error!("Setting {:?} rejected: {:?}", prop_type, status);
            return false;
        }
        true
    }

    /// Requests a new adapter name. The cache follows once the radio reports it.
    pub fn set_name(&self, name: String) -> bool {
        if name.len() > MAX_NAME_LENGTH {
            warn!("Adapter name is too long ({} bytes)", name.len());
            return false;
        }
        self.set_property(BtProperty::new(BtPropertyType::BdName, name.into_bytes()))
    }

    pub fn set_scan_mode(&self, mode: BtScanMode) -> bool {
        self.set_property(BtProperty::from_u32(BtPropertyType::AdapterScanMode, mode as u32))
    }

    pub fn set_discoverable_timeout(&self, seconds: u32) -> bool {
        self.set_property(BtProperty::from_u32(BtPropertyType::AdapterDiscoverableTimeout, seconds))
    }

    /// Applies property values reported by the radio.
    pub fn on_adapter_properties_changed(&self, properties: Vec<BtProperty>) {
        for prop in properties {
            self.on_adapter_property_changed(prop);
        }
    }

    fn on_adapter_property_changed(&self, prop: BtProperty) {
        match prop.prop_type {
            BtPropertyType::BdName => {
                let name = String::from_utf8_lossy(&prop.val).into_owned();
                let changed = {
                    let mut inner = self.inner.lock().unwrap();
                    let changed = inner.name != name;
                    inner.name = name.clone();
                    changed
                };
                debug!("Adapter name: {}", name);
                if changed {
                    self.for_all_callbacks(|callback| {
                        callback.on_name_changed(name.clone());
                    });
                }
            }
            BtPropertyType::BdAddr => {
                let addr = match RawAddress::from_bytes(&prop.val) {
                    Some(addr) => addr,
                    None => {
                        error!("Invalid adapter address of {} bytes", prop.val.len());
                        return;
                    }
                };
                let changed = {
                    let mut inner = self.inner.lock().unwrap();
                    let changed = inner.address != addr;
                    inner.address = addr;
                    changed
                };
                debug!("Adapter address: {}", addr);
                if changed {
                    self.for_all_callbacks(|callback| {
                        callback.on_address_changed(addr);
                    });
                }
            }
            BtPropertyType::ClassOfDevice => match prop.as_u32() {
                Some(cod) => {
                    debug!("Adapter class: {:#08x}", cod);
                    self.inner.lock().unwrap().class_of_device = cod;
                }
                None => error!("Invalid class of device value {:?}", prop.val),
            },
            BtPropertyType::AdapterScanMode => {
                let mode = match prop.as_u32().and_then(BtScanMode::from_u32) {
                    Some(mode) => mode,
                    None => {
                        error!("Invalid scan mode value {:?}", prop.val);
                        return;
                    }
                };
                let (changed, disabling) = {
                    let mut inner = self.inner.lock().unwrap();
                    let changed = inner.scan_mode != mode;
                    inner.scan_mode = mode;
                    let disabling = inner.bluetooth_disabling;
                    inner.bluetooth_disabling = false;
                    (changed, disabling)
                };
                debug!("Scan mode: {:?}", mode);
                if changed {
                    self.for_all_callbacks(|callback| {
                        callback.on_scan_mode_changed(mode);
                    });
                }
                if disabling {
                    let _ = self.tx.send(Message::AdapterState(AdapterStateMessage::BeginDisable));
                }
            }
            BtPropertyType::Uuids => {
                let uuids = Uuid::list_from_bytes(&prop.val);
                debug!("Adapter has {} uuids", uuids.len());
                self.inner.lock().unwrap().uuids = uuids;
            }
            BtPropertyType::AdapterBondedDevices => {
                let devices = prop
                    .val
                    .chunks_exact(6)
                    .filter_map(RawAddress::from_bytes)
                    .collect::<Vec<RawAddress>>();
                debug!("Adapter has {} bonded devices", devices.len());
                {
                    let mut inner = self.inner.lock().unwrap();
                    inner.bonded_devices.extend(devices.iter().cloned());
                }
                for addr in devices {
                    self.remote_devices.mark_bonded(&addr);
                }
            }
            BtPropertyType::AdapterDiscoverableTimeout => match prop.as_u32() {
                Some(seconds) => {
                    debug!("Discoverable timeout: {}", seconds);
                    self.inner.lock().unwrap().discoverable_timeout = seconds;
                }
                None => error!("Invalid discoverable timeout value {:?}", prop.val),
            },
            BtPropertyType::LocalLeFeatures => match LeFeatures::from_bytes(&prop.val) {
                Some(features) => {
                    info!("LE features: {:?}", features);
                    self.inner.lock().unwrap().le_features = Some(features);
                }
                None => error!("LE features blob too short ({} bytes)", prop.val.len()),
            },
            _ => {
                warn!("Ignoring adapter property {:?}", prop.prop_type);
            }
        }
    }

    pub fn on_discovery_state_changed(&self, state: BtDiscoveryState) {
        let discovering = state == BtDiscoveryState::Started;
        let changed = {
            let mut inner = self.inner.lock().unwrap();
            let changed = inner.discovering != discovering;
            inner.discovering = discovering;
            changed
        };

        if changed {
            self.for_all_callbacks(|callback| {
                callback.on_discovering_changed(discovering);
            });
        }
    }

    /// Keeps the bonded set in step with a bond state transition.
    pub fn on_bond_state_changed(&self, addr: &RawAddress, state: BtBondState) {
        {
            let mut inner = self.inner.lock().unwrap();
            match state {
                BtBondState::Bonded => {
                    inner.bonded_devices.insert(*addr);
                }
                BtBondState::NotBonded => {
                    inner.bonded_devices.remove(addr);
                }
                BtBondState::Bonding => (),
            }
        }
        self.remote_devices.set_bond_state(addr, state);
    }

    /// Records a profile connection transition for a device.
    ///
    /// `state` and `prev` are raw connection state values. Notifies when the adapter wide
    /// connection state has an edge.
    pub fn send_connection_state_change(
        &self,
        addr: &RawAddress,
        profile: ProfileService,
        state: u32,
        prev: u32,
    ) {
        let (state, prev) = match (
            ProfileConnectionState::from_u32(state),
            ProfileConnectionState::from_u32(prev),
        ) {
            (Some(state), Some(prev)) => (state, prev),
            _ => {
                error!(
                    "Invalid connection state change {} -> {} for {} on {:?}",
                    prev, state, addr, profile
                );
                return;
            }
        };

        let notify = {
            let mut inner = self.inner.lock().unwrap();
            if inner.state == AdapterState::Off {
                debug!("Ignoring connection state change while off");
                return;
            }

            inner.update_profile_connection_state(profile, state, prev);
            if inner.update_counters_and_check(state, prev) {
                let aggregate_prev = inner.connection_state;
                inner.connection_state = state;
                Some(aggregate_prev)
            } else {
                None
            }
        };

        if let Some(aggregate_prev) = notify {
            info!("Adapter connection state {:?} -> {:?}", aggregate_prev, state);
            let device = self.remote_devices.get_bluetooth_device(addr);
            self.for_all_callbacks(|callback| {
                callback.on_connection_state_changed(device.clone(), aggregate_prev, state);
            });
        }
    }

    /// Called once the adapter is fully on.
    pub fn on_bluetooth_ready(&self) {
        let restore = {
            let mut inner = self.inner.lock().unwrap();
            inner.reset_connection_aggregate();
            inner.connection_state = ProfileConnectionState::Disconnected;

            if inner.state == AdapterState::TurningOn && inner.scan_mode == BtScanMode::None_ {
                Some(inner.discoverable_timeout)
            } else {
                None
            }
        };

        if let Some(timeout) = restore {
            let mode = if timeout == 0 {
                BtScanMode::ConnectableDiscoverable
            } else {
                BtScanMode::Connectable
            };
            self.set_scan_mode(mode);
            self.set_discoverable_timeout(timeout);
        }
    }

    /// First step of turning off BR/EDR. Completion is the scan mode callback.
    pub fn on_bluetooth_disable(&self) {
        let turning_off = {
            let mut inner = self.inner.lock().unwrap();
            let turning_off = inner.state == AdapterState::TurningOff;
            if turning_off {
                inner.bluetooth_disabling = true;
            }
            turning_off
        };

        if turning_off {
            self.radio.cancel_discovery();
            self.set_scan_mode(BtScanMode::None_);
        }
    }

    pub fn on_ble_disable(&self) {
        if self.get_state() == AdapterState::BleTurningOff {
            self.radio.cancel_discovery();
            self.set_scan_mode(BtScanMode::None_);
        }
    }
}
