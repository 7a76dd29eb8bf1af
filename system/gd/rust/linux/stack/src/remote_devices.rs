//! Cache of remote device properties keyed by address.
//!
//! Also owns UUID discovery bookkeeping: at most one outstanding service search per device,
//! each backed by a fallback timer that delivers whatever is cached if the radio never answers.

use bt_common::time::Timers;
use bt_topshim::btif::{
    BtAclState, BtBondState, BtDeviceType, BtProperty, BtPropertyType, BtStatus, RadioControl,
    RawAddress, Uuid, Uuid128Bit,
};
use log::{debug, error, info, warn};

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

use crate::adapter_state::AdapterState;
use crate::bluetooth::{BluetoothDevice, IBluetoothCallback, SharedCallbacks};
use crate::uuid::DisplayUuids;
use crate::Message;

#[derive(Clone, Debug, PartialEq)]
pub struct DeviceProperties {
    pub address: RawAddress,
    pub name: String,
    /// User visible name. Falls back to `name` when unset.
    pub alias: Option<String>,
    pub class_of_device: u32,
    pub uuids: Vec<Uuid128Bit>,
    pub rssi: i8,
    pub device_type: BtDeviceType,
    pub bond_state: BtBondState,
}

impl DeviceProperties {
    fn new(address: RawAddress) -> Self {
        DeviceProperties {
            address,
            name: String::new(),
            alias: None,
            class_of_device: 0,
            uuids: vec![],
            rssi: 0,
            device_type: BtDeviceType::Unknown,
            bond_state: BtBondState::NotBonded,
        }
    }

    fn apply(&mut self, prop: &BtProperty) {
        match prop.prop_type {
            BtPropertyType::BdName => {
                self.name = String::from_utf8_lossy(&prop.val).into_owned();
            }
            BtPropertyType::RemoteFriendlyName => {
                self.alias = Some(String::from_utf8_lossy(&prop.val).into_owned());
            }
            BtPropertyType::BdAddr => (),
            BtPropertyType::ClassOfDevice => match prop.as_u32() {
                Some(cod) => self.class_of_device = cod,
                None => warn!("[{}] Invalid class of device {:?}", self.address, prop.val),
            },
            BtPropertyType::Uuids => {
                self.uuids = Uuid::list_from_bytes(&prop.val);
            }
            BtPropertyType::TypeOfDevice => match prop.as_u32() {
                Some(t) => self.device_type = BtDeviceType::from(t),
                None => warn!("[{}] Invalid device type {:?}", self.address, prop.val),
            },
            BtPropertyType::RemoteRssi => match prop.val.first() {
                Some(rssi) => self.rssi = *rssi as i8,
                None => warn!("[{}] Empty rssi", self.address),
            },
            _ => {
                debug!("[{}] Ignoring device property {:?}", self.address, prop.prop_type);
            }
        }
    }

    pub fn to_bluetooth_device(&self) -> BluetoothDevice {
        BluetoothDevice { address: self.address, name: self.name.clone() }
    }
}

struct DevicesInner {
    devices: HashMap<RawAddress, DeviceProperties>,
    sdp_tracker: HashSet<RawAddress>,
    timers: Timers<RawAddress, Message>,
}

impl DevicesInner {
    fn get_or_add(&mut self, addr: &RawAddress) -> &mut DeviceProperties {
        self.devices.entry(*addr).or_insert_with(|| {
            debug!("Adding device {}", addr);
            DeviceProperties::new(*addr)
        })
    }
}

pub struct RemoteDevices {
    inner: Mutex<DevicesInner>,
    radio: Arc<dyn RadioControl>,
    callbacks: SharedCallbacks,
    uuid_fetch_timeout: Duration,
}

impl RemoteDevices {
    pub fn new(
        radio: Arc<dyn RadioControl>,
        callbacks: SharedCallbacks,
        tx: UnboundedSender<Message>,
        uuid_fetch_timeout: Duration,
    ) -> RemoteDevices {
        RemoteDevices {
            inner: Mutex::new(DevicesInner {
                devices: HashMap::new(),
                sdp_tracker: HashSet::new(),
                timers: Timers::new(tx, Message::UuidFetchTimeout),
            }),
            radio,
            callbacks,
            uuid_fetch_timeout,
        }
    }

    fn for_all_callbacks<F: Fn(&Box<dyn IBluetoothCallback + Send>)>(&self, f: F) {
        self.callbacks.lock().unwrap().for_all_callbacks(f);
    }

    /// Drops every cached device and abandons outstanding discoveries.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.devices.clear();
        inner.sdp_tracker.clear();
        inner.timers.cancel_all();
    }

    pub fn get_device(&self, addr: &RawAddress) -> Option<DeviceProperties> {
        self.inner.lock().unwrap().devices.get(addr).cloned()
    }

    pub fn add_device(&self, addr: &RawAddress) -> DeviceProperties {
        self.inner.lock().unwrap().get_or_add(addr).clone()
    }

    /// Caches a device that asked to pair. Known names and classes are kept.
    pub fn add_pairing_device(&self, addr: &RawAddress, name: &str, cod: u32) {
        let mut inner = self.inner.lock().unwrap();
        let device = inner.get_or_add(addr);
        if device.name.is_empty() {
            device.name = name.to_string();
        }
        if device.class_of_device == 0 {
            device.class_of_device = cod;
        }
    }

    pub fn get_devices(&self) -> Vec<DeviceProperties> {
        let mut devices =
            self.inner.lock().unwrap().devices.values().cloned().collect::<Vec<DeviceProperties>>();
        devices.sort_by_key(|d| d.address);
        devices
    }

    /// Returns the device handle, with an empty name for unknown devices.
    pub fn get_bluetooth_device(&self, addr: &RawAddress) -> BluetoothDevice {
        match self.inner.lock().unwrap().devices.get(addr) {
            Some(device) => device.to_bluetooth_device(),
            None => BluetoothDevice { address: *addr, name: String::new() },
        }
    }

    pub fn get_bond_state(&self, addr: &RawAddress) -> BtBondState {
        match self.inner.lock().unwrap().devices.get(addr) {
            Some(device) => device.bond_state,
            None => BtBondState::NotBonded,
        }
    }

    /// Records the bond state. Losing the bond also forgets the service list.
    ///
    /// Only the bond state machine's notification path calls this.
    pub(crate) fn set_bond_state(&self, addr: &RawAddress, state: BtBondState) {
        let mut inner = self.inner.lock().unwrap();
        let device = inner.get_or_add(addr);
        device.bond_state = state;
        if state == BtBondState::NotBonded {
            device.uuids.clear();
        }
    }

    /// Marks a device reported in the adapter's bonded list.
    pub(crate) fn mark_bonded(&self, addr: &RawAddress) {
        self.inner.lock().unwrap().get_or_add(addr).bond_state = BtBondState::Bonded;
    }

    pub fn get_name(&self, addr: &RawAddress) -> String {
        match self.inner.lock().unwrap().devices.get(addr) {
            Some(device) => device.name.clone(),
            None => String::new(),
        }
    }

    pub fn get_alias(&self, addr: &RawAddress) -> String {
        match self.inner.lock().unwrap().devices.get(addr) {
            Some(device) => device.alias.clone().unwrap_or_else(|| device.name.clone()),
            None => String::new(),
        }
    }

    /// Asks the radio to store a new friendly name for the device.
    ///
    /// Returns true if the request is accepted. The cache follows the property callback.
    pub fn set_alias(&self, addr: &RawAddress, alias: String) -> bool {
        let prop = BtProperty::new(BtPropertyType::RemoteFriendlyName, alias.into_bytes());
        let status = self.radio.set_remote_device_property(addr, prop);
        if status != BtStatus::Success {
            error!("[{}] Setting alias rejected: {:?}", addr, status);
            return false;
        }
        true
    }

    pub fn get_class_of_device(&self, addr: &RawAddress) -> u32 {
        self.inner.lock().unwrap().devices.get(addr).map(|d| d.class_of_device).unwrap_or(0)
    }

    pub fn get_device_type(&self, addr: &RawAddress) -> BtDeviceType {
        match self.inner.lock().unwrap().devices.get(addr) {
            Some(device) => device.device_type,
            None => BtDeviceType::Unknown,
        }
    }

    pub fn get_uuids(&self, addr: &RawAddress) -> Vec<Uuid128Bit> {
        match self.inner.lock().unwrap().devices.get(addr) {
            Some(device) => device.uuids.clone(),
            None => vec![],
        }
    }

    /// Applies properties reported for a remote device.
    ///
    /// A service list answers any outstanding discovery. It is only forwarded to clients while
    /// the adapter is fully on.
    pub fn on_device_properties_changed(
        &self,
        addr: &RawAddress,
        properties: Vec<BtProperty>,
        adapter_on: bool,
    ) {
        let mut uuids = None;
        {
            let mut inner = self.inner.lock().unwrap();
            let device = inner.get_or_add(addr);
            for prop in &properties {
                device.apply(prop);
                if prop.prop_type == BtPropertyType::Uuids {
                    uuids = Some(device.uuids.clone());
                }
            }

            if uuids.is_some() {
                inner.sdp_tracker.remove(addr);
                inner.timers.cancel(*addr);
            }
        }

        if let Some(uuids) = uuids {
            debug!("[{}] Services: {}", addr, DisplayUuids(&uuids));
            if adapter_on {
                self.notify_uuids(addr, uuids);
            }
        }
    }

    /// Caches a device seen by discovery and tells clients about it.
    pub fn on_device_found(&self, properties: Vec<BtProperty>) {
        let addr = match properties
            .iter()
            .find(|p| p.prop_type == BtPropertyType::BdAddr)
            .and_then(|p| RawAddress::from_bytes(&p.val))
        {
            Some(addr) => addr,
            None => {
                warn!("Device found without an address");
                return;
            }
        };

        let device = {
            let mut inner = self.inner.lock().unwrap();
            let device = inner.get_or_add(&addr);
            for prop in &properties {
                device.apply(prop);
            }
            device.to_bluetooth_device()
        };

        self.for_all_callbacks(|callback| {
            callback.on_device_found(device.clone());
        });
    }

    /// Reports a link change. Links made while only LE is up are flagged as LE only.
    pub fn on_acl_state_changed(
        &self,
        status: BtStatus,
        addr: &RawAddress,
        state: BtAclState,
        adapter_state: AdapterState,
    ) {
        if status != BtStatus::Success {
            warn!("[{}] ACL state {:?} with status {:?}", addr, state, status);
        }

        let (device, bonding) = match self.inner.lock().unwrap().devices.get(addr) {
            Some(device) => {
                (device.to_bluetooth_device(), device.bond_state == BtBondState::Bonding)
            }
            None => {
                error!("[{}] ACL state change for unknown device", addr);
                return;
            }
        };

        let le_only = match (state, adapter_state) {
            (BtAclState::Connected, AdapterState::On | AdapterState::TurningOn) => Some(false),
            (BtAclState::Connected, AdapterState::BleOn | AdapterState::BleTurningOn) => {
                Some(true)
            }
            (BtAclState::Disconnected, AdapterState::On | AdapterState::TurningOff) => {
                Some(false)
            }
            (BtAclState::Disconnected, AdapterState::BleOn | AdapterState::BleTurningOff) => {
                Some(true)
            }
            _ => None,
        };

        if state == BtAclState::Disconnected && bonding {
            info!("[{}] Link lost while bonding", addr);
            self.for_all_callbacks(|callback| {
                callback.on_pairing_cancelled(device.clone());
            });
        }

        match le_only {
            Some(le_only) => {
                debug!("[{}] ACL {:?} (le only: {})", addr, state, le_only);
                self.for_all_callbacks(|callback| {
                    callback.on_acl_state_changed(device.clone(), state, le_only);
                });
            }
            None => {
                debug!("[{}] ACL {:?} ignored in {:?}", addr, state, adapter_state);
            }
        }
    }

    /// Starts a service search unless one is already outstanding for the device.
    pub fn fetch_uuids(&self, addr: &RawAddress) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.sdp_tracker.contains(addr) {
                debug!("[{}] Service search already outstanding", addr);
                return;
            }
            inner.sdp_tracker.insert(*addr);
            inner.timers.start(*addr, self.uuid_fetch_timeout);
        }

        let status = self.radio.get_remote_services(addr);
        if status != BtStatus::Success {
            // The fallback timer still answers the request.
            error!("[{}] Service search rejected: {:?}", addr, status);
        }
    }

    /// Fallback for a service search the radio never answered.
    pub fn on_uuid_fetch_timeout(&self, addr: &RawAddress, generation: u64) {
        let uuids = {
            let mut inner = self.inner.lock().unwrap();
            if !inner.timers.expire(*addr, generation) {
                debug!("[{}] Stale service search timeout", addr);
                return;
            }
            inner.sdp_tracker.remove(addr);
            inner.get_or_add(addr).uuids.clone()
        };

        warn!("[{}] Service search timed out, reporting cached services", addr);
        self.notify_uuids(addr, uuids);
    }

    /// Sends the cached service list of a device to clients.
    pub fn update_uuids(&self, addr: &RawAddress) {
        let uuids = self.get_uuids(addr);
        self.notify_uuids(addr, uuids);
    }

    fn notify_uuids(&self, addr: &RawAddress, uuids: Vec<Uuid128Bit>) {
        let device = self.get_bluetooth_device(addr);
        self.for_all_callbacks(|callback| {
            callback.on_remote_uuids(device.clone(), uuids.clone());
        });
    }

    /// Cancels every fallback timer.
    pub fn cancel_timers(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.timers.cancel_all();
        inner.sdp_tracker.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_properties() {
        let addr = RawAddress::from_string("01:02:03:04:05:06").unwrap();
        let mut device = DeviceProperties::new(addr);

        device.apply(&BtProperty::new(BtPropertyType::BdName, b"speaker".to_vec()));
        device.apply(&BtProperty::from_u32(BtPropertyType::ClassOfDevice, 0x240404));
        device.apply(&BtProperty::from_u32(BtPropertyType::TypeOfDevice, 3));
        device.apply(&BtProperty::new(BtPropertyType::RemoteRssi, vec![0xc4]));
        device.apply(&BtProperty::new(BtPropertyType::Uuids, vec![7u8; 32]));

        assert_eq!(device.name, "speaker");
        assert_eq!(device.alias, None);
        assert_eq!(device.class_of_device, 0x240404);
        assert_eq!(device.device_type, BtDeviceType::Dual);
        assert_eq!(device.rssi, -60);
        assert_eq!(device.uuids, vec![[7u8; 16], [7u8; 16]]);

        device.apply(&BtProperty::new(BtPropertyType::RemoteFriendlyName, b"kitchen".to_vec()));
        assert_eq!(device.alias, Some(String::from("kitchen")));
        assert_eq!(device.to_bluetooth_device().name, "speaker");
    }
}
