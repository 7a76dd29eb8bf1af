//! Simulated controller so the daemon can run without hardware.
//!
//! Every command completes right away through the callback dispatcher, the same way the native
//! stack reports completions. A handful of fixed peers can be discovered and bonded.

use bt_topshim::btif::{
    BaseCallbacks, BaseCallbacksDispatcher, BtAclState, BtActivityEnergyInfo, BtBondState,
    BtDeviceType, BtDiscoveryState, BtProperty, BtPropertyType, BtScanMode, BtSspVariant, BtState,
    BtStatus, BtTransport, BtUidTraffic, OobData, RadioControl, RawAddress,
};
use btadapter::cod;
use btadapter::profile_services::{IProfileServiceLauncher, ProfileService, ProfileServiceState};
use btadapter::uuid::{self, UuidHelper};
use btadapter::Message;
use log::{debug, info, warn};
use num_traits::cast::FromPrimitive;
use rand::Rng;

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use tokio::sync::mpsc::UnboundedSender;

const LOCAL_ADDRESS: &str = "F0:0D:BE:EF:00:01";
const LOCAL_NAME: &str = "btadapterd";
const LOCAL_CLASS: u32 = 0x10010c;

/// Version 0x0062, privacy, 5 advertising instances, RPA offload, 32 IRKs, 16 filters, energy
/// reporting, 1 KiB of scan storage, 32 trackable advertisers, extended scan.
const LOCAL_LE_FEATURES: [u8; 14] = [0x62, 0x00, 1, 5, 1, 32, 16, 1, 0x00, 0x04, 0x20, 0x00, 1, 0];

const CTRL_STATE_IDLE: u8 = 3;

struct Peer {
    address: &'static str,
    name: &'static str,
    class_of_device: u32,
    device_type: BtDeviceType,
    rssi: i8,
    uuids: &'static [&'static str],
}

const PEERS: &[Peer] = &[
    Peer {
        address: "00:1A:7D:DA:71:01",
        name: "Headphones",
        class_of_device: 0x240404,
        device_type: BtDeviceType::Bredr,
        rssi: -52,
        uuids: &[uuid::A2DP_SINK, uuid::AVRCP_TARGET, uuid::HFP],
    },
    Peer {
        address: "00:1A:7D:DA:71:02",
        name: "Keyboard",
        class_of_device: 0x000540,
        device_type: BtDeviceType::Bredr,
        rssi: -61,
        uuids: &[uuid::HID],
    },
    Peer {
        address: "00:1A:7D:DA:71:03",
        name: "Phone",
        class_of_device: 0x5a020c,
        device_type: BtDeviceType::Dual,
        rssi: -70,
        uuids: &[uuid::HFP_AG, uuid::A2DP_SOURCE, uuid::PBAP_PSE, uuid::MAS, uuid::NAP],
    },
];

fn find_peer(addr: &RawAddress) -> Option<&'static Peer> {
    PEERS.iter().find(|p| RawAddress::from_string(p.address).as_ref() == Some(addr))
}

fn peer_uuid_property(peer: &Peer) -> BtProperty {
    let val = peer
        .uuids
        .iter()
        .filter_map(|s| UuidHelper::from_string(*s))
        .flat_map(|u| u.to_vec())
        .collect::<Vec<u8>>();
    BtProperty::new(BtPropertyType::Uuids, val)
}

enum Pairing {
    Confirmation,
    Pin,
}

struct ControllerState {
    enabled: bool,
    address: RawAddress,
    name: String,
    scan_mode: BtScanMode,
    discoverable_timeout: u32,
    bonded: BTreeSet<RawAddress>,
    pairing: HashMap<RawAddress, Pairing>,
}

impl ControllerState {
    fn property(&self, prop_type: BtPropertyType) -> Option<BtProperty> {
        let prop = match prop_type {
            BtPropertyType::BdName => BtProperty::new(prop_type, self.name.clone().into_bytes()),
            BtPropertyType::BdAddr => {
                BtProperty::new(prop_type, self.address.to_byte_arr().to_vec())
            }
            BtPropertyType::ClassOfDevice => BtProperty::from_u32(prop_type, LOCAL_CLASS),
            BtPropertyType::Uuids => BtProperty::new(prop_type, vec![]),
            BtPropertyType::AdapterScanMode => {
                BtProperty::from_u32(prop_type, self.scan_mode as u32)
            }
            BtPropertyType::AdapterDiscoverableTimeout => {
                BtProperty::from_u32(prop_type, self.discoverable_timeout)
            }
            BtPropertyType::AdapterBondedDevices => BtProperty::new(
                prop_type,
                self.bonded.iter().flat_map(|a| a.to_byte_arr().to_vec()).collect(),
            ),
            BtPropertyType::LocalLeFeatures => {
                BtProperty::new(prop_type, LOCAL_LE_FEATURES.to_vec())
            }
            _ => return None,
        };
        Some(prop)
    }
}

pub struct VirtualRadio {
    dispatcher: Mutex<Option<BaseCallbacksDispatcher>>,
    state: Mutex<ControllerState>,
}

impl VirtualRadio {
    pub fn new() -> VirtualRadio {
        VirtualRadio {
            dispatcher: Mutex::new(None),
            state: Mutex::new(ControllerState {
                enabled: false,
                address: RawAddress::from_string(LOCAL_ADDRESS).unwrap_or_default(),
                name: String::from(LOCAL_NAME),
                scan_mode: BtScanMode::None_,
                discoverable_timeout: 120,
                bonded: BTreeSet::new(),
                pairing: HashMap::new(),
            }),
        }
    }

    fn send(&self, callbacks: Vec<BaseCallbacks>) {
        if let Some(dispatcher) = self.dispatcher.lock().unwrap().as_ref() {
            for cb in callbacks {
                (dispatcher.dispatch)(cb);
            }
        }
    }

    fn is_enabled(&self) -> bool {
        self.state.lock().unwrap().enabled
    }

    fn finish_pairing(&self, addr: &RawAddress, accepted: bool) -> BtStatus {
        let known = {
            let mut state = self.state.lock().unwrap();
            if state.pairing.remove(addr).is_none() {
                return BtStatus::Fail;
            }
            if accepted {
                state.bonded.insert(*addr);
            }
            find_peer(addr)
        };

        if !accepted {
            info!("[{}] Pairing rejected", addr);
            self.send(vec![BaseCallbacks::BondState(
                BtStatus::AuthRejected,
                *addr,
                BtBondState::NotBonded,
            )]);
            return BtStatus::Success;
        }

        let mut callbacks =
            vec![BaseCallbacks::BondState(BtStatus::Success, *addr, BtBondState::Bonded)];
        if let Some(peer) = known {
            callbacks.push(BaseCallbacks::RemoteDeviceProperties(
                BtStatus::Success,
                *addr,
                1,
                vec![peer_uuid_property(peer)],
            ));
        }
        self.send(callbacks);
        BtStatus::Success
    }
}

impl RadioControl for VirtualRadio {
    fn initialize(&self, callbacks: BaseCallbacksDispatcher) -> bool {
        *self.dispatcher.lock().unwrap() = Some(callbacks);
        true
    }

    fn cleanup(&self) {
        *self.dispatcher.lock().unwrap() = None;
    }

    fn enable(&self, start_restricted: bool) -> BtStatus {
        let props = {
            let mut state = self.state.lock().unwrap();
            if state.enabled {
                return BtStatus::Done;
            }
            state.enabled = true;
            [
                BtPropertyType::BdAddr,
                BtPropertyType::BdName,
                BtPropertyType::ClassOfDevice,
                BtPropertyType::Uuids,
                BtPropertyType::AdapterScanMode,
                BtPropertyType::AdapterDiscoverableTimeout,
                BtPropertyType::AdapterBondedDevices,
                BtPropertyType::LocalLeFeatures,
            ]
            .iter()
            .filter_map(|t| state.property(*t))
            .collect::<Vec<BtProperty>>()
        };

        info!("Virtual controller on (restricted: {})", start_restricted);
        let count = props.len() as i32;
        self.send(vec![
            BaseCallbacks::AdapterProperties(BtStatus::Success, count, props),
            BaseCallbacks::AdapterState(BtState::On),
        ]);
        BtStatus::Success
    }

    fn disable(&self) -> BtStatus {
        {
            let mut state = self.state.lock().unwrap();
            state.enabled = false;
            state.pairing.clear();
        }
        info!("Virtual controller off");
        self.send(vec![BaseCallbacks::AdapterState(BtState::Off)]);
        BtStatus::Success
    }

    fn get_adapter_property(&self, prop_type: BtPropertyType) -> BtStatus {
        let prop = match self.state.lock().unwrap().property(prop_type) {
            Some(prop) => prop,
            None => return BtStatus::Unsupported,
        };
        self.send(vec![BaseCallbacks::AdapterProperties(BtStatus::Success, 1, vec![prop])]);
        BtStatus::Success
    }

    fn set_adapter_property(&self, prop: BtProperty) -> BtStatus {
        {
            let mut state = self.state.lock().unwrap();
            match prop.prop_type {
                BtPropertyType::BdName => {
                    state.name = String::from_utf8_lossy(&prop.val).into_owned();
                }
                BtPropertyType::AdapterScanMode => {
                    match prop.as_u32().and_then(BtScanMode::from_u32) {
                        Some(mode) => state.scan_mode = mode,
                        None => return BtStatus::InvalidParam,
                    }
                }
                BtPropertyType::AdapterDiscoverableTimeout => match prop.as_u32() {
                    Some(seconds) => state.discoverable_timeout = seconds,
                    None => return BtStatus::InvalidParam,
                },
                _ => return BtStatus::Unsupported,
            }
        }

        self.send(vec![BaseCallbacks::AdapterProperties(BtStatus::Success, 1, vec![prop])]);
        BtStatus::Success
    }

    fn set_remote_device_property(&self, addr: &RawAddress, prop: BtProperty) -> BtStatus {
        self.send(vec![BaseCallbacks::RemoteDeviceProperties(
            BtStatus::Success,
            *addr,
            1,
            vec![prop],
        )]);
        BtStatus::Success
    }

    fn create_bond(&self, addr: &RawAddress, transport: BtTransport) -> BtStatus {
        if !self.is_enabled() {
            return BtStatus::NotReady;
        }
        if self.state.lock().unwrap().bonded.contains(addr) {
            return BtStatus::Done;
        }

        debug!("[{}] Bonding over {:?}", addr, transport);
        let mut callbacks =
            vec![BaseCallbacks::BondState(BtStatus::Success, *addr, BtBondState::Bonding)];
        match find_peer(addr) {
            Some(peer) => {
                callbacks.push(BaseCallbacks::AclState(
                    BtStatus::Success,
                    *addr,
                    BtAclState::Connected,
                ));
                let name = String::from(peer.name);
                if cod::is_cod_keyboard_like(peer.class_of_device) {
                    self.state.lock().unwrap().pairing.insert(*addr, Pairing::Pin);
                    callbacks.push(BaseCallbacks::PinRequest(
                        *addr,
                        name,
                        peer.class_of_device,
                        false,
                    ));
                } else {
                    self.state.lock().unwrap().pairing.insert(*addr, Pairing::Confirmation);
                    let passkey = rand::thread_rng().gen_range(0..1000000);
                    callbacks.push(BaseCallbacks::SspRequest(
                        *addr,
                        name,
                        peer.class_of_device,
                        BtSspVariant::PasskeyConfirmation as u32,
                        passkey,
                    ));
                }
            }
            None => {
                warn!("[{}] No such peer", addr);
                callbacks.push(BaseCallbacks::BondState(
                    BtStatus::RemoteDeviceDown,
                    *addr,
                    BtBondState::NotBonded,
                ));
            }
        }
        self.send(callbacks);
        BtStatus::Success
    }

    fn create_bond_out_of_band(
        &self,
        addr: &RawAddress,
        transport: BtTransport,
        oob_data: &OobData,
    ) -> BtStatus {
        if !oob_data.is_valid() {
            return BtStatus::InvalidParam;
        }
        if !self.is_enabled() {
            return BtStatus::NotReady;
        }

        debug!("[{}] Out of band bonding over {:?}", addr, transport);
        self.state.lock().unwrap().pairing.insert(*addr, Pairing::Confirmation);
        self.send(vec![BaseCallbacks::BondState(BtStatus::Success, *addr, BtBondState::Bonding)]);
        self.finish_pairing(addr, true)
    }

    fn remove_bond(&self, addr: &RawAddress) -> BtStatus {
        if !self.state.lock().unwrap().bonded.remove(addr) {
            return BtStatus::Fail;
        }
        self.send(vec![
            BaseCallbacks::BondState(BtStatus::Success, *addr, BtBondState::NotBonded),
            BaseCallbacks::AclState(BtStatus::Success, *addr, BtAclState::Disconnected),
        ]);
        BtStatus::Success
    }

    fn cancel_bond(&self, addr: &RawAddress) -> BtStatus {
        if self.state.lock().unwrap().pairing.remove(addr).is_none() {
            return BtStatus::Fail;
        }
        self.send(vec![BaseCallbacks::BondState(BtStatus::Fail, *addr, BtBondState::NotBonded)]);
        BtStatus::Success
    }

    fn pin_reply(&self, addr: &RawAddress, accept: bool, pin: &[u8]) -> BtStatus {
        match self.state.lock().unwrap().pairing.get(addr) {
            Some(Pairing::Pin) => (),
            _ => return BtStatus::Fail,
        }
        self.finish_pairing(addr, accept && !pin.is_empty())
    }

    fn ssp_reply(
        &self,
        addr: &RawAddress,
        variant: BtSspVariant,
        accept: bool,
        _passkey: u32,
    ) -> BtStatus {
        match self.state.lock().unwrap().pairing.get(addr) {
            Some(Pairing::Confirmation) => (),
            _ => return BtStatus::Fail,
        }
        debug!("[{}] SSP reply {:?} accept={}", addr, variant, accept);
        self.finish_pairing(addr, accept)
    }

    fn get_remote_services(&self, addr: &RawAddress) -> BtStatus {
        if !self.is_enabled() {
            return BtStatus::NotReady;
        }
        // Unknown devices never answer.
        if let Some(peer) = find_peer(addr) {
            self.send(vec![BaseCallbacks::RemoteDeviceProperties(
                BtStatus::Success,
                *addr,
                1,
                vec![peer_uuid_property(peer)],
            )]);
        }
        BtStatus::Success
    }

    fn start_discovery(&self) -> BtStatus {
        if !self.is_enabled() {
            return BtStatus::NotReady;
        }

        let mut callbacks = vec![BaseCallbacks::DiscoveryState(BtDiscoveryState::Started)];
        for peer in PEERS {
            let addr = match RawAddress::from_string(peer.address) {
                Some(addr) => addr,
                None => continue,
            };
            let props = vec![
                BtProperty::new(BtPropertyType::BdAddr, addr.to_byte_arr().to_vec()),
                BtProperty::new(BtPropertyType::BdName, peer.name.as_bytes().to_vec()),
                BtProperty::from_u32(BtPropertyType::ClassOfDevice, peer.class_of_device),
                BtProperty::from_u32(BtPropertyType::TypeOfDevice, peer.device_type as u32),
                BtProperty::new(BtPropertyType::RemoteRssi, vec![peer.rssi as u8]),
            ];
            callbacks.push(BaseCallbacks::DeviceFound(props.len() as i32, props));
        }
        callbacks.push(BaseCallbacks::DiscoveryState(BtDiscoveryState::Stopped));
        self.send(callbacks);
        BtStatus::Success
    }

    fn cancel_discovery(&self) -> BtStatus {
        BtStatus::Success
    }

    fn read_energy_info(&self) -> BtStatus {
        if !self.is_enabled() {
            return BtStatus::NotReady;
        }

        let mut rng = rand::thread_rng();
        let info = BtActivityEnergyInfo {
            status: 0,
            ctrl_state: CTRL_STATE_IDLE,
            tx_time: rng.gen_range(0..50),
            rx_time: rng.gen_range(0..200),
            idle_time: rng.gen_range(500..1000),
            energy_used: 0,
        };
        let traffic = vec![BtUidTraffic {
            app_uid: 1000,
            rx_bytes: rng.gen_range(0..4096),
            tx_bytes: rng.gen_range(0..4096),
        }];
        self.send(vec![BaseCallbacks::EnergyInfo(info, traffic)]);
        BtStatus::Success
    }
}

/// Profile services that come up and go down as soon as they are asked to.
pub struct VirtualProfileLauncher {
    tx: UnboundedSender<Message>,
}

impl VirtualProfileLauncher {
    pub fn new(tx: UnboundedSender<Message>) -> Self {
        VirtualProfileLauncher { tx }
    }
}

impl IProfileServiceLauncher for VirtualProfileLauncher {
    fn set_profile_service_state(&mut self, profile: ProfileService, enabled: bool) {
        let state = if enabled { ProfileServiceState::On } else { ProfileServiceState::Off };
        debug!("Profile service {:?} -> {:?}", profile, state);
        let _ = self.tx.send(Message::ProfileServiceStateChanged(profile, state));
    }
}
