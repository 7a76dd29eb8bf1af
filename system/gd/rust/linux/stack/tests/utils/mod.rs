//! Shared fixtures for the adapter integration tests.
#![allow(dead_code)]

use bt_topshim::btif::{
    BaseCallbacks, BaseCallbacksDispatcher, BtAclState, BtBondState, BtProperty, BtPropertyType,
    BtScanMode, BtSspVariant, BtState, BtStatus, BtTransport, OobData, RadioControl, RawAddress,
    Uuid128Bit,
};
use btadapter::adapter_properties::ProfileConnectionState;
use btadapter::adapter_service::AdapterService;
use btadapter::adapter_state::AdapterState;
use btadapter::bluetooth::{Bluetooth, BluetoothDevice, IBluetooth, IBluetoothCallback};
use btadapter::bond_state_machine::{BondReason, PairingVariant};
use btadapter::config::AdapterConfig;
use btadapter::profile_services::{IProfileServiceLauncher, ProfileService, ProfileServiceState};
use btadapter::{Message, Stack};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

/// Radio that records commands and, when responsive, answers power and property commands the
/// way a healthy controller would.
pub struct MockRadio {
    dispatcher: Mutex<Option<BaseCallbacksDispatcher>>,
    commands: Mutex<Vec<String>>,
    statuses: Mutex<HashMap<&'static str, BtStatus>>,
    responsive: Mutex<bool>,
}

impl MockRadio {
    pub fn new() -> MockRadio {
        MockRadio {
            dispatcher: Mutex::new(None),
            commands: Mutex::new(vec![]),
            statuses: Mutex::new(HashMap::new()),
            responsive: Mutex::new(true),
        }
    }

    /// Makes `command` return `status` from now on.
    pub fn set_status(&self, command: &'static str, status: BtStatus) {
        self.statuses.lock().unwrap().insert(command, status);
    }

    pub fn set_responsive(&self, responsive: bool) {
        *self.responsive.lock().unwrap() = responsive;
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn count(&self, command: &str) -> usize {
        self.commands.lock().unwrap().iter().filter(|c| c.as_str() == command).count()
    }

    fn command(&self, command: &'static str) -> BtStatus {
        self.commands.lock().unwrap().push(String::from(command));
        self.statuses.lock().unwrap().get(command).cloned().unwrap_or(BtStatus::Success)
    }

    fn reply(&self, cb: BaseCallbacks) {
        if !*self.responsive.lock().unwrap() {
            return;
        }
        if let Some(dispatcher) = self.dispatcher.lock().unwrap().as_ref() {
            (dispatcher.dispatch)(cb);
        }
    }
}

impl RadioControl for MockRadio {
    fn initialize(&self, callbacks: BaseCallbacksDispatcher) -> bool {
        *self.dispatcher.lock().unwrap() = Some(callbacks);
        true
    }

    fn cleanup(&self) {
        self.commands.lock().unwrap().push(String::from("cleanup"));
        *self.dispatcher.lock().unwrap() = None;
    }

    fn enable(&self, _start_restricted: bool) -> BtStatus {
        let status = self.command("enable");
        if status == BtStatus::Success {
            self.reply(BaseCallbacks::AdapterState(BtState::On));
        }
        status
    }

    fn disable(&self) -> BtStatus {
        let status = self.command("disable");
        if status == BtStatus::Success {
            self.reply(BaseCallbacks::AdapterState(BtState::Off));
        }
        status
    }

    fn get_adapter_property(&self, _prop_type: BtPropertyType) -> BtStatus {
        self.command("get_adapter_property")
    }

    fn set_adapter_property(&self, prop: BtProperty) -> BtStatus {
        let status = self.command("set_adapter_property");
        if status == BtStatus::Success {
            self.reply(BaseCallbacks::AdapterProperties(BtStatus::Success, 1, vec![prop]));
        }
        status
    }

    fn set_remote_device_property(&self, addr: &RawAddress, prop: BtProperty) -> BtStatus {
        let status = self.command("set_remote_device_property");
        if status == BtStatus::Success {
            self.reply(BaseCallbacks::RemoteDeviceProperties(
                BtStatus::Success,
                *addr,
                1,
                vec![prop],
            ));
        }
        status
    }

    fn create_bond(&self, _addr: &RawAddress, _transport: BtTransport) -> BtStatus {
        self.command("create_bond")
    }

    fn create_bond_out_of_band(
        &self,
        _addr: &RawAddress,
        _transport: BtTransport,
        _oob_data: &OobData,
    ) -> BtStatus {
        self.command("create_bond_out_of_band")
    }

    fn remove_bond(&self, _addr: &RawAddress) -> BtStatus {
        self.command("remove_bond")
    }

    fn cancel_bond(&self, _addr: &RawAddress) -> BtStatus {
        self.command("cancel_bond")
    }

    fn pin_reply(&self, _addr: &RawAddress, _accept: bool, _pin: &[u8]) -> BtStatus {
        self.command("pin_reply")
    }

    fn ssp_reply(
        &self,
        _addr: &RawAddress,
        _variant: BtSspVariant,
        _accept: bool,
        _passkey: u32,
    ) -> BtStatus {
        self.command("ssp_reply")
    }

    fn get_remote_services(&self, _addr: &RawAddress) -> BtStatus {
        self.command("get_remote_services")
    }

    fn start_discovery(&self) -> BtStatus {
        self.command("start_discovery")
    }

    fn cancel_discovery(&self) -> BtStatus {
        self.command("cancel_discovery")
    }

    fn read_energy_info(&self) -> BtStatus {
        self.command("read_energy_info")
    }
}

/// Launcher whose services report their new state right away unless told otherwise.
pub struct MockProfileLauncher {
    tx: UnboundedSender<Message>,
    requests: Arc<Mutex<Vec<(ProfileService, bool)>>>,
    stuck: Arc<Mutex<Vec<ProfileService>>>,
}

impl IProfileServiceLauncher for MockProfileLauncher {
    fn set_profile_service_state(&mut self, profile: ProfileService, enabled: bool) {
        self.requests.lock().unwrap().push((profile, enabled));
        if self.stuck.lock().unwrap().contains(&profile) {
            return;
        }

        let state = if enabled { ProfileServiceState::On } else { ProfileServiceState::Off };
        let _ = self.tx.send(Message::ProfileServiceStateChanged(profile, state));
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    AdapterState(AdapterState, AdapterState),
    Address(RawAddress),
    Name(String),
    ScanMode(BtScanMode),
    Discovering(bool),
    DeviceFound(RawAddress),
    Connection(RawAddress, ProfileConnectionState, ProfileConnectionState),
    Bond(RawAddress, BtBondState, BtBondState, BondReason),
    PairingRequest(RawAddress, PairingVariant, Option<u32>),
    PairingCancelled(RawAddress),
    RemoteUuids(RawAddress, Vec<Uuid128Bit>),
    Acl(RawAddress, BtAclState, bool),
}

pub struct MockCallback {
    events: Arc<Mutex<Vec<Event>>>,
}

impl MockCallback {
    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl IBluetoothCallback for MockCallback {
    fn on_adapter_state_changed(&self, prev: AdapterState, state: AdapterState) {
        self.push(Event::AdapterState(prev, state));
    }

    fn on_address_changed(&self, addr: RawAddress) {
        self.push(Event::Address(addr));
    }

    fn on_name_changed(&self, name: String) {
        self.push(Event::Name(name));
    }

    fn on_scan_mode_changed(&self, mode: BtScanMode) {
        self.push(Event::ScanMode(mode));
    }

    fn on_discovering_changed(&self, discovering: bool) {
        self.push(Event::Discovering(discovering));
    }

    fn on_device_found(&self, remote_device: BluetoothDevice) {
        self.push(Event::DeviceFound(remote_device.address));
    }

    fn on_connection_state_changed(
        &self,
        remote_device: BluetoothDevice,
        prev: ProfileConnectionState,
        state: ProfileConnectionState,
    ) {
        self.push(Event::Connection(remote_device.address, prev, state));
    }

    fn on_bond_state_changed(
        &self,
        remote_device: BluetoothDevice,
        prev: BtBondState,
        state: BtBondState,
        reason: BondReason,
    ) {
        self.push(Event::Bond(remote_device.address, prev, state, reason));
    }

    fn on_pairing_request(
        &self,
        remote_device: BluetoothDevice,
        variant: PairingVariant,
        passkey: Option<u32>,
    ) {
        self.push(Event::PairingRequest(remote_device.address, variant, passkey));
    }

    fn on_pairing_cancelled(&self, remote_device: BluetoothDevice) {
        self.push(Event::PairingCancelled(remote_device.address));
    }

    fn on_remote_uuids(&self, remote_device: BluetoothDevice, uuids: Vec<Uuid128Bit>) {
        self.push(Event::RemoteUuids(remote_device.address, uuids));
    }

    fn on_acl_state_changed(
        &self,
        remote_device: BluetoothDevice,
        state: BtAclState,
        le_only: bool,
    ) {
        self.push(Event::Acl(remote_device.address, state, le_only));
    }
}

pub struct TestContext {
    pub service: AdapterService,
    pub bluetooth: Bluetooth,
    pub radio: Arc<MockRadio>,
    pub tx: UnboundedSender<Message>,
    rx: UnboundedReceiver<Message>,
    requests: Arc<Mutex<Vec<(ProfileService, bool)>>>,
    stuck: Arc<Mutex<Vec<ProfileService>>>,
    events: Arc<Mutex<Vec<Event>>>,
}

/// Builds an initialized adapter service around a mock radio with one recording callback.
///
/// Must be called from within a tokio runtime once timers are involved.
pub fn start_test(config: AdapterConfig) -> TestContext {
    let (tx, rx) = Stack::create_channel();
    let radio = Arc::new(MockRadio::new());
    let requests = Arc::new(Mutex::new(vec![]));
    let stuck = Arc::new(Mutex::new(vec![]));
    let launcher = MockProfileLauncher {
        tx: tx.clone(),
        requests: requests.clone(),
        stuck: stuck.clone(),
    };

    let mut service = AdapterService::new(tx.clone(), config, radio.clone(), Box::new(launcher));
    assert!(service.init());

    let events = Arc::new(Mutex::new(vec![]));
    let mut bluetooth = service.get_bluetooth();
    bluetooth.register_callback(Box::new(MockCallback { events: events.clone() }));

    TestContext { service, bluetooth, radio, tx, rx, requests, stuck, events }
}

impl TestContext {
    /// Handles every queued message, including the ones posted while handling.
    pub fn pump(&mut self) {
        while let Ok(msg) = self.rx.try_recv() {
            self.service.handle_message(msg);
        }
    }

    /// Lets (paused) time pass, then pumps.
    pub async fn run_for(&mut self, duration: Duration) {
        tokio::time::sleep(duration).await;
        self.pump();
    }

    pub fn inject(&self, cb: BaseCallbacks) {
        let _ = self.tx.send(Message::Base(cb));
    }

    /// Keeps a profile service from ever reporting back.
    pub fn make_stuck(&self, profile: ProfileService) {
        self.stuck.lock().unwrap().push(profile);
    }

    pub fn requests(&self) -> Vec<(ProfileService, bool)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear_events(&self) {
        self.events.lock().unwrap().clear();
    }

    pub fn adapter_states(&self) -> Vec<AdapterState> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::AdapterState(_, state) => Some(state),
                _ => None,
            })
            .collect()
    }

    pub fn bond_events(&self) -> Vec<Event> {
        self.events().into_iter().filter(|e| matches!(e, Event::Bond(..))).collect()
    }

    /// Runs a full enable against a responsive radio.
    pub fn enable(&mut self) {
        assert!(self.bluetooth.enable());
        self.pump();
        assert_eq!(self.bluetooth.get_state(), AdapterState::On);
    }

    /// Reports `addr` as seen by discovery so the cache knows it.
    pub fn add_device(&mut self, addr: RawAddress, name: &str) {
        self.inject(BaseCallbacks::DeviceFound(
            2,
            vec![
                BtProperty::new(BtPropertyType::BdAddr, addr.to_byte_arr().to_vec()),
                BtProperty::new(BtPropertyType::BdName, name.as_bytes().to_vec()),
            ],
        ));
        self.pump();
    }
}

pub fn address(s: &str) -> RawAddress {
    RawAddress::from_string(s).unwrap()
}
