//! Composition root of the adapter.
//!
//! Owns both state machines and routes every message taken off the dispatch loop.

use bt_topshim::btif::{BaseCallbacks, BtStatus, RadioControl};
use log::{debug, info, warn};

use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedSender;

use crate::adapter_properties::AdapterProperties;
use crate::adapter_state::{AdapterState, AdapterStateMachine, AdapterStateMessage};
use crate::bluetooth::{get_bt_dispatcher, Bluetooth, SharedCallbacks};
use crate::bond_state_machine::{BondMessage, BondStateMachine};
use crate::callbacks::Callbacks;
use crate::config::AdapterConfig;
use crate::device_policy::{DevicePolicyStore, SharedDevicePolicy};
use crate::energy::EnergyInfoTracker;
use crate::profile_services::{IProfileServiceLauncher, ProfileServiceManager};
use crate::remote_devices::RemoteDevices;
use crate::Message;

pub struct AdapterService {
    config: AdapterConfig,
    tx: UnboundedSender<Message>,
    radio: Arc<dyn RadioControl>,
    callbacks: SharedCallbacks,
    properties: Arc<AdapterProperties>,
    remote_devices: Arc<RemoteDevices>,
    energy: Arc<EnergyInfoTracker>,
    policy: SharedDevicePolicy,
    adapter_state: AdapterStateMachine,
    bond_state: BondStateMachine,
    last_state: AdapterState,
    name_applied: bool,
}

impl AdapterService {
    pub fn new(
        tx: UnboundedSender<Message>,
        config: AdapterConfig,
        radio: Arc<dyn RadioControl>,
        launcher: Box<dyn IProfileServiceLauncher + Send>,
    ) -> AdapterService {
        Self::new_with_policy(tx, config, radio, launcher, DevicePolicyStore::shared())
    }

    /// Same as `new` with an external store for per-device permissions and priorities.
    pub fn new_with_policy(
        tx: UnboundedSender<Message>,
        config: AdapterConfig,
        radio: Arc<dyn RadioControl>,
        launcher: Box<dyn IProfileServiceLauncher + Send>,
        policy: SharedDevicePolicy,
    ) -> AdapterService {
        let callbacks: SharedCallbacks = Arc::new(Mutex::new(Callbacks::new()));
        let remote_devices = Arc::new(RemoteDevices::new(
            radio.clone(),
            callbacks.clone(),
            tx.clone(),
            config.uuid_fetch_timeout,
        ));
        let properties = Arc::new(AdapterProperties::new(
            radio.clone(),
            remote_devices.clone(),
            callbacks.clone(),
            tx.clone(),
        ));
        let services = ProfileServiceManager::new(config.supported_profiles.clone(), launcher);
        let adapter_state = AdapterStateMachine::new(
            tx.clone(),
            radio.clone(),
            properties.clone(),
            Box::new(services),
            config.timeouts.clone(),
            config.start_restricted,
        );
        let bond_state = BondStateMachine::new(
            radio.clone(),
            properties.clone(),
            remote_devices.clone(),
            policy.clone(),
            callbacks.clone(),
        );
        let energy = Arc::new(EnergyInfoTracker::new(config.energy.clone()));

        AdapterService {
            config,
            tx,
            radio,
            callbacks,
            properties,
            remote_devices,
            energy,
            policy,
            adapter_state,
            bond_state,
            last_state: AdapterState::Off,
            name_applied: false,
        }
    }

    /// Hands the radio its callback path. Must run before any power request.
    pub fn init(&mut self) -> bool {
        info!("Initializing adapter service");
        self.radio.initialize(get_bt_dispatcher(self.tx.clone()))
    }

    /// Returns a client handle to the adapter API.
    pub fn get_bluetooth(&self) -> Bluetooth {
        Bluetooth::new(
            self.tx.clone(),
            self.radio.clone(),
            self.properties.clone(),
            self.remote_devices.clone(),
            self.energy.clone(),
            self.policy.clone(),
            self.callbacks.clone(),
            self.config.energy_info_wait,
        )
    }

    pub fn get_adapter_state_machine(&self) -> &AdapterStateMachine {
        &self.adapter_state
    }

    pub fn get_bond_state_machine(&self) -> &BondStateMachine {
        &self.bond_state
    }

    pub fn get_remote_devices(&self) -> Arc<RemoteDevices> {
        self.remote_devices.clone()
    }

    /// Processes one message. Returns false once the service has shut down.
    pub fn handle_message(&mut self, msg: Message) -> bool {
        match msg {
            Message::Base(cb) => self.dispatch_base_callbacks(cb),
            Message::AdapterState(msg) => self.adapter_state.handle(msg),
            Message::Bond(msg) => self.bond_state.handle(msg),
            Message::FetchUuids(addr) => self.remote_devices.fetch_uuids(&addr),
            Message::UuidFetchTimeout(addr, generation) => {
                self.remote_devices.on_uuid_fetch_timeout(&addr, generation)
            }
            Message::ProfileServiceStateChanged(profile, state) => {
                self.adapter_state.on_profile_service_state_changed(profile, state)
            }
            Message::Shutdown => {
                self.shutdown();
                return false;
            }
        }

        self.check_adapter_state();
        true
    }

    /// Disarms every timer and releases the radio.
    pub fn shutdown(&mut self) {
        info!("Shutting down adapter service");
        self.adapter_state.shutdown();
        self.bond_state.shutdown();
        self.remote_devices.cancel_timers();
        self.radio.cleanup();
    }

    fn check_adapter_state(&mut self) {
        let state = self.properties.get_state();
        if state == self.last_state {
            return;
        }
        self.last_state = state;

        match state {
            AdapterState::On => self.on_adapter_on(),
            // The device cache is rebuilt on the way up, nothing in flight survives a power cycle.
            AdapterState::Off | AdapterState::BleTurningOn => self.bond_state.reset(),
            _ => (),
        }
    }

    fn on_adapter_on(&mut self) {
        for addr in self.properties.get_bonded_devices() {
            self.remote_devices.update_uuids(&addr);
        }

        if self.name_applied {
            return;
        }
        self.name_applied = true;
        if let Some(name) = self.config.adapter_name.clone() {
            if name != self.properties.get_name() && !self.properties.set_name(name) {
                warn!("Configured adapter name rejected");
            }
        }
    }

    fn dispatch_base_callbacks(&mut self, cb: BaseCallbacks) {
        match cb {
            BaseCallbacks::AdapterState(state) => {
                self.adapter_state.handle(AdapterStateMessage::RadioStateChanged(state));
            }
            BaseCallbacks::AdapterProperties(status, _num, properties) => {
                if status != BtStatus::Success {
                    warn!("Adapter properties reported with status {:?}", status);
                    return;
                }
                self.properties.on_adapter_properties_changed(properties);
            }
            BaseCallbacks::RemoteDeviceProperties(status, addr, _num, properties) => {
                if status != BtStatus::Success {
                    warn!("[{}] Device properties reported with status {:?}", addr, status);
                    return;
                }
                let adapter_on = self.properties.get_state() == AdapterState::On;
                self.remote_devices.on_device_properties_changed(&addr, properties, adapter_on);
            }
            BaseCallbacks::DeviceFound(_num, properties) => {
                self.remote_devices.on_device_found(properties);
            }
            BaseCallbacks::DiscoveryState(state) => {
                self.properties.on_discovery_state_changed(state);
            }
            BaseCallbacks::PinRequest(addr, name, cod, min_16_digit) => {
                self.remote_devices.add_pairing_device(&addr, &name, cod);
                self.bond_state.handle(BondMessage::PinRequest(addr, cod, min_16_digit));
            }
            BaseCallbacks::SspRequest(addr, name, cod, variant, passkey) => {
                self.remote_devices.add_pairing_device(&addr, &name, cod);
                self.bond_state.handle(BondMessage::SspRequest(addr, variant, passkey));
            }
            BaseCallbacks::BondState(status, addr, state) => {
                self.bond_state.handle(BondMessage::BondingStateChange(addr, state, status));
            }
            BaseCallbacks::AclState(status, addr, state) => {
                let adapter_state = self.properties.get_state();
                self.remote_devices.on_acl_state_changed(status, &addr, state, adapter_state);
            }
            BaseCallbacks::EnergyInfo(info, traffic) => {
                debug!("Energy info: {:?}", info);
                self.energy.on_energy_info(info, traffic);
            }
        }
    }
}
