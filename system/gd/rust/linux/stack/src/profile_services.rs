//! Tracks the dependent profile services and reports when a whole group reached its target.
//!
//! The BLE capable service (GATT) is started on its own before the radio is enabled. All other
//! supported services form the BR/EDR group, started once the radio is in BLE-on and stopped
//! before it goes back there.

use log::{debug, info, warn};
use std::collections::HashMap;

use crate::adapter_state::{AdapterStateMessage, IProfileServiceControl};

/// Profile service identifiers.
#[derive(Clone, Copy, Debug, FromPrimitive, ToPrimitive, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum ProfileService {
    Hfp = 1,
    A2dp = 2,
    Hdp = 3,
    HidHost = 4,
    Pan = 5,
    Pbap = 6,
    Gatt = 7,
    Map = 9,
    Sap = 10,
    A2dpSink = 11,
    AvrcpController = 12,
    Avrcp = 13,
    HfpClient = 16,
    PbapClient = 17,
}

impl ProfileService {
    /// Parses the names used in the configuration file.
    pub fn from_name(name: &str) -> Option<ProfileService> {
        match name.to_ascii_lowercase().as_str() {
            "hfp" => Some(ProfileService::Hfp),
            "a2dp" => Some(ProfileService::A2dp),
            "hdp" => Some(ProfileService::Hdp),
            "hid_host" => Some(ProfileService::HidHost),
            "pan" => Some(ProfileService::Pan),
            "pbap" => Some(ProfileService::Pbap),
            "gatt" => Some(ProfileService::Gatt),
            "map" => Some(ProfileService::Map),
            "sap" => Some(ProfileService::Sap),
            "a2dp_sink" => Some(ProfileService::A2dpSink),
            "avrcp_controller" => Some(ProfileService::AvrcpController),
            "avrcp" => Some(ProfileService::Avrcp),
            "hfp_client" => Some(ProfileService::HfpClient),
            "pbap_client" => Some(ProfileService::PbapClient),
            _ => None,
        }
    }

    pub fn is_ble_service(&self) -> bool {
        *self == ProfileService::Gatt
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProfileServiceState {
    Off,
    TurningOn,
    On,
    TurningOff,
}

/// Starts and stops individual profile services.
///
/// Completion is reported back through `ProfileServiceManager::on_profile_service_state_changed`.
pub trait IProfileServiceLauncher {
    fn set_profile_service_state(&mut self, profile: ProfileService, enabled: bool);
}

pub struct ProfileServiceManager {
    supported: Vec<ProfileService>,
    states: HashMap<ProfileService, ProfileServiceState>,
    launcher: Box<dyn IProfileServiceLauncher + Send>,
}

impl ProfileServiceManager {
    pub fn new(
        supported: Vec<ProfileService>,
        launcher: Box<dyn IProfileServiceLauncher + Send>,
    ) -> Self {
        let mut supported = supported;
        if !supported.contains(&ProfileService::Gatt) {
            supported.insert(0, ProfileService::Gatt);
        }
        supported.dedup();

        ProfileServiceManager { supported, states: HashMap::new(), launcher }
    }

    pub fn get_supported_services(&self) -> Vec<ProfileService> {
        self.supported.clone()
    }

    pub fn get_state(&self, profile: ProfileService) -> ProfileServiceState {
        self.states.get(&profile).cloned().unwrap_or(ProfileServiceState::Off)
    }

    fn bredr_services(&self) -> Vec<ProfileService> {
        self.supported.iter().filter(|p| !p.is_ble_service()).cloned().collect()
    }

    fn request(&mut self, profile: ProfileService, enabled: bool) {
        let next =
            if enabled { ProfileServiceState::TurningOn } else { ProfileServiceState::TurningOff };
        debug!("Requesting {:?} -> {:?}", profile, next);
        self.states.insert(profile, next);
        self.launcher.set_profile_service_state(profile, enabled);
    }
}

impl IProfileServiceControl for ProfileServiceManager {
    fn start_ble_profile_service(&mut self) -> bool {
        match self.get_state(ProfileService::Gatt) {
            ProfileServiceState::On => false,
            ProfileServiceState::TurningOn => true,
            _ => {
                self.request(ProfileService::Gatt, true);
                true
            }
        }
    }

    fn stop_ble_profile_service(&mut self) -> bool {
        match self.get_state(ProfileService::Gatt) {
            ProfileServiceState::Off => false,
            ProfileServiceState::TurningOff => true,
            _ => {
                self.request(ProfileService::Gatt, false);
                true
            }
        }
    }

    fn start_profile_services(&mut self) -> bool {
        let pending = self
            .bredr_services()
            .into_iter()
            .filter(|p| self.get_state(*p) != ProfileServiceState::On)
            .collect::<Vec<ProfileService>>();
        if pending.is_empty() {
            info!("No profile services to start");
            return false;
        }

        for profile in pending {
            if self.get_state(profile) != ProfileServiceState::TurningOn {
                self.request(profile, true);
            }
        }
        true
    }

    fn stop_profile_services(&mut self) -> bool {
        let pending = self
            .bredr_services()
            .into_iter()
            .filter(|p| self.get_state(*p) != ProfileServiceState::Off)
            .collect::<Vec<ProfileService>>();
        if pending.is_empty() {
            info!("No profile services to stop");
            return false;
        }

        for profile in pending {
            if self.get_state(profile) != ProfileServiceState::TurningOff {
                self.request(profile, false);
            }
        }
        true
    }

    fn on_profile_service_state_changed(
        &mut self,
        profile: ProfileService,
        state: ProfileServiceState,
    ) -> Option<AdapterStateMessage> {
        if !self.supported.contains(&profile) {
            warn!("State change for unsupported profile service {:?}", profile);
            return None;
        }

        let prev = self.get_state(profile);
        if prev == state {
            return None;
        }
        debug!("Profile service {:?}: {:?} -> {:?}", profile, prev, state);
        self.states.insert(profile, state);

        if profile.is_ble_service() {
            return match state {
                ProfileServiceState::On => Some(AdapterStateMessage::BleStarted),
                ProfileServiceState::Off => Some(AdapterStateMessage::BleStopped),
                _ => None,
            };
        }

        let bredr = self.bredr_services();
        match state {
            ProfileServiceState::On
                if bredr.iter().all(|p| self.get_state(*p) == ProfileServiceState::On) =>
            {
                Some(AdapterStateMessage::BrEdrStarted)
            }
            ProfileServiceState::Off
                if bredr.iter().all(|p| self.get_state(*p) == ProfileServiceState::Off) =>
            {
                Some(AdapterStateMessage::BrEdrStopped)
            }
            _ => None,
        }
    }
}
