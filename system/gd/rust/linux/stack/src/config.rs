//! Adapter configuration.
//!
//! Read from an optional JSON file. Every key is optional, missing or mistyped keys keep their
//! defaults.
//!
//! ```json
//! {
//!   "log_level": "debug",
//!   "adapter_name": "floss",
//!   "start_restricted": false,
//!   "supported_profiles": ["gatt", "a2dp", "hfp"],
//!   "timeouts_ms": { "enable": 12000, "uuid_fetch": 6000 },
//!   "energy_info_wait_ms": 30,
//!   "energy": { "tx_current_ma": 10, "rx_current_ma": 5, "idle_current_ma": 1,
//!               "operating_voltage_mv": 3300 }
//! }
//! ```

use anyhow::{bail, Context};
use log::{warn, LevelFilter};
use serde_json::{Map, Value};
use std::path::Path;
use std::time::Duration;

use crate::adapter_state::AdapterTimeouts;
use crate::energy::EnergyModel;
use crate::profile_services::ProfileService;

/// Default fallback for a UUID discovery that gets no answer.
pub const DEFAULT_UUID_FETCH_TIMEOUT_MS: u64 = 6000;

/// How long the activity report API waits for a fresh report from the radio.
pub const DEFAULT_ENERGY_INFO_WAIT_MS: u64 = 30;

const DEFAULT_SUPPORTED_PROFILES: [ProfileService; 9] = [
    ProfileService::Gatt,
    ProfileService::A2dp,
    ProfileService::Avrcp,
    ProfileService::Hfp,
    ProfileService::HidHost,
    ProfileService::Pan,
    ProfileService::Pbap,
    ProfileService::Map,
    ProfileService::Sap,
];

#[derive(Clone, Debug, PartialEq)]
pub struct AdapterConfig {
    pub log_level: Option<LevelFilter>,
    pub adapter_name: Option<String>,
    pub start_restricted: bool,
    pub supported_profiles: Vec<ProfileService>,
    pub timeouts: AdapterTimeouts,
    pub uuid_fetch_timeout: Duration,
    pub energy_info_wait: Duration,
    pub energy: EnergyModel,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        AdapterConfig {
            log_level: None,
            adapter_name: None,
            start_restricted: false,
            supported_profiles: DEFAULT_SUPPORTED_PROFILES.to_vec(),
            timeouts: AdapterTimeouts::default(),
            uuid_fetch_timeout: Duration::from_millis(DEFAULT_UUID_FETCH_TIMEOUT_MS),
            energy_info_wait: Duration::from_millis(DEFAULT_ENERGY_INFO_WAIT_MS),
            energy: EnergyModel::default(),
        }
    }
}

fn get_ms(obj: &Map<String, Value>, key: &str, default: Duration) -> Duration {
    match obj.get(key).and_then(|v| v.as_u64()) {
        Some(ms) => Duration::from_millis(ms),
        None => default,
    }
}

fn get_u64(obj: &Map<String, Value>, key: &str, default: u64) -> u64 {
    obj.get(key).and_then(|v| v.as_u64()).unwrap_or(default)
}

impl AdapterConfig {
    /// Parses a configuration document.
    pub fn from_json(json: &str) -> anyhow::Result<AdapterConfig> {
        let value = serde_json::from_str::<Value>(json).context("Invalid adapter config")?;
        let root = match value.as_object() {
            Some(root) => root,
            None => bail!("Adapter config must be a JSON object"),
        };

        let mut config = AdapterConfig::default();

        config.log_level =
            root.get("log_level").and_then(|v| v.as_str()).and_then(|s| s.parse().ok());
        config.adapter_name = root.get("adapter_name").and_then(|v| v.as_str()).map(String::from);
        config.start_restricted =
            root.get("start_restricted").and_then(|v| v.as_bool()).unwrap_or(false);
        config.energy_info_wait = get_ms(root, "energy_info_wait_ms", config.energy_info_wait);

        if let Some(profiles) = root.get("supported_profiles").and_then(|v| v.as_array()) {
            config.supported_profiles = profiles
                .iter()
                .filter_map(|v| v.as_str())
                .filter_map(|name| match ProfileService::from_name(name) {
                    Some(profile) => Some(profile),
                    None => {
                        warn!("Ignoring unknown profile service {}", name);
                        None
                    }
                })
                .collect();
        }

        if let Some(timeouts) = root.get("timeouts_ms").and_then(|v| v.as_object()) {
            let t = &mut config.timeouts;
            t.ble_start = get_ms(timeouts, "ble_start", t.ble_start);
            t.enable = get_ms(timeouts, "enable", t.enable);
            t.bredr_start = get_ms(timeouts, "bredr_start", t.bredr_start);
            t.scan_mode_settle = get_ms(timeouts, "scan_mode_settle", t.scan_mode_settle);
            t.bredr_stop = get_ms(timeouts, "bredr_stop", t.bredr_stop);
            t.disable = get_ms(timeouts, "disable", t.disable);
            t.ble_stop = get_ms(timeouts, "ble_stop", t.ble_stop);
            config.uuid_fetch_timeout = get_ms(timeouts, "uuid_fetch", config.uuid_fetch_timeout);
        }

        if let Some(energy) = root.get("energy").and_then(|v| v.as_object()) {
            config.energy = EnergyModel {
                tx_current_ma: get_u64(energy, "tx_current_ma", 0),
                rx_current_ma: get_u64(energy, "rx_current_ma", 0),
                idle_current_ma: get_u64(energy, "idle_current_ma", 0),
                operating_voltage_mv: get_u64(energy, "operating_voltage_mv", 0),
            };
        }

        Ok(config)
    }

    /// Reads and parses the file at `path`.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<AdapterConfig> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        AdapterConfig::from_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_uses_defaults() {
        assert_eq!(AdapterConfig::from_json("{}").unwrap(), AdapterConfig::default());
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(AdapterConfig::from_json("{").is_err());
        assert!(AdapterConfig::from_json("[1, 2]").is_err());
    }

    #[test]
    fn test_overrides() {
        let config = AdapterConfig::from_json(
            r#"{
                "log_level": "debug",
                "adapter_name": "desk",
                "start_restricted": true,
                "supported_profiles": ["a2dp", "bogus", "HFP"],
                "timeouts_ms": { "enable": 500, "uuid_fetch": 100, "ble_stop": "x" },
                "energy": { "tx_current_ma": 10, "operating_voltage_mv": 3300 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.log_level, Some(LevelFilter::Debug));
        assert_eq!(config.adapter_name, Some(String::from("desk")));
        assert!(config.start_restricted);
        assert_eq!(config.supported_profiles, vec![ProfileService::A2dp, ProfileService::Hfp]);
        assert_eq!(config.timeouts.enable, Duration::from_millis(500));
        assert_eq!(config.timeouts.ble_stop, AdapterTimeouts::default().ble_stop);
        assert_eq!(config.uuid_fetch_timeout, Duration::from_millis(100));
        assert_eq!(config.energy.tx_current_ma, 10);
        assert_eq!(config.energy.rx_current_ma, 0);
        assert_eq!(config.energy_info_wait, Duration::from_millis(DEFAULT_ENERGY_INFO_WAIT_MS));
    }
}
