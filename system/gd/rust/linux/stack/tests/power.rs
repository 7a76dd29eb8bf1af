mod utils;

use bt_topshim::btif::{BaseCallbacks, BtScanMode, BtState};
use btadapter::adapter_state::{AdapterState, PowerState};
use btadapter::bluetooth::IBluetooth;
use btadapter::config::AdapterConfig;
use btadapter::profile_services::ProfileService;
use std::time::Duration;
use utils::{start_test, Event};

#[test]
fn full_enable_and_disable() {
    tokio_test::block_on(async {
        tokio::time::pause();
        let mut ctx = start_test(AdapterConfig::default());

        ctx.enable();
        assert_eq!(
            ctx.adapter_states(),
            vec![
                AdapterState::BleTurningOn,
                AdapterState::BleOn,
                AdapterState::TurningOn,
                AdapterState::On
            ]
        );
        assert_eq!(ctx.radio.count("enable"), 1);
        assert_eq!(ctx.bluetooth.get_scan_mode(), BtScanMode::ConnectableDiscoverable);

        ctx.clear_events();
        assert!(ctx.bluetooth.disable());
        ctx.pump();

        assert_eq!(
            ctx.adapter_states(),
            vec![
                AdapterState::TurningOff,
                AdapterState::BleOn,
                AdapterState::BleTurningOff,
                AdapterState::Off
            ]
        );
        assert!(ctx.events().contains(&Event::ScanMode(BtScanMode::None_)));
        assert_eq!(ctx.radio.count("disable"), 1);
        assert_eq!(ctx.service.get_adapter_state_machine().get_power_state(), PowerState::Off);
        assert_eq!(ctx.service.get_adapter_state_machine().deferred_len(), 0);
    });
}

#[test]
fn ble_start_timeout_returns_to_off() {
    tokio_test::block_on(async {
        tokio::time::pause();
        let mut ctx = start_test(AdapterConfig::default());
        ctx.make_stuck(ProfileService::Gatt);

        assert!(ctx.bluetooth.enable_ble());
        ctx.pump();
        assert_eq!(ctx.bluetooth.get_state(), AdapterState::BleTurningOn);

        ctx.run_for(Duration::from_millis(2100)).await;

        assert_eq!(ctx.adapter_states(), vec![AdapterState::BleTurningOn, AdapterState::Off]);
        assert!(!ctx.adapter_states().contains(&AdapterState::BleOn));
        assert_eq!(ctx.radio.count("enable"), 0);
        assert_eq!(ctx.service.get_adapter_state_machine().get_power_state(), PowerState::Off);
    });
}

#[test]
fn ble_on_requested_while_turning_off_bredr() {
    tokio_test::block_on(async {
        tokio::time::pause();
        let mut ctx = start_test(AdapterConfig::default());
        ctx.enable();
        ctx.clear_events();

        assert!(ctx.bluetooth.disable_bredr());
        assert!(ctx.bluetooth.enable_ble());
        ctx.pump();

        assert_eq!(ctx.adapter_states(), vec![AdapterState::TurningOff, AdapterState::BleOn]);
        assert_eq!(ctx.bluetooth.get_state(), AdapterState::BleOn);
        assert_eq!(ctx.service.get_adapter_state_machine().get_power_state(), PowerState::BleOn);
        assert_eq!(ctx.service.get_adapter_state_machine().deferred_len(), 0);
        assert_eq!(ctx.radio.count("enable"), 1);
        assert_eq!(ctx.radio.count("disable"), 0);
    });
}

#[test]
fn stuck_profile_service_falls_back_to_ble_on() {
    tokio_test::block_on(async {
        tokio::time::pause();
        let mut ctx = start_test(AdapterConfig::default());
        ctx.make_stuck(ProfileService::Pan);

        assert!(ctx.bluetooth.enable());
        ctx.pump();
        assert_eq!(ctx.bluetooth.get_state(), AdapterState::TurningOn);

        ctx.run_for(Duration::from_millis(4100)).await;

        assert_eq!(ctx.bluetooth.get_state(), AdapterState::BleOn);
        assert_eq!(ctx.service.get_adapter_state_machine().get_power_state(), PowerState::BleOn);
        assert!(ctx.requests().contains(&(ProfileService::A2dp, false)));
    });
}

#[test]
fn unresponsive_radio_still_reaches_off() {
    tokio_test::block_on(async {
        tokio::time::pause();
        let mut ctx = start_test(AdapterConfig::default());
        ctx.enable();

        ctx.radio.set_responsive(false);
        assert!(ctx.bluetooth.disable());
        ctx.pump();
        assert_eq!(ctx.bluetooth.get_state(), AdapterState::TurningOff);

        // Scan mode never settles, then the radio never reports off.
        ctx.run_for(Duration::from_millis(2100)).await;
        assert_eq!(ctx.bluetooth.get_state(), AdapterState::BleTurningOff);
        ctx.run_for(Duration::from_millis(3100)).await;

        assert_eq!(ctx.bluetooth.get_state(), AdapterState::Off);
        assert_eq!(ctx.service.get_adapter_state_machine().get_power_state(), PowerState::Off);
        assert!(ctx.requests().contains(&(ProfileService::Gatt, false)));
    });
}

#[test]
fn radio_off_while_stopping_profiles_reaches_off() {
    tokio_test::block_on(async {
        tokio::time::pause();
        let mut ctx = start_test(AdapterConfig::default());
        ctx.enable();
        ctx.make_stuck(ProfileService::Pan);
        ctx.clear_events();

        assert!(ctx.bluetooth.disable_bredr());
        ctx.pump();
        assert_eq!(ctx.bluetooth.get_state(), AdapterState::TurningOff);

        ctx.inject(BaseCallbacks::AdapterState(BtState::Off));
        ctx.pump();
        assert_eq!(ctx.bluetooth.get_state(), AdapterState::Off);
        assert_eq!(ctx.service.get_adapter_state_machine().get_power_state(), PowerState::Off);

        // The profile stop timeout must not resurrect BLE on.
        ctx.run_for(Duration::from_secs(5)).await;
        assert_eq!(
            ctx.adapter_states(),
            vec![AdapterState::TurningOff, AdapterState::BleTurningOff, AdapterState::Off]
        );
        assert!(ctx.requests().contains(&(ProfileService::Gatt, false)));
    });
}

#[test]
fn radio_enable_timeout_returns_to_off() {
    tokio_test::block_on(async {
        tokio::time::pause();
        let mut ctx = start_test(AdapterConfig::default());
        ctx.radio.set_responsive(false);

        assert!(ctx.bluetooth.enable_ble());
        ctx.pump();
        assert_eq!(ctx.radio.count("enable"), 1);
        assert_eq!(ctx.bluetooth.get_state(), AdapterState::BleTurningOn);

        ctx.run_for(Duration::from_millis(12100)).await;

        assert_eq!(ctx.adapter_states(), vec![AdapterState::BleTurningOn, AdapterState::Off]);
        assert_eq!(ctx.service.get_adapter_state_machine().get_power_state(), PowerState::Off);
        assert!(ctx.requests().contains(&(ProfileService::Gatt, false)));
    });
}

#[test]
fn ble_stop_timeout_forces_off() {
    tokio_test::block_on(async {
        tokio::time::pause();
        let mut ctx = start_test(AdapterConfig::default());
        ctx.enable();
        ctx.make_stuck(ProfileService::Gatt);
        ctx.clear_events();

        assert!(ctx.bluetooth.disable());
        ctx.pump();
        assert_eq!(ctx.radio.count("disable"), 1);
        assert_eq!(ctx.bluetooth.get_state(), AdapterState::BleTurningOff);

        ctx.run_for(Duration::from_millis(2100)).await;

        assert_eq!(ctx.bluetooth.get_state(), AdapterState::Off);
        assert_eq!(ctx.service.get_adapter_state_machine().get_power_state(), PowerState::Off);
        assert_eq!(ctx.adapter_states().last(), Some(&AdapterState::Off));
    });
}

#[test]
fn configured_name_applied_once_on() {
    tokio_test::block_on(async {
        tokio::time::pause();
        let mut config = AdapterConfig::default();
        config.adapter_name = Some(String::from("kitchen"));
        let mut ctx = start_test(config);

        ctx.enable();

        assert_eq!(ctx.bluetooth.get_name(), "kitchen");
        assert!(ctx.events().contains(&Event::Name(String::from("kitchen"))));
    });
}

#[test]
fn shutdown_stops_dispatch() {
    tokio_test::block_on(async {
        tokio::time::pause();
        let mut ctx = start_test(AdapterConfig::default());
        ctx.enable();

        assert!(ctx.bluetooth.shutdown());
        ctx.pump();

        assert!(ctx.radio.commands().contains(&String::from("cleanup")));
    });
}
