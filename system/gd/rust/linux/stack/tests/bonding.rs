mod utils;

use bt_topshim::btif::{BaseCallbacks, BtBondState, BtStatus, BtTransport, OobData};
use btadapter::adapter_state::AdapterState;
use btadapter::bluetooth::{BluetoothDevice, IBluetooth};
use btadapter::bond_state_machine::{BondReason, BondState, PairingVariant};
use btadapter::config::AdapterConfig;
use btadapter::device_policy::{AccessKind, AccessPermission, ProfilePriority};
use btadapter::profile_services::ProfileService;
use std::time::Duration;
use utils::{address, start_test, Event, TestContext};

const HEADSET: &str = "00:11:22:33:44:55";

fn bond(ctx: &mut TestContext, device: &BluetoothDevice) {
    assert!(ctx.bluetooth.create_bond(device.clone(), BtTransport::Auto));
    ctx.pump();
    ctx.inject(BaseCallbacks::BondState(BtStatus::Success, device.address, BtBondState::Bonding));
    ctx.inject(BaseCallbacks::BondState(BtStatus::Success, device.address, BtBondState::Bonded));
    ctx.pump();
}

#[test]
fn bond_success() {
    tokio_test::block_on(async {
        tokio::time::pause();
        let mut ctx = start_test(AdapterConfig::default());
        ctx.enable();
        let addr = address(HEADSET);
        ctx.add_device(addr, "headset");
        ctx.clear_events();

        assert!(ctx.bluetooth.create_bond(BluetoothDevice::new(addr), BtTransport::Auto));
        ctx.pump();
        assert_eq!(ctx.service.get_bond_state_machine().get_state(), BondState::PendingCommand);
        assert_eq!(ctx.service.get_bond_state_machine().get_pending_devices(), vec![addr]);

        ctx.inject(BaseCallbacks::BondState(BtStatus::Success, addr, BtBondState::Bonding));
        ctx.inject(BaseCallbacks::BondState(BtStatus::Success, addr, BtBondState::Bonded));
        ctx.pump();

        assert_eq!(
            ctx.bond_events(),
            vec![
                Event::Bond(
                    addr,
                    BtBondState::NotBonded,
                    BtBondState::Bonding,
                    BondReason::Success
                ),
                Event::Bond(addr, BtBondState::Bonding, BtBondState::Bonded, BondReason::Success),
            ]
        );
        let bonded = ctx.bluetooth.get_bonded_devices();
        assert_eq!(bonded.len(), 1);
        assert_eq!(bonded[0].address, addr);
        assert_eq!(bonded[0].name, "headset");
        assert_eq!(ctx.service.get_bond_state_machine().get_state(), BondState::Stable);
    });
}

#[test]
fn rejected_create_bond_notifies_once() {
    tokio_test::block_on(async {
        tokio::time::pause();
        let mut ctx = start_test(AdapterConfig::default());
        ctx.enable();
        let addr = address(HEADSET);
        ctx.radio.set_status("create_bond", BtStatus::Fail);
        ctx.clear_events();

        assert!(ctx.bluetooth.create_bond(BluetoothDevice::new(addr), BtTransport::Auto));
        ctx.pump();

        assert_eq!(
            ctx.bond_events(),
            vec![Event::Bond(
                addr,
                BtBondState::NotBonded,
                BtBondState::NotBonded,
                BondReason::Removed
            )]
        );
        assert_eq!(ctx.service.get_bond_state_machine().get_state(), BondState::Stable);
        assert!(ctx.service.get_bond_state_machine().get_pending_devices().is_empty());
    });
}

#[test]
fn create_bond_requires_adapter_on() {
    tokio_test::block_on(async {
        tokio::time::pause();
        let mut ctx = start_test(AdapterConfig::default());
        assert_eq!(ctx.bluetooth.get_state(), AdapterState::Off);

        let device = BluetoothDevice::new(address(HEADSET));
        assert!(!ctx.bluetooth.create_bond(device, BtTransport::Auto));
        ctx.pump();
        assert_eq!(ctx.radio.count("create_bond"), 0);
    });
}

#[test]
fn same_device_requests_are_serialized() {
    tokio_test::block_on(async {
        tokio::time::pause();
        let mut ctx = start_test(AdapterConfig::default());
        ctx.enable();
        let addr = address(HEADSET);
        let device = BluetoothDevice::new(addr);

        assert!(ctx.bluetooth.create_bond(device.clone(), BtTransport::Auto));
        assert!(ctx.bluetooth.create_bond(device.clone(), BtTransport::Auto));
        ctx.pump();

        // The second request waits for the first one to finish.
        assert_eq!(ctx.radio.count("create_bond"), 1);
        assert_eq!(ctx.service.get_bond_state_machine().deferred_len(), 1);

        ctx.inject(BaseCallbacks::BondState(BtStatus::Success, addr, BtBondState::Bonding));
        ctx.inject(BaseCallbacks::BondState(BtStatus::AuthFailure, addr, BtBondState::NotBonded));
        ctx.pump();

        assert_eq!(ctx.radio.count("create_bond"), 2);
        assert_eq!(ctx.service.get_bond_state_machine().deferred_len(), 0);
        assert_eq!(ctx.service.get_bond_state_machine().get_pending_devices(), vec![addr]);
        assert!(ctx.bond_events().contains(&Event::Bond(
            addr,
            BtBondState::Bonding,
            BtBondState::NotBonded,
            BondReason::AuthFailed
        )));
    });
}

#[test]
fn bond_in_flight_does_not_survive_power_cycle() {
    tokio_test::block_on(async {
        tokio::time::pause();
        let mut ctx = start_test(AdapterConfig::default());
        ctx.enable();
        let addr = address(HEADSET);
        let device = BluetoothDevice::new(addr);

        assert!(ctx.bluetooth.create_bond(device.clone(), BtTransport::Auto));
        ctx.pump();
        assert_eq!(ctx.service.get_bond_state_machine().get_pending_devices(), vec![addr]);

        assert!(ctx.bluetooth.disable());
        ctx.pump();
        assert_eq!(ctx.bluetooth.get_state(), AdapterState::Off);
        assert_eq!(ctx.service.get_bond_state_machine().get_state(), BondState::Stable);
        assert!(ctx.service.get_bond_state_machine().get_pending_devices().is_empty());

        ctx.enable();
        assert!(ctx.bluetooth.create_bond(device, BtTransport::Auto));
        ctx.run_for(Duration::from_secs(60)).await;

        assert_eq!(ctx.radio.count("create_bond"), 2);
        assert_eq!(ctx.service.get_bond_state_machine().deferred_len(), 0);
        assert_eq!(ctx.service.get_bond_state_machine().get_pending_devices(), vec![addr]);
    });
}

#[test]
fn cancel_bond_only_while_bonding() {
    tokio_test::block_on(async {
        tokio::time::pause();
        let mut ctx = start_test(AdapterConfig::default());
        ctx.enable();
        let addr = address(HEADSET);
        let device = BluetoothDevice::new(addr);

        assert!(!ctx.bluetooth.cancel_bond_process(device.clone()));

        assert!(ctx.bluetooth.create_bond(device.clone(), BtTransport::Auto));
        ctx.pump();
        // Accepted by the radio but not yet reported as bonding.
        assert!(!ctx.bluetooth.cancel_bond_process(device.clone()));

        ctx.inject(BaseCallbacks::BondState(BtStatus::Success, addr, BtBondState::Bonding));
        ctx.pump();
        assert!(ctx.bluetooth.cancel_bond_process(device.clone()));
        ctx.pump();
        assert_eq!(ctx.radio.count("cancel_bond"), 1);

        ctx.inject(BaseCallbacks::BondState(BtStatus::AuthRejected, addr, BtBondState::NotBonded));
        ctx.pump();
        assert_eq!(ctx.service.get_bond_state_machine().get_state(), BondState::Stable);
        assert!(ctx.bond_events().contains(&Event::Bond(
            addr,
            BtBondState::Bonding,
            BtBondState::NotBonded,
            BondReason::AuthRejected
        )));
    });
}

#[test]
fn out_of_band_bond_uses_oob_command() {
    tokio_test::block_on(async {
        tokio::time::pause();
        let mut ctx = start_test(AdapterConfig::default());
        ctx.enable();
        let addr = address(HEADSET);
        let device = BluetoothDevice::new(addr);

        let missing = OobData { c: vec![], r: vec![], sm_tk: vec![] };
        assert!(!ctx.bluetooth.create_bond_out_of_band(device.clone(), BtTransport::Le, missing));

        let oob = OobData { c: vec![0x11; 16], r: vec![0x22; 16], sm_tk: vec![] };
        assert!(ctx.bluetooth.create_bond_out_of_band(device, BtTransport::Le, oob));
        ctx.pump();

        assert_eq!(ctx.radio.count("create_bond_out_of_band"), 1);
        assert_eq!(ctx.radio.count("create_bond"), 0);
        assert_eq!(ctx.service.get_bond_state_machine().get_pending_devices(), vec![addr]);
    });
}

#[test]
fn remove_bond_waits_for_same_device() {
    tokio_test::block_on(async {
        tokio::time::pause();
        let mut ctx = start_test(AdapterConfig::default());
        ctx.enable();
        let addr = address(HEADSET);
        let device = BluetoothDevice::new(addr);
        bond(&mut ctx, &device);

        assert!(ctx.bluetooth.remove_bond(device.clone()));
        assert!(ctx.bluetooth.remove_bond(device.clone()));
        ctx.pump();
        assert_eq!(ctx.radio.count("remove_bond"), 1);
        assert_eq!(ctx.service.get_bond_state_machine().deferred_len(), 1);

        ctx.inject(BaseCallbacks::BondState(BtStatus::Success, addr, BtBondState::NotBonded));
        ctx.pump();

        // Replayed once the first removal finished, then dropped as there is no bond left.
        assert_eq!(ctx.radio.count("remove_bond"), 1);
        assert_eq!(ctx.service.get_bond_state_machine().deferred_len(), 0);
        assert_eq!(ctx.service.get_bond_state_machine().get_state(), BondState::Stable);
        assert_eq!(ctx.bluetooth.get_bond_state(device), BtBondState::NotBonded);
    });
}

#[test]
fn other_devices_bond_in_parallel() {
    tokio_test::block_on(async {
        tokio::time::pause();
        let mut ctx = start_test(AdapterConfig::default());
        ctx.enable();
        let first = address(HEADSET);
        let second = address("00:11:22:33:44:66");

        assert!(ctx.bluetooth.create_bond(BluetoothDevice::new(first), BtTransport::Auto));
        assert!(ctx.bluetooth.create_bond(BluetoothDevice::new(second), BtTransport::Le));
        ctx.pump();

        assert_eq!(ctx.radio.count("create_bond"), 2);
        assert_eq!(ctx.service.get_bond_state_machine().get_pending_devices(), vec![first, second]);
    });
}

#[test]
fn unbond_resets_device_policy() {
    tokio_test::block_on(async {
        tokio::time::pause();
        let mut ctx = start_test(AdapterConfig::default());
        ctx.enable();
        let addr = address(HEADSET);
        let device = BluetoothDevice::new(addr);
        bond(&mut ctx, &device);

        let bt = ctx.bluetooth.clone();
        bt.set_access_permission(device.clone(), AccessKind::Phonebook, AccessPermission::Allowed);
        bt.set_access_permission(device.clone(), AccessKind::Message, AccessPermission::Rejected);
        bt.set_profile_priority(device.clone(), ProfileService::A2dp, ProfilePriority::AutoConnect);

        assert!(bt.remove_bond(device.clone()));
        ctx.pump();
        assert_eq!(ctx.radio.count("remove_bond"), 1);
        ctx.inject(BaseCallbacks::BondState(BtStatus::Success, addr, BtBondState::NotBonded));
        ctx.pump();

        for kind in &[AccessKind::Phonebook, AccessKind::Message, AccessKind::Sim] {
            assert_eq!(bt.get_access_permission(device.clone(), *kind), AccessPermission::Unknown);
        }
        assert_eq!(
            bt.get_profile_priority(device.clone(), ProfileService::A2dp),
            ProfilePriority::Undefined
        );
        assert!(bt.get_bonded_devices().is_empty());
        assert_eq!(bt.get_bond_state(device.clone()), BtBondState::NotBonded);
    });
}

#[test]
fn remote_unbond_while_stable_resets_policy() {
    tokio_test::block_on(async {
        tokio::time::pause();
        let mut ctx = start_test(AdapterConfig::default());
        ctx.enable();
        let device = BluetoothDevice::new(address(HEADSET));
        bond(&mut ctx, &device);

        let bt = ctx.bluetooth.clone();
        bt.set_access_permission(device.clone(), AccessKind::Sim, AccessPermission::Allowed);
        ctx.inject(BaseCallbacks::BondState(
            BtStatus::AuthRejected,
            device.address,
            BtBondState::NotBonded,
        ));
        ctx.pump();

        assert_eq!(
            bt.get_access_permission(device.clone(), AccessKind::Sim),
            AccessPermission::Unknown
        );
        assert!(ctx.bond_events().contains(&Event::Bond(
            device.address,
            BtBondState::Bonded,
            BtBondState::NotBonded,
            BondReason::AuthRejected
        )));
    });
}

#[test]
fn remote_initiated_pairing_with_confirmation() {
    tokio_test::block_on(async {
        tokio::time::pause();
        let mut ctx = start_test(AdapterConfig::default());
        ctx.enable();
        let addr = address(HEADSET);
        ctx.clear_events();

        ctx.inject(BaseCallbacks::BondState(BtStatus::Success, addr, BtBondState::Bonding));
        ctx.inject(BaseCallbacks::SspRequest(addr, String::from("phone"), 0x5a020c, 0, 123456));
        ctx.pump();

        assert!(ctx.events().contains(&Event::PairingRequest(
            addr,
            PairingVariant::PasskeyConfirmation,
            Some(123456)
        )));
        assert_eq!(ctx.bluetooth.get_remote_name(BluetoothDevice::new(addr)), "phone");

        assert!(ctx.bluetooth.set_pairing_confirmation(BluetoothDevice::new(addr), true));
        assert_eq!(ctx.radio.count("ssp_reply"), 1);
    });
}

#[test]
fn keyboard_gets_generated_pin() {
    tokio_test::block_on(async {
        tokio::time::pause();
        let mut ctx = start_test(AdapterConfig::default());
        ctx.enable();
        let addr = address(HEADSET);
        ctx.clear_events();

        assert!(ctx.bluetooth.create_bond(BluetoothDevice::new(addr), BtTransport::Bredr));
        ctx.pump();
        ctx.inject(BaseCallbacks::BondState(BtStatus::Success, addr, BtBondState::Bonding));
        ctx.inject(BaseCallbacks::PinRequest(addr, String::from("keyboard"), 0x0540, false));
        ctx.pump();

        let pin = ctx
            .events()
            .into_iter()
            .find_map(|e| match e {
                Event::PairingRequest(_, PairingVariant::DisplayPin, pin) => pin,
                _ => None,
            })
            .expect("no pin displayed");
        assert!((100000..1000000).contains(&pin));

        let pin_code = pin.to_string().into_bytes();
        assert!(ctx.bluetooth.set_pin(BluetoothDevice::new(addr), true, pin_code));
        assert_eq!(ctx.radio.count("pin_reply"), 1);
    });
}

#[test]
fn pairing_prompt_dropped_without_bond_in_flight() {
    tokio_test::block_on(async {
        tokio::time::pause();
        let mut ctx = start_test(AdapterConfig::default());
        ctx.enable();
        let addr = address(HEADSET);
        ctx.clear_events();

        ctx.inject(BaseCallbacks::PinRequest(addr, String::from("speaker"), 0x240404, true));
        ctx.pump();

        assert!(!ctx.events().iter().any(|e| matches!(e, Event::PairingRequest(..))));
        // The device is still cached.
        assert_eq!(ctx.bluetooth.get_remote_name(BluetoothDevice::new(addr)), "speaker");
    });
}
