use std::collections::HashMap;
use std::slice::SliceIndex;

use crate::{console_red, console_yellow, print_error, print_info};
use bt_topshim::btif::{
    BtAclState, BtBondState, BtScanMode, BtTransport, RawAddress, Uuid128Bit,
};
use btadapter::adapter_properties::ProfileConnectionState;
use btadapter::adapter_state::AdapterState;
use btadapter::bluetooth::{Bluetooth, BluetoothDevice, IBluetooth, IBluetoothCallback};
use btadapter::bond_state_machine::{BondReason, PairingVariant};
use btadapter::device_policy::{AccessKind, AccessPermission};
use btadapter::uuid::{DisplayUuids, UuidHelper};

const INDENT_CHAR: &str = " ";

enum CommandError {
    // Command not handled due to invalid arguments.
    InvalidArgs,
    // Command handled but failed with the given reason.
    Failed(String),
}

impl From<&str> for CommandError {
    fn from(s: &str) -> CommandError {
        CommandError::Failed(String::from(s))
    }
}

impl From<String> for CommandError {
    fn from(s: String) -> CommandError {
        CommandError::Failed(s)
    }
}

type CommandResult = Result<(), CommandError>;

type CommandFunction = fn(&mut CommandHandler, &Vec<String>) -> CommandResult;

fn _noop(_handler: &mut CommandHandler, _args: &Vec<String>) -> CommandResult {
    // Used so we can add options with no direct function
    // e.g. help and quit
    Ok(())
}

pub struct CommandOption {
    rules: Vec<String>,
    description: String,
    function_pointer: CommandFunction,
}

/// Handles string command entered from command line.
pub(crate) struct CommandHandler {
    bluetooth: Bluetooth,
    command_options: HashMap<String, CommandOption>,
}

// This should be called during the constructor in order to populate the command option map
fn build_commands() -> HashMap<String, CommandOption> {
    let mut command_options = HashMap::<String, CommandOption>::new();
    command_options.insert(
        String::from("adapter"),
        CommandOption {
            rules: vec![
                String::from("adapter <enable|disable|enable-ble|disable-bredr|show>"),
                String::from("adapter set-name <name>"),
                String::from("adapter discoverable <on|off>"),
            ],
            description: String::from("Power the adapter and inspect its properties."),
            function_pointer: CommandHandler::cmd_adapter,
        },
    );
    command_options.insert(
        String::from("bond"),
        CommandOption {
            rules: vec![String::from("bond <add|remove|cancel> <address>")],
            description: String::from("Creates or removes a bond with a device."),
            function_pointer: CommandHandler::cmd_bond,
        },
    );
    command_options.insert(
        String::from("device"),
        CommandOption {
            rules: vec![
                String::from("device <info|fetch-uuids> <address>"),
                String::from("device set-pairing-confirmation <address> <accept|reject>"),
                String::from("device set-pairing-pin <address> <pin|reject>"),
                String::from("device set-pairing-passkey <address> <passkey|reject>"),
                String::from("device set-alias <address> <new-alias>"),
                String::from(
                    "device set-permission <address> <phonebook|message|sim> <allow|reject>",
                ),
            ],
            description: String::from("Take action on a remote device. (i.e. info)"),
            function_pointer: CommandHandler::cmd_device,
        },
    );
    command_options.insert(
        String::from("discovery"),
        CommandOption {
            rules: vec![String::from("discovery <start|stop>")],
            description: String::from("Start and stop device discovery. (e.g. discovery start)"),
            function_pointer: CommandHandler::cmd_discovery,
        },
    );
    command_options.insert(
        String::from("energy"),
        CommandOption {
            rules: vec![String::from("energy")],
            description: String::from("Show controller activity since the last report."),
            function_pointer: CommandHandler::cmd_energy,
        },
    );
    command_options.insert(
        String::from("list"),
        CommandOption {
            rules: vec![String::from("list bonded")],
            description: String::from("List bonded devices."),
            function_pointer: CommandHandler::cmd_list,
        },
    );
    command_options.insert(
        String::from("help"),
        CommandOption {
            rules: vec![String::from("help")],
            description: String::from("Shows this menu."),
            function_pointer: CommandHandler::cmd_help,
        },
    );
    command_options.insert(
        String::from("quit"),
        CommandOption {
            rules: vec![String::from("quit")],
            description: String::from("Quit out of the interactive shell."),
            function_pointer: _noop,
        },
    );
    command_options
}

fn get_arg<I>(
    args: &Vec<String>,
    index: I,
) -> Result<&<I as SliceIndex<[String]>>::Output, CommandError>
where
    I: SliceIndex<[String]>,
{
    args.get(index).ok_or(CommandError::InvalidArgs)
}

fn get_device(args: &Vec<String>, index: usize) -> Result<BluetoothDevice, CommandError> {
    let addr = get_arg(args, index)?;
    match RawAddress::from_string(addr.as_str()) {
        Some(address) => Ok(BluetoothDevice::new(address)),
        None => Err(format!("Invalid address {}", addr).into()),
    }
}

fn bool_result(ok: bool, what: &str) -> CommandResult {
    if ok {
        Ok(())
    } else {
        Err(format!("{} was not accepted", what).into())
    }
}

impl CommandHandler {
    /// Creates a new CommandHandler.
    pub fn new(bluetooth: Bluetooth) -> CommandHandler {
        CommandHandler { bluetooth, command_options: build_commands() }
    }

    /// Entry point for command and arguments
    pub fn process_cmd_line(&mut self, command: &str, args: &Vec<String>) {
        // Ignore empty line
        match command {
            "" => {}
            _ => match self.command_options.get(command) {
                Some(cmd) => {
                    let rules = cmd.rules.clone();
                    match (cmd.function_pointer)(self, &args) {
                        Ok(()) => {}
                        Err(CommandError::InvalidArgs) => {
                            print_error!("Invalid arguments. Usage:\n{}", rules.join("\n"));
                        }
                        Err(CommandError::Failed(msg)) => {
                            print_error!("Command failed: {}", msg);
                        }
                    }
                }
                None => {
                    println!("'{}' is an invalid command!", command);
                    self.cmd_help(&args).ok();
                }
            },
        };
    }

    fn cmd_help(&mut self, _args: &Vec<String>) -> CommandResult {
        let mut commands = self.command_options.keys().cloned().collect::<Vec<String>>();
        commands.sort();
        for command in commands {
            if let Some(cmd) = self.command_options.get(&command) {
                println!("{}{}", INDENT_CHAR.repeat(2), cmd.description);
                for rule in cmd.rules.iter() {
                    println!("{}{}", INDENT_CHAR.repeat(4), rule);
                }
            }
        }
        Ok(())
    }

    fn cmd_adapter(&mut self, args: &Vec<String>) -> CommandResult {
        let command = get_arg(args, 0)?;

        match &command[..] {
            "enable" => bool_result(self.bluetooth.enable(), "Enable"),
            "disable" => bool_result(self.bluetooth.disable(), "Disable"),
            "enable-ble" => bool_result(self.bluetooth.enable_ble(), "BLE enable"),
            "disable-bredr" => bool_result(self.bluetooth.disable_bredr(), "BR/EDR disable"),
            "show" => {
                let bt = &self.bluetooth;
                print_info!("State: {:?}", bt.get_state());
                print_info!("Address: {}", bt.get_address());
                print_info!("Name: {}", bt.get_name());
                print_info!("Class: {:#08x}", bt.get_class_of_device());
                print_info!("Scan mode: {:?}", bt.get_scan_mode());
                print_info!("Discoverable timeout: {}s", bt.get_discoverable_timeout());
                print_info!("Discovering: {}", bt.is_discovering());
                print_info!("Connection state: {:?}", bt.get_connection_state());
                print_info!("Uuids: {}", DisplayUuids(&bt.get_uuids()));
                print_info!("Multi advertisement: {}", bt.is_multi_advertisement_supported());
                print_info!("Offloaded filtering: {}", bt.is_offloaded_filtering_supported());
                print_info!(
                    "Offloaded scan batching: {}",
                    bt.is_offloaded_scan_batching_supported()
                );
                print_info!("RPA offload: {}", bt.is_rpa_offload_supported());
                print_info!("Extended scan: {}", bt.is_extended_scan_supported());
                Ok(())
            }
            "set-name" => {
                let name = get_arg(args, 1..)?.join(" ");
                bool_result(self.bluetooth.set_name(name), "Name change")
            }
            "discoverable" => {
                let mode = match &get_arg(args, 1)?[..] {
                    "on" => BtScanMode::ConnectableDiscoverable,
                    "off" => BtScanMode::Connectable,
                    _ => return Err(CommandError::InvalidArgs),
                };
                bool_result(self.bluetooth.set_scan_mode(mode), "Scan mode change")
            }
            _ => Err(CommandError::InvalidArgs),
        }
    }

    fn cmd_bond(&mut self, args: &Vec<String>) -> CommandResult {
        let command = get_arg(args, 0)?;
        let device = get_device(args, 1)?;

        match &command[..] {
            "add" => bool_result(self.bluetooth.create_bond(device, BtTransport::Auto), "Bond"),
            "remove" => bool_result(self.bluetooth.remove_bond(device), "Unbond"),
            "cancel" => bool_result(self.bluetooth.cancel_bond_process(device), "Cancel"),
            _ => Err(CommandError::InvalidArgs),
        }
    }

    fn cmd_device(&mut self, args: &Vec<String>) -> CommandResult {
        let command = get_arg(args, 0)?;
        let device = get_device(args, 1)?;

        match &command[..] {
            "info" => {
                let bt = &self.bluetooth;
                print_info!("Address: {}", device.address);
                print_info!("Name: {}", bt.get_remote_name(device.clone()));
                print_info!("Alias: {}", bt.get_remote_alias(device.clone()));
                print_info!("Type: {:?}", bt.get_remote_type(device.clone()));
                print_info!("Class: {:#08x}", bt.get_remote_class(device.clone()));
                print_info!("Bond state: {:?}", bt.get_bond_state(device.clone()));
                let uuids = bt.get_remote_uuids(device.clone());
                print_info!(
                    "Uuids: {}",
                    uuids
                        .iter()
                        .map(|u| UuidHelper::known_uuid_to_string(u))
                        .collect::<Vec<String>>()
                        .join(", ")
                );
                Ok(())
            }
            "fetch-uuids" => {
                bool_result(self.bluetooth.fetch_remote_uuids(device), "Service search")
            }
            "set-alias" => {
                let alias = get_arg(args, 2..)?.join(" ");
                bool_result(self.bluetooth.set_remote_alias(device, alias), "Alias change")
            }
            "set-pairing-confirmation" => {
                let accept = match &get_arg(args, 2)?[..] {
                    "accept" => true,
                    "reject" => false,
                    _ => return Err(CommandError::InvalidArgs),
                };
                bool_result(self.bluetooth.set_pairing_confirmation(device, accept), "Confirmation")
            }
            "set-pairing-pin" => {
                let pin = get_arg(args, 2)?;
                let (accept, pin) = match &pin[..] {
                    "reject" => (false, vec![]),
                    _ => (true, pin.as_bytes().to_vec()),
                };
                bool_result(self.bluetooth.set_pin(device, accept, pin), "PIN")
            }
            "set-pairing-passkey" => {
                let passkey = get_arg(args, 2)?;
                let (accept, passkey) = match &passkey[..] {
                    "reject" => (false, 0),
                    _ => match passkey.parse::<u32>() {
                        Ok(p) => (true, p),
                        Err(_) => return Err(format!("Invalid passkey {}", passkey).into()),
                    },
                };
                bool_result(self.bluetooth.set_passkey(device, accept, passkey), "Passkey")
            }
            "set-permission" => {
                let kind = match &get_arg(args, 2)?[..] {
                    "phonebook" => AccessKind::Phonebook,
                    "message" => AccessKind::Message,
                    "sim" => AccessKind::Sim,
                    _ => return Err(CommandError::InvalidArgs),
                };
                let permission = match &get_arg(args, 3)?[..] {
                    "allow" => AccessPermission::Allowed,
                    "reject" => AccessPermission::Rejected,
                    _ => return Err(CommandError::InvalidArgs),
                };
                bool_result(
                    self.bluetooth.set_access_permission(device, kind, permission),
                    "Permission change",
                )
            }
            _ => Err(CommandError::InvalidArgs),
        }
    }

    fn cmd_discovery(&mut self, args: &Vec<String>) -> CommandResult {
        match &get_arg(args, 0)?[..] {
            "start" => bool_result(self.bluetooth.start_discovery(), "Discovery start"),
            "stop" => bool_result(self.bluetooth.cancel_discovery(), "Discovery stop"),
            _ => Err(CommandError::InvalidArgs),
        }
    }

    fn cmd_energy(&mut self, _args: &Vec<String>) -> CommandResult {
        match self.bluetooth.report_activity_info() {
            Some(info) => {
                print_info!(
                    "tx={}ms rx={}ms idle={}ms energy={} state={}",
                    info.tx_time,
                    info.rx_time,
                    info.idle_time,
                    info.energy_used,
                    info.ctrl_state
                );
                for t in info.uid_traffic {
                    print_info!("uid {}: rx={} tx={}", t.app_uid, t.rx_bytes, t.tx_bytes);
                }
                Ok(())
            }
            None => Err("Activity reporting is unavailable".into()),
        }
    }

    fn cmd_list(&mut self, args: &Vec<String>) -> CommandResult {
        match &get_arg(args, 0)?[..] {
            "bonded" => {
                for device in self.bluetooth.get_bonded_devices() {
                    print_info!("{} {}", device.address, device.name);
                }
                Ok(())
            }
            _ => Err(CommandError::InvalidArgs),
        }
    }
}

/// Prints adapter events on the console.
pub(crate) struct ConsoleCallback {}

impl IBluetoothCallback for ConsoleCallback {
    fn on_adapter_state_changed(&self, prev: AdapterState, state: AdapterState) {
        print_info!("Adapter state {:?} -> {:?}", prev, state);
    }

    fn on_address_changed(&self, addr: RawAddress) {
        print_info!("Address changed to {}", addr);
    }

    fn on_name_changed(&self, name: String) {
        print_info!("Name changed to {}", name);
    }

    fn on_scan_mode_changed(&self, mode: BtScanMode) {
        print_info!("Scan mode changed to {:?}", mode);
    }

    fn on_discovering_changed(&self, discovering: bool) {
        print_info!("Discovering: {}", discovering);
    }

    fn on_device_found(&self, remote_device: BluetoothDevice) {
        print_info!("Found device: {} {}", remote_device.address, remote_device.name);
    }

    fn on_connection_state_changed(
        &self,
        remote_device: BluetoothDevice,
        prev: ProfileConnectionState,
        state: ProfileConnectionState,
    ) {
        print_info!("[{}] Connection state {:?} -> {:?}", remote_device.address, prev, state);
    }

    fn on_bond_state_changed(
        &self,
        remote_device: BluetoothDevice,
        prev: BtBondState,
        state: BtBondState,
        reason: BondReason,
    ) {
        print_info!(
            "[{}] Bond state {:?} -> {:?} ({:?})",
            remote_device.address,
            prev,
            state,
            reason
        );
    }

    fn on_pairing_request(
        &self,
        remote_device: BluetoothDevice,
        variant: PairingVariant,
        passkey: Option<u32>,
    ) {
        match passkey {
            Some(passkey) => print_info!(
                "[{}] Pairing request {:?}: {:06}",
                remote_device.address,
                variant,
                passkey
            ),
            None => print_info!("[{}] Pairing request {:?}", remote_device.address, variant),
        }
    }

    fn on_pairing_cancelled(&self, remote_device: BluetoothDevice) {
        print_info!("[{}] Pairing cancelled", remote_device.address);
    }

    fn on_remote_uuids(&self, remote_device: BluetoothDevice, uuids: Vec<Uuid128Bit>) {
        print_info!("[{}] Services: {}", remote_device.address, DisplayUuids(&uuids));
    }

    fn on_acl_state_changed(
        &self,
        remote_device: BluetoothDevice,
        state: BtAclState,
        le_only: bool,
    ) {
        print_info!("[{}] ACL {:?} (LE only: {})", remote_device.address, state, le_only);
    }
}
