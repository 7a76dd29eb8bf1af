use anyhow::Context;
use clap::{App, Arg};
use log::LevelFilter;
use std::sync::Arc;
use std::time::{Duration, Instant};
use syslog::{BasicLogger, Facility, Formatter3164};
use tokio::io::{AsyncBufReadExt, BufReader};

use btadapter::{
    adapter_service::AdapterService,
    adapter_state::AdapterState,
    bluetooth::{Bluetooth, IBluetooth},
    config::AdapterConfig,
    Message, Stack,
};

use crate::command_handler::{CommandHandler, ConsoleCallback};
use crate::virtual_radio::{VirtualProfileLauncher, VirtualRadio};

mod command_handler;
mod console;
mod virtual_radio;

const DEFAULT_CONFIG_PATH: &str = "/etc/bluetooth/btadapterd.json";

const INIT_LOGGING_MAX_RETRY: u8 = 3;

// Upper bound on the power down before the stack is torn down anyway.
const STACK_TURN_OFF_TIMEOUT: Duration = Duration::from_millis(4000);
const STATE_POLL_INTERVAL: Duration = Duration::from_millis(50);

fn init_syslog(level: LevelFilter) -> Result<(), String> {
    let formatter = Formatter3164 {
        facility: Facility::LOG_USER,
        hostname: None,
        process: "btadapterd".into(),
        pid: 0,
    };

    let logger =
        syslog::unix(formatter).map_err(|e| format!("Failed to connect to syslog: {}", e))?;
    log::set_boxed_logger(Box::new(BasicLogger::new(logger)))
        .map(|()| log::set_max_level(level))
        .map_err(|e| format!("Failed to set logger: {}", e))
}

fn init_logging(level: LevelFilter, log_output: &str) {
    if log_output == "stderr" {
        bt_common::init_logging_with_level(level);
        return;
    }

    // Connecting to the syslog socket is flaky right after boot.
    for _ in 0..INIT_LOGGING_MAX_RETRY {
        match init_syslog(level) {
            Ok(()) => return,
            Err(e) => eprintln!("{}", e),
        }
    }
    bt_common::init_logging_with_level(level);
}

/// Reads commands from stdin until `quit` or end of input.
async fn run_console(bluetooth: Bluetooth) {
    let mut handler = CommandHandler::new(bluetooth);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                log::error!("Failed to read console input: {}", e);
                break;
            }
        };

        let mut words = line.split_whitespace().map(String::from);
        let command = words.next().unwrap_or_default();
        if command == "quit" {
            break;
        }
        let args = words.collect::<Vec<String>>();

        // Some commands wait on the dispatch loop.
        tokio::task::block_in_place(|| handler.process_cmd_line(&command, &args));
    }
}

/// Powers the adapter down, giving up after `STACK_TURN_OFF_TIMEOUT`.
async fn turn_off(bluetooth: &mut Bluetooth) {
    if bluetooth.get_state() == AdapterState::Off {
        return;
    }

    bluetooth.disable();
    let deadline = Instant::now() + STACK_TURN_OFF_TIMEOUT;
    while bluetooth.get_state() != AdapterState::Off {
        if Instant::now() >= deadline {
            log::warn!("Adapter did not turn off in {:?}", STACK_TURN_OFF_TIMEOUT);
            return;
        }
        tokio::time::sleep(STATE_POLL_INTERVAL).await;
    }
}

/// Runs the Bluetooth adapter daemon on top of a simulated controller.
fn main() -> anyhow::Result<()> {
    let matches = App::new("Bluetooth Adapter Daemon")
        .arg(
            Arg::with_name("config")
                .long("config")
                .short("c")
                .value_name("FILE")
                .takes_value(true)
                .help("Adapter configuration file"),
        )
        .arg(Arg::with_name("debug").long("debug").short("d").help("Enables debug level logs"))
        .arg(
            Arg::with_name("log-output")
                .long("log-output")
                .takes_value(true)
                .possible_values(&["syslog", "stderr"])
                .default_value("syslog")
                .help("Select log output"),
        )
        .arg(
            Arg::with_name("no-enable")
                .long("no-enable")
                .help("Leaves the adapter off at startup"),
        )
        .get_matches();

    let config = match matches.value_of("config") {
        Some(path) => AdapterConfig::load(path)?,
        None if std::path::Path::new(DEFAULT_CONFIG_PATH).exists() => {
            AdapterConfig::load(DEFAULT_CONFIG_PATH)?
        }
        None => AdapterConfig::default(),
    };

    let level = if matches.is_present("debug") {
        LevelFilter::Debug
    } else {
        config.log_level.unwrap_or(LevelFilter::Info)
    };
    init_logging(level, matches.value_of("log-output").unwrap_or("syslog"));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start the runtime")?;

    runtime.block_on(async move {
        let (tx, rx) = Stack::create_channel();
        let radio = Arc::new(VirtualRadio::new());
        let launcher = Box::new(VirtualProfileLauncher::new(tx.clone()));

        let mut service = AdapterService::new(tx.clone(), config, radio, launcher);
        if !service.init() {
            anyhow::bail!("Failed to initialize the radio");
        }

        let mut bluetooth = service.get_bluetooth();
        bluetooth.register_callback(Box::new(ConsoleCallback {}));

        let dispatch = tokio::spawn(Stack::dispatch(rx, service));

        if !matches.is_present("no-enable") {
            bluetooth.enable();
        }

        tokio::select! {
            _ = run_console(bluetooth.clone()) => {
                log::debug!("Console closed");
            }
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    log::error!("Failed to listen for interrupts: {}", e);
                }
                log::debug!("Interrupted");
            }
        }

        turn_off(&mut bluetooth).await;

        let _ = tx.send(Message::Shutdown);
        dispatch.await.context("Dispatch loop failed")?;
        log::info!("Shutdown completed");
        Ok(())
    })
}
