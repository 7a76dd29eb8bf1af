//! Adapter power state machine.
//!
//! Drives the radio through Off, BLE-on and fully on. Every step issues a command (to the radio
//! or to the profile services), arms a timer and waits in `PendingCommand` for the matching
//! completion. A completion that arrives while its timer is not armed is stale and dropped. A
//! timer that fires first is a hard failure and forces the machine to the nearest stable state.
//!
//! ```text
//!            RequestBleOn                    RequestFullOn
//!   Off  --------------------->  BleOn  --------------------->  On
//!       <---------------------        <---------------------
//!            RequestBleOff                    RequestOff
//! ```
//!
//! User requests that arrive while a transition is in flight are deferred and replayed, in
//! arrival order, every time the machine settles in a new state.

use bt_common::time::Timers;
use bt_topshim::btif::{BtState, BtStatus, RadioControl};
use log::{debug, error, info, warn};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

use crate::adapter_properties::AdapterProperties;
use crate::deferred::DeferredQueue;
use crate::profile_services::{ProfileService, ProfileServiceState};
use crate::Message;

/// Adapter state as seen by clients.
#[derive(Clone, Copy, Debug, FromPrimitive, ToPrimitive, PartialEq, Eq)]
#[repr(u32)]
pub enum AdapterState {
    Off = 10,
    TurningOn,
    On,
    TurningOff,
    BleTurningOn,
    BleOn,
    BleTurningOff,
}

/// Internal state of the machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowerState {
    Off,
    BleOn,
    On,
    PendingCommand,
}

/// Directions in flight while in `PendingCommand`. More than one can be set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PendingFlags {
    pub turning_on: bool,
    pub turning_off: bool,
    pub ble_turning_on: bool,
    pub ble_turning_off: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AdapterTimer {
    BleStart,
    Enable,
    BrEdrStart,
    ScanModeSettle,
    BrEdrStop,
    Disable,
    BleStop,
}

#[derive(Clone, Debug, PartialEq)]
pub enum AdapterStateMessage {
    RequestBleOn,
    RequestFullOn,
    RequestOff,
    RequestBleOff,
    BleStarted,
    BrEdrStarted,
    BrEdrStopped,
    BleStopped,
    RadioStateChanged(BtState),
    BeginDisable,
    Timeout(AdapterTimer, u64),
}

impl AdapterStateMessage {
    fn is_user_request(&self) -> bool {
        match self {
            AdapterStateMessage::RequestBleOn
            | AdapterStateMessage::RequestFullOn
            | AdapterStateMessage::RequestOff
            | AdapterStateMessage::RequestBleOff => true,
            _ => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AdapterTimeouts {
    pub ble_start: Duration,
    pub enable: Duration,
    pub bredr_start: Duration,
    pub scan_mode_settle: Duration,
    pub bredr_stop: Duration,
    pub disable: Duration,
    pub ble_stop: Duration,
}

impl Default for AdapterTimeouts {
    fn default() -> Self {
        AdapterTimeouts {
            ble_start: Duration::from_secs(2),
            enable: Duration::from_secs(12),
            bredr_start: Duration::from_secs(4),
            scan_mode_settle: Duration::from_secs(2),
            bredr_stop: Duration::from_secs(4),
            disable: Duration::from_secs(3),
            ble_stop: Duration::from_secs(2),
        }
    }
}

impl AdapterTimeouts {
    fn get(&self, timer: AdapterTimer) -> Duration {
        match timer {
            AdapterTimer::BleStart => self.ble_start,
            AdapterTimer::Enable => self.enable,
            AdapterTimer::BrEdrStart => self.bredr_start,
            AdapterTimer::ScanModeSettle => self.scan_mode_settle,
            AdapterTimer::BrEdrStop => self.bredr_stop,
            AdapterTimer::Disable => self.disable,
            AdapterTimer::BleStop => self.ble_stop,
        }
    }
}

/// Hooks into the dependent profile services.
pub trait IProfileServiceControl {
    /// Starts the BLE capable profile service.
    ///
    /// Returns false if it is already running, in which case no completion follows.
    fn start_ble_profile_service(&mut self) -> bool;

    /// Stops the BLE capable profile service.
    ///
    /// Returns false if it is already stopped, in which case no completion follows.
    fn stop_ble_profile_service(&mut self) -> bool;

    /// Starts every other supported profile service.
    ///
    /// Returns false if there is nothing to start.
    fn start_profile_services(&mut self) -> bool;

    /// Stops every profile service except the BLE capable one.
    ///
    /// Returns false if there is nothing to stop.
    fn stop_profile_services(&mut self) -> bool;

    /// Records a service state report. Returns the completion to feed back into the machine
    /// once a whole group reached its target.
    fn on_profile_service_state_changed(
        &mut self,
        profile: ProfileService,
        state: ProfileServiceState,
    ) -> Option<AdapterStateMessage>;
}

pub struct AdapterStateMachine {
    state: PowerState,
    flags: PendingFlags,
    deferred: DeferredQueue<AdapterStateMessage>,
    timers: Timers<AdapterTimer, Message>,
    timeouts: AdapterTimeouts,
    start_restricted: bool,
    radio: Arc<dyn RadioControl>,
    properties: Arc<AdapterProperties>,
    services: Box<dyn IProfileServiceControl + Send>,
    tx: UnboundedSender<Message>,
}

impl AdapterStateMachine {
    pub fn new(
        tx: UnboundedSender<Message>,
        radio: Arc<dyn RadioControl>,
        properties: Arc<AdapterProperties>,
        services: Box<dyn IProfileServiceControl + Send>,
        timeouts: AdapterTimeouts,
        start_restricted: bool,
    ) -> AdapterStateMachine {
        AdapterStateMachine {
            state: PowerState::Off,
            flags: PendingFlags::default(),
            deferred: DeferredQueue::new(),
            timers: Timers::new(tx.clone(), |timer, generation| {
                Message::AdapterState(AdapterStateMessage::Timeout(timer, generation))
            }),
            timeouts,
            start_restricted,
            radio,
            properties,
            services,
            tx,
        }
    }

    pub fn get_power_state(&self) -> PowerState {
        self.state
    }

    pub fn get_flags(&self) -> PendingFlags {
        self.flags
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    /// Processes one message, then replays deferred requests for as long as the machine keeps
    /// changing state.
    pub fn handle(&mut self, msg: AdapterStateMessage) {
        let mut transitioned = self.process(msg);
        while transitioned {
            transitioned = false;
            for deferred in self.deferred.take_all() {
                debug!("Replaying {:?} in {:?}", deferred, self.state);
                if self.process(deferred) {
                    transitioned = true;
                }
            }
        }
    }

    /// Feeds a profile service report through to the machine.
    pub fn on_profile_service_state_changed(
        &mut self,
        profile: ProfileService,
        state: ProfileServiceState,
    ) {
        if let Some(msg) = self.services.on_profile_service_state_changed(profile, state) {
            self.handle(msg);
        }
    }

    /// Disarms all timers and forgets deferred requests.
    pub fn shutdown(&mut self) {
        self.timers.cancel_all();
        self.deferred.clear();
    }

    fn post(&self, msg: AdapterStateMessage) {
        let _ = self.tx.send(Message::AdapterState(msg));
    }

    fn start_timer(&mut self, timer: AdapterTimer) {
        let duration = self.timeouts.get(timer);
        self.timers.start(timer, duration);
    }

    fn move_to(&mut self, state: PowerState) {
        if self.state != state {
            info!("Power state {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    /// Returns true if the machine changed state.
    fn process(&mut self, msg: AdapterStateMessage) -> bool {
        let prev = self.state;

        if msg.is_user_request() {
            self.on_user_request(msg);
            return self.state != prev;
        }

        match msg {
            AdapterStateMessage::BleStarted => self.on_ble_started(),
            AdapterStateMessage::RadioStateChanged(BtState::On) => self.on_radio_on(),
            AdapterStateMessage::RadioStateChanged(BtState::Off) => self.on_radio_off(),
            AdapterStateMessage::BrEdrStarted => self.on_bredr_started(),
            AdapterStateMessage::BeginDisable => self.on_begin_disable(),
            AdapterStateMessage::BrEdrStopped => self.on_bredr_stopped(),
            AdapterStateMessage::BleStopped => self.on_ble_stopped(),
            AdapterStateMessage::Timeout(timer, generation) => {
                if self.timers.expire(timer, generation) {
                    self.on_timeout(timer);
                } else {
                    debug!("Dropping stale {:?} timeout", timer);
                }
            }
            _ => (),
        }

        self.state != prev
    }

    fn on_user_request(&mut self, msg: AdapterStateMessage) {
        match (self.state, &msg) {
            (PowerState::PendingCommand, _) => {
                info!("Deferring {:?} while {:?} is in flight", msg, self.flags);
                self.deferred.defer(msg);
            }
            (PowerState::Off, AdapterStateMessage::RequestBleOn) => self.start_ble_on(),
            (PowerState::BleOn, AdapterStateMessage::RequestFullOn) => self.start_full_on(),
            (PowerState::BleOn, AdapterStateMessage::RequestBleOff) => self.start_ble_off(),
            (PowerState::On, AdapterStateMessage::RequestOff) => self.start_off(),
            (state, _) => info!("{:?} has nothing to do in {:?}", msg, state),
        }
    }

    fn start_ble_on(&mut self) {
        self.properties.init();
        self.properties.set_state(AdapterState::BleTurningOn);
        self.flags.ble_turning_on = true;
        self.start_timer(AdapterTimer::BleStart);
        self.move_to(PowerState::PendingCommand);

        if !self.services.start_ble_profile_service() {
            self.post(AdapterStateMessage::BleStarted);
        }
    }

    fn on_ble_started(&mut self) {
        if !self.timers.cancel(AdapterTimer::BleStart) {
            debug!("BLE profile service start not awaited");
            return;
        }

        let status = self.radio.enable(self.start_restricted);
        if status != BtStatus::Success {
            error!("Radio enable rejected: {:?}", status);
            self.services.stop_ble_profile_service();
            self.enter_off();
            return;
        }
        self.start_timer(AdapterTimer::Enable);
    }

    fn on_radio_on(&mut self) {
        if !self.timers.cancel(AdapterTimer::Enable) {
            warn!("Radio on while not enabling, in {:?}", self.state);
            return;
        }

        self.flags.ble_turning_on = false;
        self.properties.set_state(AdapterState::BleOn);
        self.move_to(PowerState::BleOn);
    }

    fn start_full_on(&mut self) {
        self.properties.set_state(AdapterState::TurningOn);
        self.flags.turning_on = true;
        self.start_timer(AdapterTimer::BrEdrStart);
        self.move_to(PowerState::PendingCommand);

        if !self.services.start_profile_services() {
            self.post(AdapterStateMessage::BrEdrStarted);
        }
    }

    fn on_bredr_started(&mut self) {
        if !self.timers.cancel(AdapterTimer::BrEdrStart) {
            debug!("Profile services start not awaited");
            return;
        }

        self.properties.on_bluetooth_ready();
        self.flags.turning_on = false;
        self.properties.set_state(AdapterState::On);
        self.move_to(PowerState::On);
    }

    fn start_off(&mut self) {
        self.properties.set_state(AdapterState::TurningOff);
        self.flags.turning_off = true;
        self.start_timer(AdapterTimer::ScanModeSettle);
        self.move_to(PowerState::PendingCommand);
        self.properties.on_bluetooth_disable();
    }

    fn on_begin_disable(&mut self) {
        if !self.timers.cancel(AdapterTimer::ScanModeSettle) {
            debug!("Scan mode settle not awaited");
            return;
        }
        self.stop_bredr();
    }

    fn stop_bredr(&mut self) {
        self.start_timer(AdapterTimer::BrEdrStop);
        if !self.services.stop_profile_services() {
            self.post(AdapterStateMessage::BrEdrStopped);
        }
    }

    fn on_bredr_stopped(&mut self) {
        if !self.timers.cancel(AdapterTimer::BrEdrStop) {
            debug!("Profile services stop not awaited");
            return;
        }

        self.flags.turning_off = false;
        self.properties.set_state(AdapterState::BleOn);
        self.move_to(PowerState::BleOn);
    }

    fn start_ble_off(&mut self) {
        self.properties.set_state(AdapterState::BleTurningOff);
        self.flags.ble_turning_off = true;
        self.properties.on_ble_disable();

        let status = self.radio.disable();
        if status != BtStatus::Success {
            error!("Radio disable rejected: {:?}", status);
            self.flags.ble_turning_off = false;
            self.properties.set_state(AdapterState::BleOn);
            return;
        }

        self.start_timer(AdapterTimer::Disable);
        self.move_to(PowerState::PendingCommand);
    }

    fn on_radio_off(&mut self) {
        match self.state {
            PowerState::PendingCommand => (),
            PowerState::Off => {
                debug!("Radio off while already off");
                return;
            }
            state => {
                error!("Radio went off unexpectedly in {:?}", state);
                self.stop_all_services();
                self.enter_off();
                return;
            }
        }

        if self.flags.turning_on || self.flags.ble_turning_on {
            error!("Radio went off while turning on");
            self.stop_all_services();
            self.enter_off();
            return;
        }

        if !self.timers.cancel(AdapterTimer::Disable) {
            // Still stopping BR/EDR. Skip the rest of it and finish off.
            warn!("Radio went off early, flags {:?}", self.flags);
            self.timers.cancel(AdapterTimer::ScanModeSettle);
            self.timers.cancel(AdapterTimer::BrEdrStop);
            self.services.stop_profile_services();
            self.flags.turning_off = false;
            self.flags.ble_turning_off = true;
            self.properties.set_state(AdapterState::BleTurningOff);
        }

        self.start_timer(AdapterTimer::BleStop);
        if !self.services.stop_ble_profile_service() {
            self.on_ble_stopped();
        }
    }

    fn on_ble_stopped(&mut self) {
        if !self.timers.cancel(AdapterTimer::BleStop) {
            debug!("BLE profile service stop not awaited");
            return;
        }

        self.flags.ble_turning_off = false;
        self.enter_off();
    }

    fn on_timeout(&mut self, timer: AdapterTimer) {
        match timer {
            AdapterTimer::ScanModeSettle => {
                warn!("Scan mode did not settle, continuing disable");
                self.stop_bredr();
            }
            AdapterTimer::BleStart | AdapterTimer::Enable => {
                error!("Timed out turning on BLE ({:?})", timer);
                self.services.stop_ble_profile_service();
                self.enter_off();
            }
            AdapterTimer::BrEdrStart => {
                error!("Timed out starting profile services");
                self.services.stop_profile_services();
                self.flags.turning_on = false;
                self.properties.set_state(AdapterState::BleOn);
                self.move_to(PowerState::BleOn);
            }
            AdapterTimer::BrEdrStop => {
                error!("Timed out stopping profile services");
                self.flags.turning_off = false;
                self.properties.set_state(AdapterState::BleOn);
                self.move_to(PowerState::BleOn);
            }
            AdapterTimer::Disable => {
                error!("Timed out disabling the radio");
                self.stop_all_services();
                self.enter_off();
            }
            AdapterTimer::BleStop => {
                error!("Timed out stopping the BLE profile service");
                self.enter_off();
            }
        }
    }

    fn stop_all_services(&mut self) {
        self.services.stop_profile_services();
        self.services.stop_ble_profile_service();
    }

    fn enter_off(&mut self) {
        self.flags = PendingFlags::default();
        self.timers.cancel_all();
        self.properties.set_state(AdapterState::Off);
        self.move_to(PowerState::Off);
    }
}
