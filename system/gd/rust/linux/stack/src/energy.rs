//! Controller activity and energy accounting.
//!
//! The radio reports activity counters asynchronously. Reports are folded into running totals
//! which a caller can collect (and reset) after waiting a short time for a fresh report.

use bt_topshim::btif::{BtActivityEnergyInfo, BtUidTraffic};
use log::{debug, error, warn};

use std::collections::BTreeMap;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Controller states as reported with each activity record.
pub const CTRL_STATE_INVALID: u8 = 0;
pub const CTRL_STATE_ACTIVE: u8 = 1;
pub const CTRL_STATE_SCANNING: u8 = 2;
pub const CTRL_STATE_IDLE: u8 = 3;

/// Power model used when the controller does not report the energy it used.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EnergyModel {
    pub tx_current_ma: u64,
    pub rx_current_ma: u64,
    pub idle_current_ma: u64,
    pub operating_voltage_mv: u64,
}

impl EnergyModel {
    /// Estimates the energy (mA x ms x V) for the given activity times.
    pub fn estimate(&self, tx_time: u64, rx_time: u64, idle_time: u64) -> Option<u64> {
        let charge = tx_time
            .checked_mul(self.tx_current_ma)?
            .checked_add(rx_time.checked_mul(self.rx_current_ma)?)?
            .checked_add(idle_time.checked_mul(self.idle_current_ma)?)?;
        Some(charge.checked_mul(self.operating_voltage_mv)? / 1000)
    }
}

/// Snapshot handed to callers of the activity report API.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ActivityEnergyInfo {
    pub ctrl_state: u8,
    pub tx_time: u64,
    pub rx_time: u64,
    pub idle_time: u64,
    pub energy_used: u64,
    pub uid_traffic: Vec<BtUidTraffic>,
}

#[derive(Default)]
struct EnergyTotals {
    ctrl_state: u8,
    tx_time: u64,
    rx_time: u64,
    idle_time: u64,
    energy_used: u64,
    uid_traffic: BTreeMap<i32, (u64, u64)>,
    generation: u64,
}

impl EnergyTotals {
    fn reset_counters(&mut self) {
        self.ctrl_state = CTRL_STATE_INVALID;
        self.tx_time = 0;
        self.rx_time = 0;
        self.idle_time = 0;
        self.energy_used = 0;
        self.uid_traffic.clear();
    }
}

pub struct EnergyInfoTracker {
    model: EnergyModel,
    totals: Mutex<EnergyTotals>,
    updated: Condvar,
}

impl EnergyInfoTracker {
    pub fn new(model: EnergyModel) -> Self {
        EnergyInfoTracker {
            model,
            totals: Mutex::new(EnergyTotals::default()),
            updated: Condvar::new(),
        }
    }

    /// Folds one report from the radio into the totals and wakes any waiting caller.
    pub fn on_energy_info(&self, info: BtActivityEnergyInfo, traffic: Vec<BtUidTraffic>) {
        if info.ctrl_state > CTRL_STATE_IDLE {
            error!("Dropping energy info with invalid controller state {}", info.ctrl_state);
            return;
        }

        let mut energy_used = info.energy_used;
        if energy_used == 0 {
            energy_used = match self.model.estimate(info.tx_time, info.rx_time, info.idle_time) {
                Some(energy) => energy,
                None => {
                    warn!("Energy estimate overflowed, reporting 0");
                    0
                }
            };
        }

        let mut totals = self.totals.lock().unwrap();
        let summed = (|| {
            Some((
                totals.tx_time.checked_add(info.tx_time)?,
                totals.rx_time.checked_add(info.rx_time)?,
                totals.idle_time.checked_add(info.idle_time)?,
                totals.energy_used.checked_add(energy_used)?,
            ))
        })();

        match summed {
            Some((tx, rx, idle, energy)) => {
                totals.ctrl_state = info.ctrl_state;
                totals.tx_time = tx;
                totals.rx_time = rx;
                totals.idle_time = idle;
                totals.energy_used = energy;
            }
            None => {
                error!("Energy totals overflowed, discarding report");
                return;
            }
        }

        for t in traffic {
            let entry = totals.uid_traffic.entry(t.app_uid).or_insert((0, 0));
            entry.0 = entry.0.saturating_add(t.rx_bytes);
            entry.1 = entry.1.saturating_add(t.tx_bytes);
        }

        totals.generation = totals.generation.wrapping_add(1);
        debug!(
            "Energy info: state={} tx={} rx={} idle={} energy={}",
            totals.ctrl_state, totals.tx_time, totals.rx_time, totals.idle_time, totals.energy_used
        );
        self.updated.notify_all();
    }

    /// Number of reports folded in so far. Taken before asking the radio for a new report.
    pub fn generation(&self) -> u64 {
        self.totals.lock().unwrap().generation
    }

    /// Waits up to `timeout` for a report newer than `since`, then returns the totals and
    /// resets them. On timeout the totals collected so far are returned.
    pub fn wait_and_take(&self, since: u64, timeout: Duration) -> ActivityEnergyInfo {
        let totals = self.totals.lock().unwrap();
        let (mut totals, result) = self
            .updated
            .wait_timeout_while(totals, timeout, |t| t.generation == since)
            .unwrap();
        if result.timed_out() {
            debug!("No energy report within {:?}", timeout);
        }

        let info = ActivityEnergyInfo {
            ctrl_state: totals.ctrl_state,
            tx_time: totals.tx_time,
            rx_time: totals.rx_time,
            idle_time: totals.idle_time,
            energy_used: totals.energy_used,
            uid_traffic: totals
                .uid_traffic
                .iter()
                .filter(|(_, (rx, tx))| *rx > 0 || *tx > 0)
                .map(|(uid, (rx, tx))| BtUidTraffic { app_uid: *uid, rx_bytes: *rx, tx_bytes: *tx })
                .collect(),
        };
        totals.reset_counters();
        info
    }
}
