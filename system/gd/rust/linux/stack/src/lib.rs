//! Bluetooth adapter control plane.
//!
//! This crate provides the adapter API implementation (power sequencing, bonding, adapter and
//! remote device properties) on top of a radio abstraction, independent of any RPC projection.

#[macro_use]
extern crate num_derive;

pub mod adapter_properties;
pub mod adapter_service;
pub mod adapter_state;
pub mod bluetooth;
pub mod bond_state_machine;
pub mod callbacks;
pub mod cod;
pub mod config;
pub mod deferred;
pub mod device_policy;
pub mod energy;
pub mod profile_services;
pub mod remote_devices;
pub mod uuid;

use bt_topshim::btif::{BaseCallbacks, RawAddress};
use log::debug;

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::adapter_service::AdapterService;
use crate::adapter_state::AdapterStateMessage;
use crate::bond_state_machine::BondMessage;
use crate::profile_services::{ProfileService, ProfileServiceState};

/// Message types that are sent to the stack main dispatch loop.
#[derive(Debug)]
pub enum Message {
    /// Callbacks from the radio.
    Base(BaseCallbacks),
    AdapterState(AdapterStateMessage),
    Bond(BondMessage),
    FetchUuids(RawAddress),
    /// Service search fallback fired, with the timer generation.
    UuidFetchTimeout(RawAddress, u64),
    ProfileServiceStateChanged(ProfileService, ProfileServiceState),
    Shutdown,
}

/// Umbrella class for the Bluetooth stack.
pub struct Stack {}

impl Stack {
    /// Creates an mpsc channel for passing messages to the main dispatch loop.
    pub fn create_channel() -> (UnboundedSender<Message>, UnboundedReceiver<Message>) {
        unbounded_channel::<Message>()
    }

    /// Runs the main dispatch loop until shutdown or until every sender is gone.
    pub async fn dispatch(mut rx: UnboundedReceiver<Message>, mut service: AdapterService) {
        loop {
            let m = match rx.recv().await {
                Some(m) => m,
                None => {
                    debug!("Message dispatch loop quit");
                    break;
                }
            };

            if !service.handle_message(m) {
                debug!("Adapter service shut down");
                break;
            }
        }
    }
}
