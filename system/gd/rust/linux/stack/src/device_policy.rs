//! Per-device access permissions and profile priorities.
//!
//! The stores live outside the adapter core. The core only reads them through `IDevicePolicy`
//! and resets a device's entries when its bond is removed.

use bt_topshim::btif::RawAddress;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::profile_services::ProfileService;

#[derive(Clone, Copy, Debug, FromPrimitive, ToPrimitive, PartialEq, Eq)]
#[repr(u32)]
pub enum AccessPermission {
    Unknown = 0,
    Allowed = 1,
    Rejected = 2,
}

/// Which OBEX style resource a permission guards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AccessKind {
    Phonebook,
    Message,
    Sim,
}

pub const ALL_ACCESS_KINDS: [AccessKind; 3] =
    [AccessKind::Phonebook, AccessKind::Message, AccessKind::Sim];

#[derive(Clone, Copy, Debug, FromPrimitive, ToPrimitive, PartialEq, Eq)]
#[repr(i32)]
pub enum ProfilePriority {
    Undefined = -1,
    Off = 0,
    On = 100,
    AutoConnect = 1000,
}

pub trait IDevicePolicy {
    fn get_access_permission(&self, addr: &RawAddress, kind: AccessKind) -> AccessPermission;

    fn set_access_permission(
        &mut self,
        addr: &RawAddress,
        kind: AccessKind,
        permission: AccessPermission,
    );

    fn get_profile_priority(&self, addr: &RawAddress, profile: ProfileService) -> ProfilePriority;

    fn set_profile_priority(
        &mut self,
        addr: &RawAddress,
        profile: ProfileService,
        priority: ProfilePriority,
    );

    /// Sets every profile priority of the device back to undefined.
    fn clear_profile_priorities(&mut self, addr: &RawAddress);
}

pub type SharedDevicePolicy = Arc<Mutex<Box<dyn IDevicePolicy + Send>>>;

/// In-memory policy store.
#[derive(Default)]
pub struct DevicePolicyStore {
    permissions: HashMap<(RawAddress, AccessKind), AccessPermission>,
    priorities: HashMap<(RawAddress, ProfileService), ProfilePriority>,
}

impl DevicePolicyStore {
    pub fn new() -> Self {
        DevicePolicyStore::default()
    }

    pub fn shared() -> SharedDevicePolicy {
        Arc::new(Mutex::new(Box::new(DevicePolicyStore::new())))
    }
}

impl IDevicePolicy for DevicePolicyStore {
    fn get_access_permission(&self, addr: &RawAddress, kind: AccessKind) -> AccessPermission {
        self.permissions.get(&(*addr, kind)).cloned().unwrap_or(AccessPermission::Unknown)
    }

    fn set_access_permission(
        &mut self,
        addr: &RawAddress,
        kind: AccessKind,
        permission: AccessPermission,
    ) {
        if permission == AccessPermission::Unknown {
            self.permissions.remove(&(*addr, kind));
        } else {
            self.permissions.insert((*addr, kind), permission);
        }
    }

    fn get_profile_priority(&self, addr: &RawAddress, profile: ProfileService) -> ProfilePriority {
        self.priorities.get(&(*addr, profile)).cloned().unwrap_or(ProfilePriority::Undefined)
    }

    fn set_profile_priority(
        &mut self,
        addr: &RawAddress,
        profile: ProfileService,
        priority: ProfilePriority,
    ) {
        if priority == ProfilePriority::Undefined {
            self.priorities.remove(&(*addr, profile));
        } else {
            self.priorities.insert((*addr, profile), priority);
        }
    }

    fn clear_profile_priorities(&mut self, addr: &RawAddress) {
        self.priorities.retain(|(a, _), _| a != addr);
    }
}
