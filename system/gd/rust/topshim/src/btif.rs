//! Radio control boundary
//!
//! Types and the `RadioControl` trait through which the adapter stack talks to the native radio
//! stack. Commands return a synchronous `BtStatus` only; real completion arrives later as a
//! `BaseCallbacks` value handed to the `BaseCallbacksDispatcher` given at initialization.

use num_traits::cast::{FromPrimitive, ToPrimitive};
use std::convert::TryInto;
use std::fmt::{Debug, Display, Formatter, Result};
use std::vec::Vec;

#[derive(Clone, Copy, Debug, FromPrimitive, ToPrimitive, PartialEq, Eq, PartialOrd)]
#[repr(u32)]
pub enum BtState {
    Off = 0,
    On,
}

impl From<u32> for BtState {
    fn from(item: u32) -> Self {
        BtState::from_u32(item).unwrap_or_else(|| BtState::Off)
    }
}

#[derive(Clone, Copy, Debug, FromPrimitive, ToPrimitive, PartialEq, Eq, PartialOrd)]
#[repr(u32)]
pub enum BtTransport {
    Auto = 0,
    Bredr,
    Le,
}

impl From<i32> for BtTransport {
    fn from(item: i32) -> Self {
        BtTransport::from_i32(item).unwrap_or_else(|| BtTransport::Auto)
    }
}

impl From<BtTransport> for i32 {
    fn from(item: BtTransport) -> Self {
        item.to_i32().unwrap_or_else(|| 0)
    }
}

#[derive(Clone, Copy, Debug, FromPrimitive, ToPrimitive, PartialEq, Eq, PartialOrd)]
#[repr(u32)]
pub enum BtSspVariant {
    PasskeyConfirmation = 0,
    PasskeyEntry,
    Consent,
    PasskeyNotification,
}

#[derive(Clone, Copy, Debug, FromPrimitive, ToPrimitive, PartialEq, Eq, PartialOrd)]
#[repr(u32)]
pub enum BtBondState {
    NotBonded = 0,
    Bonding,
    Bonded,
}

impl From<u32> for BtBondState {
    fn from(item: u32) -> Self {
        BtBondState::from_u32(item).unwrap_or_else(|| BtBondState::NotBonded)
    }
}

#[derive(Clone, Copy, Debug, FromPrimitive, ToPrimitive, PartialEq, Eq, PartialOrd)]
#[repr(u32)]
pub enum BtAclState {
    Connected = 0,
    Disconnected,
}

impl From<u32> for BtAclState {
    fn from(item: u32) -> Self {
        BtAclState::from_u32(item).unwrap_or_else(|| BtAclState::Disconnected)
    }
}

#[derive(Clone, Copy, Debug, FromPrimitive, ToPrimitive, PartialEq, Eq, PartialOrd)]
#[repr(u32)]
pub enum BtDeviceType {
    Unknown = 0,
    Bredr,
    Ble,
    Dual,
}

impl From<u32> for BtDeviceType {
    fn from(item: u32) -> Self {
        BtDeviceType::from_u32(item).unwrap_or_else(|| BtDeviceType::Unknown)
    }
}

#[derive(Clone, Copy, Debug, FromPrimitive, ToPrimitive, PartialEq, Eq, Hash, PartialOrd)]
#[repr(u32)]
pub enum BtPropertyType {
    BdName = 0x1,
    BdAddr,
    Uuids,
    ClassOfDevice,
    TypeOfDevice,
    ServiceRecord,
    AdapterScanMode,
    AdapterBondedDevices,
    AdapterDiscoverableTimeout,
    RemoteFriendlyName,
    RemoteRssi,
    RemoteVersionInfo,
    LocalLeFeatures,

    Unknown = 0xFE,
    RemoteDeviceTimestamp = 0xFF,
}

impl From<u32> for BtPropertyType {
    fn from(item: u32) -> Self {
        BtPropertyType::from_u32(item).unwrap_or_else(|| BtPropertyType::Unknown)
    }
}

impl From<BtPropertyType> for u32 {
    fn from(item: BtPropertyType) -> Self {
        item.to_u32().unwrap_or_else(|| 0)
    }
}

#[derive(Clone, Copy, Debug, FromPrimitive, ToPrimitive, PartialEq, Eq, PartialOrd)]
#[repr(u32)]
pub enum BtDiscoveryState {
    Stopped = 0x0,
    Started,
}

impl From<u32> for BtDiscoveryState {
    fn from(item: u32) -> Self {
        BtDiscoveryState::from_u32(item).unwrap_or_else(|| BtDiscoveryState::Stopped)
    }
}

/// Scan mode values as carried by the scan mode property.
#[derive(Clone, Copy, Debug, FromPrimitive, ToPrimitive, PartialEq, Eq, PartialOrd)]
#[repr(u32)]
pub enum BtScanMode {
    None_ = 0,
    Connectable,
    ConnectableDiscoverable,
}

impl From<u32> for BtScanMode {
    fn from(item: u32) -> Self {
        BtScanMode::from_u32(item).unwrap_or_else(|| BtScanMode::None_)
    }
}

#[derive(Clone, Copy, Debug, FromPrimitive, ToPrimitive, PartialEq, Eq, PartialOrd)]
#[repr(u32)]
pub enum BtStatus {
    Success = 0,
    Fail,
    NotReady,
    NoMemory,
    Busy,
    Done,
    Unsupported,
    InvalidParam,
    Unhandled,
    AuthFailure,
    RemoteDeviceDown,
    AuthRejected,
    JniEnvironmentError,
    JniThreadAttachError,
    WakeLockError,
    AuthTimeout,

    // Any statuses that couldn't be cleanly converted
    Unknown = 0xff,
}

impl From<u32> for BtStatus {
    fn from(item: u32) -> Self {
        match BtStatus::from_u32(item) {
            Some(x) => x,
            _ => BtStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BtProperty {
    pub prop_type: BtPropertyType,
    pub len: i32,
    pub val: Vec<u8>,
}

impl BtProperty {
    pub fn new(prop_type: BtPropertyType, val: Vec<u8>) -> Self {
        BtProperty { prop_type, len: val.len() as i32, val }
    }

    /// Builds a property holding a 32-bit value in little endian order.
    pub fn from_u32(prop_type: BtPropertyType, value: u32) -> Self {
        BtProperty::new(prop_type, value.to_le_bytes().to_vec())
    }

    /// Reads the value as a little endian 32-bit integer. Shorter values are zero extended.
    pub fn as_u32(&self) -> Option<u32> {
        if self.val.is_empty() || self.val.len() > 4 {
            return None;
        }
        let mut raw = [0u8; 4];
        raw[..self.val.len()].copy_from_slice(&self.val);
        Some(u32::from_le_bytes(raw))
    }
}

/// Represents a Bluetooth address.
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RawAddress {
    pub address: [u8; 6],
}

impl Debug for RawAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        Display::fmt(self, f)
    }
}

impl Display for RawAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        f.write_fmt(format_args!(
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.address[0],
            self.address[1],
            self.address[2],
            self.address[3],
            self.address[4],
            self.address[5]
        ))
    }
}

impl RawAddress {
    /// Constructs a RawAddress from exactly 6 bytes.
    pub fn from_bytes(raw_addr: &[u8]) -> Option<RawAddress> {
        match raw_addr.try_into() {
            Ok(address) => Some(RawAddress { address }),
            Err(_) => None,
        }
    }

    /// Parses `AA:BB:CC:DD:EE:FF`.
    pub fn from_string<S: Into<String>>(addr: S) -> Option<RawAddress> {
        let addr: String = addr.into();
        let s = addr.split(':').collect::<Vec<&str>>();

        if s.len() != 6 {
            return None;
        }

        let mut raw: [u8; 6] = [0; 6];
        for i in 0..s.len() {
            if s[i].len() != 2 {
                return None;
            }
            raw[i] = match u8::from_str_radix(s[i], 16) {
                Ok(res) => res,
                Err(_) => {
                    return None;
                }
            };
        }

        Some(RawAddress { address: raw })
    }

    pub fn to_byte_arr(&self) -> [u8; 6] {
        self.address.clone()
    }
}

pub type Uuid128Bit = [u8; 16];

pub const UUID_SIZE: usize = 16;

/// Helpers for formatting the raw 128-bit UUID representation.
pub struct Uuid;

impl Uuid {
    pub fn format(uuid: &Uuid128Bit, f: &mut Formatter) -> Result {
        write!(
            f,
            "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            uuid[0], uuid[1], uuid[2], uuid[3],
            uuid[4], uuid[5],
            uuid[6], uuid[7],
            uuid[8], uuid[9],
            uuid[10], uuid[11], uuid[12], uuid[13], uuid[14], uuid[15]
        )
    }

    /// Splits a property value into 16 byte UUIDs. Trailing partial chunks are dropped.
    pub fn list_from_bytes(val: &[u8]) -> Vec<Uuid128Bit> {
        val.chunks_exact(UUID_SIZE)
            .filter_map(|chunk| chunk.try_into().ok())
            .collect::<Vec<Uuid128Bit>>()
    }
}

/// Out of band pairing material.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OobData {
    /// Simple pairing hash C.
    pub c: Vec<u8>,
    /// Simple pairing randomizer R.
    pub r: Vec<u8>,
    /// LE security manager temporary key.
    pub sm_tk: Vec<u8>,
}

impl OobData {
    /// Every supplied field must hold exactly 16 bytes.
    pub fn is_valid(&self) -> bool {
        [&self.c, &self.r, &self.sm_tk].iter().all(|v| v.is_empty() || v.len() == 16)
            && !(self.c.is_empty() && self.r.is_empty() && self.sm_tk.is_empty())
    }
}

/// Controller activity counters as reported by the energy info callback.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BtActivityEnergyInfo {
    pub status: u8,
    pub ctrl_state: u8,
    pub tx_time: u64,
    pub rx_time: u64,
    pub idle_time: u64,
    pub energy_used: u64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BtUidTraffic {
    pub app_uid: i32,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

#[derive(Debug)]
pub enum BaseCallbacks {
    AdapterState(BtState),
    AdapterProperties(BtStatus, i32, Vec<BtProperty>),
    RemoteDeviceProperties(BtStatus, RawAddress, i32, Vec<BtProperty>),
    DeviceFound(i32, Vec<BtProperty>),
    DiscoveryState(BtDiscoveryState),
    PinRequest(RawAddress, String, u32, bool),
    // The variant is left raw so unknown codes can be rejected by the consumer.
    SspRequest(RawAddress, String, u32, u32, u32),
    BondState(BtStatus, RawAddress, BtBondState),
    AclState(BtStatus, RawAddress, BtAclState),
    EnergyInfo(BtActivityEnergyInfo, Vec<BtUidTraffic>),
}

pub struct BaseCallbacksDispatcher {
    pub dispatch: Box<dyn Fn(BaseCallbacks) + Send>,
}

/// Commands accepted by the native radio stack.
///
/// Every command is fire-and-forget: the returned status only says whether the request was
/// accepted. Completion is reported through the dispatcher passed to `initialize`.
pub trait RadioControl: Send + Sync {
    fn initialize(&self, callbacks: BaseCallbacksDispatcher) -> bool;

    fn cleanup(&self);

    fn enable(&self, start_restricted: bool) -> BtStatus;

    fn disable(&self) -> BtStatus;

    fn get_adapter_property(&self, prop_type: BtPropertyType) -> BtStatus;

    fn set_adapter_property(&self, prop: BtProperty) -> BtStatus;

    fn set_remote_device_property(&self, addr: &RawAddress, prop: BtProperty) -> BtStatus;

    fn create_bond(&self, addr: &RawAddress, transport: BtTransport) -> BtStatus;

    fn create_bond_out_of_band(
        &self,
        addr: &RawAddress,
        transport: BtTransport,
        oob_data: &OobData,
    ) -> BtStatus;

    fn remove_bond(&self, addr: &RawAddress) -> BtStatus;

    fn cancel_bond(&self, addr: &RawAddress) -> BtStatus;

    fn pin_reply(&self, addr: &RawAddress, accept: bool, pin: &[u8]) -> BtStatus;

    fn ssp_reply(
        &self,
        addr: &RawAddress,
        variant: BtSspVariant,
        accept: bool,
        passkey: u32,
    ) -> BtStatus;

    fn get_remote_services(&self, addr: &RawAddress) -> BtStatus;

    fn start_discovery(&self) -> BtStatus;

    fn cancel_discovery(&self) -> BtStatus;

    fn read_energy_info(&self) -> BtStatus;
}
