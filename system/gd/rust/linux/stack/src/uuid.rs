//! Collection of Profile UUIDs and helpers to use them.

use lazy_static::lazy_static;
use std::collections::HashMap;
use std::fmt::{Debug, Display, Formatter};

use bt_topshim::btif::{Uuid, Uuid128Bit};

// List of profile uuids
pub const A2DP_SINK: &str = "0000110B-0000-1000-8000-00805F9B34FB";
pub const A2DP_SOURCE: &str = "0000110A-0000-1000-8000-00805F9B34FB";
pub const HSP: &str = "00001108-0000-1000-8000-00805F9B34FB";
pub const HFP: &str = "0000111E-0000-1000-8000-00805F9B34FB";
pub const HFP_AG: &str = "0000111F-0000-1000-8000-00805F9B34FB";
pub const AVRCP_CONTROLLER: &str = "0000110E-0000-1000-8000-00805F9B34FB";
pub const AVRCP_TARGET: &str = "0000110C-0000-1000-8000-00805F9B34FB";
pub const HID: &str = "00001124-0000-1000-8000-00805f9b34fb";
pub const HOGP: &str = "00001812-0000-1000-8000-00805f9b34fb";
pub const PANU: &str = "00001115-0000-1000-8000-00805F9B34FB";
pub const NAP: &str = "00001116-0000-1000-8000-00805F9B34FB";
pub const PBAP_PSE: &str = "0000112f-0000-1000-8000-00805F9B34FB";
pub const MAS: &str = "00001132-0000-1000-8000-00805F9B34FB";
pub const SAP: &str = "0000112D-0000-1000-8000-00805F9B34FB";

/// Profiles recognised from remote UUIDs.
#[derive(Clone, Debug, Hash, PartialEq, PartialOrd, Eq, Ord, Copy)]
pub enum Profile {
    A2dpSink,
    A2dpSource,
    Hsp,
    Hfp,
    HfpAg,
    AvrcpController,
    AvrcpTarget,
    Hid,
    Hogp,
    Panu,
    Nap,
    PbapPse,
    Mas,
    Sap,
}

impl Display for Profile {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}

/// Wraps a reference of Uuid128Bit, which is the raw array of bytes of UUID.
pub struct UuidWrapper<'a>(pub &'a Uuid128Bit);

impl<'a> Display for UuidWrapper<'a> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        Uuid::format(&self.0, f)
    }
}

/// Formats a UUID list for logs, naming the profiles that are known.
pub struct DisplayUuids<'a>(pub &'a [Uuid128Bit]);

impl<'a> Display for DisplayUuids<'a> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "[")?;
        for (i, uuid) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", UuidHelper::known_uuid_to_string(uuid))?;
        }
        write!(f, "]")
    }
}

pub struct UuidHelper {}

lazy_static! {
    static ref PROFILES: HashMap<Uuid128Bit, Profile> = [
        (A2DP_SINK, Profile::A2dpSink),
        (A2DP_SOURCE, Profile::A2dpSource),
        (HSP, Profile::Hsp),
        (HFP, Profile::Hfp),
        (HFP_AG, Profile::HfpAg),
        (AVRCP_CONTROLLER, Profile::AvrcpController),
        (AVRCP_TARGET, Profile::AvrcpTarget),
        (HID, Profile::Hid),
        (HOGP, Profile::Hogp),
        (PANU, Profile::Panu),
        (NAP, Profile::Nap),
        (PBAP_PSE, Profile::PbapPse),
        (MAS, Profile::Mas),
        (SAP, Profile::Sap),
    ]
    .iter()
    .filter_map(|(uuid, profile)| UuidHelper::from_string(*uuid).map(|u| (u, *profile)))
    .collect();
}

lazy_static! {
    static ref PROFILES_UUIDS: HashMap<Profile, Uuid128Bit> =
        PROFILES.iter().map(|(k, v)| (v.clone(), k.clone())).collect();
}

impl UuidHelper {
    /// Converts a UUID to a known profile enum.
    pub fn is_known_profile(uuid: &Uuid128Bit) -> Option<Profile> {
        PROFILES.get(uuid).cloned()
    }

    /// Converts a profile enum to its UUID if known.
    pub fn get_profile_uuid(profile: &Profile) -> Option<&Uuid128Bit> {
        PROFILES_UUIDS.get(profile)
    }

    /// Converts a UUID byte array into a formatted string.
    pub fn to_string(uuid: &Uuid128Bit) -> String {
        UuidWrapper(&uuid).to_string()
    }

    /// If a uuid is known to be a certain service, convert it into a formatted
    /// string that shows the service name. Else just format the uuid.
    pub fn known_uuid_to_string(uuid: &Uuid128Bit) -> String {
        match Self::is_known_profile(uuid) {
            Some(p) => format!("{}: {}", UuidHelper::to_string(uuid), p),
            None => UuidHelper::to_string(uuid),
        }
    }

    /// Converts a well-formatted UUID string to a UUID byte array.
    /// The UUID string should be in the format:
    /// 12345678-1234-1234-1234-1234567890ab
    pub fn from_string<S: Into<String>>(raw: S) -> Option<Uuid128Bit> {
        let raw: String = raw.into();

        // Make sure input is valid length and formatting
        let s = raw.split('-').collect::<Vec<&str>>();
        if s.len() != 5 || raw.len() != 36 {
            return None;
        }

        let mut uuid: Uuid128Bit = [0; 16];
        let mut idx = 0;
        for section in s.iter() {
            for i in (0..section.len()).step_by(2) {
                if idx >= uuid.len() || i + 2 > section.len() {
                    return None;
                }
                uuid[idx] = match u8::from_str_radix(&section[i..i + 2], 16) {
                    Ok(res) => res,
                    Err(_) => {
                        return None;
                    }
                };
                idx = idx + 1;
            }
        }

        Some(uuid)
    }
}
