//! Extension and device state enumerations and the mapping between them.
//!
//! `ExtensionState` is what AMI reports for a dialplan extension (a bitmask
//! of in-use/ringing/hold); `DeviceState` is what a `Custom:` device can be
//! set to. The mapping is fixed and total.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;

use crate::error::Error;

/// A batch of device states, keyed by device name.
///
/// Insertion-ordered so that "last occurrence wins" merges and the
/// forwarder's pending-entry pick are deterministic.
pub type DeviceStates = IndexMap<String, DeviceState>;

/// Extension status codes as reported by AMI `ExtensionStatus` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtensionState {
    Removed,
    Deactivated,
    Idle,
    InUse,
    Busy,
    Unavailable,
    Ringing,
    InUseRinging,
    Hold,
    InUseHold,
}

impl ExtensionState {
    /// The numeric code AMI uses for this state.
    pub fn code(self) -> i32 {
        match self {
            ExtensionState::Removed => -2,
            ExtensionState::Deactivated => -1,
            ExtensionState::Idle => 0,
            ExtensionState::InUse => 1,
            ExtensionState::Busy => 2,
            ExtensionState::Unavailable => 4,
            ExtensionState::Ringing => 8,
            ExtensionState::InUseRinging => 9,
            ExtensionState::Hold => 16,
            ExtensionState::InUseHold => 17,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            -2 => ExtensionState::Removed,
            -1 => ExtensionState::Deactivated,
            0 => ExtensionState::Idle,
            1 => ExtensionState::InUse,
            2 => ExtensionState::Busy,
            4 => ExtensionState::Unavailable,
            8 => ExtensionState::Ringing,
            9 => ExtensionState::InUseRinging,
            16 => ExtensionState::Hold,
            17 => ExtensionState::InUseHold,
            _ => return None,
        })
    }

    /// Parse an AMI status token.
    ///
    /// Accepts either the numeric code or the symbolic name. Names are
    /// matched case-insensitively and `&` is treated as `_`, so
    /// `InUse&Ringing` and `inuse_ringing` both parse. Returns `None` for
    /// anything else; callers map unknown states to
    /// [`DeviceState::Unknown`].
    pub fn parse(token: &str) -> Option<Self> {
        let token = token.trim();
        if let Ok(code) = token.parse::<i32>() {
            return Self::from_code(code);
        }
        let normalized = token.replace('&', "_").to_ascii_lowercase();
        Some(match normalized.as_str() {
            "removed" => ExtensionState::Removed,
            "deactivated" => ExtensionState::Deactivated,
            "idle" => ExtensionState::Idle,
            "inuse" => ExtensionState::InUse,
            "busy" => ExtensionState::Busy,
            "unavailable" => ExtensionState::Unavailable,
            "ringing" => ExtensionState::Ringing,
            "inuse_ringing" => ExtensionState::InUseRinging,
            "hold" => ExtensionState::Hold,
            "inuse_hold" => ExtensionState::InUseHold,
            _ => return None,
        })
    }
}

/// Device states accepted by `DEVICE_STATE()` on the PBX.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceState {
    Unknown,
    NotInUse,
    InUse,
    Busy,
    Invalid,
    Unavailable,
    Ringing,
    RingInUse,
    OnHold,
}

impl DeviceState {
    /// The wire name used both in AMI events and in `SetVar` values.
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceState::Unknown => "UNKNOWN",
            DeviceState::NotInUse => "NOT_INUSE",
            DeviceState::InUse => "INUSE",
            DeviceState::Busy => "BUSY",
            DeviceState::Invalid => "INVALID",
            DeviceState::Unavailable => "UNAVAILABLE",
            DeviceState::Ringing => "RINGING",
            DeviceState::RingInUse => "RINGINUSE",
            DeviceState::OnHold => "ONHOLD",
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim();
        [
            DeviceState::Unknown,
            DeviceState::NotInUse,
            DeviceState::InUse,
            DeviceState::Busy,
            DeviceState::Invalid,
            DeviceState::Unavailable,
            DeviceState::Ringing,
            DeviceState::RingInUse,
            DeviceState::OnHold,
        ]
        .into_iter()
        .find(|state| state.as_str().eq_ignore_ascii_case(token))
        .ok_or_else(|| Error::protocol(format!("unknown device state '{s}'")))
    }
}

impl From<ExtensionState> for DeviceState {
    /// The fixed extension-to-device mapping.
    ///
    /// `InUse+Hold` collapses to `ONHOLD`, same as plain `Hold`; the
    /// in-use bit is dropped intentionally.
    fn from(ext: ExtensionState) -> Self {
        match ext {
            ExtensionState::Removed => DeviceState::Invalid,
            ExtensionState::Deactivated => DeviceState::Unknown,
            ExtensionState::Idle => DeviceState::NotInUse,
            ExtensionState::InUse => DeviceState::InUse,
            ExtensionState::Busy => DeviceState::Busy,
            ExtensionState::Unavailable => DeviceState::Unavailable,
            ExtensionState::Ringing => DeviceState::Ringing,
            ExtensionState::InUseRinging => DeviceState::RingInUse,
            ExtensionState::Hold | ExtensionState::InUseHold => DeviceState::OnHold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_extension_state_names() {
        assert_eq!(ExtensionState::parse("Idle"), Some(ExtensionState::Idle));
        assert_eq!(ExtensionState::parse("INUSE"), Some(ExtensionState::InUse));
        assert_eq!(
            ExtensionState::parse("InUse&Ringing"),
            Some(ExtensionState::InUseRinging)
        );
        assert_eq!(
            ExtensionState::parse("inuse_ringing"),
            Some(ExtensionState::InUseRinging)
        );
        assert_eq!(
            ExtensionState::parse("InUse&Hold"),
            Some(ExtensionState::InUseHold)
        );
        assert_eq!(ExtensionState::parse("OnFire"), None);
    }

    #[test]
    fn parse_extension_state_codes() {
        assert_eq!(ExtensionState::parse("-2"), Some(ExtensionState::Removed));
        assert_eq!(ExtensionState::parse("0"), Some(ExtensionState::Idle));
        assert_eq!(ExtensionState::parse("9"), Some(ExtensionState::InUseRinging));
        assert_eq!(ExtensionState::parse("17"), Some(ExtensionState::InUseHold));
        assert_eq!(ExtensionState::parse("3"), None);
    }

    #[test]
    fn code_round_trip() {
        for code in [-2, -1, 0, 1, 2, 4, 8, 9, 16, 17] {
            let state = ExtensionState::from_code(code).unwrap();
            assert_eq!(state.code(), code);
        }
    }

    #[test]
    fn device_state_round_trip() {
        for name in [
            "UNKNOWN",
            "NOT_INUSE",
            "INUSE",
            "BUSY",
            "INVALID",
            "UNAVAILABLE",
            "RINGING",
            "RINGINUSE",
            "ONHOLD",
        ] {
            let state: DeviceState = name.parse().unwrap();
            assert_eq!(state.to_string(), name);
        }
    }

    #[test]
    fn device_state_parse_is_case_insensitive() {
        assert_eq!(
            "not_inuse".parse::<DeviceState>().unwrap(),
            DeviceState::NotInUse
        );
        assert!("SORT_OF_BUSY".parse::<DeviceState>().is_err());
    }

    #[test]
    fn extension_to_device_mapping() {
        let table = [
            (ExtensionState::Removed, DeviceState::Invalid),
            (ExtensionState::Deactivated, DeviceState::Unknown),
            (ExtensionState::Idle, DeviceState::NotInUse),
            (ExtensionState::InUse, DeviceState::InUse),
            (ExtensionState::Busy, DeviceState::Busy),
            (ExtensionState::Unavailable, DeviceState::Unavailable),
            (ExtensionState::Ringing, DeviceState::Ringing),
            (ExtensionState::InUseRinging, DeviceState::RingInUse),
            (ExtensionState::Hold, DeviceState::OnHold),
            (ExtensionState::InUseHold, DeviceState::OnHold),
        ];
        for (ext, dev) in table {
            assert_eq!(DeviceState::from(ext), dev);
        }
    }
}
