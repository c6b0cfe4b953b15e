//! Extension-to-device mapping.
//!
//! Each server watches the extensions matching its configured pattern and
//! derives a device name from the substitution template, e.g. pattern
//! `^(\d+)$` with template `Custom:$0` turns extension `101` into device
//! `Custom:101`.

use regex::Regex;

use crate::error::{Error, Result};
use crate::state::{DeviceState, ExtensionState};

pub struct ExtensionMapper {
    pattern: Regex,
    device_format: String,
}

impl ExtensionMapper {
    pub fn new(pattern: &str, device_format: &str) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| Error::Config(format!("invalid extension pattern: {e}")))?;
        Ok(ExtensionMapper {
            pattern,
            device_format: device_format.to_string(),
        })
    }

    /// The device name for an extension, or `None` if the extension does
    /// not match the pattern.
    pub fn device_for(&self, exten: &str) -> Option<String> {
        if !self.pattern.is_match(exten) {
            return None;
        }
        Some(
            self.pattern
                .replace_all(exten, self.device_format.as_str())
                .into_owned(),
        )
    }

    /// Map one extension event to a device-state entry.
    ///
    /// Status tokens that parse to no known extension state map to
    /// [`DeviceState::Unknown`] rather than being dropped: the extension is
    /// being watched, its state just isn't representable.
    pub fn map_event(&self, exten: &str, status: &str) -> Option<(String, DeviceState)> {
        let device = self.device_for(exten)?;
        let state = ExtensionState::parse(status)
            .map(DeviceState::from)
            .unwrap_or(DeviceState::Unknown);
        Some((device, state))
    }
}
