//! AMI client over the HTTP `rawman` endpoint.
//!
//! One client per server session. Every operation is a single HTTP GET
//! `http://host:port/prefix/rawman?action=Name&Key=Value...`, bounded by the
//! server's configured timeout and cancellable through the session token.

use async_trait::async_trait;
use log::debug;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::mapping::ExtensionMapper;
use crate::protocol::{self, ResultSet};
use crate::state::{DeviceState, DeviceStates};

/// The write seam between the forwarder and the PBX. Implemented by
/// [`AmiClient`]; tests substitute scripted writers.
#[async_trait]
pub trait StateWriter: Send + Sync {
    async fn write_state(&self, device: &str, state: DeviceState) -> Result<()>;
}

pub struct AmiClient {
    name: String,
    username: String,
    secret: String,
    base: Url,
    http: reqwest::Client,
    mapper: ExtensionMapper,
    cancel: CancellationToken,
}

impl AmiClient {
    pub fn new(config: &ServerConfig, cancel: CancellationToken) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;
        Ok(AmiClient {
            name: config.name.clone(),
            username: config.username.clone(),
            secret: config.secret.clone(),
            base: config.rawman_url()?,
            http,
            mapper: ExtensionMapper::new(&config.extension_pattern, &config.device_format)?,
            cancel,
        })
    }

    fn action_url(&self, action: &str, params: &[(&str, &str)]) -> Url {
        let mut url = self.base.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("action", action);
            for (key, value) in params {
                query.append_pair(key, value);
            }
        }
        url
    }

    async fn fetch(&self, url: Url) -> Result<String> {
        let response = self.http.get(url).send().await?.error_for_status()?;
        Ok(response.text().await?)
    }

    /// Issue one action and return the raw body. Aborts with
    /// [`Error::Cancelled`] as soon as the session token fires.
    async fn request(&self, action: &str, params: &[(&str, &str)]) -> Result<String> {
        let url = self.action_url(action, params);
        debug!("[{}] action {action}", self.name);
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            result = self.fetch(url) => result,
        }
    }

    /// Authenticate the session. Protocol failures surface as
    /// [`Error::Auth`].
    pub async fn login(&self) -> Result<()> {
        let body = self
            .request(
                "Login",
                &[("Username", &self.username), ("Secret", &self.secret)],
            )
            .await?;
        protocol::parse_response(&body, "Login").map_err(|e| match e {
            Error::Protocol { message } => Error::Auth { message },
            other => other,
        })?;
        Ok(())
    }

    /// End the session. Not wired to the cancellation token: teardown runs
    /// after cancellation has fired. Still bounded by the HTTP timeout.
    pub async fn logoff(&self) -> Result<()> {
        let url = self.action_url("Logoff", &[]);
        debug!("[{}] action Logoff", self.name);
        let body = self.fetch(url).await?;
        protocol::parse_response(&body, "Logoff")?;
        Ok(())
    }

    /// Liveness probe; expects `Response: Pong`.
    pub async fn ping(&self) -> Result<()> {
        let body = self.request("Ping", &[]).await?;
        protocol::parse_response(&body, "Ping")?;
        Ok(())
    }

    /// Enumerate the server's current device states.
    ///
    /// The parameterless `DeviceStateChange` action lists every known
    /// device. Only events actually named `DeviceStateChange` are kept;
    /// when a device repeats, the last occurrence wins.
    pub async fn list_device_states(&self) -> Result<DeviceStates> {
        let body = self.request("DeviceStateChange", &[]).await?;
        let events = protocol::parse_enumeration(&body, "DeviceStateChange")?;
        let mut states = DeviceStates::new();
        for event in events {
            match event.event_name()? {
                Some(name) if name.eq_ignore_ascii_case("DeviceStateChange") => {}
                _ => continue,
            }
            let device = event
                .field("Device")?
                .ok_or_else(|| Error::protocol("DeviceStateChange event missing Device"))?;
            let state: DeviceState = event
                .field("State")?
                .ok_or_else(|| Error::protocol("DeviceStateChange event missing State"))?
                .parse()?;
            states.insert(device.to_string(), state);
        }
        Ok(states)
    }

    /// Enumerate extension states, mapped through the extension pattern.
    pub async fn list_extension_states(&self) -> Result<DeviceStates> {
        let body = self.request("ExtensionStateList", &[]).await?;
        let events = protocol::parse_enumeration(&body, "ExtensionStateList")?;
        self.extension_events_to_states(events)
    }

    /// Long-poll for extension changes since the last call.
    ///
    /// Blocks server-side up to the configured timeout; an empty result is
    /// normal and means nothing changed.
    pub async fn wait_for_extension_changes(&self) -> Result<DeviceStates> {
        let body = self.request("WaitEvent", &[]).await?;
        let events = protocol::parse_enumeration(&body, "WaitEvent")?;
        self.extension_events_to_states(events)
    }

    /// Write one device state via `SetVar DEVICE_STATE(device)=state`.
    pub async fn set_device_state(&self, device: &str, state: DeviceState) -> Result<()> {
        let variable = format!("DEVICE_STATE({device})");
        let body = self
            .request(
                "SetVar",
                &[("Variable", &variable), ("Value", state.as_str())],
            )
            .await?;
        protocol::parse_response(&body, "SetVar")?;
        Ok(())
    }

    fn extension_events_to_states(&self, events: Vec<ResultSet>) -> Result<DeviceStates> {
        let mut states = DeviceStates::new();
        for event in events {
            let Some(exten) = event.field("Exten")? else {
                continue;
            };
            let status = event.field("Status")?.unwrap_or("");
            if let Some((device, state)) = self.mapper.map_event(exten, status) {
                states.insert(device, state);
            }
        }
        Ok(states)
    }
}

#[async_trait]
impl StateWriter for AmiClient {
    async fn write_state(&self, device: &str, state: DeviceState) -> Result<()> {
        self.set_device_state(device, state).await
    }
}
