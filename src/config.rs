//! Configuration: a TOML file with one `[[server]]` table per PBX.
//!
//! ```toml
//! [[server]]
//! name = "pbx-east"
//! host = "10.0.1.10"
//! username = "sync"
//! secret = "s3cret"
//! extension_pattern = '^(\d+)$'
//!
//! [[server]]
//! name = "pbx-west"
//! host = "10.0.2.10"
//! port = 8089
//! username = "sync"
//! secret = "s3cret"
//! extension_pattern = '^1\d\d$'
//! device_format = "Custom:lamp$0"
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use url::Url;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default, rename = "server")]
    pub servers: Vec<ServerConfig>,
}

/// Connection and mapping settings for one Asterisk server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Unique key identifying this server in logs and errors.
    pub name: String,

    pub host: String,

    /// HTTP port of the AMI web interface.
    #[serde(default = "default_port")]
    pub port: u16,

    /// URL path prefix in front of `/rawman`.
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Per-request timeout in seconds. Also bounds the `WaitEvent` long poll.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Seconds to sleep before reconnecting or re-issuing a failed write.
    #[serde(default = "default_retry_interval")]
    pub retry_interval: u64,

    pub username: String,
    pub secret: String,

    /// Extensions not matching this pattern are ignored.
    pub extension_pattern: String,

    /// Substitution template producing the device name; `$0` is the whole
    /// match, `$1`... are capture groups.
    #[serde(default = "default_device_format")]
    pub device_format: String,
}

fn default_port() -> u16 {
    8088
}
fn default_prefix() -> String {
    "asterisk".into()
}
fn default_timeout() -> u64 {
    45
}
fn default_retry_interval() -> u64 {
    30
}
fn default_device_format() -> String {
    "Custom:$0".into()
}

impl ServerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval)
    }

    /// The `rawman` endpoint URL for this server.
    pub fn rawman_url(&self) -> Result<Url> {
        let raw = format!(
            "http://{}:{}/{}/rawman",
            self.host,
            self.port,
            self.prefix.trim_matches('/')
        );
        Url::parse(&raw).map_err(|e| Error::Config(format!("server '{}': bad URL {raw}: {e}", self.name)))
    }

    fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(Error::Config(format!("server '{}': {msg}", self.name)));
        if self.name.trim().is_empty() {
            return Err(Error::Config("server with empty name".into()));
        }
        if self.host.trim().is_empty() {
            return fail("host must not be empty".into());
        }
        if self.timeout == 0 {
            return fail("timeout must be positive".into());
        }
        if self.retry_interval == 0 {
            return fail("retry_interval must be positive".into());
        }
        if let Err(e) = Regex::new(&self.extension_pattern) {
            return fail(format!("invalid extension_pattern: {e}"));
        }
        self.rawman_url()?;
        Ok(())
    }
}

impl Config {
    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        let config: Config =
            toml::from_str(&text).map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.servers.is_empty() {
            return Err(Error::Config("no servers configured".into()));
        }
        let mut seen = HashSet::new();
        for server in &self.servers {
            server.validate()?;
            if !seen.insert(server.name.as_str()) {
                return Err(Error::Config(format!(
                    "duplicate server name '{}'",
                    server.name
                )));
            }
        }
        Ok(())
    }
}
