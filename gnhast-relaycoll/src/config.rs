use std::collections::HashSet;
use std::time::Duration;

use gnhast_client::config::{CollectorConfig, HubConfig, LogConfig};
use gnhast_client::device::{Device, DeviceType, Proto, SubType};
use gnhast_client::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::execution::{UID_PLACEHOLDER, VALUE_PLACEHOLDER};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelaycollConfig {
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub relaycoll: RelaycollSection,
    #[serde(default, rename = "relay")]
    pub relays: Vec<RelaySpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaycollSection {
    pub proto: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayKind {
    #[default]
    Switch,
    Dimmer,
}

/// One `[[relay]]` entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelaySpec {
    pub uid: String,
    pub name: String,
    #[serde(default)]
    pub kind: RelayKind,
    /// Program and arguments; `{uid}` and `{value}` are substituted per
    /// argument after splitting.
    pub command: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    10
}

impl RelaySpec {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn device(&self, proto: u16) -> Device {
        let devtype = match self.kind {
            RelayKind::Switch => DeviceType::Switch,
            RelayKind::Dimmer => DeviceType::Dimmer,
        };
        Device::new(&self.uid, &self.name, devtype, SubType::Switch).with_proto(Proto(proto))
    }

    fn validate(&self) -> Result<()> {
        let invalid = |what: &str| Error::Configuration(format!("relay {}: {what}", self.uid));
        if self.uid.is_empty() {
            return Err(Error::Configuration("relay.uid is required".to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(invalid("timeout_secs must be positive"));
        }
        let argv = shell_words::split(&self.command).map_err(|e| invalid(&format!("bad command: {e}")))?;
        match argv.first() {
            None => Err(invalid("command is empty")),
            Some(program) if program.contains(UID_PLACEHOLDER) || program.contains(VALUE_PLACEHOLDER) => {
                Err(invalid("the program itself cannot be a placeholder"))
            }
            Some(_) => Ok(()),
        }
    }
}

impl CollectorConfig for RelaycollConfig {
    const NAME: &'static str = "relaycoll";

    fn hub(&self) -> &HubConfig {
        &self.hub
    }

    fn log(&self) -> &LogConfig {
        &self.log
    }

    fn validate(&self) -> Result<()> {
        if self.relays.is_empty() {
            return Err(Error::Configuration("at least one [[relay]] is required".to_string()));
        }
        let mut seen = HashSet::new();
        for relay in &self.relays {
            relay.validate()?;
            if !seen.insert(relay.uid.as_str()) {
                return Err(Error::Configuration(format!("relay {} is declared twice", relay.uid)));
            }
        }
        Ok(())
    }
}
