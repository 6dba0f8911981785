use gnhast_client::alarm::{AlarmChannels, Severity};
use gnhast_client::config::{CollectorConfig, HubConfig, LogConfig};
use gnhast_client::{Error, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlarmConsoleConfig {
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub alarmconsole: AlarmConsoleSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlarmConsoleSection {
    /// Lowest severity the hub should send, 1 to 100
    pub minsev: u8,
    /// Channel names to listen on; empty listens on all of them
    pub channels: Vec<String>,
}

impl Default for AlarmConsoleSection {
    fn default() -> Self {
        Self {
            minsev: 1,
            channels: Vec::new(),
        }
    }
}

impl AlarmConsoleSection {
    pub fn min_severity(&self) -> Result<Severity> {
        Severity::new(self.minsev)
            .ok_or_else(|| Error::Configuration(format!("alarmconsole.minsev {} is above 100", self.minsev)))
    }

    pub fn channel_mask(&self) -> Result<AlarmChannels> {
        AlarmChannels::from_names(&self.channels).map_err(|e| Error::Configuration(format!("alarmconsole.channels: {e}")))
    }
}

impl CollectorConfig for AlarmConsoleConfig {
    const NAME: &'static str = "alarmconsole";

    fn hub(&self) -> &HubConfig {
        &self.hub
    }

    fn log(&self) -> &LogConfig {
        &self.log
    }

    fn validate(&self) -> Result<()> {
        self.alarmconsole.min_severity()?;
        self.alarmconsole.channel_mask()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_listens_everywhere() {
        let section = AlarmConsoleSection::default();
        assert_eq!(section.min_severity().unwrap().level(), 1);
        assert_eq!(section.channel_mask().unwrap(), AlarmChannels::ALL);
    }

    #[test]
    fn test_rejects_unknown_channel_and_severity() {
        let mut config = AlarmConsoleConfig::default();
        config.alarmconsole.channels = vec!["weather".into(), "basement".into()];
        assert!(matches!(config.validate(), Err(Error::Configuration(msg)) if msg.contains("basement")));

        config.alarmconsole.channels.clear();
        config.alarmconsole.minsev = 120;
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }
}
