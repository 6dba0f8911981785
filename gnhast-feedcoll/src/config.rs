use std::path::PathBuf;
use std::time::Duration;

use gnhast_client::config::{CollectorConfig, HubConfig, LogConfig};
use gnhast_client::{Error, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedcollConfig {
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub feedcoll: FeedcollSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedcollSection {
    /// Feed rate in seconds; 0 subscribes to every change instead
    pub feed: u32,
    /// Seconds between device list refreshes
    pub recheck: u64,
    /// JSON-lines file receiving one point per update
    pub sink_path: PathBuf,
}

impl Default for FeedcollSection {
    fn default() -> Self {
        Self {
            feed: 0,
            recheck: 3600,
            sink_path: default_sink_path(),
        }
    }
}

impl FeedcollSection {
    pub fn recheck_interval(&self) -> Duration {
        Duration::from_secs(self.recheck)
    }
}

fn default_sink_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("gnhast")
        .join("feedcoll.jsonl")
}

impl CollectorConfig for FeedcollConfig {
    const NAME: &'static str = "feedcoll";

    fn hub(&self) -> &HubConfig {
        &self.hub
    }

    fn log(&self) -> &LogConfig {
        &self.log
    }

    fn validate(&self) -> Result<()> {
        if self.feedcoll.recheck == 0 {
            return Err(Error::Configuration("feedcoll.recheck must be positive".to_string()));
        }
        if self.feedcoll.sink_path.as_os_str().is_empty() {
            return Err(Error::Configuration("feedcoll.sink_path is required".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_use_continuous_feed() {
        let config = FeedcollConfig::default();
        assert_eq!(config.feedcoll.feed, 0);
        assert_eq!(config.feedcoll.recheck_interval(), Duration::from_secs(3600));
        assert!(config.feedcoll.sink_path.ends_with("gnhast/feedcoll.jsonl"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_recheck_is_rejected() {
        let mut config = FeedcollConfig::default();
        config.feedcoll.recheck = 0;
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }
}
