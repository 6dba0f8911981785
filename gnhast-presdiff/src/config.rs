use chrono::Duration;
use gnhast_client::config::{require, CollectorConfig, HubConfig, LogConfig};
use gnhast_client::monitor::{Correlation, CorrelationMonitor};
use gnhast_client::{Error, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PresdiffConfig {
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub presdiff: PresdiffSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresdiffSection {
    /// Feed rate requested from the hub, seconds
    pub update: u32,
    pub refuid: String,
    pub compuid: String,
    pub diffuid: String,
    pub diff_name: String,
    /// A feed older than `skew_factor * update` seconds is stale
    pub skew_factor: u32,
    pub proto: u16,
}

impl Default for PresdiffSection {
    fn default() -> Self {
        Self {
            update: 5,
            refuid: String::new(),
            compuid: String::new(),
            diffuid: "presdiff".to_string(),
            diff_name: "Pressure Differential".to_string(),
            skew_factor: 5,
            proto: 0,
        }
    }
}

impl PresdiffSection {
    pub fn max_skew(&self) -> Duration {
        Duration::seconds(i64::from(self.update) * i64::from(self.skew_factor))
    }

    pub fn correlation(&self) -> Correlation {
        Correlation {
            reference: self.refuid.clone(),
            comparison: self.compuid.clone(),
            derived: self.diffuid.clone(),
            max_skew: self.max_skew(),
        }
    }
}

impl CollectorConfig for PresdiffConfig {
    const NAME: &'static str = "presdiff";

    fn hub(&self) -> &HubConfig {
        &self.hub
    }

    fn log(&self) -> &LogConfig {
        &self.log
    }

    fn validate(&self) -> Result<()> {
        let section = &self.presdiff;
        require("presdiff", "refuid", &section.refuid)?;
        require("presdiff", "compuid", &section.compuid)?;
        require("presdiff", "diffuid", &section.diffuid)?;
        if section.update == 0 || section.skew_factor == 0 {
            return Err(Error::Configuration(
                "presdiff.update and presdiff.skew_factor must be positive".to_string(),
            ));
        }
        CorrelationMonitor::new(section.correlation()).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gnhast_client::config::{load_from, ConfigLoad};

    #[tokio::test]
    async fn test_first_run_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("presdiff.toml");
        let loaded = load_from::<PresdiffConfig>(&path).await.unwrap();
        assert!(matches!(loaded, ConfigLoad::FirstRun(_)));

        // the generated file still needs the two feeds
        let err = load_from::<PresdiffConfig>(&path).await.unwrap_err();
        assert!(err.to_string().contains("presdiff.refuid"));
    }

    #[test]
    fn test_skew_bound_follows_update_rate() {
        let section = PresdiffSection {
            update: 5,
            skew_factor: 5,
            ..Default::default()
        };
        assert_eq!(section.max_skew(), Duration::seconds(25));
    }

    #[test]
    fn test_validation() {
        let mut config = PresdiffConfig::default();
        config.presdiff.refuid = "outside".into();
        config.presdiff.compuid = "inside".into();
        assert!(config.validate().is_ok());

        config.presdiff.compuid = "outside".into();
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }
}
