//! Collector configuration
//!
//! Handles:
//! - hub connection and reconnect policy
//! - logging options
//! - per-collector sections, validated at load
//! - first-run generation of a default file

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub const DEFAULT_HUB_PORT: u16 = 2920;

/// Overrides the config file location when set
pub const CONFIG_PATH_ENV: &str = "GNHAST_CONFIG";

/// What to do when the hub connection drops mid-session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ReconnectPolicy {
    /// The drop is fatal; an operator or supervisor restarts the process
    #[default]
    Never,
    Retry { delay_secs: u64, max_attempts: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub hostname: String,
    pub port: u16,
    /// Name sent in the `client` message; defaults to the collector name
    pub client_name: Option<String>,
    pub reconnect: ReconnectPolicy,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            hostname: "127.0.0.1".to_string(),
            port: DEFAULT_HUB_PORT,
            client_name: None,
            reconnect: ReconnectPolicy::Never,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub debug: bool,
    /// tracing filter directive, e.g. `info` or `gnhast_client=debug`
    pub level: Option<String>,
    /// Append to this file instead of stdout; reopened on SIGHUP
    pub logfile: Option<PathBuf>,
}

/// A collector's whole config file
pub trait CollectorConfig: Serialize + DeserializeOwned + Default {
    /// Collector name, also the config file stem
    const NAME: &'static str;

    fn hub(&self) -> &HubConfig;

    fn log(&self) -> &LogConfig;

    /// Checks required settings before the session starts.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    fn client_name(&self) -> String {
        self.hub()
            .client_name
            .clone()
            .unwrap_or_else(|| Self::NAME.to_string())
    }
}

#[derive(Debug)]
pub enum ConfigLoad<T> {
    Loaded(T),
    /// No file existed; a default one was written at this path
    FirstRun(PathBuf),
}

/// `$GNHAST_CONFIG`, else `<config dir>/gnhast/<collector>.toml`.
pub fn config_file_path(collector: &str) -> Result<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        if !path.is_empty() {
            return Ok(PathBuf::from(path));
        }
    }

    let mut path = dirs::config_dir()
        .ok_or_else(|| Error::Configuration("could not find config directory".to_string()))?;
    path.push("gnhast");
    path.push(format!("{collector}.toml"));
    Ok(path)
}

/// Loads the collector config from its usual location, honouring `.env`.
pub async fn load_or_init<T: CollectorConfig>() -> Result<ConfigLoad<T>> {
    dotenvy::dotenv().ok();
    let path = config_file_path(T::NAME)?;
    load_from(&path).await
}

pub async fn load_from<T: CollectorConfig>(path: &Path) -> Result<ConfigLoad<T>> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        save(&T::default(), path).await?;
        return Ok(ConfigLoad::FirstRun(path.to_path_buf()));
    }

    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::Configuration(format!("cannot read {}: {e}", path.display())))?;
    let config: T = toml::from_str(&content)
        .map_err(|e| Error::Configuration(format!("invalid {}: {e}", path.display())))?;
    config.validate()?;
    Ok(ConfigLoad::Loaded(config))
}

pub async fn save<T: Serialize>(config: &T, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::Configuration(format!("cannot create {}: {e}", parent.display())))?;
    }

    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Configuration(format!("cannot serialize config: {e}")))?;
    tokio::fs::write(path, content)
        .await
        .map_err(|e| Error::Configuration(format!("cannot write {}: {e}", path.display())))
}

/// Fails with a configuration error when a required identifier is blank.
pub fn require(section: &str, key: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::Configuration(format!("{section}.{key} is not set")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct ProbeConfig {
        #[serde(default)]
        hub: HubConfig,
        #[serde(default)]
        log: LogConfig,
        #[serde(default)]
        probe: ProbeSection,
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct ProbeSection {
        uid: String,
    }

    impl CollectorConfig for ProbeConfig {
        const NAME: &'static str = "probe";

        fn hub(&self) -> &HubConfig {
            &self.hub
        }

        fn log(&self) -> &LogConfig {
            &self.log
        }

        fn validate(&self) -> Result<()> {
            require("probe", "uid", &self.probe.uid)
        }
    }

    #[test]
    fn test_defaults() {
        let hub = HubConfig::default();
        assert_eq!(hub.port, 2920);
        assert_eq!(hub.reconnect, ReconnectPolicy::Never);
        assert_eq!(ProbeConfig::default().client_name(), "probe");
    }

    #[test]
    fn test_reconnect_policy_from_toml() {
        let hub: HubConfig = toml::from_str(
            r#"
            hostname = "hub.lan"
            [reconnect]
            mode = "retry"
            delay_secs = 10
            max_attempts = 6
            "#,
        )
        .unwrap();
        assert_eq!(hub.hostname, "hub.lan");
        assert_eq!(hub.port, DEFAULT_HUB_PORT);
        assert_eq!(
            hub.reconnect,
            ReconnectPolicy::Retry {
                delay_secs: 10,
                max_attempts: 6
            }
        );
    }

    #[tokio::test]
    async fn test_first_run_writes_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("probe.toml");

        let first = load_from::<ProbeConfig>(&path).await.unwrap();
        assert!(matches!(first, ConfigLoad::FirstRun(ref p) if p == &path));
        assert!(path.exists());

        // the generated file still needs the operator's uid
        let second = load_from::<ProbeConfig>(&path).await.unwrap_err();
        assert!(matches!(second, Error::Configuration(msg) if msg.contains("probe.uid")));
    }

    #[tokio::test]
    async fn test_loads_edited_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe.toml");
        tokio::fs::write(
            &path,
            "[hub]\nhostname = \"10.0.0.2\"\nclient_name = \"probe-2\"\n\n[probe]\nuid = \"28.0A1\"\n",
        )
        .await
        .unwrap();

        let ConfigLoad::Loaded(config) = load_from::<ProbeConfig>(&path).await.unwrap() else {
            panic!("expected a loaded config");
        };
        assert_eq!(config.probe.uid, "28.0A1");
        assert_eq!(config.hub.hostname, "10.0.0.2");
        assert_eq!(config.client_name(), "probe-2");
        assert!(!config.log.debug);
    }

    #[tokio::test]
    async fn test_invalid_toml_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe.toml");
        tokio::fs::write(&path, "[hub\nport = ").await.unwrap();
        let err = load_from::<ProbeConfig>(&path).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(err.is_fatal());
    }
}
