use std::path::PathBuf;
use std::time::Duration;

use gnhast_client::config::{CollectorConfig, HubConfig, LogConfig};
use gnhast_client::device::TempScale;
use gnhast_client::{Error, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GascollConfig {
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub gascoll: GascollSection,
    #[serde(default)]
    pub sensor: SensorSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GascollSection {
    /// Poll interval after burn-in, seconds
    pub update: u64,
    /// Gas heater warm-up, seconds
    pub burn_in: u64,
    pub baseline_window: usize,
    pub tscale: TempScale,
    /// Added to the raw temperature, which reads high while the heater runs
    pub temp_offset: f64,
    /// Defaults to a prefix naming the sensor, so several collectors can
    /// share a hub
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid_prefix: Option<String>,
    pub proto: u16,
    /// Ideal relative humidity for the air quality score
    pub hum_baseline: f64,
    pub hum_weighting: f64,
}

impl Default for GascollSection {
    fn default() -> Self {
        Self {
            update: 5,
            burn_in: 300,
            baseline_window: 50,
            tscale: TempScale::Celsius,
            temp_offset: -2.0,
            uid_prefix: None,
            proto: 35,
            hum_baseline: 40.0,
            hum_weighting: 0.25,
        }
    }
}

impl GascollSection {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.update)
    }

    pub fn burn_in(&self) -> Duration {
        Duration::from_secs(self.burn_in)
    }

    pub fn uid(&self, channel: &str) -> String {
        format!("{}{channel}", self.uid_prefix.as_deref().unwrap_or_default())
    }
}

/// Channel files of an IIO environment sensor, values multiplied by their
/// scale on read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorSection {
    pub device_dir: PathBuf,
    pub gas_file: String,
    pub gas_scale: f64,
    pub humidity_file: String,
    pub humidity_scale: f64,
    pub temperature_file: String,
    pub temperature_scale: f64,
    pub pressure_file: String,
    pub pressure_scale: f64,
}

impl Default for SensorSection {
    fn default() -> Self {
        Self {
            device_dir: PathBuf::from("/sys/bus/iio/devices/iio:device0"),
            gas_file: "in_resistance_input".to_string(),
            gas_scale: 1.0,
            humidity_file: "in_humidityrelative_input".to_string(),
            humidity_scale: 0.001,
            temperature_file: "in_temp_input".to_string(),
            temperature_scale: 0.001,
            // kPa to hPa
            pressure_file: "in_pressure_input".to_string(),
            pressure_scale: 10.0,
        }
    }
}

impl SensorSection {
    /// `iio:device0` gives `iio-device0-`.
    pub fn uid_prefix(&self) -> String {
        let name = self
            .device_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| GascollConfig::NAME.to_string());
        let tag: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        format!("{tag}-")
    }
}

impl GascollConfig {
    /// Fills in the uid prefix from the sensor when none is configured.
    pub fn with_sensor_prefix(mut self) -> Self {
        if self.gascoll.uid_prefix.is_none() {
            self.gascoll.uid_prefix = Some(self.sensor.uid_prefix());
        }
        self
    }
}

impl CollectorConfig for GascollConfig {
    const NAME: &'static str = "gascoll";

    fn hub(&self) -> &HubConfig {
        &self.hub
    }

    fn log(&self) -> &LogConfig {
        &self.log
    }

    fn validate(&self) -> Result<()> {
        let section = &self.gascoll;
        if section.update == 0 {
            return Err(Error::Configuration("gascoll.update must be positive".to_string()));
        }
        if section.baseline_window == 0 {
            return Err(Error::Configuration("gascoll.baseline_window must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&section.hum_weighting) {
            return Err(Error::Configuration("gascoll.hum_weighting must be within 0..1".to_string()));
        }
        if !(section.hum_baseline > 0.0 && section.hum_baseline < 100.0) {
            return Err(Error::Configuration("gascoll.hum_baseline must be within 0..100".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gnhast_client::config::{load_from, ConfigLoad};

    #[tokio::test]
    async fn test_parses_partial_file() {
        let config = load(
            r#"
            [gascoll]
            update = 10
            tscale = "F"
            uid_prefix = "attic-"

            [sensor]
            device_dir = "/tmp/iio"
            "#,
        )
        .await;
        assert_eq!(config.gascoll.update, 10);
        assert_eq!(config.gascoll.tscale, TempScale::Fahrenheit);
        assert_eq!(config.gascoll.uid("gas"), "attic-gas");
        assert_eq!(config.gascoll.burn_in, 300);
        assert_eq!(config.sensor.gas_file, "in_resistance_input");
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_default_uids_name_the_sensor() {
        let first = load("[sensor]\ndevice_dir = \"/sys/bus/iio/devices/iio:device0\"\n")
            .await
            .with_sensor_prefix();
        let second = load("[sensor]\ndevice_dir = \"/sys/bus/iio/devices/iio:device1\"\n")
            .await
            .with_sensor_prefix();
        assert_eq!(first.gascoll.uid("gas"), "iio-device0-gas");
        assert_eq!(second.gascoll.uid("gas"), "iio-device1-gas");

        let named = load("[gascoll]\nuid_prefix = \"attic-\"\n").await.with_sensor_prefix();
        assert_eq!(named.gascoll.uid("temp"), "attic-temp");
    }

    #[test]
    fn test_rejects_bad_weighting() {
        let mut config = GascollConfig::default();
        config.gascoll.hum_weighting = 1.5;
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    async fn load(text: &str) -> GascollConfig {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gascoll.toml");
        std::fs::write(&path, text).unwrap();
        match load_from::<GascollConfig>(&path).await.unwrap() {
            ConfigLoad::Loaded(config) => config,
            other => panic!("unexpected {other:?}"),
        }
    }
}
