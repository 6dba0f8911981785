use std::path::{Path, PathBuf};

use async_trait::async_trait;
use gnhast_client::sensor::SensorSource;
use tracing::debug;

use crate::config::SensorSection;

/// One complete reading, in C, %RH, hPa and ohms
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvReading {
    pub gas: f64,
    pub humidity: f64,
    pub temperature: f64,
    pub pressure: f64,
}

struct Channel {
    path: PathBuf,
    scale: f64,
}

impl Channel {
    fn new(dir: &Path, file: &str, scale: f64) -> Self {
        Self {
            path: dir.join(file),
            scale,
        }
    }

    async fn read(&self) -> Option<f64> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "channel not readable");
                return None;
            }
        };
        match raw.trim().parse::<f64>() {
            Ok(value) => Some(value * self.scale),
            Err(e) => {
                debug!(path = %self.path.display(), raw = raw.trim(), error = %e, "channel value not numeric");
                None
            }
        }
    }
}

/// Environment sensor exposed by the kernel IIO driver as one file per
/// channel. A read only succeeds when every channel does.
pub struct IioSensor {
    gas: Channel,
    humidity: Channel,
    temperature: Channel,
    pressure: Channel,
}

impl IioSensor {
    pub fn new(config: &SensorSection) -> Self {
        let dir = &config.device_dir;
        Self {
            gas: Channel::new(dir, &config.gas_file, config.gas_scale),
            humidity: Channel::new(dir, &config.humidity_file, config.humidity_scale),
            temperature: Channel::new(dir, &config.temperature_file, config.temperature_scale),
            pressure: Channel::new(dir, &config.pressure_file, config.pressure_scale),
        }
    }
}

#[async_trait]
impl SensorSource for IioSensor {
    type Reading = EnvReading;

    async fn try_read(&mut self) -> Option<EnvReading> {
        Some(EnvReading {
            gas: self.gas.read().await?,
            humidity: self.humidity.read().await?,
            temperature: self.temperature.read().await?,
            pressure: self.pressure.read().await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reads_scaled_channels() {
        let dir = tempfile::tempdir().unwrap();
        let config = SensorSection {
            device_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        std::fs::write(dir.path().join("in_resistance_input"), "152340\n").unwrap();
        std::fs::write(dir.path().join("in_humidityrelative_input"), "41250\n").unwrap();
        std::fs::write(dir.path().join("in_temp_input"), "23480\n").unwrap();
        std::fs::write(dir.path().join("in_pressure_input"), "101.325\n").unwrap();

        let mut sensor = IioSensor::new(&config);
        let reading = sensor.try_read().await.unwrap();
        assert_eq!(reading.gas, 152_340.0);
        assert!((reading.humidity - 41.25).abs() < 1e-9);
        assert!((reading.temperature - 23.48).abs() < 1e-9);
        assert!((reading.pressure - 1013.25).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_missing_channel_fails_the_read() {
        let dir = tempfile::tempdir().unwrap();
        let config = SensorSection {
            device_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        std::fs::write(dir.path().join("in_resistance_input"), "152340\n").unwrap();
        std::fs::write(dir.path().join("in_humidityrelative_input"), "busy\n").unwrap();

        assert_eq!(IioSensor::new(&config).try_read().await, None);
    }
}
