//! Sensor station: burn-in, then steady polling
//!
//! The gas heater needs a warm-up before its resistance means anything. The
//! station samples it for the burn-in period, derives the gas baseline, and
//! only then starts the periodic poller that publishes every channel.

use std::sync::Arc;

use gnhast_client::device::{Device, DeviceType, Proto, SubType, TempScale};
use gnhast_client::sampler::Stabilizer;
use gnhast_client::sensor::SensorSource;
use gnhast_client::{CancellationToken, Scheduler, Session};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::air_quality::AirQuality;
use crate::config::GascollSection;
use crate::sensor::EnvReading;

pub const GAS: &str = "gas";
pub const HUMID: &str = "humid";
pub const TEMP: &str = "temp";
pub const PRES: &str = "pres";
pub const AIR_QUALITY: &str = "aq";

/// Declares the devices this collector owns.
pub fn declare_devices(session: &Session, section: &GascollSection) {
    let channels = [
        (GAS, "Gas Sensor", SubType::Number),
        (HUMID, "Humidity Sensor", SubType::Humid),
        (TEMP, "Temperature Sensor", SubType::Temp),
        (PRES, "Pressure Sensor", SubType::Pressure),
        (AIR_QUALITY, "Air Quality", SubType::Percentage),
    ];
    for (channel, name, subtype) in channels {
        session.declare(
            Device::new(section.uid(channel), name, DeviceType::Sensor, subtype).with_proto(Proto(section.proto)),
        );
    }
}

pub struct Station<S> {
    session: Session,
    sensor: Arc<Mutex<S>>,
    settings: Arc<GascollSection>,
}

impl<S> Clone for Station<S> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            sensor: self.sensor.clone(),
            settings: self.settings.clone(),
        }
    }
}

impl<S> Station<S>
where
    S: SensorSource<Reading = EnvReading> + 'static,
{
    pub fn new(session: Session, sensor: S, settings: &GascollSection) -> Self {
        Self {
            session,
            sensor: Arc::new(Mutex::new(sensor)),
            settings: Arc::new(settings.clone()),
        }
    }

    /// Runs the burn-in. `None` when no baseline could be computed, in which
    /// case the collector stays unhealthy and publishes no air quality.
    pub async fn warm_up(&self, cancel: &CancellationToken) -> Option<AirQuality> {
        let settings = &self.settings;
        let mut sensor = self.sensor.lock().await;
        let result = Stabilizer::new(settings.burn_in())
            .with_window(settings.baseline_window)
            .run(&mut *sensor, |reading| Some(reading.gas), cancel)
            .await;

        if result.cancelled {
            return None;
        }
        match result.baseline {
            Some(baseline) => Some(AirQuality {
                gas_baseline: baseline.value,
                hum_baseline: settings.hum_baseline,
                hum_weighting: settings.hum_weighting,
            }),
            None => {
                self.session
                    .health()
                    .mark_unhealthy("no gas baseline after burn-in");
                None
            }
        }
    }

    /// One steady-state poll: publish every channel, or flag the sensor.
    pub async fn poll_once(&self, index: Option<AirQuality>) {
        let reading = self.sensor.lock().await.try_read().await;
        let Some(reading) = reading else {
            warn!("sensors not operating");
            self.session.health().mark_unhealthy("sensor read failed");
            return;
        };

        let settings = &self.settings;
        let temperature = TempScale::Celsius.convert(reading.temperature + settings.temp_offset, settings.tscale);
        debug!(
            gas = reading.gas,
            humidity = reading.humidity,
            temperature,
            pressure = reading.pressure,
            "sensor reading"
        );

        let mut values = vec![
            (GAS, reading.gas.round()),
            (HUMID, reading.humidity),
            (TEMP, temperature),
            (PRES, reading.pressure),
        ];
        if let Some(index) = index {
            values.push((AIR_QUALITY, index.score(reading.gas, reading.humidity)));
        }
        for (channel, value) in values {
            let uid = settings.uid(channel);
            if let Err(e) = self.session.publish_value(&uid, value) {
                warn!(%uid, error = %e, "cannot publish reading");
            }
        }

        if index.is_some() {
            self.session.health().mark_healthy();
        }
    }

    /// Burn-in on the scheduler, then the periodic poller. Both stop with it.
    pub fn spawn(self, scheduler: &Scheduler) {
        let tasks = scheduler.clone();
        scheduler.spawn(async move {
            let token = tasks.token();
            let index = self.warm_up(&token).await;
            if token.is_cancelled() {
                return;
            }

            info!(baseline = index.map(|i| i.gas_baseline), "burn-in complete, starting poller");
            let period = self.settings.poll_interval();
            tasks.spawn_periodic("poll", period, move || {
                let station = self.clone();
                async move { station.poll_once(index).await }
            });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gnhast_client::client::HubClient;
    use gnhast_client::codec::Message;
    use gnhast_client::device::DeviceData;
    use gnhast_devkit::ScriptedSensor;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    const READING: EnvReading = EnvReading {
        gas: 100_000.0,
        humidity: 40.0,
        temperature: 24.0,
        pressure: 1013.0,
    };

    fn section() -> GascollSection {
        GascollSection {
            burn_in: 10,
            baseline_window: 5,
            update: 5,
            uid_prefix: Some("t-".into()),
            ..Default::default()
        }
    }

    fn session() -> (Session, UnboundedReceiver<Message>) {
        let (client, outbound) = HubClient::detached();
        let session = Session::new(client);
        declare_devices(&session, &section());
        (session, outbound)
    }

    fn drain(outbound: &mut UnboundedReceiver<Message>) -> Vec<(String, DeviceData)> {
        let mut updates = Vec::new();
        while let Ok(message) = outbound.try_recv() {
            if let Message::Update(upd) = message {
                updates.push((upd.uid, upd.data));
            }
        }
        updates
    }

    #[tokio::test(start_paused = true)]
    async fn test_burn_in_then_polls_every_channel() {
        let (session, mut outbound) = session();
        let sensor = ScriptedSensor::constant(READING);
        let scheduler = Scheduler::new(&CancellationToken::new());
        Station::new(session.clone(), sensor.clone(), &section()).spawn(&scheduler);

        tokio::time::sleep(Duration::from_millis(9_500)).await;
        assert_eq!(sensor.reads(), 10);
        assert!(drain(&mut outbound).is_empty());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sensor.reads(), 11);
        assert_eq!(
            drain(&mut outbound),
            vec![
                ("t-gas".to_string(), DeviceData::Number(100_000.0)),
                ("t-humid".to_string(), DeviceData::Humidity(40.0)),
                ("t-temp".to_string(), DeviceData::Temperature(22.0)),
                ("t-pres".to_string(), DeviceData::Pressure(1013.0)),
                (
                    "t-aq".to_string(),
                    DeviceData::Reading {
                        subtype: SubType::Percentage,
                        value: 100.0
                    }
                ),
            ]
        );
        assert!(session.health().is_healthy());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(drain(&mut outbound).len(), 5);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_baseline_runs_without_air_quality() {
        let (session, mut outbound) = session();
        let sensor = ScriptedSensor::new([]);
        let scheduler = Scheduler::new(&CancellationToken::new());
        Station::new(session.clone(), sensor.clone(), &section()).spawn(&scheduler);

        tokio::time::sleep(Duration::from_millis(10_500)).await;
        assert!(!session.health().is_healthy());
        assert!(drain(&mut outbound).is_empty());

        sensor.set_fallback(Some(READING));
        tokio::time::sleep(Duration::from_secs(5)).await;
        let updates = drain(&mut outbound);
        assert_eq!(updates.len(), 4);
        assert!(updates.iter().all(|(uid, _)| uid != "t-aq"));
        assert!(!session.health().is_healthy());
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_poll_marks_unhealthy() {
        let (session, _outbound) = session();
        let sensor = ScriptedSensor::constant(READING);
        let station = Station::new(session.clone(), sensor.clone(), &section());
        let index = station.warm_up(&CancellationToken::new()).await;
        assert!(index.is_some());

        station.poll_once(index).await;
        assert!(session.health().is_healthy());
        sensor.set_fallback(None);
        station.poll_once(index).await;
        assert!(!session.health().is_healthy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_burn_in() {
        let (session, mut outbound) = session();
        let sensor = ScriptedSensor::constant(READING);
        let scheduler = Scheduler::new(&CancellationToken::new());
        Station::new(session, sensor.clone(), &section()).spawn(&scheduler);

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        scheduler.shutdown().await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(sensor.reads(), 4);
        assert!(drain(&mut outbound).is_empty());
    }
}
