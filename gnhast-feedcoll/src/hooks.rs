use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gnhast_client::device::Device;
use gnhast_client::hooks::CollectorHooks;
use gnhast_client::sink::{write_best_effort, Point, Sink};
use gnhast_client::Session;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

/// Builds the sink point for a device that has data. The measurement is the
/// wire field of the value, so dimmers land under `dimmer`.
pub fn point_for(device: &Device, at: DateTime<Utc>) -> Option<Point> {
    let value = device.value()?;
    let mut point = Point::new(device.data_arg(), device.last_update.unwrap_or(at))
        .tag("id", &device.uid)
        .tag("name", &device.name)
        .tag("type", device.devtype.name())
        .tag("proto", device.proto.0.to_string())
        .field("data", value);
    for (key, tag) in &device.tags {
        point = point.tag(key, tag);
    }
    Some(point)
}

/// Subscribes to every device the hub announces and forwards its updates.
pub struct FeedHooks {
    sink: Arc<dyn Sink>,
    rate: u32,
    known: Mutex<HashSet<String>>,
}

impl FeedHooks {
    pub fn new(sink: Arc<dyn Sink>, rate: u32) -> Self {
        Self {
            sink,
            rate,
            known: Mutex::new(HashSet::new()),
        }
    }

    pub fn subscribed(&self) -> usize {
        self.known.lock().len()
    }
}

#[async_trait]
impl CollectorHooks for FeedHooks {
    async fn on_register(&self, session: &Session, device: &Device) {
        if device.is_owned() || !self.known.lock().insert(device.uid.clone()) {
            debug!(uid = %device.uid, "ignoring known device");
            return;
        }

        info!(uid = %device.uid, rate = self.rate, "got device, asking for a feed");
        let client = session.client();
        let subscribed = if self.rate > 0 {
            client.feed(&device.uid, self.rate)
        } else {
            client.cfeed(&device.uid)
        }
        .and_then(|()| client.ask(&device.uid, true));

        if let Err(e) = subscribed {
            warn!(uid = %device.uid, error = %e, "cannot subscribe to device");
            self.known.lock().remove(&device.uid);
        }
    }

    async fn on_update(&self, session: &Session, device: &Device) {
        let Some(point) = point_for(device, session.now()) else {
            return;
        };
        debug!(uid = %device.uid, value = ?device.value(), "got data");
        write_best_effort(self.sink.as_ref(), &point).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gnhast_client::client::HubClient;
    use gnhast_client::codec::{Message, Registration, ValueUpdate};
    use gnhast_client::device::{DeviceData, DeviceType, Proto, SubType};
    use gnhast_client::{Error, Result};
    use std::ops::ControlFlow;

    #[derive(Default)]
    struct Collected(Mutex<Vec<Point>>);

    #[async_trait]
    impl Sink for Collected {
        async fn write(&self, point: &Point) -> Result<()> {
            self.0.lock().push(point.clone());
            Ok(())
        }
    }

    struct Down;

    #[async_trait]
    impl Sink for Down {
        async fn write(&self, _point: &Point) -> Result<()> {
            Err(Error::Sink("disk full".into()))
        }
    }

    fn registration(uid: &str, devtype: DeviceType, subtype: SubType) -> Registration {
        let mut device = Device::new(uid, uid.to_uppercase(), devtype, subtype).with_proto(Proto(12));
        device.tags.push(("room".into(), "attic".into()));
        Registration::from(&device)
    }

    fn sent(outbound: &mut tokio::sync::mpsc::UnboundedReceiver<Message>) -> Vec<Message> {
        std::iter::from_fn(|| outbound.try_recv().ok()).collect()
    }

    #[tokio::test]
    async fn test_subscribes_each_device_once() {
        let (client, mut outbound) = HubClient::detached();
        let session = Session::new(client);
        let hooks = FeedHooks::new(Arc::new(Collected::default()), 0);

        let reg = registration("t1", DeviceType::Sensor, SubType::Temp);
        for _ in 0..2 {
            let flow = session.dispatch(Message::Register(reg.clone()), &hooks).await;
            assert_eq!(flow, ControlFlow::Continue(()));
        }

        let messages = sent(&mut outbound);
        assert_eq!(
            messages,
            vec![
                Message::ContinuousFeed { uid: "t1".into() },
                Message::Ask {
                    uid: "t1".into(),
                    full: true
                },
            ]
        );
        assert_eq!(hooks.subscribed(), 1);
    }

    #[tokio::test]
    async fn test_rate_selects_periodic_feed() {
        let (client, mut outbound) = HubClient::detached();
        let session = Session::new(client);
        let hooks = FeedHooks::new(Arc::new(Collected::default()), 60);

        let reg = registration("h1", DeviceType::Sensor, SubType::Humid);
        let _ = session.dispatch(Message::Register(reg), &hooks).await;
        assert_eq!(
            sent(&mut outbound)[0],
            Message::Feed {
                uid: "h1".into(),
                rate: 60
            }
        );
    }

    #[tokio::test]
    async fn test_updates_become_points() {
        let (client, _outbound) = HubClient::detached();
        let session = Session::new(client);
        let sink = Arc::new(Collected::default());
        let hooks = FeedHooks::new(sink.clone(), 0);

        let _ = session
            .dispatch(Message::Register(registration("d1", DeviceType::Dimmer, SubType::Switch)), &hooks)
            .await;
        let _ = session
            .dispatch(Message::Update(ValueUpdate::new("d1", DeviceData::Level(0.75))), &hooks)
            .await;

        let points = sink.0.lock().clone();
        assert_eq!(points.len(), 1);
        let point = &points[0];
        assert_eq!(point.measurement, "dimmer");
        assert_eq!(point.tags["id"], "d1");
        assert_eq!(point.tags["name"], "D1");
        assert_eq!(point.tags["type"], "dimmer");
        assert_eq!(point.tags["proto"], "12");
        assert_eq!(point.tags["room"], "attic");
        assert_eq!(point.fields["data"], 0.75);
    }

    #[tokio::test]
    async fn test_sink_failure_keeps_session_going() {
        let (client, _outbound) = HubClient::detached();
        let session = Session::new(client);
        let hooks = FeedHooks::new(Arc::new(Down), 0);

        let _ = session
            .dispatch(Message::Register(registration("t1", DeviceType::Sensor, SubType::Temp)), &hooks)
            .await;
        let flow = session
            .dispatch(Message::Update(ValueUpdate::new("t1", DeviceData::Temperature(20.5))), &hooks)
            .await;
        assert_eq!(flow, ControlFlow::Continue(()));
        assert!(session.health().is_healthy());
    }

    #[test]
    fn test_sensor_measurement_is_its_field() {
        let mut device = Device::new("p1", "Baro", DeviceType::Sensor, SubType::Pressure);
        assert!(point_for(&device, Utc::now()).is_none());
        device.set_data(DeviceData::Pressure(1013.0), Utc::now());
        assert_eq!(point_for(&device, Utc::now()).unwrap().measurement, "pres");
    }
}
