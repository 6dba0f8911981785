/*!
Hub line builders

Produces the protocol lines a hub would send, for feeding collectors in
tests. Every builder goes through the real encoder so the lines match what
the client decodes.
*/

use gnhast_client::alarm::{Alarm, AlarmChannels, Severity};
use gnhast_client::codec::{encode, Message, Registration, ValueUpdate};
use gnhast_client::device::{Device, DeviceData, DeviceType, Origin, SubType};

/// Builder for hub-originated lines
pub struct HubLines;

impl HubLines {
    /// `reg` for a sensor announced by another collector
    pub fn register(uid: &str, name: &str, devtype: DeviceType, subtype: SubType) -> String {
        encode(&Message::Register(Registration {
            uid: uid.to_string(),
            name: Some(name.to_string()),
            rrd_name: None,
            devtype,
            subtype,
            proto: None,
            tags: Vec::new(),
        }))
    }

    pub fn pressure_feed(uid: &str, name: &str) -> String {
        Self::register(uid, name, DeviceType::Sensor, SubType::Pressure)
    }

    pub fn update(uid: &str, data: DeviceData) -> String {
        encode(&Message::Update(ValueUpdate::new(uid, data)))
    }

    pub fn change(uid: &str, data: DeviceData) -> String {
        encode(&Message::Change(ValueUpdate::new(uid, data)))
    }

    pub fn alarm(uid: &str, text: &str, severity: u8, channels: AlarmChannels) -> String {
        encode(&Message::Alarm(Alarm {
            uid: uid.to_string(),
            text: text.to_string(),
            severity: Severity::new(severity.min(100)).unwrap_or(Severity::MAX),
            channels,
        }))
    }

    pub fn ping() -> String {
        encode(&Message::Ping)
    }

    pub fn die() -> String {
        encode(&Message::Die)
    }
}

/// A device record as the hub announced it, for seeding registries and
/// mock hub device lists.
pub fn remote_device(uid: &str, name: &str, devtype: DeviceType, subtype: SubType) -> Device {
    let mut device = Device::new(uid, name, devtype, subtype);
    device.origin = Origin::Remote;
    device
}
