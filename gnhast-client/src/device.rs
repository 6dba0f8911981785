//! Device records known to the hub
//!
//! A device is one sensed or actuated point. Its category is the
//! `(DeviceType, SubType)` pair, which also selects the typed shape of its
//! data and the wire field the value travels in.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Maximum length of the storage/display key sent as `rrdname`.
pub const RRD_NAME_MAX: usize = 20;

/// Wire field carrying the level of a dimmer, whatever its subtype.
pub const DIMMER_ARG: &str = "dimmer";

/// Top-level device category (`devt` on the wire)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    #[default]
    None,
    Switch,
    Dimmer,
    Sensor,
    Timer,
    Blind,
}

impl DeviceType {
    const ALL: [DeviceType; 6] = [
        DeviceType::None,
        DeviceType::Switch,
        DeviceType::Dimmer,
        DeviceType::Sensor,
        DeviceType::Timer,
        DeviceType::Blind,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            DeviceType::None => "none",
            DeviceType::Switch => "switch",
            DeviceType::Dimmer => "dimmer",
            DeviceType::Sensor => "sensor",
            DeviceType::Timer => "timer",
            DeviceType::Blind => "blind",
        }
    }
}

/// Refinement of the device category (`subt` on the wire)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubType {
    #[default]
    None,
    Switch,
    Outlet,
    Temp,
    Humid,
    Counter,
    Pressure,
    Speed,
    Dir,
    Ph,
    Wetness,
    Hub,
    Lux,
    Voltage,
    WattSec,
    Watt,
    Amps,
    RainRate,
    Weather,
    AlarmStatus,
    Number,
    Percentage,
    FlowRate,
    Distance,
    Volume,
    Timer,
    ThMode,
    ThState,
    SmNumber,
    Blind,
    Collector,
    Trigger,
    Orp,
    Salinity,
    Daylight,
    MoonPhase,
    TriState,
    Bool,
}

// Indexed by wire code; the second column is the data field name.
const SUBTYPES: [(SubType, &str); 38] = [
    (SubType::None, "none"),
    (SubType::Switch, "switch"),
    (SubType::Outlet, "outlet"),
    (SubType::Temp, "temp"),
    (SubType::Humid, "humid"),
    (SubType::Counter, "count"),
    (SubType::Pressure, "pres"),
    (SubType::Speed, "speed"),
    (SubType::Dir, "dir"),
    (SubType::Ph, "ph"),
    (SubType::Wetness, "wet"),
    (SubType::Hub, "hub"),
    (SubType::Lux, "lux"),
    (SubType::Voltage, "volts"),
    (SubType::WattSec, "wsec"),
    (SubType::Watt, "watt"),
    (SubType::Amps, "amps"),
    (SubType::RainRate, "rain"),
    (SubType::Weather, "weather"),
    (SubType::AlarmStatus, "alarm"),
    (SubType::Number, "number"),
    (SubType::Percentage, "pct"),
    (SubType::FlowRate, "flow"),
    (SubType::Distance, "distance"),
    (SubType::Volume, "volume"),
    (SubType::Timer, "timer"),
    (SubType::ThMode, "thmode"),
    (SubType::ThState, "thstate"),
    (SubType::SmNumber, "smnum"),
    (SubType::Blind, "blind"),
    (SubType::Collector, "collector"),
    (SubType::Trigger, "trigger"),
    (SubType::Orp, "orp"),
    (SubType::Salinity, "salinity"),
    (SubType::Daylight, "daylight"),
    (SubType::MoonPhase, "moonph"),
    (SubType::TriState, "tristate"),
    (SubType::Bool, "bool"),
];

impl SubType {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        SUBTYPES.get(code as usize).map(|(subtype, _)| *subtype)
    }

    /// Name of the wire field that carries a value of this subtype.
    pub fn arg(self) -> &'static str {
        SUBTYPES[self as usize].1
    }

    /// Reverse of [`SubType::arg`]. `none` is not a data field.
    pub fn from_arg(arg: &str) -> Option<Self> {
        SUBTYPES
            .iter()
            .skip(1)
            .find(|(_, name)| *name == arg)
            .map(|(subtype, _)| *subtype)
    }
}

/// Scale/derivation hint (`proto` on the wire). The numbering belongs to the
/// hub, so it is carried as an opaque code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Proto(pub u16);

impl Proto {
    pub const NONE: Proto = Proto(0);
}

/// Typed value of a device, selected by its type/subtype pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DeviceData {
    Switch(bool),
    Outlet(bool),
    /// Dimmer level, 0.0 to 1.0
    Level(f64),
    Temperature(f64),
    Humidity(f64),
    Pressure(f64),
    Counter(u64),
    Number(f64),
    Reading { subtype: SubType, value: f64 },
}

impl DeviceData {
    /// Builds the variant matching a device category from a raw number.
    pub fn for_device(devtype: DeviceType, subtype: SubType, value: f64) -> Self {
        if devtype == DeviceType::Dimmer {
            return DeviceData::Level(value);
        }
        match subtype {
            SubType::Switch => DeviceData::Switch(value != 0.0),
            SubType::Outlet => DeviceData::Outlet(value != 0.0),
            SubType::Temp => DeviceData::Temperature(value),
            SubType::Humid => DeviceData::Humidity(value),
            SubType::Pressure => DeviceData::Pressure(value),
            SubType::Counter => DeviceData::Counter(value.max(0.0).round() as u64),
            SubType::Number => DeviceData::Number(value),
            other => DeviceData::Reading { subtype: other, value },
        }
    }

    /// Parses a wire field into data. Returns `None` when `arg` is not a
    /// data-bearing field name.
    pub fn parse(arg: &str, raw: &str) -> Option<Result<Self, ProtocolError>> {
        let invalid = || ProtocolError::InvalidField {
            field: arg.to_string(),
            value: raw.to_string(),
        };

        if arg == DIMMER_ARG {
            return Some(raw.parse::<f64>().map(DeviceData::Level).map_err(|_| invalid()));
        }

        let subtype = SubType::from_arg(arg)?;
        let parsed = match subtype {
            SubType::Switch | SubType::Outlet => raw
                .parse::<i64>()
                .map(|state| DeviceData::for_device(DeviceType::Switch, subtype, state as f64))
                .map_err(|_| invalid()),
            SubType::Counter => raw.parse::<u64>().map(DeviceData::Counter).map_err(|_| invalid()),
            _ => raw
                .parse::<f64>()
                .map(|value| DeviceData::for_device(DeviceType::Sensor, subtype, value))
                .map_err(|_| invalid()),
        };
        Some(parsed)
    }

    /// Numeric view used for arithmetic and sinks.
    pub fn value(&self) -> f64 {
        match *self {
            DeviceData::Switch(on) | DeviceData::Outlet(on) => {
                if on {
                    1.0
                } else {
                    0.0
                }
            }
            DeviceData::Level(v)
            | DeviceData::Temperature(v)
            | DeviceData::Humidity(v)
            | DeviceData::Pressure(v)
            | DeviceData::Number(v) => v,
            DeviceData::Counter(count) => count as f64,
            DeviceData::Reading { value, .. } => value,
        }
    }

    /// Wire field name for this value.
    pub fn arg(&self) -> &'static str {
        match self {
            DeviceData::Switch(_) => SubType::Switch.arg(),
            DeviceData::Outlet(_) => SubType::Outlet.arg(),
            DeviceData::Level(_) => DIMMER_ARG,
            DeviceData::Temperature(_) => SubType::Temp.arg(),
            DeviceData::Humidity(_) => SubType::Humid.arg(),
            DeviceData::Pressure(_) => SubType::Pressure.arg(),
            DeviceData::Counter(_) => SubType::Counter.arg(),
            DeviceData::Number(_) => SubType::Number.arg(),
            DeviceData::Reading { subtype, .. } => subtype.arg(),
        }
    }

    pub fn encode_value(&self) -> String {
        match *self {
            DeviceData::Switch(on) | DeviceData::Outlet(on) => if on { "1" } else { "0" }.to_string(),
            DeviceData::Counter(count) => count.to_string(),
            _ => self.value().to_string(),
        }
    }
}

/// Where a record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Declared by this collector, which pushes its values
    Local,
    /// Announced by the hub, observed by this collector
    Remote,
}

/// One device record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub uid: String,
    pub name: String,
    pub rrd_name: String,
    pub devtype: DeviceType,
    pub subtype: SubType,
    pub proto: Proto,
    pub data: Option<DeviceData>,
    pub last_update: Option<DateTime<Utc>>,
    /// Flattened key/value annotations, in order
    pub tags: Vec<(String, String)>,
    pub origin: Origin,
}

impl Device {
    /// Declares a device owned by this collector.
    pub fn new(
        uid: impl Into<String>,
        name: impl Into<String>,
        devtype: DeviceType,
        subtype: SubType,
    ) -> Self {
        let name = name.into();
        Self {
            uid: uid.into(),
            rrd_name: rrd_name_for(&name),
            name,
            devtype,
            subtype,
            proto: Proto::NONE,
            data: None,
            last_update: None,
            tags: Vec::new(),
            origin: Origin::Local,
        }
    }

    pub fn with_rrd_name(mut self, rrd_name: &str) -> Self {
        self.set_rrd_name(rrd_name);
        self
    }

    pub fn with_proto(mut self, proto: Proto) -> Self {
        self.proto = proto;
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push((key.into(), value.into()));
        self
    }

    pub fn set_rrd_name(&mut self, rrd_name: &str) {
        self.rrd_name = rrd_name.chars().take(RRD_NAME_MAX).collect();
    }

    pub fn is_owned(&self) -> bool {
        self.origin == Origin::Local
    }

    /// Wire field carrying this device's value.
    pub fn data_arg(&self) -> &'static str {
        if self.devtype == DeviceType::Dimmer {
            DIMMER_ARG
        } else {
            self.subtype.arg()
        }
    }

    pub fn value(&self) -> Option<f64> {
        self.data.map(|data| data.value())
    }

    /// Assigns a raw reading, typed after this device's category.
    pub fn set_value(&mut self, value: f64, at: DateTime<Utc>) {
        self.set_data(DeviceData::for_device(self.devtype, self.subtype, value), at);
    }

    pub fn set_data(&mut self, data: DeviceData, at: DateTime<Utc>) {
        self.data = Some(data);
        self.touch(at);
    }

    /// Moves `last_update` forward; it never goes backwards.
    pub fn touch(&mut self, at: DateTime<Utc>) {
        self.last_update = Some(match self.last_update {
            Some(previous) if previous > at => previous,
            _ => at,
        });
    }

    /// Time elapsed since the last data assignment.
    pub fn age(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.last_update.map(|at| now - at)
    }
}

/// Default storage key: display name with spaces replaced, truncated.
pub fn rrd_name_for(name: &str) -> String {
    name.replace(' ', "_").chars().take(RRD_NAME_MAX).collect()
}

/// Temperature scale (`tscale`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TempScale {
    #[default]
    #[serde(rename = "C")]
    Celsius,
    #[serde(rename = "F")]
    Fahrenheit,
    #[serde(rename = "K")]
    Kelvin,
    #[serde(rename = "R")]
    Rankine,
}

impl TempScale {
    pub fn convert(self, value: f64, to: TempScale) -> f64 {
        if self == to {
            return value;
        }
        to.from_kelvin(self.to_kelvin(value))
    }

    fn to_kelvin(self, value: f64) -> f64 {
        match self {
            TempScale::Celsius => value + 273.15,
            TempScale::Fahrenheit => (value + 459.67) * 5.0 / 9.0,
            TempScale::Kelvin => value,
            TempScale::Rankine => value * 5.0 / 9.0,
        }
    }

    fn from_kelvin(self, kelvin: f64) -> f64 {
        match self {
            TempScale::Celsius => kelvin - 273.15,
            TempScale::Fahrenheit => kelvin * 9.0 / 5.0 - 459.67,
            TempScale::Kelvin => kelvin,
            TempScale::Rankine => kelvin * 9.0 / 5.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_subtype_codes_and_args() {
        assert_eq!(SubType::Pressure.code(), 6);
        assert_eq!(SubType::from_code(20), Some(SubType::Number));
        assert_eq!(SubType::from_code(38), None);
        assert_eq!(SubType::Humid.arg(), "humid");
        assert_eq!(SubType::from_arg("pres"), Some(SubType::Pressure));
        assert_eq!(SubType::from_arg("none"), None);
        assert_eq!(DeviceType::from_code(2), Some(DeviceType::Dimmer));
    }

    #[test]
    fn test_data_selected_by_category() {
        assert_eq!(
            DeviceData::for_device(DeviceType::Sensor, SubType::Pressure, 1010.0),
            DeviceData::Pressure(1010.0)
        );
        assert_eq!(
            DeviceData::for_device(DeviceType::Dimmer, SubType::Switch, 0.5),
            DeviceData::Level(0.5)
        );
        assert_eq!(
            DeviceData::for_device(DeviceType::Switch, SubType::Switch, 1.0),
            DeviceData::Switch(true)
        );
        assert_eq!(
            DeviceData::for_device(DeviceType::Sensor, SubType::Lux, 3.0),
            DeviceData::Reading { subtype: SubType::Lux, value: 3.0 }
        );
    }

    #[test]
    fn test_outlet_keeps_its_own_field() {
        let on = DeviceData::for_device(DeviceType::Switch, SubType::Outlet, 1.0);
        assert_eq!(on, DeviceData::Outlet(true));
        assert_eq!(on.arg(), "outlet");
        assert_eq!(on.encode_value(), "1");
        assert_eq!(DeviceData::parse("outlet", "0").unwrap().unwrap(), DeviceData::Outlet(false));
        assert_eq!(DeviceData::parse("switch", "1").unwrap().unwrap(), DeviceData::Switch(true));

        let plug = Device::new("plug", "Kettle", DeviceType::Switch, SubType::Outlet);
        assert_eq!(plug.data_arg(), on.arg());
    }

    #[test]
    fn test_parse_data_field() {
        assert!(DeviceData::parse("uid", "x").is_none());
        assert_eq!(
            DeviceData::parse("humid", "41.5").unwrap().unwrap(),
            DeviceData::Humidity(41.5)
        );
        assert_eq!(DeviceData::parse("count", "12").unwrap().unwrap(), DeviceData::Counter(12));
        assert_eq!(DeviceData::parse("dimmer", "0.25").unwrap().unwrap(), DeviceData::Level(0.25));
        assert!(DeviceData::parse("temp", "warm").unwrap().is_err());
    }

    #[test]
    fn test_rrd_name_is_truncated() {
        let dev = Device::new("gas", "BME680 Gas Resistance Sensor", DeviceType::Sensor, SubType::Number);
        assert_eq!(dev.rrd_name, "BME680_Gas_Resistanc");
        assert_eq!(dev.rrd_name.chars().count(), RRD_NAME_MAX);
        let dev = dev.with_rrd_name("short");
        assert_eq!(dev.rrd_name, "short");
    }

    #[test]
    fn test_last_update_never_goes_backwards() {
        let mut dev = Device::new("t", "Temp", DeviceType::Sensor, SubType::Temp);
        let later = Utc.timestamp_opt(200, 0).unwrap();
        let earlier = Utc.timestamp_opt(100, 0).unwrap();
        dev.set_value(20.0, later);
        dev.set_value(21.0, earlier);
        assert_eq!(dev.last_update, Some(later));
        assert_eq!(dev.value(), Some(21.0));
    }

    #[test]
    fn test_temperature_conversion() {
        let f = TempScale::Celsius.convert(100.0, TempScale::Fahrenheit);
        assert!((f - 212.0).abs() < 1e-9);
        let k = TempScale::Fahrenheit.convert(32.0, TempScale::Kelvin);
        assert!((k - 273.15).abs() < 1e-9);
        assert_eq!(TempScale::Celsius.convert(21.5, TempScale::Celsius), 21.5);
    }
}
