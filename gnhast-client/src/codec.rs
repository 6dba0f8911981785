//! Hub wire protocol
//!
//! One message per line: a verb keyword followed by `key:value`,
//! `key=value` or `key = value` fields. Values containing whitespace or
//! quotes travel in double quotes with `\"` and `\\` escapes.

use chrono::{DateTime, Utc};

use crate::alarm::{Alarm, AlarmChannels, Severity};
use crate::device::{Device, DeviceData, DeviceType, Proto, SubType};
use crate::error::ProtocolError;

/// Longest accepted line, terminator excluded.
pub const MAX_LINE_LENGTH: usize = 8192;

/// Wire field names
pub mod field {
    pub const CLIENT: &str = "client";
    pub const UID: &str = "uid";
    pub const NAME: &str = "name";
    pub const RRD_NAME: &str = "rrdname";
    pub const DEVTYPE: &str = "devt";
    pub const SUBTYPE: &str = "subt";
    pub const PROTO: &str = "proto";
    pub const TAGS: &str = "tags";
    pub const RATE: &str = "rate";
    pub const SEVERITY: &str = "alsev";
    pub const CHANNELS: &str = "alchan";
    pub const ALARM_TEXT: &str = "altext";
    pub const ALARM_UID: &str = "aluid";
    pub const HEALTH: &str = "health";
    pub const LAST_UPDATE: &str = "lastupd";
    /// Pseudo-name used in errors when no data-bearing field is present
    pub const DATA: &str = "data";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Client,
    Register,
    Update,
    Change,
    Alarm,
    EndDump,
    Feed,
    ContinuousFeed,
    ListDevices,
    Ask,
    AskFull,
    ListenAlarms,
    DumpAlarms,
    Ping,
    ImAlive,
    Die,
    Disconnect,
}

impl Verb {
    pub fn keyword(self) -> &'static str {
        match self {
            Verb::Client => "client",
            Verb::Register => "reg",
            Verb::Update => "upd",
            Verb::Change => "chg",
            Verb::Alarm => "alarm",
            Verb::EndDump => "enddump",
            Verb::Feed => "feed",
            Verb::ContinuousFeed => "cfeed",
            Verb::ListDevices => "ldevs",
            Verb::Ask => "ask",
            Verb::AskFull => "askf",
            Verb::ListenAlarms => "listenalarms",
            Verb::DumpAlarms => "dumpalarms",
            Verb::Ping => "ping",
            Verb::ImAlive => "imalive",
            Verb::Die => "die",
            Verb::Disconnect => "disconnect",
        }
    }

    pub fn from_keyword(keyword: &str) -> Option<Self> {
        let verb = match keyword {
            "client" => Verb::Client,
            "reg" => Verb::Register,
            "upd" => Verb::Update,
            "chg" => Verb::Change,
            "alarm" => Verb::Alarm,
            "enddump" | "endldevs" => Verb::EndDump,
            "feed" => Verb::Feed,
            "cfeed" => Verb::ContinuousFeed,
            "ldevs" => Verb::ListDevices,
            "ask" => Verb::Ask,
            "askf" => Verb::AskFull,
            "listenalarms" => Verb::ListenAlarms,
            "dumpalarms" => Verb::DumpAlarms,
            "ping" => Verb::Ping,
            "imalive" => Verb::ImAlive,
            "die" => Verb::Die,
            "disconnect" => Verb::Disconnect,
            _ => return None,
        };
        Some(verb)
    }
}

/// Device announcement (`reg`)
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub uid: String,
    pub name: Option<String>,
    pub rrd_name: Option<String>,
    pub devtype: DeviceType,
    pub subtype: SubType,
    pub proto: Option<Proto>,
    pub tags: Vec<(String, String)>,
}

impl From<&Device> for Registration {
    fn from(device: &Device) -> Self {
        Self {
            uid: device.uid.clone(),
            name: Some(device.name.clone()),
            rrd_name: Some(device.rrd_name.clone()),
            devtype: device.devtype,
            subtype: device.subtype,
            proto: Some(device.proto),
            tags: device.tags.clone(),
        }
    }
}

/// Value carried by `upd` and `chg`
#[derive(Debug, Clone, PartialEq)]
pub struct ValueUpdate {
    pub uid: String,
    pub data: DeviceData,
    pub last_update: Option<DateTime<Utc>>,
}

impl ValueUpdate {
    pub fn new(uid: impl Into<String>, data: DeviceData) -> Self {
        Self {
            uid: uid.into(),
            data,
            last_update: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Client { name: String },
    Register(Registration),
    Update(ValueUpdate),
    Change(ValueUpdate),
    Alarm(Alarm),
    EndDump,
    Feed { uid: String, rate: u32 },
    ContinuousFeed { uid: String },
    ListDevices { uid: Option<String> },
    Ask { uid: String, full: bool },
    ListenAlarms { min_severity: Severity, channels: AlarmChannels },
    DumpAlarms { min_severity: Severity, channels: AlarmChannels },
    Ping,
    ImAlive { healthy: bool },
    Die,
    Disconnect,
}

impl Message {
    pub fn verb(&self) -> Verb {
        match self {
            Message::Client { .. } => Verb::Client,
            Message::Register(_) => Verb::Register,
            Message::Update(_) => Verb::Update,
            Message::Change(_) => Verb::Change,
            Message::Alarm(_) => Verb::Alarm,
            Message::EndDump => Verb::EndDump,
            Message::Feed { .. } => Verb::Feed,
            Message::ContinuousFeed { .. } => Verb::ContinuousFeed,
            Message::ListDevices { .. } => Verb::ListDevices,
            Message::Ask { full: false, .. } => Verb::Ask,
            Message::Ask { full: true, .. } => Verb::AskFull,
            Message::ListenAlarms { .. } => Verb::ListenAlarms,
            Message::DumpAlarms { .. } => Verb::DumpAlarms,
            Message::Ping => Verb::Ping,
            Message::ImAlive { .. } => Verb::ImAlive,
            Message::Die => Verb::Die,
            Message::Disconnect => Verb::Disconnect,
        }
    }

    /// Device the message refers to, if any.
    pub fn uid(&self) -> Option<&str> {
        match self {
            Message::Register(reg) => Some(&reg.uid),
            Message::Update(upd) | Message::Change(upd) => Some(&upd.uid),
            Message::Feed { uid, .. } | Message::ContinuousFeed { uid } | Message::Ask { uid, .. } => {
                Some(uid)
            }
            Message::ListDevices { uid } => uid.as_deref(),
            _ => None,
        }
    }
}

/// Decodes one line (terminator already stripped).
pub fn decode(line: &str) -> Result<Message, ProtocolError> {
    if line.len() > MAX_LINE_LENGTH {
        return Err(ProtocolError::LineTooLong(MAX_LINE_LENGTH));
    }
    let line = line.trim();
    if line.is_empty() {
        return Err(ProtocolError::Empty);
    }

    let (keyword, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let verb = Verb::from_keyword(keyword)
        .ok_or_else(|| ProtocolError::UnknownVerb(keyword.to_string()))?;
    let fields = Fields::parse(verb, rest)?;

    let message = match verb {
        Verb::Client => Message::Client {
            name: fields.required(field::CLIENT)?.to_string(),
        },
        Verb::Register => Message::Register(Registration {
            uid: fields.required(field::UID)?.to_string(),
            name: fields.get(field::NAME).map(str::to_string),
            rrd_name: fields.get(field::RRD_NAME).map(str::to_string),
            devtype: fields.code(field::DEVTYPE, DeviceType::from_code)?,
            subtype: fields.code(field::SUBTYPE, SubType::from_code)?,
            proto: fields.parsed::<u16>(field::PROTO)?.map(Proto),
            tags: fields.tags()?,
        }),
        Verb::Update => Message::Update(fields.value_update()?),
        Verb::Change => Message::Change(fields.value_update()?),
        Verb::Alarm => Message::Alarm(Alarm {
            uid: fields.required(field::ALARM_UID)?.to_string(),
            text: fields.get(field::ALARM_TEXT).unwrap_or_default().to_string(),
            severity: fields.severity()?.ok_or(fields.missing(field::SEVERITY))?,
            channels: fields
                .parsed::<u32>(field::CHANNELS)?
                .map(AlarmChannels)
                .unwrap_or(AlarmChannels::NONE),
        }),
        Verb::EndDump => Message::EndDump,
        Verb::Feed => Message::Feed {
            uid: fields.required(field::UID)?.to_string(),
            rate: fields.parsed(field::RATE)?.ok_or(fields.missing(field::RATE))?,
        },
        Verb::ContinuousFeed => Message::ContinuousFeed {
            uid: fields.required(field::UID)?.to_string(),
        },
        Verb::ListDevices => Message::ListDevices {
            uid: fields.get(field::UID).map(str::to_string),
        },
        Verb::Ask | Verb::AskFull => Message::Ask {
            uid: fields.required(field::UID)?.to_string(),
            full: verb == Verb::AskFull,
        },
        Verb::ListenAlarms | Verb::DumpAlarms => {
            let min_severity = fields.severity()?.unwrap_or(Severity::CLEARED);
            let channels = fields
                .parsed::<u32>(field::CHANNELS)?
                .map(AlarmChannels)
                .unwrap_or(AlarmChannels::ALL);
            if verb == Verb::ListenAlarms {
                Message::ListenAlarms { min_severity, channels }
            } else {
                Message::DumpAlarms { min_severity, channels }
            }
        }
        Verb::Ping => Message::Ping,
        Verb::ImAlive => Message::ImAlive {
            healthy: fields.parsed::<u8>(field::HEALTH)?.map_or(true, |h| h != 0),
        },
        Verb::Die => Message::Die,
        Verb::Disconnect => Message::Disconnect,
    };
    Ok(message)
}

/// Encodes a message as one line, without terminator.
pub fn encode(message: &Message) -> String {
    let mut line = Line::new(message.verb());
    match message {
        Message::Client { name } => line.field(field::CLIENT, name),
        Message::Register(reg) => {
            line.field(field::UID, &reg.uid);
            if let Some(name) = &reg.name {
                line.field(field::NAME, name);
            }
            if let Some(rrd_name) = &reg.rrd_name {
                line.field(field::RRD_NAME, rrd_name);
            }
            line.field(field::DEVTYPE, reg.devtype.code())
                .field(field::SUBTYPE, reg.subtype.code());
            if let Some(proto) = reg.proto {
                line.field(field::PROTO, proto.0);
            }
            if !reg.tags.is_empty() {
                let flat: Vec<&str> = reg
                    .tags
                    .iter()
                    .flat_map(|(k, v)| [k.as_str(), v.as_str()])
                    .collect();
                line.field(field::TAGS, flat.join(","));
            }
            &mut line
        }
        Message::Update(upd) | Message::Change(upd) => {
            line.field(field::UID, &upd.uid)
                .field(upd.data.arg(), upd.data.encode_value());
            if let Some(at) = upd.last_update {
                line.field(field::LAST_UPDATE, at.timestamp());
            }
            &mut line
        }
        Message::Alarm(alarm) => line
            .field(field::ALARM_UID, &alarm.uid)
            .field(field::ALARM_TEXT, &alarm.text)
            .field(field::SEVERITY, alarm.severity.level())
            .field(field::CHANNELS, alarm.channels.bits()),
        Message::Feed { uid, rate } => line.field(field::UID, uid).field(field::RATE, rate),
        Message::ContinuousFeed { uid } | Message::Ask { uid, .. } => line.field(field::UID, uid),
        Message::ListDevices { uid } => {
            if let Some(uid) = uid {
                line.field(field::UID, uid);
            }
            &mut line
        }
        Message::ListenAlarms { min_severity, channels }
        | Message::DumpAlarms { min_severity, channels } => line
            .field(field::SEVERITY, min_severity.level())
            .field(field::CHANNELS, channels.bits()),
        Message::ImAlive { healthy } => line.field(field::HEALTH, u8::from(*healthy)),
        Message::EndDump | Message::Ping | Message::Die | Message::Disconnect => &mut line,
    };
    line.finish()
}

struct Line(String);

impl Line {
    fn new(verb: Verb) -> Self {
        Line(verb.keyword().to_string())
    }

    fn field(&mut self, key: &str, value: impl ToString) -> &mut Self {
        let value = value.to_string();
        self.0.push(' ');
        self.0.push_str(key);
        self.0.push(':');
        if value.is_empty() || value.contains(|c: char| c.is_whitespace() || c == '"') {
            self.0.push('"');
            for c in value.chars() {
                if c == '"' || c == '\\' {
                    self.0.push('\\');
                }
                self.0.push(c);
            }
            self.0.push('"');
        } else {
            self.0.push_str(&value);
        }
        self
    }

    fn finish(self) -> String {
        self.0
    }
}

/// Parsed field list of one line, in wire order
struct Fields {
    verb: Verb,
    pairs: Vec<(String, String)>,
}

impl Fields {
    fn parse(verb: Verb, input: &str) -> Result<Self, ProtocolError> {
        let mut pairs = Vec::new();
        let mut chars = input.chars().peekable();

        loop {
            skip_whitespace(&mut chars);
            if chars.peek().is_none() {
                break;
            }

            let mut key = String::new();
            while let Some(&c) = chars.peek() {
                if c == ':' || c == '=' || c.is_whitespace() {
                    break;
                }
                key.push(c);
                chars.next();
            }
            skip_whitespace(&mut chars);
            match chars.next() {
                Some(':') if !key.is_empty() => {}
                Some('=') if !key.is_empty() => skip_whitespace(&mut chars),
                _ => return Err(ProtocolError::MissingSeparator(key)),
            }

            let mut value = String::new();
            if chars.peek() == Some(&'"') {
                chars.next();
                loop {
                    match chars.next() {
                        Some('\\') => match chars.next() {
                            Some(c) => value.push(c),
                            None => return Err(ProtocolError::UnterminatedQuote(key)),
                        },
                        Some('"') => break,
                        Some(c) => value.push(c),
                        None => return Err(ProtocolError::UnterminatedQuote(key)),
                    }
                }
            } else {
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() {
                        break;
                    }
                    value.push(c);
                    chars.next();
                }
            }
            pairs.push((key, value));
        }

        Ok(Self { verb, pairs })
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn missing(&self, field: &'static str) -> ProtocolError {
        ProtocolError::MissingField {
            verb: self.verb.keyword(),
            field,
        }
    }

    fn required(&self, key: &'static str) -> Result<&str, ProtocolError> {
        self.get(key).ok_or_else(|| self.missing(key))
    }

    fn parsed<T: std::str::FromStr>(&self, key: &str) -> Result<Option<T>, ProtocolError> {
        self.get(key)
            .map(|raw| {
                raw.parse::<T>().map_err(|_| ProtocolError::InvalidField {
                    field: key.to_string(),
                    value: raw.to_string(),
                })
            })
            .transpose()
    }

    fn code<T>(&self, key: &'static str, lookup: fn(u8) -> Option<T>) -> Result<T, ProtocolError> {
        let raw = self.required(key)?;
        raw.parse::<u8>()
            .ok()
            .and_then(lookup)
            .ok_or_else(|| ProtocolError::InvalidField {
                field: key.to_string(),
                value: raw.to_string(),
            })
    }

    fn severity(&self) -> Result<Option<Severity>, ProtocolError> {
        match self.parsed::<u8>(field::SEVERITY)? {
            None => Ok(None),
            Some(level) => Severity::new(level).map(Some).ok_or_else(|| ProtocolError::InvalidField {
                field: field::SEVERITY.to_string(),
                value: level.to_string(),
            }),
        }
    }

    fn tags(&self) -> Result<Vec<(String, String)>, ProtocolError> {
        let Some(raw) = self.get(field::TAGS) else {
            return Ok(Vec::new());
        };
        if raw.is_empty() {
            return Ok(Vec::new());
        }
        let parts: Vec<&str> = raw.split(',').collect();
        if parts.len() % 2 != 0 {
            return Err(ProtocolError::InvalidField {
                field: field::TAGS.to_string(),
                value: raw.to_string(),
            });
        }
        Ok(parts
            .chunks(2)
            .map(|pair| (pair[0].to_string(), pair[1].to_string()))
            .collect())
    }

    fn value_update(&self) -> Result<ValueUpdate, ProtocolError> {
        let uid = self.required(field::UID)?.to_string();
        let data = self
            .pairs
            .iter()
            .find_map(|(k, v)| DeviceData::parse(k, v))
            .ok_or_else(|| self.missing(field::DATA))??;
        let last_update = match self.parsed::<i64>(field::LAST_UPDATE)? {
            Some(secs) => Some(DateTime::<Utc>::from_timestamp(secs, 0).ok_or_else(|| {
                ProtocolError::InvalidField {
                    field: field::LAST_UPDATE.to_string(),
                    value: secs.to_string(),
                }
            })?),
            None => None,
        };
        Ok(ValueUpdate { uid, data, last_update })
    }
}

fn skip_whitespace(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) {
    while chars.peek().is_some_and(|c| c.is_whitespace()) {
        chars.next();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_registration() {
        let msg = decode(r#"reg uid:28.0A1 name:"Outside Pressure" rrdname:outpres devt:3 subt:6 proto:12 tags:room,porch"#)
            .unwrap();
        let Message::Register(reg) = msg else {
            panic!("expected registration, got {msg:?}");
        };
        assert_eq!(reg.uid, "28.0A1");
        assert_eq!(reg.name.as_deref(), Some("Outside Pressure"));
        assert_eq!(reg.devtype, DeviceType::Sensor);
        assert_eq!(reg.subtype, SubType::Pressure);
        assert_eq!(reg.proto, Some(Proto(12)));
        assert_eq!(reg.tags, vec![("room".to_string(), "porch".to_string())]);
    }

    #[test]
    fn test_all_separator_forms() {
        let a = decode("upd uid:p1 pres:1010.5").unwrap();
        let b = decode("upd uid=p1 pres=1010.5").unwrap();
        let c = decode("upd uid = p1 pres = 1010.5").unwrap();
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(
            a,
            Message::Update(ValueUpdate::new("p1", DeviceData::Pressure(1010.5)))
        );
    }

    #[test]
    fn test_update_with_timestamp() {
        let msg = decode("upd uid:t1 temp:21.5 lastupd:100").unwrap();
        let Message::Update(upd) = msg else { panic!("expected update") };
        assert_eq!(upd.last_update.map(|t| t.timestamp()), Some(100));
    }

    #[test]
    fn test_dimmer_change() {
        let msg = decode("chg uid:lamp dimmer:0.75").unwrap();
        assert_eq!(
            msg,
            Message::Change(ValueUpdate::new("lamp", DeviceData::Level(0.75)))
        );
    }

    #[test]
    fn test_alarm_fields() {
        let msg = decode(r#"alarm aluid:door altext:"Front door \"open\"" alsev:40 alchan:8"#).unwrap();
        let Message::Alarm(alarm) = msg else { panic!("expected alarm") };
        assert_eq!(alarm.text, r#"Front door "open""#);
        assert_eq!(alarm.severity.level(), 40);
        assert_eq!(alarm.channels, AlarmChannels::SECURITY);
    }

    #[test]
    fn test_end_markers() {
        assert_eq!(decode("enddump").unwrap(), Message::EndDump);
        assert_eq!(decode("endldevs").unwrap(), Message::EndDump);
    }

    #[test]
    fn test_malformed_lines() {
        assert_eq!(decode("   "), Err(ProtocolError::Empty));
        assert_eq!(decode("frob uid:x"), Err(ProtocolError::UnknownVerb("frob".into())));
        assert_eq!(
            decode("upd uid"),
            Err(ProtocolError::MissingSeparator("uid".into()))
        );
        assert_eq!(
            decode(r#"reg uid:x name:"unterminated devt:3 subt:3"#),
            Err(ProtocolError::UnterminatedQuote("name".into()))
        );
        assert_eq!(
            decode("upd uid:x"),
            Err(ProtocolError::MissingField { verb: "upd", field: "data" })
        );
        assert!(matches!(
            decode("alarm aluid:a alsev:101"),
            Err(ProtocolError::InvalidField { .. })
        ));
        assert!(matches!(
            decode("reg uid:x devt:9 subt:3"),
            Err(ProtocolError::InvalidField { .. })
        ));
        let long = format!("upd uid:{}", "x".repeat(MAX_LINE_LENGTH));
        assert_eq!(decode(&long), Err(ProtocolError::LineTooLong(MAX_LINE_LENGTH)));
    }

    #[test]
    fn test_encode_quotes_when_needed() {
        let reg = Registration {
            uid: "presdiff".into(),
            name: Some("Pressure Differential".into()),
            rrd_name: Some("presdiff".into()),
            devtype: DeviceType::Sensor,
            subtype: SubType::Pressure,
            proto: Some(Proto::NONE),
            tags: Vec::new(),
        };
        assert_eq!(
            encode(&Message::Register(reg)),
            r#"reg uid:presdiff name:"Pressure Differential" rrdname:presdiff devt:3 subt:6 proto:0"#
        );
        assert_eq!(
            encode(&Message::Client { name: String::new() }),
            r#"client client:"""#
        );
    }

    #[test]
    fn test_encode_outbound_requests() {
        assert_eq!(encode(&Message::Feed { uid: "a".into(), rate: 5 }), "feed uid:a rate:5");
        assert_eq!(encode(&Message::Ask { uid: "a".into(), full: true }), "askf uid:a");
        assert_eq!(encode(&Message::ListDevices { uid: None }), "ldevs");
        assert_eq!(encode(&Message::ImAlive { healthy: false }), "imalive health:0");
        assert_eq!(
            encode(&Message::Update(ValueUpdate::new("sw", DeviceData::Switch(true)))),
            "upd uid:sw switch:1"
        );
        assert_eq!(
            encode(&Message::Update(ValueUpdate::new("plug", DeviceData::Outlet(false)))),
            "upd uid:plug outlet:0"
        );
        assert_eq!(
            encode(&Message::ListenAlarms {
                min_severity: Severity::new(1).unwrap(),
                channels: AlarmChannels::ALL,
            }),
            "listenalarms alsev:1 alchan:4294967295"
        );
    }

    #[test]
    fn test_encoded_registration_decodes_back() {
        let device = Device::new("hum1", "Porch \"Humidity\"", DeviceType::Sensor, SubType::Humid)
            .with_tag("zone", "outside");
        let line = encode(&Message::Register(Registration::from(&device)));
        let Message::Register(reg) = decode(&line).unwrap() else { panic!("expected registration") };
        assert_eq!(reg.name.as_deref(), Some("Porch \"Humidity\""));
        assert_eq!(reg.tags, device.tags);
    }
}
