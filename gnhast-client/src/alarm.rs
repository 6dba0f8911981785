//! Alarm payloads delivered by the hub

use serde::{Deserialize, Serialize};

/// Alarm severity on a 0 to 100 scale; 0 means the alarm was cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Severity(u8);

impl Severity {
    pub const CLEARED: Severity = Severity(0);
    pub const MAX: Severity = Severity(100);

    pub fn new(level: u8) -> Option<Self> {
        (level <= 100).then_some(Severity(level))
    }

    pub fn level(self) -> u8 {
        self.0
    }

    pub fn is_cleared(self) -> bool {
        self.0 == 0
    }
}

/// Channel bitmask (`alchan`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlarmChannels(pub u32);

impl AlarmChannels {
    pub const NONE: AlarmChannels = AlarmChannels(0);
    pub const GENERIC: AlarmChannels = AlarmChannels(1 << 0);
    pub const POWER: AlarmChannels = AlarmChannels(1 << 1);
    pub const LIGHTS: AlarmChannels = AlarmChannels(1 << 2);
    pub const SECURITY: AlarmChannels = AlarmChannels(1 << 3);
    pub const WEATHER: AlarmChannels = AlarmChannels(1 << 4);
    pub const EMERGENCY: AlarmChannels = AlarmChannels(1 << 5);
    pub const SYSTEM: AlarmChannels = AlarmChannels(1 << 6);
    pub const YARD: AlarmChannels = AlarmChannels(1 << 7);
    pub const GARAGE: AlarmChannels = AlarmChannels(1 << 8);
    pub const PURPLE: AlarmChannels = AlarmChannels(1 << 9);
    pub const ALL: AlarmChannels = AlarmChannels(u32::MAX);

    const NAMED: [(&'static str, AlarmChannels); 10] = [
        ("generic", Self::GENERIC),
        ("power", Self::POWER),
        ("lights", Self::LIGHTS),
        ("security", Self::SECURITY),
        ("weather", Self::WEATHER),
        ("emergency", Self::EMERGENCY),
        ("system", Self::SYSTEM),
        ("yard", Self::YARD),
        ("garage", Self::GARAGE),
        ("purple", Self::PURPLE),
    ];

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: AlarmChannels) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: AlarmChannels) -> bool {
        self.0 & other.0 != 0
    }

    pub fn union(self, other: AlarmChannels) -> Self {
        AlarmChannels(self.0 | other.0)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        if name == "all" {
            return Some(Self::ALL);
        }
        Self::NAMED
            .iter()
            .find(|(known, _)| *known == name)
            .map(|(_, channel)| *channel)
    }

    /// Combines channel names; an empty list selects every channel.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, String> {
        if names.is_empty() {
            return Ok(Self::ALL);
        }
        names.iter().try_fold(Self::NONE, |acc, name| {
            Self::from_name(name.as_ref())
                .map(|channel| acc.union(channel))
                .ok_or_else(|| format!("unknown alarm channel: {}", name.as_ref()))
        })
    }

    /// Names of the known channels set in this mask.
    pub fn names(self) -> Vec<&'static str> {
        Self::NAMED
            .iter()
            .filter(|(_, channel)| self.contains(*channel))
            .map(|(name, _)| *name)
            .collect()
    }
}

/// One alarm notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alarm {
    pub uid: String,
    pub text: String,
    pub severity: Severity,
    pub channels: AlarmChannels,
}

impl Alarm {
    pub fn is_cleared(&self) -> bool {
        self.severity.is_cleared()
    }
}
