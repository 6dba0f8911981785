//! Alarm rendering
//!
//! Each alarm becomes one console line tagged with its severity band. The
//! hooks also keep the set of alarms still raised, so a cleared alarm can be
//! matched against what it cleared.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;

use async_trait::async_trait;
use gnhast_client::alarm::{Alarm, Severity};
use gnhast_client::hooks::CollectorHooks;
use gnhast_client::Session;
use parking_lot::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Band {
    Cleared,
    Minor,
    Low,
    Moderate,
    Elevated,
    High,
    Critical,
}

impl Band {
    pub fn of(severity: Severity) -> Self {
        match severity.level() {
            0 => Band::Cleared,
            1..=9 => Band::Minor,
            10..=19 => Band::Low,
            20..=34 => Band::Moderate,
            35..=54 => Band::Elevated,
            55..=74 => Band::High,
            _ => Band::Critical,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Band::Cleared => "cleared",
            Band::Minor => "minor",
            Band::Low => "low",
            Band::Moderate => "moderate",
            Band::Elevated => "elevated",
            Band::High => "high",
            Band::Critical => "critical",
        }
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

/// Console line for one alarm.
pub fn render(alarm: &Alarm) -> String {
    let band = Band::of(alarm.severity);
    if band == Band::Cleared {
        return format!("ALARM: {} CLEARED", alarm.uid);
    }
    let channels = alarm.channels.names();
    let channels = if channels.is_empty() {
        "-".to_string()
    } else {
        channels.join(",")
    };
    format!(
        "Sev {:3} {:<8} /{:<12} ALARM: {:<10} {}",
        alarm.severity.level(),
        band,
        channels,
        alarm.uid,
        alarm.text
    )
}

/// Writes every alarm the hub sends to `out`.
pub struct ConsoleHooks<W> {
    out: Mutex<W>,
    active: Mutex<BTreeMap<String, Alarm>>,
}

impl<W: Write + Send> ConsoleHooks<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
            active: Mutex::new(BTreeMap::new()),
        }
    }

    /// Alarms raised and not yet cleared, by uid.
    pub fn active(&self) -> Vec<Alarm> {
        self.active.lock().values().cloned().collect()
    }

    fn track(&self, alarm: &Alarm) {
        let mut active = self.active.lock();
        if alarm.is_cleared() {
            if active.remove(&alarm.uid).is_none() {
                debug!(uid = %alarm.uid, "clear for an alarm we never saw");
            }
        } else {
            active.insert(alarm.uid.clone(), alarm.clone());
        }
    }
}

#[async_trait]
impl<W: Write + Send> CollectorHooks for ConsoleHooks<W> {
    async fn on_alarm(&self, _session: &Session, alarm: &Alarm) {
        self.track(alarm);
        debug!(uid = %alarm.uid, severity = alarm.severity.level(), band = %Band::of(alarm.severity), "alarm");

        let mut out = self.out.lock();
        let written = writeln!(out, "{}", render(alarm)).and_then(|()| out.flush());
        if let Err(e) = written {
            warn!(uid = %alarm.uid, error = %e, "cannot write alarm to console");
        }
    }
}
