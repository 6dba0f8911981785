//! In-memory device cache keyed by uid
//!
//! Shared between the read loop and any poller task. Records are never
//! removed while the process runs.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::codec::{Registration, ValueUpdate};
use crate::device::{rrd_name_for, Device, DeviceData, Origin};
use crate::error::{Error, Result};

#[derive(Default)]
struct Inner {
    index: HashMap<String, usize>,
    devices: Vec<Device>,
}

impl Inner {
    fn get_mut(&mut self, uid: &str) -> Option<&mut Device> {
        let slot = *self.index.get(uid)?;
        self.devices.get_mut(slot)
    }

    fn insert(&mut self, device: Device) -> Device {
        self.index.insert(device.uid.clone(), self.devices.len());
        self.devices.push(device.clone());
        device
    }
}

#[derive(Clone, Default)]
pub struct DeviceRegistry {
    inner: Arc<RwLock<Inner>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an unseen record or merges into the existing one. Data and
    /// `last_update` only change when the incoming record carries data.
    pub fn upsert(&self, record: Device) -> Device {
        let mut inner = self.inner.write();
        let Some(existing) = inner.get_mut(&record.uid) else {
            return inner.insert(record);
        };

        existing.name = record.name;
        existing.rrd_name = record.rrd_name;
        existing.devtype = record.devtype;
        existing.subtype = record.subtype;
        existing.proto = record.proto;
        // ownership is only ever claimed, never given up
        if record.origin == Origin::Local {
            existing.origin = Origin::Local;
        }
        if !record.tags.is_empty() {
            existing.tags = record.tags;
        }
        if let Some(data) = record.data {
            existing.data = Some(data);
            if let Some(at) = record.last_update {
                existing.touch(at);
            }
        }
        existing.clone()
    }

    /// Declares a device owned by this collector.
    pub fn declare(&self, mut device: Device) -> Device {
        device.origin = Origin::Local;
        self.upsert(device)
    }

    /// Applies a `reg` announcement from the hub. Fields the message
    /// leaves out keep their current value.
    pub fn apply_registration(&self, reg: &Registration) -> Device {
        let mut inner = self.inner.write();
        if let Some(existing) = inner.get_mut(&reg.uid) {
            if let Some(name) = &reg.name {
                existing.name = name.clone();
            }
            if let Some(rrd_name) = &reg.rrd_name {
                existing.set_rrd_name(rrd_name);
            }
            existing.devtype = reg.devtype;
            existing.subtype = reg.subtype;
            if let Some(proto) = reg.proto {
                existing.proto = proto;
            }
            if !reg.tags.is_empty() {
                existing.tags = reg.tags.clone();
            }
            return existing.clone();
        }

        let name = reg.name.clone().unwrap_or_else(|| reg.uid.clone());
        let mut device = Device::new(reg.uid.clone(), name.clone(), reg.devtype, reg.subtype);
        device.set_rrd_name(&reg.rrd_name.clone().unwrap_or_else(|| rrd_name_for(&name)));
        device.proto = reg.proto.unwrap_or_default();
        device.tags = reg.tags.clone();
        device.origin = Origin::Remote;
        inner.insert(device)
    }

    /// Applies a value received from the hub, stamped with the local
    /// receipt time.
    pub fn apply_update(&self, update: &ValueUpdate, at: DateTime<Utc>) -> Result<Device> {
        self.set_data(&update.uid, update.data, at)
    }

    pub fn set_data(&self, uid: &str, data: DeviceData, at: DateTime<Utc>) -> Result<Device> {
        let mut inner = self.inner.write();
        let device = inner
            .get_mut(uid)
            .ok_or_else(|| Error::Lookup(uid.to_string()))?;
        device.set_data(data, at);
        Ok(device.clone())
    }

    /// Assigns a raw reading typed after the device's category.
    pub fn set_value(&self, uid: &str, value: f64, at: DateTime<Utc>) -> Result<Device> {
        let mut inner = self.inner.write();
        let device = inner
            .get_mut(uid)
            .ok_or_else(|| Error::Lookup(uid.to_string()))?;
        device.set_value(value, at);
        Ok(device.clone())
    }

    /// Absent uids are a normal condition, remote devices may not have
    /// announced yet.
    pub fn find_by_uid(&self, uid: &str) -> Option<Device> {
        let inner = self.inner.read();
        inner
            .index
            .get(uid)
            .and_then(|slot| inner.devices.get(*slot))
            .cloned()
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.inner.read().index.contains_key(uid)
    }

    /// Every record, in insertion order.
    pub fn all(&self) -> Vec<Device> {
        self.inner.read().devices.clone()
    }

    /// Records declared by this collector, in insertion order.
    pub fn owned(&self) -> Vec<Device> {
        self.inner
            .read()
            .devices
            .iter()
            .filter(|d| d.is_owned())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
