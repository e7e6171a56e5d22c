/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::adb::DeviceSerial;
use crate::{Device, DeviceError, Result};

/// Selects a device either by its position in an enumeration or by serial.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeviceId {
    Index(usize),
    Serial(DeviceSerial),
}

impl From<usize> for DeviceId {
    fn from(index: usize) -> DeviceId {
        DeviceId::Index(index)
    }
}

impl From<&str> for DeviceId {
    fn from(serial: &str) -> DeviceId {
        DeviceId::Serial(serial.to_owned())
    }
}

impl From<String> for DeviceId {
    fn from(serial: String) -> DeviceId {
        DeviceId::Serial(serial)
    }
}

impl From<&String> for DeviceId {
    fn from(serial: &String) -> DeviceId {
        DeviceId::Serial(serial.clone())
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceId::Index(index) => write!(f, "{}", index),
            DeviceId::Serial(serial) => f.write_str(serial),
        }
    }
}

/// The devices of one enumeration, reachable by index and by serial.
///
/// Devices are stored once, keyed by index; the serial map only points at
/// indices, so the two views cannot disagree. Not synchronized: share it
/// behind a lock if more than one task mutates it.
#[derive(Debug, Default, Clone)]
pub struct DeviceRegistry {
    devices: BTreeMap<usize, Device>,
    serials: HashMap<DeviceSerial, usize>,
}

impl DeviceRegistry {
    pub fn new() -> DeviceRegistry {
        DeviceRegistry::default()
    }

    /// Inserts `device`, evicting any entry that shares its index or serial.
    pub fn add(&mut self, device: Device) {
        if let Some(index) = self.serials.remove(device.serial()) {
            self.devices.remove(&index);
        }
        if let Some(old) = self.devices.remove(&device.index()) {
            self.serials.remove(old.serial());
        }

        self.serials.insert(device.serial().to_owned(), device.index());
        self.devices.insert(device.index(), device);
    }

    fn index_of(&self, id: &DeviceId) -> Option<usize> {
        match id {
            DeviceId::Index(index) => self.devices.contains_key(index).then_some(*index),
            DeviceId::Serial(serial) => self.serials.get(serial).copied(),
        }
    }

    pub fn contains<I: Into<DeviceId>>(&self, id: I) -> bool {
        self.index_of(&id.into()).is_some()
    }

    pub fn get<I: Into<DeviceId>>(&self, id: I) -> Result<&Device> {
        let id = id.into();
        self.index_of(&id)
            .and_then(|index| self.devices.get(&index))
            .ok_or_else(|| DeviceError::UnknownDevice(id.to_string()))
    }

    pub fn get_mut<I: Into<DeviceId>>(&mut self, id: I) -> Result<&mut Device> {
        let id = id.into();
        match self.index_of(&id) {
            Some(index) => self
                .devices
                .get_mut(&index)
                .ok_or_else(|| DeviceError::UnknownDevice(id.to_string())),
            None => Err(DeviceError::UnknownDevice(id.to_string())),
        }
    }

    pub fn remove<I: Into<DeviceId>>(&mut self, id: I) -> Option<Device> {
        let index = self.index_of(&id.into())?;
        let device = self.devices.remove(&index)?;
        self.serials.remove(device.serial());

        Some(device)
    }

    /// Removes and returns the device, for callers that want an owned handle.
    pub fn take<I: Into<DeviceId>>(&mut self, id: I) -> Result<Device> {
        let id = id.into();
        self.remove(id.clone())
            .ok_or_else(|| DeviceError::UnknownDevice(id.to_string()))
    }

    /// Removes and returns the device with the lowest index.
    pub fn pop_first(&mut self) -> Option<Device> {
        let (_, device) = self.devices.pop_first()?;
        self.serials.remove(device.serial());

        Some(device)
    }

    pub fn clear(&mut self) {
        self.devices.clear();
        self.serials.clear();
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn serials(&self) -> impl Iterator<Item = &str> {
        self.devices.values().map(|device| device.serial())
    }

    /// Devices in index order.
    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }
}

impl IntoIterator for DeviceRegistry {
    type Item = Device;
    type IntoIter = std::collections::btree_map::IntoValues<usize, Device>;

    fn into_iter(self) -> Self::IntoIter {
        self.devices.into_values()
    }
}

impl fmt::Display for DeviceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "List of devices attached:")?;
        write!(f, "seq\tserial\tstate")?;
        for device in self.iter() {
            write!(f, "\n{}", device)?;
        }
        Ok(())
    }
}
