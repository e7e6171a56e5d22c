/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use std::sync::Arc;

use log::{debug, warn};

use crate::adb::{DeviceSerial, DeviceState, ADB_PORT};
use crate::registry::{DeviceId, DeviceRegistry};
use crate::server::{AdbBinary, ServerLauncher};
use crate::{Device, DeviceError, Result};

/// Represents a connection to an ADB host, which multiplexes the connections to
/// individual devices.
#[derive(Debug, Clone)]
pub struct Host {
    /// The TCP host to connect to.  Defaults to `"localhost"`.
    pub host: Option<String>,
    /// The TCP port to connect to.  Defaults to `5037`.
    pub port: Option<u16>,
    /// Starts the server when it cannot be reached.
    pub launcher: Arc<dyn ServerLauncher>,
}

impl Default for Host {
    fn default() -> Host {
        Host {
            host: Some("localhost".to_string()),
            port: Some(ADB_PORT),
            launcher: Arc::new(AdbBinary::default()),
        }
    }
}

/// One line of a `host:devices` listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DeviceLine {
    pub index: usize,
    pub serial: DeviceSerial,
    pub state: DeviceState,
}

/// Parses `serial\tstate`, or the legacy `id\tserial\tstate[\tlock]` form in
/// which the server numbers devices itself. `position` is the 1-based line
/// number and becomes the index of current-format lines.
pub(crate) fn parse_device_line(line: &str, position: usize) -> Option<DeviceLine> {
    let fields: Vec<&str> = line.split('\t').map(str::trim).collect();

    match fields.as_slice() {
        [id, serial, state, ..] if id.parse::<usize>().is_ok() => Some(DeviceLine {
            index: id.parse().ok()?,
            serial: (*serial).to_owned(),
            state: state.parse().ok()?,
        }),
        [serial, state, ..] if !serial.is_empty() => Some(DeviceLine {
            index: position,
            serial: (*serial).to_owned(),
            state: state.parse().ok()?,
        }),
        _ => None,
    }
}

impl Host {
    pub fn new<H: Into<String>>(host: H, port: u16) -> Host {
        Host {
            host: Some(host.into()),
            port: Some(port),
            ..Host::default()
        }
    }

    pub fn with_launcher<L: ServerLauncher + 'static>(mut self, launcher: L) -> Host {
        self.launcher = Arc::new(launcher);
        self
    }

    /// Builds a host from the environment.
    ///
    /// `ANDROID_ADB_SERVER_PORT` overrides the port. The `adb` tool is looked
    /// up on `PATH` immediately and its absence is an error.
    pub fn from_env() -> Result<Host> {
        let port = match std::env::var("ANDROID_ADB_SERVER_PORT") {
            Ok(port) => port.trim().parse::<u16>()?,
            Err(_) => ADB_PORT,
        };

        Ok(Host {
            port: Some(port),
            launcher: Arc::new(AdbBinary::locate()?),
            ..Host::default()
        })
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(ADB_PORT)
    }

    /// Wire protocol version of the server. It decides how devices are
    /// addressed in transport selection.
    pub async fn version(&self) -> Result<u32> {
        let response = self.host_query_to_string("host:version").await?;
        let version = u32::from_str_radix(response.trim(), 16)
            .map_err(|_| DeviceError::Protocol(format!("Bad version: {:?}", response)))?;
        debug!("adb server protocol version {}", version);

        Ok(version)
    }

    /// Enumerates the attached devices into a fresh registry.
    pub async fn devices(&self) -> Result<DeviceRegistry> {
        let mut registry = DeviceRegistry::new();
        self.refresh_devices(&mut registry).await?;

        Ok(registry)
    }

    /// Clears `registry` and fills it from a new enumeration. Handles from an
    /// earlier enumeration are not carried over.
    pub async fn refresh_devices(&self, registry: &mut DeviceRegistry) -> Result<()> {
        let version = self.version().await?;
        let response = self.host_query_to_string("host:devices").await?;

        registry.clear();
        for (n, line) in response.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match parse_device_line(line, n + 1) {
                Some(DeviceLine {
                    index,
                    serial,
                    state,
                }) => {
                    registry.add(Device::new(self.clone(), index, serial, state, version));
                }
                None => warn!("Ignoring malformed device line {:?}", line),
            }
        }
        debug!("Found {} device(s)", registry.len());

        Ok(())
    }

    /// Enumerates devices and returns the one at `id`.
    pub async fn device<I: Into<DeviceId>>(&self, id: I) -> Result<Device> {
        self.devices().await?.take(id)
    }

    /// Searches for available devices, and selects the one as specified by `device_serial`.
    ///
    /// If multiple devices are online, and no device has been specified,
    /// the `ANDROID_SERIAL` environment variable can be used to select one.
    pub async fn device_or_default<T: AsRef<str>>(
        &self,
        device_serial: Option<&T>,
    ) -> Result<Device> {
        let mut registry = self.devices().await?;

        if let Some(serial) = device_serial
            .map(|v| v.as_ref().to_owned())
            .or_else(|| std::env::var("ANDROID_SERIAL").ok())
        {
            return registry.take(serial.as_str());
        }

        if registry.len() > 1 {
            return Err(DeviceError::MultipleDevices);
        }

        registry.pop_first().ok_or(DeviceError::NoDevices)
    }

    /// Asks the server to exit.
    pub async fn kill(&self) -> Result<()> {
        let mut connection = self.connect().await?;
        connection.send_command("host:kill").await
    }

    /// Stops the server through the launcher rather than the socket.
    pub async fn kill_server(&self) -> Result<()> {
        self.launcher.kill_server(self.port()).await
    }
}
