/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Component, Path};

use log::{debug, info};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use walkdir::WalkDir;

use crate::adb::{DeviceSerial, DeviceState, SERIAL_TRANSPORT_VERSION};
use crate::server::ServerConnection;
use crate::sync::{RemoteDirEntry, RemoteStat, SyncSession};
use crate::{DeviceError, Host, Result, UnixPath, UnixPathBuf};

static BUILD_PROP_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*([^#=\s][^=]*?)\s*=\s*(.*?)\s*$").unwrap());

/// Turns `build.prop` text into a map, skipping comments and lines without `=`.
pub(crate) fn parse_build_props(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .filter_map(|line| BUILD_PROP_REGEX.captures(line))
        .map(|caps| (caps[1].to_owned(), caps[2].to_owned()))
        .collect()
}

/// Represents an ADB device.
///
/// A handle is only valid for the enumeration that produced it: `index` is
/// the device's position in that enumeration. Every operation opens its own
/// connection to the server, so handles for different devices can be used
/// concurrently.
#[derive(Debug, Clone)]
pub struct Device {
    /// ADB host that controls this device.
    pub host: Host,

    index: usize,

    /// Serial number uniquely identifying this ADB device.
    serial: DeviceSerial,

    /// Last state observed for the device. Refreshed by [`Device::get_state`]
    /// and the `wait_for_*` calls.
    pub state: DeviceState,

    protocol_version: u32,

    build: Option<BTreeMap<String, String>>,
}

impl Device {
    pub fn new(
        host: Host,
        index: usize,
        serial: DeviceSerial,
        state: DeviceState,
        protocol_version: u32,
    ) -> Device {
        Device {
            host,
            index,
            serial,
            state,
            protocol_version,
            build: None,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn protocol_version(&self) -> u32 {
        self.protocol_version
    }

    fn addressed_by_serial(&self) -> bool {
        self.protocol_version >= SERIAL_TRANSPORT_VERSION
    }

    pub fn is_running(&self) -> bool {
        self.state == DeviceState::Device
    }

    pub fn is_offline(&self) -> bool {
        self.state == DeviceState::Offline
    }

    pub fn is_bootloader(&self) -> bool {
        self.state == DeviceState::Bootloader
    }

    /// Picks the transport selection command that must precede `command`.
    ///
    /// Fails without touching the network when `command` does not fit the
    /// current state.
    pub fn transport(&self, command: &str) -> Result<String> {
        match self.state {
            DeviceState::Device => {
                if command.starts_with("bootloader:") {
                    return Err(DeviceError::State(format!(
                        "Sending bootloader command {:?} in device state",
                        command
                    )));
                }
                if self.addressed_by_serial() {
                    Ok(format!("host:transport:{}", self.serial))
                } else {
                    Ok(format!("host:transport:{}", self.index))
                }
            }
            DeviceState::Bootloader => Ok(format!("host:transport-bl:{}", self.index)),
            state => Err(DeviceError::State(format!("bad device state: {}", state))),
        }
    }

    /// Opens a connection, selects this device and sends `command`.
    pub async fn connect(&self, command: &str) -> Result<ServerConnection> {
        let transport = self.transport(command)?;

        let mut connection = self.host.connect().await?;
        connection.send_command(&transport).await?;
        connection.send_command(command).await?;

        Ok(connection)
    }

    /// Sends `command` to the device and hangs up.
    pub async fn command(&self, command: &str) -> Result<()> {
        self.connect(command).await.map(drop)
    }

    async fn wait_for(&mut self, command: &str, state: DeviceState) -> Result<DeviceState> {
        let mut connection = self.host.connect().await?;
        connection.send_command(command).await?;

        // The server holds this read until the device reaches the state.
        connection.read_signal().await?;
        self.state = state;
        info!("Device {} is now in {} state", self.serial, state);

        Ok(state)
    }

    /// Blocks until the server sees a device in bootloader state.
    pub async fn wait_for_bootloader(&mut self) -> Result<DeviceState> {
        self.wait_for("host:wait-for-bootloader", DeviceState::Bootloader).await
    }

    /// Blocks until the server sees a running device.
    pub async fn wait_for_device(&mut self) -> Result<DeviceState> {
        self.wait_for("host:wait-for-device", DeviceState::Device).await
    }

    /// Asks the server for the device's state, stores it in `self.state` and
    /// returns it.
    pub async fn get_state(&mut self) -> Result<DeviceState> {
        let command = if self.addressed_by_serial() {
            format!("host-serial:{}:get-state", self.serial)
        } else {
            "host:get-state".to_owned()
        };

        let response = self.host.host_query_to_string(&command).await?;
        let state = response.parse::<DeviceState>().unwrap_or_default();
        if state != self.state {
            debug!("Device {} went from {} to {}", self.serial, self.state, state);
        }
        self.state = state;

        Ok(state)
    }

    pub async fn get_product(&self) -> Result<String> {
        let command = if self.addressed_by_serial() {
            format!("host-serial:{}:get-product", self.serial)
        } else {
            "host:get-product".to_owned()
        };

        self.host.host_query_to_string(&command).await
    }

    /// Build properties of the device, read once per handle.
    pub async fn get_build(&mut self) -> Result<&BTreeMap<String, String>> {
        let build = match self.build.take() {
            Some(build) => build,
            None => parse_build_props(&self.shell_command_output("cat /system/build.prop").await?),
        };

        let build: &BTreeMap<String, String> = self.build.insert(build);
        Ok(build)
    }

    /// Runs a shell command and discards its output.
    pub async fn shell_command(&self, command: &str) -> Result<()> {
        let mut connection = self.connect(&format!("shell:{}", command)).await?;
        connection.drain().await?;

        Ok(())
    }

    /// Runs a shell command and returns its output.
    pub async fn shell_command_output(&self, command: &str) -> Result<String> {
        let mut output = Vec::new();
        self.run_command(command, &mut output).await?;

        let response = std::str::from_utf8(&output)?;

        // Unify new lines by removing possible carriage returns
        Ok(response.replace("\r\n", "\n"))
    }

    /// Runs a shell command, streaming its output into `sink` until the
    /// device closes the stream.
    pub async fn run_command<W: AsyncWrite + Unpin>(
        &self,
        command: &str,
        sink: &mut W,
    ) -> Result<u64> {
        let mut connection = self.connect(&format!("shell:{}", command)).await?;
        connection.copy_to(sink).await
    }

    /// Streams `logcat` output into `sink`, filtered by `ANDROID_LOG_TAGS`.
    pub async fn logcat<W: AsyncWrite + Unpin>(&self, sink: &mut W, args: &str) -> Result<u64> {
        let tags = std::env::var("ANDROID_LOG_TAGS").unwrap_or_default();
        self.run_command(
            &format!("export ANDROID_LOG_TAGS=\"{}\" ; logcat {}", tags, args),
            sink,
        )
        .await
    }

    pub async fn bugreport<W: AsyncWrite + Unpin>(&self, sink: &mut W) -> Result<u64> {
        if self.addressed_by_serial() {
            return self.run_command("dumpstate -", sink).await;
        }

        let mut total = 0;
        for (name, command) in [
            ("dumpstate", "dumpstate"),
            ("build.prop", "cat /system/build.prop"),
            ("dumpsys", "dumpsys"),
        ] {
            let banner = format!(
                "\n========================================================\n\
                 == {}\n\
                 ========================================================\n",
                name
            );
            sink.write_all(banner.as_bytes()).await?;
            total += self.run_command(command, &mut *sink).await?;
        }

        Ok(total)
    }

    /// Reboots into the OS, or into the bootloader when `bootloader` is set.
    pub async fn reboot(&self, bootloader: bool) -> Result<()> {
        match self.state {
            DeviceState::Bootloader => self.command("bootloader:reboot").await,
            DeviceState::Device if bootloader => self.shell_command("reboot bootloader").await,
            DeviceState::Device => self.shell_command("reboot").await,
            state => Err(DeviceError::State(format!(
                "Cannot reboot a device in {} state",
                state
            ))),
        }
    }

    /// Sends an image to the bootloader's `flash` command.
    pub async fn upload_data(&self, name: &str, data: &[u8]) -> Result<()> {
        let mut connection = self
            .connect(&format!("bootloader:flash:{}:{}", name, data.len()))
            .await?;
        connection.write_all(data).await?;
        connection.read_status().await
    }

    /// Opens a sync session on this device.
    pub async fn sync(&self) -> Result<SyncSession<TcpStream>> {
        Ok(self.connect("sync:").await?.into_sync())
    }

    pub async fn stat(&self, path: &UnixPath) -> Result<RemoteStat> {
        let mut session = self.sync().await?;
        let stat = session.stat(path).await?;
        session.quit().await?;

        Ok(stat)
    }

    /// Lists `path`, handing every directory entry to `callback`.
    pub async fn list<F: FnMut(RemoteDirEntry)>(
        &self,
        path: &UnixPath,
        callback: F,
    ) -> Result<usize> {
        let mut session = self.sync().await?;
        let count = session.list(path, callback).await?;
        session.quit().await?;

        Ok(count)
    }

    /// Entries of `path` without `.` and `..`.
    pub async fn list_dir(&self, path: &UnixPath) -> Result<Vec<RemoteDirEntry>> {
        let mut listings = Vec::new();
        self.list(path, |entry| {
            if entry.name != "." && entry.name != ".." {
                listings.push(entry);
            }
        })
        .await?;

        Ok(listings)
    }

    /// Uploads `local` and returns the remote path it was written to.
    pub async fn push(&self, local: &Path, remote: &UnixPath) -> Result<UnixPathBuf> {
        let mut session = self.sync().await?;
        let target = session.push(local, remote).await?;
        session.quit().await?;

        Ok(target)
    }

    /// Uploads every regular file below `source` into `dest_dir`, keeping the
    /// relative layout. Returns the number of files pushed.
    pub async fn push_dir(&self, source: &Path, dest_dir: &UnixPath) -> Result<usize> {
        debug!("Pushing {} to {}", source.display(), dest_dir.display());

        let walker = WalkDir::new(source).follow_links(false).into_iter();
        let mut count = 0;

        for entry in walker {
            let entry = entry?;
            let path = entry.path();

            if !entry.metadata()?.is_file() {
                continue;
            }

            let tail = path
                .strip_prefix(source)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

            let dest = append_components(dest_dir, tail)?;
            self.push(path, &dest).await?;
            count += 1;
        }

        Ok(count)
    }

    pub async fn pull(&self, remote: &UnixPath, local: &Path) -> Result<u64> {
        let mut session = self.sync().await?;
        let total = session.pull(remote, local).await?;
        session.quit().await?;

        Ok(total)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}\t{}", self.index, self.serial, self.state)
    }
}

pub(crate) fn append_components(
    base: &UnixPath,
    tail: &Path,
) -> std::result::Result<UnixPathBuf, io::Error> {
    let mut buf = base.to_path_buf();

    for component in tail.components() {
        if let Component::Normal(segment) = component {
            let utf8 = segment.to_str().ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::Other,
                    "Could not represent path segment as UTF-8",
                )
            })?;
            buf.push(utf8);
        } else {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "Unexpected path component".to_owned(),
            ));
        }
    }

    Ok(buf)
}
