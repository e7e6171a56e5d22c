/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use std::fmt;
use std::str::FromStr;

/// Default TCP port of the adb server.
pub const ADB_PORT: u16 = 5037;

/// Largest payload carried by a single `DATA` sync frame.
pub const SYNC_DATA_MAX: usize = 64 * 1024;

/// Longest `FAIL` message accepted from a sync peer.
pub const MAX_SYNC_MESSAGE: usize = SYNC_DATA_MAX;

/// Longest file name accepted in a `DENT` frame.
pub const MAX_DENT_NAME: usize = 1024;

/// Largest payload of a length-prefixed host frame.
pub const MAX_HOST_PAYLOAD: usize = 0xFFFF;

/// First server protocol version that accepts a serial in transport selection.
pub const SERIAL_TRANSPORT_VERSION: u32 = 19;

pub type DeviceSerial = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncCommand {
    Data,
    Dent,
    Done,
    Fail,
    List,
    Okay,
    Quit,
    Recv,
    Send,
    Stat,
}

impl SyncCommand {
    // Returns the byte serialisation of the protocol status.
    pub fn code(&self) -> &'static [u8; 4] {
        use self::SyncCommand::*;
        match *self {
            Data => b"DATA",
            Dent => b"DENT",
            Done => b"DONE",
            Fail => b"FAIL",
            List => b"LIST",
            Okay => b"OKAY",
            Quit => b"QUIT",
            Recv => b"RECV",
            Send => b"SEND",
            Stat => b"STAT",
        }
    }

    /// The id as it travels on the wire: the four ASCII bytes packed little-endian.
    pub fn id(&self) -> u32 {
        u32::from_le_bytes(*self.code())
    }

    pub fn from_code(code: &[u8; 4]) -> Option<SyncCommand> {
        use self::SyncCommand::*;
        [Data, Dent, Done, Fail, List, Okay, Quit, Recv, Send, Stat]
            .into_iter()
            .find(|cmd| cmd.code() == code)
    }
}

impl fmt::Display for SyncCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(self.code()))
    }
}

/// Connection state of a device as reported by the adb server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceState {
    Offline,
    Bootloader,
    Device,
    Host,
    Recovery,
    #[default]
    Unknown,
}

impl DeviceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceState::Offline => "offline",
            DeviceState::Bootloader => "bootloader",
            DeviceState::Device => "device",
            DeviceState::Host => "host",
            DeviceState::Recovery => "recovery",
            DeviceState::Unknown => "unknown",
        }
    }
}

impl FromStr for DeviceState {
    type Err = std::convert::Infallible;

    /// Never fails: anything the server reports that is not one of the known
    /// states (`unauthorized`, `sideload`, ...) is `Unknown`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim() {
            "offline" => DeviceState::Offline,
            "bootloader" => DeviceState::Bootloader,
            "device" => DeviceState::Device,
            "host" => DeviceState::Host,
            "recovery" => DeviceState::Recovery,
            _ => DeviceState::Unknown,
        })
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// POSIX file type bits of a sync `mode` field.
pub const S_IFMT: u32 = 0o170000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFCHR: u32 = 0o020000;
pub const S_IFBLK: u32 = 0o060000;
pub const S_IFLNK: u32 = 0o120000;
