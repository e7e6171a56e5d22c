/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Client for the adb server's socket protocol.
//!
//! [`Host`] talks to the server itself (version, device enumeration,
//! shutdown). [`Device`] routes commands to one device: shell commands,
//! state changes and file transfer through the sync sub-protocol
//! ([`SyncSession`]). Every operation opens its own connection to the
//! server and closes it when done.

pub mod adb;
pub mod codec;
pub mod device;
pub mod host;
pub mod registry;
pub mod server;
pub mod sync;


use std::io;
use std::num::{ParseIntError, TryFromIntError};
use std::str::Utf8Error;

use thiserror::Error;
pub use unix_path::{Path as UnixPath, PathBuf as UnixPathBuf};

pub use crate::adb::{DeviceSerial, DeviceState, SyncCommand};
pub use crate::device::Device;
pub use crate::host::Host;
pub use crate::registry::{DeviceId, DeviceRegistry};
pub use crate::server::{AdbBinary, ServerConnection, ServerLauncher};
pub use crate::sync::{RemoteDirEntry, RemoteStat, SyncSession};

pub type Result<T> = std::result::Result<T, DeviceError>;

#[derive(Debug, Error)]
pub enum DeviceError {
    /// Failure reported by the server or device, verbatim.
    #[error("adb error: {0}")]
    Adb(String),
    #[error("adb not found on PATH: {0}")]
    AdbNotFound(#[from] which::Error),
    #[error("{0}")]
    Connection(String),
    #[error("Host frame of {0} bytes exceeds 65535")]
    FrameTooLong(usize),
    #[error(transparent)]
    FromInt(#[from] TryFromIntError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("Multiple Android devices online")]
    MultipleDevices,
    #[error("No Android devices are online")]
    NoDevices,
    #[error(transparent)]
    ParseInt(#[from] ParseIntError),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Remote path {} does not exist", .0.display())]
    RemoteNotFound(UnixPathBuf),
    #[error("{0}")]
    State(String),
    #[error("Unknown Android device '{0}'")]
    UnknownDevice(String),
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
    #[error(transparent)]
    Utf8(#[from] Utf8Error),
    #[error(transparent)]
    WalkDir(#[from] walkdir::Error),
}

impl DeviceError {
    /// Whether this is an expected outcome of a well-formed exchange (the
    /// remote side said no) rather than a broken connection, protocol
    /// desync or misuse of a device handle.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DeviceError::Adb(_) | DeviceError::RemoteNotFound(_) | DeviceError::Unsupported(_)
        )
    }
}
