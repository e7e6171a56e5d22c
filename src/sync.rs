/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The binary file transfer sub-protocol, spoken after the server accepted
//! `sync:` on a device transport.

use std::io;
use std::path::Path;
use std::time::SystemTime;

use log::{debug, trace, warn};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::adb::{
    SyncCommand, MAX_DENT_NAME, S_IFBLK, S_IFCHR, S_IFDIR, S_IFLNK, S_IFMT, S_IFREG, SYNC_DATA_MAX,
};
use crate::codec::{
    describe_id, read_id, read_stat_fields, read_sync_message, write_sync_header,
    write_sync_request,
};
use crate::{DeviceError, Result, UnixPath, UnixPathBuf};

/// File attributes as reported by `STAT` and `DENT` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RemoteStat {
    pub mode: u32,
    pub size: u32,
    pub mtime: u32,
}

impl RemoteStat {
    /// A zero mode is how the device reports a missing path.
    pub fn exists(&self) -> bool {
        self.mode != 0
    }

    pub fn file_type(&self) -> u32 {
        self.mode & S_IFMT
    }

    pub fn is_file(&self) -> bool {
        self.file_type() == S_IFREG
    }

    pub fn is_dir(&self) -> bool {
        self.file_type() == S_IFDIR
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type() == S_IFLNK
    }

    pub fn is_device(&self) -> bool {
        matches!(self.file_type(), S_IFCHR | S_IFBLK)
    }

    pub fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDirEntry {
    pub name: String,
    pub stat: RemoteStat,
}

/// A socket switched into sync mode.
///
/// Each request runs to its terminating frame before the next one is sent.
/// Any unexpected frame is fatal; the session is dropped, and the socket
/// closed, as the error propagates.
#[derive(Debug)]
pub struct SyncSession<S> {
    stream: S,
}

fn path_arg(path: &UnixPath) -> String {
    format!("{}", path.display())
}

#[cfg(unix)]
fn local_mode(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    S_IFREG | (metadata.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
fn local_mode(metadata: &std::fs::Metadata) -> u32 {
    if metadata.permissions().readonly() {
        S_IFREG | 0o444
    } else {
        S_IFREG | 0o644
    }
}

fn local_mtime(metadata: &std::fs::Metadata) -> u32 {
    let time = metadata.modified().unwrap_or_else(|_| SystemTime::now());
    let secs = time
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();

    (secs & 0xFFFF_FFFF) as u32
}

#[cfg(unix)]
async fn apply_permissions(local: &Path, stat: &RemoteStat) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let permissions = std::fs::Permissions::from_mode(stat.permissions() & 0o777);
    tokio::fs::set_permissions(local, permissions).await
}

#[cfg(not(unix))]
async fn apply_permissions(_local: &Path, _stat: &RemoteStat) -> io::Result<()> {
    Ok(())
}

impl<S: AsyncRead + AsyncWrite + Unpin> SyncSession<S> {
    pub fn new(stream: S) -> SyncSession<S> {
        SyncSession { stream }
    }

    pub async fn stat(&mut self, path: &UnixPath) -> Result<RemoteStat> {
        write_sync_request(&mut self.stream, SyncCommand::Stat, path_arg(path).as_bytes()).await?;

        let id = read_id(&mut self.stream).await?;
        if &id != SyncCommand::Stat.code() {
            return Err(DeviceError::Protocol(format!(
                "ID_STAT not returned, got {}",
                describe_id(&id)
            )));
        }

        let stat = read_stat_fields(&mut self.stream).await?;
        trace!("sync << STAT {} {:?}", path.display(), stat);

        Ok(stat)
    }

    /// Lists `path`, calling `callback` once per `DENT` frame (including the
    /// `.` and `..` entries the device reports). Returns the number of entries.
    pub async fn list<F: FnMut(RemoteDirEntry)>(
        &mut self,
        path: &UnixPath,
        mut callback: F,
    ) -> Result<usize> {
        write_sync_request(&mut self.stream, SyncCommand::List, path_arg(path).as_bytes()).await?;

        let mut count = 0;
        loop {
            let id = read_id(&mut self.stream).await?;

            match SyncCommand::from_code(&id) {
                Some(SyncCommand::Dent) => {
                    let stat = read_stat_fields(&mut self.stream).await?;
                    let name_length = self.stream.read_u32_le().await? as usize;
                    if name_length > MAX_DENT_NAME {
                        return Err(DeviceError::Protocol(format!(
                            "DENT name of {} bytes exceeds {}",
                            name_length, MAX_DENT_NAME
                        )));
                    }
                    let mut name = vec![0; name_length];
                    self.stream.read_exact(&mut name).await?;

                    let name = String::from_utf8_lossy(&name).into_owned();
                    trace!("sync << DENT {:?} {:?}", name, stat);
                    callback(RemoteDirEntry { name, stat });
                    count += 1;
                }
                Some(SyncCommand::Done) => {
                    // DONE is padded to the size of a directory entry.
                    let mut rest = [0; 16];
                    self.stream.read_exact(&mut rest).await?;
                    break;
                }
                Some(SyncCommand::Fail) => {
                    let message = read_sync_message(&mut self.stream).await?;
                    return Err(DeviceError::Protocol(format!(
                        "LIST {} failed: {}",
                        path.display(),
                        message
                    )));
                }
                _ => {
                    return Err(DeviceError::Protocol(format!(
                        "Expected DENT or DONE while listing {}, got {}",
                        path.display(),
                        describe_id(&id)
                    )));
                }
            }
        }

        Ok(count)
    }

    /// Streams `reader` to `remote` as a file with `mode`, stamped with `mtime`.
    ///
    /// `remote` is used as is; see [`SyncSession::push`] for directory targets.
    pub async fn send<R: AsyncRead + Unpin>(
        &mut self,
        reader: &mut R,
        remote: &UnixPath,
        mode: u32,
        mtime: u32,
    ) -> Result<u64> {
        let target = format!("{},{}", remote.display(), mode);
        write_sync_request(&mut self.stream, SyncCommand::Send, target.as_bytes()).await?;

        let mut buf = vec![0; SYNC_DATA_MAX];
        let mut total = 0;

        loop {
            let len = reader.read(&mut buf).await?;

            if len == 0 {
                break;
            }

            write_sync_request(&mut self.stream, SyncCommand::Data, &buf[..len]).await?;
            total += len as u64;
        }

        // The device answers the final DONE, not the DATA chunks.
        write_sync_header(&mut self.stream, SyncCommand::Done, mtime).await?;
        self.read_status().await?;

        Ok(total)
    }

    /// Uploads the regular file `local` to `remote`. When `remote` is an
    /// existing directory the file keeps its name inside it.
    /// Returns the remote path written.
    pub async fn push(&mut self, local: &Path, remote: &UnixPath) -> Result<UnixPathBuf> {
        let metadata = tokio::fs::metadata(local).await?;
        if !metadata.is_file() {
            return Err(DeviceError::Unsupported(format!(
                "{} is not a regular file",
                local.display()
            )));
        }

        let mut target = remote.to_path_buf();
        if self.stat(remote).await?.is_dir() {
            let name = local.file_name().and_then(|n| n.to_str()).ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("Cannot name {} on the device", local.display()),
                )
            })?;
            target.push(name);
        }

        debug!("Pushing {} to {}", local.display(), target.display());

        let mut file = File::open(local).await?;
        self.send(&mut file, &target, local_mode(&metadata), local_mtime(&metadata))
            .await?;

        Ok(target)
    }

    /// Requests `remote` and copies its `DATA` frames into `writer` until `DONE`.
    pub async fn recv<W: AsyncWrite + Unpin>(
        &mut self,
        remote: &UnixPath,
        writer: &mut W,
    ) -> Result<u64> {
        write_sync_request(&mut self.stream, SyncCommand::Recv, path_arg(remote).as_bytes()).await?;

        let mut buf = vec![0; SYNC_DATA_MAX];
        let mut total = 0;

        loop {
            let id = read_id(&mut self.stream).await?;

            match SyncCommand::from_code(&id) {
                Some(SyncCommand::Data) => {
                    let len = self.stream.read_u32_le().await? as usize;
                    if len > SYNC_DATA_MAX {
                        return Err(DeviceError::Protocol(format!(
                            "DATA frame of {} bytes exceeds {}",
                            len, SYNC_DATA_MAX
                        )));
                    }
                    self.stream.read_exact(&mut buf[..len]).await?;
                    writer.write_all(&buf[..len]).await?;
                    total += len as u64;
                }
                Some(SyncCommand::Done) => {
                    let _ = self.stream.read_u32_le().await?;
                    break;
                }
                Some(SyncCommand::Fail) => {
                    let message = read_sync_message(&mut self.stream).await?;
                    return Err(DeviceError::Adb(message));
                }
                _ => {
                    return Err(DeviceError::Protocol(format!(
                        "Expected DATA or DONE while receiving {}, got {}",
                        remote.display(),
                        describe_id(&id)
                    )));
                }
            }
        }
        writer.flush().await?;

        Ok(total)
    }

    /// Downloads `remote` into the local file `local`.
    ///
    /// Nothing is created locally unless the remote path is a file or device
    /// node, and a transfer that fails part way removes the local file.
    pub async fn pull(&mut self, remote: &UnixPath, local: &Path) -> Result<u64> {
        let stat = self.stat(remote).await?;

        if !stat.exists() {
            return Err(DeviceError::RemoteNotFound(remote.to_path_buf()));
        }
        if stat.is_dir() {
            return Err(DeviceError::Unsupported(format!(
                "{} is a directory; recursive pull is not supported",
                remote.display()
            )));
        }
        if !(stat.is_file() || stat.is_device()) {
            return Err(DeviceError::Unsupported(format!(
                "{} is not a file",
                remote.display()
            )));
        }

        debug!("Pulling {} to {}", remote.display(), local.display());

        let mut file = File::create(local).await?;
        match self.recv(remote, &mut file).await {
            Ok(total) => {
                drop(file);
                if let Err(e) = apply_permissions(local, &stat).await {
                    warn!("Failed to set permissions on {}: {}", local.display(), e);
                }
                Ok(total)
            }
            Err(e) => {
                drop(file);
                if let Err(rm) = tokio::fs::remove_file(local).await {
                    warn!("Failed to remove {}: {}", local.display(), rm);
                }
                Err(e)
            }
        }
    }

    async fn read_status(&mut self) -> Result<()> {
        let id = read_id(&mut self.stream).await?;

        match SyncCommand::from_code(&id) {
            Some(SyncCommand::Okay) => {
                let _ = self.stream.read_u32_le().await?;
                trace!("sync << OKAY");
                Ok(())
            }
            Some(SyncCommand::Fail) => {
                let message = read_sync_message(&mut self.stream).await?;
                Err(DeviceError::Adb(message))
            }
            _ => Err(DeviceError::Protocol(format!(
                "Expected OKAY or FAIL, got {}",
                describe_id(&id)
            ))),
        }
    }

    /// Ends the session. The device sends no reply.
    pub async fn quit(mut self) -> Result<()> {
        write_sync_header(&mut self.stream, SyncCommand::Quit, 0).await?;
        self.stream.shutdown().await?;

        Ok(())
    }
}
