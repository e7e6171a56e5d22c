/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Framing for the two wire formats spoken to the adb server.
//!
//! Host frames are ASCII: a four digit lowercase hex length followed by the
//! payload. Sync frames are binary: a four byte id followed by little-endian
//! 32-bit fields whose layout depends on the id.

use log::trace;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::adb::{SyncCommand, MAX_HOST_PAYLOAD, MAX_SYNC_MESSAGE};
use crate::sync::RemoteStat;
use crate::{DeviceError, Result};

/// Prefixes `payload` with its length as four lowercase hex digits.
pub fn encode_message(payload: &str) -> Result<String> {
    if payload.len() > MAX_HOST_PAYLOAD {
        return Err(DeviceError::FrameTooLong(payload.len()));
    }

    Ok(format!("{:04x}{}", payload.len(), payload))
}

/// Reads the payload length of a host message from the stream.
pub async fn read_length<R: AsyncRead + Unpin>(stream: &mut R) -> Result<usize> {
    let mut bytes: [u8; 4] = [0; 4];
    stream.read_exact(&mut bytes).await?;

    std::str::from_utf8(&bytes)
        .ok()
        .and_then(|digits| usize::from_str_radix(digits, 16).ok())
        .ok_or_else(|| DeviceError::Protocol(format!("Bad length: {}", describe_id(&bytes))))
}

/// Reads a hex length followed by exactly that many bytes.
pub async fn read_hex_prefixed<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Vec<u8>> {
    let n = read_length(stream).await?;
    let mut body = vec![0; n];
    stream.read_exact(&mut body).await?;

    Ok(body)
}

pub async fn read_id<R: AsyncRead + Unpin>(stream: &mut R) -> Result<[u8; 4]> {
    let mut id = [0; 4];
    stream.read_exact(&mut id).await?;

    Ok(id)
}

/// Renders a frame id for error messages, keeping non-ASCII bytes readable.
pub fn describe_id(id: &[u8; 4]) -> String {
    format!("{:?}", bstr::BStr::new(id))
}

/// Writes a `{id, arg}` sync request header.
pub async fn write_sync_header<W: AsyncWrite + Unpin>(
    writer: &mut W,
    command: SyncCommand,
    arg: u32,
) -> Result<()> {
    trace!("sync >> {} {}", command, arg);

    let mut frame = [0; 8];
    frame[0..4].copy_from_slice(command.code());
    frame[4..8].copy_from_slice(&arg.to_le_bytes());
    writer.write_all(&frame).await?;

    Ok(())
}

/// Writes a sync request whose argument is the length of `payload`, then the payload.
pub async fn write_sync_request<W: AsyncWrite + Unpin>(
    writer: &mut W,
    command: SyncCommand,
    payload: &[u8],
) -> Result<()> {
    let length = u32::try_from(payload.len())?;

    trace!(
        "sync >> {} {} {:?}",
        command,
        length,
        bstr::BStr::new(&payload[..payload.len().min(64)])
    );

    let mut frame = Vec::with_capacity(8 + payload.len());
    frame.extend_from_slice(command.code());
    frame.extend_from_slice(&length.to_le_bytes());
    frame.extend_from_slice(payload);
    writer.write_all(&frame).await?;

    Ok(())
}

/// Reads the `{mode, size, time}` fields that follow a `STAT` or `DENT` id.
pub async fn read_stat_fields<R: AsyncRead + Unpin>(reader: &mut R) -> Result<RemoteStat> {
    let mode = reader.read_u32_le().await?;
    let size = reader.read_u32_le().await?;
    let mtime = reader.read_u32_le().await?;

    Ok(RemoteStat { mode, size, mtime })
}

/// Reads a little-endian length followed by a message, as carried by `FAIL` frames.
pub async fn read_sync_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<String> {
    let n = reader.read_u32_le().await? as usize;
    if n > MAX_SYNC_MESSAGE {
        return Err(DeviceError::Protocol(format!(
            "Sync message of {} bytes exceeds {}",
            n, MAX_SYNC_MESSAGE
        )));
    }
    let mut message = vec![0; n];
    reader.read_exact(&mut message).await?;

    Ok(String::from_utf8_lossy(&message).into_owned())
}
