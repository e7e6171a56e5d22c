/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use log::{debug, info, trace, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::process::Command;

use crate::adb::SyncCommand;
use crate::codec::{describe_id, encode_message, read_hex_prefixed, read_id};
use crate::sync::SyncSession;
use crate::{DeviceError, Host, Result};

/// Number of connection attempts before giving up on the server.
pub const CONNECT_ATTEMPTS: usize = 3;

/// Size of each read when streaming command output.
const READ_CHUNK: usize = 4096;

/// Brings up (or tears down) the adb server process.
#[async_trait]
pub trait ServerLauncher: fmt::Debug + Send + Sync {
    async fn start_server(&self, port: u16) -> Result<()>;

    async fn kill_server(&self, port: u16) -> Result<()>;
}

/// Launches the server through the `adb` command line tool.
#[derive(Debug, Clone, PartialEq)]
pub struct AdbBinary {
    pub path: PathBuf,
}

impl Default for AdbBinary {
    /// Leaves the lookup of `adb` on `PATH` to the time it is spawned.
    fn default() -> AdbBinary {
        AdbBinary {
            path: PathBuf::from("adb"),
        }
    }
}

impl AdbBinary {
    /// Resolves `adb` on `PATH` now, so a missing tool is reported up front.
    pub fn locate() -> Result<AdbBinary> {
        let path = which::which("adb")?;
        debug!("Found adb at {}", path.display());
        Ok(AdbBinary { path })
    }

    async fn run(&self, port: u16, command: &str) -> Result<()> {
        debug!("Running {} -P {} {}", self.path.display(), port, command);

        let output = Command::new(&self.path)
            .arg("-P")
            .arg(port.to_string())
            .arg(command)
            .output()
            .await?;

        if output.status.success() {
            Ok(())
        } else {
            Err(DeviceError::Connection(format!(
                "`adb {}` failed with {}: {}",
                command,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

#[async_trait]
impl ServerLauncher for AdbBinary {
    async fn start_server(&self, port: u16) -> Result<()> {
        self.run(port, "start-server").await
    }

    async fn kill_server(&self, port: u16) -> Result<()> {
        self.run(port, "kill-server").await
    }
}

/// One socket to the adb server, carrying a single request/response exchange.
///
/// Dropping the connection closes the socket, so every error path that
/// propagates out of an operation releases it.
#[derive(Debug)]
pub struct ServerConnection<S = TcpStream> {
    stream: S,
}

impl<S: AsyncRead + AsyncWrite + Unpin> ServerConnection<S> {
    pub fn new(stream: S) -> ServerConnection<S> {
        ServerConnection { stream }
    }

    /// Sends one host frame and checks the status the server answers with.
    pub async fn send_command(&mut self, command: &str) -> Result<()> {
        let message = encode_message(command)?;

        trace!("server >> {:?}", command);
        self.stream.write_all(message.as_bytes()).await?;

        self.read_status().await
    }

    /// Reads an `OKAY` or `FAIL` status frame.
    pub async fn read_status(&mut self) -> Result<()> {
        let status = read_id(&mut self.stream).await?;

        if &status == SyncCommand::Okay.code() {
            trace!("server << OKAY");
            Ok(())
        } else if &status == SyncCommand::Fail.code() {
            let reason = read_hex_prefixed(&mut self.stream).await?;
            let reason = String::from_utf8_lossy(&reason).into_owned();
            debug!("server << FAIL {:?}", reason);
            Err(DeviceError::Adb(reason))
        } else {
            Err(DeviceError::Protocol(format!(
                "Bad response: {}",
                describe_id(&status)
            )))
        }
    }

    /// Reads a hex length prefixed response body.
    pub async fn read_body(&mut self) -> Result<Vec<u8>> {
        let body = read_hex_prefixed(&mut self.stream).await?;
        trace!("server << {:?}", bstr::BStr::new(&body));

        Ok(body)
    }

    /// Blocks until the server writes the next four bytes.
    pub async fn read_signal(&mut self) -> Result<[u8; 4]> {
        read_id(&mut self.stream).await
    }

    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.stream.write_all(data).await?;
        Ok(())
    }

    /// Streams everything up to EOF into `sink` in small reads.
    pub async fn copy_to<W: AsyncWrite + Unpin>(&mut self, sink: &mut W) -> Result<u64> {
        let mut buf = [0; READ_CHUNK];
        let mut total = 0;

        loop {
            let n = self.stream.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            sink.write_all(&buf[..n]).await?;
            total += n as u64;
        }
        sink.flush().await?;

        Ok(total)
    }

    /// Reads and throws away everything up to EOF.
    pub async fn drain(&mut self) -> Result<u64> {
        self.copy_to(&mut tokio::io::sink()).await
    }

    /// Hands the socket to the sync sub-protocol; the server must already
    /// have accepted `sync:`.
    pub fn into_sync(self) -> SyncSession<S> {
        SyncSession::new(self.stream)
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl Host {
    fn address(&self) -> String {
        format!(
            "{}:{}",
            self.host.clone().unwrap_or_else(|| "localhost".to_owned()),
            self.port()
        )
    }

    /// Opens a socket to the server, starting the server between failed attempts.
    pub async fn connect(&self) -> Result<ServerConnection> {
        let address = self.address();
        let mut last_error = None;

        for attempt in 1..=CONNECT_ATTEMPTS {
            match TcpStream::connect(&address).await {
                Ok(stream) => {
                    trace!("Connected to adb server at {}", address);
                    return Ok(ServerConnection::new(stream));
                }
                Err(e) => {
                    warn!(
                        "Could not connect to adb server at {} (attempt {}/{}): {}",
                        address, attempt, CONNECT_ATTEMPTS, e
                    );
                    last_error = Some(e);
                }
            }

            if attempt < CONNECT_ATTEMPTS {
                info!("Starting adb server on port {}", self.port());
                if let Err(e) = self.launcher.start_server(self.port()).await {
                    warn!("Failed to start adb server: {}", e);
                }
            }
        }

        Err(DeviceError::Connection(match last_error {
            Some(e) => format!("Could not connect to server: {}", e),
            None => "Could not connect to server".to_owned(),
        }))
    }

    /// Sends a host command and returns the length prefixed body of the reply.
    pub async fn host_query(&self, command: &str) -> Result<Vec<u8>> {
        let mut connection = self.connect().await?;
        connection.send_command(command).await?;
        connection.read_body().await
    }

    pub async fn host_query_to_string(&self, command: &str) -> Result<String> {
        let body = self.host_query(command).await?;
        Ok(std::str::from_utf8(&body)?.to_owned())
    }
}
