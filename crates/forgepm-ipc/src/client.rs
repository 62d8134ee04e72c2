//! IPC Client - Unix socket client for the CLI

use forgepm_core::{Error, Result};
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::{debug, info, warn};

use crate::protocol::{Request, Response};

const DAEMON_BINARY: &str = "forgepmd";

pub struct IpcClient {
    socket_path: PathBuf,
    autostart: bool,
}

impl IpcClient {
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            autostart: true,
        }
    }

    /// Never spawn the daemon; fail with `DaemonNotRunning` instead
    pub fn without_autostart(mut self) -> Self {
        self.autostart = false;
        self
    }

    pub fn is_daemon_running(&self) -> bool {
        self.socket_path.exists()
    }

    /// Connect to daemon (without auto-start)
    pub async fn connect(&self) -> Result<UnixStream> {
        if !self.socket_path.exists() {
            return Err(Error::DaemonNotRunning);
        }

        UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused => {
                    Error::DaemonNotRunning
                }
                _ => Error::IpcConnectionFailed(e.to_string()),
            })
    }

    /// Connect to daemon, starting it if necessary
    pub async fn connect_or_start(&self) -> Result<UnixStream> {
        match self.connect().await {
            Ok(stream) => Ok(stream),
            Err(Error::DaemonNotRunning) if self.autostart => {
                info!("Daemon not running, starting...");
                self.start_daemon()?;

                for i in 0..50 {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    if let Ok(stream) = self.connect().await {
                        info!("Connected to daemon after {}ms", (i + 1) * 100);
                        return Ok(stream);
                    }
                }

                Err(Error::ipc("Daemon failed to start within timeout"))
            }
            Err(e) => Err(e),
        }
    }

    fn start_daemon(&self) -> Result<()> {
        let exe = std::env::current_exe()?;
        let exe_dir = exe
            .parent()
            .ok_or_else(|| Error::ipc("Cannot determine executable directory"))?;

        let daemon_path = exe_dir.join(DAEMON_BINARY);
        let daemon_exe = if daemon_path.exists() {
            daemon_path
        } else {
            warn!("{} not found at {}, trying PATH", DAEMON_BINARY, daemon_path.display());
            PathBuf::from(DAEMON_BINARY)
        };

        info!("Starting daemon: {}", daemon_exe.display());

        Command::new(&daemon_exe)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(|e| Error::ipc(format!("Failed to start daemon: {}", e)))?;

        Ok(())
    }

    /// Send a request and receive response
    pub async fn send(&self, request: &Request) -> Result<Response> {
        let mut stream = self.connect_or_start().await?;

        let mut json = serde_json::to_string(request)?;
        json.push('\n');

        stream
            .write_all(json.as_bytes())
            .await
            .map_err(|e| Error::ipc(format!("Write error: {}", e)))?;
        stream
            .flush()
            .await
            .map_err(|e| Error::ipc(format!("Flush error: {}", e)))?;

        debug!("Sent request: {:?}", request);

        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader
            .read_line(&mut line)
            .await
            .map_err(|e| Error::ipc(format!("Read error: {}", e)))?;

        if line.trim().is_empty() {
            return Err(Error::ipc("Daemon closed the connection without a response"));
        }

        let response: Response = serde_json::from_str(line.trim())
            .map_err(|e| Error::ipc(format!("Invalid response: {}", e)))?;

        debug!("Received response: {:?}", response);
        Ok(response)
    }

    /// Ping the daemon
    pub async fn ping(&self) -> Result<bool> {
        match self.send(&Request::Ping).await {
            Ok(Response::Pong) => Ok(true),
            Ok(_) => Ok(false),
            Err(Error::DaemonNotRunning) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{Incoming, IpcServer};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_connect_no_daemon() {
        let dir = tempdir().unwrap();
        let client = IpcClient::new(dir.path().join("nonexistent.sock"));
        assert!(!client.is_daemon_running());
        assert!(matches!(client.connect().await, Err(Error::DaemonNotRunning)));
    }

    #[tokio::test]
    async fn test_ping_without_autostart() {
        let dir = tempdir().unwrap();
        let client = IpcClient::new(dir.path().join("daemon.sock")).without_autostart();
        assert!(!client.ping().await.unwrap());
    }

    #[tokio::test]
    async fn test_request_response_exchange() {
        let dir = tempdir().unwrap();
        let socket = dir.path().join("daemon.sock");
        let server = IpcServer::bind(&socket).await.unwrap();

        let handle = tokio::spawn(async move {
            let mut conn = server.accept().await.unwrap();
            let incoming = conn.read_request().await.unwrap().unwrap();
            let response = match incoming {
                Incoming::Request(Request::GetInstance { id }) => {
                    Response::from(Error::InstanceNotFound(id))
                }
                _ => Response::Pong,
            };
            conn.send_response(&response).await.unwrap();
            server
        });

        let client = IpcClient::new(socket).without_autostart();
        let response = client
            .send(&Request::GetInstance {
                id: "ghost".to_string(),
            })
            .await
            .unwrap();

        match response {
            Response::Error { message, code } => {
                assert_eq!(code, 404);
                assert!(message.contains("ghost"));
            }
            other => panic!("unexpected response {:?}", other),
        }
        drop(handle.await.unwrap());
    }
}
