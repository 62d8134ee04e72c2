//! IPC Server - Unix socket server for the daemon
//!
//! One connection carries any number of newline-terminated requests. The
//! read side keeps its buffer for the life of the connection, so requests a
//! client writes back to back are served in order.

use forgepm_core::{Error, Result};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, warn};

use crate::protocol::{Request, Response};

/// Upper bound on one request line
const MAX_MESSAGE_SIZE: u64 = 1024 * 1024;

pub struct IpcServer {
    socket_path: PathBuf,
    listener: UnixListener,
}

impl IpcServer {
    /// Bind the daemon socket
    ///
    /// A leftover socket file nobody answers on is replaced. A socket a live
    /// daemon still serves is left alone and binding fails.
    pub async fn bind(socket_path: &Path) -> Result<Self> {
        if socket_path.exists() {
            if UnixStream::connect(socket_path).await.is_ok() {
                return Err(Error::ipc(format!(
                    "another daemon is already listening on {}",
                    socket_path.display()
                )));
            }
            info!("Removing stale socket {}", socket_path.display());
            std::fs::remove_file(socket_path)?;
        }
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(socket_path)
            .map_err(|e| Error::ipc(format!("Failed to bind socket: {}", e)))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))
                .map_err(|e| Error::ipc(format!("Failed to set socket permissions: {}", e)))?;
        }

        info!("IPC server listening on {}", socket_path.display());

        Ok(Self {
            socket_path: socket_path.to_path_buf(),
            listener,
        })
    }

    pub async fn accept(&self) -> Result<IpcConnection> {
        let (stream, _) = self
            .listener
            .accept()
            .await
            .map_err(|e| Error::ipc(format!("Accept failed: {}", e)))?;

        debug!("Accepted IPC connection");
        Ok(IpcConnection::new(stream))
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                error!("Failed to remove socket file: {}", e);
            }
        }
    }
}

/// One line received from a client
#[derive(Debug)]
pub enum Incoming {
    Request(Request),
    /// A line that is not a request; the connection stays usable
    Malformed(String),
}

/// Single IPC connection
pub struct IpcConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl IpcConnection {
    pub fn new(stream: UnixStream) -> Self {
        let (read, writer) = stream.into_split();
        Self {
            reader: BufReader::new(read),
            writer,
        }
    }

    /// Next line from the client; `None` once the peer hung up
    ///
    /// A line longer than the size limit is an error and the connection
    /// should be dropped, since the rest of it cannot be resynchronised.
    pub async fn read_request(&mut self) -> Result<Option<Incoming>> {
        let mut line = String::new();
        let read = (&mut self.reader)
            .take(MAX_MESSAGE_SIZE)
            .read_line(&mut line)
            .await
            .map_err(|e| Error::ipc(format!("Read error: {}", e)))?;

        if read == 0 {
            return Ok(None);
        }
        if read as u64 >= MAX_MESSAGE_SIZE && !line.ends_with('\n') {
            return Err(Error::ipc(format!(
                "Request exceeds {} bytes",
                MAX_MESSAGE_SIZE
            )));
        }

        let line = line.trim();
        if line.is_empty() {
            return Ok(Some(Incoming::Malformed("empty request".to_string())));
        }

        match serde_json::from_str::<Request>(line) {
            Ok(request) => {
                debug!("Received request: {:?}", request);
                Ok(Some(Incoming::Request(request)))
            }
            Err(e) => {
                warn!("Rejected malformed request: {}", e);
                Ok(Some(Incoming::Malformed(format!("Invalid request: {}", e))))
            }
        }
    }

    pub async fn send_response(&mut self, response: &Response) -> Result<()> {
        let mut json = serde_json::to_string(response)?;
        json.push('\n');

        self.writer
            .write_all(json.as_bytes())
            .await
            .map_err(|e| Error::ipc(format!("Write error: {}", e)))?;
        self.writer
            .flush()
            .await
            .map_err(|e| Error::ipc(format!("Flush error: {}", e)))?;

        debug!("Sent response: {:?}", response);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn connected() -> (tempfile::TempDir, IpcServer, UnixStream) {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("daemon.sock");
        let server = IpcServer::bind(&socket_path).await.unwrap();
        let client = UnixStream::connect(&socket_path).await.unwrap();
        (dir, server, client)
    }

    #[tokio::test]
    async fn test_server_bind_and_cleanup() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("daemon.sock");

        let server = IpcServer::bind(&socket_path).await.unwrap();
        assert!(socket_path.exists());
        assert_eq!(server.socket_path(), socket_path.as_path());

        drop(server);
        assert!(!socket_path.exists());
    }

    #[tokio::test]
    async fn test_bind_replaces_stale_socket() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("daemon.sock");
        std::fs::write(&socket_path, b"stale").unwrap();

        let _server = IpcServer::bind(&socket_path).await.unwrap();
        assert!(socket_path.exists());
    }

    #[tokio::test]
    async fn test_bind_refuses_live_socket() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("daemon.sock");
        let _running = IpcServer::bind(&socket_path).await.unwrap();

        let err = IpcServer::bind(&socket_path).await.err().unwrap();
        assert!(err.to_string().contains("already listening"));
        assert!(socket_path.exists());
    }

    #[tokio::test]
    async fn test_back_to_back_requests_on_one_connection() {
        let (_dir, server, mut client) = connected().await;
        client
            .write_all(b"{\"type\":\"ping\"}\n{\"type\":\"list_instances\"}\n")
            .await
            .unwrap();

        let mut conn = server.accept().await.unwrap();
        assert!(matches!(
            conn.read_request().await.unwrap(),
            Some(Incoming::Request(Request::Ping))
        ));
        assert!(matches!(
            conn.read_request().await.unwrap(),
            Some(Incoming::Request(Request::ListInstances))
        ));

        drop(client);
        assert!(conn.read_request().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_malformed_line_keeps_connection() {
        let (_dir, server, mut client) = connected().await;
        client
            .write_all(b"{\"type\":\"nope\"}\n{\"type\":\"ping\"}\n")
            .await
            .unwrap();

        let mut conn = server.accept().await.unwrap();
        match conn.read_request().await.unwrap() {
            Some(Incoming::Malformed(reason)) => assert!(reason.contains("Invalid request")),
            other => panic!("expected a malformed line, got {:?}", other),
        }
        assert!(matches!(
            conn.read_request().await.unwrap(),
            Some(Incoming::Request(Request::Ping))
        ));
    }

    #[tokio::test]
    async fn test_oversized_request_is_error() {
        let (_dir, server, mut client) = connected().await;
        tokio::spawn(async move {
            let chunk = vec![b'x'; 64 * 1024];
            for _ in 0..20 {
                if client.write_all(&chunk).await.is_err() {
                    break;
                }
            }
        });

        let mut conn = server.accept().await.unwrap();
        let err = conn.read_request().await.unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }
}
