//! Remote-console session and lazily connecting client

use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{RconError, Result};
use crate::packet::{
    Packet, SERVERDATA_AUTH, SERVERDATA_AUTH_RESPONSE, SERVERDATA_EXECCOMMAND,
    SERVERDATA_RESPONSE_VALUE,
};

/// Bound a future by the caller's deadline
async fn with_deadline<T, F>(timeout: Duration, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(RconError::Timeout(timeout.as_millis() as u64)),
    }
}

/// One authenticated connection
pub struct Session {
    stream: TcpStream,
    next_id: i32,
    timeout: Duration,
}

impl Session {
    /// Connect and authenticate
    pub async fn connect(address: &str, password: &str, timeout: Duration) -> Result<Self> {
        let stream = with_deadline(timeout, async {
            TcpStream::connect(address).await.map_err(RconError::from)
        })
        .await?;

        let mut session = Self {
            stream,
            next_id: 1,
            timeout,
        };
        session.authenticate(password).await?;
        debug!("RCON session established with {}", address);
        Ok(session)
    }

    fn allocate_id(&mut self) -> i32 {
        let id = self.next_id;
        // -1 is the auth failure marker, never hand it out
        self.next_id = if self.next_id >= i32::MAX { 1 } else { self.next_id + 1 };
        id
    }

    async fn authenticate(&mut self, password: &str) -> Result<()> {
        let id = self.allocate_id();
        with_deadline(self.timeout, auth_exchange(&mut self.stream, id, password)).await
    }

    /// Execute a command and wait for its correlated response
    pub async fn send(&mut self, command: &str) -> Result<String> {
        let id = self.allocate_id();
        with_deadline(self.timeout, command_exchange(&mut self.stream, id, command)).await
    }

    pub async fn close(mut self) {
        use tokio::io::AsyncWriteExt;
        let _ = self.stream.shutdown().await;
    }
}

async fn auth_exchange(stream: &mut TcpStream, id: i32, password: &str) -> Result<()> {
    Packet::new(id, SERVERDATA_AUTH, password).write_to(stream).await?;

    loop {
        let packet = Packet::read_from(stream).await?;
        // Some servers send an empty RESPONSE_VALUE ahead of the auth answer
        if packet.kind == SERVERDATA_RESPONSE_VALUE {
            continue;
        }
        if packet.kind != SERVERDATA_AUTH_RESPONSE {
            return Err(RconError::protocol(format!(
                "unexpected packet type {} during auth",
                packet.kind
            )));
        }
        if packet.id == -1 {
            return Err(RconError::AuthFailed);
        }
        if packet.id != id {
            return Err(RconError::IdMismatch {
                sent: id,
                received: packet.id,
            });
        }
        return Ok(());
    }
}

async fn command_exchange(stream: &mut TcpStream, id: i32, command: &str) -> Result<String> {
    Packet::new(id, SERVERDATA_EXECCOMMAND, command)
        .write_to(stream)
        .await?;

    let packet = Packet::read_from(stream).await?;
    if packet.id != id {
        return Err(RconError::IdMismatch {
            sent: id,
            received: packet.id,
        });
    }
    Ok(packet.body)
}

/// Client that keeps at most one idle session
///
/// The session is opened on first use and dropped after any failure, so the
/// next call reconnects. No retries happen here.
pub struct RconClient {
    address: String,
    password: String,
    timeout: Duration,
    session: Mutex<Option<Session>>,
}

impl RconClient {
    pub fn new(address: impl Into<String>, password: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            password: password.into(),
            timeout,
            session: Mutex::new(None),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Whether this client talks to the given endpoint with the given secret
    pub fn matches(&self, address: &str, password: &str) -> bool {
        self.address == address && self.password == password
    }

    pub async fn send(&self, command: &str) -> Result<String> {
        let mut guard = self.session.lock().await;

        let session = match guard.as_mut() {
            Some(session) => session,
            None => {
                let session = Session::connect(&self.address, &self.password, self.timeout).await?;
                guard.insert(session)
            }
        };

        match session.send(command).await {
            Ok(body) => Ok(body),
            Err(e) => {
                debug!("Dropping RCON session to {}: {}", self.address, e);
                *guard = None;
                Err(e)
            }
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.session.lock().await.is_some()
    }

    pub async fn close(&self) {
        if let Some(session) = self.session.lock().await.take() {
            session.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::net::TcpListener;

    #[derive(Clone, Copy)]
    enum Behavior {
        Echo,
        RejectAuth,
        WrongId,
        Silent,
        PrefixEmptyBeforeAuth,
    }

    /// Fake console: checks the password and echoes commands back
    async fn spawn_server(behavior: Behavior) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let connections = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&connections);

        tokio::spawn(async move {
            loop {
                let (mut stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => return,
                };
                counter.fetch_add(1, Ordering::SeqCst);

                tokio::spawn(async move {
                    let auth = match Packet::read_from(&mut stream).await {
                        Ok(p) => p,
                        Err(_) => return,
                    };
                    if matches!(behavior, Behavior::PrefixEmptyBeforeAuth) {
                        let _ = Packet::new(auth.id, SERVERDATA_RESPONSE_VALUE, "")
                            .write_to(&mut stream)
                            .await;
                    }
                    let auth_id = if matches!(behavior, Behavior::RejectAuth) || auth.body != "pw" {
                        -1
                    } else {
                        auth.id
                    };
                    let _ = Packet::new(auth_id, SERVERDATA_AUTH_RESPONSE, "")
                        .write_to(&mut stream)
                        .await;

                    while let Ok(req) = Packet::read_from(&mut stream).await {
                        let reply_id = match behavior {
                            Behavior::WrongId => req.id + 100,
                            Behavior::Silent => continue,
                            _ => req.id,
                        };
                        if req.body == "hangup" {
                            return;
                        }
                        let reply = Packet::new(
                            reply_id,
                            SERVERDATA_RESPONSE_VALUE,
                            format!("echo: {}", req.body),
                        );
                        if reply.write_to(&mut stream).await.is_err() {
                            return;
                        }
                    }
                });
            }
        });

        (addr, connections)
    }

    #[tokio::test]
    async fn test_send_returns_correlated_response() {
        let (addr, _) = spawn_server(Behavior::Echo).await;
        let mut session = Session::connect(&addr, "pw", Duration::from_secs(2)).await.unwrap();
        assert_eq!(session.send("#players").await.unwrap(), "echo: #players");
        assert_eq!(session.send("#status").await.unwrap(), "echo: #status");
        session.close().await;
    }

    #[tokio::test]
    async fn test_auth_failure() {
        let (addr, _) = spawn_server(Behavior::RejectAuth).await;
        let result = Session::connect(&addr, "pw", Duration::from_secs(2)).await;
        assert!(matches!(result, Err(RconError::AuthFailed)));

        let (addr, _) = spawn_server(Behavior::Echo).await;
        let result = Session::connect(&addr, "wrong", Duration::from_secs(2)).await;
        assert!(matches!(result, Err(RconError::AuthFailed)));
    }

    #[tokio::test]
    async fn test_empty_packet_before_auth_is_skipped() {
        let (addr, _) = spawn_server(Behavior::PrefixEmptyBeforeAuth).await;
        let mut session = Session::connect(&addr, "pw", Duration::from_secs(2)).await.unwrap();
        assert_eq!(session.send("hi").await.unwrap(), "echo: hi");
    }

    #[tokio::test]
    async fn test_mismatched_id_is_error() {
        let (addr, _) = spawn_server(Behavior::WrongId).await;
        let mut session = Session::connect(&addr, "pw", Duration::from_secs(2)).await.unwrap();
        let err = session.send("#players").await.unwrap_err();
        match err {
            RconError::IdMismatch { sent, received } => assert_eq!(received, sent + 100),
            other => panic!("expected id mismatch, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unresponsive_server_times_out() {
        let (addr, _) = spawn_server(Behavior::Silent).await;
        let mut session = Session::connect(&addr, "pw", Duration::from_millis(200)).await.unwrap();
        let err = session.send("#players").await.unwrap_err();
        assert!(matches!(err, RconError::Timeout(200)));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let client = RconClient::new(addr, "pw", Duration::from_secs(1));
        assert!(client.send("#players").await.is_err());
        assert!(!client.is_connected().await);
    }

    #[tokio::test]
    async fn test_client_reuses_session() {
        let (addr, connections) = spawn_server(Behavior::Echo).await;
        let client = RconClient::new(addr, "pw", Duration::from_secs(2));

        assert_eq!(client.send("a").await.unwrap(), "echo: a");
        assert_eq!(client.send("b").await.unwrap(), "echo: b");
        assert_eq!(connections.load(Ordering::SeqCst), 1);
        assert!(client.is_connected().await);
    }

    #[tokio::test]
    async fn test_client_reconnects_after_io_failure() {
        let (addr, connections) = spawn_server(Behavior::Echo).await;
        let client = RconClient::new(addr, "pw", Duration::from_secs(2));

        assert!(client.send("hangup").await.is_err());
        assert!(!client.is_connected().await);

        assert_eq!(client.send("again").await.unwrap(), "echo: again");
        assert_eq!(connections.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_client_drops_session_on_mismatch() {
        let (addr, _) = spawn_server(Behavior::WrongId).await;
        let client = RconClient::new(addr.clone(), "pw", Duration::from_secs(2));
        assert!(matches!(
            client.send("x").await,
            Err(RconError::IdMismatch { .. })
        ));
        assert!(!client.is_connected().await);
        assert!(client.matches(&addr, "pw"));
        assert!(!client.matches(&addr, "other"));
    }
}
