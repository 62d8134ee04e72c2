//! Stand-ins for the game server and its remote console

use forgepm_core::SERVER_EXECUTABLE;
use forgepm_rcon::packet::{Packet, SERVERDATA_AUTH_RESPONSE, SERVERDATA_RESPONSE_VALUE};
use parking_lot::Mutex;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;

#[derive(Debug, Clone, Copy)]
pub enum ServerScript {
    /// Runs until SIGTERM, then exits cleanly
    Graceful,
    /// Ignores SIGTERM
    IgnoreTerm,
    /// Dies on its own shortly after launch
    CrashSoon,
}

/// Write an executable fake server named like the real one into `dir`
pub fn fake_server(dir: &Path, script: ServerScript) -> PathBuf {
    let body = match script {
        ServerScript::Graceful => {
            "#!/bin/sh\necho \"fake server up $*\"\ntrap 'exit 0' TERM\nwhile true; do sleep 1 & wait $!; done\n"
        }
        ServerScript::IgnoreTerm => "#!/bin/sh\ntrap '' TERM\nwhile true; do sleep 1; done\n",
        ServerScript::CrashSoon => "#!/bin/sh\necho booting\nsleep 0.3\necho fatal 1>&2\nexit 3\n",
    };

    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(SERVER_EXECUTABLE);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Poll `check` until it holds or `limit` passes
pub async fn wait_for<F: Fn() -> bool>(check: F, limit: Duration) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    check()
}

/// Remote console stand-in answering commands by prefix
pub struct FakeConsole {
    pub port: u16,
    received: Arc<Mutex<Vec<String>>>,
}

impl FakeConsole {
    /// `replies` maps a command prefix to the canned output; unmatched
    /// commands get an empty body
    pub async fn spawn(password: &str, replies: Vec<(&str, &str)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let received = Arc::new(Mutex::new(Vec::new()));
        let password = password.to_string();
        let replies: Vec<(String, String)> = replies
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let log = Arc::clone(&received);
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let password = password.clone();
                let replies = replies.clone();
                let log = Arc::clone(&log);
                tokio::spawn(async move {
                    let Ok(auth) = Packet::read_from(&mut stream).await else {
                        return;
                    };
                    let auth_id = if auth.body == password { auth.id } else { -1 };
                    let _ = Packet::new(auth_id, SERVERDATA_AUTH_RESPONSE, "")
                        .write_to(&mut stream)
                        .await;

                    while let Ok(req) = Packet::read_from(&mut stream).await {
                        log.lock().push(req.body.clone());
                        let body = replies
                            .iter()
                            .find(|(prefix, _)| req.body.starts_with(prefix.as_str()))
                            .map(|(_, reply)| reply.clone())
                            .unwrap_or_default();
                        let reply = Packet::new(req.id, SERVERDATA_RESPONSE_VALUE, body);
                        if reply.write_to(&mut stream).await.is_err() {
                            return;
                        }
                    }
                });
            }
        });

        Self { port, received }
    }

    pub fn received(&self) -> Vec<String> {
        self.received.lock().clone()
    }
}

/// Minimal game config with a console section and a scenario
pub fn write_game_config(path: &Path, port: u16, password: &str, scenario: &str) {
    let doc = serde_json::json!({
        "bindPort": 2001,
        "rcon": { "port": port, "password": password },
        "game": { "name": "Test Server", "scenarioId": scenario, "maxPlayers": 64 }
    });
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, serde_json::to_vec_pretty(&doc).unwrap()).unwrap();
}
