//! Main daemon orchestration

use forgepm_core::{
    JsonStore, Result, SettingsProvider, SettingsStore, CHAT_POLL_INTERVAL, METRICS_DIR,
    METRICS_INTERVAL, PLAYER_POLL_INTERVAL, SETTINGS_FILE, SOCKET_FILE,
};
use forgepm_ipc::{Incoming, IpcServer, Request, Response};
use forgepm_logs::LogSink;
use forgepm_notify::Notifier;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::chat::ChatMonitor;
use crate::handlers::RequestHandler;
use crate::mapchange::{MapChangeService, MappingManager};
use crate::metrics::MetricsRecorder;
use crate::players::PlayerMonitor;
use crate::registry::InstanceRegistry;
use crate::scheduler::{InstanceActions, Scheduler};
use crate::watchdog::{CrashLog, Watchdog, WatchdogPolicy};

/// Main daemon struct
pub struct Daemon {
    server: IpcServer,
    handler: Arc<RequestHandler>,
    watchdog: Arc<Watchdog>,
    scheduler: Arc<Scheduler>,
    shutdown: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl Daemon {
    /// Wire every service over the data directory `home`
    pub async fn new(home: &Path, notifier: Arc<dyn Notifier>) -> Result<Self> {
        // First, so a second daemon gives up before touching any server
        let server = IpcServer::bind(&home.join(SOCKET_FILE)).await?;

        let store = JsonStore::new(home);
        let settings = Arc::new(SettingsStore::open(home.join(SETTINGS_FILE))?);
        let sink = Arc::new(LogSink::default());

        let watchdog = Arc::new(Watchdog::new(
            WatchdogPolicy::default(),
            CrashLog::open(store.clone())?,
            Arc::clone(&notifier),
            Arc::clone(&sink),
        ));

        let registry = Arc::new(InstanceRegistry::open(
            home,
            settings.clone(),
            Arc::clone(&watchdog),
            Arc::clone(&notifier),
            Arc::clone(&sink),
        )?);
        registry.adopt_running();

        let mappings = Arc::new(MappingManager::open(store.clone())?);
        let maps = Arc::new(MapChangeService::new(
            Arc::clone(&registry),
            mappings,
            Arc::clone(&notifier),
            Arc::clone(&sink),
        ));

        let scheduler = Scheduler::open(
            store,
            Arc::new(InstanceActions::new(Arc::clone(&registry), Arc::clone(&maps))),
            Arc::clone(&notifier),
            Arc::clone(&sink),
        )?;
        scheduler.start();

        watchdog.set_enabled(settings.get().watchdog_enabled);

        let metrics = Arc::new(MetricsRecorder::new(
            home.join(METRICS_DIR),
            Arc::clone(&registry),
        ));
        let players = Arc::new(PlayerMonitor::new(Arc::clone(&registry), notifier));
        let chat = Arc::new(ChatMonitor::new(Arc::clone(&registry), Arc::clone(&maps)));
        let tasks = vec![
            Arc::clone(&metrics).spawn(METRICS_INTERVAL),
            players.spawn(PLAYER_POLL_INTERVAL),
            chat.spawn(CHAT_POLL_INTERVAL),
        ];

        let handler = RequestHandler::new(
            registry,
            Arc::clone(&watchdog),
            Arc::clone(&scheduler),
            maps,
            metrics,
            settings,
            sink,
        );

        let (shutdown, _) = broadcast::channel(1);

        Ok(Self {
            server,
            handler: Arc::new(handler),
            watchdog,
            scheduler,
            shutdown,
            tasks,
        })
    }

    /// Serve clients until one of them sends `Shutdown`
    pub async fn run(&self) -> Result<()> {
        info!("Daemon running, waiting for connections...");
        let mut shutdown = self.shutdown.subscribe();

        loop {
            let accepted = tokio::select! {
                accepted = self.server.accept() => accepted,
                _ = shutdown.recv() => return Ok(()),
            };

            let mut conn = match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    continue;
                }
            };

            let handler = Arc::clone(&self.handler);
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                loop {
                    match conn.read_request().await {
                        Ok(Some(Incoming::Malformed(reason))) => {
                            if let Err(e) = conn.send_response(&Response::bad_request(reason)).await
                            {
                                error!("Failed to send response: {}", e);
                                break;
                            }
                        }
                        Ok(Some(Incoming::Request(request))) => {
                            let stopping = matches!(request, Request::Shutdown);
                            let response = Self::handle_request(&handler, request).await;

                            if let Err(e) = conn.send_response(&response).await {
                                error!("Failed to send response: {}", e);
                                break;
                            }
                            if stopping {
                                let _ = shutdown.send(());
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            error!("Error reading request: {}", e);
                            break;
                        }
                    }
                }
            });
        }
    }

    /// Stop background work; game servers keep running and are adopted next time
    pub fn close(&self) {
        for task in &self.tasks {
            task.abort();
        }
        self.scheduler.shutdown();
        self.watchdog.set_enabled(false);
    }

    pub async fn handle(&self, request: Request) -> Response {
        Self::handle_request(&self.handler, request).await
    }

    async fn handle_request(h: &RequestHandler, request: Request) -> Response {
        match request {
            Request::Ping => Response::Pong,
            Request::Shutdown => Response::ok("Daemon shutting down"),
            Request::ListInstances => h.list_instances(),
            Request::GetInstance { id } => h.get_instance(&id),
            Request::CreateInstance {
                id,
                name,
                path,
                config_path,
            } => h.create_instance(id, name, path, config_path),
            Request::UpdateInstance { id, update } => h.update_instance(&id, update),
            Request::DeleteInstance { id } => h.delete_instance(&id).await,
            Request::Start { id, args } => h.start(id, args).await,
            Request::Stop { id } => h.stop(id).await,
            Request::Restart { id } => h.restart(id).await,
            Request::SendCommand { id, command } => h.send_command(&id, &command).await,
            Request::GetPlayers { id } => h.players(&id).await,
            Request::KickPlayer { id, index, reason } => h.kick(&id, index, reason).await,
            Request::BanPlayer {
                id,
                identifier,
                reason,
            } => h.ban(&id, &identifier, reason).await,
            Request::ServerMetrics { id } => h.server_metrics(&id).await,
            Request::ResourceHistory { id } => h.resource_history(&id),
            Request::MetricsHistory { id, date } => h.metrics_history(&id, date),
            Request::Uptime { id } => h.uptime(&id),
            Request::Logs {
                instance,
                lines,
                console,
            } => h.logs(instance, lines, console),
            Request::Crashes { limit } => h.crashes(limit),
            Request::WatchdogStatus => h.watchdog_status(),
            Request::SetWatchdog { enabled } => h.set_watchdog(enabled),
            Request::ListJobs => h.list_jobs(),
            Request::AddJob {
                name,
                cron_expr,
                action,
                enabled,
                description,
            } => h.add_job(name, cron_expr, action, enabled, description),
            Request::UpdateJob { id, update } => h.update_job(&id, update),
            Request::DeleteJob { id } => h.delete_job(&id),
            Request::RunJob { id } => h.run_job(&id).await,
            Request::ListMaps => h.list_maps(),
            Request::AddMap {
                slot,
                scenario_id,
                name,
            } => h.add_map(slot, &scenario_id, name),
            Request::RemoveMap { slot } => h.remove_map(slot),
            Request::ApplyMap {
                id,
                target,
                requester,
            } => h.apply_map(id, target, requester).await,
            Request::CurrentMap { id } => h.current_map(&id),
        }
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{fake_server, write_game_config, ServerScript};
    use forgepm_core::{InstanceUpdate, JobAction, MapTarget, Settings};
    use forgepm_ipc::IpcClient;
    use forgepm_notify::mock::MockNotifier;
    use tempfile::TempDir;

    async fn daemon(dir: &TempDir) -> Daemon {
        Daemon::new(dir.path(), Arc::new(MockNotifier::new()))
            .await
            .unwrap()
    }

    fn code(response: &Response) -> Option<u16> {
        match response {
            Response::Error { code, .. } => Some(*code),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_ping_and_default_instance() {
        let dir = TempDir::new().unwrap();
        let daemon = daemon(&dir).await;

        assert!(matches!(daemon.handle(Request::Ping).await, Response::Pong));
        match daemon.handle(Request::ListInstances).await {
            Response::Instances { instances } => {
                assert_eq!(instances.len(), 1);
                assert_eq!(instances[0].id, "default");
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_instance_crud_and_error_codes() {
        let dir = TempDir::new().unwrap();
        let daemon = daemon(&dir).await;

        let created = daemon
            .handle(Request::CreateInstance {
                id: "eu".to_string(),
                name: "EU #1".to_string(),
                path: None,
                config_path: None,
            })
            .await;
        assert!(matches!(created, Response::Instance { .. }));

        let duplicate = daemon
            .handle(Request::CreateInstance {
                id: "eu".to_string(),
                name: "Again".to_string(),
                path: None,
                config_path: None,
            })
            .await;
        assert_eq!(code(&duplicate), Some(409));

        let update = InstanceUpdate {
            name: Some("EU Main".to_string()),
            ..Default::default()
        };
        match daemon
            .handle(Request::UpdateInstance {
                id: "eu".to_string(),
                update,
            })
            .await
        {
            Response::Instance { instance } => assert_eq!(instance.name, "EU Main"),
            other => panic!("unexpected response: {:?}", other),
        }

        let missing = daemon
            .handle(Request::GetInstance {
                id: "nope".to_string(),
            })
            .await;
        assert_eq!(code(&missing), Some(404));

        let protected = daemon
            .handle(Request::DeleteInstance {
                id: "default".to_string(),
            })
            .await;
        assert_eq!(code(&protected), Some(403));

        let deleted = daemon
            .handle(Request::DeleteInstance {
                id: "eu".to_string(),
            })
            .await;
        assert!(matches!(deleted, Response::Ok { .. }));
    }

    #[tokio::test]
    async fn test_start_without_path_is_bad_request() {
        let dir = TempDir::new().unwrap();
        let daemon = daemon(&dir).await;

        let response = daemon
            .handle(Request::Start {
                id: "default".to_string(),
                args: vec![],
            })
            .await;
        assert_eq!(code(&response), Some(400));
    }

    #[tokio::test]
    async fn test_start_and_stop_through_handler() {
        let dir = TempDir::new().unwrap();
        let server_dir = dir.path().join("server");
        fake_server(&server_dir, ServerScript::Graceful);
        let daemon = daemon(&dir).await;

        daemon
            .handle(Request::CreateInstance {
                id: "eu".to_string(),
                name: "EU".to_string(),
                path: Some(server_dir),
                config_path: None,
            })
            .await;

        let started = daemon
            .handle(Request::Start {
                id: "eu".to_string(),
                args: vec![],
            })
            .await;
        assert!(matches!(started, Response::Started { .. }));

        match daemon.handle(Request::Stop { id: "eu".to_string() }).await {
            Response::Stopped { outcome, .. } => {
                assert_eq!(outcome, forgepm_core::StopOutcome::Graceful)
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_watchdog_toggle_is_persisted() {
        let dir = TempDir::new().unwrap();
        let daemon = daemon(&dir).await;

        match daemon.handle(Request::SetWatchdog { enabled: false }).await {
            Response::Watchdog { status } => assert!(!status.enabled),
            other => panic!("unexpected response: {:?}", other),
        }

        let saved = Settings::load(&dir.path().join(SETTINGS_FILE)).unwrap();
        assert!(!saved.watchdog_enabled);
    }

    #[tokio::test]
    async fn test_jobs_and_maps() {
        let dir = TempDir::new().unwrap();
        let daemon = daemon(&dir).await;

        let bad = daemon
            .handle(Request::AddJob {
                name: "nightly".to_string(),
                cron_expr: "every night".to_string(),
                action: JobAction::Restart {
                    instance: "default".to_string(),
                },
                enabled: true,
                description: None,
            })
            .await;
        assert_eq!(code(&bad), Some(400));

        let added = daemon
            .handle(Request::AddJob {
                name: "nightly".to_string(),
                cron_expr: "0 0 4 * * *".to_string(),
                action: JobAction::Restart {
                    instance: "default".to_string(),
                },
                enabled: true,
                description: None,
            })
            .await;
        assert!(matches!(added, Response::Job { .. }));
        match daemon.handle(Request::ListJobs).await {
            Response::Jobs { jobs } => assert_eq!(jobs.len(), 1),
            other => panic!("unexpected response: {:?}", other),
        }

        let mapped = daemon
            .handle(Request::AddMap {
                slot: 1,
                scenario_id: "{ECC61978EDCC2B5A}Missions/23_Campaign.conf".to_string(),
                name: Some("Everon".to_string()),
            })
            .await;
        assert!(matches!(mapped, Response::Map { .. }));

        let unknown = daemon
            .handle(Request::ApplyMap {
                id: "default".to_string(),
                target: MapTarget::Slot(9),
                requester: None,
            })
            .await;
        assert_eq!(code(&unknown), Some(404));
    }

    #[tokio::test]
    async fn test_current_map_reads_config() {
        let dir = TempDir::new().unwrap();
        let server_dir = dir.path().join("server");
        std::fs::create_dir_all(&server_dir).unwrap();
        write_game_config(
            &server_dir.join("server.json"),
            2001,
            "secret",
            "{ECC61978EDCC2B5A}Missions/23_Campaign.conf",
        );
        let daemon = daemon(&dir).await;
        daemon
            .handle(Request::UpdateInstance {
                id: "default".to_string(),
                update: InstanceUpdate {
                    path: Some(server_dir),
                    ..Default::default()
                },
            })
            .await;

        match daemon
            .handle(Request::CurrentMap {
                id: "default".to_string(),
            })
            .await
        {
            Response::CurrentMap { current } => assert_eq!(
                current.scenario_id.as_deref(),
                Some("{ECC61978EDCC2B5A}Missions/23_Campaign.conf")
            ),
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_serves_clients_until_shutdown() {
        let dir = TempDir::new().unwrap();
        let daemon = Arc::new(daemon(&dir).await);
        let runner = Arc::clone(&daemon);
        let running = tokio::spawn(async move { runner.run().await });

        let client = IpcClient::new(dir.path().join(SOCKET_FILE)).without_autostart();
        assert!(client.ping().await.unwrap());

        let response = client.send(&Request::Shutdown).await.unwrap();
        assert!(matches!(response, Response::Ok { .. }));

        tokio::time::timeout(std::time::Duration::from_secs(5), running)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
