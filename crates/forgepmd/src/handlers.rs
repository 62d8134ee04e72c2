//! IPC request handlers

use chrono::NaiveDate;
use forgepm_core::{
    Instance, InstanceUpdate, JobAction, JobUpdate, MapTarget, Result, SettingsProvider,
    SettingsStore, LOGS_DIR,
};
use forgepm_ipc::Response;
use forgepm_logs::{console_path, LogReader, LogSink};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::mapchange::MapChangeService;
use crate::metrics::MetricsRecorder;
use crate::registry::InstanceRegistry;
use crate::scheduler::{NewJob, Scheduler};
use crate::watchdog::Watchdog;

const DEFAULT_REQUESTER: &str = "cli";
const DEFAULT_CRASH_LIMIT: usize = 20;

/// Turn a result into a response, logging failures
fn respond<T>(action: &str, result: Result<T>, ok: impl FnOnce(T) -> Response) -> Response {
    match result {
        Ok(value) => ok(value),
        Err(e) => {
            error!("{} failed: {}", action, e);
            Response::from(e)
        }
    }
}

/// Request handler for IPC commands
pub struct RequestHandler {
    registry: Arc<InstanceRegistry>,
    watchdog: Arc<Watchdog>,
    scheduler: Arc<Scheduler>,
    maps: Arc<MapChangeService>,
    metrics: Arc<MetricsRecorder>,
    settings: Arc<SettingsStore>,
    sink: Arc<LogSink>,
    logs_dir: PathBuf,
}

impl RequestHandler {
    pub fn new(
        registry: Arc<InstanceRegistry>,
        watchdog: Arc<Watchdog>,
        scheduler: Arc<Scheduler>,
        maps: Arc<MapChangeService>,
        metrics: Arc<MetricsRecorder>,
        settings: Arc<SettingsStore>,
        sink: Arc<LogSink>,
    ) -> Self {
        let logs_dir = registry.data_dir().join(LOGS_DIR);
        Self {
            registry,
            watchdog,
            scheduler,
            maps,
            metrics,
            settings,
            sink,
            logs_dir,
        }
    }

    pub fn list_instances(&self) -> Response {
        Response::Instances {
            instances: self.registry.list(),
        }
    }

    pub fn get_instance(&self, id: &str) -> Response {
        respond("Get instance", self.registry.get(id), |instance| {
            Response::Instance { instance }
        })
    }

    pub fn create_instance(
        &self,
        id: String,
        name: String,
        path: Option<PathBuf>,
        config_path: Option<PathBuf>,
    ) -> Response {
        info!("Creating instance {}", id);
        let mut instance = Instance::new(id, name);
        instance.path = path;
        instance.config_path = config_path;
        respond("Create instance", self.registry.create(instance), |instance| {
            Response::Instance { instance }
        })
    }

    pub fn update_instance(&self, id: &str, update: InstanceUpdate) -> Response {
        respond(
            "Update instance",
            self.registry.update(id, update),
            |instance| Response::Instance { instance },
        )
    }

    pub async fn delete_instance(&self, id: &str) -> Response {
        info!("Deleting instance {}", id);
        respond("Delete instance", self.registry.delete(id).await, |_| {
            Response::ok(format!("Instance '{}' deleted", id))
        })
    }

    pub async fn start(&self, id: String, args: Vec<String>) -> Response {
        info!("Handling start request for {}", id);
        respond("Start", self.registry.start(&id, &args).await, |pid| {
            Response::Started { id, pid }
        })
    }

    pub async fn stop(&self, id: String) -> Response {
        info!("Handling stop request for {}", id);
        respond("Stop", self.registry.stop(&id).await, |outcome| {
            Response::Stopped { id, outcome }
        })
    }

    pub async fn restart(&self, id: String) -> Response {
        info!("Handling restart request for {}", id);
        respond("Restart", self.registry.restart(&id).await, |pid| {
            Response::Started { id, pid }
        })
    }

    pub async fn send_command(&self, id: &str, command: &str) -> Response {
        respond(
            "Console command",
            self.registry.send_command(id, command).await,
            |output| Response::CommandOutput { output },
        )
    }

    pub async fn players(&self, id: &str) -> Response {
        respond("Player list", self.registry.players(id).await, |players| {
            Response::Players { players }
        })
    }

    pub async fn kick(&self, id: &str, index: u32, reason: Option<String>) -> Response {
        let reason = reason.unwrap_or_default();
        respond(
            "Kick",
            self.registry.kick_player(id, index, &reason).await,
            |output| Response::CommandOutput { output },
        )
    }

    pub async fn ban(&self, id: &str, identifier: &str, reason: Option<String>) -> Response {
        let reason = reason.unwrap_or_default();
        respond(
            "Ban",
            self.registry.ban_player(id, identifier, &reason).await,
            |output| Response::CommandOutput { output },
        )
    }

    pub async fn server_metrics(&self, id: &str) -> Response {
        respond(
            "Server metrics",
            self.registry.server_metrics(id).await,
            |metrics| Response::Metrics { metrics },
        )
    }

    pub fn resource_history(&self, id: &str) -> Response {
        respond(
            "Resource history",
            self.registry.resource_history(id),
            |samples| Response::ResourceHistory { samples },
        )
    }

    pub fn metrics_history(&self, id: &str, date: Option<NaiveDate>) -> Response {
        if let Err(e) = self.registry.get(id) {
            return Response::from(e);
        }
        respond(
            "Metrics history",
            self.metrics.history(id, date),
            |points| Response::MetricsHistory { points },
        )
    }

    pub fn uptime(&self, id: &str) -> Response {
        if let Err(e) = self.registry.get(id) {
            return Response::from(e);
        }
        respond("Uptime", self.metrics.uptime(id), |stats| Response::Uptime {
            stats,
        })
    }

    /// Console file of one instance, or the shared daemon log
    pub fn logs(&self, instance: Option<String>, lines: usize, console: bool) -> Response {
        match (instance, console) {
            (Some(id), true) => {
                if let Err(e) = self.registry.get(&id) {
                    return Response::from(e);
                }
                let reader = LogReader::new(console_path(&self.logs_dir, &id));
                respond("Console log", reader.tail(lines), |lines| {
                    Response::LogLines { lines }
                })
            }
            (instance, _) => Response::LogEntries {
                entries: self.sink.tail(lines, instance.as_deref()),
            },
        }
    }

    pub fn crashes(&self, limit: Option<usize>) -> Response {
        Response::Crashes {
            events: self
                .watchdog
                .crashes()
                .recent(limit.unwrap_or(DEFAULT_CRASH_LIMIT)),
        }
    }

    pub fn watchdog_status(&self) -> Response {
        Response::Watchdog {
            status: self.watchdog.status(),
        }
    }

    /// Toggle the watchdog and remember the choice across daemon restarts
    pub fn set_watchdog(&self, enabled: bool) -> Response {
        self.watchdog.set_enabled(enabled);

        let mut settings = self.settings.get();
        settings.watchdog_enabled = enabled;
        if let Err(e) = self.settings.set(settings) {
            warn!("Failed to persist watchdog setting: {}", e);
        }

        Response::Watchdog {
            status: self.watchdog.status(),
        }
    }

    pub fn list_jobs(&self) -> Response {
        Response::Jobs {
            jobs: self.scheduler.list(),
        }
    }

    pub fn add_job(
        &self,
        name: String,
        cron_expr: String,
        action: JobAction,
        enabled: bool,
        description: Option<String>,
    ) -> Response {
        info!("Adding job '{}' ({})", name, cron_expr);
        let new = NewJob {
            name,
            cron_expr,
            action,
            enabled,
            description,
        };
        respond("Add job", self.scheduler.add(new), |job| Response::Job { job })
    }

    pub fn update_job(&self, id: &str, update: JobUpdate) -> Response {
        respond("Update job", self.scheduler.update(id, update), |job| {
            Response::Job { job }
        })
    }

    pub fn delete_job(&self, id: &str) -> Response {
        respond("Delete job", self.scheduler.delete(id), |_| {
            Response::ok(format!("Job '{}' deleted", id))
        })
    }

    pub async fn run_job(&self, id: &str) -> Response {
        info!("Running job {} on request", id);
        respond("Run job", self.scheduler.run_now(id).await, Response::ok)
    }

    pub fn list_maps(&self) -> Response {
        Response::Maps {
            mappings: self.maps.mappings().list(),
        }
    }

    pub fn add_map(&self, slot: u32, scenario_id: &str, name: Option<String>) -> Response {
        let name = name.unwrap_or_default();
        respond(
            "Add map",
            self.maps.mappings().add(slot, scenario_id, &name),
            |mapping| Response::Map { mapping },
        )
    }

    pub fn remove_map(&self, slot: u32) -> Response {
        respond("Remove map", self.maps.mappings().remove(slot), |_| {
            Response::ok(format!("Map slot {} removed", slot))
        })
    }

    pub async fn apply_map(
        &self,
        id: String,
        target: MapTarget,
        requester: Option<String>,
    ) -> Response {
        let requester = requester.unwrap_or_else(|| DEFAULT_REQUESTER.to_string());
        info!("Map change on {} to {} by {}", id, target, requester);
        respond(
            "Map change",
            self.maps.apply(&id, &target, &requester).await,
            |change| Response::MapChanged {
                id,
                from: change.from,
                to: change.to,
            },
        )
    }

    pub fn current_map(&self, id: &str) -> Response {
        respond("Current map", self.maps.current_map(id), |current| {
            Response::CurrentMap { current }
        })
    }
}
