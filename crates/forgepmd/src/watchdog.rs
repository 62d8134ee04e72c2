//! Crash watchdog - bounded auto-restart of instances that die on their own

use chrono::{DateTime, Utc};
use forgepm_core::{
    CrashEvent, JsonStore, Result, WatchdogStatus, WatchedSummary, CRASHES_FILE, CRASH_LOG_LIMIT,
    WATCHDOG_COOLDOWN, WATCHDOG_INTERVAL, WATCHDOG_MAX_RESTARTS,
};
use forgepm_logs::LogSink;
use forgepm_notify::{dispatch, InstanceEvent, Notifier};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::supervisor::Supervisor;

/// Restart limits
#[derive(Debug, Clone, Copy)]
pub struct WatchdogPolicy {
    pub interval: Duration,
    /// Quiet time after the last restart that resets the counter
    pub cooldown: Duration,
    pub max_restarts: u32,
}

impl Default for WatchdogPolicy {
    fn default() -> Self {
        Self {
            interval: WATCHDOG_INTERVAL,
            cooldown: WATCHDOG_COOLDOWN,
            max_restarts: WATCHDOG_MAX_RESTARTS,
        }
    }
}

/// Append-only crash history capped to the most recent entries
pub struct CrashLog {
    store: JsonStore,
    events: Mutex<Vec<CrashEvent>>,
}

impl CrashLog {
    pub fn open(store: JsonStore) -> Result<Self> {
        let events: Vec<CrashEvent> = store.load_or_default(CRASHES_FILE)?;
        Ok(Self {
            store,
            events: Mutex::new(events),
        })
    }

    pub fn record(&self, event: CrashEvent) -> Result<()> {
        let snapshot = {
            let mut events = self.events.lock();
            events.push(event);
            if events.len() > CRASH_LOG_LIMIT {
                let excess = events.len() - CRASH_LOG_LIMIT;
                events.drain(..excess);
            }
            events.clone()
        };
        self.store.save(CRASHES_FILE, &snapshot)
    }

    /// Most recent `limit` events, oldest first
    pub fn recent(&self, limit: usize) -> Vec<CrashEvent> {
        let events = self.events.lock();
        let start = events.len().saturating_sub(limit);
        events[start..].to_vec()
    }
}

/// Registration record of one monitored instance
struct Watched {
    exe: PathBuf,
    args: Vec<String>,
    supervisor: Arc<Supervisor>,
    restart_count: u32,
    last_restart: Option<(Instant, DateTime<Utc>)>,
    suspended_notified: bool,
    /// Set when the instance was stopped on purpose
    expected_stop: bool,
}

enum Verdict {
    Restart,
    Suspend(u32),
    Skip,
}

pub struct Watchdog {
    watched: RwLock<HashMap<String, Arc<Mutex<Watched>>>>,
    policy: WatchdogPolicy,
    crashes: CrashLog,
    notifier: Arc<dyn Notifier>,
    sink: Arc<LogSink>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Watchdog {
    pub fn new(
        policy: WatchdogPolicy,
        crashes: CrashLog,
        notifier: Arc<dyn Notifier>,
        sink: Arc<LogSink>,
    ) -> Self {
        Self {
            watched: RwLock::new(HashMap::new()),
            policy,
            crashes,
            notifier,
            sink,
            task: Mutex::new(None),
        }
    }

    /// Register or refresh an instance with the arguments it was launched with
    ///
    /// Restart bookkeeping survives a refresh.
    pub fn register(&self, instance_id: &str, exe: PathBuf, args: Vec<String>, supervisor: Arc<Supervisor>) {
        let mut watched = self.watched.write();
        match watched.get(instance_id) {
            Some(entry) => {
                let mut entry = entry.lock();
                entry.exe = exe;
                entry.args = args;
                entry.supervisor = supervisor;
                entry.expected_stop = false;
            }
            None => {
                watched.insert(
                    instance_id.to_string(),
                    Arc::new(Mutex::new(Watched {
                        exe,
                        args,
                        supervisor,
                        restart_count: 0,
                        last_restart: None,
                        suspended_notified: false,
                        expected_stop: false,
                    })),
                );
            }
        }
        debug!("Watchdog now monitoring {}", instance_id);
    }

    /// Stop monitoring; a check already in flight for this instance is abandoned
    pub fn unregister(&self, instance_id: &str) {
        if let Some(entry) = self.watched.write().remove(instance_id) {
            entry.lock().expected_stop = true;
            debug!("Watchdog released {}", instance_id);
        }
    }

    /// Executable and arguments a restart of this instance would use
    pub fn launch_args(&self, instance_id: &str) -> Option<(PathBuf, Vec<String>)> {
        let entry = self.watched.read().get(instance_id).cloned()?;
        let entry = entry.lock();
        Some((entry.exe.clone(), entry.args.clone()))
    }

    pub fn is_watching(&self, instance_id: &str) -> bool {
        self.watched.read().contains_key(instance_id)
    }

    pub fn is_enabled(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .map_or(false, |t| !t.is_finished())
    }

    /// Start or cancel the poll loop
    pub fn set_enabled(self: &Arc<Self>, enabled: bool) {
        let mut task = self.task.lock();
        if let Some(handle) = task.take() {
            handle.abort();
        }
        if enabled {
            let watchdog = Arc::clone(self);
            *task = Some(tokio::spawn(async move { watchdog.run().await }));
            info!("Watchdog enabled (every {:?})", self.policy.interval);
        } else {
            info!("Watchdog disabled");
        }
    }

    async fn run(self: Arc<Self>) {
        let period = self.policy.interval;
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            interval.tick().await;
            self.check_all().await;
        }
    }

    /// One poll over every watched instance
    pub async fn check_all(&self) {
        let entries: Vec<(String, Arc<Mutex<Watched>>)> = self
            .watched
            .read()
            .iter()
            .map(|(id, entry)| (id.clone(), Arc::clone(entry)))
            .collect();

        join_all(
            entries
                .into_iter()
                .map(|(id, entry)| async move { self.check_one(&id, &entry).await }),
        )
        .await;
    }

    async fn check_one(&self, instance_id: &str, entry: &Mutex<Watched>) {
        let supervisor = {
            let watched = entry.lock();
            if watched.expected_stop {
                return;
            }
            Arc::clone(&watched.supervisor)
        };

        if supervisor.is_running() {
            return;
        }

        let verdict = {
            let mut watched = entry.lock();
            if watched.expected_stop {
                return;
            }
            if let Some((at, _)) = watched.last_restart {
                if at.elapsed() > self.policy.cooldown && watched.restart_count > 0 {
                    debug!("Cooldown elapsed for {}, resetting restart counter", instance_id);
                    watched.restart_count = 0;
                    watched.suspended_notified = false;
                }
            }

            if watched.restart_count >= self.policy.max_restarts {
                if watched.suspended_notified {
                    Verdict::Skip
                } else {
                    watched.suspended_notified = true;
                    Verdict::Suspend(watched.restart_count)
                }
            } else {
                Verdict::Restart
            }
        };

        match verdict {
            Verdict::Skip => {}
            Verdict::Suspend(restarts) => {
                self.sink.error(
                    Some(instance_id),
                    format!(
                        "Server crashed after {} automatic restarts; auto-restart suspended",
                        restarts
                    ),
                );
                dispatch(
                    &self.notifier,
                    InstanceEvent::WatchdogSuspended {
                        instance: instance_id.to_string(),
                        restarts,
                    },
                );
            }
            Verdict::Restart => self.restart(instance_id, entry, supervisor).await,
        }
    }

    async fn restart(&self, instance_id: &str, entry: &Mutex<Watched>, supervisor: Arc<Supervisor>) {
        let reason = "process not running".to_string();
        self.sink.warn(
            Some(instance_id),
            format!("Crash detected ({}), restarting", reason),
        );

        if let Err(e) = self.crashes.record(CrashEvent {
            timestamp: Utc::now(),
            instance_id: instance_id.to_string(),
            reason: reason.clone(),
        }) {
            error!("Failed to persist crash event for {}: {}", instance_id, e);
        }
        dispatch(
            &self.notifier,
            InstanceEvent::CrashDetected {
                instance: instance_id.to_string(),
                reason,
            },
        );

        let (exe, args) = {
            let watched = entry.lock();
            (watched.exe.clone(), watched.args.clone())
        };

        // A deliberate stop may land while we wait for the lifecycle lock
        let result = supervisor
            .start_if(&exe, &args, || !entry.lock().expected_stop)
            .await;

        match result {
            Ok(Some(pid)) => {
                let count = {
                    let mut watched = entry.lock();
                    watched.restart_count += 1;
                    watched.last_restart = Some((Instant::now(), Utc::now()));
                    watched.restart_count
                };
                self.sink.info(
                    Some(instance_id),
                    format!("Auto-restarted with PID {} (restart {})", pid, count),
                );
                dispatch(
                    &self.notifier,
                    InstanceEvent::AutoRestarted {
                        instance: instance_id.to_string(),
                        restart_count: count,
                    },
                );
            }
            Ok(None) => {
                debug!("Restart of {} abandoned, instance was stopped on purpose", instance_id);
            }
            Err(e) => {
                self.sink
                    .error(Some(instance_id), format!("Auto-restart failed: {}", e));
                dispatch(
                    &self.notifier,
                    InstanceEvent::AutoRestartFailed {
                        instance: instance_id.to_string(),
                        error: e.to_string(),
                    },
                );
            }
        }
    }

    pub fn status(&self) -> WatchdogStatus {
        let mut watched: Vec<WatchedSummary> = self
            .watched
            .read()
            .iter()
            .map(|(id, entry)| {
                let entry = entry.lock();
                WatchedSummary {
                    instance_id: id.clone(),
                    restart_count: entry.restart_count,
                    last_restart: entry.last_restart.map(|(_, at)| at),
                    suspended: entry.restart_count >= self.policy.max_restarts,
                }
            })
            .collect();
        watched.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));

        WatchdogStatus {
            enabled: self.is_enabled(),
            watched,
        }
    }

    pub fn crashes(&self) -> &CrashLog {
        &self.crashes
    }
}
