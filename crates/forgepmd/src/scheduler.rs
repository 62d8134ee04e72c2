//! Cron job scheduler
//!
//! Every enabled job owns one background task that sleeps until the next
//! occurrence of its schedule and then runs the job's action. Handles and
//! the persisted job set change together: an update always aborts the old
//! task before a new one is installed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use croner::Cron;
use forgepm_core::{
    Error, Job, JobAction, JobUpdate, JsonStore, MapTarget, Result, DEFAULT_INSTANCE_ID,
    HEADLESS_FLAG, JOBS_FILE,
};
use forgepm_logs::LogSink;
use forgepm_notify::{dispatch, InstanceEvent, Notifier};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::mapchange::MapChangeService;
use crate::registry::InstanceRegistry;

const SCHEDULER_REQUESTER: &str = "Scheduler";
const SCHEDULED_MAP_NAME: &str = "Scheduled Map";
const RESTART_WARNING: &str = "Scheduled server restart in progress, back shortly!";

/// Six-field, seconds-first cron expression
pub fn parse_cron(expr: &str) -> Result<Cron> {
    Cron::new(expr)
        .with_seconds_required()
        .parse()
        .map_err(|e| Error::InvalidCron {
            expr: expr.to_string(),
            reason: e.to_string(),
        })
}

fn next_occurrence(cron: &Cron, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
    cron.find_next_occurrence(after, false).ok()
}

/// Carries out a job's action
#[async_trait]
pub trait ActionRunner: Send + Sync {
    /// Returns a short description of what happened
    async fn run(&self, action: &JobAction) -> Result<String>;
}

/// Runs job actions against the registry and the map change workflow
pub struct InstanceActions {
    registry: Arc<InstanceRegistry>,
    maps: Arc<MapChangeService>,
}

impl InstanceActions {
    pub fn new(registry: Arc<InstanceRegistry>, maps: Arc<MapChangeService>) -> Self {
        Self { registry, maps }
    }
}

#[async_trait]
impl ActionRunner for InstanceActions {
    async fn run(&self, action: &JobAction) -> Result<String> {
        let instance = match action.instance() {
            "" => DEFAULT_INSTANCE_ID,
            id => id,
        };
        let headless = [HEADLESS_FLAG.to_string()];

        match action {
            JobAction::Start { .. } => {
                let pid = self.registry.start(instance, &headless).await?;
                Ok(format!("started with PID {}", pid))
            }
            JobAction::Stop { .. } => {
                let outcome = self.registry.stop(instance).await?;
                Ok(format!("stopped ({})", outcome))
            }
            JobAction::Restart { .. } => {
                if let Err(e) = self
                    .registry
                    .send_command(instance, &format!("#say {}", RESTART_WARNING))
                    .await
                {
                    debug!("Restart warning for {} not delivered: {}", instance, e);
                }
                let pid = self.registry.restart(instance).await?;
                Ok(format!("restarted with PID {}", pid))
            }
            JobAction::ChangeMap { target, .. } => {
                let change = match target {
                    MapTarget::Slot(slot) => {
                        self.maps
                            .change_by_slot(instance, *slot, SCHEDULER_REQUESTER)
                            .await?
                    }
                    MapTarget::Scenario(scenario_id) => {
                        self.maps
                            .change_by_scenario(
                                instance,
                                scenario_id,
                                SCHEDULED_MAP_NAME,
                                SCHEDULER_REQUESTER,
                            )
                            .await?
                    }
                };
                Ok(format!("map changed to {}", change.map_name))
            }
        }
    }
}

/// New job as requested by an operator
#[derive(Debug, Clone)]
pub struct NewJob {
    pub name: String,
    pub cron_expr: String,
    pub action: JobAction,
    pub enabled: bool,
    pub description: Option<String>,
}

pub struct Scheduler {
    store: JsonStore,
    jobs: RwLock<HashMap<String, Job>>,
    handles: Mutex<HashMap<String, JoinHandle<()>>>,
    runner: Arc<dyn ActionRunner>,
    notifier: Arc<dyn Notifier>,
    sink: Arc<LogSink>,
    this: Weak<Scheduler>,
}

impl Scheduler {
    /// Load `jobs.json`; jobs with a broken schedule are kept but disabled
    pub fn open(
        store: JsonStore,
        runner: Arc<dyn ActionRunner>,
        notifier: Arc<dyn Notifier>,
        sink: Arc<LogSink>,
    ) -> Result<Arc<Self>> {
        let loaded: Vec<Job> = store.load_or_default(JOBS_FILE)?;
        let mut dirty = false;
        let mut jobs = HashMap::new();

        for mut job in loaded {
            if job.id.is_empty() {
                job.id = uuid::Uuid::new_v4().to_string();
                dirty = true;
            }
            if job.enabled {
                if let Err(e) = parse_cron(&job.cron_expr) {
                    sink.error(
                        Some(job.action.instance()),
                        format!("Job '{}' disabled: {}", job.name, e),
                    );
                    job.enabled = false;
                    job.next_run = None;
                    dirty = true;
                }
            }
            jobs.insert(job.id.clone(), job);
        }

        let scheduler = Arc::new_cyclic(|this| Self {
            store,
            jobs: RwLock::new(jobs),
            handles: Mutex::new(HashMap::new()),
            runner,
            notifier,
            sink,
            this: this.clone(),
        });
        if dirty {
            scheduler.persist()?;
        }
        Ok(scheduler)
    }

    /// Install a task for every enabled job
    pub fn start(&self) {
        let enabled: Vec<String> = self
            .jobs
            .read()
            .values()
            .filter(|job| job.enabled)
            .map(|job| job.id.clone())
            .collect();
        for id in &enabled {
            self.install(id);
        }
        info!("Scheduler started with {} active jobs", enabled.len());
    }

    /// Abort every job task
    pub fn shutdown(&self) {
        for (_, handle) in self.handles.lock().drain() {
            handle.abort();
        }
    }

    fn persist(&self) -> Result<()> {
        let mut jobs: Vec<Job> = self.jobs.read().values().cloned().collect();
        jobs.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        self.store.save(JOBS_FILE, &jobs)
    }

    fn uninstall(&self, id: &str) {
        if let Some(handle) = self.handles.lock().remove(id) {
            handle.abort();
        }
    }

    /// (Re)install the task of an enabled job and record its next run
    fn install(&self, id: &str) {
        self.uninstall(id);

        let cron = {
            let mut jobs = self.jobs.write();
            let Some(job) = jobs.get_mut(id) else {
                return;
            };
            match parse_cron(&job.cron_expr) {
                Ok(cron) => {
                    job.next_run = next_occurrence(&cron, &Utc::now());
                    cron
                }
                Err(e) => {
                    warn!("Not scheduling job {}: {}", id, e);
                    return;
                }
            }
        };

        let weak = self.this.clone();
        let job_id = id.to_string();
        let handle = tokio::spawn(async move {
            loop {
                let now = Utc::now();
                let Some(next) = next_occurrence(&cron, &now) else {
                    warn!("Schedule of job {} has no future occurrence", job_id);
                    return;
                };
                let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
                tokio::time::sleep(wait).await;

                let Some(scheduler) = weak.upgrade() else {
                    return;
                };
                // Runs detached so aborting this loop never cuts an action short
                let id = job_id.clone();
                let run = tokio::spawn(async move {
                    if let Err(e) = scheduler.execute(&id).await {
                        debug!("Job {} run ended with error: {}", id, e);
                    }
                });
                let _ = run.await;
            }
        });
        self.handles.lock().insert(id.to_string(), handle);
    }

    /// Run a job's action now and record the run
    async fn execute(&self, id: &str) -> Result<String> {
        let job = self.get(id)?;
        let instance = job.action.instance().to_string();
        info!("Running job '{}' ({} on {})", job.name, job.action.kind(), instance);

        let result = self.runner.run(&job.action).await;

        {
            let mut jobs = self.jobs.write();
            if let Some(stored) = jobs.get_mut(id) {
                let now = Utc::now();
                stored.last_run = Some(now);
                stored.next_run = if stored.enabled {
                    parse_cron(&stored.cron_expr)
                        .ok()
                        .and_then(|cron| next_occurrence(&cron, &now))
                } else {
                    None
                };
            }
        }
        if let Err(e) = self.persist() {
            warn!("Failed to record run of job {}: {}", id, e);
        }

        match &result {
            Ok(summary) => {
                self.sink.info(
                    Some(&instance),
                    format!("Job '{}' completed: {}", job.name, summary),
                );
                dispatch(
                    &self.notifier,
                    InstanceEvent::JobSucceeded {
                        job: job.name.clone(),
                        action: job.action.kind().to_string(),
                        instance,
                    },
                );
            }
            Err(e) => {
                self.sink
                    .error(Some(&instance), format!("Job '{}' failed: {}", job.name, e));
                dispatch(
                    &self.notifier,
                    InstanceEvent::JobFailed {
                        job: job.name.clone(),
                        instance,
                        error: e.to_string(),
                    },
                );
            }
        }
        result
    }

    pub fn get(&self, id: &str) -> Result<Job> {
        self.jobs
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::JobNotFound(id.to_string()))
    }

    /// All jobs with next-run times computed now
    pub fn list(&self) -> Vec<Job> {
        let now = Utc::now();
        let mut jobs: Vec<Job> = self
            .jobs
            .read()
            .values()
            .cloned()
            .map(|mut job| {
                job.next_run = if job.enabled {
                    parse_cron(&job.cron_expr)
                        .ok()
                        .and_then(|cron| next_occurrence(&cron, &now))
                } else {
                    None
                };
                job
            })
            .collect();
        jobs.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        jobs
    }

    pub fn add(&self, new: NewJob) -> Result<Job> {
        parse_cron(&new.cron_expr)?;
        if new.name.trim().is_empty() {
            return Err(Error::config("job name is required"));
        }

        let mut job = Job::new(new.name, new.cron_expr, new.action);
        job.enabled = new.enabled;
        job.description = new.description.filter(|d| !d.is_empty());
        let id = job.id.clone();

        self.jobs.write().insert(id.clone(), job);
        if new.enabled {
            self.install(&id);
        }
        self.persist()?;

        let job = self.get(&id)?;
        info!("Added job '{}' ({})", job.name, job.cron_expr);
        Ok(job)
    }

    pub fn update(&self, id: &str, update: JobUpdate) -> Result<Job> {
        let mut job = self.get(id)?;
        job.merge(update);
        parse_cron(&job.cron_expr)?;

        self.uninstall(id);
        let enabled = job.enabled;
        self.jobs.write().insert(id.to_string(), job);
        if enabled {
            self.install(id);
        }
        self.persist()?;
        self.get(id)
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        self.uninstall(id);
        if self.jobs.write().remove(id).is_none() {
            return Err(Error::JobNotFound(id.to_string()));
        }
        self.persist()?;
        info!("Deleted job {}", id);
        Ok(())
    }

    /// Execute a job immediately, outside its schedule
    pub async fn run_now(&self, id: &str) -> Result<String> {
        self.execute(id).await
    }

    pub fn is_scheduled(&self, id: &str) -> bool {
        self.handles
            .lock()
            .get(id)
            .map_or(false, |handle| !handle.is_finished())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for (_, handle) in self.handles.get_mut().drain() {
            handle.abort();
        }
    }
}
