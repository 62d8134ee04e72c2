//! Instance registry - the control API over every managed server

use chrono::Utc;
use forgepm_core::{
    validate_instance_id, Error, GameConfig, Instance, InstanceStatus, InstanceUpdate, JsonStore,
    PlayerInfo, ResourceSample, Result, ServerMetrics, Settings, SettingsProvider, StopOutcome,
    ADDONS_DIR, ADDONS_FLAG, CONFIG_FLAG, DEFAULT_CONFIG_FILE, DEFAULT_INSTANCE_ID,
    DEFAULT_INSTANCE_NAME, HEADLESS_FLAG, INSTANCES_FILE, LOGS_DIR, PROFILE_DIR, PROFILE_FLAG,
    RCON_TIMEOUT, RESTART_PAUSE, SERVER_EXECUTABLE,
};
use forgepm_logs::LogSink;
use forgepm_notify::{dispatch, InstanceEvent, Notifier};
use forgepm_rcon::{parse_metrics, parse_players, RconClient};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::supervisor::{spawn_sampler, Supervisor};
use crate::watchdog::Watchdog;

const DEFAULT_KICK_REASON: &str = "Kicked by admin";
const DEFAULT_BAN_REASON: &str = "Banned by admin";

/// Registry entry: persisted record plus its live handles
struct Slot {
    instance: Instance,
    supervisor: Arc<Supervisor>,
    /// Serialises start, stop and delete of this instance
    lifecycle: Arc<tokio::sync::Mutex<()>>,
}

pub struct InstanceRegistry {
    slots: RwLock<HashMap<String, Slot>>,
    store: JsonStore,
    data_dir: PathBuf,
    settings: Arc<dyn SettingsProvider>,
    watchdog: Arc<Watchdog>,
    notifier: Arc<dyn Notifier>,
    sink: Arc<LogSink>,
    consoles: Mutex<HashMap<String, Arc<RconClient>>>,
    rcon_timeout: Duration,
    restart_pause: Duration,
}

fn absolute(path: PathBuf) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

fn with_live_status(mut instance: Instance, supervisor: &Supervisor) -> Instance {
    match supervisor.running_pid() {
        Some(pid) => {
            instance.status = InstanceStatus::Running;
            instance.pid = Some(pid);
        }
        None => {
            instance.status = InstanceStatus::Stopped;
            instance.pid = None;
        }
    }
    instance
}

/// Install directory: the instance's own, else the global server path
fn install_dir(instance: &Instance, settings: &Settings) -> Option<PathBuf> {
    instance
        .install_dir()
        .or_else(|| settings.server_dir())
        .map(Path::to_path_buf)
}

/// The instance's game config file, if it can be located
fn config_file(instance: &Instance, settings: &Settings) -> Option<PathBuf> {
    let dir = install_dir(instance, settings);
    match instance.config_file() {
        Some(path) if path.is_relative() => {
            Some(dir.map_or_else(|| path.to_path_buf(), |d| d.join(path)))
        }
        Some(path) => Some(path.to_path_buf()),
        None => dir.map(|d| d.join(DEFAULT_CONFIG_FILE)),
    }
}

impl InstanceRegistry {
    /// Load `servers.json` from `data_dir`, making sure the default instance exists
    pub fn open(
        data_dir: impl Into<PathBuf>,
        settings: Arc<dyn SettingsProvider>,
        watchdog: Arc<Watchdog>,
        notifier: Arc<dyn Notifier>,
        sink: Arc<LogSink>,
    ) -> Result<Self> {
        let data_dir = absolute(data_dir.into())?;
        let store = JsonStore::new(&data_dir);
        let loaded: Option<Vec<Instance>> = store.load(INSTANCES_FILE)?;
        let first_run = loaded.is_none();

        let registry = Self {
            slots: RwLock::new(HashMap::new()),
            store,
            data_dir,
            settings,
            watchdog,
            notifier,
            sink,
            consoles: Mutex::new(HashMap::new()),
            rcon_timeout: RCON_TIMEOUT,
            restart_pause: RESTART_PAUSE,
        };

        let mut instances = loaded.unwrap_or_default();
        if !instances.iter().any(Instance::is_default) {
            instances.push(Instance::new(DEFAULT_INSTANCE_ID, DEFAULT_INSTANCE_NAME));
        }

        {
            let mut slots = registry.slots.write();
            for mut instance in instances {
                instance.status = InstanceStatus::Stopped;
                instance.pid = None;
                let slot = registry.new_slot(instance);
                slots.insert(slot.instance.id.clone(), slot);
            }
        }

        if first_run {
            registry.save()?;
        }
        info!("Loaded {} instances", registry.slots.read().len());
        Ok(registry)
    }

    pub fn with_rcon_timeout(mut self, timeout: Duration) -> Self {
        self.rcon_timeout = timeout;
        self
    }

    /// Pause between stop and start of a restart
    pub fn with_restart_pause(mut self, pause: Duration) -> Self {
        self.restart_pause = pause;
        self
    }

    fn new_slot(&self, instance: Instance) -> Slot {
        let supervisor = Arc::new(Supervisor::new(
            instance.id.clone(),
            self.data_dir.join(LOGS_DIR),
            Arc::clone(&self.sink),
        ));
        spawn_sampler(&supervisor);
        Slot {
            instance,
            supervisor,
            lifecycle: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    fn save(&self) -> Result<()> {
        let mut instances: Vec<Instance> = self
            .slots
            .read()
            .values()
            .map(|slot| slot.instance.clone())
            .collect();
        instances.sort_by(|a, b| a.id.cmp(&b.id));
        self.store.save(INSTANCES_FILE, &instances)
    }

    fn slot_handles(
        &self,
        id: &str,
    ) -> Result<(Instance, Arc<Supervisor>, Arc<tokio::sync::Mutex<()>>)> {
        let slots = self.slots.read();
        let slot = slots
            .get(id)
            .ok_or_else(|| Error::InstanceNotFound(id.to_string()))?;
        Ok((
            slot.instance.clone(),
            Arc::clone(&slot.supervisor),
            Arc::clone(&slot.lifecycle),
        ))
    }

    fn record(&self, id: &str) -> Result<Instance> {
        self.slots
            .read()
            .get(id)
            .map(|slot| slot.instance.clone())
            .ok_or_else(|| Error::InstanceNotFound(id.to_string()))
    }

    /// Teach every supervisor its server's launch signature so servers
    /// left running by an earlier daemon are found, and watch those
    pub fn adopt_running(&self) {
        let ids = self.ids();
        for id in ids {
            let Ok((instance, supervisor, _)) = self.slot_handles(&id) else {
                continue;
            };
            let settings = self.settings.get();
            let Some(dir) = install_dir(&instance, &settings) else {
                continue;
            };
            let Ok(args) = self.resolve_server_args(&id, &[]) else {
                continue;
            };
            let exe = dir.join(SERVER_EXECUTABLE);
            supervisor.expect_process(&exe, &args);
            if let Some(pid) = supervisor.running_pid() {
                info!("Instance {} already running with PID {}", id, pid);
                self.watchdog.register(&id, exe, args, supervisor);
            }
        }
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.slots.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// All instances with status taken from the OS
    pub fn list(&self) -> Vec<Instance> {
        let entries: Vec<(Instance, Arc<Supervisor>)> = self
            .slots
            .read()
            .values()
            .map(|slot| (slot.instance.clone(), Arc::clone(&slot.supervisor)))
            .collect();

        let mut instances: Vec<Instance> = entries
            .into_iter()
            .map(|(instance, supervisor)| with_live_status(instance, &supervisor))
            .collect();
        instances.sort_by(|a, b| {
            b.is_default()
                .cmp(&a.is_default())
                .then_with(|| a.id.cmp(&b.id))
        });
        instances
    }

    pub fn get(&self, id: &str) -> Result<Instance> {
        let (instance, supervisor, _) = self.slot_handles(id)?;
        Ok(with_live_status(instance, &supervisor))
    }

    pub fn supervisor(&self, id: &str) -> Result<Arc<Supervisor>> {
        self.slot_handles(id).map(|(_, supervisor, _)| supervisor)
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.supervisor(id).map_or(false, |s| s.is_running())
    }

    pub fn create(&self, mut instance: Instance) -> Result<Instance> {
        if !validate_instance_id(&instance.id) {
            return Err(Error::InvalidInstanceId(instance.id));
        }
        if instance.name.trim().is_empty() {
            instance.name = instance.id.clone();
        }
        instance.created_at = Utc::now();
        instance.status = InstanceStatus::Stopped;
        instance.pid = None;
        instance.last_started = None;

        {
            let mut slots = self.slots.write();
            if slots.contains_key(&instance.id) {
                return Err(Error::InstanceExists(instance.id));
            }
            let slot = self.new_slot(instance.clone());
            slots.insert(instance.id.clone(), slot);
        }
        self.save()?;

        self.sink
            .info(Some(&instance.id), format!("Instance '{}' created", instance.name));
        Ok(instance)
    }

    /// Partial merge; absent fields keep their value
    pub fn update(&self, id: &str, update: InstanceUpdate) -> Result<Instance> {
        let updated = {
            let mut slots = self.slots.write();
            let slot = slots
                .get_mut(id)
                .ok_or_else(|| Error::InstanceNotFound(id.to_string()))?;
            slot.instance.merge(update);
            slot.instance.clone()
        };
        self.save()?;
        // Console endpoint may have moved
        self.consoles.lock().remove(id);
        debug!("Instance {} updated", id);
        self.get(&updated.id)
    }

    /// Remove an instance, stopping its server first
    pub async fn delete(&self, id: &str) -> Result<()> {
        if id == DEFAULT_INSTANCE_ID {
            return Err(Error::ProtectedInstance(id.to_string()));
        }
        let (_, supervisor, lifecycle) = self.slot_handles(id)?;
        let _guard = lifecycle.lock().await;

        self.watchdog.unregister(id);
        if supervisor.is_running() {
            let outcome = supervisor.stop().await?;
            info!("Stopped instance {} before deletion ({})", id, outcome);
        }

        self.slots.write().remove(id);
        self.consoles.lock().remove(id);
        self.save()?;
        self.sink.info(Some(id), "Instance deleted");
        Ok(())
    }

    /// Final launch arguments for an instance
    ///
    /// Missing flags are appended in a fixed order: headless, config,
    /// profile, addon directory. Flags already in `user_args` are left alone,
    /// so resolving an already resolved list returns it unchanged.
    pub fn resolve_server_args(&self, id: &str, user_args: &[String]) -> Result<Vec<String>> {
        let instance = self.record(id)?;
        let settings = self.settings.get();
        let has = |flag: &str| user_args.iter().any(|a| a == flag);

        let mut args = user_args.to_vec();

        if !has(HEADLESS_FLAG) {
            args.push(HEADLESS_FLAG.to_string());
        }

        if !has(CONFIG_FLAG) {
            let config = config_file(&instance, &settings)
                .unwrap_or_else(|| self.data_dir.join(DEFAULT_CONFIG_FILE));
            args.push(CONFIG_FLAG.to_string());
            args.push(absolute(config)?.to_string_lossy().into_owned());
        }

        if !has(PROFILE_FLAG) {
            let root = settings
                .profiles_dir()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| self.data_dir.join(PROFILE_DIR));
            let profile = if instance.is_default() {
                root
            } else {
                root.join(&instance.id)
            };
            let profile = absolute(profile)?;
            std::fs::create_dir_all(&profile)?;
            args.push(PROFILE_FLAG.to_string());
            args.push(profile.to_string_lossy().into_owned());
        }

        if !has(ADDONS_FLAG) {
            let addons = settings
                .addons_dir()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| self.data_dir.join(ADDONS_DIR));
            args.push(ADDONS_FLAG.to_string());
            args.push(absolute(addons)?.to_string_lossy().into_owned());
        }

        Ok(args)
    }

    /// Launch an instance's server
    pub async fn start(&self, id: &str, user_args: &[String]) -> Result<u32> {
        let (instance, supervisor, lifecycle) = self.slot_handles(id)?;
        let _guard = lifecycle.lock().await;

        // A running server keeps the arguments it was launched with
        if let Some(pid) = supervisor.running_pid() {
            return Err(Error::AlreadyRunning { pid });
        }

        let settings = self.settings.get();
        let dir = install_dir(&instance, &settings)
            .ok_or_else(|| Error::MissingPath(id.to_string()))?;
        let exe = dir.join(SERVER_EXECUTABLE);
        let args = self.resolve_server_args(id, user_args)?;

        self.sink.info(
            Some(id),
            format!("Starting server '{}': {}", instance.name, exe.display()),
        );

        // Watched before launch so an immediate tick has the right arguments
        let previous = self.watchdog.launch_args(id);
        self.watchdog
            .register(id, exe.clone(), args.clone(), Arc::clone(&supervisor));

        match supervisor.start(&exe, &args).await {
            Ok(pid) => {
                if let Some(slot) = self.slots.write().get_mut(id) {
                    slot.instance.last_started = Some(Utc::now());
                }
                if let Err(e) = self.save() {
                    warn!("Failed to record start time of {}: {}", id, e);
                }
                self.sink
                    .info(Some(id), format!("Server '{}' started", instance.name));
                dispatch(
                    &self.notifier,
                    InstanceEvent::Started {
                        instance: id.to_string(),
                        name: instance.name.clone(),
                    },
                );
                Ok(pid)
            }
            Err(e @ Error::AlreadyRunning { .. }) => {
                // An auto-restart got there first
                match previous {
                    Some((exe, args)) => self.watchdog.register(id, exe, args, supervisor),
                    None => self.watchdog.unregister(id),
                }
                Err(e)
            }
            Err(e) => {
                self.watchdog.unregister(id);
                self.sink.error(
                    Some(id),
                    format!("Failed to start server '{}': {}", instance.name, e),
                );
                dispatch(
                    &self.notifier,
                    InstanceEvent::StartFailed {
                        instance: id.to_string(),
                        name: instance.name.clone(),
                        error: e.to_string(),
                    },
                );
                Err(e)
            }
        }
    }

    /// Stop an instance on purpose; the watchdog lets go of it first
    pub async fn stop(&self, id: &str) -> Result<StopOutcome> {
        let (instance, supervisor, lifecycle) = self.slot_handles(id)?;
        let _guard = lifecycle.lock().await;

        self.watchdog.unregister(id);
        self.sink
            .info(Some(id), format!("Stopping server '{}'", instance.name));

        let outcome = supervisor.stop().await?;
        match outcome {
            StopOutcome::NotRunning => {
                self.sink.info(Some(id), "Server was not running");
            }
            StopOutcome::Graceful | StopOutcome::ForceKilled => {
                let forced = outcome == StopOutcome::ForceKilled;
                self.sink.info(
                    Some(id),
                    format!("Server '{}' stopped ({})", instance.name, outcome),
                );
                dispatch(
                    &self.notifier,
                    InstanceEvent::Stopped {
                        instance: id.to_string(),
                        name: instance.name.clone(),
                        forced,
                    },
                );
            }
        }
        Ok(outcome)
    }

    /// Stop, pause, then start with headless defaults
    ///
    /// A failed stop is logged and the start is attempted anyway.
    pub async fn restart(&self, id: &str) -> Result<u32> {
        if let Err(e) = self.stop(id).await {
            if matches!(e, Error::InstanceNotFound(_)) {
                return Err(e);
            }
            warn!("Stop before restart of {} failed: {}", id, e);
        }
        tokio::time::sleep(self.restart_pause).await;
        self.start(id, &[HEADLESS_FLAG.to_string()]).await
    }

    /// Location of the instance's game config
    pub fn config_path(&self, id: &str) -> Result<PathBuf> {
        let instance = self.record(id)?;
        let settings = self.settings.get();
        config_file(&instance, &settings).ok_or_else(|| {
            Error::config(format!(
                "configuration file not specified for instance '{}'",
                id
            ))
        })
    }

    /// Read the instance's game config fresh from disk
    pub fn game_config(&self, id: &str) -> Result<GameConfig> {
        GameConfig::load(&self.config_path(id)?)
    }

    fn console(&self, id: &str) -> Result<Arc<RconClient>> {
        let endpoint = self.game_config(id)?.rcon_endpoint()?;

        let mut consoles = self.consoles.lock();
        if let Some(client) = consoles.get(id) {
            if client.matches(&endpoint.address, &endpoint.password) {
                return Ok(Arc::clone(client));
            }
        }
        let client = Arc::new(RconClient::new(
            endpoint.address,
            endpoint.password,
            self.rcon_timeout,
        ));
        consoles.insert(id.to_string(), Arc::clone(&client));
        Ok(client)
    }

    /// Forward a console command to a running server
    pub async fn send_command(&self, id: &str, command: &str) -> Result<String> {
        let client = self.console(id)?;
        debug!("RCON {} -> {}: {}", id, client.address(), command);
        client.send(command).await.map_err(Error::from)
    }

    pub async fn players(&self, id: &str) -> Result<Vec<PlayerInfo>> {
        let output = self.send_command(id, "#players").await?;
        Ok(parse_players(&output))
    }

    pub async fn kick_player(&self, id: &str, index: u32, reason: &str) -> Result<String> {
        let reason = if reason.trim().is_empty() {
            DEFAULT_KICK_REASON
        } else {
            reason
        };
        self.send_command(id, &format!("#kick {} {}", index, reason))
            .await
    }

    pub async fn ban_player(&self, id: &str, identifier: &str, reason: &str) -> Result<String> {
        if identifier.trim().is_empty() {
            return Err(Error::config("player identifier is required"));
        }
        let reason = if reason.trim().is_empty() {
            DEFAULT_BAN_REASON
        } else {
            reason
        };
        self.send_command(id, &format!("#ban create {} 0 {}", identifier, reason))
            .await
    }

    pub async fn server_metrics(&self, id: &str) -> Result<ServerMetrics> {
        let output = self.send_command(id, "#status").await?;
        Ok(parse_metrics(&output))
    }

    pub fn resource_history(&self, id: &str) -> Result<Vec<ResourceSample>> {
        Ok(self.supervisor(id)?.resource_history())
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{fake_server, wait_for, write_game_config, FakeConsole, ServerScript};
    use crate::watchdog::{CrashLog, WatchdogPolicy};
    use forgepm_notify::mock::MockNotifier;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid as NixPid;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        registry: InstanceRegistry,
        watchdog: Arc<Watchdog>,
        notifier: Arc<MockNotifier>,
    }

    fn fixture_with(settings: Settings) -> Fixture {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(LogSink::default());
        let notifier = Arc::new(MockNotifier::new());
        let watchdog = Arc::new(Watchdog::new(
            WatchdogPolicy::default(),
            CrashLog::open(JsonStore::new(dir.path())).unwrap(),
            notifier.clone(),
            Arc::clone(&sink),
        ));
        let registry = InstanceRegistry::open(
            dir.path(),
            Arc::new(settings),
            Arc::clone(&watchdog),
            notifier.clone(),
            sink,
        )
        .unwrap()
        .with_rcon_timeout(Duration::from_secs(2))
        .with_restart_pause(Duration::from_millis(50));
        Fixture {
            dir,
            registry,
            watchdog,
            notifier,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(Settings::default())
    }

    /// Instance "alpha" with a fake server installed under the data dir
    fn with_server(f: &Fixture, script: ServerScript) -> PathBuf {
        let install = f.dir.path().join("install");
        fake_server(&install, script);
        f.registry
            .create(Instance::new("alpha", "Alpha").with_path(&install))
            .unwrap();
        install
    }

    #[tokio::test]
    async fn test_default_instance_created_on_first_load() {
        let f = fixture();
        let list = f.registry.list();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, DEFAULT_INSTANCE_ID);
        assert_eq!(list[0].name, DEFAULT_INSTANCE_NAME);
        assert!(f.dir.path().join(INSTANCES_FILE).exists());
    }

    #[tokio::test]
    async fn test_default_instance_reinserted_when_missing() {
        let f = fixture();
        let other = Instance::new("eu", "EU");
        std::fs::write(
            f.dir.path().join(INSTANCES_FILE),
            serde_json::to_vec(&vec![other]).unwrap(),
        )
        .unwrap();

        let sink = Arc::new(LogSink::default());
        let reopened = InstanceRegistry::open(
            f.dir.path(),
            Arc::new(Settings::default()),
            Arc::clone(&f.watchdog),
            f.notifier.clone(),
            sink,
        )
        .unwrap();
        assert_eq!(reopened.ids(), vec!["default".to_string(), "eu".to_string()]);
    }

    #[tokio::test]
    async fn test_create_update_delete() {
        let f = fixture();
        let created = f
            .registry
            .create(Instance::new("eu-1", "EU One").with_config_path("/srv/eu/server.json"))
            .unwrap();
        assert_eq!(created.status, InstanceStatus::Stopped);

        assert!(matches!(
            f.registry.create(Instance::new("eu-1", "again")),
            Err(Error::InstanceExists(_))
        ));
        assert!(matches!(
            f.registry.create(Instance::new("../etc", "bad")),
            Err(Error::InvalidInstanceId(_))
        ));

        let updated = f
            .registry
            .update(
                "eu-1",
                InstanceUpdate {
                    name: Some("EU Prime".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.name, "EU Prime");
        assert_eq!(
            updated.config_path.as_deref(),
            Some(Path::new("/srv/eu/server.json"))
        );

        f.registry.delete("eu-1").await.unwrap();
        assert!(matches!(f.registry.get("eu-1"), Err(Error::InstanceNotFound(_))));

        let err = f.registry.delete(DEFAULT_INSTANCE_ID).await.unwrap_err();
        assert!(matches!(err, Error::ProtectedInstance(_)));
        assert_eq!(err.status_code(), 403);
    }

    #[tokio::test]
    async fn test_resolve_args_injects_in_order() {
        let f = fixture_with(Settings {
            server_path: Some("/opt/reforger".into()),
            addons_path: Some("/data/addons".into()),
            ..Default::default()
        });
        f.registry.create(Instance::new("eu", "EU")).unwrap();

        let args = f.registry.resolve_server_args("eu", &[]).unwrap();
        let profile = f.dir.path().join(PROFILE_DIR).join("eu");
        assert_eq!(
            args,
            vec![
                "-server".to_string(),
                "-config".to_string(),
                "/opt/reforger/server.json".to_string(),
                "-profile".to_string(),
                profile.to_string_lossy().into_owned(),
                "-addonDownloadDir".to_string(),
                "/data/addons".to_string(),
            ]
        );
        assert!(profile.is_dir());

        let default_args = f.registry.resolve_server_args(DEFAULT_INSTANCE_ID, &[]).unwrap();
        assert_eq!(
            default_args[4],
            f.dir.path().join(PROFILE_DIR).to_string_lossy()
        );
    }

    #[tokio::test]
    async fn test_resolve_args_is_deterministic_and_idempotent() {
        let f = fixture();
        f.registry
            .create(Instance::new("eu", "EU").with_config_path("/cfg/eu.json"))
            .unwrap();

        let user = vec!["-maxFPS".to_string(), "60".to_string()];
        let first = f.registry.resolve_server_args("eu", &user).unwrap();
        let second = f.registry.resolve_server_args("eu", &user).unwrap();
        assert_eq!(first, second);
        assert_eq!(&first[..2], &user[..]);
        assert!(first.contains(&"/cfg/eu.json".to_string()));

        let again = f.registry.resolve_server_args("eu", &first).unwrap();
        assert_eq!(again, first);
    }

    #[tokio::test]
    async fn test_resolve_args_keeps_user_flags() {
        let f = fixture();
        let user: Vec<String> = ["-config", "/mine.json", "-server"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let args = f.registry.resolve_server_args(DEFAULT_INSTANCE_ID, &user).unwrap();
        assert_eq!(args.iter().filter(|a| *a == "-config").count(), 1);
        assert_eq!(args.iter().filter(|a| *a == "-server").count(), 1);
        assert_eq!(args[1], "/mine.json");
    }

    #[tokio::test]
    async fn test_start_without_path_is_config_error() {
        let f = fixture();
        f.registry.create(Instance::new("test", "Test")).unwrap();

        let err = f.registry.start("test", &[]).await.unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("path"));
        assert_eq!(f.registry.get("test").unwrap().status, InstanceStatus::Stopped);
        assert!(!f.watchdog.is_watching("test"));
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let f = fixture();
        with_server(&f, ServerScript::Graceful);

        let pid = f.registry.start("alpha", &[]).await.unwrap();
        let inst = f.registry.get("alpha").unwrap();
        assert_eq!(inst.status, InstanceStatus::Running);
        assert_eq!(inst.pid, Some(pid));
        assert!(inst.last_started.is_some());
        assert!(f.watchdog.is_watching("alpha"));

        assert!(matches!(
            f.registry.start("alpha", &[]).await,
            Err(Error::AlreadyRunning { .. })
        ));

        let outcome = f.registry.stop("alpha").await.unwrap();
        assert_eq!(outcome, StopOutcome::Graceful);
        assert!(!f.watchdog.is_watching("alpha"));
        assert_eq!(f.registry.get("alpha").unwrap().status, InstanceStatus::Stopped);

        assert_eq!(f.registry.stop("alpha").await.unwrap(), StopOutcome::NotRunning);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(f.notifier.count_event_type("start").await, 1);
        assert_eq!(f.notifier.count_event_type("stop").await, 1);
    }

    /// Words of a live process's command line
    fn cmdline(pid: u32) -> Vec<String> {
        std::fs::read(format!("/proc/{}/cmdline", pid))
            .unwrap()
            .split(|b| *b == 0)
            .map(|w| String::from_utf8_lossy(w).into_owned())
            .collect()
    }

    #[tokio::test]
    async fn test_rejected_start_keeps_watchdog_arguments() {
        let f = fixture();
        with_server(&f, ServerScript::Graceful);
        let mode = |m: &str| vec!["-mode".to_string(), m.to_string()];

        let pid = f.registry.start("alpha", &mode("A")).await.unwrap();
        assert!(matches!(
            f.registry.start("alpha", &mode("B")).await,
            Err(Error::AlreadyRunning { pid: running }) if running == pid
        ));
        let (_, args) = f.watchdog.launch_args("alpha").unwrap();
        assert_eq!(&args[..2], &mode("A")[..]);

        kill(NixPid::from_raw(pid as i32), Signal::SIGKILL).unwrap();
        let registry = &f.registry;
        assert!(wait_for(|| !registry.is_running("alpha"), Duration::from_secs(3)).await);

        f.watchdog.check_all().await;
        let restarted = f.registry.get("alpha").unwrap().pid.unwrap();
        assert_ne!(restarted, pid);

        let words = cmdline(restarted);
        let at = words.iter().position(|w| w == "-mode").unwrap();
        assert_eq!(words[at + 1], "A");

        f.registry.stop("alpha").await.unwrap();
    }

    #[tokio::test]
    async fn test_deliberate_stop_is_not_restarted() {
        let f = fixture();
        with_server(&f, ServerScript::Graceful);
        f.registry.start("alpha", &[]).await.unwrap();
        f.registry.stop("alpha").await.unwrap();

        f.watchdog.check_all().await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(!f.registry.is_running("alpha"));
        assert_eq!(f.notifier.count_event_type("crash").await, 0);
    }

    #[tokio::test]
    async fn test_status_follows_process_death() {
        let f = fixture();
        with_server(&f, ServerScript::CrashSoon);
        f.registry.start("alpha", &[]).await.unwrap();

        let registry = &f.registry;
        assert!(
            wait_for(
                || registry.get("alpha").unwrap().status == InstanceStatus::Stopped,
                Duration::from_secs(5)
            )
            .await
        );
    }

    #[tokio::test]
    async fn test_restart_replaces_process() {
        let f = fixture();
        with_server(&f, ServerScript::Graceful);
        let first = f.registry.start("alpha", &[]).await.unwrap();
        let second = f.registry.restart("alpha").await.unwrap();
        assert_ne!(first, second);
        assert!(f.registry.is_running("alpha"));
        f.registry.stop("alpha").await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_stops_running_server() {
        let f = fixture();
        with_server(&f, ServerScript::Graceful);
        let pid = f.registry.start("alpha", &[]).await.unwrap();

        f.registry.delete("alpha").await.unwrap();
        let mut sys = sysinfo::System::new();
        let gone = !sys.refresh_process(sysinfo::Pid::from_u32(pid))
            || sys
                .process(sysinfo::Pid::from_u32(pid))
                .map_or(true, |p| p.status() == sysinfo::ProcessStatus::Zombie);
        assert!(gone);
        assert!(!f.watchdog.is_watching("alpha"));
    }

    #[tokio::test]
    async fn test_send_command_requires_console_settings() {
        let f = fixture();
        f.registry.create(Instance::new("eu", "EU")).unwrap();
        let err = f.registry.send_command("eu", "#status").await.unwrap_err();
        assert!(err.is_config());

        let config = f.dir.path().join("eu.json");
        std::fs::write(&config, r#"{"rcon": {"port": 2302}}"#).unwrap();
        f.registry
            .update(
                "eu",
                InstanceUpdate {
                    config_path: Some(config),
                    ..Default::default()
                },
            )
            .unwrap();
        let err = f.registry.send_command("eu", "#status").await.unwrap_err();
        assert!(matches!(err, Error::RconNotConfigured(_)));
    }

    #[tokio::test]
    async fn test_console_operations() {
        let console = FakeConsole::spawn(
            "pw",
            vec![
                (
                    "#players",
                    "Players on server:\n[#] [IP Address]:[Port] [Ping] [GUID] [Name]\n\
                     --------------------------------------------------\n\
                     0   203.0.113.7:2304   45   0123456789abcdef(OK) Alpha Tester\n\
                     (1 players in total)",
                ),
                ("#status", "players: 1\nfps: 59.5"),
            ],
        )
        .await;

        let f = fixture();
        let config = f.dir.path().join("eu.json");
        write_game_config(&config, console.port, "pw", "{A}Scenario");
        f.registry
            .create(Instance::new("eu", "EU").with_config_path(&config))
            .unwrap();

        let players = f.registry.players("eu").await.unwrap();
        assert_eq!(players.len(), 1);
        assert_eq!(players[0].name, "Alpha Tester");

        let metrics = f.registry.server_metrics("eu").await.unwrap();
        assert_eq!(metrics.player_count, 1);

        f.registry.kick_player("eu", 0, "").await.unwrap();
        f.registry.ban_player("eu", "0123456789abcdef", "cheating").await.unwrap();

        let received = console.received();
        assert!(received.contains(&"#kick 0 Kicked by admin".to_string()));
        assert!(received.contains(&"#ban create 0123456789abcdef 0 cheating".to_string()));
    }

    #[tokio::test]
    async fn test_config_is_read_fresh_each_call() {
        let old = FakeConsole::spawn("pw", vec![("say", "old")]).await;
        let new = FakeConsole::spawn("pw2", vec![("say", "new")]).await;

        let f = fixture();
        let config = f.dir.path().join("eu.json");
        write_game_config(&config, old.port, "pw", "A");
        f.registry
            .create(Instance::new("eu", "EU").with_config_path(&config))
            .unwrap();

        assert_eq!(f.registry.send_command("eu", "say hi").await.unwrap(), "old");
        write_game_config(&config, new.port, "pw2", "A");
        assert_eq!(f.registry.send_command("eu", "say hi").await.unwrap(), "new");
    }
}
