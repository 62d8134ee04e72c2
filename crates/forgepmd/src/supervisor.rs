//! Process supervisor - owns the OS process of one instance

use chrono::{DateTime, Utc};
use forgepm_core::{
    console_log_path, Error, ResourceSample, Result, StopOutcome, PROFILE_FLAG,
    RESOURCE_HISTORY_LEN, SAMPLE_INTERVAL, STOP_POLL_INTERVAL, STOP_TIMEOUT,
};
use forgepm_logs::{LogCapture, LogSink, RotationConfig};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid as NixPid;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use sysinfo::{Pid, Process, ProcessStatus, System};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// How to recognise this instance's server among all processes
#[derive(Debug, Clone, PartialEq, Eq)]
struct Signature {
    exe: PathBuf,
    /// Value of `-profile`, unique per instance
    marker: Option<String>,
}

impl Signature {
    fn from_launch(exe: &Path, args: &[String]) -> Self {
        let marker = args
            .iter()
            .position(|a| a == PROFILE_FLAG)
            .and_then(|i| args.get(i + 1))
            .cloned();
        Self {
            exe: exe.to_path_buf(),
            marker,
        }
    }

    fn matches(&self, process: &Process) -> bool {
        let cmd = process.cmd();
        let exe = self.exe.to_string_lossy();
        // Scripts show up as `[interpreter, script, ...]`
        let exe_matches = cmd.iter().take(2).any(|a| a.as_str() == exe);
        let marker_matches = self
            .marker
            .as_ref()
            .map_or(true, |m| cmd.iter().any(|a| a == m));
        exe_matches && marker_matches
    }
}

#[derive(Default)]
struct ProcState {
    pid: Option<u32>,
    signature: Option<Signature>,
    started_at: Option<DateTime<Utc>>,
}

fn is_alive(process: &Process) -> bool {
    !matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead)
}

/// Absolute, existing executable path
fn resolve_executable(exe: &Path) -> Result<PathBuf> {
    let absolute = if exe.is_absolute() {
        exe.to_path_buf()
    } else {
        std::env::current_dir()?.join(exe)
    };

    let resolved = absolute.canonicalize().map_err(|e| {
        Error::config(format!(
            "cannot resolve server executable {}: {}",
            exe.display(),
            e
        ))
    })?;

    if !resolved.is_file() {
        return Err(Error::config(format!(
            "server executable {} is not a file",
            resolved.display()
        )));
    }
    Ok(resolved)
}

/// Lifecycle owner for exactly one instance's process
pub struct Supervisor {
    instance_id: String,
    logs_dir: PathBuf,
    sink: Arc<LogSink>,
    state: Arc<Mutex<ProcState>>,
    system: Mutex<System>,
    history: Mutex<VecDeque<ResourceSample>>,
    /// Last full process-table scan for the signature
    last_scan: Mutex<Option<Instant>>,
    scan_interval: Duration,
    /// Serialises start and stop
    op_lock: tokio::sync::Mutex<()>,
}

impl Supervisor {
    pub fn new(instance_id: impl Into<String>, logs_dir: PathBuf, sink: Arc<LogSink>) -> Self {
        Self {
            instance_id: instance_id.into(),
            logs_dir,
            sink,
            state: Arc::new(Mutex::new(ProcState::default())),
            system: Mutex::new(System::new()),
            history: Mutex::new(VecDeque::with_capacity(RESOURCE_HISTORY_LEN)),
            last_scan: Mutex::new(None),
            scan_interval: SAMPLE_INTERVAL,
            op_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Minimum time between process-table scans for an untracked server
    pub fn with_scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval = interval;
        self
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Teach the supervisor what its server looks like so a process left
    /// over from an earlier daemon run is recognised
    pub fn expect_process(&self, exe: &Path, args: &[String]) {
        let Ok(exe) = resolve_executable(exe) else {
            return;
        };
        self.state.lock().signature = Some(Signature::from_launch(&exe, args));
        *self.last_scan.lock() = None;
    }

    /// Launch the server
    pub async fn start(&self, exe: &Path, args: &[String]) -> Result<u32> {
        self.start_if(exe, args, || true)
            .await?
            .ok_or_else(|| Error::launch("start was cancelled"))
    }

    /// Launch unless `proceed` says otherwise once the lifecycle lock is held
    ///
    /// Returns `Ok(None)` when `proceed` declined.
    pub async fn start_if<F>(&self, exe: &Path, args: &[String], proceed: F) -> Result<Option<u32>>
    where
        F: FnOnce() -> bool + Send,
    {
        let _op = self.op_lock.lock().await;

        if !proceed() {
            return Ok(None);
        }

        if let Some(pid) = self.running_pid() {
            return Err(Error::AlreadyRunning { pid });
        }

        let exe = resolve_executable(exe)?;
        let cwd = exe
            .parent()
            .ok_or_else(|| Error::config(format!("{} has no parent directory", exe.display())))?;

        info!(
            "Starting server for instance {}: {} {}",
            self.instance_id,
            exe.display(),
            args.join(" ")
        );

        let mut command = Command::new(&exe);
        command
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // Own process group, so signals aimed at the daemon do not reach it
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .map_err(|e| Error::launch(format!("{}: {}", exe.display(), e)))?;

        let pid = child
            .id()
            .ok_or_else(|| Error::launch(format!("{} exited during spawn", exe.display())))?;

        let capture = LogCapture::new(
            &self.instance_id,
            console_log_path(&self.logs_dir, &self.instance_id),
            RotationConfig::default(),
            Arc::clone(&self.sink),
        )?;
        capture.spawn_capture(child.stdout.take(), child.stderr.take());

        {
            let mut state = self.state.lock();
            state.pid = Some(pid);
            state.signature = Some(Signature::from_launch(&exe, args));
            state.started_at = Some(Utc::now());
        }
        self.history.lock().clear();

        // Reap the child so it never lingers as a zombie
        let state = Arc::clone(&self.state);
        let sink = Arc::clone(&self.sink);
        let id = self.instance_id.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => sink.info(Some(&id), format!("Server process {} exited: {}", pid, status)),
                Err(e) => sink.warn(Some(&id), format!("Failed to wait on server process {}: {}", pid, e)),
            }
            let mut state = state.lock();
            if state.pid == Some(pid) {
                state.pid = None;
                state.started_at = None;
            }
        });

        self.sink
            .info(Some(&self.instance_id), format!("Server started with PID {}", pid));
        Ok(Some(pid))
    }

    /// Terminate gracefully, escalating to a tree kill after the timeout
    pub async fn stop(&self) -> Result<StopOutcome> {
        let _op = self.op_lock.lock().await;

        let Some(pid) = self.running_pid() else {
            return Ok(StopOutcome::NotRunning);
        };

        info!("Stopping server for instance {} (PID {})", self.instance_id, pid);
        if let Err(e) = kill(NixPid::from_raw(pid as i32), Signal::SIGTERM) {
            debug!("SIGTERM to {} failed: {}", pid, e);
        }

        let deadline = Instant::now() + STOP_TIMEOUT;
        while Instant::now() < deadline {
            tokio::time::sleep(STOP_POLL_INTERVAL).await;
            if !self.pid_alive(pid) {
                self.forget(pid);
                return Ok(StopOutcome::Graceful);
            }
        }

        warn!(
            "Server for instance {} ignored SIGTERM for {:?}, killing process tree",
            self.instance_id, STOP_TIMEOUT
        );
        self.kill_tree(pid);

        for _ in 0..20 {
            if !self.pid_alive(pid) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        self.forget(pid);
        Ok(StopOutcome::ForceKilled)
    }

    /// Live OS query for the server's PID
    ///
    /// A tracked PID is checked on every call. Looking for an untracked
    /// server by its signature walks the whole process table, so that scan
    /// runs at most once per scan interval.
    pub fn running_pid(&self) -> Option<u32> {
        let (tracked, signature) = {
            let state = self.state.lock();
            (state.pid, state.signature.clone())
        };

        if let Some(pid) = tracked {
            if self.pid_alive(pid) {
                return Some(pid);
            }
        }

        let signature = signature?;
        {
            let mut last_scan = self.last_scan.lock();
            if last_scan.map_or(false, |at| at.elapsed() < self.scan_interval) {
                return None;
            }
            *last_scan = Some(Instant::now());
        }

        let mut sys = self.system.lock();
        sys.refresh_processes();
        let found = sys
            .processes()
            .iter()
            .find(|(_, p)| is_alive(p) && signature.matches(p))
            .map(|(pid, _)| pid.as_u32());

        if let Some(pid) = found {
            if tracked != Some(pid) {
                debug!("Instance {} adopted running PID {}", self.instance_id, pid);
            }
            self.state.lock().pid = Some(pid);
        }
        found
    }

    pub fn is_running(&self) -> bool {
        self.running_pid().is_some()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().started_at
    }

    fn pid_alive(&self, pid: u32) -> bool {
        let mut sys = self.system.lock();
        let spid = Pid::from_u32(pid);
        sys.refresh_process(spid) && sys.process(spid).map_or(false, is_alive)
    }

    fn forget(&self, pid: u32) {
        let mut state = self.state.lock();
        if state.pid == Some(pid) {
            state.pid = None;
            state.started_at = None;
        }
    }

    fn kill_tree(&self, root: u32) {
        let victims = {
            let mut sys = self.system.lock();
            sys.refresh_processes();

            let mut victims = vec![root];
            let mut i = 0;
            while i < victims.len() {
                let parent = Pid::from_u32(victims[i]);
                for (pid, process) in sys.processes() {
                    let pid = pid.as_u32();
                    if process.parent() == Some(parent) && !victims.contains(&pid) {
                        victims.push(pid);
                    }
                }
                i += 1;
            }
            victims
        };

        for pid in victims.iter().rev() {
            if let Err(e) = kill(NixPid::from_raw(*pid as i32), Signal::SIGKILL) {
                debug!("SIGKILL to {} failed: {}", pid, e);
            }
        }
    }

    /// Record one resource sample if the server is up
    pub fn sample(&self) {
        let Some(pid) = self.state.lock().pid else {
            return;
        };

        let sample = {
            let mut sys = self.system.lock();
            let spid = Pid::from_u32(pid);
            if !sys.refresh_process(spid) {
                return;
            }
            match sys.process(spid) {
                Some(p) if is_alive(p) => ResourceSample {
                    time: Utc::now(),
                    cpu: p.cpu_usage(),
                    memory_mb: p.memory() as f64 / 1024.0 / 1024.0,
                },
                _ => return,
            }
        };

        let mut history = self.history.lock();
        if history.len() >= RESOURCE_HISTORY_LEN {
            history.pop_front();
        }
        history.push_back(sample);
    }

    /// Oldest first
    pub fn resource_history(&self) -> Vec<ResourceSample> {
        self.history.lock().iter().copied().collect()
    }

    pub fn latest_sample(&self) -> Option<ResourceSample> {
        self.history.lock().back().copied()
    }
}

/// Sample every couple of seconds until the supervisor is dropped
pub fn spawn_sampler(supervisor: &Arc<Supervisor>) {
    let weak: Weak<Supervisor> = Arc::downgrade(supervisor);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SAMPLE_INTERVAL);
        loop {
            interval.tick().await;
            match weak.upgrade() {
                Some(supervisor) => supervisor.sample(),
                None => break,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{fake_server, wait_for, ServerScript};
    use tempfile::TempDir;

    fn supervisor(dir: &TempDir) -> (Supervisor, Arc<LogSink>) {
        let sink = Arc::new(LogSink::default());
        let sup = Supervisor::new("test", dir.path().join("logs"), Arc::clone(&sink));
        (sup, sink)
    }

    #[tokio::test]
    async fn test_start_and_graceful_stop() {
        let dir = TempDir::new().unwrap();
        let exe = fake_server(dir.path(), ServerScript::Graceful);
        let (sup, sink) = supervisor(&dir);

        let pid = sup.start(&exe, &["-server".to_string()]).await.unwrap();
        assert_eq!(sup.running_pid(), Some(pid));
        assert!(sup.started_at().is_some());

        assert_eq!(sup.stop().await.unwrap(), StopOutcome::Graceful);
        assert!(!sup.is_running());
        assert!(sink.tail(10, Some("test")).iter().any(|e| e.message.contains("started")));
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let dir = TempDir::new().unwrap();
        let exe = fake_server(dir.path(), ServerScript::Graceful);
        let (sup, _) = supervisor(&dir);

        let pid = sup.start(&exe, &[]).await.unwrap();
        match sup.start(&exe, &[]).await {
            Err(Error::AlreadyRunning { pid: running }) => assert_eq!(running, pid),
            other => panic!("expected AlreadyRunning, got {:?}", other),
        }
        sup.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_if_declined() {
        let dir = TempDir::new().unwrap();
        let exe = fake_server(dir.path(), ServerScript::Graceful);
        let (sup, _) = supervisor(&dir);

        assert_eq!(sup.start_if(&exe, &[], || false).await.unwrap(), None);
        assert!(!sup.is_running());
    }

    #[tokio::test]
    async fn test_stop_when_not_running() {
        let dir = TempDir::new().unwrap();
        let (sup, _) = supervisor(&dir);
        assert_eq!(sup.stop().await.unwrap(), StopOutcome::NotRunning);
    }

    #[tokio::test]
    async fn test_stubborn_process_is_force_killed() {
        let dir = TempDir::new().unwrap();
        let exe = fake_server(dir.path(), ServerScript::IgnoreTerm);
        let (sup, _) = supervisor(&dir);

        sup.start(&exe, &[]).await.unwrap();
        assert_eq!(sup.stop().await.unwrap(), StopOutcome::ForceKilled);
        assert!(!sup.is_running());
    }

    #[tokio::test]
    async fn test_missing_executable_is_config_error() {
        let dir = TempDir::new().unwrap();
        let (sup, _) = supervisor(&dir);

        let err = sup
            .start(&dir.path().join("nope").join("server.exe"), &[])
            .await
            .unwrap_err();
        assert!(err.is_config());
    }

    #[tokio::test]
    async fn test_external_death_is_seen() {
        let dir = TempDir::new().unwrap();
        let exe = fake_server(dir.path(), ServerScript::Graceful);
        let (sup, _) = supervisor(&dir);

        let pid = sup.start(&exe, &[]).await.unwrap();
        kill(NixPid::from_raw(pid as i32), Signal::SIGKILL).unwrap();

        assert!(wait_for(|| !sup.is_running(), Duration::from_secs(3)).await);
    }

    #[tokio::test]
    async fn test_output_goes_to_console_log() {
        let dir = TempDir::new().unwrap();
        let exe = fake_server(dir.path(), ServerScript::Graceful);
        let (sup, _) = supervisor(&dir);

        sup.start(&exe, &["-server".to_string()]).await.unwrap();
        let log = dir.path().join("logs").join("test.log");
        let seen = wait_for(
            || {
                std::fs::read_to_string(&log)
                    .map(|c| c.contains("fake server up"))
                    .unwrap_or(false)
            },
            Duration::from_secs(3),
        )
        .await;
        sup.stop().await.unwrap();
        assert!(seen);
    }

    #[tokio::test]
    async fn test_resource_history_is_bounded() {
        let dir = TempDir::new().unwrap();
        let exe = fake_server(dir.path(), ServerScript::Graceful);
        let (sup, _) = supervisor(&dir);

        sup.start(&exe, &[]).await.unwrap();
        for _ in 0..(RESOURCE_HISTORY_LEN + 5) {
            sup.sample();
        }
        let history = sup.resource_history();
        assert_eq!(history.len(), RESOURCE_HISTORY_LEN);
        assert!(history.first().unwrap().time <= history.last().unwrap().time);
        assert!(sup.latest_sample().is_some());
        sup.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_signature_scan_is_throttled() {
        let dir = TempDir::new().unwrap();
        let exe = fake_server(dir.path(), ServerScript::Graceful);
        let (sup, _) = supervisor(&dir);
        let sup = sup.with_scan_interval(Duration::from_secs(3600));
        let args = vec!["-profile".to_string(), "/data/profile/throttle".to_string()];

        sup.expect_process(&exe, &args);
        assert_eq!(sup.running_pid(), None);

        // Started behind the supervisor's back after the scan
        let mut outside = std::process::Command::new(exe.canonicalize().unwrap())
            .args(&args)
            .stdout(Stdio::null())
            .spawn()
            .unwrap();
        let pid = outside.id();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(sup.running_pid(), None);

        // Learning the signature again allows an immediate scan
        sup.expect_process(&exe, &args);
        assert_eq!(sup.running_pid(), Some(pid));
        assert_eq!(sup.running_pid(), Some(pid));

        outside.kill().unwrap();
        outside.wait().unwrap();
    }

    #[test]
    fn test_signature_reads_profile_marker() {
        let args = vec![
            "-server".to_string(),
            "-profile".to_string(),
            "/data/profile/eu".to_string(),
        ];
        let sig = Signature::from_launch(Path::new("/srv/game.exe"), &args);
        assert_eq!(sig.marker.as_deref(), Some("/data/profile/eu"));
        assert!(Signature::from_launch(Path::new("/srv/game.exe"), &[]).marker.is_none());
    }
}
