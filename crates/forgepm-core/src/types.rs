//! Core types for ForgePM

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::constants::DEFAULT_INSTANCE_ID;
use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;

/// Instance ids double as directory names, so keep them path-safe
static INSTANCE_ID_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9_-]+$").expect("Invalid instance id regex")
});

/// Validate an instance id
pub fn validate_instance_id(id: &str) -> bool {
    !id.is_empty() && INSTANCE_ID_REGEX.is_match(id)
}

/// Lifecycle status of an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    #[default]
    Stopped,
    Running,
    Error,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Stopped => "stopped",
            InstanceStatus::Running => "running",
            InstanceStatus::Error => "error",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, InstanceStatus::Running)
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for InstanceStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "stopped" => Ok(InstanceStatus::Stopped),
            "running" => Ok(InstanceStatus::Running),
            "error" => Ok(InstanceStatus::Error),
            _ => Err(Error::config(format!("Unknown status: {}", s))),
        }
    }
}

/// One managed game-server slot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub id: String,
    pub name: String,
    /// Server install directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Game config file (JSON)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_path: Option<PathBuf>,
    #[serde(default)]
    pub status: InstanceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_started: Option<DateTime<Utc>>,
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
}

impl Instance {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            path: None,
            config_path: None,
            status: InstanceStatus::Stopped,
            pid: None,
            created_at: Utc::now(),
            last_started: None,
            settings: BTreeMap::new(),
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn is_default(&self) -> bool {
        self.id == DEFAULT_INSTANCE_ID
    }

    /// Install directory, ignoring empty values
    pub fn install_dir(&self) -> Option<&Path> {
        non_empty(self.path.as_deref())
    }

    /// Config file, ignoring empty values
    pub fn config_file(&self) -> Option<&Path> {
        non_empty(self.config_path.as_deref())
    }

    /// Apply a partial update; absent or empty fields keep their value
    pub fn merge(&mut self, update: InstanceUpdate) {
        if let Some(name) = update.name.filter(|n| !n.is_empty()) {
            self.name = name;
        }
        if let Some(path) = update.path.filter(|p| !p.as_os_str().is_empty()) {
            self.path = Some(path);
        }
        if let Some(config) = update.config_path.filter(|p| !p.as_os_str().is_empty()) {
            self.config_path = Some(config);
        }
        if let Some(settings) = update.settings {
            self.settings = settings;
        }
    }
}

fn non_empty(path: Option<&Path>) -> Option<&Path> {
    path.filter(|p| !p.as_os_str().is_empty())
}

/// Partial instance update
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<BTreeMap<String, String>>,
}

/// How a stop request finished
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    /// Exited after the terminate signal
    Graceful,
    /// Still alive after the grace period, killed with its children
    ForceKilled,
    NotRunning,
}

impl StopOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopOutcome::Graceful => "graceful",
            StopOutcome::ForceKilled => "force_killed",
            StopOutcome::NotRunning => "not_running",
        }
    }
}

impl std::fmt::Display for StopOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Resource usage sample of a supervised process
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSample {
    pub time: DateTime<Utc>,
    pub cpu: f32,
    pub memory_mb: f64,
}

/// Crash audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrashEvent {
    pub timestamp: DateTime<Utc>,
    pub instance_id: String,
    pub reason: String,
}

/// Watchdog bookkeeping for one instance, as reported to callers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchedSummary {
    pub instance_id: String,
    pub restart_count: u32,
    pub last_restart: Option<DateTime<Utc>>,
    pub suspended: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchdogStatus {
    pub enabled: bool,
    pub watched: Vec<WatchedSummary>,
}

/// Map change target: a mapped slot or a literal scenario id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MapTarget {
    Slot(u32),
    Scenario(String),
}

impl FromStr for MapTarget {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::InvalidSlot("map slot or scenario id missing".to_string()));
        }
        match s.parse::<u32>() {
            Ok(slot) if slot > 0 => Ok(MapTarget::Slot(slot)),
            _ => Ok(MapTarget::Scenario(s.to_string())),
        }
    }
}

impl std::fmt::Display for MapTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MapTarget::Slot(slot) => write!(f, "slot {}", slot),
            MapTarget::Scenario(id) => write!(f, "{}", id),
        }
    }
}

/// What a scheduled job does
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum JobAction {
    Restart { instance: String },
    Start { instance: String },
    Stop { instance: String },
    #[serde(rename = "changemap")]
    ChangeMap { instance: String, target: MapTarget },
}

impl JobAction {
    pub fn instance(&self) -> &str {
        match self {
            JobAction::Restart { instance }
            | JobAction::Start { instance }
            | JobAction::Stop { instance }
            | JobAction::ChangeMap { instance, .. } => instance,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            JobAction::Restart { .. } => "restart",
            JobAction::Start { .. } => "start",
            JobAction::Stop { .. } => "stop",
            JobAction::ChangeMap { .. } => "changemap",
        }
    }
}

/// Cron-scheduled action bound to one instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    #[serde(default)]
    pub id: String,
    pub name: String,
    /// Six fields, seconds first
    pub cron_expr: String,
    #[serde(flatten)]
    pub action: JobAction,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Job {
    pub fn new(name: impl Into<String>, cron_expr: impl Into<String>, action: JobAction) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            cron_expr: cron_expr.into(),
            action,
            enabled: true,
            last_run: None,
            next_run: None,
            description: None,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Apply a partial update; a changed schedule invalidates next_run
    pub fn merge(&mut self, update: JobUpdate) {
        if let Some(name) = update.name {
            self.name = name;
        }
        if let Some(cron_expr) = update.cron_expr {
            if cron_expr != self.cron_expr {
                self.next_run = None;
            }
            self.cron_expr = cron_expr;
        }
        if let Some(action) = update.action {
            self.action = action;
        }
        if let Some(enabled) = update.enabled {
            self.enabled = enabled;
            if !enabled {
                self.next_run = None;
            }
        }
        if let Some(description) = update.description {
            self.description = Some(description).filter(|d| !d.is_empty());
        }
    }
}

/// Partial job update
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron_expr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<JobAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Slot to scenario association
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapMapping {
    pub slot: u32,
    pub scenario_id: String,
    pub name: String,
}

impl MapMapping {
    /// Build a validated mapping; an empty name becomes "Map <slot>"
    pub fn new(slot: u32, scenario_id: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        if slot < 1 {
            return Err(Error::InvalidSlot("slot must be 1 or greater".to_string()));
        }
        let scenario_id = scenario_id.into();
        if scenario_id.trim().is_empty() {
            return Err(Error::config("scenario id is required"));
        }
        let mut name = name.into();
        if name.trim().is_empty() {
            name = format!("Map {}", slot);
        }
        Ok(Self {
            slot,
            scenario_id,
            name,
        })
    }
}

/// Scenario currently configured for an instance
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentMap {
    pub scenario_id: Option<String>,
    pub mapping: Option<MapMapping>,
}

/// Player row reported by the remote console
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInfo {
    pub index: u32,
    pub address: String,
    pub ping: u32,
    pub guid: String,
    pub verified: bool,
    pub name: String,
    #[serde(default)]
    pub in_lobby: bool,
}

/// Live metrics derived from console output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMetrics {
    pub player_count: u32,
    pub fps: Option<f64>,
}

/// Persisted metrics history point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub timestamp: DateTime<Utc>,
    pub cpu: f32,
    /// Resident memory in MB
    pub ram: u64,
    pub players: u32,
    pub fps: f64,
}

impl MetricPoint {
    pub fn is_online(&self) -> bool {
        self.cpu > 0.0 || self.ram > 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UptimeStats {
    pub uptime_percent: f64,
    pub total_points: usize,
    pub online_points: usize,
}

impl UptimeStats {
    pub fn from_points(points: &[MetricPoint]) -> Self {
        if points.is_empty() {
            return Self::default();
        }
        let online = points.iter().filter(|p| p.is_online()).count();
        Self {
            uptime_percent: online as f64 / points.len() as f64 * 100.0,
            total_points: points.len(),
            online_points: online,
        }
    }
}

/// Log line severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Entry in the shared log sink
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_merge() {
        let mut job = Job::new(
            "nightly",
            "0 0 4 * * *",
            JobAction::Restart {
                instance: "default".to_string(),
            },
        );
        job.next_run = Some(Utc::now());

        job.merge(JobUpdate {
            cron_expr: Some("0 30 4 * * *".to_string()),
            description: Some("later".to_string()),
            ..Default::default()
        });
        assert_eq!(job.cron_expr, "0 30 4 * * *");
        assert!(job.next_run.is_none());
        assert_eq!(job.description.as_deref(), Some("later"));
        assert!(job.enabled);

        job.merge(JobUpdate {
            enabled: Some(false),
            description: Some(String::new()),
            ..Default::default()
        });
        assert!(!job.enabled);
        assert!(job.description.is_none());
        assert_eq!(job.name, "nightly");
    }

    #[test]
    fn test_validate_instance_id() {
        assert!(validate_instance_id("default"));
        assert!(validate_instance_id("eu-west_2"));
        assert!(!validate_instance_id(""));
        assert!(!validate_instance_id("../etc"));
        assert!(!validate_instance_id("has space"));
    }

    #[test]
    fn test_instance_status_roundtrip() {
        assert_eq!("running".parse::<InstanceStatus>().unwrap(), InstanceStatus::Running);
        assert_eq!(InstanceStatus::Error.to_string(), "error");
        assert!("bogus".parse::<InstanceStatus>().is_err());
        assert!(InstanceStatus::Running.is_running());
        assert!(!InstanceStatus::Stopped.is_running());
    }

    #[test]
    fn test_instance_json_uses_camel_case() {
        let inst = Instance::new("alpha", "Alpha").with_config_path("/srv/alpha/server.json");
        let json = serde_json::to_string(&inst).unwrap();
        assert!(json.contains("\"configPath\""));
        assert!(json.contains("\"createdAt\""));
        assert!(!json.contains("lastStarted"));
    }

    #[test]
    fn test_instance_empty_paths_ignored() {
        let inst = Instance::new("a", "A").with_path("");
        assert!(inst.install_dir().is_none());
        assert!(inst.config_file().is_none());
    }

    #[test]
    fn test_instance_merge_is_partial() {
        let mut inst = Instance::new("a", "A").with_path("/srv/a");
        inst.merge(InstanceUpdate {
            name: Some("Renamed".to_string()),
            path: Some(PathBuf::new()),
            ..Default::default()
        });
        assert_eq!(inst.name, "Renamed");
        assert_eq!(inst.install_dir(), Some(Path::new("/srv/a")));
    }

    #[test]
    fn test_map_target_parse() {
        assert_eq!("3".parse::<MapTarget>().unwrap(), MapTarget::Slot(3));
        assert_eq!(
            "0".parse::<MapTarget>().unwrap(),
            MapTarget::Scenario("0".to_string())
        );
        assert_eq!(
            "{ECC61978EDCC2B5A}Missions/23_Campaign.conf".parse::<MapTarget>().unwrap(),
            MapTarget::Scenario("{ECC61978EDCC2B5A}Missions/23_Campaign.conf".to_string())
        );
        assert!("  ".parse::<MapTarget>().is_err());
    }

    #[test]
    fn test_job_json_shape() {
        let job = Job::new(
            "nightly map",
            "0 0 4 * * *",
            JobAction::ChangeMap {
                instance: "default".to_string(),
                target: MapTarget::Slot(2),
            },
        );
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["type"], "changemap");
        assert_eq!(value["instance"], "default");
        assert_eq!(value["target"], 2);
        assert_eq!(value["cronExpr"], "0 0 4 * * *");

        let back: Job = serde_json::from_value(value).unwrap();
        assert_eq!(back.action, job.action);
    }

    #[test]
    fn test_job_parses_literal_scenario_target() {
        let json = r#"{
            "id": "x",
            "name": "swap",
            "cronExpr": "*/5 * * * * *",
            "type": "changemap",
            "instance": "eu",
            "target": "{ABC}Missions/Conflict.conf",
            "enabled": true
        }"#;
        let job: Job = serde_json::from_str(json).unwrap();
        assert_eq!(
            job.action,
            JobAction::ChangeMap {
                instance: "eu".to_string(),
                target: MapTarget::Scenario("{ABC}Missions/Conflict.conf".to_string()),
            }
        );
        assert_eq!(job.action.kind(), "changemap");
        assert_eq!(job.action.instance(), "eu");
    }

    #[test]
    fn test_map_mapping_validation() {
        assert!(MapMapping::new(0, "x", "").is_err());
        assert!(MapMapping::new(1, "  ", "").is_err());
        let m = MapMapping::new(4, "{A}Missions/B.conf", "").unwrap();
        assert_eq!(m.name, "Map 4");
    }

    #[test]
    fn test_uptime_stats() {
        let now = Utc::now();
        let point = |cpu: f32, ram: u64| MetricPoint {
            timestamp: now,
            cpu,
            ram,
            players: 0,
            fps: 0.0,
        };
        let stats = UptimeStats::from_points(&[point(1.0, 0), point(0.0, 0), point(0.0, 512), point(0.0, 0)]);
        assert_eq!(stats.total_points, 4);
        assert_eq!(stats.online_points, 2);
        assert!((stats.uptime_percent - 50.0).abs() < f64::EPSILON);

        assert_eq!(UptimeStats::from_points(&[]), UptimeStats::default());
    }

    #[test]
    fn test_stop_outcome_display() {
        assert_eq!(StopOutcome::ForceKilled.to_string(), "force_killed");
        assert_eq!(StopOutcome::Graceful.as_str(), "graceful");
    }
}
