//! IPC Protocol - Request/Response types

use chrono::NaiveDate;
use forgepm_core::{
    CrashEvent, CurrentMap, Error, Instance, InstanceUpdate, Job, JobAction, JobUpdate, LogEntry,
    MapMapping, MapTarget, MetricPoint, PlayerInfo, ResourceSample, ServerMetrics, StopOutcome,
    UptimeStats, WatchdogStatus,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// IPC Request from CLI to daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Check if daemon is alive
    Ping,

    /// Stop the daemon; running servers keep running
    Shutdown,

    ListInstances,

    GetInstance { id: String },

    CreateInstance {
        id: String,
        name: String,
        path: Option<PathBuf>,
        config_path: Option<PathBuf>,
    },

    UpdateInstance { id: String, update: InstanceUpdate },

    DeleteInstance { id: String },

    Start {
        id: String,
        #[serde(default)]
        args: Vec<String>,
    },

    Stop { id: String },

    /// Stop, pause, start with default arguments
    Restart { id: String },

    SendCommand { id: String, command: String },

    GetPlayers { id: String },

    KickPlayer {
        id: String,
        index: u32,
        reason: Option<String>,
    },

    BanPlayer {
        id: String,
        identifier: String,
        reason: Option<String>,
    },

    ServerMetrics { id: String },

    ResourceHistory { id: String },

    /// Persisted metric points for one day (today when absent)
    MetricsHistory { id: String, date: Option<NaiveDate> },

    Uptime { id: String },

    /// Tail of the shared log sink or of an instance's console file
    Logs {
        instance: Option<String>,
        lines: usize,
        #[serde(default)]
        console: bool,
    },

    Crashes { limit: Option<usize> },

    WatchdogStatus,

    SetWatchdog { enabled: bool },

    ListJobs,

    AddJob {
        name: String,
        cron_expr: String,
        action: JobAction,
        enabled: bool,
        description: Option<String>,
    },

    UpdateJob { id: String, update: JobUpdate },

    DeleteJob { id: String },

    RunJob { id: String },

    ListMaps,

    AddMap {
        slot: u32,
        scenario_id: String,
        name: Option<String>,
    },

    RemoveMap { slot: u32 },

    ApplyMap {
        id: String,
        target: MapTarget,
        requester: Option<String>,
    },

    CurrentMap { id: String },
}

/// IPC Response from daemon to CLI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Pong,

    Ok { message: String },

    /// `code` is the HTTP-style status of the failure
    Error { message: String, code: u16 },

    Instances { instances: Vec<Instance> },

    Instance { instance: Instance },

    Started { id: String, pid: u32 },

    Stopped { id: String, outcome: StopOutcome },

    CommandOutput { output: String },

    Players { players: Vec<PlayerInfo> },

    Metrics { metrics: ServerMetrics },

    ResourceHistory { samples: Vec<ResourceSample> },

    MetricsHistory { points: Vec<MetricPoint> },

    Uptime { stats: UptimeStats },

    LogEntries { entries: Vec<LogEntry> },

    LogLines { lines: Vec<String> },

    Crashes { events: Vec<CrashEvent> },

    Watchdog { status: WatchdogStatus },

    Jobs { jobs: Vec<Job> },

    Job { job: Job },

    Maps { mappings: Vec<MapMapping> },

    Map { mapping: MapMapping },

    MapChanged {
        id: String,
        from: Option<String>,
        to: String,
    },

    CurrentMap { current: CurrentMap },
}

impl Response {
    pub fn ok<S: Into<String>>(message: S) -> Self {
        Response::Ok {
            message: message.into(),
        }
    }

    pub fn error<S: Into<String>>(message: S) -> Self {
        Response::Error {
            message: message.into(),
            code: 500,
        }
    }

    /// Rejection of a request the daemon could not decode
    pub fn bad_request<S: Into<String>>(message: S) -> Self {
        Response::Error {
            message: message.into(),
            code: 400,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error { .. })
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Response::Error { message, .. } => Some(message),
            _ => None,
        }
    }
}

impl From<&Error> for Response {
    fn from(err: &Error) -> Self {
        Response::Error {
            message: err.to_string(),
            code: err.status_code(),
        }
    }
}

impl From<Error> for Response {
    fn from(err: Error) -> Self {
        Response::from(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialize() {
        let req = Request::Start {
            id: "eu".to_string(),
            args: vec!["-server".to_string()],
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"type\":\"start\""));
        assert!(json.contains("eu"));
    }

    #[test]
    fn test_start_args_default_to_empty() {
        let parsed: Request = serde_json::from_str(r#"{"type":"start","id":"default"}"#).unwrap();
        match parsed {
            Request::Start { id, args } => {
                assert_eq!(id, "default");
                assert!(args.is_empty());
            }
            _ => panic!("Wrong request type"),
        }
    }

    #[test]
    fn test_apply_map_target_shapes() {
        let slot: Request = serde_json::from_str(
            r#"{"type":"apply_map","id":"default","target":2,"requester":null}"#,
        )
        .unwrap();
        assert!(matches!(
            slot,
            Request::ApplyMap {
                target: MapTarget::Slot(2),
                ..
            }
        ));

        let scenario: Request = serde_json::from_str(
            r#"{"type":"apply_map","id":"default","target":"{ABC}Missions/x.conf","requester":"ops"}"#,
        )
        .unwrap();
        match scenario {
            Request::ApplyMap {
                target: MapTarget::Scenario(s),
                requester,
                ..
            } => {
                assert_eq!(s, "{ABC}Missions/x.conf");
                assert_eq!(requester.as_deref(), Some("ops"));
            }
            _ => panic!("Wrong request type"),
        }
    }

    #[test]
    fn test_add_job_round_trips_action() {
        let req = Request::AddJob {
            name: "nightly".to_string(),
            cron_expr: "0 0 4 * * *".to_string(),
            action: JobAction::ChangeMap {
                instance: "default".to_string(),
                target: MapTarget::Slot(1),
            },
            enabled: true,
            description: None,
        };
        let json = serde_json::to_string(&req).unwrap();
        let parsed: Request = serde_json::from_str(&json).unwrap();
        match parsed {
            Request::AddJob { action, .. } => assert_eq!(action.kind(), "changemap"),
            _ => panic!("Wrong request type"),
        }
    }

    #[test]
    fn test_error_response_carries_status() {
        let resp = Response::from(Error::InstanceNotFound("ghost".to_string()));
        assert!(resp.is_error());
        match resp {
            Response::Error { message, code } => {
                assert_eq!(code, 404);
                assert!(message.contains("ghost"));
            }
            _ => panic!("Wrong response type"),
        }

        let resp = Response::from(Error::AlreadyRunning { pid: 42 });
        assert!(matches!(resp, Response::Error { code: 409, .. }));
    }

    #[test]
    fn test_response_serialize() {
        let resp = Response::ok("Server started");
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"type\":\"ok\""));
        assert_eq!(resp.error_message(), None);
    }
}
