//! Instance event types for notifications

use serde::{Deserialize, Serialize};

/// How loud a notification is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

impl Severity {
    /// Embed colour
    pub fn color(&self) -> u32 {
        match self {
            Severity::Info => 0x0000FF,
            Severity::Success => 0x00FF00,
            Severity::Warning => 0xFFFF00,
            Severity::Error => 0xFF0000,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Success => "success",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

/// Events that can trigger notifications
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InstanceEvent {
    Started { instance: String, name: String },

    Stopped {
        instance: String,
        name: String,
        forced: bool,
    },

    StartFailed {
        instance: String,
        name: String,
        error: String,
    },

    /// Liveness check found the process gone
    CrashDetected { instance: String, reason: String },

    AutoRestarted { instance: String, restart_count: u32 },

    AutoRestartFailed { instance: String, error: String },

    /// Restart budget exhausted inside the cooldown window
    WatchdogSuspended { instance: String, restarts: u32 },

    JobSucceeded {
        job: String,
        action: String,
        instance: String,
    },

    JobFailed {
        job: String,
        instance: String,
        error: String,
    },

    MapChanged {
        instance: String,
        from: Option<String>,
        to: String,
        map_name: String,
        requester: String,
    },

    MapChangeFailed {
        instance: String,
        requester: String,
        error: String,
    },

    /// Config was rewritten but the server did not come back
    MapChangeIncomplete {
        instance: String,
        to: String,
        requester: String,
        error: String,
    },

    PlayerJoined { instance: String, player: String },

    PlayerLeft { instance: String, player: String },
}

impl InstanceEvent {
    /// Event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            InstanceEvent::Started { .. } => "start",
            InstanceEvent::Stopped { .. } => "stop",
            InstanceEvent::StartFailed { .. } => "start_failed",
            InstanceEvent::CrashDetected { .. } => "crash",
            InstanceEvent::AutoRestarted { .. } => "restart",
            InstanceEvent::AutoRestartFailed { .. } => "restart_failed",
            InstanceEvent::WatchdogSuspended { .. } => "watchdog_suspended",
            InstanceEvent::JobSucceeded { .. } => "job",
            InstanceEvent::JobFailed { .. } => "job_failed",
            InstanceEvent::MapChanged { .. } => "map_change",
            InstanceEvent::MapChangeFailed { .. } | InstanceEvent::MapChangeIncomplete { .. } => {
                "map_change_failed"
            }
            InstanceEvent::PlayerJoined { .. } => "player_join",
            InstanceEvent::PlayerLeft { .. } => "player_leave",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            InstanceEvent::Started { .. }
            | InstanceEvent::AutoRestarted { .. }
            | InstanceEvent::JobSucceeded { .. }
            | InstanceEvent::MapChanged { .. }
            | InstanceEvent::PlayerJoined { .. } => Severity::Success,
            InstanceEvent::Stopped { .. }
            | InstanceEvent::CrashDetected { .. }
            | InstanceEvent::MapChangeIncomplete { .. } => Severity::Warning,
            InstanceEvent::StartFailed { .. }
            | InstanceEvent::AutoRestartFailed { .. }
            | InstanceEvent::WatchdogSuspended { .. }
            | InstanceEvent::JobFailed { .. }
            | InstanceEvent::MapChangeFailed { .. }
            | InstanceEvent::PlayerLeft { .. } => Severity::Error,
        }
    }

    /// Short headline with emoji
    pub fn title(&self) -> &'static str {
        match self {
            InstanceEvent::Started { .. } => "\u{2705} Server Started",
            InstanceEvent::Stopped { .. } => "\u{1F6D1} Server Stopped",
            InstanceEvent::StartFailed { .. } => "\u{274C} Start Failed",
            InstanceEvent::CrashDetected { .. } => "\u{26A0}\u{FE0F} Crash Detected",
            InstanceEvent::AutoRestarted { .. } => "\u{1F504} Auto-Restarted",
            InstanceEvent::AutoRestartFailed { .. } => "\u{274C} Auto-Restart Failed",
            InstanceEvent::WatchdogSuspended { .. } => "\u{1F6A8} Watchdog Suspended",
            InstanceEvent::JobSucceeded { .. } => "\u{1F4C5} Scheduled Job",
            InstanceEvent::JobFailed { .. } => "\u{274C} Scheduled Job Failed",
            InstanceEvent::MapChanged { .. } => "\u{1F5FA}\u{FE0F} Map Changed",
            InstanceEvent::MapChangeFailed { .. } => "\u{274C} Map Change Failed",
            InstanceEvent::MapChangeIncomplete { .. } => "\u{26A0}\u{FE0F} Map Change Incomplete",
            InstanceEvent::PlayerJoined { .. } => "\u{2795} Player Joined",
            InstanceEvent::PlayerLeft { .. } => "\u{2796} Player Left",
        }
    }

    /// Human-readable body
    pub fn format_message(&self) -> String {
        match self {
            InstanceEvent::Started { name, .. } => format!("Server **{}** is now online.", name),
            InstanceEvent::Stopped { name, forced, .. } => {
                if *forced {
                    format!("Server **{}** did not exit in time and was killed.", name)
                } else {
                    format!("Server **{}** has been stopped.", name)
                }
            }
            InstanceEvent::StartFailed { name, error, .. } => {
                format!("Failed to start server **{}**: {}", name, error)
            }
            InstanceEvent::CrashDetected { instance, reason } => {
                format!("Server `{}` stopped unexpectedly ({}). Restarting...", instance, reason)
            }
            InstanceEvent::AutoRestarted {
                instance,
                restart_count,
            } => {
                let ordinal = match restart_count {
                    1 => "1st".to_string(),
                    2 => "2nd".to_string(),
                    3 => "3rd".to_string(),
                    n => format!("{}th", n),
                };
                format!("Server `{}` is back online ({} restart).", instance, ordinal)
            }
            InstanceEvent::AutoRestartFailed { instance, error } => {
                format!("Server `{}` could not be restarted: {}", instance, error)
            }
            InstanceEvent::WatchdogSuspended { instance, restarts } => format!(
                "Server `{}` crashed again after {} restarts. Automatic restarts are paused; manual action required.",
                instance, restarts
            ),
            InstanceEvent::JobSucceeded {
                job,
                action,
                instance,
            } => format!("Job **{}** ({} on `{}`) completed.", job, action, instance),
            InstanceEvent::JobFailed {
                job,
                instance,
                error,
            } => format!("Job **{}** on `{}` failed:\n```{}```", job, instance, error),
            InstanceEvent::MapChanged {
                instance,
                from,
                to,
                map_name,
                requester,
            } => format!(
                "**{}** switched `{}` to **{}**\n`{}` -> `{}`",
                requester,
                instance,
                map_name,
                from.as_deref().unwrap_or("unknown"),
                to
            ),
            InstanceEvent::MapChangeFailed {
                instance,
                requester,
                error,
            } => format!(
                "Map change on `{}` requested by **{}** failed: {}",
                instance, requester, error
            ),
            InstanceEvent::MapChangeIncomplete {
                instance,
                to,
                requester,
                error,
            } => format!(
                "Config of `{}` now points at `{}` (requested by **{}**), but the server did not restart: {}",
                instance, to, requester, error
            ),
            InstanceEvent::PlayerJoined { instance, player } => {
                format!("**{}** joined server `{}`.", player, instance)
            }
            InstanceEvent::PlayerLeft { instance, player } => {
                format!("**{}** left server `{}`.", player, instance)
            }
        }
    }

    /// Instance the event is about
    pub fn instance(&self) -> &str {
        match self {
            InstanceEvent::Started { instance, .. }
            | InstanceEvent::Stopped { instance, .. }
            | InstanceEvent::StartFailed { instance, .. }
            | InstanceEvent::CrashDetected { instance, .. }
            | InstanceEvent::AutoRestarted { instance, .. }
            | InstanceEvent::AutoRestartFailed { instance, .. }
            | InstanceEvent::WatchdogSuspended { instance, .. }
            | InstanceEvent::JobSucceeded { instance, .. }
            | InstanceEvent::JobFailed { instance, .. }
            | InstanceEvent::MapChanged { instance, .. }
            | InstanceEvent::MapChangeFailed { instance, .. }
            | InstanceEvent::MapChangeIncomplete { instance, .. }
            | InstanceEvent::PlayerJoined { instance, .. }
            | InstanceEvent::PlayerLeft { instance, .. } => instance,
        }
    }
}

/// Every value accepted in the `events` filter
pub const EVENT_TYPES: &[&str] = &[
    "start",
    "stop",
    "start_failed",
    "crash",
    "restart",
    "restart_failed",
    "watchdog_suspended",
    "job",
    "job_failed",
    "map_change",
    "map_change_failed",
    "player_join",
    "player_leave",
];
