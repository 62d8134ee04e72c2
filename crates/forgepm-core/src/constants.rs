//! Constants and default values for ForgePM

use std::path::PathBuf;
use std::time::Duration;

/// Default ForgePM home directory name
pub const FORGEPM_DIR: &str = ".forgepm";

/// Environment variable overriding the data directory
pub const HOME_ENV: &str = "FORGEPM_HOME";

/// Default socket file name
pub const SOCKET_FILE: &str = "daemon.sock";

pub const INSTANCES_FILE: &str = "servers.json";
pub const JOBS_FILE: &str = "jobs.json";
pub const CRASHES_FILE: &str = "crashes.json";
pub const MAPPINGS_FILE: &str = "map_mappings.json";
pub const SETTINGS_FILE: &str = "settings.json";
pub const NOTIFY_FILE: &str = "notify.toml";

pub const LOGS_DIR: &str = "logs";
pub const METRICS_DIR: &str = "metrics";
pub const PROFILE_DIR: &str = "profile";
pub const ADDONS_DIR: &str = "addons";

/// Reserved instance that always exists
pub const DEFAULT_INSTANCE_ID: &str = "default";
pub const DEFAULT_INSTANCE_NAME: &str = "Default Server";

/// Dedicated server executable looked up inside an instance directory
pub const SERVER_EXECUTABLE: &str = "ArmaReforgerServer.exe";

/// Config file used when an instance has none of its own
pub const DEFAULT_CONFIG_FILE: &str = "server.json";

/// Headless flag; always present in resolved launch arguments
pub const HEADLESS_FLAG: &str = "-server";
pub const CONFIG_FLAG: &str = "-config";
pub const PROFILE_FLAG: &str = "-profile";
pub const ADDONS_FLAG: &str = "-addonDownloadDir";

/// Graceful stop budget before escalating to SIGKILL
pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Liveness poll interval while waiting for a graceful stop
pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Resource sampling interval
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(2);

/// Resource samples kept per instance
pub const RESOURCE_HISTORY_LEN: usize = 100;

/// Watchdog poll tick
pub const WATCHDOG_INTERVAL: Duration = Duration::from_secs(10);

/// Restart counter resets after this much quiet time
pub const WATCHDOG_COOLDOWN: Duration = Duration::from_secs(5 * 60);

/// Auto-restarts allowed inside one cooldown window
pub const WATCHDOG_MAX_RESTARTS: u32 = 3;

/// Crash events kept in the audit log
pub const CRASH_LOG_LIMIT: usize = 50;

/// Default remote-console deadline per call
pub const RCON_TIMEOUT: Duration = Duration::from_secs(5);

/// Settle time between stop and start of a map change
pub const MAP_CHANGE_SETTLE: Duration = Duration::from_secs(2);

/// Pause between stop and start of a scheduled restart
pub const RESTART_PAUSE: Duration = Duration::from_secs(3);

/// Player monitor poll interval
pub const PLAYER_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// How often forwarded console output is checked for chat commands
pub const CHAT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Metrics history write interval
pub const METRICS_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Capacity of the in-memory log sink
pub const LOG_BUFFER_CAPACITY: usize = 1000;

/// Default log max size in bytes (10MB)
pub const DEFAULT_LOG_MAX_SIZE: u64 = 10 * 1024 * 1024;

/// Default max log files to keep
pub const DEFAULT_LOG_MAX_FILES: usize = 5;

/// Get the ForgePM home directory
pub fn forgepm_home() -> PathBuf {
    if let Some(dir) = std::env::var_os(HOME_ENV) {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .map(|h| h.join(FORGEPM_DIR))
        .unwrap_or_else(|| PathBuf::from(FORGEPM_DIR))
}

/// Get the socket path
pub fn socket_path() -> PathBuf {
    forgepm_home().join(SOCKET_FILE)
}

/// Console log file for an instance
pub fn console_log_path(logs_dir: &std::path::Path, instance_id: &str) -> PathBuf {
    logs_dir.join(format!("{}.log", instance_id))
}
