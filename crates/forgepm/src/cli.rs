//! CLI argument definitions

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use forgepm_core::{MapTarget, DEFAULT_INSTANCE_ID};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "forgepm")]
#[command(version, about = "Supervisor and control plane for dedicated game servers")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Output in JSON format instead of tables
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List server instances
    #[command(alias = "status")]
    Ls,

    /// Show details of one instance
    Show {
        #[arg(default_value = DEFAULT_INSTANCE_ID)]
        id: String,
    },

    /// Register a new server instance
    Create(CreateArgs),

    /// Change an instance's name, paths or settings
    Update(UpdateArgs),

    /// Remove an instance, stopping it first
    #[command(alias = "delete")]
    Rm { id: String },

    /// Start a server
    Start {
        #[arg(default_value = DEFAULT_INSTANCE_ID)]
        id: String,

        /// Extra server arguments
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Stop a server (terminate, then kill after the grace period)
    Stop {
        #[arg(default_value = DEFAULT_INSTANCE_ID)]
        id: String,
    },

    /// Stop and start a server
    Restart {
        #[arg(default_value = DEFAULT_INSTANCE_ID)]
        id: String,
    },

    /// Send a command to the server's remote console
    Rcon {
        /// Instance id
        #[arg(short, long, default_value = DEFAULT_INSTANCE_ID)]
        instance: String,

        /// Command words, e.g. `#status`
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// List connected players
    Players {
        #[arg(default_value = DEFAULT_INSTANCE_ID)]
        id: String,
    },

    /// Kick a player by their list index
    Kick {
        index: u32,

        #[arg(short, long, default_value = DEFAULT_INSTANCE_ID)]
        instance: String,

        #[arg(short, long)]
        reason: Option<String>,
    },

    /// Ban a player by identity
    Ban {
        identifier: String,

        #[arg(short, long, default_value = DEFAULT_INSTANCE_ID)]
        instance: String,

        #[arg(short, long)]
        reason: Option<String>,
    },

    /// View daemon or server console logs
    Logs(LogsArgs),

    /// Show recent crashes detected by the watchdog
    Crashes {
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Show or toggle the crash watchdog
    Watchdog {
        #[arg(value_enum)]
        action: Option<WatchdogAction>,
    },

    /// Manage scheduled jobs
    Jobs(JobsArgs),

    /// Manage map slots and change maps
    Maps(MapsArgs),

    /// Resource usage, console metrics and uptime
    Stats(StatsArgs),

    /// Configure notifications (Discord webhook)
    Notify(NotifyArgs),

    /// Check daemon health
    Ping,

    /// Stop the daemon; running servers keep running
    Kill,
}

#[derive(Args)]
pub struct CreateArgs {
    /// Instance id (letters, digits, `-` and `_`)
    pub id: String,

    /// Display name
    #[arg(short, long)]
    pub name: Option<String>,

    /// Server install directory
    #[arg(long)]
    pub path: Option<PathBuf>,

    /// Server config file, relative paths resolve against the install directory
    #[arg(long = "config")]
    pub config_path: Option<PathBuf>,
}

#[derive(Args)]
pub struct UpdateArgs {
    pub id: String,

    #[arg(short, long)]
    pub name: Option<String>,

    #[arg(long)]
    pub path: Option<PathBuf>,

    #[arg(long = "config")]
    pub config_path: Option<PathBuf>,

    /// Instance setting (KEY=VALUE, repeatable); replaces all settings
    #[arg(long = "set", value_parser = parse_key_value)]
    pub settings: Vec<(String, String)>,
}

#[derive(Args)]
pub struct LogsArgs {
    /// Only entries of this instance
    pub instance: Option<String>,

    /// Number of lines to show
    #[arg(long, default_value = "50")]
    pub lines: usize,

    /// Read the server's console file instead of the daemon log
    #[arg(long)]
    pub console: bool,

    /// Filter log lines by regex pattern
    #[arg(long)]
    pub grep: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum WatchdogAction {
    On,
    Off,
    Status,
}

#[derive(Args)]
pub struct JobsArgs {
    #[command(subcommand)]
    pub command: Option<JobsCommand>,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ActionKind {
    Restart,
    Start,
    Stop,
    Changemap,
}

#[derive(Subcommand)]
pub enum JobsCommand {
    /// List jobs
    Ls,

    /// Add a job
    Add(AddJobArgs),

    /// Change a job
    Update(UpdateJobArgs),

    /// Delete a job
    Rm { id: String },

    /// Run a job now
    Run { id: String },
}

#[derive(Args)]
pub struct AddJobArgs {
    pub name: String,

    /// Six-field cron expression with seconds, e.g. "0 0 4 * * *"
    #[arg(long)]
    pub cron: String,

    #[arg(long, value_enum)]
    pub action: ActionKind,

    #[arg(short, long, default_value = DEFAULT_INSTANCE_ID)]
    pub instance: String,

    /// Map slot or scenario id for changemap jobs
    #[arg(long)]
    pub map: Option<MapTarget>,

    /// Create the job disabled
    #[arg(long)]
    pub disabled: bool,

    #[arg(long)]
    pub description: Option<String>,
}

#[derive(Args)]
pub struct UpdateJobArgs {
    pub id: String,

    #[arg(long)]
    pub name: Option<String>,

    #[arg(long)]
    pub cron: Option<String>,

    #[arg(long, conflicts_with = "disable")]
    pub enable: bool,

    #[arg(long)]
    pub disable: bool,

    #[arg(long)]
    pub description: Option<String>,
}

#[derive(Args)]
pub struct MapsArgs {
    #[command(subcommand)]
    pub command: Option<MapsCommand>,
}

#[derive(Subcommand)]
pub enum MapsCommand {
    /// List map slots
    Ls,

    /// Map a slot number to a scenario
    Add {
        slot: u32,
        scenario_id: String,
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Remove a map slot
    Rm { slot: u32 },

    /// Rewrite the scenario and restart the server
    Apply {
        /// Slot number or literal scenario id
        target: MapTarget,

        #[arg(short, long, default_value = DEFAULT_INSTANCE_ID)]
        instance: String,
    },

    /// Show the configured scenario
    Current {
        #[arg(default_value = DEFAULT_INSTANCE_ID)]
        id: String,
    },
}

#[derive(Args)]
pub struct StatsArgs {
    #[arg(default_value = DEFAULT_INSTANCE_ID)]
    pub id: String,

    /// Recorded metric points instead of live figures
    #[arg(long)]
    pub history: bool,

    /// Day to read (YYYY-MM-DD), today by default
    #[arg(long, requires = "history")]
    pub date: Option<NaiveDate>,
}

#[derive(Args)]
pub struct NotifyArgs {
    #[command(subcommand)]
    pub command: NotifyCommand,
}

#[derive(Subcommand)]
pub enum NotifyCommand {
    /// Configure a Discord webhook
    Discord {
        #[arg(long)]
        webhook: String,

        /// Name shown as the message author
        #[arg(long)]
        username: Option<String>,
    },

    /// Remove notification configuration
    Remove {
        /// Channel to remove (e.g., "discord")
        channel: String,
    },

    /// Set which events to notify on
    Events {
        /// Comma-separated event types, empty for all
        #[arg(long)]
        set: String,
    },

    /// Show current notification configuration
    Status,

    /// Send a test message
    Test,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let pos = s.find('=').ok_or("Expected KEY=VALUE format")?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}
