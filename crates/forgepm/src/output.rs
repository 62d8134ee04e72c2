//! Table and detail output

use chrono::{DateTime, Local, Utc};
use colored::Colorize;
use forgepm_core::{
    CrashEvent, CurrentMap, Instance, InstanceStatus, Job, JobAction, LogEntry, LogLevel,
    MapMapping, MetricPoint, PlayerInfo, ResourceSample, ServerMetrics, UptimeStats,
    WatchdogStatus,
};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use tabled::{
    settings::{object::Columns, Alignment, Modify, Style},
    Table, Tabled,
};

/// Global flag for JSON output mode
static JSON_MODE: AtomicBool = AtomicBool::new(false);

pub fn set_json_mode(enabled: bool) {
    JSON_MODE.store(enabled, Ordering::SeqCst);
}

pub fn is_json_mode() -> bool {
    JSON_MODE.load(Ordering::SeqCst)
}

/// Print `value` as JSON when JSON mode is on; returns whether it did
fn emit_json<T: Serialize + ?Sized>(value: &T) -> bool {
    if !is_json_mode() {
        return false;
    }
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing to JSON: {}", e),
    }
    true
}

fn print_table<R: Tabled>(rows: Vec<R>) {
    let table = Table::new(rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::single(0)).with(Alignment::right()))
        .to_string();
    println!("{}", table);
}

fn or_dash<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    or_dash(time.map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")))
}

fn format_status(status: InstanceStatus) -> String {
    match status {
        InstanceStatus::Running => "online".green().to_string(),
        InstanceStatus::Stopped => "stopped".red().to_string(),
        InstanceStatus::Error => "errored".red().bold().to_string(),
    }
}

/// Seconds since the last start of a running instance
fn uptime_secs(instance: &Instance) -> Option<u64> {
    if !instance.status.is_running() {
        return None;
    }
    instance
        .last_started
        .map(|t| (Utc::now() - t).num_seconds().max(0) as u64)
}

#[derive(Tabled)]
pub struct InstanceRow {
    #[tabled(rename = "id")]
    pub id: String,
    #[tabled(rename = "name")]
    pub name: String,
    #[tabled(rename = "status")]
    pub status: String,
    #[tabled(rename = "pid")]
    pub pid: String,
    #[tabled(rename = "uptime")]
    pub uptime: String,
    #[tabled(rename = "path")]
    pub path: String,
}

impl From<&Instance> for InstanceRow {
    fn from(instance: &Instance) -> Self {
        InstanceRow {
            id: instance.id.clone(),
            name: instance.name.clone(),
            status: format_status(instance.status),
            pid: or_dash(instance.pid),
            uptime: or_dash(uptime_secs(instance).map(format_duration)),
            path: or_dash(instance.path.as_ref().map(|p| p.display())),
        }
    }
}

pub fn print_instances(instances: &[Instance]) {
    if emit_json(instances) {
        return;
    }
    print_table(instances.iter().map(InstanceRow::from).collect());
}

pub fn print_instance_detail(instance: &Instance) {
    if emit_json(instance) {
        return;
    }

    println!("{}", "─".repeat(50));
    println!("  {} │ {}", "ID".bold(), instance.id);
    println!("  {} │ {}", "Name".bold(), instance.name);
    println!("  {} │ {}", "Status".bold(), format_status(instance.status));
    println!("  {} │ {}", "PID".bold(), or_dash(instance.pid));
    if let Some(secs) = uptime_secs(instance) {
        println!("  {} │ {}", "Uptime".bold(), format_duration(secs));
    }
    println!("{}", "─".repeat(50));
    println!(
        "  {} │ {}",
        "Path".bold(),
        or_dash(instance.path.as_ref().map(|p| p.display()))
    );
    println!(
        "  {} │ {}",
        "Config".bold(),
        or_dash(instance.config_path.as_ref().map(|p| p.display()))
    );
    println!("  {} │ {}", "Created".bold(), format_time(Some(instance.created_at)));
    println!("  {} │ {}", "Last Start".bold(), format_time(instance.last_started));
    for (key, value) in &instance.settings {
        println!("  {} │ {}", key.bold(), value);
    }
    println!("{}", "─".repeat(50));
}

#[derive(Tabled)]
struct PlayerRow {
    #[tabled(rename = "#")]
    index: u32,
    #[tabled(rename = "name")]
    name: String,
    #[tabled(rename = "ping")]
    ping: u32,
    #[tabled(rename = "identity")]
    guid: String,
    #[tabled(rename = "verified")]
    verified: String,
}

pub fn print_players(players: &[PlayerInfo]) {
    if emit_json(players) {
        return;
    }
    if players.is_empty() {
        println!("No players connected");
        return;
    }
    let rows = players
        .iter()
        .map(|p| PlayerRow {
            index: p.index,
            name: if p.in_lobby {
                format!("{} (lobby)", p.name)
            } else {
                p.name.clone()
            },
            ping: p.ping,
            guid: p.guid.clone(),
            verified: if p.verified { "yes".into() } else { "no".into() },
        })
        .collect();
    print_table(rows);
}

/// One-line description of what a job does
pub fn describe_action(action: &JobAction) -> String {
    match action {
        JobAction::ChangeMap { instance, target } => {
            format!("changemap {} → {}", instance, target)
        }
        other => format!("{} {}", other.kind(), other.instance()),
    }
}

#[derive(Tabled)]
struct JobRow {
    #[tabled(rename = "id")]
    id: String,
    #[tabled(rename = "name")]
    name: String,
    #[tabled(rename = "cron")]
    cron: String,
    #[tabled(rename = "action")]
    action: String,
    #[tabled(rename = "enabled")]
    enabled: String,
    #[tabled(rename = "last run")]
    last_run: String,
    #[tabled(rename = "next run")]
    next_run: String,
}

pub fn print_jobs(jobs: &[Job]) {
    if emit_json(jobs) {
        return;
    }
    if jobs.is_empty() {
        println!("No scheduled jobs");
        return;
    }
    let rows = jobs
        .iter()
        .map(|job| JobRow {
            id: job.id.chars().take(8).collect(),
            name: job.name.clone(),
            cron: job.cron_expr.clone(),
            action: describe_action(&job.action),
            enabled: if job.enabled {
                "yes".green().to_string()
            } else {
                "no".red().to_string()
            },
            last_run: format_time(job.last_run),
            next_run: format_time(job.next_run),
        })
        .collect();
    print_table(rows);
}

pub fn print_job(job: &Job) {
    if emit_json(job) {
        return;
    }
    print_success(&format!(
        "Job '{}' ({}) {} - next run {}",
        job.name,
        job.id,
        describe_action(&job.action),
        format_time(job.next_run)
    ));
}

#[derive(Tabled)]
struct MapRow {
    #[tabled(rename = "slot")]
    slot: u32,
    #[tabled(rename = "name")]
    name: String,
    #[tabled(rename = "scenario")]
    scenario: String,
}

pub fn print_maps(mappings: &[MapMapping]) {
    if emit_json(mappings) {
        return;
    }
    if mappings.is_empty() {
        println!("No map slots configured");
        return;
    }
    let rows = mappings
        .iter()
        .map(|m| MapRow {
            slot: m.slot,
            name: m.name.clone(),
            scenario: m.scenario_id.clone(),
        })
        .collect();
    print_table(rows);
}

pub fn print_current_map(current: &CurrentMap) {
    if emit_json(current) {
        return;
    }
    match (&current.scenario_id, &current.mapping) {
        (Some(scenario), Some(mapping)) => println!(
            "{} (slot {}, {})",
            mapping.name.bold(),
            mapping.slot,
            scenario
        ),
        (Some(scenario), None) => println!("{} (no slot)", scenario),
        (None, _) => println!("No scenario configured"),
    }
}

#[derive(Tabled)]
struct CrashRow {
    #[tabled(rename = "time")]
    time: String,
    #[tabled(rename = "instance")]
    instance: String,
    #[tabled(rename = "reason")]
    reason: String,
}

pub fn print_crashes(events: &[CrashEvent]) {
    if emit_json(events) {
        return;
    }
    if events.is_empty() {
        println!("No crashes recorded");
        return;
    }
    let rows = events
        .iter()
        .map(|e| CrashRow {
            time: format_time(Some(e.timestamp)),
            instance: e.instance_id.clone(),
            reason: e.reason.clone(),
        })
        .collect();
    print_table(rows);
}

pub fn print_watchdog(status: &WatchdogStatus) {
    if emit_json(status) {
        return;
    }
    let state = if status.enabled {
        "enabled".green()
    } else {
        "disabled".red()
    };
    println!("Watchdog: {}", state);
    for watched in &status.watched {
        let mut line = format!(
            "  {} - {} restarts, last {}",
            watched.instance_id,
            watched.restart_count,
            format_time(watched.last_restart)
        );
        if watched.suspended {
            line.push_str(&format!(" {}", "(suspended)".yellow()));
        }
        println!("{}", line);
    }
}

pub fn print_log_entries(entries: &[LogEntry]) {
    if emit_json(entries) {
        return;
    }
    for entry in entries {
        let level = match entry.level {
            LogLevel::Info => "INFO ".blue(),
            LogLevel::Warn => "WARN ".yellow(),
            LogLevel::Error => "ERROR".red(),
        };
        let scope = entry
            .instance
            .as_deref()
            .map(|i| format!("[{}] ", i))
            .unwrap_or_default();
        println!(
            "{} {} {}{}",
            format_time(Some(entry.timestamp)).dimmed(),
            level,
            scope,
            entry.message
        );
    }
}

pub fn print_logs(lines: &[String]) {
    if emit_json(lines) {
        return;
    }
    for line in lines {
        println!("{}", line);
    }
}

/// Live figures of one instance
#[derive(Serialize)]
pub struct LiveStats<'a> {
    pub metrics: Option<&'a ServerMetrics>,
    pub samples: &'a [ResourceSample],
    pub uptime: &'a UptimeStats,
}

pub fn print_stats(stats: &LiveStats<'_>) {
    if emit_json(stats) {
        return;
    }

    println!("{}", "─".repeat(50));
    match stats.samples.last() {
        Some(sample) => {
            println!("  {} │ {:.1}%", "CPU".bold(), sample.cpu);
            println!("  {} │ {}", "Memory".bold(), format_mb(sample.memory_mb));
            let peak = stats
                .samples
                .iter()
                .map(|s| s.memory_mb)
                .fold(0.0_f64, f64::max);
            println!("  {} │ {}", "Peak Memory".bold(), format_mb(peak));
        }
        None => println!("  {} │ not running", "Process".bold()),
    }
    if let Some(metrics) = stats.metrics {
        println!("  {} │ {}", "Players".bold(), metrics.player_count);
        println!(
            "  {} │ {}",
            "FPS".bold(),
            or_dash(metrics.fps.map(|f| format!("{:.1}", f)))
        );
    }
    println!(
        "  {} │ {:.1}% ({} of {} samples today)",
        "Uptime".bold(),
        stats.uptime.uptime_percent,
        stats.uptime.online_points,
        stats.uptime.total_points
    );
    println!("{}", "─".repeat(50));
}

#[derive(Tabled)]
struct MetricRow {
    #[tabled(rename = "time")]
    time: String,
    #[tabled(rename = "cpu")]
    cpu: String,
    #[tabled(rename = "ram")]
    ram: String,
    #[tabled(rename = "players")]
    players: u32,
    #[tabled(rename = "fps")]
    fps: String,
}

pub fn print_metric_points(points: &[MetricPoint]) {
    if emit_json(points) {
        return;
    }
    if points.is_empty() {
        println!("No metrics recorded for that day");
        return;
    }
    let rows = points
        .iter()
        .map(|p| MetricRow {
            time: format_time(Some(p.timestamp)),
            cpu: format!("{:.1}%", p.cpu),
            ram: format_mb(p.ram as f64),
            players: p.players,
            fps: format!("{:.1}", p.fps),
        })
        .collect();
    print_table(rows);
}

pub fn format_mb(mb: f64) -> String {
    if mb >= 1024.0 {
        format!("{:.1}G", mb / 1024.0)
    } else {
        format!("{:.0}M", mb)
    }
}

pub fn format_duration(secs: u64) -> String {
    if secs >= 86400 {
        let days = secs / 86400;
        let hours = (secs % 86400) / 3600;
        format!("{}d {}h", days, hours)
    } else if secs >= 3600 {
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        format!("{}h {}m", hours, mins)
    } else if secs >= 60 {
        let mins = secs / 60;
        let s = secs % 60;
        format!("{}m {}s", mins, s)
    } else {
        format!("{}s", secs)
    }
}

pub fn print_success(message: &str) {
    println!("{} {}", "✓".green(), message);
}

pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red(), message);
}

pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue(), message);
}
