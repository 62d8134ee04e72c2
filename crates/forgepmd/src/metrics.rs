//! Metrics history - one JSON file per instance and day

use chrono::{NaiveDate, Utc};
use forgepm_core::{JsonStore, MetricPoint, Result, UptimeStats};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::registry::InstanceRegistry;

pub struct MetricsRecorder {
    store: JsonStore,
    registry: Arc<InstanceRegistry>,
    /// Serialises read-modify-write of the day files
    write_lock: Mutex<()>,
}

fn file_name(instance_id: &str, date: NaiveDate) -> String {
    format!("{}_{}.json", instance_id, date.format("%Y-%m-%d"))
}

impl MetricsRecorder {
    pub fn new(dir: impl Into<PathBuf>, registry: Arc<InstanceRegistry>) -> Self {
        Self {
            store: JsonStore::new(dir),
            registry,
            write_lock: Mutex::new(()),
        }
    }

    pub fn append(&self, instance_id: &str, point: MetricPoint) -> Result<()> {
        let name = file_name(instance_id, point.timestamp.date_naive());
        let _guard = self.write_lock.lock();
        let mut points: Vec<MetricPoint> = self.store.load_or_default(&name)?;
        points.push(point);
        self.store.save(&name, &points)
    }

    /// Points of one day, today when `date` is `None`
    pub fn history(&self, instance_id: &str, date: Option<NaiveDate>) -> Result<Vec<MetricPoint>> {
        let date = date.unwrap_or_else(|| Utc::now().date_naive());
        self.store.load_or_default(&file_name(instance_id, date))
    }

    /// Share of today's points where the server was up
    pub fn uptime(&self, instance_id: &str) -> Result<UptimeStats> {
        Ok(UptimeStats::from_points(&self.history(instance_id, None)?))
    }

    /// Sample one running instance; skipped until it has a resource sample
    pub async fn record(&self, instance_id: &str) -> Result<bool> {
        let supervisor = self.registry.supervisor(instance_id)?;
        if !supervisor.is_running() {
            return Ok(false);
        }
        let Some(sample) = supervisor.latest_sample() else {
            return Ok(false);
        };

        let (players, fps) = match self.registry.server_metrics(instance_id).await {
            Ok(metrics) => (metrics.player_count, metrics.fps.unwrap_or(0.0)),
            Err(e) => {
                debug!("No console metrics for {}: {}", instance_id, e);
                (0, 0.0)
            }
        };

        self.append(
            instance_id,
            MetricPoint {
                timestamp: Utc::now(),
                cpu: sample.cpu,
                ram: sample.memory_mb.round() as u64,
                players,
                fps,
            },
        )?;
        Ok(true)
    }

    pub async fn record_all(&self) {
        for id in self.registry.ids() {
            if let Err(e) = self.record(&id).await {
                warn!("Failed to record metrics for {}: {}", id, e);
            }
        }
    }

    pub fn spawn(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                self.record_all().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watchdog::{CrashLog, Watchdog, WatchdogPolicy};
    use chrono::{TimeZone, Utc};
    use forgepm_core::Settings;
    use forgepm_logs::LogSink;
    use forgepm_notify::mock::MockNotifier;
    use tempfile::TempDir;

    fn recorder(dir: &TempDir) -> MetricsRecorder {
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
            Arc::new(Settings::default()),
            watchdog,
            notifier,
            sink,
        )
        .unwrap();
        MetricsRecorder::new(dir.path().join("metrics"), Arc::new(registry))
    }

    fn point(cpu: f32, ram: u64) -> MetricPoint {
        MetricPoint {
            timestamp: Utc::now(),
            cpu,
            ram,
            players: 3,
            fps: 60.0,
        }
    }

    #[tokio::test]
    async fn test_append_and_history() {
        let dir = TempDir::new().unwrap();
        let recorder = recorder(&dir);

        recorder.append("eu", point(12.5, 2048)).unwrap();
        recorder.append("eu", point(10.0, 2050)).unwrap();

        let today = recorder.history("eu", None).unwrap();
        assert_eq!(today.len(), 2);
        assert_eq!(today[1].ram, 2050);

        let file = dir
            .path()
            .join("metrics")
            .join(format!("eu_{}.json", Utc::now().format("%Y-%m-%d")));
        assert!(file.exists());

        let other_day = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        assert!(recorder.history("eu", Some(other_day)).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_points_go_to_their_own_day() {
        let dir = TempDir::new().unwrap();
        let recorder = recorder(&dir);
        let mut old = point(1.0, 1);
        old.timestamp = Utc.with_ymd_and_hms(2024, 3, 9, 23, 59, 0).unwrap();
        recorder.append("eu", old).unwrap();

        let day = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(recorder.history("eu", Some(day)).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_uptime() {
        let dir = TempDir::new().unwrap();
        let recorder = recorder(&dir);
        assert_eq!(recorder.uptime("eu").unwrap(), UptimeStats::default());

        recorder.append("eu", point(5.0, 100)).unwrap();
        recorder.append("eu", point(0.0, 0)).unwrap();
        recorder.append("eu", point(0.0, 512)).unwrap();
        recorder.append("eu", point(3.0, 90)).unwrap();

        let stats = recorder.uptime("eu").unwrap();
        assert_eq!(stats.total_points, 4);
        assert_eq!(stats.online_points, 3);
        assert!((stats.uptime_percent - 75.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_stopped_instance_is_not_recorded() {
        let dir = TempDir::new().unwrap();
        let recorder = recorder(&dir);
        assert!(!recorder.record("default").await.unwrap());
        recorder.record_all().await;
        assert!(recorder.history("default", None).unwrap().is_empty());
    }
}
