//! Player join/leave monitor

use chrono::{DateTime, Utc};
use forgepm_core::PlayerInfo;
use forgepm_notify::{dispatch, InstanceEvent, Notifier};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::registry::InstanceRegistry;

/// Players seen on one server run, GUID to name
struct Snapshot {
    run: Option<DateTime<Utc>>,
    players: BTreeMap<String, String>,
}

fn player_key(player: &PlayerInfo) -> String {
    if player.guid.is_empty() || player.guid == "-" {
        format!("name:{}", player.name)
    } else {
        player.guid.clone()
    }
}

/// Changes between two polls
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PlayerDiff {
    pub joined: Vec<String>,
    pub left: Vec<String>,
}

pub struct PlayerMonitor {
    registry: Arc<InstanceRegistry>,
    notifier: Arc<dyn Notifier>,
    snapshots: Mutex<HashMap<String, Snapshot>>,
}

impl PlayerMonitor {
    pub fn new(registry: Arc<InstanceRegistry>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            registry,
            notifier,
            snapshots: Mutex::new(HashMap::new()),
        }
    }

    /// Record a player list; the first list of a server run reports nothing
    pub fn observe(
        &self,
        instance_id: &str,
        run: Option<DateTime<Utc>>,
        players: &[PlayerInfo],
    ) -> PlayerDiff {
        let current: BTreeMap<String, String> = players
            .iter()
            .map(|p| (player_key(p), p.name.clone()))
            .collect();

        let mut snapshots = self.snapshots.lock();
        let previous = snapshots.insert(
            instance_id.to_string(),
            Snapshot {
                run,
                players: current.clone(),
            },
        );

        let Some(previous) = previous.filter(|s| s.run == run) else {
            return PlayerDiff::default();
        };

        PlayerDiff {
            joined: current
                .iter()
                .filter(|(key, _)| !previous.players.contains_key(*key))
                .map(|(_, name)| name.clone())
                .collect(),
            left: previous
                .players
                .iter()
                .filter(|(key, _)| !current.contains_key(*key))
                .map(|(_, name)| name.clone())
                .collect(),
        }
    }

    pub fn forget(&self, instance_id: &str) {
        self.snapshots.lock().remove(instance_id);
    }

    /// One pass over every running instance
    pub async fn poll(&self) {
        for id in self.registry.ids() {
            let Ok(supervisor) = self.registry.supervisor(&id) else {
                continue;
            };
            if !supervisor.is_running() {
                self.forget(&id);
                continue;
            }

            let players = match self.registry.players(&id).await {
                Ok(players) => players,
                Err(e) => {
                    debug!("Player poll of {} failed: {}", id, e);
                    continue;
                }
            };

            let diff = self.observe(&id, supervisor.started_at(), &players);
            for player in diff.joined {
                dispatch(
                    &self.notifier,
                    InstanceEvent::PlayerJoined {
                        instance: id.clone(),
                        player,
                    },
                );
            }
            for player in diff.left {
                dispatch(
                    &self.notifier,
                    InstanceEvent::PlayerLeft {
                        instance: id.clone(),
                        player,
                    },
                );
            }
        }
    }

    pub fn spawn(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                self.poll().await;
            }
        })
    }
}
