//! Map mappings and the map change workflow

use forgepm_core::{
    CurrentMap, Error, JsonStore, MapMapping, MapTarget, Result, HEADLESS_FLAG,
    MAPPINGS_FILE, MAP_CHANGE_SETTLE,
};
use forgepm_logs::LogSink;
use forgepm_notify::{dispatch, InstanceEvent, Notifier};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::registry::InstanceRegistry;

/// Slot to scenario mappings persisted in `map_mappings.json`
pub struct MappingManager {
    store: JsonStore,
    mappings: RwLock<Vec<MapMapping>>,
}

impl MappingManager {
    pub fn open(store: JsonStore) -> Result<Self> {
        let mut mappings: Vec<MapMapping> = store.load_or_default(MAPPINGS_FILE)?;
        mappings.sort_by_key(|m| m.slot);
        Ok(Self {
            store,
            mappings: RwLock::new(mappings),
        })
    }

    fn persist(&self, mappings: &[MapMapping]) -> Result<()> {
        self.store.save(MAPPINGS_FILE, mappings)
    }

    /// Sorted by slot
    pub fn list(&self) -> Vec<MapMapping> {
        self.mappings.read().clone()
    }

    pub fn get(&self, slot: u32) -> Result<MapMapping> {
        self.mappings
            .read()
            .iter()
            .find(|m| m.slot == slot)
            .cloned()
            .ok_or(Error::MappingNotFound(slot))
    }

    pub fn get_by_scenario_id(&self, scenario_id: &str) -> Option<MapMapping> {
        self.mappings
            .read()
            .iter()
            .find(|m| m.scenario_id == scenario_id)
            .cloned()
    }

    /// Insert or replace the mapping for a slot
    pub fn add(&self, slot: u32, scenario_id: &str, name: &str) -> Result<MapMapping> {
        let mapping = MapMapping::new(slot, scenario_id, name)?;
        let snapshot = {
            let mut mappings = self.mappings.write();
            mappings.retain(|m| m.slot != slot);
            mappings.push(mapping.clone());
            mappings.sort_by_key(|m| m.slot);
            mappings.clone()
        };
        self.persist(&snapshot)?;
        Ok(mapping)
    }

    pub fn remove(&self, slot: u32) -> Result<()> {
        let snapshot = {
            let mut mappings = self.mappings.write();
            let before = mappings.len();
            mappings.retain(|m| m.slot != slot);
            if mappings.len() == before {
                return Err(Error::MappingNotFound(slot));
            }
            mappings.clone()
        };
        self.persist(&snapshot)
    }
}

/// Outcome of a completed map change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapChange {
    pub from: Option<String>,
    pub to: String,
    pub map_name: String,
}

/// Rewrites an instance's scenario and restarts it
pub struct MapChangeService {
    registry: Arc<InstanceRegistry>,
    mappings: Arc<MappingManager>,
    notifier: Arc<dyn Notifier>,
    sink: Arc<LogSink>,
    settle: Duration,
}

impl MapChangeService {
    pub fn new(
        registry: Arc<InstanceRegistry>,
        mappings: Arc<MappingManager>,
        notifier: Arc<dyn Notifier>,
        sink: Arc<LogSink>,
    ) -> Self {
        Self {
            registry,
            mappings,
            notifier,
            sink,
            settle: MAP_CHANGE_SETTLE,
        }
    }

    /// Wait between stop and start
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn mappings(&self) -> &Arc<MappingManager> {
        &self.mappings
    }

    /// Apply a slot or a literal scenario id
    pub async fn apply(&self, id: &str, target: &MapTarget, requester: &str) -> Result<MapChange> {
        match target {
            MapTarget::Slot(slot) => self.change_by_slot(id, *slot, requester).await,
            MapTarget::Scenario(scenario_id) => {
                let name = self
                    .mappings
                    .get_by_scenario_id(scenario_id)
                    .map(|m| m.name)
                    .unwrap_or_else(|| scenario_id.clone());
                self.change_by_scenario(id, scenario_id, &name, requester)
                    .await
            }
        }
    }

    pub async fn change_by_slot(&self, id: &str, slot: u32, requester: &str) -> Result<MapChange> {
        let mapping = match self.mappings.get(slot) {
            Ok(mapping) => mapping,
            Err(e) => {
                self.report_failure(id, requester, &e);
                return Err(e);
            }
        };
        self.change_by_scenario(id, &mapping.scenario_id, &mapping.name, requester)
            .await
    }

    pub async fn change_by_scenario(
        &self,
        id: &str,
        scenario_id: &str,
        map_name: &str,
        requester: &str,
    ) -> Result<MapChange> {
        info!(
            "Map change on {} to {} ({}) requested by {}",
            id, map_name, scenario_id, requester
        );

        // Nothing touches the running server until the config is on disk
        let from = match self.rewrite_config(id, scenario_id) {
            Ok(from) => from,
            Err(e) => {
                self.report_failure(id, requester, &e);
                return Err(e);
            }
        };
        self.sink.info(
            Some(id),
            format!(
                "Scenario set to {} (was {})",
                scenario_id,
                from.as_deref().unwrap_or("unset")
            ),
        );

        match self.registry.stop(id).await {
            Ok(outcome) => info!("Stopped {} for map change ({})", id, outcome),
            Err(e) => warn!("Stop before map change on {} failed, continuing: {}", id, e),
        }

        tokio::time::sleep(self.settle).await;

        if let Err(e) = self.registry.start(id, &[HEADLESS_FLAG.to_string()]).await {
            let partial = Error::PartialFailure {
                instance: id.to_string(),
                action: "map change".to_string(),
                reason: format!(
                    "config now uses {} but the server did not start: {}",
                    scenario_id, e
                ),
            };
            self.sink.error(Some(id), partial.to_string());
            dispatch(
                &self.notifier,
                InstanceEvent::MapChangeIncomplete {
                    instance: id.to_string(),
                    to: scenario_id.to_string(),
                    requester: requester.to_string(),
                    error: e.to_string(),
                },
            );
            return Err(partial);
        }

        dispatch(
            &self.notifier,
            InstanceEvent::MapChanged {
                instance: id.to_string(),
                from: from.clone(),
                to: scenario_id.to_string(),
                map_name: map_name.to_string(),
                requester: requester.to_string(),
            },
        );

        Ok(MapChange {
            from,
            to: scenario_id.to_string(),
            map_name: map_name.to_string(),
        })
    }

    /// Load, set the scenario, write back; returns the previous scenario
    fn rewrite_config(&self, id: &str, scenario_id: &str) -> Result<Option<String>> {
        let mut config = self.registry.game_config(id)?;
        let from = config.scenario_id().map(str::to_string);
        config.set_scenario_id(scenario_id)?;
        config.save()?;
        Ok(from)
    }

    fn report_failure(&self, id: &str, requester: &str, error: &Error) {
        self.sink
            .error(Some(id), format!("Map change failed: {}", error));
        dispatch(
            &self.notifier,
            InstanceEvent::MapChangeFailed {
                instance: id.to_string(),
                requester: requester.to_string(),
                error: error.to_string(),
            },
        );
    }

    /// Scenario in the instance's config and the mapping pointing at it
    pub fn current_map(&self, id: &str) -> Result<CurrentMap> {
        let config = self.registry.game_config(id)?;
        let scenario_id = config.scenario_id().map(str::to_string);
        let mapping = scenario_id
            .as_deref()
            .and_then(|s| self.mappings.get_by_scenario_id(s));
        Ok(CurrentMap {
            scenario_id,
            mapping,
        })
    }
}
