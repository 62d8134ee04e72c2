//! In-game chat commands
//!
//! Players type `!map <slot>`, `!maps` or `!mapnow` in chat. The server only
//! forwards chat to the remote console after `#debugon Console`, so each
//! server run is switched over once before its output is polled. Replies go
//! to everyone on the server through `#say`.

use chrono::{DateTime, Utc};
use forgepm_core::CurrentMap;
use forgepm_rcon::{parse_chat, ChatCommand};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::mapchange::MapChangeService;
use crate::registry::InstanceRegistry;

const FORWARD_CONSOLE: &str = "#debugon Console";
const REPLY_TAG: &str = "[MapBot]";

pub struct ChatMonitor {
    registry: Arc<InstanceRegistry>,
    maps: Arc<MapChangeService>,
    /// Server run each instance had console forwarding switched on for
    forwarding: Mutex<HashMap<String, Option<DateTime<Utc>>>>,
}

impl ChatMonitor {
    pub fn new(registry: Arc<InstanceRegistry>, maps: Arc<MapChangeService>) -> Self {
        Self {
            registry,
            maps,
            forwarding: Mutex::new(HashMap::new()),
        }
    }

    /// One pass over every running instance
    pub async fn poll(&self) {
        for id in self.registry.ids() {
            let Ok(supervisor) = self.registry.supervisor(&id) else {
                continue;
            };
            if !supervisor.is_running() {
                self.forwarding.lock().remove(&id);
                continue;
            }

            self.forward_console(&id, supervisor.started_at()).await;

            let output = match self.registry.send_command(&id, "").await {
                Ok(output) => output,
                Err(e) => {
                    debug!("Chat poll of {} failed: {}", id, e);
                    continue;
                }
            };
            self.handle_output(&id, &output).await;
        }
    }

    /// Switch chat forwarding on once per server run; retried on failure
    async fn forward_console(&self, id: &str, run: Option<DateTime<Utc>>) {
        if self.forwarding.lock().get(id) == Some(&run) {
            return;
        }
        match self.registry.send_command(id, FORWARD_CONSOLE).await {
            Ok(_) => {
                self.forwarding.lock().insert(id.to_string(), run);
            }
            Err(e) => warn!("Could not enable console forwarding on {}: {}", id, e),
        }
    }

    pub async fn handle_output(&self, id: &str, output: &str) {
        for command in parse_chat(output) {
            self.handle(id, &command).await;
        }
    }

    async fn handle(&self, id: &str, command: &ChatCommand) {
        let mut words = command.content.split_whitespace();
        let Some(name) = words.next() else {
            return;
        };

        match name.to_lowercase().as_str() {
            "!map" => self.change_map(id, &command.player, words.next()).await,
            "!maps" => {
                let reply = self.list_reply();
                self.say(id, &reply).await;
            }
            "!mapnow" => {
                let reply = self.current_reply(id);
                self.say(id, &reply).await;
            }
            other => debug!("Ignoring chat command {} from {}", other, command.player),
        }
    }

    async fn change_map(&self, id: &str, player: &str, slot: Option<&str>) {
        let Some(slot) = slot else {
            self.say(id, "Usage: !map <slot> (e.g. !map 1)").await;
            return;
        };
        let Ok(slot) = slot.parse::<u32>() else {
            self.say(id, "Invalid slot number").await;
            return;
        };
        let Ok(mapping) = self.maps.mappings().get(slot) else {
            self.say(id, &format!("No map registered in slot {}", slot))
                .await;
            return;
        };

        self.say(
            id,
            &format!("Changing map to {}... server restarting", mapping.name),
        )
        .await;

        info!("{} asked for slot {} on {} from chat", player, slot, id);
        let requester = format!("in-game ({})", player);
        if let Err(e) = self.maps.change_by_slot(id, slot, &requester).await {
            error!("Map change on {} requested by {} failed: {}", id, player, e);
        }
    }

    fn list_reply(&self) -> String {
        let maps = self.maps.mappings().list();
        if maps.is_empty() {
            return "No maps registered".to_string();
        }
        let slots: Vec<String> = maps
            .iter()
            .map(|m| format!("{}:{}", m.slot, m.name))
            .collect();
        format!("Maps: {}", slots.join(", "))
    }

    fn current_reply(&self, id: &str) -> String {
        match self.maps.current_map(id) {
            Ok(CurrentMap {
                mapping: Some(mapping),
                ..
            }) => format!("Current map: {} (slot {})", mapping.name, mapping.slot),
            Ok(_) => "Current map: not registered".to_string(),
            Err(e) => {
                debug!("Current map lookup on {} failed: {}", id, e);
                "Could not read the current map".to_string()
            }
        }
    }

    async fn say(&self, id: &str, message: &str) {
        let command = format!("#say {} {}", REPLY_TAG, message);
        if let Err(e) = self.registry.send_command(id, &command).await {
            warn!("Chat reply on {} failed: {}", id, e);
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
