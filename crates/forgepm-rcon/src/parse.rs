//! Best-effort parsers for console command output
//!
//! The server's text output has no declared grammar. Every parser here
//! matches the lines it understands and skips the rest.

use forgepm_core::{PlayerInfo, ServerMetrics};
use once_cell::sync::Lazy;
use regex::Regex;

/// `0   203.0.113.7:2304   45   0123abcd...(OK) Some Name (Lobby)`
static PLAYER_ROW: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(\d+)\s+(\S+:\d+)\s+(-?\d+)\s+([0-9A-Za-z_-]+|-)\((\?|[A-Za-z]+)\)\s+(.+?)\s*$")
        .expect("Invalid player row regex")
});

static TOTAL_PLAYERS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\((\d+)\s+players?\s+in\s+total\)").expect("Invalid total regex")
});

static PLAYERS_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^\s*players?\s*[:=]\s*(\d+)").expect("Invalid players field regex")
});

static FPS_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bfps\s*[:=]?\s*(\d+(?:\.\d+)?)").expect("Invalid fps regex")
});

/// `[Global] Name: text` with the channel tag optional
static CHAT_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:\[.*?\]\s*)?(\w+):\s*(.+)").expect("Invalid chat line regex"));

const LOBBY_SUFFIX: &str = "(Lobby)";

/// Chat prefix marking a line as a command
pub const CHAT_COMMAND_PREFIX: char = '!';

/// A `!command` typed into in-game chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatCommand {
    pub player: String,
    /// Full text including the leading `!`
    pub content: String,
}

/// Parse a `#players` listing
pub fn parse_players(output: &str) -> Vec<PlayerInfo> {
    output.lines().filter_map(parse_player_row).collect()
}

fn parse_player_row(line: &str) -> Option<PlayerInfo> {
    let caps = PLAYER_ROW.captures(line)?;

    let index = caps.get(1)?.as_str().parse().ok()?;
    let address = caps.get(2)?.as_str().to_string();
    let ping = caps.get(3)?.as_str().parse::<i64>().ok()?.max(0) as u32;
    let guid = caps.get(4)?.as_str().to_string();
    let verified = caps.get(5)?.as_str().eq_ignore_ascii_case("ok");

    let mut name = caps.get(6)?.as_str().trim().to_string();
    let in_lobby = name.ends_with(LOBBY_SUFFIX);
    if in_lobby {
        name.truncate(name.len() - LOBBY_SUFFIX.len());
        name = name.trim_end().to_string();
    }
    if name.is_empty() {
        return None;
    }

    Some(PlayerInfo {
        index,
        address,
        ping,
        guid,
        verified,
        name,
        in_lobby,
    })
}

/// Parse player count and FPS out of a `#status` style reply
///
/// The player count falls back to counting player rows when no explicit
/// total is present.
pub fn parse_metrics(output: &str) -> ServerMetrics {
    let player_count = TOTAL_PLAYERS
        .captures(output)
        .or_else(|| PLAYERS_FIELD.captures(output))
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or_else(|| parse_players(output).len() as u32);

    let fps = FPS_FIELD
        .captures(output)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok());

    ServerMetrics { player_count, fps }
}

/// Pick the chat commands out of forwarded console output
///
/// Plain chat and every other console line are dropped.
pub fn parse_chat(output: &str) -> Vec<ChatCommand> {
    output
        .lines()
        .filter_map(|line| {
            let caps = CHAT_LINE.captures(line.trim())?;
            let content = caps.get(2)?.as_str().trim();
            if !content.starts_with(CHAT_COMMAND_PREFIX) {
                return None;
            }
            Some(ChatCommand {
                player: caps.get(1)?.as_str().to_string(),
                content: content.to_string(),
            })
        })
        .collect()
}
