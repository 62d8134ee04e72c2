//! Remote console commands and player management

use anyhow::Result;
use forgepm_ipc::{Request, Response};

use super::{request, unexpected};
use crate::output::{print_players, print_success};

fn print_output(output: &str) {
    let output = output.trim_end();
    if output.is_empty() {
        print_success("Command sent");
    } else {
        println!("{}", output);
    }
}

pub async fn rcon(instance: &str, words: &[String]) -> Result<()> {
    let response = request(&Request::SendCommand {
        id: instance.to_string(),
        command: words.join(" "),
    })
    .await?;

    match response {
        Response::CommandOutput { output } => {
            print_output(&output);
            Ok(())
        }
        other => Err(unexpected(other)),
    }
}

pub async fn players(id: &str) -> Result<()> {
    match request(&Request::GetPlayers { id: id.to_string() }).await? {
        Response::Players { players } => {
            print_players(&players);
            Ok(())
        }
        other => Err(unexpected(other)),
    }
}

pub async fn kick(instance: &str, index: u32, reason: Option<String>) -> Result<()> {
    let response = request(&Request::KickPlayer {
        id: instance.to_string(),
        index,
        reason,
    })
    .await?;

    match response {
        Response::CommandOutput { output } => {
            print_output(&output);
            Ok(())
        }
        other => Err(unexpected(other)),
    }
}

pub async fn ban(instance: &str, identifier: &str, reason: Option<String>) -> Result<()> {
    let response = request(&Request::BanPlayer {
        id: instance.to_string(),
        identifier: identifier.to_string(),
        reason,
    })
    .await?;

    match response {
        Response::CommandOutput { output } => {
            print_output(&output);
            Ok(())
        }
        other => Err(unexpected(other)),
    }
}
