//! Map slots and map changes

use anyhow::Result;
use forgepm_core::MapTarget;
use forgepm_ipc::{Request, Response};

use super::{request, unexpected};
use crate::cli::{MapsArgs, MapsCommand};
use crate::output::{print_current_map, print_info, print_maps, print_success};

pub async fn execute(args: MapsArgs) -> Result<()> {
    match args.command.unwrap_or(MapsCommand::Ls) {
        MapsCommand::Ls => list().await,
        MapsCommand::Add {
            slot,
            scenario_id,
            name,
        } => add(slot, scenario_id, name).await,
        MapsCommand::Rm { slot } => remove(slot).await,
        MapsCommand::Apply { target, instance } => apply(&instance, target).await,
        MapsCommand::Current { id } => current(&id).await,
    }
}

async fn list() -> Result<()> {
    match request(&Request::ListMaps).await? {
        Response::Maps { mappings } => {
            print_maps(&mappings);
            Ok(())
        }
        other => Err(unexpected(other)),
    }
}

async fn add(slot: u32, scenario_id: String, name: Option<String>) -> Result<()> {
    let response = request(&Request::AddMap {
        slot,
        scenario_id,
        name,
    })
    .await?;

    match response {
        Response::Map { mapping } => {
            print_success(&format!("Slot {} → {}", mapping.slot, mapping.scenario_id));
            Ok(())
        }
        other => Err(unexpected(other)),
    }
}

async fn remove(slot: u32) -> Result<()> {
    match request(&Request::RemoveMap { slot }).await? {
        Response::Ok { message } => {
            print_success(&message);
            Ok(())
        }
        other => Err(unexpected(other)),
    }
}

async fn apply(instance: &str, target: MapTarget) -> Result<()> {
    print_info(&format!("Changing {} to {}, the server will restart...", instance, target));
    let response = request(&Request::ApplyMap {
        id: instance.to_string(),
        target,
        requester: None,
    })
    .await?;

    match response {
        Response::MapChanged { id, from, to } => {
            print_success(&format!(
                "{}: {} → {}",
                id,
                from.as_deref().unwrap_or("-"),
                to
            ));
            Ok(())
        }
        other => Err(unexpected(other)),
    }
}

async fn current(id: &str) -> Result<()> {
    match request(&Request::CurrentMap { id: id.to_string() }).await? {
        Response::CurrentMap { current } => {
            print_current_map(&current);
            Ok(())
        }
        other => Err(unexpected(other)),
    }
}
