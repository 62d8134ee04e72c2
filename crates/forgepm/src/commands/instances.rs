//! Instance listing and registration

use anyhow::Result;
use forgepm_core::InstanceUpdate;
use forgepm_ipc::{Request, Response};

use super::{request, unexpected};
use crate::cli::{CreateArgs, UpdateArgs};
use crate::output::{print_instance_detail, print_instances, print_success};

pub async fn list() -> Result<()> {
    match request(&Request::ListInstances).await? {
        Response::Instances { instances } => {
            print_instances(&instances);
            Ok(())
        }
        other => Err(unexpected(other)),
    }
}

pub async fn show(id: &str) -> Result<()> {
    match request(&Request::GetInstance { id: id.to_string() }).await? {
        Response::Instance { instance } => {
            print_instance_detail(&instance);
            Ok(())
        }
        other => Err(unexpected(other)),
    }
}

pub async fn create(args: CreateArgs) -> Result<()> {
    let name = args.name.unwrap_or_else(|| args.id.clone());
    let response = request(&Request::CreateInstance {
        id: args.id,
        name,
        path: args.path,
        config_path: args.config_path,
    })
    .await?;

    match response {
        Response::Instance { instance } => {
            print_success(&format!("Created instance '{}' ({})", instance.id, instance.name));
            Ok(())
        }
        other => Err(unexpected(other)),
    }
}

pub async fn update(args: UpdateArgs) -> Result<()> {
    let settings = if args.settings.is_empty() {
        None
    } else {
        Some(args.settings.into_iter().collect())
    };
    let update = InstanceUpdate {
        name: args.name,
        path: args.path,
        config_path: args.config_path,
        settings,
    };

    match request(&Request::UpdateInstance { id: args.id, update }).await? {
        Response::Instance { instance } => {
            print_success(&format!("Updated instance '{}'", instance.id));
            Ok(())
        }
        other => Err(unexpected(other)),
    }
}

pub async fn remove(id: &str) -> Result<()> {
    match request(&Request::DeleteInstance { id: id.to_string() }).await? {
        Response::Ok { message } => {
            print_success(&message);
            Ok(())
        }
        other => Err(unexpected(other)),
    }
}
