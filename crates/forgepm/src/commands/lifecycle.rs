//! Start, stop and restart

use anyhow::Result;
use forgepm_core::StopOutcome;
use forgepm_ipc::{Request, Response};

use super::{request, unexpected};
use crate::output::{print_info, print_success};

pub async fn start(id: &str, args: Vec<String>) -> Result<()> {
    let response = request(&Request::Start {
        id: id.to_string(),
        args,
    })
    .await?;

    match response {
        Response::Started { id, pid } => {
            print_success(&format!("Started {} (pid {})", id, pid));
            Ok(())
        }
        other => Err(unexpected(other)),
    }
}

pub async fn stop(id: &str) -> Result<()> {
    match request(&Request::Stop { id: id.to_string() }).await? {
        Response::Stopped { id, outcome } => {
            match outcome {
                StopOutcome::Graceful => print_success(&format!("Stopped {}", id)),
                StopOutcome::ForceKilled => {
                    print_success(&format!("Stopped {} (killed after timeout)", id))
                }
                StopOutcome::NotRunning => print_info(&format!("{} was not running", id)),
            }
            Ok(())
        }
        other => Err(unexpected(other)),
    }
}

pub async fn restart(id: &str) -> Result<()> {
    match request(&Request::Restart { id: id.to_string() }).await? {
        Response::Started { id, pid } => {
            print_success(&format!("Restarted {} (pid {})", id, pid));
            Ok(())
        }
        other => Err(unexpected(other)),
    }
}
