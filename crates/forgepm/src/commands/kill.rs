//! Kill command implementation

use anyhow::{bail, Result};
use forgepm_core::Error;
use forgepm_ipc::{Request, Response};

use super::get_client;
use crate::output::{print_error, print_success};

pub async fn execute() -> Result<()> {
    let client = get_client().without_autostart();

    match client.send(&Request::Shutdown).await {
        Ok(Response::Ok { message }) => {
            print_success(&message);
            Ok(())
        }
        Ok(Response::Error { message, .. }) => {
            print_error(&message);
            bail!(message)
        }
        Ok(_) => {
            print_success("Daemon stopped");
            Ok(())
        }
        Err(Error::DaemonNotRunning) => {
            print_success("Daemon is not running");
            Ok(())
        }
        // The daemon may close the socket before the reply arrives
        Err(_) => {
            print_success("Daemon stopped");
            Ok(())
        }
    }
}
